pub mod version;
pub mod wire;

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::model::account::Account;
use crate::model::crypto::*;
use crate::model::errors::{
    CryptoError, CseErrKind, CseResult, ParseError, Unexpected,
};
use crate::model::{pubkey, symkey};

use self::version::MetadataVersion;
use self::wire::*;

pub const DIRECTORY_MIMETYPE: &str = "httpd/unix-directory";
const LEGACY_DIRECTORY_MIMETYPE: &str = "inode/directory";

/// One record of the folder's encrypted file list. `content_key`, `nonce`
/// and `tag` protect the file's contents; the metadata key protects this
/// record itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFile {
    pub encrypted_filename: String,
    pub original_filename: String,
    pub mimetype: String,
    pub content_key: Vec<u8>,
    pub nonce: Vec<u8>,
    pub tag: Vec<u8>,
}

impl EncryptedFile {
    pub fn is_directory(&self) -> bool {
        self.mimetype.is_empty()
            || self.mimetype == DIRECTORY_MIMETYPE
            || self.mimetype == LEGACY_DIRECTORY_MIMETYPE
    }
}

/// A participant of a root encrypted folder: identified by certificate,
/// holding the metadata key wrapped for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderUser {
    pub user_id: String,
    pub certificate_pem: String,
    pub encrypted_metadata_key: Vec<u8>,
    pub encrypted_filedrop_key: Option<Vec<u8>>,
}

/// Hex SHA-256 fingerprints of metadata keys. `current` holds keys the
/// folder accepts today; a rotation retires the old digest into `removed`,
/// which sticks around for the migration window so sub-folder re-encryption
/// can still recognize the previous key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyChecksums {
    pub current: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl KeyChecksums {
    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.removed.is_empty()
    }

    pub fn accepts(&self, checksum: &str) -> bool {
        self.current.contains(checksum) || self.removed.contains(checksum)
    }

    pub fn rotate(&mut self, old_key: Option<&AESKey>, new_key: &AESKey) {
        if let Some(old_key) = old_key {
            let retired = symkey::sha256_hex(old_key);
            self.current.remove(&retired);
            self.removed.insert(retired);
        }
        self.current.insert(symkey::sha256_hex(new_key));
    }

    pub fn merge(&mut self, other: &KeyChecksums) {
        self.current.extend(other.current.iter().cloned());
        self.removed.extend(other.removed.iter().cloned());
    }
}

/// The key-chain context of a folder's top level ancestor. Root folders get
/// the default; nested folders get the keys and checksums their root
/// resolved, since nested metadata carries no folder users of its own.
#[derive(Debug, Clone)]
pub struct RootFolderInfo {
    pub root_path: String,
    pub key_for_encryption: Option<AESKey>,
    pub key_for_decryption: Option<AESKey>,
    pub checksums: KeyChecksums,
}

impl RootFolderInfo {
    pub fn root() -> Self {
        Self {
            root_path: "/".to_string(),
            key_for_encryption: None,
            key_for_decryption: None,
            checksums: KeyChecksums::default(),
        }
    }

    pub fn for_nested(
        root_path: &str, key_for_encryption: AESKey, key_for_decryption: AESKey,
        checksums: KeyChecksums,
    ) -> Self {
        Self {
            root_path: root_path.to_string(),
            key_for_encryption: Some(key_for_encryption),
            key_for_decryption: Some(key_for_decryption),
            checksums,
        }
    }

    /// A folder that *is* its own top level ancestor gets the root path.
    pub fn create_root_path(top_level_path: &str, folder_path: &str) -> String {
        if top_level_path == folder_path {
            "/".to_string()
        } else {
            top_level_path.to_string()
        }
    }

    pub fn keys_set(&self) -> bool {
        self.key_for_encryption.is_some()
            && self.key_for_decryption.is_some()
            && !self.checksums.is_empty()
    }
}

/// The in-memory encryption state of one folder: keys, folder users, file
/// records, file drop and checksums, across all three wire generations.
///
/// Constructed empty (first encryption) or by [`FolderMetadata::parse`].
/// Owned by whichever job holds the folder's lock; [`Self::encrypted_metadata`]
/// always serializes at the newest version the server capability allows,
/// never below the version it was parsed from.
#[derive(Debug, Clone)]
pub struct FolderMetadata {
    account: Account,
    is_root: bool,
    existing_version: Option<MetadataVersion>,
    encrypted_version: Option<MetadataVersion>,
    key_for_encryption: Option<AESKey>,
    key_for_decryption: Option<AESKey>,
    checksums: KeyChecksums,
    users: BTreeMap<String, FolderUser>,
    files: Vec<EncryptedFile>,
    filedrop: Option<FileDrop>,
    counter: u64,
}

impl FolderMetadata {
    /// A fresh, valid Model for a folder with no stored metadata yet. For a
    /// root folder at capability >= 2.0 the creator is registered as the
    /// sole folder user under a fresh metadata key.
    pub fn empty(account: &Account, root_info: RootFolderInfo) -> CseResult<Self> {
        let mut metadata = Self {
            account: account.clone(),
            is_root: root_info.root_path == "/",
            existing_version: None,
            encrypted_version: None,
            key_for_encryption: root_info.key_for_encryption,
            key_for_decryption: root_info.key_for_decryption,
            checksums: root_info.checksums,
            users: BTreeMap::new(),
            files: Vec::new(),
            filedrop: None,
            counter: 0,
        };

        let latest = MetadataVersion::latest_supported(account.capability_version)
            .ok_or(CseErrKind::Parse(ParseError::UnsupportedVersion))?;

        if latest < MetadataVersion::V2_0 {
            let key = symkey::generate_key();
            metadata.key_for_encryption = Some(key);
            metadata.key_for_decryption = Some(key);
            return Ok(metadata);
        }

        if metadata.is_root {
            metadata.add_user(&account.user_id.clone(), &account.certificate_pem.clone())?;
            metadata.key_for_decryption = metadata.key_for_encryption;
        }

        Ok(metadata)
    }

    /// Hydrates a Model from a downloaded metadata document. `root_info`
    /// must be resolved for nested folders before calling (roots do not
    /// nest, so that resolution is a single extra fetch).
    pub fn parse(
        account: &Account, metadata_json: &[u8], root_info: RootFolderInfo,
    ) -> CseResult<Self> {
        let raw: serde_json::Value = serde_json::from_slice(metadata_json)?;
        let existing_version = MetadataVersion::sniff(&raw)
            .ok_or(CseErrKind::Parse(ParseError::UnsupportedVersion))?;
        let document: MetadataDocument = serde_json::from_value(raw)?;

        let mut metadata = Self {
            account: account.clone(),
            is_root: root_info.root_path == "/",
            existing_version: Some(existing_version),
            encrypted_version: None,
            key_for_encryption: root_info.key_for_encryption,
            key_for_decryption: root_info.key_for_decryption,
            checksums: root_info.checksums,
            users: BTreeMap::new(),
            files: Vec::new(),
            filedrop: document.filedrop.clone(),
            counter: 0,
        };

        if existing_version >= MetadataVersion::V2_0 {
            metadata.parse_current(&document)?;
        } else {
            metadata.parse_legacy_for_migration(&document, existing_version)?;
        }

        Ok(metadata)
    }

    fn parse_current(&mut self, document: &MetadataDocument) -> CseResult<()> {
        let users_array_valid = (!self.is_root && document.users.is_empty())
            || (self.is_root && !document.users.is_empty());
        if !users_array_valid {
            return Err(CseErrKind::UsersArrayInvalid.into());
        }

        for wire_user in &document.users {
            let user = FolderUser {
                user_id: wire_user.user_id.clone(),
                certificate_pem: wire_user.certificate.clone(),
                encrypted_metadata_key: base64::decode(&wire_user.encrypted_metadata_key)
                    .map_unexpected()?,
                encrypted_filedrop_key: match &wire_user.encrypted_filedrop_key {
                    Some(wrapped) => Some(base64::decode(wrapped).map_unexpected()?),
                    None => None,
                },
            };
            self.users.insert(user.user_id.clone(), user);
        }

        if let Some(own_user) = self.users.get(&self.account.user_id) {
            let unwrapped =
                pubkey::decrypt(&*self.account.key_store, &own_user.encrypted_metadata_key)?;
            let key = to_metadata_key(&unwrapped)?;
            self.key_for_encryption = Some(key);
            self.key_for_decryption = Some(key);
        }

        let key_for_decryption =
            self.key_for_decryption.ok_or(CseErrKind::MetadataKeyMissing)?;

        let block = document
            .metadata
            .as_ref()
            .ok_or_else(|| malformed("document has no metadata block"))?;
        let cipher = WireCipher {
            ciphertext: block
                .ciphertext
                .clone()
                .ok_or_else(|| malformed("metadata block has no ciphertext"))?,
            nonce: block.nonce.clone().ok_or_else(|| malformed("metadata block has no nonce"))?,
            authentication_tag: block
                .authentication_tag
                .clone()
                .ok_or_else(|| malformed("metadata block has no authentication tag"))?,
        };
        let plaintext =
            symkey::decrypt_then_gunzip(&key_for_decryption, &cipher.to_cipher()?)?;
        let payload: CipherPayload = serde_json::from_slice(&plaintext)?;

        if !payload.key_checksums.is_empty() {
            self.checksums.current = payload.key_checksums.iter().cloned().collect();
        }
        if !self.verify_metadata_key(&key_for_decryption) {
            return Err(malformed("metadata key failed checksum verification").into());
        }

        for (encrypted_filename, block) in &payload.files {
            match parse_plain_file_block(encrypted_filename, block)? {
                Some(file) => self.files.push(file),
                None => {
                    warn!(%encrypted_filename, "skipping encrypted file with an empty file name")
                }
            }
        }
        for (encrypted_filename, original_filename) in &payload.folders {
            if original_filename.is_empty() {
                continue;
            }
            self.files.push(EncryptedFile {
                encrypted_filename: encrypted_filename.clone(),
                original_filename: original_filename.clone(),
                mimetype: DIRECTORY_MIMETYPE.to_string(),
                content_key: Vec::new(),
                nonce: Vec::new(),
                tag: Vec::new(),
            });
        }

        self.counter = payload.counter.unwrap_or(0);

        Ok(())
    }

    /// V1/V1.2 documents decrypt with their own embedded wrapped key and are
    /// rewritten at the newest supported version on the next upload.
    fn parse_legacy_for_migration(
        &mut self, document: &MetadataDocument, existing_version: MetadataVersion,
    ) -> CseResult<()> {
        let block = document
            .metadata
            .as_ref()
            .ok_or_else(|| malformed("document has no metadata block"))?;

        // the key embedded in the document wins over any root-provided one
        self.key_for_decryption = None;

        if let Some(wrapped) = &block.metadata_key {
            self.key_for_decryption = Some(unwrap_legacy_key(&self.account, wrapped)?);
        } else if let Some(metadata_keys) = &block.metadata_keys {
            // V1.0 kept a map of wrapped keys, the newest entry wins
            if let Some(wrapped) = metadata_keys.values().last() {
                self.key_for_decryption = Some(unwrap_legacy_key(&self.account, wrapped)?);
            }
        }

        let key_for_decryption =
            self.key_for_decryption.ok_or(CseErrKind::MetadataKeyMissing)?;
        if self.key_for_encryption.is_none() {
            self.key_for_encryption = Some(key_for_decryption);
        }

        if let Some(files) = &document.files {
            for (encrypted_filename, block) in files {
                let plaintext = symkey::decrypt_string(&key_for_decryption, &block.encrypted)?;
                let plain: LegacyFilePlain = serde_json::from_slice(&plaintext)?;
                if plain.filename.is_empty() {
                    warn!(%encrypted_filename, "skipping encrypted file with an empty file name");
                    continue;
                }
                self.files.push(EncryptedFile {
                    encrypted_filename: encrypted_filename.clone(),
                    original_filename: plain.filename,
                    mimetype: recover_mimetype(&plain.mimetype),
                    content_key: base64::decode(&plain.key).map_unexpected()?,
                    nonce: base64::decode(&block.initialization_vector).map_unexpected()?,
                    tag: match &block.authentication_tag {
                        Some(tag) => base64::decode(tag).map_unexpected()?,
                        None => Vec::new(),
                    },
                });
            }
        }

        let stored_checksum = block.checksum.clone().unwrap_or_default();
        let wrapped_key = block.metadata_key.clone().unwrap_or_default();
        if self.compute_legacy_checksum(&wrapped_key) != stored_checksum
            && existing_version >= MetadataVersion::V1_2
        {
            if !self.account.skip_metadata_checksum_validation {
                return Err(CseErrKind::MigrationChecksumMismatch.into());
            }
            warn!("legacy metadata checksum mismatch ignored, revalidating on next sync");
        }

        Ok(())
    }

    /// Serializes at `max(existing, latest supported by the server)`,
    /// opportunistically upgrading legacy folders and never downgrading.
    pub fn encrypted_metadata(&mut self) -> CseResult<Vec<u8>> {
        if !self.is_valid() {
            return Err(CseErrKind::MetadataInvalid.into());
        }

        let latest = MetadataVersion::latest_supported(self.account.capability_version)
            .ok_or(CseErrKind::Parse(ParseError::UnsupportedVersion))?;
        let target = match self.existing_version {
            Some(existing) if existing > latest => existing,
            _ => latest,
        };

        if target < MetadataVersion::V2_0 {
            return self.encrypted_metadata_legacy(target);
        }

        if self.is_root
            && self.users.is_empty()
            && matches!(self.existing_version, Some(v) if v < MetadataVersion::V2_0)
        {
            // migrated from a legacy version: mint a key chain and register
            // the migrating account as the folder user
            let user_id = self.account.user_id.clone();
            let certificate_pem = self.account.certificate_pem.clone();
            self.add_user(&user_id, &certificate_pem)?;
            if self.key_for_decryption.is_none() {
                self.key_for_decryption = self.key_for_encryption;
            }
        }

        let key_for_encryption =
            self.key_for_encryption.ok_or(CseErrKind::MetadataKeyMissing)?;

        let users_array_valid = (!self.is_root && self.users.is_empty())
            || (self.is_root && !self.users.is_empty());
        if !users_array_valid {
            return Err(CseErrKind::UsersArrayInvalid.into());
        }
        // the wire checksum array is root-only; a root without one is broken
        if self.is_root && self.checksums.current.is_empty() {
            return Err(malformed("root folder has no key checksums").into());
        }

        let mut payload = CipherPayload::default();
        for file in &self.files {
            if file.original_filename.is_empty() {
                return Err(malformed("cannot serialize a file with an empty name").into());
            }
            if file.is_directory() {
                payload
                    .folders
                    .insert(file.encrypted_filename.clone(), file.original_filename.clone());
            } else {
                payload.files.insert(
                    file.encrypted_filename.clone(),
                    PlainFileBlock {
                        filename: file.original_filename.clone(),
                        mimetype: file.mimetype.clone(),
                        key: base64::encode(&file.content_key),
                        initialization_vector: base64::encode(&file.nonce),
                        authentication_tag: base64::encode(&file.tag),
                    },
                );
            }
        }
        if self.is_root {
            payload.key_checksums = self.checksums.current.iter().cloned().collect();
        }
        payload.counter = Some(self.new_counter());

        let plaintext = serde_json::to_vec(&payload)?;
        let cipher = symkey::gzip_then_encrypt(&key_for_encryption, &plaintext)?;
        let mut block = MetadataBlock::default();
        let wire_cipher = WireCipher::from_cipher(&cipher);
        block.ciphertext = Some(wire_cipher.ciphertext);
        block.nonce = Some(wire_cipher.nonce);
        block.authentication_tag = Some(wire_cipher.authentication_tag);
        block.version = Some(serde_json::Value::String(target.as_wire().to_string()));

        let users = self
            .users
            .values()
            .map(|user| WireFolderUser {
                user_id: user.user_id.clone(),
                certificate: user.certificate_pem.clone(),
                encrypted_metadata_key: base64::encode(&user.encrypted_metadata_key),
                encrypted_filedrop_key: user.encrypted_filedrop_key.as_ref().map(base64::encode),
            })
            .collect();

        let document = MetadataDocument {
            metadata: Some(block),
            users,
            filedrop: match &self.filedrop {
                Some(FileDrop::Cipher(cipher)) => Some(FileDrop::Cipher(cipher.clone())),
                // a legacy filedrop object cannot ride along in a V2.0
                // document; it is merged via move_from_filedrop_to_files
                _ => None,
            },
            files: None,
            version: None,
        };

        self.encrypted_version = Some(target);
        Ok(serde_json::to_vec(&document)?)
    }

    fn encrypted_metadata_legacy(&mut self, target: MetadataVersion) -> CseResult<Vec<u8>> {
        let key_for_encryption =
            self.key_for_encryption.ok_or(CseErrKind::MetadataKeyMissing)?;

        // double base64 kept for interoperability with historical clients
        let wrapped = pubkey::encrypt(
            self.account.public_key(),
            base64::encode(base64::encode(key_for_encryption).as_bytes()).as_bytes(),
        )?;
        let wrapped_b64 = base64::encode(wrapped);

        let mut block = MetadataBlock::default();
        block.version = Some(serde_json::Value::String(target.as_wire().to_string()));
        block.checksum = Some(self.compute_legacy_checksum(&wrapped_b64));
        block.metadata_key = Some(wrapped_b64);

        let mut files = BTreeMap::new();
        for file in &self.files {
            let plain = LegacyFilePlain {
                filename: file.original_filename.clone(),
                mimetype: file.mimetype.clone(),
                key: base64::encode(&file.content_key),
            };
            let encrypted =
                symkey::encrypt_string(&key_for_encryption, &serde_json::to_vec(&plain)?)?;
            files.insert(
                file.encrypted_filename.clone(),
                LegacyFileBlock {
                    encrypted,
                    initialization_vector: base64::encode(&file.nonce),
                    authentication_tag: Some(base64::encode(&file.tag)),
                },
            );
        }

        let document = MetadataDocument {
            metadata: Some(block),
            users: Vec::new(),
            filedrop: match &self.filedrop {
                Some(FileDrop::Legacy(filedrop)) if !filedrop.is_empty() => {
                    Some(FileDrop::Legacy(filedrop.clone()))
                }
                _ => None,
            },
            files: if files.is_empty() { None } else { Some(files) },
            version: None,
        };

        self.encrypted_version = Some(target);
        Ok(serde_json::to_vec(&document)?)
    }

    /// `sha256(condensed mnemonic + sorted encrypted filenames + wrapped key)`,
    /// the client-specific integrity check of the legacy generations.
    fn compute_legacy_checksum(&self, wrapped_metadata_key: &str) -> String {
        let mut input = self.account.condensed_mnemonic().into_bytes();
        let mut sorted_names: Vec<&str> =
            self.files.iter().map(|f| f.encrypted_filename.as_str()).collect();
        sorted_names.sort_unstable();
        for name in sorted_names {
            input.extend_from_slice(name.as_bytes());
        }
        input.extend_from_slice(wrapped_metadata_key.as_bytes());
        symkey::sha256_hex(&input)
    }

    fn verify_metadata_key(&self, metadata_key: &AESKey) -> bool {
        if self.existing_version.map_or(true, |v| v < MetadataVersion::V2_0) {
            return true;
        }
        // an empty set is "not yet verifiable" and passes, for legacy compat
        self.checksums.is_empty() || self.checksums.accepts(&symkey::sha256_hex(metadata_key))
    }

    pub fn is_valid(&self) -> bool {
        self.key_for_encryption.is_some() || self.key_for_decryption.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Replaces any record sharing the same original filename.
    pub fn add_encrypted_file(&mut self, file: EncryptedFile) -> CseResult<()> {
        if !self.is_valid() {
            return Err(CseErrKind::MetadataInvalid.into());
        }
        self.files.retain(|f| f.original_filename != file.original_filename);
        self.files.push(file);
        Ok(())
    }

    pub fn remove_encrypted_file(&mut self, original_filename: &str) {
        self.files.retain(|f| f.original_filename != original_filename);
    }

    pub fn remove_all_encrypted_files(&mut self) {
        self.files.clear();
    }

    pub fn files(&self) -> &[EncryptedFile] {
        &self.files
    }

    pub fn users(&self) -> impl Iterator<Item = &FolderUser> {
        self.users.values()
    }

    /// Registers (or replaces) a folder user. Every call rotates the
    /// metadata key and re-wraps it for all users.
    pub fn add_user(&mut self, user_id: &str, certificate_pem: &str) -> CseResult<bool> {
        if !self.is_root {
            return Err(CseErrKind::UserMutationOnNonRoot.into());
        }
        if user_id.is_empty() || certificate_pem.is_empty() {
            return Err(CseErrKind::CertificateInvalid.into());
        }
        let public_key = pubkey::public_key_from_pem(certificate_pem)?;

        self.create_new_metadata_key();
        let key_for_encryption =
            self.key_for_encryption.ok_or(CseErrKind::MetadataKeyMissing)?;
        let user = FolderUser {
            user_id: user_id.to_string(),
            certificate_pem: certificate_pem.to_string(),
            encrypted_metadata_key: pubkey::encrypt(&public_key, &key_for_encryption)?,
            encrypted_filedrop_key: None,
        };
        self.users.insert(user_id.to_string(), user);
        self.update_users_encrypted_metadata_key()?;

        Ok(true)
    }

    /// Rotates the metadata key even when the user was already gone, so a
    /// repeated removal still invalidates what that user could decrypt.
    pub fn remove_user(&mut self, user_id: &str) -> CseResult<bool> {
        if !self.is_root {
            return Err(CseErrKind::UserMutationOnNonRoot.into());
        }
        if user_id.is_empty() {
            return Err(CseErrKind::CertificateInvalid.into());
        }

        self.create_new_metadata_key();
        let removed = self.users.remove(user_id).is_some();
        self.update_users_encrypted_metadata_key()?;

        Ok(removed)
    }

    fn create_new_metadata_key(&mut self) {
        if !self.is_root {
            return;
        }
        let new_key = symkey::generate_key();
        self.checksums.rotate(self.key_for_encryption.as_ref(), &new_key);
        self.key_for_encryption = Some(new_key);
    }

    fn update_users_encrypted_metadata_key(&mut self) -> CseResult<()> {
        let key_for_encryption =
            self.key_for_encryption.ok_or(CseErrKind::MetadataKeyMissing)?;
        for user in self.users.values_mut() {
            let public_key = match pubkey::public_key_from_pem(&user.certificate_pem) {
                Ok(key) => key,
                Err(_) => {
                    warn!(user = %user.user_id, "cannot re-wrap metadata key, bad certificate");
                    continue;
                }
            };
            user.encrypted_metadata_key = pubkey::encrypt(&public_key, &key_for_encryption)?;
        }
        Ok(())
    }

    pub fn filedrop(&self) -> Option<&FileDrop> {
        self.filedrop.as_ref()
    }

    pub fn is_filedrop_present(&self) -> bool {
        match &self.filedrop {
            Some(FileDrop::Cipher(_)) => true,
            Some(FileDrop::Legacy(entries)) => !entries.is_empty(),
            None => false,
        }
    }

    /// Merges the file drop into the main file list. Returns false when
    /// there is nothing to merge or no key to decrypt it with.
    pub fn move_from_filedrop_to_files(&mut self) -> CseResult<bool> {
        let cipher = match &self.filedrop {
            Some(FileDrop::Cipher(cipher)) => cipher.clone(),
            _ => return Ok(false),
        };
        let key = match self.key_for_decryption {
            Some(key) => key,
            None => return Ok(false),
        };

        let plaintext = symkey::decrypt_then_gunzip(&key, &cipher.to_cipher()?)?;
        let payload: CipherPayload = serde_json::from_slice(&plaintext)?;
        for (encrypted_filename, block) in &payload.files {
            if let Some(file) = parse_plain_file_block(encrypted_filename, block)? {
                self.add_encrypted_file(file)?;
            }
        }

        self.filedrop = None;
        Ok(true)
    }

    pub fn encrypted_metadata_need_update(&self) -> bool {
        match MetadataVersion::latest_supported(self.account.capability_version) {
            Some(latest) => self.existing_version.map_or(false, |existing| latest > existing),
            None => false,
        }
    }

    pub fn existing_metadata_version(&self) -> Option<MetadataVersion> {
        self.existing_version
    }

    pub fn encrypted_metadata_version(&self) -> Option<MetadataVersion> {
        self.encrypted_version
    }

    /// Optimistic-concurrency counter sent with V2.0 lock requests.
    pub fn new_counter(&self) -> u64 {
        self.counter + 1
    }

    pub fn key_for_encryption(&self) -> Option<AESKey> {
        self.key_for_encryption
    }

    pub fn key_for_decryption(&self) -> Option<AESKey> {
        self.key_for_decryption
    }

    pub fn key_checksums(&self) -> &KeyChecksums {
        &self.checksums
    }

    pub fn set_key_checksums(&mut self, checksums: KeyChecksums) {
        self.checksums = checksums;
    }
}

fn malformed(details: &str) -> CseErrKind {
    CseErrKind::Parse(ParseError::Malformed(details.to_string()))
}

fn to_metadata_key(bytes: &[u8]) -> CseResult<AESKey> {
    bytes
        .try_into()
        .map_err(|_| CseErrKind::Crypto(CryptoError::InvalidKey).into())
}

fn recover_mimetype(mimetype: &str) -> String {
    // recover from records that wrongly stored "inode/directory"
    if mimetype == LEGACY_DIRECTORY_MIMETYPE {
        DIRECTORY_MIMETYPE.to_string()
    } else {
        mimetype.to_string()
    }
}

fn parse_plain_file_block(
    encrypted_filename: &str, block: &PlainFileBlock,
) -> CseResult<Option<EncryptedFile>> {
    if block.filename.is_empty() {
        return Ok(None);
    }
    Ok(Some(EncryptedFile {
        encrypted_filename: encrypted_filename.to_string(),
        original_filename: block.filename.clone(),
        mimetype: recover_mimetype(&block.mimetype),
        content_key: base64::decode(&block.key).map_unexpected()?,
        nonce: base64::decode(&block.initialization_vector).map_unexpected()?,
        tag: base64::decode(&block.authentication_tag).map_unexpected()?,
    }))
}

/// The legacy key rides through two layers of base64 before the RSA wrap;
/// undoing it takes the mirror-image decode chain.
fn unwrap_legacy_key(account: &Account, wrapped_b64: &str) -> CseResult<AESKey> {
    let wrapped = base64::decode(wrapped_b64).map_unexpected()?;
    let decrypted = pubkey::decrypt(&*account.key_store, &wrapped)?;
    let once = base64::decode(&decrypted).map_unexpected()?;
    let twice = base64::decode(&once).map_unexpected()?;
    to_metadata_key(&twice)
}
