//! Serde shapes for the metadata document generations.
//!
//! V2.0 documents look like
//! `{metadata: {ciphertext, nonce, authenticationTag, version},
//!   users: [{userId, certificate, encryptedMetadataKey, encryptedFiledropKey}],
//!   filedrop: {ciphertext, nonce, authenticationTag}}`
//! where the ciphertext decrypts to a [`CipherPayload`]. Legacy documents
//! nest per-file encrypted blobs directly and keep a single wrapped
//! `metadata.metadataKey`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::crypto::AESCipher;
use crate::model::errors::{CseResult, Unexpected};

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetadataDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataBlock>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<WireFolderUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filedrop: Option<FileDrop>,
    /// legacy outer file map, per-file encrypted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<BTreeMap<String, LegacyFileBlock>>,
    /// some historical clients wrote the version at the document level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetadataBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(
        default,
        rename = "authenticationTag",
        skip_serializing_if = "Option::is_none"
    )]
    pub authentication_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<serde_json::Value>,
    /// V1.2: the single asymmetrically wrapped metadata key
    #[serde(default, rename = "metadataKey", skip_serializing_if = "Option::is_none")]
    pub metadata_key: Option<String>,
    /// V1.0: historical map of wrapped keys, the newest entry wins
    #[serde(default, rename = "metadataKeys", skip_serializing_if = "Option::is_none")]
    pub metadata_keys: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WireFolderUser {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub certificate: String,
    #[serde(rename = "encryptedMetadataKey")]
    pub encrypted_metadata_key: String,
    #[serde(
        default,
        rename = "encryptedFiledropKey",
        skip_serializing_if = "Option::is_none"
    )]
    pub encrypted_filedrop_key: Option<String>,
}

/// `{ciphertext, nonce, authenticationTag}` with base64 contents.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WireCipher {
    pub ciphertext: String,
    pub nonce: String,
    #[serde(rename = "authenticationTag")]
    pub authentication_tag: String,
}

impl WireCipher {
    pub fn from_cipher(cipher: &AESCipher) -> Self {
        Self {
            ciphertext: base64::encode(&cipher.value),
            nonce: base64::encode(&cipher.nonce),
            authentication_tag: base64::encode(&cipher.tag),
        }
    }

    pub fn to_cipher(&self) -> CseResult<AESCipher> {
        Ok(AESCipher::new(
            base64::decode(&self.ciphertext).map_unexpected()?,
            base64::decode(&self.nonce).map_unexpected()?,
            base64::decode(&self.authentication_tag).map_unexpected()?,
        ))
    }
}

/// The file drop changed shape across generations: V2.0 stores one
/// additively encrypted blob, V1.x kept a raw JSON object.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum FileDrop {
    Cipher(WireCipher),
    Legacy(BTreeMap<String, serde_json::Value>),
}

/// Legacy outer file entry; `encrypted` decrypts to a [`LegacyFilePlain`].
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LegacyFileBlock {
    pub encrypted: String,
    #[serde(rename = "initializationVector")]
    pub initialization_vector: String,
    #[serde(
        default,
        rename = "authenticationTag",
        skip_serializing_if = "Option::is_none"
    )]
    pub authentication_tag: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LegacyFilePlain {
    pub filename: String,
    #[serde(default)]
    pub mimetype: String,
    pub key: String,
}

/// Plaintext of the V2.0 bulk blob.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CipherPayload {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, PlainFileBlock>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub folders: BTreeMap<String, String>,
    #[serde(default, rename = "keyChecksums", skip_serializing_if = "Vec::is_empty")]
    pub key_checksums: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PlainFileBlock {
    pub filename: String,
    #[serde(default)]
    pub mimetype: String,
    pub key: String,
    #[serde(rename = "initializationVector")]
    pub initialization_vector: String,
    #[serde(rename = "authenticationTag")]
    pub authentication_tag: String,
}
