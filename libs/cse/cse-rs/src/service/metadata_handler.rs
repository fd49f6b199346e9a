use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::io::journal::SyncJournal;
use crate::io::network::ServerApi;
use crate::model::account::Account;
use crate::model::api::FolderToken;
use crate::model::errors::{CseErr, CseErrKind, CseResult};
use crate::model::metadata::{FolderMetadata, RootFolderInfo};
use crate::Cse;

/// Cooperative cancellation: checked between steps, never mid-request.
pub type CancelFlag = Arc<AtomicBool>;

/// Terminal outcome of a job. Every run funnels into exactly one of these,
/// even when the unlock step itself fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub code: i32,
    pub message: String,
}

impl JobStatus {
    pub fn success() -> Self {
        Self { code: 200, message: String::new() }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn is_success(&self) -> bool {
        self.code == 200
    }

    pub fn from_err(err: &CseErr) -> Self {
        let code = match &err.kind {
            CseErrKind::Network { status, .. } => *status as i32,
            CseErrKind::LockFailed(status) => *status as i32,
            CseErrKind::UnlockFailed(status) => *status as i32,
            _ => -1,
        };
        Self { code, message: err.to_string() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Idle,
    ResolvingFolderId,
    FetchingMetadata,
    Valid,
    Invalid,
    Locking,
    Locked,
    Uploading,
    Unlocking,
    Done,
    Failed,
}

/// Fetch-and-upload orchestration for one folder's metadata.
///
/// `fetch_metadata` runs Idle → ResolvingFolderId → FetchingMetadata →
/// Valid | Invalid; `upload_metadata` runs Valid → Locking → Locked →
/// Uploading → Unlocking → Done | Failed. File-content mutations go on the
/// Model between the two calls (optimistic, before the lock); membership
/// mutations wait until the lock is held.
pub struct EncryptedFolderMetadataHandler {
    account: Account,
    client: Arc<dyn ServerApi>,
    journal: Arc<dyn SyncJournal>,
    folder_path: String,
    top_level_path: String,
    cancel: CancelFlag,

    state: HandlerState,
    folder_id: Option<String>,
    folder_token: Option<FolderToken>,
    metadata: Option<FolderMetadata>,
    root_info_override: Option<RootFolderInfo>,
    is_folder_locked: bool,
    is_unlock_running: bool,
    is_new_metadata_created: bool,
    upload_status_emitted: bool,
}

impl Cse {
    pub fn metadata_handler(
        &self, folder_path: &str, top_level_path: &str,
    ) -> CseResult<EncryptedFolderMetadataHandler> {
        Ok(EncryptedFolderMetadataHandler::new(
            self.get_account()?.clone(),
            self.client.clone(),
            self.journal.clone(),
            folder_path,
            top_level_path,
        ))
    }
}

impl EncryptedFolderMetadataHandler {
    pub fn new(
        account: Account, client: Arc<dyn ServerApi>, journal: Arc<dyn SyncJournal>,
        folder_path: &str, top_level_path: &str,
    ) -> Self {
        Self {
            account,
            client,
            journal,
            folder_path: folder_path.to_string(),
            top_level_path: top_level_path.to_string(),
            cancel: CancelFlag::default(),
            state: HandlerState::Idle,
            folder_id: None,
            folder_token: None,
            metadata: None,
            root_info_override: None,
            is_folder_locked: false,
            is_unlock_running: false,
            is_new_metadata_created: false,
            upload_status_emitted: false,
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Use when modifying metadata for folders inside a top level one that
    /// is already locked: the cascade shares the outer token and the outer
    /// orchestrator keeps ownership of the unlock.
    pub fn set_folder_token(&mut self, token: FolderToken) {
        self.folder_token = Some(token);
        self.is_folder_locked = true;
    }

    /// Pre-resolved root key chain, skipping the ancestor fetch.
    pub fn set_root_folder_info(&mut self, root_info: RootFolderInfo) {
        self.root_info_override = Some(root_info);
    }

    /// Use when the metadata was already fetched elsewhere: no fetching
    /// happens in this handler, `upload_metadata` can run directly.
    pub fn set_prefetched_metadata(&mut self, metadata: FolderMetadata, folder_id: &str) {
        self.metadata = Some(metadata);
        self.folder_id = Some(folder_id.to_string());
        self.state = HandlerState::Valid;
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    pub fn folder_id(&self) -> Option<&str> {
        self.folder_id.as_deref()
    }

    pub fn folder_token(&self) -> Option<&FolderToken> {
        self.folder_token.as_ref()
    }

    pub fn folder_metadata(&self) -> Option<&FolderMetadata> {
        self.metadata.as_ref()
    }

    pub fn folder_metadata_mut(&mut self) -> Option<&mut FolderMetadata> {
        self.metadata.as_mut()
    }

    pub fn is_folder_locked(&self) -> bool {
        self.is_folder_locked
    }

    pub fn is_unlock_running(&self) -> bool {
        self.is_unlock_running
    }

    /// True when the original fetch found no stored metadata (HTTP 404);
    /// the upload then stores instead of updates.
    pub fn is_new_metadata_created(&self) -> bool {
        self.is_new_metadata_created
    }

    fn check_cancelled(&self) -> CseResult<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(CseErrKind::Cancelled.into());
        }
        Ok(())
    }

    /// Resolves the folder id, downloads and decrypts the metadata. A 404
    /// yields a valid empty Model iff `allow_empty` is set.
    pub async fn fetch_metadata(&mut self, allow_empty: bool) -> JobStatus {
        match self.fetch_metadata_inner(allow_empty).await {
            Ok(()) => {
                self.state = HandlerState::Valid;
                JobStatus::success()
            }
            Err(err) => {
                debug!("error fetching or decrypting metadata: {err}");
                self.state = HandlerState::Invalid;
                JobStatus::from_err(&err)
            }
        }
    }

    /// Metadata endpoints key by numeric folder id; paths resolve through
    /// the directory listing first. Resolution failure is fatal.
    pub async fn resolve_folder_id(&mut self) -> CseResult<String> {
        if let Some(folder_id) = &self.folder_id {
            return Ok(folder_id.clone());
        }
        self.check_cancelled()?;
        self.state = HandlerState::ResolvingFolderId;
        let folder_id = self
            .client
            .folder_id(&self.account, &self.folder_path)
            .await?;
        self.folder_id = Some(folder_id.clone());
        Ok(folder_id)
    }

    async fn fetch_metadata_inner(&mut self, allow_empty: bool) -> CseResult<()> {
        let folder_id = self.resolve_folder_id().await?;

        self.check_cancelled()?;
        self.state = HandlerState::FetchingMetadata;
        let raw = self.client.metadata(&self.account, &folder_id).await?;
        let root_info = self.resolve_root_info().await?;

        match raw {
            Some(raw) => {
                self.metadata =
                    Some(FolderMetadata::parse(&self.account, raw.as_bytes(), root_info)?);
            }
            None if allow_empty => {
                debug!("no metadata stored yet, starting from an empty Model");
                self.is_new_metadata_created = true;
                self.metadata = Some(FolderMetadata::empty(&self.account, root_info)?);
            }
            None => {
                return Err(CseErrKind::Network {
                    status: 404,
                    message: "error fetching metadata".to_string(),
                }
                .into())
            }
        }
        Ok(())
    }

    /// A nested folder inherits its key chain from its top level ancestor's
    /// metadata. One level of recursion only: roots do not nest.
    async fn resolve_root_info(&mut self) -> CseResult<RootFolderInfo> {
        let root_path =
            RootFolderInfo::create_root_path(&self.top_level_path, &self.folder_path);
        if root_path == "/" {
            return Ok(RootFolderInfo::root());
        }
        if let Some(root_info) = &self.root_info_override {
            return Ok(root_info.clone());
        }

        let without_keys = RootFolderInfo {
            root_path: root_path.clone(),
            key_for_encryption: None,
            key_for_decryption: None,
            checksums: Default::default(),
        };

        let root_id = self.client.folder_id(&self.account, &root_path).await?;
        let raw = match self.client.metadata(&self.account, &root_id).await? {
            Some(raw) => raw,
            None => return Ok(without_keys),
        };
        let root_metadata =
            FolderMetadata::parse(&self.account, raw.as_bytes(), RootFolderInfo::root())?;

        match (root_metadata.key_for_encryption(), root_metadata.key_for_decryption()) {
            (Some(key_for_encryption), Some(key_for_decryption)) => {
                Ok(RootFolderInfo::for_nested(
                    &root_path,
                    key_for_encryption,
                    key_for_decryption,
                    root_metadata.key_checksums().clone(),
                ))
            }
            // a legacy root has no chain to inherit; the nested document
            // carries its own wrapped key
            _ => Ok(without_keys),
        }
    }

    /// Locks (unless a shared token is already held), uploads the Model,
    /// and unlocks unless `keep_lock`. Any failed step aborts forward
    /// progress and still attempts the unlock before reporting.
    pub async fn upload_metadata(&mut self, keep_lock: bool) -> JobStatus {
        self.upload_status_emitted = false;

        if !(self.folder_token.is_some() && self.is_folder_locked) {
            if let Err(err) = self.lock_folder().await {
                self.state = HandlerState::Failed;
                return self.emit_upload_terminal(JobStatus::from_err(&err));
            }
        }

        match self.upload_inner().await {
            Ok(()) => {
                if !keep_lock {
                    let unlock = self.unlock_folder().await;
                    if !unlock.is_success() {
                        // outcome already decided; the next writer waits out
                        // the server lock timeout
                        warn!("unlock failed after successful upload: {}", unlock.message);
                    }
                }
                self.state = HandlerState::Done;
                self.emit_upload_terminal(JobStatus::success())
            }
            Err(err) => {
                let unlock = self.unlock_folder().await;
                if !unlock.is_success() {
                    warn!("best-effort unlock failed: {}", unlock.message);
                }
                self.state = HandlerState::Failed;
                self.emit_upload_terminal(JobStatus::from_err(&err))
            }
        }
    }

    pub async fn lock_folder(&mut self) -> CseResult<()> {
        // double-lock within one job instance is a programming error; the
        // server enforces one outstanding lock per folder, this is the
        // local defense
        if self.is_folder_locked {
            return Err(CseErrKind::AlreadyLocked.into());
        }
        self.check_cancelled()?;
        self.state = HandlerState::Locking;

        let folder_id = self
            .folder_id
            .clone()
            .ok_or(CseErrKind::FolderIdUnresolved)?;
        let counter = if self.account.capability_version >= 2.0 {
            self.metadata.as_ref().map(|metadata| metadata.new_counter())
        } else {
            None
        };
        let token = self
            .client
            .lock_folder(&self.account, &folder_id, counter)
            .await?;

        self.folder_token = Some(token);
        self.is_folder_locked = true;
        self.state = HandlerState::Locked;
        Ok(())
    }

    async fn upload_inner(&mut self) -> CseResult<()> {
        self.check_cancelled()?;
        self.state = HandlerState::Uploading;

        let folder_id = self
            .folder_id
            .clone()
            .ok_or(CseErrKind::FolderIdUnresolved)?;
        let token = self
            .folder_token
            .clone()
            .ok_or_else(|| CseErrKind::Unexpected("upload without a folder token".to_string()))?;
        let metadata = self.metadata.as_mut().ok_or(CseErrKind::MetadataInvalid)?;
        if !metadata.is_valid() {
            return Err(CseErrKind::MetadataInvalid.into());
        }
        let encrypted = metadata.encrypted_metadata()?;

        if self.is_new_metadata_created {
            self.client
                .store_metadata(&self.account, &folder_id, &token, &encrypted)
                .await?;
        } else {
            self.client
                .update_metadata(&self.account, &folder_id, &token, &encrypted)
                .await?;
        }
        Ok(())
    }

    /// Unlock with no token held is a successful no-op, repeatable. An
    /// unlock failure never reverses an already-decided mutation outcome.
    pub async fn unlock_folder(&mut self) -> JobStatus {
        if self.is_unlock_running {
            return JobStatus::failure(-1, "unlock already running");
        }
        let (folder_id, token) = match (&self.folder_id, &self.folder_token) {
            (Some(folder_id), Some(token)) if self.is_folder_locked => {
                (folder_id.clone(), token.clone())
            }
            _ => return JobStatus::success(),
        };

        self.is_unlock_running = true;
        self.state = HandlerState::Unlocking;
        let result = self
            .client
            .unlock_folder(&self.account, &folder_id, &token)
            .await;
        self.is_unlock_running = false;

        match result {
            Ok(()) => {
                self.is_folder_locked = false;
                self.folder_token = None;
                JobStatus::success()
            }
            Err(err) => {
                warn!("unlock error for folder {folder_id}: {err}");
                JobStatus::from_err(&err)
            }
        }
    }

    /// Idempotency guard: the terminal upload status is produced once.
    fn emit_upload_terminal(&mut self, status: JobStatus) -> JobStatus {
        if self.upload_status_emitted {
            warn!("upload terminal status already emitted, suppressing duplicate");
        }
        self.upload_status_emitted = true;
        status
    }

    /// Updates the journal record of this folder (and optionally others in
    /// a finished cascade) to the encryption status that was uploaded.
    pub fn record_encryption_status(&self, paths: &[String]) -> CseResult<()> {
        let version = match self.metadata.as_ref().and_then(|m| m.encrypted_metadata_version()) {
            Some(version) => version,
            None => return Ok(()),
        };
        for path in paths {
            if let Some(mut record) = self.journal.file_record(path)? {
                record.encryption_status = version.into();
                self.journal.set_file_record(record)?;
            }
        }
        Ok(())
    }
}
