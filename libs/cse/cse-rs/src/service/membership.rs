use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::instrument;

use crate::io::journal::SyncJournal;
use crate::io::network::ServerApi;
use crate::model::account::Account;
use crate::model::api::FolderToken;
use crate::model::errors::{CseErrKind, CseResult};
use crate::model::metadata::{FolderMetadata, KeyChecksums, RootFolderInfo};
use crate::service::keychain::Keychain;
use crate::service::metadata_handler::{
    CancelFlag, EncryptedFolderMetadataHandler, JobStatus,
};
use crate::Cse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Remove,
    /// Internal cascade step: re-wrap one nested folder under the root's
    /// freshly rotated key chain.
    ReEncrypt,
}

/// Adds or removes a folder participant on a root encrypted folder, then
/// re-encrypts every nested encrypted directory below it under the rotated
/// key chain. Sub-jobs run strictly sequentially, one at a time, each seeded
/// with the checksums accumulated so far, all sharing the root's lock token.
///
/// A sub-job failure short-circuits the remaining sub-jobs and the root is
/// unlocked in a failed state; the partial re-encryption is left for the
/// next sync pass rather than rolled back.
pub struct UpdateFolderUsersJob {
    account: Account,
    client: Arc<dyn ServerApi>,
    journal: Arc<dyn SyncJournal>,
    keychain: Arc<Keychain>,
    operation: Operation,
    path: String,
    folder_user_id: String,
    certificate_pem: Option<String>,
    folder_token: Option<FolderToken>,
    root_info: Option<RootFolderInfo>,
    cancel: CancelFlag,
}

impl Cse {
    pub async fn add_folder_user(&self, path: &str, user_id: &str) -> JobStatus {
        match self.folder_users_job(Operation::Add, path, user_id) {
            Ok(job) => job.run().await,
            Err(err) => JobStatus::from_err(&err),
        }
    }

    pub async fn remove_folder_user(&self, path: &str, user_id: &str) -> JobStatus {
        match self.folder_users_job(Operation::Remove, path, user_id) {
            Ok(job) => job.run().await,
            Err(err) => JobStatus::from_err(&err),
        }
    }

    pub fn folder_users_job(
        &self, operation: Operation, path: &str, user_id: &str,
    ) -> CseResult<UpdateFolderUsersJob> {
        Ok(UpdateFolderUsersJob {
            account: self.get_account()?.clone(),
            client: self.client.clone(),
            journal: self.journal.clone(),
            keychain: self.keychain.clone(),
            operation,
            path: path.to_string(),
            folder_user_id: user_id.to_string(),
            certificate_pem: None,
            folder_token: None,
            root_info: None,
            cancel: CancelFlag::default(),
        })
    }
}

impl UpdateFolderUsersJob {
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Known certificate, skipping the keychain/server resolution.
    pub fn with_certificate(mut self, certificate_pem: &str) -> Self {
        self.certificate_pem = Some(certificate_pem.to_string());
        self
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.path, user = %self.folder_user_id))]
    pub async fn run(mut self) -> JobStatus {
        match self.operation {
            Operation::Add | Operation::Remove => self.run_membership().await,
            Operation::ReEncrypt => match self.run_reencrypt().await {
                Ok(_) => JobStatus::success(),
                Err(err) => JobStatus::from_err(&err),
            },
        }
    }

    async fn run_membership(&mut self) -> JobStatus {
        if self.operation == Operation::Add && self.certificate_pem.is_none() {
            match self.resolve_certificate().await {
                Ok(certificate_pem) => self.certificate_pem = Some(certificate_pem),
                Err(err) => return JobStatus::from_err(&err),
            }
        }

        let mut handler = EncryptedFolderMetadataHandler::new(
            self.account.clone(),
            self.client.clone(),
            self.journal.clone(),
            &self.path,
            &self.path,
        )
        .with_cancel_flag(self.cancel.clone());

        if let Err(err) = handler.resolve_folder_id().await {
            return JobStatus::from_err(&err);
        }

        // membership mutations wait for the lock: two clients must not race
        // to rotate the same key
        if let Err(err) = handler.lock_folder().await {
            return JobStatus::from_err(&err);
        }

        let fetched = handler.fetch_metadata(true).await;
        if !fetched.is_success() {
            let _ = handler.unlock_folder().await;
            return fetched;
        }

        let mutated = self.mutate_root(&mut handler);
        if let Err(err) = mutated {
            let _ = handler.unlock_folder().await;
            return JobStatus::from_err(&err);
        }

        let uploaded = handler.upload_metadata(true).await;
        if !uploaded.is_success() {
            let _ = handler.unlock_folder().await;
            return uploaded;
        }

        let (cascade_failure, updated_paths) = self.run_cascade(&handler).await;

        let unlock = handler.unlock_folder().await;
        if let Some(failure) = cascade_failure {
            return failure;
        }
        if !unlock.is_success() {
            // the mutation outcome is decided; the next writer waits out the
            // server lock timeout
            warn!("unlock failed after membership update: {}", unlock.message);
        }

        if let Err(err) = handler.record_encryption_status(&updated_paths) {
            warn!("could not update journal records after cascade: {err}");
        }

        JobStatus::success()
    }

    fn mutate_root(&self, handler: &mut EncryptedFolderMetadataHandler) -> CseResult<bool> {
        let metadata = handler
            .folder_metadata_mut()
            .ok_or(CseErrKind::MetadataInvalid)?;
        match self.operation {
            Operation::Add => {
                let certificate_pem = self
                    .certificate_pem
                    .as_ref()
                    .ok_or_else(|| {
                        CseErrKind::CertificateNonexistent(self.folder_user_id.clone())
                    })?;
                metadata.add_user(&self.folder_user_id, certificate_pem)
            }
            Operation::Remove => metadata.remove_user(&self.folder_user_id),
            Operation::ReEncrypt => Err(CseErrKind::MetadataInvalid.into()),
        }
    }

    /// One sequential sub-job per nested encrypted directory. Bounded to one
    /// at a time: each depends on the checksums accumulated by the previous.
    async fn run_cascade(
        &self, handler: &EncryptedFolderMetadataHandler,
    ) -> (Option<JobStatus>, Vec<String>) {
        let root_metadata = match handler.folder_metadata() {
            Some(metadata) => metadata,
            None => return (Some(JobStatus::failure(-1, "no root metadata")), Vec::new()),
        };
        let (key_for_encryption, key_for_decryption) = match (
            root_metadata.key_for_encryption(),
            root_metadata.key_for_decryption(),
        ) {
            (Some(enc), Some(dec)) => (enc, dec),
            _ => return (Some(JobStatus::failure(-1, "root key chain missing")), Vec::new()),
        };
        let mut checksums = root_metadata.key_checksums().clone();

        let records = match self.journal.files_below_path(&self.path) {
            Ok(records) => records,
            Err(err) => return (Some(JobStatus::from_err(&err)), Vec::new()),
        };

        let mut updated_paths = vec![self.path.clone()];
        for record in records.into_iter().filter(|record| record.is_directory) {
            if self.cancel.load(Ordering::SeqCst) {
                return (Some(JobStatus::failure(-1, "the operation was cancelled")),
                    updated_paths);
            }

            let sub_path = if record.e2e_mangled_name.is_empty() {
                record.path.clone()
            } else {
                record.e2e_mangled_name.clone()
            };
            let mut sub_job = UpdateFolderUsersJob {
                account: self.account.clone(),
                client: self.client.clone(),
                journal: self.journal.clone(),
                keychain: self.keychain.clone(),
                operation: Operation::ReEncrypt,
                path: sub_path,
                folder_user_id: self.folder_user_id.clone(),
                certificate_pem: None,
                folder_token: handler.folder_token().cloned(),
                root_info: Some(RootFolderInfo::for_nested(
                    &self.path,
                    key_for_encryption,
                    key_for_decryption,
                    checksums.clone(),
                )),
                cancel: self.cancel.clone(),
            };

            match sub_job.run_reencrypt().await {
                Ok(sub_checksums) => {
                    checksums.merge(&sub_checksums);
                    updated_paths.push(record.path);
                }
                Err(err) => {
                    warn!(path = %record.path, "cascade sub-job failed: {err}");
                    return (Some(JobStatus::from_err(&err)), updated_paths);
                }
            }
        }

        (None, updated_paths)
    }

    /// Re-wraps one nested folder's metadata under the provided root key
    /// chain, using the shared lock token.
    async fn run_reencrypt(&mut self) -> CseResult<KeyChecksums> {
        let root_info = self
            .root_info
            .clone()
            .ok_or_else(|| CseErrKind::Unexpected("re-encrypt without key chain".to_string()))?;
        let token = self
            .folder_token
            .clone()
            .ok_or_else(|| CseErrKind::Unexpected("re-encrypt without token".to_string()))?;

        let folder_id = self.client.folder_id(&self.account, &self.path).await?;
        let raw = self
            .client
            .metadata(&self.account, &folder_id)
            .await?
            .ok_or(CseErrKind::Network {
                status: 404,
                message: "no metadata for nested folder".to_string(),
            })?;

        let mut metadata = FolderMetadata::parse(&self.account, raw.as_bytes(), root_info)?;
        let encrypted = metadata.encrypted_metadata()?;
        self.client
            .update_metadata(&self.account, &folder_id, &token, &encrypted)
            .await?;

        Ok(metadata.key_checksums().clone())
    }

    /// keychain cache → server lookup → cache write.
    async fn resolve_certificate(&self) -> CseResult<String> {
        if let Some(certificate_pem) = self.keychain.cached_certificate(&self.folder_user_id)? {
            return Ok(certificate_pem);
        }

        let users = vec![self.folder_user_id.clone()];
        let certificates = self.client.certificates(&self.account, &users).await?;
        match certificates.get(&self.folder_user_id) {
            Some(certificate_pem) => {
                self.keychain
                    .cache_certificate(&self.folder_user_id, certificate_pem)?;
                Ok(certificate_pem.clone())
            }
            None => Err(CseErrKind::CertificateNonexistent(self.folder_user_id.clone()).into()),
        }
    }
}
