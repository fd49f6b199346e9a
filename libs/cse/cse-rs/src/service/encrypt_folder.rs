use std::sync::Arc;

use tracing::instrument;

use crate::io::journal::{FileRecord, SyncJournal};
use crate::io::network::ServerApi;
use crate::model::account::Account;
use crate::model::errors::CseResult;
use crate::service::metadata_handler::{
    CancelFlag, EncryptedFolderMetadataHandler, JobStatus,
};
use crate::Cse;

/// Turns a plain folder into an encrypted one: set the server-side
/// encryption flag, mark the journal record as the new top level, then
/// store initial empty metadata under the folder lock.
pub struct EncryptFolderJob {
    account: Account,
    client: Arc<dyn ServerApi>,
    journal: Arc<dyn SyncJournal>,
    path: String,
    cancel: CancelFlag,
}

impl Cse {
    pub async fn encrypt_folder(&self, path: &str) -> JobStatus {
        let job = match self.encrypt_folder_job(path) {
            Ok(job) => job,
            Err(err) => return JobStatus::from_err(&err),
        };
        job.run().await
    }

    pub fn encrypt_folder_job(&self, path: &str) -> CseResult<EncryptFolderJob> {
        Ok(EncryptFolderJob {
            account: self.get_account()?.clone(),
            client: self.client.clone(),
            journal: self.journal.clone(),
            path: path.to_string(),
            cancel: CancelFlag::default(),
        })
    }
}

impl EncryptFolderJob {
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.path))]
    pub async fn run(self) -> JobStatus {
        let folder_id = match self.client.folder_id(&self.account, &self.path).await {
            Ok(folder_id) => folder_id,
            Err(err) => return JobStatus::from_err(&err),
        };

        if let Err(err) = self
            .client
            .set_encryption_flag(&self.account, &folder_id)
            .await
        {
            return JobStatus::from_err(&err);
        }

        if let Err(err) = self.mark_journal_record(&folder_id) {
            warn!("could not mark local record as encrypted: {err}");
        }

        let mut handler = EncryptedFolderMetadataHandler::new(
            self.account.clone(),
            self.client.clone(),
            self.journal.clone(),
            &self.path,
            &self.path,
        )
        .with_cancel_flag(self.cancel.clone());

        let fetched = handler.fetch_metadata(true).await;
        if !fetched.is_success() {
            return fetched;
        }

        let uploaded = handler.upload_metadata(false).await;
        if !uploaded.is_success() {
            return uploaded;
        }

        if let Err(err) = handler.record_encryption_status(&[self.path.clone()]) {
            warn!("could not update journal record after encryption: {err}");
        }

        JobStatus::success()
    }

    fn mark_journal_record(&self, folder_id: &str) -> CseResult<()> {
        let mut record = self
            .journal
            .file_record(&self.path)?
            .unwrap_or_else(|| FileRecord {
                path: self.path.clone(),
                is_directory: true,
                ..Default::default()
            });
        record.file_id = folder_id.to_string();
        record.is_top_level_e2ee = true;
        self.journal.set_file_record(record)
    }
}
