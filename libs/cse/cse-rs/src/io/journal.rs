use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::model::errors::CseResult;
use crate::model::metadata::version::MetadataVersion;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionStatus {
    #[default]
    NotEncrypted,
    Encrypted,
    EncryptedMigratedV1_2,
    EncryptedMigratedV2_0,
}

impl From<MetadataVersion> for EncryptionStatus {
    fn from(version: MetadataVersion) -> Self {
        match version {
            MetadataVersion::V1 => EncryptionStatus::Encrypted,
            MetadataVersion::V1_2 => EncryptionStatus::EncryptedMigratedV1_2,
            MetadataVersion::V2_0 => EncryptionStatus::EncryptedMigratedV2_0,
        }
    }
}

/// One row of the local file-state database.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct FileRecord {
    pub path: String,
    pub file_id: String,
    pub is_directory: bool,
    /// Server-side obfuscated name of an encrypted directory.
    pub e2e_mangled_name: String,
    pub encryption_status: EncryptionStatus,
    /// Set on the top level folder of an encrypted tree.
    pub is_top_level_e2ee: bool,
}

/// The local file-state database this engine consults. The sync machinery
/// owns the real store; the engine only needs these four queries.
pub trait SyncJournal: Send + Sync {
    fn file_record(&self, path: &str) -> CseResult<Option<FileRecord>>;

    fn set_file_record(&self, record: FileRecord) -> CseResult<()>;

    /// Bulk scan of every record strictly below `path`.
    fn files_below_path(&self, path: &str) -> CseResult<Vec<FileRecord>>;

    /// The top level encrypted ancestor of `path`, itself included.
    fn top_level_e2ee_record(&self, path: &str) -> CseResult<Option<FileRecord>>;
}

/// In-memory journal used by embedders without a database and by tests.
#[derive(Default)]
pub struct MemoryJournal {
    records: Mutex<BTreeMap<String, FileRecord>>,
}

impl SyncJournal for MemoryJournal {
    fn file_record(&self, path: &str) -> CseResult<Option<FileRecord>> {
        Ok(self.records.lock()?.get(path).cloned())
    }

    fn set_file_record(&self, record: FileRecord) -> CseResult<()> {
        self.records.lock()?.insert(record.path.clone(), record);
        Ok(())
    }

    fn files_below_path(&self, path: &str) -> CseResult<Vec<FileRecord>> {
        let records = self.records.lock()?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(records
            .values()
            .filter(|record| record.path.starts_with(&prefix) && record.path != path)
            .cloned()
            .collect())
    }

    fn top_level_e2ee_record(&self, path: &str) -> CseResult<Option<FileRecord>> {
        let records = self.records.lock()?;
        Ok(records
            .values()
            .filter(|record| record.is_top_level_e2ee)
            .filter(|record| {
                path == record.path || path.starts_with(&format!("{}/", record.path))
            })
            .min_by_key(|record| record.path.len())
            .cloned())
    }
}
