//! The end-to-end-encryption folder-metadata engine of the sync client.
//!
//! Sync clients rely on this library to maintain, version, distribute and
//! migrate the cryptographic metadata of encrypted folder trees: which files
//! exist, their per-file content keys, and which users may decrypt them.
//! It also coordinates the server-mediated folder lock so concurrent clients
//! cannot corrupt shared metadata.
//!
//! - Most integrators will be interested in the functions attached to the
//!   [Cse] struct. See the [service] module for evolving this functionality.
//! - The [model] module contains the data structures and contracts between
//!   components, including the versioned [model::metadata::FolderMetadata].
//! - The [io] module contains the network client and the local file-state
//!   journal collaborator.

#[macro_use]
extern crate tracing;

pub mod io;
pub mod model;
pub mod service;

use std::sync::Arc;

use io::journal::{MemoryJournal, SyncJournal};
use io::network::{Network, ServerApi};
use model::core_config::Config;
pub use model::errors::{CseErrKind, CseResult};
use service::keychain::Keychain;
use service::logging;

#[derive(Clone)]
pub struct Cse {
    pub config: Config,
    pub keychain: Arc<Keychain>,
    pub journal: Arc<dyn SyncJournal>,
    pub client: Arc<dyn ServerApi>,
}

impl Cse {
    pub async fn init(config: Config) -> CseResult<Self> {
        logging::init(&config)?;

        let keychain = Arc::new(Keychain::default());
        let journal: Arc<dyn SyncJournal> = Arc::new(MemoryJournal::default());
        let client: Arc<dyn ServerApi> = Arc::new(Network::default());

        Ok(Self { config, keychain, journal, client })
    }

    /// Swap the server surface, e.g. for tests driving an in-process fake.
    pub fn with_client(mut self, client: Arc<dyn ServerApi>) -> Self {
        self.client = client;
        self
    }

    /// Swap the file-state journal for the sync machinery's real store.
    pub fn with_journal(mut self, journal: Arc<dyn SyncJournal>) -> Self {
        self.journal = journal;
        self
    }
}

pub fn get_code_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub static CORE_CODE_VERSION: &str = env!("CARGO_PKG_VERSION");
