#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use rsa::pkcs8::{EncodePublicKey, LineEnding};

use cse_rs::io::journal::FileRecord;
use cse_rs::io::network::ServerApi;
use cse_rs::model::account::Account;
use cse_rs::model::api::FolderToken;
use cse_rs::model::core_config::Config;
use cse_rs::model::errors::{CseErrKind, CseResult};
use cse_rs::model::pubkey::{PrivateKeyStore, SoftwareKey};
use cse_rs::Cse;

fn keypair(cell: &'static OnceLock<(Arc<SoftwareKey>, String)>) -> (Arc<SoftwareKey>, String) {
    cell.get_or_init(|| {
        let store = Arc::new(SoftwareKey::generate().unwrap());
        let pem = store.public_key().to_public_key_pem(LineEnding::LF).unwrap();
        (store, pem)
    })
    .clone()
}

pub fn test_account(capability: f64) -> Account {
    static ALICE: OnceLock<(Arc<SoftwareKey>, String)> = OnceLock::new();
    let (store, pem) = keypair(&ALICE);
    Account {
        user_id: "alice".to_string(),
        api_url: String::new(),
        key_store: store,
        certificate_pem: pem,
        mnemonic: "quick brown fox jumps over the lazy dog".to_string(),
        capability_version: capability,
        skip_metadata_checksum_validation: false,
    }
}

pub fn bob_certificate() -> String {
    static BOB: OnceLock<(Arc<SoftwareKey>, String)> = OnceLock::new();
    keypair(&BOB).1
}

pub async fn test_cse(server: Arc<FakeServer>, account: Account) -> Cse {
    let cse = Cse::init(Config::no_logs("/tmp"))
        .await
        .unwrap()
        .with_client(server);
    cse.cache_account(account);
    cse
}

pub fn dir_record(path: &str, file_id: &str, top_level: bool) -> FileRecord {
    FileRecord {
        path: path.to_string(),
        file_id: file_id.to_string(),
        is_directory: true,
        is_top_level_e2ee: top_level,
        ..Default::default()
    }
}

#[derive(Default)]
pub struct ServerState {
    pub folder_ids: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, String>,
    pub locks: BTreeMap<String, String>,
    pub certificates: BTreeMap<String, String>,
    pub encrypted_flags: BTreeSet<String>,
    pub fail_updates: bool,
    pub fail_unlocks: bool,
    pub lock_calls: u32,
    pub unlock_calls: u32,
    pub store_calls: u32,
    pub update_calls: u32,
    pub certificate_calls: u32,
    next_token: u32,
}

/// In-process stand-in for the server's E2EE endpoints, including the
/// advisory lock semantics (one outstanding lock per folder, nested updates
/// accepted under the root's token).
#[derive(Default)]
pub struct FakeServer {
    pub state: Mutex<ServerState>,
}

impl FakeServer {
    pub fn add_folder(&self, path: &str, folder_id: &str) {
        self.state
            .lock()
            .unwrap()
            .folder_ids
            .insert(path.to_string(), folder_id.to_string());
    }

    pub fn put_metadata(&self, folder_id: &str, raw: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .metadata
            .insert(folder_id.to_string(), String::from_utf8(raw.to_vec()).unwrap());
    }

    pub fn add_certificate(&self, user_id: &str, certificate_pem: &str) {
        self.state
            .lock()
            .unwrap()
            .certificates
            .insert(user_id.to_string(), certificate_pem.to_string());
    }

    pub fn metadata_of(&self, folder_id: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .metadata
            .get(folder_id)
            .map(|raw| raw.clone().into_bytes())
    }

    pub fn is_locked(&self, folder_id: &str) -> bool {
        self.state.lock().unwrap().locks.contains_key(folder_id)
    }

    pub fn force_lock(&self, folder_id: &str, token: &str) {
        self.state
            .lock()
            .unwrap()
            .locks
            .insert(folder_id.to_string(), token.to_string());
    }
}

#[async_trait]
impl ServerApi for FakeServer {
    async fn folder_id(&self, _account: &Account, path: &str) -> CseResult<String> {
        self.state
            .lock()
            .unwrap()
            .folder_ids
            .get(path)
            .cloned()
            .ok_or_else(|| CseErrKind::FolderIdUnresolved.into())
    }

    async fn metadata(&self, _account: &Account, folder_id: &str) -> CseResult<Option<String>> {
        Ok(self.state.lock().unwrap().metadata.get(folder_id).cloned())
    }

    async fn lock_folder(
        &self, _account: &Account, folder_id: &str, _counter: Option<u64>,
    ) -> CseResult<FolderToken> {
        let mut state = self.state.lock().unwrap();
        state.lock_calls += 1;
        if state.locks.contains_key(folder_id) {
            return Err(CseErrKind::LockFailed(423).into());
        }
        state.next_token += 1;
        let token = format!("token-{}", state.next_token);
        state.locks.insert(folder_id.to_string(), token.clone());
        Ok(FolderToken(token))
    }

    async fn unlock_folder(
        &self, _account: &Account, folder_id: &str, token: &FolderToken,
    ) -> CseResult<()> {
        let mut state = self.state.lock().unwrap();
        state.unlock_calls += 1;
        if state.fail_unlocks {
            return Err(CseErrKind::UnlockFailed(500).into());
        }
        match state.locks.get(folder_id) {
            Some(held) if *held == token.0 => {
                state.locks.remove(folder_id);
                Ok(())
            }
            _ => Err(CseErrKind::UnlockFailed(403).into()),
        }
    }

    async fn store_metadata(
        &self, _account: &Account, folder_id: &str, token: &FolderToken, metadata: &[u8],
    ) -> CseResult<()> {
        let mut state = self.state.lock().unwrap();
        state.store_calls += 1;
        if !state.locks.values().any(|held| *held == token.0) {
            return Err(CseErrKind::Network { status: 403, message: "not locked".into() }.into());
        }
        state
            .metadata
            .insert(folder_id.to_string(), String::from_utf8(metadata.to_vec()).unwrap());
        Ok(())
    }

    async fn update_metadata(
        &self, _account: &Account, folder_id: &str, token: &FolderToken, metadata: &[u8],
    ) -> CseResult<()> {
        let mut state = self.state.lock().unwrap();
        state.update_calls += 1;
        if state.fail_updates {
            return Err(CseErrKind::Network { status: 500, message: "server error".into() }.into());
        }
        if !state.locks.values().any(|held| *held == token.0) {
            return Err(CseErrKind::Network { status: 403, message: "not locked".into() }.into());
        }
        state
            .metadata
            .insert(folder_id.to_string(), String::from_utf8(metadata.to_vec()).unwrap());
        Ok(())
    }

    async fn set_encryption_flag(&self, _account: &Account, folder_id: &str) -> CseResult<()> {
        self.state
            .lock()
            .unwrap()
            .encrypted_flags
            .insert(folder_id.to_string());
        Ok(())
    }

    async fn certificates(
        &self, _account: &Account, users: &[String],
    ) -> CseResult<BTreeMap<String, String>> {
        let mut state = self.state.lock().unwrap();
        state.certificate_calls += 1;
        Ok(users
            .iter()
            .filter_map(|user| {
                state
                    .certificates
                    .get(user)
                    .map(|pem| (user.clone(), pem.clone()))
            })
            .collect())
    }
}
