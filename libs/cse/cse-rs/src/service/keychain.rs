use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::OnceCell;

use crate::model::account::Account;
use crate::model::errors::{CseErrKind, CseResult};
use crate::Cse;

/// Account handle plus the certificate cache consulted before any server
/// lookup when resolving a prospective folder user.
#[derive(Default)]
pub struct Keychain {
    account: OnceCell<Account>,
    certificates: Mutex<HashMap<String, String>>,
}

impl Keychain {
    pub fn get_account(&self) -> CseResult<&Account> {
        self.account
            .get()
            .ok_or_else(|| CseErrKind::AccountNonexistent.into())
    }

    pub fn cache_account(&self, account: Account) {
        let _ = self.account.set(account);
    }

    pub fn cached_certificate(&self, user_id: &str) -> CseResult<Option<String>> {
        Ok(self.certificates.lock()?.get(user_id).cloned())
    }

    pub fn cache_certificate(&self, user_id: &str, certificate_pem: &str) -> CseResult<()> {
        self.certificates
            .lock()?
            .insert(user_id.to_string(), certificate_pem.to_string());
        Ok(())
    }
}

impl Cse {
    pub fn get_account(&self) -> CseResult<&Account> {
        self.keychain.get_account()
    }

    pub fn cache_account(&self, account: Account) {
        self.keychain.cache_account(account);
    }
}
