use std::fmt;
use std::sync::Arc;

use rsa::RsaPublicKey;

use crate::model::pubkey::PrivateKeyStore;

pub const DEFAULT_API_LOCATION: &str = "https://api.prod.cse-sync.net";

/// Per-account key material and server surface consumed by this engine.
/// Passed explicitly into jobs and the metadata model rather than looked up
/// ambiently, so everything stays testable without a live account.
#[derive(Clone)]
pub struct Account {
    pub user_id: String,
    pub api_url: String,
    pub key_store: Arc<dyn PrivateKeyStore>,
    /// PEM certificate this account publishes for key wrapping.
    pub certificate_pem: String,
    /// Recovery phrase, also an input to the legacy metadata checksum.
    pub mnemonic: String,
    /// The server's advertised E2EE capability, e.g. 1.2 or 2.0.
    pub capability_version: f64,
    /// Escape hatch for fleets with corrupted historical checksums: a
    /// V1.2 checksum mismatch becomes a warning until the next sync.
    pub skip_metadata_checksum_validation: bool,
}

impl Account {
    pub fn public_key(&self) -> &RsaPublicKey {
        self.key_store.public_key()
    }

    /// The checksum input uses the mnemonic with spaces stripped.
    pub fn condensed_mnemonic(&self) -> String {
        self.mnemonic.replace(' ', "")
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("user_id", &self.user_id)
            .field("api_url", &self.api_url)
            .field("capability_version", &self.capability_version)
            .finish_non_exhaustive()
    }
}
