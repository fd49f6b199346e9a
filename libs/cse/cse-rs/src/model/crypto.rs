use serde::{Deserialize, Serialize};

pub const METADATA_KEY_SIZE: usize = 32;

pub type AESKey = [u8; METADATA_KEY_SIZE];

/// AES-GCM output with the authentication tag split out. The wire formats
/// carry ciphertext, nonce and tag as separate fields, and a tag mismatch
/// must fail the decryption loudly.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct AESCipher {
    pub value: Vec<u8>,
    pub nonce: Vec<u8>,
    pub tag: Vec<u8>,
}

impl AESCipher {
    /// creates an AESCipher from a source of already-encrypted bytes
    pub fn new<V: Into<Vec<u8>>, N: Into<Vec<u8>>, T: Into<Vec<u8>>>(
        value: V, nonce: N, tag: T,
    ) -> Self {
        AESCipher { value: value.into(), nonce: nonce.into(), tag: tag.into() }
    }
}
