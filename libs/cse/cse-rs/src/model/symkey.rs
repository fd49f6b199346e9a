use aead::generic_array::GenericArray;
use aead::{Aead, NewAead};
use aes_gcm::Aes256Gcm;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::model::compression_service;
use crate::model::crypto::*;

use super::errors::{CryptoError, CseErrKind, CseResult, Unexpected};

pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

pub fn generate_key() -> AESKey {
    let mut random_bytes = [0u8; METADATA_KEY_SIZE];
    OsRng.fill_bytes(&mut random_bytes);
    random_bytes
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut result = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut result);
    result
}

/// Server-side names of encrypted files carry no meaning; they are minted
/// randomly when a file first enters a folder's metadata.
pub fn generate_random_filename() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Hex SHA-256, the fingerprint format of the key checksum set.
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

pub fn convert_key(to_convert: &AESKey) -> Aes256Gcm {
    Aes256Gcm::new(&GenericArray::clone_from_slice(to_convert))
}

pub fn encrypt(key: &AESKey, to_encrypt: &[u8]) -> CseResult<AESCipher> {
    let nonce = generate_nonce();
    let mut sealed = convert_key(key)
        .encrypt(GenericArray::from_slice(&nonce), aead::Payload { msg: to_encrypt, aad: &[] })
        .map_unexpected()?;
    let tag = sealed.split_off(sealed.len() - TAG_SIZE);
    Ok(AESCipher::new(sealed, nonce.to_vec(), tag))
}

pub fn decrypt(key: &AESKey, to_decrypt: &AESCipher) -> CseResult<Vec<u8>> {
    let mut sealed = to_decrypt.value.clone();
    sealed.extend_from_slice(&to_decrypt.tag);
    let nonce = GenericArray::from_slice(&to_decrypt.nonce);
    let decrypted = convert_key(key)
        .decrypt(nonce, aead::Payload { msg: &sealed, aad: &[] })
        .map_err(|err| CseErrKind::Crypto(CryptoError::Decryption(err)))?;
    Ok(decrypted)
}

/// The V2.0 file list is compressed before encryption; it is by far the
/// largest payload this engine produces.
pub fn gzip_then_encrypt(key: &AESKey, to_encrypt: &[u8]) -> CseResult<AESCipher> {
    encrypt(key, &compression_service::compress(to_encrypt)?)
}

pub fn decrypt_then_gunzip(key: &AESKey, to_decrypt: &AESCipher) -> CseResult<Vec<u8>> {
    compression_service::decompress(&decrypt(key, to_decrypt)?)
}

/// Legacy (V1.x) blobs fuse ciphertext and nonce into one string:
/// `base64(ciphertext || tag) + "|" + base64(nonce)`.
pub fn encrypt_string(key: &AESKey, to_encrypt: &[u8]) -> CseResult<String> {
    let cipher = encrypt(key, to_encrypt)?;
    let mut sealed = cipher.value;
    sealed.extend_from_slice(&cipher.tag);
    Ok(format!("{}|{}", base64::encode(sealed), base64::encode(cipher.nonce)))
}

pub fn decrypt_string(key: &AESKey, to_decrypt: &str) -> CseResult<Vec<u8>> {
    let (sealed_b64, nonce_b64) = to_decrypt
        .split_once('|')
        .ok_or_else(|| CseErrKind::Crypto(CryptoError::InvalidKey))?;
    let mut sealed = base64::decode(sealed_b64).map_unexpected()?;
    let nonce = base64::decode(nonce_b64).map_unexpected()?;
    if sealed.len() < TAG_SIZE || nonce.len() != NONCE_SIZE {
        return Err(CseErrKind::Crypto(CryptoError::InvalidKey).into());
    }
    let tag = sealed.split_off(sealed.len() - TAG_SIZE);
    decrypt(key, &AESCipher::new(sealed, nonce, tag))
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_generate_encrypt_decrypt() {
        let key = generate_key();
        let test_value = uuid::Uuid::new_v4().to_string();
        let encrypted = encrypt(&key, test_value.as_bytes()).unwrap();
        assert_eq!(encrypted.tag.len(), TAG_SIZE);
        let decrypted = decrypt(&key, &encrypted).unwrap();
        assert_eq!(test_value.as_bytes(), &decrypted[..]);
    }

    #[test]
    fn test_tag_tamper_fails_loudly() {
        let key = generate_key();
        let mut encrypted = encrypt(&key, b"contents").unwrap();
        encrypted.tag[0] = !encrypted.tag[0];
        decrypt(&key, &encrypted).unwrap_err();
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = generate_key();
        let encrypted = encrypt(&key, b"contents").unwrap();
        decrypt(&generate_key(), &encrypted).unwrap_err();
    }

    #[test]
    fn test_gzip_then_encrypt_roundtrip() {
        let key = generate_key();
        let payload = vec![b'a'; 64 * 1024];
        let encrypted = gzip_then_encrypt(&key, &payload).unwrap();
        assert!(encrypted.value.len() < payload.len());
        assert_eq!(decrypt_then_gunzip(&key, &encrypted).unwrap(), payload);
    }

    #[test]
    fn test_legacy_string_roundtrip() {
        let key = generate_key();
        let blob = encrypt_string(&key, b"{\"filename\":\"f\"}").unwrap();
        assert!(blob.contains('|'));
        assert_eq!(decrypt_string(&key, &blob).unwrap(), b"{\"filename\":\"f\"}");
    }
}
