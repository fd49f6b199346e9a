use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use x509_parser::pem::parse_x509_pem;

use super::errors::{CryptoError, CseErrKind, CseResult};

/// The asymmetric private-key capability handed to the engine.
///
/// The software implementation below holds the RSA key in memory; a PKCS#11
/// hardware token implements the same trait around a key handle, and callers
/// cannot tell the two apart. Token refusals (wrong PIN, revoked key) must
/// surface as [`CryptoError::Token`].
pub trait PrivateKeyStore: Send + Sync {
    fn decrypt(&self, ciphertext: &[u8]) -> CseResult<Vec<u8>>;
    fn public_key(&self) -> &RsaPublicKey;
}

pub struct SoftwareKey {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl SoftwareKey {
    pub fn generate() -> CseResult<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|err| CseErrKind::Crypto(CryptoError::Asymmetric(err.to_string())))?;
        Ok(Self::from(private_key))
    }
}

impl From<RsaPrivateKey> for SoftwareKey {
    fn from(private_key: RsaPrivateKey) -> Self {
        let public_key = private_key.to_public_key();
        Self { private_key, public_key }
    }
}

impl PrivateKeyStore for SoftwareKey {
    fn decrypt(&self, ciphertext: &[u8]) -> CseResult<Vec<u8>> {
        self.private_key
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|err| CseErrKind::Crypto(CryptoError::Asymmetric(err.to_string())).into())
    }

    fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }
}

/// RSA-OAEP with SHA-256, used to wrap metadata keys for each folder user.
pub fn encrypt(public_key: &RsaPublicKey, to_encrypt: &[u8]) -> CseResult<Vec<u8>> {
    public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), to_encrypt)
        .map_err(|err| CseErrKind::Crypto(CryptoError::Asymmetric(err.to_string())).into())
}

pub fn decrypt(key_store: &dyn PrivateKeyStore, to_decrypt: &[u8]) -> CseResult<Vec<u8>> {
    key_store.decrypt(to_decrypt)
}

/// Folder users are identified by a PEM certificate. Bare public-key PEMs
/// are also accepted so key material can flow in before a CA signs it.
pub fn public_key_from_pem(pem: &str) -> CseResult<RsaPublicKey> {
    let (_, parsed) = parse_x509_pem(pem.as_bytes())
        .map_err(|_| CseErrKind::CertificateInvalid)?;

    match parsed.label.as_str() {
        "CERTIFICATE" => {
            let cert = parsed.parse_x509().map_err(|_| CseErrKind::CertificateInvalid)?;
            let spki = cert.public_key();
            RsaPublicKey::from_pkcs1_der(&spki.subject_public_key.data)
                .map_err(|_| CseErrKind::CertificateInvalid.into())
        }
        "PUBLIC KEY" => RsaPublicKey::from_public_key_pem(pem)
            .map_err(|_| CseErrKind::CertificateInvalid.into()),
        "RSA PUBLIC KEY" => RsaPublicKey::from_pkcs1_pem(pem)
            .map_err(|_| CseErrKind::CertificateInvalid.into()),
        _ => Err(CseErrKind::CertificateInvalid.into()),
    }
}

#[cfg(test)]
mod unit_tests {
    use rsa::pkcs8::{EncodePublicKey, LineEnding};

    use super::*;

    #[test]
    fn test_wrap_unwrap() {
        let store = SoftwareKey::generate().unwrap();
        let key = crate::model::symkey::generate_key();
        let wrapped = encrypt(store.public_key(), &key).unwrap();
        assert_ne!(&wrapped[..], &key[..]);
        let unwrapped = decrypt(&store, &wrapped).unwrap();
        assert_eq!(&unwrapped[..], &key[..]);
    }

    #[test]
    fn test_unwrap_with_wrong_key() {
        let store = SoftwareKey::generate().unwrap();
        let other = SoftwareKey::generate().unwrap();
        let wrapped = encrypt(store.public_key(), b"metadata key").unwrap();
        decrypt(&other, &wrapped).unwrap_err();
    }

    #[test]
    fn test_public_key_pem_roundtrip() {
        let store = SoftwareKey::generate().unwrap();
        let pem = store.public_key().to_public_key_pem(LineEnding::LF).unwrap();
        let recovered = public_key_from_pem(&pem).unwrap();
        assert_eq!(&recovered, store.public_key());
    }

    #[test]
    fn test_garbage_pem_rejected() {
        public_key_from_pem("not a pem at all").unwrap_err();
        public_key_from_pem("-----BEGIN GARBAGE-----\nAAAA\n-----END GARBAGE-----\n").unwrap_err();
    }
}
