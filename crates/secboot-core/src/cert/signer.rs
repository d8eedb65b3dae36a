//! Pluggable certificate signing capability.
//!
//! Certificates are signed through a trait so release builds can use
//! a remote HSM-backed signer while local development and tests use
//! in-process RSA keys.

use std::collections::BTreeMap;
use std::path::Path;

use rsa::pkcs8::DecodePrivateKey;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::crypto::{RSA_SIG_LEN, barrett_np_be, rsa_modulus_be, rsa_sign};

use super::CertError;

/// Public half of a signing identity as it appears inside a
/// certificate body: modulus plus the precomputed Barrett helper the
/// boot ROM uses instead of dividing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKeyInfo {
    pub modulus: [u8; RSA_SIG_LEN],
    pub np: [u8; 20],
}

impl PublicKeyInfo {
    pub fn from_public(key: &RsaPublicKey) -> Self {
        Self { modulus: rsa_modulus_be(key), np: barrett_np_be(key) }
    }
}

/// Signing capability keyed by an opaque identifier.
pub trait CertSigner {
    /// RSA-3072 PKCS#1 v1.5 signature over SHA-256 of `data`.
    fn sign(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, CertError>;

    /// Public half of the identity behind `key_id`.
    fn public_key(&self, key_id: &str) -> Result<PublicKeyInfo, CertError>;
}

/// Signer over locally held RSA private keys.
#[derive(Debug, Default)]
pub struct LocalRsaSigner {
    keys: BTreeMap<String, RsaPrivateKey>,
}

impl LocalRsaSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key_id: impl Into<String>, key: RsaPrivateKey) {
        self.keys.insert(key_id.into(), key);
    }

    /// Register a PKCS#8 PEM private key from disk.
    pub fn load_pem(&mut self, key_id: impl Into<String>, path: impl AsRef<Path>) -> Result<(), CertError> {
        let path = path.as_ref();
        let key = RsaPrivateKey::read_pkcs8_pem_file(path).map_err(|e| CertError::KeyFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.keys.insert(key_id.into(), key);
        Ok(())
    }

    fn key(&self, key_id: &str) -> Result<&RsaPrivateKey, CertError> {
        self.keys
            .get(key_id)
            .ok_or_else(|| CertError::UnknownKey(key_id.to_string()))
    }
}

impl CertSigner for LocalRsaSigner {
    fn sign(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, CertError> {
        Ok(rsa_sign(self.key(key_id)?, data)?)
    }

    fn public_key(&self, key_id: &str) -> Result<PublicKeyInfo, CertError> {
        Ok(PublicKeyInfo::from_public(&RsaPublicKey::from(self.key(key_id)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{rsa_verify, test_keys};

    #[test]
    fn test_local_signer_round_trip() {
        let key = test_keys::chain()[0].clone();
        let public = RsaPublicKey::from(&key);
        let mut signer = LocalRsaSigner::new();
        signer.insert("root", key);

        let sig = signer.sign("root", b"cert body").unwrap();
        assert_eq!(sig.len(), RSA_SIG_LEN);
        rsa_verify(&public, b"cert body", &sig).unwrap();

        let info = signer.public_key("root").unwrap();
        assert_eq!(info.modulus, rsa_modulus_be(&public));
    }

    #[test]
    fn test_unknown_key_id() {
        let signer = LocalRsaSigner::new();
        assert!(matches!(
            signer.sign("nope", b"x"),
            Err(CertError::UnknownKey(_))
        ));
    }
}
