//! Cryptographic primitives used by the packager and certificate chain.
//!
//! Thin wrappers so the rest of the crate deals in byte slices and a
//! small error type instead of the trait plumbing of the underlying
//! crates. CTR mode is its own inverse, so one routine covers both
//! directions.

use aes::{Aes128, Aes256};
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

type Aes128Ctr = Ctr128BE<Aes128>;
type Aes256Ctr = Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

pub const AES128_KEY_LEN: usize = 16;
pub const AES_IV_LEN: usize = 16;
pub const HMAC_TAG_LEN: usize = 32;
pub const RSA_MODULUS_BITS: usize = 3072;
pub const RSA_SIG_LEN: usize = RSA_MODULUS_BITS / 8;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("bad key length {got} for {algo}")]
    KeyLength { algo: &'static str, got: usize },
    #[error("bad IV length {0}, expected 16")]
    IvLength(usize),
    #[error("signature has {got} bytes, expected {RSA_SIG_LEN}")]
    SignatureLength { got: usize },
    #[error("signature rejected")]
    BadSignature,
    #[error("rsa key: {0}")]
    Rsa(#[from] rsa::Error),
}

/// Source of nonce/key material. Production code draws from the OS;
/// tests substitute a fixed pattern so blobs are reproducible.
pub trait RandomSource {
    fn fill(&mut self, buf: &mut [u8]);
}

/// Operating-system CSPRNG.
#[derive(Debug, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&mut self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }
}

/// AES-CTR keystream application, in place. Key length selects the
/// variant (16 bytes for AES-128, 32 for AES-256).
pub fn aes_ctr_apply(key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), CryptoError> {
    if iv.len() != AES_IV_LEN {
        return Err(CryptoError::IvLength(iv.len()));
    }
    match key.len() {
        16 => {
            let mut cipher = Aes128Ctr::new(key.into(), iv.into());
            cipher.apply_keystream(data);
        }
        32 => {
            let mut cipher = Aes256Ctr::new(key.into(), iv.into());
            cipher.apply_keystream(data);
        }
        other => return Err(CryptoError::KeyLength { algo: "AES-CTR", got: other }),
    }
    Ok(())
}

/// HMAC-SHA256 tag over `data`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; HMAC_TAG_LEN], CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| CryptoError::KeyLength { algo: "HMAC-SHA256", got: key.len() })?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// RSA-3072 PKCS#1 v1.5 signature over SHA-256 of `data`.
pub fn rsa_sign(key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let signer = SigningKey::<Sha256>::new(key.clone());
    let sig = signer.sign(data);
    let bytes = sig.to_vec();
    if bytes.len() != RSA_SIG_LEN {
        return Err(CryptoError::SignatureLength { got: bytes.len() });
    }
    Ok(bytes)
}

/// Verify an RSA-3072 PKCS#1 v1.5 signature over SHA-256 of `data`.
pub fn rsa_verify(key: &RsaPublicKey, data: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
    let sig = Signature::try_from(sig).map_err(|_| CryptoError::SignatureLength { got: sig.len() })?;
    VerifyingKey::<Sha256>::new(key.clone())
        .verify(data, &sig)
        .map_err(|_| CryptoError::BadSignature)
}

/// Public modulus N as a fixed-width big-endian array.
pub fn rsa_modulus_be(key: &RsaPublicKey) -> [u8; RSA_SIG_LEN] {
    let bytes = key.n().to_bytes_be();
    let mut out = [0u8; RSA_SIG_LEN];
    out[RSA_SIG_LEN - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// Barrett reduction helper Np = floor(2^(3072 + 132 - 1) / N),
/// 20 bytes big-endian. Boot ROMs precompute this to avoid division
/// during modular exponentiation.
pub fn barrett_np_be(key: &RsaPublicKey) -> [u8; 20] {
    let numerator = BigUint::from(1u32) << (RSA_MODULUS_BITS + 132 - 1);
    let np = numerator / key.n();
    let bytes = np.to_bytes_be();
    let mut out = [0u8; 20];
    out[20 - bytes.len()..].copy_from_slice(&bytes);
    out
}

#[cfg(test)]
pub(crate) mod test_keys {
    use super::*;
    use std::sync::OnceLock;

    /// Deterministic byte pattern for reproducible test blobs.
    pub struct FixedRandom(pub u8);

    impl RandomSource for FixedRandom {
        fn fill(&mut self, buf: &mut [u8]) {
            for b in buf.iter_mut() {
                *b = self.0;
                self.0 = self.0.wrapping_add(1);
            }
        }
    }

    /// RSA-3072 generation is slow, so tests share one key set.
    pub fn chain() -> &'static [RsaPrivateKey; 3] {
        static KEYS: OnceLock<[RsaPrivateKey; 3]> = OnceLock::new();
        KEYS.get_or_init(|| {
            let mut rng = OsRng;
            [
                RsaPrivateKey::new(&mut rng, RSA_MODULUS_BITS).unwrap(),
                RsaPrivateKey::new(&mut rng, RSA_MODULUS_BITS).unwrap(),
                RsaPrivateKey::new(&mut rng, RSA_MODULUS_BITS).unwrap(),
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_keys::FixedRandom;
    use super::*;

    #[test]
    fn test_ctr_round_trip() {
        let key = [0x42u8; 16];
        let iv = [0x07u8; 16];
        let original = b"attack at dawn, 23 bytes".to_vec();

        let mut data = original.clone();
        aes_ctr_apply(&key, &iv, &mut data).unwrap();
        assert_ne!(data, original);
        aes_ctr_apply(&key, &iv, &mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_ctr_rejects_bad_lengths() {
        let mut data = [0u8; 8];
        assert!(aes_ctr_apply(&[0u8; 15], &[0u8; 16], &mut data).is_err());
        assert!(aes_ctr_apply(&[0u8; 16], &[0u8; 12], &mut data).is_err());
    }

    #[test]
    fn test_hmac_vector() {
        // RFC 4231 test case 2.
        let tag = hmac_sha256(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            hex::encode(tag),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_rsa_sign_verify() {
        let key = &test_keys::chain()[0];
        let public = RsaPublicKey::from(key);
        let sig = rsa_sign(key, b"hello").unwrap();
        assert_eq!(sig.len(), RSA_SIG_LEN);
        rsa_verify(&public, b"hello", &sig).unwrap();
        assert!(rsa_verify(&public, b"hellp", &sig).is_err());
    }

    #[test]
    fn test_barrett_np_nonzero() {
        let public = RsaPublicKey::from(&test_keys::chain()[0]);
        let np = barrett_np_be(&public);
        // Top bit of the 132-bit quotient lands in the leading bytes.
        assert!(np.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_fixed_random_pattern() {
        let mut rng = FixedRandom(0x10);
        let mut buf = [0u8; 4];
        rng.fill(&mut buf);
        assert_eq!(buf, [0x10, 0x11, 0x12, 0x13]);
    }
}
