//! Root → Key → Content certificate chains.
//!
//! Three-level trust attestation attached to secure images. Each
//! certificate declares a public key and is signed by the level above
//! it (the Root signs itself). The Content certificate additionally
//! records one component per installed image: its hash, load address
//! and size bound.

mod chain;
mod signer;

pub use chain::{
    CONTENT_TOKEN, CertKind, Certificate, CertificateChain, ChainKeyIds, ComponentRecord,
    ContentImage, KEY_TOKEN, ROOT_TOKEN, StoreRecord,
};
pub use signer::{CertSigner, LocalRsaSigner, PublicKeyInfo};

use crate::crypto::CryptoError;

#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("no signing key registered as {0:?}")]
    UnknownKey(String),

    #[error("signer produced a {got}-byte signature, expected {want}")]
    SignatureLength { got: usize, want: usize },

    #[error("{cert} certificate signature does not verify under its issuer key")]
    BadSignature { cert: &'static str },

    #[error("{cert} certificate declares a corrupt key helper value")]
    BadKeyHelper { cert: &'static str },

    #[error("component {index}: image hash does not match the certificate")]
    HashMismatch { index: usize },

    #[error("component {index}: image of {size} bytes exceeds maxSize {max_size}")]
    ImageTooLarge { index: usize, size: usize, max_size: u32 },

    #[error("unknown certificate token {0:#010X}")]
    BadToken(u32),

    #[error("chain is not in Content, Key, Root order")]
    BadChainOrder,

    #[error("certificate truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("key file {path}: {message}")]
    KeyFile { path: String, message: String },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
