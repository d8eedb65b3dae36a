//! Certificate structure, serialization and chain verification.
//!
//! Per-certificate byte layout (words little-endian, modulus
//! big-endian):
//!
//! ```text
//! token(4) | version(4) | signedContentSize(4) | flags(4)
//! modulus N (384) | Barrett helper Np (20)
//! swVersion(4) | nonce(8)
//! components: {hash(32) | loadAddress(4) | maxSize(4) | flags(4)} × n
//! signature(384)
//! store records: {storeAddress(4) | actualSize(4)} × n    (unsigned)
//! ```
//!
//! Component and store records exist on Content certificates only.
//! The store-record trailer is outside the signed region: install
//! placement may change after signing without re-issuing the chain.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rsa::{BigUint, RsaPublicKey};

use crate::crypto::{RSA_SIG_LEN, barrett_np_be, rsa_verify, sha256};

use super::signer::{CertSigner, PublicKeyInfo};
use super::CertError;

pub const ROOT_TOKEN: u32 = 0x5342_7263;
pub const KEY_TOKEN: u32 = 0x5342_6B63;
pub const CONTENT_TOKEN: u32 = 0x5342_6363;

const CERT_VERSION: u32 = 0x0001_0000;
const RSA_PUBLIC_EXPONENT: u64 = 65537;

/// Fixed low nibble of the header flags word.
const FLAGS_BASE: u32 = 0xF;
const SCHEME_RSA3072_SHA256: u32 = 1;
const CRYPTO_TYPE_INTEGRATED: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertKind {
    Root,
    Key,
    Content,
}

impl CertKind {
    pub fn token(&self) -> u32 {
        match self {
            CertKind::Root => ROOT_TOKEN,
            CertKind::Key => KEY_TOKEN,
            CertKind::Content => CONTENT_TOKEN,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CertKind::Root => "Root",
            CertKind::Key => "Key",
            CertKind::Content => "Content",
        }
    }

    fn from_token(token: u32) -> Result<Self, CertError> {
        match token {
            ROOT_TOKEN => Ok(CertKind::Root),
            KEY_TOKEN => Ok(CertKind::Key),
            CONTENT_TOKEN => Ok(CertKind::Content),
            other => Err(CertError::BadToken(other)),
        }
    }
}

/// One signed component of a Content certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentRecord {
    pub hash: [u8; 32],
    pub load_address: u32,
    pub max_size: u32,
    /// Bit 0: content is stored encrypted. Other bits round-trip
    /// without interpretation.
    pub flags: u32,
}

impl ComponentRecord {
    pub fn encrypted(&self) -> bool {
        self.flags & 1 != 0
    }
}

/// Unsigned install-placement record trailing a Content certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRecord {
    pub store_address: u32,
    pub actual_size: u32,
}

/// An image going into a Content certificate.
#[derive(Debug, Clone)]
pub struct ContentImage {
    /// Image bytes as they will be installed (already encrypted when
    /// `encrypted` is set).
    pub data: Vec<u8>,
    pub load_address: u32,
    pub max_size: u32,
    pub store_address: u32,
    pub encrypted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub kind: CertKind,
    pub version: u32,
    /// Full header flags word. Bits above the defined fields are
    /// opaque and must survive a parse/serialize round trip.
    pub flags: u32,
    pub public_key: PublicKeyInfo,
    pub sw_version: u32,
    pub nonce: [u8; 8],
    pub components: Vec<ComponentRecord>,
    pub signature: Vec<u8>,
    pub store_records: Vec<StoreRecord>,
}

impl Certificate {
    fn flags_word(code_encrypt: bool, num_components: usize) -> u32 {
        FLAGS_BASE
            | (code_encrypt as u32) << 4
            | SCHEME_RSA3072_SHA256 << 8
            | CRYPTO_TYPE_INTEGRATED << 12
            | (num_components as u32 & 0xFF) << 16
    }

    pub fn num_components(&self) -> usize {
        ((self.flags >> 16) & 0xFF) as usize
    }

    /// Header + body, the signed region.
    fn signed_bytes(&self) -> Vec<u8> {
        let signed_len = 16 + RSA_SIG_LEN + 20 + 4 + 8 + self.components.len() * 44;
        let mut buf = Vec::with_capacity(signed_len);
        buf.write_u32::<LittleEndian>(self.kind.token()).unwrap();
        buf.write_u32::<LittleEndian>(self.version).unwrap();
        buf.write_u32::<LittleEndian>(signed_len as u32).unwrap();
        buf.write_u32::<LittleEndian>(self.flags).unwrap();
        buf.extend_from_slice(&self.public_key.modulus);
        buf.extend_from_slice(&self.public_key.np);
        buf.write_u32::<LittleEndian>(self.sw_version).unwrap();
        buf.extend_from_slice(&self.nonce);
        for comp in &self.components {
            buf.extend_from_slice(&comp.hash);
            buf.write_u32::<LittleEndian>(comp.load_address).unwrap();
            buf.write_u32::<LittleEndian>(comp.max_size).unwrap();
            buf.write_u32::<LittleEndian>(comp.flags).unwrap();
        }
        buf
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.signed_bytes();
        buf.extend_from_slice(&self.signature);
        for rec in &self.store_records {
            buf.write_u32::<LittleEndian>(rec.store_address).unwrap();
            buf.write_u32::<LittleEndian>(rec.actual_size).unwrap();
        }
        buf
    }

    /// Parse one certificate, returning it and the bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), CertError> {
        if data.len() < 16 {
            return Err(CertError::Truncated { need: 16, have: data.len() });
        }
        let mut cursor = Cursor::new(data);
        let kind = CertKind::from_token(cursor.read_u32::<LittleEndian>()?)?;
        let version = cursor.read_u32::<LittleEndian>()?;
        let signed_len = cursor.read_u32::<LittleEndian>()? as usize;
        let flags = cursor.read_u32::<LittleEndian>()?;
        let num_components = ((flags >> 16) & 0xFF) as usize;

        let mut total = signed_len + RSA_SIG_LEN;
        if kind == CertKind::Content {
            total += num_components * 8;
        }
        if data.len() < total {
            return Err(CertError::Truncated { need: total, have: data.len() });
        }

        let mut modulus = [0u8; RSA_SIG_LEN];
        let mut np = [0u8; 20];
        std::io::Read::read_exact(&mut cursor, &mut modulus)?;
        std::io::Read::read_exact(&mut cursor, &mut np)?;
        let sw_version = cursor.read_u32::<LittleEndian>()?;
        let mut nonce = [0u8; 8];
        std::io::Read::read_exact(&mut cursor, &mut nonce)?;

        let mut components = Vec::with_capacity(num_components);
        for _ in 0..num_components {
            let mut hash = [0u8; 32];
            std::io::Read::read_exact(&mut cursor, &mut hash)?;
            components.push(ComponentRecord {
                hash,
                load_address: cursor.read_u32::<LittleEndian>()?,
                max_size: cursor.read_u32::<LittleEndian>()?,
                flags: cursor.read_u32::<LittleEndian>()?,
            });
        }

        let mut signature = vec![0u8; RSA_SIG_LEN];
        std::io::Read::read_exact(&mut cursor, &mut signature)?;

        let mut store_records = Vec::new();
        if kind == CertKind::Content {
            for _ in 0..num_components {
                store_records.push(StoreRecord {
                    store_address: cursor.read_u32::<LittleEndian>()?,
                    actual_size: cursor.read_u32::<LittleEndian>()?,
                });
            }
        }

        let cert = Self {
            kind,
            version,
            flags,
            public_key: PublicKeyInfo { modulus, np },
            sw_version,
            nonce,
            components,
            signature,
            store_records,
        };
        Ok((cert, total))
    }

    /// Reconstruct the verification key declared in the body, checking
    /// the Barrett helper against the modulus on the way.
    pub fn declared_key(&self) -> Result<RsaPublicKey, CertError> {
        let n = BigUint::from_bytes_be(&self.public_key.modulus);
        let key = RsaPublicKey::new(n, BigUint::from(RSA_PUBLIC_EXPONENT))
            .map_err(|_| CertError::BadKeyHelper { cert: self.kind.name() })?;
        if barrett_np_be(&key) != self.public_key.np {
            return Err(CertError::BadKeyHelper { cert: self.kind.name() });
        }
        Ok(key)
    }

    /// Verify this certificate's signature under `issuer`'s declared
    /// key.
    pub fn verify_with(&self, issuer: &Certificate) -> Result<(), CertError> {
        let key = issuer.declared_key()?;
        rsa_verify(&key, &self.signed_bytes(), &self.signature)
            .map_err(|_| CertError::BadSignature { cert: self.kind.name() })
    }

    fn sign_into(mut self, signer: &dyn CertSigner, issuer_key_id: &str) -> Result<Self, CertError> {
        let signature = signer.sign(issuer_key_id, &self.signed_bytes())?;
        if signature.len() != RSA_SIG_LEN {
            return Err(CertError::SignatureLength { got: signature.len(), want: RSA_SIG_LEN });
        }
        self.signature = signature;
        Ok(self)
    }

    /// Self-signed chain anchor.
    pub fn build_root(
        signer: &dyn CertSigner,
        key_id: &str,
        sw_version: u32,
        nonce: [u8; 8],
    ) -> Result<Self, CertError> {
        Self {
            kind: CertKind::Root,
            version: CERT_VERSION,
            flags: Self::flags_word(false, 0),
            public_key: signer.public_key(key_id)?,
            sw_version,
            nonce,
            components: Vec::new(),
            signature: Vec::new(),
            store_records: Vec::new(),
        }
        .sign_into(signer, key_id)
    }

    /// Intermediate certificate: declares `subject_key_id`'s public
    /// key, signed by `issuer_key_id`.
    pub fn build_key(
        signer: &dyn CertSigner,
        issuer_key_id: &str,
        subject_key_id: &str,
        sw_version: u32,
        nonce: [u8; 8],
    ) -> Result<Self, CertError> {
        Self {
            kind: CertKind::Key,
            version: CERT_VERSION,
            flags: Self::flags_word(false, 0),
            public_key: signer.public_key(subject_key_id)?,
            sw_version,
            nonce,
            components: Vec::new(),
            signature: Vec::new(),
            store_records: Vec::new(),
        }
        .sign_into(signer, issuer_key_id)
    }

    /// Leaf certificate recording one component per installed image.
    pub fn build_content(
        signer: &dyn CertSigner,
        issuer_key_id: &str,
        subject_key_id: &str,
        sw_version: u32,
        nonce: [u8; 8],
        images: &[ContentImage],
    ) -> Result<Self, CertError> {
        let mut components = Vec::with_capacity(images.len());
        let mut store_records = Vec::with_capacity(images.len());
        for (index, image) in images.iter().enumerate() {
            if image.data.len() > image.max_size as usize {
                return Err(CertError::ImageTooLarge {
                    index,
                    size: image.data.len(),
                    max_size: image.max_size,
                });
            }
            components.push(ComponentRecord {
                hash: sha256(&image.data),
                load_address: image.load_address,
                max_size: image.max_size,
                flags: image.encrypted as u32,
            });
            store_records.push(StoreRecord {
                store_address: image.store_address,
                actual_size: image.data.len() as u32,
            });
        }
        let code_encrypt = images.iter().any(|i| i.encrypted);
        Self {
            kind: CertKind::Content,
            version: CERT_VERSION,
            flags: Self::flags_word(code_encrypt, images.len()),
            public_key: signer.public_key(subject_key_id)?,
            sw_version,
            nonce,
            components,
            signature: Vec::new(),
            store_records,
        }
        .sign_into(signer, issuer_key_id)
    }
}

/// Ordered Root → Key → Content chain. Serialized Content-first so
/// the device can stream-verify the leaf before the anchors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    pub root: Certificate,
    pub key: Certificate,
    pub content: Certificate,
}

/// Key identifiers for the three chain levels.
#[derive(Debug, Clone)]
pub struct ChainKeyIds {
    pub root: String,
    pub key: String,
    pub content: String,
}

impl CertificateChain {
    pub fn build(
        signer: &dyn CertSigner,
        ids: &ChainKeyIds,
        sw_version: u32,
        nonce: [u8; 8],
        images: &[ContentImage],
    ) -> Result<Self, CertError> {
        Ok(Self {
            root: Certificate::build_root(signer, &ids.root, sw_version, nonce)?,
            key: Certificate::build_key(signer, &ids.root, &ids.key, sw_version, nonce)?,
            content: Certificate::build_content(signer, &ids.key, &ids.content, sw_version, nonce, images)?,
        })
    }

    /// Walk the trust links: Root self-signed, Key under Root's
    /// declared key, Content under Key's declared key. The Key link
    /// is checked before Content, so a broken middle rejects the
    /// chain no matter what the leaf says.
    pub fn verify(&self) -> Result<(), CertError> {
        self.root.verify_with(&self.root)?;
        self.key.verify_with(&self.root)?;
        self.content.verify_with(&self.key)?;
        Ok(())
    }

    /// Check installed images against the Content components.
    pub fn verify_images(&self, images: &[ContentImage]) -> Result<(), CertError> {
        for (index, (comp, image)) in self.content.components.iter().zip(images).enumerate() {
            if comp.hash != sha256(&image.data) {
                return Err(CertError::HashMismatch { index });
            }
            if image.data.len() > comp.max_size as usize {
                return Err(CertError::ImageTooLarge {
                    index,
                    size: image.data.len(),
                    max_size: comp.max_size,
                });
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.content.to_bytes();
        buf.extend_from_slice(&self.key.to_bytes());
        buf.extend_from_slice(&self.root.to_bytes());
        buf
    }

    pub fn parse(data: &[u8]) -> Result<Self, CertError> {
        let (content, used_a) = Certificate::parse(data)?;
        let (key, used_b) = Certificate::parse(&data[used_a..])?;
        let (root, _) = Certificate::parse(&data[used_a + used_b..])?;
        if content.kind != CertKind::Content || key.kind != CertKind::Key || root.kind != CertKind::Root {
            return Err(CertError::BadChainOrder);
        }
        Ok(Self { root, key, content })
    }
}
