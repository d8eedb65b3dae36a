//! Customer key material.
//!
//! The boot ROM addresses keys by an 8-bit index into OTP slots, so
//! the host only ever embeds an index in the image header and resolves
//! the actual bytes from a local bank when encrypting or signing.
//! Banks load from a TOML file with hex-encoded values, mirroring the
//! config-file handling elsewhere in the workspace.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::Path;

use serde::Deserialize;

/// Device-side unlock words checked by the wired update payload.
pub const FLASH_PROGRAM_KEY: u32 = 0x1234_4321;
pub const SRAM_PROGRAM_KEY: u32 = 0x1234_4322;
pub const INFO0_KEY: u32 = 0xD894_E09E;

/// OTP slot range shared by both key kinds.
pub const KEY_IDX_RANGE: RangeInclusive<u8> = 8..=15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// 16-byte AES key-encryption keys.
    Aes,
    /// 32-byte HMAC-SHA256 keys. These span two OTP slots, so only
    /// even indices are valid.
    Hmac,
}

impl KeyKind {
    pub fn label(&self) -> &'static str {
        match self {
            KeyKind::Aes => "aes",
            KeyKind::Hmac => "hmac",
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            KeyKind::Aes => 16,
            KeyKind::Hmac => 32,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("{kind} key index {index} outside slots {}..={}", KEY_IDX_RANGE.start(), KEY_IDX_RANGE.end())]
    IndexOutOfRange { kind: &'static str, index: u8 },
    #[error("hmac key index {0} is odd; 32-byte keys occupy even slot pairs")]
    OddHmacIndex(u8),
    #[error("no {kind} key loaded at index {index}")]
    Missing { kind: &'static str, index: u8 },
    #[error("{kind} key at index {index} has {got} bytes, expected {want}")]
    WrongLength { kind: &'static str, index: u8, got: usize, want: usize },
    #[error("key bank {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("key bank {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("key bank entry {kind}.{index}: {reason}")]
    BadEntry { kind: &'static str, index: String, reason: String },
}

/// Validate an index for `kind` without resolving bytes. Header
/// construction uses this so a bad config fails before any output.
pub fn check_index(kind: KeyKind, index: u8) -> Result<(), KeyError> {
    if !KEY_IDX_RANGE.contains(&index) {
        return Err(KeyError::IndexOutOfRange { kind: kind.label(), index });
    }
    if kind == KeyKind::Hmac && index % 2 != 0 {
        return Err(KeyError::OddHmacIndex(index));
    }
    Ok(())
}

/// Resolves header key indices to raw key bytes.
pub trait KeyLookup {
    fn key_bytes(&self, kind: KeyKind, index: u8) -> Result<Vec<u8>, KeyError>;
}

#[derive(Debug, Deserialize, Default)]
struct KeyBankFile {
    #[serde(default)]
    aes: BTreeMap<String, String>,
    #[serde(default)]
    hmac: BTreeMap<String, String>,
}

/// File-backed key bank.
#[derive(Debug, Default)]
pub struct KeyBank {
    aes: BTreeMap<u8, Vec<u8>>,
    hmac: BTreeMap<u8, Vec<u8>>,
}

impl KeyBank {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| KeyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: KeyBankFile = toml::from_str(&text).map_err(|source| KeyError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        let mut bank = Self::default();
        for (kind, src, dst) in [
            (KeyKind::Aes, &file.aes, &mut bank.aes),
            (KeyKind::Hmac, &file.hmac, &mut bank.hmac),
        ] {
            for (index, hex_value) in src {
                let idx: u8 = index.parse().map_err(|_| KeyError::BadEntry {
                    kind: kind.label(),
                    index: index.clone(),
                    reason: "index is not a u8".into(),
                })?;
                check_index(kind, idx)?;
                let bytes = hex::decode(hex_value).map_err(|e| KeyError::BadEntry {
                    kind: kind.label(),
                    index: index.clone(),
                    reason: e.to_string(),
                })?;
                if bytes.len() != kind.byte_len() {
                    return Err(KeyError::WrongLength {
                        kind: kind.label(),
                        index: idx,
                        got: bytes.len(),
                        want: kind.byte_len(),
                    });
                }
                dst.insert(idx, bytes);
            }
        }
        Ok(bank)
    }

    pub fn insert(&mut self, kind: KeyKind, index: u8, bytes: Vec<u8>) -> Result<(), KeyError> {
        check_index(kind, index)?;
        if bytes.len() != kind.byte_len() {
            return Err(KeyError::WrongLength {
                kind: kind.label(),
                index,
                got: bytes.len(),
                want: kind.byte_len(),
            });
        }
        match kind {
            KeyKind::Aes => self.aes.insert(index, bytes),
            KeyKind::Hmac => self.hmac.insert(index, bytes),
        };
        Ok(())
    }
}

impl KeyLookup for KeyBank {
    fn key_bytes(&self, kind: KeyKind, index: u8) -> Result<Vec<u8>, KeyError> {
        check_index(kind, index)?;
        let table = match kind {
            KeyKind::Aes => &self.aes,
            KeyKind::Hmac => &self.hmac,
        };
        table
            .get(&index)
            .cloned()
            .ok_or(KeyError::Missing { kind: kind.label(), index })
    }
}

/// In-memory bank filling every slot with a derived pattern.
#[derive(Debug, Default)]
pub struct StaticKeys;

impl KeyLookup for StaticKeys {
    fn key_bytes(&self, kind: KeyKind, index: u8) -> Result<Vec<u8>, KeyError> {
        check_index(kind, index)?;
        let mut bytes = vec![0u8; kind.byte_len()];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = index.wrapping_mul(0x11).wrapping_add(i as u8);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_validation() {
        assert!(check_index(KeyKind::Aes, 8).is_ok());
        assert!(check_index(KeyKind::Aes, 15).is_ok());
        assert!(check_index(KeyKind::Aes, 7).is_err());
        assert!(check_index(KeyKind::Aes, 16).is_err());
        assert!(check_index(KeyKind::Hmac, 10).is_ok());
        assert!(matches!(check_index(KeyKind::Hmac, 9), Err(KeyError::OddHmacIndex(9))));
    }

    #[test]
    fn test_static_keys_deterministic() {
        let keys = StaticKeys;
        let a = keys.key_bytes(KeyKind::Aes, 8).unwrap();
        let b = keys.key_bytes(KeyKind::Aes, 8).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, keys.key_bytes(KeyKind::Aes, 9).unwrap());
        assert_eq!(keys.key_bytes(KeyKind::Hmac, 8).unwrap().len(), 32);
    }

    #[test]
    fn test_bank_parse() {
        let text = r#"
            [aes]
            8 = "000102030405060708090a0b0c0d0e0f"

            [hmac]
            10 = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
        "#;
        let file: KeyBankFile = toml::from_str(text).unwrap();
        let mut bank = KeyBank::default();
        bank.insert(KeyKind::Aes, 8, hex::decode(&file.aes["8"]).unwrap()).unwrap();
        bank.insert(KeyKind::Hmac, 10, hex::decode(&file.hmac["10"]).unwrap()).unwrap();

        assert_eq!(bank.key_bytes(KeyKind::Aes, 8).unwrap()[15], 0x0f);
        assert!(matches!(
            bank.key_bytes(KeyKind::Aes, 9),
            Err(KeyError::Missing { .. })
        ));
    }

    #[test]
    fn test_insert_rejects_wrong_length() {
        let mut bank = KeyBank::default();
        assert!(matches!(
            bank.insert(KeyKind::Aes, 8, vec![0u8; 15]),
            Err(KeyError::WrongLength { .. })
        ));
    }
}
