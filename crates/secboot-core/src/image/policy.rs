//! Packaging policy: which protections a blob carries and with which
//! keys. An explicit immutable value passed into every build call.

use crate::keys::{KeyKind, check_index};

use super::PackagingError;

/// Payload cipher. The header stores this as a 4-bit selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionAlgo {
    Aes128Ctr,
}

impl EncryptionAlgo {
    pub fn code(&self) -> u8 {
        match self {
            EncryptionAlgo::Aes128Ctr => 1,
        }
    }

    pub fn block_len(&self) -> usize {
        16
    }
}

/// Authentication algorithm for the signature block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAlgo {
    HmacSha256,
}

impl AuthAlgo {
    pub fn code(&self) -> u8 {
        match self {
            AuthAlgo::HmacSha256 => 1,
        }
    }
}

/// When the device checks the signature, which determines what the
/// signature covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScope {
    /// Checked at install time, over the cleartext before encryption.
    Install,
    /// Checked at every boot, over the stored (possibly encrypted)
    /// blob including the envelope.
    Boot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionPolicy {
    pub algo: EncryptionAlgo,
    pub key_index: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPolicy {
    pub algo: AuthAlgo,
    pub key_index: u8,
    pub scope: AuthScope,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackagingPolicy {
    pub encryption: Option<EncryptionPolicy>,
    pub auth: Option<AuthPolicy>,
    pub crc: bool,
}

impl PackagingPolicy {
    /// CRC only, no crypto. The common case for wired envelopes.
    pub fn crc_only() -> Self {
        Self { crc: true, ..Default::default() }
    }

    /// Payload alignment: cipher block size when encrypting, 8 bytes
    /// otherwise so the device always sees whole flash words.
    pub fn alignment(&self) -> usize {
        match &self.encryption {
            Some(enc) => enc.algo.block_len(),
            None => 8,
        }
    }

    /// Key-index validation, run before any byte is produced.
    pub fn validate(&self) -> Result<(), PackagingError> {
        if let Some(enc) = &self.encryption {
            check_index(KeyKind::Aes, enc.key_index)?;
        }
        if let Some(auth) = &self.auth {
            check_index(KeyKind::Hmac, auth.key_index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_follows_encryption() {
        assert_eq!(PackagingPolicy::crc_only().alignment(), 8);
        let enc = PackagingPolicy {
            encryption: Some(EncryptionPolicy { algo: EncryptionAlgo::Aes128Ctr, key_index: 8 }),
            ..Default::default()
        };
        assert_eq!(enc.alignment(), 16);
    }

    #[test]
    fn test_validate_key_indices() {
        let bad_enc = PackagingPolicy {
            encryption: Some(EncryptionPolicy { algo: EncryptionAlgo::Aes128Ctr, key_index: 16 }),
            ..Default::default()
        };
        assert!(bad_enc.validate().is_err());

        let odd_auth = PackagingPolicy {
            auth: Some(AuthPolicy {
                algo: AuthAlgo::HmacSha256,
                key_index: 9,
                scope: AuthScope::Install,
            }),
            ..Default::default()
        };
        assert!(odd_auth.validate().is_err());

        let ok = PackagingPolicy {
            encryption: Some(EncryptionPolicy { algo: EncryptionAlgo::Aes128Ctr, key_index: 8 }),
            auth: Some(AuthPolicy {
                algo: AuthAlgo::HmacSha256,
                key_index: 10,
                scope: AuthScope::Boot,
            }),
            crc: true,
        };
        ok.validate().unwrap();
    }
}
