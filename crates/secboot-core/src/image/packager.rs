//! Blob assembly and re-parsing.

use tracing::debug;

use crate::bitfield::{word_at, words_to_bytes};
use crate::crc::crc32;
use crate::crypto::{AES128_KEY_LEN, AES_IV_LEN, RandomSource, aes_ctr_apply, hmac_sha256};
use crate::keys::{KeyKind, KeyLookup};

use super::header::{
    CRC_START, ENVELOPE_LEN, HEADER_LEN, ImageHeader, MAX_BLOB_SIZE, OPT_LEN, SIG_BLOCK_LEN,
};
use super::kind::{ImageKind, kind_name};
use super::policy::{AuthScope, PackagingPolicy};
use super::PackagingError;

/// Assembles one image kind + payload + policy into a final blob.
/// Pure apart from the key lookups and the randomness source; file
/// I/O belongs to the caller.
pub struct ImagePackager<'a> {
    keys: &'a dyn KeyLookup,
}

impl<'a> ImagePackager<'a> {
    pub fn new(keys: &'a dyn KeyLookup) -> Self {
        Self { keys }
    }

    pub fn build(
        &self,
        kind: &ImageKind,
        payload: &[u8],
        policy: &PackagingPolicy,
        rng: &mut dyn RandomSource,
    ) -> Result<Vec<u8>, PackagingError> {
        self.build_with_chain(kind, payload, policy, None, rng)
    }

    /// Build with a serialized certificate chain prepended to the
    /// payload region. The chain travels under the same protections
    /// as the payload and its length is recorded in the option words.
    pub fn build_with_chain(
        &self,
        kind: &ImageKind,
        payload: &[u8],
        policy: &PackagingPolicy,
        cert_chain: Option<&[u8]>,
        rng: &mut dyn RandomSource,
    ) -> Result<Vec<u8>, PackagingError> {
        kind.validate()?;
        policy.validate()?;

        let chain = cert_chain.unwrap_or(&[]);
        if chain.len() > 0xFFF {
            return Err(PackagingError::ChainTooLarge(chain.len()));
        }

        // Payload region: chain first, then payload, padded to the
        // policy's alignment.
        let mut body = Vec::with_capacity(chain.len() + payload.len() + 16);
        body.extend_from_slice(chain);
        body.extend_from_slice(payload);
        let align = policy.alignment();
        let rem = body.len() % align;
        if rem != 0 {
            body.resize(body.len() + align - rem, 0);
        }

        let mut header = ImageHeader {
            ambiq_owned: matches!(kind, ImageKind::SecureFirmware { .. }),
            cert_chain_included: !chain.is_empty(),
            auth_check: policy.auth.is_some(),
            encrypted: policy.encryption.is_some(),
            crc_check: policy.crc,
            ..Default::default()
        };
        if let Some(enc) = &policy.encryption {
            header.enc_algo = enc.algo.code();
            header.enc_key_index = enc.key_index;
        }
        if let Some(auth) = &policy.auth {
            header.auth_algo = auth.algo.code();
            header.auth_key_index = auth.key_index;
        }

        let total = header.fixed_section_len() + body.len();
        if total as u32 > MAX_BLOB_SIZE {
            return Err(PackagingError::BlobTooLarge(total));
        }
        header.blob_size = total as u32;

        let opt_bytes = words_to_bytes(&kind.opt_words(chain.len() as u32));
        let fixed = header.fixed_bytes();

        // Region that gets encrypted: options plus payload.
        let mut region = opt_bytes;
        region.extend_from_slice(&body);

        let mut sig_block = [0u8; SIG_BLOCK_LEN];
        if let Some(auth) = &policy.auth
            && auth.scope == AuthScope::Install
        {
            let key = self.keys.key_bytes(KeyKind::Hmac, auth.key_index)?;
            let mut input = fixed.to_vec();
            input.extend_from_slice(&region);
            let tag = hmac_sha256(&key, &input)?;
            sig_block[..tag.len()].copy_from_slice(&tag);
        }

        let mut envelope = [0u8; ENVELOPE_LEN];
        if let Some(enc) = &policy.encryption {
            let mut key = [0u8; AES128_KEY_LEN];
            let mut iv = [0u8; AES_IV_LEN];
            rng.fill(&mut key);
            rng.fill(&mut iv);

            aes_ctr_apply(&key, &iv, &mut region)?;

            // Wrap the payload key under the KEK with the same IV.
            let kek = self.keys.key_bytes(KeyKind::Aes, enc.key_index)?;
            let mut wrapped = key;
            aes_ctr_apply(&kek, &iv, &mut wrapped)?;

            envelope[..16].copy_from_slice(&wrapped);
            envelope[16..32].copy_from_slice(&iv);
        }

        if let Some(auth) = &policy.auth
            && auth.scope == AuthScope::Boot
        {
            let key = self.keys.key_bytes(KeyKind::Hmac, auth.key_index)?;
            let mut input = fixed.to_vec();
            if policy.encryption.is_some() {
                input.extend_from_slice(&envelope);
            }
            input.extend_from_slice(&region);
            let tag = hmac_sha256(&key, &input)?;
            sig_block[..tag.len()].copy_from_slice(&tag);
        }

        let mut blob = Vec::with_capacity(total);
        blob.extend_from_slice(&header.to_bytes());
        if policy.auth.is_some() {
            blob.extend_from_slice(&sig_block);
        }
        if policy.encryption.is_some() {
            blob.extend_from_slice(&envelope);
        }
        blob.extend_from_slice(&region);
        debug_assert_eq!(blob.len(), total);

        if policy.crc {
            let crc = crc32(&blob[CRC_START..]);
            blob[4..8].copy_from_slice(&crc.to_le_bytes());
        }

        debug!(
            kind = kind.name(),
            blob_size = total,
            encrypted = policy.encryption.is_some(),
            authenticated = policy.auth.is_some(),
            "packaged image"
        );
        Ok(blob)
    }
}

/// Key-wrap envelope recovered from a packaged blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub wrapped_key: [u8; 16],
    pub iv: [u8; 16],
}

/// A packaged blob split back into its sections. The option words and
/// payload stay as stored, which means ciphertext for encrypted
/// blobs until [`ParsedImage::decrypt_region`] is applied.
#[derive(Debug, Clone)]
pub struct ParsedImage {
    pub header: ImageHeader,
    pub signature: Option<Vec<u8>>,
    pub envelope: Option<Envelope>,
    region: Vec<u8>,
}

impl ParsedImage {
    /// Split a blob and check its declared size and CRC.
    pub fn parse(blob: &[u8]) -> Result<Self, PackagingError> {
        let header = ImageHeader::parse(blob)?;
        if header.blob_size as usize != blob.len() {
            return Err(PackagingError::SizeMismatch {
                declared: header.blob_size,
                actual: blob.len(),
            });
        }
        if header.crc_check {
            let computed = crc32(&blob[CRC_START..]);
            if computed != header.crc32 {
                return Err(PackagingError::CrcMismatch { stored: header.crc32, computed });
            }
        }

        let mut at = HEADER_LEN;
        let take = |at: &mut usize, len: usize| -> Result<&[u8], PackagingError> {
            let slice = blob
                .get(*at..*at + len)
                .ok_or(PackagingError::Truncated { at: *at, need: len, have: blob.len() - *at })?;
            *at += len;
            Ok(slice)
        };

        let signature = if header.auth_check {
            Some(take(&mut at, SIG_BLOCK_LEN)?.to_vec())
        } else {
            None
        };
        let envelope = if header.encrypted {
            let raw = take(&mut at, ENVELOPE_LEN)?;
            let mut wrapped_key = [0u8; 16];
            let mut iv = [0u8; 16];
            wrapped_key.copy_from_slice(&raw[..16]);
            iv.copy_from_slice(&raw[16..32]);
            Some(Envelope { wrapped_key, iv })
        } else {
            None
        };
        if blob.len() - at < OPT_LEN {
            return Err(PackagingError::Truncated { at, need: OPT_LEN, have: blob.len() - at });
        }
        let region = blob[at..].to_vec();

        Ok(Self { header, signature, envelope, region })
    }

    /// Kind magic from option word 0. Errors for encrypted blobs
    /// (the options are ciphertext) or an unrecognized value.
    pub fn magic(&self) -> Result<u8, PackagingError> {
        if self.header.encrypted {
            return Err(PackagingError::UnknownMagic(0));
        }
        let magic = (word_at(&self.region, 0).unwrap_or(0) & 0xFF) as u8;
        match kind_name(magic) {
            Some(_) => Ok(magic),
            None => Err(PackagingError::UnknownMagic(magic)),
        }
    }

    pub fn opt_words(&self) -> [u32; 4] {
        [
            word_at(&self.region, 0).unwrap_or(0),
            word_at(&self.region, 4).unwrap_or(0),
            word_at(&self.region, 8).unwrap_or(0),
            word_at(&self.region, 12).unwrap_or(0),
        ]
    }

    /// Payload bytes (after the option words), as stored.
    pub fn payload(&self) -> &[u8] {
        &self.region[OPT_LEN..]
    }

    /// Unwrap the payload key under the KEK and decrypt the options
    /// and payload in place.
    pub fn decrypt_region(&mut self, keys: &dyn KeyLookup) -> Result<(), PackagingError> {
        let Some(env) = &self.envelope else {
            return Ok(());
        };
        let kek = keys.key_bytes(KeyKind::Aes, self.header.enc_key_index)?;
        let mut key = env.wrapped_key;
        aes_ctr_apply(&kek, &env.iv, &mut key)?;
        aes_ctr_apply(&key, &env.iv, &mut self.region)?;
        self.header.encrypted = false;
        self.envelope = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_keys::FixedRandom;
    use crate::image::policy::{AuthAlgo, AuthPolicy, EncryptionAlgo, EncryptionPolicy};
    use crate::keys::StaticKeys;

    fn packager_build(
        kind: &ImageKind,
        payload: &[u8],
        policy: &PackagingPolicy,
    ) -> Vec<u8> {
        let keys = StaticKeys;
        let packager = ImagePackager::new(&keys);
        let mut rng = FixedRandom(0xA0);
        packager.build(kind, payload, policy, &mut rng).unwrap()
    }

    #[test]
    fn test_nonsecure_end_to_end() {
        let kind = ImageKind::NonSecure { load_address: 0x41_0000 };
        let blob = packager_build(&kind, &[0x01, 0x02, 0x03, 0x04], &PackagingPolicy::crc_only());

        // 16 header + 16 options + 4 bytes padded to 8.
        assert_eq!(blob.len(), 40);
        let header = ImageHeader::parse(&blob).unwrap();
        assert_eq!(header.blob_size, 40);
        assert!(header.crc_check);
        assert!(!header.encrypted);
        assert!(!header.auth_check);
        assert_eq!(header.crc32, crc32(&blob[8..]));

        let parsed = ParsedImage::parse(&blob).unwrap();
        assert_eq!(parsed.magic().unwrap(), 0xCB);
        assert_eq!(parsed.opt_words()[1], 0x41_0000);
        assert_eq!(parsed.payload(), &[0x01, 0x02, 0x03, 0x04, 0, 0, 0, 0]);
    }

    #[test]
    fn test_encryption_round_trip() {
        let kind = ImageKind::Main { load_address: 0x1_0000 };
        let policy = PackagingPolicy {
            encryption: Some(EncryptionPolicy { algo: EncryptionAlgo::Aes128Ctr, key_index: 8 }),
            auth: None,
            crc: true,
        };
        let payload: Vec<u8> = (0u8..48).collect();
        let blob = packager_build(&kind, &payload, &policy);

        let mut parsed = ParsedImage::parse(&blob).unwrap();
        assert!(parsed.header.encrypted);
        // Ciphertext differs from the cleartext payload.
        assert_ne!(&parsed.payload()[..48], &payload[..]);

        parsed.decrypt_region(&StaticKeys).unwrap();
        assert_eq!(parsed.magic().unwrap(), 0xC0);
        assert_eq!(&parsed.payload()[..48], &payload[..]);
    }

    #[test]
    fn test_idempotent_with_fixed_rng() {
        let kind = ImageKind::Main { load_address: 0x1_0000 };
        let policy = PackagingPolicy {
            encryption: Some(EncryptionPolicy { algo: EncryptionAlgo::Aes128Ctr, key_index: 8 }),
            auth: Some(AuthPolicy {
                algo: AuthAlgo::HmacSha256,
                key_index: 10,
                scope: AuthScope::Boot,
            }),
            crc: true,
        };
        let payload = [0x55u8; 100];
        let a = packager_build(&kind, &payload, &policy);
        let b = packager_build(&kind, &payload, &policy);
        assert_eq!(a, b);
    }

    #[test]
    fn test_install_and_boot_scopes_differ() {
        let kind = ImageKind::Main { load_address: 0x1_0000 };
        let base = PackagingPolicy {
            encryption: Some(EncryptionPolicy { algo: EncryptionAlgo::Aes128Ctr, key_index: 8 }),
            auth: Some(AuthPolicy {
                algo: AuthAlgo::HmacSha256,
                key_index: 10,
                scope: AuthScope::Install,
            }),
            crc: false,
        };
        let mut boot = base;
        boot.auth = Some(AuthPolicy {
            algo: AuthAlgo::HmacSha256,
            key_index: 10,
            scope: AuthScope::Boot,
        });

        let payload = [0xAAu8; 64];
        let install_blob = packager_build(&kind, &payload, &base);
        let boot_blob = packager_build(&kind, &payload, &boot);

        let sig_a = ParsedImage::parse(&install_blob).unwrap().signature.unwrap();
        let sig_b = ParsedImage::parse(&boot_blob).unwrap().signature.unwrap();
        assert_ne!(sig_a, sig_b);
        // HMAC tag occupies the head of the block, rest stays zero.
        assert!(sig_a[32..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_chain_attachment() {
        let kind = ImageKind::Main { load_address: 0x1_0000 };
        let chain = vec![0xEEu8; 96];
        let keys = StaticKeys;
        let packager = ImagePackager::new(&keys);
        let mut rng = FixedRandom(0);
        let blob = packager
            .build_with_chain(&kind, &[1, 2, 3, 4], &PackagingPolicy::crc_only(), Some(&chain), &mut rng)
            .unwrap();

        let parsed = ParsedImage::parse(&blob).unwrap();
        assert!(parsed.header.cert_chain_included);
        assert_eq!(crate::image::kind::chain_size_from_opt(parsed.opt_words()[0]), 96);
        assert_eq!(&parsed.payload()[..96], &chain[..]);
        assert_eq!(&parsed.payload()[96..100], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_bad_key_index_rejected() {
        let kind = ImageKind::Main { load_address: 0x1_0000 };
        let policy = PackagingPolicy {
            encryption: Some(EncryptionPolicy { algo: EncryptionAlgo::Aes128Ctr, key_index: 7 }),
            auth: None,
            crc: true,
        };
        let keys = StaticKeys;
        let packager = ImagePackager::new(&keys);
        let mut rng = FixedRandom(0);
        assert!(packager.build(&kind, &[0u8; 8], &policy, &mut rng).is_err());
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let kind = ImageKind::NonSecure { load_address: 0 };
        let mut blob = packager_build(&kind, &[9u8; 8], &PackagingPolicy::crc_only());
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(matches!(
            ParsedImage::parse(&blob),
            Err(PackagingError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_size_mismatch_detected() {
        let kind = ImageKind::NonSecure { load_address: 0 };
        let mut blob = packager_build(&kind, &[9u8; 8], &PackagingPolicy::crc_only());
        blob.push(0);
        assert!(matches!(
            ParsedImage::parse(&blob),
            Err(PackagingError::SizeMismatch { .. })
        ));
    }
}
