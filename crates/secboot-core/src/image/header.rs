//! Common image header: four little-endian words shared by every
//! image kind. Word 0 packs the boolean flags around the 23-bit blob
//! size; word 1 is the CRC; word 2 carries algorithm selectors and
//! key indices; word 3 is reserved.

use crate::bitfield::{BitField, word_at, words_to_bytes};

use super::PackagingError;

pub const HEADER_LEN: usize = 16;
/// CRC and signature inputs start here: words 0/1 (size and CRC) are
/// backfilled last and never covered.
pub const CRC_START: usize = 8;
/// Signature block width. Sized for RSA-3072; HMAC tags occupy the
/// first 32 bytes with the rest zero.
pub const SIG_BLOCK_LEN: usize = 384;
/// Encryption envelope: wrapped key (16) + IV (16) + reserved (16).
pub const ENVELOPE_LEN: usize = 48;
/// Kind-specific option words.
pub const OPT_LEN: usize = 16;
pub const MAX_BLOB_SIZE: u32 = (1 << 23) - 1;

const BLOB_SIZE: BitField = BitField::new(0, 0, 23);
const CRC_CHECK: BitField = BitField::new(0, 26, 1);
const ENCRYPTED: BitField = BitField::new(0, 27, 1);
const AUTH_CHECK: BitField = BitField::new(0, 28, 1);
const CC_INCLUDED: BitField = BitField::new(0, 29, 1);
const AMBIQ_OWNED: BitField = BitField::new(0, 30, 1);

const AUTH_KEY_IDX: BitField = BitField::new(2, 0, 8);
const ENC_KEY_IDX: BitField = BitField::new(2, 8, 8);
const AUTH_ALGO: BitField = BitField::new(2, 16, 4);
const ENC_ALGO: BitField = BitField::new(2, 20, 4);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageHeader {
    pub ambiq_owned: bool,
    pub cert_chain_included: bool,
    pub auth_check: bool,
    pub encrypted: bool,
    pub crc_check: bool,
    /// Total blob length in bytes, 23-bit.
    pub blob_size: u32,
    pub crc32: u32,
    pub enc_algo: u8,
    pub auth_algo: u8,
    pub enc_key_index: u8,
    pub auth_key_index: u8,
}

impl ImageHeader {
    pub fn to_words(&self) -> [u32; 4] {
        let mut words = [0u32; 4];
        BLOB_SIZE.set(&mut words, self.blob_size);
        CRC_CHECK.set(&mut words, self.crc_check as u32);
        ENCRYPTED.set(&mut words, self.encrypted as u32);
        AUTH_CHECK.set(&mut words, self.auth_check as u32);
        CC_INCLUDED.set(&mut words, self.cert_chain_included as u32);
        AMBIQ_OWNED.set(&mut words, self.ambiq_owned as u32);
        words[1] = self.crc32;
        AUTH_KEY_IDX.set(&mut words, self.auth_key_index as u32);
        ENC_KEY_IDX.set(&mut words, self.enc_key_index as u32);
        AUTH_ALGO.set(&mut words, self.auth_algo as u32);
        ENC_ALGO.set(&mut words, self.enc_algo as u32);
        words
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        words_to_bytes(&self.to_words())
    }

    /// The algorithm/key word pair (bytes 8..16). This slice leads
    /// every signature input; size and CRC are excluded so they can
    /// be backfilled after signing.
    pub fn fixed_bytes(&self) -> [u8; 8] {
        let words = self.to_words();
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&words[2].to_le_bytes());
        out[4..].copy_from_slice(&words[3].to_le_bytes());
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self, PackagingError> {
        if data.len() < HEADER_LEN {
            return Err(PackagingError::Truncated { at: 0, need: HEADER_LEN, have: data.len() });
        }
        let words = [
            word_at(data, 0).unwrap_or(0),
            word_at(data, 4).unwrap_or(0),
            word_at(data, 8).unwrap_or(0),
            word_at(data, 12).unwrap_or(0),
        ];
        Ok(Self {
            ambiq_owned: AMBIQ_OWNED.get(&words) != 0,
            cert_chain_included: CC_INCLUDED.get(&words) != 0,
            auth_check: AUTH_CHECK.get(&words) != 0,
            encrypted: ENCRYPTED.get(&words) != 0,
            crc_check: CRC_CHECK.get(&words) != 0,
            blob_size: BLOB_SIZE.get(&words),
            crc32: words[1],
            enc_algo: ENC_ALGO.get(&words) as u8,
            auth_algo: AUTH_ALGO.get(&words) as u8,
            enc_key_index: ENC_KEY_IDX.get(&words) as u8,
            auth_key_index: AUTH_KEY_IDX.get(&words) as u8,
        })
    }

    /// Byte length of the fixed leading sections implied by the flags
    /// (header + optional signature + optional envelope + options).
    pub fn fixed_section_len(&self) -> usize {
        let mut len = HEADER_LEN + OPT_LEN;
        if self.auth_check {
            len += SIG_BLOCK_LEN;
        }
        if self.encrypted {
            len += ENVELOPE_LEN;
        }
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let hdr = ImageHeader {
            ambiq_owned: false,
            cert_chain_included: true,
            auth_check: true,
            encrypted: true,
            crc_check: true,
            blob_size: 0x12_3456,
            crc32: 0xDEAD_BEEF,
            enc_algo: 1,
            auth_algo: 1,
            enc_key_index: 9,
            auth_key_index: 8,
        };
        let parsed = ImageHeader::parse(&hdr.to_bytes()).unwrap();
        assert_eq!(parsed, hdr);
        assert_eq!(parsed.fixed_section_len(), HEADER_LEN + SIG_BLOCK_LEN + ENVELOPE_LEN + OPT_LEN);
    }

    #[test]
    fn test_fixed_bytes_exclude_size_and_crc() {
        let mut hdr = ImageHeader { auth_key_index: 8, auth_algo: 1, ..Default::default() };
        let before = hdr.fixed_bytes();
        hdr.blob_size = 0x40;
        hdr.crc32 = 0x1234_5678;
        assert_eq!(hdr.fixed_bytes(), before);
    }

    #[test]
    fn test_parse_rejects_short_input() {
        assert!(matches!(
            ImageHeader::parse(&[0u8; 15]),
            Err(PackagingError::Truncated { .. })
        ));
    }
}
