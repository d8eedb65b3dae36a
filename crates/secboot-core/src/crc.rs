//! CRC-32 integrity words.
//!
//! Image headers and wire messages both carry a CRC-32 (IEEE
//! reflected, as in zlib) over their payload bytes. The engine
//! supports incremental feeding so large payloads can be checksummed
//! without concatenating them first.

use crc32fast::Hasher;

/// Incremental CRC-32 over a byte stream.
#[derive(Debug, Default, Clone)]
pub struct CrcEngine {
    hasher: Hasher,
}

impl CrcEngine {
    pub fn new() -> Self {
        Self { hasher: Hasher::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

/// One-shot CRC-32 of a byte slice.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_vector() {
        // Standard check value for "123456789".
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut engine = CrcEngine::new();
        engine.update(&data[..10]);
        engine.update(&data[10..31]);
        engine.update(&data[31..]);
        assert_eq!(engine.finalize(), crc32(data));
    }

    #[test]
    fn test_empty() {
        assert_eq!(crc32(&[]), 0);
        assert_eq!(CrcEngine::new().finalize(), 0);
    }
}
