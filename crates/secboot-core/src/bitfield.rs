//! Bitfield packing for hardware-register-style words.
//!
//! Image headers and protocol words store named fields at fixed bit
//! offsets inside 32-bit little-endian words. Values are masked to the
//! field width before shifting, matching register write semantics.

/// Mask for a field of `width` bits (width 32 yields all ones).
#[inline]
pub const fn mask(width: u32) -> u32 {
    if width >= 32 { u32::MAX } else { (1u32 << width) - 1 }
}

/// Pack `value` into a word at `lsb`, truncated to `width` bits.
#[inline]
pub const fn pack(value: u32, lsb: u32, width: u32) -> u32 {
    (value & mask(width)) << lsb
}

/// Extract a `width`-bit field at `lsb` from `word`.
#[inline]
pub const fn unpack(word: u32, lsb: u32, width: u32) -> u32 {
    (word >> lsb) & mask(width)
}

/// Descriptor for a named field: which word it lives in, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub word: usize,
    pub lsb: u32,
    pub width: u32,
}

impl BitField {
    pub const fn new(word: usize, lsb: u32, width: u32) -> Self {
        Self { word, lsb, width }
    }

    /// OR `value` (masked to the field width) into its word slot.
    pub fn set(&self, words: &mut [u32], value: u32) {
        words[self.word] |= pack(value, self.lsb, self.width);
    }

    /// Read the field back out of its word slot.
    pub fn get(&self, words: &[u32]) -> u32 {
        unpack(words[self.word], self.lsb, self.width)
    }
}

/// Serialize a word array little-endian.
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * 4);
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    out
}

/// Read the little-endian word at byte `offset` of `data`.
///
/// Returns `None` when fewer than 4 bytes remain.
pub fn word_at(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
