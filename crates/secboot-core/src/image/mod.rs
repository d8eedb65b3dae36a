//! Secure-boot image packaging.
//!
//! Turns a raw payload plus a policy into the final binary blob the
//! boot ROM consumes: fixed header, optional signature block and
//! encryption envelope, kind-specific option words, payload. Layout:
//!
//! ```text
//! +0    header (16 bytes: flags/size, crc32, algo/key indices)
//! +16   signature block (384 bytes, iff auth enabled)
//! +..   encryption envelope (48 bytes, iff encryption enabled)
//! +..   option words (16 bytes, kind-specific; starts with magic)
//! +..   payload (padded to the alignment the policy requires)
//! ```
//!
//! Size and CRC are backfilled last, so an error mid-build can never
//! leave behind a blob whose CRC validates over wrong content.

mod header;
mod kind;
mod packager;
mod policy;
mod segment;

pub use header::{
    CRC_START, ENVELOPE_LEN, HEADER_LEN, ImageHeader, MAX_BLOB_SIZE, OPT_LEN, SIG_BLOCK_LEN,
};
pub use kind::{ImageKind, kind_name, program_key_for, sram_window};
pub use packager::{Envelope, ImagePackager, ParsedImage};
pub use policy::{AuthAlgo, AuthPolicy, AuthScope, EncryptionAlgo, EncryptionPolicy, PackagingPolicy};
pub use segment::{DEFAULT_MAX_PIECE, Segment, WiredOptions, scan_segments, split_for_wired};

use crate::crypto::CryptoError;
use crate::keys::KeyError;

#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("load address {0:#010X} is not word-aligned")]
    UnalignedLoadAddress(u32),

    #[error("INFO0 write of {size_words} words at word offset {offset_words} overruns the {region_bytes}-byte region")]
    Info0OutOfRange {
        offset_words: u32,
        size_words: u32,
        region_bytes: u32,
    },

    #[error("blob of {0} bytes does not fit the 23-bit size field")]
    BlobTooLarge(usize),

    #[error("certificate chain of {0} bytes does not fit the 12-bit option field")]
    ChainTooLarge(usize),

    #[error("image of {size} bytes at {load_address:#010X} overruns the SRAM window")]
    SramOverflow { load_address: u32, size: usize },

    #[error("blob truncated: need {need} bytes at offset {at}, have {have}")]
    Truncated { at: usize, need: usize, have: usize },

    #[error("header declares {declared} bytes but blob holds {actual}")]
    SizeMismatch { declared: u32, actual: usize },

    #[error("CRC mismatch: header holds {stored:#010X}, computed {computed:#010X}")]
    CrcMismatch { stored: u32, computed: u32 },

    #[error("unknown image magic {0:#04X}")]
    UnknownMagic(u8),
}
