//! Splitting images for the wired-update path.
//!
//! Large images go to the device as a file of concatenated
//! wired-download blobs, each targeting a successive load address.
//! The transport later rediscovers the blob boundaries by walking the
//! headers, since each header's size field gives the next offset.

use tracing::debug;

use crate::crypto::RandomSource;

use super::header::{HEADER_LEN, ImageHeader};
use super::kind::{ImageKind, sram_window};
use super::packager::ImagePackager;
use super::policy::PackagingPolicy;
use super::PackagingError;

/// One contiguous slice of a transfer file, sized to a device-side
/// target window. Sizes fit the header's 23-bit field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub offset: u32,
    pub size: u32,
}

/// Default largest piece of content wrapped into a single
/// wired-download blob.
pub const DEFAULT_MAX_PIECE: usize = 0x4_8000;

/// How `split_for_wired` wraps its content.
#[derive(Debug, Clone, Copy)]
pub struct WiredOptions {
    pub load_address: u32,
    /// Largest content slice per blob.
    pub max_piece: usize,
    pub ota: bool,
    pub sbl_ota: bool,
    pub br_ota: bool,
}

impl WiredOptions {
    pub fn new(load_address: u32) -> Self {
        Self { load_address, max_piece: DEFAULT_MAX_PIECE, ota: false, sbl_ota: false, br_ota: false }
    }
}

/// Wrap `content` into one or more wired-download blobs of at most
/// `max_piece` content bytes each, concatenated into one transfer
/// file. SRAM targets must fit the window entirely.
pub fn split_for_wired(
    packager: &ImagePackager<'_>,
    content: &[u8],
    opts: &WiredOptions,
    rng: &mut dyn RandomSource,
) -> Result<Vec<u8>, PackagingError> {
    let window = sram_window();
    if window.contains(&opts.load_address) {
        let end = opts.load_address as u64 + content.len() as u64;
        if end > window.end as u64 {
            return Err(PackagingError::SramOverflow {
                load_address: opts.load_address,
                size: content.len(),
            });
        }
    }

    let mut out = Vec::new();
    let mut offset = 0usize;
    let mut pieces = 0usize;
    while offset < content.len() {
        let len = opts.max_piece.min(content.len() - offset);
        // The device acts on the handoff flags when it sees them, so
        // only the leading piece may carry them.
        let first = offset == 0;
        let kind = ImageKind::WiredDownload {
            load_address: opts.load_address + offset as u32,
            ota: opts.ota && first,
            sbl_ota: opts.sbl_ota && first,
            br_ota: opts.br_ota && first,
        };
        let blob = packager.build(&kind, &content[offset..offset + len], &PackagingPolicy::crc_only(), rng)?;
        out.extend_from_slice(&blob);
        offset += len;
        pieces += 1;
    }
    debug!(pieces, total = out.len(), "split content for wired download");
    Ok(out)
}

/// Walk a transfer file and recover the blob boundaries from each
/// header's declared size.
pub fn scan_segments(data: &[u8]) -> Result<Vec<Segment>, PackagingError> {
    let mut segments = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let header = ImageHeader::parse(&data[offset..])?;
        let size = header.blob_size as usize;
        if size < HEADER_LEN || offset + size > data.len() {
            return Err(PackagingError::SizeMismatch {
                declared: header.blob_size,
                actual: data.len() - offset,
            });
        }
        segments.push(Segment { offset: offset as u32, size: size as u32 });
        offset += size;
    }
    Ok(segments)
}
