//! Image kinds and their option words.
//!
//! Every kind owns 16 bytes of option words directly after the fixed
//! sections. Word 0 always starts with the kind's magic byte; the
//! remaining layout is per-kind.

use std::ops::Range;

use tracing::warn;

use crate::bitfield::{pack, unpack};
use crate::keys::{FLASH_PROGRAM_KEY, INFO0_KEY, SRAM_PROGRAM_KEY};

use super::PackagingError;

pub const MAGIC_MAIN: u8 = 0xC0;
pub const MAGIC_CUSTOMER_OTA: u8 = 0xC1;
pub const MAGIC_SECURE_FIRMWARE: u8 = 0xC2;
pub const MAGIC_CONTAINER: u8 = 0xC3;
pub const MAGIC_OEM_RECOVERY: u8 = 0xC9;
pub const MAGIC_WIRED_DOWNLOAD: u8 = 0xCA;
pub const MAGIC_NONSECURE: u8 = 0xCB;
pub const MAGIC_CHILD: u8 = 0xCC;
pub const MAGIC_INFO0: u8 = 0xCD;
pub const MAGIC_KEY_REVOKE: u8 = 0xCE;

/// On-device INFO0 configuration region, in bytes.
pub const INFO0_REGION_BYTES: u32 = 8192;
/// Flash page size; load addresses off a page boundary still boot but
/// cost an extra copy, so they only warn.
pub const FLASH_PAGE_BYTES: u32 = 8192;

/// SRAM address window a wired download may target directly.
pub fn sram_window() -> Range<u32> {
    0x2008_0000..0x201C_0000
}

/// Device unlock word for a wired write, chosen by destination.
pub fn program_key_for(load_address: u32) -> u32 {
    if sram_window().contains(&load_address) {
        SRAM_PROGRAM_KEY
    } else {
        FLASH_PROGRAM_KEY
    }
}

/// The closed set of image kinds, each carrying its typed option
/// fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Boot-ROM-verified main firmware.
    Main { load_address: u32 },
    /// Auxiliary image verified as part of a main image's set.
    Child { load_address: u32 },
    /// Firmware outside the secure-boot perimeter.
    NonSecure { load_address: u32 },
    /// Ambiq-owned secure firmware update.
    SecureFirmware { load_address: u32 },
    /// Over-the-air update staged for the bootloader.
    CustomerOta { load_address: u32 },
    /// Envelope consumed by the wired-update path. The flags steer
    /// what the bootloader does with the content after programming.
    WiredDownload {
        load_address: u32,
        ota: bool,
        sbl_ota: bool,
        br_ota: bool,
    },
    /// INFO0 configuration write. Offsets and sizes are in words; the
    /// destination selector is the raw 2-bit field the ROM consumes.
    Info0 {
        offset_words: u32,
        size_words: u32,
        program_dest: u8,
    },
    /// Wrapper for a serialized certificate chain.
    Container,
    /// Key slot revocation request.
    KeyRevoke,
    /// OEM-owned recovery image.
    OemRecovery,
}

/// Human-readable name for a magic byte, if known.
pub fn kind_name(magic: u8) -> Option<&'static str> {
    Some(match magic {
        MAGIC_MAIN => "main",
        MAGIC_CUSTOMER_OTA => "customer-ota",
        MAGIC_SECURE_FIRMWARE => "secure-firmware",
        MAGIC_CONTAINER => "container",
        MAGIC_OEM_RECOVERY => "oem-recovery",
        MAGIC_WIRED_DOWNLOAD => "wired-download",
        MAGIC_NONSECURE => "nonsecure",
        MAGIC_CHILD => "child",
        MAGIC_INFO0 => "info0",
        MAGIC_KEY_REVOKE => "key-revoke",
        _ => return None,
    })
}

impl ImageKind {
    pub fn magic(&self) -> u8 {
        match self {
            ImageKind::Main { .. } => MAGIC_MAIN,
            ImageKind::Child { .. } => MAGIC_CHILD,
            ImageKind::NonSecure { .. } => MAGIC_NONSECURE,
            ImageKind::SecureFirmware { .. } => MAGIC_SECURE_FIRMWARE,
            ImageKind::CustomerOta { .. } => MAGIC_CUSTOMER_OTA,
            ImageKind::WiredDownload { .. } => MAGIC_WIRED_DOWNLOAD,
            ImageKind::Info0 { .. } => MAGIC_INFO0,
            ImageKind::Container => MAGIC_CONTAINER,
            ImageKind::KeyRevoke => MAGIC_KEY_REVOKE,
            ImageKind::OemRecovery => MAGIC_OEM_RECOVERY,
        }
    }

    pub fn name(&self) -> &'static str {
        kind_name(self.magic()).unwrap_or("unknown")
    }

    pub fn load_address(&self) -> Option<u32> {
        match self {
            ImageKind::Main { load_address }
            | ImageKind::Child { load_address }
            | ImageKind::NonSecure { load_address }
            | ImageKind::SecureFirmware { load_address }
            | ImageKind::CustomerOta { load_address }
            | ImageKind::WiredDownload { load_address, .. } => Some(*load_address),
            _ => None,
        }
    }

    /// Reject structurally bad configurations before any output is
    /// produced. Page misalignment is survivable and only warns.
    pub fn validate(&self) -> Result<(), PackagingError> {
        if let Some(addr) = self.load_address() {
            if addr % 4 != 0 {
                return Err(PackagingError::UnalignedLoadAddress(addr));
            }
            if addr % FLASH_PAGE_BYTES != 0 {
                warn!(
                    load_address = format!("{addr:#010X}"),
                    "load address is not page-aligned; programming will be slower"
                );
            }
        }
        if let ImageKind::Info0 { offset_words, size_words, .. } = self {
            // Widen before the add so hostile word counts cannot wrap
            // past the region check. Anything that passes also fits
            // the 12-bit option fields, since the region is 2048 words.
            let end = (u64::from(*offset_words) + u64::from(*size_words)) * 4;
            if end > u64::from(INFO0_REGION_BYTES) {
                return Err(PackagingError::Info0OutOfRange {
                    offset_words: *offset_words,
                    size_words: *size_words,
                    region_bytes: INFO0_REGION_BYTES,
                });
            }
        }
        Ok(())
    }

    /// Build the four option words. `cert_chain_size` lands in the
    /// firmware layouts' word 0; other kinds ignore it.
    pub fn opt_words(&self, cert_chain_size: u32) -> [u32; 4] {
        let mut words = [0u32; 4];
        words[0] = self.magic() as u32;
        match self {
            ImageKind::Main { load_address }
            | ImageKind::Child { load_address }
            | ImageKind::NonSecure { load_address }
            | ImageKind::SecureFirmware { load_address }
            | ImageKind::CustomerOta { load_address } => {
                words[0] |= pack(cert_chain_size, 8, 12);
                words[1] = *load_address;
            }
            ImageKind::WiredDownload { load_address, ota, sbl_ota, br_ota } => {
                words[0] |= pack(*ota as u32, 8, 1)
                    | pack(*sbl_ota as u32, 9, 1)
                    | pack(*br_ota as u32, 10, 1);
                words[1] = *load_address;
                words[2] = program_key_for(*load_address);
            }
            ImageKind::Info0 { offset_words, size_words, program_dest } => {
                words[1] = pack(*offset_words, 0, 12)
                    | pack(*size_words, 12, 12)
                    | pack(*program_dest as u32, 24, 2);
                words[2] = INFO0_KEY;
            }
            ImageKind::Container | ImageKind::KeyRevoke | ImageKind::OemRecovery => {}
        }
        words
    }
}

/// Cert-chain size recorded in a firmware option word 0.
pub(super) fn chain_size_from_opt(word0: u32) -> u32 {
    unpack(word0, 8, 12)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_values() {
        assert_eq!(ImageKind::Main { load_address: 0 }.magic(), 0xC0);
        assert_eq!(ImageKind::NonSecure { load_address: 0 }.magic(), 0xCB);
        assert_eq!(ImageKind::Container.magic(), 0xC3);
        assert_eq!(kind_name(0xCA), Some("wired-download"));
        assert_eq!(kind_name(0xC8), None);
    }

    #[test]
    fn test_unaligned_load_address_rejected() {
        let kind = ImageKind::Main { load_address: 0x41_0002 };
        assert!(matches!(
            kind.validate(),
            Err(PackagingError::UnalignedLoadAddress(0x41_0002))
        ));
        // Word-aligned but off a page boundary only warns.
        ImageKind::Main { load_address: 0x41_0004 }.validate().unwrap();
    }

    #[test]
    fn test_info0_bounds() {
        ImageKind::Info0 { offset_words: 2040, size_words: 8, program_dest: 1 }
            .validate()
            .unwrap();
        assert!(matches!(
            ImageKind::Info0 { offset_words: 2040, size_words: 9, program_dest: 1 }.validate(),
            Err(PackagingError::Info0OutOfRange { .. })
        ));
    }

    #[test]
    fn test_info0_wrapping_counts_rejected() {
        // Word counts whose byte total wraps a u32 must still fail
        // the bounds check rather than slip through and truncate in
        // the option fields.
        let kind = ImageKind::Info0 {
            offset_words: 0x4000_0000,
            size_words: 0x4000_0000,
            program_dest: 1,
        };
        assert!(matches!(
            kind.validate(),
            Err(PackagingError::Info0OutOfRange { .. })
        ));
    }

    #[test]
    fn test_wired_opt_words() {
        let kind = ImageKind::WiredDownload {
            load_address: 0x2008_0000,
            ota: true,
            sbl_ota: false,
            br_ota: false,
        };
        let words = kind.opt_words(0);
        assert_eq!(words[0], 0xCA | (1 << 8));
        assert_eq!(words[1], 0x2008_0000);
        assert_eq!(words[2], SRAM_PROGRAM_KEY);

        let flash = ImageKind::WiredDownload {
            load_address: 0x0008_0000,
            ota: false,
            sbl_ota: false,
            br_ota: false,
        };
        assert_eq!(flash.opt_words(0)[2], FLASH_PROGRAM_KEY);
    }

    #[test]
    fn test_info0_opt_words() {
        let kind = ImageKind::Info0 { offset_words: 0x10, size_words: 0x20, program_dest: 1 };
        let words = kind.opt_words(0);
        assert_eq!(words[0], 0xCD);
        assert_eq!(words[1], 0x10 | (0x20 << 12) | (1 << 24));
        assert_eq!(words[2], INFO0_KEY);
    }

    #[test]
    fn test_chain_size_field() {
        let words = ImageKind::Main { load_address: 0 }.opt_words(0x5A0);
        assert_eq!(chain_size_from_opt(words[0]), 0x5A0);
    }
}
