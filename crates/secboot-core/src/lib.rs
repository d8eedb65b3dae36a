//! secboot-core: secure-boot image packaging and wired delivery.
//!
//! Host-side tooling for a microcontroller secure-boot flow: package
//! firmware and configuration payloads into signed, optionally
//! encrypted blobs; build Root→Key→Content certificate chains; drive
//! a packaged transfer file to a device over UART with a
//! handshake/acknowledge protocol.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Bitfield / Crc / Crypto**: low-level codecs and primitives
//! - **Keys**: key-index validation and the file-backed key bank
//! - **Image**: header encoding, packaging policy, wired splitting
//! - **Cert**: certificate chain construction and verification
//! - **Protocol**: wire message encoding and response parsing
//! - **Transport**: serial channel abstraction (serialport, mock)
//! - **Events**: observer pattern for UI decoupling
//! - **Session**: the wired-update state machine
//!
//! # Example
//!
//! ```no_run
//! use secboot_core::image::{ImageKind, ImagePackager, PackagingPolicy};
//! use secboot_core::crypto::OsRandom;
//! use secboot_core::keys::KeyBank;
//!
//! let keys = KeyBank::load_from_file("keys.toml").expect("key bank");
//! let packager = ImagePackager::new(&keys);
//! let payload = std::fs::read("firmware.bin").expect("payload");
//!
//! let kind = ImageKind::NonSecure { load_address: 0x41_0000 };
//! let blob = packager
//!     .build(&kind, &payload, &PackagingPolicy::crc_only(), &mut OsRandom)
//!     .expect("packaging failed");
//! std::fs::write("firmware.img", blob).expect("write");
//! ```

pub mod bitfield;
pub mod cert;
pub mod crc;
pub mod crypto;
pub mod events;
pub mod image;
pub mod keys;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use cert::{CertError, CertSigner, Certificate, CertificateChain, LocalRsaSigner};
pub use crc::{CrcEngine, crc32};
pub use crypto::{OsRandom, RandomSource};
pub use events::{NullObserver, SessionEvent, SessionObserver, TracingObserver};
pub use image::{
    ImageKind, ImagePackager, PackagingError, PackagingPolicy, ParsedImage, Segment,
};
pub use keys::{KeyBank, KeyKind, KeyLookup, StaticKeys};
pub use protocol::{HostMessage, RecoveryKind};
pub use session::{
    RecoveryImages, SessionConfig, SessionError, SessionOutcome, SessionState, WiredSession,
};
pub use transport::{MockChannel, SerialChannel, SerialTransport, TransportError};
