//! Wired-update wire protocol definitions.

pub mod constants;
pub mod message;

pub use constants::*;
pub use message::{AckResponse, HelloResponse, HostMessage, RecoveryKind, WireError, frame_response};
