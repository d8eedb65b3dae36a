//! Serial transport abstraction.
//!
//! The protocol session only ever needs two blocking primitives:
//! write everything, and read up to N bytes within a timeout. Keeping
//! the boundary this narrow makes the whole state machine testable
//! against an in-memory double.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open port: {0}")]
    OpenFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract byte-stream channel to the device.
///
/// Exclusively owned by the active session for its duration.
pub trait SerialChannel {
    /// Write all of `data`.
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read up to `max_len` bytes, blocking at most `timeout`.
    /// Returns whatever arrived; an empty window is a timeout error.
    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}
