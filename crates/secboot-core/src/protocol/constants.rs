//! Wired-update protocol constants.

// ============================================================================
// Message types (word 0 low 16 bits)
// ============================================================================

pub const MSG_HELLO: u32 = 0;
pub const MSG_STATUS: u32 = 1;
pub const MSG_OTADESC: u32 = 2;
pub const MSG_UPDATE: u32 = 3;
pub const MSG_ABORT: u32 = 4;
pub const MSG_RECOVER: u32 = 5;
pub const MSG_RESET: u32 = 6;
pub const MSG_ACK: u32 = 7;
pub const MSG_DATA: u32 = 8;

// ============================================================================
// Sizing
// ============================================================================

/// Largest message the device accepts, including the leading CRC word.
pub const DEFAULT_MAX_MESSAGE: usize = 8192;
/// Wire overhead of a DATA message: CRC word + word 0 + sequence.
pub const DATA_OVERHEAD: usize = 12;
/// Largest DATA payload per message at the default message size.
pub const DEFAULT_MAX_CHUNK: usize = DEFAULT_MAX_MESSAGE - DATA_OVERHEAD;

/// STATUS response to HELLO, CRC word included.
pub const HELLO_RESPONSE_LEN: usize = 96;
/// ACK response, CRC word included.
pub const ACK_RESPONSE_LEN: usize = 20;

// ============================================================================
// Recovery types (low 16 bits of the STATUS version word)
// ============================================================================

pub const RECOVERY_AMBIQ: u32 = 1;
pub const RECOVERY_OEM: u32 = 2;

// ============================================================================
// ACK status codes
// ============================================================================

pub const STATUS_SUCCESS: u32 = 0;
pub const STATUS_CRC_FAIL: u32 = 1;
pub const STATUS_SECURITY_FAIL: u32 = 2;
pub const STATUS_SEQUENCE_FAIL: u32 = 3;
pub const STATUS_STORAGE_FAIL: u32 = 4;

/// Diagnostic name for an ACK status code.
pub fn status_name(code: u32) -> &'static str {
    match code {
        STATUS_SUCCESS => "success",
        STATUS_CRC_FAIL => "crc-failure",
        STATUS_SECURITY_FAIL => "security-failure",
        STATUS_SEQUENCE_FAIL => "sequence-failure",
        STATUS_STORAGE_FAIL => "storage-failure",
        _ => "unknown",
    }
}

// ============================================================================
// Session tuning
// ============================================================================

/// Attempts per ACK'd command, first send included.
pub const ACK_ATTEMPTS: u32 = 4;
/// Backoff after a NACK before the retry.
pub const NACK_BACKOFF_MS: u64 = 200;
/// Per-step response timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
