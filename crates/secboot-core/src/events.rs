//! Event system for UI decoupling.
//!
//! Lets a CLI or GUI subscribe to wired-session progress without
//! tight coupling to the protocol engine.

use crate::protocol::{RecoveryKind, status_name};

/// Events emitted while a wired session runs.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Handshake answered; the device told us what it wants.
    HandshakeComplete { recovery: RecoveryKind, max_storage: u32 },
    /// Starting a new segment of the transfer.
    SegmentStarted {
        index: usize,
        total: usize,
        offset: u32,
        size: u32,
    },
    /// A chunk was acknowledged.
    ChunkAcked { segment: usize, seq: u32, sent: u32, size: u32 },
    /// A command is being retried.
    Retry {
        command: &'static str,
        attempt: u32,
        status: Option<u32>,
    },
    /// ABORT sent to the device.
    AbortSent { reason: String },
    /// Session ended in failure.
    Aborted { reason: String },
    /// All segments delivered.
    Complete,
}

/// Observer trait for receiving session events.
///
/// Implement this in the UI layer to receive updates.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_event(&self, _event: &SessionEvent) {
        // Do nothing
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::HandshakeComplete { recovery, max_storage } => {
                tracing::info!(recovery = recovery.name(), max_storage, "Handshake complete");
            }
            SessionEvent::SegmentStarted { index, total, offset, size } => {
                tracing::info!(segment = index + 1, total, offset, size, "Sending segment");
            }
            SessionEvent::ChunkAcked { segment, seq, sent, size } => {
                let pct = if *size > 0 { (*sent * 100) / *size } else { 0 };
                tracing::debug!(segment, seq, progress = %format!("{}%", pct), "Chunk acked");
            }
            SessionEvent::Retry { command, attempt, status } => match status {
                Some(code) => tracing::warn!(
                    command,
                    attempt,
                    status = status_name(*code),
                    "NACK, retrying"
                ),
                None => tracing::warn!(command, attempt, "No response, retrying"),
            },
            SessionEvent::AbortSent { reason } => {
                tracing::info!(reason = %reason, "Abort sent");
            }
            SessionEvent::Aborted { reason } => {
                tracing::error!(reason = %reason, "Session aborted");
            }
            SessionEvent::Complete => {
                tracing::info!("Transfer complete");
            }
        }
    }
}
