//! In-memory channel double for exercising the session state machine.

use std::collections::VecDeque;
use std::time::Duration;

use super::traits::{SerialChannel, TransportError};

/// Scripted device double: every read pops the next queued response;
/// an empty queue behaves like a silent device. All writes are
/// captured for inspection.
#[derive(Debug, Default)]
pub struct MockChannel {
    responses: VecDeque<Vec<u8>>,
    write_log: Vec<Vec<u8>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response frame to be returned by the next read.
    pub fn queue_response(&mut self, frame: Vec<u8>) {
        self.responses.push_back(frame);
    }

    /// All captured writes, in order. CRC words and messages appear
    /// as separate entries, matching the wire convention.
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.write_log
    }

    pub fn clear_writes(&mut self) {
        self.write_log.clear();
    }
}

impl SerialChannel for MockChannel {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.write_log.push(data.to_vec());
        Ok(())
    }

    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        match self.responses.pop_front() {
            Some(mut frame) => {
                frame.truncate(max_len);
                Ok(frame)
            }
            None => Err(TransportError::Timeout { timeout_ms: timeout.as_millis() as u64 }),
        }
    }
}
