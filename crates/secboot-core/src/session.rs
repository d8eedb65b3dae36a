//! Wired-update session: drives a transfer file to the device over a
//! serial channel, one HELLO handshake then ACK'd UPDATE/DATA
//! commands per segment.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::crc::crc32;
use crate::events::{SessionEvent, SessionObserver};
use crate::image::{HEADER_LEN, OPT_LEN, PackagingError, Segment, scan_segments};
use crate::protocol::{
    ACK_ATTEMPTS, ACK_RESPONSE_LEN, AckResponse, DATA_OVERHEAD, DEFAULT_MAX_MESSAGE,
    DEFAULT_TIMEOUT_SECS, HELLO_RESPONSE_LEN, HelloResponse, HostMessage, MSG_DATA,
    NACK_BACKOFF_MS, RecoveryKind, WireError, status_name,
};
use crate::transport::{SerialChannel, TransportError};

/// Configuration for a wired session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Serial port path.
    pub port: Option<String>,
    /// Baud rate.
    pub baud: u32,
    /// Per-step response timeout in seconds.
    pub timeout_secs: u64,
    /// Largest wire message the device accepts.
    pub max_message: usize,
    /// Transfer file offered when the device wants an Ambiq image.
    pub ambiq_image_path: Option<String>,
    /// Transfer file offered when the device wants an OEM image.
    pub oem_image_path: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115_200,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_message: DEFAULT_MAX_MESSAGE,
            ambiq_image_path: None,
            oem_image_path: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Transfer files the caller can offer, by recovery type.
#[derive(Debug, Default, Clone)]
pub struct RecoveryImages {
    pub ambiq: Option<Vec<u8>>,
    pub oem: Option<Vec<u8>>,
}

impl RecoveryImages {
    fn for_kind(&self, kind: RecoveryKind) -> Option<&[u8]> {
        match kind {
            RecoveryKind::Ambiq => self.ambiq.as_deref(),
            RecoveryKind::Oem => self.oem.as_deref(),
        }
    }
}

/// Where the state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitHandshakeAck,
    AwaitReadyLevel,
    SendingSegment { idx: usize },
    AwaitChunkAck { seq: u32 },
    Done,
    Aborted,
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    /// The device asked for an image the caller does not have; ABORT
    /// was sent and the session ended cleanly.
    NoMatchingImage(RecoveryKind),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Packaging(#[from] PackagingError),

    #[error("{command} gave up after {attempts} attempts")]
    AttemptsExhausted { command: &'static str, attempts: u32 },

    #[error("device desynchronized: sent chunk {sent}, NACK echoes {echoed}")]
    Desync { sent: u32, echoed: u32 },

    #[error("segment of {size} bytes exceeds device storage of {max_storage} bytes")]
    SegmentTooLarge { size: u32, max_storage: u32 },
}

enum AckdOutcome {
    Acked(AckResponse),
    Retry { status: Option<u32> },
}

/// One wired-update run over an exclusively owned channel. Sequence
/// numbers, retry counts and the negotiated sizes live here and die
/// with the session; a fresh session always restarts at segment 0.
pub struct WiredSession<'a> {
    channel: &'a mut dyn SerialChannel,
    observer: &'a dyn SessionObserver,
    timeout: Duration,
    max_chunk: usize,
    state: SessionState,
    max_storage: u32,
    last_acked_seq: u32,
    retries: u32,
}

impl<'a> WiredSession<'a> {
    pub fn new(
        channel: &'a mut dyn SerialChannel,
        observer: &'a dyn SessionObserver,
        timeout: Duration,
        max_message: usize,
    ) -> Self {
        Self {
            channel,
            observer,
            timeout,
            max_chunk: max_message.saturating_sub(DATA_OVERHEAD).max(4),
            state: SessionState::Idle,
            max_storage: 0,
            last_acked_seq: 0,
            retries: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Total retries spent across all commands this run.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Sequence number of the last acknowledged chunk.
    pub fn last_acked_seq(&self) -> u32 {
        self.last_acked_seq
    }

    /// Run the session to completion.
    #[instrument(skip_all)]
    pub fn run(&mut self, images: &RecoveryImages) -> Result<SessionOutcome, SessionError> {
        let result = self.run_inner(images);
        if let Err(e) = &result {
            self.state = SessionState::Aborted;
            self.observer.on_event(&SessionEvent::Aborted { reason: e.to_string() });
        }
        result
    }

    fn run_inner(&mut self, images: &RecoveryImages) -> Result<SessionOutcome, SessionError> {
        let hello = self.handshake()?;
        self.max_storage = hello.max_storage;
        self.observer.on_event(&SessionEvent::HandshakeComplete {
            recovery: hello.recovery,
            max_storage: hello.max_storage,
        });

        self.state = SessionState::AwaitReadyLevel;
        let Some(image) = images.for_kind(hello.recovery) else {
            let reason = format!("no {} image available", hello.recovery.name());
            warn!(recovery = hello.recovery.name(), "no matching image, aborting cleanly");
            self.send_message(&HostMessage::Abort)?;
            self.observer.on_event(&SessionEvent::AbortSent { reason });
            self.state = SessionState::Aborted;
            return Ok(SessionOutcome::NoMatchingImage(hello.recovery));
        };

        // Highest addresses first, so earlier segments can assume the
        // later ones are already in place.
        let mut segments = scan_segments(image)?;
        segments.reverse();

        // The device strips the wired header before storing, so the
        // blob may exceed storage by exactly that much.
        let headroom = (HEADER_LEN + OPT_LEN) as u32;
        if let Some(seg) = segments.iter().find(|s| s.size > self.max_storage.saturating_add(headroom)) {
            return Err(SessionError::SegmentTooLarge {
                size: seg.size,
                max_storage: self.max_storage,
            });
        }

        let total = segments.len();
        for (idx, seg) in segments.iter().enumerate() {
            self.observer.on_event(&SessionEvent::SegmentStarted {
                index: idx,
                total,
                offset: seg.offset,
                size: seg.size,
            });
            self.state = SessionState::SendingSegment { idx };
            self.send_segment(idx, *seg, image)?;
        }

        self.state = SessionState::Done;
        info!(segments = total, "transfer complete");
        self.observer.on_event(&SessionEvent::Complete);
        Ok(SessionOutcome::Completed)
    }

    /// HELLO and its STATUS response. Any failure here is fatal and
    /// never retried.
    fn handshake(&mut self) -> Result<HelloResponse, SessionError> {
        self.state = SessionState::AwaitHandshakeAck;
        self.send_message(&HostMessage::Hello)?;
        let frame = self.channel.read(HELLO_RESPONSE_LEN, self.timeout)?;
        Ok(HelloResponse::parse(&frame)?)
    }

    fn send_segment(&mut self, idx: usize, seg: Segment, image: &[u8]) -> Result<(), SessionError> {
        let bytes = &image[seg.offset as usize..(seg.offset + seg.size) as usize];
        self.send_ackd(&HostMessage::Update { size: seg.size, crc: crc32(bytes) })?;

        let mut sent = 0usize;
        while sent < bytes.len() {
            let len = self.max_chunk.min(bytes.len() - sent);
            let seq = sent as u32;
            self.state = SessionState::AwaitChunkAck { seq };
            self.send_ackd(&HostMessage::Data {
                seq,
                payload: bytes[sent..sent + len].to_vec(),
            })?;
            self.last_acked_seq = seq;
            sent += len;
            self.observer.on_event(&SessionEvent::ChunkAcked {
                segment: idx,
                seq,
                sent: sent as u32,
                size: seg.size,
            });
        }
        Ok(())
    }

    /// Send one command and insist on a successful ACK, retrying up
    /// to the attempt budget on timeouts, garbled responses and
    /// ordinary NACKs.
    fn send_ackd(&mut self, msg: &HostMessage) -> Result<AckResponse, SessionError> {
        let command = msg.type_name();
        for attempt in 1..=ACK_ATTEMPTS {
            if attempt > 1 {
                self.retries += 1;
            }
            self.send_message(msg)?;
            match self.read_ack(msg)? {
                AckdOutcome::Acked(ack) => return Ok(ack),
                AckdOutcome::Retry { status } => {
                    self.observer.on_event(&SessionEvent::Retry { command, attempt, status });
                    if status.is_some() {
                        thread::sleep(Duration::from_millis(NACK_BACKOFF_MS));
                    }
                }
            }
        }
        Err(SessionError::AttemptsExhausted { command, attempts: ACK_ATTEMPTS })
    }

    /// One read-and-classify step of an ACK'd send. Retryable
    /// conditions come back as `Retry`; everything else is an error.
    fn read_ack(&mut self, msg: &HostMessage) -> Result<AckdOutcome, SessionError> {
        let frame = match self.channel.read(ACK_RESPONSE_LEN, self.timeout) {
            Ok(frame) => frame,
            Err(TransportError::Timeout { .. }) => {
                return Ok(AckdOutcome::Retry { status: None });
            }
            Err(e) => return Err(e.into()),
        };
        let ack = match AckResponse::parse(&frame) {
            Ok(ack) => ack,
            // A truncated or corrupted response is indistinguishable
            // from line noise; spend a retry on it.
            Err(WireError::ShortResponse { .. }) | Err(WireError::ResponseCrc { .. }) => {
                return Ok(AckdOutcome::Retry { status: None });
            }
            Err(e) => return Err(e.into()),
        };

        if ack.is_success() {
            return Ok(AckdOutcome::Acked(ack));
        }

        // A NACK for a chunk we did not just send means the device's
        // idea of the stream no longer matches ours.
        if let HostMessage::Data { seq, .. } = msg
            && ack.echoed_seq != *seq
        {
            return Err(SessionError::Desync { sent: *seq, echoed: ack.echoed_seq });
        }
        debug!(status = status_name(ack.status), "command NACKed");
        Ok(AckdOutcome::Retry { status: Some(ack.status) })
    }

    /// CRC word first, then the message.
    fn send_message(&mut self, msg: &HostMessage) -> Result<(), SessionError> {
        let bytes = msg.to_bytes();
        self.channel.write_all(&HostMessage::crc_word(&bytes))?;
        self.channel.write_all(&bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_keys::FixedRandom;
    use crate::events::NullObserver;
    use crate::image::{ImagePackager, WiredOptions, split_for_wired};
    use crate::keys::StaticKeys;
    use crate::protocol::{MSG_ABORT, MSG_HELLO, MSG_STATUS, MSG_UPDATE, STATUS_CRC_FAIL, frame_response};
    use crate::transport::MockChannel;
    use byteorder::{LittleEndian, WriteBytesExt};

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn hello_frame(recovery: u32, max_storage: u32) -> Vec<u8> {
        let mut msg = Vec::new();
        msg.write_u32::<LittleEndian>(((HELLO_RESPONSE_LEN as u32) << 16) | MSG_STATUS).unwrap();
        msg.write_u32::<LittleEndian>(recovery).unwrap();
        msg.write_u32::<LittleEndian>(max_storage).unwrap();
        msg.write_u32::<LittleEndian>(0).unwrap();
        msg.resize(HELLO_RESPONSE_LEN - 4, 0);
        frame_response(&msg)
    }

    fn ack(echoed_type: u32) -> Vec<u8> {
        AckResponse::encode(echoed_type, 0, 0)
    }

    fn nack(echoed_type: u32, status: u32, echoed_seq: u32) -> Vec<u8> {
        AckResponse::encode(echoed_type, status, echoed_seq)
    }

    /// Two-segment transfer file (pieces of 100 and 28 content bytes).
    fn transfer_file() -> Vec<u8> {
        let keys = StaticKeys;
        let packager = ImagePackager::new(&keys);
        let mut rng = FixedRandom(0);
        let opts = WiredOptions { max_piece: 100, ..WiredOptions::new(0x8_0000) };
        split_for_wired(&packager, &vec![0x77u8; 128], &opts, &mut rng).unwrap()
    }

    fn msg_type_of(write: &[u8]) -> u32 {
        u32::from_le_bytes([write[0], write[1], write[2], write[3]]) & 0xFFFF
    }

    /// Writes come in (CRC word, message) pairs; return the messages.
    fn messages(writes: &[Vec<u8>]) -> Vec<&Vec<u8>> {
        assert_eq!(writes.len() % 2, 0);
        let mut out = Vec::new();
        for pair in writes.chunks(2) {
            assert_eq!(pair[0].len(), 4);
            assert_eq!(pair[0], &crc32(&pair[1]).to_le_bytes());
            out.push(&pair[1]);
        }
        out
    }

    #[test]
    fn test_happy_path() {
        let file = transfer_file();
        let mut mock = MockChannel::new();
        mock.queue_response(hello_frame(1, 0x10_0000));
        // Chunk size 52 below. The 64-byte segment goes first (2
        // chunks), then the 136-byte one (3 chunks).
        mock.queue_response(ack(MSG_UPDATE));
        mock.queue_response(ack(MSG_DATA));
        mock.queue_response(ack(MSG_DATA));
        mock.queue_response(ack(MSG_UPDATE));
        mock.queue_response(ack(MSG_DATA));
        mock.queue_response(ack(MSG_DATA));
        mock.queue_response(ack(MSG_DATA));

        let images = RecoveryImages { ambiq: Some(file.clone()), oem: None };
        let mut session = WiredSession::new(&mut mock, &NullObserver, TIMEOUT, 52 + DATA_OVERHEAD);
        let outcome = session.run(&images).unwrap();
        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(session.state(), SessionState::Done);
        assert_eq!(session.last_acked_seq(), 104);

        let msgs = messages(mock.writes());
        let types: Vec<u32> = msgs.iter().map(|m| msg_type_of(m)).collect();
        assert_eq!(types[0], MSG_HELLO);
        assert_eq!(types[1], MSG_UPDATE);

        // Reverse order: the first UPDATE announces the segment that
        // sits later in the file.
        let segments = scan_segments(&file).unwrap();
        let first_update = &msgs[1];
        let announced = u32::from_le_bytes([
            first_update[4],
            first_update[5],
            first_update[6],
            first_update[7],
        ]);
        assert_eq!(announced, segments.last().unwrap().size);

        // Chunk sequence numbers are offsets that restart per segment.
        let data_seqs: Vec<u32> = msgs
            .iter()
            .filter(|m| msg_type_of(m) == MSG_DATA)
            .map(|m| u32::from_le_bytes([m[4], m[5], m[6], m[7]]))
            .collect();
        assert_eq!(data_seqs, vec![0, 52, 0, 52, 104]);
    }

    #[test]
    fn test_nack_twice_then_ack() {
        let file = transfer_file();
        let mut mock = MockChannel::new();
        mock.queue_response(hello_frame(1, 0x10_0000));
        mock.queue_response(nack(MSG_UPDATE, STATUS_CRC_FAIL, 0));
        mock.queue_response(nack(MSG_UPDATE, STATUS_CRC_FAIL, 0));
        mock.queue_response(ack(MSG_UPDATE));
        mock.queue_response(ack(MSG_DATA));
        mock.queue_response(ack(MSG_UPDATE));
        mock.queue_response(ack(MSG_DATA));

        let images = RecoveryImages { ambiq: Some(file), oem: None };
        let mut session = WiredSession::new(&mut mock, &NullObserver, TIMEOUT, DEFAULT_MAX_MESSAGE);
        session.run(&images).unwrap();
        assert_eq!(session.retries(), 2);

        // The first UPDATE went out exactly 3 times.
        let update_count = messages(mock.writes())
            .iter()
            .filter(|m| msg_type_of(m) == MSG_UPDATE)
            .count();
        assert_eq!(update_count, 3 + 1);
    }

    #[test]
    fn test_silent_device_aborts_after_four_attempts() {
        let file = transfer_file();
        let mut mock = MockChannel::new();
        mock.queue_response(hello_frame(1, 0x10_0000));
        // Nothing else: the device goes silent after the handshake.

        let images = RecoveryImages { ambiq: Some(file), oem: None };
        let mut session = WiredSession::new(&mut mock, &NullObserver, TIMEOUT, DEFAULT_MAX_MESSAGE);
        let err = session.run(&images).unwrap_err();
        assert!(matches!(
            err,
            SessionError::AttemptsExhausted { command: "UPDATE", attempts: 4 }
        ));
        assert_eq!(session.state(), SessionState::Aborted);

        // HELLO plus exactly 4 UPDATE attempts, nothing after.
        let msgs = messages(mock.writes());
        assert_eq!(msgs.len(), 5);
        assert!(msgs[1..].iter().all(|m| msg_type_of(m) == MSG_UPDATE));
    }

    #[test]
    fn test_data_desync_aborts_immediately() {
        let file = transfer_file();
        let mut mock = MockChannel::new();
        mock.queue_response(hello_frame(1, 0x10_0000));
        mock.queue_response(ack(MSG_UPDATE));
        // NACK echoing a sequence we never sent.
        mock.queue_response(nack(MSG_DATA, STATUS_CRC_FAIL, 0x9999));

        let images = RecoveryImages { ambiq: Some(file), oem: None };
        let mut session = WiredSession::new(&mut mock, &NullObserver, TIMEOUT, DEFAULT_MAX_MESSAGE);
        let err = session.run(&images).unwrap_err();
        assert!(matches!(err, SessionError::Desync { sent: 0, echoed: 0x9999 }));

        // Exactly one DATA attempt, no retry.
        let data_count = messages(mock.writes())
            .iter()
            .filter(|m| msg_type_of(m) == MSG_DATA)
            .count();
        assert_eq!(data_count, 1);
    }

    #[test]
    fn test_missing_image_aborts_cleanly() {
        let mut mock = MockChannel::new();
        mock.queue_response(hello_frame(2, 0x10_0000)); // wants OEM

        let images = RecoveryImages { ambiq: Some(transfer_file()), oem: None };
        let mut session = WiredSession::new(&mut mock, &NullObserver, TIMEOUT, DEFAULT_MAX_MESSAGE);
        let outcome = session.run(&images).unwrap();
        assert_eq!(outcome, SessionOutcome::NoMatchingImage(RecoveryKind::Oem));

        let msgs = messages(mock.writes());
        assert_eq!(msgs.len(), 2);
        assert_eq!(msg_type_of(msgs[1]), MSG_ABORT);
    }

    #[test]
    fn test_handshake_failure_is_fatal() {
        let mut mock = MockChannel::new();
        // Silent device: no response to HELLO at all.
        let images = RecoveryImages { ambiq: Some(transfer_file()), oem: None };
        let mut session = WiredSession::new(&mut mock, &NullObserver, TIMEOUT, DEFAULT_MAX_MESSAGE);
        let err = session.run(&images).unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Timeout { .. })));
        // One HELLO, no retries.
        assert_eq!(messages(mock.writes()).len(), 1);
    }

    #[test]
    fn test_oversized_segment_rejected_before_update() {
        let file = transfer_file();
        let mut mock = MockChannel::new();
        mock.queue_response(hello_frame(1, 16)); // tiny storage

        let images = RecoveryImages { ambiq: Some(file), oem: None };
        let mut session = WiredSession::new(&mut mock, &NullObserver, TIMEOUT, DEFAULT_MAX_MESSAGE);
        let err = session.run(&images).unwrap_err();
        assert!(matches!(err, SessionError::SegmentTooLarge { .. }));
        assert_eq!(messages(mock.writes()).len(), 1); // HELLO only
    }
}
