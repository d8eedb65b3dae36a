//! Message encoding and response parsing.
//!
//! Everything on the wire is little-endian. Each outbound message is
//! preceded by a separate 4-byte CRC-32 write computed over the
//! message bytes, and the length declared in word 0 counts that CRC
//! word. Responses arrive the same way: CRC word first, message after.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::crc::crc32;

use super::constants::*;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("{what} response of {got} bytes, expected {want}")]
    ShortResponse { what: &'static str, got: usize, want: usize },

    #[error("expected {expected} response, got message type {got}")]
    UnexpectedType { expected: &'static str, got: u32 },

    #[error("response CRC mismatch: carried {stored:#010X}, computed {computed:#010X}")]
    ResponseCrc { stored: u32, computed: u32 },

    #[error("device reports unsupported recovery type {0}")]
    UnknownRecovery(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Host-to-device commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMessage {
    Hello,
    /// Announce the next segment: its size and CRC. `piggyback` data
    /// is never sent by this host, so the field stays zero.
    Update { size: u32, crc: u32 },
    /// One chunk of the current segment. `seq` is the chunk's byte
    /// offset within the segment.
    Data { seq: u32, payload: Vec<u8> },
    Abort,
}

impl HostMessage {
    pub fn msg_type(&self) -> u32 {
        match self {
            HostMessage::Hello => MSG_HELLO,
            HostMessage::Update { .. } => MSG_UPDATE,
            HostMessage::Data { .. } => MSG_DATA,
            HostMessage::Abort => MSG_ABORT,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HostMessage::Hello => "HELLO",
            HostMessage::Update { .. } => "UPDATE",
            HostMessage::Data { .. } => "DATA",
            HostMessage::Abort => "ABORT",
        }
    }

    /// Message bytes, CRC word not included. The declared length in
    /// word 0 does include it.
    pub fn to_bytes(&self) -> Vec<u8> {
        let wire_len = |body: usize| ((body + 4) as u32) << 16;
        match self {
            HostMessage::Hello => {
                let mut buf = Vec::with_capacity(4);
                buf.write_u32::<LittleEndian>(wire_len(4) | MSG_HELLO).unwrap();
                buf
            }
            HostMessage::Update { size, crc } => {
                let mut buf = Vec::with_capacity(16);
                buf.write_u32::<LittleEndian>(wire_len(16) | MSG_UPDATE).unwrap();
                buf.write_u32::<LittleEndian>(*size).unwrap();
                buf.write_u32::<LittleEndian>(*crc).unwrap();
                buf.write_u32::<LittleEndian>(0).unwrap(); // piggyback
                buf
            }
            HostMessage::Data { seq, payload } => {
                let mut buf = Vec::with_capacity(8 + payload.len());
                buf.write_u32::<LittleEndian>(wire_len(8 + payload.len()) | MSG_DATA).unwrap();
                buf.write_u32::<LittleEndian>(*seq).unwrap();
                buf.extend_from_slice(payload);
                buf
            }
            HostMessage::Abort => {
                let mut buf = Vec::with_capacity(8);
                buf.write_u32::<LittleEndian>(wire_len(8) | MSG_ABORT).unwrap();
                buf.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
                buf
            }
        }
    }

    /// The CRC word written to the wire before the message.
    pub fn crc_word(msg: &[u8]) -> [u8; 4] {
        crc32(msg).to_le_bytes()
    }
}

/// Prefix a response body with its CRC word, as the device does.
/// Shared by protocol tests and device doubles.
pub fn frame_response(msg: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + msg.len());
    out.extend_from_slice(&crc32(msg).to_le_bytes());
    out.extend_from_slice(msg);
    out
}

/// Which recovery image the device expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryKind {
    Ambiq,
    Oem,
}

impl RecoveryKind {
    pub fn from_raw(raw: u32) -> Result<Self, WireError> {
        match raw {
            RECOVERY_AMBIQ => Ok(RecoveryKind::Ambiq),
            RECOVERY_OEM => Ok(RecoveryKind::Oem),
            other => Err(WireError::UnknownRecovery(other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecoveryKind::Ambiq => "ambiq",
            RecoveryKind::Oem => "oem",
        }
    }
}

/// Parsed STATUS response to HELLO.
#[derive(Debug, Clone)]
pub struct HelloResponse {
    pub recovery: RecoveryKind,
    pub max_storage: u32,
    pub status: u32,
    pub device_state: u32,
    pub chip_id: [u32; 2],
    /// Device-side address of the installed certificate chain, or 0.
    pub cert_pointer: u32,
    pub soc_id: [u8; 32],
}

impl HelloResponse {
    /// Parse the 96-byte STATUS response, CRC word included. Short or
    /// mistyped responses are fatal to the handshake.
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < HELLO_RESPONSE_LEN {
            return Err(WireError::ShortResponse {
                what: "STATUS",
                got: data.len(),
                want: HELLO_RESPONSE_LEN,
            });
        }
        check_crc(data)?;

        let mut cursor = Cursor::new(&data[4..]);
        let word0 = cursor.read_u32::<LittleEndian>()?;
        if word0 & 0xFFFF != MSG_STATUS {
            return Err(WireError::UnexpectedType { expected: "STATUS", got: word0 & 0xFFFF });
        }
        let version = cursor.read_u32::<LittleEndian>()?;
        let max_storage = cursor.read_u32::<LittleEndian>()?;
        let status = cursor.read_u32::<LittleEndian>()?;
        let device_state = cursor.read_u32::<LittleEndian>()?;
        let chip_id = [cursor.read_u32::<LittleEndian>()?, cursor.read_u32::<LittleEndian>()?];
        let cert_pointer = cursor.read_u32::<LittleEndian>()?;
        let mut soc_id = [0u8; 32];
        soc_id.copy_from_slice(&data[40..72]);

        Ok(Self {
            recovery: RecoveryKind::from_raw(version & 0xFFFF)?,
            max_storage,
            status,
            device_state,
            chip_id,
            cert_pointer,
            soc_id,
        })
    }
}

/// Parsed ACK/NACK response.
#[derive(Debug, Clone, Copy)]
pub struct AckResponse {
    pub echoed_type: u32,
    pub status: u32,
    pub echoed_seq: u32,
}

impl AckResponse {
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < ACK_RESPONSE_LEN {
            return Err(WireError::ShortResponse {
                what: "ACK",
                got: data.len(),
                want: ACK_RESPONSE_LEN,
            });
        }
        check_crc(data)?;

        let mut cursor = Cursor::new(&data[4..]);
        let word0 = cursor.read_u32::<LittleEndian>()?;
        if word0 & 0xFFFF != MSG_ACK {
            return Err(WireError::UnexpectedType { expected: "ACK", got: word0 & 0xFFFF });
        }
        Ok(Self {
            echoed_type: cursor.read_u32::<LittleEndian>()?,
            status: cursor.read_u32::<LittleEndian>()?,
            echoed_seq: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    /// Build the 20-byte wire form. The production host never sends
    /// ACKs; device doubles in tests do.
    pub fn encode(echoed_type: u32, status: u32, echoed_seq: u32) -> Vec<u8> {
        let mut msg = Vec::with_capacity(16);
        msg.write_u32::<LittleEndian>(((ACK_RESPONSE_LEN as u32) << 16) | MSG_ACK).unwrap();
        msg.write_u32::<LittleEndian>(echoed_type).unwrap();
        msg.write_u32::<LittleEndian>(status).unwrap();
        msg.write_u32::<LittleEndian>(echoed_seq).unwrap();
        frame_response(&msg)
    }
}

fn check_crc(data: &[u8]) -> Result<(), WireError> {
    let stored = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let computed = crc32(&data[4..]);
    if stored != computed {
        return Err(WireError::ResponseCrc { stored, computed });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_encoding() {
        let bytes = HostMessage::Hello.to_bytes();
        assert_eq!(bytes.len(), 4);
        // Declared length 8 counts the CRC word.
        assert_eq!(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 8 << 16);
    }

    #[test]
    fn test_update_encoding() {
        let msg = HostMessage::Update { size: 0x1000, crc: 0xAABBCCDD };
        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            (20 << 16) | MSG_UPDATE
        );
        assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 0x1000);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_data_encoding() {
        let msg = HostMessage::Data { seq: 0x40, payload: vec![0xAB; 100] };
        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), 108);
        assert_eq!(
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            (112 << 16) | MSG_DATA
        );
        assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 0x40);
    }

    #[test]
    fn test_abort_encoding() {
        let bytes = HostMessage::Abort.to_bytes();
        assert_eq!(
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            (12 << 16) | MSG_ABORT
        );
        assert_eq!(&bytes[4..8], &[0xFF; 4]);
    }

    #[test]
    fn test_ack_round_trip() {
        let frame = AckResponse::encode(MSG_DATA, STATUS_SUCCESS, 0x1FF4);
        assert_eq!(frame.len(), ACK_RESPONSE_LEN);
        let ack = AckResponse::parse(&frame).unwrap();
        assert!(ack.is_success());
        assert_eq!(ack.echoed_type, MSG_DATA);
        assert_eq!(ack.echoed_seq, 0x1FF4);
    }

    #[test]
    fn test_ack_rejects_corrupt_crc() {
        let mut frame = AckResponse::encode(MSG_UPDATE, STATUS_SUCCESS, 0);
        frame[0] ^= 0xFF;
        assert!(matches!(
            AckResponse::parse(&frame),
            Err(WireError::ResponseCrc { .. })
        ));
    }

    fn hello_status(recovery: u32, max_storage: u32) -> Vec<u8> {
        let mut msg = Vec::new();
        msg.write_u32::<LittleEndian>(((HELLO_RESPONSE_LEN as u32) << 16) | MSG_STATUS).unwrap();
        msg.write_u32::<LittleEndian>(recovery).unwrap();
        msg.write_u32::<LittleEndian>(max_storage).unwrap();
        msg.write_u32::<LittleEndian>(STATUS_SUCCESS).unwrap();
        msg.resize(HELLO_RESPONSE_LEN - 4, 0);
        frame_response(&msg)
    }

    #[test]
    fn test_hello_response_parse() {
        let frame = hello_status(RECOVERY_OEM, 0x6_0000);
        let resp = HelloResponse::parse(&frame).unwrap();
        assert_eq!(resp.recovery, RecoveryKind::Oem);
        assert_eq!(resp.max_storage, 0x6_0000);
    }

    #[test]
    fn test_hello_response_unknown_recovery() {
        let frame = hello_status(9, 0x6_0000);
        assert!(matches!(
            HelloResponse::parse(&frame),
            Err(WireError::UnknownRecovery(9))
        ));
    }

    #[test]
    fn test_hello_response_short_read() {
        let frame = hello_status(RECOVERY_AMBIQ, 0);
        assert!(matches!(
            HelloResponse::parse(&frame[..40]),
            Err(WireError::ShortResponse { .. })
        ));
    }
}
