//! Link frame types and codec
//!
//! On the wire a frame is `[type, length, version, flags, payload..., crc_lo, crc_hi]`.
//! The length byte counts the four header bytes and the payload, not the CRC.

use crate::config::protocol::{CRC_SIZE, HEADER_SIZE, MAX_MESSAGE_LEN, MAX_PAYLOAD_LEN};
use crate::protocol::crc;
use heapless::Vec;

/// Header byte offsets
pub mod index {
    pub const TYPE: usize = 0;
    pub const LEN: usize = 1;
    pub const VERSION: usize = 2;
    pub const FLAGS: usize = 3;
    pub const PAYLOAD: usize = 4;
}

/// Flag bits in the header flags byte
pub mod flags {
    /// The CP may power the SP down after this exchange
    pub const SHUTDOWN: u8 = 0x01;
}

/// Type byte of a label report. Shares its value with `Interrogate`.
pub const REPORT_LABEL: u8 = 0x0A;

/// Message kinds exchanged with the CP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Command = 0x01,
    ReportData = 0x02,
    ProgramCode = 0x03,
    RequestData = 0x04,
    RequestLabel = 0x05,
    Id = 0x06,
    ConfirmCommand = 0x07,
    ReportError = 0x08,
    RequestBslPassword = 0x09,
    Interrogate = 0x0A,
    SetSerialNumber = 0x0B,
    CommandSensorType = 0x0C,
    RequestSensorType = 0x0D,
}

impl MessageType {
    /// Decode a type byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Command),
            0x02 => Some(Self::ReportData),
            0x03 => Some(Self::ProgramCode),
            0x04 => Some(Self::RequestData),
            0x05 => Some(Self::RequestLabel),
            0x06 => Some(Self::Id),
            0x07 => Some(Self::ConfirmCommand),
            0x08 => Some(Self::ReportError),
            0x09 => Some(Self::RequestBslPassword),
            0x0A => Some(Self::Interrogate),
            0x0B => Some(Self::SetSerialNumber),
            0x0C => Some(Self::CommandSensorType),
            0x0D => Some(Self::RequestSensorType),
            _ => None,
        }
    }
}

/// Framing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than a header
    TooShort,
    /// Declared length below the header size or beyond a frame
    LengthOutOfRange,
    /// Declared length disagrees with the bytes supplied
    LengthMismatch,
    /// CRC did not match
    CrcMismatch,
    /// Payload does not fit a frame
    PayloadOverflow,
}

/// Bytes of a frame without its CRC
pub type MessageBuffer = Vec<u8, MAX_MESSAGE_LEN>;

/// A link frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw type byte, see [`MessageType`] and [`REPORT_LABEL`]
    pub kind: u8,
    pub version: u8,
    pub flags: u8,
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

impl Frame {
    /// Create an empty frame
    pub fn new(kind: u8, version: u8) -> Self {
        Self {
            kind,
            version,
            flags: 0,
            payload: Vec::new(),
        }
    }

    /// Set or clear the shutdown flag
    pub fn with_shutdown(mut self, allowed: bool) -> Self {
        if allowed {
            self.flags |= flags::SHUTDOWN;
        } else {
            self.flags &= !flags::SHUTDOWN;
        }
        self
    }

    /// Decoded type, if the kind byte is a known request or report
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_byte(self.kind)
    }

    /// Value of the length byte
    pub fn len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn push(&mut self, byte: u8) -> Result<(), FrameError> {
        self.payload.push(byte).map_err(|_| FrameError::PayloadOverflow)
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        self.payload
            .extend_from_slice(bytes)
            .map_err(|_| FrameError::PayloadOverflow)
    }

    /// Parse header and payload. `msg` carries no CRC.
    pub fn parse(msg: &[u8]) -> Result<Self, FrameError> {
        if msg.len() < HEADER_SIZE {
            return Err(FrameError::TooShort);
        }

        let len = msg[index::LEN] as usize;
        if len < HEADER_SIZE || len + CRC_SIZE > MAX_MESSAGE_LEN {
            return Err(FrameError::LengthOutOfRange);
        }
        if len != msg.len() {
            return Err(FrameError::LengthMismatch);
        }

        let mut frame = Self::new(msg[index::TYPE], msg[index::VERSION]);
        frame.flags = msg[index::FLAGS];
        frame.extend_from_slice(&msg[index::PAYLOAD..])?;
        Ok(frame)
    }

    /// Header and payload, without CRC
    pub fn to_bytes(&self) -> MessageBuffer {
        let mut out = MessageBuffer::new();
        // Header plus at most MAX_PAYLOAD_LEN bytes always fits
        let _ = out.extend_from_slice(&[self.kind, self.len() as u8, self.version, self.flags]);
        let _ = out.extend_from_slice(&self.payload);
        out
    }
}

/// Encode a frame for the wire, CRC included
pub fn compose(frame: &Frame) -> Vec<u8, MAX_MESSAGE_LEN> {
    let mut out = frame.to_bytes();
    // to_bytes leaves room for the CRC
    let _ = out.extend_from_slice(&[0; CRC_SIZE]);
    crc::append(&mut out);
    out
}

/// Decode a frame from the wire, verifying its CRC
pub fn extract(bytes: &[u8]) -> Result<Frame, FrameError> {
    if bytes.len() < HEADER_SIZE + CRC_SIZE {
        return Err(FrameError::TooShort);
    }

    let len = bytes[index::LEN] as usize;
    if len < HEADER_SIZE || len + CRC_SIZE > MAX_MESSAGE_LEN {
        return Err(FrameError::LengthOutOfRange);
    }
    if len + CRC_SIZE != bytes.len() {
        return Err(FrameError::LengthMismatch);
    }
    if !crc::verify(bytes) {
        return Err(FrameError::CrcMismatch);
    }

    Frame::parse(&bytes[..len])
}
