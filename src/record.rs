//! Record framing: one `(size, type)` header plus its payload.
//!
//! ```text
//! ┌──────────────┬──────────┬───────────────────────┐
//! │ size: u16 LE │ type: u8 │ payload: [u8; size]   │
//! └──────────────┴──────────┴───────────────────────┘
//! ```
//!
//! Every other component consumes records through [`read_record`] and
//! [`Record::parse`]; the writer produces them with [`write_record`].

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Read, Write};
use std::str::Utf8Error;
use thiserror::Error;

use crate::format::TypeDefinition;
use crate::header::FlagBits;
use crate::metadata::{InfoRecord, LogMessage, TaggedLogMessage};
use crate::subscription::AddLoggedMessage;
use crate::text::TextDecoding;

pub const RECORD_HEADER_SIZE: usize = 3;
/// Declared payload sizes above this are treated as corruption.
pub const MAX_PLAUSIBLE_SIZE: u16 = 10_000;

// ── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    Format           = b'F',
    Data             = b'D',
    Info             = b'I',
    InfoMultiple     = b'M',
    Parameter        = b'P',
    ParameterDefault = b'Q',
    AddLogged        = b'A',
    RemoveLogged     = b'R',
    Sync             = b'S',
    Dropout          = b'O',
    Logging          = b'L',
    LoggingTagged    = b'C',
    FlagBits         = b'B',
}

impl MsgType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            b'F' => Some(MsgType::Format),
            b'D' => Some(MsgType::Data),
            b'I' => Some(MsgType::Info),
            b'M' => Some(MsgType::InfoMultiple),
            b'P' => Some(MsgType::Parameter),
            b'Q' => Some(MsgType::ParameterDefault),
            b'A' => Some(MsgType::AddLogged),
            b'R' => Some(MsgType::RemoveLogged),
            b'S' => Some(MsgType::Sync),
            b'O' => Some(MsgType::Dropout),
            b'L' => Some(MsgType::Logging),
            b'C' => Some(MsgType::LoggingTagged),
            b'B' => Some(MsgType::FlagBits),
            _    => None,
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum FrameError {
    /// No bytes at all were available: a clean end of stream.
    #[error("End of stream")]
    Eof,
    #[error("Truncated record: wanted {expected} bytes, {available} available")]
    Truncated { expected: usize, available: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Payload too short: need {need} bytes, have {have}")]
    TooShort { need: usize, have: usize },
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),
    #[error("Invalid format definition: {0:?}")]
    InvalidFormat(String),
    #[error("Invalid UTF-8 text: {0}")]
    Text(#[from] Utf8Error),
}

/// Fail with `TooShort` unless `payload` holds at least `need` bytes.
pub(crate) fn require(payload: &[u8], need: usize) -> Result<(), PayloadError> {
    if payload.len() < need {
        return Err(PayloadError::TooShort { need, have: payload.len() });
    }
    Ok(())
}

// ── Header + framing ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub size:     u16,
    pub msg_type: u8,
}

impl RecordHeader {
    pub fn from_bytes(raw: &[u8; RECORD_HEADER_SIZE]) -> Self {
        Self {
            size:     u16::from_le_bytes([raw[0], raw[1]]),
            msg_type: raw[2],
        }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self.size)?;
        writer.write_u8(self.msg_type)?;
        Ok(())
    }

    /// A header is implausible if its type is the zero byte, or its size is
    /// zero or above [`MAX_PLAUSIBLE_SIZE`].
    pub fn is_plausible(&self) -> bool {
        self.msg_type != 0 && self.size != 0 && self.size <= MAX_PLAUSIBLE_SIZE
    }

    /// Total on-disk length including the 3 header bytes.
    pub fn record_len(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + self.size as u64
    }
}

/// Read until `buf` is full or the stream ends; returns bytes read.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read one 3-byte record header.
///
/// Distinguishes a clean end of stream (`Eof`, zero bytes) from a header cut
/// short (`Truncated`).
pub fn read_header<R: Read>(reader: &mut R) -> Result<RecordHeader, FrameError> {
    let mut raw = [0u8; RECORD_HEADER_SIZE];
    let got = read_full(reader, &mut raw)?;
    if got == 0 {
        return Err(FrameError::Eof);
    }
    if got < RECORD_HEADER_SIZE {
        return Err(FrameError::Truncated { expected: RECORD_HEADER_SIZE, available: got });
    }
    Ok(RecordHeader::from_bytes(&raw))
}

/// Read the payload announced by `header` into `payload` (resized to fit).
/// The cursor is left wherever a short read ended.
pub fn read_payload<R: Read>(
    reader: &mut R,
    header: RecordHeader,
    payload: &mut Vec<u8>,
) -> Result<(), FrameError> {
    payload.resize(header.size as usize, 0);
    let got = read_full(reader, payload)?;
    if got < payload.len() {
        let expected = payload.len();
        payload.truncate(got);
        return Err(FrameError::Truncated { expected, available: got });
    }
    Ok(())
}

/// Read one header and its payload.
pub fn read_record<R: Read>(reader: &mut R, payload: &mut Vec<u8>) -> Result<RecordHeader, FrameError> {
    let header = read_header(reader)?;
    read_payload(reader, header, payload)?;
    Ok(header)
}

/// Wrap `payload` in a header and write it.
pub fn write_record<W: Write>(mut writer: W, msg_type: MsgType, payload: &[u8]) -> io::Result<()> {
    let size = u16::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{:?} payload of {} bytes exceeds the 65535-byte record limit", msg_type, payload.len()),
        )
    })?;
    RecordHeader { size, msg_type: msg_type as u8 }.write(&mut writer)?;
    writer.write_all(payload)
}

/// Header and payload as one contiguous buffer.
pub fn encode_record(msg_type: MsgType, payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    write_record(&mut out, msg_type, payload)?;
    Ok(out)
}

// ── Parsed records ───────────────────────────────────────────────────────────

/// One decoded record.  Each arm owns its payload shape; DATA samples
/// borrow from the framing buffer.
#[derive(Debug, Clone)]
pub enum Record<'a> {
    Format(TypeDefinition),
    Data { msg_id: u16, sample: &'a [u8] },
    Info(InfoRecord),
    InfoMultiple { continued: bool, info: InfoRecord },
    Parameter(InfoRecord),
    ParameterDefault { classes: u8, info: InfoRecord },
    AddLogged(AddLoggedMessage),
    RemoveLogged { msg_id: u16 },
    Sync,
    Dropout { duration_us: u16 },
    Logging(LogMessage),
    LoggingTagged(TaggedLogMessage),
    FlagBits(FlagBits),
}

impl<'a> Record<'a> {
    pub fn parse(msg_type: MsgType, payload: &'a [u8], text: TextDecoding) -> Result<Self, PayloadError> {
        Ok(match msg_type {
            MsgType::Format => Record::Format(TypeDefinition::parse(payload, text)?),
            MsgType::Data => {
                require(payload, 2)?;
                Record::Data {
                    msg_id: u16::from_le_bytes([payload[0], payload[1]]),
                    sample: &payload[2..],
                }
            }
            MsgType::Info => Record::Info(InfoRecord::parse(payload, text)?),
            MsgType::InfoMultiple => {
                require(payload, 1)?;
                Record::InfoMultiple {
                    continued: payload[0] == 1,
                    info:      InfoRecord::parse(&payload[1..], text)?,
                }
            }
            MsgType::Parameter => Record::Parameter(InfoRecord::parse(payload, text)?),
            MsgType::ParameterDefault => {
                require(payload, 1)?;
                Record::ParameterDefault {
                    classes: payload[0],
                    info:    InfoRecord::parse(&payload[1..], text)?,
                }
            }
            MsgType::AddLogged => Record::AddLogged(AddLoggedMessage::parse(payload, text)?),
            MsgType::RemoveLogged => {
                require(payload, 2)?;
                Record::RemoveLogged { msg_id: u16::from_le_bytes([payload[0], payload[1]]) }
            }
            MsgType::Sync => Record::Sync,
            MsgType::Dropout => {
                require(payload, 2)?;
                Record::Dropout { duration_us: u16::from_le_bytes([payload[0], payload[1]]) }
            }
            MsgType::Logging => Record::Logging(LogMessage::parse(payload, text)?),
            MsgType::LoggingTagged => Record::LoggingTagged(TaggedLogMessage::parse(payload, text)?),
            MsgType::FlagBits => Record::FlagBits(FlagBits::parse(payload).ok_or(
                PayloadError::TooShort { need: crate::header::FLAG_BITS_SIZE, have: payload.len() },
            )?),
        })
    }
}
