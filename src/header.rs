use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// `"ULog"` followed by the fixed tail `01 12 35`.
pub const MAGIC: [u8; 7] = [0x55, 0x4C, 0x6F, 0x67, 0x01, 0x12, 0x35];
pub const HEADER_SIZE: usize = 16;
/// Highest file version this build knows about.  Newer versions are read
/// with a warning.
pub const VERSION: u8 = 1;

/// FLAG-BITS payload: 8 compat bytes, 8 incompat bytes, 3 offsets.
pub const FLAG_BITS_SIZE: usize = 8 + 8 + 3 * 8;
pub const MAX_APPENDED_OFFSETS: usize = 3;

/// Compat flag 0, bit 0: the file carries PARAMETER-DEFAULT records.
pub const COMPAT_DEFAULT_PARAMETERS: u8 = 0x01;
/// Incompat flag 0, bit 0: data has been appended at `appended_offsets`.
pub const INCOMPAT_DATA_APPENDED: u8 = 0x01;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Malformed file header: {0}")]
    Malformed(&'static str),
    #[error("Unknown incompatible flag set ({}): cannot parse the log", hex::encode(.0))]
    UnsupportedIncompatibleFlag([u8; 8]),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub version:         u8,
    pub start_timestamp: u64,
}

impl FileHeader {
    pub fn new(start_timestamp: u64) -> Self {
        Self { version: VERSION, start_timestamp }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_u8(self.version)?;
        writer.write_u64::<LittleEndian>(self.start_timestamp)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, HeaderError> {
        let mut raw = [0u8; HEADER_SIZE];
        reader.read_exact(&mut raw).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => HeaderError::Malformed("file shorter than 16 bytes"),
            _ => HeaderError::Io(e),
        })?;
        if raw[..MAGIC.len()] != MAGIC {
            return Err(HeaderError::Malformed("magic mismatch"));
        }
        let version = raw[MAGIC.len()];
        let start_timestamp = (&raw[8..]).read_u64::<LittleEndian>()?;
        Ok(Self { version, start_timestamp })
    }
}

// ── FLAG-BITS ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagBits {
    pub compat_flags:     [u8; 8],
    pub incompat_flags:   [u8; 8],
    /// Non-zero appended-data offsets, in file order.
    pub appended_offsets: Vec<u64>,
}

impl FlagBits {
    /// Parse a FLAG-BITS payload.  Longer payloads are accepted; the tail is
    /// ignored.  Returns `None` if fewer than 40 bytes are present.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < FLAG_BITS_SIZE {
            return None;
        }
        let mut compat_flags = [0u8; 8];
        let mut incompat_flags = [0u8; 8];
        compat_flags.copy_from_slice(&payload[0..8]);
        incompat_flags.copy_from_slice(&payload[8..16]);

        let mut rest = &payload[16..FLAG_BITS_SIZE];
        let mut appended_offsets = Vec::with_capacity(MAX_APPENDED_OFFSETS);
        for _ in 0..MAX_APPENDED_OFFSETS {
            let offset = rest.read_u64::<LittleEndian>().ok()?;
            if offset != 0 {
                appended_offsets.push(offset);
            }
        }
        Some(Self { compat_flags, incompat_flags, appended_offsets })
    }

    /// Any incompatible bit other than "data appended" aborts decoding.
    pub fn validate(&self) -> Result<(), HeaderError> {
        let unknown = self.incompat_flags[0] & !INCOMPAT_DATA_APPENDED != 0
            || self.incompat_flags[1..].iter().any(|&b| b != 0);
        if unknown {
            return Err(HeaderError::UnsupportedIncompatibleFlag(self.incompat_flags));
        }
        Ok(())
    }

    pub fn has_data_appended(&self) -> bool {
        self.incompat_flags[0] & INCOMPAT_DATA_APPENDED != 0
    }

    pub fn has_default_parameters(&self) -> bool {
        self.compat_flags[0] & COMPAT_DEFAULT_PARAMETERS != 0
    }

    /// Payload for a rewritten file: compat flags kept, "data appended"
    /// cleared, offsets zeroed.
    pub fn write_rewritten<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let mut incompat = self.incompat_flags;
        incompat[0] &= !INCOMPAT_DATA_APPENDED;
        writer.write_all(&self.compat_flags)?;
        writer.write_all(&incompat)?;
        for _ in 0..MAX_APPENDED_OFFSETS {
            writer.write_u64::<LittleEndian>(0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let mut buf = Vec::new();
        FileHeader::new(123_456).write(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        let hdr = FileHeader::read(&buf[..]).unwrap();
        assert_eq!(hdr.version, VERSION);
        assert_eq!(hdr.start_timestamp, 123_456);
    }

    #[test]
    fn short_or_foreign_files_are_malformed() {
        assert!(matches!(FileHeader::read(&MAGIC[..]), Err(HeaderError::Malformed(_))));
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[0] = b'X';
        assert!(matches!(FileHeader::read(&buf[..]), Err(HeaderError::Malformed(_))));
    }

    #[test]
    fn flag_bits_skip_zero_offsets() {
        let mut payload = vec![0u8; FLAG_BITS_SIZE];
        payload[8] = INCOMPAT_DATA_APPENDED;
        payload[24..32].copy_from_slice(&4096u64.to_le_bytes());
        let flags = FlagBits::parse(&payload).unwrap();
        assert!(flags.has_data_appended());
        assert_eq!(flags.appended_offsets, vec![4096]);
        assert!(flags.validate().is_ok());
    }

    #[test]
    fn unknown_incompat_bits_are_fatal() {
        let mut payload = vec![0u8; FLAG_BITS_SIZE];
        payload[8] = 0x02;
        assert!(FlagBits::parse(&payload).unwrap().validate().is_err());

        let mut payload = vec![0u8; FLAG_BITS_SIZE];
        payload[15] = 0x80;
        assert!(FlagBits::parse(&payload).unwrap().validate().is_err());
    }

    #[test]
    fn rewritten_flags_clear_appended_bit() {
        let flags = FlagBits {
            compat_flags:     [1, 0, 0, 0, 0, 0, 0, 0],
            incompat_flags:   [1, 0, 0, 0, 0, 0, 0, 0],
            appended_offsets: vec![100],
        };
        let mut buf = Vec::new();
        flags.write_rewritten(&mut buf).unwrap();
        let back = FlagBits::parse(&buf).unwrap();
        assert!(back.has_default_parameters());
        assert!(!back.has_data_appended());
        assert!(back.appended_offsets.is_empty());
    }
}
