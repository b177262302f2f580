#![allow(dead_code)]

use ulog::header::{FileHeader, FLAG_BITS_SIZE, HEADER_SIZE};
use ulog::record::{encode_record, MsgType, RECORD_HEADER_SIZE};

/// Byte-level builder for synthetic log files.
pub struct LogBuilder {
    bytes: Vec<u8>,
}

impl LogBuilder {
    pub fn new(start_timestamp: u64) -> Self {
        let mut bytes = Vec::new();
        FileHeader::new(start_timestamp).write(&mut bytes).unwrap();
        Self { bytes }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn record(mut self, msg_type: MsgType, payload: &[u8]) -> Self {
        self.bytes.extend(encode_record(msg_type, payload).unwrap());
        self
    }

    pub fn flags(self, compat: [u8; 8], incompat: [u8; 8], offsets: [u64; 3]) -> Self {
        let mut p = Vec::with_capacity(FLAG_BITS_SIZE);
        p.extend_from_slice(&compat);
        p.extend_from_slice(&incompat);
        for o in offsets {
            p.extend_from_slice(&o.to_le_bytes());
        }
        self.record(MsgType::FlagBits, &p)
    }

    /// Patch appended offset `index` of a FLAG-BITS record written first.
    pub fn set_appended_offset(mut self, index: usize, offset: u64) -> Self {
        let at = HEADER_SIZE + RECORD_HEADER_SIZE + 16 + index * 8;
        self.bytes[at..at + 8].copy_from_slice(&offset.to_le_bytes());
        self
    }

    pub fn format(self, def: &str) -> Self {
        self.record(MsgType::Format, def.as_bytes())
    }

    pub fn info(self, type_name: &str, key: &str, value: &[u8]) -> Self {
        self.record(MsgType::Info, &entry(type_name, key, value))
    }

    pub fn info_multiple(self, continued: bool, type_name: &str, key: &str, value: &[u8]) -> Self {
        let mut p = vec![continued as u8];
        p.extend(entry(type_name, key, value));
        self.record(MsgType::InfoMultiple, &p)
    }

    pub fn param(self, type_name: &str, key: &str, value: &[u8]) -> Self {
        self.record(MsgType::Parameter, &entry(type_name, key, value))
    }

    pub fn param_default(self, classes: u8, type_name: &str, key: &str, value: &[u8]) -> Self {
        let mut p = vec![classes];
        p.extend(entry(type_name, key, value));
        self.record(MsgType::ParameterDefault, &p)
    }

    pub fn add_logged(self, multi_id: u8, msg_id: u16, name: &str) -> Self {
        let mut p = vec![multi_id];
        p.extend_from_slice(&msg_id.to_le_bytes());
        p.extend_from_slice(name.as_bytes());
        self.record(MsgType::AddLogged, &p)
    }

    pub fn data(self, msg_id: u16, sample: &[u8]) -> Self {
        let mut p = msg_id.to_le_bytes().to_vec();
        p.extend_from_slice(sample);
        self.record(MsgType::Data, &p)
    }

    pub fn log(self, level: u8, timestamp: u64, text: &str) -> Self {
        let mut p = vec![level];
        p.extend_from_slice(&timestamp.to_le_bytes());
        p.extend_from_slice(text.as_bytes());
        self.record(MsgType::Logging, &p)
    }

    pub fn tagged(self, level: u8, tag: u16, timestamp: u64, text: &str) -> Self {
        let mut p = vec![level];
        p.extend_from_slice(&tag.to_le_bytes());
        p.extend_from_slice(&timestamp.to_le_bytes());
        p.extend_from_slice(text.as_bytes());
        self.record(MsgType::LoggingTagged, &p)
    }

    pub fn dropout(self, duration_us: u16) -> Self {
        self.record(MsgType::Dropout, &duration_us.to_le_bytes())
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// INFO-shaped `key_len | "type key" | value`.
pub fn entry(type_name: &str, key: &str, value: &[u8]) -> Vec<u8> {
    let type_key = format!("{type_name} {key}");
    let mut p = vec![type_key.len() as u8];
    p.extend_from_slice(type_key.as_bytes());
    p.extend_from_slice(value);
    p
}

/// `uint64_t timestamp` followed by `rest`.
pub fn sample(timestamp: u64, rest: &[u8]) -> Vec<u8> {
    let mut s = timestamp.to_le_bytes().to_vec();
    s.extend_from_slice(rest);
    s
}
