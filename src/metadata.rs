//! Metadata stores: INFO, INFO-MULTIPLE, parameters, per-class parameter
//! defaults, log messages and dropouts.

use std::collections::BTreeMap;
use std::io::{self, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use serde::Serialize;

use crate::record::{require, PayloadError};
use crate::text::{strip_ansi_colors, TextDecoding};
use crate::types::{PrimitiveType, Value};

/// Number of parameter-default classes (one per bit of the bitmask byte).
pub const DEFAULT_CLASS_COUNT: u8 = 8;

// ── Key/value payloads ───────────────────────────────────────────────────────

/// The value half of an INFO-shaped record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InfoValue {
    Scalar(Value),
    /// `char[n]` values.
    Text(String),
    /// `uint8_t[n]` and any other non-scalar type, kept verbatim.
    Bytes(Vec<u8>),
}

impl InfoValue {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        match self {
            InfoValue::Scalar(v) => v.write_le(writer),
            InfoValue::Text(s)   => writer.write_all(s.as_bytes()),
            InfoValue::Bytes(b)  => writer.write_all(b),
        }
    }
}

/// A value together with the type name it was declared with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedValue {
    pub type_name: String,
    pub value:     InfoValue,
}

/// Parsed INFO / PARAMETER payload: `key_len | "type key" | value`.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoRecord {
    pub key:   String,
    pub value: TypedValue,
}

impl InfoRecord {
    pub fn new(key: impl Into<String>, type_name: impl Into<String>, value: InfoValue) -> Self {
        Self {
            key:   key.into(),
            value: TypedValue { type_name: type_name.into(), value },
        }
    }

    pub fn parse(payload: &[u8], text: TextDecoding) -> Result<Self, PayloadError> {
        require(payload, 1)?;
        let key_len = payload[0] as usize;
        require(payload, 1 + key_len)?;

        let type_key = text.decode(&payload[1..1 + key_len])?;
        let mut parts = type_key.split(' ');
        let (type_name, key) = match (parts.next(), parts.next(), parts.next()) {
            (Some(t), Some(k), None) if !t.is_empty() && !k.is_empty() => (t, k),
            _ => return Err(PayloadError::InvalidKey(type_key.clone())),
        };

        let raw = &payload[1 + key_len..];
        let value = if type_name.starts_with("char[") {
            InfoValue::Text(text.decode(raw)?)
        } else if let Some(ty) = PrimitiveType::from_name(type_name) {
            let value = ty
                .decode(raw)
                .ok_or(PayloadError::TooShort { need: 1 + key_len + ty.width(), have: payload.len() })?;
            InfoValue::Scalar(value)
        } else {
            InfoValue::Bytes(raw.to_vec())
        };

        Ok(Self::new(key, type_name, value))
    }

    /// Encode as an INFO / PARAMETER payload.
    pub fn write_payload<W: Write>(&self, writer: W) -> io::Result<()> {
        write_entry(&self.key, &self.value.type_name, &self.value.value, writer)
    }
}

/// Encode one `key_len | "type key" | value` entry.
pub fn write_entry<W: Write>(key: &str, type_name: &str, value: &InfoValue, mut writer: W) -> io::Result<()> {
    let type_key = format!("{type_name} {key}");
    let key_len = u8::try_from(type_key.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("key {type_key:?} longer than 255 bytes"))
    })?;
    writer.write_u8(key_len)?;
    writer.write_all(type_key.as_bytes())?;
    value.write(writer)
}

/// Values of one INFO-MULTIPLE key: one list per non-continued record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoMultiEntry {
    pub type_name: String,
    pub values:    Vec<Vec<InfoValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterChange {
    /// Last sample timestamp seen before the PARAMETER record.
    pub timestamp: u64,
    pub name:      String,
    pub value:     TypedValue,
}

// ── Log messages ─────────────────────────────────────────────────────────────

/// Syslog-style level name.
pub fn level_name(level: u8) -> &'static str {
    match level {
        0 => "EMERGENCY",
        1 => "ALERT",
        2 => "CRITICAL",
        3 => "ERROR",
        4 => "WARNING",
        5 => "NOTICE",
        6 => "INFO",
        7 => "DEBUG",
        _ => "UNKNOWN",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogMessage {
    pub level:     u8,
    pub timestamp: u64,
    pub message:   String,
}

impl LogMessage {
    /// `level: u8 | timestamp: u64 | text`.  Color escapes are stripped.
    pub fn parse(payload: &[u8], text: TextDecoding) -> Result<Self, PayloadError> {
        require(payload, 9)?;
        let message = text.decode(&payload[9..])?;
        Ok(Self {
            level:     payload[0],
            timestamp: LittleEndian::read_u64(&payload[1..9]),
            message:   strip_ansi_colors(&message).into_owned(),
        })
    }

    pub fn write_payload<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u8(self.level)?;
        writer.write_u64::<LittleEndian>(self.timestamp)?;
        writer.write_all(self.message.as_bytes())
    }

    pub fn level_name(&self) -> &'static str {
        level_name(self.level)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggedLogMessage {
    pub level:     u8,
    pub tag:       u16,
    pub timestamp: u64,
    pub message:   String,
}

impl TaggedLogMessage {
    /// `level: u8 | tag: u16 | timestamp: u64 | text`.
    pub fn parse(payload: &[u8], text: TextDecoding) -> Result<Self, PayloadError> {
        require(payload, 11)?;
        Ok(Self {
            level:     payload[0],
            tag:       u16::from_le_bytes([payload[1], payload[2]]),
            timestamp: LittleEndian::read_u64(&payload[3..11]),
            message:   text.decode(&payload[11..])?,
        })
    }

    pub fn write_payload<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u8(self.level)?;
        writer.write_u16::<LittleEndian>(self.tag)?;
        writer.write_u64::<LittleEndian>(self.timestamp)?;
        writer.write_all(self.message.as_bytes())
    }

    pub fn level_name(&self) -> &'static str {
        level_name(self.level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dropout {
    pub duration_us: u16,
    /// Last sample timestamp seen before the dropout record.
    pub timestamp:   u64,
}

// ── Store ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    pub info:               BTreeMap<String, TypedValue>,
    pub info_multiple:      BTreeMap<String, InfoMultiEntry>,
    /// PARAMETER records from the definitions section.
    pub initial_parameters: BTreeMap<String, TypedValue>,
    /// Default class index → name → value.
    pub default_parameters: BTreeMap<u8, BTreeMap<String, TypedValue>>,
    /// PARAMETER records from the data section, in arrival order.
    pub changed_parameters: Vec<ParameterChange>,
    pub logged_messages:    Vec<LogMessage>,
    /// Tagged messages grouped by tag, arrival order within each tag.
    pub tagged_messages:    BTreeMap<u16, Vec<TaggedLogMessage>>,
    pub dropouts:           Vec<Dropout>,
}

impl Metadata {
    pub fn add_info(&mut self, info: InfoRecord) {
        self.info.insert(info.key, info.value);
    }

    /// A continued record extends the most recent list of its key; any
    /// other record starts a new list.
    pub fn add_info_multiple(&mut self, continued: bool, info: InfoRecord) {
        if let Some(entry) = self.info_multiple.get_mut(&info.key) {
            let value = info.value.value;
            if continued && !entry.values.is_empty() {
                let last = entry.values.len() - 1;
                entry.values[last].push(value);
            } else {
                entry.values.push(vec![value]);
            }
            return;
        }
        self.info_multiple.insert(info.key, InfoMultiEntry {
            type_name: info.value.type_name,
            values:    vec![vec![info.value.value]],
        });
    }

    pub fn add_initial_parameter(&mut self, info: InfoRecord) {
        self.initial_parameters.insert(info.key, info.value);
    }

    pub fn add_changed_parameter(&mut self, timestamp: u64, info: InfoRecord) {
        self.changed_parameters.push(ParameterChange {
            timestamp,
            name:  info.key,
            value: info.value,
        });
    }

    /// Fan a PARAMETER-DEFAULT record out to every class whose bit is set.
    pub fn add_default_parameter(&mut self, classes: u8, info: InfoRecord) {
        for class in (0..DEFAULT_CLASS_COUNT).filter(|c| classes & (1 << c) != 0) {
            self.default_parameters
                .entry(class)
                .or_default()
                .insert(info.key.clone(), info.value.clone());
        }
    }

    pub fn add_tagged_message(&mut self, msg: TaggedLogMessage) {
        self.tagged_messages.entry(msg.tag).or_default().push(msg);
    }

    /// Tagged messages in tag order, arrival order within a tag.
    pub fn iter_tagged_messages(&self) -> impl Iterator<Item = &TaggedLogMessage> {
        self.tagged_messages.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_payload(type_key: &str, value: &[u8]) -> Vec<u8> {
        let mut p = vec![type_key.len() as u8];
        p.extend_from_slice(type_key.as_bytes());
        p.extend_from_slice(value);
        p
    }

    #[test]
    fn parses_text_scalar_and_raw_values() {
        let rec = InfoRecord::parse(&info_payload("char[5] sys_name", b"PX4_1"), TextDecoding::Strict).unwrap();
        assert_eq!(rec.key, "sys_name");
        assert_eq!(rec.value.value, InfoValue::Text("PX4_1".into()));

        let rec = InfoRecord::parse(&info_payload("int32_t MC_ROLL", &(-7i32).to_le_bytes()), TextDecoding::Strict).unwrap();
        assert_eq!(rec.value.value, InfoValue::Scalar(Value::Int32(-7)));

        let rec = InfoRecord::parse(&info_payload("uint8_t[3] hash", &[1, 2, 3]), TextDecoding::Strict).unwrap();
        assert_eq!(rec.value.value, InfoValue::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(matches!(
            InfoRecord::parse(&info_payload("int32_t", &[0; 4]), TextDecoding::Strict),
            Err(PayloadError::InvalidKey(_))
        ));
        assert!(matches!(
            InfoRecord::parse(&info_payload("a b c", &[]), TextDecoding::Strict),
            Err(PayloadError::InvalidKey(_))
        ));
        assert!(InfoRecord::parse(&[9, b'x'], TextDecoding::Strict).is_err());
    }

    #[test]
    fn info_payload_roundtrip() {
        let rec = InfoRecord::new("ver_sw_release", "uint32_t", InfoValue::Scalar(Value::UInt32(0x010D_00FF)));
        let mut buf = Vec::new();
        rec.write_payload(&mut buf).unwrap();
        assert_eq!(InfoRecord::parse(&buf, TextDecoding::Strict).unwrap(), rec);
    }

    #[test]
    fn default_parameters_fan_out_by_bit() {
        let mut md = Metadata::default();
        let rec = InfoRecord::new("MPC_XY_VEL", "float", InfoValue::Scalar(Value::Float(1.5)));
        md.add_default_parameter(0b0000_0101, rec.clone());

        assert_eq!(md.default_parameters.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(md.default_parameters[&0]["MPC_XY_VEL"], rec.value);
        assert_eq!(md.default_parameters[&2]["MPC_XY_VEL"], rec.value);
    }

    #[test]
    fn continued_info_multiple_appends_in_order() {
        let mut md = Metadata::default();
        let v = |s: &str| InfoRecord::new("perf", "char[8]", InfoValue::Text(s.into()));
        md.add_info_multiple(false, v("a"));
        md.add_info_multiple(true, v("b"));
        md.add_info_multiple(true, v("c"));
        md.add_info_multiple(false, v("d"));

        let text = |s: &str| InfoValue::Text(s.into());
        assert_eq!(md.info_multiple["perf"].values, vec![
            vec![text("a"), text("b"), text("c")],
            vec![text("d")],
        ]);
    }

    #[test]
    fn logging_strips_colors_and_tagged_groups_by_tag() {
        let mut payload = vec![6];
        payload.extend_from_slice(&42u64.to_le_bytes());
        payload.extend_from_slice(b"\x1b[32mready\x1b[0m");
        let msg = LogMessage::parse(&payload, TextDecoding::Strict).unwrap();
        assert_eq!(msg.message, "ready");
        assert_eq!(msg.level_name(), "INFO");

        let mut md = Metadata::default();
        for (tag, ts) in [(2u16, 10u64), (1, 11), (2, 12)] {
            md.add_tagged_message(TaggedLogMessage { level: 3, tag, timestamp: ts, message: "x".into() });
        }
        assert_eq!(md.tagged_messages[&2].len(), 2);
        let order: Vec<_> = md.iter_tagged_messages().map(|m| m.timestamp).collect();
        assert_eq!(order, vec![11, 10, 12]);
    }

    #[test]
    fn tagged_payload_roundtrip() {
        let msg = TaggedLogMessage { level: 4, tag: 0x1234, timestamp: 99, message: "low battery".into() };
        let mut buf = Vec::new();
        msg.write_payload(&mut buf).unwrap();
        assert_eq!(buf.len(), 11 + msg.message.len());
        assert_eq!(TaggedLogMessage::parse(&buf, TextDecoding::Strict).unwrap(), msg);
    }
}
