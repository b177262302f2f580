//! Deterministic re-serialization of a [`ULog`].
//!
//! Record order:
//!
//! ```text
//! header · FLAG-BITS · FORMAT* · INFO* · INFO-MULTIPLE* · PARAMETER*
//!        · PARAMETER-DEFAULT* · ADD-LOGGED-MESSAGE* (by msg id)
//!        · { DATA | LOGGING | LOGGING-TAGGED | DROPOUT | PARAMETER }* (by timestamp)
//! ```
//!
//! The merged stream is a stable sort, so records with equal timestamps keep
//! the order samples, logs, tagged logs, dropouts, parameter changes, and
//! within samples the order of ascending message id.

use std::io::{self, Write};

use crate::dataset::Dataset;
use crate::header::FileHeader;
use crate::metadata::{write_entry, Dropout, LogMessage, ParameterChange, TaggedLogMessage};
use crate::record::{write_record, MsgType};
use crate::subscription::AddLoggedMessage;
use crate::ulog::ULog;

/// One record of the timestamp-merged tail.
enum Item<'a> {
    Sample(&'a Dataset, usize),
    Log(&'a LogMessage),
    Tagged(&'a TaggedLogMessage),
    Dropout(&'a Dropout),
    Param(&'a ParameterChange),
}

pub fn write_ulog<W: Write>(log: &ULog, mut writer: W) -> io::Result<()> {
    let mut payload = Vec::with_capacity(256);

    FileHeader { version: log.header.version, start_timestamp: log.header.start_timestamp }.write(&mut writer)?;

    log.flags.write_rewritten(&mut payload)?;
    write_record(&mut writer, MsgType::FlagBits, &payload)?;

    for def in log.registry.iter() {
        write_record(&mut writer, MsgType::Format, def.to_format_string().as_bytes())?;
    }

    let md = &log.metadata;
    for (key, v) in &md.info {
        payload.clear();
        write_entry(key, &v.type_name, &v.value, &mut payload)?;
        write_record(&mut writer, MsgType::Info, &payload)?;
    }

    for (key, entry) in &md.info_multiple {
        for list in &entry.values {
            for (i, value) in list.iter().enumerate() {
                payload.clear();
                payload.push(u8::from(i > 0));
                write_entry(key, &entry.type_name, value, &mut payload)?;
                write_record(&mut writer, MsgType::InfoMultiple, &payload)?;
            }
        }
    }

    for (name, v) in &md.initial_parameters {
        payload.clear();
        write_entry(name, &v.type_name, &v.value, &mut payload)?;
        write_record(&mut writer, MsgType::Parameter, &payload)?;
    }

    for (&class, params) in &md.default_parameters {
        for (name, v) in params {
            payload.clear();
            payload.push(1u8 << class);
            write_entry(name, &v.type_name, &v.value, &mut payload)?;
            write_record(&mut writer, MsgType::ParameterDefault, &payload)?;
        }
    }

    let mut datasets: Vec<&Dataset> = log.datasets.iter().collect();
    datasets.sort_by_key(|d| d.msg_id);

    for ds in &datasets {
        payload.clear();
        AddLoggedMessage {
            multi_id:     ds.multi_id,
            msg_id:       ds.msg_id,
            message_name: ds.message_name.clone(),
        }
        .write_payload(&mut payload)?;
        write_record(&mut writer, MsgType::AddLogged, &payload)?;
    }

    for (timestamp, item) in merged_items(&datasets, log)? {
        payload.clear();
        let msg_type = match item {
            Item::Sample(ds, index) => {
                payload.extend_from_slice(&ds.msg_id.to_le_bytes());
                ds.write_sample(index, &mut payload)?;
                MsgType::Data
            }
            Item::Log(msg) => {
                msg.write_payload(&mut payload)?;
                MsgType::Logging
            }
            Item::Tagged(msg) => {
                msg.write_payload(&mut payload)?;
                MsgType::LoggingTagged
            }
            Item::Dropout(d) => {
                payload.extend_from_slice(&d.duration_us.to_le_bytes());
                MsgType::Dropout
            }
            Item::Param(p) => {
                write_entry(&p.name, &p.value.type_name, &p.value.value, &mut payload)?;
                MsgType::Parameter
            }
        };
        write_record(&mut writer, msg_type, &payload).map_err(|e| {
            io::Error::new(e.kind(), format!("record at timestamp {timestamp}: {e}"))
        })?;
    }

    writer.flush()
}

/// Everything after the subscriptions, stably sorted by timestamp.
fn merged_items<'a>(datasets: &[&'a Dataset], log: &'a ULog) -> io::Result<Vec<(u64, Item<'a>)>> {
    let md = &log.metadata;
    let mut items: Vec<(u64, Item<'a>)> = Vec::new();

    for &ds in datasets {
        let timestamps = ds
            .timestamps()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{}: {e}", ds.message_name)))?;
        items.extend(timestamps.into_iter().enumerate().map(|(i, ts)| (ts, Item::Sample(ds, i))));
    }
    items.extend(md.logged_messages.iter().map(|m| (m.timestamp, Item::Log(m))));
    items.extend(md.iter_tagged_messages().map(|m| (m.timestamp, Item::Tagged(m))));
    items.extend(md.dropouts.iter().map(|d| (d.timestamp, Item::Dropout(d))));
    items.extend(md.changed_parameters.iter().map(|p| (p.timestamp, Item::Param(p))));

    items.sort_by_key(|(ts, _)| *ts);
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{FlagBits, HEADER_SIZE, INCOMPAT_DATA_APPENDED};
    use crate::metadata::{InfoRecord, InfoValue};
    use crate::record::{read_record, RECORD_HEADER_SIZE};
    use crate::types::Value;
    use std::io::Cursor;

    fn record_types(bytes: &[u8]) -> Vec<u8> {
        let mut cur = Cursor::new(&bytes[HEADER_SIZE..]);
        let mut payload = Vec::new();
        let mut types = Vec::new();
        while let Ok(h) = read_record(&mut cur, &mut payload) {
            types.push(h.msg_type);
        }
        types
    }

    #[test]
    fn empty_log_is_header_and_flags() {
        let mut log = ULog::default();
        log.header = FileHeader::new(77);
        log.flags = FlagBits {
            compat_flags:     [0; 8],
            incompat_flags:   [INCOMPAT_DATA_APPENDED, 0, 0, 0, 0, 0, 0, 0],
            appended_offsets: vec![500],
        };
        let mut out = Vec::new();
        write_ulog(&log, &mut out).unwrap();
        assert_eq!(out.len(), HEADER_SIZE + RECORD_HEADER_SIZE + 40);
        assert_eq!(record_types(&out), vec![b'B']);
        let flags = FlagBits::parse(&out[HEADER_SIZE + RECORD_HEADER_SIZE..]).unwrap();
        assert!(!flags.has_data_appended());
        assert!(flags.appended_offsets.is_empty());
    }

    #[test]
    fn sections_follow_fixed_order() {
        let mut log = ULog::default();
        let md = &mut log.metadata;
        md.add_changed_parameter(50, InfoRecord::new("P", "int32_t", InfoValue::Scalar(Value::Int32(2))));
        md.dropouts.push(Dropout { duration_us: 9, timestamp: 10 });
        md.logged_messages.push(LogMessage { level: 6, timestamp: 30, message: "hi".into() });
        md.add_default_parameter(0b10, InfoRecord::new("P", "int32_t", InfoValue::Scalar(Value::Int32(0))));
        md.add_initial_parameter(InfoRecord::new("P", "int32_t", InfoValue::Scalar(Value::Int32(1))));
        md.add_info_multiple(false, InfoRecord::new("m", "char[1]", InfoValue::Text("a".into())));
        md.add_info_multiple(true, InfoRecord::new("m", "char[1]", InfoValue::Text("b".into())));
        md.add_info(InfoRecord::new("sys", "char[3]", InfoValue::Text("px4".into())));

        let mut out = Vec::new();
        write_ulog(&log, &mut out).unwrap();
        assert_eq!(record_types(&out), b"BIMMPQOLP".to_vec());
    }

    #[test]
    fn continuation_flag_marks_all_but_first() {
        let mut log = ULog::default();
        for (c, v) in [(false, "a"), (true, "b"), (true, "c")] {
            log.metadata.add_info_multiple(c, InfoRecord::new("k", "char[1]", InfoValue::Text(v.into())));
        }
        let mut out = Vec::new();
        write_ulog(&log, &mut out).unwrap();

        let mut cur = Cursor::new(&out[HEADER_SIZE..]);
        let mut payload = Vec::new();
        let mut flags = Vec::new();
        while let Ok(h) = read_record(&mut cur, &mut payload) {
            if h.msg_type == b'M' {
                flags.push(payload[0]);
            }
        }
        assert_eq!(flags, vec![0, 1, 1]);
    }
}
