//! Dataset materializer.
//!
//! Turns a drained subscription's raw, concatenated samples into one column
//! of decoded values per resolved field.  Datasets are immutable once built.

use std::io::{self, Write};

use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use thiserror::Error;

use crate::format::{ResolvedField, TIMESTAMP_FIELD};
use crate::subscription::Subscription;
use crate::types::Value;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatasetError {
    #[error("Raw buffer of {len} bytes is not a whole number of {stride}-byte samples")]
    RaggedBuffer { len: usize, stride: usize },
    #[error("No field named {0:?}")]
    MissingField(String),
    #[error("Field {0:?} does not hold unsigned timestamps")]
    NotATimestamp(String),
}

/// One subscription's samples, column-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub multi_id:     u8,
    pub msg_id:       u16,
    pub message_name: String,
    pub fields:       Vec<ResolvedField>,
    /// `columns[i]` holds every sample's value of `fields[i]`, arrival order.
    columns:          Vec<Vec<Value>>,
}

impl Dataset {
    /// Deinterleave a subscription's buffer.  The stride is the sum of the
    /// resolved field widths; the buffer must be an exact multiple of it.
    pub fn from_subscription(sub: &Subscription) -> Result<Self, DatasetError> {
        let fields = sub.fields().to_vec();
        let stride = sub.min_size();
        let raw = sub.buffer();

        let ragged = DatasetError::RaggedBuffer { len: raw.len(), stride };
        if stride == 0 {
            if !raw.is_empty() {
                return Err(ragged);
            }
        } else if raw.len() % stride != 0 {
            return Err(ragged);
        }

        let samples = if stride == 0 { 0 } else { raw.len() / stride };
        let mut columns: Vec<Vec<Value>> = fields.iter().map(|_| Vec::with_capacity(samples)).collect();

        for chunk in raw.chunks_exact(stride.max(1)).take(samples) {
            for (field, column) in fields.iter().zip(columns.iter_mut()) {
                let value = field.ty.decode(&chunk[field.offset..]).ok_or_else(|| ragged.clone())?;
                column.push(value);
            }
        }

        Ok(Self {
            multi_id: sub.multi_id,
            msg_id: sub.msg_id,
            message_name: sub.message_name.clone(),
            fields,
            columns,
        })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column(&self, field: &str) -> Option<&[Value]> {
        self.fields
            .iter()
            .position(|f| f.name == field)
            .map(|i| self.columns[i].as_slice())
    }

    /// `(field, column)` pairs in resolved order.
    pub fn columns(&self) -> impl Iterator<Item = (&ResolvedField, &[Value])> {
        self.fields.iter().zip(self.columns.iter().map(Vec::as_slice))
    }

    pub fn timestamps(&self) -> Result<Vec<u64>, DatasetError> {
        let column = self
            .column(TIMESTAMP_FIELD)
            .ok_or_else(|| DatasetError::MissingField(TIMESTAMP_FIELD.to_owned()))?;
        column
            .iter()
            .map(|v| v.as_u64().ok_or_else(|| DatasetError::NotATimestamp(TIMESTAMP_FIELD.to_owned())))
            .collect()
    }

    /// Encode sample `index` in wire layout.
    pub fn write_sample<W: Write>(&self, index: usize, mut writer: W) -> io::Result<()> {
        for column in &self.columns {
            let value = column.get(index).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("sample {index} out of range"))
            })?;
            value.write_le(&mut writer)?;
        }
        Ok(())
    }

    /// Compress `field` into `(timestamp, value)` pairs, keeping only the
    /// first sample and each sample whose value differs from its predecessor.
    pub fn list_value_changes(&self, field: &str) -> Result<Vec<(u64, Value)>, DatasetError> {
        let timestamps = self.timestamps()?;
        let column = self
            .column(field)
            .ok_or_else(|| DatasetError::MissingField(field.to_owned()))?;

        let mut changes: Vec<(u64, Value)> = Vec::new();
        for (&ts, &value) in timestamps.iter().zip(column) {
            if changes.last().map_or(true, |&(_, prev)| prev != value) {
                changes.push((ts, value));
            }
        }
        Ok(changes)
    }
}

impl Serialize for Dataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Columns<'a>(&'a Dataset);

        impl Serialize for Columns<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_map(self.0.columns().map(|(f, c)| (&f.name, c)))
            }
        }

        let mut st = serializer.serialize_struct("Dataset", 5)?;
        st.serialize_field("multi_id", &self.multi_id)?;
        st.serialize_field("msg_id", &self.msg_id)?;
        st.serialize_field("message_name", &self.message_name)?;
        st.serialize_field("fields", &self.fields)?;
        st.serialize_field("data", &Columns(self))?;
        st.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{TypeDefinition, TypeRegistry};
    use crate::subscription::{AddLoggedMessage, SubscriptionTracker};
    use crate::text::TextDecoding;

    fn dataset(def: &str, samples: &[Vec<u8>]) -> Dataset {
        let mut reg = TypeRegistry::new();
        reg.register(TypeDefinition::parse(def.as_bytes(), TextDecoding::Strict).unwrap());
        let name = def.split(':').next().unwrap();
        let mut tracker = SubscriptionTracker::new(None);
        tracker.subscribe(AddLoggedMessage { multi_id: 1, msg_id: 4, message_name: name.into() }, &reg);
        for s in samples {
            tracker.push_sample(4, s);
        }
        Dataset::from_subscription(&tracker.drain()[0]).unwrap()
    }

    fn sample(ts: u64, v: u8) -> Vec<u8> {
        let mut s = ts.to_le_bytes().to_vec();
        s.push(v);
        s
    }

    #[test]
    fn deinterleaves_in_field_order() {
        let ds = dataset(
            "mix:uint64_t timestamp;int16_t[2] a;bool armed;char mode;",
            &[
                [&1u64.to_le_bytes()[..], &(-2i16).to_le_bytes()[..], &300i16.to_le_bytes()[..], &[1u8, b'M'][..]].concat(),
                [&2u64.to_le_bytes()[..], &0i16.to_le_bytes()[..], &7i16.to_le_bytes()[..], &[0u8, b'A'][..]].concat(),
            ],
        );
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.timestamps().unwrap(), vec![1, 2]);
        assert_eq!(ds.column("a[0]").unwrap(), &[Value::Int16(-2), Value::Int16(0)]);
        assert_eq!(ds.column("a[1]").unwrap(), &[Value::Int16(300), Value::Int16(7)]);
        assert_eq!(ds.column("armed").unwrap(), &[Value::Bool(true), Value::Bool(false)]);
        assert_eq!(ds.column("mode").unwrap(), &[Value::Char('M'), Value::Char('A')]);
        assert!(ds.column("missing").is_none());

        let mut buf = Vec::new();
        ds.write_sample(1, &mut buf).unwrap();
        assert_eq!(buf.len(), 14);
        assert_eq!(&buf[..8], &2u64.to_le_bytes());
        assert!(ds.write_sample(2, Vec::new()).is_err());
    }

    #[test]
    fn unsigned_values_keep_full_range() {
        let ds = dataset("u:uint64_t timestamp;uint8_t v;", &[sample(u64::MAX, 0xFF)]);
        assert_eq!(ds.column("v").unwrap(), &[Value::UInt8(255)]);
        assert_eq!(ds.timestamps().unwrap(), vec![u64::MAX]);
    }

    #[test]
    fn value_changes_are_compressed() {
        let samples: Vec<_> = [(0, 5), (1, 5), (2, 7), (3, 7)]
            .iter()
            .map(|&(ts, v)| sample(ts, v))
            .collect();
        let ds = dataset("c:uint64_t timestamp;uint8_t v;", &samples);
        assert_eq!(
            ds.list_value_changes("v").unwrap(),
            vec![(0, Value::UInt8(5)), (2, Value::UInt8(7))]
        );
        assert_eq!(
            ds.list_value_changes("nope"),
            Err(DatasetError::MissingField("nope".into()))
        );
    }

    #[test]
    fn signed_timestamps_must_be_non_negative() {
        let mut s = (-1i64).to_le_bytes().to_vec();
        s.push(0);
        let ds = dataset("n:int64_t timestamp;uint8_t v;", &[s]);
        assert!(matches!(ds.timestamps(), Err(DatasetError::NotATimestamp(_))));
    }

    #[test]
    fn serializes_columns_by_name() {
        let ds = dataset("c:uint64_t timestamp;uint8_t v;", &[sample(10, 3)]);
        let json = serde_json::to_value(&ds).unwrap();
        assert_eq!(json["message_name"], "c");
        assert_eq!(json["data"]["v"][0], 3);
        assert_eq!(json["data"]["timestamp"][0], 10);
    }
}
