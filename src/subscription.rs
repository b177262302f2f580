//! Subscription tracker.
//!
//! An ADD-LOGGED-MESSAGE record binds a numeric message id to a resolved
//! field layout.  DATA records for that id are size-checked against the
//! layout and appended, raw, to the subscription's buffer; decoding into
//! columns happens once, when the stream ends (see `dataset`).
//!
//! Ids are only unique among *live* subscriptions: a later ADD-LOGGED-MESSAGE
//! with the same id replaces the earlier binding.

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::format::{LayoutError, ResolvedField, ResolvedLayout, TypeRegistry};
use crate::record::{require, PayloadError};
use crate::text::TextDecoding;

/// Parsed ADD-LOGGED-MESSAGE payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddLoggedMessage {
    pub multi_id:     u8,
    pub msg_id:       u16,
    pub message_name: String,
}

impl AddLoggedMessage {
    pub fn parse(payload: &[u8], text: TextDecoding) -> Result<Self, PayloadError> {
        require(payload, 3)?;
        Ok(Self {
            multi_id:     payload[0],
            msg_id:       u16::from_le_bytes([payload[1], payload[2]]),
            message_name: text.decode(&payload[3..])?,
        })
    }

    pub fn write_payload<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u8(self.multi_id)?;
        writer.write_u16::<LittleEndian>(self.msg_id)?;
        writer.write_all(self.message_name.as_bytes())
    }
}

// ── Sample outcome ───────────────────────────────────────────────────────────

/// What happened to one DATA record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Appended; `timestamp` was read from the sample's timestamp leaf.
    Stored { timestamp: u64 },
    /// The id belongs to a message excluded by the name filter.
    Filtered,
    /// Payload length outside `[min_size, max_size]`; sample dropped.
    SizeMismatch { msg_id: u16, size: usize, min: usize, max: usize },
    /// No live subscription for the id.  `first_report` is true the first
    /// time a given id is seen.
    MissingSubscription { msg_id: u16, first_report: bool },
    /// The subscription's type has no 8-byte `timestamp` leaf; sample dropped.
    NoTimestamp { msg_id: u16, first_report: bool },
    /// The id was bound to a type that cannot describe a sample; the damage
    /// was reported when the subscription was rejected.
    Unusable { msg_id: u16 },
}

impl SampleOutcome {
    /// Timestamp to feed into stream-level tracking; 0 for anything not stored.
    pub(crate) fn timestamp(&self) -> u64 {
        match *self {
            SampleOutcome::Stored { timestamp } => timestamp,
            _ => 0,
        }
    }

    /// Whether the record indicates a damaged file.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            SampleOutcome::SizeMismatch { .. } | SampleOutcome::MissingSubscription { .. }
        )
    }
}

// ── Subscription ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Subscription {
    pub multi_id:     u8,
    pub msg_id:       u16,
    pub message_name: String,
    layout:           ResolvedLayout,
    buffer:           Vec<u8>,
}

impl Subscription {
    /// Resolve the message's type against the registry as it stands now.
    /// Later redefinitions do not affect this subscription.
    pub fn new(add: AddLoggedMessage, registry: &TypeRegistry) -> Result<Self, LayoutError> {
        let layout = registry.layout(&add.message_name)?;
        Ok(Self {
            multi_id:     add.multi_id,
            msg_id:       add.msg_id,
            message_name: add.message_name,
            layout,
            buffer:       Vec::new(),
        })
    }

    pub fn fields(&self) -> &[ResolvedField] {
        &self.layout.fields
    }

    pub fn min_size(&self) -> usize {
        self.layout.min_size
    }

    pub fn max_size(&self) -> usize {
        self.layout.max_size
    }

    pub fn timestamp_offset(&self) -> Option<usize> {
        self.layout.timestamp_offset
    }

    /// Concatenated accepted samples, each exactly `min_size` bytes.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn sample_count(&self) -> usize {
        match self.layout.min_size {
            0 => 0,
            stride => self.buffer.len() / stride,
        }
    }

    /// Size-check and store one sample (the DATA payload minus its id).
    ///
    /// Samples longer than `min_size` but within `max_size` carry trailing
    /// padding; they are accepted and cut to `min_size`.
    pub fn push_sample(&mut self, sample: &[u8]) -> SampleOutcome {
        let (min, max) = (self.layout.min_size, self.layout.max_size);
        if sample.len() < min || sample.len() > max {
            return SampleOutcome::SizeMismatch { msg_id: self.msg_id, size: sample.len(), min, max };
        }
        let Some(ts_offset) = self.layout.timestamp_offset else {
            return SampleOutcome::NoTimestamp { msg_id: self.msg_id, first_report: true };
        };

        let sample = &sample[..min];
        let timestamp = LittleEndian::read_u64(&sample[ts_offset..ts_offset + 8]);
        self.buffer.extend_from_slice(sample);
        SampleOutcome::Stored { timestamp }
    }
}

// ── Tracker ──────────────────────────────────────────────────────────────────

/// Result of an ADD-LOGGED-MESSAGE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscribed {
    /// Now live.  `discarded_samples` counts samples of a replaced
    /// subscription with the same id that are lost.
    Registered { discarded_samples: usize },
    /// Excluded by the message-name filter.
    Filtered,
    /// The type cannot be laid out.  Any live subscription with the same id
    /// is dropped and later samples for the id are skipped.
    Rejected(LayoutError),
}

#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    live:             HashMap<u16, Subscription>,
    filter:           Option<HashSet<String>>,
    filtered_ids:     HashSet<u16>,
    rejected_ids:     HashSet<u16>,
    missing_ids:      HashSet<u16>,
    no_timestamp_ids: HashSet<u16>,
}

impl SubscriptionTracker {
    /// `filter`: when set, only messages with these names are subscribed.
    pub fn new(filter: Option<&[String]>) -> Self {
        Self {
            filter: filter.map(|names| names.iter().cloned().collect()),
            ..Self::default()
        }
    }

    pub fn subscribe(&mut self, add: AddLoggedMessage, registry: &TypeRegistry) -> Subscribed {
        if let Some(filter) = &self.filter {
            if !filter.contains(&add.message_name) {
                self.filtered_ids.insert(add.msg_id);
                return Subscribed::Filtered;
            }
        }
        let msg_id = add.msg_id;
        match Subscription::new(add, registry) {
            Ok(sub) => {
                self.rejected_ids.remove(&msg_id);
                let discarded_samples = self
                    .live
                    .insert(msg_id, sub)
                    .map_or(0, |old| old.sample_count());
                Subscribed::Registered { discarded_samples }
            }
            Err(e) => {
                self.live.remove(&msg_id);
                self.rejected_ids.insert(msg_id);
                Subscribed::Rejected(e)
            }
        }
    }

    pub fn push_sample(&mut self, msg_id: u16, sample: &[u8]) -> SampleOutcome {
        match self.live.get_mut(&msg_id) {
            Some(sub) => match sub.push_sample(sample) {
                SampleOutcome::NoTimestamp { msg_id, .. } => SampleOutcome::NoTimestamp {
                    msg_id,
                    first_report: self.no_timestamp_ids.insert(msg_id),
                },
                outcome => outcome,
            },
            None if self.filtered_ids.contains(&msg_id) => SampleOutcome::Filtered,
            None if self.rejected_ids.contains(&msg_id) => SampleOutcome::Unusable { msg_id },
            None => SampleOutcome::MissingSubscription {
                msg_id,
                first_report: self.missing_ids.insert(msg_id),
            },
        }
    }

    pub fn get(&self, msg_id: u16) -> Option<&Subscription> {
        self.live.get(&msg_id)
    }

    pub fn filtered_ids(&self) -> &HashSet<u16> {
        &self.filtered_ids
    }

    pub fn missing_ids(&self) -> &HashSet<u16> {
        &self.missing_ids
    }

    /// Remove and return every live subscription, in message-id order.
    pub fn drain(&mut self) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self.live.drain().map(|(_, s)| s).collect();
        subs.sort_by_key(|s| s.msg_id);
        subs
    }
}
