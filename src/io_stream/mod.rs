//! Streaming log engine: reader and writer.
//!
//! # Reader
//! [`ULogReader`] runs two phases over one seekable stream:
//!
//! 1. **Definitions**: FLAG-BITS, FORMAT, INFO, INFO-MULTIPLE, PARAMETER and
//!    PARAMETER-DEFAULT records.  The first ADD-LOGGED-MESSAGE, LOGGING or
//!    LOGGING-TAGGED record ends the phase; the cursor is rewound to its
//!    header.
//! 2. **Data**: every record type.  When the file declares appended data, the
//!    phase runs once per segment: `[header_end, off1)`, `[off1, off2)`, …,
//!    `[offN, EOF)`.  Subscriptions live across segments.
//!
//! Damage never aborts a load.  It sets `file_corrupt`.  In the data section
//! a lost framing is handed to the resync engine (`recovery`); in the
//! definitions section a damaged record is skipped by its declared size and
//! no marker search runs.  Only a bad file header, an unknown incompatible
//! flag, or an I/O error is fatal.
//!
//! # Writer
//! [`write_ulog`] re-serializes a [`ULog`]; see `writer.rs`.

mod writer;

pub use writer::write_ulog;

use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, info, warn};

use crate::dataset::Dataset;
use crate::header::{FileHeader, FlagBits, HEADER_SIZE, VERSION};
use crate::record::{
    read_header, read_payload, FrameError, MsgType, PayloadError, Record, RecordHeader, RECORD_HEADER_SIZE,
};
use crate::recovery::{Damage, Recovery, Resync};
use crate::subscription::{SampleOutcome, Subscribed, SubscriptionTracker};
use crate::ulog::{ReaderOptions, ULog, ULogError};

/// What the phase loop should do after one framing attempt.
enum Framed {
    Record(RecordHeader),
    /// Damage handled; go round again.
    Recovered,
    /// End of stream or segment.
    Stop,
}

/// How [`ULogReader::frame`] treats a damaged record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnDamage {
    /// Search for the sync marker.
    Resync,
    /// Count it and step over its declared size.
    Skip,
}

pub struct ULogReader<R: Read + Seek> {
    reader:  R,
    options: ReaderOptions,
    log:     ULog,
    tracker: SubscriptionTracker,
    resync:  Resync,
}

impl<R: Read + Seek> ULogReader<R> {
    pub fn new(reader: R, options: ReaderOptions) -> Self {
        let tracker = SubscriptionTracker::new(options.message_filter.as_deref());
        Self {
            reader,
            options,
            log: ULog::default(),
            tracker,
            resync: Resync::new(),
        }
    }

    /// Decode the whole stream.
    pub fn read(mut self) -> Result<ULog, ULogError> {
        self.reader.seek(SeekFrom::Start(0))?;
        let header = FileHeader::read(&mut self.reader)?;
        if header.version > VERSION {
            warn!(version = header.version, "unknown file version, attempting to continue");
        }
        self.log.last_timestamp = header.start_timestamp;
        self.log.header = header;

        self.read_definitions()?;
        self.log.header_end = self.reader.stream_position()?;
        debug!(header_end = self.log.header_end, types = self.log.registry.len(), "definitions read");

        if self.options.header_only {
            return Ok(self.finish());
        }

        if self.log.flags.has_data_appended() {
            let offsets = self.log.flags.appended_offsets.clone();
            for offset in offsets {
                info!(offset, "reading data up to appended-data offset");
                self.read_data(Some(offset))?;
                self.reader.seek(SeekFrom::Start(offset))?;
            }
        }
        self.read_data(None)?;

        self.materialize();
        Ok(self.finish())
    }

    // ── Framing ──────────────────────────────────────────────────────────────

    /// Read the next header and payload.
    /// `limit` bounds the segment: a record ending past it is not consumed.
    fn frame(&mut self, payload: &mut Vec<u8>, limit: Option<u64>, on_damage: OnDamage) -> Result<Framed, ULogError> {
        let start = self.reader.stream_position()?;
        let header = match read_header(&mut self.reader) {
            Ok(h) => h,
            Err(FrameError::Io(e)) => return Err(e.into()),
            Err(FrameError::Eof) => return Ok(Framed::Stop),
            Err(e @ FrameError::Truncated { .. }) => {
                debug!(offset = start, error = %e, "stream ends inside a record header");
                return Ok(Framed::Stop);
            }
        };

        // Every record has a payload, so one whose header reaches the
        // boundary belongs to the next segment.
        if let Some(limit) = limit {
            if start + RECORD_HEADER_SIZE as u64 >= limit {
                debug!(offset = start, limit, "record header reaches segment boundary");
                return Ok(Framed::Stop);
            }
        }

        let damage = Damage::classify(&header);
        if let Some(d) = damage {
            let reason = match d {
                Damage::Implausible => "implausible record header",
                Damage::UnknownType => "unknown record type",
            };
            self.mark_corrupt(start, reason);
            debug!(offset = start, msg_type = header.msg_type, size = header.size, reason, "damaged record");
        }

        if damage == Some(Damage::Implausible) && on_damage == OnDamage::Resync {
            self.resync.recover(&mut self.reader, Damage::Implausible, &header, start)?;
            return Ok(Framed::Recovered);
        }

        match read_payload(&mut self.reader, header, payload) {
            Ok(()) => {}
            Err(FrameError::Io(e)) => return Err(e.into()),
            Err(e) => {
                debug!(offset = start, error = %e, "stream ends inside a record");
                return Ok(Framed::Stop);
            }
        }

        if let Some(limit) = limit {
            if start + header.record_len() > limit {
                debug!(offset = start, limit, "record crosses segment boundary");
                return Ok(Framed::Stop);
            }
        }

        let Some(damage) = damage else {
            return Ok(Framed::Record(header));
        };
        match on_damage {
            OnDamage::Skip => self.resync.note(damage),
            OnDamage::Resync => {
                if let Recovery::Resynced { offset } =
                    self.resync.recover(&mut self.reader, damage, &header, start)?
                {
                    debug!(offset, "resumed inside unknown record");
                }
            }
        }
        Ok(Framed::Recovered)
    }

    // ── Definitions phase ────────────────────────────────────────────────────

    fn read_definitions(&mut self) -> Result<(), ULogError> {
        let mut payload = Vec::new();
        loop {
            let start = self.reader.stream_position()?;
            let header = match self.frame(&mut payload, None, OnDamage::Skip)? {
                Framed::Record(h) => h,
                Framed::Recovered => continue,
                Framed::Stop => break,
            };
            let Some(msg_type) = MsgType::from_u8(header.msg_type) else {
                continue;
            };

            match msg_type {
                MsgType::AddLogged | MsgType::Logging | MsgType::LoggingTagged => {
                    self.reader.seek(SeekFrom::Start(start))?;
                    break;
                }
                MsgType::FlagBits => {
                    if start != HEADER_SIZE as u64 {
                        warn!(offset = start, "FLAG-BITS must be the first record");
                    }
                    match FlagBits::parse(&payload) {
                        Some(flags) => {
                            flags.validate()?;
                            self.log.flags = flags;
                        }
                        None => self.malformed(start, msg_type, &PayloadError::TooShort {
                            need: crate::header::FLAG_BITS_SIZE,
                            have: payload.len(),
                        }),
                    }
                }
                MsgType::Format
                | MsgType::Info
                | MsgType::InfoMultiple
                | MsgType::Parameter
                | MsgType::ParameterDefault => match Record::parse(msg_type, &payload, self.options.text) {
                    Ok(record) => self.apply_definition(record),
                    Err(e) => self.malformed(start, msg_type, &e),
                },
                other => debug!(offset = start, msg_type = ?other, "record ignored in definitions section"),
            }
        }
        Ok(())
    }

    fn apply_definition(&mut self, record: Record<'_>) {
        let md = &mut self.log.metadata;
        match record {
            Record::Format(def) => {
                if let Some(old) = self.log.registry.register(def) {
                    debug!(type_name = %old.name, "format redefined");
                }
            }
            Record::Info(info) => md.add_info(info),
            Record::InfoMultiple { continued, info } => md.add_info_multiple(continued, info),
            Record::Parameter(info) => md.add_initial_parameter(info),
            Record::ParameterDefault { classes, info } => md.add_default_parameter(classes, info),
            _ => {}
        }
    }

    // ── Data phase ───────────────────────────────────────────────────────────

    fn read_data(&mut self, until: Option<u64>) -> Result<(), ULogError> {
        let mut payload = Vec::new();
        loop {
            let start = self.reader.stream_position()?;
            let header = match self.frame(&mut payload, until, OnDamage::Resync)? {
                Framed::Record(h) => h,
                Framed::Recovered => continue,
                Framed::Stop => break,
            };
            let Some(msg_type) = MsgType::from_u8(header.msg_type) else {
                continue;
            };
            match Record::parse(msg_type, &payload, self.options.text) {
                Ok(record) => self.apply_data(start, record),
                Err(e) => self.malformed(start, msg_type, &e),
            }
        }
        Ok(())
    }

    fn apply_data(&mut self, offset: u64, record: Record<'_>) {
        let last_timestamp = self.log.last_timestamp;
        let md = &mut self.log.metadata;
        match record {
            Record::Data { msg_id, sample } => self.apply_sample(offset, msg_id, sample),
            Record::Info(info) => md.add_info(info),
            Record::InfoMultiple { continued, info } => md.add_info_multiple(continued, info),
            Record::Parameter(info) => md.add_changed_parameter(last_timestamp, info),
            Record::ParameterDefault { classes, info } => md.add_default_parameter(classes, info),
            Record::Logging(msg) => md.logged_messages.push(msg),
            Record::LoggingTagged(msg) => md.add_tagged_message(msg),
            Record::Dropout { duration_us } => md.dropouts.push(crate::metadata::Dropout {
                duration_us,
                timestamp: last_timestamp,
            }),
            Record::AddLogged(add) => {
                let (msg_id, name) = (add.msg_id, add.message_name.clone());
                match self.tracker.subscribe(add, &self.log.registry) {
                    Subscribed::Filtered => debug!(msg_id, name = %name, "subscription filtered out"),
                    Subscribed::Registered { discarded_samples: 0 } => {
                        debug!(msg_id, name = %name, "subscribed");
                    }
                    Subscribed::Registered { discarded_samples } => {
                        warn!(msg_id, name = %name, discarded_samples, "subscription id reused, earlier samples dropped");
                    }
                    Subscribed::Rejected(error) => {
                        self.resync.report_mut().unusable_layouts += 1;
                        warn!(msg_id, name = %name, %error, "message layout unusable, samples skipped");
                        self.mark_corrupt(offset, "unusable message layout");
                    }
                }
            }
            Record::Format(def) => {
                self.log.registry.register(def);
            }
            Record::RemoveLogged { msg_id } => debug!(msg_id, "REMOVE-LOGGED-MESSAGE ignored"),
            Record::Sync => {}
            Record::FlagBits(_) => debug!(offset, "FLAG-BITS ignored in data section"),
        }
    }

    fn apply_sample(&mut self, offset: u64, msg_id: u16, sample: &[u8]) {
        let outcome = self.tracker.push_sample(msg_id, sample);
        self.log.last_timestamp = self.log.last_timestamp.max(outcome.timestamp());
        match outcome {
            SampleOutcome::Stored { .. } | SampleOutcome::Filtered | SampleOutcome::Unusable { .. } => {}
            SampleOutcome::SizeMismatch { size, min, max, .. } => {
                self.resync.report_mut().size_mismatches += 1;
                debug!(offset, msg_id, size, min, max, "sample size outside bounds, dropped");
            }
            SampleOutcome::MissingSubscription { first_report, .. } => {
                self.resync.report_mut().missing_samples += 1;
                if first_report {
                    warn!(msg_id, "data for a message id with no subscription");
                }
            }
            SampleOutcome::NoTimestamp { first_report, .. } => {
                if first_report {
                    let name = self.tracker.get(msg_id).map(|s| s.message_name.clone()).unwrap_or_default();
                    warn!(msg_id, name = %name, "message type has no 64-bit timestamp field, samples dropped");
                }
            }
        }
        if outcome.is_corrupt() {
            self.mark_corrupt(offset, "bad data record");
        }
    }

    // ── Bookkeeping ──────────────────────────────────────────────────────────

    fn malformed(&mut self, offset: u64, msg_type: MsgType, error: &PayloadError) {
        self.resync.report_mut().malformed_payloads += 1;
        debug!(offset, msg_type = ?msg_type, %error, "malformed record payload");
        self.mark_corrupt(offset, "malformed record payload");
    }

    fn mark_corrupt(&mut self, offset: u64, reason: &str) {
        if !self.log.file_corrupt {
            warn!(offset, reason, "file corruption detected");
        }
        self.log.file_corrupt = true;
    }

    /// Drain every live subscription into a dataset.
    fn materialize(&mut self) {
        for sub in self.tracker.drain() {
            if sub.buffer().is_empty() {
                continue;
            }
            match Dataset::from_subscription(&sub) {
                Ok(ds) => self.log.datasets.push(ds),
                Err(e) => {
                    warn!(msg_id = sub.msg_id, name = %sub.message_name, error = %e, "dataset dropped");
                    self.log.file_corrupt = true;
                }
            }
        }
        self.log
            .datasets
            .sort_by(|a, b| a.message_name.cmp(&b.message_name).then(a.multi_id.cmp(&b.multi_id)));
    }

    fn finish(self) -> ULog {
        let mut log = self.log;
        log.recovery = self.resync.into_report();
        if log.recovery.syncs_found > 0 {
            log.file_corrupt = true;
        }
        log
    }
}
