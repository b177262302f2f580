//! Corruption detection and resynchronization.
//!
//! A record header is *implausible* when its type is zero or its size is zero
//! or above 10 000 bytes.  The reader then cannot trust the header's size to
//! find the next record, so it steps one byte past the header start and scans
//! forward for the sync marker.  A plausible header with an unknown type is
//! presumed to have a correct size; only its own payload is searched.
//!
//! The first unbounded search that reaches end of stream without a marker
//! disables resync for the rest of the load.  Framing then free-runs.

pub mod scanner;

use std::io::{self, Read, Seek, SeekFrom};

use serde::Serialize;
use tracing::{debug, warn};

use crate::record::{MsgType, RecordHeader};
pub use scanner::{find_marker, find_sync, SyncSearch, SEARCH_CHUNK_SIZE, SYNC_MAGIC};

/// Why a record could not be framed or dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Damage {
    /// Zero type, zero size, or size above the plausibility ceiling.
    Implausible,
    /// Plausible header, unrecognized type tag.
    UnknownType,
}

impl Damage {
    pub fn classify(header: &RecordHeader) -> Option<Self> {
        if !header.is_plausible() {
            Some(Damage::Implausible)
        } else if MsgType::from_u8(header.msg_type).is_none() {
            Some(Damage::UnknownType)
        } else {
            None
        }
    }
}

/// Outcome of one recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Cursor sits right after a sync marker ending at `offset`.
    Resynced { offset: u64 },
    /// No marker in the searched window; cursor restored.
    NotFound,
    /// Resync was disabled by an earlier failed unbounded search.
    Disabled,
}

/// Running tally of corruption seen during one load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub implausible_headers: usize,
    pub unknown_types:       usize,
    pub malformed_payloads:  usize,
    pub unusable_layouts:    usize,
    pub size_mismatches:     usize,
    pub missing_samples:     usize,
    pub syncs_found:         usize,
    pub resync_disabled:     bool,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} implausible header(s), {} unknown type(s), {} malformed payload(s), \
             {} unusable layout(s), {} size mismatch(es), {} orphan sample(s), {} resync(s){}",
            self.implausible_headers,
            self.unknown_types,
            self.malformed_payloads,
            self.unusable_layouts,
            self.size_mismatches,
            self.missing_samples,
            self.syncs_found,
            if self.resync_disabled { ", resync disabled" } else { "" },
        )
    }
}

/// Per-stream resync state.
#[derive(Debug)]
pub struct Resync {
    enabled: bool,
    report:  RecoveryReport,
}

impl Default for Resync {
    fn default() -> Self {
        Self { enabled: true, report: RecoveryReport::default() }
    }
}

impl Resync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self) -> &RecoveryReport {
        &self.report
    }

    pub fn report_mut(&mut self) -> &mut RecoveryReport {
        &mut self.report
    }

    pub fn into_report(self) -> RecoveryReport {
        self.report
    }

    /// Count a damaged record without searching for a marker.
    pub fn note(&mut self, damage: Damage) {
        match damage {
            Damage::Implausible => self.report.implausible_headers += 1,
            Damage::UnknownType => self.report.unknown_types += 1,
        }
    }

    /// Handle a damaged record whose header started at `header_start`.
    ///
    /// For `Implausible` the cursor is first moved to `header_start + 1`
    /// whether or not a search runs.  For `UnknownType` the cursor must sit
    /// just past the payload.
    pub fn recover<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        damage: Damage,
        header: &RecordHeader,
        header_start: u64,
    ) -> io::Result<Recovery> {
        self.note(damage);
        let mode = match damage {
            Damage::Implausible => {
                reader.seek(SeekFrom::Start(header_start + 1))?;
                SyncSearch::Unbounded
            }
            Damage::UnknownType => SyncSearch::Bounded(header.size as u64),
        };
        if !self.enabled {
            return Ok(Recovery::Disabled);
        }

        match find_sync(reader, mode)? {
            Some(offset) => {
                self.report.syncs_found += 1;
                debug!(offset, ?damage, "resynchronized after sync marker");
                Ok(Recovery::Resynced { offset })
            }
            None if mode == SyncSearch::Unbounded => {
                self.enabled = false;
                self.report.resync_disabled = true;
                warn!(from = header_start + 1, "no sync marker before end of stream, resync disabled");
                Ok(Recovery::NotFound)
            }
            None => {
                debug!(header_start, size = header.size, "no sync marker inside unknown record");
                Ok(Recovery::NotFound)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn classify_headers() {
        assert_eq!(Damage::classify(&RecordHeader { size: 0, msg_type: b'D' }), Some(Damage::Implausible));
        assert_eq!(Damage::classify(&RecordHeader { size: 10_001, msg_type: b'D' }), Some(Damage::Implausible));
        assert_eq!(Damage::classify(&RecordHeader { size: 12, msg_type: b'x' }), Some(Damage::UnknownType));
        assert_eq!(Damage::classify(&RecordHeader { size: 12, msg_type: b'D' }), None);
    }

    #[test]
    fn implausible_header_resyncs_past_marker() {
        let mut bytes = vec![0u8, 0, b'D', 0xEE, 0xEE];
        bytes.extend_from_slice(&SYNC_MAGIC);
        bytes.extend_from_slice(&[1, 0, b'O']);
        let mut cur = Cursor::new(bytes);
        cur.set_position(3);

        let mut resync = Resync::new();
        let hdr = RecordHeader { size: 0, msg_type: b'D' };
        let out = resync.recover(&mut cur, Damage::Implausible, &hdr, 0).unwrap();
        assert_eq!(out, Recovery::Resynced { offset: 13 });
        assert_eq!(cur.position(), 13);
        assert_eq!(resync.report().syncs_found, 1);
        assert!(!resync.report().resync_disabled);
    }

    #[test]
    fn failed_unbounded_search_disables_resync() {
        let mut cur = Cursor::new(vec![0u8; 64]);
        cur.set_position(3);
        let hdr = RecordHeader { size: 0, msg_type: 0 };

        let mut resync = Resync::new();
        assert_eq!(resync.recover(&mut cur, Damage::Implausible, &hdr, 0).unwrap(), Recovery::NotFound);
        assert_eq!(cur.position(), 1);
        assert!(resync.report().resync_disabled);

        cur.set_position(10);
        assert_eq!(resync.recover(&mut cur, Damage::Implausible, &hdr, 9).unwrap(), Recovery::Disabled);
        assert_eq!(cur.position(), 10);
        assert_eq!(resync.report().implausible_headers, 2);
        assert!(resync.report().resync_disabled);
    }

    #[test]
    fn failed_bounded_search_keeps_resync_enabled() {
        let mut cur = Cursor::new(vec![4u8, 0, b'?', 1, 2, 3, 4, 9, 9]);
        cur.set_position(7);
        let hdr = RecordHeader { size: 4, msg_type: b'?' };

        let mut resync = Resync::new();
        assert_eq!(resync.recover(&mut cur, Damage::UnknownType, &hdr, 0).unwrap(), Recovery::NotFound);
        assert_eq!(cur.position(), 7);
        assert!(!resync.report().resync_disabled);
        assert!(!resync.report().is_clean());
    }

    #[test]
    fn noted_damage_is_counted_without_moving() {
        let mut resync = Resync::new();
        resync.note(Damage::Implausible);
        resync.note(Damage::UnknownType);
        assert_eq!(resync.report().implausible_headers, 1);
        assert_eq!(resync.report().unknown_types, 1);
        assert_eq!(resync.report().syncs_found, 0);
        assert!(!resync.report().resync_disabled);
    }
}
