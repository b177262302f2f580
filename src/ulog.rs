//! High-level [`ULog`] API: the decoded in-memory model of one log file.
//!
//! ```no_run
//! use ulog::{ULog, ReaderOptions};
//!
//! let log = ULog::open("flight.ulg", &ReaderOptions::default())?;
//! if let Some(att) = log.dataset("vehicle_attitude", 0) {
//!     println!("{} attitude samples", att.len());
//! }
//! log.write_file("rewritten.ulg")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::dataset::Dataset;
use crate::format::TypeRegistry;
use crate::header::{FileHeader, FlagBits, HeaderError};
use crate::io_stream::{write_ulog, ULogReader};
use crate::metadata::{InfoValue, Metadata, TypedValue};
use crate::recovery::RecoveryReport;
use crate::text::TextDecoding;

#[derive(Error, Debug)]
pub enum ULogError {
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── ReaderOptions ─────────────────────────────────────────────────────────────

/// Configuration for [`ULog::open`] and [`ULog::read_from`].
#[derive(Debug, Clone, Default)]
pub struct ReaderOptions {
    /// When set, only messages with these names are subscribed.  Samples of
    /// every other message are skipped without being counted as corruption.
    pub message_filter: Option<Vec<String>>,
    pub text:           TextDecoding,
    /// Stop after the definitions section: no datasets, logs or dropouts.
    pub header_only:    bool,
}

// ── ULog ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ULog {
    pub header:         FileHeader,
    pub flags:          FlagBits,
    /// Offset of the first data-section record.
    pub header_end:     u64,
    pub registry:       TypeRegistry,
    pub metadata:       Metadata,
    /// Ordered by (message name, multi id).
    pub datasets:       Vec<Dataset>,
    /// Highest sample timestamp seen; starts at the header's start timestamp.
    pub last_timestamp: u64,
    /// Set once any damage was detected.  Datasets remain usable but may be
    /// incomplete.
    pub file_corrupt:   bool,
    pub recovery:       RecoveryReport,
}

impl ULog {
    // ── Loading ──────────────────────────────────────────────────────────────

    /// Load a log file.  The file is closed before this returns.
    pub fn open<P: AsRef<Path>>(path: P, options: &ReaderOptions) -> Result<Self, ULogError> {
        let file = File::open(path)?;
        Self::read_from(BufReader::new(file), options)
    }

    pub fn read_from<R: Read + Seek>(reader: R, options: &ReaderOptions) -> Result<Self, ULogError> {
        ULogReader::new(reader, options.clone()).read()
    }

    pub fn from_bytes(bytes: &[u8], options: &ReaderOptions) -> Result<Self, ULogError> {
        Self::read_from(Cursor::new(bytes), options)
    }

    // ── Writing ──────────────────────────────────────────────────────────────

    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), ULogError> {
        write_ulog(self, writer)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ULogError> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ULogError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn version(&self) -> u8 {
        self.header.version
    }

    pub fn start_timestamp(&self) -> u64 {
        self.header.start_timestamp
    }

    pub fn dataset(&self, name: &str, multi_id: u8) -> Option<&Dataset> {
        self.datasets
            .iter()
            .find(|d| d.message_name == name && d.multi_id == multi_id)
    }

    pub fn has_default_parameters(&self) -> bool {
        self.flags.has_default_parameters()
    }

    pub fn has_data_appended(&self) -> bool {
        self.flags.has_data_appended()
    }

    pub fn default_parameters(&self, class: u8) -> Option<&BTreeMap<String, TypedValue>> {
        self.metadata.default_parameters.get(&class)
    }

    /// Unpack a version word stored under INFO `key` as
    /// `[major, minor, patch, type]`.
    pub fn version_info(&self, key: &str) -> Option<[u8; 4]> {
        let word = match &self.metadata.info.get(key)?.value {
            InfoValue::Scalar(v) => {
                let v = v.as_i64()?;
                u32::try_from(v).ok().or_else(|| i32::try_from(v).ok().map(|x| x as u32))?
            }
            InfoValue::Text(s) => s.trim().parse::<i32>().ok()? as u32,
            InfoValue::Bytes(_) => return None,
        };
        Some(word.to_be_bytes())
    }

    /// `v1.13.0 (beta)` style rendering of [`Self::version_info`].  `None`
    /// for development builds (type below 64).
    pub fn version_info_str(&self, key: &str) -> Option<String> {
        let [major, minor, patch, kind] = self.version_info(key)?;
        let suffix = match kind {
            0..=63    => return None,
            64..=127  => " (alpha)",
            128..=191 => " (beta)",
            192..=254 => " (RC)",
            255       => "",
        };
        Some(format!("v{major}.{minor}.{patch}{suffix}"))
    }

    pub fn summary(&self) -> Summary<'_> {
        Summary {
            version:            self.header.version,
            start_timestamp:    self.header.start_timestamp,
            last_timestamp:     self.last_timestamp,
            compat_flags:       hex::encode(self.flags.compat_flags),
            incompat_flags:     hex::encode(self.flags.incompat_flags),
            appended_offsets:   &self.flags.appended_offsets,
            file_corrupt:       self.file_corrupt,
            recovery:           &self.recovery,
            info:               &self.metadata.info,
            parameter_count:    self.metadata.initial_parameters.len(),
            changed_parameters: self.metadata.changed_parameters.len(),
            logged_messages:    self.metadata.logged_messages.len(),
            tagged_messages:    self.metadata.tagged_messages.values().map(Vec::len).sum(),
            dropouts:           self.metadata.dropouts.len(),
            datasets:           self.datasets.iter().map(DatasetSummary::from).collect(),
        }
    }
}

// ── Summary ───────────────────────────────────────────────────────────────────

/// Compact, serializable overview of a loaded log.
#[derive(Debug, Serialize)]
pub struct Summary<'a> {
    pub version:            u8,
    pub start_timestamp:    u64,
    pub last_timestamp:     u64,
    pub compat_flags:       String,
    pub incompat_flags:     String,
    pub appended_offsets:   &'a [u64],
    pub file_corrupt:       bool,
    pub recovery:           &'a RecoveryReport,
    pub info:               &'a BTreeMap<String, TypedValue>,
    pub parameter_count:    usize,
    pub changed_parameters: usize,
    pub logged_messages:    usize,
    pub tagged_messages:    usize,
    pub dropouts:           usize,
    pub datasets:           Vec<DatasetSummary<'a>>,
}

#[derive(Debug, Serialize)]
pub struct DatasetSummary<'a> {
    pub name:     &'a str,
    pub multi_id: u8,
    pub msg_id:   u16,
    pub samples:  usize,
    pub fields:   usize,
}

impl<'a> From<&'a Dataset> for DatasetSummary<'a> {
    fn from(d: &'a Dataset) -> Self {
        DatasetSummary {
            name:     &d.message_name,
            multi_id: d.multi_id,
            msg_id:   d.msg_id,
            samples:  d.len(),
            fields:   d.fields.len(),
        }
    }
}
