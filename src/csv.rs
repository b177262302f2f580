//! CSV export: one file per dataset.
//!
//! Files are named `<prefix>_<message>_<multi_id>.csv` with `/` in message
//! names replaced by `_`.  The `timestamp` column comes first, then every
//! other field in resolved order.  Datasets are immutable once loaded, so
//! with the `parallel` feature they are exported concurrently with Rayon.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::ops::Range;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, warn};

use crate::dataset::Dataset;
use crate::format::TIMESTAMP_FIELD;

const MICROS_PER_SECOND: u64 = 1_000_000;

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("IO error writing {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: char,
    /// Window start in seconds of log time; rows before it are skipped.
    pub start_s:   Option<u64>,
    /// Window end in seconds, exclusive.
    pub end_s:     Option<u64>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self { delimiter: ',', start_s: None, end_s: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Written { path: PathBuf, rows: usize },
    Skipped { path: PathBuf, reason: &'static str },
}

pub fn csv_path(prefix: &str, ds: &Dataset) -> PathBuf {
    PathBuf::from(format!("{}_{}_{}.csv", prefix, ds.message_name.replace('/', "_"), ds.multi_id))
}

/// Sample index range `[start, end)` covered by the options' time window.
/// `None` when the window is empty.
pub fn window(timestamps: &[u64], opts: &CsvOptions) -> Option<Range<usize>> {
    let index_for = |seconds: u64| {
        let target = seconds.saturating_mul(MICROS_PER_SECOND);
        timestamps.iter().position(|&t| t >= target).unwrap_or(timestamps.len())
    };
    let start = opts.start_s.filter(|&s| s > 0).map_or(0, index_for);
    let end = opts.end_s.filter(|&s| s > 0).map_or(timestamps.len(), index_for);
    (start < end).then_some(start..end)
}

/// Write one dataset as CSV.  Returns the number of data rows.
pub fn write_dataset<W: Write>(ds: &Dataset, rows: Range<usize>, delimiter: char, mut writer: W) -> io::Result<usize> {
    let columns: Vec<_> = ds
        .columns()
        .filter(|(f, _)| f.name == TIMESTAMP_FIELD)
        .chain(ds.columns().filter(|(f, _)| f.name != TIMESTAMP_FIELD))
        .collect();

    let sep = delimiter.to_string();
    let header: Vec<&str> = columns.iter().map(|(f, _)| f.name.as_str()).collect();
    writeln!(writer, "{}", header.join(sep.as_str()))?;

    let mut line = String::new();
    for i in rows.clone() {
        line.clear();
        for (k, (_, values)) in columns.iter().enumerate() {
            if k > 0 {
                line.push(delimiter);
            }
            if let Some(v) = values.get(i) {
                line.push_str(&v.to_string());
            }
        }
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(rows.len())
}

fn export_one(ds: &Dataset, prefix: &str, opts: &CsvOptions) -> Result<ExportOutcome, CsvError> {
    let path = csv_path(prefix, ds);
    let timestamps = match ds.timestamps() {
        Ok(ts) if !ts.is_empty() => ts,
        _ => {
            warn!(path = %path.display(), "no timestamp data, skipped");
            return Ok(ExportOutcome::Skipped { path, reason: "no timestamp data" });
        }
    };
    let Some(rows) = window(&timestamps, opts) else {
        warn!(path = %path.display(), "empty time window, skipped");
        return Ok(ExportOutcome::Skipped { path, reason: "empty time window" });
    };

    let written = File::create(&path)
        .and_then(|f| write_dataset(ds, rows, opts.delimiter, BufWriter::new(f)));
    match written {
        Ok(rows) => {
            debug!(path = %path.display(), rows, "csv written");
            Ok(ExportOutcome::Written { path, rows })
        }
        Err(source) => Err(CsvError::Io { path, source }),
    }
}

/// Export every dataset.  The first I/O error is returned; outcomes are in
/// dataset order.
pub fn export_all(datasets: &[Dataset], prefix: &str, opts: &CsvOptions) -> Result<Vec<ExportOutcome>, CsvError> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        let results: Vec<Result<ExportOutcome, CsvError>> = datasets
            .par_iter()
            .map(|ds| export_one(ds, prefix, opts))
            .collect();
        results.into_iter().collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        datasets.iter().map(|ds| export_one(ds, prefix, opts)).collect()
    }
}
