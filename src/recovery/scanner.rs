//! Sync-marker scanner.
//!
//! The sync marker is never framed as a record: it is found only by a content
//! scan.  Two modes:
//!
//! | Mode | Window |
//! |------|--------|
//! | `Bounded(n)` | the `n` bytes before the cursor, one chunk of at most 512 bytes |
//! | `Unbounded`  | cursor to end of stream, 512-byte chunks overlapping by 7 bytes |
//!
//! The overlap is `SYNC_MAGIC.len() - 1`, so a marker straddling two chunks
//! is still seen whole in the second one.

use std::io::{self, Read, Seek, SeekFrom};

use crate::record::read_full;

/// Fixed 8-byte synchronization marker.
pub const SYNC_MAGIC: [u8; 8] = [0x2F, 0x73, 0x13, 0x20, 0x25, 0x0C, 0xBB, 0x12];
pub const SEARCH_CHUNK_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSearch {
    /// Scan the `n` bytes preceding the cursor, without wraparound.
    Bounded(u64),
    /// Scan forward to the end of the stream.
    Unbounded,
}

/// Search for the sync marker.
///
/// On success the cursor is left immediately after the marker and that
/// offset is returned.  On failure the cursor is restored to where the
/// search began.
pub fn find_sync<R: Read + Seek>(reader: &mut R, mode: SyncSearch) -> io::Result<Option<u64>> {
    let start = reader.stream_position()?;
    let (mut pos, chunk_len) = match mode {
        SyncSearch::Bounded(n) => (start.saturating_sub(n), n.min(SEARCH_CHUNK_SIZE as u64) as usize),
        SyncSearch::Unbounded => (start, SEARCH_CHUNK_SIZE),
    };
    reader.seek(SeekFrom::Start(pos))?;

    let mut chunk = vec![0u8; chunk_len];
    loop {
        let got = read_full(reader, &mut chunk)?;
        if got < SYNC_MAGIC.len() {
            break;
        }
        if let Some(i) = find_marker(&chunk[..got]) {
            let resume = pos + (i + SYNC_MAGIC.len()) as u64;
            reader.seek(SeekFrom::Start(resume))?;
            return Ok(Some(resume));
        }
        if let SyncSearch::Bounded(_) = mode {
            break;
        }
        pos += (got - (SYNC_MAGIC.len() - 1)) as u64;
        reader.seek(SeekFrom::Start(pos))?;
    }

    reader.seek(SeekFrom::Start(start))?;
    Ok(None)
}

/// Index of the first marker fully contained in `haystack`.
pub fn find_marker(haystack: &[u8]) -> Option<usize> {
    haystack.windows(SYNC_MAGIC.len()).position(|w| w == SYNC_MAGIC)
}
