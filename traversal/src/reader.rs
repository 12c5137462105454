//! Optimistic record reads.
//!
//! A record is read without locking its page:
//!
//! 1. point the cursor at the record's offset,
//! 2. sum the record's bytes,
//! 3. ask the cursor whether the page was invalidated during the read,
//! 4. if it was, throw the sum away and start over on the same page.
//!
//! Writers are never blocked by readers. In exchange a reader may have to read
//! a record several times under write contention. There is no retry limit: a
//! read only ever returns a sum taken from a single, unchanged version of the
//! page. Errors from the cursor (the page could not be brought back in) are
//! not retried.

use std::io;

use page_cache::PageCursor;
use tracing::warn;

use crate::env_tunables;


/// Outcome of one stable record read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRead {
    /// Sum of the record's bytes.
    pub checksum: u64,
    /// Attempts that were discarded because the page changed under them.
    pub retries: u64,
}

/// Sums the `size` bytes at `offset` of the page `cursor` is positioned on.
pub fn read_record<C: PageCursor + ?Sized>(
    cursor: &mut C,
    offset: usize,
    size: usize,
) -> io::Result<u64> {
    read_record_counting_retries(cursor, offset, size).map(|read| read.checksum)
}

/// Like [`read_record`], also reporting how many attempts were discarded.
pub fn read_record_counting_retries<C: PageCursor + ?Sized>(
    cursor: &mut C,
    offset: usize,
    size: usize,
) -> io::Result<RecordRead> {
    let warn_threshold = *env_tunables::READ_RETRY_WARN_THRESHOLD;
    let mut retries = 0;
    loop {
        cursor.set_offset(offset);
        let mut checksum = 0u64;
        for _ in 0..size {
            checksum += u64::from(cursor.get_byte());
        }
        debug_assert_eq!(cursor.offset(), offset + size, "cursor skipped record bytes");
        if !cursor.should_retry()? {
            return Ok(RecordRead { checksum, retries });
        }
        retries += 1;
        if warn_threshold == Some(retries) {
            warn!(
                retries,
                page_id = ?cursor.current_page_id(),
                offset,
                "record read keeps getting invalidated by concurrent writers"
            );
        }
    }
}
