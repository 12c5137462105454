//! A small page cache that maps files into a fixed pool of in-memory frames.
//!
//! # Usage
//!
//! 1. Create a [`PageCache`] with a frame budget and a page size.
//! 2. [`PageCache::map`] a file to get a [`PagedFile`].
//! 3. Open a [`Cursor`] on the file through the [`PagedStore`] trait and
//!    position it with [`PageCursor::next`] or [`PageCursor::next_page`].
//! 4. Read bytes, then ask [`PageCursor::should_retry`] whether the read was stable.
//!
//! Read cursors never take a lock. Every frame carries a stamp that writers
//! (page faults, evictions, write cursors) advance on each exclusive
//! lock/unlock cycle. A read cursor remembers the stamp it saw when it was
//! positioned; `should_retry` reports whether it changed since, in which case
//! the bytes read in between may be torn and must be read again.
//!
//! ```rust
//! use std::io::Write;
//! use page_cache::{CursorMode, PageCache, PageCursor, PagedStore};
//!
//! let mut file = tempfile::NamedTempFile::new().unwrap();
//! file.write_all(&[7u8; 64]).unwrap();
//!
//! let cache = PageCache::new(4, 32).unwrap();
//! let paged = cache.map(file.path(), 32).unwrap();
//! let mut cursor = paged.open_cursor(1, CursorMode::SharedRead).unwrap();
//! assert!(cursor.next().unwrap());
//! let sum = loop {
//!     cursor.set_offset(0);
//!     let sum: u64 = (0..32).map(|_| u64::from(cursor.get_byte())).sum();
//!     if !cursor.should_retry().unwrap() {
//!         break sum;
//!     }
//! };
//! assert_eq!(sum, 7 * 32);
//! ```

mod cache;
mod cursor;
mod frame;
mod metrics;
mod paged_file;

pub use cache::PageCache;
pub use cursor::{Cursor, CursorMode, PageCursor};
pub use metrics::Metrics;
pub use paged_file::{PagedFile, PagedStore};
