use std::{
    io::{self, Write},
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use page_cache::{CursorMode, PageCursor, PagedStore};

/// Byte stored at `offset` of page `page_id` of a [`MockStore`].
pub(crate) fn mock_byte(page_id: u64, offset: usize) -> u8 {
    ((page_id * 31 + offset as u64 * 7) % 251) as u8
}

/// Writes a store file of `len` bytes whose byte at position `i` is `byte(i)`.
pub(crate) fn write_store(path: &Path, len: u64, byte: impl Fn(u64) -> u8) {
    let mut file = io::BufWriter::new(std::fs::File::create(path).unwrap());
    for i in 0..len {
        file.write_all(&[byte(i)]).unwrap();
    }
    file.flush().unwrap();
}

#[derive(Default)]
pub(crate) struct MockStats {
    pub(crate) opened: AtomicU64,
    pub(crate) closed: AtomicU64,
    pub(crate) positioned: AtomicU64,
    /// Completed read attempts, counted at each `should_retry`.
    pub(crate) reads: AtomicU64,
}

impl MockStats {
    pub(crate) fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// An in-memory store whose contents are [`mock_byte`], counting cursor activity.
pub(crate) struct MockStore {
    file_page_size: usize,
    file_len: u64,
    pub(crate) stats: Arc<MockStats>,
}

impl MockStore {
    pub(crate) fn new(file_page_size: usize, file_len: u64) -> Self {
        MockStore {
            file_page_size,
            file_len,
            stats: Arc::default(),
        }
    }
}

impl PagedStore for MockStore {
    type Cursor = MockCursor;

    fn file_page_size(&self) -> usize {
        self.file_page_size
    }

    fn file_len(&self) -> u64 {
        self.file_len
    }

    fn open_cursor(&self, page_hint: u64, _mode: CursorMode) -> io::Result<MockCursor> {
        self.stats.opened.fetch_add(1, Ordering::Relaxed);
        Ok(MockCursor {
            file_page_size: self.file_page_size,
            last_page_id: self.last_page_id(),
            next_page_id: page_hint,
            page_id: None,
            offset: 0,
            closed: false,
            stats: Arc::clone(&self.stats),
        })
    }
}

pub(crate) struct MockCursor {
    file_page_size: usize,
    last_page_id: Option<u64>,
    next_page_id: u64,
    page_id: Option<u64>,
    offset: usize,
    closed: bool,
    stats: Arc<MockStats>,
}

impl PageCursor for MockCursor {
    fn next(&mut self) -> io::Result<bool> {
        let page_id = self.next_page_id;
        self.next_page(page_id)
    }

    fn next_page(&mut self, page_id: u64) -> io::Result<bool> {
        assert!(!self.closed, "cursor used after close");
        self.next_page_id = page_id + 1;
        self.offset = 0;
        self.stats.positioned.fetch_add(1, Ordering::Relaxed);
        if self.last_page_id.map_or(true, |last| page_id > last) {
            self.page_id = None;
            return Ok(false);
        }
        self.page_id = Some(page_id);
        Ok(true)
    }

    fn current_page_id(&self) -> Option<u64> {
        self.page_id
    }

    fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn get_byte(&mut self) -> u8 {
        assert!(self.offset < self.file_page_size, "read past the page");
        let byte = self.page_id.map_or(0, |page| mock_byte(page, self.offset));
        self.offset += 1;
        byte
    }

    fn should_retry(&mut self) -> io::Result<bool> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        Ok(false)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.closed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for MockCursor {
    fn drop(&mut self) {
        self.close();
    }
}

/// A single-page cursor where a scripted writer replaces the page contents
/// while a read is in flight.
pub(crate) struct TornPageCursor {
    /// Page contents, one version per writer cycle.
    pub(crate) versions: Vec<Vec<u8>>,
    pub(crate) current: usize,
    /// The writer swaps in the next version after this many bytes of an attempt were read.
    pub(crate) swap_after: Vec<usize>,
    pub(crate) read_in_attempt: usize,
    pub(crate) invalidated: bool,
    pub(crate) attempts: u32,
    pub(crate) offset: usize,
    /// Fail the retry check with an i/o error instead of re-pinning.
    pub(crate) fail_repin: bool,
}

impl TornPageCursor {
    pub(crate) fn new(versions: Vec<Vec<u8>>, swap_after: Vec<usize>) -> Self {
        TornPageCursor {
            versions,
            current: 0,
            swap_after,
            read_in_attempt: 0,
            invalidated: false,
            attempts: 0,
            offset: 0,
            fail_repin: false,
        }
    }
}

impl PageCursor for TornPageCursor {
    fn next(&mut self) -> io::Result<bool> {
        Ok(true)
    }

    fn next_page(&mut self, _page_id: u64) -> io::Result<bool> {
        Ok(true)
    }

    fn current_page_id(&self) -> Option<u64> {
        Some(0)
    }

    fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn get_byte(&mut self) -> u8 {
        let byte = self.versions[self.current][self.offset];
        self.offset += 1;
        self.read_in_attempt += 1;
        let attempt = self.attempts as usize;
        if self.swap_after.get(attempt) == Some(&self.read_in_attempt)
            && self.current + 1 < self.versions.len()
        {
            self.current += 1;
            self.invalidated = true;
        }
        byte
    }

    fn should_retry(&mut self) -> io::Result<bool> {
        self.attempts += 1;
        self.read_in_attempt = 0;
        if !std::mem::take(&mut self.invalidated) {
            return Ok(false);
        }
        if self.fail_repin {
            return Err(io::Error::new(io::ErrorKind::Other, "page could not be re-pinned"));
        }
        Ok(true)
    }

    fn close(&mut self) {}
}
