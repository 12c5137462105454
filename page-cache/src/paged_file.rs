use std::{
    fs::File,
    io,
    os::unix::fs::FileExt,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, PoisonError, RwLock, RwLockReadGuard,
    },
};

use tracing::{debug, warn};

use crate::{
    cache::CacheInner,
    cursor::{Cursor, CursorMode, PageCursor},
    frame::{self, Frame},
};

/// A store of fixed-size pages that hands out [`PageCursor`]s.
///
/// This is the capability record-level code is written against; [`PagedFile`]
/// is the implementation backed by a [`crate::PageCache`].
pub trait PagedStore {
    type Cursor: PageCursor;

    fn file_page_size(&self) -> usize;

    /// Current length of the underlying file in bytes, re-read on every call.
    fn file_len(&self) -> u64;

    /// Index of the last page, or `None` if the file is empty.
    ///
    /// Derived from the current file length on every call.
    fn last_page_id(&self) -> Option<u64> {
        match self.file_len() {
            0 => None,
            len => Some((len - 1) / self.file_page_size() as u64),
        }
    }

    /// Number of whole records of `record_size` bytes in the file.
    fn records_count(&self, record_size: usize) -> u64 {
        self.file_len() / record_size as u64
    }

    /// Opens a cursor whose first [`PageCursor::next`] positions it at `page_hint`.
    fn open_cursor(&self, page_hint: u64, mode: CursorMode) -> io::Result<Self::Cursor>;
}

/// A file mapped into a [`crate::PageCache`]. Cloning is cheap.
///
/// When the last handle (including cursors) goes away, dirty pages are
/// written back and the file's frames return to the cache's free list.
#[derive(Clone)]
pub struct PagedFile {
    inner: Arc<FileInner>,
}

pub(crate) struct FileInner {
    pub(crate) id: u32,
    path: PathBuf,
    file: File,
    pub(crate) file_page_size: usize,
    // extent as of the last stat; the translation table always covers it
    file_len: AtomicU64,
    // page id -> frame index + 1, zero while the page is not resident
    translation: RwLock<Box<[AtomicUsize]>>,
    pub(crate) cache: Arc<CacheInner>,
}

impl PagedFile {
    pub(crate) fn new(inner: Arc<FileInner>) -> Self {
        PagedFile { inner }
    }

    /// Writes every dirty resident page back to the file and syncs it.
    pub fn flush(&self) -> io::Result<()> {
        self.inner.flush()?;
        self.inner.file.sync_data()
    }
}

impl PagedStore for PagedFile {
    type Cursor = Cursor;

    fn file_page_size(&self) -> usize {
        self.inner.file_page_size
    }

    fn file_len(&self) -> u64 {
        self.inner.file_len()
    }

    fn open_cursor(&self, page_hint: u64, mode: CursorMode) -> io::Result<Cursor> {
        Ok(Cursor::new(Arc::clone(&self.inner), page_hint, mode))
    }
}

impl FileInner {
    pub(crate) fn new(
        id: u32,
        path: PathBuf,
        file: File,
        file_page_size: usize,
        cache: Arc<CacheInner>,
    ) -> io::Result<Self> {
        let file_len = file.metadata()?.len();
        if page_count(file_len, file_page_size) > frame::MAX_PAGE_ID {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{path:?} has too many pages for the page cache"),
            ));
        }
        let inner = FileInner {
            id,
            path,
            file,
            file_page_size,
            file_len: AtomicU64::new(0),
            translation: RwLock::new(Box::default()),
            cache,
        };
        inner.set_extent(file_len)?;
        Ok(inner)
    }

    /// Stats the file and adopts its current length as the extent.
    ///
    /// If the stat fails the last known extent is kept.
    pub(crate) fn file_len(&self) -> u64 {
        let refreshed = self
            .file
            .metadata()
            .and_then(|md| self.set_extent(md.len()).map(|()| md.len()));
        match refreshed {
            Ok(len) => len,
            Err(e) => {
                warn!(path = ?self.path, "keeping last known file length: {e}");
                self.file_len.load(Ordering::Relaxed)
            }
        }
    }

    /// Grows the translation table to cover `len` bytes, then publishes `len`.
    fn set_extent(&self, len: u64) -> io::Result<()> {
        let pages = page_count(len, self.file_page_size).min(frame::MAX_PAGE_ID);
        let pages = usize::try_from(pages).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "page count exceeds address space")
        })?;
        if self.translation_table().len() < pages {
            let mut table = self.translation.write().unwrap_or_else(PoisonError::into_inner);
            if table.len() < pages {
                // slots only change under the read lock, so the copy is exact
                *table = table
                    .iter()
                    .map(|slot| AtomicUsize::new(slot.load(Ordering::Relaxed)))
                    .chain(std::iter::repeat_with(|| AtomicUsize::new(0)))
                    .take(pages)
                    .collect();
            }
        }
        let len = len.min((pages as u64).saturating_mul(self.file_page_size as u64));
        self.file_len.store(len, Ordering::Release);
        Ok(())
    }

    fn translation_table(&self) -> RwLockReadGuard<'_, Box<[AtomicUsize]>> {
        self.translation.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// True if `page_id` lies within the file. A page past the last known
    /// extent makes the file be stat-ed again, so pages appended after the
    /// file was mapped are found.
    pub(crate) fn contains(&self, page_id: u64) -> bool {
        let within = |len: u64| page_id < page_count(len, self.file_page_size);
        within(self.file_len.load(Ordering::Acquire)) || within(self.file_len())
    }

    pub(crate) fn translation(&self, page_id: u64) -> Option<usize> {
        let table = self.translation_table();
        let slot = table.get(usize::try_from(page_id).ok()?)?;
        slot.load(Ordering::Acquire).checked_sub(1)
    }

    pub(crate) fn set_translation(&self, page_id: u64, frame: usize) {
        self.translation_table()[page_id as usize].store(frame + 1, Ordering::Release);
    }

    pub(crate) fn clear_translation(&self, page_id: u64) {
        self.translation_table()[page_id as usize].store(0, Ordering::Release);
    }

    fn page_start(&self, page_id: u64) -> u64 {
        page_id * self.file_page_size as u64
    }

    /// Reads a page into `frame`. Bytes past the end of the file read as zero.
    pub(crate) fn read_page(&self, page_id: u64, frame: &Frame) -> io::Result<()> {
        let start = self.page_start(page_id);
        let mut buf = vec![0u8; self.file_page_size];
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read_at(&mut buf[filled..], start + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        frame.fill(&buf);
        Ok(())
    }

    /// Writes back the part of a page that lies within the file.
    pub(crate) fn write_page(&self, page_id: u64, frame: &Frame) -> io::Result<()> {
        let start = self.page_start(page_id);
        let len = self
            .file_len
            .load(Ordering::Acquire)
            .saturating_sub(start)
            .min(self.file_page_size as u64);
        let mut buf = vec![0u8; len as usize];
        frame.copy_to(&mut buf);
        self.file.write_all_at(&buf, start)
    }

    fn flush(&self) -> io::Result<()> {
        let pages = self.translation_table().len() as u64;
        for page_id in 0..pages {
            let Some(idx) = self.translation(page_id) else {
                continue;
            };
            let frame = &self.cache.frames[idx];
            if !frame.is_dirty() {
                continue;
            }
            frame.lock_exclusive();
            let _unlock = scopeguard::guard((), |()| frame.unlock_exclusive());
            // an eviction may have written it back and rebound the frame meanwhile
            if frame.binding() == frame::binding(self.id, page_id) && frame.take_dirty() {
                if let Err(e) = self.write_page(page_id, frame) {
                    frame.mark_dirty();
                    return Err(e);
                }
                self.cache.metrics.flushes.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Drop for FileInner {
    fn drop(&mut self) {
        let mut state = self.cache.lock_faults();
        state.files.remove(&self.id);
        let table = std::mem::take(
            self.translation
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (page_id, slot) in (0u64..).zip(table.iter()) {
            let Some(idx) = slot.load(Ordering::Acquire).checked_sub(1) else {
                continue;
            };
            let frame = &self.cache.frames[idx];
            frame.lock_exclusive();
            if frame.binding() == frame::binding(self.id, page_id) {
                if frame.take_dirty() {
                    match self.write_page(page_id, frame) {
                        Ok(()) => {
                            self.cache.metrics.flushes.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => warn!(path = ?self.path, page_id, "dropping unflushed page: {e}"),
                    }
                }
                frame.unbind();
                state.free.push(idx);
            }
            frame.unlock_exclusive();
        }
        debug!(path = ?self.path, id = self.id, "unmapped file");
    }
}

fn page_count(len: u64, file_page_size: usize) -> u64 {
    len.div_ceil(file_page_size as u64)
}
