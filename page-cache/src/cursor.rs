use std::{cell::Cell, io, marker::PhantomData, sync::Arc};

use crossbeam_utils::Backoff;

use crate::{frame, paged_file::FileInner};

/// How a [`Cursor`] accesses the pages it is positioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    /// Optimistic, lock-free reads that must be validated with [`PageCursor::should_retry`].
    SharedRead,
    /// Holds the page's exclusive lock while positioned on it.
    SharedWrite,
}

/// A positioned handle for reading bytes from one page at a time.
///
/// The bytes observed between positioning the cursor and calling
/// [`should_retry`](PageCursor::should_retry) are only meaningful if that
/// call returns `Ok(false)`.
pub trait PageCursor {
    /// Positions the cursor on its next page: the hint it was opened with,
    /// then the page after the current one.
    fn next(&mut self) -> io::Result<bool>;

    /// Positions the cursor on `page_id`.
    ///
    /// Returns `Ok(false)` if the page lies beyond the end of the store; the
    /// cursor is then unpositioned and reads yield zero.
    fn next_page(&mut self, page_id: u64) -> io::Result<bool>;

    fn current_page_id(&self) -> Option<u64>;

    fn set_offset(&mut self, offset: usize);

    fn offset(&self) -> usize;

    /// Reads the byte at the current offset and advances the offset by one.
    fn get_byte(&mut self) -> u8;

    /// True if the page may have changed since the cursor was positioned.
    ///
    /// When it returns `Ok(true)`, the cursor has already been re-positioned on
    /// the same page and the read should be repeated. Errors mean the page could
    /// not be brought back in and are not a reason to retry.
    fn should_retry(&mut self) -> io::Result<bool>;

    /// Releases the cursor. Idempotent.
    fn close(&mut self);

    /// Copies `buf.len()` bytes starting at `offset` into `buf`.
    fn read_bytes(&mut self, offset: usize, buf: &mut [u8]) {
        self.set_offset(offset);
        for byte in buf.iter_mut() {
            *byte = self.get_byte();
        }
    }
}

#[derive(Clone, Copy)]
struct Pinned {
    page_id: u64,
    frame: usize,
    stamp: u64,
}

/// Cursor over a [`crate::PagedFile`].
///
/// Closing or dropping the cursor releases its page and its hold on the file,
/// so a closed cursor does not keep the file mapped.
///
/// A cursor belongs to one thread at a time:
///
/// ```compile_fail
/// fn shared<T: Sync>() {}
/// shared::<page_cache::Cursor>();
/// ```
pub struct Cursor {
    // `None` once closed
    file: Option<Arc<FileInner>>,
    mode: CursorMode,
    next_page_id: u64,
    pinned: Option<Pinned>,
    offset: usize,
    _not_sync: PhantomData<Cell<()>>,
}

impl Cursor {
    pub(crate) fn new(file: Arc<FileInner>, page_hint: u64, mode: CursorMode) -> Self {
        Cursor {
            file: Some(file),
            mode,
            next_page_id: page_hint,
            pinned: None,
            offset: 0,
            _not_sync: PhantomData,
        }
    }

    /// Writes `value` at the current offset and advances the offset by one.
    pub fn put_byte(&mut self, value: u8) -> io::Result<()> {
        if self.mode != CursorMode::SharedWrite {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cursor was opened for shared reads",
            ));
        }
        let file = self.open_file()?;
        let Some(pinned) = self.pinned else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cursor is not positioned on a page",
            ));
        };
        if self.offset >= file.file_page_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "offset {} outside page of {} bytes",
                    self.offset, file.file_page_size
                ),
            ));
        }
        let frame = &file.cache.frames[pinned.frame];
        frame.put(self.offset, value);
        frame.mark_dirty();
        self.offset += 1;
        Ok(())
    }

    fn open_file(&self) -> io::Result<&Arc<FileInner>> {
        self.file
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "cursor is closed"))
    }

    fn pin(&mut self, page_id: u64) -> io::Result<()> {
        let file = Arc::clone(self.open_file()?);
        let expected = frame::binding(file.id, page_id);
        let backoff = Backoff::new();
        loop {
            let idx = match file.translation(page_id) {
                Some(idx) => idx,
                None => file.cache.fault(&file, page_id)?,
            };
            let frame = &file.cache.frames[idx];
            let stamp = match self.mode {
                CursorMode::SharedRead => frame.optimistic_stamp(),
                CursorMode::SharedWrite => frame.try_lock_exclusive(),
            };
            let Some(stamp) = stamp else {
                backoff.snooze();
                continue;
            };
            if frame.binding() != expected {
                // evicted between the translation lookup and taking the stamp
                if self.mode == CursorMode::SharedWrite {
                    frame.unlock_exclusive();
                }
                continue;
            }
            frame.touch();
            self.pinned = Some(Pinned {
                page_id,
                frame: idx,
                stamp,
            });
            return Ok(());
        }
    }

    fn unpin(&mut self) {
        if let (Some(pinned), Some(file)) = (self.pinned.take(), &self.file) {
            if self.mode == CursorMode::SharedWrite {
                file.cache.frames[pinned.frame].unlock_exclusive();
            }
        }
    }
}

impl PageCursor for Cursor {
    fn next(&mut self) -> io::Result<bool> {
        let page_id = self.next_page_id;
        self.next_page(page_id)
    }

    fn next_page(&mut self, page_id: u64) -> io::Result<bool> {
        self.open_file()?;
        self.unpin();
        self.offset = 0;
        self.next_page_id = page_id.saturating_add(1);
        if !self.open_file()?.contains(page_id) {
            return Ok(false);
        }
        self.pin(page_id)?;
        Ok(true)
    }

    fn current_page_id(&self) -> Option<u64> {
        self.pinned.map(|p| p.page_id)
    }

    fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn get_byte(&mut self) -> u8 {
        let byte = match (self.pinned, &self.file) {
            (Some(pinned), Some(file)) if self.offset < file.file_page_size => {
                file.cache.frames[pinned.frame].get(self.offset)
            }
            _ => 0,
        };
        self.offset += 1;
        byte
    }

    fn should_retry(&mut self) -> io::Result<bool> {
        let (Some(pinned), Some(file)) = (self.pinned, &self.file) else {
            return Ok(false);
        };
        if self.mode == CursorMode::SharedWrite
            || file.cache.frames[pinned.frame].validate(pinned.stamp)
        {
            return Ok(false);
        }
        self.pinned = None;
        self.pin(pinned.page_id)?;
        Ok(true)
    }

    fn close(&mut self) {
        self.unpin();
        self.file = None;
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.close();
    }
}
