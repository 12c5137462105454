//! The frame pool, page faults and CLOCK eviction.
//!
//! Page faults are serialized through one cache-wide mutex which also owns the
//! free list, the CLOCK hand and the registry of mapped files. Readers of
//! already-resident pages never touch that mutex.

use std::{
    collections::HashMap,
    io,
    path::Path,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
};

use tracing::{debug, trace};

use crate::{
    frame::{self, Frame, UNBOUND},
    metrics::{Metrics, MetricsStorage},
    paged_file::{FileInner, PagedFile},
};


/// Shared handle to a page cache. Cloning is cheap.
#[derive(Clone)]
pub struct PageCache {
    inner: Arc<CacheInner>,
}

pub(crate) struct CacheInner {
    pub(crate) page_size: usize,
    pub(crate) frames: Box<[Frame]>,
    faults: Mutex<FaultState>,
    next_file_id: AtomicU32,
    pub(crate) metrics: MetricsStorage,
}

pub(crate) struct FaultState {
    pub(crate) free: Vec<usize>,
    hand: usize,
    pub(crate) files: HashMap<u32, Weak<FileInner>>,
}

impl PageCache {
    /// A cache of `max_pages` frames of `page_size` bytes each.
    pub fn new(max_pages: usize, page_size: usize) -> io::Result<Self> {
        if page_size == 0 {
            return Err(invalid_input("page size must be positive"));
        }
        if max_pages < 2 {
            return Err(invalid_input("page cache needs at least two pages"));
        }
        debug!(max_pages, page_size, "creating page cache");
        let frames = (0..max_pages).map(|_| Frame::new(page_size)).collect();
        Ok(PageCache {
            inner: Arc::new(CacheInner {
                page_size,
                frames,
                faults: Mutex::new(FaultState {
                    free: (0..max_pages).rev().collect(),
                    hand: 0,
                    files: HashMap::new(),
                }),
                next_file_id: AtomicU32::new(0),
                metrics: MetricsStorage::new_const(),
            }),
        })
    }

    /// A cache sized to fit in `max_ram` bytes.
    pub fn with_memory(max_ram: u64, page_size: usize) -> io::Result<Self> {
        if page_size == 0 {
            return Err(invalid_input("page size must be positive"));
        }
        let max_pages = usize::try_from(max_ram / page_size as u64)
            .map_err(|_| invalid_input("memory budget does not fit the address space"))?;
        Self::new(max_pages, page_size)
    }

    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    pub fn max_pages(&self) -> usize {
        self.inner.frames.len()
    }

    /// Maps `path` into the cache, splitting it into pages of `file_page_size` bytes.
    ///
    /// `file_page_size` may be smaller than the cache page size, in which case
    /// the tail of every frame stays unused.
    pub fn map(&self, path: impl AsRef<Path>, file_page_size: usize) -> io::Result<PagedFile> {
        let path = path.as_ref();
        if file_page_size == 0 || file_page_size > self.inner.page_size {
            return Err(invalid_input(format!(
                "file page size {file_page_size} must be within 1..={}",
                self.inner.page_size
            )));
        }
        let id = self.inner.next_file_id.fetch_add(1, Ordering::Relaxed);
        if id > frame::MAX_FILE_ID {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "too many files mapped over the lifetime of this page cache",
            ));
        }
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;
        let inner = Arc::new(FileInner::new(
            id,
            path.to_owned(),
            file,
            file_page_size,
            Arc::clone(&self.inner),
        )?);
        self.inner
            .lock_faults()
            .files
            .insert(id, Arc::downgrade(&inner));
        debug!(?path, id, file_page_size, "mapped file");
        Ok(PagedFile::new(inner))
    }

    pub fn metrics(&self) -> Metrics {
        self.inner.metrics.make_pub()
    }
}

impl CacheInner {
    pub(crate) fn lock_faults(&self) -> MutexGuard<'_, FaultState> {
        // fault state is only mutated in small steps that leave it consistent
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads `page_id` of `file` into a frame and returns the frame index.
    pub(crate) fn fault(&self, file: &Arc<FileInner>, page_id: u64) -> io::Result<usize> {
        // declared before the lock so that a file whose last handle we hold is
        // dropped only after the fault lock is released
        let mut evicted_owner: Option<Arc<FileInner>> = None;
        let mut state = self.lock_faults();
        if let Some(idx) = file.translation(page_id) {
            // someone else faulted it in while we waited for the lock
            return Ok(idx);
        }
        let idx = self.acquire_frame(&mut state, &mut evicted_owner)?;
        let frame = &self.frames[idx];
        let state = scopeguard::guard(state, |mut state| {
            frame.unlock_exclusive();
            state.free.push(idx);
        });
        file.read_page(page_id, frame)?;
        frame.bind(frame::binding(file.id, page_id));
        file.set_translation(page_id, idx);
        let state = scopeguard::ScopeGuard::into_inner(state);
        frame.unlock_exclusive();
        drop(state);
        self.metrics.faults.fetch_add(1, Ordering::Relaxed);
        trace!(file = file.id, page_id, frame = idx, "page fault");
        Ok(idx)
    }

    /// Returns an exclusively locked, unbound frame.
    fn acquire_frame(
        &self,
        state: &mut FaultState,
        evicted_owner: &mut Option<Arc<FileInner>>,
    ) -> io::Result<usize> {
        if let Some(idx) = state.free.pop() {
            self.frames[idx].lock_exclusive();
            return Ok(idx);
        }
        let n = self.frames.len();
        for sweep in 0..4 * n {
            let idx = state.hand;
            state.hand = (state.hand + 1) % n;
            let frame = &self.frames[idx];
            // after two full turns, stop honoring reference bits that hot readers keep setting
            if sweep < 2 * n && frame.clear_usage() {
                continue;
            }
            if frame.try_lock_exclusive().is_none() {
                continue;
            }
            match self.evict(state, idx, evicted_owner) {
                Ok(true) => return Ok(idx),
                Ok(false) => frame.unlock_exclusive(),
                Err(e) => {
                    frame.unlock_exclusive();
                    return Err(e);
                }
            }
        }
        Err(io::Error::new(
            io::ErrorKind::Other,
            "no evictable page: every frame is held by a writer",
        ))
    }

    /// Unbinds the frame, writing it back first if it is dirty. Returns false
    /// if the frame has to be skipped.
    ///
    /// Caller must hold the frame's exclusive lock.
    fn evict(
        &self,
        state: &mut FaultState,
        idx: usize,
        evicted_owner: &mut Option<Arc<FileInner>>,
    ) -> io::Result<bool> {
        let frame = &self.frames[idx];
        let binding = frame.binding();
        if binding == UNBOUND {
            return Ok(true);
        }
        let (file_id, page_id) = frame::unpack_binding(binding);
        match state.files.get(&file_id).and_then(Weak::upgrade) {
            Some(owner) => {
                let owner = evicted_owner.insert(owner);
                if frame.take_dirty() {
                    if let Err(e) = owner.write_page(page_id, frame) {
                        frame.mark_dirty();
                        return Err(e);
                    }
                    self.metrics.flushes.fetch_add(1, Ordering::Relaxed);
                }
                owner.clear_translation(page_id);
            }
            // the owner is being unmapped and writes its dirty pages back itself
            None if frame.is_dirty() => return Ok(false),
            None => {}
        }
        frame.unbind();
        self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
        trace!(file = file_id, page_id, frame = idx, "evicted page");
        Ok(true)
    }
}

pub(crate) fn invalid_input(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.into())
}
