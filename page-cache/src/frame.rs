//! A frame holds one page worth of bytes and the stamp that guards them.
//!
//! Stamp protocol:
//! - even: nobody holds the frame exclusively, optimistic reads may proceed.
//! - odd: a writer holds the frame; its bytes and binding may change.
//!
//! Each exclusive lock/unlock cycle advances the stamp by two, so a reader that
//! sees the same even stamp before and after reading knows no writer overlapped.

use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicU8, Ordering};

use crossbeam_utils::Backoff;
use once_cell::sync::OnceCell;

/// Binding of a frame that holds no page.
pub(crate) const UNBOUND: u64 = u64::MAX;

const FILE_ID_SHIFT: u32 = 40;
pub(crate) const MAX_PAGE_ID: u64 = (1 << FILE_ID_SHIFT) - 1;
pub(crate) const MAX_FILE_ID: u32 = (1 << (64 - FILE_ID_SHIFT)) - 2;

pub(crate) fn binding(file_id: u32, page_id: u64) -> u64 {
    debug_assert!(page_id <= MAX_PAGE_ID);
    (u64::from(file_id) << FILE_ID_SHIFT) | page_id
}

pub(crate) fn unpack_binding(binding: u64) -> (u32, u64) {
    ((binding >> FILE_ID_SHIFT) as u32, binding & MAX_PAGE_ID)
}

pub(crate) struct Frame {
    stamp: AtomicU64,
    binding: AtomicU64,
    usage: AtomicBool,
    dirty: AtomicBool,
    size: usize,
    // allocated on first use so that a large, mostly idle cache stays cheap
    bytes: OnceCell<Box<[AtomicU8]>>,
}

impl Frame {
    pub(crate) fn new(size: usize) -> Self {
        Frame {
            stamp: AtomicU64::new(0),
            binding: AtomicU64::new(UNBOUND),
            usage: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            size,
            bytes: OnceCell::new(),
        }
    }

    fn bytes(&self) -> &[AtomicU8] {
        self.bytes.get_or_init(|| {
            std::iter::repeat_with(|| AtomicU8::new(0))
                .take(self.size)
                .collect()
        })
    }

    /// The stamp to validate an optimistic read against, or `None` while a writer holds the frame.
    pub(crate) fn optimistic_stamp(&self) -> Option<u64> {
        let stamp = self.stamp.load(Ordering::Acquire);
        (stamp & 1 == 0).then_some(stamp)
    }

    /// True if no exclusive lock/unlock cycle happened since `stamp` was observed.
    pub(crate) fn validate(&self, stamp: u64) -> bool {
        fence(Ordering::Acquire);
        self.stamp.load(Ordering::Relaxed) == stamp
    }

    pub(crate) fn try_lock_exclusive(&self) -> Option<u64> {
        let stamp = self.stamp.load(Ordering::Relaxed);
        if stamp & 1 == 1 {
            return None;
        }
        self.stamp
            .compare_exchange(stamp, stamp + 1, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        fence(Ordering::Release);
        Some(stamp + 1)
    }

    pub(crate) fn lock_exclusive(&self) -> u64 {
        let backoff = Backoff::new();
        loop {
            if let Some(stamp) = self.try_lock_exclusive() {
                return stamp;
            }
            backoff.snooze();
        }
    }

    pub(crate) fn unlock_exclusive(&self) {
        let stamp = self.stamp.load(Ordering::Relaxed);
        debug_assert!(stamp & 1 == 1, "frame is not exclusively locked");
        self.stamp.store(stamp + 1, Ordering::Release);
    }

    pub(crate) fn binding(&self) -> u64 {
        self.binding.load(Ordering::Relaxed)
    }

    /// Caller must hold the exclusive lock.
    pub(crate) fn bind(&self, binding: u64) {
        self.binding.store(binding, Ordering::Relaxed);
        self.usage.store(true, Ordering::Relaxed);
    }

    /// Caller must hold the exclusive lock.
    pub(crate) fn unbind(&self) {
        self.binding.store(UNBOUND, Ordering::Relaxed);
        self.dirty.store(false, Ordering::Relaxed);
    }

    pub(crate) fn touch(&self) {
        if !self.usage.load(Ordering::Relaxed) {
            self.usage.store(true, Ordering::Relaxed);
        }
    }

    /// Clears the CLOCK reference bit, returning its previous value.
    pub(crate) fn clear_usage(&self) -> bool {
        self.usage.swap(false, Ordering::Relaxed)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Relaxed)
    }

    /// Out of range offsets read as zero.
    pub(crate) fn get(&self, offset: usize) -> u8 {
        match self.bytes().get(offset) {
            Some(byte) => byte.load(Ordering::Relaxed),
            None => 0,
        }
    }

    /// Caller must hold the exclusive lock.
    pub(crate) fn put(&self, offset: usize, value: u8) {
        self.bytes()[offset].store(value, Ordering::Relaxed);
    }

    /// Overwrites the frame with `src`, zeroing whatever `src` does not cover.
    /// Caller must hold the exclusive lock.
    pub(crate) fn fill(&self, src: &[u8]) {
        let bytes = self.bytes();
        for (i, byte) in bytes.iter().enumerate() {
            byte.store(src.get(i).copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Caller must hold the exclusive lock.
    pub(crate) fn copy_to(&self, dst: &mut [u8]) {
        for (dst, byte) in dst.iter_mut().zip(self.bytes().iter()) {
            *dst = byte.load(Ordering::Relaxed);
        }
    }
}
