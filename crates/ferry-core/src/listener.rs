//! Transfer progress notifications.
//!
//! A relay hands the caller's listener to the upload leg only, so the
//! reported byte counts are the bytes that actually reached the target.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Receives progress events from an endpoint operation
///
/// Every method has an empty default so implementors only override what
/// they need. Events may arrive on a worker thread.
pub trait ProgressListener: Send + Sync {
    /// The data transfer has started
    fn started(&self) {}

    /// `len` more bytes were moved
    fn transferred(&self, len: usize) {
        let _ = len;
    }

    /// The data transfer completed successfully
    fn completed(&self) {}

    /// The data transfer was aborted
    fn aborted(&self) {}

    /// The data transfer failed
    fn failed(&self) {}
}

/// Listener that counts transferred bytes
///
/// # Example
///
/// ```
/// use ferry_core::{ByteCounter, ProgressListener};
///
/// let counter = ByteCounter::new();
/// counter.transferred(512);
/// counter.transferred(512);
/// assert_eq!(counter.bytes(), 1024);
/// ```
#[derive(Debug, Default)]
pub struct ByteCounter {
    bytes: AtomicU64,
    completed: AtomicBool,
    failed: AtomicBool,
}

impl ByteCounter {
    /// Create a counter at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes reported so far
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    /// Whether `completed` was reported
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Whether `failed` or `aborted` was reported
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

impl ProgressListener for ByteCounter {
    fn transferred(&self, len: usize) {
        self.bytes.fetch_add(len as u64, Ordering::AcqRel);
    }

    fn completed(&self) {
        self.completed.store(true, Ordering::Release);
    }

    fn aborted(&self) {
        self.failed.store(true, Ordering::Release);
    }

    fn failed(&self) {
        self.failed.store(true, Ordering::Release);
    }
}
