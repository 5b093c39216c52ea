//! Single-slot holder for the most recent encoded frame.
//!
//! ## Latest frame wins
//!
//! There is no queue. The producer overwrites the slot at its own cadence
//! and every connection re-reads it whenever it is ready for more data:
//!
//! ```text
//! producer ──put()──► FrameSlot { version, data } ◄──get()── dispatch
//! ```
//!
//! A reader therefore never sees a backlog, may skip versions it was too
//! slow to observe, and never observes an older version after a newer one.

use bytes::Bytes;
use parking_lot::Mutex;

/// One complete encoded image plus the version assigned when it was stored.
///
/// Cheap to clone: `data` is reference counted, so every reader shares the
/// same allocation and nobody can mutate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    version: u64,
    data: Bytes,
}

impl Frame {
    /// Monotonic version, starting at 1 for the first stored frame.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}

/// Shared buffer holding at most one [`Frame`].
///
/// The lock covers only the reference swap in [`put`](Self::put) and the
/// reference clone in [`get`](Self::get). It is never held across a source
/// call or a network send.
#[derive(Debug, Default)]
pub struct FrameSlot {
    current: Mutex<Option<Frame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame and return the version assigned to it.
    pub fn put(&self, data: impl Into<Bytes>) -> u64 {
        let data = data.into();

        let (version, previous) = {
            let mut current = self.current.lock();
            let version = current.as_ref().map_or(1, |f| f.version + 1);
            let previous = current.replace(Frame { version, data });
            (version, previous)
        };

        // Release the old allocation outside the lock.
        drop(previous);

        tracing::trace!(version, "frame stored");
        version
    }

    /// Returns the current frame, or `None` if nothing was ever stored.
    pub fn get(&self) -> Option<Frame> {
        self.current.lock().clone()
    }

    /// Returns the current frame only if it is newer than `seen`.
    pub fn get_newer(&self, seen: u64) -> Option<Frame> {
        let current = self.current.lock();
        current.as_ref().filter(|f| f.version > seen).cloned()
    }

    /// Version of the stored frame, `0` while empty.
    pub fn version(&self) -> u64 {
        self.current.lock().as_ref().map_or(0, |f| f.version)
    }

    /// Whether at least one frame has been stored.
    pub fn is_ready(&self) -> bool {
        self.current.lock().is_some()
    }
}
