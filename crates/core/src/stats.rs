//! Lock-free counters shared by the producer and dispatch threads.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals for one server instance.
///
/// Each counter has a single writer thread; readers take a
/// [`StatsSnapshot`] at any time.
#[derive(Debug, Default)]
pub struct ServerStats {
    frames_produced: AtomicU64,
    source_skips: AtomicU64,
    frames_sent: AtomicU64,
    send_failures: AtomicU64,
    connections_open: AtomicU64,
    connections_total: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn frame_produced(&self) {
        self.frames_produced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn source_skipped(&self) {
        self.source_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_opened(&self) {
        self.connections_open.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.connections_open.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_produced: self.frames_produced.load(Ordering::Relaxed),
            source_skips: self.source_skips.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            connections_open: self.connections_open.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames stored into the slot.
    pub frames_produced: u64,
    /// Producer ticks where the source had nothing.
    pub source_skips: u64,
    /// Successful frame sends across all connections.
    pub frames_sent: u64,
    /// Sends that closed their connection.
    pub send_failures: u64,
    /// Connections currently registered.
    pub connections_open: u64,
    /// Connections ever accepted.
    pub connections_total: u64,
}
