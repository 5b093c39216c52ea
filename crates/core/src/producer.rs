//! Producer task: polls the frame source and refreshes the slot.
//!
//! ```text
//! loop while running:
//!     source.produce()  ── Ok(bytes) ──► slot.put(bytes)
//!                       └─ Err(_)    ──► skip tick, slot untouched
//!     sleep(interval)
//! ```
//!
//! A failed tick is not an error for the server: clients keep receiving
//! the last good frame. The running flag is checked once per tick and
//! during the inter-tick sleep; an in-flight `produce` call always
//! completes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::frame::FrameSlot;
use crate::source::FrameSource;
use crate::stats::ServerStats;

/// Default inter-tick interval (~30 Hz).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Longest single sleep between running-flag checks.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Totals returned when the producer thread exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub ticks: u64,
    pub produced: u64,
    pub skipped: u64,
}

pub struct Producer {
    source: Box<dyn FrameSource>,
    slot: Arc<FrameSlot>,
    stats: Arc<ServerStats>,
    interval: Duration,
    report: ProducerReport,
    failing: bool,
}

impl Producer {
    pub fn new(
        source: Box<dyn FrameSource>,
        slot: Arc<FrameSlot>,
        stats: Arc<ServerStats>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            slot,
            stats,
            interval,
            report: ProducerReport::default(),
            failing: false,
        }
    }

    /// Run one tick. Returns `true` if a new frame was stored.
    pub fn tick(&mut self) -> bool {
        self.report.ticks += 1;

        match self.source.produce() {
            Ok(data) => {
                let size = data.len();
                let version = self.slot.put(data);
                self.report.produced += 1;
                self.stats.frame_produced();

                if self.failing {
                    self.failing = false;
                    tracing::info!(version, "frame source recovered");
                }
                tracing::trace!(version, size, "frame produced");
                true
            }
            Err(e) => {
                self.report.skipped += 1;
                self.stats.source_skipped();

                // Only the first failure of a streak is worth a warning.
                if !self.failing {
                    self.failing = true;
                    tracing::warn!(error = %e, "frame source unavailable, serving last frame");
                } else {
                    tracing::trace!(error = %e, "frame source still unavailable");
                }
                false
            }
        }
    }

    /// Tick until `running` is cleared.
    pub fn run(mut self, running: &AtomicBool) -> ProducerReport {
        tracing::debug!(
            source = %self.source.describe(),
            interval_ms = self.interval.as_millis() as u64,
            "producer started"
        );

        while running.load(Ordering::SeqCst) {
            self.tick();
            pause(running, self.interval);
        }

        tracing::debug!(
            ticks = self.report.ticks,
            produced = self.report.produced,
            skipped = self.report.skipped,
            "producer exited"
        );
        self.report
    }
}

/// Sleep for `duration`, waking early once `running` is cleared.
pub(crate) fn pause(running: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        let now = Instant::now();
        if now >= deadline || !running.load(Ordering::SeqCst) {
            return;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
