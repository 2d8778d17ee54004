//! Progress counters shared by every stage.

use parking_lot::Mutex;
use std::time::Instant;
use tracing::info;
use transcode_core::FrameRange;

/// A copy of the counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Frames handed to the encoders.
    pub encoded: u64,
    /// Frames discarded by filters.
    pub dropped: u64,
    /// Frames outside the requested ranges.
    pub skipped: u64,
    /// Frames replayed because of a clone request.
    pub cloned: u64,
}

impl CounterSnapshot {
    /// Clones that were not compensated by skips.
    pub fn skipped_cloned(&self) -> i64 {
        self.cloned as i64 - self.skipped as i64
    }
}

/// Global frame counters.
pub struct ProgressCounters {
    counts: Mutex<CounterSnapshot>,
    started: Instant,
    interval: u64,
}

impl ProgressCounters {
    /// Create counters that log progress every `interval` encoded frames.
    pub fn new(interval: u64) -> Self {
        Self {
            counts: Mutex::new(CounterSnapshot::default()),
            started: Instant::now(),
            interval,
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        *self.counts.lock()
    }

    pub fn encoded(&self) -> u64 {
        self.counts.lock().encoded
    }

    pub fn dropped(&self) -> u64 {
        self.counts.lock().dropped
    }

    pub fn skipped(&self) -> u64 {
        self.counts.lock().skipped
    }

    pub fn cloned(&self) -> u64 {
        self.counts.lock().cloned
    }

    pub(crate) fn add_dropped(&self, frames: u64) {
        self.counts.lock().dropped += frames;
    }

    pub(crate) fn add_skipped(&self, frames: u64) {
        self.counts.lock().skipped += frames;
    }

    pub(crate) fn add_cloned(&self, frames: u64) {
        self.counts.lock().cloned += frames;
    }

    /// Count one encoded frame and log progress when the interval is hit.
    pub(crate) fn add_encoded(&self, frame_id: u64, range: &FrameRange) {
        let encoded = {
            let mut counts = self.counts.lock();
            counts.encoded += 1;
            counts.encoded
        };
        if self.interval == 0 || encoded % self.interval != 0 {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let fps = if elapsed > 0.0 {
            encoded as f64 / elapsed
        } else {
            0.0
        };
        if range.end == u64::MAX {
            info!(frame = frame_id, encoded, fps = format_args!("{:.2}", fps), "Encoding");
        } else {
            let done = frame_id.saturating_sub(range.start) as f64;
            let percent = (done / range.len().max(1) as f64 * 100.0).min(100.0);
            info!(
                frame = frame_id,
                encoded,
                fps = format_args!("{:.2}", fps),
                "Encoding, {:.1}% of range {}",
                percent,
                range
            );
        }
    }
}
