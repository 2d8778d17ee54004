//! State shared by all stages of one session.
//!
//! Each media kind has a [`MediaQueue`]: the frame registry behind a single
//! mutex plus the condition variables the stages sleep on. Every wait is
//! bounded by the configured poll delay, so a missed notification costs at
//! most one delay and the stop flag is always seen.

use crate::counters::ProgressCounters;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use transcode_core::{FrameRanges, FrameRegistry, MediaKind};

/// Per-stage fill counters: frames waiting for a worker, being processed,
/// and waiting for export. Each has its own lock.
#[derive(Default)]
pub struct StageCounters {
    waiting: Mutex<usize>,
    processing: Mutex<usize>,
    exporting: Mutex<usize>,
}

/// Stage counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageLevels {
    pub waiting: usize,
    pub processing: usize,
    pub exporting: usize,
}

impl StageCounters {
    pub fn levels(&self) -> StageLevels {
        StageLevels {
            waiting: *self.waiting.lock(),
            processing: *self.processing.lock(),
            exporting: *self.exporting.lock(),
        }
    }

    pub(crate) fn enqueue(&self) {
        *self.waiting.lock() += 1;
    }

    /// A waiting frame was picked up for processing.
    pub(crate) fn begin(&self) {
        decrement(&self.waiting);
        *self.processing.lock() += 1;
    }

    /// Processing finished; the frame goes to export when `exported`.
    pub(crate) fn finish(&self, exported: bool) {
        decrement(&self.processing);
        if exported {
            *self.exporting.lock() += 1;
        }
    }

    /// The encoder took a frame.
    pub(crate) fn export(&self) {
        decrement(&self.exporting);
    }

    /// Forget everything; used when the registry is flushed.
    pub(crate) fn reset(&self) {
        *self.waiting.lock() = 0;
        *self.processing.lock() = 0;
        *self.exporting.lock() = 0;
    }
}

fn decrement(counter: &Mutex<usize>) {
    let mut value = counter.lock();
    *value = value.saturating_sub(1);
}

/// Registry and signalling for one media kind.
pub struct MediaQueue {
    kind: MediaKind,
    registry: Mutex<FrameRegistry>,
    /// A slot went back to the pool.
    slot_freed: Condvar,
    /// A frame entered WAIT.
    frame_waiting: Condvar,
    /// A frame entered READY, or was removed.
    frame_ready: Condvar,
    counters: StageCounters,
    import_active: AtomicBool,
    workers: usize,
}

impl MediaQueue {
    pub(crate) fn new(kind: MediaKind, capacity: usize, frame_size: usize, workers: usize) -> Self {
        Self {
            kind,
            registry: Mutex::new(FrameRegistry::new(kind, capacity, frame_size)),
            slot_freed: Condvar::new(),
            frame_waiting: Condvar::new(),
            frame_ready: Condvar::new(),
            counters: StageCounters::default(),
            import_active: AtomicBool::new(false),
            workers,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Lock the registry.
    pub fn lock(&self) -> MutexGuard<'_, FrameRegistry> {
        self.registry.lock()
    }

    pub fn counters(&self) -> &StageCounters {
        &self.counters
    }

    /// Whether the import thread is still producing frames.
    pub fn import_active(&self) -> bool {
        self.import_active.load(Ordering::Acquire)
    }

    pub(crate) fn set_import_active(&self, active: bool) {
        self.import_active.store(active, Ordering::Release);
    }

    /// Whether filtering runs on worker threads.
    pub fn has_workers(&self) -> bool {
        self.workers > 0
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub(crate) fn wait_slot_freed(&self, registry: &mut MutexGuard<'_, FrameRegistry>, delay: Duration) {
        self.slot_freed.wait_for(registry, delay);
    }

    pub(crate) fn wait_frame_waiting(
        &self,
        registry: &mut MutexGuard<'_, FrameRegistry>,
        delay: Duration,
    ) {
        self.frame_waiting.wait_for(registry, delay);
    }

    pub(crate) fn wait_frame_ready(&self, registry: &mut MutexGuard<'_, FrameRegistry>, delay: Duration) {
        self.frame_ready.wait_for(registry, delay);
    }

    pub(crate) fn notify_slot_freed(&self) {
        self.slot_freed.notify_all();
    }

    pub(crate) fn notify_frame_waiting(&self) {
        self.frame_waiting.notify_one();
    }

    pub(crate) fn notify_frame_ready(&self) {
        self.frame_ready.notify_all();
    }

    /// Wake every sleeper, e.g. on stop or end of stream.
    pub(crate) fn notify_all(&self) {
        self.slot_freed.notify_all();
        self.frame_waiting.notify_all();
        self.frame_ready.notify_all();
    }
}

/// Session state handed to every stage.
pub struct PipelineContext {
    video: MediaQueue,
    audio: MediaQueue,
    stop: AtomicBool,
    failed: AtomicBool,
    ranges: RwLock<FrameRanges>,
    counters: ProgressCounters,
    poll_delay: Duration,
}

impl PipelineContext {
    pub(crate) fn new(
        video: MediaQueue,
        audio: MediaQueue,
        poll_delay: Duration,
        progress_interval: u64,
    ) -> Self {
        Self {
            video,
            audio,
            stop: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            ranges: RwLock::new(FrameRanges::all()),
            counters: ProgressCounters::new(progress_interval),
            poll_delay,
        }
    }

    pub fn queue(&self, kind: MediaKind) -> &MediaQueue {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }

    pub fn counters(&self) -> &ProgressCounters {
        &self.counters
    }

    pub fn poll_delay(&self) -> Duration {
        self.poll_delay
    }

    /// Ask every stage to wind down.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        for kind in MediaKind::ALL {
            self.queue(kind).notify_all();
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Whether the encoder stage hit a fatal error.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub(crate) fn set_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// Whether frame `id` falls inside the requested ranges.
    pub fn in_range(&self, id: u64) -> bool {
        self.ranges.read().contains(id)
    }

    pub(crate) fn set_ranges(&self, ranges: FrameRanges) {
        *self.ranges.write() = ranges;
    }

    /// Log the fill level of both registries.
    pub fn log_fill_levels(&self, tag: &str) {
        for kind in MediaKind::ALL {
            self.queue(kind).lock().log_fill_level(tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transcode_core::FrameRange;

    fn context() -> PipelineContext {
        PipelineContext::new(
            MediaQueue::new(MediaKind::Video, 4, 16, 2),
            MediaQueue::new(MediaKind::Audio, 4, 16, 0),
            Duration::from_millis(1),
            0,
        )
    }

    #[test]
    fn test_stage_counters() {
        let counters = StageCounters::default();
        counters.enqueue();
        counters.enqueue();
        counters.begin();
        assert_eq!(
            counters.levels(),
            StageLevels {
                waiting: 1,
                processing: 1,
                exporting: 0
            }
        );
        counters.finish(true);
        counters.begin();
        counters.finish(true);
        counters.export();
        assert_eq!(
            counters.levels(),
            StageLevels {
                waiting: 0,
                processing: 0,
                exporting: 1
            }
        );
        // Never underflows.
        counters.export();
        counters.export();
        assert_eq!(counters.levels().exporting, 0);
    }

    #[test]
    fn test_stop_flag() {
        let ctx = context();
        assert!(!ctx.stop_requested());
        ctx.request_stop();
        assert!(ctx.stop_requested());
        assert!(!ctx.has_failed());
    }

    #[test]
    fn test_ranges() {
        let ctx = context();
        assert!(ctx.in_range(1_000_000));
        ctx.set_ranges(FrameRange::new(10, 20).unwrap().into());
        assert!(!ctx.in_range(5));
        assert!(ctx.in_range(10));
        assert!(!ctx.in_range(20));
    }

    #[test]
    fn test_bounded_wait_returns() {
        let ctx = context();
        let queue = ctx.queue(MediaKind::Video);
        assert!(queue.has_workers());
        assert!(!ctx.queue(MediaKind::Audio).has_workers());
        let mut registry = queue.lock();
        queue.wait_frame_ready(&mut registry, ctx.poll_delay());
        assert!(registry.is_empty());
    }
}
