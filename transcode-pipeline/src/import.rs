//! Import stage: one producer thread per media kind.

use crate::context::{MediaQueue, PipelineContext};
use crate::filter::{release, FilterChain};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use transcode_core::{Frame, FrameAttributes, MediaKind, SlotId, SlotState};
use transcode_module::{FilterStage, ModuleFactory, ModuleInstance, StreamStatus};

/// Reads raw frames from an import module into the registry.
pub(crate) struct ImportStage {
    kind: MediaKind,
    module: ModuleInstance,
    filters: FilterChain,
    ctx: Arc<PipelineContext>,
    next_id: u64,
    /// Leading frames to drop.
    discard: u64,
    /// Silent frames to emit before the first real one.
    padding: u64,
    padding_size: usize,
    frame_size: usize,
}

impl ImportStage {
    pub(crate) fn new(
        module: ModuleInstance,
        filters: FilterChain,
        ctx: Arc<PipelineContext>,
        sync_offset: i64,
        frame_size: usize,
        padding_size: usize,
    ) -> Self {
        let kind = filters.kind();
        let (discard, padding) = match kind {
            MediaKind::Audio if sync_offset > 0 => (sync_offset as u64, 0),
            MediaKind::Audio if sync_offset < 0 => (0, sync_offset.unsigned_abs()),
            _ => (0, 0),
        };
        Self {
            kind,
            module,
            filters,
            ctx,
            next_id: 0,
            discard,
            padding,
            padding_size: padding_size.min(frame_size),
            frame_size,
        }
    }

    pub(crate) fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Produce frames until the source ends or a stop is requested.
    ///
    /// A read error ends the stream like a regular end of stream.
    pub(crate) fn run(&mut self) {
        let ctx = Arc::clone(&self.ctx);
        let queue = ctx.queue(self.kind);
        info!(media = %self.kind, "Import thread started");

        if self.discard > 0 {
            self.skip_leading();
        }

        while !ctx.stop_requested() {
            let Some(slot) = self.acquire(queue) else {
                break;
            };
            match self.fill(queue, slot) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    error!(media = %self.kind, error = %e, "Import failed, ending stream");
                    break;
                }
            }
        }

        {
            let _registry = queue.lock();
            queue.set_import_active(false);
        }
        queue.notify_all();
        info!(media = %self.kind, frames = self.next_id, "Import thread finished");
    }

    /// Drop the first frames of the source to line audio up with video.
    fn skip_leading(&mut self) {
        let mut scratch = Frame::new(self.kind, self.frame_size);
        let mut dropped = 0;
        while dropped < self.discard && !self.ctx.stop_requested() {
            match self.module.decode(&mut scratch) {
                Ok(StreamStatus::Frame) => dropped += 1,
                Ok(StreamStatus::EndOfStream) => break,
                Err(e) => {
                    warn!(media = %self.kind, error = %e, "Read failed while syncing");
                    break;
                }
            }
        }
        info!(media = %self.kind, frames = dropped, "Dropped leading frames for sync");
    }

    /// Wait until the pool has room, then register the next frame.
    fn acquire(&mut self, queue: &MediaQueue) -> Option<SlotId> {
        let mut registry = queue.lock();
        loop {
            if self.ctx.stop_requested() {
                return None;
            }
            if !registry.pool().is_full() {
                match registry.register(self.next_id) {
                    Ok(Some(slot)) => return Some(slot),
                    Ok(None) => {}
                    Err(e) => {
                        error!(media = %self.kind, error = %e, "Frame registration failed");
                        return None;
                    }
                }
            }
            queue.wait_slot_freed(&mut registry, self.ctx.poll_delay());
        }
    }

    /// Read into a registered slot and hand it on. Returns `Ok(false)` at
    /// end of stream.
    fn fill(&mut self, queue: &MediaQueue, slot: SlotId) -> Result<bool> {
        let mut frame = queue.lock().take_frame(slot)?;

        let status = if self.padding > 0 {
            self.padding -= 1;
            frame.zero_fill(self.padding_size)?;
            Ok(StreamStatus::Frame)
        } else {
            self.module.decode(&mut frame)
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                error!(media = %self.kind, frame = self.next_id, error = %e, "Read failed");
                StreamStatus::EndOfStream
            }
        };

        if status == StreamStatus::EndOfStream {
            let mut registry = queue.lock();
            registry.restore_frame(slot, frame)?;
            registry.remove(slot)?;
            drop(registry);
            queue.notify_slot_freed();
            debug!(media = %self.kind, frames = self.next_id, "End of stream");
            return Ok(false);
        }

        if !self.ctx.in_range(frame.id()) {
            frame.attributes.insert(FrameAttributes::OUT_OF_RANGE);
        }
        self.filters.process_or_skip(&mut frame, FilterStage::PreSync);
        self.next_id += 1;

        let mut registry = queue.lock();
        registry.restore_frame(slot, frame)?;
        if registry.frame(slot)?.has(FrameAttributes::SKIPPED) {
            registry.remove(slot)?;
            drop(registry);
            self.ctx.counters().add_dropped(1);
            queue.notify_slot_freed();
            return Ok(true);
        }

        queue.counters().enqueue();
        if queue.has_workers() {
            registry.set_state(slot, SlotState::Wait)?;
            drop(registry);
            queue.notify_frame_waiting();
        } else {
            registry.set_state(slot, SlotState::Ready)?;
            drop(registry);
            queue.notify_frame_ready();
        }
        Ok(true)
    }

    /// Destroy the module instances.
    pub(crate) fn release(self, factory: &ModuleFactory) {
        let mut module = self.module;
        if let Err(e) = module.stop() {
            debug!(media = %self.kind, error = %e, "Import stop failed");
        }
        release(factory, module);
        self.filters.release(factory);
    }
}
