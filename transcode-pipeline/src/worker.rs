//! Worker pool: filter threads between import and encoder.

use crate::context::{MediaQueue, PipelineContext};
use crate::filter::FilterChain;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, error, trace};
use transcode_core::{FrameAttributes, FrameRegistry, MediaKind, SlotId, SlotState};
use transcode_module::{FilterStage, ModuleFactory};

/// What happened to a frame after filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Discarded by a filter; its slot is free again.
    Dropped,
    /// Duplicated; the copy sits right behind the original in `copy_state`.
    Cloned,
    /// The duplicate could not be made; the frame is back in WAIT.
    Requeued,
    /// Passed on to the encoder.
    Ready,
}

/// Settle a filtered frame that is back in its slot.
///
/// A frame a filter asked to repeat is duplicated; the copy carries
/// `WAS_CLONED` and enters `copy_state`, so it gets filtered again. Without
/// a free slot the frame goes back to WAIT with its request intact.
pub(crate) fn settle(
    registry: &mut FrameRegistry,
    slot: SlotId,
    copy_state: SlotState,
) -> Result<Disposition> {
    let attributes = registry.frame(slot)?.attributes;

    if attributes.contains(FrameAttributes::SKIPPED) {
        registry.remove(slot)?;
        return Ok(Disposition::Dropped);
    }

    if attributes.contains(FrameAttributes::CLONED) {
        return match registry.duplicate(slot)? {
            Some(copy) => {
                registry.frame_mut(slot)?.attributes.remove(FrameAttributes::CLONED);
                let attributes = &mut registry.frame_mut(copy)?.attributes;
                attributes.remove(FrameAttributes::CLONED);
                attributes.insert(FrameAttributes::WAS_CLONED);
                if copy_state != SlotState::Wait {
                    registry.set_state(copy, copy_state)?;
                }
                registry.set_state(slot, SlotState::Ready)?;
                Ok(Disposition::Cloned)
            }
            None => {
                registry.set_state(slot, SlotState::Wait)?;
                Ok(Disposition::Requeued)
            }
        };
    }

    registry.set_state(slot, SlotState::Ready)?;
    Ok(Disposition::Ready)
}

/// One filter thread.
pub(crate) struct Worker {
    index: usize,
    kind: MediaKind,
    filters: FilterChain,
    ctx: Arc<PipelineContext>,
}

impl Worker {
    pub(crate) fn new(index: usize, filters: FilterChain, ctx: Arc<PipelineContext>) -> Self {
        Self {
            index,
            kind: filters.kind(),
            filters,
            ctx,
        }
    }

    pub(crate) fn kind(&self) -> MediaKind {
        self.kind
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Filter frames until the import has finished and nothing waits, or
    /// a stop is requested. A frame being filtered is always finished
    /// first, so no LOCKED frame outlives its worker.
    pub(crate) fn run(&mut self) {
        let ctx = Arc::clone(&self.ctx);
        let queue = ctx.queue(self.kind);
        debug!(media = %self.kind, worker = self.index, "Worker started");

        let mut processed = 0u64;
        while let Some(slot) = self.claim(queue) {
            if let Err(e) = self.process(queue, slot) {
                error!(media = %self.kind, worker = self.index, error = %e, "Worker failed");
                break;
            }
            processed += 1;
        }
        debug!(media = %self.kind, worker = self.index, frames = processed, "Worker finished");
    }

    /// Sleep until a WAIT frame exists, then lock the oldest one.
    fn claim(&self, queue: &MediaQueue) -> Option<SlotId> {
        let mut registry = queue.lock();
        loop {
            if self.ctx.stop_requested() {
                return None;
            }
            match registry.claim(SlotState::Wait, SlotState::Locked) {
                Ok(Some(slot)) => {
                    queue.counters().begin();
                    return Some(slot);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(media = %self.kind, error = %e, "Claiming a frame failed");
                    return None;
                }
            }
            if !queue.import_active() {
                return None;
            }
            queue.wait_frame_waiting(&mut registry, self.ctx.poll_delay());
        }
    }

    fn process(&mut self, queue: &MediaQueue, slot: SlotId) -> Result<()> {
        let mut frame = queue.lock().take_frame(slot)?;
        trace!(media = %self.kind, worker = self.index, frame = frame.id(), "Filtering");

        self.filters.process_or_skip(&mut frame, FilterStage::PreWorker);
        if !frame.has(FrameAttributes::SKIPPED) {
            self.filters.process_or_skip(&mut frame, FilterStage::PostWorker);
        }

        let mut registry = queue.lock();
        registry.restore_frame(slot, frame)?;
        let disposition = settle(&mut registry, slot, SlotState::Wait)?;
        drop(registry);

        match disposition {
            Disposition::Dropped => {
                queue.counters().finish(false);
                self.ctx.counters().add_dropped(1);
                queue.notify_slot_freed();
                queue.notify_frame_ready();
            }
            Disposition::Cloned => {
                queue.counters().finish(true);
                queue.counters().enqueue();
                self.ctx.counters().add_cloned(1);
                queue.notify_frame_waiting();
                queue.notify_frame_ready();
            }
            Disposition::Requeued => {
                queue.counters().finish(false);
                queue.counters().enqueue();
                queue.notify_frame_waiting();
            }
            Disposition::Ready => {
                queue.counters().finish(true);
                queue.notify_frame_ready();
            }
        }
        Ok(())
    }

    pub(crate) fn release(self, factory: &ModuleFactory) {
        self.filters.release(factory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(ids: &[u64]) -> (FrameRegistry, Vec<SlotId>) {
        let mut registry = FrameRegistry::new(MediaKind::Video, 4, 8);
        let slots = ids
            .iter()
            .map(|&id| {
                let slot = registry.register(id).unwrap().unwrap();
                registry.set_state(slot, SlotState::Locked).unwrap();
                slot
            })
            .collect();
        (registry, slots)
    }

    #[test]
    fn test_settle_ready_and_dropped() {
        let (mut registry, slots) = registry_with(&[0, 1]);
        registry
            .frame_mut(slots[0])
            .unwrap()
            .attributes
            .insert(FrameAttributes::SKIPPED);

        assert_eq!(settle(&mut registry, slots[0], SlotState::Wait).unwrap(), Disposition::Dropped);
        assert_eq!(settle(&mut registry, slots[1], SlotState::Wait).unwrap(), Disposition::Ready);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.state(slots[1]).unwrap(), SlotState::Ready);
    }

    #[test]
    fn test_settle_clone_goes_behind_original() {
        let (mut registry, slots) = registry_with(&[0, 1]);
        registry.frame_mut(slots[0]).unwrap().fill_from(&[9, 9]).unwrap();
        registry
            .frame_mut(slots[0])
            .unwrap()
            .attributes
            .insert(FrameAttributes::CLONED);

        assert_eq!(settle(&mut registry, slots[0], SlotState::Wait).unwrap(), Disposition::Cloned);
        assert_eq!(registry.frame_ids(), vec![0, 0, 1]);
        assert_eq!(registry.state(slots[0]).unwrap(), SlotState::Ready);
        assert!(!registry.frame(slots[0]).unwrap().has(FrameAttributes::CLONED));

        let copy = registry.claim(SlotState::Wait, SlotState::Locked).unwrap().unwrap();
        let frame = registry.frame(copy).unwrap();
        assert!(frame.has(FrameAttributes::WAS_CLONED));
        assert!(!frame.has(FrameAttributes::CLONED));
        assert_eq!(frame.data(), &[9, 9]);
    }

    #[test]
    fn test_settle_clone_without_room_requeues() {
        let (mut registry, slots) = registry_with(&[0, 1, 2, 3]);
        registry
            .frame_mut(slots[3])
            .unwrap()
            .attributes
            .insert(FrameAttributes::CLONED);
        assert_eq!(settle(&mut registry, slots[3], SlotState::Wait).unwrap(), Disposition::Requeued);
        assert_eq!(registry.state(slots[3]).unwrap(), SlotState::Wait);
        assert!(registry.frame(slots[3]).unwrap().has(FrameAttributes::CLONED));

        // Once a slot frees up the retried request is honoured.
        registry.remove(slots[0]).unwrap();
        registry.set_state(slots[3], SlotState::Locked).unwrap();
        assert_eq!(settle(&mut registry, slots[3], SlotState::Wait).unwrap(), Disposition::Cloned);
        assert!(!registry.frame(slots[3]).unwrap().has(FrameAttributes::CLONED));
        assert_eq!(registry.frame_ids(), vec![1, 2, 3, 3]);
    }

    #[test]
    fn test_settle_inline_copy_state() {
        let (mut registry, slots) = registry_with(&[0]);
        registry
            .frame_mut(slots[0])
            .unwrap()
            .attributes
            .insert(FrameAttributes::CLONED);
        assert_eq!(settle(&mut registry, slots[0], SlotState::Ready).unwrap(), Disposition::Cloned);
        assert_eq!(registry.fill_level().ready, 2);
    }
}
