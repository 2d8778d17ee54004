//! Ordered list of in-flight frames for one media kind.
//!
//! The registry owns a [`SlotPool`] and the arrival order of the slots that
//! are in use. Every stage looks up "the next frame to act on" here:
//!
//! - workers claim the first WAIT frame from the head,
//! - the encoder only ever consumes the head, and only when it is READY.
//!
//! A LOCKED or WAIT frame at the head therefore holds back every READY frame
//! behind it, which keeps output in registration order no matter in which
//! order the workers finish.

use crate::error::{Error, Result};
use crate::frame::{Frame, MediaKind};
use crate::pool::{FillLevel, PoolStatus, SlotId, SlotPool, SlotState};
use std::collections::VecDeque;
use tracing::debug;

/// Outcome of looking at the registry head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retrieved {
    /// The head is READY and may be consumed.
    Ready(SlotId),
    /// The head exists but is still owned by an earlier stage.
    Blocked(SlotState),
    /// Nothing is registered.
    Empty,
}

/// A live slot and the id its frame was registered with.
#[derive(Debug, Clone, Copy)]
struct Entry {
    slot: SlotId,
    frame_id: u64,
}

/// Slot pool plus the registration order of its live slots.
pub struct FrameRegistry {
    pool: SlotPool,
    order: VecDeque<Entry>,
}

impl FrameRegistry {
    /// Create a registry backed by a new pool.
    pub fn new(kind: MediaKind, capacity: usize, frame_size: usize) -> Self {
        let pool = SlotPool::new(kind, capacity, frame_size);
        Self {
            order: VecDeque::with_capacity(pool.capacity()),
            pool,
        }
    }

    /// Media kind of the registered frames.
    pub fn kind(&self) -> MediaKind {
        self.pool.kind()
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SlotPool {
        &self.pool
    }

    /// Number of registered frames.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if no frame is registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Per-state slot counts.
    pub fn fill_level(&self) -> FillLevel {
        self.pool.fill_level()
    }

    /// Evaluate a pool condition.
    pub fn check(&self, status: PoolStatus) -> bool {
        self.pool.check(status)
    }

    /// Claim a free slot for frame `frame_id` and append it at the tail in
    /// state EMPTY. Returns `Ok(None)` when the pool has no free slot.
    ///
    /// Ids must not decrease from head to tail.
    pub fn register(&mut self, frame_id: u64) -> Result<Option<SlotId>> {
        if let Some(tail) = self.order.back() {
            if frame_id < tail.frame_id {
                return Err(Error::invalid_param(format!(
                    "frame id {} registered after {}",
                    frame_id, tail.frame_id
                )));
            }
        }
        let Some(slot) = self.pool.acquire_free_slot() else {
            return Ok(None);
        };
        match self.pool.frame_mut(slot) {
            Ok(frame) => frame.reset(frame_id),
            Err(e) => {
                self.pool.release(slot)?;
                return Err(e);
            }
        }
        self.order.push_back(Entry { slot, frame_id });
        Ok(Some(slot))
    }

    /// Duplicate the frame in `original` into a fresh slot placed directly
    /// after it, in state WAIT. Returns `Ok(None)` when no slot is free.
    ///
    /// Both frames must be in place (not checked out).
    pub fn duplicate(&mut self, original: SlotId) -> Result<Option<SlotId>> {
        let position = self.position(original)?;
        let frame_id = self.order[position].frame_id;
        let Some(copy) = self.pool.acquire_free_slot() else {
            return Ok(None);
        };
        let filled = self.copy_frame(original, copy);
        if let Err(e) = filled {
            self.pool.release(copy)?;
            return Err(e);
        }
        self.pool.set_state(copy, SlotState::Wait)?;
        self.order.insert(position + 1, Entry { slot: copy, frame_id });
        Ok(Some(copy))
    }

    fn copy_frame(&mut self, original: SlotId, copy: SlotId) -> Result<()> {
        let mut target = self.pool.take_frame(copy)?;
        let result = self.pool.frame(original).and_then(|src| target.copy_from(src));
        if result.is_ok() && target.kind() == MediaKind::Video {
            target.bump_clone_count();
        }
        self.pool.restore_frame(copy, target)?;
        result
    }

    /// Look at the head without skipping over anything.
    pub fn retrieve_ready(&self) -> Result<Retrieved> {
        let Some(head) = self.order.front() else {
            return Ok(Retrieved::Empty);
        };
        match self.pool.state(head.slot)? {
            SlotState::Ready => Ok(Retrieved::Ready(head.slot)),
            other => Ok(Retrieved::Blocked(other)),
        }
    }

    /// Find the first frame in state `from`, counting from the head, and move
    /// it to `to`.
    pub fn claim(&mut self, from: SlotState, to: SlotState) -> Result<Option<SlotId>> {
        let found = self
            .order
            .iter()
            .map(|entry| entry.slot)
            .find(|&slot| self.pool.state(slot).ok() == Some(from));
        match found {
            Some(slot) => {
                self.pool.set_state(slot, to)?;
                Ok(Some(slot))
            }
            None => Ok(None),
        }
    }

    /// Change the state of a registered frame and return the old state.
    pub fn set_state(&mut self, slot: SlotId, state: SlotState) -> Result<SlotState> {
        self.pool.set_state(slot, state)
    }

    /// Current state of a registered frame.
    pub fn state(&self, slot: SlotId) -> Result<SlotState> {
        self.pool.state(slot)
    }

    /// Unlink a frame from any state and give its slot back to the pool.
    pub fn remove(&mut self, slot: SlotId) -> Result<()> {
        let position = self.position(slot)?;
        if self.pool.state(slot)? != SlotState::Empty {
            self.pool.set_state(slot, SlotState::Empty)?;
        }
        self.pool.release(slot)?;
        self.order.remove(position);
        Ok(())
    }

    /// Remove every registered frame. Fails if a frame is still checked out.
    pub fn flush(&mut self) -> Result<usize> {
        let mut removed = 0;
        while let Some(head) = self.order.front().map(|entry| entry.slot) {
            self.remove(head)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Borrow a registered frame.
    pub fn frame(&self, slot: SlotId) -> Result<&Frame> {
        self.pool.frame(slot)
    }

    /// Mutably borrow a registered frame.
    pub fn frame_mut(&mut self, slot: SlotId) -> Result<&mut Frame> {
        self.pool.frame_mut(slot)
    }

    /// Check a frame out of its slot; see [`SlotPool::take_frame`].
    pub fn take_frame(&mut self, slot: SlotId) -> Result<Frame> {
        self.pool.take_frame(slot)
    }

    /// Return a checked out frame.
    pub fn restore_frame(&mut self, slot: SlotId, frame: Frame) -> Result<()> {
        self.pool.restore_frame(slot, frame)
    }

    /// Registered frame ids from head to tail.
    pub fn frame_ids(&self) -> Vec<u64> {
        self.order.iter().map(|entry| entry.frame_id).collect()
    }

    /// Log the per-state counts.
    pub fn log_fill_level(&self, tag: &str) {
        let level = self.pool.fill_level();
        debug!(
            media = %self.kind(),
            tag,
            fill = level.fill,
            capacity = level.capacity,
            empty = level.empty,
            wait = level.wait,
            locked = level.locked,
            ready = level.ready,
            "Frame fill level"
        );
    }

    fn position(&self, slot: SlotId) -> Result<usize> {
        self.order
            .iter()
            .position(|entry| entry.slot == slot)
            .ok_or(Error::UnknownSlot {
                index: slot.index(),
                generation: slot.generation(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameAttributes;

    fn registry(capacity: usize) -> FrameRegistry {
        FrameRegistry::new(MediaKind::Video, capacity, 64)
    }

    #[test]
    fn test_register_appends_in_order() {
        let mut reg = registry(4);
        for id in 1..=3 {
            let slot = reg.register(id).unwrap().unwrap();
            assert_eq!(reg.state(slot).unwrap(), SlotState::Empty);
        }
        assert_eq!(reg.frame_ids(), vec![1, 2, 3]);
        assert!(reg.register(0).is_err());
    }

    #[test]
    fn test_register_checks_order_while_tail_checked_out() {
        let mut reg = registry(4);
        reg.register(5).unwrap().unwrap();
        let tail = reg.register(7).unwrap().unwrap();
        let frame = reg.take_frame(tail).unwrap();

        assert!(reg.register(6).is_err());
        assert_eq!(reg.frame_ids(), vec![5, 7]);
        reg.register(7).unwrap().unwrap();

        reg.restore_frame(tail, frame).unwrap();
        assert_eq!(reg.frame_ids(), vec![5, 7, 7]);
    }

    #[test]
    fn test_register_without_free_slot() {
        let mut reg = registry(2);
        reg.register(1).unwrap().unwrap();
        reg.register(2).unwrap().unwrap();
        assert!(reg.register(3).unwrap().is_none());
    }

    #[test]
    fn test_locked_head_blocks_ready_tail() {
        let mut reg = registry(4);
        let a = reg.register(1).unwrap().unwrap();
        let b = reg.register(2).unwrap().unwrap();
        reg.set_state(a, SlotState::Locked).unwrap();
        reg.set_state(b, SlotState::Ready).unwrap();
        assert_eq!(
            reg.retrieve_ready().unwrap(),
            Retrieved::Blocked(SlotState::Locked)
        );

        reg.set_state(a, SlotState::Ready).unwrap();
        assert_eq!(reg.retrieve_ready().unwrap(), Retrieved::Ready(a));
        reg.remove(a).unwrap();
        assert_eq!(reg.retrieve_ready().unwrap(), Retrieved::Ready(b));
    }

    #[test]
    fn test_claim_takes_first_from_head() {
        let mut reg = registry(4);
        let a = reg.register(1).unwrap().unwrap();
        let b = reg.register(2).unwrap().unwrap();
        reg.set_state(a, SlotState::Wait).unwrap();
        reg.set_state(b, SlotState::Wait).unwrap();

        assert_eq!(reg.claim(SlotState::Wait, SlotState::Locked).unwrap(), Some(a));
        assert_eq!(reg.claim(SlotState::Wait, SlotState::Locked).unwrap(), Some(b));
        assert_eq!(reg.claim(SlotState::Wait, SlotState::Locked).unwrap(), None);
        assert_eq!(reg.fill_level().locked, 2);
    }

    #[test]
    fn test_remove_from_middle() {
        let mut reg = registry(4);
        let _a = reg.register(1).unwrap().unwrap();
        let b = reg.register(2).unwrap().unwrap();
        let _c = reg.register(3).unwrap().unwrap();
        reg.set_state(b, SlotState::Locked).unwrap();
        reg.remove(b).unwrap();
        assert_eq!(reg.frame_ids(), vec![1, 3]);
        assert_eq!(reg.fill_level().fill, 2);
        assert!(reg.remove(b).is_err());
    }

    #[test]
    fn test_duplicate_links_after_original() {
        let mut reg = registry(4);
        let a = reg.register(1).unwrap().unwrap();
        let _b = reg.register(2).unwrap().unwrap();
        {
            let frame = reg.frame_mut(a).unwrap();
            frame.fill_from(&[5, 6, 7]).unwrap();
            frame.attributes |= FrameAttributes::KEYFRAME;
        }
        let copy = reg.duplicate(a).unwrap().unwrap();
        assert_eq!(reg.state(copy).unwrap(), SlotState::Wait);
        assert_eq!(reg.frame_ids(), vec![1, 1, 2]);

        let dup = reg.frame(copy).unwrap();
        assert_eq!(dup.data(), &[5, 6, 7]);
        assert!(dup.has(FrameAttributes::KEYFRAME));
        assert_eq!(dup.clone_count(), 1);
    }

    #[test]
    fn test_duplicate_without_free_slot() {
        let mut reg = registry(1);
        let a = reg.register(1).unwrap().unwrap();
        assert!(reg.duplicate(a).unwrap().is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_round_trip_reuses_buffer() {
        let mut reg = registry(1);
        let slot = reg.register(1).unwrap().unwrap();
        reg.set_state(slot, SlotState::Wait).unwrap();
        reg.set_state(slot, SlotState::Ready).unwrap();
        reg.remove(slot).unwrap();
        assert!(reg.check(PoolStatus::Empty));

        let again = reg.register(2).unwrap().unwrap();
        assert_eq!(again.index(), slot.index());
        assert_eq!(reg.frame(again).unwrap().capacity(), 64);
        assert_eq!(reg.frame(again).unwrap().id(), 2);
    }

    #[test]
    fn test_flush() {
        let mut reg = registry(4);
        for id in 0..3 {
            let slot = reg.register(id).unwrap().unwrap();
            reg.set_state(slot, SlotState::Ready).unwrap();
        }
        assert_eq!(reg.flush().unwrap(), 3);
        assert!(reg.is_empty());
        assert_eq!(reg.retrieve_ready().unwrap(), Retrieved::Empty);
    }
}
