//! Fixed-capacity pool of frame slots.
//!
//! Every slot owns one [`Frame`] whose buffer is allocated when the pool is
//! built and never reallocated afterwards. A slot's [`SlotState`] decides which
//! pipeline stage may touch it:
//!
//! ```text
//! FREE -> EMPTY -> WAIT -> LOCKED -> READY -> EMPTY -> FREE
//!                   \________\______________/
//!                      removed when skipped
//! ```
//!
//! Acquisition scans from a rotating cursor, so slots are reused round-robin
//! instead of always hammering the first one.

use crate::error::{Error, Result};
use crate::frame::{Frame, MediaKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    /// Unused, available for acquisition.
    Free,
    /// Claimed by the import stage, being filled.
    Empty,
    /// Filled, waiting for a worker.
    Wait,
    /// Owned by a worker running the filter chain.
    Locked,
    /// Filtered, waiting for the encoder.
    Ready,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Free => "FREE",
            Self::Empty => "EMPTY",
            Self::Wait => "WAIT",
            Self::Locked => "LOCKED",
            Self::Ready => "READY",
        };
        f.write_str(name)
    }
}

/// Generation-counted handle to a slot.
///
/// The generation changes every time the slot is acquired, so a handle kept
/// past the slot's release is rejected instead of aliasing the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: usize,
    generation: u32,
}

impl SlotId {
    /// Position of the slot in the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Acquisition generation.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Per-state slot counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FillLevel {
    /// Total number of slots.
    pub capacity: usize,
    /// Slots not in the FREE state.
    pub fill: usize,
    /// Slots in EMPTY.
    pub empty: usize,
    /// Slots in WAIT.
    pub wait: usize,
    /// Slots in LOCKED.
    pub locked: usize,
    /// Slots in READY.
    pub ready: usize,
}

impl FillLevel {
    fn counter(&mut self, state: SlotState) -> Option<&mut usize> {
        match state {
            SlotState::Free => None,
            SlotState::Empty => Some(&mut self.empty),
            SlotState::Wait => Some(&mut self.wait),
            SlotState::Locked => Some(&mut self.locked),
            SlotState::Ready => Some(&mut self.ready),
        }
    }
}

/// Conditions that can be checked against a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// No slot left for a new frame; one slot stays in reserve for
    /// duplicates when the pool holds more than one slot.
    Full,
    /// At least one frame is READY.
    Ready,
    /// No slot in use.
    Empty,
    /// At least one frame is LOCKED.
    Locked,
}

struct Slot {
    state: SlotState,
    generation: u32,
    frame: Option<Frame>,
}

/// A fixed arena of frame slots for one media kind.
pub struct SlotPool {
    kind: MediaKind,
    slots: Vec<Slot>,
    cursor: usize,
    level: FillLevel,
}

impl SlotPool {
    /// Create a pool of `capacity` slots (at least one), each with a buffer
    /// of `frame_size` bytes.
    pub fn new(kind: MediaKind, capacity: usize, frame_size: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity)
            .map(|_| Slot {
                state: SlotState::Free,
                generation: 0,
                frame: Some(Frame::new(kind, frame_size)),
            })
            .collect();
        Self {
            kind,
            slots,
            cursor: 0,
            level: FillLevel {
                capacity,
                ..FillLevel::default()
            },
        }
    }

    /// Media kind of the frames in this pool.
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Current per-state counts.
    pub fn fill_level(&self) -> FillLevel {
        self.level
    }

    /// Claim the first FREE slot at or after the cursor; the slot moves to
    /// EMPTY. Returns `None` when every slot is in use.
    pub fn acquire_free_slot(&mut self) -> Option<SlotId> {
        let capacity = self.slots.len();
        for step in 0..capacity {
            let index = (self.cursor + step) % capacity;
            let slot = &mut self.slots[index];
            if slot.state == SlotState::Free {
                slot.state = SlotState::Empty;
                slot.generation = slot.generation.wrapping_add(1);
                self.cursor = (index + 1) % capacity;
                self.level.fill += 1;
                self.level.empty += 1;
                return Some(SlotId {
                    index,
                    generation: slot.generation,
                });
            }
        }
        None
    }

    /// Return a slot to FREE. Only legal from EMPTY with the frame in place.
    pub fn release(&mut self, id: SlotId) -> Result<()> {
        let kind = self.kind;
        let slot = self.slot_mut(id)?;
        if slot.state != SlotState::Empty {
            error!(
                media = %kind,
                slot = id.index,
                state = %slot.state,
                "Refusing to release a slot that is not EMPTY"
            );
            return Err(Error::InvalidState {
                operation: "release",
                expected: SlotState::Empty,
                found: slot.state,
            });
        }
        if slot.frame.is_none() {
            return Err(Error::FrameCheckedOut(id.index));
        }
        slot.state = SlotState::Free;
        self.level.empty -= 1;
        self.level.fill -= 1;
        Ok(())
    }

    /// Current state of a slot.
    pub fn state(&self, id: SlotId) -> Result<SlotState> {
        Ok(self.slot(id)?.state)
    }

    /// Move a live slot to another non-FREE state and return the old one.
    pub fn set_state(&mut self, id: SlotId, state: SlotState) -> Result<SlotState> {
        if state == SlotState::Free {
            return Err(Error::invalid_param("use release() to free a slot"));
        }
        let slot = self.slot_mut(id)?;
        let old = slot.state;
        slot.state = state;
        if let Some(counter) = self.level.counter(old) {
            *counter -= 1;
        }
        if let Some(counter) = self.level.counter(state) {
            *counter += 1;
        }
        Ok(old)
    }

    /// Borrow the frame of a live slot.
    pub fn frame(&self, id: SlotId) -> Result<&Frame> {
        self.slot(id)?
            .frame
            .as_ref()
            .ok_or(Error::FrameCheckedOut(id.index))
    }

    /// Mutably borrow the frame of a live slot.
    pub fn frame_mut(&mut self, id: SlotId) -> Result<&mut Frame> {
        self.slot_mut(id)?
            .frame
            .as_mut()
            .ok_or(Error::FrameCheckedOut(id.index))
    }

    /// Move the frame out of its slot so a stage can work on it without
    /// holding the pool lock. The slot keeps its state.
    pub fn take_frame(&mut self, id: SlotId) -> Result<Frame> {
        self.slot_mut(id)?
            .frame
            .take()
            .ok_or(Error::FrameCheckedOut(id.index))
    }

    /// Put a frame taken with [`take_frame`](Self::take_frame) back.
    pub fn restore_frame(&mut self, id: SlotId, frame: Frame) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if slot.frame.is_some() {
            return Err(Error::invalid_param(format!(
                "slot {} already holds a frame",
                id.index
            )));
        }
        slot.frame = Some(frame);
        Ok(())
    }

    /// Evaluate a pool condition.
    pub fn check(&self, status: PoolStatus) -> bool {
        match status {
            PoolStatus::Full => self.is_full(),
            PoolStatus::Ready => self.level.ready > 0,
            PoolStatus::Empty => self.level.fill == 0,
            PoolStatus::Locked => self.level.locked > 0,
        }
    }

    /// Whether a producer has to wait before registering a new frame.
    pub fn is_full(&self) -> bool {
        let capacity = self.slots.len();
        let limit = if capacity > 1 { capacity - 1 } else { capacity };
        self.level.fill >= limit
    }

    /// Whether any slot is FREE, including the duplicate reserve.
    pub fn has_free_slot(&self) -> bool {
        self.level.fill < self.slots.len()
    }

    fn slot(&self, id: SlotId) -> Result<&Slot> {
        match self.slots.get(id.index) {
            Some(slot) if slot.generation == id.generation && slot.state != SlotState::Free => {
                Ok(slot)
            }
            _ => Err(Error::UnknownSlot {
                index: id.index,
                generation: id.generation,
            }),
        }
    }

    fn slot_mut(&mut self, id: SlotId) -> Result<&mut Slot> {
        match self.slots.get_mut(id.index) {
            Some(slot) if slot.generation == id.generation && slot.state != SlotState::Free => {
                Ok(slot)
            }
            _ => Err(Error::UnknownSlot {
                index: id.index,
                generation: id.generation,
            }),
        }
    }
}

impl fmt::Debug for SlotPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPool")
            .field("kind", &self.kind)
            .field("cursor", &self.cursor)
            .field("level", &self.level)
            .finish()
    }
}
