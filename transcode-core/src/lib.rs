//! # Transcode Core
//!
//! Frame-level building blocks for the transcode pipeline.
//!
//! This crate provides:
//! - Error handling types
//! - The raw frame model and its attribute markers
//! - Encoded packets and codec identifiers
//! - Half-open frame ranges
//! - The fixed-capacity slot pool and the ordered frame registry
//!
//! Nothing in here spawns threads. The pipeline wraps each
//! [`FrameRegistry`] in a lock and shares it between its stages.

pub mod codec;
pub mod error;
pub mod frame;
pub mod packet;
pub mod pool;
pub mod range;
pub mod registry;

pub use codec::Codec;
pub use error::{Error, Result};
pub use frame::{Frame, FrameAttributes, MediaKind};
pub use packet::{Packet, PacketFlags};
pub use pool::{FillLevel, PoolStatus, SlotId, SlotPool, SlotState};
pub use range::{FrameRange, FrameRanges};
pub use registry::{FrameRegistry, Retrieved};
