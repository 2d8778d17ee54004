//! Raw frame model shared by every pipeline stage.
//!
//! A [`Frame`] owns a buffer allocated once, when its slot is created, and
//! reused for every frame that passes through the slot.

use crate::error::{Error, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Media type carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Video frames.
    Video,
    /// Audio frames.
    Audio,
}

impl MediaKind {
    /// Both media kinds, video first.
    pub const ALL: [MediaKind; 2] = [MediaKind::Video, MediaKind::Audio];

    /// Short lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Markers attached to a frame while it travels through the pipeline.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FrameAttributes: u32 {
        /// Frame is a keyframe.
        const KEYFRAME = 0x0001;
        /// Frame is interlaced.
        const INTERLACED = 0x0002;
        /// Frame data is damaged.
        const BROKEN = 0x0004;
        /// Frame is dropped by a filter.
        const SKIPPED = 0x0008;
        /// Frame must be emitted once more.
        const CLONED = 0x0010;
        /// Frame is the second emission of a cloned frame.
        const WAS_CLONED = 0x0020;
        /// Frame lies outside the requested encode range.
        const OUT_OF_RANGE = 0x0040;
        /// Encoder needs more input before producing output.
        const DELAYED = 0x0080;
        /// Last frame of the stream; carries no data.
        const END_OF_STREAM = 0x0100;
    }
}

impl FrameAttributes {
    /// Whether filters should run on a frame with these attributes.
    pub fn needs_processing(&self) -> bool {
        !self.intersects(Self::OUT_OF_RANGE | Self::END_OF_STREAM)
    }
}

/// A raw audio or video frame living in a pool slot.
#[derive(Debug)]
pub struct Frame {
    id: u64,
    kind: MediaKind,
    /// Frame markers.
    pub attributes: FrameAttributes,
    buffer: Vec<u8>,
    len: usize,
    clone_count: u32,
}

impl Frame {
    /// Create a frame with a zeroed buffer of `capacity` bytes.
    pub fn new(kind: MediaKind, capacity: usize) -> Self {
        Self {
            id: 0,
            kind,
            attributes: FrameAttributes::empty(),
            buffer: vec![0u8; capacity],
            len: 0,
            clone_count: 0,
        }
    }

    /// Sequence number assigned at registration.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Media kind.
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Size of the underlying buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the frame carries no payload.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// How many times this frame has been duplicated.
    pub fn clone_count(&self) -> u32 {
        self.clone_count
    }

    /// Valid payload.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// Mutable view of the valid payload.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..self.len]
    }

    /// The whole buffer, for producers that write first and call
    /// [`set_len`](Self::set_len) afterwards.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Set the number of valid bytes.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.buffer.len() {
            return Err(Error::BufferTooSmall {
                needed: len,
                available: self.buffer.len(),
            });
        }
        self.len = len;
        Ok(())
    }

    /// Copy `data` into the buffer.
    pub fn fill_from(&mut self, data: &[u8]) -> Result<()> {
        self.set_len(data.len())?;
        self.buffer[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Fill the first `len` bytes with silence.
    pub fn zero_fill(&mut self, len: usize) -> Result<()> {
        self.set_len(len)?;
        self.buffer[..len].fill(0);
        Ok(())
    }

    /// Check the attribute set.
    pub fn has(&self, attributes: FrameAttributes) -> bool {
        self.attributes.contains(attributes)
    }

    /// Whether filters should run on this frame.
    pub fn needs_processing(&self) -> bool {
        self.attributes.needs_processing()
    }

    /// Prepare the frame for a fresh registration.
    pub(crate) fn reset(&mut self, id: u64) {
        self.id = id;
        self.attributes = FrameAttributes::empty();
        self.len = 0;
        self.clone_count = 0;
    }

    /// Deep copy `src` into this frame, keeping this frame's buffer.
    pub(crate) fn copy_from(&mut self, src: &Frame) -> Result<()> {
        self.fill_from(src.data())?;
        self.id = src.id;
        self.attributes = src.attributes;
        self.clone_count = src.clone_count;
        Ok(())
    }

    pub(crate) fn bump_clone_count(&mut self) {
        self.clone_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_bits() {
        assert_eq!(FrameAttributes::SKIPPED.bits(), 8);
        assert_eq!(FrameAttributes::CLONED.bits(), 16);
        assert_eq!(FrameAttributes::END_OF_STREAM.bits(), 256);
    }

    #[test]
    fn test_needs_processing() {
        assert!(FrameAttributes::KEYFRAME.needs_processing());
        assert!(!FrameAttributes::OUT_OF_RANGE.needs_processing());
        assert!(!(FrameAttributes::END_OF_STREAM | FrameAttributes::KEYFRAME).needs_processing());
    }

    #[test]
    fn test_fill_never_grows_buffer() {
        let mut frame = Frame::new(MediaKind::Audio, 16);
        frame.fill_from(&[1, 2, 3]).unwrap();
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert_eq!(frame.capacity(), 16);

        let err = frame.fill_from(&[0u8; 17]).unwrap_err();
        assert!(matches!(
            err,
            Error::BufferTooSmall {
                needed: 17,
                available: 16
            }
        ));
        assert_eq!(frame.capacity(), 16);
    }

    #[test]
    fn test_copy_from_keeps_own_buffer() {
        let mut src = Frame::new(MediaKind::Video, 8);
        src.reset(42);
        src.fill_from(&[9, 9]).unwrap();
        src.attributes |= FrameAttributes::KEYFRAME;

        let mut dst = Frame::new(MediaKind::Video, 8);
        dst.copy_from(&src).unwrap();
        assert_eq!(dst.id(), 42);
        assert_eq!(dst.data(), &[9, 9]);
        assert!(dst.has(FrameAttributes::KEYFRAME));
        assert_eq!(dst.capacity(), 8);
    }

    #[test]
    fn test_media_kind_serde() {
        let json = serde_json::to_string(&MediaKind::Audio).unwrap();
        assert_eq!(json, "\"audio\"");
    }
}
