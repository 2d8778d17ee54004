//! Encoded packet passed from encoders to multiplexers.

use crate::frame::MediaKind;
use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Flags for packet properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        /// This packet contains a keyframe.
        const KEYFRAME = 0x0001;
        /// Packet was produced while draining the encoder.
        const FLUSHED = 0x0002;
    }
}

/// An encoded media packet.
///
/// The encoder stage keeps one packet per media kind and reuses it for every
/// frame, so the allocation survives across calls.
#[derive(Clone)]
pub struct Packet {
    data: Vec<u8>,
    kind: MediaKind,
    /// Id of the frame this packet was produced from.
    pub frame_id: u64,
    /// Packet flags.
    pub flags: PacketFlags,
}

impl Packet {
    /// Create an empty packet with room for `capacity` bytes.
    pub fn with_capacity(kind: MediaKind, capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            kind,
            frame_id: 0,
            flags: PacketFlags::empty(),
        }
    }

    /// Media kind of the packet.
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Get the packet data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get the size of the packet data.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check if this packet is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Replace the payload.
    pub fn set_data(&mut self, data: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(data);
    }

    /// Append to the payload.
    pub fn extend(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Drop payload and flags, keeping the allocation.
    pub fn clear(&mut self) {
        self.data.clear();
        self.frame_id = 0;
        self.flags = PacketFlags::empty();
    }

    /// Check if this is a keyframe packet.
    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(PacketFlags::KEYFRAME)
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("kind", &self.kind)
            .field("frame_id", &self.frame_id)
            .field("size", &self.data.len())
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_keeps_allocation() {
        let mut packet = Packet::with_capacity(MediaKind::Video, 64);
        packet.set_data(&[1, 2, 3]);
        packet.flags |= PacketFlags::KEYFRAME;
        packet.frame_id = 7;
        assert!(packet.is_keyframe());
        assert_eq!(packet.size(), 3);

        packet.clear();
        assert!(packet.is_empty());
        assert!(!packet.is_keyframe());
        assert!(packet.data.capacity() >= 64);
    }

    #[test]
    fn test_debug_hides_payload() {
        let mut packet = Packet::with_capacity(MediaKind::Audio, 0);
        packet.set_data(&[0u8; 1000]);
        let s = format!("{:?}", packet);
        assert!(s.contains("size: 1000"));
    }
}
