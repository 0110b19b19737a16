//! Packet abstractions for encoded media data.
//!
//! Packets are pooled containers: they are acquired unreferenced from a
//! [`PacketPool`](crate::pool::PacketPool), filled by a reader or by
//! referencing another packet, and returned to the pool once dispatched.

use crate::error::{Error, Result};
use crate::timestamp::NO_PTS;
use bitflags::bitflags;
use bytes::Bytes;
use std::fmt;

bitflags! {
    /// Flags for packet properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        /// This packet contains a keyframe.
        const KEYFRAME = 0x0001;
        /// Packet data is corrupted.
        const CORRUPT = 0x0002;
        /// Packet should be discarded.
        const DISCARD = 0x0004;
    }
}

/// An encoded media packet.
///
/// The payload is opaque at this layer and reference-counted, so
/// [`Packet::ref_from`] is a cheap copy that gives the holder its own
/// logical reference.
pub struct Packet {
    /// The packet payload.
    data: Bytes,
    /// Presentation timestamp in stream time base units.
    pub pts: i64,
    /// Decode timestamp in stream time base units.
    pub dts: i64,
    /// Duration of the packet in stream time base units.
    pub duration: i64,
    /// Stream index this packet belongs to.
    pub stream_index: usize,
    /// Packet flags.
    pub flags: PacketFlags,
}

impl Packet {
    /// Create a new, unreferenced packet.
    pub fn new() -> Self {
        Self {
            data: Bytes::new(),
            pts: NO_PTS,
            dts: NO_PTS,
            duration: 0,
            stream_index: 0,
            flags: PacketFlags::empty(),
        }
    }

    /// Get the packet payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Set the packet payload.
    pub fn set_data(&mut self, data: Bytes) {
        self.data = data;
    }

    /// Get the size of the packet payload in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check if this packet carries no payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if this packet has a defined PTS.
    pub fn has_pts(&self) -> bool {
        self.pts != NO_PTS
    }

    /// Check if this is a keyframe packet.
    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(PacketFlags::KEYFRAME)
    }

    /// Reference another packet's payload and copy its metadata.
    ///
    /// The destination must be unreferenced; pooled packets are handed out
    /// in that state.
    pub fn ref_from(&mut self, src: &Packet) -> Result<()> {
        if !self.data.is_empty() {
            return Err(Error::Ref("packet already holds a payload".into()));
        }
        self.data = src.data.clone();
        self.pts = src.pts;
        self.dts = src.dts;
        self.duration = src.duration;
        self.stream_index = src.stream_index;
        self.flags = src.flags;
        Ok(())
    }

    /// Drop the payload reference and reset metadata to the pooled-idle state.
    pub fn unref(&mut self) {
        self.data = Bytes::new();
        self.pts = NO_PTS;
        self.dts = NO_PTS;
        self.duration = 0;
        self.stream_index = 0;
        self.flags = PacketFlags::empty();
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("size", &self.size())
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("stream_index", &self.stream_index)
            .field("flags", &self.flags)
            .finish()
    }
}
