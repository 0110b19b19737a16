//! Decoded frame container.
//!
//! Frames follow the same pool discipline as packets: acquired
//! unreferenced, referenced from an upstream frame, returned to the pool
//! once dispatched. The payload is opaque at this layer.

use crate::error::{Error, Result};
use crate::timestamp::NO_PTS;
use bytes::Bytes;
use std::fmt;

/// A decoded media frame with an opaque, reference-counted payload.
pub struct Frame {
    data: Bytes,
    /// Presentation timestamp in the owning context's time base units.
    pub pts: i64,
}

impl Frame {
    /// Create a new, unreferenced frame.
    pub fn new() -> Self {
        Self {
            data: Bytes::new(),
            pts: NO_PTS,
        }
    }

    /// Get the frame payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Set the frame payload.
    pub fn set_data(&mut self, data: Bytes) {
        self.data = data;
    }

    /// Check if this frame carries no payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if this frame has a defined PTS.
    pub fn has_pts(&self) -> bool {
        self.pts != NO_PTS
    }

    /// Reference another frame's payload and copy its metadata.
    ///
    /// The destination must be unreferenced; pooled frames are handed out
    /// in that state.
    pub fn ref_from(&mut self, src: &Frame) -> Result<()> {
        if !self.data.is_empty() {
            return Err(Error::Ref("frame already holds a payload".into()));
        }
        self.data = src.data.clone();
        self.pts = src.pts;
        Ok(())
    }

    /// Drop the payload reference and reset to the pooled-idle state.
    pub fn unref(&mut self) {
        self.data = Bytes::new();
        self.pts = NO_PTS;
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("size", &self.data.len())
            .field("pts", &self.pts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_ref_unref() {
        let mut src = Frame::new();
        src.set_data(Bytes::from_static(b"pixels"));
        src.pts = 40;

        let mut dst = Frame::new();
        dst.ref_from(&src).unwrap();
        assert_eq!(dst.data(), b"pixels");
        assert_eq!(dst.pts, 40);

        dst.unref();
        assert!(dst.is_empty());
        assert!(!dst.has_pts());
    }

    #[test]
    fn test_frame_ref_from_live_destination_fails() {
        let src = Frame::new();
        let mut dst = Frame::new();
        dst.set_data(Bytes::from_static(b"b"));
        assert!(dst.ref_from(&src).is_err());
    }
}
