//! Output frame restampers.

use avflow_core::frame::Frame;
use avflow_core::timestamp::NO_PTS;

/// Rewrites the PTS of dispatched frames.
pub trait Restamper: Send {
    /// Restamp one frame in place.
    fn restamp(&mut self, frame: &mut Frame);
}

/// Adds a fixed offset to every PTS.
pub struct OffsetRestamper {
    offset: i64,
}

impl OffsetRestamper {
    /// Create a restamper adding `offset` time base units.
    pub fn new(offset: i64) -> Self {
        Self { offset }
    }
}

impl Restamper for OffsetRestamper {
    fn restamp(&mut self, frame: &mut Frame) {
        if frame.pts != NO_PTS {
            frame.pts += self.offset;
        }
    }
}

/// Shifts output so the first frame starts at zero.
#[derive(Default)]
pub struct StartFromZeroRestamper {
    first: Option<i64>,
}

impl StartFromZeroRestamper {
    /// Create a restamper anchored on the first frame it sees.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Restamper for StartFromZeroRestamper {
    fn restamp(&mut self, frame: &mut Frame) {
        if frame.pts == NO_PTS {
            return;
        }
        let first = *self.first.get_or_insert(frame.pts);
        frame.pts -= first;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pts: i64) -> Frame {
        let mut f = Frame::new();
        f.pts = pts;
        f
    }

    #[test]
    fn test_offset_restamper() {
        let mut r = OffsetRestamper::new(100);
        let mut f = frame(5);
        r.restamp(&mut f);
        assert_eq!(f.pts, 105);
    }

    #[test]
    fn test_offset_skips_undefined_pts() {
        let mut r = OffsetRestamper::new(100);
        let mut f = Frame::new();
        r.restamp(&mut f);
        assert_eq!(f.pts, NO_PTS);
    }

    #[test]
    fn test_start_from_zero() {
        let mut r = StartFromZeroRestamper::new();
        let mut a = frame(40);
        let mut b = frame(41);
        r.restamp(&mut a);
        r.restamp(&mut b);
        assert_eq!(a.pts, 0);
        assert_eq!(b.pts, 1);
    }
}
