//! Packet duration inference.
//!
//! Containers do not always carry packet durations; the durationer infers
//! them per stream from consecutive PTS values.

use avflow_core::packet::Packet;
use avflow_core::timestamp::NO_PTS;

/// Per-stream duration bookkeeping, mutated only by the demuxer read loop.
#[derive(Debug, Default)]
pub struct PacketDurationer {
    last_pts: Option<i64>,
    last_duration: i64,
}

impl PacketDurationer {
    /// Create a durationer with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a packet, returning the duration of the *previous*
    /// packet of the stream: the PTS delta when positive, zero otherwise.
    pub fn handle_pkt(&mut self, pkt: &Packet) -> i64 {
        let mut duration = 0;
        if pkt.pts != NO_PTS {
            if let Some(last) = self.last_pts {
                if pkt.pts > last {
                    duration = pkt.pts - last;
                }
            }
            self.last_pts = Some(pkt.pts);
        }
        self.last_duration = duration;
        duration
    }

    /// Return the last observed duration and reset state.
    ///
    /// Called by the looper when closing a loop iteration: the final packet
    /// of the iteration has no successor, so its duration is estimated from
    /// the preceding gap.
    pub fn flush(&mut self) -> i64 {
        let duration = self.last_duration;
        self.last_pts = None;
        self.last_duration = 0;
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_with_pts(pts: i64) -> Packet {
        let mut pkt = Packet::new();
        pkt.pts = pts;
        pkt
    }

    #[test]
    fn test_first_packet_has_zero_duration() {
        let mut d = PacketDurationer::new();
        assert_eq!(d.handle_pkt(&packet_with_pts(10)), 0);
    }

    #[test]
    fn test_duration_is_pts_delta() {
        let mut d = PacketDurationer::new();
        d.handle_pkt(&packet_with_pts(0));
        assert_eq!(d.handle_pkt(&packet_with_pts(3)), 3);
        assert_eq!(d.handle_pkt(&packet_with_pts(5)), 2);
    }

    #[test]
    fn test_non_monotonic_pts_yields_zero() {
        let mut d = PacketDurationer::new();
        d.handle_pkt(&packet_with_pts(10));
        assert_eq!(d.handle_pkt(&packet_with_pts(10)), 0);
        assert_eq!(d.handle_pkt(&packet_with_pts(4)), 0);
    }

    #[test]
    fn test_undefined_pts_leaves_state_untouched() {
        let mut d = PacketDurationer::new();
        d.handle_pkt(&packet_with_pts(0));
        assert_eq!(d.handle_pkt(&Packet::new()), 0);
        assert_eq!(d.handle_pkt(&packet_with_pts(2)), 2);
    }

    #[test]
    fn test_flush_returns_last_and_resets() {
        let mut d = PacketDurationer::new();
        d.handle_pkt(&packet_with_pts(0));
        d.handle_pkt(&packet_with_pts(1));
        assert_eq!(d.flush(), 1);

        // State is gone: the next packet starts a fresh stream history.
        assert_eq!(d.handle_pkt(&packet_with_pts(100)), 0);
        assert_eq!(d.flush(), 0);
    }
}
