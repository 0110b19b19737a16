//! Loop-boundary restamping.
//!
//! When the demuxer loops back to the start of its input, packet
//! timestamps restart from zero. The looper tracks how much media time
//! each stream has accumulated and restamps subsequent packets so that
//! concatenated iterations carry monotonic, gap-free timestamps. Streams
//! rarely end at the same instant; the shorter ones are padded up to the
//! longest before the next iteration, with sub-tick leftovers carried as
//! nanosecond remainders.

use avflow_core::packet::Packet;
use avflow_core::timestamp::{ns_to_time_base, rescale_to_ns, TimeBase, NO_PTS};
use std::collections::HashMap;

/// Per-stream looper state, mutated only by the demuxer read loop.
#[derive(Debug)]
struct LooperStream {
    time_base: TimeBase,
    /// Media time accumulated in the current iteration, in tb units.
    duration: i64,
    /// Nanosecond equivalent of `duration`, refreshed at loop boundaries.
    duration_ns: i64,
    /// Estimated duration of the iteration's final packet, consumed by the
    /// first packet of the next iteration.
    last_duration: i64,
    /// Offset applied to every packet's DTS, in tb units.
    restamp_delta: i64,
    /// Sub-tick leftover from delta conversions, in nanoseconds.
    restamp_remainder_ns: i64,
}

impl LooperStream {
    fn new(time_base: TimeBase) -> Self {
        Self {
            time_base,
            duration: 0,
            duration_ns: 0,
            last_duration: 0,
            restamp_delta: 0,
            restamp_remainder_ns: 0,
        }
    }
}

/// Restamps packets across loop iterations.
pub struct Looper {
    streams: HashMap<usize, LooperStream>,
}

impl Looper {
    /// Create a looper for the given streams.
    pub fn new(streams: impl IntoIterator<Item = (usize, TimeBase)>) -> Self {
        Self {
            streams: streams
                .into_iter()
                .map(|(index, tb)| (index, LooperStream::new(tb)))
                .collect(),
        }
    }

    /// Account for a packet and restamp it when a loop offset is pending.
    ///
    /// `previous_duration` comes from the durationer; the first packet of a
    /// fresh iteration has no PTS history, so the duration estimated for
    /// the previous iteration's final packet is substituted exactly once.
    pub fn handle_pkt(&mut self, pkt: &mut Packet, previous_duration: &mut i64) {
        let Some(s) = self.streams.get_mut(&pkt.stream_index) else {
            return;
        };

        if *previous_duration > 0 {
            s.duration += *previous_duration;
        } else if s.last_duration > 0 {
            *previous_duration = s.last_duration;
            s.last_duration = 0;
        }

        if s.restamp_delta > 0 && pkt.pts != NO_PTS && pkt.dts != NO_PTS {
            let offset = pkt.pts - pkt.dts;
            pkt.dts += s.restamp_delta;
            pkt.pts = pkt.dts + offset;
        }
    }

    /// Close the current iteration.
    ///
    /// `flush` must drain the per-stream durationer, returning the last
    /// observed duration for the stream.
    pub fn looping(&mut self, mut flush: impl FnMut(usize) -> i64) {
        // Close every stream's duration and find the longest.
        let mut max_duration_ns = 0;
        for (index, s) in self.streams.iter_mut() {
            s.last_duration = flush(*index);
            s.duration += s.last_duration;
            s.duration_ns = rescale_to_ns(s.duration, s.time_base);
            if s.duration_ns > max_duration_ns {
                max_duration_ns = s.duration_ns;
            }
        }

        // Pad shorter streams up to the longest, carrying sub-tick
        // leftovers, then fold the whole iteration into the offset.
        for s in self.streams.values_mut() {
            let delta_ns = max_duration_ns - s.duration_ns + s.restamp_remainder_ns;
            let mut restamp_delta = s.duration;
            if delta_ns > 0 {
                let (ticks, remainder) = ns_to_time_base(delta_ns, s.time_base);
                s.restamp_remainder_ns = remainder;
                if ticks > 0 {
                    restamp_delta += ticks;
                    s.last_duration += ticks;
                }
            }
            s.restamp_delta += restamp_delta;
            s.duration = 0;
        }
    }

    /// Reset iteration state. The restamp delta is deliberately preserved:
    /// packets already queued downstream were stamped with it, and a
    /// restarted loop must not jump timestamps backwards.
    pub fn reset(&mut self) {
        for s in self.streams.values_mut() {
            s.duration = 0;
            s.last_duration = 0;
            s.restamp_remainder_ns = 0;
        }
    }

    /// Current restamp delta of a stream, in its time base units.
    pub fn restamp_delta(&self, stream: usize) -> i64 {
        self.streams.get(&stream).map_or(0, |s| s.restamp_delta)
    }

    /// Nanosecond length of the stream's last closed iteration.
    pub fn duration_ns(&self, stream: usize) -> i64 {
        self.streams.get(&stream).map_or(0, |s| s.duration_ns)
    }

    /// Pending sub-tick remainder of a stream, in nanoseconds.
    pub fn restamp_remainder_ns(&self, stream: usize) -> i64 {
        self.streams
            .get(&stream)
            .map_or(0, |s| s.restamp_remainder_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durationer::PacketDurationer;
    use proptest::prelude::*;

    fn packet(stream: usize, pts: i64, dts: i64) -> Packet {
        let mut pkt = Packet::new();
        pkt.stream_index = stream;
        pkt.pts = pts;
        pkt.dts = dts;
        pkt
    }

    /// Drive one stream through the looper the way the demuxer does.
    struct Harness {
        looper: Looper,
        durationers: HashMap<usize, PacketDurationer>,
    }

    impl Harness {
        fn new(streams: &[(usize, TimeBase)]) -> Self {
            Self {
                looper: Looper::new(streams.iter().copied()),
                durationers: streams
                    .iter()
                    .map(|(i, _)| (*i, PacketDurationer::new()))
                    .collect(),
            }
        }

        fn feed(&mut self, stream: usize, pts: i64, dts: i64) -> Packet {
            let mut pkt = packet(stream, pts, dts);
            let mut prev = self.durationers.get_mut(&stream).unwrap().handle_pkt(&pkt);
            self.looper.handle_pkt(&mut pkt, &mut prev);
            pkt
        }

        fn looping(&mut self) {
            let durationers = &mut self.durationers;
            self.looper
                .looping(|idx| durationers.get_mut(&idx).map_or(0, |d| d.flush()));
        }
    }

    #[test]
    fn test_monotonic_across_two_iterations() {
        let tb = TimeBase::new(1, 4);
        let mut h = Harness::new(&[(0, tb)]);

        let mut last_dts = i64::MIN;
        for _ in 0..2 {
            for pts in [0, 1, 2, 3] {
                let pkt = h.feed(0, pts, pts);
                assert!(pkt.dts >= last_dts);
                last_dts = pkt.dts;
            }
            h.looping();
        }

        // Second iteration is shifted by a full loop: 3 ticks of content
        // plus the flushed final-packet estimate.
        assert_eq!(h.looper.restamp_delta(0), 8);
    }

    #[test]
    fn test_pts_dts_offset_preserved() {
        let tb = TimeBase::new(1, 4);
        let mut h = Harness::new(&[(0, tb)]);

        for pts in [0, 1, 2, 3] {
            h.feed(0, pts, pts - 1);
        }
        h.looping();

        let pkt = h.feed(0, 0, -1);
        assert_eq!(pkt.pts - pkt.dts, 1);
        assert!(pkt.dts >= 0);
    }

    #[test]
    fn test_two_stream_alignment() {
        // Stream A: 4 packets at 1/4s per tick, one second of content.
        // Stream B: 3 packets at 1/2s per tick, a second and a half.
        let tb_a = TimeBase::new(1, 4);
        let tb_b = TimeBase::new(1, 2);
        let mut h = Harness::new(&[(0, tb_a), (1, tb_b)]);

        for pts in [0, 1, 2, 3] {
            h.feed(0, pts, pts);
        }
        for pts in [0, 1, 2] {
            h.feed(1, pts, pts);
        }
        h.looping();

        assert_eq!(h.looper.duration_ns(0), 1_000_000_000);
        assert_eq!(h.looper.duration_ns(1), 1_500_000_000);

        // A is bridged by the missing 0.5s (2 ticks at 1/4s) on top of its
        // own 4 ticks; B only carries its own content.
        assert_eq!(h.looper.restamp_delta(0), 6);
        assert_eq!(h.looper.restamp_delta(1), 3);
        assert_eq!(h.looper.restamp_remainder_ns(0), 0);
    }

    #[test]
    fn test_sub_tick_remainder_carried() {
        // Stream A ends 0.3s short with a 1/4s tick: one whole tick is
        // bridged now, 50ms carries to the next boundary.
        let tb_a = TimeBase::new(1, 4);
        let tb_b = TimeBase::new(1, 10);
        let mut h = Harness::new(&[(0, tb_a), (1, tb_b)]);

        for pts in [0, 1, 2, 3] {
            h.feed(0, pts, pts);
        }
        for pts in [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12] {
            h.feed(1, pts, pts);
        }
        h.looping();

        assert_eq!(h.looper.duration_ns(0), 1_000_000_000);
        assert_eq!(h.looper.duration_ns(1), 1_300_000_000);
        assert_eq!(h.looper.restamp_delta(0), 4 + 1);
        assert_eq!(h.looper.restamp_remainder_ns(0), 50_000_000);
    }

    #[test]
    fn test_reset_preserves_restamp_delta() {
        let tb = TimeBase::new(1, 4);
        let mut h = Harness::new(&[(0, tb)]);

        for pts in [0, 1, 2, 3] {
            h.feed(0, pts, pts);
        }
        h.looping();
        let delta = h.looper.restamp_delta(0);
        assert!(delta > 0);

        h.looper.reset();
        assert_eq!(h.looper.restamp_delta(0), delta);
        assert_eq!(h.looper.restamp_remainder_ns(0), 0);
    }

    #[test]
    fn test_unknown_stream_ignored() {
        let mut looper = Looper::new([(0, TimeBase::new(1, 4))]);
        let mut pkt = packet(9, 5, 5);
        let mut prev = 0;
        looper.handle_pkt(&mut pkt, &mut prev);
        assert_eq!(pkt.pts, 5);
    }

    proptest! {
        /// DTS never decreases across loop iterations and the PTS-DTS
        /// offset survives restamping, for arbitrary increasing PTS runs.
        #[test]
        fn prop_monotonic_dts(
            gaps in prop::collection::vec(1i64..20, 1..16),
            iterations in 2usize..5,
            offset in 0i64..3,
        ) {
            let tb = TimeBase::new(1, 30);
            let mut h = Harness::new(&[(0, tb)]);

            let mut last_dts = i64::MIN;
            for _ in 0..iterations {
                let mut pts = 0;
                for gap in &gaps {
                    let pkt = h.feed(0, pts, pts - offset);
                    prop_assert!(pkt.dts >= last_dts);
                    prop_assert_eq!(pkt.pts - pkt.dts, offset);
                    last_dts = pkt.dts;
                    pts += gap;
                }
                h.looping();
            }
        }
    }
}
