//! Media input abstraction.
//!
//! The native codec/format layer is an opaque collaborator: it produces
//! packets with timestamps in per-stream time bases and supports seeking.
//! Blocking calls poll an [`InterruptFlag`] so the demuxer can abort them
//! when its node is cancelled.

use avflow_core::dispatch::Descriptor;
use avflow_core::error::{Error, Result};
use avflow_core::packet::Packet;
use avflow_core::rational::Rational;
use avflow_core::timestamp::TimeBase;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation token polled by blocking input calls.
#[derive(Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    /// Create a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag; pending blocking calls return promptly.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Lower the flag.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Check whether the flag is raised.
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Seek mode options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekMode {
    /// Seek to the nearest position at or before the target (default).
    #[default]
    Backward,
    /// Seek to the nearest position at or after the target.
    Forward,
}

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Video stream.
    Video,
    /// Audio stream.
    Audio,
    /// Data stream.
    Data,
    /// Unknown stream kind.
    Unknown,
}

/// Parameters of one input stream, immutable after the input is probed.
#[derive(Debug, Clone)]
pub struct StreamContext {
    /// Stream index.
    pub index: usize,
    /// Time base of the stream's timestamps.
    pub time_base: TimeBase,
    /// Frame rate, zero when not applicable.
    pub frame_rate: Rational,
    /// Stream kind.
    pub kind: StreamKind,
}

impl StreamContext {
    /// The descriptor decorating packets dispatched for this stream.
    pub fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.time_base)
    }
}

/// Opaque format provider the demuxer reads from.
pub trait MediaInput: Send {
    /// Open the input.
    fn open(&mut self) -> Result<()>;

    /// Probe stream information. Called once after [`open`](Self::open).
    fn probe(&mut self) -> Result<()>;

    /// Stream contexts, available after probing.
    fn streams(&self) -> Vec<StreamContext>;

    /// Timestamp of the first packet, in the seek time base.
    fn start_time(&self) -> i64 {
        0
    }

    /// Read the next packet into `pkt`.
    ///
    /// Returns [`Error::EndOfStream`] at the end of the input and
    /// [`Error::Cancelled`] when the interrupt flag was raised.
    fn read_packet(&mut self, pkt: &mut Packet) -> Result<()>;

    /// Seek to `ts`; `stream` selects the reference stream (None for the
    /// container default).
    fn seek(&mut self, stream: Option<usize>, ts: i64, mode: SeekMode) -> Result<()>;

    /// Install the interrupt flag polled by blocking calls.
    fn set_interrupt(&mut self, flag: InterruptFlag);

    /// Close the input.
    fn close(&mut self);
}

/// One scripted packet of a [`MemoryInput`].
#[derive(Debug, Clone)]
pub struct MemoryPacket {
    /// Stream the packet belongs to.
    pub stream_index: usize,
    /// Presentation timestamp in the stream time base.
    pub pts: i64,
    /// Decode timestamp in the stream time base.
    pub dts: i64,
    /// Payload.
    pub data: Bytes,
}

impl MemoryPacket {
    /// Create a packet with equal PTS and DTS.
    pub fn new(stream_index: usize, pts: i64, data: Bytes) -> Self {
        Self {
            stream_index,
            pts,
            dts: pts,
            data,
        }
    }

    /// Create a packet with distinct PTS and DTS.
    pub fn with_dts(stream_index: usize, pts: i64, dts: i64, data: Bytes) -> Self {
        Self {
            stream_index,
            pts,
            dts,
            data,
        }
    }
}

/// Seekable scripted input backed by an in-memory packet table.
///
/// Used by the examples and the test-suite as a stand-in for a native
/// format context; honors the interrupt flag and backward seeks, which is
/// what looped playback exercises.
pub struct MemoryInput {
    streams: Vec<StreamContext>,
    packets: Vec<MemoryPacket>,
    cursor: usize,
    opened: bool,
    interrupt: InterruptFlag,
}

impl MemoryInput {
    /// Create an input over the given streams and packets; packets are
    /// returned in table order.
    pub fn new(streams: Vec<StreamContext>, packets: Vec<MemoryPacket>) -> Self {
        Self {
            streams,
            packets,
            cursor: 0,
            opened: false,
            interrupt: InterruptFlag::new(),
        }
    }
}

impl MediaInput for MemoryInput {
    fn open(&mut self) -> Result<()> {
        if self.interrupt.is_raised() {
            return Err(Error::Cancelled);
        }
        self.opened = true;
        Ok(())
    }

    fn probe(&mut self) -> Result<()> {
        if self.interrupt.is_raised() {
            return Err(Error::Cancelled);
        }
        if !self.opened {
            return Err(Error::Probe("input not opened".into()));
        }
        Ok(())
    }

    fn streams(&self) -> Vec<StreamContext> {
        self.streams.clone()
    }

    fn start_time(&self) -> i64 {
        self.packets.first().map_or(0, |p| p.pts)
    }

    fn read_packet(&mut self, pkt: &mut Packet) -> Result<()> {
        if self.interrupt.is_raised() {
            return Err(Error::Cancelled);
        }
        let Some(src) = self.packets.get(self.cursor) else {
            return Err(Error::EndOfStream);
        };
        self.cursor += 1;
        pkt.set_data(src.data.clone());
        pkt.pts = src.pts;
        pkt.dts = src.dts;
        pkt.stream_index = src.stream_index;
        Ok(())
    }

    fn seek(&mut self, _stream: Option<usize>, ts: i64, mode: SeekMode) -> Result<()> {
        if self.packets.is_empty() {
            return Err(Error::Seek("no packets".into()));
        }
        self.cursor = match mode {
            SeekMode::Backward => {
                // Nearest PTS at or before the target, entered at its
                // first table position so every stream replays from there.
                let target = self
                    .packets
                    .iter()
                    .map(|p| p.pts)
                    .filter(|&pts| pts <= ts)
                    .max()
                    .unwrap_or_else(|| {
                        self.packets.iter().map(|p| p.pts).min().unwrap_or(0)
                    });
                self.packets
                    .iter()
                    .position(|p| p.pts == target)
                    .unwrap_or(0)
            }
            SeekMode::Forward => self
                .packets
                .iter()
                .position(|p| p.pts >= ts)
                .ok_or_else(|| Error::Seek(format!("no packet at or after {ts}")))?,
        };
        Ok(())
    }

    fn set_interrupt(&mut self, flag: InterruptFlag) {
        self.interrupt = flag;
    }

    fn close(&mut self) {
        self.opened = false;
    }
}
