//! # avflow-demux
//!
//! Demuxer for the avflow media pipeline.
//!
//! The demuxer reads packets out of an opaque [`MediaInput`], infers
//! missing packet durations per stream, optionally loops the input with
//! seamless restamping, and releases packets either straight to registered
//! handlers or paced against the wall clock through per-stream rate
//! emulators.

pub mod demuxer;
pub mod durationer;
pub mod emulator;
pub mod input;
pub mod looper;

pub use demuxer::{Demuxer, DemuxerOptions, DemuxerStats, ReadFrameErrorHandler};
pub use durationer::PacketDurationer;
pub use emulator::{RateEmulator, DEFAULT_BUFFER_DURATION};
pub use input::{
    InterruptFlag, MediaInput, MemoryInput, MemoryPacket, SeekMode, StreamContext, StreamKind,
};
pub use looper::Looper;
