//! # avflow
//!
//! A media-processing pipeline framework.
//!
//! avflow moves packets and frames between nodes connected through
//! dispatchers. Its core pieces:
//! - a demuxer that reads an opaque media input, infers packet durations,
//!   loops seamlessly with monotonic restamping and optionally paces
//!   packet release against the wall clock,
//! - a rate enforcer that equalizes any number of frame sources onto one
//!   fixed output cadence with slot-based selection and gap filling,
//! - a merging event logger shared by the whole framework.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use avflow::prelude::*;
//! use std::sync::Arc;
//!
//! # struct Sink;
//! # impl PacketHandler for Sink {
//! #     fn handle_packet(&self, _payload: PacketPayload<'_>) {}
//! # }
//! #[tokio::main]
//! async fn main() -> avflow::Result<()> {
//!     let input: Box<dyn MediaInput> = Box::new(MemoryInput::new(vec![], vec![]));
//!     let demuxer = Demuxer::new(
//!         input,
//!         DemuxerOptions {
//!             loop_enabled: true,
//!             emulate_rate: true,
//!             ..Default::default()
//!         },
//!         EventBus::new(),
//!         NodeControl::new(),
//!     )?;
//!     demuxer.connect(Arc::new(Sink));
//!     demuxer.start().await.ok();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The workspace is organized into several crates:
//! - `avflow-core`: pooled containers, dispatchers, events, the logger
//! - `avflow-demux`: demuxing, looping restamp, rate emulation
//! - `avflow-framerate`: fixed-cadence rate enforcement
//!
//! This crate re-exports the most commonly used types.

pub mod prelude;

// Re-export core types
pub use avflow_core::{
    dispatch::{
        Descriptor, FrameDispatcher, FrameHandler, FramePayload, PacketDispatcher, PacketHandler,
        PacketPayload,
    },
    error::{Error, Result},
    event::{emit_error, Event, EventBus},
    frame::Frame,
    logger::{EventLogger, LogLevel, LogSink, StdSink},
    node::{NodeControl, NodeId},
    packet::{Packet, PacketFlags},
    pool::{FramePool, PacketPool},
    rational::Rational,
    timestamp::{ns_to_time_base, rescale_to_ns, TimeBase, NO_PTS},
};

// Re-export demuxer types
pub use avflow_demux::{
    Demuxer, DemuxerOptions, DemuxerStats, InterruptFlag, MediaInput, MemoryInput, MemoryPacket,
    SeekMode, StreamContext, StreamKind,
};

// Re-export rate enforcer types
pub use avflow_framerate::{
    Filler, FramerateError, OffsetRestamper, OutputContext, PreviousFiller, RateEnforcer,
    RateEnforcerOptions, RateEnforcerStats, Restamper, StartFromZeroRestamper, StaticFiller,
};
