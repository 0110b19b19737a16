//! Prelude module for convenient imports.
//!
//! Re-exports the most commonly used types and traits for glob imports:
//!
//! ```rust
//! use avflow::prelude::*;
//! ```

// Core error types
pub use crate::{Error, Result};

// Containers and pools
pub use crate::{Frame, FramePool, Packet, PacketFlags, PacketPool};

// Dispatch surface
pub use crate::{
    Descriptor, FrameHandler, FramePayload, PacketHandler, PacketPayload,
};

// Timing
pub use crate::{Rational, TimeBase, NO_PTS};

// Nodes and events
pub use crate::{Event, EventBus, NodeControl, NodeId};

// Logger
pub use crate::{EventLogger, LogSink, StdSink};

// Demuxing
pub use crate::{
    Demuxer, DemuxerOptions, MediaInput, MemoryInput, MemoryPacket, StreamContext, StreamKind,
};

// Rate enforcement
pub use crate::{
    Filler, OutputContext, PreviousFiller, RateEnforcer, RateEnforcerOptions, StaticFiller,
};
