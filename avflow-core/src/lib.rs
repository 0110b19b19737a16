//! # avflow-core
//!
//! Core types and utilities for the avflow media pipeline framework.
//!
//! This crate provides the building blocks shared by every pipeline node:
//! - Error handling types
//! - Rational numbers and time-base conversion
//! - Pooled packet and frame containers
//! - Packet/frame dispatchers with per-stream predicates
//! - Node identity, cancellation and pause control
//! - The typed event bus
//! - The merging event logger
//! - Serial task queues and cancellation-aware sleeps

pub mod dispatch;
pub mod error;
pub mod event;
pub mod frame;
pub mod logger;
pub mod node;
pub mod packet;
pub mod pool;
pub mod rational;
pub mod task;
pub mod timestamp;

pub use dispatch::{
    Descriptor, FrameDispatcher, FrameHandler, FramePayload, PacketDispatcher, PacketHandler,
    PacketPayload,
};
pub use error::{Error, Result};
pub use event::{emit_error, Event, EventBus};
pub use frame::Frame;
pub use logger::{EventLogger, LogLevel, LogSink, StdSink};
pub use node::{NodeControl, NodeId};
pub use packet::{Packet, PacketFlags};
pub use pool::{FramePool, PacketPool, Pool, Poolable};
pub use rational::Rational;
pub use task::{sleep_cancellable, sleep_until_cancellable, SerialQueue, SerialQueueOptions};
pub use timestamp::{ns_to_time_base, rescale_to_ns, TimeBase, NO_PTS};
