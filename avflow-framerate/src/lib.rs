//! # avflow-framerate
//!
//! Rate enforcement for the avflow media pipeline.
//!
//! The [`RateEnforcer`] converts N unsynchronized upstream frame sources
//! at varying rates into one deterministic output stream at a fixed frame
//! rate, with a switchable active source and pluggable gap filling.

pub mod enforcer;
pub mod error;
pub mod filler;
pub mod restamp;

pub use enforcer::{OutputContext, RateEnforcer, RateEnforcerOptions, RateEnforcerStats};
pub use error::{FramerateError, Result};
pub use filler::{Filler, PreviousFiller, StaticFiller};
pub use restamp::{OffsetRestamper, Restamper, StartFromZeroRestamper};
