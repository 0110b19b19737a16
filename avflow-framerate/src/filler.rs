//! Gap fillers.
//!
//! When no buffered frame matches the head slot at tick time, the
//! enforcer asks its filler for a substitute. A filler owns its source
//! material; [`Filler::fill`] hands out a reference-counted copy that the
//! caller drops after dispatch and must never return to a pool.

use avflow_core::frame::Frame;
use avflow_core::node::NodeId;

/// Supplies substitute frames for empty output slots.
pub trait Filler: Send {
    /// Produce a substitute frame and the node it is attributed to.
    ///
    /// Returns None when the filler has nothing to offer yet.
    fn fill(&mut self) -> Option<(Frame, Option<NodeId>)>;

    /// Observe a frame that was dispatched from a slot, so the filler can
    /// snapshot it for later reuse.
    fn no_fill(&mut self, frame: &Frame, node: Option<NodeId>);
}

/// Repeats the most recently dispatched slot frame.
#[derive(Default)]
pub struct PreviousFiller {
    frame: Option<Frame>,
    node: Option<NodeId>,
}

impl PreviousFiller {
    /// Create a filler with no snapshot yet.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filler for PreviousFiller {
    fn fill(&mut self) -> Option<(Frame, Option<NodeId>)> {
        let src = self.frame.as_ref()?;
        let mut out = Frame::new();
        out.ref_from(src).ok()?;
        Some((out, self.node))
    }

    fn no_fill(&mut self, frame: &Frame, node: Option<NodeId>) {
        self.node = node;
        let mut snapshot = self.frame.take().unwrap_or_default();
        snapshot.unref();
        if snapshot.ref_from(frame).is_ok() {
            self.frame = Some(snapshot);
        }
    }
}

/// Always returns the same pre-built frame.
pub struct StaticFiller {
    frame: Frame,
}

impl StaticFiller {
    /// Create a filler around a pre-built frame.
    pub fn new(frame: Frame) -> Self {
        Self { frame }
    }
}

impl Filler for StaticFiller {
    fn fill(&mut self) -> Option<(Frame, Option<NodeId>)> {
        let mut out = Frame::new();
        out.ref_from(&self.frame).ok()?;
        Some((out, None))
    }

    fn no_fill(&mut self, _frame: &Frame, _node: Option<NodeId>) {}
}
