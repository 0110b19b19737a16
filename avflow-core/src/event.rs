//! Typed event bus.
//!
//! Components never propagate errors across node boundaries by return
//! value; they emit a typed event and terminate locally. Subscribers run
//! synchronously on the emitting thread.

use crate::error::Error;
use crate::node::NodeId;
use parking_lot::Mutex;
use std::sync::Arc;

/// Events emitted by pipeline components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A new desired source's first frame has been accepted into the rate
    /// enforcer's tail slot.
    SwitchedIn {
        /// The incoming source node.
        node: NodeId,
    },
    /// The rate enforcer's dispatched output has transitioned to a new
    /// source node.
    SwitchedOut {
        /// The node now producing dispatched frames.
        node: NodeId,
    },
    /// A component hit an error it could not recover from locally.
    Error {
        /// The node the error originated from.
        node: NodeId,
        /// Human-readable description.
        message: String,
    },
}

impl Event {
    /// Public event name.
    pub fn name(&self) -> &'static str {
        match self {
            Event::SwitchedIn { .. } => "rate enforcer switched in",
            Event::SwitchedOut { .. } => "rate enforcer switched out",
            Event::Error { .. } => "error",
        }
    }
}

type EventFn = Box<dyn Fn(&Event) + Send + Sync>;

/// Clonable handle to a set of event subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Mutex<Vec<EventFn>>>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber invoked synchronously for every event.
    pub fn subscribe(&self, f: impl Fn(&Event) + Send + Sync + 'static) {
        self.handlers.lock().push(Box::new(f));
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: Event) {
        let handlers = self.handlers.lock();
        for handler in handlers.iter() {
            handler(&event);
        }
    }
}

/// Emit an error event for a failed operation.
pub fn emit_error(bus: &EventBus, node: NodeId, err: &Error, context: &str) {
    bus.emit(Event::Error {
        node,
        message: format!("{context} failed: {err}"),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_event_names() {
        let node = NodeId::new();
        assert_eq!(
            Event::SwitchedIn { node }.name(),
            "rate enforcer switched in"
        );
        assert_eq!(
            Event::SwitchedOut { node }.name(),
            "rate enforcer switched out"
        );
    }

    #[test]
    fn test_bus_fan_out() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = Arc::clone(&count);
            bus.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit(Event::SwitchedIn { node: NodeId::new() });
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_emit_error_message() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        bus.subscribe(move |e| {
            if let Event::Error { message, .. } = e {
                seen2.lock().push(message.clone());
            }
        });

        emit_error(&bus, NodeId::new(), &Error::EndOfStream, "reading frame");
        assert_eq!(seen.lock()[0], "reading frame failed: End of stream");
    }
}
