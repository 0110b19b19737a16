//! Packet and frame dispatchers.
//!
//! A dispatcher fans an object out to an ordered list of registered
//! handlers, optionally guarded by a per-stream predicate. Dispatch is
//! synchronous; a handler that needs the object beyond the call must ref
//! it into its own pooled copy.

use crate::frame::Frame;
use crate::node::NodeId;
use crate::packet::Packet;
use crate::timestamp::TimeBase;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lightweight carrier of a stream's time base, decorating every dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Time base of the dispatched object's timestamps.
    pub time_base: TimeBase,
}

impl Descriptor {
    /// Create a descriptor for the given time base.
    pub fn new(time_base: TimeBase) -> Self {
        Self { time_base }
    }
}

/// Payload delivered to packet handlers.
pub struct PacketPayload<'a> {
    /// The dispatched packet, owned by the dispatching node's pool.
    pub packet: &'a Packet,
    /// Time base decoration.
    pub descriptor: Descriptor,
    /// The node that produced the packet.
    pub node: NodeId,
}

/// Payload delivered to frame handlers.
pub struct FramePayload<'a> {
    /// The dispatched frame, owned by the dispatching node's pool.
    pub frame: &'a Frame,
    /// Time base decoration.
    pub descriptor: Descriptor,
    /// The node that produced the frame.
    pub node: NodeId,
}

/// Downstream consumer of packets.
pub trait PacketHandler: Send + Sync {
    /// Handle one dispatched packet.
    fn handle_packet(&self, payload: PacketPayload<'_>);
}

/// Downstream consumer of frames.
pub trait FrameHandler: Send + Sync {
    /// Handle one dispatched frame.
    fn handle_frame(&self, payload: FramePayload<'_>);
}

struct Entry<H: ?Sized> {
    handler: Arc<H>,
    stream: Option<usize>,
}

/// Fans packets out to registered handlers.
pub struct PacketDispatcher {
    node: NodeId,
    handlers: Mutex<Vec<Entry<dyn PacketHandler>>>,
    dispatched: AtomicU64,
}

impl PacketDispatcher {
    /// Create a dispatcher for the given producing node.
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            handlers: Mutex::new(Vec::new()),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Register a handler for all streams.
    pub fn connect(&self, handler: Arc<dyn PacketHandler>) {
        self.handlers.lock().push(Entry {
            handler,
            stream: None,
        });
    }

    /// Register a handler that only receives packets of one stream.
    pub fn connect_for_stream(&self, handler: Arc<dyn PacketHandler>, stream: usize) {
        self.handlers.lock().push(Entry {
            handler,
            stream: Some(stream),
        });
    }

    /// Remove every registration of the given handler.
    pub fn disconnect(&self, handler: &Arc<dyn PacketHandler>) {
        self.handlers
            .lock()
            .retain(|e| !Arc::ptr_eq(&e.handler, handler));
    }

    /// Remove the given handler's registration for one stream.
    pub fn disconnect_for_stream(&self, handler: &Arc<dyn PacketHandler>, stream: usize) {
        self.handlers
            .lock()
            .retain(|e| !(Arc::ptr_eq(&e.handler, handler) && e.stream == Some(stream)));
    }

    /// Deliver a packet to every matching handler.
    pub fn dispatch(&self, packet: &Packet, descriptor: Descriptor) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let handlers = self.handlers.lock();
        for entry in handlers.iter() {
            if entry.stream.is_some_and(|s| s != packet.stream_index) {
                continue;
            }
            entry.handler.handle_packet(PacketPayload {
                packet,
                descriptor,
                node: self.node,
            });
        }
    }

    /// Number of dispatch calls so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}

/// Fans frames out to registered handlers.
pub struct FrameDispatcher {
    node: NodeId,
    handlers: Mutex<Vec<Entry<dyn FrameHandler>>>,
    dispatched: AtomicU64,
}

impl FrameDispatcher {
    /// Create a dispatcher for the given producing node.
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            handlers: Mutex::new(Vec::new()),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Register a handler.
    pub fn connect(&self, handler: Arc<dyn FrameHandler>) {
        self.handlers.lock().push(Entry {
            handler,
            stream: None,
        });
    }

    /// Remove every registration of the given handler.
    pub fn disconnect(&self, handler: &Arc<dyn FrameHandler>) {
        self.handlers
            .lock()
            .retain(|e| !Arc::ptr_eq(&e.handler, handler));
    }

    /// Deliver a frame to every handler.
    pub fn dispatch(&self, frame: &Frame, descriptor: Descriptor) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let handlers = self.handlers.lock();
        for entry in handlers.iter() {
            entry.handler.handle_frame(FramePayload {
                frame,
                descriptor,
                node: self.node,
            });
        }
    }

    /// Number of dispatch calls so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}
