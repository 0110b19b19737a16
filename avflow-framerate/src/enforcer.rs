//! Rate enforcer.
//!
//! Converts any number of unsynchronized upstream frame sources into one
//! strictly periodic output stream. Incoming frames are bucketed into a
//! sliding window of contiguous PTS slots; every tick dispatches the head
//! slot's frame, or a filler substitute when the slot is empty. The
//! desired source is switchable at runtime; switch events fire when a new
//! source is accepted into the window and when its first frame is
//! dispatched.

use crate::error::{FramerateError, Result};
use crate::filler::{Filler, PreviousFiller};
use crate::restamp::Restamper;
use avflow_core::dispatch::{Descriptor, FrameDispatcher, FrameHandler, FramePayload};
use avflow_core::event::{emit_error, Event, EventBus};
use avflow_core::frame::Frame;
use avflow_core::node::{NodeControl, NodeId};
use avflow_core::pool::FramePool;
use avflow_core::rational::Rational;
use avflow_core::task::{sleep_until_cancellable, SerialQueue, SerialQueueOptions};
use avflow_core::timestamp::{rescale_to_ns, TimeBase};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

/// Output timing of the enforcer: both fields are mandatory.
#[derive(Debug, Clone, Copy)]
pub struct OutputContext {
    /// Time base of dispatched frames.
    pub time_base: TimeBase,
    /// Output frame rate.
    pub frame_rate: Rational,
}

impl OutputContext {
    /// The descriptor decorating dispatched frames.
    pub fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.time_base)
    }
}

/// Rate enforcer configuration.
pub struct RateEnforcerOptions {
    /// Re-anchor the tail slot when the active source's frames run past
    /// its window.
    pub adapt_slots_to_incoming_frames: bool,
    /// Window depth, expressed in frames of the output frame rate.
    /// Clamped to at least one.
    pub delay: usize,
    /// Gap filler; defaults to [`PreviousFiller`].
    pub filler: Option<Box<dyn Filler>>,
    /// Output timing.
    pub output: OutputContext,
    /// Optional per-output-frame PTS rewrite.
    pub restamper: Option<Box<dyn Restamper>>,
}

impl RateEnforcerOptions {
    /// Options with defaults around the mandatory output context.
    pub fn new(output: OutputContext) -> Self {
        Self {
            adapt_slots_to_incoming_frames: false,
            delay: 1,
            filler: None,
            output,
            restamper: None,
        }
    }
}

/// Counters exposed by [`RateEnforcer::stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateEnforcerStats {
    /// Frames received from upstream.
    pub incoming: u64,
    /// Frames accepted onto the serial queue.
    pub processed: u64,
    /// Ticks satisfied by the filler.
    pub filled: u64,
    /// Frames dispatched downstream.
    pub dispatched: u64,
    /// Average delay between a slot's end and its frame's PTS, in
    /// nanoseconds.
    pub average_delay_ns: Option<f64>,
}

#[derive(Default)]
struct Counters {
    incoming: AtomicU64,
    processed: AtomicU64,
    filled: AtomicU64,
    delay_sum_ns: AtomicI64,
    delay_count: AtomicU64,
}

struct Item {
    frame: Frame,
    node: Option<NodeId>,
}

struct Slot {
    node: Option<NodeId>,
    item: Option<Item>,
    pts_min: i64,
    pts_max: i64,
}

impl Slot {
    fn anchored(node: Option<NodeId>, pts: i64, width: i64) -> Self {
        Self {
            node,
            item: None,
            pts_min: pts,
            pts_max: pts + width,
        }
    }

    /// The adjacent slot one period later.
    fn next(&self) -> Self {
        Self {
            node: self.node,
            item: None,
            pts_min: self.pts_max,
            pts_max: self.pts_max - self.pts_min + self.pts_max,
        }
    }
}

struct State {
    slots: VecDeque<Option<Slot>>,
    buf: Vec<Item>,
    desired: Option<NodeId>,
    filler: Box<dyn Filler>,
    restamper: Option<Box<dyn Restamper>>,
}

/// Enforces a fixed output cadence over multiple frame sources.
pub struct RateEnforcer {
    id: NodeId,
    control: NodeControl,
    bus: EventBus,
    dispatcher: Arc<FrameDispatcher>,
    pool: FramePool,
    queue: SerialQueue,
    descriptor: Descriptor,
    output: OutputContext,
    period: Duration,
    slot_width: i64,
    slots_count: usize,
    adapt: bool,
    state: Arc<Mutex<State>>,
    counters: Arc<Counters>,
}

impl RateEnforcer {
    /// Create a rate enforcer.
    pub fn new(
        options: RateEnforcerOptions,
        bus: EventBus,
        control: NodeControl,
    ) -> Result<Arc<Self>> {
        let output = options.output;
        if output.frame_rate.is_zero() || !output.frame_rate.is_positive() {
            return Err(FramerateError::invalid_output("frame rate must be positive"));
        }
        if output.time_base.as_rational().is_zero() {
            return Err(FramerateError::invalid_output("time base must be non-zero"));
        }

        let id = NodeId::new();
        let period = Duration::from_nanos((1e9 / output.frame_rate.to_f64()) as u64);
        let slot_width =
            (1.0 / (output.time_base.as_rational().to_f64() * output.frame_rate.to_f64())) as i64;

        let mut slots = VecDeque::new();
        slots.push_back(None);

        Ok(Arc::new(Self {
            id,
            control,
            bus,
            dispatcher: Arc::new(FrameDispatcher::new(id)),
            pool: FramePool::new(),
            queue: SerialQueue::new(SerialQueueOptions { process_all: true }),
            descriptor: output.descriptor(),
            output,
            period,
            slot_width,
            slots_count: options.delay.max(1),
            adapt: options.adapt_slots_to_incoming_frames,
            state: Arc::new(Mutex::new(State {
                slots,
                buf: Vec::new(),
                desired: None,
                filler: options
                    .filler
                    .unwrap_or_else(|| Box::new(PreviousFiller::new())),
                restamper: options.restamper,
            })),
            counters: Arc::new(Counters::default()),
        }))
    }

    /// The enforcer's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The enforcer's lifecycle control.
    pub fn control(&self) -> &NodeControl {
        &self.control
    }

    /// The output timing.
    pub fn output_ctx(&self) -> OutputContext {
        self.output
    }

    /// Select the desired source node.
    pub fn switch(&self, node: Option<NodeId>) {
        self.state.lock().desired = node;
    }

    /// Register a downstream frame handler.
    pub fn connect(&self, handler: Arc<dyn FrameHandler>) {
        self.dispatcher.connect(handler);
    }

    /// Remove a downstream frame handler.
    pub fn disconnect(&self, handler: &Arc<dyn FrameHandler>) {
        self.dispatcher.disconnect(handler);
    }

    /// Counter snapshot.
    pub fn stats(&self) -> RateEnforcerStats {
        let delay_count = self.counters.delay_count.load(Ordering::Relaxed);
        RateEnforcerStats {
            incoming: self.counters.incoming.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            filled: self.counters.filled.load(Ordering::Relaxed),
            dispatched: self.dispatcher.dispatched(),
            average_delay_ns: (delay_count > 0).then(|| {
                self.counters.delay_sum_ns.load(Ordering::Relaxed) as f64 / delay_count as f64
            }),
        }
    }

    /// Start the intake worker and the tick loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let queue_handle = self.queue.start(self.control.token().clone());
        let this = Arc::clone(self);
        let tick_handle = tokio::spawn(async move { this.tick_loop().await });
        tokio::spawn(async move {
            let _ = tick_handle.await;
            let _ = queue_handle.await;
        })
    }

    async fn tick_loop(self: Arc<Self>) {
        let token = self.control.token().clone();
        let mut next_at = Instant::now();
        let mut previous_node: Option<NodeId> = None;
        loop {
            next_at += self.period;
            sleep_until_cancellable(&token, next_at).await;
            if token.is_cancelled() {
                // Drain buffered frames back to the pool.
                let mut st = self.state.lock();
                for item in st.buf.drain(..) {
                    self.pool.put(item.frame);
                }
                for slot in st.slots.iter_mut().flatten() {
                    if let Some(item) = slot.item.take() {
                        self.pool.put(item.frame);
                    }
                }
                return;
            }
            self.tick(&mut previous_node);
        }
    }

    fn tick(&self, previous_node: &mut Option<NodeId>) {
        let mut st = self.state.lock();

        let warmed = st.slots.len() >= self.slots_count;
        if warmed {
            self.distribute(&mut st);

            let (item, filled) = Self::current(&mut st);
            if let Some(mut item) = item {
                if let Some(restamper) = st.restamper.as_mut() {
                    restamper.restamp(&mut item.frame);
                }
                self.dispatcher.dispatch(&item.frame, self.descriptor);

                // The dispatched output moved to another actual source.
                if let Some(node) = item.node {
                    if *previous_node != Some(node) {
                        debug!("switched out to {node}");
                        self.bus.emit(Event::SwitchedOut { node });
                        *previous_node = Some(node);
                    }
                }

                if filled {
                    trace!("head slot empty, dispatched filler frame");
                    self.counters.filled.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.pool.put(item.frame);
                }
            } else if filled {
                trace!("head slot empty and filler has nothing to offer");
                self.counters.filled.fetch_add(1, Ordering::Relaxed);
            }
        }

        // Extend the window before trimming it, so a single-slot window
        // always has a tail to advance from.
        let next = st.slots.back().and_then(|s| s.as_ref().map(Slot::next));
        st.slots.push_back(next);
        if warmed {
            st.slots.pop_front();
        }
    }

    /// Pull buffered frames into empty slots.
    fn distribute(&self, st: &mut State) {
        let useful: HashSet<NodeId> =
            st.slots.iter().flatten().filter_map(|s| s.node).collect();

        for si in 0..st.slots.len() {
            let (slot_node, pts_min, pts_max) = match &st.slots[si] {
                Some(s) if s.item.is_none() => (s.node, s.pts_min, s.pts_max),
                _ => continue,
            };

            let mut i = 0;
            while i < st.buf.len() {
                if st.buf[i].node != slot_node {
                    // Frames from nodes no slot references will never be
                    // picked; reclaim them now.
                    let useless = st.buf[i].node.map_or(true, |n| !useful.contains(&n));
                    if useless {
                        let item = st.buf.remove(i);
                        trace!("dropping frame with pts {}, node left the window", item.frame.pts);
                        self.pool.put(item.frame);
                    } else {
                        i += 1;
                    }
                    continue;
                }

                let pts = st.buf[i].frame.pts;
                if pts_min <= pts && pts < pts_max {
                    let item = st.buf.remove(i);
                    let slot = st.slots[si].as_mut().expect("slot checked above");
                    if slot.item.is_none() {
                        slot.item = Some(item);
                    } else {
                        // Later duplicate for the same window.
                        trace!("dropping duplicate frame with pts {pts}");
                        self.pool.put(item.frame);
                    }
                } else if pts < pts_min {
                    // Stale.
                    trace!("dropping stale frame with pts {pts}, slot starts at {pts_min}");
                    let item = st.buf.remove(i);
                    self.pool.put(item.frame);
                } else {
                    // Future slot.
                    i += 1;
                }
            }
        }
    }

    /// Take the head slot's item, or ask the filler.
    fn current(st: &mut State) -> (Option<Item>, bool) {
        let head = st
            .slots
            .front_mut()
            .and_then(|s| s.as_mut())
            .and_then(|s| s.item.take());
        match head {
            Some(item) => {
                st.filler.no_fill(&item.frame, item.node);
                (Some(item), false)
            }
            None => {
                let item = st
                    .filler
                    .fill()
                    .map(|(frame, node)| Item { frame, node });
                (item, true)
            }
        }
    }
}

impl FrameHandler for RateEnforcer {
    /// Non-blocking intake: copy the frame, rescale it to the output time
    /// base and queue the slot bookkeeping.
    fn handle_frame(&self, payload: FramePayload<'_>) {
        self.counters.incoming.fetch_add(1, Ordering::Relaxed);

        let mut f = self.pool.get();
        if let Err(err) = f.ref_from(payload.frame) {
            debug!("refing incoming frame failed: {err}");
            self.pool.put(f);
            emit_error(&self.bus, self.id, &err, "refing frame");
            return;
        }
        f.pts = payload
            .descriptor
            .time_base
            .convert(f.pts, self.output.time_base);

        let node = payload.node;
        let state = Arc::clone(&self.state);
        let counters = Arc::clone(&self.counters);
        let bus = self.bus.clone();
        let output_tb = self.output.time_base;
        let slot_width = self.slot_width;
        let adapt = self.adapt;

        self.queue.add(move || {
            counters.processed.fetch_add(1, Ordering::Relaxed);

            let mut st = state.lock();
            let last: Option<(Option<NodeId>, i64)> = st
                .slots
                .back()
                .and_then(|s| s.as_ref().map(|s| (s.node, s.pts_max)));

            // The tail slot is re-anchored when:
            //   c1 - it's empty, or the desired node shows up while the
            //        slot still tracks another node
            //   c2 - the active node's frames ran past the window and slot
            //        adaptation is enabled
            let c1 = match last {
                None => true,
                Some((n, _)) => st.desired != n && st.desired == Some(node),
            };
            let c2 = last.is_some_and(|(n, max)| n == Some(node) && max < f.pts);
            if c1 || c2 {
                if c1 || (c2 && adapt) {
                    let desired = st.desired;
                    *st.slots.back_mut().expect("window is never empty") =
                        Some(Slot::anchored(desired, f.pts, slot_width));
                }
                if c1 {
                    debug!("switched in to {node}");
                    bus.emit(Event::SwitchedIn { node });
                }
            }

            let pts = f.pts;
            st.buf.push(Item {
                frame: f,
                node: Some(node),
            });

            if let Some((n, pts_max)) = last {
                if n == Some(node) {
                    counters
                        .delay_sum_ns
                        .fetch_add(rescale_to_ns(pts_max - pts, output_tb), Ordering::Relaxed);
                    counters.delay_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }
}
