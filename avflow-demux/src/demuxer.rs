//! Demuxer node.
//!
//! Reads packets from a [`MediaInput`], infers missing durations, restamps
//! across loop iterations and hands packets to the per-stream rate
//! emulators or straight to the packet dispatcher.

use crate::durationer::PacketDurationer;
use crate::emulator::{RateEmulator, DEFAULT_BUFFER_DURATION};
use crate::input::{InterruptFlag, MediaInput, SeekMode, StreamContext};
use crate::looper::Looper;
use avflow_core::dispatch::{Descriptor, PacketDispatcher, PacketHandler};
use avflow_core::error::{Error, Result};
use avflow_core::event::{emit_error, EventBus};
use avflow_core::node::{NodeControl, NodeId};
use avflow_core::packet::Packet;
use avflow_core::pool::PacketPool;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Custom handler for read errors.
///
/// Returns `(stop, handled)`: when `handled` is true the default error
/// handling is skipped and `stop` decides whether the read loop exits.
pub type ReadFrameErrorHandler = Box<dyn Fn(&Demuxer, &Error) -> (bool, bool) + Send>;

/// Demuxer configuration.
pub struct DemuxerOptions {
    /// Sleep between packets so downstream observes live-like pacing.
    pub emulate_rate: bool,
    /// How much media time may be scheduled ahead of the wall clock before
    /// the read loop is pushed back. Defaults to 1s.
    pub emulate_rate_buffer_duration: Duration,
    /// Seek back to the start at EOF and keep going, restamping packets.
    pub loop_enabled: bool,
    /// Cancels opening/probing independently of the node.
    pub probe_token: Option<CancellationToken>,
    /// Custom read error handler.
    pub read_frame_error_handler: Option<ReadFrameErrorHandler>,
}

impl Default for DemuxerOptions {
    fn default() -> Self {
        Self {
            emulate_rate: false,
            emulate_rate_buffer_duration: DEFAULT_BUFFER_DURATION,
            loop_enabled: false,
            probe_token: None,
            read_frame_error_handler: None,
        }
    }
}

/// Counters exposed by [`Demuxer::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemuxerStats {
    /// Bits read from the input.
    pub incoming_bits: u64,
    /// Packets handed to the dispatcher.
    pub packets_dispatched: u64,
    /// Packets ever allocated by the pool.
    pub packets_allocated: usize,
    /// Packets currently idle in the pool.
    pub packets_pooled: usize,
}

struct DemuxerStream {
    descriptor: Descriptor,
    durationer: PacketDurationer,
    emulator: Option<Arc<RateEmulator>>,
}

struct Worker {
    input: Box<dyn MediaInput>,
    streams: HashMap<usize, DemuxerStream>,
    looper: Looper,
    error_handler: Option<ReadFrameErrorHandler>,
    sent_eof: bool,
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.input.close();
    }
}

/// Demuxes packets out of a media input.
pub struct Demuxer {
    id: NodeId,
    control: NodeControl,
    bus: EventBus,
    dispatcher: Arc<PacketDispatcher>,
    pool: PacketPool,
    interrupt: InterruptFlag,
    emulate_rate: bool,
    loop_enabled: AtomicBool,
    stat_incoming_bits: AtomicU64,
    stream_contexts: Vec<StreamContext>,
    worker: Mutex<Option<Worker>>,
}

impl Demuxer {
    /// Open and probe `input`, building per-stream state.
    ///
    /// Must run inside a tokio runtime when a probe token is set, so the
    /// token can interrupt a blocking open.
    pub fn new(
        mut input: Box<dyn MediaInput>,
        options: DemuxerOptions,
        bus: EventBus,
        control: NodeControl,
    ) -> Result<Arc<Self>> {
        let id = NodeId::new();
        let interrupt = InterruptFlag::new();
        input.set_interrupt(interrupt.clone());

        // A cancelled probe raises the interrupt flag so blocking
        // open/probe calls return promptly.
        let probe_token = options.probe_token.clone();
        let probe_guard = probe_token.as_ref().map(|probe| {
            let probe = probe.clone();
            let flag = interrupt.clone();
            let done = CancellationToken::new();
            let done_rx = done.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = probe.cancelled() => flag.raise(),
                    _ = done_rx.cancelled() => {}
                }
            });
            done
        });
        let probe_cancelled =
            || probe_token.as_ref().is_some_and(|t| t.is_cancelled());

        let probed = (|| {
            if let Err(err) = input.open() {
                return Err(if probe_cancelled() {
                    Error::ProbeCancelled
                } else {
                    Error::Open(err.to_string())
                });
            }
            if probe_cancelled() {
                return Err(Error::ProbeCancelled);
            }
            if let Err(err) = input.probe() {
                return Err(if probe_cancelled() {
                    Error::ProbeCancelled
                } else {
                    Error::Probe(err.to_string())
                });
            }
            if probe_cancelled() {
                return Err(Error::ProbeCancelled);
            }
            Ok(())
        })();
        if let Some(done) = probe_guard {
            done.cancel();
        }
        probed?;

        let mut stream_contexts = input.streams();
        stream_contexts.sort_by_key(|c| c.index);

        let pool = PacketPool::new();
        let dispatcher = Arc::new(PacketDispatcher::new(id));

        let streams: HashMap<usize, DemuxerStream> = stream_contexts
            .iter()
            .map(|ctx| {
                let emulator = options.emulate_rate.then(|| {
                    Arc::new(RateEmulator::new(
                        id,
                        options.emulate_rate_buffer_duration,
                        ctx.time_base,
                        ctx.descriptor(),
                        Arc::clone(&dispatcher),
                        pool.clone(),
                        bus.clone(),
                    ))
                });
                (
                    ctx.index,
                    DemuxerStream {
                        descriptor: ctx.descriptor(),
                        durationer: PacketDurationer::new(),
                        emulator,
                    },
                )
            })
            .collect();

        let looper = Looper::new(stream_contexts.iter().map(|c| (c.index, c.time_base)));

        Ok(Arc::new(Self {
            id,
            control,
            bus,
            dispatcher,
            pool,
            interrupt,
            emulate_rate: options.emulate_rate,
            loop_enabled: AtomicBool::new(options.loop_enabled),
            stat_incoming_bits: AtomicU64::new(0),
            stream_contexts,
            worker: Mutex::new(Some(Worker {
                input,
                streams,
                looper,
                error_handler: options.read_frame_error_handler,
                sent_eof: false,
            })),
        }))
    }

    /// The demuxer's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The demuxer's lifecycle control.
    pub fn control(&self) -> &NodeControl {
        &self.control
    }

    /// Stream contexts ordered by index.
    pub fn streams(&self) -> &[StreamContext] {
        &self.stream_contexts
    }

    /// Toggle looping. Observed by the read loop without locks.
    pub fn set_loop(&self, enabled: bool) {
        self.loop_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Register a handler for packets of every stream.
    pub fn connect(&self, handler: Arc<dyn PacketHandler>) {
        self.dispatcher.connect(handler);
    }

    /// Remove every registration of the given handler.
    pub fn disconnect(&self, handler: &Arc<dyn PacketHandler>) {
        self.dispatcher.disconnect(handler);
    }

    /// Register a handler bound to one stream.
    pub fn connect_for_stream(&self, handler: Arc<dyn PacketHandler>, stream: usize) {
        self.dispatcher.connect_for_stream(handler, stream);
    }

    /// Remove the handler's registration for one stream.
    pub fn disconnect_for_stream(&self, handler: &Arc<dyn PacketHandler>, stream: usize) {
        self.dispatcher.disconnect_for_stream(handler, stream);
    }

    /// Counter snapshot.
    pub fn stats(&self) -> DemuxerStats {
        DemuxerStats {
            incoming_bits: self.stat_incoming_bits.load(Ordering::Relaxed),
            packets_dispatched: self.dispatcher.dispatched(),
            packets_allocated: self.pool.allocated(),
            packets_pooled: self.pool.available(),
        }
    }

    /// Start the read loop; returns its join handle.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let taken = this.worker.lock().take();
            let Some(mut worker) = taken else {
                tracing::warn!("demuxer started twice");
                return;
            };

            // Blocking native reads poll the interrupt flag; raise it as
            // soon as the node is cancelled.
            let token = this.control.token().clone();
            let interrupt = this.interrupt.clone();
            let watcher = tokio::spawn(async move {
                token.cancelled().await;
                interrupt.raise();
            });

            let mut emulator_handles = Vec::new();
            if this.emulate_rate {
                for s in worker.streams.values() {
                    if let Some(e) = &s.emulator {
                        emulator_handles.push(e.start(this.control.token()));
                    }
                }
            }

            loop {
                if this.read_frame(&mut worker).await {
                    break;
                }
                this.control.handle_pause().await;
                if this.control.is_cancelled() {
                    break;
                }
                // Inputs that never block would otherwise starve intake and
                // emulator tasks on the same runtime.
                tokio::task::yield_now().await;
            }

            // An EOF exit lets scheduled packets drain; any other exit
            // stops the emulators outright.
            if !worker.sent_eof && !this.control.is_cancelled() {
                for s in worker.streams.values() {
                    if let Some(e) = &s.emulator {
                        e.stop();
                    }
                }
            }
            for handle in emulator_handles {
                let _ = handle.await;
            }

            worker.looper.reset();
            watcher.abort();
        })
    }

    async fn read_frame(self: &Arc<Self>, worker: &mut Worker) -> bool {
        let mut pkt = self.pool.get();
        let stop = self.read_frame_inner(worker, &mut pkt).await;
        self.pool.put(pkt);
        stop
    }

    async fn read_frame_inner(self: &Arc<Self>, worker: &mut Worker, pkt: &mut Packet) -> bool {
        if let Err(err) = worker.input.read_packet(pkt) {
            if self.loop_enabled.load(Ordering::Relaxed) && err.is_eof() {
                // Close the iteration, then start over from the top.
                let streams = &mut worker.streams;
                worker
                    .looper
                    .looping(|idx| streams.get_mut(&idx).map_or(0, |s| s.durationer.flush()));

                let start = worker.input.start_time();
                if let Err(err) = worker.input.seek(None, start, SeekMode::Backward) {
                    emit_error(&self.bus, self.id, &err, "seeking to frame");
                    return true;
                }
                return false;
            }

            if self.emulate_rate && err.is_eof() {
                for s in worker.streams.values() {
                    if let Some(e) = &s.emulator {
                        e.eof();
                    }
                }
                worker.sent_eof = true;
            }

            if let Some(handler) = &worker.error_handler {
                let (stop, handled) = handler(self, &err);
                if handled {
                    return stop;
                }
            }

            if !err.is_eof() && !err.is_cancelled() {
                emit_error(&self.bus, self.id, &err, "reading frame");
            }
            return true;
        }

        self.stat_incoming_bits
            .fetch_add((pkt.size() * 8) as u64, Ordering::Relaxed);

        let Some(s) = worker.streams.get_mut(&pkt.stream_index) else {
            return false;
        };

        let mut previous_duration = s.durationer.handle_pkt(pkt);
        worker.looper.handle_pkt(pkt, &mut previous_duration);

        match &s.emulator {
            Some(e) => {
                let e = Arc::clone(e);
                e.handle_pkt(self.control.token(), pkt, previous_duration)
                    .await;
            }
            None => self.dispatcher.dispatch(pkt, s.descriptor),
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{MemoryInput, MemoryPacket, StreamKind};
    use avflow_core::dispatch::PacketPayload;
    use avflow_core::event::Event;
    use avflow_core::rational::Rational;
    use avflow_core::timestamp::TimeBase;
    use bytes::Bytes;

    struct Collector {
        packets: Mutex<Vec<(usize, i64, i64)>>,
    }

    impl Collector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                packets: Mutex::new(Vec::new()),
            })
        }

        fn len(&self) -> usize {
            self.packets.lock().len()
        }
    }

    impl PacketHandler for Collector {
        fn handle_packet(&self, payload: PacketPayload<'_>) {
            self.packets.lock().push((
                payload.packet.stream_index,
                payload.packet.pts,
                payload.packet.dts,
            ));
        }
    }

    fn stream(index: usize, num: i64, den: i64) -> StreamContext {
        StreamContext {
            index,
            time_base: TimeBase::new(num, den),
            frame_rate: Rational::new(den, num),
            kind: StreamKind::Video,
        }
    }

    fn single_stream_input(pts: &[i64]) -> Box<MemoryInput> {
        let packets = pts
            .iter()
            .map(|&p| MemoryPacket::new(0, p, Bytes::from_static(b"abcd")))
            .collect();
        Box::new(MemoryInput::new(vec![stream(0, 1, 4)], packets))
    }

    #[tokio::test]
    async fn test_dispatches_in_read_order() {
        let demuxer = Demuxer::new(
            single_stream_input(&[0, 1, 2, 3]),
            DemuxerOptions::default(),
            EventBus::new(),
            NodeControl::new(),
        )
        .unwrap();

        let collector = Collector::new();
        demuxer.connect(collector.clone());
        demuxer.start().await.unwrap();

        let packets = collector.packets.lock();
        assert_eq!(
            *packets,
            vec![(0, 0, 0), (0, 1, 1), (0, 2, 2), (0, 3, 3)]
        );

        let stats = demuxer.stats();
        assert_eq!(stats.incoming_bits, 4 * 4 * 8);
        assert_eq!(stats.packets_dispatched, 4);
        assert_eq!(stats.packets_pooled, stats.packets_allocated);
    }

    #[tokio::test]
    async fn test_loop_restamps_monotonically() {
        let demuxer = Demuxer::new(
            single_stream_input(&[0, 1, 2, 3]),
            DemuxerOptions {
                loop_enabled: true,
                ..Default::default()
            },
            EventBus::new(),
            NodeControl::new(),
        )
        .unwrap();

        let collector = Collector::new();
        demuxer.connect(collector.clone());
        let handle = demuxer.start();

        while collector.len() < 12 {
            tokio::task::yield_now().await;
        }
        demuxer.control().cancel();
        handle.await.unwrap();

        let packets = collector.packets.lock();
        let mut last_dts = i64::MIN;
        for (_, pts, dts) in packets.iter() {
            assert!(*dts >= last_dts);
            assert_eq!(pts, dts);
            last_dts = *dts;
        }
        // Second iteration starts one full loop later.
        assert_eq!(packets[4], (0, 4, 4));
    }

    #[tokio::test]
    async fn test_set_loop_toggles_at_runtime() {
        let demuxer = Demuxer::new(
            single_stream_input(&[0, 1]),
            DemuxerOptions {
                loop_enabled: true,
                ..Default::default()
            },
            EventBus::new(),
            NodeControl::new(),
        )
        .unwrap();

        let collector = Collector::new();
        demuxer.connect(collector.clone());
        let handle = demuxer.start();

        while collector.len() < 4 {
            tokio::task::yield_now().await;
        }
        demuxer.set_loop(false);
        handle.await.unwrap();
        assert!(collector.len() >= 4);
    }

    #[tokio::test]
    async fn test_error_handler_claims_eof() {
        let bus = EventBus::new();
        let errors = Arc::new(AtomicU64::new(0));
        let errors_sub = Arc::clone(&errors);
        bus.subscribe(move |e| {
            if matches!(e, Event::Error { .. }) {
                errors_sub.fetch_add(1, Ordering::SeqCst);
            }
        });

        let seen = Arc::new(AtomicU64::new(0));
        let seen_handler = Arc::clone(&seen);
        let demuxer = Demuxer::new(
            single_stream_input(&[0]),
            DemuxerOptions {
                read_frame_error_handler: Some(Box::new(move |_, err| {
                    assert!(err.is_eof());
                    seen_handler.fetch_add(1, Ordering::SeqCst);
                    (true, true)
                })),
                ..Default::default()
            },
            bus.clone(),
            NodeControl::new(),
        )
        .unwrap();

        demuxer.start().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_probe_cancellation() {
        let probe = CancellationToken::new();
        probe.cancel();
        let err = Demuxer::new(
            single_stream_input(&[0]),
            DemuxerOptions {
                probe_token: Some(probe),
                ..Default::default()
            },
            EventBus::new(),
            NodeControl::new(),
        )
        .map(|_| ())
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_unknown_stream_skipped() {
        let packets = vec![
            MemoryPacket::new(7, 0, Bytes::from_static(b"zz")),
            MemoryPacket::new(0, 0, Bytes::from_static(b"aa")),
        ];
        let input = Box::new(MemoryInput::new(vec![stream(0, 1, 4)], packets));
        let demuxer = Demuxer::new(
            input,
            DemuxerOptions::default(),
            EventBus::new(),
            NodeControl::new(),
        )
        .unwrap();

        let collector = Collector::new();
        demuxer.connect(collector.clone());
        demuxer.start().await.unwrap();

        let packets = collector.packets.lock();
        assert_eq!(*packets, vec![(0, 0, 0)]);
    }
}
