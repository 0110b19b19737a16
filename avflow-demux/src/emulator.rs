//! Per-stream packet rate emulation.
//!
//! When rate emulation is enabled, the demuxer does not dispatch packets
//! as fast as it can read them; each stream schedules its packets for
//! release at wall-clock times derived from media time, so downstream
//! consumers observe live-like pacing. A buffer-duration threshold pushes
//! back on the read loop when it runs ahead of real time.

use avflow_core::dispatch::{Descriptor, PacketDispatcher};
use avflow_core::event::{emit_error, EventBus};
use avflow_core::node::NodeId;
use avflow_core::packet::Packet;
use avflow_core::pool::PacketPool;
use avflow_core::task::{sleep_cancellable, sleep_until_cancellable};
use avflow_core::timestamp::{rescale_to_ns, TimeBase};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Default backpressure threshold.
pub const DEFAULT_BUFFER_DURATION: Duration = Duration::from_secs(1);

enum Scheduled {
    /// Release `pkt` no earlier than `at`.
    Packet { pkt: Packet, at: Instant },
    /// Drain what is scheduled, then stop the stream.
    Eof,
}

/// Schedules one stream's packets for wall-clock release.
pub struct RateEmulator {
    node: NodeId,
    buffer_duration: Duration,
    time_base: TimeBase,
    descriptor: Descriptor,
    dispatcher: Arc<PacketDispatcher>,
    pool: PacketPool,
    bus: EventBus,
    state: Mutex<EmulatorState>,
}

struct EmulatorState {
    tx: Option<mpsc::UnboundedSender<Scheduled>>,
    token: Option<CancellationToken>,
    last_at: Option<Instant>,
}

impl RateEmulator {
    /// Create an emulator for one stream.
    pub fn new(
        node: NodeId,
        buffer_duration: Duration,
        time_base: TimeBase,
        descriptor: Descriptor,
        dispatcher: Arc<PacketDispatcher>,
        pool: PacketPool,
        bus: EventBus,
    ) -> Self {
        let buffer_duration = if buffer_duration.is_zero() {
            DEFAULT_BUFFER_DURATION
        } else {
            buffer_duration
        };
        Self {
            node,
            buffer_duration,
            time_base,
            descriptor,
            dispatcher,
            pool,
            bus,
            state: Mutex::new(EmulatorState {
                tx: None,
                token: None,
                last_at: None,
            }),
        }
    }

    /// Start the release worker under a child of `parent`.
    pub fn start(&self, parent: &CancellationToken) -> JoinHandle<()> {
        let token = parent.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock();
            state.tx = Some(tx);
            state.token = Some(token.clone());
            state.last_at = None;
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let descriptor = self.descriptor;
        let pool = self.pool.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    item = rx.recv() => match item {
                        Some(Scheduled::Packet { pkt, at }) => {
                            let released = sleep_until_cancellable(&token, at).await;
                            if released {
                                dispatcher.dispatch(&pkt, descriptor);
                            }
                            pool.put(pkt);
                            if !released {
                                break;
                            }
                        }
                        Some(Scheduled::Eof) | None => break,
                    },
                }
            }
            // Reclaim whatever is still scheduled.
            rx.close();
            while let Ok(item) = rx.try_recv() {
                if let Scheduled::Packet { pkt, .. } = item {
                    pool.put(pkt);
                }
            }
        })
    }

    /// Cancel the release worker; scheduled packets go back to the pool
    /// without being dispatched.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if let Some(token) = state.token.take() {
            token.cancel();
        }
        state.tx = None;
    }

    /// Drain everything scheduled so far, then halt the stream.
    pub fn eof(&self) {
        if let Some(tx) = &self.state.lock().tx {
            let _ = tx.send(Scheduled::Eof);
        }
    }

    /// Schedule a packet for release one previous-duration after the last
    /// scheduled packet.
    ///
    /// Blocks the caller while more than the buffer duration of media time
    /// is scheduled ahead of the wall clock; `caller` aborts the wait.
    pub async fn handle_pkt(
        &self,
        caller: &CancellationToken,
        input: &Packet,
        previous_duration: i64,
    ) {
        let mut pkt = self.pool.get();
        if let Err(err) = pkt.ref_from(input) {
            self.pool.put(pkt);
            emit_error(&self.bus, self.node, &err, "refing packet");
            return;
        }

        let at = {
            let mut state = self.state.lock();
            let mut at = state.last_at.unwrap_or_else(Instant::now);
            if previous_duration > 0 {
                at += Duration::from_nanos(rescale_to_ns(previous_duration, self.time_base) as u64);
            }
            let sent = match &state.tx {
                Some(tx) => match tx.send(Scheduled::Packet { pkt, at }) {
                    Ok(()) => true,
                    Err(mpsc::error::SendError(Scheduled::Packet { pkt, .. })) => {
                        self.pool.put(pkt);
                        false
                    }
                    Err(_) => false,
                },
                None => {
                    self.pool.put(pkt);
                    false
                }
            };
            if !sent {
                tracing::trace!("rate emulator not running, dropping packet");
                return;
            }
            state.last_at = Some(at);
            at
        };

        let backlog = at.saturating_duration_since(Instant::now());
        if backlog > self.buffer_duration {
            sleep_cancellable(caller, backlog - self.buffer_duration).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avflow_core::dispatch::{PacketHandler, PacketPayload};
    use bytes::Bytes;

    struct Recorder {
        released: Mutex<Vec<(i64, Instant)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                released: Mutex::new(Vec::new()),
            })
        }
    }

    impl PacketHandler for Recorder {
        fn handle_packet(&self, payload: PacketPayload<'_>) {
            self.released.lock().push((payload.packet.pts, Instant::now()));
        }
    }

    fn emulator(
        buffer: Duration,
        dispatcher: Arc<PacketDispatcher>,
        pool: PacketPool,
    ) -> RateEmulator {
        let tb = TimeBase::new(1, 10); // 100ms per tick
        RateEmulator::new(
            NodeId::new(),
            buffer,
            tb,
            Descriptor::new(tb),
            dispatcher,
            pool,
            EventBus::new(),
        )
    }

    fn packet(pts: i64) -> Packet {
        let mut pkt = Packet::new();
        pkt.set_data(Bytes::from_static(b"x"));
        pkt.pts = pts;
        pkt
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_pacing_follows_media_time() {
        let dispatcher = Arc::new(PacketDispatcher::new(NodeId::new()));
        let recorder = Recorder::new();
        dispatcher.connect(recorder.clone());
        let pool = PacketPool::new();
        let e = emulator(Duration::from_secs(10), dispatcher, pool.clone());

        let parent = CancellationToken::new();
        let worker = e.start(&parent);

        let caller = CancellationToken::new();
        let begin = Instant::now();
        for pts in [0, 1, 2, 3] {
            // One tick (100ms) between consecutive packets.
            e.handle_pkt(&caller, &packet(pts), if pts == 0 { 0 } else { 1 })
                .await;
        }
        e.eof();
        worker.await.unwrap();

        let released = recorder.released.lock();
        assert_eq!(released.len(), 4);
        for (i, (pts, at)) in released.iter().enumerate() {
            assert_eq!(*pts, i as i64);
            assert_eq!(
                at.duration_since(begin),
                Duration::from_millis(100 * i as u64)
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_blocks_fast_producer() {
        let dispatcher = Arc::new(PacketDispatcher::new(NodeId::new()));
        let pool = PacketPool::new();
        // 300ms of scheduling headroom over 100ms ticks.
        let e = emulator(Duration::from_millis(300), dispatcher, pool.clone());

        let parent = CancellationToken::new();
        let _worker = e.start(&parent);

        let caller = CancellationToken::new();
        let begin = Instant::now();
        for pts in 0..5 {
            e.handle_pkt(&caller, &packet(pts), if pts == 0 { 0 } else { 1 })
                .await;
        }
        // Five packets span 400ms of media time; with 300ms of headroom the
        // producer must have been held back ~100ms.
        assert!(Instant::now().duration_since(begin) >= Duration::from_millis(100));
        parent.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reclaims_scheduled_packets() {
        let dispatcher = Arc::new(PacketDispatcher::new(NodeId::new()));
        let recorder = Recorder::new();
        dispatcher.connect(recorder.clone());
        let pool = PacketPool::new();
        let e = emulator(Duration::from_secs(10), dispatcher.clone(), pool.clone());

        let parent = CancellationToken::new();
        let worker = e.start(&parent);

        let caller = CancellationToken::new();
        for pts in 0..4 {
            e.handle_pkt(&caller, &packet(pts), if pts == 0 { 0 } else { 10 })
                .await;
        }
        e.stop();
        worker.await.unwrap();

        // Nothing after the cancellation point was dispatched, and every
        // pooled packet came back.
        assert!(recorder.released.lock().len() <= 1);
        assert_eq!(pool.available(), pool.allocated());
    }
}
