//! Looped playback with rate emulation.
//!
//! Builds an in-memory input with two streams of different time bases,
//! loops it with restamping and paces packet release against the wall
//! clock. Run with:
//!
//! ```sh
//! cargo run --example loop_playback
//! ```

use avflow::prelude::*;
use bytes::Bytes;
use std::sync::Arc;
use tokio::time::Duration;

struct PrintHandler;

impl PacketHandler for PrintHandler {
    fn handle_packet(&self, payload: PacketPayload<'_>) {
        tracing::info!(
            stream = payload.packet.stream_index,
            pts = payload.packet.pts,
            dts = payload.packet.dts,
            "packet"
        );
    }
}

#[tokio::main]
async fn main() -> avflow::Result<()> {
    tracing_subscriber::fmt::init();

    let streams = vec![
        StreamContext {
            index: 0,
            time_base: TimeBase::new(1, 4),
            frame_rate: Rational::new(4, 1),
            kind: StreamKind::Video,
        },
        StreamContext {
            index: 1,
            time_base: TimeBase::new(1, 2),
            frame_rate: Rational::zero(),
            kind: StreamKind::Audio,
        },
    ];
    let packets = vec![
        MemoryPacket::new(0, 0, Bytes::from_static(b"v0")),
        MemoryPacket::new(1, 0, Bytes::from_static(b"a0")),
        MemoryPacket::new(0, 1, Bytes::from_static(b"v1")),
        MemoryPacket::new(0, 2, Bytes::from_static(b"v2")),
        MemoryPacket::new(1, 1, Bytes::from_static(b"a1")),
        MemoryPacket::new(0, 3, Bytes::from_static(b"v3")),
        MemoryPacket::new(1, 2, Bytes::from_static(b"a2")),
    ];

    let bus = EventBus::new();
    bus.subscribe(|event| {
        if let Event::Error { message, .. } = event {
            tracing::error!(%message, "pipeline error");
        }
    });

    let demuxer = Demuxer::new(
        Box::new(MemoryInput::new(streams, packets)),
        DemuxerOptions {
            emulate_rate: true,
            loop_enabled: true,
            ..Default::default()
        },
        bus,
        NodeControl::new(),
    )?;
    demuxer.connect(Arc::new(PrintHandler));

    let handle = demuxer.start();
    tokio::time::sleep(Duration::from_secs(3)).await;
    demuxer.control().cancel();
    let _ = handle.await;

    let stats = demuxer.stats();
    tracing::info!(
        incoming_bits = stats.incoming_bits,
        dispatched = stats.packets_dispatched,
        "done"
    );
    Ok(())
}
