//! Fixed-cadence output over a bursty source.
//!
//! Feeds a 25fps rate enforcer from a source that stalls halfway, and
//! watches the previous-frame filler keep the cadence. Run with:
//!
//! ```sh
//! cargo run --example enforce_rate
//! ```

use avflow::prelude::*;
use bytes::Bytes;
use std::sync::Arc;
use tokio::time::Duration;

struct PrintHandler;

impl FrameHandler for PrintHandler {
    fn handle_frame(&self, payload: FramePayload<'_>) {
        tracing::info!(pts = payload.frame.pts, "frame out");
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), avflow::FramerateError> {
    tracing_subscriber::fmt::init();

    let bus = EventBus::new();
    bus.subscribe(|event| match event {
        Event::SwitchedIn { node } => tracing::info!(%node, "switched in"),
        Event::SwitchedOut { node } => tracing::info!(%node, "switched out"),
        Event::Error { message, .. } => tracing::error!(%message, "error"),
    });

    let enforcer = RateEnforcer::new(
        RateEnforcerOptions {
            delay: 2,
            ..RateEnforcerOptions::new(OutputContext {
                time_base: TimeBase::new(1, 25),
                frame_rate: Rational::new(25, 1),
            })
        },
        bus,
        NodeControl::new(),
    )?;
    enforcer.connect(Arc::new(PrintHandler));
    let handle = enforcer.start();

    let source = NodeId::new();
    enforcer.switch(Some(source));

    // One second of frames, then the source goes quiet.
    for pts in 0..25 {
        let mut frame = Frame::new();
        frame.set_data(Bytes::from_static(b"frame"));
        frame.pts = pts;
        enforcer.handle_frame(FramePayload {
            frame: &frame,
            descriptor: Descriptor::new(TimeBase::new(1, 25)),
            node: source,
        });
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    enforcer.control().cancel();
    let _ = handle.await;

    let stats = enforcer.stats();
    tracing::info!(
        dispatched = stats.dispatched,
        filled = stats.filled,
        "done"
    );
    Ok(())
}
