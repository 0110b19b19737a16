//! Serial task queues and cancellation-aware sleeps.
//!
//! Each pipeline component owns one serial inbox: intake calls enqueue
//! without blocking, and a single worker task runs the queued closures in
//! order, so component state is only ever mutated from one task at a time.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use parking_lot::Mutex;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Options for a [`SerialQueue`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialQueueOptions {
    /// Run tasks already queued at cancellation before stopping. When
    /// false, queued tasks are dropped on cancel.
    pub process_all: bool,
}

/// A serial inbox: non-blocking `add`, strict FIFO execution on a worker.
pub struct SerialQueue {
    tx: mpsc::UnboundedSender<Task>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Task>>>,
    options: SerialQueueOptions,
}

impl SerialQueue {
    /// Create a queue; tasks can be added before the worker starts.
    pub fn new(options: SerialQueueOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            options,
        }
    }

    /// Enqueue a task. Never blocks; tasks queued after the worker has
    /// exited are dropped.
    pub fn add(&self, task: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Box::new(task));
    }

    /// Start the worker. The worker runs until `token` is cancelled.
    ///
    /// A queue can only be started once; later calls return a finished
    /// handle.
    pub fn start(&self, token: CancellationToken) -> JoinHandle<()> {
        let Some(mut rx) = self.rx.lock().take() else {
            tracing::warn!("serial queue started twice");
            return tokio::spawn(async {});
        };
        let process_all = self.options.process_all;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        if process_all {
                            while let Ok(task) = rx.try_recv() {
                                task();
                            }
                        }
                        break;
                    }
                    task = rx.recv() => match task {
                        Some(task) => task(),
                        None => break,
                    },
                }
            }
        })
    }
}

/// Sleep for `duration` unless `token` is cancelled first.
///
/// Returns true when the full duration elapsed.
pub async fn sleep_cancellable(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Sleep until `deadline` unless `token` is cancelled first.
///
/// Returns true when the deadline was reached.
pub async fn sleep_until_cancellable(token: &CancellationToken, deadline: Instant) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep_until(deadline) => true,
    }
}
