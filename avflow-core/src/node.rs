//! Node identity and lifecycle control.
//!
//! The generic node wrapper (task supervision, close callbacks, stat
//! registration) lives outside this workspace; components here only need a
//! process-unique identity, a cancellation token and a pause flag.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Unique node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Create a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

struct ControlInner {
    token: CancellationToken,
    paused: watch::Sender<bool>,
}

/// Per-node cancellation and pause control.
///
/// Cloning yields another handle to the same control state.
#[derive(Clone)]
pub struct NodeControl {
    inner: Arc<ControlInner>,
}

impl NodeControl {
    /// Create a control rooted at its own cancellation token.
    pub fn new() -> Self {
        Self::with_parent(&CancellationToken::new())
    }

    /// Create a control whose token is a child of `parent`.
    ///
    /// Cancelling the parent cancels this node; cancelling this node leaves
    /// the parent untouched.
    pub fn with_parent(parent: &CancellationToken) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(ControlInner {
                token: parent.child_token(),
                paused,
            }),
        }
    }

    /// The node's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Cancel the node.
    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    /// Check whether the node has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Pause the node's worker loop at its next pause point.
    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
    }

    /// Resume a paused node.
    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
    }

    /// Check whether the node is currently paused.
    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    /// Block while the node is paused.
    ///
    /// Returns early when the node is cancelled.
    pub async fn handle_pause(&self) {
        let mut rx = self.inner.paused.subscribe();
        loop {
            if !*rx.borrow_and_update() {
                return;
            }
            tokio::select! {
                _ = self.inner.token.cancelled() => return,
                res = rx.changed() => {
                    if res.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

impl Default for NodeControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_unique() {
        let a = NodeId::new();
        let b = NodeId::new();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_handle_pause_passes_when_not_paused() {
        let control = NodeControl::new();
        control.handle_pause().await;
    }

    #[tokio::test]
    async fn test_handle_pause_blocks_until_resumed() {
        let control = NodeControl::new();
        control.pause();

        let waiter = control.clone();
        let handle = tokio::spawn(async move { waiter.handle_pause().await });
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        control.resume();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_pause_released_by_cancel() {
        let control = NodeControl::new();
        control.pause();

        let waiter = control.clone();
        let handle = tokio::spawn(async move { waiter.handle_pause().await });
        tokio::task::yield_now().await;

        control.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_child_token_follows_parent() {
        let parent = CancellationToken::new();
        let control = NodeControl::with_parent(&parent);
        assert!(!control.is_cancelled());
        parent.cancel();
        assert!(control.is_cancelled());
    }
}
