//! Event logger with temporal pattern merging.
//!
//! The logger is a synchronous front-end to a pluggable sink that
//! collapses identical patterns emitted within a merging window: the first
//! occurrence is forwarded immediately, repeats only bump a counter, and
//! the window expiry produces a single summary line. It is the one piece
//! of process-wide state in the framework; the application bootstrap
//! constructs it once and hands references to every component.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Tag prefixed to merge summary lines.
const MERGE_PREFIX: &str = "avflow";

/// Underlying sink the logger forwards to.
pub trait LogSink: Send + Sync {
    /// Write one line.
    fn print(&self, msg: &str);

    /// Write one line and terminate the process.
    fn fatal(&self, msg: &str);
}

/// Sink writing to stderr.
pub struct StdSink;

impl LogSink for StdSink {
    fn print(&self, msg: &str) {
        eprintln!("{msg}");
    }

    fn fatal(&self, msg: &str) {
        eprintln!("{msg}");
        std::process::exit(1);
    }
}

/// Log levels exposed by the leveled emitters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Info,
    /// Something off, not fatal.
    Warn,
    /// A failure.
    Error,
}

#[derive(PartialEq, Eq, Hash)]
struct MergeKey {
    level: LogLevel,
    pattern: String,
}

struct MergedEntry {
    count: u64,
    created_at: Instant,
}

struct MergeState {
    window: Duration,
    entries: Mutex<HashMap<MergeKey, MergedEntry>>,
}

struct LoggerInner {
    sink: Box<dyn LogSink>,
    merging: Option<MergeState>,
    flusher: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl LoggerInner {
    /// Forward or merge one message. `pattern` is the merge identity,
    /// `message` the concrete line forwarded on first occurrence.
    fn write(&self, level: LogLevel, pattern: String, message: &str) {
        let Some(merging) = &self.merging else {
            self.sink.print(message);
            return;
        };

        let mut entries = merging.entries.lock();
        match entries.entry(MergeKey { level, pattern }) {
            std::collections::hash_map::Entry::Occupied(mut e) => {
                e.get_mut().count += 1;
            }
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(MergedEntry {
                    count: 1,
                    created_at: Instant::now(),
                });
                drop(entries);
                self.sink.print(message);
            }
        }
    }

    fn summarize(&self, key: &MergeKey, entry: &MergedEntry) {
        let extras = entry.count.saturating_sub(1);
        match extras {
            0 => {}
            1 => self.sink.print(&format!(
                "{MERGE_PREFIX}: pattern repeated once: {}",
                key.pattern
            )),
            n => self.sink.print(&format!(
                "{MERGE_PREFIX}: pattern repeated {n} times: {}",
                key.pattern
            )),
        }
    }

    /// Flush entries whose window has expired.
    fn flush_expired(&self, now: Instant) {
        let Some(merging) = &self.merging else { return };
        let mut expired = Vec::new();
        merging.entries.lock().retain(|key, entry| {
            if now.duration_since(entry.created_at) >= merging.window {
                expired.push((
                    MergeKey {
                        level: key.level,
                        pattern: key.pattern.clone(),
                    },
                    MergedEntry {
                        count: entry.count,
                        created_at: entry.created_at,
                    },
                ));
                false
            } else {
                true
            }
        });
        for (key, entry) in &expired {
            self.summarize(key, entry);
        }
    }

    /// Flush every entry regardless of age.
    fn flush_all(&self) {
        let Some(merging) = &self.merging else { return };
        let drained: Vec<_> = merging.entries.lock().drain().collect();
        for (key, entry) in &drained {
            self.summarize(key, entry);
        }
    }
}

/// Leveled logger with pattern merging over a pluggable sink.
///
/// Cloning yields another handle to the same logger.
#[derive(Clone)]
pub struct EventLogger {
    inner: Arc<LoggerInner>,
}

impl EventLogger {
    /// Create a logger forwarding everything straight to `sink`.
    pub fn new(sink: impl LogSink + 'static) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                sink: Box::new(sink),
                merging: None,
                flusher: Mutex::new(None),
            }),
        }
    }

    /// Enable message merging with the given window.
    ///
    /// Must be called before [`start`](Self::start).
    pub fn with_merging(self, window: Duration) -> Self {
        let inner = Arc::try_unwrap(self.inner)
            .unwrap_or_else(|_| panic!("with_merging called on a shared logger"));
        Self {
            inner: Arc::new(LoggerInner {
                sink: inner.sink,
                merging: Some(MergeState {
                    window,
                    entries: Mutex::new(HashMap::new()),
                }),
                flusher: Mutex::new(None),
            }),
        }
    }

    /// Start the background flusher. A no-op without merging.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let Some(merging) = &self.inner.merging else { return };
        let mut flusher = self.inner.flusher.lock();
        if flusher.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let window = merging.window;
        let inner = Arc::clone(&self.inner);
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(window) => inner.flush_expired(Instant::now()),
                }
            }
        });
        *flusher = Some((token, handle));
    }

    /// Stop the flusher and flush every pending entry.
    pub fn close(&self) {
        if let Some((token, _handle)) = self.inner.flusher.lock().take() {
            token.cancel();
        }
        self.inner.flush_all();
    }

    /// Log a debug message.
    pub fn debug(&self, msg: impl Into<String>) {
        let msg = msg.into();
        self.inner.write(LogLevel::Debug, msg.clone(), &msg);
    }

    /// Log an info message.
    pub fn info(&self, msg: impl Into<String>) {
        let msg = msg.into();
        self.inner.write(LogLevel::Info, msg.clone(), &msg);
    }

    /// Log a warning message.
    pub fn warn(&self, msg: impl Into<String>) {
        let msg = msg.into();
        self.inner.write(LogLevel::Warn, msg.clone(), &msg);
    }

    /// Log an error message.
    pub fn error(&self, msg: impl Into<String>) {
        let msg = msg.into();
        self.inner.write(LogLevel::Error, msg.clone(), &msg);
    }

    /// Log a debug message merged under `pattern`; `key` is the concrete
    /// instance forwarded on first occurrence.
    pub fn debug_key(&self, pattern: impl Into<String>, key: impl Into<String>) {
        self.inner.write(LogLevel::Debug, pattern.into(), &key.into());
    }

    /// Log an info message merged under `pattern`.
    pub fn info_key(&self, pattern: impl Into<String>, key: impl Into<String>) {
        self.inner.write(LogLevel::Info, pattern.into(), &key.into());
    }

    /// Log a warning merged under `pattern`.
    pub fn warn_key(&self, pattern: impl Into<String>, key: impl Into<String>) {
        self.inner.write(LogLevel::Warn, pattern.into(), &key.into());
    }

    /// Log an error merged under `pattern`.
    pub fn error_key(&self, pattern: impl Into<String>, key: impl Into<String>) {
        self.inner.write(LogLevel::Error, pattern.into(), &key.into());
    }

    /// Forward straight to the sink's terminal path. Never merged.
    pub fn fatal(&self, msg: &str) {
        self.inner.sink.fatal(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct MapSink {
        msgs: Arc<Mutex<HashMap<String, usize>>>,
    }

    impl MapSink {
        fn counts(&self) -> HashMap<String, usize> {
            self.msgs.lock().clone()
        }
    }

    impl LogSink for MapSink {
        fn print(&self, msg: &str) {
            *self.msgs.lock().entry(msg.to_string()).or_insert(0) += 1;
        }

        fn fatal(&self, msg: &str) {
            self.print(msg);
        }
    }

    #[test]
    fn test_no_merging_passes_through() {
        let sink = MapSink::default();
        let logger = EventLogger::new(sink.clone());
        logger.info("hello");
        logger.info("hello");
        assert_eq!(sink.counts()["hello"], 2);
    }

    #[test]
    fn test_merging_repeated_once() {
        let sink = MapSink::default();
        let logger =
            EventLogger::new(sink.clone()).with_merging(Duration::from_millis(500));
        logger.error("boom");
        logger.error("boom");
        logger.close();

        let counts = sink.counts();
        assert_eq!(counts["boom"], 1);
        assert_eq!(counts["avflow: pattern repeated once: boom"], 1);
    }

    #[test]
    fn test_merging_repeated_n_times() {
        let sink = MapSink::default();
        let logger =
            EventLogger::new(sink.clone()).with_merging(Duration::from_millis(500));
        for _ in 0..4 {
            logger.warn("again");
        }
        logger.close();

        let counts = sink.counts();
        assert_eq!(counts["again"], 1);
        assert_eq!(counts["avflow: pattern repeated 3 times: again"], 1);
    }

    #[test]
    fn test_keyed_identity_is_the_pattern() {
        let sink = MapSink::default();
        let logger =
            EventLogger::new(sink.clone()).with_merging(Duration::from_millis(500));
        logger.debug_key("conn-%d", "conn-1");
        logger.debug_key("conn-%d", "conn-2");
        logger.debug_key("conn-%d", "conn-3");
        logger.close();

        let counts = sink.counts();
        // Only the first concrete instance is forwarded.
        assert_eq!(counts["conn-1"], 1);
        assert!(!counts.contains_key("conn-2"));
        assert_eq!(counts["avflow: pattern repeated 2 times: conn-%d"], 1);
    }

    #[test]
    fn test_same_pattern_different_levels_kept_apart() {
        let sink = MapSink::default();
        let logger =
            EventLogger::new(sink.clone()).with_merging(Duration::from_millis(500));
        logger.error("msg");
        logger.error("msg");
        logger.info("msg");
        logger.info("msg");
        logger.close();

        let counts = sink.counts();
        assert_eq!(counts["msg"], 2);
        assert_eq!(counts["avflow: pattern repeated once: msg"], 2);
    }

    #[test]
    fn test_fatal_never_merged() {
        let sink = MapSink::default();
        let logger =
            EventLogger::new(sink.clone()).with_merging(Duration::from_millis(500));
        logger.fatal("die");
        logger.fatal("die");
        assert_eq!(sink.counts()["die"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flusher_emits_after_window() {
        let sink = MapSink::default();
        let logger =
            EventLogger::new(sink.clone()).with_merging(Duration::from_millis(500));
        logger.start();

        logger.error("tick");
        logger.error("tick");
        tokio::time::sleep(Duration::from_secs(1)).await;

        let counts = sink.counts();
        assert_eq!(counts["tick"], 1);
        assert_eq!(counts["avflow: pattern repeated once: tick"], 1);

        // The window has been flushed: a later occurrence is concrete again.
        logger.error("tick");
        assert_eq!(sink.counts()["tick"], 2);
        logger.close();
    }
}
