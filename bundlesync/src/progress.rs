//! Progress reporting for provisioning stages.
//!
//! Components produce [`ProgressEvent`]s and hand them to a single
//! [`ProgressSink`]. Byte-level download progress is rate limited through a
//! [`ProgressThrottle`]; the chunked downloader aggregates per-range counters
//! in [`ChunkCounters`] and reports them through [`report_until_done`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;

/// Default minimum interval between throttled progress emits (~10/s).
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Byte progress callback: `(bytes_so_far, total_bytes)`.
pub type ByteProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// A single progress update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Label of the task producing the event (e.g. `download:pack.zip`).
    pub task: String,
    /// Current position.
    pub current: u64,
    /// Total, or 0 when unknown.
    pub total: u64,
    /// Optional human-readable message.
    pub message: Option<String>,
}

impl ProgressEvent {
    /// Create an event without a message.
    pub fn new(task: impl Into<String>, current: u64, total: u64) -> Self {
        Self {
            task: task.into(),
            current,
            total,
            message: None,
        }
    }

    /// Attach a message to the event.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Whether the event reports a finished task.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.current >= self.total
    }
}

/// Receiver of progress events.
///
/// `emit` is fire-and-forget and must not block the producer for long;
/// implementations are shared between worker threads.
pub trait ProgressSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: ProgressEvent);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Sink that forwards events to a closure.
pub struct CallbackSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    /// Wrap a closure as a sink.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressSink for CallbackSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        (self.callback)(event);
    }
}

/// Sink that logs completed tasks and messages through tracing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: ProgressEvent) {
        if let Some(ref message) = event.message {
            info!(task = %event.task, current = event.current, total = event.total, "{}", message);
        } else if event.is_complete() {
            info!(task = %event.task, total = event.total, "Task complete");
        }
    }
}

#[derive(Debug, Default)]
struct ThrottleState {
    last_emit: Option<Instant>,
    high_water: u64,
}

/// Rate limiter for byte progress.
///
/// Emits at most once per interval, always emits on completion, and never
/// reports a value lower than one it already reported.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    state: Mutex<ThrottleState>,
}

impl ProgressThrottle {
    /// Create a throttle with the given minimum interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(ThrottleState::default()),
        }
    }

    /// Decide whether to emit for `current`.
    ///
    /// Returns the value to report, clamped to the high-water mark, or
    /// `None` if the update should be dropped.
    pub fn admit(&self, current: u64, finished: bool) -> Option<u64> {
        let mut state = self.state.lock();
        let value = current.max(state.high_water);
        state.high_water = value;

        let now = Instant::now();
        let due = match state.last_emit {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };

        if finished || due {
            state.last_emit = Some(now);
            Some(value)
        } else {
            None
        }
    }

    /// Report through an optional callback, respecting the rate limit.
    pub fn report(&self, callback: Option<ByteProgress<'_>>, current: u64, total: u64) {
        if let Some(cb) = callback {
            if let Some(value) = self.admit(current, false) {
                cb(value, total);
            }
        }
    }

    /// Report completion through an optional callback (never dropped).
    pub fn finish(&self, callback: Option<ByteProgress<'_>>, current: u64, total: u64) {
        if let Some(cb) = callback {
            if let Some(value) = self.admit(current, true) {
                cb(value, total);
            }
        }
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_INTERVAL)
    }
}

/// Shared per-range byte counters for a chunked download.
///
/// Each range slot is written only by the worker currently downloading that
/// range, so updates are plain atomic stores.
#[derive(Debug)]
pub struct ChunkCounters {
    chunk_progress: Vec<AtomicU64>,
    done: AtomicBool,
}

impl ChunkCounters {
    /// Create counters for the given number of ranges.
    pub fn new(num_chunks: usize) -> Self {
        Self {
            chunk_progress: (0..num_chunks).map(|_| AtomicU64::new(0)).collect(),
            done: AtomicBool::new(false),
        }
    }

    /// Total bytes across all ranges.
    pub fn total_bytes(&self) -> u64 {
        self.chunk_progress
            .iter()
            .map(|p| p.load(Ordering::SeqCst))
            .sum()
    }

    /// Set the bytes written so far for one range.
    pub fn update_chunk(&self, index: usize, bytes: u64) {
        if let Some(slot) = self.chunk_progress.get(index) {
            slot.store(bytes, Ordering::SeqCst);
        }
    }

    /// Signal that all workers have exited.
    pub fn signal_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    /// Whether workers have exited.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Poll `counters` and report aggregate progress until workers signal done.
///
/// Meant to run on its own (scoped) thread next to the chunk workers. The
/// final report is always delivered.
pub fn report_until_done(
    counters: &ChunkCounters,
    total_size: u64,
    callback: ByteProgress<'_>,
    poll_interval: Duration,
) {
    let throttle = ProgressThrottle::new(poll_interval);
    while !counters.is_done() {
        if let Some(bytes) = throttle.admit(counters.total_bytes(), false) {
            callback(bytes, total_size);
        }
        thread::sleep(poll_interval);
    }

    if let Some(bytes) = throttle.admit(counters.total_bytes(), true) {
        callback(bytes, total_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_throttle_first_update_emits() {
        let throttle = ProgressThrottle::new(Duration::from_secs(60));
        assert_eq!(throttle.admit(10, false), Some(10));
        assert_eq!(throttle.admit(20, false), None);
    }

    #[test]
    fn test_throttle_always_emits_finish() {
        let throttle = ProgressThrottle::new(Duration::from_secs(60));
        throttle.admit(10, false);
        assert_eq!(throttle.admit(100, true), Some(100));
    }

    #[test]
    fn test_throttle_never_decreases() {
        let throttle = ProgressThrottle::new(Duration::ZERO);
        assert_eq!(throttle.admit(500, false), Some(500));
        // A retry restarting from zero must not move progress backwards
        assert_eq!(throttle.admit(0, false), Some(500));
        assert_eq!(throttle.admit(700, true), Some(700));
    }

    #[test]
    fn test_throttle_report_with_callback() {
        let seen = Mutex::new(Vec::new());
        let cb = |current: u64, total: u64| seen.lock().push((current, total));
        let throttle = ProgressThrottle::new(Duration::from_secs(60));

        throttle.report(Some(&cb), 1, 10);
        throttle.report(Some(&cb), 5, 10);
        throttle.finish(Some(&cb), 10, 10);

        assert_eq!(*seen.lock(), vec![(1, 10), (10, 10)]);
    }

    #[test]
    fn test_chunk_counters() {
        let counters = ChunkCounters::new(3);
        counters.update_chunk(0, 100);
        counters.update_chunk(2, 50);
        counters.update_chunk(7, 999);
        assert_eq!(counters.total_bytes(), 150);

        assert!(!counters.is_done());
        counters.signal_done();
        assert!(counters.is_done());
    }

    #[test]
    fn test_report_until_done_final_report() {
        let counters = ChunkCounters::new(2);
        let reports = Mutex::new(Vec::new());
        let cb = |bytes: u64, total: u64| reports.lock().push((bytes, total));

        thread::scope(|scope| {
            scope.spawn(|| report_until_done(&counters, 200, &cb, Duration::from_millis(10)));

            counters.update_chunk(0, 100);
            thread::sleep(Duration::from_millis(30));
            counters.update_chunk(1, 100);
            counters.signal_done();
        });

        let reports = reports.lock();
        assert_eq!(reports.last(), Some(&(200, 200)));
        assert!(reports.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_callback_sink() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&events);
        let sink = CallbackSink::new(move |event| captured.lock().push(event));

        sink.emit(ProgressEvent::new("items", 1, 5).with_message("a.jar"));
        sink.emit(ProgressEvent::new("items", 5, 5));

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message.as_deref(), Some("a.jar"));
        assert!(events[1].is_complete());
    }
}
