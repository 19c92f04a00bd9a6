//! Background JSONL exporter with drop-on-full backpressure.
//!
//! # Threading
//! One worker thread owns the output file. Producers hand events over a
//! bounded channel with `try_send`, so a full queue costs the producer one
//! failed send and a counter bump, never a wait.
//!
//! # Shutdown
//! `close` stops intake, then waits up to a timeout for the worker to drain
//! the queue. Events still queued when the timeout elapses are lost and are
//! reported as dropped.

use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use telltale_core::{artifact, CoreError, CoreResult, Event, ExportConfig, SharedEvent};

/// Exporter counters at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExporterStats {
    /// Lines appended to the output file
    pub written_count: u64,
    /// Events lost to a full queue, a closed exporter, or a write failure
    pub dropped_count: u64,
    /// Events waiting for the worker
    pub queued_count: usize,
}

#[derive(Debug, Default)]
struct Counters {
    written: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
    stop: AtomicBool,
}

/// Cloneable, `Send` producer side of an [`AsyncExporter`]
///
/// Hand one to a hub subscriber:
///
/// ```ignore
/// let handle = exporter.handle();
/// hub.subscribe(move |e| { handle.enqueue(Arc::clone(e)); });
/// ```
#[derive(Debug, Clone)]
pub struct ExportHandle {
    sender: Sender<SharedEvent>,
    counters: Arc<Counters>,
    capacity: usize,
}

impl ExportHandle {
    /// Queue an event without blocking
    ///
    /// Returns false, and counts a drop, when the queue is full or the
    /// exporter is closed.
    pub fn enqueue(&self, event: SharedEvent) -> bool {
        if self.counters.closed.load(Ordering::Acquire) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Queue an owned event
    pub fn enqueue_event(&self, event: Event) -> bool {
        self.enqueue(Arc::new(event))
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> ExporterStats {
        ExporterStats {
            written_count: self.counters.written.load(Ordering::Relaxed),
            dropped_count: self.counters.dropped.load(Ordering::Relaxed),
            queued_count: self.sender.len(),
        }
    }

    /// Queue occupancy in `[0, 1]`
    #[must_use]
    pub fn fill_ratio(&self) -> f64 {
        (self.sender.len() as f64 / self.capacity as f64).min(1.0)
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.counters.closed.load(Ordering::Acquire)
    }
}

/// Owns the worker thread; closing (or dropping) drains and joins it
#[derive(Debug)]
pub struct AsyncExporter {
    handle: ExportHandle,
    receiver: Receiver<SharedEvent>,
    worker: Option<JoinHandle<()>>,
    done: Receiver<()>,
    path: PathBuf,
    close_timeout: Duration,
}

impl AsyncExporter {
    /// Start the worker; the output file is created on the first event
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero queue capacity or poll interval,
    /// or `Io` if the thread cannot be spawned
    pub fn start(config: &ExportConfig) -> CoreResult<Self> {
        if config.queue_capacity == 0 {
            return Err(CoreError::invalid_argument("queue_capacity", "must be > 0"));
        }
        if config.poll_interval_ms == 0 {
            return Err(CoreError::invalid_argument("poll_interval_ms", "must be > 0"));
        }

        let (sender, receiver) = flume::bounded(config.queue_capacity);
        // Never sent on; disconnects when the worker returns or unwinds.
        let (done_tx, done) = flume::bounded::<()>(1);
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            path: config.path.clone(),
            receiver: receiver.clone(),
            counters: Arc::clone(&counters),
            poll: Duration::from_millis(config.poll_interval_ms),
            writer: None,
            dirty: false,
        };
        let thread = std::thread::Builder::new()
            .name("diag-exporter".to_string())
            .spawn(move || {
                let _done = done_tx;
                worker.run();
            })
            .map_err(|e| CoreError::io(&config.path, &e))?;

        tracing::info!(path = %config.path.display(), capacity = config.queue_capacity, "exporter started");
        Ok(Self {
            handle: ExportHandle {
                sender,
                counters,
                capacity: config.queue_capacity,
            },
            receiver,
            worker: Some(thread),
            done,
            path: config.path.clone(),
            close_timeout: Duration::from_millis(config.close_timeout_ms),
        })
    }

    /// Producer handle for other owners
    #[must_use]
    pub fn handle(&self) -> ExportHandle {
        self.handle.clone()
    }

    /// See [`ExportHandle::enqueue`]
    pub fn enqueue(&self, event: SharedEvent) -> bool {
        self.handle.enqueue(event)
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> ExporterStats {
        self.handle.stats()
    }

    /// Output file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop intake, drain, and join the worker within `timeout`
    ///
    /// Idempotent. Returns the final counters; `queued_count` is always zero
    /// afterwards since anything the worker could not reach is counted as
    /// dropped.
    pub fn close(&mut self, timeout: Duration) -> ExporterStats {
        let counters = &self.handle.counters;
        counters.closed.store(true, Ordering::Release);
        counters.stop.store(true, Ordering::Release);

        if let Some(thread) = self.worker.take() {
            match self.done.recv_timeout(timeout) {
                Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                    if thread.join().is_err() {
                        tracing::warn!("exporter worker panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(?timeout, queued = self.receiver.len(), "exporter close timed out");
                }
            }
        }

        let mut abandoned = 0;
        while self.receiver.try_recv().is_ok() {
            abandoned += 1;
        }
        if abandoned > 0 {
            counters.dropped.fetch_add(abandoned, Ordering::Relaxed);
        }

        let stats = self.stats();
        tracing::info!(
            written = stats.written_count,
            dropped = stats.dropped_count,
            "exporter closed"
        );
        stats
    }

    /// [`close`](Self::close) with the configured timeout
    pub fn close_default(&mut self) -> ExporterStats {
        self.close(self.close_timeout)
    }
}

impl Drop for AsyncExporter {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.close_default();
        }
    }
}

struct Worker {
    path: PathBuf,
    receiver: Receiver<SharedEvent>,
    counters: Arc<Counters>,
    poll: Duration,
    writer: Option<BufWriter<File>>,
    dirty: bool,
}

impl Worker {
    fn run(mut self) {
        loop {
            match self.receiver.recv_timeout(self.poll) {
                Ok(event) => {
                    if self.write_line(&event) {
                        self.counters.written.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    if self.receiver.is_empty() {
                        self.flush();
                    }
                }
                Err(RecvTimeoutError::Timeout) => self.flush(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.counters.stop.load(Ordering::Acquire) && self.receiver.is_empty() {
                break;
            }
        }
        self.flush();
    }

    fn write_line(&mut self, event: &Event) -> bool {
        let Some(writer) = self.writer() else {
            return false;
        };
        let result = serde_json::to_writer(&mut *writer, event)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"));
        match result {
            Ok(()) => {
                self.dirty = true;
                true
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "event export failed");
                false
            }
        }
    }

    fn writer(&mut self) -> Option<&mut BufWriter<File>> {
        if self.writer.is_none() {
            match open_append(&self.path) {
                Ok(file) => self.writer = Some(BufWriter::new(file)),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "cannot open export file");
                    return None;
                }
            }
        }
        self.writer.as_mut()
    }

    fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                tracing::warn!(path = %self.path.display(), error = %e, "export flush failed");
            }
        }
        self.dirty = false;
    }
}

fn open_append(path: &Path) -> CoreResult<File> {
    artifact::ensure_parent(path)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| CoreError::io(path, &e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    fn config(path: PathBuf, queue_capacity: usize) -> ExportConfig {
        ExportConfig {
            path,
            queue_capacity,
            poll_interval_ms: 5,
            close_timeout_ms: 5_000,
        }
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        let file = File::open(path).unwrap();
        std::io::BufReader::new(file)
            .lines()
            .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AsyncExporter::start(&config(dir.path().join("e.jsonl"), 0)).is_err());
    }

    #[test]
    fn test_writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/events.jsonl");
        let mut exporter = AsyncExporter::start(&config(path.clone(), 64)).unwrap();
        for tick in 0..10 {
            assert!(exporter.enqueue(Arc::new(Event::new(tick, "frame", "time_ms").with_value(16.0))));
        }
        let stats = exporter.close(Duration::from_secs(5));
        assert_eq!(stats.written_count, 10);
        assert_eq!(stats.dropped_count, 0);
        assert_eq!(stats.queued_count, 0);

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[3]["tick"], 3);
        assert_eq!(lines[3]["category"], "frame");
        assert_eq!(lines[3]["level"], "info");
        assert!(lines[3]["ts_utc"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_no_file_without_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut exporter = AsyncExporter::start(&config(path.clone(), 4)).unwrap();
        exporter.close(Duration::from_secs(5));
        assert!(!path.exists());
    }

    #[test]
    fn test_overflow_counts_drops_never_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut exporter = AsyncExporter::start(&config(path.clone(), 4)).unwrap();
        let handle = exporter.handle();
        let total = 5_000_u64;
        for tick in 0..total {
            handle.enqueue_event(Event::new(tick, "perf", "span"));
        }
        let stats = exporter.close(Duration::from_secs(5));
        assert_eq!(stats.queued_count, 0);
        assert_eq!(stats.written_count + stats.dropped_count, total);
        assert_eq!(read_lines(&path).len() as u64, stats.written_count);
    }

    #[test]
    fn test_enqueue_after_close_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = AsyncExporter::start(&config(dir.path().join("e.jsonl"), 4)).unwrap();
        let handle = exporter.handle();
        exporter.close(Duration::from_secs(5));
        assert!(handle.is_closed());
        assert!(!handle.enqueue_event(Event::new(0, "late", "event")));
        assert_eq!(handle.stats().dropped_count, 1);

        // Second close is a no-op.
        let again = exporter.close(Duration::from_millis(1));
        assert_eq!(again.dropped_count, 1);
    }

    #[test]
    fn test_handle_is_send_across_threads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut exporter = AsyncExporter::start(&config(path.clone(), 1024)).unwrap();
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let handle = exporter.handle();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        handle.enqueue_event(Event::new(p * 100 + i, "thread", "emit"));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        let stats = exporter.close(Duration::from_secs(5));
        assert_eq!(stats.written_count + stats.dropped_count, 200);
        assert_eq!(read_lines(&path).len() as u64, stats.written_count);
    }

    #[test]
    fn test_drop_closes_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let exporter = AsyncExporter::start(&config(path.clone(), 16)).unwrap();
            exporter.enqueue(Arc::new(Event::new(1, "frame", "time_ms")));
        }
        assert_eq!(read_lines(&path).len(), 1);
    }

    #[test]
    fn test_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        for _ in 0..2 {
            let mut exporter = AsyncExporter::start(&config(path.clone(), 16)).unwrap();
            exporter.enqueue(Arc::new(Event::new(1, "frame", "time_ms")));
            exporter.close(Duration::from_secs(5));
        }
        assert_eq!(read_lines(&path).len(), 2);
    }

    #[test]
    fn test_unwritable_path_counts_drops() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let mut exporter = AsyncExporter::start(&config(blocker.join("events.jsonl"), 16)).unwrap();
        exporter.enqueue(Arc::new(Event::new(1, "frame", "time_ms")));
        let stats = exporter.close(Duration::from_secs(5));
        assert_eq!(stats.written_count, 0);
        assert_eq!(stats.dropped_count, 1);
    }
}
