//! Span profiler.
//!
//! Spans are opened with [`Profiler::begin_span`], which hands back a
//! move-only [`SpanToken`] only while timeline capture is active. Closing a
//! token consumes it, so a span can never be finalized twice. Closed spans
//! are retained in a bounded ring. Open spans are not visible to snapshots
//! and are capped at `span_capacity`: a dropped token's span is evicted,
//! oldest first, once newer spans need the room.

use crate::hub::Hub;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use telltale_core::{
    artifact, schema, time, CoreResult, EveryNth, Level, Metadata, MonotonicClock,
    ProfilingConfig, ProfilingMode, RingBuffer, Value,
};

/// Number of keys reported in `top_spans_ms`
pub const TOP_SPANS: usize = 10;

/// Handle for an open span; consumed by `end_span*`
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "an unclosed span is never recorded"]
pub struct SpanToken {
    id: u64,
}

impl SpanToken {
    /// Numeric id, unique per profiler
    pub const fn id(&self) -> u64 {
        self.id
    }
}

/// One closed span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilingSpan {
    /// Tick the span was opened on
    pub tick: u64,
    /// Span category
    pub category: String,
    /// Span name
    pub name: String,
    /// Start, seconds on the profiler clock
    pub start_s: f64,
    /// End, seconds on the profiler clock; never before `start_s`
    pub end_s: f64,
    /// `(end_s - start_s) * 1000`
    pub duration_ms: f64,
    /// Caller-supplied annotations
    #[serde(default)]
    pub metadata: Metadata,
}

impl ProfilingSpan {
    /// `category:name`, the aggregation key for `top_spans_ms`
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.category, self.name)
    }
}

/// `diag.profiling.v1` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilingSnapshot {
    /// Schema tag
    pub schema_version: String,
    /// Capture mode at snapshot time
    pub mode: ProfilingMode,
    /// Spans in this document
    pub span_count: usize,
    /// Up to ten `[key, summed_ms]` pairs, largest first
    pub top_spans_ms: Vec<(String, f64)>,
    /// Closed spans, oldest first
    pub spans: Vec<ProfilingSpan>,
}

#[derive(Debug)]
struct OpenSpan {
    tick: u64,
    category: String,
    name: String,
    start_s: f64,
    metadata: Metadata,
}

/// Span timing collector
#[derive(Debug)]
pub struct Profiler {
    mode: ProfilingMode,
    sampler: EveryNth,
    clock: MonotonicClock,
    open: BTreeMap<u64, OpenSpan>,
    open_capacity: usize,
    next_id: u64,
    spans: RingBuffer<ProfilingSpan>,
    export_dir: PathBuf,
}

impl Profiler {
    /// Build a profiler from its configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `span_capacity` is zero
    pub fn new(config: &ProfilingConfig) -> CoreResult<Self> {
        Ok(Self {
            mode: config.mode,
            sampler: EveryNth::new(config.sampling_n),
            clock: MonotonicClock::new(),
            open: BTreeMap::new(),
            open_capacity: config.span_capacity,
            next_id: 1,
            spans: RingBuffer::new(config.span_capacity)?,
            export_dir: config.export_dir.clone(),
        })
    }

    /// Current mode
    #[must_use]
    pub const fn mode(&self) -> ProfilingMode {
        self.mode
    }

    /// Anything but `Off`
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.mode.is_enabled()
    }

    /// Change mode; open spans survive and can still be closed
    pub fn set_mode(&mut self, mode: ProfilingMode) {
        if mode != self.mode {
            tracing::debug!(from = %self.mode, to = %mode, "profiling mode changed");
            self.mode = mode;
            self.sampler.reset();
        }
    }

    /// Gate for hot spans in `timeline_sample` mode
    ///
    /// `timeline` always samples, `off` and `light` never do. In
    /// `timeline_sample` every `sampling_n`-th call returns true, starting
    /// with the first.
    pub fn should_sample(&mut self) -> bool {
        match self.mode {
            ProfilingMode::Off | ProfilingMode::Light => false,
            ProfilingMode::Timeline => true,
            ProfilingMode::TimelineSample => self.sampler.admit(),
        }
    }

    /// Open a span; `None` unless timeline capture is active
    pub fn begin_span(
        &mut self,
        tick: u64,
        category: &str,
        name: &str,
        metadata: Option<Metadata>,
    ) -> Option<SpanToken> {
        if !self.mode.captures_timeline() {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        if self.open.len() >= self.open_capacity {
            if let Some((evicted, _)) = self.open.pop_first() {
                tracing::trace!(span = evicted, "oldest open span evicted");
            }
        }
        self.open.insert(
            id,
            OpenSpan {
                tick,
                category: category.to_string(),
                name: name.to_string(),
                start_s: self.clock.now_s(),
                metadata: metadata.unwrap_or_default(),
            },
        );
        Some(SpanToken { id })
    }

    /// Close a span; `None`, a foreign token, or an evicted span is a no-op
    pub fn end_span(&mut self, token: Option<SpanToken>) -> Option<ProfilingSpan> {
        let open = self.open.remove(&token?.id)?;
        let end_s = self.clock.now_s();
        Some(self.finish(open, end_s))
    }

    /// Close a span and emit `perf/span` into `hub`
    pub fn end_span_to(&mut self, token: Option<SpanToken>, hub: &mut Hub) -> Option<ProfilingSpan> {
        let span = self.end_span(token)?;
        let mut meta = Metadata::new();
        meta.insert("category".into(), Value::from(span.category.as_str()));
        meta.insert("name".into(), Value::from(span.name.as_str()));
        meta.insert("start_s".into(), Value::from(span.start_s));
        meta.insert("end_s".into(), Value::from(span.end_s));
        for (k, v) in &span.metadata {
            meta.entry(k.clone()).or_insert_with(|| v.clone());
        }
        hub.emit_with(span.tick, "perf", "span", span.duration_ms, Level::Debug, meta);
        Some(span)
    }

    /// Record a span timed elsewhere; `end_s` is clamped to `start_s`
    ///
    /// Ignored unless timeline capture is active.
    pub fn record_span(
        &mut self,
        tick: u64,
        category: &str,
        name: &str,
        start_s: f64,
        end_s: f64,
        metadata: Option<Metadata>,
    ) -> Option<ProfilingSpan> {
        if !self.mode.captures_timeline() {
            return None;
        }
        let open = OpenSpan {
            tick,
            category: category.to_string(),
            name: name.to_string(),
            start_s,
            metadata: metadata.unwrap_or_default(),
        };
        Some(self.finish(open, end_s))
    }

    /// Time `f` as one span
    pub fn measure<R>(&mut self, tick: u64, category: &str, name: &str, f: impl FnOnce() -> R) -> R {
        let token = self.begin_span(tick, category, name, None);
        let out = f();
        let _ = self.end_span(token);
        out
    }

    fn finish(&mut self, open: OpenSpan, end_s: f64) -> ProfilingSpan {
        let end_s = end_s.max(open.start_s);
        let span = ProfilingSpan {
            tick: open.tick,
            category: open.category,
            name: open.name,
            start_s: open.start_s,
            end_s,
            duration_ms: (end_s - open.start_s) * 1000.0,
            metadata: open.metadata,
        };
        self.spans.append(span.clone());
        span
    }

    /// Spans currently open
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Closed spans retained
    #[must_use]
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Most recent `limit` spans plus the top keys over that window
    #[must_use]
    pub fn snapshot(&self, limit: Option<usize>) -> ProfilingSnapshot {
        let spans = self.spans.snapshot(limit);

        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for span in &spans {
            *totals.entry(span.key()).or_insert(0.0) += span.duration_ms;
        }
        // BTreeMap yields keys ascending; the stable sort keeps that order for ties.
        let mut top: Vec<(String, f64)> = totals.into_iter().collect();
        top.sort_by(|a, b| b.1.total_cmp(&a.1));
        top.truncate(TOP_SPANS);

        ProfilingSnapshot {
            schema_version: schema::PROFILING.to_string(),
            mode: self.mode,
            span_count: spans.len(),
            top_spans_ms: top,
            spans,
        }
    }

    /// Write a snapshot to `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn export_to(&self, path: &Path, limit: Option<usize>) -> CoreResult<PathBuf> {
        let snapshot = self.snapshot(limit);
        artifact::write_json(path, &snapshot)?;
        tracing::info!(path = %path.display(), spans = snapshot.span_count, "profiling export written");
        Ok(path.to_path_buf())
    }

    /// Write a timestamp-named snapshot under the configured directory
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn export(&self, limit: Option<usize>) -> CoreResult<PathBuf> {
        let stamp = time::file_stamp(&time::now_utc());
        let path = self.export_dir.join(format!("profiling_{stamp}.json"));
        self.export_to(&path, limit)
    }

    /// Drop closed and open spans
    pub fn clear(&mut self) {
        self.spans.clear();
        self.open.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiler(mode: ProfilingMode) -> Profiler {
        Profiler::new(&ProfilingConfig {
            mode,
            ..ProfilingConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_off_and_light_return_no_token() {
        for mode in [ProfilingMode::Off, ProfilingMode::Light] {
            let mut p = profiler(mode);
            assert!(p.begin_span(0, "sim", "step", None).is_none());
            assert!(p.end_span(None).is_none());
            assert_eq!(p.span_count(), 0);
        }
        assert!(!profiler(ProfilingMode::Off).enabled());
        assert!(profiler(ProfilingMode::Light).enabled());
    }

    #[test]
    fn test_begin_end_records_span() {
        let mut p = profiler(ProfilingMode::Timeline);
        let token = p.begin_span(7, "sim", "step", Some(Metadata::from([("n".to_string(), Value::Int(1))])));
        assert_eq!(p.open_count(), 1);
        let span = p.end_span(token).unwrap();
        assert_eq!(span.tick, 7);
        assert!(span.end_s >= span.start_s);
        assert!(span.duration_ms >= 0.0);
        assert_eq!(span.metadata["n"], Value::Int(1));
        assert_eq!(p.open_count(), 0);
        assert_eq!(p.span_count(), 1);
    }

    #[test]
    fn test_foreign_token_is_noop() {
        let mut a = profiler(ProfilingMode::Timeline);
        let mut b = profiler(ProfilingMode::Timeline);
        let _ = b.begin_span(0, "x", "y", None);
        let _ = b.begin_span(0, "x", "y", None);
        let token = b.begin_span(0, "x", "y", None);
        assert!(a.end_span(token).is_none());
        assert_eq!(a.span_count(), 0);
    }

    #[test]
    fn test_dropped_tokens_stay_bounded() {
        let mut p = Profiler::new(&ProfilingConfig {
            mode: ProfilingMode::Timeline,
            span_capacity: 4,
            ..ProfilingConfig::default()
        })
        .unwrap();
        let oldest = p.begin_span(0, "sim", "step", None);
        for tick in 1..10_000 {
            let _ = p.begin_span(tick, "sim", "step", None);
        }
        assert_eq!(p.open_count(), 4);

        // Evicted spans close as a no-op; recent ones still close.
        assert!(p.end_span(oldest).is_none());
        let recent = p.begin_span(10_000, "sim", "step", None);
        assert_eq!(p.open_count(), 4);
        assert_eq!(p.end_span(recent).unwrap().tick, 10_000);
        assert_eq!(p.open_count(), 3);
        assert_eq!(p.span_count(), 1);
    }

    #[test]
    fn test_should_sample_modes() {
        assert!(!profiler(ProfilingMode::Off).should_sample());
        assert!(!profiler(ProfilingMode::Light).should_sample());
        assert!(profiler(ProfilingMode::Timeline).should_sample());

        let mut p = Profiler::new(&ProfilingConfig {
            mode: ProfilingMode::TimelineSample,
            sampling_n: 3,
            ..ProfilingConfig::default()
        })
        .unwrap();
        let pattern: Vec<bool> = (0..6).map(|_| p.should_sample()).collect();
        assert_eq!(pattern, vec![true, false, false, true, false, false]);
    }

    #[test]
    fn test_record_span_clamps_end() {
        let mut p = profiler(ProfilingMode::Timeline);
        let span = p.record_span(1, "io", "read", 2.0, 1.5, None).unwrap();
        assert_eq!(span.end_s, 2.0);
        assert_eq!(span.duration_ms, 0.0);
    }

    #[test]
    fn test_top_spans_summed_and_ordered() {
        let mut p = profiler(ProfilingMode::Timeline);
        p.record_span(0, "sim", "step", 0.0, 0.004, None);
        p.record_span(1, "sim", "step", 1.0, 1.004, None);
        p.record_span(2, "render", "draw", 0.0, 0.010, None);
        p.record_span(3, "io", "a", 0.0, 0.001, None);
        p.record_span(4, "io", "b", 0.0, 0.001, None);

        let snap = p.snapshot(None);
        assert_eq!(snap.span_count, 5);
        let keys: Vec<&str> = snap.top_spans_ms.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["render:draw", "sim:step", "io:a", "io:b"]);
        assert!((snap.top_spans_ms[1].1 - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_top_spans_limited_to_window_and_ten() {
        let mut p = profiler(ProfilingMode::Timeline);
        for i in 0..12_u32 {
            p.record_span(0, "k", &format!("n{i:02}"), 0.0, f64::from(i + 1) / 1000.0, None);
        }
        let snap = p.snapshot(None);
        assert_eq!(snap.top_spans_ms.len(), TOP_SPANS);
        assert_eq!(snap.top_spans_ms[0].0, "k:n11");

        let tail = p.snapshot(Some(2));
        assert_eq!(tail.span_count, 2);
        assert_eq!(tail.top_spans_ms.len(), 2);
    }

    #[test]
    fn test_span_capacity_bounds_retention() {
        let mut p = Profiler::new(&ProfilingConfig {
            mode: ProfilingMode::Timeline,
            span_capacity: 3,
            ..ProfilingConfig::default()
        })
        .unwrap();
        for tick in 0..5 {
            p.record_span(tick, "a", "b", 0.0, 0.0, None);
        }
        let ticks: Vec<u64> = p.snapshot(None).spans.iter().map(|s| s.tick).collect();
        assert_eq!(ticks, vec![2, 3, 4]);
    }

    #[test]
    fn test_end_span_to_emits_perf_span() {
        let mut p = profiler(ProfilingMode::Timeline);
        let mut hub = Hub::with_capacity(8).unwrap();
        let token = p.begin_span(3, "sim", "step", None);
        let span = p.end_span_to(token, &mut hub).unwrap();

        let events = hub.snapshot(None, Some("perf"), Some("span"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tick, 3);
        assert_eq!(events[0].value.as_f64(), Some(span.duration_ms));
        assert_eq!(events[0].metadata["category"], Value::from("sim"));
        assert_eq!(events[0].metadata["name"], Value::from("step"));

        // Disabled profiler emits nothing.
        let mut off = profiler(ProfilingMode::Off);
        let token = off.begin_span(4, "sim", "step", None);
        assert!(off.end_span_to(token, &mut hub).is_none());
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn test_measure_returns_result() {
        let mut p = profiler(ProfilingMode::Timeline);
        assert_eq!(p.measure(0, "calc", "sum", || 2 + 2), 4);
        assert_eq!(p.span_count(), 1);
    }

    #[test]
    fn test_export_writes_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = Profiler::new(&ProfilingConfig {
            mode: ProfilingMode::Timeline,
            export_dir: dir.path().join("prof"),
            ..ProfilingConfig::default()
        })
        .unwrap();
        p.record_span(1, "sim", "step", 0.0, 0.002, None);

        let path = p.export(None).unwrap();
        assert!(path.starts_with(dir.path().join("prof")));
        let doc: ProfilingSnapshot = artifact::read_json(&path).unwrap();
        assert_eq!(doc.schema_version, "diag.profiling.v1");
        assert_eq!(doc.mode, ProfilingMode::Timeline);
        assert_eq!(doc.spans.len(), 1);

        let raw: serde_json::Value = artifact::read_json(&path).unwrap();
        assert_eq!(raw["top_spans_ms"][0][0], "sim:step");
        assert_eq!(raw["mode"], "timeline");
    }

    #[test]
    fn test_clear() {
        let mut p = profiler(ProfilingMode::Timeline);
        let _open = p.begin_span(0, "a", "b", None);
        p.record_span(0, "a", "b", 0.0, 0.0, None);
        p.clear();
        assert_eq!(p.span_count(), 0);
        assert_eq!(p.open_count(), 0);
    }
}
