//! Rolling frame, render, and resize statistics.
//!
//! The store recognises a fixed set of `category/name` pairs and ignores
//! everything else. Timing series live in bounded rings and are aggregated
//! only when [`MetricsStore::snapshot`] is called. Counters are cumulative
//! since construction.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use telltale_core::{schema, CoreResult, Event, MetricsConfig, RingBuffer, Value};

/// Linear-interpolation percentile of `values`
///
/// Sorts a copy, takes `index = q * (n - 1)`, and blends the floor and ceil
/// neighbours. Empty input yields `0.0`; `q` is clamped to `[0, 1]`.
#[must_use]
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let q = q.clamp(0.0, 1.0);
    let index = q * (sorted.len() - 1) as f64;
    let lo = index.floor() as usize;
    let hi = index.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = index - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn mean(values: &RingBuffer<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// `diag.metrics.v1` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Schema tag
    pub schema_version: String,
    /// Mean frame time over the window
    pub rolling_frame_ms: f64,
    /// `1000 / rolling_frame_ms`, or zero without samples
    pub rolling_fps: f64,
    /// Mean render time over the window
    pub rolling_render_ms: f64,
    /// Largest frame time since start
    pub max_frame_ms: f64,
    /// Samples currently in the frame window
    pub frame_samples: usize,
    /// Samples currently in the render window
    pub render_samples: usize,
    /// `render/resize_event` occurrences
    pub resize_event_count: u64,
    /// `window/resize_burst` occurrences
    pub resize_burst_count: u64,
    /// Sum of `coalesced` across bursts
    pub resize_coalesced_total: u64,
    /// 95th percentile of resize apply latency
    pub p95_resize_apply_ms: f64,
    /// 95th percentile of resize present latency
    pub p95_resize_present_ms: f64,
    /// Sum of `skipped` across profile frames
    pub skipped_frames_total: u64,
    /// Highest `present_failures` reported
    pub present_failures: u64,
    /// Highest `backoff_level` reported
    pub backoff_level: u64,
    /// Highest `backend_switches` reported
    pub backend_switches: u64,
}

/// Rolling aggregator fed one event at a time
#[derive(Debug, Clone)]
pub struct MetricsStore {
    frame_ms: RingBuffer<f64>,
    render_ms: RingBuffer<f64>,
    resize_apply_ms: RingBuffer<f64>,
    resize_present_ms: RingBuffer<f64>,
    max_frame_ms: f64,
    resize_event_count: u64,
    resize_burst_count: u64,
    resize_coalesced_total: u64,
    skipped_frames_total: u64,
    present_failures: u64,
    backoff_level: u64,
    backend_switches: u64,
}

impl MetricsStore {
    /// Create a store whose windows hold `config.window` samples
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the window is zero
    pub fn new(config: &MetricsConfig) -> CoreResult<Self> {
        Ok(Self {
            frame_ms: RingBuffer::new(config.window)?,
            render_ms: RingBuffer::new(config.window)?,
            resize_apply_ms: RingBuffer::new(config.window)?,
            resize_present_ms: RingBuffer::new(config.window)?,
            max_frame_ms: 0.0,
            resize_event_count: 0,
            resize_burst_count: 0,
            resize_coalesced_total: 0,
            skipped_frames_total: 0,
            present_failures: 0,
            backoff_level: 0,
            backend_switches: 0,
        })
    }

    /// Wrap in `Rc<RefCell<_>>` so a hub subscriber and the loop can share it
    ///
    /// ```ignore
    /// let metrics = MetricsStore::new(&config.metrics)?.shared();
    /// let sink = Rc::clone(&metrics);
    /// hub.subscribe(move |e| sink.borrow_mut().ingest(e));
    /// ```
    #[must_use]
    pub fn shared(self) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(self))
    }

    /// Fold one event into the windows and counters
    pub fn ingest(&mut self, event: &Event) {
        match (event.category.as_str(), event.name.as_str()) {
            ("frame", "time_ms") => {
                if let Some(ms) = event.value.as_f64() {
                    self.frame_ms.append(ms);
                    self.max_frame_ms = self.max_frame_ms.max(ms);
                }
            }
            ("render", "frame_ms") => {
                if let Some(ms) = event.value.as_f64() {
                    self.render_ms.append(ms);
                }
            }
            ("render", "resize_event") => {
                self.resize_event_count += 1;
                if let Some(ms) = field_f64(event, "apply_ms") {
                    self.resize_apply_ms.append(ms);
                }
                if let Some(ms) = field_f64(event, "present_ms") {
                    self.resize_present_ms.append(ms);
                }
            }
            ("window", "resize_burst") => {
                self.resize_burst_count += 1;
                self.resize_coalesced_total += field_u64(event, "coalesced").unwrap_or(0);
            }
            ("render", "profile_frame") => {
                self.skipped_frames_total += field_u64(event, "skipped").unwrap_or(0);
                if let Some(n) = field_u64(event, "present_failures") {
                    self.present_failures = self.present_failures.max(n);
                }
                if let Some(n) = field_u64(event, "backoff_level") {
                    self.backoff_level = self.backoff_level.max(n);
                }
                if let Some(n) = field_u64(event, "backend_switches") {
                    self.backend_switches = self.backend_switches.max(n);
                }
            }
            _ => {}
        }
    }

    /// Derive the current statistics
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let rolling_frame_ms = mean(&self.frame_ms);
        let rolling_fps = if rolling_frame_ms > 0.0 {
            1000.0 / rolling_frame_ms
        } else {
            0.0
        };
        let apply: Vec<f64> = self.resize_apply_ms.iter().copied().collect();
        let present: Vec<f64> = self.resize_present_ms.iter().copied().collect();

        MetricsSnapshot {
            schema_version: schema::METRICS.to_string(),
            rolling_frame_ms,
            rolling_fps,
            rolling_render_ms: mean(&self.render_ms),
            max_frame_ms: self.max_frame_ms,
            frame_samples: self.frame_ms.len(),
            render_samples: self.render_ms.len(),
            resize_event_count: self.resize_event_count,
            resize_burst_count: self.resize_burst_count,
            resize_coalesced_total: self.resize_coalesced_total,
            p95_resize_apply_ms: percentile(&apply, 0.95),
            p95_resize_present_ms: percentile(&present, 0.95),
            skipped_frames_total: self.skipped_frames_total,
            present_failures: self.present_failures,
            backoff_level: self.backoff_level,
            backend_switches: self.backend_switches,
        }
    }
}

// Composite payloads carry their fields in the value map; metadata is the fallback.
fn field<'a>(event: &'a Event, key: &str) -> Option<&'a Value> {
    event.value.get(key).or_else(|| event.metadata.get(key))
}

fn field_f64(event: &Event, key: &str) -> Option<f64> {
    field(event, key).and_then(Value::as_f64)
}

fn field_u64(event: &Event, key: &str) -> Option<u64> {
    let value = field(event, key)?;
    match value.as_i64() {
        Some(i) => u64::try_from(i).ok(),
        None => value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(window: usize) -> MetricsStore {
        MetricsStore::new(&MetricsConfig { window }).unwrap()
    }

    fn frame(ms: f64) -> Event {
        Event::new(0, "frame", "time_ms").with_value(ms)
    }

    #[test]
    fn test_single_frame() {
        let mut m = store(8);
        m.ingest(&frame(16.0));
        let s = m.snapshot();
        assert_eq!(s.rolling_frame_ms, 16.0);
        assert_eq!(s.rolling_fps, 1000.0 / 16.0);
        assert_eq!(s.max_frame_ms, 16.0);
        assert_eq!(s.schema_version, "diag.metrics.v1");
    }

    #[test]
    fn test_empty_snapshot_is_zero() {
        let s = store(4).snapshot();
        assert_eq!(s.rolling_frame_ms, 0.0);
        assert_eq!(s.rolling_fps, 0.0);
        assert_eq!(s.p95_resize_apply_ms, 0.0);
    }

    #[test]
    fn test_window_rolls_but_max_persists() {
        let mut m = store(2);
        for ms in [40.0, 10.0, 20.0] {
            m.ingest(&frame(ms));
        }
        let s = m.snapshot();
        assert_eq!(s.rolling_frame_ms, 15.0);
        assert_eq!(s.max_frame_ms, 40.0);
        assert_eq!(s.frame_samples, 2);
    }

    #[test]
    fn test_integer_frame_value_widens() {
        let mut m = store(4);
        m.ingest(&Event::new(0, "frame", "time_ms").with_value(20_i64));
        assert_eq!(m.snapshot().rolling_frame_ms, 20.0);
    }

    #[test]
    fn test_render_window() {
        let mut m = store(4);
        m.ingest(&Event::new(0, "render", "frame_ms").with_value(4.0));
        m.ingest(&Event::new(1, "render", "frame_ms").with_value(6.0));
        let s = m.snapshot();
        assert_eq!(s.rolling_render_ms, 5.0);
        assert_eq!(s.render_samples, 2);
    }

    #[test]
    fn test_percentile_interpolates() {
        assert_eq!(percentile(&[], 0.95), 0.0);
        assert_eq!(percentile(&[7.0], 0.95), 7.0);
        // index = 0.95 * 3 = 2.85 -> 3 + (4 - 3) * 0.85
        let p = percentile(&[4.0, 1.0, 3.0, 2.0], 0.95);
        assert!((p - 3.85).abs() < 1e-12);
        assert_eq!(percentile(&[1.0, 2.0, 3.0], 0.5), 2.0);
    }

    #[test]
    fn test_resize_events() {
        let mut m = store(16);
        for i in 1..=5_u32 {
            let value = Value::map([
                ("apply_ms", Value::from(f64::from(i))),
                ("present_ms", Value::from(10.0)),
            ]);
            m.ingest(&Event::new(u64::from(i), "render", "resize_event").with_value(value));
        }
        let s = m.snapshot();
        assert_eq!(s.resize_event_count, 5);
        // index = 0.95 * 4 = 3.8 -> 4 + 0.8
        assert!((s.p95_resize_apply_ms - 4.8).abs() < 1e-12);
        assert_eq!(s.p95_resize_present_ms, 10.0);
    }

    #[test]
    fn test_burst_counters_sum() {
        let mut m = store(4);
        m.ingest(&Event::new(0, "window", "resize_burst").with_value(Value::map([("coalesced", 3)])));
        m.ingest(&Event::new(1, "window", "resize_burst").with_meta("coalesced", 2));
        m.ingest(&Event::new(2, "window", "resize_burst"));
        let s = m.snapshot();
        assert_eq!(s.resize_burst_count, 3);
        assert_eq!(s.resize_coalesced_total, 5);
    }

    #[test]
    fn test_profile_frame_sums_and_maxima() {
        let mut m = store(4);
        let frames = [(2, 1, 0, 0), (3, 4, 2, 1), (0, 2, 1, 1)];
        for (skipped, failures, backoff, switches) in frames {
            let value = Value::map([
                ("skipped", skipped),
                ("present_failures", failures),
                ("backoff_level", backoff),
                ("backend_switches", switches),
            ]);
            m.ingest(&Event::new(0, "render", "profile_frame").with_value(value));
        }
        let s = m.snapshot();
        assert_eq!(s.skipped_frames_total, 5);
        assert_eq!(s.present_failures, 4);
        assert_eq!(s.backoff_level, 2);
        assert_eq!(s.backend_switches, 1);
    }

    #[test]
    fn test_unknown_events_ignored() {
        let mut m = store(4);
        m.ingest(&Event::new(0, "frame", "other").with_value(99.0));
        m.ingest(&Event::new(0, "frame", "time_ms").with_value("fast"));
        let s = m.snapshot();
        assert_eq!(s.frame_samples, 0);
        assert_eq!(s.max_frame_ms, 0.0);
    }

    #[test]
    fn test_shared_via_hub_subscription() {
        use crate::Hub;

        let metrics = store(8).shared();
        let sink = Rc::clone(&metrics);
        let mut hub = Hub::with_capacity(8).unwrap();
        hub.subscribe(move |e| sink.borrow_mut().ingest(e));
        hub.emit(1, "frame", "time_ms", 10.0);
        hub.emit(2, "frame", "time_ms", 30.0);
        assert_eq!(metrics.borrow().snapshot().rolling_frame_ms, 20.0);
    }
}
