//! Diagnostics event record.
//!
//! Events are built once and never mutated. The hub hands them out as
//! [`SharedEvent`] so subscribers and exporters share one allocation.

use crate::time::{now_utc, utc_millis};
use crate::value::{Metadata, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Reference-counted event handle
pub type SharedEvent = Arc<Event>;

/// Severity of an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Verbose detail
    Debug,
    /// Normal telemetry
    #[default]
    Info,
    /// Something degraded
    Warning,
    /// Something failed
    Error,
}

impl Level {
    /// Lowercase label as written to disk
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One diagnostics datum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Capture time, millisecond precision
    #[serde(with = "utc_millis")]
    pub ts_utc: DateTime<Utc>,
    /// Simulation tick the event belongs to
    pub tick: u64,
    /// Coarse grouping, e.g. `frame`
    pub category: String,
    /// Event name within the category, e.g. `time_ms`
    pub name: String,
    /// Severity
    #[serde(default)]
    pub level: Level,
    /// Primary payload
    #[serde(default)]
    pub value: Value,
    /// Additional key/value context
    #[serde(default)]
    pub metadata: Metadata,
}

impl Event {
    /// Create an event stamped with the current time
    pub fn new(tick: u64, category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ts_utc: now_utc(),
            tick,
            category: category.into(),
            name: name.into(),
            level: Level::Info,
            value: Value::Null,
            metadata: Metadata::new(),
        }
    }

    /// Set the payload
    #[must_use]
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = value.into();
        self
    }

    /// Set the severity
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Replace the metadata map
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add one metadata entry
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Override the timestamp (used when re-reading exported events)
    #[must_use]
    pub fn with_timestamp(mut self, ts_utc: DateTime<Utc>) -> Self {
        self.ts_utc = ts_utc;
        self
    }

    /// `category.name` key used for aggregation
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}.{}", self.category, self.name)
    }

    /// Check category and name together
    #[must_use]
    pub fn is(&self, category: &str, name: &str) -> bool {
        self.category == category && self.name == name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = Event::new(7, "frame", "time_ms").with_value(16.0);
        assert_eq!(event.tick, 7);
        assert_eq!(event.key(), "frame.time_ms");
        assert!(event.is("frame", "time_ms"));
        assert_eq!(event.level, Level::Info);
        assert_eq!(event.value.as_f64(), Some(16.0));
    }

    #[test]
    fn test_event_json_fields() {
        let event = Event::new(1, "render", "resize_event")
            .with_level(Level::Warning)
            .with_meta("w", 800)
            .with_meta("h", 600);
        let json = serde_json::to_value(&event).unwrap();
        let obj = json.as_object().unwrap();
        for field in ["ts_utc", "tick", "category", "name", "level", "value", "metadata"] {
            assert!(obj.contains_key(field), "missing {field}");
        }
        assert_eq!(obj["level"], "warning");
        assert!(obj["ts_utc"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_event_decode_defaults() {
        let raw = r#"{"ts_utc":"2026-01-01T00:00:00.000Z","tick":3,"category":"a","name":"b"}"#;
        let event: Event = serde_json::from_str(raw).unwrap();
        assert_eq!(event.tick, 3);
        assert!(event.value.is_null());
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn test_level_display() {
        assert_eq!(Level::Error.to_string(), "error");
        assert!(Level::Debug < Level::Error);
    }
}
