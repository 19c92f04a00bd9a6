//! Time helpers for TELLTALE.
//!
//! Wall clock time is metadata only (event stamps, artifact names). Span
//! timing uses a monotonic clock anchored at construction.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use std::time::Instant;

/// Current UTC time truncated to millisecond precision
#[must_use]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// RFC 3339 with milliseconds and a `Z` suffix
#[must_use]
pub fn format_utc(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Filesystem-safe stamp used for artifact names, e.g. `20260101T120000_250Z`
#[must_use]
pub fn file_stamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%S_%3fZ").to_string()
}

/// Serde adapter that writes timestamps as RFC 3339 millisecond strings
pub mod utc_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a timestamp
    ///
    /// # Errors
    ///
    /// Propagates serializer errors
    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_utc(ts))
    }

    /// Deserialize a timestamp from any RFC 3339 string
    ///
    /// # Errors
    ///
    /// Returns error if the string is not RFC 3339
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Monotonic seconds since the clock was created
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Start a new clock at zero
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Seconds elapsed since construction
    #[must_use]
    pub fn now_s(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
