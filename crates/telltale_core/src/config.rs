//! Construction-time configuration for every diagnostics component.
//!
//! These structs are plain data. Reading them from files or the environment
//! is the host application's job; [`DiagnosticsConfig::from_json_str`] is
//! offered for loaders that already hold JSON.

use crate::error::{CoreError, CoreResult};
use crate::value::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Top-level diagnostics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Event bus settings
    pub hub: HubConfig,
    /// Rolling metrics settings
    pub metrics: MetricsConfig,
    /// Span profiler settings
    pub profiling: ProfilingConfig,
    /// Replay capture settings
    pub replay: ReplayCaptureConfig,
    /// Background JSONL exporter settings
    pub export: ExportConfig,
    /// Crash bundle settings
    pub crash: CrashConfig,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            metrics: MetricsConfig::default(),
            profiling: ProfilingConfig::default(),
            replay: ReplayCaptureConfig::default(),
            export: ExportConfig::default(),
            crash: CrashConfig::default(),
        }
    }
}

impl DiagnosticsConfig {
    /// Parse from JSON; missing fields take defaults
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or fails validation
    pub fn from_json_str(raw: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can be built from
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the first offending field
    pub fn validate(&self) -> CoreResult<()> {
        fn nonzero(field: &str, value: u64) -> CoreResult<()> {
            if value == 0 {
                return Err(CoreError::Config {
                    reason: format!("{field} must be > 0"),
                });
            }
            Ok(())
        }

        nonzero("hub.capacity", self.hub.capacity as u64)?;
        nonzero("hub.default_sample_every", u64::from(self.hub.default_sample_every))?;
        for (category, every) in &self.hub.category_sample_every {
            nonzero(&format!("hub.category_sample_every.{category}"), u64::from(*every))?;
        }
        nonzero("metrics.window", self.metrics.window as u64)?;
        nonzero("profiling.sampling_n", u64::from(self.profiling.sampling_n))?;
        nonzero("profiling.span_capacity", self.profiling.span_capacity as u64)?;
        nonzero("replay.hash_interval", self.replay.hash_interval)?;
        nonzero("export.queue_capacity", self.export.queue_capacity as u64)?;
        nonzero("export.poll_interval_ms", self.export.poll_interval_ms)?;
        Ok(())
    }
}

/// Event bus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Whether `emit*` records anything
    pub enabled: bool,
    /// Ring buffer capacity
    pub capacity: usize,
    /// Sampling rate for categories without an explicit rate
    pub default_sample_every: u32,
    /// Per-category sampling rates
    pub category_sample_every: BTreeMap<String, u32>,
    /// When non-empty, only these categories are admitted
    pub category_allowlist: Vec<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 4096,
            default_sample_every: 1,
            category_sample_every: BTreeMap::new(),
            category_allowlist: Vec::new(),
        }
    }
}

/// Rolling metrics configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Samples kept per rolling window
    pub window: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { window: 240 }
    }
}

/// Profiler capture mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfilingMode {
    /// No spans at all
    #[default]
    Off,
    /// Enabled, but no timeline capture
    Light,
    /// Every span is captured
    Timeline,
    /// Spans captured; callers gate hot spans with `should_sample`
    TimelineSample,
}

impl ProfilingMode {
    /// Label as written to disk
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Light => "light",
            Self::Timeline => "timeline",
            Self::TimelineSample => "timeline_sample",
        }
    }

    /// Anything but `Off`
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Span capture is active
    #[must_use]
    pub const fn captures_timeline(&self) -> bool {
        matches!(self, Self::Timeline | Self::TimelineSample)
    }
}

impl fmt::Display for ProfilingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfilingMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "" => Ok(Self::Off),
            "light" => Ok(Self::Light),
            "timeline" => Ok(Self::Timeline),
            "timeline_sample" => Ok(Self::TimelineSample),
            other => Err(CoreError::invalid_argument(
                "profiling.mode",
                format!("unknown mode {other:?}"),
            )),
        }
    }
}

/// Span profiler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilingConfig {
    /// Capture mode
    pub mode: ProfilingMode,
    /// `should_sample` admits every Nth call
    pub sampling_n: u32,
    /// Closed spans retained
    pub span_capacity: usize,
    /// Directory for timestamp-named exports
    pub export_dir: PathBuf,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            mode: ProfilingMode::Off,
            sampling_n: 1,
            span_capacity: 2048,
            export_dir: PathBuf::from("diagnostics/profiling"),
        }
    }
}

/// Replay capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayCaptureConfig {
    /// Whether the recorder keeps anything
    pub enabled: bool,
    /// Checkpoint every this many ticks
    pub hash_interval: u64,
    /// Simulation seed recorded in the manifest
    pub seed: Option<u64>,
    /// Build metadata recorded in the manifest
    pub build: Metadata,
    /// Directory for session exports
    pub export_dir: PathBuf,
    /// Commands included in crash bundles
    pub recent_commands_limit: usize,
}

impl Default for ReplayCaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hash_interval: 60,
            seed: None,
            build: Metadata::new(),
            export_dir: PathBuf::from("diagnostics/replay"),
            recent_commands_limit: 256,
        }
    }
}

/// JSONL exporter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Output file, created lazily
    pub path: PathBuf,
    /// Bounded queue size; overflow is dropped
    pub queue_capacity: usize,
    /// Worker poll timeout
    pub poll_interval_ms: u64,
    /// Default wait when closing
    pub close_timeout_ms: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("diagnostics/events.jsonl"),
            queue_capacity: 8192,
            poll_interval_ms: 50,
            close_timeout_ms: 2000,
        }
    }
}

/// Crash bundle configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashConfig {
    /// Whether captures write anything
    pub enabled: bool,
    /// Directory for timestamp-named bundles
    pub output_dir: PathBuf,
    /// Hub events included per bundle
    pub recent_events_limit: usize,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: PathBuf::from("diagnostics/crash"),
            recent_events_limit: 200,
        }
    }
}
