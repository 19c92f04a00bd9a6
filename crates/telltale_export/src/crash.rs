//! Crash bundle capture.
//!
//! A bundle is a single JSON document holding whatever the host could
//! gather at failure time: structured error info or a reason string, the
//! most recent hub events, and optional profiler and replay snapshots.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use telltale_core::{artifact, schema, time, CoreResult, CrashConfig, Event, Metadata};
use telltale_hub::{Hub, ProfilingSnapshot};
use telltale_replay::ReplaySession;

/// Structured failure description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Error type name
    #[serde(rename = "type")]
    pub error_type: String,
    /// Top-level message
    pub message: String,
    /// Source chain followed by the capture-site backtrace, one frame per line
    pub traceback: Vec<String>,
}

impl ExceptionInfo {
    /// Describe an error and its source chain
    ///
    /// `error_type` is the static type name, so a boxed error reports the
    /// trait object. Use [`CrashContext::error_type`] to label those.
    pub fn from_error<E: StdError + ?Sized>(error: &E) -> Self {
        let mut traceback = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            traceback.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        traceback.extend(capture_backtrace());
        Self {
            error_type: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            traceback,
        }
    }

    /// Describe a `catch_unwind` payload
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self {
            error_type: "panic".to_string(),
            message,
            traceback: capture_backtrace(),
        }
    }
}

fn capture_backtrace() -> Vec<String> {
    let backtrace = Backtrace::force_capture();
    if backtrace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }
    backtrace
        .to_string()
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// `engine.crash_bundle.v1` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashBundle {
    /// Schema tag
    pub schema_version: String,
    /// RFC 3339 UTC capture time
    pub captured_at_utc: String,
    /// Loop tick at capture
    pub tick: u64,
    /// Structured failure, `null` for on-demand snapshots
    pub exception: Option<ExceptionInfo>,
    /// Why an on-demand snapshot was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Host-supplied runtime facts
    #[serde(default)]
    pub runtime: Metadata,
    /// Most recent hub events, oldest first
    #[serde(default)]
    pub recent_events: Vec<Event>,
    /// Profiler snapshot, if supplied
    pub profiling: Option<ProfilingSnapshot>,
    /// Replay snapshot, if supplied
    pub replay: Option<ReplaySession>,
}

/// Optional inputs to a capture
#[derive(Debug, Default)]
pub struct CrashContext<'a> {
    /// Source of `recent_events`
    pub hub: Option<&'a Hub>,
    /// Copied into `runtime`
    pub runtime: Metadata,
    /// Copied into `profiling`
    pub profiling: Option<ProfilingSnapshot>,
    /// Copied into `replay`
    pub replay: Option<ReplaySession>,
    /// Overrides the timestamp-named default location
    pub output_path: Option<PathBuf>,
    /// Replaces the recorded exception type, e.g. for boxed errors
    pub error_type: Option<String>,
}

impl<'a> CrashContext<'a> {
    /// Context reading recent events from `hub`
    #[must_use]
    pub fn with_hub(hub: &'a Hub) -> Self {
        Self {
            hub: Some(hub),
            ..Self::default()
        }
    }
}

/// Writes crash bundles under a directory
#[derive(Debug, Clone)]
pub struct CrashBundleWriter {
    enabled: bool,
    output_dir: PathBuf,
    recent_events_limit: usize,
}

impl CrashBundleWriter {
    /// Build a writer from its configuration
    #[must_use]
    pub fn new(config: &CrashConfig) -> Self {
        Self {
            enabled: config.enabled,
            output_dir: config.output_dir.clone(),
            recent_events_limit: config.recent_events_limit,
        }
    }

    /// Whether captures write anything
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Bundle an error; `Ok(None)` when disabled
    ///
    /// # Errors
    ///
    /// Returns error if the bundle cannot be written
    pub fn capture_exception<E: StdError + ?Sized>(
        &self,
        error: &E,
        tick: u64,
        context: CrashContext<'_>,
    ) -> CoreResult<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }
        self.write(tick, Some(ExceptionInfo::from_error(error)), None, context)
    }

    /// Bundle a panic payload from `catch_unwind`; `Ok(None)` when disabled
    ///
    /// # Errors
    ///
    /// Returns error if the bundle cannot be written
    pub fn capture_panic(
        &self,
        payload: &(dyn Any + Send),
        tick: u64,
        context: CrashContext<'_>,
    ) -> CoreResult<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }
        self.write(tick, Some(ExceptionInfo::from_panic(payload)), None, context)
    }

    /// Bundle current state on demand; `Ok(None)` when disabled
    ///
    /// # Errors
    ///
    /// Returns error if the bundle cannot be written
    pub fn capture_snapshot(
        &self,
        tick: u64,
        reason: &str,
        context: CrashContext<'_>,
    ) -> CoreResult<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }
        self.write(tick, None, Some(reason.to_string()), context)
    }

    /// Assemble a bundle without writing it
    #[must_use]
    pub fn build(
        &self,
        tick: u64,
        exception: Option<ExceptionInfo>,
        reason: Option<String>,
        context: CrashContext<'_>,
    ) -> CrashBundle {
        let recent_events: Vec<Event> = context
            .hub
            .map(|hub| hub.recent(self.recent_events_limit).iter().map(|e| Event::clone(e)).collect())
            .unwrap_or_default();
        CrashBundle {
            schema_version: schema::CRASH_BUNDLE.to_string(),
            captured_at_utc: time::format_utc(&time::now_utc()),
            tick,
            exception,
            reason,
            runtime: context.runtime,
            recent_events,
            profiling: context.profiling,
            replay: context.replay,
        }
    }

    fn write(
        &self,
        tick: u64,
        exception: Option<ExceptionInfo>,
        reason: Option<String>,
        mut context: CrashContext<'_>,
    ) -> CoreResult<Option<PathBuf>> {
        let mut exception = exception;
        if let (Some(info), Some(label)) = (exception.as_mut(), context.error_type.take()) {
            info.error_type = label;
        }
        let explicit = context.output_path.take();
        let path = explicit.unwrap_or_else(|| self.default_path(tick));
        let bundle = self.build(tick, exception, reason, context);
        artifact::write_json(&path, &bundle)?;
        tracing::info!(
            path = %path.display(),
            tick,
            events = bundle.recent_events.len(),
            "crash bundle written"
        );
        Ok(Some(path))
    }

    fn default_path(&self, tick: u64) -> PathBuf {
        let stamp = time::file_stamp(&time::now_utc());
        self.output_dir.join(format!("crash_{stamp}_tick{tick}.json"))
    }

    /// Read a bundle back
    ///
    /// # Errors
    ///
    /// Returns error if the file is unreadable or not a crash bundle
    pub fn load(path: &Path) -> CoreResult<CrashBundle> {
        artifact::read_json(path)
    }
}
