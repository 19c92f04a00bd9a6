//! TELLTALE Hub
//!
//! The loop-thread side of the diagnostics pipeline: the filtered, sampled
//! event bus, the rolling metrics aggregator that listens to it, and the
//! span profiler that reports into it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod hub;
pub mod metrics;
pub mod profiler;

pub use hub::{Hub, HubSnapshot, HubStats, SubscriptionId};
pub use metrics::{percentile, MetricsSnapshot, MetricsStore};
pub use profiler::{Profiler, ProfilingSnapshot, ProfilingSpan, SpanToken};
