//! TELLTALE Core Types
//!
//! Events, dynamic values, the drop-oldest ring buffer, canonical state
//! hashing, and the configuration structs every component is built from.
//! The only I/O lives in [`artifact`], shared JSON file helpers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod artifact;
pub mod config;
pub mod error;
pub mod event;
pub mod hash;
pub mod ring;
pub mod sampling;
pub mod schema;
pub mod time;
pub mod value;

// Re-exports
pub use config::{
    CrashConfig, DiagnosticsConfig, ExportConfig, HubConfig, MetricsConfig, ProfilingConfig,
    ProfilingMode, ReplayCaptureConfig,
};
pub use error::{CoreError, CoreResult};
pub use event::{Event, Level, SharedEvent};
pub use hash::{canonical_json, compute_state_hash, compute_state_hash_of, StateHash};
pub use ring::RingBuffer;
pub use sampling::EveryNth;
pub use time::MonotonicClock;
pub use value::{Metadata, Value};
