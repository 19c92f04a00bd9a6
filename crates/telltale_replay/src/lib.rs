//! TELLTALE Replay
//!
//! Records the externally driven command stream of a fixed-step simulation
//! together with periodic state hashes, and replays a recording against the
//! same simulation to locate every tick where state diverges.
//!
//! The recorder is fed by the host loop directly, never through the hub.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod recorder;
pub mod runner;
pub mod session;

pub use recorder::ReplayRecorder;
pub use runner::{Mismatch, ReplayRunner, ValidationResult};
pub use session::{Checkpoint, ReplayCommand, ReplayManifest, ReplaySession};
