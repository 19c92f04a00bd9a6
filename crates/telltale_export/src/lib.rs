//! TELLTALE Export
//!
//! Everything that leaves the loop thread: the background JSONL exporter
//! and the crash bundle writer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crash;
pub mod exporter;

pub use crash::{CrashBundle, CrashBundleWriter, CrashContext, ExceptionInfo};
pub use exporter::{AsyncExporter, ExportHandle, ExporterStats};
