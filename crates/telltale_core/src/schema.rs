//! Schema version tags written into every persisted artifact.
//!
//! Tags are stable across minor revisions; readers accept any document whose
//! tag matches exactly.

/// Hub snapshot document
pub const SNAPSHOT: &str = "diag.snapshot.v1";
/// Metrics snapshot document
pub const METRICS: &str = "diag.metrics.v1";
/// Profiler export
pub const PROFILING: &str = "diag.profiling.v1";
/// Replay manifest
pub const REPLAY_MANIFEST: &str = "diag.replay_manifest.v1";
/// Replay session (manifest + commands + checkpoints)
pub const REPLAY_SESSION: &str = "diag.replay_session.v1";
/// Replay validation report
pub const REPLAY_VALIDATION: &str = "diag.replay_validation.v1";
/// Crash bundle
pub const CRASH_BUNDLE: &str = "engine.crash_bundle.v1";

/// Version of the command/checkpoint capture format itself
pub const REPLAY_VERSION: u32 = 1;

/// Every known tag, for inspection tools
pub const ALL: [&str; 7] = [
    SNAPSHOT,
    METRICS,
    PROFILING,
    REPLAY_MANIFEST,
    REPLAY_SESSION,
    REPLAY_VALIDATION,
    CRASH_BUNDLE,
];

/// Check whether a tag is one this crate writes
#[must_use]
pub fn is_known(tag: &str) -> bool {
    ALL.contains(&tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_distinct() {
        let mut tags = ALL.to_vec();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), ALL.len());
    }

    #[test]
    fn test_is_known() {
        assert!(is_known("diag.replay_session.v1"));
        assert!(!is_known("diag.replay_session.v2"));
    }
}
