//! Deterministic replay and checkpoint validation.
//!
//! # Algorithm
//! 1. Resolve the inclusive tick range (manifest, else entry extremes).
//! 2. For each tick: apply that tick's commands in recorded order, then call
//!    `step(fixed_step_seconds)` exactly once.
//! 3. If the tick has a checkpoint, hash the returned state and compare.
//!
//! Divergences are collected, never raised; the run always reaches the end
//! of the range.

use crate::session::{ReplayCommand, ReplaySession};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use telltale_core::{artifact, compute_state_hash, schema, CoreError, CoreResult, Value};

/// One tick whose replayed state hash differs from the recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Diverging tick
    pub tick: u64,
    /// Recorded hash
    pub expected_hash: String,
    /// Replayed hash
    pub actual_hash: String,
}

/// `diag.replay_validation.v1` document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Schema tag
    pub schema_version: String,
    /// True iff `mismatches` is empty
    pub passed: bool,
    /// Ticks stepped
    pub total_ticks: u64,
    /// Commands handed to `apply_command`
    pub commands_applied: usize,
    /// Checkpoints inside the replayed range
    pub checkpoint_count: usize,
    /// Every divergence, in tick order
    pub mismatches: Vec<Mismatch>,
}

impl ValidationResult {
    /// Earliest divergence, if any
    #[must_use]
    pub fn first_divergence(&self) -> Option<&Mismatch> {
        self.mismatches.first()
    }

    /// Write the report to `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn write(&self, path: &Path) -> CoreResult<()> {
        artifact::write_json(path, self)
    }
}

/// Replays a session against caller-supplied simulation callbacks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayRunner {
    fixed_step_seconds: f64,
    max_ticks: Option<u64>,
}

impl ReplayRunner {
    /// Create a runner stepping by `fixed_step_seconds`
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` unless the step is finite and positive
    pub fn new(fixed_step_seconds: f64) -> CoreResult<Self> {
        if !fixed_step_seconds.is_finite() || fixed_step_seconds <= 0.0 {
            return Err(CoreError::invalid_argument(
                "fixed_step_seconds",
                format!("must be finite and > 0, got {fixed_step_seconds}"),
            ));
        }
        Ok(Self {
            fixed_step_seconds,
            max_ticks: None,
        })
    }

    /// Stop after at most `max_ticks` ticks, starting from the first
    ///
    /// Guards against sessions whose `last_tick` was edited far past the
    /// recorded data. Zero is treated as one.
    #[must_use]
    pub const fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = Some(if max_ticks == 0 { 1 } else { max_ticks });
        self
    }

    /// Step handed to every `step` call
    #[must_use]
    pub const fn fixed_step_seconds(&self) -> f64 {
        self.fixed_step_seconds
    }

    /// Replay `session` and compare every checkpoint
    pub fn run<A, S>(&self, session: &ReplaySession, mut apply_command: A, mut step: S) -> ValidationResult
    where
        A: FnMut(&ReplayCommand),
        S: FnMut(f64) -> Value,
    {
        let Some((first, mut last)) = session.tick_range() else {
            tracing::debug!("replay session has no ticks");
            return ValidationResult {
                schema_version: schema::REPLAY_VALIDATION.to_string(),
                passed: true,
                total_ticks: 0,
                commands_applied: 0,
                checkpoint_count: 0,
                mismatches: Vec::new(),
            };
        };

        if let Some(max_ticks) = self.max_ticks {
            let capped = first.saturating_add(max_ticks - 1);
            if capped < last {
                tracing::warn!(first, last, max_ticks, "replay range truncated");
                last = capped;
            }
        }

        let mut by_tick: BTreeMap<u64, Vec<&ReplayCommand>> = BTreeMap::new();
        for command in &session.commands {
            by_tick.entry(command.tick).or_default().push(command);
        }
        let mut expected: BTreeMap<u64, &str> = BTreeMap::new();
        for checkpoint in &session.state_hashes {
            expected.entry(checkpoint.tick).or_insert(checkpoint.hash.as_str());
        }
        let checkpoint_count = expected.range(first..=last).count();

        let mut total_ticks = 0_u64;
        let mut commands_applied = 0;
        let mut mismatches = Vec::new();
        for tick in first..=last {
            total_ticks = total_ticks.saturating_add(1);
            if let Some(commands) = by_tick.get(&tick) {
                for command in commands {
                    apply_command(command);
                    commands_applied += 1;
                }
            }
            let state = step(self.fixed_step_seconds);

            if let Some(expected_hash) = expected.get(&tick) {
                let actual_hash = compute_state_hash(&state);
                if actual_hash != *expected_hash {
                    tracing::warn!(tick, expected = %expected_hash, actual = %actual_hash, "replay divergence");
                    mismatches.push(Mismatch {
                        tick,
                        expected_hash: (*expected_hash).to_string(),
                        actual_hash,
                    });
                }
            }
        }

        let result = ValidationResult {
            schema_version: schema::REPLAY_VALIDATION.to_string(),
            passed: mismatches.is_empty(),
            total_ticks,
            commands_applied,
            checkpoint_count,
            mismatches,
        };
        tracing::info!(
            passed = result.passed,
            ticks = result.total_ticks,
            mismatches = result.mismatches.len(),
            "replay finished"
        );
        result
    }

    /// Leniently decode a raw session payload, then [`run`](Self::run) it
    ///
    /// # Errors
    ///
    /// Returns `Encoding` if the payload is not a JSON object
    pub fn run_value<A, S>(&self, raw: &serde_json::Value, apply_command: A, step: S) -> CoreResult<ValidationResult>
    where
        A: FnMut(&ReplayCommand),
        S: FnMut(f64) -> Value,
    {
        let session = ReplaySession::from_json_value(raw)?;
        Ok(self.run(&session, apply_command, step))
    }
}
