//! Command and checkpoint capture for deterministic replay.
//!
//! The host loop feeds the recorder directly: every externally driven input
//! through [`ReplayRecorder::record_command`], and every frame through
//! [`ReplayRecorder::mark_frame`]. A checkpoint hash is stored only on ticks
//! that are multiples of `hash_interval` and only when the caller passes the
//! state for that tick.

use crate::session::{Checkpoint, ReplayCommand, ReplayManifest, ReplaySession};
use std::path::{Path, PathBuf};
use telltale_core::{
    compute_state_hash, schema, time, CoreError, CoreResult, Metadata, ReplayCaptureConfig, Value,
};

/// Tick-indexed command and checkpoint recorder
#[derive(Debug, Clone)]
pub struct ReplayRecorder {
    enabled: bool,
    hash_interval: u64,
    seed: Option<u64>,
    build: Metadata,
    export_dir: PathBuf,
    recent_commands_limit: usize,
    commands: Vec<ReplayCommand>,
    checkpoints: Vec<Checkpoint>,
    first_tick: Option<u64>,
    last_tick: Option<u64>,
    frame_count: u64,
}

impl ReplayRecorder {
    /// Build a recorder from its configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `hash_interval` is zero
    pub fn new(config: &ReplayCaptureConfig) -> CoreResult<Self> {
        if config.hash_interval == 0 {
            return Err(CoreError::invalid_argument("hash_interval", "must be > 0"));
        }
        Ok(Self {
            enabled: config.enabled,
            hash_interval: config.hash_interval,
            seed: config.seed,
            build: config.build.clone(),
            export_dir: config.export_dir.clone(),
            recent_commands_limit: config.recent_commands_limit,
            commands: Vec::new(),
            checkpoints: Vec::new(),
            first_tick: None,
            last_tick: None,
            frame_count: 0,
        })
    }

    /// Whether anything is recorded
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Toggle capture; recorded data is kept
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Checkpoint spacing in ticks
    #[must_use]
    pub const fn hash_interval(&self) -> u64 {
        self.hash_interval
    }

    /// Append a command; returns false when disabled
    pub fn record_command(&mut self, tick: u64, command_type: &str, payload: Metadata) -> bool {
        if !self.enabled {
            return false;
        }
        self.commands.push(ReplayCommand::new(tick, command_type, payload));
        true
    }

    /// Note that a frame ran at `tick`, checkpointing `state` on interval ticks
    ///
    /// Returns the stored hash when a checkpoint was taken.
    pub fn mark_frame(&mut self, tick: u64, state: Option<&Value>) -> Option<String> {
        if !self.enabled {
            return None;
        }
        self.frame_count += 1;
        if self.first_tick.is_none() {
            self.first_tick = Some(tick);
        }
        self.last_tick = Some(tick);

        let state = state?;
        if tick % self.hash_interval != 0 {
            return None;
        }
        let hash = compute_state_hash(state);
        self.checkpoints.push(Checkpoint {
            tick,
            hash: hash.clone(),
        });
        Some(hash)
    }

    /// Frames marked so far
    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Commands recorded so far
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// Checkpoints recorded so far
    #[must_use]
    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.len()
    }

    /// Describe the recording; ticks come from marked frames only
    #[must_use]
    pub fn manifest(&self) -> ReplayManifest {
        let (first_tick, last_tick) = match (self.first_tick, self.last_tick) {
            (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
            range => range,
        };
        ReplayManifest {
            schema_version: schema::REPLAY_MANIFEST.to_string(),
            replay_version: schema::REPLAY_VERSION,
            seed: self.seed,
            build: self.build.clone(),
            command_count: self.commands.len(),
            first_tick,
            last_tick,
        }
    }

    /// Manifest, the most recent `limit` commands, and every checkpoint
    #[must_use]
    pub fn snapshot(&self, limit: Option<usize>) -> ReplaySession {
        let skip = limit.map_or(0, |l| self.commands.len().saturating_sub(l));
        ReplaySession {
            schema_version: schema::REPLAY_SESSION.to_string(),
            manifest: self.manifest(),
            commands: self.commands[skip..].to_vec(),
            state_hashes: self.checkpoints.clone(),
            skipped_entries: 0,
        }
    }

    /// Snapshot trimmed to `recent_commands_limit`, for crash bundles
    #[must_use]
    pub fn recent_snapshot(&self) -> ReplaySession {
        self.snapshot(Some(self.recent_commands_limit))
    }

    /// Write the full session to `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn export_to(&self, path: &Path) -> CoreResult<PathBuf> {
        self.snapshot(None).write(path)?;
        Ok(path.to_path_buf())
    }

    /// Write the full session under the configured directory
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn export(&self) -> CoreResult<PathBuf> {
        let stamp = time::file_stamp(&time::now_utc());
        self.export_to(&self.export_dir.join(format!("replay_{stamp}.json")))
    }

    /// Forget everything recorded
    pub fn clear(&mut self) {
        self.commands.clear();
        self.checkpoints.clear();
        self.first_tick = None;
        self.last_tick = None;
        self.frame_count = 0;
    }
}
