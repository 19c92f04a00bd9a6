//! Persisted replay documents and their lenient decoder.
//!
//! A session is the manifest, the recorded commands, and the checkpoint
//! hashes. Strict serde decoding is used for round trips; hand-edited or
//! truncated exports go through [`ReplaySession::from_json_value`], which
//! drops malformed entries and counts them instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::path::Path;
use telltale_core::{artifact, schema, CoreError, CoreResult, Metadata, Value};

/// One externally driven input, applied at `tick`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayCommand {
    /// Tick the command was applied on
    pub tick: u64,
    /// Command discriminator
    #[serde(rename = "type")]
    pub command_type: String,
    /// Command arguments
    #[serde(default)]
    pub payload: Metadata,
}

impl ReplayCommand {
    /// Build a command
    #[must_use]
    pub fn new(tick: u64, command_type: impl Into<String>, payload: Metadata) -> Self {
        Self {
            tick,
            command_type: command_type.into(),
            payload,
        }
    }
}

/// Recorded state hash for one tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Tick the state was captured on
    pub tick: u64,
    /// Hex SHA-256 of the canonical state
    pub hash: String,
}

/// `diag.replay_manifest.v1` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayManifest {
    /// Schema tag
    pub schema_version: String,
    /// Capture format version
    pub replay_version: u32,
    /// Simulation seed, if the host recorded one
    pub seed: Option<u64>,
    /// Build metadata
    #[serde(default)]
    pub build: Metadata,
    /// Commands recorded in total, including ones trimmed from the session
    pub command_count: usize,
    /// Lowest marked tick
    pub first_tick: Option<u64>,
    /// Highest marked tick
    pub last_tick: Option<u64>,
}

impl Default for ReplayManifest {
    fn default() -> Self {
        Self {
            schema_version: schema::REPLAY_MANIFEST.to_string(),
            replay_version: schema::REPLAY_VERSION,
            seed: None,
            build: Metadata::new(),
            command_count: 0,
            first_tick: None,
            last_tick: None,
        }
    }
}

/// `diag.replay_session.v1` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySession {
    /// Schema tag
    pub schema_version: String,
    /// Run description
    pub manifest: ReplayManifest,
    /// Commands in recorded order
    pub commands: Vec<ReplayCommand>,
    /// Checkpoints in recorded order
    pub state_hashes: Vec<Checkpoint>,
    /// Entries dropped by the lenient decoder
    #[serde(skip)]
    pub skipped_entries: usize,
}

impl Default for ReplaySession {
    fn default() -> Self {
        Self {
            schema_version: schema::REPLAY_SESSION.to_string(),
            manifest: ReplayManifest::default(),
            commands: Vec::new(),
            state_hashes: Vec::new(),
            skipped_entries: 0,
        }
    }
}

impl ReplaySession {
    /// Inclusive tick range to replay
    ///
    /// Uses the manifest when it carries both ends, swapping them if they
    /// were recorded inverted. Otherwise falls back to the lowest and highest
    /// tick across commands and checkpoints.
    #[must_use]
    pub fn tick_range(&self) -> Option<(u64, u64)> {
        if let (Some(a), Some(b)) = (self.manifest.first_tick, self.manifest.last_tick) {
            return Some((a.min(b), a.max(b)));
        }
        let ticks = self
            .commands
            .iter()
            .map(|c| c.tick)
            .chain(self.state_hashes.iter().map(|c| c.tick));
        ticks.fold(None, |range, t| match range {
            None => Some((t, t)),
            Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
        })
    }

    /// Decode a possibly damaged session payload
    ///
    /// Commands without an integer `tick` or string `type`, or with a
    /// non-object `payload`, are skipped, as are checkpoints without a
    /// `tick` or string `hash`. Manifest fields of the wrong type fall back
    /// to defaults.
    ///
    /// # Errors
    ///
    /// Returns `Encoding` only if the payload is not a JSON object
    pub fn from_json_value(raw: &Json) -> CoreResult<Self> {
        let Some(root) = raw.as_object() else {
            return Err(CoreError::Encoding {
                reason: "replay session must be a JSON object".to_string(),
            });
        };

        let mut session = Self::default();
        if let Some(tag) = root.get("schema_version").and_then(Json::as_str) {
            session.schema_version = tag.to_string();
        }

        for entry in root.get("commands").and_then(Json::as_array).into_iter().flatten() {
            match decode_command(entry) {
                Some(command) => session.commands.push(command),
                None => session.skipped_entries += 1,
            }
        }
        for entry in root.get("state_hashes").and_then(Json::as_array).into_iter().flatten() {
            match decode_checkpoint(entry) {
                Some(checkpoint) => session.state_hashes.push(checkpoint),
                None => session.skipped_entries += 1,
            }
        }

        let manifest = root.get("manifest").and_then(Json::as_object);
        let field = |key: &str| manifest.and_then(|m| m.get(key));
        session.manifest = ReplayManifest {
            schema_version: field("schema_version")
                .and_then(Json::as_str)
                .unwrap_or(schema::REPLAY_MANIFEST)
                .to_string(),
            replay_version: field("replay_version")
                .and_then(Json::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(schema::REPLAY_VERSION),
            seed: field("seed").and_then(Json::as_u64),
            build: field("build").and_then(json_object).unwrap_or_default(),
            command_count: field("command_count")
                .and_then(Json::as_u64)
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(session.commands.len()),
            first_tick: field("first_tick").and_then(json_tick),
            last_tick: field("last_tick").and_then(json_tick),
        };

        if session.skipped_entries > 0 {
            tracing::warn!(skipped = session.skipped_entries, "malformed replay entries skipped");
        }
        Ok(session)
    }

    /// Read and leniently decode a session file
    ///
    /// # Errors
    ///
    /// Returns error if the file is unreadable or not a JSON object
    pub fn load(path: &Path) -> CoreResult<Self> {
        let raw: Json = artifact::read_json(path)?;
        Self::from_json_value(&raw)
    }

    /// Write the session document to `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn write(&self, path: &Path) -> CoreResult<()> {
        artifact::write_json(path, self)?;
        tracing::info!(
            path = %path.display(),
            commands = self.commands.len(),
            checkpoints = self.state_hashes.len(),
            "replay session written"
        );
        Ok(())
    }
}

// Integral, non-negative ticks only; 3.0 is accepted, 3.5 and "3" are not.
fn json_tick(raw: &Json) -> Option<u64> {
    if let Some(t) = raw.as_u64() {
        return Some(t);
    }
    raw.as_f64()
        .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
        .map(|f| f as u64)
}

fn json_object(raw: &Json) -> Option<Metadata> {
    match Value::from(raw.clone()) {
        Value::Map(map) => Some(map),
        _ => None,
    }
}

fn decode_command(raw: &Json) -> Option<ReplayCommand> {
    let entry = raw.as_object()?;
    let tick = entry.get("tick").and_then(json_tick)?;
    let command_type = entry.get("type").and_then(Json::as_str)?;
    let payload = match entry.get("payload") {
        None | Some(Json::Null) => Metadata::new(),
        Some(p) => json_object(p)?,
    };
    Some(ReplayCommand::new(tick, command_type, payload))
}

fn decode_checkpoint(raw: &Json) -> Option<Checkpoint> {
    let entry = raw.as_object()?;
    Some(Checkpoint {
        tick: entry.get("tick").and_then(json_tick)?,
        hash: entry.get("hash").and_then(Json::as_str)?.to_string(),
    })
}
