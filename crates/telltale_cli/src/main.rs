//! TELLTALE CLI
//!
//! Headless inspection of persisted diagnostics artifacts, plus a
//! self-check that exercises the whole pipeline.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod demo;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use telltale_core::DiagnosticsConfig;
use telltale_export::CrashBundleWriter;
use telltale_replay::ReplaySession;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "telltale")]
#[command(about = "TELLTALE - diagnostics and deterministic replay toolkit", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a replay session
    Session {
        /// Path to a diag.replay_session.v1 file
        file: PathBuf,
    },
    /// Count exported events per category/name
    Events {
        /// Path to an exporter JSONL file
        file: PathBuf,
    },
    /// Summarize a crash bundle
    Crash {
        /// Path to an engine.crash_bundle.v1 file
        file: PathBuf,
    },
    /// Run the deterministic self-check and write its artifacts
    Demo {
        /// Output directory
        dir: PathBuf,
        /// Ticks to simulate
        #[arg(short, long, default_value_t = 600)]
        ticks: u64,
        /// Input seed
        #[arg(short, long, default_value_t = 0x5EED)]
        seed: u64,
        /// Diagnostics config as JSON
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let logs = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        logs.json().init();
    } else {
        logs.init();
    }

    match cli.command {
        Commands::Session { file } => show_session(&file),
        Commands::Events { file } => show_events(&file),
        Commands::Crash { file } => show_crash(&file),
        Commands::Demo {
            dir,
            ticks,
            seed,
            config,
        } => {
            let base = match config {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .wrap_err_with(|| format!("cannot read {}", path.display()))?;
                    DiagnosticsConfig::from_json_str(&raw)?
                }
                None => DiagnosticsConfig::default(),
            };
            let report = demo::run(&dir, ticks, seed, base)?;
            println!("Simulated {} ticks", report.ticks);
            println!("Hub retained {} events", report.events_retained);
            println!(
                "Exported {} events ({} dropped)",
                report.exporter.written_count, report.exporter.dropped_count
            );
            println!(
                "Replay passed: {} commands, {} checkpoints",
                report.validation.commands_applied, report.validation.checkpoint_count
            );
            for path in &report.artifacts {
                println!("  {}", path.display());
            }
            Ok(())
        }
    }
}

fn show_session(path: &Path) -> Result<()> {
    let session = ReplaySession::load(path).wrap_err_with(|| format!("cannot load {}", path.display()))?;
    let manifest = &session.manifest;
    println!("Session: {}", path.display());
    println!("  schema:       {}", session.schema_version);
    println!("  replay:       v{}", manifest.replay_version);
    match manifest.seed {
        Some(seed) => println!("  seed:         {seed}"),
        None => println!("  seed:         -"),
    }
    match session.tick_range() {
        Some((first, last)) => println!("  ticks:        {first}..={last}"),
        None => println!("  ticks:        -"),
    }
    println!(
        "  commands:     {} stored / {} recorded",
        session.commands.len(),
        manifest.command_count
    );
    println!("  checkpoints:  {}", session.state_hashes.len());
    if session.skipped_entries > 0 {
        println!("  skipped:      {} malformed entries", session.skipped_entries);
    }
    for (key, value) in &manifest.build {
        println!("  build.{key}: {}", serde_json::to_string(value)?);
    }
    Ok(())
}

/// Per-`category/name` line counts of a JSONL export, plus unparseable lines
fn count_events(path: &Path) -> Result<(BTreeMap<String, u64>, u64)> {
    let file = std::fs::File::open(path).wrap_err_with(|| format!("cannot open {}", path.display()))?;
    let mut counts = BTreeMap::new();
    let mut malformed = 0;
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: Option<serde_json::Value> = serde_json::from_str(&line).ok();
        let key = parsed.as_ref().and_then(|event| {
            let category = event.get("category")?.as_str()?;
            let name = event.get("name")?.as_str()?;
            Some(format!("{category}/{name}"))
        });
        match key {
            Some(key) => *counts.entry(key).or_insert(0) += 1,
            None => malformed += 1,
        }
    }
    Ok((counts, malformed))
}

fn show_events(path: &Path) -> Result<()> {
    let (counts, malformed) = count_events(path)?;
    let total: u64 = counts.values().sum();
    println!("Events: {} ({total} total)", path.display());
    for (key, count) in &counts {
        println!("  {count:>8}  {key}");
    }
    if malformed > 0 {
        println!("  {malformed:>8}  <malformed>");
    }
    Ok(())
}

fn show_crash(path: &Path) -> Result<()> {
    let bundle = CrashBundleWriter::load(path).wrap_err_with(|| format!("cannot load {}", path.display()))?;
    println!("Crash bundle: {}", path.display());
    println!("  captured:  {}", bundle.captured_at_utc);
    println!("  tick:      {}", bundle.tick);
    match (&bundle.exception, &bundle.reason) {
        (Some(exception), _) => {
            println!("  error:     {}: {}", exception.error_type, exception.message);
            for line in exception.traceback.iter().take(8) {
                println!("             {line}");
            }
        }
        (None, Some(reason)) => println!("  reason:    {reason}"),
        (None, None) => println!("  reason:    -"),
    }
    println!("  events:    {}", bundle.recent_events.len());
    if let Some(last) = bundle.recent_events.last() {
        println!("  last:      {} @ tick {}", last.key(), last.tick);
    }
    if let Some(profiling) = &bundle.profiling {
        println!("  spans:     {} ({})", profiling.span_count, profiling.mode);
        for (key, ms) in profiling.top_spans_ms.iter().take(3) {
            println!("             {key}: {ms:.3} ms");
        }
    }
    if let Some(replay) = &bundle.replay {
        println!(
            "  replay:    {} commands, {} checkpoints",
            replay.manifest.command_count,
            replay.state_hashes.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_count_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"tick":1,"category":"frame","name":"time_ms","value":16.0}"#, "\n",
                r#"{"tick":2,"category":"frame","name":"time_ms","value":17.0}"#, "\n",
                r#"{"tick":2,"category":"perf","name":"span"}"#, "\n",
                "\n",
                "not json\n",
                r#"{"tick":3}"#, "\n",
            ),
        )
        .unwrap();
        let (counts, malformed) = count_events(&path).unwrap();
        assert_eq!(counts["frame/time_ms"], 2);
        assert_eq!(counts["perf/span"], 1);
        assert_eq!(malformed, 2);
    }

    #[test]
    fn test_summaries_read_demo_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        demo::run(dir.path(), 120, 7, DiagnosticsConfig::default()).unwrap();
        show_session(&dir.path().join("replay_session.json")).unwrap();
        show_events(&dir.path().join("events.jsonl")).unwrap();
        show_crash(&dir.path().join("crash_bundle.json")).unwrap();
    }
}
