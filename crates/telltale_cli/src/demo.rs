//! Self-check: drive a small deterministic simulation through every
//! component, then replay its recording and verify it.

use color_eyre::eyre::{eyre, Result, WrapErr};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use telltale_core::{artifact, DiagnosticsConfig, Metadata, ProfilingMode, Value};
use telltale_export::{AsyncExporter, CrashBundleWriter, CrashContext, ExporterStats};
use telltale_hub::{Hub, MetricsStore, Profiler};
use telltale_replay::{ReplayCommand, ReplayRecorder, ReplayRunner, ReplaySession, ValidationResult};

const FIXED_STEP_SECONDS: f64 = 1.0 / 60.0;

/// Integer-only world so replays hash identically on every platform
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct World {
    position: i64,
    velocity: i64,
}

impl World {
    fn apply(&mut self, command: &ReplayCommand) {
        if command.command_type == "impulse" {
            self.velocity += command.payload.get("dv").and_then(Value::as_i64).unwrap_or(0);
        }
    }

    fn step(&mut self) {
        self.position += self.velocity;
        self.velocity -= self.velocity.signum();
    }

    fn state(&self) -> Value {
        Value::map([("position", self.position), ("velocity", self.velocity)])
    }
}

/// xorshift64; input generation only, never part of hashed state
struct Inputs(u64);

impl Inputs {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

/// What a demo run produced
#[derive(Debug)]
pub struct DemoReport {
    /// Ticks simulated
    pub ticks: u64,
    /// Events left in the hub ring at the end
    pub events_retained: usize,
    /// Final exporter counters
    pub exporter: ExporterStats,
    /// Replay of the recorded session
    pub validation: ValidationResult,
    /// Files written, in creation order
    pub artifacts: Vec<PathBuf>,
}

/// Run `ticks` ticks and write every artifact into `dir`
pub fn run(dir: &Path, ticks: u64, seed: u64, base: DiagnosticsConfig) -> Result<DemoReport> {
    let mut config = base;
    config.export.path = dir.join("events.jsonl");
    config.crash.output_dir = dir.join("crash");
    config.profiling.export_dir = dir.join("profiling");
    config.replay.export_dir = dir.join("replay");
    config.replay.seed = Some(seed);
    if !config.profiling.mode.captures_timeline() {
        config.profiling.mode = ProfilingMode::Timeline;
    }
    config.validate().wrap_err("invalid diagnostics config")?;
    tracing::info!(dir = %dir.display(), ticks, seed, "demo starting");

    let mut hub = Hub::new(&config.hub)?;
    let metrics = MetricsStore::new(&config.metrics)?.shared();
    let mut profiler = Profiler::new(&config.profiling)?;
    let mut recorder = ReplayRecorder::new(&config.replay)?;
    let mut exporter = AsyncExporter::start(&config.export)?;

    let sink = Rc::clone(&metrics);
    hub.subscribe(move |e| sink.borrow_mut().ingest(e));
    let handle = exporter.handle();
    hub.subscribe(move |e| {
        handle.enqueue(Arc::clone(e));
    });

    let mut world = World::default();
    let mut inputs = Inputs::new(seed);
    for tick in 0..ticks {
        let roll = inputs.next();
        if roll % 7 == 0 {
            let dv = (roll % 11) as i64 - 5;
            let payload = Metadata::from([("dv".to_string(), Value::Int(dv))]);
            recorder.record_command(tick, "impulse", payload.clone());
            world.apply(&ReplayCommand::new(tick, "impulse", payload));
            hub.emit(tick, "input", "impulse", dv);
        }

        let span = if profiler.should_sample() {
            profiler.begin_span(tick, "sim", "step", None)
        } else {
            None
        };
        world.step();
        profiler.end_span_to(span, &mut hub);

        let frame_ms = 16.0 + (roll % 5) as f64 * 0.5;
        hub.emit(tick, "frame", "time_ms", frame_ms);
        hub.emit(tick, "render", "frame_ms", frame_ms / 2.0);
        hub.emit(tick, "sim", "position", world.position);
        recorder.mark_frame(tick, Some(&world.state()));
    }
    let last_tick = ticks.saturating_sub(1);

    let mut artifacts = Vec::new();

    let snapshot_path = dir.join("snapshot.json");
    hub.export_snapshot(&snapshot_path, None)?;
    artifacts.push(snapshot_path);

    let metrics_path = dir.join("metrics.json");
    artifact::write_json(&metrics_path, &metrics.borrow().snapshot())?;
    artifacts.push(metrics_path);

    artifacts.push(profiler.export_to(&dir.join("profiling.json"), None)?);

    let session_path = recorder.export_to(&dir.join("replay_session.json"))?;
    artifacts.push(session_path.clone());

    let validation = replay(&session_path)?;
    let validation_path = dir.join("replay_validation.json");
    validation.write(&validation_path)?;
    artifacts.push(validation_path);

    let writer = CrashBundleWriter::new(&config.crash);
    let mut context = CrashContext::with_hub(&hub);
    context.runtime.insert("mode".into(), Value::from("demo"));
    context.runtime.insert("ticks".into(), Value::from(ticks));
    context.profiling = Some(profiler.snapshot(Some(32)));
    context.replay = Some(recorder.recent_snapshot());
    context.output_path = Some(dir.join("crash_bundle.json"));
    if let Some(path) = writer.capture_snapshot(last_tick, "demo", context)? {
        artifacts.push(path);
    }

    let events_retained = hub.len();
    drop(hub);
    let exporter_stats = exporter.close(Duration::from_millis(config.export.close_timeout_ms));
    if config.export.path.exists() {
        artifacts.push(config.export.path.clone());
    }

    if !validation.passed {
        return Err(eyre!(
            "replay diverged at {} checkpoint(s), first at tick {:?}",
            validation.mismatches.len(),
            validation.first_divergence().map(|m| m.tick)
        ));
    }

    Ok(DemoReport {
        ticks,
        events_retained,
        exporter: exporter_stats,
        validation,
        artifacts,
    })
}

fn replay(session_path: &Path) -> Result<ValidationResult> {
    let session = ReplaySession::load(session_path)
        .wrap_err_with(|| format!("cannot load {}", session_path.display()))?;
    let world = RefCell::new(World::default());
    let runner = ReplayRunner::new(FIXED_STEP_SECONDS)?;
    Ok(runner.run(
        &session,
        |command| world.borrow_mut().apply(command),
        |_dt| {
            let mut w = world.borrow_mut();
            w.step();
            w.state()
        },
    ))
}
