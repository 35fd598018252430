// src/main.rs
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use env_logger::{Builder, Env, Target};
use log::{info, warn};

use pq_triggering::drivers::{
    CycleSource, DeviceSource, JsonLinePublisher, Publisher, SimulatedSource, SummaryPublisher,
    TriggeringPipeline,
};
use pq_triggering::engine::Fault;
use pq_triggering::settings::{self, Settings};

const DEFAULT_SETTINGS_PATH: &str = "/etc/pq-triggering/settings.json";

/// Loads the settings file; a missing default file falls back to defaults.
fn load_settings() -> Result<(Settings, Option<String>)> {
    if let Some(path) = std::env::args().nth(1) {
        let settings = Settings::load_from_file(&path)
            .with_context(|| format!("loading settings from {path}"))?;
        return Ok((settings, None));
    }
    if !Path::new(DEFAULT_SETTINGS_PATH).exists() {
        let note = format!("{DEFAULT_SETTINGS_PATH} not found, running with default settings");
        return Ok((Settings::new(), Some(note)));
    }
    let settings = Settings::load_from_file(DEFAULT_SETTINGS_PATH)
        .with_context(|| format!("loading settings from {DEFAULT_SETTINGS_PATH}"))?;
    Ok((settings, None))
}

fn init_logging(settings: &Settings) -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    if settings.is_set(settings::LOG_PATH) {
        let path = settings.get_string(settings::LOG_PATH)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening log file {path}"))?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.try_init().context("installing logger")?;
    Ok(())
}

fn open_source(settings: &Settings) -> Result<Box<dyn CycleSource + Send>> {
    if settings.simulation() {
        info!("Using simulated 60 Hz source");
        return Ok(Box::new(SimulatedSource::new()));
    }
    let path = settings.device_path()?;
    info!("Reading cycles from {path}");
    Ok(Box::new(DeviceSource::open(&path)?))
}

/// Per-measurement trigger lines, or periodic summaries when configured.
fn open_publisher(settings: &Settings) -> Result<Box<dyn Publisher + Send>> {
    let box_id = settings.box_id()?;
    match settings.measurements_per_summary()? {
        Some(every) => {
            info!("Publishing a metrics summary every {every} measurements");
            Ok(Box::new(SummaryPublisher::new(io::stdout(), box_id, every)))
        }
        None => Ok(Box::new(JsonLinePublisher::new(io::stdout(), box_id))),
    }
}

fn run_limit(settings: &Settings) -> Result<Option<Duration>> {
    if !settings.is_set(settings::RUN_FOR_SECS) {
        return Ok(None);
    }
    let secs = settings.get_int(settings::RUN_FOR_SECS)?;
    let secs = u64::try_from(secs).context("run_for_secs must not be negative")?;
    Ok(Some(Duration::from_secs(secs)))
}

fn wait(pipeline: &TriggeringPipeline, limit: Option<Duration>) -> Option<Fault> {
    match limit {
        Some(limit) => pipeline.wait_for_fault(limit),
        None => loop {
            if let Some(fault) = pipeline.wait_for_fault(Duration::from_secs(3600)) {
                break Some(fault);
            }
        },
    }
}

fn main() -> Result<()> {
    let (settings, note) = load_settings()?;
    init_logging(&settings)?;
    if let Some(note) = note {
        warn!("{note}");
    }
    let settings = Arc::new(settings);
    let limit = run_limit(&settings)?;
    let source = open_source(&settings)?;
    let publisher = open_publisher(&settings)?;
    let mut pipeline = TriggeringPipeline::start(Arc::clone(&settings), source, publisher)?;

    let fault = wait(&pipeline, limit);
    pipeline.stop();
    if let Some(fault) = fault {
        bail!("{} stage failed: {}", fault.stage, fault.reason);
    }
    info!("Run time elapsed, pipeline shut down");
    Ok(())
}
