// tuner-cli/src/main.rs

//! Terminal front end for `tuner-core`.
//!
//! Lists input devices, asks for microphone access, runs the analysis loop
//! and renders each published snapshot as a meter line or as JSON.

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tuner_core::audio::CpalProvider;
use tuner_core::{
    EstimatorKind, NoteSpelling, PermissionState, SchedulerEvent, Snapshot, Tuner, TunerConfig,
    TunerError, TuningReading,
};

/// Width of the in-tune meter, in characters.
const METER_WIDTH: usize = 40;

#[derive(Parser, Debug)]
#[command(name = "tuner", about = "Real-time instrument tuner")]
struct Cli {
    /// List available input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Input device id (see --list-devices); defaults to the configured or first device
    #[arg(short, long)]
    device: Option<String>,

    /// Print one JSON object per cycle instead of a meter
    #[arg(long)]
    json: bool,

    /// Milliseconds between analysis cycles
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Minimum estimator confidence for a reading (0.0 - 1.0)
    #[arg(long)]
    confidence: Option<f64>,

    /// Tune score at or above which a note counts as in tune (0.0 - 1.0)
    #[arg(long)]
    in_tune: Option<f64>,

    /// Frequency of A4 in Hz
    #[arg(long)]
    reference: Option<f64>,

    /// Spell note names with sharps instead of flats
    #[arg(long)]
    sharps: bool,

    /// Pitch estimator to use
    #[arg(long, value_parser = parse_estimator)]
    estimator: Option<EstimatorKind>,

    /// Stop after this many seconds (runs until the stream ends otherwise)
    #[arg(long)]
    seconds: Option<u64>,

    /// Settings file to read instead of the platform default
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective settings back to the settings file
    #[arg(long)]
    save_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_estimator(value: &str) -> std::result::Result<EstimatorKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "mcleod" | "mpm" => Ok(EstimatorKind::McLeod),
        "yin" => Ok(EstimatorKind::Yin),
        other => Err(format!("unknown estimator '{other}' (expected mcleod or yin)")),
    }
}

impl Cli {
    /// Applies command-line overrides on top of the file settings.
    fn apply(&self, config: &mut TunerConfig) {
        if let Some(ms) = self.interval_ms {
            config.scheduler.interval_ms = ms;
        }
        if let Some(confidence) = self.confidence {
            config.analysis.confidence_threshold = confidence;
        }
        if let Some(in_tune) = self.in_tune {
            config.analysis.in_tune_threshold = in_tune;
        }
        if let Some(reference) = self.reference {
            config.notes.reference_hz = reference;
        }
        if self.sharps {
            config.notes.spelling = NoteSpelling::Sharps;
        }
        if let Some(kind) = self.estimator {
            config.estimator = kind;
        }
        if let Some(device) = &self.device {
            config.capture.device = Some(device.clone());
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config_path = cli.config.clone().unwrap_or_else(TunerConfig::default_path);
    let mut config = TunerConfig::load_from(&config_path).unwrap_or_else(|e| {
        log::warn!("Ignoring settings file {}: {:#}", config_path.display(), e);
        TunerConfig::default()
    });
    cli.apply(&mut config);
    config.validate().context("invalid settings")?;

    if cli.save_config {
        config
            .save_to(&config_path)
            .with_context(|| format!("writing {}", config_path.display()))?;
        log::info!("Settings saved to {}", config_path.display());
    }

    let mut tuner = Tuner::new(Arc::new(CpalProvider::new()), &config);
    tuner.on_permission_changed(|state| log::info!("Microphone permission: {}", state.label()));

    if tuner.request_permission() != PermissionState::Granted {
        bail!("microphone access was denied; grant it in the system settings and retry");
    }
    tuner.refresh_devices().context("listing input devices")?;

    if cli.list_devices {
        for device in tuner.list_devices() {
            println!("{}\t{}", device.id, device.label);
        }
        return Ok(());
    }

    if tuner.selected_device().is_none() {
        let Some(first) = tuner.list_devices().first() else {
            bail!("no input devices found");
        };
        let id = first.id.clone();
        log::info!("No device selected, using {}", first.label);
        tuner.select_device(id);
    }

    let events = tuner.subscribe();
    tuner.start().context("starting the tuner")?;

    let deadline = cli.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut renderer = Renderer::new(cli.json);
    loop {
        let timeout = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    tuner.stop();
                    break;
                }
                left
            }
            None => Duration::from_secs(1),
        };

        match events.recv_timeout(timeout) {
            Ok(SchedulerEvent::Cycle(snapshot)) => renderer.render(&snapshot)?,
            Ok(SchedulerEvent::Halted { error }) => {
                renderer.finish()?;
                return halt_outcome(error);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                renderer.finish()?;
                return halt_outcome(tuner.handle().last_error());
            }
        }
    }

    renderer.finish()?;
    Ok(())
}

/// Maps the way the loop ended to the process result.
fn halt_outcome(error: Option<TunerError>) -> Result<()> {
    match error {
        None => Ok(()),
        Some(e) if e.is_session_fatal() => {
            bail!("capture session ended: {e}; check the input device and restart")
        }
        Some(e) => bail!("tuner stopped: {e}"),
    }
}

/// JSON line written per cycle with `--json`.
#[derive(Serialize)]
struct JsonLine<'a> {
    cycle: u64,
    fresh: bool,
    #[serde(flatten)]
    reading: Option<&'a TuningReading>,
}

struct Renderer {
    json: bool,
    out: std::io::Stdout,
    drew_meter: bool,
}

impl Renderer {
    fn new(json: bool) -> Self {
        Self {
            json,
            out: std::io::stdout(),
            drew_meter: false,
        }
    }

    fn render(&mut self, snapshot: &Snapshot) -> Result<()> {
        let mut out = self.out.lock();
        if self.json {
            let line = JsonLine {
                cycle: snapshot.cycles,
                fresh: snapshot.fresh,
                reading: snapshot.reading.as_ref(),
            };
            serde_json::to_writer(&mut out, &line)?;
            writeln!(out)?;
            return Ok(());
        }

        // Stale cycles keep showing the last reading, dimmed by a marker.
        let line = match &snapshot.reading {
            Some(reading) => meter_line(reading, snapshot.fresh),
            None => "listening...".to_string(),
        };
        write!(out, "\r\x1b[2K{line}")?;
        out.flush()?;
        self.drew_meter = true;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.drew_meter {
            writeln!(self.out)?;
            self.drew_meter = false;
        }
        Ok(())
    }
}

/// Renders a reading as `A4   440.00 Hz  +3 ct [....|#...]`.
fn meter_line(reading: &TuningReading, fresh: bool) -> String {
    let filled = (reading.display_score() * METER_WIDTH as f64).round() as usize;
    let bar: String = (0..METER_WIDTH)
        .map(|i| if i < filled { '#' } else { '.' })
        .collect();
    format!(
        "{:<4} {:>8.2} Hz {:+4} ct [{}] {}{}",
        reading.note_name,
        reading.frequency_hz,
        reading.rounded_cents(),
        bar,
        if reading.in_tune { "in tune" } else { "       " },
        if fresh { "" } else { " *" },
    )
}
