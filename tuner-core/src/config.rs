//! Tuner settings, defaults and TOML persistence.
//!
//! Settings live in `<config dir>/tuner/settings.toml`. A missing file means
//! defaults; every section may be omitted or partially filled.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analyzer::{
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_FREQUENCY_DECIMALS, DEFAULT_IN_TUNE_THRESHOLD,
    MAX_FREQUENCY_DECIMALS, TuningAnalyzer,
};
use crate::capture::CaptureOptions;
use crate::pitch::EstimatorKind;
use crate::scheduler::DEFAULT_INTERVAL;
use crate::tuning::{EqualTemperament, NoteSpelling};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Confidence gating and in-tune classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minimum estimator confidence (0.0 to 1.0) for a window to count.
    pub confidence_threshold: f64,
    /// Tune score (0.0 to 1.0) at or above which a reading is "in tune".
    pub in_tune_threshold: f64,
    /// Decimals the estimated frequency is rounded to before note lookup.
    pub frequency_decimals: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            in_tune_threshold: DEFAULT_IN_TUNE_THRESHOLD,
            frequency_decimals: DEFAULT_FREQUENCY_DECIMALS,
        }
    }
}

/// Loop cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pause between analysis cycles in milliseconds.
    pub interval_ms: u64,
    /// Longest wait for one window before the session counts as stalled.
    pub window_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL.as_millis() as u64,
            window_timeout_ms: 2000,
        }
    }
}

/// Capture stream shape and device choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Mono samples per analysis window.
    pub window_size: usize,
    /// Sample rate requested from the device, in Hz.
    pub preferred_sample_rate: u32,
    /// Input device id; `None` means ask or use the first device.
    pub device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            window_size: 2048,
            preferred_sample_rate: 44_100,
            device: None,
        }
    }
}

/// Note reference table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotesConfig {
    /// Frequency of A4 in Hz.
    pub reference_hz: f64,
    /// Accidental spelling for note names.
    pub spelling: NoteSpelling,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            reference_hz: 440.0,
            spelling: NoteSpelling::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// TunerConfig
// ---------------------------------------------------------------------------

/// Top-level configuration, serialised as `settings.toml`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Pitch estimator to run on each window.
    pub estimator: EstimatorKind,
    pub analysis: AnalysisConfig,
    pub scheduler: SchedulerConfig,
    pub capture: CaptureConfig,
    pub notes: NotesConfig,
}

impl TunerConfig {
    /// Path of the platform settings file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tuner")
            .join("settings.toml")
    }

    /// Load from an explicit path, returning defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to an explicit path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Rejects values the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.analysis.confidence_threshold) {
            bail!(
                "confidence_threshold must be within [0, 1], got {}",
                self.analysis.confidence_threshold
            );
        }
        if !unit.contains(&self.analysis.in_tune_threshold) {
            bail!(
                "in_tune_threshold must be within [0, 1], got {}",
                self.analysis.in_tune_threshold
            );
        }
        if self.analysis.frequency_decimals > MAX_FREQUENCY_DECIMALS {
            bail!(
                "frequency_decimals must be at most {}, got {}",
                MAX_FREQUENCY_DECIMALS,
                self.analysis.frequency_decimals
            );
        }
        if self.scheduler.interval_ms == 0 {
            bail!("interval_ms must be positive");
        }
        if self.scheduler.window_timeout_ms == 0 {
            bail!("window_timeout_ms must be positive");
        }
        if self.capture.window_size < 64 {
            bail!("window_size must be at least 64, got {}", self.capture.window_size);
        }
        if !(self.notes.reference_hz.is_finite() && self.notes.reference_hz > 0.0) {
            bail!("reference_hz must be positive, got {}", self.notes.reference_hz);
        }
        Ok(())
    }

    pub fn analyzer(&self) -> TuningAnalyzer {
        TuningAnalyzer::new(
            self.analysis.confidence_threshold,
            self.analysis.in_tune_threshold,
            self.analysis.frequency_decimals,
        )
    }

    pub fn resolver(&self) -> EqualTemperament {
        EqualTemperament::new(self.notes.reference_hz, self.notes.spelling)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.interval_ms)
    }

    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            window_size: self.capture.window_size,
            preferred_sample_rate: self.capture.preferred_sample_rate,
            window_timeout: Duration::from_millis(self.scheduler.window_timeout_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
