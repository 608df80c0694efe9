//! # Tuning Analyzer
//!
//! Turns one sample window into a [`TuningReading`], or into
//! [`Analysis::NoReading`] when the estimate is not trustworthy.
//!
//! The pipeline per window:
//! 1. Estimate `(frequency, confidence)` with the pluggable estimator
//! 2. Gate on the confidence threshold
//! 3. Round the frequency (two decimals by default)
//! 4. Resolve the *rounded* frequency to its nearest note
//! 5. Derive cents-off and tune score from the rounded frequency
//!
//! Resolving from the rounded value keeps the displayed frequency and the
//! displayed note consistent with each other.

use serde::Serialize;

use crate::capture::SampleWindow;
use crate::pitch::PitchEstimator;
use crate::tuning::{self, NoteResolver};

/// One published tuning result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningReading {
    /// Estimated frequency after rounding, in Hz.
    pub frequency_hz: f64,
    /// Nearest note name (e.g. "A4").
    pub note_name: String,
    /// Canonical frequency of `note_name`, in Hz.
    pub note_frequency_hz: f64,
    /// Deviation from the note in cents; positive is sharp.
    pub cents_off: f64,
    /// `1 - |cents_off / 50|`; negative beyond ±50 cents.
    pub tune_score: f64,
    /// Estimator confidence for the window this reading came from.
    pub confidence: f64,
    /// Whether `tune_score` reaches the configured in-tune threshold.
    pub in_tune: bool,
}

impl TuningReading {
    /// Tune score clamped to `[0, 1]`, for meters and progress bars.
    pub fn display_score(&self) -> f64 {
        self.tune_score.clamp(0.0, 1.0)
    }

    /// Cents-off rounded to a whole cent.
    pub fn rounded_cents(&self) -> i64 {
        self.cents_off.round() as i64
    }
}

/// Outcome of analyzing one window.
#[derive(Debug, Clone, PartialEq)]
pub enum Analysis {
    Reading(TuningReading),
    /// Low confidence or unresolvable pitch. Callers keep their last reading.
    NoReading,
}

impl Analysis {
    pub fn reading(self) -> Option<TuningReading> {
        match self {
            Analysis::Reading(reading) => Some(reading),
            Analysis::NoReading => None,
        }
    }
}

/// Default minimum estimator confidence for a window to produce a reading.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.95;
/// Default tune score at or above which a reading counts as in tune.
pub const DEFAULT_IN_TUNE_THRESHOLD: f64 = 0.5;
/// Default number of decimals the frequency is rounded to.
pub const DEFAULT_FREQUENCY_DECIMALS: u32 = 2;
/// Most decimals the frequency may be rounded to.
pub const MAX_FREQUENCY_DECIMALS: u32 = 6;

/// Stateless window analyzer carrying the gating and rounding policy.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningAnalyzer {
    confidence_threshold: f64,
    in_tune_threshold: f64,
    frequency_decimals: u32,
}

impl Default for TuningAnalyzer {
    fn default() -> Self {
        Self::new(
            DEFAULT_CONFIDENCE_THRESHOLD,
            DEFAULT_IN_TUNE_THRESHOLD,
            DEFAULT_FREQUENCY_DECIMALS,
        )
    }
}

impl TuningAnalyzer {
    /// `frequency_decimals` is capped at [`MAX_FREQUENCY_DECIMALS`].
    pub fn new(confidence_threshold: f64, in_tune_threshold: f64, frequency_decimals: u32) -> Self {
        Self {
            confidence_threshold,
            in_tune_threshold,
            frequency_decimals: frequency_decimals.min(MAX_FREQUENCY_DECIMALS),
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    pub fn in_tune_threshold(&self) -> f64 {
        self.in_tune_threshold
    }

    pub fn frequency_decimals(&self) -> u32 {
        self.frequency_decimals
    }

    /// Analyzes a single window.
    ///
    /// Never fails: estimator or resolver trouble on one window becomes
    /// `NoReading` so a single bad window cannot stop the loop.
    pub fn analyze(
        &self,
        window: &SampleWindow,
        estimator: &mut dyn PitchEstimator,
        resolver: &dyn NoteResolver,
    ) -> Analysis {
        let Some(estimate) = estimator.estimate(&window.samples, window.sample_rate) else {
            return Analysis::NoReading;
        };

        // NaN confidence falls through to NoReading as well.
        if !(estimate.confidence >= self.confidence_threshold) {
            return Analysis::NoReading;
        }

        let frequency = round_to(estimate.frequency_hz, self.frequency_decimals);
        let Some(note) = resolver.resolve(frequency) else {
            log::debug!("[ANALYZER] No note for {:.2} Hz", frequency);
            return Analysis::NoReading;
        };
        if !note.frequency.is_finite() || note.frequency <= 0.0 {
            return Analysis::NoReading;
        }

        let cents_off = tuning::calculate_cents_deviation(frequency, note.frequency);
        let tune_score = tuning::tune_score(cents_off);
        Analysis::Reading(TuningReading {
            frequency_hz: frequency,
            note_name: note.name,
            note_frequency_hz: note.frequency,
            cents_off,
            tune_score,
            confidence: estimate.confidence,
            in_tune: tune_score >= self.in_tune_threshold,
        })
    }
}

/// Rounds half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(decimals as i32);
    (value * factor).round() / factor
}
