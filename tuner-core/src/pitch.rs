//! # Pitch Detection Module
//!
//! Estimates the fundamental frequency of a single sample window together
//! with a confidence score in `[0, 1]`. Estimators are pluggable through
//! [`PitchEstimator`]; the analyzer never looks inside them.
//!
//! ## Features
//! - McLeod Pitch Method (normalized square difference), reporting clarity
//! - YIN with noise gate and octave error prevention
//! - Parabolic interpolation for sub-sample accuracy

use serde::{Deserialize, Serialize};

use crate::fft::{self, Autocorrelator};

/// A single frequency estimate for one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    /// Estimated fundamental in Hz.
    pub frequency_hz: f64,
    /// Estimator certainty in `[0, 1]`.
    pub confidence: f64,
}

/// Turns a window of samples into a frequency estimate.
///
/// Returning `None` means the estimator could not produce anything for this
/// window (silence, too short, numerical failure). It is absorbed by the
/// analyzer as a no-reading cycle.
pub trait PitchEstimator: Send {
    fn estimate(&mut self, samples: &[f32], sample_rate: u32) -> Option<PitchEstimate>;
}

/// Which built-in estimator to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    #[default]
    McLeod,
    Yin,
}

impl EstimatorKind {
    /// Builds a boxed estimator sized for `window_size` samples.
    pub fn build(self, window_size: usize) -> Box<dyn PitchEstimator> {
        match self {
            EstimatorKind::McLeod => Box::new(McLeodEstimator::new(window_size)),
            EstimatorKind::Yin => Box::new(YinEstimator::default()),
        }
    }
}

/// Fraction of the highest NSDF key maximum a peak must reach to be chosen.
const MCLEOD_PEAK_CUTOFF: f32 = 0.9;

/// McLeod Pitch Method estimator.
///
/// The confidence it reports is the clarity of the chosen period: the
/// interpolated height of the normalized square difference peak.
pub struct McLeodEstimator {
    autocorrelator: Autocorrelator,
}

impl McLeodEstimator {
    pub fn new(window_size: usize) -> Self {
        Self {
            autocorrelator: Autocorrelator::new(window_size),
        }
    }

    /// Normalized square difference function of a DC-free signal.
    fn nsdf(&mut self, signal: &[f32]) -> Option<Vec<f32>> {
        let r = self.autocorrelator.autocorrelate(signal);
        let n = signal.len();
        let mut m = 2.0 * r[0];
        if m <= f32::EPSILON {
            return None;
        }

        let mut nsdf = vec![0.0; n];
        nsdf[0] = 1.0;
        for tau in 1..n {
            m -= signal[tau - 1] * signal[tau - 1] + signal[n - tau] * signal[n - tau];
            nsdf[tau] = if m > f32::EPSILON { 2.0 * r[tau] / m } else { 0.0 };
        }
        Some(nsdf)
    }
}

impl PitchEstimator for McLeodEstimator {
    fn estimate(&mut self, samples: &[f32], sample_rate: u32) -> Option<PitchEstimate> {
        if samples.len() < 4 || sample_rate == 0 {
            return None;
        }

        let mut signal = samples.to_vec();
        fft::remove_dc_offset(&mut signal);
        let nsdf = self.nsdf(&signal)?;

        // Lags past half the window are backed by too few samples to trust.
        let maxima = key_maxima(&nsdf[..nsdf.len() / 2]);
        let highest = maxima
            .iter()
            .map(|&tau| nsdf[tau])
            .fold(f32::NEG_INFINITY, f32::max);
        let cutoff = MCLEOD_PEAK_CUTOFF * highest;
        let tau = *maxima.iter().find(|&&tau| nsdf[tau] >= cutoff)?;

        let (period, clarity) = parabolic_peak(&nsdf, tau);
        let frequency = sample_rate as f64 / period as f64;
        if !frequency.is_finite() || frequency <= 0.0 {
            return None;
        }

        Some(PitchEstimate {
            frequency_hz: frequency,
            confidence: clarity.clamp(0.0, 1.0) as f64,
        })
    }
}

/// Finds the highest local maximum within each positive lobe of the NSDF,
/// skipping the lobe around lag zero.
fn key_maxima(nsdf: &[f32]) -> Vec<usize> {
    let len = nsdf.len();
    let mut maxima = Vec::new();
    let mut pos = 0;

    while pos < (len - 1) / 3 && nsdf[pos] > 0.0 {
        pos += 1;
    }
    while pos < len - 1 && nsdf[pos] <= 0.0 {
        pos += 1;
    }
    pos = pos.max(1);

    let mut current: Option<usize> = None;
    while pos < len - 1 {
        if nsdf[pos] > nsdf[pos - 1] && nsdf[pos] >= nsdf[pos + 1] {
            if current.is_none_or(|best| nsdf[pos] > nsdf[best]) {
                current = Some(pos);
            }
        }
        pos += 1;
        if pos < len - 1 && nsdf[pos] <= 0.0 {
            if let Some(best) = current.take() {
                maxima.push(best);
            }
            while pos < len - 1 && nsdf[pos] <= 0.0 {
                pos += 1;
            }
        }
    }
    if let Some(best) = current {
        maxima.push(best);
    }
    maxima
}

/// Fits a parabola through `values[tau - 1..=tau + 1]` and returns the
/// interpolated position and height of its vertex.
fn parabolic_peak(values: &[f32], tau: usize) -> (f32, f32) {
    if tau == 0 || tau + 1 >= values.len() {
        return (tau as f32, values[tau]);
    }
    let y1 = values[tau - 1];
    let y2 = values[tau];
    let y3 = values[tau + 1];
    let denominator = y1 - 2.0 * y2 + y3;
    if denominator == 0.0 {
        return (tau as f32, y2);
    }
    let shift = (y1 - y3) / (2.0 * denominator);
    (tau as f32 + shift, y2 - 0.25 * (y1 - y3) * shift)
}

/// Minimum RMS level a window needs before YIN attempts detection.
const YIN_AMPLITUDE_THRESHOLD: f32 = 0.01;
/// A dip deeper than this is required for a clear tone.
const YIN_CLARITY_THRESHOLD: f32 = 0.1;

/// YIN estimator. Confidence is `1 - d'(period)`, where `d'` is the
/// cumulative mean normalized difference at the chosen period.
#[derive(Debug, Clone)]
pub struct YinEstimator {
    amplitude_threshold: f32,
}

impl Default for YinEstimator {
    fn default() -> Self {
        Self::new(YIN_AMPLITUDE_THRESHOLD)
    }
}

impl YinEstimator {
    pub fn new(amplitude_threshold: f32) -> Self {
        Self { amplitude_threshold }
    }
}

impl PitchEstimator for YinEstimator {
    fn estimate(&mut self, signal: &[f32], sample_rate: u32) -> Option<PitchEstimate> {
        let half = signal.len() / 2;
        if half < 3 || sample_rate == 0 {
            return None;
        }

        // Noise gate: filter out silence.
        if fft::rms(signal) < self.amplitude_threshold {
            return None;
        }

        // Difference function.
        let mut yin_buffer = vec![0.0_f32; half];
        for tau in 1..half {
            let mut diff = 0.0;
            for i in 0..half {
                let delta = signal[i] - signal[i + tau];
                diff += delta * delta;
            }
            yin_buffer[tau] = diff;
        }

        // Cumulative mean normalized difference.
        let mut running_sum = 0.0;
        yin_buffer[0] = 1.0;
        for tau in 1..half {
            running_sum += yin_buffer[tau];
            if running_sum != 0.0 {
                yin_buffer[tau] *= tau as f32 / running_sum;
            } else {
                yin_buffer[tau] = 1.0;
            }
        }

        // First significant dip, to avoid octave errors.
        let min_val = yin_buffer
            .iter()
            .skip(1)
            .cloned()
            .fold(f32::INFINITY, f32::min);
        let threshold = min_val + 0.05;

        let mut period = (2..half)
            .find(|&tau| yin_buffer[tau] < threshold && yin_buffer[tau] < yin_buffer[tau - 1])?;
        while period + 1 < half && yin_buffer[period + 1] < yin_buffer[period] {
            period += 1;
        }

        if yin_buffer[period] > YIN_CLARITY_THRESHOLD || period + 1 >= half {
            return None;
        }

        let (period_float, _) = parabolic_peak(&yin_buffer, period);
        let frequency = sample_rate as f64 / period_float as f64;

        // Only valid, audible frequencies.
        if frequency.is_finite() && frequency > 20.0 {
            Some(PitchEstimate {
                frequency_hz: frequency,
                confidence: (1.0 - yin_buffer[period]).clamp(0.0, 1.0) as f64,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 44_100;
    const WINDOW: usize = 2048;

    fn sine(freq: f32, amplitude: f32) -> Vec<f32> {
        (0..WINDOW)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE as f32).sin()
            })
            .collect()
    }

    fn noise() -> Vec<f32> {
        let mut state: u32 = 0x1234_5678;
        (0..WINDOW)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn mcleod_finds_a440_with_high_clarity() {
        let mut estimator = McLeodEstimator::new(WINDOW);
        let estimate = estimator.estimate(&sine(440.0, 0.5), SAMPLE_RATE).unwrap();
        assert!((estimate.frequency_hz - 440.0).abs() < 1.0, "{estimate:?}");
        assert!(estimate.confidence > 0.95, "{estimate:?}");
    }

    #[test]
    fn mcleod_tracks_low_strings() {
        let mut estimator = McLeodEstimator::new(WINDOW);
        let estimate = estimator.estimate(&sine(110.0, 0.5), SAMPLE_RATE).unwrap();
        assert!((estimate.frequency_hz - 110.0).abs() < 0.5, "{estimate:?}");
    }

    #[test]
    fn mcleod_rejects_silence() {
        let mut estimator = McLeodEstimator::new(WINDOW);
        assert!(estimator.estimate(&vec![0.0; WINDOW], SAMPLE_RATE).is_none());
    }

    #[test]
    fn mcleod_noise_is_not_confident() {
        let mut estimator = McLeodEstimator::new(WINDOW);
        let estimate = estimator.estimate(&noise(), SAMPLE_RATE);
        assert!(estimate.is_none_or(|e| e.confidence < 0.95), "{estimate:?}");
    }

    #[test]
    fn yin_finds_a440() {
        let mut estimator = YinEstimator::default();
        let estimate = estimator.estimate(&sine(440.0, 0.5), SAMPLE_RATE).unwrap();
        assert!((estimate.frequency_hz - 440.0).abs() < 2.0, "{estimate:?}");
        assert!(estimate.confidence > 0.9);
    }

    #[test]
    fn yin_gates_quiet_input() {
        let mut estimator = YinEstimator::default();
        assert!(estimator.estimate(&sine(440.0, 0.001), SAMPLE_RATE).is_none());
    }

    #[test]
    fn short_windows_are_rejected() {
        assert!(McLeodEstimator::new(2).estimate(&[0.1, 0.2], SAMPLE_RATE).is_none());
        assert!(YinEstimator::default().estimate(&[0.1, 0.2], SAMPLE_RATE).is_none());
    }
}
