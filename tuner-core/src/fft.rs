//! # Fast Fourier Transform (FFT) Module
//!
//! FFT-backed helpers for the pitch estimators. The autocorrelation of a
//! window is computed in the frequency domain (Wiener-Khinchin), which keeps
//! a 2048-sample window well inside one 40 ms analysis cycle.
//!
//! ## Features
//! - High-performance FFT using RustFFT
//! - DC offset removal before analysis
//! - Planned transforms reused across windows of the same length

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Removes the DC offset from a signal by making its average value zero.
///
/// A constant bias inflates every autocorrelation lag equally and hides the
/// periodic structure the estimators look for.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Root-mean-square level of a signal.
pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

/// Linear autocorrelation via zero-padded FFT.
///
/// Plans are created for one window length and rebuilt only when a window of
/// a different length arrives.
pub struct Autocorrelator {
    input_len: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
}

impl Autocorrelator {
    /// Creates an autocorrelator for windows of `input_len` samples.
    pub fn new(input_len: usize) -> Self {
        // Padding to at least 2N keeps the circular correlation from wrapping.
        let fft_len = (2 * input_len.max(1)).next_power_of_two();
        let mut planner = FftPlanner::new();
        Self {
            input_len,
            forward: planner.plan_fft_forward(fft_len),
            inverse: planner.plan_fft_inverse(fft_len),
            buffer: vec![Complex { re: 0.0, im: 0.0 }; fft_len],
        }
    }

    pub fn input_len(&self) -> usize {
        self.input_len
    }

    /// Returns `r(tau) = sum_j x[j] * x[j + tau]` for `tau` in `0..signal.len()`.
    pub fn autocorrelate(&mut self, signal: &[f32]) -> Vec<f32> {
        if signal.len() != self.input_len {
            *self = Self::new(signal.len());
        }

        let fft_len = self.buffer.len();
        for (slot, &sample) in self.buffer.iter_mut().zip(signal.iter()) {
            *slot = Complex { re: sample, im: 0.0 };
        }
        for slot in self.buffer.iter_mut().skip(signal.len()) {
            *slot = Complex { re: 0.0, im: 0.0 };
        }

        self.forward.process(&mut self.buffer);
        for bin in self.buffer.iter_mut() {
            // Power spectrum: X * conj(X)
            *bin = Complex { re: bin.norm_sqr(), im: 0.0 };
        }
        self.inverse.process(&mut self.buffer);

        // RustFFT does not normalize the inverse transform.
        let scale = 1.0 / fft_len as f32;
        self.buffer
            .iter()
            .take(signal.len())
            .map(|c| c.re * scale)
            .collect()
    }
}
