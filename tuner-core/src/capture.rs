//! # Capture Session Module
//!
//! A [`CaptureSession`] owns exactly one open input stream bound to one
//! device and hands out fixed-size [`SampleWindow`]s on demand. Window length
//! and sample rate are fixed when the stream opens and never change for the
//! life of the session.
//!
//! Sessions release their stream and their claim on the device when dropped,
//! so every exit path of the analysis loop (stop, fatal error, panic unwind)
//! frees the hardware.

use crossbeam_channel::{Receiver, select};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Result, TunerError};

/// Shape of the windows a stream produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Number of mono samples per window.
    pub window_size: usize,
}

/// One window of mono samples, consumed by a single analysis cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleWindow {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Unrecoverable conditions reported by a capture backend.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFault {
    /// The device was unplugged or otherwise vanished.
    DeviceLost,
    /// Any other backend failure.
    Backend(String),
}

/// Either a full window of samples or a fault from the backend.
pub type Frame = std::result::Result<Vec<f32>, StreamFault>;

/// An open input stream as delivered by a capture provider.
pub trait CaptureStream: Send {
    /// Sample rate and window length, fixed at open time.
    fn format(&self) -> StreamFormat;

    /// Channel on which the backend delivers windows and faults.
    fn frames(&self) -> &Receiver<Frame>;

    /// Stops the stream and releases the hardware. Must be idempotent.
    fn close(&mut self);
}

/// Options a provider uses when opening a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    /// Mono samples per window.
    pub window_size: usize,
    /// Sample rate to ask the backend for; it may pick the closest supported.
    pub preferred_sample_rate: u32,
    /// Longest wait for one window before the session is declared stalled.
    pub window_timeout: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            window_size: 2048,
            preferred_sample_rate: 44_100,
            window_timeout: Duration::from_millis(2000),
        }
    }
}

/// Tracks which devices currently have an open session.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    busy: Arc<Mutex<HashSet<String>>>,
}

impl DeviceRegistry {
    /// Marks `device_id` busy, failing with `DeviceBusy` if it already is.
    pub fn claim(&self, device_id: &str) -> Result<DeviceClaim> {
        let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        if !busy.insert(device_id.to_string()) {
            return Err(TunerError::DeviceBusy(device_id.to_string()));
        }
        Ok(DeviceClaim {
            registry: self.clone(),
            device_id: device_id.to_string(),
        })
    }

    pub fn is_busy(&self, device_id: &str) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(device_id)
    }
}

/// Guard for a claimed device; dropping it frees the device.
#[derive(Debug)]
pub struct DeviceClaim {
    registry: DeviceRegistry,
    device_id: String,
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        self.registry
            .busy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.device_id);
    }
}

/// One open, device-bound capture stream.
pub struct CaptureSession {
    device_id: String,
    stream: Box<dyn CaptureStream>,
    format: StreamFormat,
    window_timeout: Duration,
    claim: Option<DeviceClaim>,
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("device_id", &self.device_id)
            .field("format", &self.format)
            .field("open", &self.is_open())
            .finish()
    }
}

impl CaptureSession {
    /// Wraps an already opened stream. The claim keeps the device marked busy
    /// until the session is closed.
    pub fn new(
        device_id: impl Into<String>,
        stream: Box<dyn CaptureStream>,
        claim: DeviceClaim,
        window_timeout: Duration,
    ) -> Self {
        let device_id = device_id.into();
        let format = stream.format();
        log::info!(
            "[CAPTURE] Session opened on {} ({} Hz, {} samples/window)",
            device_id,
            format.sample_rate,
            format.window_size
        );
        Self {
            device_id,
            stream,
            format,
            window_timeout,
            claim: Some(claim),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn is_open(&self) -> bool {
        self.claim.is_some()
    }

    /// Blocks until a full window is available.
    ///
    /// Fails with `CaptureStalled` if nothing arrives within the window
    /// timeout, or with the stream's fault if the backend reports one.
    pub fn next_window(&mut self) -> Result<SampleWindow> {
        let (_never_tx, never) = crossbeam_channel::bounded::<()>(0);
        match self.next_window_or_cancel(&never)? {
            Some(window) => Ok(window),
            None => Err(self.closed_error()),
        }
    }

    /// Like [`next_window`](Self::next_window), but returns `Ok(None)` as soon
    /// as a message (or disconnect) arrives on `cancel`.
    pub fn next_window_or_cancel(&mut self, cancel: &Receiver<()>) -> Result<Option<SampleWindow>> {
        if !self.is_open() {
            return Err(self.closed_error());
        }

        let frames = self.stream.frames();
        let first = select! {
            recv(cancel) -> _ => return Ok(None),
            recv(frames) -> frame => match frame {
                Ok(frame) => frame,
                Err(_) => return Err(self.closed_error()),
            },
            default(self.window_timeout) => {
                return Err(TunerError::CaptureStalled {
                    device: self.device_id.clone(),
                    waited: self.window_timeout,
                });
            }
        };

        // Skip windows that queued up while the loop was waiting; only the
        // most recent one reflects what is being played now.
        let mut latest = first;
        while latest.is_ok() {
            match frames.try_recv() {
                Ok(frame) => latest = frame,
                Err(_) => break,
            }
        }

        let samples = latest.map_err(|fault| self.fault_error(fault))?;
        if samples.len() != self.format.window_size {
            return Err(TunerError::StreamFailed {
                device: self.device_id.clone(),
                reason: format!(
                    "window of {} samples, expected {}",
                    samples.len(),
                    self.format.window_size
                ),
            });
        }

        Ok(Some(SampleWindow {
            samples,
            sample_rate: self.format.sample_rate,
        }))
    }

    /// Stops the stream and frees the device. Safe to call more than once.
    pub fn close(&mut self) {
        if self.claim.is_none() {
            return;
        }
        self.stream.close();
        self.claim = None;
        log::info!("[CAPTURE] Session on {} closed", self.device_id);
    }

    fn fault_error(&self, fault: StreamFault) -> TunerError {
        match fault {
            StreamFault::DeviceLost => TunerError::DeviceUnavailable(self.device_id.clone()),
            StreamFault::Backend(reason) => TunerError::StreamFailed {
                device: self.device_id.clone(),
                reason,
            },
        }
    }

    fn closed_error(&self) -> TunerError {
        TunerError::StreamFailed {
            device: self.device_id.clone(),
            reason: "stream closed".to_string(),
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}
