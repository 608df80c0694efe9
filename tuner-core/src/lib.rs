// tuner-core/src/lib.rs

//! The core logic for the instrument tuner.
//! This crate captures audio from an input device, estimates the pitch of
//! each window, and publishes how far the sound is from the nearest note.
//! It is completely headless and contains no presentation code.
//!
//! [`Tuner`] ties the pieces together: a [`DeviceManager`] for permission
//! and device selection, and an [`AnalysisScheduler`] running the analysis
//! loop on a background thread.

pub mod analyzer;
pub mod audio;
pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod fft;
pub mod pitch;
pub mod scheduler;
pub mod tuning;

#[cfg(test)]
mod test_support;

use crossbeam_channel::Receiver;
use std::sync::Arc;

pub use analyzer::{Analysis, TuningAnalyzer, TuningReading};
pub use capture::{CaptureOptions, CaptureSession, CaptureStream, SampleWindow, StreamFormat};
pub use config::TunerConfig;
pub use device::{AccessStatus, CaptureProvider, DeviceManager, InputDevice, PermissionState};
pub use error::{Result, TunerError};
pub use pitch::{EstimatorKind, PitchEstimate, PitchEstimator};
pub use scheduler::{AnalysisScheduler, SchedulerEvent, SchedulerHandle, SchedulerState, Snapshot};
pub use tuning::{EqualTemperament, Note, NoteResolver, NoteSpelling};

/// A tuner bound to one capture provider.
///
/// Holds the permission state, the device list, the selected device and a
/// single analysis loop slot.
pub struct Tuner {
    devices: DeviceManager,
    scheduler: AnalysisScheduler,
    resolver: Arc<dyn NoteResolver>,
    estimator: EstimatorKind,
    selected: Option<String>,
}

impl Tuner {
    pub fn new(provider: Arc<dyn CaptureProvider>, config: &TunerConfig) -> Self {
        let mut devices = DeviceManager::new(provider, config.capture_options());
        let scheduler = AnalysisScheduler::new(config.analyzer(), config.interval());

        // Published snapshots follow every permission transition.
        let handle = scheduler.handle();
        handle.set_permission(devices.permission());
        devices.on_permission_changed(move |state| handle.set_permission(state));

        Self {
            devices,
            scheduler,
            resolver: Arc::new(config.resolver()),
            estimator: config.estimator,
            selected: config.capture.device.clone(),
        }
    }

    pub fn permission(&self) -> PermissionState {
        self.devices.permission()
    }

    pub fn request_permission(&mut self) -> PermissionState {
        self.devices.request_permission()
    }

    pub fn refresh_permission(&mut self) -> PermissionState {
        self.devices.refresh_permission()
    }

    pub fn on_permission_changed<F>(&mut self, callback: F)
    where
        F: Fn(PermissionState) + Send + Sync + 'static,
    {
        self.devices.on_permission_changed(callback);
    }

    pub fn list_devices(&self) -> &[InputDevice] {
        self.devices.list_devices()
    }

    pub fn refresh_devices(&mut self) -> Result<&[InputDevice]> {
        self.devices.refresh_devices()
    }

    /// Remembers `device_id` for the next [`start`](Self::start).
    ///
    /// The id is not checked here; a device that is gone by the time the
    /// loop starts fails with `DeviceUnavailable` then.
    pub fn select_device(&mut self, device_id: impl Into<String>) {
        self.selected = Some(device_id.into());
    }

    pub fn selected_device(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Starts the analysis loop on the selected device with the configured
    /// estimator.
    ///
    /// Does nothing if a loop is already running.
    pub fn start(&mut self) -> Result<SchedulerHandle> {
        let window_size = self.devices.options().window_size;
        self.start_with(self.estimator.build(window_size))
    }

    /// Like [`start`](Self::start) but with a caller-supplied estimator.
    pub fn start_with(&mut self, estimator: Box<dyn PitchEstimator>) -> Result<SchedulerHandle> {
        let handle = self.scheduler.handle();
        if handle.is_running() {
            return Ok(handle);
        }
        let device_id = self.selected.clone().ok_or(TunerError::NoDeviceSelected)?;
        if self.devices.permission() != PermissionState::Granted {
            return Err(TunerError::PermissionDenied);
        }

        let session = self.devices.open_session(&device_id)?;
        Ok(self
            .scheduler
            .start(session, estimator, Arc::clone(&self.resolver)))
    }

    /// Stops the loop and releases its device. Harmless when idle.
    pub fn stop(&self) {
        self.scheduler.handle().stop();
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.scheduler.handle()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.scheduler.handle().snapshot()
    }

    pub fn subscribe(&self) -> Receiver<SchedulerEvent> {
        self.scheduler.handle().subscribe()
    }
}

impl Drop for Tuner {
    fn drop(&mut self) {
        self.stop();
    }
}
