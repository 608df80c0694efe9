//! # Device and Permission Module
//!
//! [`DeviceManager`] is the state machine that decides whether capture may
//! happen at all and which devices are on offer. It owns the permission
//! state, the deduplicated device list, and the registry of devices that
//! currently have a session open.
//!
//! ```text
//! Unrequested ──user approves──▶ Granted
//!             ──user refuses───▶ Denied
//! Denied      ──host-level grant (refresh_permission)──▶ Granted
//! ```

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::capture::{CaptureOptions, CaptureSession, CaptureStream, DeviceRegistry};
use crate::error::{Result, TunerError};

/// An audio input as reported by the capture provider.
///
/// Identity is `id`. Labels can repeat across devices and are for display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputDevice {
    pub id: String,
    pub label: String,
}

/// Capture permission as tracked by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PermissionState {
    #[default]
    Unrequested,
    Granted,
    Denied,
}

impl PermissionState {
    pub fn label(&self) -> &'static str {
        match self {
            PermissionState::Unrequested => "Unrequested",
            PermissionState::Granted => "Granted",
            PermissionState::Denied => "Denied",
        }
    }
}

/// Permission status as reported by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    Granted,
    Denied,
    /// The host would ask the user if access were requested now.
    Prompt,
}

/// The host's audio capture facilities.
pub trait CaptureProvider: Send + Sync {
    /// Lists the input devices currently present.
    fn enumerate_devices(&self) -> Result<Vec<InputDevice>>;

    /// Queries the host permission without prompting.
    fn access_status(&self) -> AccessStatus;

    /// Prompts for access. Returns `Granted` or `Denied`.
    fn request_access(&self) -> AccessStatus;

    /// Opens a stream on `device_id` producing windows of `options.window_size`.
    fn open_stream(&self, device_id: &str, options: &CaptureOptions)
    -> Result<Box<dyn CaptureStream>>;
}

/// Callback invoked with the new state after every permission transition.
pub type PermissionCallback = Box<dyn Fn(PermissionState) + Send + Sync>;

/// Owns permission state and the input device list, and opens sessions.
pub struct DeviceManager {
    provider: Arc<dyn CaptureProvider>,
    options: CaptureOptions,
    permission: PermissionState,
    devices: Vec<InputDevice>,
    callbacks: Vec<PermissionCallback>,
    registry: DeviceRegistry,
}

impl DeviceManager {
    /// Creates a manager, inferring the initial permission from the host.
    ///
    /// A prior host-level grant starts the manager in `Granted` with the
    /// device list already populated.
    pub fn new(provider: Arc<dyn CaptureProvider>, options: CaptureOptions) -> Self {
        let permission = match provider.access_status() {
            AccessStatus::Granted => PermissionState::Granted,
            AccessStatus::Denied => PermissionState::Denied,
            AccessStatus::Prompt => PermissionState::Unrequested,
        };
        log::info!("[DEVICES] Initial permission state: {}", permission.label());

        let mut manager = Self {
            provider,
            options,
            permission,
            devices: Vec::new(),
            callbacks: Vec::new(),
            registry: DeviceRegistry::default(),
        };
        if permission == PermissionState::Granted {
            if let Err(e) = manager.refresh_devices() {
                log::warn!("[DEVICES] Initial device listing failed: {}", e);
            }
        }
        manager
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Asks for capture permission.
    ///
    /// Already granted: returns immediately. Denied: does not prompt again;
    /// the user has to grant access through the host (see
    /// [`refresh_permission`](Self::refresh_permission)).
    pub fn request_permission(&mut self) -> PermissionState {
        match self.permission {
            PermissionState::Granted => PermissionState::Granted,
            PermissionState::Denied => {
                log::warn!(
                    "[DEVICES] Permission previously denied; grant microphone access in system settings"
                );
                PermissionState::Denied
            }
            PermissionState::Unrequested => {
                let next = match self.provider.request_access() {
                    AccessStatus::Granted => PermissionState::Granted,
                    AccessStatus::Denied | AccessStatus::Prompt => PermissionState::Denied,
                };
                self.transition(next);
                self.permission
            }
        }
    }

    /// Re-reads the host permission status without prompting.
    ///
    /// Picks up a grant or revocation made out-of-band. A host still in
    /// "prompt" state leaves the current state alone.
    pub fn refresh_permission(&mut self) -> PermissionState {
        let next = match self.provider.access_status() {
            AccessStatus::Granted => PermissionState::Granted,
            AccessStatus::Denied => PermissionState::Denied,
            AccessStatus::Prompt => self.permission,
        };
        self.transition(next);
        self.permission
    }

    /// Registers a callback fired on every permission transition.
    pub fn on_permission_changed<F>(&mut self, callback: F)
    where
        F: Fn(PermissionState) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// The current device list, deduplicated by id.
    pub fn list_devices(&self) -> &[InputDevice] {
        &self.devices
    }

    /// Re-enumerates devices, e.g. after a hot-plug event.
    ///
    /// Without a grant the list is left empty: labels are generally not
    /// available before the user approves access.
    pub fn refresh_devices(&mut self) -> Result<&[InputDevice]> {
        if self.permission != PermissionState::Granted {
            self.devices.clear();
            return Ok(&self.devices);
        }
        let devices = self.provider.enumerate_devices()?;
        self.devices = dedup_by_id(devices);
        log::info!("[DEVICES] {} input device(s) available", self.devices.len());
        Ok(&self.devices)
    }

    /// Opens a capture session on `device_id`.
    ///
    /// Fails with `PermissionDenied` without a grant, `DeviceUnavailable` if
    /// the device is gone, and `DeviceBusy` if a session is already open on it.
    pub fn open_session(&self, device_id: &str) -> Result<CaptureSession> {
        if self.permission != PermissionState::Granted {
            return Err(TunerError::PermissionDenied);
        }
        let present = self
            .provider
            .enumerate_devices()?
            .iter()
            .any(|d| d.id == device_id);
        if !present {
            return Err(TunerError::DeviceUnavailable(device_id.to_string()));
        }

        let claim = self.registry.claim(device_id)?;
        let stream = self.provider.open_stream(device_id, &self.options)?;
        Ok(CaptureSession::new(
            device_id,
            stream,
            claim,
            self.options.window_timeout,
        ))
    }

    fn transition(&mut self, next: PermissionState) {
        if next == self.permission {
            return;
        }
        log::info!(
            "[DEVICES] Permission {} -> {}",
            self.permission.label(),
            next.label()
        );
        self.permission = next;

        if let Err(e) = self.refresh_devices() {
            log::warn!("[DEVICES] Device refresh after permission change failed: {}", e);
        }
        for callback in &self.callbacks {
            callback(next);
        }
    }
}

/// Keeps the first device seen for each id, in provider order.
fn dedup_by_id(devices: Vec<InputDevice>) -> Vec<InputDevice> {
    let mut seen = HashSet::new();
    devices
        .into_iter()
        .filter(|d| seen.insert(d.id.clone()))
        .collect()
}
