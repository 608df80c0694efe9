//! # Error Types
//!
//! Failures that can end a capture session or prevent one from starting.
//! A low-confidence window is *not* an error; the analyzer reports it as
//! [`crate::analyzer::Analysis::NoReading`].

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the device manager, capture sessions and the scheduler.
///
/// The type is `Clone` so a fatal error can be handed to every observer of a
/// running loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TunerError {
    /// Capture permission is not currently granted.
    #[error("microphone permission has not been granted")]
    PermissionDenied,

    /// The requested device id is not (or no longer) present.
    #[error("input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A session is already open on this device.
    #[error("input device busy: {0}")]
    DeviceBusy(String),

    /// The stream delivered no full window within the allowed wait.
    #[error("capture stalled on {device}: no samples for {waited:?}")]
    CaptureStalled { device: String, waited: Duration },

    /// The capture backend reported an unrecoverable stream fault.
    #[error("capture stream failed on {device}: {reason}")]
    StreamFailed { device: String, reason: String },

    /// `start` was requested before any input device was selected.
    #[error("no input device selected")]
    NoDeviceSelected,

    /// The capture provider could not list its devices.
    #[error("failed to enumerate input devices: {0}")]
    Enumeration(String),
}

impl TunerError {
    /// Whether this error ends the current capture session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            TunerError::DeviceUnavailable(_)
                | TunerError::CaptureStalled { .. }
                | TunerError::StreamFailed { .. }
        )
    }
}

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, TunerError>;
