//! # Audio Capture Module
//!
//! [`CpalProvider`] implements [`CaptureProvider`] on top of CPAL
//! (Cross-Platform Audio Library).
//!
//! `cpal::Stream` is not `Send` on every platform, so each opened stream
//! lives on its own owner thread. The thread builds and plays the stream,
//! then parks on a shutdown channel; [`CpalStream::close`] signals it and
//! waits for the stream to be paused and dropped.
//!
//! ## Features
//! - Device enumeration with host-qualified ids
//! - Closest supported sample rate to the configured one
//! - Interleaved input down-mixed to mono
//! - Fixed-size windows assembled in the audio callback

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfigRange};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::capture::{CaptureOptions, CaptureStream, Frame, StreamFault, StreamFormat};
use crate::device::{AccessStatus, CaptureProvider, InputDevice};
use crate::error::{Result, TunerError};

/// Windows queued between the audio callback and the analysis loop.
/// The session always takes the newest, so a short queue is enough. The last
/// slot only ever holds a stream fault.
const FRAME_QUEUE: usize = 4;

/// How long `open_stream` waits for the owner thread to report back.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Capture provider backed by the default CPAL host.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalProvider;

impl CpalProvider {
    pub fn new() -> Self {
        Self
    }
}

/// Builds the stable id for a device: the host name plus the device name.
fn device_id(host: &cpal::Host, name: &str) -> String {
    format!("{}:{}", host.id().name(), name)
}

/// Finds the input device whose id matches `id`.
fn find_device(host: &cpal::Host, id: &str) -> Option<cpal::Device> {
    host.input_devices()
        .ok()?
        .find(|d| d.name().is_ok_and(|name| device_id(host, &name) == id))
}

impl CaptureProvider for CpalProvider {
    fn enumerate_devices(&self) -> Result<Vec<InputDevice>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| TunerError::Enumeration(e.to_string()))?;

        Ok(devices
            .filter_map(|device| device.name().ok())
            .map(|name| InputDevice {
                id: device_id(&host, &name),
                label: name,
            })
            .collect())
    }

    /// Desktop hosts have no separate permission query; access is only known
    /// once a device has been opened.
    fn access_status(&self) -> AccessStatus {
        AccessStatus::Prompt
    }

    /// Queries the default input device. On platforms that gate microphone
    /// access this is where the OS prompt appears.
    fn request_access(&self) -> AccessStatus {
        let host = cpal::default_host();
        let Some(device) = host.default_input_device() else {
            log::warn!("[CAPTURE] No default input device to check");
            return AccessStatus::Denied;
        };
        match device.default_input_config() {
            Ok(_) => AccessStatus::Granted,
            Err(e) => {
                log::warn!("[CAPTURE] Input access refused: {}", e);
                AccessStatus::Denied
            }
        }
    }

    fn open_stream(
        &self,
        device_id: &str,
        options: &CaptureOptions,
    ) -> Result<Box<dyn CaptureStream>> {
        Ok(Box::new(CpalStream::open(device_id, options)?))
    }
}

/// A running CPAL input stream owned by a dedicated thread.
pub struct CpalStream {
    format: StreamFormat,
    frames: Receiver<Frame>,
    shutdown_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn open(device_id: &str, options: &CaptureOptions) -> Result<Self> {
        let (frame_tx, frame_rx) = crossbeam_channel::bounded::<Frame>(FRAME_QUEUE);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<StreamFormat>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let id = device_id.to_string();
        let window_size = options.window_size;
        let preferred_rate = options.preferred_sample_rate;
        let thread = thread::spawn(move || {
            let (stream, format) = match build_stream(&id, window_size, preferred_rate, frame_tx) {
                Ok(built) => built,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(format));

            // Park until the session closes (or the handle is dropped).
            let _ = shutdown_rx.recv();

            if let Err(e) = stream.pause() {
                log::warn!("[CAPTURE] Error pausing stream on {}: {}", id, e);
            }
            drop(stream);
            log::debug!("[CAPTURE] Stream thread for {} finished", id);
        });

        let format = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = shutdown_tx.send(());
                return Err(TunerError::StreamFailed {
                    device: device_id.to_string(),
                    reason: "timed out opening stream".to_string(),
                });
            }
        };

        Ok(Self {
            format,
            frames: frame_rx,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

impl CaptureStream for CpalStream {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn frames(&self) -> &Receiver<Frame> {
        &self.frames
    }

    fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[CAPTURE] Stream thread panicked");
            }
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens and starts the input stream. Runs on the stream's owner thread.
fn build_stream(
    device_id: &str,
    window_size: usize,
    preferred_rate: u32,
    frame_tx: Sender<Frame>,
) -> Result<(cpal::Stream, StreamFormat)> {
    let host = cpal::default_host();
    let device = find_device(&host, device_id)
        .ok_or_else(|| TunerError::DeviceUnavailable(device_id.to_string()))?;
    let stream_failed = |reason: String| TunerError::StreamFailed {
        device: device_id.to_string(),
        reason,
    };

    let configs = device
        .supported_input_configs()
        .map_err(|e| stream_failed(e.to_string()))?
        .collect::<Vec<_>>();
    let supported = find_supported_config(configs, preferred_rate)
        .ok_or_else(|| stream_failed("no f32 input format".to_string()))?;

    let rate = preferred_rate.clamp(supported.min_sample_rate().0, supported.max_sample_rate().0);
    let config: cpal::StreamConfig = supported.with_sample_rate(cpal::SampleRate(rate)).into();
    let channels = config.channels.max(1) as usize;
    log::info!(
        "[CAPTURE] Opening {} at {} Hz, {} channel(s)",
        device_id,
        rate,
        channels
    );

    let error_tx = frame_tx.clone();
    let mut window = Vec::with_capacity(window_size * 2);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Down-mix each interleaved frame to mono.
                window.extend(
                    data.chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                );

                while window.len() >= window_size {
                    let frame: Vec<f32> = window.drain(..window_size).collect();
                    if !push_window(&frame_tx, frame) {
                        window.clear();
                        return;
                    }
                }
            },
            move |err: cpal::StreamError| {
                log::error!("[CAPTURE] Stream error: {}", err);
                let fault = match err {
                    cpal::StreamError::DeviceNotAvailable => StreamFault::DeviceLost,
                    other => StreamFault::Backend(other.to_string()),
                };
                push_fault(&error_tx, fault);
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                TunerError::DeviceUnavailable(device_id.to_string())
            }
            other => stream_failed(other.to_string()),
        })?;

    stream.play().map_err(|e| stream_failed(e.to_string()))?;

    Ok((
        stream,
        StreamFormat {
            sample_rate: rate,
            window_size,
        },
    ))
}

/// Queues a window unless only the fault slot is left. Dropping a window is
/// fine: the reader only wants the newest. Returns `false` once the reader
/// is gone.
fn push_window(tx: &Sender<Frame>, frame: Vec<f32>) -> bool {
    if tx.len() + 1 >= FRAME_QUEUE {
        return true;
    }
    !matches!(tx.try_send(Ok(frame)), Err(TrySendError::Disconnected(_)))
}

/// Queues a stream fault into the slot windows never take.
fn push_fault(tx: &Sender<Frame>, fault: StreamFault) {
    if let Err(TrySendError::Full(_)) = tx.try_send(Err(fault)) {
        log::debug!("[CAPTURE] Earlier fault still pending; dropping this one");
    }
}

/// Picks the best supported configuration for the target sample rate.
///
/// Only 32-bit float formats qualify. Fewer channels win first (mono is
/// ideal), then the range closest to `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .min_by_key(|c| {
            let rate_diff = if (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&target_rate) {
                0
            } else {
                let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
                let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
                min_diff.min(max_diff)
            };
            (c.channels(), rate_diff)
        })
}
