//! Fakes shared by the unit tests: a scripted capture stream, a scripted
//! capture provider and deterministic estimator/resolver stand-ins.

use crossbeam_channel::{Receiver, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::capture::{CaptureOptions, CaptureStream, Frame, StreamFormat};
use crate::device::{AccessStatus, CaptureProvider, InputDevice};
use crate::error::{Result, TunerError};
use crate::pitch::{PitchEstimate, PitchEstimator};
use crate::tuning::{EqualTemperament, NoteResolver};

/// A stream whose frames are pushed by the test through a channel.
pub struct ScriptedStream {
    format: StreamFormat,
    frames: Receiver<Frame>,
    closed: Arc<AtomicBool>,
}

impl ScriptedStream {
    pub fn new(sample_rate: u32, window_size: usize) -> (Self, Sender<Frame>, Arc<AtomicBool>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let stream = Self {
            format: StreamFormat { sample_rate, window_size },
            frames: rx,
            closed: Arc::clone(&closed),
        };
        (stream, tx, closed)
    }

    /// A stream fed by a background thread every `period` until closed.
    pub fn continuous(
        sample_rate: u32,
        window_size: usize,
        period: Duration,
    ) -> (Self, Arc<AtomicBool>) {
        let (stream, tx, closed) = Self::new(sample_rate, window_size);
        let flag = Arc::clone(&closed);
        thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                if tx.send(Ok(vec![0.0; window_size])).is_err() {
                    break;
                }
                thread::sleep(period);
            }
        });
        (stream, closed)
    }
}

impl CaptureStream for ScriptedStream {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn frames(&self) -> &Receiver<Frame> {
        &self.frames
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A provider with a mutable device list and scripted access answers.
pub struct FakeProvider {
    pub devices: Mutex<Vec<InputDevice>>,
    pub status: Mutex<AccessStatus>,
    pub answer: Mutex<AccessStatus>,
    pub prompts: AtomicUsize,
    pub enumerations: AtomicUsize,
    pub opened: AtomicUsize,
    pub stream_closed: Mutex<Vec<Arc<AtomicBool>>>,
}

impl FakeProvider {
    pub fn new(devices: Vec<InputDevice>, status: AccessStatus, answer: AccessStatus) -> Self {
        Self {
            devices: Mutex::new(devices),
            status: Mutex::new(status),
            answer: Mutex::new(answer),
            prompts: AtomicUsize::new(0),
            enumerations: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            stream_closed: Mutex::new(Vec::new()),
        }
    }
}

impl CaptureProvider for FakeProvider {
    fn enumerate_devices(&self) -> Result<Vec<InputDevice>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.lock().unwrap().clone())
    }

    fn access_status(&self) -> AccessStatus {
        *self.status.lock().unwrap()
    }

    fn request_access(&self) -> AccessStatus {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let answer = *self.answer.lock().unwrap();
        *self.status.lock().unwrap() = answer;
        answer
    }

    fn open_stream(
        &self,
        device_id: &str,
        options: &CaptureOptions,
    ) -> Result<Box<dyn CaptureStream>> {
        if !self.devices.lock().unwrap().iter().any(|d| d.id == device_id) {
            return Err(TunerError::DeviceUnavailable(device_id.to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (stream, closed) =
            ScriptedStream::continuous(48_000, options.window_size, Duration::from_millis(2));
        self.stream_closed.lock().unwrap().push(closed);
        Ok(Box::new(stream))
    }
}

/// Returns scripted estimates in order, then repeats the last one.
pub struct ScriptedEstimator {
    script: VecDeque<Option<PitchEstimate>>,
    last: Option<PitchEstimate>,
}

impl ScriptedEstimator {
    pub fn new(script: Vec<Option<PitchEstimate>>) -> Self {
        Self {
            script: script.into(),
            last: None,
        }
    }

    pub fn constant(frequency_hz: f64, confidence: f64) -> Self {
        Self::new(vec![Some(PitchEstimate { frequency_hz, confidence })])
    }
}

impl PitchEstimator for ScriptedEstimator {
    fn estimate(&mut self, _samples: &[f32], _sample_rate: u32) -> Option<PitchEstimate> {
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        self.last
    }
}

pub fn resolver() -> Arc<dyn NoteResolver> {
    Arc::new(EqualTemperament::default())
}

pub fn device(id: &str, label: &str) -> InputDevice {
    InputDevice {
        id: id.to_string(),
        label: label.to_string(),
    }
}
