//! # Analysis Scheduler
//!
//! Drives the tuning loop on a dedicated thread:
//!
//! ```text
//! pull window ─▶ analyze ─▶ publish snapshot ─▶ wait interval ─┐
//!      ▲                                                       │
//!      └───────────────────────────────────────────────────────┘
//! ```
//!
//! At most one loop runs per scheduler. Calling [`AnalysisScheduler::start`]
//! while a loop is running is a no-op. [`SchedulerHandle::stop`] is
//! cooperative: the loop notices it at the next window wait or interval
//! wait, and `stop` returns only after the loop has exited and released its
//! session, so nothing is published afterwards.
//!
//! Readers get whole [`Snapshot`]s, either by polling
//! [`SchedulerHandle::snapshot`] or through a [`SchedulerEvent`] channel.

use crossbeam_channel::{Receiver, Sender, TrySendError, select};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::analyzer::{Analysis, TuningAnalyzer, TuningReading};
use crate::capture::CaptureSession;
use crate::device::PermissionState;
use crate::error::TunerError;
use crate::pitch::PitchEstimator;
use crate::tuning::NoteResolver;

/// Default pause between analysis cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(40);

/// Events buffered per subscriber. The last slot is kept for `Halted`, so a
/// backlogged subscriber misses cycles but never the end of the loop.
const SUBSCRIBER_CAPACITY: usize = 64;

/// Lifecycle of the analysis loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// The value published once per cycle.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Snapshot {
    /// Last known good reading. Survives no-reading cycles and restarts.
    pub reading: Option<TuningReading>,
    /// Whether `reading` was produced by the most recent cycle.
    pub fresh: bool,
    /// Whether the loop is running.
    pub running: bool,
    /// Capture permission as last reported to the scheduler.
    pub permission: PermissionState,
    /// Cycles completed since the scheduler was created.
    pub cycles: u64,
}

/// Notifications delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// One cycle completed.
    Cycle(Snapshot),
    /// The loop ended. `error` is set when a session fault stopped it.
    Halted { error: Option<TunerError> },
}

struct Shared {
    state: Mutex<SchedulerState>,
    snapshot: RwLock<Snapshot>,
    subscribers: Mutex<Vec<Sender<SchedulerEvent>>>,
    last_error: Mutex<Option<TunerError>>,
    stopping: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(SchedulerState::Idle),
            snapshot: RwLock::new(Snapshot::default()),
            subscribers: Mutex::new(Vec::new()),
            last_error: Mutex::new(None),
            stopping: AtomicBool::new(false),
        }
    }

    fn set_running(&self) {
        *lock(&self.state) = SchedulerState::Running;
        *lock(&self.last_error) = None;
        self.stopping.store(false, Ordering::SeqCst);
        self.snapshot.write().unwrap_or_else(|e| e.into_inner()).running = true;
    }

    /// Updates the snapshot as one value and hands a copy to subscribers.
    fn publish(&self, analysis: Analysis) {
        let snapshot = {
            let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
            snapshot.cycles += 1;
            match analysis {
                Analysis::Reading(reading) => {
                    snapshot.reading = Some(reading);
                    snapshot.fresh = true;
                }
                Analysis::NoReading => snapshot.fresh = false,
            }
            snapshot.clone()
        };

        lock(&self.subscribers).retain(|tx| {
            if tx.len() + 1 >= SUBSCRIBER_CAPACITY {
                return true;
            }
            !matches!(
                tx.try_send(SchedulerEvent::Cycle(snapshot.clone())),
                Err(TrySendError::Disconnected(_))
            )
        });
    }

    fn finish(&self, error: Option<TunerError>) {
        {
            let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
            snapshot.running = false;
            snapshot.fresh = false;
        }
        *lock(&self.last_error) = error.clone();
        *lock(&self.state) = SchedulerState::Stopped;

        let event = SchedulerEvent::Halted { error };
        lock(&self.subscribers).retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            // Only an earlier, still unread Halted can fill the reserved slot.
            Err(TrySendError::Full(_)) => {
                log::warn!("[SCHEDULER] Subscriber has not read the previous halt; skipping");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

struct Worker {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

/// Shared view of the scheduler's single loop slot.
///
/// Cheap to clone; every clone controls and observes the same loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    worker: Arc<Mutex<Option<Worker>>>,
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("state", &self.state())
            .finish()
    }
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *lock(&self.shared.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// A consistent copy of the latest published snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.shared
            .snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Records the capture permission carried by published snapshots.
    pub fn set_permission(&self, permission: PermissionState) {
        self.shared
            .snapshot
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .permission = permission;
    }

    /// The error that ended the most recent loop, if any.
    pub fn last_error(&self) -> Option<TunerError> {
        lock(&self.shared.last_error).clone()
    }

    /// Subscribes to per-cycle snapshots and the final halt notification.
    ///
    /// The channel is bounded; a subscriber that falls behind misses cycles
    /// rather than growing memory. The `Halted` event is always delivered.
    pub fn subscribe(&self) -> Receiver<SchedulerEvent> {
        let (tx, rx) = crossbeam_channel::bounded(SUBSCRIBER_CAPACITY);
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    /// Stops the loop and waits for it to release its session.
    ///
    /// After this returns no further window is pulled and no further cycle
    /// is published. Calling it on an idle or stopped loop does nothing.
    pub fn stop(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        self.shared.stopping.store(true, Ordering::SeqCst);
        let _ = worker.stop_tx.try_send(());

        if worker.thread.thread().id() == thread::current().id() {
            return;
        }
        if worker.thread.join().is_err() {
            log::error!("[SCHEDULER] Analysis thread panicked during shutdown");
            self.shared.finish(None);
        }
    }
}

/// Owns the analysis policy and the single loop slot.
pub struct AnalysisScheduler {
    analyzer: TuningAnalyzer,
    interval: Duration,
    handle: SchedulerHandle,
}

impl AnalysisScheduler {
    pub fn new(analyzer: TuningAnalyzer, interval: Duration) -> Self {
        Self {
            analyzer,
            interval,
            handle: SchedulerHandle {
                shared: Arc::new(Shared::new()),
                worker: Arc::new(Mutex::new(None)),
            },
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts the loop on `session`.
    ///
    /// If a loop is already running this does nothing except close the
    /// `session` it was given; the running loop keeps its own session.
    pub fn start(
        &self,
        session: CaptureSession,
        estimator: Box<dyn PitchEstimator>,
        resolver: Arc<dyn NoteResolver>,
    ) -> SchedulerHandle {
        let mut slot = lock(&self.handle.worker);
        if self.handle.state() == SchedulerState::Running {
            log::debug!(
                "[SCHEDULER] Start ignored, loop already running; releasing {}",
                session.device_id()
            );
            return self.handle.clone();
        }

        // A loop that ended on its own has already finished; reap it.
        if let Some(previous) = slot.take() {
            let _ = previous.thread.join();
        }

        self.handle.shared.set_running();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let job = LoopJob {
            session,
            estimator,
            resolver,
            analyzer: self.analyzer.clone(),
            interval: self.interval,
            stop_rx,
            shared: Arc::clone(&self.handle.shared),
        };
        let thread = thread::spawn(move || job.run());
        *slot = Some(Worker { stop_tx, thread });

        self.handle.clone()
    }
}

struct LoopJob {
    session: CaptureSession,
    estimator: Box<dyn PitchEstimator>,
    resolver: Arc<dyn NoteResolver>,
    analyzer: TuningAnalyzer,
    interval: Duration,
    stop_rx: Receiver<()>,
    shared: Arc<Shared>,
}

impl LoopJob {
    fn run(mut self) {
        log::info!(
            "[SCHEDULER] Analysis loop started on {} every {:?}",
            self.session.device_id(),
            self.interval
        );
        let error = self.cycle_until_stopped();

        self.session.close();
        match &error {
            Some(e) => log::error!("[SCHEDULER] Analysis loop halted: {}", e),
            None => log::info!("[SCHEDULER] Analysis loop stopped"),
        }
        self.shared.finish(error);
    }

    fn stop_requested(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    /// Runs cycles until stopped; returns the fatal error if one ended it.
    fn cycle_until_stopped(&mut self) -> Option<TunerError> {
        loop {
            if self.stop_requested() {
                return None;
            }

            let window = match self.session.next_window_or_cancel(&self.stop_rx) {
                Ok(Some(window)) => window,
                Ok(None) => return None,
                Err(e) => return Some(e),
            };

            let analyzer = &self.analyzer;
            let estimator = self.estimator.as_mut();
            let resolver = self.resolver.as_ref();
            let analysis = panic::catch_unwind(AssertUnwindSafe(|| {
                analyzer.analyze(&window, estimator, resolver)
            }))
            .unwrap_or_else(|_| {
                log::warn!("[SCHEDULER] Analysis panicked; treating window as no reading");
                Analysis::NoReading
            });
            drop(window);

            if self.stop_requested() {
                return None;
            }
            match &analysis {
                Analysis::Reading(r) => log::debug!(
                    "[SCHEDULER] {} {:.2} Hz ({:+.1} cents)",
                    r.note_name,
                    r.frequency_hz,
                    r.cents_off
                ),
                Analysis::NoReading => log::debug!("[SCHEDULER] No reading this cycle"),
            }
            self.shared.publish(analysis);

            select! {
                recv(self.stop_rx) -> _ => return None,
                default(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{DeviceRegistry, StreamFault};
    use crate::pitch::PitchEstimate;
    use crate::test_support::{ScriptedEstimator, ScriptedStream, resolver};
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(2);

    fn scheduler() -> AnalysisScheduler {
        AnalysisScheduler::new(TuningAnalyzer::default(), Duration::from_millis(1))
    }

    fn continuous_session(
        registry: &DeviceRegistry,
        id: &str,
    ) -> (CaptureSession, Arc<AtomicBool>) {
        let (stream, closed) = ScriptedStream::continuous(48_000, 64, Duration::from_millis(1));
        let claim = registry.claim(id).unwrap();
        let session = CaptureSession::new(id, Box::new(stream), claim, Duration::from_millis(500));
        (session, closed)
    }

    fn next_cycle(rx: &Receiver<SchedulerEvent>) -> Snapshot {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining).expect("no event in time") {
                SchedulerEvent::Cycle(snapshot) => return snapshot,
                SchedulerEvent::Halted { error } => panic!("halted early: {error:?}"),
            }
        }
    }

    fn wait_for_halt(rx: &Receiver<SchedulerEvent>) -> Option<TunerError> {
        loop {
            match rx.recv_timeout(WAIT).expect("loop did not halt") {
                SchedulerEvent::Halted { error } => return error,
                SchedulerEvent::Cycle(_) => continue,
            }
        }
    }

    #[test]
    fn publishes_readings_while_running() {
        let registry = DeviceRegistry::default();
        let scheduler = scheduler();
        let events = scheduler.handle().subscribe();
        assert_eq!(scheduler.handle().state(), SchedulerState::Idle);

        let (session, _) = continuous_session(&registry, "mic");
        let handle = scheduler.start(
            session,
            Box::new(ScriptedEstimator::constant(440.0, 0.97)),
            resolver(),
        );
        assert!(handle.is_running());

        let snapshot = next_cycle(&events);
        let reading = snapshot.reading.unwrap();
        assert_eq!(reading.note_name, "A4");
        assert_eq!(reading.tune_score, 1.0);
        assert!(snapshot.fresh && snapshot.running);
        handle.stop();
    }

    #[test]
    fn low_confidence_keeps_the_last_reading() {
        let registry = DeviceRegistry::default();
        let scheduler = scheduler();
        let events = scheduler.handle().subscribe();
        let (session, _) = continuous_session(&registry, "mic");
        let estimator = ScriptedEstimator::new(vec![
            Some(PitchEstimate { frequency_hz: 440.0, confidence: 0.97 }),
            Some(PitchEstimate { frequency_hz: 300.0, confidence: 0.80 }),
        ]);
        let handle = scheduler.start(session, Box::new(estimator), resolver());

        let first = next_cycle(&events);
        let second = next_cycle(&events);
        assert!(first.fresh);
        assert!(!second.fresh);
        assert_eq!(second.reading, first.reading);
        handle.stop();
        assert_eq!(handle.snapshot().reading, first.reading);
    }

    #[test]
    fn second_start_is_a_no_op() {
        let registry = DeviceRegistry::default();
        let scheduler = scheduler();
        let (first, first_closed) = continuous_session(&registry, "mic-a");
        let (second, second_closed) = continuous_session(&registry, "mic-b");

        let handle = scheduler.start(
            first,
            Box::new(ScriptedEstimator::constant(440.0, 0.97)),
            resolver(),
        );
        let again = scheduler.start(
            second,
            Box::new(ScriptedEstimator::constant(220.0, 0.97)),
            resolver(),
        );

        assert!(again.is_running());
        assert!(second_closed.load(Ordering::SeqCst));
        assert!(!registry.is_busy("mic-b"));
        assert!(!first_closed.load(Ordering::SeqCst));

        let events = handle.subscribe();
        for _ in 0..5 {
            let reading = next_cycle(&events).reading.unwrap();
            assert_eq!(reading.note_name, "A4");
        }
        handle.stop();
    }

    #[test]
    fn stop_releases_session_and_silences_publication() {
        let registry = DeviceRegistry::default();
        let scheduler = scheduler();
        let events = scheduler.handle().subscribe();
        let (session, closed) = continuous_session(&registry, "mic");
        let handle = scheduler.start(
            session,
            Box::new(ScriptedEstimator::constant(440.0, 0.97)),
            resolver(),
        );
        next_cycle(&events);

        handle.stop();
        assert_eq!(handle.state(), SchedulerState::Stopped);
        assert!(closed.load(Ordering::SeqCst));
        assert!(!registry.is_busy("mic"));
        assert!(!handle.snapshot().running);

        assert_eq!(wait_for_halt(&events), None);
        let cycles = handle.snapshot().cycles;
        thread::sleep(Duration::from_millis(30));
        assert!(events.try_recv().is_err());
        assert_eq!(handle.snapshot().cycles, cycles);
    }

    #[test]
    fn restart_after_stop_runs_a_new_loop() {
        let registry = DeviceRegistry::default();
        let scheduler = scheduler();
        let (session, _) = continuous_session(&registry, "mic");
        let handle = scheduler.start(
            session,
            Box::new(ScriptedEstimator::constant(440.0, 0.97)),
            resolver(),
        );
        handle.stop();

        let events = handle.subscribe();
        let (session, _) = continuous_session(&registry, "mic");
        scheduler.start(
            session,
            Box::new(ScriptedEstimator::constant(220.0, 0.97)),
            resolver(),
        );
        let deadline = Instant::now() + WAIT;
        loop {
            let snapshot = next_cycle(&events);
            if snapshot.reading.as_ref().is_some_and(|r| r.note_name == "A3") {
                break;
            }
            assert!(Instant::now() < deadline);
        }
        handle.stop();
    }

    #[test]
    fn lost_device_halts_the_loop() {
        let registry = DeviceRegistry::default();
        let scheduler = scheduler();
        let events = scheduler.handle().subscribe();
        let (stream, feeder, closed) = ScriptedStream::new(48_000, 8);
        let claim = registry.claim("mic").unwrap();
        let session = CaptureSession::new("mic", Box::new(stream), claim, WAIT);
        feeder.send(Ok(vec![0.0; 8])).unwrap();

        let handle = scheduler.start(
            session,
            Box::new(ScriptedEstimator::constant(440.0, 0.97)),
            resolver(),
        );
        next_cycle(&events);
        feeder.send(Err(StreamFault::DeviceLost)).unwrap();

        assert_eq!(
            wait_for_halt(&events),
            Some(TunerError::DeviceUnavailable("mic".into()))
        );
        handle.stop();
        assert_eq!(handle.state(), SchedulerState::Stopped);
        assert_eq!(handle.last_error(), Some(TunerError::DeviceUnavailable("mic".into())));
        assert!(closed.load(Ordering::SeqCst));
        assert!(!registry.is_busy("mic"));
    }

    #[test]
    fn stalled_stream_halts_the_loop() {
        let registry = DeviceRegistry::default();
        let scheduler = scheduler();
        let events = scheduler.handle().subscribe();
        let (stream, _feeder, _) = ScriptedStream::new(48_000, 8);
        let claim = registry.claim("mic").unwrap();
        let session =
            CaptureSession::new("mic", Box::new(stream), claim, Duration::from_millis(20));

        scheduler.start(
            session,
            Box::new(ScriptedEstimator::constant(440.0, 0.97)),
            resolver(),
        );
        let error = wait_for_halt(&events);
        assert!(matches!(error, Some(TunerError::CaptureStalled { .. })), "{error:?}");
    }

    struct PanicsOnce {
        panicked: bool,
    }

    impl PitchEstimator for PanicsOnce {
        fn estimate(&mut self, _samples: &[f32], _sample_rate: u32) -> Option<PitchEstimate> {
            if !self.panicked {
                self.panicked = true;
                panic!("bad window");
            }
            Some(PitchEstimate { frequency_hz: 440.0, confidence: 0.99 })
        }
    }

    #[test]
    fn a_panicking_estimator_does_not_kill_the_loop() {
        let registry = DeviceRegistry::default();
        let scheduler = scheduler();
        let events = scheduler.handle().subscribe();
        let (session, _) = continuous_session(&registry, "mic");
        let handle = scheduler.start(session, Box::new(PanicsOnce { panicked: false }), resolver());

        let first = next_cycle(&events);
        assert!(first.reading.is_none());
        let second = next_cycle(&events);
        assert_eq!(second.reading.unwrap().note_name, "A4");
        handle.stop();
    }

    #[test]
    fn stop_on_idle_scheduler_is_harmless() {
        let scheduler = scheduler();
        scheduler.handle().stop();
        assert_eq!(scheduler.handle().state(), SchedulerState::Idle);
    }

    #[test]
    fn backlogged_subscriber_still_receives_the_halt() {
        let registry = DeviceRegistry::default();
        let scheduler = scheduler();
        let events = scheduler.handle().subscribe();
        let (stream, feeder, _) = ScriptedStream::new(48_000, 8);
        let claim = registry.claim("mic").unwrap();
        let session = CaptureSession::new("mic", Box::new(stream), claim, WAIT);

        let running = Arc::new(AtomicBool::new(true));
        let pump = {
            let feeder = feeder.clone();
            let running = Arc::clone(&running);
            thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    if feeder.send(Ok(vec![0.0; 8])).is_err() {
                        break;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };
        let handle = scheduler.start(
            session,
            Box::new(ScriptedEstimator::constant(440.0, 0.97)),
            resolver(),
        );

        // Leave the subscriber unread well past its capacity.
        let deadline = Instant::now() + WAIT * 5;
        while handle.snapshot().cycles < SUBSCRIBER_CAPACITY as u64 + 20 {
            assert!(Instant::now() < deadline, "loop too slow");
            thread::sleep(Duration::from_millis(5));
        }
        running.store(false, Ordering::SeqCst);
        pump.join().unwrap();
        feeder.send(Err(StreamFault::DeviceLost)).unwrap();

        let mut cycles = 0;
        let halted = loop {
            match events.recv_timeout(WAIT).expect("halt was not delivered") {
                SchedulerEvent::Cycle(_) => cycles += 1,
                SchedulerEvent::Halted { error } => break error,
            }
        };
        assert!(cycles < SUBSCRIBER_CAPACITY);
        assert_eq!(halted, Some(TunerError::DeviceUnavailable("mic".into())));
        assert_eq!(handle.last_error(), halted);
    }

    /// Signals when an estimate begins, then blocks until released.
    struct Gated {
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl PitchEstimator for Gated {
        fn estimate(&mut self, _samples: &[f32], _sample_rate: u32) -> Option<PitchEstimate> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            Some(PitchEstimate { frequency_hz: 440.0, confidence: 0.99 })
        }
    }

    #[test]
    fn stop_during_analysis_publishes_nothing_more() {
        let registry = DeviceRegistry::default();
        let scheduler = scheduler();
        let events = scheduler.handle().subscribe();
        let (session, closed) = continuous_session(&registry, "mic");
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let handle = scheduler.start(
            session,
            Box::new(Gated { entered: entered_tx, release: release_rx }),
            resolver(),
        );

        entered_rx.recv_timeout(WAIT).expect("analysis never started");
        let cycles = handle.snapshot().cycles;

        let stopper = {
            let handle = handle.clone();
            thread::spawn(move || handle.stop())
        };
        // The stop flag is set before stop() blocks on the worker.
        let deadline = Instant::now() + WAIT;
        while !handle.shared.stopping.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "stop was never requested");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!stopper.is_finished());

        release_tx.send(()).unwrap();
        stopper.join().unwrap();

        assert_eq!(handle.state(), SchedulerState::Stopped);
        assert_eq!(handle.snapshot().cycles, cycles);
        assert!(handle.snapshot().reading.is_none());
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(
            events.try_iter().collect::<Vec<_>>(),
            vec![SchedulerEvent::Halted { error: None }]
        );
    }

    #[test]
    fn snapshots_carry_the_permission_state() {
        let registry = DeviceRegistry::default();
        let scheduler = scheduler();
        let handle = scheduler.handle();
        assert_eq!(handle.snapshot().permission, PermissionState::Unrequested);

        handle.set_permission(PermissionState::Granted);
        let events = handle.subscribe();
        let (session, _) = continuous_session(&registry, "mic");
        scheduler.start(
            session,
            Box::new(ScriptedEstimator::constant(440.0, 0.97)),
            resolver(),
        );
        assert_eq!(next_cycle(&events).permission, PermissionState::Granted);
        handle.stop();
        assert_eq!(handle.snapshot().permission, PermissionState::Granted);
    }
}
