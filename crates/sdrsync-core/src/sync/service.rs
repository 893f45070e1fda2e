//! Sync service - control thread around the auto-sync controller
//!
//! One thread multiplexes three inputs with `crossbeam::select!`:
//!
//! - a one-second tick driving the countdown
//! - [`SyncCommand`]s from the UI and the engine lifecycle
//! - analysis results from the [`OffsetEstimator`] worker
//!
//! and publishes [`SyncEvent`]s for display. The engine is reached through
//! the [`SyncTarget`] trait.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use super::analysis::{SyncFailure, SyncResult};
use super::controller::{AutoSync, Correction, AUTO_SYNC_INTERVAL_SECS};
use super::estimator::OffsetEstimator;
use super::mode::SignalMode;

/// Events kept for a slow reader before new ones are dropped
const EVENT_CAPACITY: usize = 256;

/// What the sync service needs from the audio engine
pub trait SyncTarget: Send + 'static {
    /// Analysis mode for the radio's current operating mode
    fn signal_mode(&self) -> SignalMode;

    /// Current radio delay setpoint in ms
    fn delay_ms(&self) -> f32;

    /// Move the radio delay setpoint
    fn set_delay_ms(&self, delay_ms: f32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    Enable,
    Disable,
    ManualSync,
    EngineStarted,
    EngineStopped,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Seconds until the next automatic capture
    Countdown(u32),
    Capturing {
        mode: SignalMode,
        manual: bool,
    },
    Applied {
        delay_ms: f32,
        /// Offset the delay line could not absorb (negative lag)
        residual_ms: f32,
        manual: bool,
    },
    /// Automatic correction too large to apply
    Rejected { delta_ms: f32 },
    /// Manual sync that did not succeed
    Failed {
        manual: bool,
        reason: Option<SyncFailure>,
    },
    /// Manual sync requested while a capture is running or the engine is off
    Busy,
}

#[derive(Debug, Clone)]
pub struct SyncServiceConfig {
    pub tick: Duration,
    /// Ticks between automatic captures
    pub interval: u32,
}

impl Default for SyncServiceConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            interval: AUTO_SYNC_INTERVAL_SECS,
        }
    }
}

/// Handle to the running sync thread. Dropping it stops the thread.
pub struct SyncService {
    command_tx: Sender<SyncCommand>,
    event_rx: Receiver<SyncEvent>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SyncService {
    pub fn spawn<T: SyncTarget>(
        estimator: Arc<OffsetEstimator>,
        target: T,
    ) -> std::io::Result<Self> {
        Self::spawn_with_config(estimator, target, SyncServiceConfig::default())
    }

    pub fn spawn_with_config<T: SyncTarget>(
        estimator: Arc<OffsetEstimator>,
        target: T,
        config: SyncServiceConfig,
    ) -> std::io::Result<Self> {
        let (command_tx, command_rx) = channel::unbounded();
        let (event_tx, event_rx) = channel::bounded(EVENT_CAPACITY);

        let worker = SyncWorker {
            results: estimator.results(),
            estimator,
            target,
            controller: AutoSync::with_interval(config.interval),
            command_rx,
            event_tx,
        };

        let handle = thread::Builder::new()
            .name("sdrsync-sync".into())
            .spawn(move || worker.run(config.tick))?;

        Ok(Self {
            command_tx,
            event_rx,
            thread_handle: Some(handle),
        })
    }

    pub fn send(&self, command: SyncCommand) {
        if self.command_tx.send(command).is_err() {
            log::warn!("Sync service is not running, dropped {:?}", command);
        }
    }

    pub fn enable(&self) {
        self.send(SyncCommand::Enable);
    }

    pub fn disable(&self) {
        self.send(SyncCommand::Disable);
    }

    pub fn manual_sync(&self) {
        self.send(SyncCommand::ManualSync);
    }

    pub fn engine_started(&self) {
        self.send(SyncCommand::EngineStarted);
    }

    pub fn engine_stopped(&self) {
        self.send(SyncCommand::EngineStopped);
    }

    pub fn events(&self) -> Receiver<SyncEvent> {
        self.event_rx.clone()
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        let _ = self.command_tx.send(SyncCommand::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("Sync service thread panicked");
            }
        }
    }
}

struct SyncWorker<T> {
    estimator: Arc<OffsetEstimator>,
    results: Receiver<SyncResult>,
    target: T,
    controller: AutoSync,
    command_rx: Receiver<SyncCommand>,
    event_tx: Sender<SyncEvent>,
}

impl<T: SyncTarget> SyncWorker<T> {
    fn run(mut self, tick: Duration) {
        log::info!("Sync service started");
        let ticker = channel::tick(tick);
        let commands = self.command_rx.clone();
        let results = self.results.clone();

        loop {
            crossbeam::select! {
                recv(commands) -> cmd => match cmd {
                    Ok(SyncCommand::Shutdown) | Err(_) => break,
                    Ok(cmd) => self.handle_command(cmd),
                },
                recv(ticker) -> _ => self.handle_tick(),
                recv(results) -> result => match result {
                    Ok(result) => self.handle_result(result),
                    Err(_) => {
                        log::error!("Estimator result channel closed");
                        break;
                    }
                },
            }
        }

        if self.estimator.is_busy() {
            self.estimator.cancel();
        }
        log::info!("Sync service stopped");
    }

    fn handle_command(&mut self, cmd: SyncCommand) {
        match cmd {
            SyncCommand::Enable => {
                log::info!("Auto-sync enabled");
                self.controller.enable();
                self.publish_countdown();
            }
            SyncCommand::Disable => {
                log::info!("Auto-sync disabled");
                self.estimator.cancel();
                self.controller.disable();
            }
            SyncCommand::ManualSync => {
                if self.controller.can_sync_manually() {
                    self.start_capture(true);
                } else {
                    log::info!("Manual sync ignored: capture in progress or engine stopped");
                    self.emit(SyncEvent::Busy);
                }
            }
            SyncCommand::EngineStarted => {
                self.controller.engine_started();
                self.publish_countdown();
            }
            SyncCommand::EngineStopped => {
                self.estimator.cancel();
                self.controller.engine_stopped();
            }
            SyncCommand::Shutdown => {}
        }
    }

    fn handle_tick(&mut self) {
        if self.controller.tick() {
            self.start_capture(false);
        } else {
            self.publish_countdown();
        }
    }

    fn start_capture(&mut self, manual: bool) {
        let mode = self.target.signal_mode();
        match self.estimator.start(mode) {
            Ok(()) => {
                log::debug!("{} sync capture started ({})", kind(manual), mode);
                self.controller.capture_started(mode, manual);
                self.emit(SyncEvent::Capturing { mode, manual });
            }
            Err(e) => {
                log::warn!("Could not start {} sync capture: {}", kind(manual), e);
                self.controller.capture_refused();
                if manual {
                    self.emit(SyncEvent::Busy);
                }
            }
        }
    }

    fn handle_result(&mut self, result: SyncResult) {
        let current = self.target.delay_ms();
        let Some((correction, manual)) = self.controller.capture_finished(&result, current) else {
            log::debug!("Discarding sync result with no capture pending");
            return;
        };

        match correction {
            Correction::Apply {
                delay_ms,
                residual_ms,
            } => {
                self.target.set_delay_ms(delay_ms);
                self.controller.correction_applied();
                if residual_ms < 0.0 {
                    log::info!(
                        "{} sync: WebSDR leads by {:.0} ms, delay set to {:.0} ms",
                        kind(manual),
                        -residual_ms,
                        delay_ms
                    );
                } else {
                    log::info!(
                        "{} sync: delay {:.0} -> {:.0} ms (confidence {:.2})",
                        kind(manual),
                        current,
                        delay_ms,
                        result.confidence
                    );
                }
                self.emit(SyncEvent::Applied {
                    delay_ms,
                    residual_ms,
                    manual,
                });
            }
            Correction::Reject { delta_ms } => {
                log::info!(
                    "Auto sync: ignoring {:+.0} ms correction (measured {:.0} ms)",
                    delta_ms,
                    result.delay_ms
                );
                self.emit(SyncEvent::Rejected { delta_ms });
            }
            Correction::Failed(reason) => {
                match &reason {
                    Some(reason) => log::debug!("{} sync failed: {}", kind(manual), reason),
                    None => log::debug!("{} sync failed", kind(manual)),
                }
                if manual {
                    self.emit(SyncEvent::Failed { manual, reason });
                }
            }
        }
        self.publish_countdown();
    }

    fn publish_countdown(&self) {
        if let Some(remaining) = self.controller.countdown() {
            self.emit(SyncEvent::Countdown(remaining));
        }
    }

    fn emit(&self, event: SyncEvent) {
        // A full queue means nobody is listening
        let _ = self.event_tx.try_send(event);
    }
}

fn kind(manual: bool) -> &'static str {
    if manual {
        "Manual"
    } else {
        "Auto"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const SR: u32 = 16000;

    #[derive(Clone)]
    struct MockTarget {
        delay: Arc<Mutex<f32>>,
    }

    impl MockTarget {
        fn new(delay_ms: f32) -> Self {
            Self {
                delay: Arc::new(Mutex::new(delay_ms)),
            }
        }

        fn get(&self) -> f32 {
            *self.delay.lock().unwrap()
        }
    }

    impl SyncTarget for MockTarget {
        fn signal_mode(&self) -> SignalMode {
            SignalMode::Voice
        }

        fn delay_ms(&self) -> f32 {
            self.get()
        }

        fn set_delay_ms(&self, delay_ms: f32) {
            *self.delay.lock().unwrap() = delay_ms;
        }
    }

    fn fast_config() -> SyncServiceConfig {
        SyncServiceConfig {
            tick: Duration::from_millis(20),
            interval: 2,
        }
    }

    /// Feed a capture where the remote lags the radio by `lag` samples
    fn feed_lagged(estimator: &OffsetEstimator, lag: usize, seed: u64) {
        let len = SignalMode::Voice.capture_samples(SR);
        let mut rng = StdRng::seed_from_u64(seed);
        let src: Vec<f32> = (0..len + lag)
            .map(|_| rng.random_range(-0.5f32..0.5))
            .collect();
        let radio = &src[lag..lag + len];
        let remote = &src[..len];
        for (r, w) in radio.chunks(512).zip(remote.chunks(512)) {
            estimator.add_samples(r, w);
        }
    }

    fn wait_for(
        events: &Receiver<SyncEvent>,
        mut pred: impl FnMut(&SyncEvent) -> bool,
    ) -> Option<SyncEvent> {
        let deadline = Instant::now() + Duration::from_secs(20);
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match events.recv_timeout(left) {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    }

    #[test]
    fn test_manual_sync_applies_measured_delay() {
        let estimator = Arc::new(OffsetEstimator::new(SR).unwrap());
        let target = MockTarget::new(0.0);
        let service =
            SyncService::spawn_with_config(Arc::clone(&estimator), target.clone(), fast_config())
                .unwrap();
        let events = service.events();

        service.engine_started();
        service.manual_sync();
        let capturing = wait_for(&events, |e| matches!(e, SyncEvent::Capturing { .. }));
        assert_eq!(
            capturing,
            Some(SyncEvent::Capturing {
                mode: SignalMode::Voice,
                manual: true
            })
        );

        feed_lagged(&estimator, 800, 3);
        let applied = wait_for(&events, |e| matches!(e, SyncEvent::Applied { .. }));
        match applied {
            Some(SyncEvent::Applied {
                delay_ms, manual, ..
            }) => {
                assert!(manual);
                assert!((delay_ms - 50.0).abs() < 0.5, "delay {}", delay_ms);
            }
            other => panic!("expected Applied, got {:?}", other),
        }
        assert!((target.get() - 50.0).abs() < 0.5);
    }

    #[test]
    fn test_auto_sync_cycles_and_applies() {
        let estimator = Arc::new(OffsetEstimator::new(SR).unwrap());
        let target = MockTarget::new(10.0);
        let service =
            SyncService::spawn_with_config(Arc::clone(&estimator), target.clone(), fast_config())
                .unwrap();
        let events = service.events();

        service.enable();
        service.engine_started();
        assert!(wait_for(&events, |e| matches!(e, SyncEvent::Countdown(_))).is_some());
        let capturing = wait_for(&events, |e| matches!(e, SyncEvent::Capturing { .. }));
        assert_eq!(
            capturing,
            Some(SyncEvent::Capturing {
                mode: SignalMode::Voice,
                manual: false
            })
        );

        feed_lagged(&estimator, 800, 5);
        assert!(wait_for(&events, |e| matches!(e, SyncEvent::Applied { manual: false, .. })).is_some());
        assert!((target.get() - 50.0).abs() < 0.5);
    }

    #[test]
    fn test_auto_sync_rejects_large_jump() {
        let estimator = Arc::new(OffsetEstimator::new(SR).unwrap());
        let target = MockTarget::new(600.0);
        let service =
            SyncService::spawn_with_config(Arc::clone(&estimator), target.clone(), fast_config())
                .unwrap();
        let events = service.events();

        service.engine_started();
        service.enable();
        assert!(wait_for(&events, |e| matches!(e, SyncEvent::Capturing { .. })).is_some());
        feed_lagged(&estimator, 800, 9);

        match wait_for(&events, |e| matches!(e, SyncEvent::Rejected { .. })) {
            Some(SyncEvent::Rejected { delta_ms }) => assert!((delta_ms + 550.0).abs() < 0.5),
            other => panic!("expected Rejected, got {:?}", other),
        }
        assert_eq!(target.get(), 600.0);
    }

    #[test]
    fn test_manual_sync_needs_running_engine() {
        let estimator = Arc::new(OffsetEstimator::new(SR).unwrap());
        let service =
            SyncService::spawn_with_config(Arc::clone(&estimator), MockTarget::new(0.0), fast_config())
                .unwrap();
        let events = service.events();

        service.manual_sync();
        assert_eq!(wait_for(&events, |_| true), Some(SyncEvent::Busy));
        assert!(!estimator.is_capturing());
    }

    #[test]
    fn test_engine_stop_cancels_capture() {
        let estimator = Arc::new(OffsetEstimator::new(SR).unwrap());
        let service =
            SyncService::spawn_with_config(Arc::clone(&estimator), MockTarget::new(0.0), fast_config())
                .unwrap();
        let events = service.events();

        service.engine_started();
        service.manual_sync();
        assert!(wait_for(&events, |e| matches!(e, SyncEvent::Capturing { .. })).is_some());
        assert!(estimator.is_capturing());

        service.engine_stopped();
        // Round-trip a command so the stop has been handled
        service.manual_sync();
        assert!(wait_for(&events, |e| *e == SyncEvent::Busy).is_some());
        assert!(!estimator.is_capturing());
    }
}
