//! Offset estimator: capture buffers and the analysis worker
//!
//! The render thread fills two mono capture buffers through a [`CaptureTap`].
//! When both are full the buffers are handed to a single long-lived worker
//! thread, which runs the analysis and publishes a [`SyncResult`].
//!
//! # Real-time safety
//!
//! The tap never blocks: it `try_lock`s the buffers (skipping the block if the
//! control thread holds them) and hands the full buffers over with a
//! non-blocking `try_send` on a one-slot channel. Buffers are reserved at
//! `start()`, so appending never allocates.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use thiserror::Error;

use super::analysis::{Analyzer, SyncResult};
use super::mode::SignalMode;

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("A capture or analysis is already in progress")]
    Busy,

    #[error("Failed to spawn estimator worker: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type EstimatorResult<T> = Result<T, EstimatorError>;

struct CaptureBuffers {
    radio: Vec<f32>,
    remote: Vec<f32>,
    target: usize,
    mode: SignalMode,
    generation: u64,
}

/// A full capture on its way to the worker
struct Job {
    radio: Vec<f32>,
    remote: Vec<f32>,
    mode: SignalMode,
    generation: u64,
}

struct Shared {
    capturing: AtomicBool,
    analysing: AtomicBool,
    captured: AtomicUsize,
    target: AtomicUsize,
    /// Bumped by every start and cancel; stale jobs are discarded
    generation: AtomicU64,
    buffers: Mutex<CaptureBuffers>,
    idle_lock: Mutex<()>,
    idle: Condvar,
    last_result: Mutex<Option<SyncResult>>,
}

impl Shared {
    fn finish_analysis(&self) {
        let _guard = lock(&self.idle_lock);
        self.analysing.store(false, Ordering::SeqCst);
        self.idle.notify_all();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Render-thread handle for feeding the capture buffers
#[derive(Clone)]
pub struct CaptureTap {
    shared: Arc<Shared>,
    jobs: Sender<Job>,
}

impl CaptureTap {
    #[inline]
    pub fn is_capturing(&self) -> bool {
        self.shared.capturing.load(Ordering::Acquire)
    }

    /// Append up to the remaining capacity from both mono signals.
    ///
    /// Returns the number of samples appended (0 when not capturing or when
    /// the buffers are momentarily held by another thread).
    pub fn add_samples(&self, radio: &[f32], remote: &[f32]) -> usize {
        if !self.is_capturing() {
            return 0;
        }
        let Ok(mut buffers) = self.shared.buffers.try_lock() else {
            return 0;
        };
        if !self.is_capturing() {
            return 0;
        }

        let remaining = buffers.target.saturating_sub(buffers.radio.len());
        let take = remaining.min(radio.len()).min(remote.len());
        buffers.radio.extend_from_slice(&radio[..take]);
        buffers.remote.extend_from_slice(&remote[..take]);
        self.shared.captured.store(buffers.radio.len(), Ordering::Relaxed);

        if buffers.radio.len() >= buffers.target {
            let job = Job {
                radio: std::mem::take(&mut buffers.radio),
                remote: std::mem::take(&mut buffers.remote),
                mode: buffers.mode,
                generation: buffers.generation,
            };
            self.shared.analysing.store(true, Ordering::SeqCst);
            self.shared.capturing.store(false, Ordering::SeqCst);
            if self.jobs.try_send(job).is_err() {
                // Worker gone or slot taken; nothing left to wait for
                self.shared.finish_analysis();
            }
        }
        take
    }
}

/// Capture state, worker thread and result slot of the offset estimator
pub struct OffsetEstimator {
    shared: Arc<Shared>,
    tap: CaptureTap,
    results: Receiver<SyncResult>,
    stop_tx: Sender<()>,
    worker: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl OffsetEstimator {
    /// Create the estimator and spawn its worker. Analysis runs at
    /// `sample_rate` (the nominal graph rate).
    pub fn new(sample_rate: u32) -> EstimatorResult<Self> {
        let shared = Arc::new(Shared {
            capturing: AtomicBool::new(false),
            analysing: AtomicBool::new(false),
            captured: AtomicUsize::new(0),
            target: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            buffers: Mutex::new(CaptureBuffers {
                radio: Vec::new(),
                remote: Vec::new(),
                target: 0,
                mode: SignalMode::Voice,
                generation: 0,
            }),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
            last_result: Mutex::new(None),
        });

        let (jobs_tx, jobs_rx) = channel::bounded::<Job>(1);
        let (results_tx, results_rx) = channel::unbounded();
        let (stop_tx, stop_rx) = channel::bounded(1);

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("sdrsync-estimator".to_string())
            .spawn(move || run_worker(worker_shared, jobs_rx, results_tx, stop_rx, sample_rate))?;

        log::debug!("Offset estimator worker started ({} Hz)", sample_rate);

        Ok(Self {
            tap: CaptureTap {
                shared: Arc::clone(&shared),
                jobs: jobs_tx,
            },
            shared,
            results: results_rx,
            stop_tx,
            worker: Some(worker),
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Handle for the mixer graph
    pub fn capture_tap(&self) -> CaptureTap {
        self.tap.clone()
    }

    /// Results of completed analyses, one message per capture
    pub fn results(&self) -> Receiver<SyncResult> {
        self.results.clone()
    }

    /// Arm a capture in `mode`. Fails with [`EstimatorError::Busy`] while a
    /// capture or analysis is in flight.
    pub fn start(&self, mode: SignalMode) -> EstimatorResult<()> {
        if self.is_busy() {
            return Err(EstimatorError::Busy);
        }
        let target = mode.capture_samples(self.sample_rate);
        {
            let mut buffers = lock(&self.shared.buffers);
            if self.is_busy() {
                return Err(EstimatorError::Busy);
            }
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            buffers.radio.clear();
            buffers.remote.clear();
            buffers.radio.reserve_exact(target);
            buffers.remote.reserve_exact(target);
            buffers.target = target;
            buffers.mode = mode;
            buffers.generation = generation;
            self.shared.target.store(target, Ordering::Relaxed);
            self.shared.captured.store(0, Ordering::Relaxed);
            *lock(&self.shared.last_result) = None;
            self.shared.capturing.store(true, Ordering::SeqCst);
        }
        log::debug!("{} capture armed ({} samples)", mode, target);
        Ok(())
    }

    /// Feed samples directly (same as the mixer's tap)
    pub fn add_samples(&self, radio: &[f32], remote: &[f32]) -> usize {
        self.tap.add_samples(radio, remote)
    }

    /// Drop any capture, wait for an in-flight analysis to finish and
    /// discard its result, then clear the buffers.
    pub fn cancel(&self) {
        {
            let mut buffers = lock(&self.shared.buffers);
            self.shared.capturing.store(false, Ordering::SeqCst);
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            buffers.radio.clear();
            buffers.remote.clear();
            self.shared.captured.store(0, Ordering::Relaxed);
        }
        let mut guard = lock(&self.shared.idle_lock);
        while self.shared.analysing.load(Ordering::SeqCst) {
            guard = self
                .shared
                .idle
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.shared.capturing.load(Ordering::SeqCst)
    }

    pub fn is_analysing(&self) -> bool {
        self.shared.analysing.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.is_capturing() || self.is_analysing()
    }

    /// Fraction of the current capture collected so far
    pub fn progress(&self) -> f32 {
        let target = self.shared.target.load(Ordering::Relaxed);
        if target == 0 {
            return 0.0;
        }
        (self.shared.captured.load(Ordering::Relaxed) as f32 / target as f32).min(1.0)
    }

    /// Result of the last completed capture, if any
    pub fn result(&self) -> Option<SyncResult> {
        lock(&self.shared.last_result).clone()
    }

    /// Block until the next result arrives or `timeout` passes
    pub fn wait_result(&self, timeout: Duration) -> Option<SyncResult> {
        self.results.recv_timeout(timeout).ok()
    }
}

impl Drop for OffsetEstimator {
    fn drop(&mut self) {
        self.shared.capturing.store(false, Ordering::SeqCst);
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let _ = self.stop_tx.try_send(());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Offset estimator worker panicked");
            }
        }
    }
}

fn run_worker(
    shared: Arc<Shared>,
    jobs: Receiver<Job>,
    results: Sender<SyncResult>,
    stop: Receiver<()>,
    sample_rate: u32,
) {
    let mut analyzer = Analyzer::new(sample_rate);

    loop {
        crossbeam::select! {
            recv(jobs) -> job => {
                let Ok(job) = job else { break };
                let current = |generation| generation == shared.generation.load(Ordering::SeqCst);
                let outcome = current(job.generation)
                    .then(|| analyzer.analyze(&job.radio, &job.remote, job.mode))
                    // A cancel during the analysis discards the result
                    .filter(|_| current(job.generation));
                if let Some(result) = &outcome {
                    if result.success {
                        log::debug!(
                            "{} offset {:.1} ms (confidence {:.2})",
                            result.mode,
                            result.delay_ms,
                            result.confidence
                        );
                    }
                    *lock(&shared.last_result) = Some(result.clone());
                }
                // Idle before publishing so a receiver can re-arm right away
                shared.finish_analysis();
                if let Some(result) = outcome {
                    let _ = results.send(result);
                }
            }
            recv(stop) -> _ => break,
        }
    }

    log::debug!("Offset estimator worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 8000;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| ((i * 37) % 101) as f32 / 101.0 - 0.5).collect()
    }

    #[test]
    fn test_tap_ignores_samples_when_idle() {
        let estimator = OffsetEstimator::new(SR).unwrap();
        let tap = estimator.capture_tap();
        assert!(!tap.is_capturing());
        assert_eq!(tap.add_samples(&[0.1; 64], &[0.1; 64]), 0);
        assert_eq!(estimator.progress(), 0.0);
    }

    #[test]
    fn test_capture_stops_at_target() {
        let estimator = OffsetEstimator::new(SR).unwrap();
        estimator.start(SignalMode::Voice).unwrap();
        let target = SignalMode::Voice.capture_samples(SR);

        let block = ramp(1000);
        let mut total = 0;
        while estimator.is_capturing() {
            total += estimator.add_samples(&block, &block);
        }
        assert_eq!(total, target);
        assert!(estimator.wait_result(Duration::from_secs(10)).is_some());
        assert!(!estimator.is_busy());
    }

    #[test]
    fn test_start_while_busy_is_rejected() {
        let estimator = OffsetEstimator::new(SR).unwrap();
        estimator.start(SignalMode::Cw).unwrap();
        assert!(matches!(estimator.start(SignalMode::Voice), Err(EstimatorError::Busy)));
        estimator.cancel();
        assert!(!estimator.is_busy());
        estimator.start(SignalMode::Voice).unwrap();
    }

    #[test]
    fn test_cancel_discards_capture() {
        let estimator = OffsetEstimator::new(SR).unwrap();
        estimator.start(SignalMode::Voice).unwrap();
        estimator.add_samples(&ramp(500), &ramp(500));
        assert!(estimator.progress() > 0.0);
        estimator.cancel();
        assert!(!estimator.is_capturing());
        assert_eq!(estimator.progress(), 0.0);
        assert!(estimator.wait_result(Duration::from_millis(200)).is_none());
        assert!(estimator.result().is_none());
    }

    #[test]
    fn test_mismatched_block_lengths_take_shorter() {
        let estimator = OffsetEstimator::new(SR).unwrap();
        estimator.start(SignalMode::Voice).unwrap();
        assert_eq!(estimator.add_samples(&ramp(300), &ramp(200)), 200);
        estimator.cancel();
    }

    #[test]
    fn test_silent_capture_reports_failure() {
        let estimator = OffsetEstimator::new(SR).unwrap();
        estimator.start(SignalMode::Cw).unwrap();
        let zeros = vec![0.0; 4096];
        while estimator.is_capturing() {
            estimator.add_samples(&zeros, &zeros);
        }
        let result = estimator.wait_result(Duration::from_secs(10)).unwrap();
        assert!(!result.success);
        assert_eq!(result.mode, SignalMode::Cw);
        assert_eq!(estimator.result(), Some(result));
    }
}
