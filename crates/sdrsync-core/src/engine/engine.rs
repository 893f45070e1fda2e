//! Audio engine - binds the device streams to the mixer graph
//!
//! ```text
//! ┌──────────────────┐  set_*()   ┌────────────────┐  snapshot/block  ┌──────────────────┐
//! │  Control thread  │──────────► │  MixerParams   │ ◄─────────────── │ Render callback  │
//! │  (MixerControls) │            │   (atomics)    │                  │  (MixerGraph)    │
//! └──────────────────┘            └────────────────┘                  └────────┬─────────┘
//!                                                                              │
//!           radio capture ──► RingWriter ══► RingReader ──────────────────────►│
//!          remote capture ──► RingWriter ══► RingReader ──────────────────────►│
//!                                                                              ├──► RecorderTap
//!                                                                              └──► CaptureTap
//! ```
//!
//! `start()` and `stop()` take `&mut self`, so device open and close are
//! serialised by ownership. The callbacks only touch atomics, rings and
//! preallocated buffers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::Stream;
use crossbeam::channel::{self, Receiver, Sender};

use super::mixer::MixerGraph;
use super::params::{MeterLevels, MixerControls, MixerParams};
use crate::audio::{
    build_input_stream, build_output_stream, frame_ring, resolve_device, select_config,
    AudioConfig, AudioError, AudioResult, Direction, ErrorHandler, RingReader, RingStats,
};
use crate::config::SessionState;
use crate::recording::{Recorder, RecorderResult, RecorderTap, RecordingInfo};
use crate::sync::{CaptureTap, OffsetEstimator, SignalMode, SyncTarget};
use crate::types::{Source, CHANNELS, MAX_BLOCK_FRAMES, SAMPLE_RATE};

/// Capture ring size in milliseconds of audio
const RING_CAPACITY_MS: u32 = 250;

/// Events kept for a slow reader before new ones are dropped
const EVENT_CAPACITY: usize = 64;

/// User-visible engine notifications
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Started {
        sample_rate: u32,
        /// Requested device buffer in frames, None if the host chose
        buffer_size: Option<u32>,
    },
    Stopped,
    /// A device failed to open or reported a stream error
    DeviceError(String),
    /// A device runs at a rate other than the nominal one; no resampling is done
    SampleRateMismatch { nominal: u32, actual: u32 },
}

/// Streams kept alive while the engine runs
struct ActiveStreams {
    _radio: Stream,
    _remote: Stream,
    _output: Stream,
    sample_rate: u32,
    ring_stats: [Arc<RingStats>; 2],
    clip: Arc<AtomicBool>,
}

/// Everything the render callback owns
struct RenderState {
    radio: RingReader,
    remote: RingReader,
    graph: MixerGraph,
    recorder: RecorderTap,
    radio_buf: Vec<i16>,
    remote_buf: Vec<i16>,
}

impl RenderState {
    fn new(radio: RingReader, remote: RingReader, graph: MixerGraph, recorder: RecorderTap) -> Self {
        Self {
            radio,
            remote,
            graph,
            recorder,
            radio_buf: vec![0; MAX_BLOCK_FRAMES * CHANNELS],
            remote_buf: vec![0; MAX_BLOCK_FRAMES * CHANNELS],
        }
    }

    /// Fill `out` (at most MAX_BLOCK_FRAMES stereo frames)
    fn render(&mut self, out: &mut [i16]) {
        let frames = (out.len() / CHANNELS).min(MAX_BLOCK_FRAMES);
        let len = frames * CHANNELS;
        // Underruns come back zero-filled
        self.radio.read(&mut self.radio_buf[..len], frames);
        self.remote.read(&mut self.remote_buf[..len], frames);
        self.graph
            .process(&self.radio_buf[..len], &self.remote_buf[..len], &mut out[..len]);
        self.recorder.write(&out[..len]);
    }
}

/// Sync access to the engine's delay and the radio mode
#[derive(Clone)]
pub struct EngineSyncTarget {
    controls: Arc<Mutex<MixerControls>>,
    radio_mode: Arc<Mutex<SignalMode>>,
}

impl SyncTarget for EngineSyncTarget {
    fn signal_mode(&self) -> SignalMode {
        *lock(&self.radio_mode)
    }

    fn delay_ms(&self) -> f32 {
        lock(&self.controls).delay_ms()
    }

    fn set_delay_ms(&self, delay_ms: f32) {
        lock(&self.controls).set_delay_ms(delay_ms);
    }
}

/// Owner of the devices, the mixer parameters, the estimator and the recorder
pub struct AudioEngine {
    config: AudioConfig,
    params: Arc<MixerParams>,
    meters: Arc<MeterLevels>,
    controls: Arc<Mutex<MixerControls>>,
    estimator: Arc<OffsetEstimator>,
    recorder: Arc<Recorder>,
    radio_mode: Arc<Mutex<SignalMode>>,
    running: Arc<AtomicBool>,
    streams: Option<ActiveStreams>,
    event_tx: Sender<EngineEvent>,
    event_rx: Receiver<EngineEvent>,
}

impl AudioEngine {
    /// Create a stopped engine with a restored session
    pub fn new(
        config: AudioConfig,
        session: &SessionState,
        recording_dir: impl Into<PathBuf>,
    ) -> AudioResult<Self> {
        let params = Arc::new(MixerParams::new());
        let controls = MixerControls::from_session(Arc::clone(&params), session);
        let estimator = OffsetEstimator::new(SAMPLE_RATE)?;
        let (event_tx, event_rx) = channel::bounded(EVENT_CAPACITY);

        Ok(Self {
            config,
            params,
            meters: Arc::new(MeterLevels::new()),
            controls: Arc::new(Mutex::new(controls)),
            estimator: Arc::new(estimator),
            recorder: Arc::new(Recorder::new(recording_dir)),
            radio_mode: Arc::new(Mutex::new(SignalMode::Voice)),
            running: Arc::new(AtomicBool::new(false)),
            streams: None,
            event_tx,
            event_rx,
        })
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Change device selection; applies on the next start
    pub fn set_config(&mut self, config: AudioConfig) {
        self.config = config;
    }

    pub fn is_running(&self) -> bool {
        self.streams.is_some()
    }

    /// Actual output sample rate while running
    pub fn sample_rate(&self) -> Option<u32> {
        self.streams.as_ref().map(|s| s.sample_rate)
    }

    pub fn events(&self) -> Receiver<EngineEvent> {
        self.event_rx.clone()
    }

    pub fn params(&self) -> Arc<MixerParams> {
        Arc::clone(&self.params)
    }

    pub fn meters(&self) -> Arc<MeterLevels> {
        Arc::clone(&self.meters)
    }

    /// Lock the mixer controls for a parameter change
    pub fn controls(&self) -> MutexGuard<'_, MixerControls> {
        lock(&self.controls)
    }

    pub fn estimator(&self) -> Arc<OffsetEstimator> {
        Arc::clone(&self.estimator)
    }

    pub fn recorder(&self) -> Arc<Recorder> {
        Arc::clone(&self.recorder)
    }

    pub fn sync_target(&self) -> EngineSyncTarget {
        EngineSyncTarget {
            controls: Arc::clone(&self.controls),
            radio_mode: Arc::clone(&self.radio_mode),
        }
    }

    /// Radio operating mode as reported by the transceiver ("USB", "CW-R", ...)
    pub fn set_radio_mode(&self, hint: &str) {
        let mode = SignalMode::from_hint(hint);
        let mut current = lock(&self.radio_mode);
        if *current != mode {
            log::debug!("Radio mode {} -> {} analysis", hint, mode);
            *current = mode;
        }
    }

    pub fn signal_mode(&self) -> SignalMode {
        *lock(&self.radio_mode)
    }

    /// Current settings for persistence
    pub fn session(&self, auto_sync_enabled: bool) -> SessionState {
        lock(&self.controls).session(auto_sync_enabled)
    }

    /// Ring counters (radio, remote) while running
    pub fn ring_stats(&self, source: Source) -> Option<Arc<RingStats>> {
        self.streams
            .as_ref()
            .map(|s| Arc::clone(&s.ring_stats[source.index()]))
    }

    /// Clip flag of the running output stage; the UI clears it after reading
    pub fn clip_indicator(&self) -> Option<Arc<AtomicBool>> {
        self.streams.as_ref().map(|s| Arc::clone(&s.clip))
    }

    /// Open the three devices and start streaming.
    ///
    /// On failure the engine stays stopped and a [`EngineEvent::DeviceError`]
    /// is published.
    pub fn start(&mut self) -> AudioResult<()> {
        if self.streams.is_some() {
            return Err(AudioError::AlreadyRunning);
        }

        match self.open_streams() {
            Ok(streams) => {
                self.running.store(true, Ordering::Release);
                log::info!(
                    "Audio engine started at {}Hz ({:?} frames)",
                    streams.sample_rate,
                    self.config.buffer_size.as_frames()
                );
                self.emit(EngineEvent::Started {
                    sample_rate: streams.sample_rate,
                    buffer_size: self.config.buffer_size.as_frames(),
                });
                self.streams = Some(streams);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to start audio engine: {}", e);
                self.emit(EngineEvent::DeviceError(e.to_string()));
                Err(e)
            }
        }
    }

    /// Stop streaming, finish any recording and drop a pending capture
    pub fn stop(&mut self) {
        let Some(streams) = self.streams.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);

        if self.recorder.is_recording() {
            if let Err(e) = self.recorder.stop() {
                log::error!("Failed to finish recording: {}", e);
            }
        }
        self.estimator.cancel();
        drop(streams);

        log::info!("Audio engine stopped");
        self.emit(EngineEvent::Stopped);
    }

    /// Record the mixed output. Only possible while the engine is running.
    pub fn start_recording(&self) -> RecorderResult<PathBuf> {
        self.recorder.start()
    }

    pub fn stop_recording(&self) -> RecorderResult<RecordingInfo> {
        self.recorder.stop()
    }

    fn open_streams(&self) -> AudioResult<ActiveStreams> {
        let radio_device = resolve_device(self.config.radio_device.as_ref(), Direction::Input)?;
        let remote_device = resolve_device(self.config.remote_device.as_ref(), Direction::Input)?;
        let output_device = resolve_device(self.config.output_device.as_ref(), Direction::Output)?;

        for (label, device) in [
            ("Radio input", &radio_device),
            ("WebSDR input", &remote_device),
            ("Output", &output_device),
        ] {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            log::info!("{} device: {}", label, name);
        }

        let radio_setup = select_config(&radio_device, Direction::Input, &self.config)?;
        let remote_setup = select_config(&remote_device, Direction::Input, &self.config)?;
        let output_setup = select_config(&output_device, Direction::Output, &self.config)?;

        let nominal = self.config.sample_rate;
        for setup in [&radio_setup, &remote_setup, &output_setup] {
            let actual = setup.sample_rate();
            if actual != nominal {
                log::warn!("Device runs at {}Hz instead of {}Hz", actual, nominal);
                self.emit(EngineEvent::SampleRateMismatch { nominal, actual });
            }
        }

        let sample_rate = output_setup.sample_rate();
        let ring_frames = (sample_rate * RING_CAPACITY_MS / 1000) as usize;
        let (radio_writer, radio_reader) = frame_ring(ring_frames);
        let (remote_writer, remote_reader) = frame_ring(ring_frames);
        let ring_stats = [radio_reader.stats(), remote_reader.stats()];

        let capture: CaptureTap = self.estimator.capture_tap();
        let graph = MixerGraph::new(Arc::clone(&self.params), Arc::clone(&self.meters), sample_rate)
            .with_capture(capture);
        let clip = graph.clip_indicator();
        let mut render = RenderState::new(
            radio_reader,
            remote_reader,
            graph,
            self.recorder.tap(sample_rate),
        );

        let radio = build_input_stream(
            &radio_device,
            &radio_setup,
            radio_writer,
            Arc::clone(&self.running),
            self.error_handler("Radio input"),
        )?;
        let remote = build_input_stream(
            &remote_device,
            &remote_setup,
            remote_writer,
            Arc::clone(&self.running),
            self.error_handler("WebSDR input"),
        )?;
        let output = build_output_stream(
            &output_device,
            &output_setup,
            move |out: &mut [i16]| render.render(out),
            Arc::clone(&self.running),
            self.error_handler("Output"),
        )?;

        for (label, stream) in [("Output", &output), ("Radio", &radio), ("WebSDR", &remote)] {
            stream
                .play()
                .map_err(|e| AudioError::StreamPlayError(format!("{}: {}", label, e)))?;
        }

        Ok(ActiveStreams {
            _radio: radio,
            _remote: remote,
            _output: output,
            sample_rate,
            ring_stats,
            clip,
        })
    }

    fn error_handler(&self, label: &'static str) -> ErrorHandler {
        let events = self.event_tx.clone();
        Arc::new(move |message: String| {
            log::error!("{} stream error: {}", label, message);
            let _ = events.try_send(EngineEvent::DeviceError(format!("{}: {}", label, message)));
        })
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.try_send(event);
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
