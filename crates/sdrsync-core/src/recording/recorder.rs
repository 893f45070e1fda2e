//! WAV recorder for the mixed output
//!
//! ```text
//! render callback ──RecorderTap::write()──► rtrb ring ──► writer thread ──► WavWriter
//!   (lock-free, drops on full)                           (BufWriter, 16-bit PCM)
//! ```
//!
//! `start()` opens a timestamped file and spawns the writer thread; `stop()`
//! drains the ring, lets hound patch the RIFF and data sizes, and closes the
//! file. Start and stop are serialised by one mutex; the render side only
//! touches an atomic flag and the ring producer.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use rtrb::{Consumer, Producer, RingBuffer};
use sysinfo::Disks;
use thiserror::Error;

use crate::types::{CHANNELS, SAMPLE_RATE};

/// Seconds of audio the ring between render and writer can hold
const RING_SECONDS: usize = 2;

/// Free space below which starting a recording logs a warning
pub const LOW_DISK_BYTES: u64 = 500 * 1024 * 1024;

/// Writer thread poll interval while the ring is empty
const DRAIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("A recording is already running")]
    AlreadyRecording,

    #[error("No recording is running")]
    NotRecording,

    #[error("No audio stream is feeding the recorder")]
    NoStream,

    #[error("Recording I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Recorder writer thread panicked")]
    WriterPanicked,
}

pub type RecorderResult<T> = Result<T, RecorderError>;

type Writer = WavWriter<BufWriter<File>>;

struct TapShared {
    active: AtomicBool,
    dropped_samples: AtomicU64,
}

/// Render-thread end of the recorder
pub struct RecorderTap {
    shared: Arc<TapShared>,
    producer: Producer<i16>,
}

impl RecorderTap {
    /// Append interleaved stereo samples. Never blocks; samples that do not
    /// fit in the ring are dropped and counted.
    pub fn write(&mut self, samples: &[i16]) {
        if !self.shared.active.load(Ordering::Acquire) {
            return;
        }
        let n = samples.len().min(self.producer.slots());
        if n < samples.len() {
            self.shared
                .dropped_samples
                .fetch_add((samples.len() - n) as u64, Ordering::Relaxed);
        }
        if n == 0 {
            return;
        }
        if let Ok(mut chunk) = self.producer.write_chunk(n) {
            let (first, second) = chunk.as_mut_slices();
            let split = first.len();
            first.copy_from_slice(&samples[..split]);
            second.copy_from_slice(&samples[split..n]);
            chunk.commit_all();
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Relaxed)
    }
}

/// Summary of a finished recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingInfo {
    pub path: PathBuf,
    pub frames: u64,
    pub sample_rate: u32,
}

impl RecordingInfo {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames as f64 / self.sample_rate.max(1) as f64)
    }
}

struct Session {
    path: PathBuf,
    sample_rate: u32,
    stop: Arc<AtomicBool>,
    writer: JoinHandle<(Consumer<i16>, RecorderResult<()>)>,
}

struct RecorderState {
    directory: PathBuf,
    consumer: Option<Consumer<i16>>,
    session: Option<Session>,
}

/// Records the mixed output into 16-bit stereo WAV files
pub struct Recorder {
    state: Mutex<RecorderState>,
    shared: Arc<TapShared>,
    sample_rate: AtomicU32,
    frames_written: Arc<AtomicU64>,
}

impl Recorder {
    /// Create a recorder writing into `directory`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            state: Mutex::new(RecorderState {
                directory: directory.into(),
                consumer: None,
                session: None,
            }),
            shared: Arc::new(TapShared {
                active: AtomicBool::new(false),
                dropped_samples: AtomicU64::new(0),
            }),
            sample_rate: AtomicU32::new(SAMPLE_RATE),
            frames_written: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create the render-side tap for a new stream.
    ///
    /// Replaces the ring of any earlier tap. Call while not recording; a
    /// running recording keeps draining the old ring.
    pub fn tap(&self, sample_rate: u32) -> RecorderTap {
        let capacity = sample_rate.max(1) as usize * CHANNELS * RING_SECONDS;
        let (producer, consumer) = RingBuffer::new(capacity);
        let mut state = self.lock_state();
        if state.session.is_none() {
            state.consumer = Some(consumer);
        } else {
            log::warn!("Recorder tap replaced during a recording; new stream is not recorded");
        }
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
        RecorderTap {
            shared: Arc::clone(&self.shared),
            producer,
        }
    }

    pub fn directory(&self) -> PathBuf {
        self.lock_state().directory.clone()
    }

    pub fn set_directory(&self, directory: impl Into<PathBuf>) {
        self.lock_state().directory = directory.into();
    }

    /// Sample rate reported by the render device
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn is_recording(&self) -> bool {
        self.shared.active.load(Ordering::Relaxed)
    }

    /// Frames written to the current (or last) file
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Samples dropped because the writer fell behind
    pub fn dropped_samples(&self) -> u64 {
        self.shared.dropped_samples.load(Ordering::Relaxed)
    }

    /// Open a new timestamped file and start recording into it.
    ///
    /// Fails with [`RecorderError::NoStream`] unless a live [`RecorderTap`]
    /// exists.
    pub fn start(&self) -> RecorderResult<PathBuf> {
        let mut state = self.lock_state();
        if state.session.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }
        match &state.consumer {
            Some(consumer) if !consumer.is_abandoned() => {}
            _ => return Err(RecorderError::NoStream),
        }

        std::fs::create_dir_all(&state.directory)?;
        check_free_space(&state.directory);

        let sample_rate = self.sample_rate();
        let path = unique_path(&state.directory, &timestamp_name());
        let spec = WavSpec {
            channels: CHANNELS as u16,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&path, spec)?;

        let Some(mut consumer) = state.consumer.take() else {
            return Err(RecorderError::NoStream);
        };
        // Audio left over from an earlier session
        if let Ok(chunk) = consumer.read_chunk(consumer.slots()) {
            chunk.commit_all();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let frames_written = Arc::clone(&self.frames_written);
        frames_written.store(0, Ordering::Relaxed);
        self.shared.dropped_samples.store(0, Ordering::Relaxed);

        let handle = thread::Builder::new()
            .name("sdrsync-recorder".to_string())
            .spawn(move || run_writer(consumer, writer, thread_stop, frames_written));
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                return Err(e.into());
            }
        };

        self.shared.active.store(true, Ordering::Release);
        log::info!("Recording started: {:?} ({} Hz)", path, sample_rate);

        state.session = Some(Session {
            path: path.clone(),
            sample_rate,
            stop,
            writer: handle,
        });
        Ok(path)
    }

    /// Finish the current file and return what was written
    pub fn stop(&self) -> RecorderResult<RecordingInfo> {
        let mut state = self.lock_state();
        let session = state.session.take().ok_or(RecorderError::NotRecording)?;

        self.shared.active.store(false, Ordering::Release);
        session.stop.store(true, Ordering::Release);
        let (consumer, result) = session
            .writer
            .join()
            .map_err(|_| RecorderError::WriterPanicked)?;
        state.consumer = Some(consumer);
        result?;

        let info = RecordingInfo {
            path: session.path,
            frames: self.frames_written(),
            sample_rate: session.sample_rate,
        };
        log::info!(
            "Recording stopped: {:?} ({:.1} s, {} samples dropped)",
            info.path,
            info.duration().as_secs_f32(),
            self.dropped_samples()
        );
        Ok(info)
    }

    fn lock_state(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.is_recording() {
            if let Err(e) = self.stop() {
                log::error!("Failed to finish recording: {}", e);
            }
        }
    }
}

/// Drain the ring into the file until asked to stop, then finalize
fn run_writer(
    mut consumer: Consumer<i16>,
    mut writer: Writer,
    stop: Arc<AtomicBool>,
    frames_written: Arc<AtomicU64>,
) -> (Consumer<i16>, RecorderResult<()>) {
    let mut result = Ok(());
    let mut samples_written: u64 = 0;

    loop {
        // Read the flag first so the final drain sees everything pushed before it
        let stopping = stop.load(Ordering::Acquire);
        let available = consumer.slots();
        if available > 0 {
            if let Ok(chunk) = consumer.read_chunk(available) {
                let (first, second) = chunk.as_slices();
                for &sample in first.iter().chain(second) {
                    if let Err(e) = writer.write_sample(sample) {
                        result = Err(e.into());
                        break;
                    }
                    samples_written += 1;
                }
                chunk.commit_all();
                frames_written.store(samples_written / CHANNELS as u64, Ordering::Relaxed);
            }
            if result.is_err() {
                break;
            }
        } else if stopping {
            break;
        } else {
            thread::sleep(DRAIN_INTERVAL);
        }
    }

    if let Err(e) = writer.finalize() {
        if result.is_ok() {
            result = Err(e.into());
        }
    }
    (consumer, result)
}

/// `sdrsync-YYYYMMDD-HHMMSS` in local time
fn timestamp_name() -> String {
    chrono::Local::now()
        .format("sdrsync-%Y%m%d-%H%M%S")
        .to_string()
}

/// `dir/base.wav`, or `dir/base-N.wav` for the first free N
fn unique_path(directory: &Path, base: &str) -> PathBuf {
    let first = directory.join(format!("{}.wav", base));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| directory.join(format!("{}-{}.wav", base, n)))
        .find(|path| !path.exists())
        .unwrap_or(first)
}

/// Free bytes on the volume holding `path`, if it can be found
pub fn available_space(path: &Path) -> Option<u64> {
    let path = path.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

fn check_free_space(directory: &Path) {
    match available_space(directory) {
        Some(bytes) if bytes < LOW_DISK_BYTES => log::warn!(
            "Low disk space for recording: {} MB free in {:?}",
            bytes / (1024 * 1024),
            directory
        ),
        Some(_) => {}
        None => log::debug!("Could not determine free space for {:?}", directory),
    }
}
