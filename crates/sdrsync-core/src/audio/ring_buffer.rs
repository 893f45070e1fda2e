//! Lock-free frame queue between a capture callback and the render callback
//!
//! Built on `rtrb`, split into a [`RingWriter`] (capture thread) and a
//! [`RingReader`] (render thread). Neither side ever blocks:
//!
//! - a write into a full queue stores nothing and drops the input tail
//! - a read from a short queue zero-fills the rest of the output (underrun)
//!
//! Frames are interleaved stereo `i16`. `rtrb` publishes the write index with
//! release ordering and the reader observes it with acquire ordering, so a
//! frame is never seen half-written.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::CHANNELS;

/// Advisory counters shared by both ends of a ring
#[derive(Debug, Default)]
pub struct RingStats {
    overrun_frames: AtomicU64,
    underrun_frames: AtomicU64,
}

impl RingStats {
    /// Input frames dropped because the queue was full
    pub fn overrun_frames(&self) -> u64 {
        self.overrun_frames.load(Ordering::Relaxed)
    }

    /// Output frames zero-filled because the queue was short
    pub fn underrun_frames(&self) -> u64 {
        self.underrun_frames.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.overrun_frames.store(0, Ordering::Relaxed);
        self.underrun_frames.store(0, Ordering::Relaxed);
    }
}

/// Create a ring holding `capacity_frames` stereo frames
pub fn frame_ring(capacity_frames: usize) -> (RingWriter, RingReader) {
    let capacity_frames = capacity_frames.max(1);
    let (producer, consumer) = rtrb::RingBuffer::<i16>::new(capacity_frames * CHANNELS);
    let stats = Arc::new(RingStats::default());
    (
        RingWriter {
            producer,
            stats: Arc::clone(&stats),
            capacity: capacity_frames,
        },
        RingReader {
            consumer,
            stats,
            capacity: capacity_frames,
        },
    )
}

/// Producer end, owned by a capture callback
pub struct RingWriter {
    producer: rtrb::Producer<i16>,
    stats: Arc<RingStats>,
    capacity: usize,
}

impl RingWriter {
    /// Store up to `frames` interleaved stereo frames from `data`.
    ///
    /// Returns the number of frames stored. When fewer slots are free than
    /// requested, the trailing input frames are dropped.
    pub fn write(&mut self, data: &[i16], frames: usize) -> usize {
        let frames = frames.min(data.len() / CHANNELS);
        let n = frames.min(self.free_space());
        if n < frames {
            self.stats
                .overrun_frames
                .fetch_add((frames - n) as u64, Ordering::Relaxed);
        }
        if n == 0 {
            return 0;
        }

        let Ok(mut chunk) = self.producer.write_chunk(n * CHANNELS) else {
            return 0;
        };
        // Wrap-around arrives as two slices: two linear copies
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&data[..split]);
        second.copy_from_slice(&data[split..n * CHANNELS]);
        chunk.commit_all();
        n
    }

    /// Store device-format frames with any channel count.
    ///
    /// Mono input is duplicated into both channels; channels beyond the
    /// second are discarded. Returns the number of frames stored.
    pub fn write_interleaved(&mut self, data: &[i16], channels: usize) -> usize {
        if channels == CHANNELS {
            return self.write(data, data.len() / CHANNELS);
        }
        if channels == 0 {
            return 0;
        }

        let frames = data.len() / channels;
        let n = frames.min(self.free_space());
        if n < frames {
            self.stats
                .overrun_frames
                .fetch_add((frames - n) as u64, Ordering::Relaxed);
        }
        if n == 0 {
            return 0;
        }

        let Ok(mut chunk) = self.producer.write_chunk(n * CHANNELS) else {
            return 0;
        };
        let right = if channels > 1 { 1 } else { 0 };
        let mut source = data
            .chunks_exact(channels)
            .take(n)
            .flat_map(|frame| [frame[0], frame[right]]);
        let (first, second) = chunk.as_mut_slices();
        for slot in first.iter_mut().chain(second.iter_mut()) {
            *slot = source.next().unwrap_or(0);
        }
        chunk.commit_all();
        n
    }

    /// Frames currently queued (may be stale by the time it is used)
    pub fn available(&self) -> usize {
        self.capacity - self.free_space()
    }

    /// Frames that can be written without dropping
    pub fn free_space(&self) -> usize {
        self.producer.slots() / CHANNELS
    }

    /// Occupancy as a fraction of capacity (0.0 - 1.0)
    pub fn fill_level(&self) -> f32 {
        self.available() as f32 / self.capacity as f32
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> Arc<RingStats> {
        Arc::clone(&self.stats)
    }
}

/// Consumer end, owned by the render callback
pub struct RingReader {
    consumer: rtrb::Consumer<i16>,
    stats: Arc<RingStats>,
    capacity: usize,
}

impl RingReader {
    /// Copy up to `frames` stereo frames into `out`.
    ///
    /// Returns the number of frames copied; the rest of the requested
    /// region of `out` is zero-filled.
    pub fn read(&mut self, out: &mut [i16], frames: usize) -> usize {
        let frames = frames.min(out.len() / CHANNELS);
        let n = frames.min(self.available());

        if n > 0 {
            if let Ok(chunk) = self.consumer.read_chunk(n * CHANNELS) {
                let (first, second) = chunk.as_slices();
                let split = first.len();
                out[..split].copy_from_slice(first);
                out[split..n * CHANNELS].copy_from_slice(second);
                chunk.commit_all();
            }
        }

        out[n * CHANNELS..frames * CHANNELS].fill(0);
        if n < frames {
            self.stats
                .underrun_frames
                .fetch_add((frames - n) as u64, Ordering::Relaxed);
        }
        n
    }

    /// Discard everything queued. Only meaningful while the writer is idle
    /// (stream start), otherwise frames written concurrently may survive.
    pub fn clear(&mut self) {
        let queued = self.consumer.slots();
        if let Ok(chunk) = self.consumer.read_chunk(queued) {
            chunk.commit_all();
        }
    }

    pub fn available(&self) -> usize {
        self.consumer.slots() / CHANNELS
    }

    pub fn free_space(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn fill_level(&self) -> f32 {
        self.available() as f32 / self.capacity as f32
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> Arc<RingStats> {
        Arc::clone(&self.stats)
    }
}
