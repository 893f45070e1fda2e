//! Offset analysis: envelope GCC-PHAT between the radio and WebSDR captures
//!
//! Pipeline for one capture pair:
//!
//! 1. remove DC, reject signals below [`MIN_RMS`], scale to unit RMS
//! 2. (Voice) require enough 20 ms frames active in both, then zero each
//!    signal's own silent frames
//! 3. Hilbert envelope of each signal, re-normalised
//! 4. cross-spectrum `conj(R) * S` over the mode's band, whitened by
//!    `|X|^β` and weighted per sub-band by mean magnitude
//! 5. inverse FFT, peak search on both lag sides, confidence score
//!
//! A positive delay means the remote lags the radio.

use std::ops::Range;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::types::{ms_to_samples, samples_to_ms, Source, MAX_DELAY_MS};

use super::mode::SignalMode;

/// RMS floor below which a capture is too weak to analyse
pub const MIN_RMS: f32 = 1e-3;

/// Voice activity frame length
pub const VAD_FRAME_MS: f32 = 20.0;

/// Frame RMS above which a frame counts as active
pub const VAD_THRESHOLD: f32 = 5e-3;

/// Minimum share of frames active in both signals
pub const MIN_ACTIVE_FRACTION: f32 = 0.10;

/// Whitening exponent (1.0 = full PHAT)
pub const BETA: f32 = 0.7;

/// Sub-bands used for SNR weighting
pub const NUM_BANDS: usize = 4;

/// Radius around the winning lag excluded from the second-peak search
pub const PEAK_EXCLUSION_MS: f32 = 10.0;

pub const MIN_CONFIDENCE: f32 = 0.05;

/// Smallest correlation peak accepted as a match
pub const MIN_PEAK: f32 = 0.001;

/// Why an analysis did not produce a usable offset
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncFailure {
    #[error("Capture is empty")]
    EmptyCapture,

    #[error("{channel} signal too weak (RMS {rms:.5})")]
    TooWeak { channel: Source, rms: f32 },

    #[error("Not enough voice activity ({:.0}% of frames)", .active_fraction * 100.0)]
    InsufficientActivity { active_fraction: f32 },

    #[error("Analysis band is outside the sample rate")]
    BandOutOfRange,

    #[error("No signal energy in the analysis band")]
    NoBandEnergy,

    #[error("Low confidence ({confidence:.2}, peak {peak:.4})")]
    LowConfidence { confidence: f32, peak: f32 },
}

/// Outcome of one analysis. Failures are data, never errors.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    /// Signed offset in ms; positive means the remote lags the radio
    pub delay_ms: f32,
    /// Match quality in `[0, 1]`
    pub confidence: f32,
    pub success: bool,
    pub mode: SignalMode,
    pub failure: Option<SyncFailure>,
}

impl SyncResult {
    pub fn failed(mode: SignalMode, failure: SyncFailure) -> Self {
        Self {
            delay_ms: 0.0,
            confidence: 0.0,
            success: false,
            mode,
            failure: Some(failure),
        }
    }
}

/// Best lag found in a correlation window and the figures behind its score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakPick {
    /// Signed lag in samples
    pub lag: isize,
    pub peak: f32,
    /// Largest local maximum outside the exclusion radius (0 when none)
    pub second: f32,
    /// Mean absolute correlation over the window
    pub average: f32,
}

/// Runs analyses at one sample rate, reusing FFT plans between runs
pub struct Analyzer {
    planner: FftPlanner<f32>,
    sample_rate: u32,
}

impl Analyzer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            planner: FftPlanner::new(),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Estimate the offset of `remote` relative to `radio`.
    ///
    /// Both inputs are mono; the longer one is truncated to the shorter.
    pub fn analyze(&mut self, radio: &[f32], remote: &[f32], mode: SignalMode) -> SyncResult {
        match self.correlate(radio, remote, mode) {
            Ok(result) => result,
            Err(failure) => {
                log::debug!("{} analysis rejected: {}", mode, failure);
                SyncResult::failed(mode, failure)
            }
        }
    }

    fn correlate(
        &mut self,
        radio: &[f32],
        remote: &[f32],
        mode: SignalMode,
    ) -> Result<SyncResult, SyncFailure> {
        let len = radio.len().min(remote.len());
        if len < 2 {
            return Err(SyncFailure::EmptyCapture);
        }
        let mut radio = radio[..len].to_vec();
        let mut remote = remote[..len].to_vec();

        let radio_rms = remove_dc(&mut radio);
        let remote_rms = remove_dc(&mut remote);
        for (channel, rms) in [(Source::Radio, radio_rms), (Source::Remote, remote_rms)] {
            if !(rms >= MIN_RMS) {
                return Err(SyncFailure::TooWeak { channel, rms });
            }
        }

        // Activity is judged on the unscaled level, gating applies after scaling
        let activity = if mode.uses_vad() {
            let frame_len = ms_to_samples(VAD_FRAME_MS, self.sample_rate).max(1);
            let radio_mask = activity_mask(&radio, frame_len);
            let remote_mask = activity_mask(&remote, frame_len);
            let both = radio_mask
                .iter()
                .zip(&remote_mask)
                .filter(|&(&a, &b)| a && b)
                .count();
            let active_fraction = both as f32 / radio_mask.len() as f32;
            if active_fraction < MIN_ACTIVE_FRACTION {
                return Err(SyncFailure::InsufficientActivity { active_fraction });
            }
            Some((frame_len, radio_mask, remote_mask))
        } else {
            None
        };

        scale(&mut radio, 1.0 / radio_rms);
        scale(&mut remote, 1.0 / remote_rms);
        // A shared mask would put the same on/off pattern on both at lag 0
        if let Some((frame_len, radio_mask, remote_mask)) = &activity {
            gate(&mut radio, *frame_len, radio_mask);
            gate(&mut remote, *frame_len, remote_mask);
        }

        let mut radio_env = self.envelope(&radio);
        let mut remote_env = self.envelope(&remote);
        for (channel, env) in [(Source::Radio, &mut radio_env), (Source::Remote, &mut remote_env)] {
            let rms = remove_dc(env);
            if !(rms > 0.0) {
                return Err(SyncFailure::TooWeak { channel, rms });
            }
            scale(env, 1.0 / rms);
        }

        let cc = self.cross_correlate(&radio_env, &remote_env, mode)?;
        let n = cc.len();

        let max_lag = ms_to_samples(MAX_DELAY_MS, self.sample_rate)
            .min(len - 1)
            .min(n / 2 - 1);
        // window[i] holds lag i - max_lag
        let window: Vec<f32> = (0..=2 * max_lag)
            .map(|i| {
                let lag = i as isize - max_lag as isize;
                if lag >= 0 {
                    cc[lag as usize]
                } else {
                    cc[n - lag.unsigned_abs()]
                }
            })
            .collect();

        let exclusion = ms_to_samples(PEAK_EXCLUSION_MS, self.sample_rate);
        let pick = pick_peak(&window, max_lag, exclusion);
        let confidence = confidence(&pick);
        let delay_ms = samples_to_ms(pick.lag as f32, self.sample_rate);
        let success = confidence >= MIN_CONFIDENCE && pick.peak > MIN_PEAK;

        let failure = (!success).then_some(SyncFailure::LowConfidence {
            confidence,
            peak: pick.peak,
        });
        if let Some(failure) = &failure {
            log::debug!("{} analysis at {:.1} ms rejected: {}", mode, delay_ms, failure);
        }

        Ok(SyncResult {
            delay_ms,
            confidence,
            success,
            mode,
            failure,
        })
    }

    /// Magnitude of the analytic signal (FFT Hilbert transform)
    pub fn envelope(&mut self, signal: &[f32]) -> Vec<f32> {
        let n = signal.len().next_power_of_two();
        let mut spectrum = to_complex(signal, n);
        self.planner.plan_fft_forward(n).process(&mut spectrum);

        let half = n / 2;
        for (k, bin) in spectrum.iter_mut().enumerate() {
            let h: f32 = if k == 0 || k == half {
                1.0
            } else if k < half {
                2.0
            } else {
                0.0
            };
            *bin *= h;
        }

        self.planner.plan_fft_inverse(n).process(&mut spectrum);
        let norm = 1.0 / n as f32;
        spectrum[..signal.len()]
            .iter()
            .map(|c| c.norm() * norm)
            .collect()
    }

    /// Band-weighted GCC-PHAT-β of two equal-length envelopes.
    /// Returns the real correlation in FFT lag order (negative lags wrap).
    fn cross_correlate(
        &mut self,
        radio: &[f32],
        remote: &[f32],
        mode: SignalMode,
    ) -> Result<Vec<f32>, SyncFailure> {
        let n = (2 * radio.len()).next_power_of_two();
        let mut radio_spec = to_complex(radio, n);
        let mut remote_spec = to_complex(remote, n);
        let fft = self.planner.plan_fft_forward(n);
        fft.process(&mut radio_spec);
        fft.process(&mut remote_spec);

        let bins = band_bins(mode, n, self.sample_rate).ok_or(SyncFailure::BandOutOfRange)?;
        let lo = bins.start;
        let cross: Vec<Complex<f32>> = bins
            .map(|k| radio_spec[k].conj() * remote_spec[k])
            .collect();

        let bands = sub_bands(cross.len(), NUM_BANDS);
        let weights: Vec<f32> = bands
            .iter()
            .map(|band| {
                cross[band.clone()].iter().map(|x| x.norm()).sum::<f32>() / band.len() as f32
            })
            .collect();
        let total: f32 = weights.iter().sum();
        if !(total > 0.0) {
            return Err(SyncFailure::NoBandEnergy);
        }

        let mut weighted = vec![Complex::new(0.0f32, 0.0); n];
        for (band, weight) in bands.iter().zip(&weights) {
            let share = weight / total;
            for i in band.clone() {
                let x = cross[i];
                let magnitude = x.norm();
                if magnitude <= f32::MIN_POSITIVE {
                    continue;
                }
                let g = x * (share / magnitude.powf(BETA));
                let k = lo + i;
                weighted[k] = g;
                // Hermitian mirror keeps the correlation real
                weighted[n - k] = g.conj();
            }
        }

        self.planner.plan_fft_inverse(n).process(&mut weighted);
        let norm = 1.0 / n as f32;
        Ok(weighted.iter().map(|c| c.re * norm).collect())
    }
}

/// One-shot analysis with a fresh planner
pub fn analyze(radio: &[f32], remote: &[f32], mode: SignalMode, sample_rate: u32) -> SyncResult {
    Analyzer::new(sample_rate).analyze(radio, remote, mode)
}

/// Find the winning lag in `window` (index `i` is lag `i - max_lag`).
///
/// The positive side covers lags `0..=max_lag`, the negative side
/// `-max_lag..=-1`; ties go to the positive side.
pub fn pick_peak(window: &[f32], max_lag: usize, exclusion: usize) -> PeakPick {
    let argmax = |range: Range<usize>| {
        range.fold(None, |best: Option<(usize, f32)>, i| match best {
            Some((_, v)) if v >= window[i] => best,
            _ => Some((i, window[i])),
        })
    };
    let positive = argmax(max_lag..window.len());
    let negative = argmax(0..max_lag);

    let (index, peak) = match (positive, negative) {
        (Some(p), Some(n)) if n.1 > p.1 => n,
        (Some(p), _) => p,
        (None, Some(n)) => n,
        (None, None) => (max_lag, 0.0),
    };

    let mut second = 0.0f32;
    for i in 0..window.len() {
        if i.abs_diff(index) <= exclusion {
            continue;
        }
        let v = window[i];
        let left = if i > 0 { window[i - 1] } else { f32::NEG_INFINITY };
        let right = window.get(i + 1).copied().unwrap_or(f32::NEG_INFINITY);
        if v >= left && v >= right && v > second {
            second = v;
        }
    }

    let average = if window.is_empty() {
        0.0
    } else {
        window.iter().map(|v| v.abs()).sum::<f32>() / window.len() as f32
    };

    PeakPick {
        lag: index as isize - max_lag as isize,
        peak,
        second,
        average,
    }
}

/// Score a peak: min of the peak-to-second and peak-to-average ratios,
/// mapped to `[0, 1]` by `(r - 1) / 3` and `(r - 1) / 9`.
pub fn confidence(pick: &PeakPick) -> f32 {
    if !(pick.peak > 0.0) {
        return 0.0;
    }
    let ratio = |denominator: f32| {
        if denominator > 0.0 {
            pick.peak / denominator
        } else {
            f32::INFINITY
        }
    };
    let c1 = ((ratio(pick.second) - 1.0) / 3.0).clamp(0.0, 1.0);
    let c2 = ((ratio(pick.average) - 1.0) / 9.0).clamp(0.0, 1.0);
    c1.min(c2)
}

/// FFT bins covering the mode's band for an `n`-point transform
fn band_bins(mode: SignalMode, n: usize, sample_rate: u32) -> Option<Range<usize>> {
    let (f_lo, f_hi) = mode.band_hz();
    let bin_hz = sample_rate as f32 / n as f32;
    let lo = ((f_lo / bin_hz).ceil() as usize).max(1);
    let hi = ((f_hi / bin_hz).floor() as usize).min((n / 2).saturating_sub(1));
    (hi >= lo && hi - lo + 1 >= NUM_BANDS).then(|| lo..hi + 1)
}

/// Split `0..len` into `count` contiguous ranges of equal width
/// (the last absorbs the remainder)
fn sub_bands(len: usize, count: usize) -> Vec<Range<usize>> {
    let width = len / count;
    (0..count)
        .map(|b| {
            let start = b * width;
            let end = if b + 1 == count { len } else { start + width };
            start..end
        })
        .collect()
}

fn to_complex(signal: &[f32], n: usize) -> Vec<Complex<f32>> {
    let mut buf = vec![Complex::new(0.0f32, 0.0); n];
    for (dst, &x) in buf.iter_mut().zip(signal) {
        dst.re = x;
    }
    buf
}

fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|x| x * x).sum::<f32>() / signal.len() as f32).sqrt()
}

/// Subtract the mean and return the RMS of what is left
fn remove_dc(signal: &mut [f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    let mean = signal.iter().sum::<f32>() / signal.len() as f32;
    signal.iter_mut().for_each(|x| *x -= mean);
    rms(signal)
}

fn scale(signal: &mut [f32], factor: f32) {
    signal.iter_mut().for_each(|x| *x *= factor);
}

/// Per-frame activity decision (the trailing partial frame counts as a frame)
fn activity_mask(signal: &[f32], frame_len: usize) -> Vec<bool> {
    signal
        .chunks(frame_len)
        .map(|frame| rms(frame) > VAD_THRESHOLD)
        .collect()
}

/// Zero every frame whose mask entry is false
fn gate(signal: &mut [f32], frame_len: usize, mask: &[bool]) {
    for (frame, &active) in signal.chunks_mut(frame_len).zip(mask) {
        if !active {
            frame.fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const SR: u32 = 16000;

    fn noise(len: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.random_range(-0.5f32..0.5)).collect()
    }

    /// Radio and a remote copy lagging by `lag` samples
    fn lagged_pair(len: usize, lag: usize, seed: u64) -> (Vec<f32>, Vec<f32>) {
        let src = noise(len + lag, seed);
        (src[lag..lag + len].to_vec(), src[..len].to_vec())
    }

    #[test]
    fn test_envelope_of_steady_tone_is_flat() {
        let mut analyzer = Analyzer::new(SR);
        // 256 whole cycles in 4096 samples
        let tone: Vec<f32> = (0..4096)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / SR as f32).sin())
            .collect();
        let env = analyzer.envelope(&tone);
        assert_eq!(env.len(), tone.len());
        for (i, &e) in env.iter().enumerate() {
            assert!((e - 0.5).abs() < 1e-3, "envelope[{}] = {}", i, e);
        }
    }

    #[test]
    fn test_identical_signals_give_zero_lag() {
        let s = noise(SignalMode::Voice.capture_samples(SR), 7);
        let result = analyze(&s, &s, SignalMode::Voice, SR);
        assert!(result.success, "{:?}", result.failure);
        assert_eq!(result.delay_ms, 0.0);
        assert!(result.confidence > 0.5, "confidence {}", result.confidence);
    }

    #[test]
    fn test_delayed_copy_rounds_to_lag() {
        let len = SignalMode::Voice.capture_samples(SR);
        let (radio, remote) = lagged_pair(len, 800, 11);
        let result = analyze(&radio, &remote, SignalMode::Voice, SR);
        assert!(result.success, "{:?}", result.failure);
        let lag = (result.delay_ms * SR as f32 / 1000.0).round() as isize;
        assert_eq!(lag, 800);
    }

    #[test]
    fn test_swapping_inputs_negates_delay() {
        let len = SignalMode::Voice.capture_samples(SR);
        let (radio, remote) = lagged_pair(len, 1920, 23);
        let forward = analyze(&radio, &remote, SignalMode::Voice, SR);
        let backward = analyze(&remote, &radio, SignalMode::Voice, SR);
        assert!(forward.success && backward.success);
        let one_sample_ms = 1000.0 / SR as f32;
        assert!((forward.delay_ms + backward.delay_ms).abs() <= one_sample_ms + 1e-3);
        assert!(forward.delay_ms > 0.0);
    }

    #[test]
    fn test_weak_signal_rejected() {
        let loud = noise(8000, 1);
        let quiet: Vec<f32> = noise(8000, 2).iter().map(|x| x * 1e-4).collect();
        let result = analyze(&loud, &quiet, SignalMode::Cw, SR);
        assert!(!result.success);
        assert!(matches!(
            result.failure,
            Some(SyncFailure::TooWeak { channel: Source::Remote, .. })
        ));
    }

    #[test]
    fn test_dc_only_counts_as_weak() {
        let dc = vec![0.3; 8000];
        let result = analyze(&dc, &dc, SignalMode::Cw, SR);
        assert!(matches!(
            result.failure,
            Some(SyncFailure::TooWeak { channel: Source::Radio, .. })
        ));
    }

    #[test]
    fn test_sparse_voice_rejected() {
        let len = SignalMode::Voice.capture_samples(SR);
        let mut radio = noise(len, 3);
        // Only the first 5% carries signal
        radio[len / 20..].fill(0.0);
        let remote = noise(len, 4);
        let result = analyze(&radio, &remote, SignalMode::Voice, SR);
        match result.failure {
            Some(SyncFailure::InsufficientActivity { active_fraction }) => {
                assert!(active_fraction < MIN_ACTIVE_FRACTION);
            }
            other => panic!("expected activity rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_capture() {
        let result = analyze(&[], &[0.5], SignalMode::Voice, SR);
        assert_eq!(result.failure, Some(SyncFailure::EmptyCapture));
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_pick_peak_prefers_larger_side() {
        // max_lag 5: indices 0..=10, lag = i - 5
        let mut window = vec![0.01; 11];
        window[2] = 0.4; // lag -3
        window[8] = 0.3; // lag +3
        let pick = pick_peak(&window, 5, 1);
        assert_eq!(pick.lag, -3);
        assert_eq!(pick.peak, 0.4);
        assert_eq!(pick.second, 0.3);
    }

    #[test]
    fn test_second_peak_ignores_exclusion_zone() {
        let mut window = vec![0.0; 21];
        window[10] = 1.0;
        window[11] = 0.9;
        window[18] = 0.2;
        let pick = pick_peak(&window, 10, 2);
        assert_eq!(pick.lag, 0);
        assert_eq!(pick.second, 0.2);
    }

    #[test]
    fn test_confidence_mapping() {
        let strong = PeakPick { lag: 0, peak: 1.0, second: 0.2, average: 0.05 };
        assert_eq!(confidence(&strong), 1.0);

        // r1 = 1.3 -> 0.1, r2 = 10 -> 1.0
        let ambiguous = PeakPick { lag: 0, peak: 1.3, second: 1.0, average: 0.13 };
        assert!((confidence(&ambiguous) - 0.1).abs() < 1e-5);

        let negative = PeakPick { lag: 0, peak: -0.2, second: 0.0, average: 0.1 };
        assert_eq!(confidence(&negative), 0.0);
    }

    #[test]
    fn test_band_bins() {
        let bins = band_bins(SignalMode::Voice, 65536, SR).unwrap();
        let bin_hz = SR as f32 / 65536.0;
        assert!(bins.start as f32 * bin_hz >= 300.0);
        assert!((bins.end - 1) as f32 * bin_hz <= 3000.0);
        // Voice band does not fit at 1 kHz
        assert!(band_bins(SignalMode::Voice, 16, 1000).is_none());
    }

    #[test]
    fn test_sub_bands_cover_range() {
        let bands = sub_bands(10, 4);
        assert_eq!(bands, vec![0..2, 2..4, 4..6, 6..10]);
    }
}
