//! offset-probe - measure the offset between two recordings
//!
//! ```text
//! offset-probe <radio.wav> <remote.wav> [--cw]
//! ```
//!
//! Both files are mixed down to mono and analysed at their own sample rate
//! over the first capture window (1.5 s voice, 3 s CW). A positive delay
//! means the second file lags the first.

use std::path::Path;

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader};

use sdrsync_core::sync::{analyze, SignalMode};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = if args.iter().any(|arg| arg == "--cw") {
        SignalMode::Cw
    } else {
        SignalMode::Voice
    };
    let files: Vec<&String> = args.iter().filter(|arg| !arg.starts_with("--")).collect();
    let [radio_path, remote_path] = files.as_slice() else {
        bail!("usage: offset-probe <radio.wav> <remote.wav> [--cw]");
    };

    let (radio, radio_rate) = read_mono(Path::new(radio_path))?;
    let (remote, remote_rate) = read_mono(Path::new(remote_path))?;
    if radio_rate != remote_rate {
        bail!(
            "sample rates differ ({} Hz vs {} Hz); resample one file first",
            radio_rate,
            remote_rate
        );
    }

    let window = mode.capture_samples(radio_rate);
    let len = window.min(radio.len()).min(remote.len());
    if len < window {
        log::warn!(
            "Only {:.2} s of audio, {} analysis expects {:.1} s",
            len as f32 / radio_rate as f32,
            mode,
            mode.capture_seconds()
        );
    }

    log::info!("Analysing {} samples at {} Hz in {} mode", len, radio_rate, mode);
    let result = analyze(&radio[..len], &remote[..len], mode, radio_rate);

    println!("mode:       {}", result.mode);
    println!("delay:      {:+.1} ms", result.delay_ms);
    println!("confidence: {:.3}", result.confidence);
    println!("success:    {}", result.success);
    if let Some(failure) = &result.failure {
        println!("reason:     {}", failure);
    }
    Ok(())
}

/// Read a WAV file as mono f32 in [-1, 1]
fn read_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        WavReader::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .with_context(|| format!("Failed to decode {:?}", path))?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .with_context(|| format!("Failed to decode {:?}", path))?
        }
    };

    let mono = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    log::debug!("{:?}: {} Hz, {} ch", path, spec.sample_rate, channels);
    Ok((mono, spec.sample_rate))
}
