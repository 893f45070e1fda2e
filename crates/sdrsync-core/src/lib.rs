//! sdrsync-core - listen to a local transceiver and a WebSDR in sync
//!
//! The WebSDR stream arrives over the Internet with an unknown, slowly
//! changing lag. This crate mixes both streams, measures the lag from the
//! audio itself and delays the radio so both play in phase.
//!
//! - [`audio`]: devices, stream construction, capture rings
//! - [`engine`]: delay line, mixer graph, parameters, engine lifecycle
//! - [`sync`]: offset estimator and auto-sync
//! - [`recording`]: WAV recording of the mix
//! - [`config`]: persisted settings

pub mod audio;
pub mod config;
pub mod engine;
pub mod recording;
pub mod sync;
pub mod types;

pub use types::*;
