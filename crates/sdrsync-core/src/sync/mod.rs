//! Offset measurement and automatic alignment
//!
//! - **analysis**: GCC-PHAT-β on Hilbert envelopes with voice gating and
//!   multi-band weighting (pure functions, no threads)
//! - **estimator**: capture buffers fed by the mixer plus a one-slot worker
//!   that runs the analysis
//! - **controller**: auto-sync state machine and correction policy
//! - **service**: thread driving the controller from ticks and commands

pub mod analysis;
mod controller;
mod estimator;
mod mode;
mod service;

pub use analysis::{analyze, Analyzer, PeakPick, SyncFailure, SyncResult};
pub use controller::{
    plan_correction, AutoSync, Correction, SyncState, AUTO_SYNC_INTERVAL_SECS,
    MAX_AUTO_CORRECTION_MS,
};
pub use estimator::{CaptureTap, EstimatorError, EstimatorResult, OffsetEstimator};
pub use mode::{RadioMode, SignalMode, UnknownRadioMode};
pub use service::{SyncCommand, SyncEvent, SyncService, SyncServiceConfig, SyncTarget};
