//! Auto-sync state machine and correction policy
//!
//! ```text
//!            enable + running
//!   Idle ─────────────────────► Counting ──(countdown hits 0)──► Capturing
//!                                  ▲  ▲                              │
//!                                  │  └──────── failure ─────────────┤
//!                                  │                                 │ success
//!                                  └──────── applied ──── Applying ◄─┘
//!
//!   any ──(disable / engine stop)──► Disabled
//! ```
//!
//! The controller holds no threads or timers; [`super::SyncService`] feeds
//! it ticks, commands and estimator results.

use crate::types::MAX_DELAY_MS;

use super::analysis::{SyncFailure, SyncResult};
use super::mode::SignalMode;

/// Seconds between automatic captures
pub const AUTO_SYNC_INTERVAL_SECS: u32 = 15;

/// Largest correction auto-sync applies without user action
pub const MAX_AUTO_CORRECTION_MS: f32 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncState {
    Idle,
    /// Seconds left until the next automatic capture
    Counting(u32),
    Capturing { mode: SignalMode, manual: bool },
    Applying { manual: bool },
    Disabled,
}

/// What to do with a finished analysis
#[derive(Debug, Clone, PartialEq)]
pub enum Correction {
    /// Move the radio delay to `delay_ms`. `residual_ms` is the part of the
    /// measured offset the delay line cannot reach (negative lag).
    Apply { delay_ms: f32, residual_ms: f32 },
    /// Auto correction larger than [`MAX_AUTO_CORRECTION_MS`]
    Reject { delta_ms: f32 },
    /// Analysis did not succeed; the setpoint stays where it is
    Failed(Option<SyncFailure>),
}

/// Turn an analysis into a delay setpoint.
///
/// Manual syncs apply any success. Automatic ones only move the setpoint by
/// up to [`MAX_AUTO_CORRECTION_MS`]. Negative offsets clamp to zero in both
/// cases.
pub fn plan_correction(result: &SyncResult, current_ms: f32, manual: bool) -> Correction {
    if !result.success {
        return Correction::Failed(result.failure.clone());
    }

    let delay_ms = result.delay_ms.clamp(0.0, MAX_DELAY_MS);
    let residual_ms = result.delay_ms - delay_ms;
    let delta_ms = delay_ms - current_ms;

    if !manual && delta_ms.abs() > MAX_AUTO_CORRECTION_MS {
        return Correction::Reject { delta_ms };
    }
    Correction::Apply {
        delay_ms,
        residual_ms,
    }
}

/// Periodic sync state machine
#[derive(Debug, Clone)]
pub struct AutoSync {
    state: SyncState,
    enabled: bool,
    engine_running: bool,
    interval_secs: u32,
}

impl AutoSync {
    pub fn new() -> Self {
        Self::with_interval(AUTO_SYNC_INTERVAL_SECS)
    }

    pub fn with_interval(interval_secs: u32) -> Self {
        Self {
            state: SyncState::Idle,
            enabled: false,
            engine_running: false,
            interval_secs: interval_secs.max(1),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_engine_running(&self) -> bool {
        self.engine_running
    }

    /// Seconds left on the countdown, if counting
    pub fn countdown(&self) -> Option<u32> {
        match self.state {
            SyncState::Counting(remaining) => Some(remaining),
            _ => None,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        if self.engine_running && !self.is_capturing() {
            self.restart_countdown();
        }
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.state = SyncState::Disabled;
    }

    pub fn engine_started(&mut self) {
        self.engine_running = true;
        if self.enabled {
            self.restart_countdown();
        } else {
            self.state = SyncState::Idle;
        }
    }

    pub fn engine_stopped(&mut self) {
        self.engine_running = false;
        self.state = SyncState::Disabled;
    }

    /// One second elapsed. Returns true when an automatic capture is due.
    pub fn tick(&mut self) -> bool {
        match self.state {
            SyncState::Counting(remaining) if remaining > 1 => {
                self.state = SyncState::Counting(remaining - 1);
                false
            }
            SyncState::Counting(_) => {
                self.state = SyncState::Counting(0);
                true
            }
            _ => false,
        }
    }

    /// Whether a manual sync may start now
    pub fn can_sync_manually(&self) -> bool {
        self.engine_running && !self.is_capturing() && !self.is_applying()
    }

    /// The estimator was armed
    pub fn capture_started(&mut self, mode: SignalMode, manual: bool) {
        self.state = SyncState::Capturing { mode, manual };
    }

    /// The estimator refused to arm; try again next cycle
    pub fn capture_refused(&mut self) {
        self.settle();
    }

    /// Feed a finished analysis. Returns the planned correction and whether
    /// the capture was manual, or None if no capture was expected.
    ///
    /// On [`Correction::Apply`] the controller stays in `Applying` until
    /// [`AutoSync::correction_applied`] is called.
    pub fn capture_finished(
        &mut self,
        result: &SyncResult,
        current_ms: f32,
    ) -> Option<(Correction, bool)> {
        let SyncState::Capturing { manual, .. } = self.state else {
            return None;
        };
        let correction = plan_correction(result, current_ms, manual);
        match correction {
            Correction::Apply { .. } => self.state = SyncState::Applying { manual },
            Correction::Reject { .. } | Correction::Failed(_) => self.settle(),
        }
        Some((correction, manual))
    }

    /// The setpoint from the last [`Correction::Apply`] is in place
    pub fn correction_applied(&mut self) {
        if self.is_applying() {
            self.settle();
        }
    }

    fn is_capturing(&self) -> bool {
        matches!(self.state, SyncState::Capturing { .. })
    }

    fn is_applying(&self) -> bool {
        matches!(self.state, SyncState::Applying { .. })
    }

    fn restart_countdown(&mut self) {
        self.state = SyncState::Counting(self.interval_secs);
    }

    /// Back to counting when auto-sync is on, otherwise rest
    fn settle(&mut self) {
        self.state = match (self.enabled, self.engine_running) {
            (true, true) => SyncState::Counting(self.interval_secs),
            (_, false) => SyncState::Disabled,
            (false, true) => SyncState::Idle,
        };
    }
}

impl Default for AutoSync {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(delay_ms: f32) -> SyncResult {
        SyncResult {
            delay_ms,
            confidence: 0.8,
            success: true,
            mode: SignalMode::Voice,
            failure: None,
        }
    }

    #[test]
    fn test_manual_applies_any_success() {
        assert_eq!(
            plan_correction(&success(820.0), 300.0, true),
            Correction::Apply {
                delay_ms: 820.0,
                residual_ms: 0.0
            }
        );
    }

    #[test]
    fn test_auto_rejects_large_jump() {
        match plan_correction(&success(820.0), 300.0, false) {
            Correction::Reject { delta_ms } => assert!((delta_ms - 520.0).abs() < 1e-3),
            other => panic!("expected rejection, got {:?}", other),
        }
        // Exactly at the limit still applies
        assert!(matches!(
            plan_correction(&success(800.0), 300.0, false),
            Correction::Apply { .. }
        ));
    }

    #[test]
    fn test_negative_offset_clamps_to_zero() {
        for manual in [true, false] {
            assert_eq!(
                plan_correction(&success(-250.0), 0.0, manual),
                Correction::Apply {
                    delay_ms: 0.0,
                    residual_ms: -250.0
                }
            );
        }
    }

    #[test]
    fn test_failure_is_not_applied() {
        let result = SyncResult::failed(SignalMode::Voice, SyncFailure::EmptyCapture);
        assert_eq!(
            plan_correction(&result, 100.0, true),
            Correction::Failed(Some(SyncFailure::EmptyCapture))
        );
    }

    #[test]
    fn test_enable_requires_running_engine() {
        let mut sync = AutoSync::with_interval(3);
        sync.enable();
        assert_eq!(sync.state(), SyncState::Idle);
        sync.engine_started();
        assert_eq!(sync.state(), SyncState::Counting(3));
    }

    #[test]
    fn test_countdown_triggers_capture() {
        let mut sync = AutoSync::with_interval(3);
        sync.engine_started();
        sync.enable();
        assert!(!sync.tick());
        assert!(!sync.tick());
        assert!(sync.tick());
        assert_eq!(sync.countdown(), Some(0));
        sync.capture_started(SignalMode::Cw, false);
        // Ticks while capturing do nothing
        assert!(!sync.tick());
        assert_eq!(
            sync.state(),
            SyncState::Capturing {
                mode: SignalMode::Cw,
                manual: false
            }
        );
    }

    #[test]
    fn test_cycle_returns_to_counting() {
        let mut sync = AutoSync::with_interval(2);
        sync.engine_started();
        sync.enable();
        sync.capture_started(SignalMode::Voice, false);

        let (correction, manual) = sync.capture_finished(&success(120.0), 100.0).unwrap();
        assert!(!manual);
        assert!(matches!(correction, Correction::Apply { .. }));
        assert_eq!(sync.state(), SyncState::Applying { manual: false });
        sync.correction_applied();
        assert_eq!(sync.state(), SyncState::Counting(2));

        // Failure goes straight back to counting
        sync.capture_started(SignalMode::Voice, false);
        let failed = SyncResult::failed(SignalMode::Voice, SyncFailure::NoBandEnergy);
        sync.capture_finished(&failed, 120.0).unwrap();
        assert_eq!(sync.state(), SyncState::Counting(2));
    }

    #[test]
    fn test_manual_sync_without_auto_rests_in_idle() {
        let mut sync = AutoSync::new();
        sync.engine_started();
        assert!(sync.can_sync_manually());
        sync.capture_started(SignalMode::Voice, true);
        assert!(!sync.can_sync_manually());
        sync.capture_finished(&success(420.0), 0.0).unwrap();
        sync.correction_applied();
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[test]
    fn test_engine_stop_disables() {
        let mut sync = AutoSync::with_interval(5);
        sync.engine_started();
        sync.enable();
        sync.capture_started(SignalMode::Voice, false);
        sync.engine_stopped();
        assert_eq!(sync.state(), SyncState::Disabled);
        // A late result is ignored
        assert!(sync.capture_finished(&success(10.0), 0.0).is_none());
        // Auto-sync stays enabled and resumes with the engine
        sync.engine_started();
        assert_eq!(sync.state(), SyncState::Counting(5));
    }

    #[test]
    fn test_disable_from_any_state() {
        let mut sync = AutoSync::new();
        sync.engine_started();
        sync.enable();
        sync.disable();
        assert_eq!(sync.state(), SyncState::Disabled);
        assert!(!sync.tick());
        assert!(!sync.is_enabled());
    }
}
