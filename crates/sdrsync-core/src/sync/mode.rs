//! Signal modes for the offset estimator
//!
//! The radio reports its demodulator as a mode string. Keyed modes (CW and
//! RTTY) are correlated on their keying envelope over a longer capture;
//! everything else is treated as voice.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the captured audio is analysed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignalMode {
    /// Speech: 300 - 3000 Hz envelope band, voice-activity gating
    #[default]
    Voice,
    /// On/off keying: 1 - 100 Hz keying-rate band, no gating
    Cw,
}

impl SignalMode {
    /// Capture length in seconds
    pub fn capture_seconds(&self) -> f32 {
        match self {
            SignalMode::Voice => 1.5,
            SignalMode::Cw => 3.0,
        }
    }

    /// Capture length in samples at `sample_rate`
    pub fn capture_samples(&self, sample_rate: u32) -> usize {
        (self.capture_seconds() * sample_rate as f32).round() as usize
    }

    /// Band kept in the envelope cross-spectrum, in Hz
    pub fn band_hz(&self) -> (f32, f32) {
        match self {
            SignalMode::Voice => (300.0, 3000.0),
            SignalMode::Cw => (1.0, 100.0),
        }
    }

    pub fn uses_vad(&self) -> bool {
        matches!(self, SignalMode::Voice)
    }

    /// Mode implied by a radio mode hint
    pub fn from_radio_mode(mode: RadioMode) -> Self {
        match mode {
            RadioMode::Cw | RadioMode::CwR | RadioMode::Rtty | RadioMode::RttyR => SignalMode::Cw,
            _ => SignalMode::Voice,
        }
    }

    /// Mode implied by a raw mode string; unknown strings count as voice
    pub fn from_hint(hint: &str) -> Self {
        hint.parse::<RadioMode>()
            .map(Self::from_radio_mode)
            .unwrap_or_default()
    }
}

impl fmt::Display for SignalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalMode::Voice => write!(f, "Voice"),
            SignalMode::Cw => write!(f, "CW"),
        }
    }
}

/// Demodulator mode as reported by the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioMode {
    Lsb,
    Usb,
    Cw,
    CwR,
    Am,
    Fm,
    Rtty,
    RttyR,
    Dv,
}

/// Mode string not in the known set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown radio mode: {0}")]
pub struct UnknownRadioMode(pub String);

impl FromStr for RadioMode {
    type Err = UnknownRadioMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LSB" => Ok(RadioMode::Lsb),
            "USB" => Ok(RadioMode::Usb),
            "CW" => Ok(RadioMode::Cw),
            "CW-R" => Ok(RadioMode::CwR),
            "AM" => Ok(RadioMode::Am),
            "FM" => Ok(RadioMode::Fm),
            "RTTY" => Ok(RadioMode::Rtty),
            "RTTY-R" => Ok(RadioMode::RttyR),
            "DV" => Ok(RadioMode::Dv),
            other => Err(UnknownRadioMode(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_modes_map_to_cw() {
        for hint in ["CW", "CW-R", "RTTY", "RTTY-R", "cw"] {
            assert_eq!(SignalMode::from_hint(hint), SignalMode::Cw, "{}", hint);
        }
    }

    #[test]
    fn test_voice_modes() {
        for hint in ["LSB", "USB", "AM", "FM", "DV", "PKTUSB", ""] {
            assert_eq!(SignalMode::from_hint(hint), SignalMode::Voice, "{}", hint);
        }
    }

    #[test]
    fn test_capture_lengths() {
        assert_eq!(SignalMode::Voice.capture_samples(48000), 72000);
        assert_eq!(SignalMode::Cw.capture_samples(48000), 144000);
        assert!(SignalMode::Voice.uses_vad());
        assert!(!SignalMode::Cw.uses_vad());
    }

    #[test]
    fn test_unknown_mode_error() {
        let err = "SSTV".parse::<RadioMode>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown radio mode: SSTV");
    }
}
