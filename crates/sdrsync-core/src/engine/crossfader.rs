//! Crossfader between the radio (left) and the WebSDR (right)
//!
//! At centre both channels play at full level, hard-panned to their own
//! side. Moving towards one side fades the other channel out while pulling
//! the favoured channel towards the centre.

/// Crossfader travel in either direction
pub const CROSSFADER_RANGE: i32 = 100;

/// Gains and pans derived from a crossfader position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossfaderLevels {
    pub radio_gain: f32,
    pub radio_pan: f32,
    pub remote_gain: f32,
    pub remote_pan: f32,
}

/// Map a position in `[-100, 100]` to channel gains and pans
pub fn crossfader_levels(position: i32) -> CrossfaderLevels {
    let position = position.clamp(-CROSSFADER_RANGE, CROSSFADER_RANGE);
    let t = position.unsigned_abs() as f32 / CROSSFADER_RANGE as f32;

    if position < 0 {
        CrossfaderLevels {
            radio_gain: 1.0,
            radio_pan: -1.0 + t,
            remote_gain: 1.0 - t,
            remote_pan: 1.0,
        }
    } else if position > 0 {
        CrossfaderLevels {
            radio_gain: 1.0 - t,
            radio_pan: -1.0,
            remote_gain: 1.0,
            remote_pan: 1.0 - t,
        }
    } else {
        CrossfaderLevels {
            radio_gain: 1.0,
            radio_pan: -1.0,
            remote_gain: 1.0,
            remote_pan: 1.0,
        }
    }
}
