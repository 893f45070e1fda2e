//! S-meter history
//!
//! The radio reports signal strength in real time while its audio is played
//! back late by the delay line. Readings are kept with their timestamp so the
//! displayed value can be taken from the moment the audible signal was
//! received.

use std::collections::VecDeque;

/// Entries kept by default (one minute at 10 readings per second)
pub const DEFAULT_SMETER_CAPACITY: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SMeterReading {
    pub timestamp_ms: u64,
    pub value_db: f32,
}

/// Bounded, time-ordered S-meter readings
#[derive(Debug, Clone)]
pub struct SMeterHistory {
    readings: VecDeque<SMeterReading>,
    capacity: usize,
}

impl SMeterHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SMETER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a reading. Readings older than the newest one are ignored.
    pub fn push(&mut self, timestamp_ms: u64, value_db: f32) {
        if let Some(last) = self.readings.back() {
            if timestamp_ms < last.timestamp_ms {
                return;
            }
        }
        if self.readings.len() == self.capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(SMeterReading {
            timestamp_ms,
            value_db,
        });
    }

    /// Newest reading taken at or before `timestamp_ms`
    pub fn value_at(&self, timestamp_ms: u64) -> Option<f32> {
        let idx = self
            .readings
            .partition_point(|r| r.timestamp_ms <= timestamp_ms);
        idx.checked_sub(1).map(|i| self.readings[i].value_db)
    }

    /// Reading that matches audio delayed by `delay_ms` at time `now_ms`
    pub fn delayed_value(&self, now_ms: u64, delay_ms: f32) -> Option<f32> {
        let delay = delay_ms.max(0.0).round() as u64;
        self.value_at(now_ms.saturating_sub(delay))
    }

    pub fn latest(&self) -> Option<SMeterReading> {
        self.readings.back().copied()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }
}

impl Default for SMeterHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_earlier_lookup() {
        let mut history = SMeterHistory::new();
        history.push(1000, -90.0);
        history.push(1100, -80.0);
        history.push(1200, -70.0);

        assert_eq!(history.value_at(999), None);
        assert_eq!(history.value_at(1000), Some(-90.0));
        assert_eq!(history.value_at(1150), Some(-80.0));
        assert_eq!(history.value_at(5000), Some(-70.0));
    }

    #[test]
    fn test_delayed_value() {
        let mut history = SMeterHistory::new();
        for i in 0..20u64 {
            history.push(i * 100, -100.0 + i as f32);
        }
        // 420 ms behind 1900 ms is 1480 ms: the 1400 ms reading
        assert_eq!(history.delayed_value(1900, 420.0), Some(-86.0));
        assert_eq!(history.delayed_value(1900, 0.0), Some(-81.0));
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut history = SMeterHistory::with_capacity(3);
        for i in 0..5u64 {
            history.push(i, i as f32);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.value_at(1), None);
        assert_eq!(history.value_at(2), Some(2.0));
    }

    #[test]
    fn test_out_of_order_ignored() {
        let mut history = SMeterHistory::new();
        history.push(500, -60.0);
        history.push(400, -10.0);
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().map(|r| r.value_db), Some(-60.0));
    }
}
