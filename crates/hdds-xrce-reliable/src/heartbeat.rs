// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Exponential-backoff heartbeat timer for reliable output streams.
//!
//! While unacknowledged data is outstanding the timer fires at
//! `MIN`, `MIN << 1`, `MIN << 2`, ... after arming. An ACKNACK from the peer
//! resets the backoff. Times are monotonic milliseconds supplied by the caller.

/// Default minimum heartbeat interval (milliseconds).
pub const DEFAULT_MIN_HEARTBEAT_INTERVAL_MS: i64 = 1;

/// Backoff exponent wraps at this many tries.
pub const MAX_HEARTBEAT_TRIES: u8 = 63;

/// Timestamp meaning "disarmed".
pub const HEARTBEAT_DISARMED: i64 = i64::MAX;

/// Heartbeat backoff state.
#[derive(Debug, Clone)]
pub struct HeartbeatTimer {
    min_interval_ms: i64,
    next_timestamp: i64,
    tries: u8,
}

impl HeartbeatTimer {
    /// Create a disarmed timer.
    #[must_use]
    pub fn new(min_interval_ms: i64) -> Self {
        Self {
            min_interval_ms: min_interval_ms.max(1),
            next_timestamp: HEARTBEAT_DISARMED,
            tries: 0,
        }
    }

    /// Advance the timer. Returns `true` when a heartbeat must be sent now.
    pub fn update(&mut self, now_ms: i64, outstanding: bool) -> bool {
        if !outstanding {
            self.next_timestamp = HEARTBEAT_DISARMED;
            return false;
        }

        if self.tries == 0 {
            self.next_timestamp = now_ms.saturating_add(self.min_interval_ms);
            self.tries = 1;
            false
        } else if now_ms >= self.next_timestamp {
            let shift = u32::from(self.tries % MAX_HEARTBEAT_TRIES);
            let increment = self
                .min_interval_ms
                .checked_shl(shift)
                .filter(|v| v >> shift == self.min_interval_ms)
                .unwrap_or(i64::MAX);
            let difference = now_ms.saturating_sub(self.next_timestamp);
            self.next_timestamp = self
                .next_timestamp
                .saturating_add(increment.max(difference));
            self.tries = self.tries.wrapping_add(1);
            true
        } else {
            false
        }
    }

    /// Restart the backoff after a successful round trip.
    pub fn reset_tries(&mut self) {
        self.tries = 0;
    }

    /// Disarm and clear the backoff.
    pub fn reset(&mut self) {
        self.next_timestamp = HEARTBEAT_DISARMED;
        self.tries = 0;
    }

    /// Next firing time, or [`HEARTBEAT_DISARMED`].
    pub fn next_timestamp(&self) -> i64 {
        self.next_timestamp
    }

    pub fn tries(&self) -> u8 {
        self.tries
    }

    pub fn is_armed(&self) -> bool {
        self.next_timestamp != HEARTBEAT_DISARMED
    }
}

impl Default for HeartbeatTimer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_HEARTBEAT_INTERVAL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_check_arms_without_firing() {
        let mut timer = HeartbeatTimer::new(10);
        assert!(!timer.update(100, true));
        assert_eq!(timer.next_timestamp(), 110);
        assert_eq!(timer.tries(), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let mut timer = HeartbeatTimer::new(10);
        timer.update(0, true); // armed at 10
        assert!(!timer.update(5, true));
        assert!(timer.update(10, true));
        assert_eq!(timer.next_timestamp(), 30); // 10 + (10 << 1)
        assert!(timer.update(30, true));
        assert_eq!(timer.next_timestamp(), 70); // 30 + (10 << 2)
        assert_eq!(timer.tries(), 3);
    }

    #[test]
    fn test_late_check_catches_up() {
        let mut timer = HeartbeatTimer::new(10);
        timer.update(0, true);
        assert!(timer.update(500, true));
        // difference (490) beats the increment (20)
        assert_eq!(timer.next_timestamp(), 500);
    }

    #[test]
    fn test_disarm_when_acknowledged() {
        let mut timer = HeartbeatTimer::new(10);
        timer.update(0, true);
        assert!(timer.is_armed());
        assert!(!timer.update(1000, false));
        assert!(!timer.is_armed());
    }

    #[test]
    fn test_large_shift_saturates() {
        let mut timer = HeartbeatTimer::new(200);
        timer.update(0, true);
        let mut now = 200;
        for _ in 0..70 {
            if timer.update(now, true) {
                now = timer.next_timestamp();
            }
            if now == i64::MAX {
                break;
            }
        }
        assert!(timer.next_timestamp() >= now);
    }
}
