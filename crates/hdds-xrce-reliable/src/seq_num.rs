// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! 16-bit wraparound sequence numbers.
//!
//! Sequence numbers live on a ring of 65536 points. Ordering uses the
//! midpoint rule: `a < b` iff walking forward from `a` reaches `b` in fewer
//! than 32768 steps. The relation is only a total order inside a half-ring
//! window, which is enough because a live stream window never exceeds its
//! history size.

use std::cmp::Ordering;
use std::fmt;

/// Number of distinct sequence numbers.
pub const SEQ_NUM_SIZE: u32 = 1 << 16;

/// Half the ring; forward distances below this are "less".
pub const SEQ_NUM_MIDSIZE: u16 = 1 << 15;

/// A point on the 16-bit sequence number ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqNum(pub u16);

impl SeqNum {
    /// Largest raw value. Streams start with their watermarks here so that
    /// the first message gets sequence number 0.
    pub const MAX: SeqNum = SeqNum(u16::MAX);

    /// Raw value.
    #[inline]
    pub fn get(self) -> u16 {
        self.0
    }

    /// `self + k` modulo 65536.
    #[inline]
    #[must_use]
    pub fn add(self, k: u16) -> Self {
        Self(self.0.wrapping_add(k))
    }

    /// `self - k` modulo 65536.
    #[inline]
    #[must_use]
    pub fn sub(self, k: u16) -> Self {
        Self(self.0.wrapping_sub(k))
    }

    /// Forward distance from `earlier` to `self` (`self - earlier` mod 65536).
    #[inline]
    pub fn distance_from(self, earlier: SeqNum) -> u16 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Midpoint-rule comparison.
    ///
    /// The exact half-ring distance compares `Greater` in both directions,
    /// matching Micro XRCE-DDS peers bit for bit.
    pub fn compare(self, other: SeqNum) -> Ordering {
        let (a, b) = (self.0, other.0);
        if a == b {
            Ordering::Equal
        } else if (a < b && b - a < SEQ_NUM_MIDSIZE) || (a > b && a - b > SEQ_NUM_MIDSIZE) {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }

    /// `self < other` on the ring.
    #[inline]
    pub fn lt(self, other: SeqNum) -> bool {
        self.compare(other) == Ordering::Less
    }

    /// `self <= other` on the ring.
    #[inline]
    pub fn le(self, other: SeqNum) -> bool {
        self.compare(other) != Ordering::Greater
    }
}

impl From<u16> for SeqNum {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

impl From<SeqNum> for u16 {
    fn from(s: SeqNum) -> Self {
        s.0
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_reflexive() {
        for raw in [0u16, 1, 0x7FFF, 0x8000, 0xFFFE, 0xFFFF] {
            assert_eq!(SeqNum(raw).compare(SeqNum(raw)), Ordering::Equal);
        }
    }

    #[test]
    fn test_compare_across_wrap() {
        let a = SeqNum(0xFFF0);
        let b = a.add(0x20);
        assert_eq!(b, SeqNum(0x0010));
        assert_eq!(a.compare(b), Ordering::Less);
        assert_eq!(b.compare(a), Ordering::Greater);
    }

    #[test]
    fn test_compare_half_ring_is_greater_both_ways() {
        let a = SeqNum(100);
        let b = a.add(SEQ_NUM_MIDSIZE);
        assert_eq!(a.compare(b), Ordering::Greater);
        assert_eq!(b.compare(a), Ordering::Greater);
    }

    #[test]
    fn test_successor_window_is_exactly_32767() {
        let a = SeqNum(12345);
        let less = (0..SEQ_NUM_SIZE)
            .map(|raw| SeqNum(raw as u16))
            .filter(|b| a.compare(*b) == Ordering::Less)
            .count();
        assert_eq!(less, 32767);
    }

    #[test]
    fn test_forward_distance_orders_randomized() {
        let mut rng = fastrand::Rng::with_seed(0x5EED);
        for _ in 0..10_000 {
            let a = SeqNum(rng.u16(..));
            let k = rng.u16(1..SEQ_NUM_MIDSIZE);
            let b = a.add(k);
            assert_eq!(a.compare(b), Ordering::Less, "a={} k={}", a, k);
            assert_eq!(b.compare(a), Ordering::Greater, "a={} k={}", a, k);
            assert_eq!(b.sub(k), a);
            assert_eq!(b.distance_from(a), k);
        }
    }

    #[test]
    fn test_add_sub_roundtrip_wraps_silently() {
        assert_eq!(SeqNum::MAX.add(1), SeqNum(0));
        assert_eq!(SeqNum(0).sub(1), SeqNum::MAX);
        assert_eq!(SeqNum(3).sub(u16::MAX).add(u16::MAX), SeqNum(3));
    }
}
