// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Timing and index arithmetic.
//!
//! Pure functions converting between TAI wall-clock time and grain indices
//! through a rational edit rate. Nothing here allocates or blocks longer
//! than requested, and every conversion uses 128-bit intermediates so it
//! stays stable across the full 64-bit TAI timestamp range.

use crate::config::{MIN_POLL_SLEEP_NS, TAI_MINUS_UTC_SECONDS};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Reserved index meaning "no valid index".
pub const UNDEFINED_INDEX: u64 = u64::MAX;

/// Nanoseconds in one second.
const NS_PER_SEC: i128 = 1_000_000_000;

/// A non-zero rational expressing grains (or samples) per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl EditRate {
    #[must_use]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// `true` if this rate is usable for conversion (both terms non-zero).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.numerator != 0 && self.denominator != 0
    }
}

/// Signed nanoseconds since the TAI epoch (1970-01-01 00:00:00 TAI).
pub type Timepoint = i64;

/// Grain/sample index: monotonically increasing, zero-based at the TAI epoch.
pub type GrainIndex = u64;

/// Converts a TAI timestamp to the grain index active at that instant.
///
/// `index = floor((t*num + 0.5e9*den) / (1e9*den))`, computed with 128-bit
/// intermediates. Returns [`UNDEFINED_INDEX`] if `rate` is not valid.
#[must_use]
pub fn timestamp_to_index(rate: EditRate, t: Timepoint) -> GrainIndex {
    if !rate.is_valid() {
        return UNDEFINED_INDEX;
    }
    let num = i128::from(rate.numerator);
    let den = i128::from(rate.denominator);
    let t = i128::from(t);

    let numerator = t * num + (NS_PER_SEC / 2) * den;
    let denominator = NS_PER_SEC * den;
    let index = numerator.div_euclid(denominator);

    if index < 0 {
        0
    } else {
        index.min(i128::from(u64::MAX)) as u64
    }
}

/// Converts a grain index back to the TAI timestamp of its nominal start.
///
/// `t = floor((index*den*1e9 + num/2) / num)`, computed with 128-bit
/// intermediates. Returns `0` if `rate` is not valid.
#[must_use]
pub fn index_to_timestamp(index: GrainIndex, rate: EditRate) -> Timepoint {
    if !rate.is_valid() {
        return 0;
    }
    let num = i128::from(rate.numerator);
    let den = i128::from(rate.denominator);
    let index = i128::from(index);

    let numerator = index * den * NS_PER_SEC + num / 2;
    let t = numerator.div_euclid(num);
    t.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

/// Current TAI time in nanoseconds since the TAI epoch.
///
/// The host clock is assumed already disciplined to UTC; TAI is derived by
/// adding the fixed leap-second offset in [`crate::config::TAI_MINUS_UTC_SECONDS`].
#[must_use]
pub fn now_tai() -> Timepoint {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    let utc_ns = since_epoch.as_nanos() as i128;
    let offset_ns = i128::from(TAI_MINUS_UTC_SECONDS) * NS_PER_SEC;
    (utc_ns + offset_ns) as i64
}

/// Nanoseconds remaining until `index`'s successor nominally begins, clamped
/// to zero if that instant has already passed.
#[must_use]
pub fn ns_until_index(index: GrainIndex, rate: EditRate) -> u64 {
    let next = index_to_timestamp(index.wrapping_add(1), rate);
    let remaining = next - now_tai();
    if remaining <= 0 {
        0
    } else {
        remaining as u64
    }
}

/// Suspends the caller for at least `n` nanoseconds against the monotonic
/// clock. Never blocks longer than requested plus OS scheduling slack.
pub fn sleep_for_ns(n: u64) {
    if n == 0 {
        return;
    }
    std::thread::sleep(Duration::from_nanos(n.max(MIN_POLL_SLEEP_NS)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_rate_yields_sentinels() {
        let zero_num = EditRate::new(0, 1);
        let zero_den = EditRate::new(1, 0);
        assert_eq!(timestamp_to_index(zero_num, 1_000_000_000), UNDEFINED_INDEX);
        assert_eq!(timestamp_to_index(zero_den, 1_000_000_000), UNDEFINED_INDEX);
        assert_eq!(index_to_timestamp(30, zero_num), 0);
    }

    #[test]
    fn ntsc_round_trip_scenario() {
        // scenario 1 from the testable-properties section: NTSC 30000/1001
        let rate = EditRate::new(30_000, 1_001);
        let t = 1_000_000_000i64;
        let index = timestamp_to_index(rate, t);
        assert_eq!(index, 30);

        let back = index_to_timestamp(index, rate);
        assert!((999_966_666..=1_000_000_000).contains(&back), "got {back}");
    }

    #[test]
    fn round_trip_is_stable_over_a_wide_index_range() {
        let rate = EditRate::new(30_000, 1_001);
        for index in 0..1_000_000u64 {
            let t = index_to_timestamp(index, rate);
            let back = timestamp_to_index(rate, t);
            assert_eq!(back, index, "round trip failed at index {index}");
        }
    }

    #[test]
    fn simple_integer_rate_round_trips_exactly() {
        let rate = EditRate::new(25, 1);
        for index in 0..10_000u64 {
            let t = index_to_timestamp(index, rate);
            assert_eq!(timestamp_to_index(rate, t), index);
        }
    }

    #[test]
    fn high_rate_does_not_overflow_at_large_indices() {
        // 48 kHz audio, index near the top of a plausible multi-year run.
        let rate = EditRate::new(48_000, 1);
        let index: u64 = 48_000 * 3600 * 24 * 365 * 50; // ~50 years of samples
        let t = index_to_timestamp(index, rate);
        assert!(t > 0);
        let back = timestamp_to_index(rate, t);
        assert_eq!(back, index);
    }

    #[test]
    fn ns_until_index_is_zero_in_the_past() {
        let rate = EditRate::new(25, 1);
        // Index 0 at the epoch is always in the past relative to now().
        assert_eq!(ns_until_index(0, rate), 0);
    }

    #[test]
    fn sleep_for_ns_returns_immediately_for_zero() {
        let start = std::time::Instant::now();
        sleep_for_ns(0);
        assert!(start.elapsed() < Duration::from_millis(5));
    }
}
