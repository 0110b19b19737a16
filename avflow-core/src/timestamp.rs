//! Time base handling and timestamp conversion helpers.

use crate::rational::Rational;

/// Value marking an undefined PTS/DTS.
pub const NO_PTS: i64 = i64::MIN;

/// A time base for converting between timestamp units.
///
/// Common time bases:
/// - 1/90000 for MPEG-TS
/// - 1/48000 for 48kHz audio
/// - 1/1000 for milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeBase(pub Rational);

impl TimeBase {
    /// Create a new time base from numerator and denominator.
    pub fn new(num: i64, den: i64) -> Self {
        Self(Rational::new(num, den))
    }

    /// Standard MPEG time base (1/90000).
    pub const MPEG: Self = Self(Rational { num: 1, den: 90000 });

    /// Millisecond time base (1/1000).
    pub const MILLISECONDS: Self = Self(Rational { num: 1, den: 1000 });

    /// Nanosecond time base (1/1000000000).
    pub const NANOSECONDS: Self = Self(Rational {
        num: 1,
        den: 1_000_000_000,
    });

    /// Convert a timestamp from this time base to another.
    pub fn convert(&self, value: i64, target: TimeBase) -> i64 {
        self.0.rescale(value, target.0)
    }

    /// Convert to seconds as f64.
    pub fn to_seconds(&self, value: i64) -> f64 {
        value as f64 * self.0.to_f64()
    }

    /// Get the time base as a rational.
    pub fn as_rational(&self) -> Rational {
        self.0
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::MPEG
    }
}

impl From<Rational> for TimeBase {
    fn from(r: Rational) -> Self {
        Self(r)
    }
}

impl From<(i64, i64)> for TimeBase {
    fn from((num, den): (i64, i64)) -> Self {
        Self::new(num, den)
    }
}

/// Convert a duration in time base units to nanoseconds.
pub fn rescale_to_ns(value: i64, tb: TimeBase) -> i64 {
    tb.convert(value, TimeBase::NANOSECONDS)
}

/// Convert a nanosecond duration to time base units.
///
/// Returns the integer number of ticks plus the sub-tick nanosecond
/// remainder, so callers can carry the leftover across conversions.
pub fn ns_to_time_base(ns: i64, tb: TimeBase) -> (i64, i64) {
    let ticks = TimeBase::NANOSECONDS.convert(ns, tb);
    let remainder = ns - rescale_to_ns(ticks, tb);
    (ticks, remainder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_base_convert() {
        let tb1 = TimeBase::new(1, 1000); // milliseconds
        let tb2 = TimeBase::new(1, 90000); // MPEG

        // 1000ms = 90000 in MPEG time base
        assert_eq!(tb1.convert(1000, tb2), 90000);
    }

    #[test]
    fn test_rescale_to_ns() {
        // 4 ticks at 1/4s per tick = 1s
        assert_eq!(rescale_to_ns(4, TimeBase::new(1, 4)), 1_000_000_000);
    }

    #[test]
    fn test_ns_to_time_base_exact() {
        let (ticks, rem) = ns_to_time_base(500_000_000, TimeBase::new(1, 4));
        assert_eq!(ticks, 2);
        assert_eq!(rem, 0);
    }

    #[test]
    fn test_ns_to_time_base_remainder() {
        // 0.3s at 1/4s per tick: one whole tick, 50ms left over
        let (ticks, rem) = ns_to_time_base(300_000_000, TimeBase::new(1, 4));
        assert_eq!(ticks, 1);
        assert_eq!(rem, 50_000_000);
    }

    #[test]
    fn test_ns_to_time_base_sub_tick() {
        let (ticks, rem) = ns_to_time_base(100_000_000, TimeBase::new(1, 4));
        assert_eq!(ticks, 0);
        assert_eq!(rem, 100_000_000);
    }
}
