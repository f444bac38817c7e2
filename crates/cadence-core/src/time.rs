//! The virtual clock.
//!
//! A [`TimePoint`] is a sparse positional base-1000 number: a map from scale
//! level to a digit in `1..=999` (zero digits are never stored). This keeps
//! the clock exact across advances at wildly different precisions: a
//! femtosecond step never erodes a terasecond total the way accumulating
//! into a single float would.
//!
//! The finest precision touched by any advance is retained so the scale of
//! the last step is recoverable when computing elapsed durations.

use crate::duration::Duration;
use crate::scale::Scale;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A point in virtual time. Ordered and compared by positional value only.
#[derive(Debug, Clone, Default)]
pub struct TimePoint {
    /// Non-zero digits by scale level.
    digits: BTreeMap<i32, u16>,
    /// Finest precision reached by an advance.
    precision: Scale,
}

impl TimePoint {
    /// The origin of virtual time.
    pub fn zero() -> TimePoint {
        TimePoint {
            digits: BTreeMap::new(),
            precision: Scale::BASE,
        }
    }

    /// Finest precision any advance has touched.
    #[inline]
    pub fn precision(&self) -> Scale {
        self.precision
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.digits.is_empty()
    }

    /// The value in base units, as floating point. Lossy for very wide
    /// points; used for display and bucket hashing only.
    pub fn as_base(&self) -> f64 {
        self.digits
            .iter()
            .map(|(&level, &digit)| f64::from(digit) * 1000f64.powi(level))
            .sum()
    }

    /// The point reached after a finite, non-negative duration.
    ///
    /// The duration's multiplier is rounded to an integer count of
    /// `1000^precision` units and added with carry propagation.
    pub fn advance(&self, d: &Duration) -> TimePoint {
        debug_assert!(d.finite(), "cannot advance past the event horizon");
        let mut out = self.clone();
        out.precision = out.precision.min(d.precision());
        let mut units = d.multiplier().round().max(0.0) as i64;
        let mut level = d.precision().level();
        while units > 0 {
            let total = i64::from(out.digit(level)) + units % 1000;
            units /= 1000;
            units += total / 1000;
            out.set_digit(level, (total % 1000) as u16);
            level += 1;
        }
        out
    }

    /// The duration separating `self` from an earlier point, expressed at
    /// the finer of the two precisions. A later `earlier` yields a negative
    /// duration.
    pub fn duration_since(&self, earlier: &TimePoint) -> Duration {
        let p = self.precision.min(earlier.precision);
        let mut m = 0.0;
        for (&level, &digit) in &self.digits {
            m += f64::from(digit) * 1000f64.powi(level - p.level());
        }
        for (&level, &digit) in &earlier.digits {
            m -= f64::from(digit) * 1000f64.powi(level - p.level());
        }
        Duration::new(m, p)
    }

    #[inline]
    fn digit(&self, level: i32) -> u16 {
        self.digits.get(&level).copied().unwrap_or(0)
    }

    fn set_digit(&mut self, level: i32, digit: u16) {
        if digit == 0 {
            self.digits.remove(&level);
        } else {
            self.digits.insert(level, digit);
        }
    }
}

impl PartialEq for TimePoint {
    fn eq(&self, other: &Self) -> bool {
        self.digits == other.digits
    }
}

impl Eq for TimePoint {}

impl Ord for TimePoint {
    fn cmp(&self, other: &Self) -> Ordering {
        // Compare digit sequences most-significant first; absent digits are
        // zero. Both maps iterate in ascending level order, so walk them
        // from the back.
        let mut a = self.digits.iter().rev().peekable();
        let mut b = other.digits.iter().rev().peekable();
        loop {
            match (a.peek(), b.peek()) {
                (None, None) => return Ordering::Equal,
                (Some(_), None) => return Ordering::Greater,
                (None, Some(_)) => return Ordering::Less,
                (Some(&(&la, &da)), Some(&(&lb, &db))) => match la.cmp(&lb) {
                    Ordering::Greater => return Ordering::Greater,
                    Ordering::Less => return Ordering::Less,
                    Ordering::Equal => match da.cmp(&db) {
                        Ordering::Equal => {
                            a.next();
                            b.next();
                        }
                        unequal => return unequal,
                    },
                },
            }
        }
    }
}

impl PartialOrd for TimePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for TimePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t={}", self.as_base())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn zero_point() {
        let t = TimePoint::zero();
        assert!(t.is_zero());
        assert_eq!(t.as_base(), 0.0);
        assert_eq!(t.precision(), Scale::BASE);
    }

    #[test]
    fn advance_accumulates_with_carry() {
        let t = TimePoint::zero()
            .advance(&Duration::new(999.0, Scale::BASE))
            .advance(&Duration::new(2.0, Scale::BASE));
        assert_eq!(t.as_base(), 1001.0);

        let u = TimePoint::zero().advance(&Duration::new(1_500_000.0, Scale::MILLI));
        assert_eq!(u.as_base(), 1500.0);
    }

    #[test]
    fn advance_preserves_finest_precision() {
        let t = TimePoint::zero()
            .advance(&Duration::new(1.0, Scale::BASE))
            .advance(&Duration::new(250.0, Scale::MICRO));
        assert_eq!(t.precision(), Scale::MICRO);
        assert_eq!(t.as_base(), 1.00025);
    }

    #[test]
    fn mixed_precision_advances_stay_exact() {
        // One megasecond-scale digit plus one millisecond digit: both must
        // survive in the positional representation.
        let t = TimePoint::zero()
            .advance(&Duration::new(5.0, Scale::MEGA))
            .advance(&Duration::new(7.0, Scale::MILLI));
        let back = t.duration_since(&TimePoint::zero());
        assert_eq!(back.precision(), Scale::MILLI);
        assert_eq!(back.multiplier(), 5_000_000_007.0);
        assert!(t > TimePoint::zero().advance(&Duration::new(5.0, Scale::MEGA)));
    }

    #[test]
    fn duration_since_uses_finer_precision() {
        let t0 = TimePoint::zero();
        let t1 = t0.advance(&Duration::new(2.0, Scale::BASE));
        let t2 = t1.advance(&Duration::new(500.0, Scale::MILLI));

        let elapsed = t2.duration_since(&t1);
        assert_eq!(elapsed.precision(), Scale::MILLI);
        assert_eq!(elapsed.multiplier(), 500.0);

        let total = t2.duration_since(&t0);
        assert_eq!(total.multiplier(), 2500.0);
    }

    #[test]
    fn ordering_is_positional() {
        let a = TimePoint::zero().advance(&Duration::new(1.0, Scale::BASE));
        let b = TimePoint::zero().advance(&Duration::new(999.0, Scale::MILLI));
        let c = TimePoint::zero().advance(&Duration::new(1000.0, Scale::MILLI));
        assert!(b < a);
        assert_eq!(a.cmp(&c), Ordering::Equal);
        assert_eq!(a, c);
    }

    #[test]
    fn equality_ignores_advance_precision_history() {
        // Reaching the same instant through different step scales must
        // compare equal, or simultaneous events would never collide.
        let a = TimePoint::zero().advance(&Duration::new(1.0, Scale::BASE));
        let b = TimePoint::zero()
            .advance(&Duration::new(500.0, Scale::MILLI))
            .advance(&Duration::new(500.0, Scale::MILLI));
        assert_eq!(a, b);
        assert_ne!(a.precision(), b.precision());
    }

    #[test]
    fn zero_duration_advance_is_identity() {
        let t = TimePoint::zero().advance(&Duration::new(3.0, Scale::BASE));
        let u = t.advance(&Duration::zero(Scale::NANO));
        assert_eq!(t, u);
        assert_eq!(u.precision(), Scale::NANO);
    }

    #[test]
    fn display_in_base_units() {
        let t = TimePoint::zero().advance(&Duration::new(1500.0, Scale::MILLI));
        assert_eq!(format!("{t}"), "t=1.5");
    }
}
