//! Multi-scale fixed-point durations.
//!
//! A [`Duration`] is a multiplier paired with a base-1000 [`Scale`] and a
//! `fixed` flag. Unfixed durations trade precision for range: arithmetic
//! coarsens the scale whenever the multiplier would leave the representable
//! band, and refines it when a scalar product leaves a fractional part.
//! Fixed durations lock their scale; mixing two fixed durations of different
//! scales is a synchronisation error rather than a silent rescale.
//!
//! `Duration::INFINITY` is the "never" sentinel used by passive models.

use crate::scale::Scale;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;

/// Largest representable multiplier magnitude: `1000^5`.
pub const MULTIPLIER_LIMIT: f64 = 1_000_000_000_000_000.0;

/// Errors from duration arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    /// Addition or subtraction of two fixed durations whose scales differ.
    /// Rescale one side explicitly before retrying.
    #[error("cannot combine fixed durations of different precisions ({lhs} vs {rhs})")]
    BadSynchronisation { lhs: Scale, rhs: Scale },

    /// The operation would produce NaN (0·∞, ∞−∞, or a NaN operand).
    #[error("duration arithmetic produced an undefined value during `{op}`")]
    Arithmetic { op: &'static str },
}

/// A time difference expressed as `multiplier × 1000^precision` seconds.
#[derive(Debug, Clone, Copy)]
pub struct Duration {
    multiplier: f64,
    precision: Scale,
    fixed: bool,
}

impl Duration {
    /// The "never" sentinel.
    pub const INFINITY: Duration = Duration {
        multiplier: f64::INFINITY,
        precision: Scale::BASE,
        fixed: false,
    };

    /// An unfixed duration. Multipliers beyond [`MULTIPLIER_LIMIT`] collapse
    /// to infinity.
    pub fn new(multiplier: f64, precision: Scale) -> Duration {
        Self::build(multiplier, precision, false)
    }

    /// A fixed duration: arithmetic will preserve `precision` exactly.
    pub fn fixed(multiplier: f64, precision: Scale) -> Duration {
        Self::build(multiplier, precision, true)
    }

    /// Zero at the given precision.
    pub fn zero(precision: Scale) -> Duration {
        Duration {
            multiplier: 0.0,
            precision,
            fixed: false,
        }
    }

    /// Build an unfixed duration from a decimal fraction: the value is
    /// scaled by 1000 until its magnitude reaches 1, recording a negative
    /// precision, then rounded to an integer multiplier.
    pub fn from_f64(value: f64) -> Duration {
        if !value.is_finite() {
            return Duration {
                multiplier: value,
                precision: Scale::BASE,
                fixed: false,
            };
        }
        let mut m = value;
        let mut p = Scale::BASE;
        while m != 0.0 && m.abs() < 1.0 {
            m *= 1000.0;
            p = p.finer();
        }
        Self::build(m.round(), p, false)
    }

    fn build(multiplier: f64, precision: Scale, fixed: bool) -> Duration {
        let m = if multiplier.abs() > MULTIPLIER_LIMIT {
            f64::INFINITY.copysign(multiplier)
        } else {
            multiplier
        };
        Duration {
            multiplier: m,
            precision,
            fixed,
        }
    }

    #[inline]
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    #[inline]
    pub fn precision(&self) -> Scale {
        self.precision
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    #[inline]
    pub fn finite(&self) -> bool {
        self.multiplier.is_finite()
    }

    #[inline]
    pub fn infinite(&self) -> bool {
        self.multiplier.is_infinite()
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.multiplier == 0.0
    }

    /// The quantity in base units (seconds), as floating point.
    pub fn to_f64(&self) -> f64 {
        self.multiplier * self.precision.factor()
    }

    /// Lock the current precision.
    pub fn fix(self) -> Duration {
        Duration {
            fixed: true,
            ..self
        }
    }

    /// Release a precision lock.
    pub fn unfix(self) -> Duration {
        Duration {
            fixed: false,
            ..self
        }
    }

    /// Re-express the multiplier at another precision, preserving the fixed
    /// flag. Rescaling toward a finer precision can collapse to infinity.
    pub fn rescale(self, precision: Scale) -> Duration {
        if self.infinite() {
            return Duration {
                precision,
                ..self
            };
        }
        let m = self.multiplier * 1000f64.powi(self.precision.level() - precision.level());
        Self::build(m, precision, self.fixed)
    }

    pub fn negate(self) -> Duration {
        Duration {
            multiplier: -self.multiplier,
            ..self
        }
    }

    // -----------------------------------------------------------------------
    // Arithmetic
    // -----------------------------------------------------------------------

    /// Sum of two durations.
    ///
    /// Both fixed: scales must match. One fixed: the unfixed side is aligned
    /// to the fixed scale. Both unfixed: computed at the finer scale, then
    /// coarsened until the multiplier fits. The result is fixed iff either
    /// operand is fixed.
    pub fn checked_add(self, rhs: Duration) -> Result<Duration, DurationError> {
        self.combine(rhs, "+")
    }

    /// Difference of two durations; same alignment rules as `checked_add`.
    pub fn checked_sub(self, rhs: Duration) -> Result<Duration, DurationError> {
        self.combine(rhs.negate(), "-")
    }

    fn combine(self, rhs: Duration, op: &'static str) -> Result<Duration, DurationError> {
        let fixed = self.fixed || rhs.fixed;
        if self.infinite() || rhs.infinite() {
            if self.infinite()
                && rhs.infinite()
                && self.multiplier.is_sign_positive() != rhs.multiplier.is_sign_positive()
            {
                return Err(DurationError::Arithmetic { op });
            }
            let (m, p) = if self.infinite() {
                (self.multiplier, self.precision)
            } else {
                (rhs.multiplier, rhs.precision)
            };
            return Ok(Duration {
                multiplier: m,
                precision: p,
                fixed,
            });
        }
        match (self.fixed, rhs.fixed) {
            (true, true) if self.precision != rhs.precision => {
                Err(DurationError::BadSynchronisation {
                    lhs: self.precision,
                    rhs: rhs.precision,
                })
            }
            (true, true) => Ok(Self::build(
                self.multiplier + rhs.multiplier,
                self.precision,
                true,
            )),
            (true, false) => {
                let aligned = rhs.rescale(self.precision);
                Ok(Self::build(
                    self.multiplier + aligned.multiplier,
                    self.precision,
                    true,
                ))
            }
            (false, true) => {
                let aligned = self.rescale(rhs.precision);
                Ok(Self::build(
                    aligned.multiplier + rhs.multiplier,
                    rhs.precision,
                    true,
                ))
            }
            (false, false) => {
                let p = self.precision.min(rhs.precision);
                let a = self.multiplier * 1000f64.powi(self.precision.level() - p.level());
                let b = rhs.multiplier * 1000f64.powi(rhs.precision.level() - p.level());
                let sum = a + b;
                if sum.is_nan() {
                    return Err(DurationError::Arithmetic { op });
                }
                Ok(Self::coarsen_to_fit(sum, p))
            }
        }
    }

    /// Scalar product.
    ///
    /// Fixed durations round to nearest with ties away from zero and keep
    /// their scale. Unfixed durations coarsen on overflow and refine while a
    /// fractional part remains and refinement stays in range. NaN factors
    /// are rejected.
    pub fn checked_mul(self, n: f64) -> Result<Duration, DurationError> {
        self.scale_by(n, false)
    }

    /// Scalar quotient; mirror of `checked_mul`.
    pub fn checked_div(self, n: f64) -> Result<Duration, DurationError> {
        self.scale_by(n, true)
    }

    fn scale_by(self, n: f64, divide: bool) -> Result<Duration, DurationError> {
        let op = if divide { "/" } else { "*" };
        if n.is_nan() {
            return Err(DurationError::Arithmetic { op });
        }
        if self.infinite() {
            if (divide && n.is_infinite()) || (!divide && n == 0.0) {
                return Err(DurationError::Arithmetic { op });
            }
            // Infinity propagates at the operand's precision.
            return Ok(Duration {
                multiplier: self.multiplier * n.signum(),
                ..self
            });
        }
        let raw = if divide {
            self.multiplier / n
        } else {
            self.multiplier * n
        };
        if raw.is_nan() {
            return Err(DurationError::Arithmetic { op });
        }
        if self.fixed {
            return Ok(Self::build(raw.round(), self.precision, true));
        }
        if raw.is_infinite() {
            return Ok(Duration {
                multiplier: raw,
                precision: self.precision,
                fixed: false,
            });
        }
        let mut m = raw;
        let mut p = self.precision;
        while m.abs() >= MULTIPLIER_LIMIT {
            m /= 1000.0;
            p = p.coarser();
        }
        while !is_integral(m) && (m * 1000.0).abs() < MULTIPLIER_LIMIT {
            m *= 1000.0;
            p = p.finer();
        }
        if is_integral(m) {
            m = m.round();
        }
        Ok(Duration {
            multiplier: m,
            precision: p,
            fixed: false,
        })
    }

    /// Pure floating-point ratio between two durations.
    pub fn ratio(self, rhs: Duration) -> f64 {
        (self.multiplier / rhs.multiplier) * (self.precision / rhs.precision).factor()
    }

    fn coarsen_to_fit(mut m: f64, mut p: Scale) -> Duration {
        while m.is_finite() && m.abs() >= MULTIPLIER_LIMIT {
            m /= 1000.0;
            p = p.coarser();
        }
        Duration {
            multiplier: m,
            precision: p,
            fixed: false,
        }
    }

    // -----------------------------------------------------------------------
    // Comparison
    // -----------------------------------------------------------------------

    /// Order by physical quantity: a rescaled duration compares equal to its
    /// original. Distinct from `PartialEq`, which requires identical
    /// representation.
    pub fn cmp_quantity(&self, other: &Duration) -> Ordering {
        match (self.infinite(), other.infinite()) {
            (true, true) => self.multiplier.total_cmp(&other.multiplier),
            (true, false) => {
                if self.multiplier > 0.0 {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, true) => {
                if other.multiplier > 0.0 {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, false) => {
                let p = self.precision.min(other.precision);
                let a = self.multiplier * 1000f64.powi(self.precision.level() - p.level());
                let b = other.multiplier * 1000f64.powi(other.precision.level() - p.level());
                a.total_cmp(&b)
            }
        }
    }
}

/// Representation equality: multiplier bits and precision. Two durations
/// denoting the same quantity at different scales are *not* equal here; use
/// [`Duration::cmp_quantity`] for quantity comparison.
impl PartialEq for Duration {
    fn eq(&self, other: &Self) -> bool {
        self.multiplier.to_bits() == other.multiplier.to_bits()
            && self.precision == other.precision
    }
}

impl std::fmt::Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.infinite() {
            return if self.multiplier > 0.0 {
                f.write_str("forever")
            } else {
                f.write_str("-forever")
            };
        }
        write!(f, "{} {}", self.multiplier, self.precision)
    }
}

#[inline]
fn is_integral(m: f64) -> bool {
    (m - m.round()).abs() <= 1e-9 * m.abs().max(1.0)
}

// ---------------------------------------------------------------------------
// Serde: `{multiplier: int, precision: int}`
// ---------------------------------------------------------------------------

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let m = if self.multiplier >= i64::MAX as f64 {
            i64::MAX
        } else if self.multiplier <= i64::MIN as f64 {
            i64::MIN
        } else {
            self.multiplier.round() as i64
        };
        let mut s = serializer.serialize_struct("Duration", 2)?;
        s.serialize_field("multiplier", &m)?;
        s.serialize_field("precision", &self.precision.level())?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map with `multiplier` and `precision`")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Duration, A::Error> {
                let mut multiplier: Option<i64> = None;
                let mut precision: Option<i32> = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "multiplier" => multiplier = Some(map.next_value()?),
                        "precision" => precision = Some(map.next_value()?),
                        other => {
                            return Err(de::Error::unknown_field(
                                other,
                                &["multiplier", "precision"],
                            ));
                        }
                    }
                }
                let m = multiplier.ok_or_else(|| de::Error::missing_field("multiplier"))?;
                let p = precision.ok_or_else(|| de::Error::missing_field("precision"))?;
                let m = if m == i64::MAX {
                    f64::INFINITY
                } else if m == i64::MIN {
                    f64::NEG_INFINITY
                } else {
                    m as f64
                };
                Ok(Duration::new(m, Scale(p)))
            }
        }

        deserializer.deserialize_struct("Duration", &["multiplier", "precision"], DurationVisitor)
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
    fn finite_xor_infinite() {
        let d = Duration::new(42.0, Scale::MILLI);
        assert!(d.finite() && !d.infinite());
        assert!(Duration::INFINITY.infinite() && !Duration::INFINITY.finite());
    }

    #[test]
    fn overflow_collapses_to_infinity() {
        let d = Duration::new(MULTIPLIER_LIMIT * 10.0, Scale::BASE);
        assert!(d.infinite());
        let n = Duration::new(-MULTIPLIER_LIMIT * 10.0, Scale::BASE);
        assert!(n.infinite());
        assert!(n.multiplier() < 0.0);
    }

    #[test]
    fn from_f64_records_negative_precision() {
        let d = Duration::from_f64(0.5);
        assert_eq!(d.multiplier(), 500.0);
        assert_eq!(d.precision(), Scale::MILLI);

        let e = Duration::from_f64(0.000_25);
        assert_eq!(e.multiplier(), 250.0);
        assert_eq!(e.precision(), Scale::MICRO);

        let whole = Duration::from_f64(7.0);
        assert_eq!(whole.multiplier(), 7.0);
        assert_eq!(whole.precision(), Scale::BASE);
    }

    #[test]
    fn unfixed_add_computes_at_finer_precision() {
        // 2 base + 500 milli = 2500 milli (i.e. 2.5 base).
        let d = Duration::new(2.0, Scale::BASE);
        let e = Duration::new(500.0, Scale::MILLI);
        let sum = d.checked_add(e).unwrap();
        assert_eq!(sum.multiplier(), 2500.0);
        assert_eq!(sum.precision(), Scale::MILLI);

        // The comparator sees 2.5 base and 2500 milli as the same quantity.
        let half = Duration::new(2.5, Scale::BASE);
        assert_eq!(sum.cmp_quantity(&half), Ordering::Equal);
        assert_ne!(sum, half);
    }

    #[test]
    fn unfixed_add_coarsens_on_overflow() {
        let a = Duration::new(900_000_000_000_000.0, Scale::BASE);
        let b = Duration::new(900_000_000_000_000.0, Scale::BASE);
        let sum = a.checked_add(b).unwrap();
        assert!(sum.finite());
        assert_eq!(sum.precision(), Scale::KILO);
        assert_eq!(sum.multiplier(), 1_800_000_000_000.0);
    }

    #[test]
    fn add_then_sub_preserves_quantity() {
        let a = Duration::new(7.0, Scale::BASE);
        let b = Duration::new(250.0, Scale::MILLI);
        let round = a.checked_add(b).unwrap().checked_sub(b).unwrap();
        assert_eq!(round.cmp_quantity(&a), Ordering::Equal);
    }

    #[test]
    fn fixed_mismatched_precisions_rejected() {
        let a = Duration::fixed(1.0, Scale::BASE);
        let b = Duration::fixed(1.0, Scale::MILLI);
        match a.checked_add(b) {
            Err(DurationError::BadSynchronisation { lhs, rhs }) => {
                assert_eq!(lhs, Scale::BASE);
                assert_eq!(rhs, Scale::MILLI);
            }
            other => panic!("expected BadSynchronisation, got {other:?}"),
        }

        // Rescaling one side repairs the operation.
        let repaired = a.rescale(Scale::MILLI).checked_add(b).unwrap();
        assert_eq!(repaired.multiplier(), 1001.0);
        assert_eq!(repaired.precision(), Scale::MILLI);
        assert!(repaired.is_fixed());
    }

    #[test]
    fn fixed_plus_unfixed_aligns_to_fixed_side() {
        let a = Duration::fixed(2.0, Scale::BASE);
        let b = Duration::new(500.0, Scale::MILLI);
        let sum = a.checked_add(b).unwrap();
        assert!(sum.is_fixed());
        assert_eq!(sum.precision(), Scale::BASE);
        assert_eq!(sum.multiplier(), 2.5);
    }

    #[test]
    fn fixed_scalar_mul_rounds_ties_away_from_zero() {
        let d = Duration::fixed(5.0, Scale::BASE);
        let half = d.checked_mul(0.5).unwrap();
        assert_eq!(half.multiplier(), 3.0); // 2.5 rounds away from zero
        assert_eq!(half.precision(), Scale::BASE);

        let neg = Duration::fixed(-5.0, Scale::BASE).checked_mul(0.5).unwrap();
        assert_eq!(neg.multiplier(), -3.0);
    }

    #[test]
    fn unfixed_scalar_mul_refines_fractions() {
        let d = Duration::new(2.0, Scale::BASE);
        let small = d.checked_mul(0.001).unwrap();
        assert_eq!(small.multiplier(), 2.0);
        assert_eq!(small.precision(), Scale::MILLI);

        // Scaling back up preserves the quantity.
        let back = small.checked_mul(1000.0).unwrap();
        assert_eq!(back.cmp_quantity(&d), Ordering::Equal);
    }

    #[test]
    fn unfixed_scalar_mul_coarsens_on_overflow() {
        let d = Duration::new(500_000_000_000_000.0, Scale::BASE);
        let big = d.checked_mul(10.0).unwrap();
        assert!(big.finite());
        assert_eq!(big.precision(), Scale::KILO);
        assert_eq!(big.multiplier(), 5_000_000_000_000.0);
    }

    #[test]
    fn nan_factor_rejected() {
        let d = Duration::new(1.0, Scale::BASE);
        assert!(matches!(
            d.checked_mul(f64::NAN),
            Err(DurationError::Arithmetic { .. })
        ));
        assert!(matches!(
            d.checked_div(f64::NAN),
            Err(DurationError::Arithmetic { .. })
        ));
    }

    #[test]
    fn opposite_infinities_rejected() {
        let inf = Duration::INFINITY;
        let ninf = Duration::INFINITY.negate();
        assert!(matches!(
            inf.checked_add(ninf),
            Err(DurationError::Arithmetic { .. })
        ));
    }

    #[test]
    fn infinity_propagates_without_coarsening() {
        let inf = Duration {
            multiplier: f64::INFINITY,
            precision: Scale::NANO,
            fixed: false,
        };
        let sum = inf.checked_add(Duration::new(5.0, Scale::BASE)).unwrap();
        assert!(sum.infinite());
        assert_eq!(sum.precision(), Scale::NANO);

        let scaled = inf.checked_mul(2.0).unwrap();
        assert!(scaled.infinite());
        assert_eq!(scaled.precision(), Scale::NANO);
    }

    #[test]
    fn ratio_is_pure_float() {
        let a = Duration::new(3.0, Scale::BASE);
        let b = Duration::new(1500.0, Scale::MILLI);
        assert!((a.ratio(b) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn division_mirrors_multiplication() {
        let d = Duration::new(2.0, Scale::BASE);
        let fine = d.checked_div(1000.0).unwrap();
        assert_eq!(fine.precision(), Scale::MILLI);
        assert_eq!(fine.cmp_quantity(&Duration::new(2.0, Scale::MILLI)), Ordering::Equal);
    }

    #[test]
    fn rescale_round_trip() {
        let d = Duration::new(2.0, Scale::BASE);
        let milli = d.rescale(Scale::MILLI);
        assert_eq!(milli.multiplier(), 2000.0);
        assert_eq!(milli.cmp_quantity(&d), Ordering::Equal);
        assert_eq!(milli.rescale(Scale::BASE), d);
    }

    #[test]
    fn quantity_ordering_across_precisions() {
        let a = Duration::new(1.0, Scale::BASE);
        let b = Duration::new(999.0, Scale::MILLI);
        assert_eq!(a.cmp_quantity(&b), Ordering::Greater);
        assert_eq!(b.cmp_quantity(&a), Ordering::Less);
        assert_eq!(
            Duration::INFINITY.cmp_quantity(&a),
            Ordering::Greater
        );
    }
}
