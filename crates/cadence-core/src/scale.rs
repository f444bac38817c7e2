//! Base-1000 scale exponents.
//!
//! A [`Scale`] is a signed level `L` interpreted as the factor `1000^L`:
//! level 0 is the base unit, −1 is milli, +1 is kilo, and so on. Scales
//! multiply by adding levels and divide by subtracting them, which keeps
//! duration arithmetic exact until a conversion to floating point is
//! explicitly requested.

use serde::{Deserialize, Serialize};
use std::ops::{Div, Mul};

/// A signed base-1000 exponent. Defaults to the base unit (level 0).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Scale(pub i32);

impl Scale {
    pub const FEMTO: Scale = Scale(-5);
    pub const PICO: Scale = Scale(-4);
    pub const NANO: Scale = Scale(-3);
    pub const MICRO: Scale = Scale(-2);
    pub const MILLI: Scale = Scale(-1);
    pub const BASE: Scale = Scale(0);
    pub const KILO: Scale = Scale(1);
    pub const MEGA: Scale = Scale(2);
    pub const GIGA: Scale = Scale(3);
    pub const TERA: Scale = Scale(4);
    pub const PETA: Scale = Scale(5);

    /// The raw level `L`.
    #[inline]
    pub fn level(self) -> i32 {
        self.0
    }

    /// The multiplicative factor `1000^L` as floating point.
    #[inline]
    pub fn factor(self) -> f64 {
        1000f64.powi(self.0)
    }

    /// One level coarser (×1000).
    #[inline]
    pub fn coarser(self) -> Scale {
        Scale(self.0 + 1)
    }

    /// One level finer (÷1000).
    #[inline]
    pub fn finer(self) -> Scale {
        Scale(self.0 - 1)
    }
}

impl Mul for Scale {
    type Output = Scale;

    fn mul(self, rhs: Scale) -> Scale {
        Scale(self.0 + rhs.0)
    }
}

impl Div for Scale {
    type Output = Scale;

    fn div(self, rhs: Scale) -> Scale {
        Scale(self.0 - rhs.0)
    }
}

impl std::fmt::Display for Scale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.0 {
            -5 => "femto",
            -4 => "pico",
            -3 => "nano",
            -2 => "micro",
            -1 => "milli",
            0 => "base",
            1 => "kilo",
            2 => "mega",
            3 => "giga",
            4 => "tera",
            5 => "peta",
            _ => return write!(f, "1000^{}", self.0),
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_factor() {
        assert_eq!(Scale::BASE.factor(), 1.0);
        assert_eq!(Scale::MILLI.factor(), 0.001);
        assert_eq!(Scale::KILO.factor(), 1000.0);
        assert_eq!(Scale::NANO.factor(), 1e-9);
    }

    #[test]
    fn scale_product_and_quotient() {
        assert_eq!(Scale::MILLI * Scale::MILLI, Scale::MICRO);
        assert_eq!(Scale::KILO / Scale::MILLI, Scale::MEGA);
        assert_eq!(Scale::BASE / Scale::NANO, Scale::GIGA);
    }

    #[test]
    fn scale_ordering() {
        assert!(Scale::NANO < Scale::MICRO);
        assert!(Scale::KILO > Scale::BASE);
    }

    #[test]
    fn scale_display() {
        assert_eq!(format!("{}", Scale::MICRO), "micro");
        assert_eq!(format!("{}", Scale(7)), "1000^7");
    }
}
