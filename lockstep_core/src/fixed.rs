//! Q31.32 fixed-point arithmetic.
//!
//! Floating point results can differ between CPUs, compilers and
//! optimisation levels, so anything that feeds simulation state uses
//! [`Fix64`] instead. All operations are plain integer arithmetic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

const FRAC_BITS: u32 = 32;
const FRAC_MASK: u64 = (1 << FRAC_BITS) - 1;

/// Signed fixed-point number with 32 integer and 32 fractional bits.
///
/// Addition, subtraction, multiplication and negation saturate at
/// [`Fix64::MIN`] / [`Fix64::MAX`] instead of wrapping.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fix64(i64);

impl Fix64 {
    pub const ZERO: Fix64 = Fix64(0);
    pub const ONE: Fix64 = Fix64(1 << FRAC_BITS);
    pub const HALF: Fix64 = Fix64(1 << (FRAC_BITS - 1));
    pub const MAX: Fix64 = Fix64(i64::MAX);
    pub const MIN: Fix64 = Fix64(i64::MIN);
    /// Smallest positive value (2^-32).
    pub const EPSILON: Fix64 = Fix64(1);

    /// Converts an integer.
    pub const fn from_int(value: i32) -> Self {
        Self((value as i64) << FRAC_BITS)
    }

    /// Wraps raw Q31.32 bits.
    pub const fn from_bits(bits: i64) -> Self {
        Self(bits)
    }

    /// Returns the raw Q31.32 bits.
    pub const fn to_bits(self) -> i64 {
        self.0
    }

    /// Builds `num / den` exactly up to the last fractional bit.
    ///
    /// # Panics
    /// Panics if `den` is zero, like integer division.
    pub fn from_ratio(num: i64, den: i64) -> Self {
        let bits = ((num as i128) << FRAC_BITS) / den as i128;
        Self(saturate(bits))
    }

    /// Largest integer less than or equal to `self`.
    pub const fn floor(self) -> i64 {
        self.0 >> FRAC_BITS
    }

    /// Fractional part, always in `[0, 1)`.
    pub const fn fract(self) -> Fix64 {
        Fix64((self.0 as u64 & FRAC_MASK) as i64)
    }

    pub fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Division that returns `None` for a zero divisor.
    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        if rhs.0 == 0 {
            None
        } else {
            Some(Self(saturate(((self.0 as i128) << FRAC_BITS) / rhs.0 as i128)))
        }
    }

    /// Lossy conversion for display and export only.
    ///
    /// Never feed the result back into simulation state.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / (1u64 << FRAC_BITS) as f64
    }
}

fn saturate(bits: i128) -> i64 {
    bits.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

impl Add for Fix64 {
    type Output = Fix64;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Fix64 {
    type Output = Fix64;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Mul for Fix64 {
    type Output = Fix64;

    fn mul(self, rhs: Self) -> Self {
        Self(saturate((self.0 as i128 * rhs.0 as i128) >> FRAC_BITS))
    }
}

/// # Panics
/// Panics on a zero divisor; use [`Fix64::checked_div`] when the divisor
/// comes from simulation state.
impl Div for Fix64 {
    type Output = Fix64;

    fn div(self, rhs: Self) -> Self {
        Self(saturate(((self.0 as i128) << FRAC_BITS) / rhs.0 as i128))
    }
}

impl Neg for Fix64 {
    type Output = Fix64;

    fn neg(self) -> Self {
        Self(self.0.saturating_neg())
    }
}

impl AddAssign for Fix64 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Fix64 {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl MulAssign for Fix64 {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl From<i32> for Fix64 {
    fn from(value: i32) -> Self {
        Self::from_int(value)
    }
}

impl fmt::Display for Fix64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Integer-only formatting with six decimals (truncated)
        let magnitude = self.0.unsigned_abs();
        let int = magnitude >> FRAC_BITS;
        let micros = ((magnitude & FRAC_MASK) * 1_000_000) >> FRAC_BITS;
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:06}", sign, int, micros)
    }
}

impl fmt::Debug for Fix64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fix64({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_roundtrip() {
        assert_eq!(Fix64::from_int(5).floor(), 5);
        assert_eq!(Fix64::from_int(-3).floor(), -3);
        assert_eq!(Fix64::ONE.to_bits(), 1 << 32);
    }

    #[test]
    fn test_arithmetic() {
        let a = Fix64::from_int(3);
        let b = Fix64::HALF;

        assert_eq!(a + b, Fix64::from_ratio(7, 2));
        assert_eq!(a - b, Fix64::from_ratio(5, 2));
        assert_eq!(a * b, Fix64::from_ratio(3, 2));
        assert_eq!(a / b, Fix64::from_int(6));
        assert_eq!(-a, Fix64::from_int(-3));
    }

    #[test]
    fn test_saturation() {
        assert_eq!(Fix64::MAX + Fix64::ONE, Fix64::MAX);
        assert_eq!(Fix64::MIN - Fix64::ONE, Fix64::MIN);
        assert_eq!(Fix64::MAX * Fix64::from_int(2), Fix64::MAX);
        assert_eq!(-Fix64::MIN, Fix64::MAX);
    }

    #[test]
    fn test_floor_and_fract_of_negative() {
        let v = Fix64::from_ratio(-3, 2); // -1.5
        assert_eq!(v.floor(), -2);
        assert_eq!(v.fract(), Fix64::HALF);
    }

    #[test]
    fn test_checked_div_by_zero() {
        assert_eq!(Fix64::ONE.checked_div(Fix64::ZERO), None);
        assert_eq!(
            Fix64::ONE.checked_div(Fix64::from_int(4)),
            Some(Fix64::from_ratio(1, 4))
        );
    }

    #[test]
    fn test_clamp() {
        let lo = Fix64::ZERO;
        let hi = Fix64::from_int(10);
        assert_eq!(Fix64::from_int(12).clamp(lo, hi), hi);
        assert_eq!(Fix64::from_int(-1).clamp(lo, hi), lo);
        assert_eq!(Fix64::from_int(4).clamp(lo, hi), Fix64::from_int(4));
    }

    #[test]
    fn test_display() {
        assert_eq!(Fix64::from_ratio(3, 2).to_string(), "1.500000");
        assert_eq!(Fix64::from_ratio(-1, 4).to_string(), "-0.250000");
        assert_eq!(Fix64::ZERO.to_string(), "0.000000");
    }

    #[test]
    fn test_serde_is_raw_bits() {
        let json = serde_json::to_string(&Fix64::ONE).unwrap();
        assert_eq!(json, "4294967296");
    }
}
