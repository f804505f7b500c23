use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::iter::{Product, Sum};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use num::bigint::BigUint;
use num::Integer;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::{Field, Sample};

const EPSILON: u64 = (1 << 32) - 1;

/// A field selected to have fast reduction.
///
/// Its order is 2^64 - 2^32 + 1.
/// ```ignore
/// P = 2**64 - EPSILON
///   = 2**64 - 2**32 + 1
///   = 2**32 * (2**32 - 1) + 1
/// ```
/// The middle option of the toolchain: native-word arithmetic with room for
/// 63-bit columns.
#[derive(Copy, Clone, Serialize, Deserialize)]
#[repr(transparent)]
pub struct GoldilocksField(pub u64);

impl GoldilocksField {
    pub const ORDER: u64 = 0xFFFFFFFF00000001;

    #[inline]
    fn to_canonical_u64(self) -> u64 {
        let mut c = self.0;
        // One conditional subtraction suffices, since 2 * ORDER does not fit
        // in a u64.
        if c >= Self::ORDER {
            c -= Self::ORDER;
        }
        c
    }
}

/// Reduces a 128-bit product using the identity 2^64 = 2^32 - 1 (mod p).
#[inline]
fn reduce128(x: u128) -> GoldilocksField {
    let (x_lo, x_hi) = (x as u64, (x >> 64) as u64);
    let x_hi_hi = x_hi >> 32;
    let x_hi_lo = x_hi & EPSILON;

    let (mut t0, borrow) = x_lo.overflowing_sub(x_hi_hi);
    if borrow {
        t0 = t0.wrapping_sub(EPSILON);
    }
    let t1 = x_hi_lo * EPSILON;
    let (res_wrapped, carry) = t0.overflowing_add(t1);
    // Adding EPSILON * carry cannot overflow.
    GoldilocksField(res_wrapped + EPSILON * (carry as u64))
}

impl Default for GoldilocksField {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for GoldilocksField {
    fn eq(&self, other: &Self) -> bool {
        self.to_canonical_u64() == other.to_canonical_u64()
    }
}

impl Eq for GoldilocksField {}

impl PartialOrd for GoldilocksField {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GoldilocksField {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_canonical_u64().cmp(&other.to_canonical_u64())
    }
}

impl Hash for GoldilocksField {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.to_canonical_u64())
    }
}

impl Display for GoldilocksField {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.to_canonical_u64(), f)
    }
}

impl Debug for GoldilocksField {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.to_canonical_u64(), f)
    }
}

impl Sample for GoldilocksField {
    #[inline]
    fn sample<R>(rng: &mut R) -> Self
    where
        R: rand::RngCore + ?Sized,
    {
        Self(rng.gen_range(0..Self::ORDER))
    }
}

impl Field for GoldilocksField {
    const ZERO: Self = Self(0);
    const ONE: Self = Self(1);
    const TWO: Self = Self(2);
    const NEG_ONE: Self = Self(Self::ORDER - 1);

    const BANDWIDTH: usize = 64;
    const REGISTER_WIDTH: usize = 32;

    fn order() -> BigUint {
        Self::ORDER.into()
    }

    fn try_inverse(&self) -> Option<Self> {
        if self.is_zero() {
            return None;
        }
        // Fermat's little theorem.
        Some(self.exp_u64(Self::ORDER - 2))
    }

    fn from_noncanonical_biguint(n: BigUint) -> Self {
        Self(
            n.mod_floor(&Self::order())
                .to_u64_digits()
                .first()
                .copied()
                .unwrap_or(0),
        )
    }

    #[inline]
    fn from_canonical_u64(n: u64) -> Self {
        debug_assert!(n < Self::ORDER);
        Self(n)
    }

    fn to_canonical_biguint(&self) -> BigUint {
        self.to_canonical_u64().into()
    }

    #[inline]
    fn try_to_canonical_u64(&self) -> Option<u64> {
        Some(self.to_canonical_u64())
    }

    #[inline]
    fn bits(&self) -> usize {
        cinch_util::bits_u64(self.to_canonical_u64())
    }

    #[inline]
    fn multiply_accumulate(&self, x: Self, y: Self) -> Self {
        // u64 + u64 * u64 cannot overflow.
        reduce128((self.0 as u128) + (x.0 as u128) * (y.0 as u128))
    }
}

impl Neg for GoldilocksField {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        if self.is_zero() {
            Self::ZERO
        } else {
            Self(Self::ORDER - self.to_canonical_u64())
        }
    }
}

impl Add for GoldilocksField {
    type Output = Self;

    #[inline]
    #[allow(clippy::suspicious_arithmetic_impl)]
    fn add(self, rhs: Self) -> Self {
        let (sum, over) = self
            .to_canonical_u64()
            .overflowing_add(rhs.to_canonical_u64());
        // A single canonical overflow wraps past 2^64; adding EPSILON folds
        // it back below the order.
        Self(sum.wrapping_add(EPSILON * (over as u64)))
    }
}

impl AddAssign for GoldilocksField {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for GoldilocksField {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + x)
    }
}

impl Sub for GoldilocksField {
    type Output = Self;

    #[inline]
    #[allow(clippy::suspicious_arithmetic_impl)]
    fn sub(self, rhs: Self) -> Self {
        let (diff, borrow) = self
            .to_canonical_u64()
            .overflowing_sub(rhs.to_canonical_u64());
        Self(diff.wrapping_sub(EPSILON * (borrow as u64)))
    }
}

impl SubAssign for GoldilocksField {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul for GoldilocksField {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        reduce128((self.0 as u128) * (rhs.0 as u128))
    }
}

impl MulAssign for GoldilocksField {
    #[inline]
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl Product for GoldilocksField {
    fn product<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ONE, |acc, x| acc * x)
    }
}

impl Div for GoldilocksField {
    type Output = Self;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn div(self, rhs: Self) -> Self::Output {
        self * rhs.inverse()
    }
}

impl DivAssign for GoldilocksField {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

#[cfg(test)]
mod tests {
    use crate::test_field_arithmetic;

    test_field_arithmetic!(crate::goldilocks_field::GoldilocksField);

    #[test]
    fn reduction_near_the_order() {
        use crate::types::Field;
        type F = crate::goldilocks_field::GoldilocksField;
        let almost = F::from_canonical_u64(F::ORDER - 1);
        assert_eq!(almost + F::ONE, F::ZERO);
        assert_eq!(almost + almost, F::from_canonical_u64(F::ORDER - 2));
        assert_eq!(F::ZERO - F::ONE, almost);
        assert_eq!(almost * almost, F::ONE);
    }
}
