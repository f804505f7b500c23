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

/// The Fermat prime `F_4`.
const P: u32 = (1 << 16) + 1;

/// The prime field of order 2^16 + 1.
///
/// Large enough to hold any 16-bit column value, small enough that every
/// arithmetic path stays in native words. Intended for tests; production
/// schemas use [`crate::bls12_377_scalar::Bls12377Scalar`].
#[derive(Copy, Clone, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FermatField(pub u32);

impl FermatField {
    pub const ORDER: u32 = P;

    #[inline]
    fn to_canonical_u32(self) -> u32 {
        if self.0 >= P {
            self.0 - P
        } else {
            self.0
        }
    }
}

impl Default for FermatField {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for FermatField {
    fn eq(&self, other: &Self) -> bool {
        self.to_canonical_u32() == other.to_canonical_u32()
    }
}

impl Eq for FermatField {}

impl PartialOrd for FermatField {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FermatField {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_canonical_u32().cmp(&other.to_canonical_u32())
    }
}

impl Hash for FermatField {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.to_canonical_u32())
    }
}

impl Display for FermatField {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.to_canonical_u32(), f)
    }
}

impl Debug for FermatField {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.to_canonical_u32(), f)
    }
}

impl Sample for FermatField {
    #[inline]
    fn sample<R>(rng: &mut R) -> Self
    where
        R: rand::RngCore + ?Sized,
    {
        Self(rng.gen_range(0..P))
    }
}

impl Field for FermatField {
    const ZERO: Self = Self(0);
    const ONE: Self = Self(1);
    const TWO: Self = Self(2);
    const NEG_ONE: Self = Self(P - 1);

    const BANDWIDTH: usize = 17;
    const REGISTER_WIDTH: usize = 16;

    fn order() -> BigUint {
        BigUint::from(P)
    }

    #[inline]
    fn try_inverse(&self) -> Option<Self> {
        if self.is_zero() {
            return None;
        }
        // Fermat's little theorem; the exponent p - 2 = 2^16 - 1.
        Some(self.exp_u64((P - 2) as u64))
    }

    fn from_noncanonical_biguint(n: BigUint) -> Self {
        let rem = n.mod_floor(&Self::order());
        Self(rem.to_u64_digits().first().copied().unwrap_or(0) as u32)
    }

    #[inline]
    fn from_canonical_u64(n: u64) -> Self {
        debug_assert!(n < P as u64);
        Self(n as u32)
    }

    fn to_canonical_biguint(&self) -> BigUint {
        BigUint::from(self.to_canonical_u32())
    }

    #[inline]
    fn try_to_canonical_u64(&self) -> Option<u64> {
        Some(self.to_canonical_u32() as u64)
    }

    #[inline]
    fn bits(&self) -> usize {
        cinch_util::bits_u64(self.to_canonical_u32() as u64)
    }
}

impl Neg for FermatField {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        let c = self.to_canonical_u32();
        if c == 0 {
            Self::ZERO
        } else {
            Self(P - c)
        }
    }
}

impl Add for FermatField {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        let sum = self.to_canonical_u32() + rhs.to_canonical_u32();
        Self(if sum >= P { sum - P } else { sum })
    }
}

impl AddAssign for FermatField {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for FermatField {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + x)
    }
}

impl Sub for FermatField {
    type Output = Self;

    #[inline]
    #[allow(clippy::suspicious_arithmetic_impl)]
    fn sub(self, rhs: Self) -> Self {
        let (a, b) = (self.to_canonical_u32(), rhs.to_canonical_u32());
        Self(if a >= b { a - b } else { a + P - b })
    }
}

impl SubAssign for FermatField {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul for FermatField {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        let prod = self.to_canonical_u32() as u64 * rhs.to_canonical_u32() as u64;
        Self((prod % P as u64) as u32)
    }
}

impl MulAssign for FermatField {
    #[inline]
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl Product for FermatField {
    fn product<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ONE, |acc, x| acc * x)
    }
}

impl Div for FermatField {
    type Output = Self;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn div(self, rhs: Self) -> Self::Output {
        self * rhs.inverse()
    }
}

impl DivAssign for FermatField {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

#[cfg(test)]
mod tests {
    use crate::test_field_arithmetic;

    test_field_arithmetic!(crate::fermat::FermatField);
}
