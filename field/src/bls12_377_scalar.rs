use std::cmp::Ordering;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::iter::{Product, Sum};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use itertools::Itertools;
use num::bigint::BigUint;
use num::{Integer, One};
use serde::{Deserialize, Serialize};

use crate::types::{Field, Sample};

/// The scalar field of the BLS12-377 curve, the production field of the
/// toolchain.
///
/// Its order is the 253-bit prime
/// `0x12ab655e9a2ca55660b44d1e5c37b00159aa76fed00000010a11800000000001`.
/// Limbs are canonical little-endian `u64`s.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bls12377Scalar(pub [u64; 4]);

fn biguint_from_array(arr: [u64; 4]) -> BigUint {
    BigUint::from_slice(&[
        arr[0] as u32,
        (arr[0] >> 32) as u32,
        arr[1] as u32,
        (arr[1] >> 32) as u32,
        arr[2] as u32,
        (arr[2] >> 32) as u32,
        arr[3] as u32,
        (arr[3] >> 32) as u32,
    ])
}

impl Bls12377Scalar {
    pub fn from_noncanonical_str(n: &str) -> Self {
        Self::from_noncanonical_biguint(BigUint::from_str(n).unwrap())
    }
}

impl Default for Bls12377Scalar {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialOrd for Bls12377Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Bls12377Scalar {
    fn cmp(&self, other: &Self) -> Ordering {
        // Limbs are canonical and little-endian, so compare high to low.
        self.0.iter().rev().cmp(other.0.iter().rev())
    }
}

impl Display for Bls12377Scalar {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.to_canonical_biguint(), f)
    }
}

impl Debug for Bls12377Scalar {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.to_canonical_biguint(), f)
    }
}

impl Sample for Bls12377Scalar {
    #[inline]
    fn sample<R>(rng: &mut R) -> Self
    where
        R: rand::RngCore + ?Sized,
    {
        use num::bigint::RandBigInt;
        Self::from_noncanonical_biguint(rng.gen_biguint_below(&Self::order()))
    }
}

impl Field for Bls12377Scalar {
    const ZERO: Self = Self([0; 4]);
    const ONE: Self = Self([1, 0, 0, 0]);
    const TWO: Self = Self([2, 0, 0, 0]);
    const NEG_ONE: Self = Self([
        0x0a11800000000000,
        0x59aa76fed0000001,
        0x60b44d1e5c37b001,
        0x12ab655e9a2ca556,
    ]);

    const BANDWIDTH: usize = 253;
    const REGISTER_WIDTH: usize = 252;

    fn order() -> BigUint {
        BigUint::from_str(
            "8444461749428370424248824938781546531375899335154063827935233455917409239041",
        )
        .unwrap()
    }

    fn try_inverse(&self) -> Option<Self> {
        if self.is_zero() {
            return None;
        }
        // Fermat's little theorem.
        Some(self.exp_biguint(&(Self::order() - BigUint::one() - BigUint::one())))
    }

    fn from_noncanonical_biguint(n: BigUint) -> Self {
        Self(
            n.mod_floor(&Self::order())
                .to_u64_digits()
                .into_iter()
                .pad_using(4, |_| 0)
                .collect::<Vec<_>>()[..]
                .try_into()
                .expect("error converting to u64 array"),
        )
    }

    #[inline]
    fn from_canonical_u64(n: u64) -> Self {
        Self([n, 0, 0, 0])
    }

    fn to_canonical_biguint(&self) -> BigUint {
        biguint_from_array(self.0)
    }

    #[inline]
    fn try_to_canonical_u64(&self) -> Option<u64> {
        if self.0[1..].iter().all(|&limb| limb == 0) {
            Some(self.0[0])
        } else {
            None
        }
    }

    fn bits(&self) -> usize {
        for i in (0..4).rev() {
            if self.0[i] != 0 {
                return 64 * i + cinch_util::bits_u64(self.0[i]);
            }
        }
        0
    }
}

impl Neg for Bls12377Scalar {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        if self.is_zero() {
            Self::ZERO
        } else {
            Self::from_noncanonical_biguint(Self::order() - self.to_canonical_biguint())
        }
    }
}

impl Add for Bls12377Scalar {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        let mut result = self.to_canonical_biguint() + rhs.to_canonical_biguint();
        if result >= Self::order() {
            result -= Self::order();
        }
        Self::from_noncanonical_biguint(result)
    }
}

impl AddAssign for Bls12377Scalar {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for Bls12377Scalar {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + x)
    }
}

impl Sub for Bls12377Scalar {
    type Output = Self;

    #[inline]
    #[allow(clippy::suspicious_arithmetic_impl)]
    fn sub(self, rhs: Self) -> Self {
        self + -rhs
    }
}

impl SubAssign for Bls12377Scalar {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul for Bls12377Scalar {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self::from_noncanonical_biguint(
            (self.to_canonical_biguint() * rhs.to_canonical_biguint()).mod_floor(&Self::order()),
        )
    }
}

impl MulAssign for Bls12377Scalar {
    #[inline]
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl Product for Bls12377Scalar {
    #[inline]
    fn product<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.reduce(|acc, x| acc * x).unwrap_or(Self::ONE)
    }
}

impl Div for Bls12377Scalar {
    type Output = Self;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn div(self, rhs: Self) -> Self::Output {
        self * rhs.inverse()
    }
}

impl DivAssign for Bls12377Scalar {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

#[cfg(test)]
mod tests {
    use num::bigint::BigUint;
    use num::One;

    use crate::test_field_arithmetic;
    use crate::types::Field;

    use super::Bls12377Scalar;

    test_field_arithmetic!(crate::bls12_377_scalar::Bls12377Scalar);

    #[test]
    fn neg_one_is_order_minus_one() {
        assert_eq!(
            Bls12377Scalar::NEG_ONE.to_canonical_biguint() + BigUint::one(),
            Bls12377Scalar::order(),
        );
    }

    #[test]
    fn bandwidth_matches_order() {
        assert_eq!(Bls12377Scalar::order().bits() as usize, Bls12377Scalar::BANDWIDTH);
        assert_eq!(Bls12377Scalar::ENCODED_LEN, 32);
    }
}
