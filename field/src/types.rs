use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::iter::{Product, Sum};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use num::bigint::BigUint;
use rand::rngs::OsRng;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::FieldError;

/// Sampling
pub trait Sample: Sized {
    /// Samples a single value using `rng`.
    fn sample<R>(rng: &mut R) -> Self
    where
        R: rand::RngCore + ?Sized;

    /// Samples a single value using the [`OsRng`].
    #[inline]
    fn rand() -> Self {
        Self::sample(&mut OsRng)
    }

    /// Samples a [`Vec`] of values of length `n` using [`OsRng`].
    #[inline]
    fn rand_vec(n: usize) -> Vec<Self> {
        (0..n).map(|_| Self::rand()).collect()
    }
}

/// A prime field with a fixed modulus, addressed through its canonical
/// representatives.
///
/// Besides the ring operations, every field declares the two geometry
/// parameters the constraint pipeline keys on: `BANDWIDTH`, the bit length of
/// the modulus, and `REGISTER_WIDTH`, the widest single register a downstream
/// prover accepts before columns must be split into limbs.
pub trait Field:
    'static
    + Copy
    + Eq
    + Ord
    + Hash
    + Neg<Output = Self>
    + Add<Self, Output = Self>
    + AddAssign<Self>
    + Sum
    + Sub<Self, Output = Self>
    + SubAssign<Self>
    + Mul<Self, Output = Self>
    + MulAssign<Self>
    + Product
    + Div<Self, Output = Self>
    + DivAssign<Self>
    + Debug
    + Default
    + Display
    + Sample
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
{
    const ZERO: Self;
    const ONE: Self;
    const TWO: Self;
    const NEG_ONE: Self;

    /// The bit length of the field modulus.
    const BANDWIDTH: usize;

    /// The widest column a single prover register can carry. Columns declared
    /// wider than this must be concretized into limbs.
    const REGISTER_WIDTH: usize;

    /// Byte length of the fixed-width big-endian encoding.
    const ENCODED_LEN: usize = (Self::BANDWIDTH + 7) / 8;

    fn order() -> BigUint;

    #[inline]
    fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    #[inline]
    fn is_nonzero(&self) -> bool {
        *self != Self::ZERO
    }

    #[inline]
    fn is_one(&self) -> bool {
        *self == Self::ONE
    }

    #[inline]
    fn double(&self) -> Self {
        *self + *self
    }

    #[inline]
    fn square(&self) -> Self {
        *self * *self
    }

    /// Compute the multiplicative inverse of this field element.
    fn try_inverse(&self) -> Option<Self>;

    fn inverse(&self) -> Self {
        self.try_inverse().expect("Tried to invert zero")
    }

    /// Fallible inversion, reporting zero as [`FieldError::NonInvertible`].
    fn checked_inverse(&self) -> Result<Self, FieldError> {
        self.try_inverse().ok_or(FieldError::NonInvertible)
    }

    /// Montgomery's trick: invert the product of the inputs, then derive the
    /// individual inverses by multiplication. None of the inputs may be zero.
    fn batch_multiplicative_inverse(x: &[Self]) -> Vec<Self> {
        let n = x.len();
        if n == 0 {
            return Vec::new();
        }
        let mut prefix = Vec::with_capacity(n);
        let mut acc = Self::ONE;
        for &xi in x {
            debug_assert!(xi.is_nonzero());
            acc *= xi;
            prefix.push(acc);
        }
        let mut inv = prefix[n - 1].inverse();
        let mut out = vec![Self::ZERO; n];
        for i in (0..n).rev() {
            out[i] = if i == 0 { inv } else { inv * prefix[i - 1] };
            inv *= x[i];
        }
        out
    }

    /// Returns `n % Self::order()`.
    fn from_noncanonical_biguint(n: BigUint) -> Self;

    /// Returns `n`. Assumes that `n` is already in canonical form, i.e. `n < Self::order()`.
    fn from_canonical_u64(n: u64) -> Self;

    /// Returns `n`. Assumes that `n` is already in canonical form, i.e. `n < Self::order()`.
    fn from_canonical_u32(n: u32) -> Self {
        Self::from_canonical_u64(n as u64)
    }

    /// Returns `n`. Assumes that `n` is already in canonical form, i.e. `n < Self::order()`.
    fn from_canonical_u8(n: u8) -> Self {
        Self::from_canonical_u64(n as u64)
    }

    /// Returns `n`. Assumes that `n` is already in canonical form, i.e. `n < Self::order()`.
    fn from_canonical_usize(n: usize) -> Self {
        Self::from_canonical_u64(n as u64)
    }

    fn from_bool(b: bool) -> Self {
        Self::from_canonical_u64(b as u64)
    }

    fn to_canonical_biguint(&self) -> BigUint;

    /// The canonical representative as a `u64`, when it fits.
    fn try_to_canonical_u64(&self) -> Option<u64>;

    /// Bit length of the canonical representative. A value `v` fits a `w`-bit
    /// column exactly when `v.bits() <= w`.
    fn bits(&self) -> usize;

    fn exp_u64(&self, power: u64) -> Self {
        let mut current = *self;
        let mut product = Self::ONE;
        for j in 0..cinch_util::bits_u64(power) {
            if ((power >> j) & 1) != 0 {
                product *= current;
            }
            current = current.square();
        }
        product
    }

    fn exp_biguint(&self, power: &BigUint) -> Self {
        let mut result = Self::ONE;
        for &digit in power.to_u64_digits().iter().rev() {
            for _ in 0..64 {
                result = result.square();
            }
            result *= self.exp_u64(digit);
        }
        result
    }

    fn powers(&self) -> Powers<Self> {
        self.shifted_powers(Self::ONE)
    }

    fn shifted_powers(&self, start: Self) -> Powers<Self> {
        Powers {
            base: *self,
            current: start,
        }
    }

    /// Fixed-width big-endian encoding of the canonical representative,
    /// `ENCODED_LEN` bytes long.
    fn to_bytes(&self) -> Vec<u8> {
        let digits = self.to_canonical_biguint().to_bytes_be();
        let mut out = vec![0u8; Self::ENCODED_LEN - digits.len()];
        out.extend_from_slice(&digits);
        out
    }

    /// Decodes a fixed-width big-endian encoding. Fails with
    /// [`FieldError::OutOfRange`] when the decoded integer is not below the
    /// modulus.
    fn from_bytes(bytes: &[u8]) -> Result<Self, FieldError> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(FieldError::BadLength {
                expected: Self::ENCODED_LEN,
                got: bytes.len(),
            });
        }
        let n = BigUint::from_bytes_be(bytes);
        if n >= Self::order() {
            return Err(FieldError::OutOfRange);
        }
        Ok(Self::from_noncanonical_biguint(n))
    }

    /// Equivalent to *self + x * y, but may be cheaper.
    #[inline]
    fn multiply_accumulate(&self, x: Self, y: Self) -> Self {
        *self + x * y
    }
}

/// An iterator over the powers of a certain base element `b`: `b^0, b^1, b^2, ...`.
#[must_use = "iterators are lazy and do nothing unless consumed"]
#[derive(Clone, Debug)]
pub struct Powers<F: Field> {
    base: F,
    current: F,
}

impl<F: Field> Iterator for Powers<F> {
    type Item = F;

    fn next(&mut self) -> Option<F> {
        let result = self.current;
        self.current *= self.base;
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (usize::MAX, None)
    }
}

#[cfg(test)]
mod tests {
    use super::Field;
    use crate::fermat::FermatField;

    #[test]
    fn test_powers() {
        type F = FermatField;
        let powers_of_two: Vec<F> = F::TWO.powers().take(5).collect();
        assert_eq!(
            powers_of_two,
            [1u64, 2, 4, 8, 16].map(F::from_canonical_u64)
        );
    }

    #[test]
    fn test_batch_inverse() {
        type F = FermatField;
        let xs: Vec<F> = (1..100u64).map(F::from_canonical_u64).collect();
        let invs = F::batch_multiplicative_inverse(&xs);
        for (x, inv) in xs.iter().zip(&invs) {
            assert_eq!(*x * *inv, F::ONE);
        }
    }
}
