use std::sync::Arc;

use cinch_field::types::Field;
use cinch_util::ceil_div_usize;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// A named, typed vector of field elements.
///
/// The payload is shared: cloning a column is O(1), and a finalized trace can
/// be handed to any number of evaluator threads without copying. Mutation
/// goes through copy-on-write and is only exercised while the trace builder
/// still owns the trace exclusively.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct FieldColumn<F: Field> {
    name: String,
    width: usize,
    values: Arc<Vec<F>>,
}

impl<F: Field> FieldColumn<F> {
    /// An empty column. `name` is the qualified `module.column` name used in
    /// diagnostics.
    pub fn empty(name: impl Into<String>, width: usize) -> Self {
        Self {
            name: name.into(),
            width,
            values: Arc::new(Vec::new()),
        }
    }

    pub fn zeroes(name: impl Into<String>, width: usize, len: usize) -> Self {
        Self {
            name: name.into(),
            width,
            values: Arc::new(vec![F::ZERO; len]),
        }
    }

    /// Builds a column from values, checking each against the declared width.
    pub fn from_values(name: impl Into<String>, width: usize, values: Vec<F>) -> Result<Self> {
        let name = name.into();
        for (row, value) in values.iter().enumerate() {
            if value.bits() > width {
                return Err(Error::Overflow {
                    column: name.clone(),
                    row,
                    value: value.to_string(),
                    width,
                });
            }
        }
        Ok(Self {
            name,
            width,
            values: Arc::new(values),
        })
    }

    /// Builds a column without width checks; the builder's validation phase
    /// re-checks every value it did not check on the way in.
    pub(crate) fn from_values_unchecked(
        name: impl Into<String>,
        width: usize,
        values: Vec<F>,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            values: Arc::new(values),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn value(&self, i: usize) -> F {
        self.values[i]
    }

    pub fn get(&self, i: usize) -> Option<F> {
        self.values.get(i).copied()
    }

    pub fn values(&self) -> &[F] {
        &self.values
    }

    /// Whether `value` fits the declared bit width.
    #[inline]
    pub fn fits(&self, value: F) -> bool {
        value.bits() <= self.width
    }

    /// Writes one cell, failing with [`Error::Overflow`] when the value does
    /// not fit the declared width.
    pub fn set(&mut self, i: usize, value: F) -> Result<()> {
        if !self.fits(value) {
            return Err(Error::Overflow {
                column: self.name.clone(),
                row: i,
                value: value.to_string(),
                width: self.width,
            });
        }
        Arc::make_mut(&mut self.values)[i] = value;
        Ok(())
    }

    /// Writes one cell without a width check.
    pub(crate) fn set_unchecked(&mut self, i: usize, value: F) {
        Arc::make_mut(&mut self.values)[i] = value;
    }

    /// Replaces the whole payload without width checks.
    pub(crate) fn replace_values(&mut self, values: Vec<F>) {
        self.values = Arc::new(values);
    }

    /// A copy of the rows in `start..end`, keeping name and width.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        Self {
            name: self.name.clone(),
            width: self.width,
            values: Arc::new(self.values[start..end].to_vec()),
        }
    }

    /// Approximate serialized size, for diagnostics.
    pub fn byte_footprint(&self) -> usize {
        self.len() * ceil_div_usize(self.width.max(1), 8)
    }
}

#[cfg(test)]
mod tests {
    use cinch_field::fermat::FermatField;

    use super::*;

    type F = FermatField;

    fn f(n: u64) -> F {
        F::from_canonical_u64(n)
    }

    #[test]
    fn set_checks_width() {
        let mut col = FieldColumn::<F>::zeroes("m.x", 8, 4);
        col.set(0, f(255)).unwrap();
        assert_eq!(col.value(0), f(255));
        let err = col.set(1, f(256)).unwrap_err();
        assert!(matches!(err, Error::Overflow { row: 1, width: 8, .. }));
    }

    #[test]
    fn clone_is_shared() {
        let col = FieldColumn::<F>::from_values("m.x", 8, vec![f(1), f(2)]).unwrap();
        let copy = col.clone();
        assert!(Arc::ptr_eq(&col.values, &copy.values));
    }

    #[test]
    fn copy_on_write_detaches() {
        let col = FieldColumn::<F>::from_values("m.x", 8, vec![f(1), f(2)]).unwrap();
        let mut copy = col.clone();
        copy.set(0, f(9)).unwrap();
        assert_eq!(col.value(0), f(1));
        assert_eq!(copy.value(0), f(9));
    }

    #[test]
    fn slice_and_footprint() {
        let col = FieldColumn::<F>::from_values("m.x", 12, (0..8).map(f).collect()).unwrap();
        let sub = col.slice(2, 5);
        assert_eq!(sub.values(), &[f(2), f(3), f(4)]);
        assert_eq!(col.byte_footprint(), 8 * 2);
    }

    #[test]
    fn from_values_rejects_wide_rows() {
        let err = FieldColumn::<F>::from_values("m.x", 4, vec![f(3), f(16)]).unwrap_err();
        assert!(matches!(err, Error::Overflow { row: 1, .. }));
    }
}
