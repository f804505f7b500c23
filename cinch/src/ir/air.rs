use std::ops::{Add, Mul, Neg, Sub};

use cinch_field::types::Field;
use serde::{Deserialize, Serialize};

use crate::ir::{render_access, render_op, EvalCtx, Expression, Layer};
use crate::schema::ColumnId;

/// The arithmetic expression layer: a polynomial over column accesses and
/// constants. Whatever a prover backend consumes, it consumes this.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum AirExpr<F: Field> {
    Const(F),
    Access { column: ColumnId, shift: isize },
    Add(Vec<AirExpr<F>>),
    Sub(Vec<AirExpr<F>>),
    Mul(Vec<AirExpr<F>>),
}

impl<F: Field> AirExpr<F> {
    /// Whether this node is a constant, and its value.
    pub fn as_const(&self) -> Option<F> {
        match self {
            AirExpr::Const(value) => Some(*value),
            _ => None,
        }
    }
}

impl<F: Field> Expression<F> for AirExpr<F> {
    const LAYER: Layer = Layer::Arith;

    fn constant(value: F) -> Self {
        AirExpr::Const(value)
    }

    fn access(column: ColumnId, shift: isize) -> Self {
        AirExpr::Access { column, shift }
    }

    fn eval(&self, ctx: &EvalCtx<'_, F>, row: usize) -> F {
        match self {
            AirExpr::Const(value) => *value,
            AirExpr::Access { column, shift } => ctx.access(*column, row, *shift),
            AirExpr::Add(args) => args.iter().map(|a| a.eval(ctx, row)).sum(),
            AirExpr::Sub(args) => {
                let mut iter = args.iter();
                let first = iter.next().map(|a| a.eval(ctx, row)).unwrap_or(F::ZERO);
                iter.fold(first, |acc, a| acc - a.eval(ctx, row))
            }
            AirExpr::Mul(args) => args.iter().map(|a| a.eval(ctx, row)).product(),
        }
    }

    fn shifted(&self, offset: isize) -> Self {
        if offset == 0 {
            return self.clone();
        }
        match self {
            AirExpr::Const(_) => self.clone(),
            AirExpr::Access { column, shift } => AirExpr::Access {
                column: *column,
                shift: shift + offset,
            },
            AirExpr::Add(args) => AirExpr::Add(args.iter().map(|a| a.shifted(offset)).collect()),
            AirExpr::Sub(args) => AirExpr::Sub(args.iter().map(|a| a.shifted(offset)).collect()),
            AirExpr::Mul(args) => AirExpr::Mul(args.iter().map(|a| a.shifted(offset)).collect()),
        }
    }

    fn for_each_access(&self, f: &mut dyn FnMut(ColumnId, isize)) {
        match self {
            AirExpr::Const(_) => {}
            AirExpr::Access { column, shift } => f(*column, *shift),
            AirExpr::Add(args) | AirExpr::Sub(args) | AirExpr::Mul(args) => {
                for a in args {
                    a.for_each_access(f);
                }
            }
        }
    }

    fn degree(&self) -> usize {
        match self {
            AirExpr::Const(_) => 0,
            AirExpr::Access { .. } => 1,
            AirExpr::Add(args) | AirExpr::Sub(args) => {
                args.iter().map(|a| a.degree()).max().unwrap_or(0)
            }
            AirExpr::Mul(args) => args.iter().map(|a| a.degree()).sum(),
        }
    }

    fn render(&self, names: &dyn Fn(ColumnId) -> String) -> String {
        match self {
            AirExpr::Const(value) => value.to_string(),
            AirExpr::Access { column, shift } => render_access(*column, *shift, names),
            AirExpr::Add(args) => render_op("+", args, names),
            AirExpr::Sub(args) => render_op("-", args, names),
            AirExpr::Mul(args) => render_op("*", args, names),
        }
    }
}

impl<F: Field> Add for AirExpr<F> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        match self {
            AirExpr::Add(mut args) => {
                args.push(rhs);
                AirExpr::Add(args)
            }
            _ => AirExpr::Add(vec![self, rhs]),
        }
    }
}

impl<F: Field> Sub for AirExpr<F> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        match self {
            AirExpr::Sub(mut args) => {
                args.push(rhs);
                AirExpr::Sub(args)
            }
            _ => AirExpr::Sub(vec![self, rhs]),
        }
    }
}

impl<F: Field> Mul for AirExpr<F> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        match self {
            AirExpr::Mul(mut args) => {
                args.push(rhs);
                AirExpr::Mul(args)
            }
            _ => AirExpr::Mul(vec![self, rhs]),
        }
    }
}

impl<F: Field> Neg for AirExpr<F> {
    type Output = Self;

    fn neg(self) -> Self {
        AirExpr::Mul(vec![AirExpr::Const(F::NEG_ONE), self])
    }
}

#[cfg(test)]
mod tests {
    use cinch_field::fermat::FermatField;

    use super::*;

    type F = FermatField;
    type E = AirExpr<F>;

    fn f(n: u64) -> F {
        F::from_canonical_u64(n)
    }

    #[test]
    fn degrees() {
        let x = E::access(ColumnId(0), 0);
        let y = E::access(ColumnId(1), 1);
        assert_eq!(E::constant(f(3)).degree(), 0);
        assert_eq!(x.clone().degree(), 1);
        assert_eq!((x.clone() + y.clone()).degree(), 1);
        assert_eq!((x.clone() * y.clone()).degree(), 2);
        assert_eq!((x.clone() * y.clone() * x.clone()).degree(), 3);
        assert_eq!((x - y * E::constant(f(2))).degree(), 1);
    }

    #[test]
    fn shift_range_tracks_extremes() {
        let e = E::access(ColumnId(0), -2) * E::access(ColumnId(1), 3)
            + E::constant(f(1));
        assert_eq!(e.shift_range(), (-2, 3));
        assert_eq!(e.shifted(1).shift_range(), (-1, 4));
    }
}
