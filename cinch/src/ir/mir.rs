use std::ops::{Add, Mul, Neg, Sub};

use cinch_field::types::Field;
use serde::{Deserialize, Serialize};

use crate::ir::{render_access, render_op, EvalCtx, Expression, Layer};
use crate::schema::ColumnId;

/// The mid-level expression layer: HIR with lists, branching, and extern
/// constants compiled away. `Normalize` survives until the AIR lowering
/// introduces its inverse column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum MirExpr<F: Field> {
    Const(F),
    Access { column: ColumnId, shift: isize },
    Add(Vec<MirExpr<F>>),
    Sub(Vec<MirExpr<F>>),
    Mul(Vec<MirExpr<F>>),
    Normalize(Box<MirExpr<F>>),
}

impl<F: Field> MirExpr<F> {
    pub fn normalize(e: MirExpr<F>) -> Self {
        MirExpr::Normalize(Box::new(e))
    }
}

impl<F: Field> Expression<F> for MirExpr<F> {
    const LAYER: Layer = Layer::Mid;

    fn constant(value: F) -> Self {
        MirExpr::Const(value)
    }

    fn access(column: ColumnId, shift: isize) -> Self {
        MirExpr::Access { column, shift }
    }

    fn eval(&self, ctx: &EvalCtx<'_, F>, row: usize) -> F {
        match self {
            MirExpr::Const(value) => *value,
            MirExpr::Access { column, shift } => ctx.access(*column, row, *shift),
            MirExpr::Add(args) => args.iter().map(|a| a.eval(ctx, row)).sum(),
            MirExpr::Sub(args) => {
                let mut iter = args.iter();
                let first = iter.next().map(|a| a.eval(ctx, row)).unwrap_or(F::ZERO);
                iter.fold(first, |acc, a| acc - a.eval(ctx, row))
            }
            MirExpr::Mul(args) => args.iter().map(|a| a.eval(ctx, row)).product(),
            MirExpr::Normalize(arg) => F::from_bool(arg.eval(ctx, row).is_nonzero()),
        }
    }

    fn shifted(&self, offset: isize) -> Self {
        if offset == 0 {
            return self.clone();
        }
        match self {
            MirExpr::Const(_) => self.clone(),
            MirExpr::Access { column, shift } => MirExpr::Access {
                column: *column,
                shift: shift + offset,
            },
            MirExpr::Add(args) => MirExpr::Add(args.iter().map(|a| a.shifted(offset)).collect()),
            MirExpr::Sub(args) => MirExpr::Sub(args.iter().map(|a| a.shifted(offset)).collect()),
            MirExpr::Mul(args) => MirExpr::Mul(args.iter().map(|a| a.shifted(offset)).collect()),
            MirExpr::Normalize(arg) => MirExpr::Normalize(Box::new(arg.shifted(offset))),
        }
    }

    fn for_each_access(&self, f: &mut dyn FnMut(ColumnId, isize)) {
        match self {
            MirExpr::Const(_) => {}
            MirExpr::Access { column, shift } => f(*column, *shift),
            MirExpr::Add(args) | MirExpr::Sub(args) | MirExpr::Mul(args) => {
                for a in args {
                    a.for_each_access(f);
                }
            }
            MirExpr::Normalize(arg) => arg.for_each_access(f),
        }
    }

    fn degree(&self) -> usize {
        match self {
            MirExpr::Const(_) => 0,
            MirExpr::Access { .. } => 1,
            MirExpr::Add(args) | MirExpr::Sub(args) => {
                args.iter().map(|a| a.degree()).max().unwrap_or(0)
            }
            MirExpr::Mul(args) => args.iter().map(|a| a.degree()).sum(),
            // The lowered form is arg * inv, both degree-one factors over the
            // normalized argument.
            MirExpr::Normalize(arg) => arg.degree() + 1,
        }
    }

    fn render(&self, names: &dyn Fn(ColumnId) -> String) -> String {
        match self {
            MirExpr::Const(value) => value.to_string(),
            MirExpr::Access { column, shift } => render_access(*column, *shift, names),
            MirExpr::Add(args) => render_op("+", args, names),
            MirExpr::Sub(args) => render_op("-", args, names),
            MirExpr::Mul(args) => render_op("*", args, names),
            MirExpr::Normalize(arg) => format!("(~ {})", arg.render(names)),
        }
    }
}

impl<F: Field> Add for MirExpr<F> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        match self {
            MirExpr::Add(mut args) => {
                args.push(rhs);
                MirExpr::Add(args)
            }
            _ => MirExpr::Add(vec![self, rhs]),
        }
    }
}

impl<F: Field> Sub for MirExpr<F> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        match self {
            MirExpr::Sub(mut args) => {
                args.push(rhs);
                MirExpr::Sub(args)
            }
            _ => MirExpr::Sub(vec![self, rhs]),
        }
    }
}

impl<F: Field> Mul for MirExpr<F> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        match self {
            MirExpr::Mul(mut args) => {
                args.push(rhs);
                MirExpr::Mul(args)
            }
            _ => MirExpr::Mul(vec![self, rhs]),
        }
    }
}

impl<F: Field> Neg for MirExpr<F> {
    type Output = Self;

    fn neg(self) -> Self {
        MirExpr::Mul(vec![MirExpr::Const(F::NEG_ONE), self])
    }
}
