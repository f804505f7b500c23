use std::ops::{Add, Mul, Neg, Sub};

use cinch_field::types::Field;
use serde::{Deserialize, Serialize};

use crate::ir::{render_access, render_op, EvalCtx, Expression, Layer};
use crate::schema::ColumnId;

/// The source-level expression layer.
///
/// `List` bundles the outputs of a multi-output constraint; `IfZero` branches
/// on whether its condition vanishes; `ExternConst` names a constant declared
/// elsewhere in the schema. All three are gone after lowering to MIR.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum HirExpr<F: Field> {
    Const(F),
    Access { column: ColumnId, shift: isize },
    ExternConst(String),
    Add(Vec<HirExpr<F>>),
    Sub(Vec<HirExpr<F>>),
    Mul(Vec<HirExpr<F>>),
    Normalize(Box<HirExpr<F>>),
    IfZero {
        cond: Box<HirExpr<F>>,
        zero: Box<HirExpr<F>>,
        nonzero: Box<HirExpr<F>>,
    },
    List(Vec<HirExpr<F>>),
}

impl<F: Field> HirExpr<F> {
    /// `normalize(e)`: one where `e` is nonzero, zero where it is zero.
    pub fn normalize(e: HirExpr<F>) -> Self {
        HirExpr::Normalize(Box::new(e))
    }

    /// `if_zero(c, a, b)`: `a` where `c` vanishes, `b` elsewhere.
    pub fn if_zero(cond: HirExpr<F>, zero: HirExpr<F>, nonzero: HirExpr<F>) -> Self {
        HirExpr::IfZero {
            cond: Box::new(cond),
            zero: Box::new(zero),
            nonzero: Box::new(nonzero),
        }
    }

    pub fn list(items: Vec<HirExpr<F>>) -> Self {
        HirExpr::List(items)
    }

    pub fn extern_const(name: impl Into<String>) -> Self {
        HirExpr::ExternConst(name.into())
    }
}

impl<F: Field> Expression<F> for HirExpr<F> {
    const LAYER: Layer = Layer::High;

    fn constant(value: F) -> Self {
        HirExpr::Const(value)
    }

    fn access(column: ColumnId, shift: isize) -> Self {
        HirExpr::Access { column, shift }
    }

    fn eval(&self, ctx: &EvalCtx<'_, F>, row: usize) -> F {
        match self {
            HirExpr::Const(value) => *value,
            HirExpr::Access { column, shift } => ctx.access(*column, row, *shift),
            HirExpr::ExternConst(name) => ctx.constant(name),
            HirExpr::Add(args) => args.iter().map(|a| a.eval(ctx, row)).sum(),
            HirExpr::Sub(args) => {
                let mut iter = args.iter();
                let first = iter.next().map(|a| a.eval(ctx, row)).unwrap_or(F::ZERO);
                iter.fold(first, |acc, a| acc - a.eval(ctx, row))
            }
            HirExpr::Mul(args) => args.iter().map(|a| a.eval(ctx, row)).product(),
            HirExpr::Normalize(arg) => F::from_bool(arg.eval(ctx, row).is_nonzero()),
            HirExpr::IfZero {
                cond,
                zero,
                nonzero,
            } => {
                if cond.eval(ctx, row).is_zero() {
                    zero.eval(ctx, row)
                } else {
                    nonzero.eval(ctx, row)
                }
            }
            // A list is not a scalar; multi-output constraints are unpacked
            // by the evaluator before reaching here.
            HirExpr::List(items) => items
                .first()
                .map(|item| item.eval(ctx, row))
                .unwrap_or(F::ZERO),
        }
    }

    fn shifted(&self, offset: isize) -> Self {
        if offset == 0 {
            return self.clone();
        }
        match self {
            HirExpr::Const(_) | HirExpr::ExternConst(_) => self.clone(),
            HirExpr::Access { column, shift } => HirExpr::Access {
                column: *column,
                shift: shift + offset,
            },
            HirExpr::Add(args) => HirExpr::Add(args.iter().map(|a| a.shifted(offset)).collect()),
            HirExpr::Sub(args) => HirExpr::Sub(args.iter().map(|a| a.shifted(offset)).collect()),
            HirExpr::Mul(args) => HirExpr::Mul(args.iter().map(|a| a.shifted(offset)).collect()),
            HirExpr::Normalize(arg) => HirExpr::Normalize(Box::new(arg.shifted(offset))),
            HirExpr::IfZero {
                cond,
                zero,
                nonzero,
            } => HirExpr::IfZero {
                cond: Box::new(cond.shifted(offset)),
                zero: Box::new(zero.shifted(offset)),
                nonzero: Box::new(nonzero.shifted(offset)),
            },
            HirExpr::List(items) => {
                HirExpr::List(items.iter().map(|i| i.shifted(offset)).collect())
            }
        }
    }

    fn for_each_access(&self, f: &mut dyn FnMut(ColumnId, isize)) {
        match self {
            HirExpr::Const(_) | HirExpr::ExternConst(_) => {}
            HirExpr::Access { column, shift } => f(*column, *shift),
            HirExpr::Add(args) | HirExpr::Sub(args) | HirExpr::Mul(args)
            | HirExpr::List(args) => {
                for a in args {
                    a.for_each_access(f);
                }
            }
            HirExpr::Normalize(arg) => arg.for_each_access(f),
            HirExpr::IfZero {
                cond,
                zero,
                nonzero,
            } => {
                cond.for_each_access(f);
                zero.for_each_access(f);
                nonzero.for_each_access(f);
            }
        }
    }

    fn degree(&self) -> usize {
        match self {
            HirExpr::Const(_) | HirExpr::ExternConst(_) => 0,
            HirExpr::Access { .. } => 1,
            HirExpr::Add(args) | HirExpr::Sub(args) | HirExpr::List(args) => {
                args.iter().map(|a| a.degree()).max().unwrap_or(0)
            }
            HirExpr::Mul(args) => args.iter().map(|a| a.degree()).sum(),
            HirExpr::Normalize(arg) => arg.degree(),
            // Tracks the degree of the lowered form.
            HirExpr::IfZero {
                cond,
                zero,
                nonzero,
            } => cond.degree() + zero.degree().max(nonzero.degree()),
        }
    }

    fn for_each_extern(&self, f: &mut dyn FnMut(&str)) {
        match self {
            HirExpr::Const(_) | HirExpr::Access { .. } => {}
            HirExpr::ExternConst(name) => f(name),
            HirExpr::Add(args) | HirExpr::Sub(args) | HirExpr::Mul(args)
            | HirExpr::List(args) => {
                for a in args {
                    a.for_each_extern(f);
                }
            }
            HirExpr::Normalize(arg) => arg.for_each_extern(f),
            HirExpr::IfZero {
                cond,
                zero,
                nonzero,
            } => {
                cond.for_each_extern(f);
                zero.for_each_extern(f);
                nonzero.for_each_extern(f);
            }
        }
    }

    fn list_items(&self) -> Option<&[Self]> {
        match self {
            HirExpr::List(items) => Some(items),
            _ => None,
        }
    }

    fn render(&self, names: &dyn Fn(ColumnId) -> String) -> String {
        match self {
            HirExpr::Const(value) => value.to_string(),
            HirExpr::Access { column, shift } => render_access(*column, *shift, names),
            HirExpr::ExternConst(name) => name.clone(),
            HirExpr::Add(args) => render_op("+", args, names),
            HirExpr::Sub(args) => render_op("-", args, names),
            HirExpr::Mul(args) => render_op("*", args, names),
            HirExpr::Normalize(arg) => format!("(~ {})", arg.render(names)),
            HirExpr::IfZero {
                cond,
                zero,
                nonzero,
            } => format!(
                "(if-zero {} {} {})",
                cond.render(names),
                zero.render(names),
                nonzero.render(names)
            ),
            HirExpr::List(items) => render_op("begin", items, names),
        }
    }
}

impl<F: Field> Add for HirExpr<F> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        match self {
            HirExpr::Add(mut args) => {
                args.push(rhs);
                HirExpr::Add(args)
            }
            _ => HirExpr::Add(vec![self, rhs]),
        }
    }
}

impl<F: Field> Sub for HirExpr<F> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        match self {
            HirExpr::Sub(mut args) => {
                args.push(rhs);
                HirExpr::Sub(args)
            }
            _ => HirExpr::Sub(vec![self, rhs]),
        }
    }
}

impl<F: Field> Mul for HirExpr<F> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        match self {
            HirExpr::Mul(mut args) => {
                args.push(rhs);
                HirExpr::Mul(args)
            }
            _ => HirExpr::Mul(vec![self, rhs]),
        }
    }
}

impl<F: Field> Neg for HirExpr<F> {
    type Output = Self;

    fn neg(self) -> Self {
        HirExpr::Mul(vec![HirExpr::Const(F::NEG_ONE), self])
    }
}
