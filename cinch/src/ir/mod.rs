//! The three expression layers.
//!
//! HIR is what the parser produces: it admits multi-output `list` nodes,
//! `if-zero` branching, and references to named extern constants. MIR strips
//! those but keeps `normalize`. AIR is purely polynomial. All three layers
//! agree on the value of every expression over an accepting trace; lowerings
//! only trade expressiveness for implementability.

use std::fmt::Debug;

use cinch_field::types::Field;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::schema::ColumnId;
use crate::trace::Trace;

pub mod air;
pub mod hir;
pub mod mir;

pub use air::AirExpr;
pub use hir::HirExpr;
pub use mir::MirExpr;

/// Which layer an expression type belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Layer {
    High,
    Mid,
    Arith,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Layer::High => write!(f, "hir"),
            Layer::Mid => write!(f, "mir"),
            Layer::Arith => write!(f, "air"),
        }
    }
}

/// Evaluation context: a finalized trace plus the schema's extern-constant
/// table. Column reads are cyclic: row `i` of `column@k` reads row
/// `(i + k) mod len`, so the trace behaves as a cycle and boundary-sensitive
/// constraints use the First/Last/Transition domains.
pub struct EvalCtx<'a, F: Field> {
    trace: &'a Trace<F>,
    constants: &'a [(String, F)],
}

impl<'a, F: Field> EvalCtx<'a, F> {
    pub fn new(trace: &'a Trace<F>, constants: &'a [(String, F)]) -> Self {
        Self { trace, constants }
    }

    pub fn trace(&self) -> &'a Trace<F> {
        self.trace
    }

    #[inline]
    pub fn access(&self, column: ColumnId, row: usize, shift: isize) -> F {
        let col = self.trace.column(column);
        let len = col.len() as isize;
        debug_assert!(len > 0, "access to empty column {}", col.name());
        let i = (row as isize + shift).rem_euclid(len);
        col.value(i as usize)
    }

    pub fn constant(&self, name: &str) -> F {
        self.constants
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|&(_, v)| v)
            .expect("extern constant resolved during schema validation")
    }
}

/// Operations common to the three expression layers.
pub trait Expression<F: Field>:
    'static + Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + Sized
{
    const LAYER: Layer;

    fn constant(value: F) -> Self;

    fn access(column: ColumnId, shift: isize) -> Self;

    /// The value of this expression at `row`.
    fn eval(&self, ctx: &EvalCtx<'_, F>, row: usize) -> F;

    /// Adds `offset` to every column access.
    fn shifted(&self, offset: isize) -> Self;

    fn for_each_access(&self, f: &mut dyn FnMut(ColumnId, isize));

    /// Total degree, counting every column access as degree one.
    fn degree(&self) -> usize;

    /// Extern-constant names referenced by this expression. Only HIR has any.
    fn for_each_extern(&self, _f: &mut dyn FnMut(&str)) {}

    /// The elements of a top-level multi-output `list`, when this layer has
    /// such a node.
    fn list_items(&self) -> Option<&[Self]> {
        None
    }

    /// S-expression rendering, with column names resolved by `names`.
    fn render(&self, names: &dyn Fn(ColumnId) -> String) -> String;

    fn zero() -> Self {
        Self::constant(F::ZERO)
    }

    fn one() -> Self {
        Self::constant(F::ONE)
    }

    fn accesses(&self) -> Vec<(ColumnId, isize)> {
        let mut out = Vec::new();
        self.for_each_access(&mut |column, shift| out.push((column, shift)));
        out
    }

    /// The most negative and most positive shift appearing in this
    /// expression, `(0, 0)` when there are no accesses.
    fn shift_range(&self) -> (isize, isize) {
        let mut min = 0;
        let mut max = 0;
        self.for_each_access(&mut |_, shift| {
            min = min.min(shift);
            max = max.max(shift);
        });
        (min, max)
    }
}

/// `(op a b c)` rendering shared by the layers.
pub(crate) fn render_op<F: Field, E: Expression<F>>(
    op: &str,
    args: &[E],
    names: &dyn Fn(ColumnId) -> String,
) -> String {
    let mut out = String::from("(");
    out.push_str(op);
    for arg in args {
        out.push(' ');
        out.push_str(&arg.render(names));
    }
    out.push(')');
    out
}

/// A column access, shift included when nonzero.
pub(crate) fn render_access(
    column: ColumnId,
    shift: isize,
    names: &dyn Fn(ColumnId) -> String,
) -> String {
    let name = names(column);
    if shift == 0 {
        name
    } else {
        format!("(shift {name} {shift})")
    }
}
