//! Shared fixtures for the crate's tests: tiny schemas over the test field
//! and shorthand for building and checking traces.

use cinch_field::fermat::FermatField;
use cinch_field::types::Field;

use crate::builder::{BuildConfig, TraceBuilder};
use crate::constraint::Domain;
use crate::errors::Result;
use crate::evaluator::{check, CheckConfig, Evaluation};
use crate::ir::{Expression, HirExpr};
use crate::schema::{HirSchema, ModuleId, RegisterId, Schema};
use crate::trace::{RawTrace, Trace};
use crate::util::CancelToken;

pub type TestField = FermatField;

pub fn f(n: u64) -> TestField {
    TestField::from_canonical_u64(n)
}

/// Exact-height building: no extra padding, no defensive spillage, so the
/// literal scenarios see the module heights they declare.
pub fn exact_config() -> BuildConfig {
    BuildConfig {
        defensive: false,
        ..BuildConfig::default()
    }
}

pub fn raw(entries: &[(&str, &str, &[u64])]) -> RawTrace<TestField> {
    let mut out = RawTrace::new();
    for &(module, column, values) in entries {
        out.push(module, column, values.iter().map(|&v| f(v)).collect());
    }
    out
}

/// Builds with [`exact_config`], panicking on builder errors.
pub fn build<E: Expression<TestField>>(
    schema: &Schema<TestField, E>,
    raw: RawTrace<TestField>,
) -> Trace<TestField> {
    try_build(schema, raw).expect("trace builds")
}

pub fn try_build<E: Expression<TestField>>(
    schema: &Schema<TestField, E>,
    raw: RawTrace<TestField>,
) -> Result<Trace<TestField>> {
    let builder = TraceBuilder::with_config(schema, exact_config());
    builder.build(raw, &CancelToken::new()).map(|(trace, _)| trace)
}

pub fn evaluate<E: Expression<TestField>>(
    schema: &Schema<TestField, E>,
    trace: &Trace<TestField>,
) -> Evaluation {
    check(schema, trace, &CheckConfig::default(), &CancelToken::new()).expect("evaluation runs")
}

/// Scenario A/B: module `m`, column `x:u8`, and the vanishing constraint
/// `x' - x - 1 = 0` on every row but the last.
pub fn counter_schema() -> (HirSchema<TestField>, ModuleId, RegisterId) {
    let mut schema = HirSchema::new();
    let m = schema.declare_module("m", false).unwrap();
    let x = schema.declare_input(m, "x", 8).unwrap();
    let xc = schema.col(x);
    let expr = HirExpr::access(xc, 1) - HirExpr::access(xc, 0) - HirExpr::one();
    schema
        .vanishing("inc", m, Domain::Transition, None, expr)
        .unwrap();
    (schema, m, x)
}

/// Scenario C: `a:u8`, `b:u8`, `range(b, 4)`, and `lookup(a in b)`.
pub fn lookup_schema() -> (HirSchema<TestField>, ModuleId) {
    let mut schema = HirSchema::new();
    let m = schema.declare_module("m", false).unwrap();
    let a = schema.declare_input(m, "a", 8).unwrap();
    let b = schema.declare_input(m, "b", 8).unwrap();
    let (ac, bc) = (schema.col(a), schema.col(b));
    schema
        .range("b_small", m, HirExpr::access(bc, 0), f(4))
        .unwrap();
    schema
        .lookup(
            "a_in_b",
            m,
            m,
            vec![HirExpr::access(ac, 0)],
            vec![HirExpr::access(bc, 0)],
        )
        .unwrap();
    (schema, m)
}

/// Scenario F: `k:u8` sorted ascending.
pub fn sorted_schema() -> (HirSchema<TestField>, ModuleId, RegisterId) {
    let mut schema = HirSchema::new();
    let m = schema.declare_module("m", false).unwrap();
    let k = schema.declare_input(m, "k", 8).unwrap();
    schema.sorted("k_sorted", vec![k], vec![true]).unwrap();
    (schema, m, k)
}
