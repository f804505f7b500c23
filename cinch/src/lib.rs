//! Constraint-compilation pipeline and trace engine.
//!
//! A schema is an ordered catalog of modules, columns, constraints, and
//! computed-column assignments over one of three expression layers (HIR, MIR,
//! AIR). Lowerings walk the schema down the layer stack; the trace builder
//! turns raw input columns into a padded, expanded, validated trace; the
//! evaluator decides whether a trace satisfies the schema and reports
//! failures with cell provenance.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::type_complexity)]

pub mod assignment;
pub mod builder;
pub mod column;
pub mod constraint;
pub mod errors;
pub mod evaluator;
pub mod expansion;
pub mod ir;
pub mod lowering;
pub mod report;
pub mod schema;
pub mod testing;
pub mod trace;
pub mod util;
