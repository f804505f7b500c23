//! Register splitting: realizing wide registers as limb columns narrow
//! enough for a target register width.

use cinch_field::types::Field;
use cinch_util::ceil_div_usize;
use log::debug;

use crate::assignment::Assignment;
use crate::constraint::Constraint;
use crate::errors::{Error, Result};
use crate::ir::{AirExpr, Expression};
use crate::schema::{AirSchema, ColumnDecl, ColumnId, Register, Schema};

/// Splits every register wider than `register_width` into little-endian limb
/// columns and rewrites each access as the weighted limb sum
/// `sum 2^(i*r) * limb_i`, with a range constraint pinning each limb to its
/// width.
///
/// Registers are stable across the split: structural constraints,
/// assignments, and input binding keep addressing them, and the register
/// map records the grouping so the trace engine can decompose written
/// values and project limb cells back to their source register.
pub fn concretize<F: Field>(
    schema: &AirSchema<F>,
    register_width: usize,
) -> Result<AirSchema<F>> {
    if register_width == 0 {
        return Err(Error::OutOfRange(
            "register width must be at least one bit".to_string(),
        ));
    }
    if schema.registers.iter().any(|reg| reg.is_split()) {
        return Err(Error::Parse(
            "schema is already concretized".to_string(),
        ));
    }

    let mut out = AirSchema::with_degree_bound(schema.degree_bound);
    out.modules = schema.modules.clone();
    out.constants = schema.constants.clone();
    out.declarations = schema.declarations.clone();

    // Rebuild the concrete column set register by register, remembering the
    // replacement expression of every old column.
    let mut replacements: Vec<AirExpr<F>> = Vec::with_capacity(schema.columns.len());
    for reg in schema.registers.iter() {
        let num_limbs = ceil_div_usize(reg.width, register_width).max(1);
        let mut limbs = Vec::with_capacity(num_limbs);
        for i in 0..num_limbs {
            let id = ColumnId(out.columns.len());
            let width = (reg.width - i * register_width).min(register_width);
            let name = if num_limbs == 1 {
                reg.name.clone()
            } else {
                format!("{}${i}", reg.name)
            };
            out.columns.push(ColumnDecl {
                id,
                register: reg.id,
                module: reg.module,
                name,
                width,
                multiplier: reg.multiplier,
            });
            limbs.push(id);
        }
        if num_limbs > 1 {
            debug!(
                "splitting {} ({} bits) into {num_limbs} limbs of {register_width}",
                reg.name, reg.width
            );
        }
        out.registers.push(Register {
            limbs: limbs.clone(),
            limb_width: reg.width.min(register_width),
            ..reg.clone()
        });

        debug_assert_eq!(reg.limbs.len(), 1);
        replacements.push(recombination(&limbs, register_width));
    }

    for constraint in &schema.constraints {
        out.constraints
            .push(rewrite_constraint(constraint, &replacements));
    }
    for assignment in &schema.assignments {
        out.assignments
            .push(rewrite_assignment(assignment, &replacements));
    }

    // Each limb of a split register owes its width to a range constraint;
    // the register's overall width then follows from the recombination.
    for reg in out.registers.iter() {
        if !reg.is_split() {
            continue;
        }
        for (i, &limb) in reg.limbs.iter().enumerate() {
            let width = out.columns[limb.0].width;
            let qualified = format!("{}.{}", out.modules[reg.module.0].name, reg.name);
            out.constraints.push(Constraint::Range {
                handle: crate::schema::Handle::new(format!("{qualified}$limb{i}")),
                module: reg.module,
                expr: AirExpr::access(limb, 0),
                bound: F::TWO.exp_u64(width as u64),
            });
        }
    }

    Ok(out)
}

/// The weighted limb sum standing in for an access to the original column.
fn recombination<F: Field>(limbs: &[ColumnId], register_width: usize) -> AirExpr<F> {
    if limbs.len() == 1 {
        return AirExpr::access(limbs[0], 0);
    }
    AirExpr::Add(
        limbs
            .iter()
            .enumerate()
            .map(|(i, &limb)| {
                let access = AirExpr::access(limb, 0);
                if i == 0 {
                    access
                } else {
                    AirExpr::Mul(vec![
                        AirExpr::Const(F::TWO.exp_u64((i * register_width) as u64)),
                        access,
                    ])
                }
            })
            .collect(),
    )
}

fn rewrite_expr<F: Field>(expr: &AirExpr<F>, replacements: &[AirExpr<F>]) -> AirExpr<F> {
    match expr {
        AirExpr::Const(value) => AirExpr::Const(*value),
        AirExpr::Access { column, shift } => replacements[column.0].shifted(*shift),
        AirExpr::Add(args) => AirExpr::Add(rewrite_all(args, replacements)),
        AirExpr::Sub(args) => AirExpr::Sub(rewrite_all(args, replacements)),
        AirExpr::Mul(args) => AirExpr::Mul(rewrite_all(args, replacements)),
    }
}

fn rewrite_all<F: Field>(args: &[AirExpr<F>], replacements: &[AirExpr<F>]) -> Vec<AirExpr<F>> {
    args.iter().map(|a| rewrite_expr(a, replacements)).collect()
}

fn rewrite_constraint<F: Field>(
    constraint: &Constraint<F, AirExpr<F>>,
    replacements: &[AirExpr<F>],
) -> Constraint<F, AirExpr<F>> {
    match constraint {
        Constraint::Vanishing {
            handle,
            module,
            domain,
            guard,
            expr,
        } => Constraint::Vanishing {
            handle: handle.clone(),
            module: *module,
            domain: *domain,
            guard: guard.as_ref().map(|g| rewrite_expr(g, replacements)),
            expr: rewrite_expr(expr, replacements),
        },
        Constraint::Assertion {
            handle,
            module,
            domain,
            guard,
            expr,
        } => Constraint::Assertion {
            handle: handle.clone(),
            module: *module,
            domain: *domain,
            guard: guard.as_ref().map(|g| rewrite_expr(g, replacements)),
            expr: rewrite_expr(expr, replacements),
        },
        Constraint::Lookup {
            handle,
            source_module,
            target_module,
            sources,
            targets,
        } => Constraint::Lookup {
            handle: handle.clone(),
            source_module: *source_module,
            target_module: *target_module,
            sources: rewrite_all(sources, replacements),
            targets: rewrite_all(targets, replacements),
        },
        Constraint::Range {
            handle,
            module,
            expr,
            bound,
        } => Constraint::Range {
            handle: handle.clone(),
            module: *module,
            expr: rewrite_expr(expr, replacements),
            bound: *bound,
        },
        Constraint::Permutation {
            handle,
            sources,
            targets,
        } => Constraint::Permutation {
            handle: handle.clone(),
            sources: sources.clone(),
            targets: targets.clone(),
        },
        Constraint::Interleaving {
            handle,
            target,
            sources,
        } => Constraint::Interleaving {
            handle: handle.clone(),
            target: *target,
            sources: sources.clone(),
        },
        Constraint::Sorted {
            handle,
            registers,
            signs,
        } => Constraint::Sorted {
            handle: handle.clone(),
            registers: registers.clone(),
            signs: signs.clone(),
        },
    }
}

fn rewrite_assignment<F: Field>(
    assignment: &Assignment<AirExpr<F>>,
    replacements: &[AirExpr<F>],
) -> Assignment<AirExpr<F>> {
    match assignment {
        Assignment::Computation {
            handle,
            targets,
            exprs,
        } => Assignment::Computation {
            handle: handle.clone(),
            targets: targets.clone(),
            exprs: rewrite_all(exprs, replacements),
        },
        Assignment::Inverse {
            handle,
            target,
            expr,
        } => Assignment::Inverse {
            handle: handle.clone(),
            target: *target,
            expr: rewrite_expr(expr, replacements),
        },
        other => other.clone(),
    }
}

/// Splits a raw value into the limb columns of a register, for callers that
/// prepare concretized traces by hand. The builder does this on its own
/// when binding inputs.
pub fn limb_decompose<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    value: F,
    register: crate::schema::RegisterId,
) -> Vec<F> {
    let reg = schema.register(register);
    let mut n = value.to_canonical_biguint();
    let mask = (num::BigUint::from(1u32) << reg.limb_width) - 1u32;
    let mut out = Vec::with_capacity(reg.limbs.len());
    for _ in 0..reg.limbs.len() {
        out.push(F::from_noncanonical_biguint(&n & &mask));
        n >>= reg.limb_width;
    }
    out
}
