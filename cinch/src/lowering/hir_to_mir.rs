//! HIR to MIR: list expansion, if-zero lowering, extern-constant
//! resolution.

use cinch_field::types::Field;

use crate::assignment::Assignment;
use crate::constraint::Constraint;
use crate::errors::{Error, Result};
use crate::ir::{HirExpr, MirExpr};
use crate::schema::{Handle, HirSchema, MirSchema};

/// Lowers a whole schema. Acceptance is preserved exactly; failure handles
/// differ only by the `#i` suffixes list expansion introduces.
pub fn lower_to_mir<F: Field>(schema: &HirSchema<F>) -> Result<MirSchema<F>> {
    let mut out = MirSchema::with_degree_bound(schema.degree_bound);
    out.modules = schema.modules.clone();
    out.registers = schema.registers.clone();
    out.columns = schema.columns.clone();
    out.constants = schema.constants.clone();
    out.declarations = schema.declarations.clone();

    for assignment in &schema.assignments {
        out.assignments.push(lower_assignment(schema, assignment)?);
    }
    for constraint in &schema.constraints {
        lower_constraint(schema, constraint, &mut out.constraints)?;
    }
    Ok(out)
}

fn lower_constraint<F: Field>(
    schema: &HirSchema<F>,
    constraint: &Constraint<F, HirExpr<F>>,
    out: &mut Vec<Constraint<F, MirExpr<F>>>,
) -> Result<()> {
    match constraint {
        Constraint::Vanishing {
            handle,
            module,
            domain,
            guard,
            expr,
        } => {
            let guard = lower_opt(schema, guard)?;
            match expr {
                // A multi-output constraint becomes one constraint per
                // element, the parent handle suffixed with the index.
                HirExpr::List(items) => {
                    for (i, item) in items.iter().enumerate() {
                        out.push(Constraint::Vanishing {
                            handle: handle.indexed(i),
                            module: *module,
                            domain: *domain,
                            guard: guard.clone(),
                            expr: lower_expr(schema, item)?,
                        });
                    }
                }
                _ => out.push(Constraint::Vanishing {
                    handle: handle.clone(),
                    module: *module,
                    domain: *domain,
                    guard,
                    expr: lower_expr(schema, expr)?,
                }),
            }
        }
        Constraint::Assertion {
            handle,
            module,
            domain,
            guard,
            expr,
        } => {
            let guard = lower_opt(schema, guard)?;
            match expr {
                HirExpr::List(items) => {
                    for (i, item) in items.iter().enumerate() {
                        out.push(Constraint::Assertion {
                            handle: handle.indexed(i),
                            module: *module,
                            domain: *domain,
                            guard: guard.clone(),
                            expr: lower_expr(schema, item)?,
                        });
                    }
                }
                _ => out.push(Constraint::Assertion {
                    handle: handle.clone(),
                    module: *module,
                    domain: *domain,
                    guard,
                    expr: lower_expr(schema, expr)?,
                }),
            }
        }
        Constraint::Lookup {
            handle,
            source_module,
            target_module,
            sources,
            targets,
        } => {
            let sources = lower_tuple(schema, handle, sources)?;
            let targets = lower_tuple(schema, handle, targets)?;
            if sources.len() != targets.len() {
                return Err(Error::Parse(format!(
                    "lookup {handle} flattens to {} source and {} target expressions",
                    sources.len(),
                    targets.len()
                )));
            }
            out.push(Constraint::Lookup {
                handle: handle.clone(),
                source_module: *source_module,
                target_module: *target_module,
                sources,
                targets,
            });
        }
        Constraint::Range {
            handle,
            module,
            expr,
            bound,
        } => out.push(Constraint::Range {
            handle: handle.clone(),
            module: *module,
            expr: lower_expr(schema, expr)?,
            bound: *bound,
        }),
        Constraint::Permutation {
            handle,
            sources,
            targets,
        } => out.push(Constraint::Permutation {
            handle: handle.clone(),
            sources: sources.clone(),
            targets: targets.clone(),
        }),
        Constraint::Interleaving {
            handle,
            target,
            sources,
        } => out.push(Constraint::Interleaving {
            handle: handle.clone(),
            target: *target,
            sources: sources.clone(),
        }),
        Constraint::Sorted {
            handle,
            registers,
            signs,
        } => out.push(Constraint::Sorted {
            handle: handle.clone(),
            registers: registers.clone(),
            signs: signs.clone(),
        }),
    }
    Ok(())
}

/// Lookup sides admit lists as a shorthand for several expressions; flatten
/// them into the tuple.
fn lower_tuple<F: Field>(
    schema: &HirSchema<F>,
    handle: &Handle,
    exprs: &[HirExpr<F>],
) -> Result<Vec<MirExpr<F>>> {
    let mut out = Vec::with_capacity(exprs.len());
    for expr in exprs {
        match expr {
            HirExpr::List(items) => {
                for item in items {
                    if matches!(item, HirExpr::List(_)) {
                        return Err(Error::Parse(format!("nested list in lookup {handle}")));
                    }
                    out.push(lower_expr(schema, item)?);
                }
            }
            _ => out.push(lower_expr(schema, expr)?),
        }
    }
    Ok(out)
}

fn lower_opt<F: Field>(
    schema: &HirSchema<F>,
    expr: &Option<HirExpr<F>>,
) -> Result<Option<MirExpr<F>>> {
    expr.as_ref().map(|e| lower_expr(schema, e)).transpose()
}

fn lower_assignment<F: Field>(
    schema: &HirSchema<F>,
    assignment: &Assignment<HirExpr<F>>,
) -> Result<Assignment<MirExpr<F>>> {
    Ok(match assignment {
        Assignment::Decomposition {
            handle,
            source,
            parts,
            part_width,
        } => Assignment::Decomposition {
            handle: handle.clone(),
            source: *source,
            parts: parts.clone(),
            part_width: *part_width,
        },
        Assignment::Interleaving {
            handle,
            target,
            sources,
        } => Assignment::Interleaving {
            handle: handle.clone(),
            target: *target,
            sources: sources.clone(),
        },
        Assignment::SortedPermutation {
            handle,
            sources,
            targets,
            keys,
            signs,
            inactive,
        } => Assignment::SortedPermutation {
            handle: handle.clone(),
            sources: sources.clone(),
            targets: targets.clone(),
            keys: keys.clone(),
            signs: signs.clone(),
            inactive: *inactive,
        },
        Assignment::LexicographicHelpers {
            handle,
            registers,
            signs,
            delta,
            selectors,
        } => Assignment::LexicographicHelpers {
            handle: handle.clone(),
            registers: registers.clone(),
            signs: signs.clone(),
            delta: *delta,
            selectors: selectors.clone(),
        },
        Assignment::Computation {
            handle,
            targets,
            exprs,
        } => Assignment::Computation {
            handle: handle.clone(),
            targets: targets.clone(),
            exprs: exprs
                .iter()
                .map(|e| lower_expr(schema, e))
                .collect::<Result<_>>()?,
        },
        Assignment::Inverse {
            handle,
            target,
            expr,
        } => Assignment::Inverse {
            handle: handle.clone(),
            target: *target,
            expr: lower_expr(schema, expr)?,
        },
    })
}

/// Lowers one scalar expression. Lists are only legal where the callers
/// above unpack them.
pub(crate) fn lower_expr<F: Field>(
    schema: &HirSchema<F>,
    expr: &HirExpr<F>,
) -> Result<MirExpr<F>> {
    Ok(match expr {
        HirExpr::Const(value) => MirExpr::Const(*value),
        HirExpr::Access { column, shift } => MirExpr::Access {
            column: *column,
            shift: *shift,
        },
        HirExpr::ExternConst(name) => MirExpr::Const(schema.constant(name).ok_or_else(|| {
            Error::Parse(format!("undeclared constant {name}"))
        })?),
        HirExpr::Add(args) => MirExpr::Add(lower_all(schema, args)?),
        HirExpr::Sub(args) => MirExpr::Sub(lower_all(schema, args)?),
        HirExpr::Mul(args) => MirExpr::Mul(lower_all(schema, args)?),
        HirExpr::Normalize(arg) => MirExpr::Normalize(Box::new(lower_expr(schema, arg)?)),
        // if_zero(c, a, b) = a where c = 0, b elsewhere:
        //   norm(c) * b + (1 - norm(c)) * a
        HirExpr::IfZero {
            cond,
            zero,
            nonzero,
        } => {
            let norm = MirExpr::normalize(lower_expr(schema, cond)?);
            let when_nonzero = MirExpr::Mul(vec![norm.clone(), lower_expr(schema, nonzero)?]);
            let when_zero = MirExpr::Mul(vec![
                MirExpr::Sub(vec![MirExpr::Const(F::ONE), norm]),
                lower_expr(schema, zero)?,
            ]);
            MirExpr::Add(vec![when_nonzero, when_zero])
        }
        HirExpr::List(_) => {
            return Err(Error::Parse(
                "list expression outside a multi-output position".to_string(),
            ))
        }
    })
}

fn lower_all<F: Field>(schema: &HirSchema<F>, args: &[HirExpr<F>]) -> Result<Vec<MirExpr<F>>> {
    args.iter().map(|e| lower_expr(schema, e)).collect()
}
