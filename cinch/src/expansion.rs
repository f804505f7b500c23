//! Trace expansion: executing the assignment DAG.
//!
//! Assignments form a directed acyclic graph over registers. Expansion walks
//! it in topological levels; within a level no assignment reads another's
//! output, so a level can run in parallel and merge its outputs at a
//! barrier. Outputs are merged in declaration order, which makes the
//! expanded trace byte-identical for any thread count.

use cinch_field::types::Field;
use hashbrown::{HashMap, HashSet};
use log::{debug, trace as log_trace};
use rayon::prelude::*;

use crate::assignment::Assignment;
use crate::errors::{Error, Result};
use crate::ir::{EvalCtx, Expression};
use crate::schema::{RegisterId, Schema};
use crate::trace::{decompose, Trace};
use crate::util::CancelToken;

/// Topologically sorts the assignments into levels. Fails with
/// [`Error::CyclicAssignment`] when the graph has a cycle.
pub(crate) fn assignment_levels<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
) -> Result<Vec<Vec<usize>>> {
    let assignments: Vec<_> = schema.assignments().collect();
    let mut producer = HashMap::new();
    for (i, assignment) in assignments.iter().enumerate() {
        for target in assignment.writes() {
            producer.insert(target, i);
        }
    }

    let deps: Vec<HashSet<usize>> = assignments
        .iter()
        .map(|assignment| {
            assignment
                .reads(schema.registers())
                .into_iter()
                .filter_map(|reg| producer.get(&reg).copied())
                .collect()
        })
        .collect();

    let mut done = vec![false; assignments.len()];
    let mut levels = Vec::new();
    let mut placed = 0;
    while placed < assignments.len() {
        let ready: Vec<usize> = (0..assignments.len())
            .filter(|&i| !done[i] && deps[i].iter().all(|&j| done[j]))
            .collect();
        if ready.is_empty() {
            let stuck = (0..assignments.len()).find(|&i| !done[i]).unwrap();
            return Err(Error::CyclicAssignment(
                assignments[stuck].handle().to_string(),
            ));
        }
        for &i in &ready {
            done[i] = true;
        }
        placed += ready.len();
        levels.push(ready);
    }
    Ok(levels)
}

/// The conceptual length of a register's column in this trace.
fn register_len<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    trace: &Trace<F>,
    id: RegisterId,
) -> usize {
    let reg = schema.register(id);
    trace.height(reg.module) * reg.multiplier
}

/// Runs one assignment against the current trace, returning the register
/// columns it produces without mutating anything.
fn execute<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    trace: &Trace<F>,
    assignment: &Assignment<E>,
) -> Result<Vec<(RegisterId, Vec<F>)>> {
    let map = schema.registers();
    match assignment {
        Assignment::Decomposition {
            source,
            parts,
            part_width,
            ..
        } => {
            let width = map[*source].width;
            let len = register_len(schema, trace, *source);
            let mut out: Vec<Vec<F>> = vec![Vec::with_capacity(len); parts.len()];
            for row in 0..len {
                let value = trace.read_register(map, *source, row);
                if value.bits() > width {
                    return Err(Error::Overflow {
                        column: schema.qualified_name(*source),
                        row,
                        value: value.to_string(),
                        width,
                    });
                }
                for (i, part) in decompose(value, *part_width, parts.len()).into_iter().enumerate()
                {
                    out[i].push(part);
                }
            }
            Ok(parts.iter().copied().zip(out).collect())
        }

        Assignment::Interleaving {
            target, sources, ..
        } => {
            let n = sources.len();
            let len = register_len(schema, trace, *target);
            let values = (0..len)
                .map(|i| trace.read_register(map, sources[i % n], i / n))
                .collect();
            Ok(vec![(*target, values)])
        }

        Assignment::SortedPermutation {
            sources,
            targets,
            keys,
            signs,
            inactive,
            ..
        } => {
            let len = register_len(schema, trace, sources[0]);
            let columns: Vec<Vec<F>> = sources
                .iter()
                .map(|&s| trace.register_values(map, s))
                .collect();
            let mut perm: Vec<usize> = (0..len).collect();
            perm.sort_by(|&a, &b| {
                for (&key, &ascending) in keys.iter().zip(signs) {
                    let ord = columns[key][a].cmp(&columns[key][b]);
                    let ord = if ascending { ord } else { ord.reverse() };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                // Stable tie-break on the original row order.
                a.cmp(&b)
            });
            let mut out: Vec<(RegisterId, Vec<F>)> = targets
                .iter()
                .zip(&columns)
                .map(|(&t, column)| (t, perm.iter().map(|&i| column[i]).collect()))
                .collect();
            if let Some(inactive) = inactive {
                let module = map[sources[0]].module;
                let multiplier = map[sources[0]].multiplier;
                let sizing = trace.module_sizing(module);
                let first = sizing.left * multiplier;
                let last = (sizing.left + sizing.used) * multiplier;
                let flags = perm
                    .iter()
                    .map(|&i| F::from_bool(i < first || i >= last))
                    .collect();
                out.push((*inactive, flags));
            }
            Ok(out)
        }

        Assignment::LexicographicHelpers {
            registers,
            signs,
            delta,
            selectors,
            ..
        } => {
            let len = register_len(schema, trace, registers[0]);
            let columns: Vec<Vec<F>> = registers
                .iter()
                .map(|&r| trace.register_values(map, r))
                .collect();
            let mut delta_values = vec![F::ZERO; len];
            let mut selector_values = vec![vec![F::ZERO; len]; registers.len()];
            for row in 1..len {
                let diff = (0..registers.len())
                    .find(|&j| columns[j][row] != columns[j][row - 1]);
                if let Some(j) = diff {
                    selector_values[j][row] = F::ONE;
                    delta_values[row] = if signs[j] {
                        columns[j][row] - columns[j][row - 1]
                    } else {
                        columns[j][row - 1] - columns[j][row]
                    };
                }
            }
            let mut out = vec![(*delta, delta_values)];
            out.extend(selectors.iter().copied().zip(selector_values));
            Ok(out)
        }

        Assignment::Computation { targets, exprs, .. } => {
            let ctx = EvalCtx::new(trace, schema.constants());
            targets
                .iter()
                .zip(exprs)
                .map(|(&target, expr)| {
                    let len = register_len(schema, trace, target);
                    let values = (0..len).map(|row| expr.eval(&ctx, row)).collect();
                    Ok((target, values))
                })
                .collect()
        }

        Assignment::Inverse { target, expr, .. } => {
            let ctx = EvalCtx::new(trace, schema.constants());
            let len = register_len(schema, trace, *target);
            let values = (0..len)
                .map(|row| {
                    expr.eval(&ctx, row)
                        .try_inverse()
                        .unwrap_or(F::ZERO)
                })
                .collect();
            Ok(vec![(*target, values)])
        }
    }
}

/// Walks the assignment DAG and fills every computed register of `trace`.
pub(crate) fn expand_trace<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    trace: &mut Trace<F>,
    parallel: bool,
    cancel: &CancelToken,
) -> Result<()> {
    let levels = assignment_levels(schema)?;
    let assignments: Vec<_> = schema.assignments().collect();
    debug!(
        "expanding {} assignments across {} levels",
        assignments.len(),
        levels.len()
    );
    for level in levels {
        cancel.check()?;
        let snapshot: &Trace<F> = trace;
        let outputs: Vec<Vec<(RegisterId, Vec<F>)>> = if parallel {
            level
                .par_iter()
                .map(|&i| execute(schema, snapshot, assignments[i]))
                .collect::<Result<_>>()?
        } else {
            level
                .iter()
                .map(|&i| execute(schema, snapshot, assignments[i]))
                .collect::<Result<_>>()?
        };
        // Barrier: merge in assignment order, independent of scheduling.
        for (i, columns) in level.into_iter().zip(outputs) {
            log_trace!("merging assignment {}", assignments[i].handle());
            for (register, values) in columns {
                trace.write_register_column(schema.registers(), register, values)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::assignment::Assignment;
    use crate::schema::{ColumnKind, Handle, HirSchema};
    use crate::testing::{build, evaluate, f, raw, try_build, TestField};
    use crate::ir::{Expression, HirExpr};

    use super::*;

    type S = HirSchema<TestField>;

    /// `byte_decompose(x:u16)` into `x0,x1:u8`.
    fn decompose_schema() -> S {
        let mut schema = S::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema.declare_input(m, "x", 16).unwrap();
        let x0 = schema
            .declare_column(m, "x0", 8, ColumnKind::ByteDecomposed, 1, None)
            .unwrap();
        let x1 = schema
            .declare_column(m, "x1", 8, ColumnKind::ByteDecomposed, 1, None)
            .unwrap();
        schema
            .add_assignment(Assignment::Decomposition {
                handle: Handle::new("x_bytes"),
                source: x,
                parts: vec![x0, x1],
                part_width: 8,
            })
            .unwrap();
        schema
    }

    #[test]
    fn byte_decomposition_little_endian() {
        let schema = decompose_schema();
        let trace = build(&schema, raw(&[("m", "x", &[256, 0, 1, 65535])]));
        assert!(evaluate(&schema, &trace).accepted());
        let by_name = |name: &str| {
            schema
                .registers()
                .iter()
                .find(|r| r.name == name)
                .unwrap()
                .id
        };
        assert_eq!(
            trace.register_values(schema.registers(), by_name("x0")),
            [0, 0, 1, 255].map(f).to_vec()
        );
        assert_eq!(
            trace.register_values(schema.registers(), by_name("x1")),
            [1, 0, 0, 255].map(f).to_vec()
        );
    }

    #[test]
    fn sorted_permutation_orders_rows() {
        let mut schema = S::new();
        let m = schema.declare_module("m", false).unwrap();
        let a = schema.declare_input(m, "a", 8).unwrap();
        let b = schema.declare_input(m, "b", 8).unwrap();
        let sa = schema
            .declare_column(m, "sa", 8, ColumnKind::Permuted, 1, None)
            .unwrap();
        let sb = schema
            .declare_column(m, "sb", 8, ColumnKind::Permuted, 1, None)
            .unwrap();
        schema
            .add_assignment(Assignment::SortedPermutation {
                handle: Handle::new("sort_ab"),
                sources: vec![a, b],
                targets: vec![sa, sb],
                keys: vec![0],
                signs: vec![true],
                inactive: None,
            })
            .unwrap();
        schema.permutation("ab_perm", vec![a, b], vec![sa, sb]).unwrap();
        schema.sorted("sa_sorted", vec![sa], vec![true]).unwrap();

        let trace = build(
            &schema,
            raw(&[("m", "a", &[3, 1, 2, 0]), ("m", "b", &[30, 10, 20, 0])]),
        );
        assert!(evaluate(&schema, &trace).accepted());
        assert_eq!(
            trace.register_values(schema.registers(), sa),
            [0, 1, 2, 3].map(f).to_vec()
        );
        assert_eq!(
            trace.register_values(schema.registers(), sb),
            [0, 10, 20, 30].map(f).to_vec()
        );
    }

    #[test]
    fn sorted_permutation_is_stable() {
        let mut schema = S::new();
        let m = schema.declare_module("m", false).unwrap();
        let k = schema.declare_input(m, "k", 8).unwrap();
        let v = schema.declare_input(m, "v", 8).unwrap();
        let sk = schema
            .declare_column(m, "sk", 8, ColumnKind::Permuted, 1, None)
            .unwrap();
        let sv = schema
            .declare_column(m, "sv", 8, ColumnKind::Permuted, 1, None)
            .unwrap();
        schema
            .add_assignment(Assignment::SortedPermutation {
                handle: Handle::new("sort"),
                sources: vec![k, v],
                targets: vec![sk, sv],
                keys: vec![0],
                signs: vec![true],
                inactive: None,
            })
            .unwrap();
        // Equal keys keep their original relative order.
        let trace = build(
            &schema,
            raw(&[("m", "k", &[2, 1, 2, 1]), ("m", "v", &[1, 2, 3, 4])]),
        );
        assert_eq!(
            trace.register_values(schema.registers(), sv),
            [2, 4, 1, 3].map(f).to_vec()
        );
    }

    #[test]
    fn lexicographic_helpers_mark_first_difference() {
        let mut schema = S::new();
        let m = schema.declare_module("m", false).unwrap();
        let k = schema.declare_input(m, "k", 8).unwrap();
        let delta = schema
            .declare_column(m, "delta", 8, ColumnKind::Sorted, 1, None)
            .unwrap();
        let sel = schema
            .declare_column(m, "sel", 1, ColumnKind::Sorted, 1, None)
            .unwrap();
        schema
            .add_assignment(Assignment::LexicographicHelpers {
                handle: Handle::new("k_lex"),
                registers: vec![k],
                signs: vec![true],
                delta,
                selectors: vec![sel],
            })
            .unwrap();
        let trace = build(&schema, raw(&[("m", "k", &[1, 1, 2, 4])]));
        assert_eq!(
            trace.register_values(schema.registers(), delta),
            [0, 0, 1, 2].map(f).to_vec()
        );
        assert_eq!(
            trace.register_values(schema.registers(), sel),
            [0, 0, 1, 1].map(f).to_vec()
        );
    }

    #[test]
    fn computation_chain_runs_in_topological_order() {
        let mut schema = S::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema.declare_input(m, "x", 8).unwrap();
        // Declared out of dependency order on purpose.
        let twice_plus_one = schema.declare_computed(m, "tp1", 16).unwrap();
        let twice = schema.declare_computed(m, "twice", 16).unwrap();
        let xc = schema.col(x);
        schema
            .add_assignment(Assignment::Computation {
                handle: Handle::new("tp1"),
                targets: vec![twice_plus_one],
                exprs: vec![HirExpr::access(schema.col(twice), 0) + HirExpr::one()],
            })
            .unwrap();
        schema
            .add_assignment(Assignment::Computation {
                handle: Handle::new("twice"),
                targets: vec![twice],
                exprs: vec![HirExpr::access(xc, 0) + HirExpr::access(xc, 0)],
            })
            .unwrap();
        let levels = assignment_levels(&schema).unwrap();
        assert_eq!(levels, vec![vec![1], vec![0]]);

        let trace = build(&schema, raw(&[("m", "x", &[1, 2, 3, 4])]));
        assert_eq!(
            trace.register_values(schema.registers(), twice_plus_one),
            [3, 5, 7, 9].map(f).to_vec()
        );
    }

    #[test]
    fn cyclic_assignments_are_detected() {
        let mut schema = S::new();
        let m = schema.declare_module("m", false).unwrap();
        let p = schema.declare_computed(m, "p", 8).unwrap();
        let q = schema.declare_computed(m, "q", 8).unwrap();
        schema
            .add_assignment(Assignment::Computation {
                handle: Handle::new("p_from_q"),
                targets: vec![p],
                exprs: vec![HirExpr::access(schema.col(q), 0)],
            })
            .unwrap();
        schema
            .add_assignment(Assignment::Computation {
                handle: Handle::new("q_from_p"),
                targets: vec![q],
                exprs: vec![HirExpr::access(schema.col(p), 0)],
            })
            .unwrap();
        assert!(matches!(
            assignment_levels(&schema),
            Err(Error::CyclicAssignment(_))
        ));
        assert!(matches!(
            schema.validate(),
            Err(Error::CyclicAssignment(_))
        ));
        assert!(matches!(
            try_build(&schema, raw(&[])),
            Err(Error::CyclicAssignment(_))
        ));
    }

    #[test]
    fn decomposition_overflow_names_the_cell() {
        // A computed source wider than its declared width: the computation
        // writes 300 into a 16-bit register, then a second assignment
        // decomposes a 8-bit view of it.
        let mut schema = S::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema.declare_input(m, "x", 16).unwrap();
        let narrow = schema
            .declare_column(m, "narrow", 4, ColumnKind::Computed, 1, None)
            .unwrap();
        schema
            .add_assignment(Assignment::Computation {
                handle: Handle::new("narrow"),
                targets: vec![narrow],
                exprs: vec![HirExpr::access(schema.col(x), 0)],
            })
            .unwrap();
        let err = try_build(&schema, raw(&[("m", "x", &[1, 2, 3, 300])])).unwrap_err();
        match err {
            Error::Overflow { column, row, width, .. } => {
                assert_eq!(column, "m.narrow");
                assert_eq!(row, 3);
                assert_eq!(width, 4);
            }
            other => panic!("expected overflow, got {other:?}"),
        }
    }
}
