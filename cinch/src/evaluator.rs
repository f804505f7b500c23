//! Deciding whether a finalized trace satisfies a schema.
//!
//! Constraints are partitioned into batches dispatched over the thread pool;
//! evaluation within a batch is sequential, ordering between batches is
//! free. Failures are deduplicated by (kind, handle, row) and sorted, so the
//! result is deterministic for any batch size or thread count.

use cinch_field::types::Field;
use hashbrown::{HashMap, HashSet};
use log::debug;
use num::bigint::BigUint;
use rayon::prelude::*;

use crate::constraint::{Constraint, Domain};
use crate::errors::{Error, Result};
use crate::ir::{EvalCtx, Expression};
use crate::report::{expr_cells, CellRef, Failure, FailureKind};
use crate::schema::{Handle, ModuleId, RegisterId, Schema};
use crate::trace::Trace;
use crate::util::CancelToken;

/// Knobs of the evaluator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CheckConfig {
    /// Dispatch batches over the thread pool.
    pub parallel: bool,
    /// Constraints per batch.
    pub batch_size: usize,
    /// Failures reported per constraint before it stops scanning.
    pub failure_limit: usize,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            batch_size: 8,
            failure_limit: 32,
        }
    }
}

impl CheckConfig {
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }
}

/// Whether the trace satisfies the schema's non-assertion constraints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Rejected(Vec<Failure>),
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted)
    }
}

/// The evaluator's verdict plus the debug-assertion failures, which never
/// affect acceptance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluation {
    pub outcome: Outcome,
    pub debug: Vec<Failure>,
}

impl Evaluation {
    pub fn accepted(&self) -> bool {
        self.outcome.is_accepted()
    }

    pub fn failures(&self) -> &[Failure] {
        match &self.outcome {
            Outcome::Accepted => &[],
            Outcome::Rejected(failures) => failures,
        }
    }

    /// Promotes a rejection to [`Error::Unsatisfiable`], naming the first
    /// failing constraint. With `deny_assertions`, debug failures are
    /// promoted to [`Error::DebugAssertion`] as well.
    pub fn ensure_accepted(&self, deny_assertions: bool) -> Result<()> {
        if let Outcome::Rejected(failures) = &self.outcome {
            return Err(Error::Unsatisfiable(failures[0].handle.clone()));
        }
        if deny_assertions {
            if let Some(failure) = self.debug.first() {
                return Err(Error::DebugAssertion(failure.handle.clone()));
            }
        }
        Ok(())
    }
}

/// Evaluates every constraint of `schema` against `trace`.
pub fn check<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    trace: &Trace<F>,
    config: &CheckConfig,
    cancel: &CancelToken,
) -> Result<Evaluation> {
    let constraints: Vec<&Constraint<F, E>> = schema.constraints().collect();
    debug!(
        "checking {} constraints in batches of {}",
        constraints.len(),
        config.batch_size
    );
    let batch_size = config.batch_size.max(1);
    let batches: Vec<&[&Constraint<F, E>]> = constraints.chunks(batch_size).collect();

    let run = |batch: &&[&Constraint<F, E>]| -> Result<(Vec<Failure>, Vec<Failure>)> {
        cancel.check()?;
        let mut failures = Vec::new();
        let mut debug_failures = Vec::new();
        for constraint in *batch {
            let found = eval_constraint(schema, trace, constraint, config)?;
            if matches!(constraint, Constraint::Assertion { .. }) {
                debug_failures.extend(found);
            } else {
                failures.extend(found);
            }
        }
        Ok((failures, debug_failures))
    };

    let results: Vec<(Vec<Failure>, Vec<Failure>)> = if config.parallel {
        batches.par_iter().map(run).collect::<Result<_>>()?
    } else {
        batches.iter().map(run).collect::<Result<_>>()?
    };

    let mut failures = Vec::new();
    let mut debug_failures = Vec::new();
    for (batch_failures, batch_debug) in results {
        failures.extend(batch_failures);
        debug_failures.extend(batch_debug);
    }
    let failures = dedup(failures);
    let debug_failures = dedup(debug_failures);

    let outcome = if failures.is_empty() {
        Outcome::Accepted
    } else {
        Outcome::Rejected(failures)
    };
    Ok(Evaluation {
        outcome,
        debug: debug_failures,
    })
}

fn dedup(mut failures: Vec<Failure>) -> Vec<Failure> {
    let mut seen = HashSet::new();
    failures.retain(|f| seen.insert((f.kind, f.handle.clone(), f.row)));
    failures.sort_by(|a, b| {
        (&a.handle, a.row, a.kind).cmp(&(&b.handle, b.row, b.kind))
    });
    failures
}

fn eval_constraint<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    trace: &Trace<F>,
    constraint: &Constraint<F, E>,
    config: &CheckConfig,
) -> Result<Vec<Failure>> {
    match constraint {
        Constraint::Vanishing {
            handle,
            module,
            domain,
            guard,
            expr,
        } => Ok(eval_vanishing(
            schema, trace, handle, *module, *domain, guard, expr,
            FailureKind::Vanishing, config.failure_limit,
        )),
        Constraint::Assertion {
            handle,
            module,
            domain,
            guard,
            expr,
        } => Ok(eval_vanishing(
            schema, trace, handle, *module, *domain, guard, expr,
            FailureKind::Assertion, config.failure_limit,
        )),
        Constraint::Range {
            handle,
            module,
            expr,
            bound,
        } => Ok(eval_range(
            schema, trace, handle, *module, expr, *bound, config.failure_limit,
        )),
        Constraint::Lookup {
            handle,
            source_module,
            target_module,
            sources,
            targets,
        } => Ok(eval_lookup(
            schema, trace, handle, *source_module, *target_module, sources, targets, config,
        )),
        Constraint::Permutation {
            handle,
            sources,
            targets,
        } => Ok(eval_permutation(
            schema, trace, handle, sources, targets, config.failure_limit,
        )),
        Constraint::Interleaving {
            handle,
            target,
            sources,
        } => Ok(eval_interleaving(
            schema, trace, handle, *target, sources, config.failure_limit,
        )),
        Constraint::Sorted {
            handle,
            registers,
            signs,
        } => Ok(eval_sorted(
            schema, trace, handle, registers, signs, config.failure_limit,
        )),
    }
}

/// Rows an expression set ranges over: the length of the first accessed
/// column, the module height when the expressions are constant.
fn domain_len<F: Field, E: Expression<F>>(
    trace: &Trace<F>,
    exprs: &[&E],
    module: ModuleId,
) -> usize {
    exprs
        .iter()
        .find_map(|e| e.accesses().first().map(|&(column, _)| trace.column(column).len()))
        .unwrap_or_else(|| trace.height(module))
}

fn eval_vanishing<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    trace: &Trace<F>,
    handle: &Handle,
    module: ModuleId,
    domain: Domain,
    guard: &Option<E>,
    expr: &E,
    kind: FailureKind,
    limit: usize,
) -> Vec<Failure> {
    let ctx = EvalCtx::new(trace, schema.constants());
    let len = domain_len(trace, &[expr], module);
    let (start, end) = domain.row_range(len);
    let mut failures = Vec::new();
    for row in start..end {
        if let Some(guard) = guard {
            if guard.eval(&ctx, row).is_zero() {
                continue;
            }
        }
        let items: &[E] = match expr.list_items() {
            Some(items) => items,
            None => std::slice::from_ref(expr),
        };
        for item in items {
            if item.eval(&ctx, row).is_nonzero() {
                let mut cells = expr_cells(schema, item, row, len);
                if let Some(guard) = guard {
                    cells.extend(expr_cells(schema, guard, row, len));
                    cells.sort();
                    cells.dedup();
                }
                failures.push(Failure {
                    kind,
                    handle: handle.clone(),
                    row: Some(row),
                    cells,
                });
                if failures.len() >= limit {
                    return failures;
                }
            }
        }
    }
    failures
}

fn eval_range<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    trace: &Trace<F>,
    handle: &Handle,
    module: ModuleId,
    expr: &E,
    bound: F,
    limit: usize,
) -> Vec<Failure> {
    let ctx = EvalCtx::new(trace, schema.constants());
    let len = domain_len(trace, &[expr], module);
    let bound_small = bound.try_to_canonical_u64();
    let bound_big: BigUint = bound.to_canonical_biguint();
    let mut failures = Vec::new();
    for row in 0..len {
        let value = expr.eval(&ctx, row);
        let in_range = match (bound_small, value.try_to_canonical_u64()) {
            (Some(bound), Some(value)) => value < bound,
            _ => value.to_canonical_biguint() < bound_big,
        };
        if !in_range {
            failures.push(Failure {
                kind: FailureKind::Range,
                handle: handle.clone(),
                row: Some(row),
                cells: expr_cells(schema, expr, row, len),
            });
            if failures.len() >= limit {
                break;
            }
        }
    }
    failures
}

fn eval_lookup<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    trace: &Trace<F>,
    handle: &Handle,
    source_module: ModuleId,
    target_module: ModuleId,
    sources: &[E],
    targets: &[E],
    config: &CheckConfig,
) -> Vec<Failure> {
    let ctx = EvalCtx::new(trace, schema.constants());
    let source_len = domain_len(trace, &sources.iter().collect::<Vec<_>>(), source_module);
    let target_len = domain_len(trace, &targets.iter().collect::<Vec<_>>(), target_module);

    let tuple_at = |exprs: &[E], row: usize| -> Vec<F> {
        exprs.iter().map(|e| e.eval(&ctx, row)).collect()
    };

    // Per-thread multisets over target tuples, merged by summing
    // multiplicities.
    let counts: HashMap<Vec<F>, u64> = if config.parallel {
        (0..target_len)
            .into_par_iter()
            .fold(HashMap::new, |mut m: HashMap<Vec<F>, u64>, row| {
                *m.entry(tuple_at(targets, row)).or_insert(0) += 1;
                m
            })
            .reduce(HashMap::new, |mut a, b| {
                for (tuple, count) in b {
                    *a.entry(tuple).or_insert(0) += count;
                }
                a
            })
    } else {
        let mut m = HashMap::new();
        for row in 0..target_len {
            *m.entry(tuple_at(targets, row)).or_insert(0) += 1;
        }
        m
    };

    // Membership semantics: a source tuple fails when it never occurs among
    // the targets. Multiplicities in `counts` exist for the parallel merge,
    // not for consumption.
    let mut failures = Vec::new();
    for row in 0..source_len {
        let tuple = tuple_at(sources, row);
        if counts.get(&tuple).copied().unwrap_or(0) == 0 {
            let mut cells = Vec::new();
            for source in sources {
                cells.extend(expr_cells(schema, source, row, source_len));
            }
            cells.sort();
            cells.dedup();
            failures.push(Failure {
                kind: FailureKind::Lookup,
                handle: handle.clone(),
                row: Some(row),
                cells,
            });
            if failures.len() >= config.failure_limit {
                break;
            }
        }
    }
    failures
}

fn register_row_cells<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    registers: &[RegisterId],
    rows: &[usize],
) -> Vec<CellRef> {
    let mut cells = Vec::new();
    for &reg in registers {
        for &limb in &schema.register(reg).limbs {
            for &row in rows {
                cells.push(CellRef {
                    module: schema.column(limb).module,
                    column: limb,
                    row,
                });
            }
        }
    }
    cells.sort();
    cells.dedup();
    cells
}

fn eval_permutation<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    trace: &Trace<F>,
    handle: &Handle,
    sources: &[RegisterId],
    targets: &[RegisterId],
    limit: usize,
) -> Vec<Failure> {
    let map = schema.registers();
    let source_len = trace.column(map[sources[0]].limbs[0]).len();
    let target_len = trace.column(map[targets[0]].limbs[0]).len();

    let tuple_at = |regs: &[RegisterId], row: usize| -> Vec<F> {
        regs.iter().map(|&r| trace.read_register(map, r, row)).collect()
    };

    let mut net: HashMap<Vec<F>, i64> = HashMap::new();
    for row in 0..source_len {
        *net.entry(tuple_at(sources, row)).or_insert(0) += 1;
    }
    for row in 0..target_len {
        *net.entry(tuple_at(targets, row)).or_insert(0) -= 1;
    }
    if net.values().all(|&count| count == 0) {
        return Vec::new();
    }

    // Blame the source rows whose tuples are over-represented; when the
    // imbalance sits entirely on the target side there is no source row to
    // point at.
    let mut failures = Vec::new();
    for row in 0..source_len {
        let tuple = tuple_at(sources, row);
        if let Some(count) = net.get_mut(&tuple) {
            if *count > 0 {
                *count -= 1;
                failures.push(Failure {
                    kind: FailureKind::Permutation,
                    handle: handle.clone(),
                    row: Some(row),
                    cells: register_row_cells(schema, sources, &[row]),
                });
                if failures.len() >= limit {
                    return failures;
                }
            }
        }
    }
    if failures.is_empty() {
        failures.push(Failure {
            kind: FailureKind::Permutation,
            handle: handle.clone(),
            row: None,
            cells: Vec::new(),
        });
    }
    failures
}

fn eval_interleaving<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    trace: &Trace<F>,
    handle: &Handle,
    target: RegisterId,
    sources: &[RegisterId],
    limit: usize,
) -> Vec<Failure> {
    let map = schema.registers();
    let n = sources.len();
    let len = trace.column(map[target].limbs[0]).len();
    let mut failures = Vec::new();
    for row in 0..len {
        let expected = trace.read_register(map, sources[row % n], row / n);
        let actual = trace.read_register(map, target, row);
        if expected != actual {
            let mut cells = register_row_cells(schema, &[target], &[row]);
            cells.extend(register_row_cells(schema, &[sources[row % n]], &[row / n]));
            cells.sort();
            cells.dedup();
            failures.push(Failure {
                kind: FailureKind::Interleaving,
                handle: handle.clone(),
                row: Some(row),
                cells,
            });
            if failures.len() >= limit {
                break;
            }
        }
    }
    failures
}

fn eval_sorted<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    trace: &Trace<F>,
    handle: &Handle,
    registers: &[RegisterId],
    signs: &[bool],
    limit: usize,
) -> Vec<Failure> {
    let map = schema.registers();
    let len = trace.column(map[registers[0]].limbs[0]).len();
    let mut failures = Vec::new();
    for row in 1..len {
        let mut violation = false;
        for (&reg, &ascending) in registers.iter().zip(signs) {
            let prev = trace.read_register(map, reg, row - 1);
            let next = trace.read_register(map, reg, row);
            let ord = prev.cmp(&next);
            let ord = if ascending { ord } else { ord.reverse() };
            match ord {
                std::cmp::Ordering::Less => break,
                std::cmp::Ordering::Greater => {
                    violation = true;
                    break;
                }
                std::cmp::Ordering::Equal => continue,
            }
        }
        if violation {
            failures.push(Failure {
                kind: FailureKind::Sorted,
                handle: handle.clone(),
                row: Some(row - 1),
                cells: register_row_cells(schema, registers, &[row - 1, row]),
            });
            if failures.len() >= limit {
                break;
            }
        }
    }
    failures
}
