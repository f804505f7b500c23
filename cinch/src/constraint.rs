use std::fmt;

use cinch_field::types::Field;
use serde::{Deserialize, Serialize};

use crate::ir::Expression;
use crate::report::FailureKind;
use crate::schema::{Handle, ModuleId, RegisterId};

/// The rows of a module a vanishing-style constraint applies to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Domain {
    /// Every row.
    All,
    /// The first row only.
    First,
    /// The last row only.
    Last,
    /// Every row but the last, where `column@1` still reads forward.
    Transition,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Domain::All => "all",
            Domain::First => "first",
            Domain::Last => "last",
            Domain::Transition => "transition",
        };
        f.write_str(name)
    }
}

impl Domain {
    /// The half-open row range this domain selects out of `len` rows.
    pub fn row_range(&self, len: usize) -> (usize, usize) {
        match self {
            Domain::All => (0, len),
            Domain::First => (0, len.min(1)),
            Domain::Last => (len.saturating_sub(1), len),
            Domain::Transition => (0, len.saturating_sub(1)),
        }
    }
}

/// A declarative predicate over a trace, generic over the expression layer.
///
/// Expression-valued kinds (vanishing, lookup, range, assertion) address
/// concrete columns; structural kinds (permutation, interleaving, sorted)
/// address registers, so they survive concretization untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum Constraint<F: Field, E: Expression<F>> {
    /// `expr` must vanish on every selected row. An optional `guard`
    /// restricts the domain to rows where the guard is nonzero.
    Vanishing {
        handle: Handle,
        module: ModuleId,
        domain: Domain,
        guard: Option<E>,
        expr: E,
    },

    /// Every source tuple, over all rows of the source module, must appear
    /// among the target tuples at least as often.
    Lookup {
        handle: Handle,
        source_module: ModuleId,
        target_module: ModuleId,
        sources: Vec<E>,
        targets: Vec<E>,
    },

    /// `expr` must evaluate into `[0, bound)` on every row.
    Range {
        handle: Handle,
        module: ModuleId,
        expr: E,
        bound: F,
    },

    /// The source and target column groups hold equal multisets of row
    /// tuples.
    Permutation {
        handle: Handle,
        sources: Vec<RegisterId>,
        targets: Vec<RegisterId>,
    },

    /// `target` is the round-robin interleaving of `sources`.
    Interleaving {
        handle: Handle,
        target: RegisterId,
        sources: Vec<RegisterId>,
    },

    /// Adjacent rows respect a lexicographic ordering with per-column
    /// direction (`true` = ascending).
    Sorted {
        handle: Handle,
        registers: Vec<RegisterId>,
        signs: Vec<bool>,
    },

    /// Evaluates like `Vanishing` but only ever produces debug failures;
    /// acceptance does not depend on it.
    Assertion {
        handle: Handle,
        module: ModuleId,
        domain: Domain,
        guard: Option<E>,
        expr: E,
    },
}

impl<F: Field, E: Expression<F>> Constraint<F, E> {
    pub fn handle(&self) -> &Handle {
        match self {
            Constraint::Vanishing { handle, .. }
            | Constraint::Lookup { handle, .. }
            | Constraint::Range { handle, .. }
            | Constraint::Permutation { handle, .. }
            | Constraint::Interleaving { handle, .. }
            | Constraint::Sorted { handle, .. }
            | Constraint::Assertion { handle, .. } => handle,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Constraint::Vanishing { .. } => FailureKind::Vanishing,
            Constraint::Lookup { .. } => FailureKind::Lookup,
            Constraint::Range { .. } => FailureKind::Range,
            Constraint::Permutation { .. } => FailureKind::Permutation,
            Constraint::Interleaving { .. } => FailureKind::Interleaving,
            Constraint::Sorted { .. } => FailureKind::Sorted,
            Constraint::Assertion { .. } => FailureKind::Assertion,
        }
    }

    /// The expressions this constraint evaluates, if any.
    pub fn exprs(&self) -> Vec<&E> {
        match self {
            Constraint::Vanishing { guard, expr, .. }
            | Constraint::Assertion { guard, expr, .. } => {
                let mut out = vec![expr];
                out.extend(guard.iter());
                out
            }
            Constraint::Lookup {
                sources, targets, ..
            } => sources.iter().chain(targets.iter()).collect(),
            Constraint::Range { expr, .. } => vec![expr],
            Constraint::Permutation { .. }
            | Constraint::Interleaving { .. }
            | Constraint::Sorted { .. } => Vec::new(),
        }
    }

    /// The registers structural kinds address, if any.
    pub fn structural_registers(&self) -> Vec<RegisterId> {
        match self {
            Constraint::Permutation {
                sources, targets, ..
            } => sources.iter().chain(targets.iter()).copied().collect(),
            Constraint::Interleaving {
                target, sources, ..
            } => std::iter::once(*target).chain(sources.iter().copied()).collect(),
            Constraint::Sorted { registers, .. } => registers.clone(),
            _ => Vec::new(),
        }
    }

    /// One-line rendering of the constraint for schema dumps.
    pub fn render(&self, schema: &crate::schema::Schema<F, E>) -> String {
        let names = |column| schema.column_qualified_name(column);
        let group = |regs: &[RegisterId]| {
            regs.iter()
                .map(|&r| schema.qualified_name(r))
                .collect::<Vec<_>>()
                .join(" ")
        };
        match self {
            Constraint::Vanishing {
                handle,
                domain,
                guard,
                expr,
                ..
            } => match guard {
                Some(guard) => format!(
                    "vanish {handle} ({domain}) if {}: {}",
                    guard.render(&names),
                    expr.render(&names)
                ),
                None => format!("vanish {handle} ({domain}): {}", expr.render(&names)),
            },
            Constraint::Assertion {
                handle,
                domain,
                expr,
                ..
            } => format!("assert {handle} ({domain}): {}", expr.render(&names)),
            Constraint::Lookup {
                handle,
                sources,
                targets,
                ..
            } => format!(
                "lookup {handle}: ({}) in ({})",
                sources
                    .iter()
                    .map(|e| e.render(&names))
                    .collect::<Vec<_>>()
                    .join(" "),
                targets
                    .iter()
                    .map(|e| e.render(&names))
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
            Constraint::Range { handle, expr, bound, .. } => {
                format!("range {handle}: {} < {bound}", expr.render(&names))
            }
            Constraint::Permutation {
                handle,
                sources,
                targets,
            } => format!(
                "permute {handle}: ({}) of ({})",
                group(targets),
                group(sources)
            ),
            Constraint::Interleaving {
                handle,
                target,
                sources,
            } => format!(
                "interleave {handle}: {} from ({})",
                schema.qualified_name(*target),
                group(sources)
            ),
            Constraint::Sorted {
                handle,
                registers,
                signs,
            } => format!(
                "sorted {handle}: ({})",
                registers
                    .iter()
                    .zip(signs)
                    .map(|(&r, &asc)| {
                        let sign = if asc { '+' } else { '-' };
                        format!("{sign}{}", schema.qualified_name(r))
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
        }
    }

    /// The total degree of the constraint's polynomial obligation, guard
    /// included. Zero for structural kinds.
    pub fn degree(&self) -> usize {
        match self {
            Constraint::Vanishing { guard, expr, .. }
            | Constraint::Assertion { guard, expr, .. } => {
                expr.degree() + guard.as_ref().map(|g| g.degree()).unwrap_or(0)
            }
            Constraint::Lookup {
                sources, targets, ..
            } => sources
                .iter()
                .chain(targets.iter())
                .map(|e| e.degree())
                .max()
                .unwrap_or(0),
            Constraint::Range { expr, .. } => expr.degree(),
            Constraint::Permutation { .. }
            | Constraint::Interleaving { .. }
            | Constraint::Sorted { .. } => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_row_ranges() {
        assert_eq!(Domain::All.row_range(4), (0, 4));
        assert_eq!(Domain::First.row_range(4), (0, 1));
        assert_eq!(Domain::Last.row_range(4), (3, 4));
        assert_eq!(Domain::Transition.row_range(4), (0, 3));
        assert_eq!(Domain::Transition.row_range(0), (0, 0));
        assert_eq!(Domain::First.row_range(0), (0, 0));
    }
}
