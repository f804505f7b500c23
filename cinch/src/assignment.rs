use cinch_field::types::Field;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::ir::Expression;
use crate::schema::{Handle, RegisterId, RegisterMap};

/// A computed-column specification: how to produce one or more registers'
/// values from registers assigned earlier.
///
/// Assignments address registers, not concrete columns, so a schema can be
/// expanded identically before and after concretization; the trace engine
/// recombines and decomposes limbs at the register boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Assignment<E> {
    /// Little-endian fixed-width decomposition of `source` into `parts`.
    /// Byte decomposition is the `part_width == 8` case.
    Decomposition {
        handle: Handle,
        source: RegisterId,
        parts: Vec<RegisterId>,
        part_width: usize,
    },

    /// Round-robin interleaving: row `i` of `target` is row `i / n` of
    /// `sources[i % n]`.
    Interleaving {
        handle: Handle,
        target: RegisterId,
        sources: Vec<RegisterId>,
    },

    /// Stable sort of the source rows under a lexicographic order over the
    /// `keys` (indices into `sources`) with per-key direction, written to
    /// `targets`. `inactive`, when present, flags rows whose pre-image was a
    /// padding row.
    SortedPermutation {
        handle: Handle,
        sources: Vec<RegisterId>,
        targets: Vec<RegisterId>,
        keys: Vec<usize>,
        signs: Vec<bool>,
        inactive: Option<RegisterId>,
    },

    /// Helper columns for the sorted constraint: `delta` carries the
    /// magnitude of the first differing column between adjacent rows, and
    /// `selectors[j]` pinpoints that column.
    LexicographicHelpers {
        handle: Handle,
        registers: Vec<RegisterId>,
        signs: Vec<bool>,
        delta: RegisterId,
        selectors: Vec<RegisterId>,
    },

    /// One expression per target register, evaluated once per row.
    Computation {
        handle: Handle,
        targets: Vec<RegisterId>,
        exprs: Vec<E>,
    },

    /// `target[i] = expr(i)^-1` where the value is nonzero, zero elsewhere.
    /// Introduced by the normalize lowering.
    Inverse {
        handle: Handle,
        target: RegisterId,
        expr: E,
    },
}

impl<E> Assignment<E> {
    pub fn handle(&self) -> &Handle {
        match self {
            Assignment::Decomposition { handle, .. }
            | Assignment::Interleaving { handle, .. }
            | Assignment::SortedPermutation { handle, .. }
            | Assignment::LexicographicHelpers { handle, .. }
            | Assignment::Computation { handle, .. }
            | Assignment::Inverse { handle, .. } => handle,
        }
    }

    /// The registers this assignment reads.
    pub fn reads<F: Field>(&self, map: &RegisterMap<F>) -> Vec<RegisterId>
    where
        E: Expression<F>,
    {
        let mut out = match self {
            Assignment::Decomposition { source, .. } => vec![*source],
            Assignment::Interleaving { sources, .. } => sources.clone(),
            Assignment::SortedPermutation { sources, .. } => sources.clone(),
            Assignment::LexicographicHelpers { registers, .. } => registers.clone(),
            Assignment::Computation { exprs, .. } => exprs
                .iter()
                .flat_map(|e| e.accesses())
                .map(|(column, _)| map.column_register(column))
                .collect(),
            Assignment::Inverse { expr, .. } => expr
                .accesses()
                .into_iter()
                .map(|(column, _)| map.column_register(column))
                .collect(),
        };
        out.sort();
        out.dedup();
        out
    }

    /// One-line rendering of the assignment for schema dumps.
    pub fn render<F: Field>(&self, schema: &crate::schema::Schema<F, E>) -> String
    where
        E: Expression<F>,
    {
        let names = |column| schema.column_qualified_name(column);
        let group = |regs: &[RegisterId]| {
            regs.iter()
                .map(|&r| schema.qualified_name(r))
                .collect::<Vec<_>>()
                .join(" ")
        };
        match self {
            Assignment::Decomposition {
                handle,
                source,
                parts,
                part_width,
            } => format!(
                "decompose {handle}: {} into {part_width}-bit ({})",
                schema.qualified_name(*source),
                group(parts)
            ),
            Assignment::Interleaving {
                handle,
                target,
                sources,
            } => format!(
                "interleave {handle}: {} from ({})",
                schema.qualified_name(*target),
                group(sources)
            ),
            Assignment::SortedPermutation {
                handle,
                sources,
                targets,
                keys,
                signs,
                ..
            } => format!(
                "sort {handle}: ({}) into ({}) by ({})",
                group(sources),
                group(targets),
                keys.iter()
                    .zip(signs)
                    .map(|(&k, &asc)| {
                        let sign = if asc { '+' } else { '-' };
                        format!("{sign}{}", schema.qualified_name(sources[k]))
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
            Assignment::LexicographicHelpers {
                handle, registers, ..
            } => format!("lex-helpers {handle}: over ({})", group(registers)),
            Assignment::Computation {
                handle,
                targets,
                exprs,
            } => format!(
                "compute {handle}: {}",
                targets
                    .iter()
                    .zip(exprs)
                    .map(|(&t, e)| format!("{} = {}", schema.qualified_name(t), e.render(&names)))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Assignment::Inverse {
                handle,
                target,
                expr,
            } => format!(
                "inverse {handle}: {} = 1/{}",
                schema.qualified_name(*target),
                expr.render(&names)
            ),
        }
    }

    /// The registers this assignment writes.
    pub fn writes(&self) -> Vec<RegisterId> {
        match self {
            Assignment::Decomposition { parts, .. } => parts.clone(),
            Assignment::Interleaving { target, .. } => vec![*target],
            Assignment::SortedPermutation {
                targets, inactive, ..
            } => targets
                .iter()
                .copied()
                .chain(inactive.iter().copied())
                .collect(),
            Assignment::LexicographicHelpers {
                delta, selectors, ..
            } => std::iter::once(*delta)
                .chain(selectors.iter().copied())
                .collect_vec(),
            Assignment::Computation { targets, .. } => targets.clone(),
            Assignment::Inverse { target, .. } => vec![*target],
        }
    }
}
