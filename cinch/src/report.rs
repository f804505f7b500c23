use std::fmt;

use cinch_field::types::Field;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::constraint::Constraint;
use crate::ir::Expression;
use crate::schema::{ColumnId, Handle, ModuleId, Schema};
use crate::trace::Trace;

/// Which constraint kind a failure came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    Vanishing,
    Lookup,
    Range,
    Permutation,
    Interleaving,
    Sorted,
    Assertion,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Vanishing => "vanishing",
            FailureKind::Lookup => "lookup",
            FailureKind::Range => "range",
            FailureKind::Permutation => "permutation",
            FailureKind::Interleaving => "interleaving",
            FailureKind::Sorted => "sorted",
            FailureKind::Assertion => "assertion",
        };
        f.write_str(name)
    }
}

/// A cell of the trace, by value: module, concrete column, row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellRef {
    pub module: ModuleId,
    pub column: ColumnId,
    pub row: usize,
}

/// One deduplicated constraint failure with its cell provenance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub handle: Handle,
    /// The offending row, when the kind localizes to one.
    pub row: Option<usize>,
    /// The cells the failing check read, shifted to the failing row.
    pub cells: Vec<CellRef>,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(row) => write!(
                f,
                "{} constraint {} failed at row {row}",
                self.kind, self.handle
            ),
            None => write!(f, "{} constraint {} failed", self.kind, self.handle),
        }
    }
}

/// The cells an expression reads when evaluated at `row` over `len` rows,
/// shifts applied cyclically. Sorted and deduplicated.
pub fn expr_cells<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    expr: &E,
    row: usize,
    len: usize,
) -> Vec<CellRef> {
    let mut cells = Vec::new();
    expr.for_each_access(&mut |column, shift| {
        let at = (row as isize + shift).rem_euclid(len as isize) as usize;
        cells.push(CellRef {
            module: schema.column(column).module,
            column,
            row: at,
        });
    });
    cells.sort();
    cells.dedup();
    cells
}

/// The cells a constraint reads at `row`: the union over its expressions,
/// or whole register rows for structural kinds.
pub fn required_cells<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    trace: &Trace<F>,
    constraint: &Constraint<F, E>,
    row: usize,
) -> Vec<CellRef> {
    let mut cells = Vec::new();
    for expr in constraint.exprs() {
        let len = expr_len(schema, trace, expr, constraint);
        cells.extend(expr_cells(schema, expr, row, len));
    }
    for reg in constraint.structural_registers() {
        for &limb in &schema.register(reg).limbs {
            cells.push(CellRef {
                module: schema.column(limb).module,
                column: limb,
                row,
            });
        }
    }
    cells.sort();
    cells.dedup();
    cells
}

fn expr_len<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    trace: &Trace<F>,
    expr: &E,
    constraint: &Constraint<F, E>,
) -> usize {
    expr.accesses()
        .first()
        .map(|&(column, _)| trace.column(column).len())
        .unwrap_or_else(|| {
            let module = match constraint {
                Constraint::Lookup { source_module, .. } => *source_module,
                Constraint::Vanishing { module, .. }
                | Constraint::Assertion { module, .. }
                | Constraint::Range { module, .. } => *module,
                _ => ModuleId(0),
            };
            trace.height(module)
        })
        .max(1)
}

/// A row-bounded, column-subset view of the trace around a failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ReportWindow<F: Field> {
    pub module: ModuleId,
    /// Half-open row range of the window.
    pub rows: (usize, usize),
    pub columns: Vec<(ColumnId, Vec<F>)>,
}

/// Builds the minimal explanatory view of a failure: for each implicated
/// module, the smallest row window covering the failure's cells (grown by
/// `margin` rows each way) over exactly the implicated columns.
pub fn windows<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    trace: &Trace<F>,
    failure: &Failure,
    margin: usize,
) -> Vec<ReportWindow<F>> {
    failure
        .cells
        .iter()
        .map(|cell| cell.module)
        .unique()
        .sorted()
        .map(|module| {
            let cells = failure
                .cells
                .iter()
                .filter(|c| c.module == module)
                .collect_vec();
            let first = cells.iter().map(|c| c.row).min().unwrap_or(0);
            let last = cells.iter().map(|c| c.row).max().unwrap_or(0);
            let columns = cells
                .iter()
                .map(|c| c.column)
                .unique()
                .sorted()
                .collect_vec();
            let start = first.saturating_sub(margin);
            let columns = columns
                .into_iter()
                .map(|column| {
                    let col = trace.column(column);
                    let end = (last + margin + 1).min(col.len());
                    (column, col.slice(start.min(col.len()), end).values().to_vec())
                })
                .collect_vec();
            let end = columns
                .iter()
                .map(|(_, values)| start + values.len())
                .max()
                .unwrap_or(start);
            ReportWindow {
                module,
                rows: (start, end),
                columns,
            }
        })
        .collect()
}

/// Renders a failure and its windows as an aligned table, implicated cells
/// marked with `*`. Plain text; terminal frontends colorize on top.
pub fn render<F: Field, E: Expression<F>>(
    schema: &Schema<F, E>,
    trace: &Trace<F>,
    failure: &Failure,
    margin: usize,
) -> String {
    use std::fmt::Write;

    let mut out = format!("{failure}\n");
    for window in windows(schema, trace, failure, margin) {
        let module = schema.module(window.module);
        let (start, end) = window.rows;
        writeln!(out, "module {}, rows {start}..{end}", module.name).unwrap();

        let headers: Vec<String> = window
            .columns
            .iter()
            .map(|&(column, _)| schema.column(column).name.clone())
            .collect();
        let mut cells: Vec<Vec<String>> = Vec::new();
        for (offset, row) in (start..end).enumerate() {
            let mut line = vec![row.to_string()];
            for (column, values) in &window.columns {
                let marked = failure
                    .cells
                    .iter()
                    .any(|c| c.column == *column && c.row == row);
                let value = values
                    .get(offset)
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                line.push(if marked { format!("*{value}") } else { value });
            }
            cells.push(line);
        }

        let mut widths: Vec<usize> = std::iter::once("row".len())
            .chain(headers.iter().map(|h| h.len()))
            .collect();
        for line in &cells {
            for (i, cell) in line.iter().enumerate() {
                widths[i] = widths[i].max(cell.len());
            }
        }
        let header_line: Vec<String> = std::iter::once("row".to_string())
            .chain(headers)
            .enumerate()
            .map(|(i, h)| format!("{h:>width$}", width = widths[i]))
            .collect();
        writeln!(out, "  {}", header_line.join("  ")).unwrap();
        for line in cells {
            let rendered: Vec<String> = line
                .into_iter()
                .enumerate()
                .map(|(i, cell)| format!("{cell:>width$}", width = widths[i]))
                .collect();
            writeln!(out, "  {}", rendered.join("  ")).unwrap();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use crate::testing::{build, counter_schema, evaluate, raw};

    use super::*;

    #[test]
    fn rendered_window_marks_implicated_cells() {
        let (schema, ..) = counter_schema();
        let trace = build(&schema, raw(&[("m", "x", &[1, 2, 4, 4])]));
        let evaluation = evaluate(&schema, &trace);
        let failure = &evaluation.failures()[0];
        let rendered = render(&schema, &trace, failure, 1);
        assert!(rendered.starts_with("vanishing constraint inc failed at row 1"));
        assert!(rendered.contains("module m"));
        // Rows 1 and 2 are the cells x' - x - 1 reads at row 1.
        assert!(rendered.contains("*2"));
        assert!(rendered.contains("*4"));
    }

    #[test]
    fn windows_cover_failure_cells() {
        let (schema, ..) = counter_schema();
        let trace = build(&schema, raw(&[("m", "x", &[1, 2, 4, 4])]));
        let evaluation = evaluate(&schema, &trace);
        let failure = &evaluation.failures()[0];
        let windows = windows(&schema, &trace, failure, 0);
        assert_eq!(windows.len(), 1);
        let (start, end) = windows[0].rows;
        for cell in &failure.cells {
            assert!((start..end).contains(&cell.row));
        }
    }

    #[test]
    fn failure_display() {
        let failure = Failure {
            kind: FailureKind::Vanishing,
            handle: Handle::new("inc"),
            row: Some(3),
            cells: Vec::new(),
        };
        assert_eq!(failure.to_string(), "vanishing constraint inc failed at row 3");
    }
}
