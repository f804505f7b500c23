use cinch_field::types::Field;
use num::bigint::BigUint;
use num::One;
use serde::{Deserialize, Serialize};

use crate::column::FieldColumn;
use crate::errors::{Error, Result};
use crate::ir::Expression;
use crate::schema::{ColumnId, ModuleId, RegisterId, RegisterMap, Schema};

/// How a module's row space was sized by the builder.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSizing {
    /// Total rows, padding included.
    pub height: usize,
    /// Rows carrying raw input values, before padding.
    pub used: usize,
    /// Padding rows prepended.
    pub left: usize,
    /// Padding rows appended.
    pub right: usize,
}

impl ModuleSizing {
    pub fn empty() -> Self {
        Self {
            height: 0,
            used: 0,
            left: 0,
            right: 0,
        }
    }
}

/// A concrete assignment of values to every column of a schema.
///
/// Built by the trace builder, mutated only during expansion, shared
/// immutably afterwards. Columns are aligned with the schema's concrete
/// columns; register-level reads and writes go through the schema's register
/// map, recombining and decomposing limbs as needed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Trace<F: Field> {
    columns: Vec<FieldColumn<F>>,
    sizing: Vec<ModuleSizing>,
}

impl<F: Field> Trace<F> {
    pub(crate) fn new(columns: Vec<FieldColumn<F>>, sizing: Vec<ModuleSizing>) -> Self {
        Self { columns, sizing }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn column(&self, id: ColumnId) -> &FieldColumn<F> {
        &self.columns[id.0]
    }

    pub(crate) fn column_mut(&mut self, id: ColumnId) -> &mut FieldColumn<F> {
        &mut self.columns[id.0]
    }

    pub fn columns(&self) -> &[FieldColumn<F>] {
        &self.columns
    }

    pub fn module_sizing(&self, module: ModuleId) -> &ModuleSizing {
        &self.sizing[module.0]
    }

    /// Total rows of a module, padding included.
    pub fn height(&self, module: ModuleId) -> usize {
        self.sizing[module.0].height
    }

    /// Approximate in-memory size of the column payloads, for diagnostics.
    pub fn byte_footprint(&self) -> usize {
        self.columns.iter().map(|c| c.byte_footprint()).sum()
    }

    /// The conceptual value of a register at `row`, recombining limbs for
    /// split registers.
    pub fn read_register(&self, map: &RegisterMap<F>, id: RegisterId, row: usize) -> F {
        let reg = &map[id];
        if !reg.is_split() {
            return self.column(reg.limbs[0]).value(row);
        }
        let mut value = F::ZERO;
        for (i, &limb) in reg.limbs.iter().enumerate() {
            let weight = F::TWO.exp_u64((i * reg.limb_width) as u64);
            value = value.multiply_accumulate(weight, self.column(limb).value(row));
        }
        value
    }

    /// All conceptual values of a register.
    pub fn register_values(&self, map: &RegisterMap<F>, id: RegisterId) -> Vec<F> {
        let len = self.column(map[id].limbs[0]).len();
        (0..len).map(|row| self.read_register(map, id, row)).collect()
    }

    /// Writes one conceptual register value, decomposing into limbs. Fails
    /// with [`Error::Overflow`] when the value does not fit the register's
    /// declared width.
    pub(crate) fn write_register(
        &mut self,
        map: &RegisterMap<F>,
        id: RegisterId,
        row: usize,
        value: F,
    ) -> Result<()> {
        let reg = &map[id];
        if value.bits() > reg.width {
            return Err(Error::Overflow {
                column: self.column(reg.limbs[0]).name().to_string(),
                row,
                value: value.to_string(),
                width: reg.width,
            });
        }
        if !reg.is_split() {
            self.column_mut(reg.limbs[0]).set_unchecked(row, value);
            return Ok(());
        }
        for (limb_value, &limb) in decompose(value, reg.limb_width, reg.limbs.len())
            .into_iter()
            .zip(&reg.limbs)
        {
            self.column_mut(limb).set_unchecked(row, limb_value);
        }
        Ok(())
    }

    /// Replaces a register's whole column with `values`, decomposing into
    /// limbs. The engine's bulk write path during expansion.
    pub(crate) fn write_register_column(
        &mut self,
        map: &RegisterMap<F>,
        id: RegisterId,
        values: Vec<F>,
    ) -> Result<()> {
        let reg = &map[id];
        for (row, value) in values.iter().enumerate() {
            if value.bits() > reg.width {
                return Err(Error::Overflow {
                    column: self.column(reg.limbs[0]).name().to_string(),
                    row,
                    value: value.to_string(),
                    width: reg.width,
                });
            }
        }
        if !reg.is_split() {
            self.column_mut(reg.limbs[0]).replace_values(values);
            return Ok(());
        }
        let num_limbs = reg.limbs.len();
        let mut per_limb = vec![Vec::with_capacity(values.len()); num_limbs];
        for value in values {
            for (i, limb_value) in decompose(value, reg.limb_width, num_limbs)
                .into_iter()
                .enumerate()
            {
                per_limb[i].push(limb_value);
            }
        }
        let limbs = reg.limbs.clone();
        for (&limb, limb_values) in limbs.iter().zip(per_limb) {
            self.column_mut(limb).replace_values(limb_values);
        }
        Ok(())
    }

    /// A copy of this trace with each module's padding rows removed.
    pub fn trim<E: Expression<F>>(&self, schema: &Schema<F, E>) -> Trace<F> {
        let columns = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let decl = schema.column(ColumnId(i));
                let sizing = &self.sizing[decl.module.0];
                let m = decl.multiplier;
                col.slice(sizing.left * m, (sizing.height - sizing.right) * m)
            })
            .collect();
        let sizing = self
            .sizing
            .iter()
            .map(|s| ModuleSizing {
                height: s.height - s.left - s.right,
                used: s.used,
                left: 0,
                right: 0,
            })
            .collect();
        Trace::new(columns, sizing)
    }
}

/// Little-endian limbs of `value`, `count` limbs of `limb_width` bits each.
/// The value is assumed to fit `count * limb_width` bits.
pub(crate) fn decompose<F: Field>(value: F, limb_width: usize, count: usize) -> Vec<F> {
    if let Some(v) = value.try_to_canonical_u64() {
        if limb_width < 64 {
            let mask = (1u64 << limb_width) - 1;
            return (0..count)
                .map(|i| {
                    let shifted = v.checked_shr((i * limb_width) as u32).unwrap_or(0);
                    F::from_canonical_u64(shifted & mask)
                })
                .collect();
        }
    }
    let n = value.to_canonical_biguint();
    let mask = (BigUint::one() << limb_width) - BigUint::one();
    (0..count)
        .map(|i| F::from_noncanonical_biguint((&n >> (i * limb_width)) & &mask))
        .collect()
}

/// Per-module shape of a trace, for the summarizing surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub modules: Vec<ModuleSummary>,
    pub columns: usize,
    pub bytes: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub name: String,
    pub height: usize,
    pub used: usize,
    pub columns: usize,
}

impl std::fmt::Display for TraceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} columns, {} bytes", self.columns, self.bytes)?;
        for module in &self.modules {
            writeln!(
                f,
                "module {}: height {} ({} used), {} columns",
                module.name, module.height, module.used, module.columns
            )?;
        }
        Ok(())
    }
}

impl<F: Field> Trace<F> {
    /// Shape and size of this trace against its schema.
    pub fn summarize<E: Expression<F>>(&self, schema: &Schema<F, E>) -> TraceSummary {
        let modules = schema
            .modules()
            .iter()
            .map(|module| {
                let sizing = &self.sizing[module.id.0];
                ModuleSummary {
                    name: module.name.clone(),
                    height: sizing.height,
                    used: sizing.used,
                    columns: schema
                        .columns()
                        .filter(|c| c.module == module.id)
                        .count(),
                }
            })
            .collect();
        TraceSummary {
            modules,
            columns: self.columns.len(),
            bytes: self.byte_footprint(),
        }
    }
}

/// One raw input column, as a decoder hands it over.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawColumn<F> {
    pub module: String,
    pub column: String,
    pub values: Vec<F>,
}

/// Raw input columns keyed by qualified name, the input of the trace
/// builder.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTrace<F> {
    pub columns: Vec<RawColumn<F>>,
}

impl<F> RawTrace<F> {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    pub fn push(
        &mut self,
        module: impl Into<String>,
        column: impl Into<String>,
        values: Vec<F>,
    ) -> &mut Self {
        self.columns.push(RawColumn {
            module: module.into(),
            column: column.into(),
            values,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use cinch_field::fermat::FermatField;

    use super::*;

    type F = FermatField;

    fn f(n: u64) -> F {
        F::from_canonical_u64(n)
    }

    #[test]
    fn summary_reports_shapes() {
        use crate::testing::{build, counter_schema, raw};
        let (schema, ..) = counter_schema();
        let trace = build(&schema, raw(&[("m", "x", &[1, 2, 3])]));
        let summary = trace.summarize(&schema);
        assert_eq!(summary.columns, 1);
        assert_eq!(summary.modules.len(), 1);
        assert_eq!(summary.modules[0].name, "m");
        assert_eq!(summary.modules[0].height, 4);
        assert_eq!(summary.modules[0].used, 3);
        assert_eq!(summary.bytes, 4);
        assert!(summary.to_string().contains("module m: height 4 (3 used)"));
    }

    #[test]
    fn decompose_little_endian() {
        assert_eq!(decompose(f(0x1234), 8, 2), vec![f(0x34), f(0x12)]);
        assert_eq!(decompose(f(5), 4, 3), vec![f(5), f(0), f(0)]);
        // The widest canonical value of the test field: 2^16 spans into the
        // second 16-bit limb.
        assert_eq!(decompose(f(0x10000), 16, 2), vec![f(0), f(1)]);
    }
}
