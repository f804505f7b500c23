//! Turning raw input columns into a padded, expanded, validated trace.

use cinch_field::types::Field;
use cinch_util::{ceil_div_usize, next_power_of_two};
use hashbrown::HashMap;
use log::{debug, warn};
use rayon::prelude::*;

use crate::column::FieldColumn;
use crate::errors::{Error, Result, Warning};
use crate::expansion;
use crate::ir::Expression;
use crate::schema::{RegisterId, Schema};
use crate::trace::{ModuleSizing, RawTrace, Trace};
use crate::util::CancelToken;

/// Knobs of the trace builder.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BuildConfig {
    /// Padding rows prepended to every module.
    pub left_padding: usize,
    /// Padding rows appended to every module.
    pub right_padding: usize,
    /// Grow padding by each module's inferred spillage, so that no shifted
    /// access reads an unpadded row.
    pub defensive: bool,
    /// Run expansion and validation on the thread pool.
    pub parallel: bool,
    /// Rows per validation batch between cancellation checks.
    pub batch_size: usize,
    /// Re-check every column against its declared width after expansion.
    pub validate: bool,
    /// Run the assignment DAG.
    pub expand: bool,
    /// Promote binding warnings to errors.
    pub strict: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            left_padding: 0,
            right_padding: 0,
            defensive: true,
            parallel: true,
            batch_size: 1 << 12,
            validate: true,
            expand: true,
            strict: false,
        }
    }
}

impl BuildConfig {
    /// Single-threaded variant, for deterministic debugging sessions.
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }
}

/// Builds traces for one schema. Phases run strictly in order: bind, size,
/// pad, expand, validate; a fatal failure in any phase discards the partial
/// trace.
pub struct TraceBuilder<'a, F: Field, E: Expression<F>> {
    schema: &'a Schema<F, E>,
    config: BuildConfig,
}

impl<'a, F: Field, E: Expression<F>> TraceBuilder<'a, F, E> {
    pub fn new(schema: &'a Schema<F, E>) -> Self {
        Self::with_config(schema, BuildConfig::default())
    }

    pub fn with_config(schema: &'a Schema<F, E>, config: BuildConfig) -> Self {
        Self { schema, config }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Runs all phases over `raw`, returning the finalized trace and the
    /// non-fatal warnings accumulated while binding.
    pub fn build(&self, raw: RawTrace<F>, cancel: &CancelToken) -> Result<(Trace<F>, Vec<Warning>)> {
        cancel.check()?;
        let (bound, warnings) = self.bind(raw)?;
        cancel.check()?;
        let sizing = self.size(&bound);
        debug!(
            "sized {} modules: {:?}",
            sizing.len(),
            sizing.iter().map(|s| s.height).collect::<Vec<_>>()
        );
        cancel.check()?;
        let mut trace = self.pad(bound, sizing)?;
        if self.config.expand {
            expansion::expand_trace(self.schema, &mut trace, self.config.parallel, cancel)?;
        }
        cancel.check()?;
        if self.config.validate {
            self.validate(&trace, cancel)?;
        }
        Ok((trace, warnings))
    }

    /// Phase 1: match raw columns to declared input registers by qualified
    /// name and type-check every value.
    fn bind(&self, raw: RawTrace<F>) -> Result<(HashMap<RegisterId, Vec<F>>, Vec<Warning>)> {
        let mut by_name = HashMap::new();
        for reg in self.schema.input_registers() {
            by_name.insert(self.schema.qualified_name(reg.id), reg.id);
        }

        let mut bound: HashMap<RegisterId, Vec<F>> = HashMap::new();
        let mut warnings = Vec::new();
        for raw_column in raw.columns {
            let qualified = format!("{}.{}", raw_column.module, raw_column.column);
            let Some(&id) = by_name.get(&qualified) else {
                let warning = Warning::UnknownColumn(qualified);
                if self.config.strict {
                    return Err(warning.into_error());
                }
                warn!("{warning}");
                warnings.push(warning);
                continue;
            };
            if bound.contains_key(&id) {
                return Err(Error::ConflictingDefinition(format!("column {qualified}")));
            }
            let width = self.schema.register(id).width;
            for (row, value) in raw_column.values.iter().enumerate() {
                if value.bits() > width {
                    return Err(Error::Overflow {
                        column: qualified.clone(),
                        row,
                        value: value.to_string(),
                        width,
                    });
                }
            }
            bound.insert(id, raw_column.values);
        }

        for reg in self.schema.input_registers() {
            if !bound.contains_key(&reg.id) {
                return Err(Error::MissingColumn(self.schema.qualified_name(reg.id)));
            }
        }
        Ok((bound, warnings))
    }

    /// Phase 2: per module, the maximum input length rounded up to a power
    /// of two, plus padding and (defensively) spillage.
    fn size(&self, bound: &HashMap<RegisterId, Vec<F>>) -> Vec<ModuleSizing> {
        self.schema
            .modules()
            .iter()
            .map(|module| {
                let used = self
                    .schema
                    .input_registers()
                    .filter(|reg| reg.module == module.id)
                    .map(|reg| {
                        let len = bound.get(&reg.id).map(|v| v.len()).unwrap_or(0);
                        ceil_div_usize(len, reg.multiplier)
                    })
                    .max()
                    .unwrap_or(0);
                let (spill_left, spill_right) = match module.spillage {
                    Some(declared) => declared,
                    None if self.config.defensive => self.schema.required_padding(module.id),
                    None => (0, 0),
                };
                let left = self.config.left_padding + spill_left;
                let right = self.config.right_padding + spill_right;
                ModuleSizing {
                    height: next_power_of_two(used) + left + right,
                    used,
                    left,
                    right,
                }
            })
            .collect()
    }

    /// Phase 3: allocate every concrete column at its final length, with
    /// input values in place and padding rows holding the column's declared
    /// padding value (zero when none).
    fn pad(
        &self,
        mut bound: HashMap<RegisterId, Vec<F>>,
        sizing: Vec<ModuleSizing>,
    ) -> Result<Trace<F>> {
        let columns: Vec<FieldColumn<F>> = self
            .schema
            .columns()
            .map(|col| {
                let height = sizing[col.module.0].height;
                FieldColumn::zeroes(
                    self.schema.column_qualified_name(col.id),
                    col.width,
                    height * col.multiplier,
                )
            })
            .collect();
        let mut trace = Trace::new(columns, sizing);

        for reg in self.schema.registers().iter() {
            let module_sizing = *trace.module_sizing(reg.module);
            let len = module_sizing.height * reg.multiplier;
            if len == 0 {
                continue;
            }
            let pad = reg.padding_value.unwrap_or(F::ZERO);
            let values = bound.remove(&reg.id);
            let mut full = Vec::with_capacity(len);
            full.resize(module_sizing.left * reg.multiplier, pad);
            if let Some(values) = values {
                full.extend(values);
            }
            full.resize(len, pad);
            trace.write_register_column(self.schema.registers(), reg.id, full)?;
        }
        Ok(trace)
    }

    /// Phase 5: every value of every concrete column re-checked against the
    /// declared width, with a cell reference on failure.
    fn validate(&self, trace: &Trace<F>, cancel: &CancelToken) -> Result<()> {
        let batch = self.config.batch_size.max(1);
        let check = |column: &FieldColumn<F>| -> Result<()> {
            for (chunk_index, chunk) in column.values().chunks(batch).enumerate() {
                cancel.check()?;
                for (offset, value) in chunk.iter().enumerate() {
                    if value.bits() > column.width() {
                        return Err(Error::Overflow {
                            column: column.name().to_string(),
                            row: chunk_index * batch + offset,
                            value: value.to_string(),
                            width: column.width(),
                        });
                    }
                }
            }
            Ok(())
        };
        if self.config.parallel {
            trace.columns().par_iter().try_for_each(check)
        } else {
            trace.columns().iter().try_for_each(check)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::assignment::Assignment;
    use crate::schema::{ColumnKind, Handle, HirSchema};
    use crate::testing::{counter_schema, exact_config, f, raw, TestField};
    use crate::ir::{Expression, HirExpr};

    use super::*;

    type S = HirSchema<TestField>;

    fn build_with(
        schema: &S,
        config: BuildConfig,
        raw_trace: RawTrace<TestField>,
    ) -> Result<(Trace<TestField>, Vec<Warning>)> {
        TraceBuilder::with_config(schema, config).build(raw_trace, &CancelToken::new())
    }

    #[test]
    fn heights_round_up_to_powers_of_two() {
        let (schema, m, x) = counter_schema();
        let (trace, _) = build_with(&schema, exact_config(), raw(&[("m", "x", &[1, 2, 3])]))
            .unwrap();
        let sizing = *trace.module_sizing(m);
        assert_eq!(sizing.used, 3);
        assert_eq!(sizing.height, 4);
        // The rounding gap is filled with the padding value, zero here.
        assert_eq!(
            trace.register_values(schema.registers(), x),
            [1, 2, 3, 0].map(f).to_vec()
        );
    }

    #[test]
    fn unknown_columns_warn_then_fail_under_strict() {
        let (schema, ..) = counter_schema();
        let input = raw(&[("m", "x", &[1, 2, 3, 4]), ("m", "bogus", &[1])]);
        let (_, warnings) = build_with(&schema, exact_config(), input.clone()).unwrap();
        assert_eq!(
            warnings,
            vec![Warning::UnknownColumn("m.bogus".to_string())]
        );

        let strict = BuildConfig {
            strict: true,
            ..exact_config()
        };
        assert!(matches!(
            build_with(&schema, strict, input),
            Err(Error::UnknownColumn(name)) if name == "m.bogus"
        ));
    }

    #[test]
    fn missing_input_is_fatal() {
        let (schema, ..) = counter_schema();
        assert!(matches!(
            build_with(&schema, exact_config(), raw(&[])),
            Err(Error::MissingColumn(name)) if name == "m.x"
        ));
    }

    #[test]
    fn input_overflow_is_fatal() {
        let (schema, ..) = counter_schema();
        let err = build_with(&schema, exact_config(), raw(&[("m", "x", &[1, 300])]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Overflow { row: 1, width: 8, .. }
        ));
    }

    #[test]
    fn duplicate_raw_column_is_fatal() {
        let (schema, ..) = counter_schema();
        let input = raw(&[("m", "x", &[1, 2]), ("m", "x", &[3, 4])]);
        assert!(matches!(
            build_with(&schema, exact_config(), input),
            Err(Error::ConflictingDefinition(_))
        ));
    }

    #[test]
    fn declared_padding_value_fills_padding_rows() {
        let mut schema = S::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema
            .declare_column(m, "x", 8, ColumnKind::Input, 1, Some(f(7)))
            .unwrap();
        let config = BuildConfig {
            left_padding: 2,
            right_padding: 1,
            defensive: false,
            ..BuildConfig::default()
        };
        let (trace, _) = build_with(&schema, config, raw(&[("m", "x", &[1, 2])])).unwrap();
        assert_eq!(
            trace.register_values(schema.registers(), x),
            [7, 7, 1, 2, 7].map(f).to_vec()
        );
        let sizing = *trace.module_sizing(m);
        assert_eq!((sizing.left, sizing.right, sizing.height), (2, 1, 5));
    }

    #[test]
    fn defensive_padding_covers_shift_range() {
        let (schema, m, _) = counter_schema();
        let config = BuildConfig::default();
        let (trace, _) =
            build_with(&schema, config, raw(&[("m", "x", &[1, 2, 3, 4])])).unwrap();
        // The transition constraint reads one row ahead.
        let sizing = *trace.module_sizing(m);
        assert_eq!((sizing.left, sizing.right), (0, 1));
        assert_eq!(sizing.height, 5);
    }

    #[test]
    fn expansion_is_deterministic_across_configs() {
        // A chain of assignments: decomposition feeding a computation.
        let mut schema = S::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema.declare_input(m, "x", 16).unwrap();
        let x0 = schema
            .declare_column(m, "x0", 8, ColumnKind::ByteDecomposed, 1, None)
            .unwrap();
        let x1 = schema
            .declare_column(m, "x1", 8, ColumnKind::ByteDecomposed, 1, None)
            .unwrap();
        let sum = schema.declare_computed(m, "sum", 16).unwrap();
        schema
            .add_assignment(Assignment::Decomposition {
                handle: Handle::new("bytes"),
                source: x,
                parts: vec![x0, x1],
                part_width: 8,
            })
            .unwrap();
        schema
            .add_assignment(Assignment::Computation {
                handle: Handle::new("sum"),
                targets: vec![sum],
                exprs: vec![
                    HirExpr::access(schema.col(x0), 0) + HirExpr::access(schema.col(x1), 0),
                ],
            })
            .unwrap();

        let input = raw(&[("m", "x", &[513, 65535, 7, 256])]);
        let mut reference: Option<Trace<TestField>> = None;
        for parallel in [false, true] {
            for batch_size in [1, 1 << 12] {
                let config = BuildConfig {
                    parallel,
                    batch_size,
                    ..exact_config()
                };
                let (trace, _) = build_with(&schema, config, input.clone()).unwrap();
                match &reference {
                    None => reference = Some(trace),
                    Some(expected) => assert_eq!(&trace, expected),
                }
            }
        }
    }

    #[test]
    fn padding_then_trimming_is_idempotent() -> anyhow::Result<()> {
        // No shifted expressions, so padding must be inert.
        let mut schema = S::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema.declare_input(m, "x", 8).unwrap();
        let double = schema.declare_computed(m, "double", 16).unwrap();
        schema
            .add_assignment(Assignment::Computation {
                handle: Handle::new("double"),
                targets: vec![double],
                exprs: vec![HirExpr::access(schema.col(x), 0) + HirExpr::access(schema.col(x), 0)],
            })
            .unwrap();
        schema
            .range("x_small", m, HirExpr::access(schema.col(x), 0), f(200))
            .unwrap();

        let input = raw(&[("m", "x", &[1, 2, 3, 4])]);
        let padded_config = BuildConfig {
            left_padding: 2,
            right_padding: 1,
            ..exact_config()
        };
        let (padded, _) = build_with(&schema, padded_config, input.clone())?;
        let (plain, _) = build_with(&schema, exact_config(), input)?;
        assert_eq!(padded.trim(&schema), plain);
        Ok(())
    }

    #[test]
    fn skipping_expansion_leaves_computed_columns_zero() {
        let mut schema = S::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema.declare_input(m, "x", 8).unwrap();
        let copy = schema.declare_computed(m, "copy", 8).unwrap();
        schema
            .add_assignment(Assignment::Computation {
                handle: Handle::new("copy"),
                targets: vec![copy],
                exprs: vec![HirExpr::access(schema.col(x), 0)],
            })
            .unwrap();
        let config = BuildConfig {
            expand: false,
            ..exact_config()
        };
        let (trace, _) = build_with(&schema, config, raw(&[("m", "x", &[1, 2])])).unwrap();
        assert_eq!(
            trace.register_values(schema.registers(), copy),
            vec![f(0), f(0)]
        );
    }

    #[test]
    fn cancellation_short_circuits() {
        let (schema, ..) = counter_schema();
        let cancel = CancelToken::new();
        cancel.cancel();
        let builder = TraceBuilder::with_config(&schema, exact_config());
        assert!(matches!(
            builder.build(raw(&[("m", "x", &[1, 2])]), &cancel),
            Err(Error::Cancelled)
        ));
    }
}
