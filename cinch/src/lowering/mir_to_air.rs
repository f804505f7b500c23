//! MIR to AIR: normalize elimination through inverse columns, degree
//! flattening, and the optional expression optimizations.

use cinch_field::types::Field;
use log::debug;

use crate::assignment::Assignment;
use crate::constraint::{Constraint, Domain};
use crate::errors::{Error, Result};
use crate::ir::{AirExpr, Expression, MirExpr};
use crate::schema::{AirSchema, ColumnKind, Declaration, Handle, MirSchema, ModuleId};

/// Which optimizations run while lowering to AIR.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptLevel {
    /// No rewriting beyond what correctness requires.
    Off,
    /// Constant folding.
    Basic,
    /// Constant folding plus dropping range constraints already implied by
    /// their column's declared width.
    Full,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AirOptions {
    pub opt_level: OptLevel,
}

impl Default for AirOptions {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::Basic,
        }
    }
}

/// Lowers a whole schema to the arithmetic layer.
///
/// Every `normalize(x)` introduces a computed inverse column with the
/// canonical identity pair `x(1 - x inv) = 0` and `inv(1 - x inv) = 0`, and
/// the node itself becomes `x * inv`. Guards are folded into their
/// expression (`guard * expr` vanishes exactly where the guarded expression
/// must). Products beyond the degree bound are flattened through
/// intermediate computed columns tied by equality constraints.
pub fn lower_to_air<F: Field>(
    schema: &MirSchema<F>,
    options: &AirOptions,
) -> Result<AirSchema<F>> {
    let mut out = AirSchema::with_degree_bound(schema.degree_bound);
    out.modules = schema.modules.clone();
    out.registers = schema.registers.clone();
    out.columns = schema.columns.clone();
    out.constants = schema.constants.clone();

    let mut lowerer = Lowerer {
        out,
        options: *options,
        fresh: 0,
    };
    // Declarations are rebuilt in order so that derived inverse columns
    // land right next to the assignment or constraint that needed them.
    for declaration in &schema.declarations {
        match *declaration {
            Declaration::Column(register) => {
                lowerer.out.declarations.push(Declaration::Column(register));
            }
            Declaration::Assignment(index) => {
                lowerer.lower_assignment(&schema.assignments[index])?;
            }
        }
    }
    for constraint in &schema.constraints {
        lowerer.lower_constraint(constraint)?;
    }
    Ok(lowerer.out)
}

struct Lowerer<F: Field> {
    out: AirSchema<F>,
    options: AirOptions,
    fresh: usize,
}

impl<F: Field> Lowerer<F> {
    fn lower_constraint(&mut self, constraint: &Constraint<F, MirExpr<F>>) -> Result<()> {
        match constraint {
            Constraint::Vanishing {
                handle,
                module,
                domain,
                guard,
                expr,
            } => self.lower_guarded(handle, *module, *domain, guard, expr, false),
            Constraint::Assertion {
                handle,
                module,
                domain,
                guard,
                expr,
            } => self.lower_guarded(handle, *module, *domain, guard, expr, true),
            Constraint::Lookup {
                handle,
                source_module,
                target_module,
                sources,
                targets,
            } => {
                let sources = sources
                    .iter()
                    .map(|e| self.lower_scalar(handle, *source_module, e))
                    .collect::<Result<Vec<_>>>()?;
                let targets = targets
                    .iter()
                    .map(|e| self.lower_scalar(handle, *target_module, e))
                    .collect::<Result<Vec<_>>>()?;
                self.out.constraints.push(Constraint::Lookup {
                    handle: handle.clone(),
                    source_module: *source_module,
                    target_module: *target_module,
                    sources,
                    targets,
                });
                Ok(())
            }
            Constraint::Range {
                handle,
                module,
                expr,
                bound,
            } => {
                let expr = self.lower_scalar(handle, *module, expr)?;
                if self.options.opt_level >= OptLevel::Full {
                    if let AirExpr::Access { column, .. } = &expr {
                        let width = self.out.column(*column).width;
                        let implied = F::TWO.exp_u64(width as u64);
                        if width < F::BANDWIDTH && implied.to_canonical_biguint() <= bound.to_canonical_biguint() {
                            debug!(
                                "dropping range {handle}: implied by the {width}-bit width of {}",
                                self.out.column_qualified_name(*column)
                            );
                            return Ok(());
                        }
                    }
                }
                self.out.constraints.push(Constraint::Range {
                    handle: handle.clone(),
                    module: *module,
                    expr,
                    bound: *bound,
                });
                Ok(())
            }
            Constraint::Permutation {
                handle,
                sources,
                targets,
            } => {
                self.out.constraints.push(Constraint::Permutation {
                    handle: handle.clone(),
                    sources: sources.clone(),
                    targets: targets.clone(),
                });
                Ok(())
            }
            Constraint::Interleaving {
                handle,
                target,
                sources,
            } => {
                self.out.constraints.push(Constraint::Interleaving {
                    handle: handle.clone(),
                    target: *target,
                    sources: sources.clone(),
                });
                Ok(())
            }
            Constraint::Sorted {
                handle,
                registers,
                signs,
            } => {
                self.out.constraints.push(Constraint::Sorted {
                    handle: handle.clone(),
                    registers: registers.clone(),
                    signs: signs.clone(),
                });
                Ok(())
            }
        }
    }

    fn lower_guarded(
        &mut self,
        handle: &Handle,
        module: ModuleId,
        domain: Domain,
        guard: &Option<MirExpr<F>>,
        expr: &MirExpr<F>,
        assertion: bool,
    ) -> Result<()> {
        let lowered = self.lower_expr(handle, module, expr, true)?;
        let combined = match guard {
            // The guard gates the constraint on rows where it is nonzero;
            // multiplying it in preserves exactly that meaning.
            Some(guard) => {
                let guard = self.lower_expr(handle, module, guard, true)?;
                guard * lowered
            }
            None => lowered,
        };
        let expr = self.finish(handle, module, combined)?;
        let constraint = if assertion {
            Constraint::Assertion {
                handle: handle.clone(),
                module,
                domain,
                guard: None,
                expr,
            }
        } else {
            Constraint::Vanishing {
                handle: handle.clone(),
                module,
                domain,
                guard: None,
                expr,
            }
        };
        self.out.constraints.push(constraint);
        Ok(())
    }

    /// Lowers, folds, and flattens a scalar expression used outside a
    /// vanishing position.
    fn lower_scalar(
        &mut self,
        handle: &Handle,
        module: ModuleId,
        expr: &MirExpr<F>,
    ) -> Result<AirExpr<F>> {
        let lowered = self.lower_expr(handle, module, expr, true)?;
        self.finish(handle, module, lowered)
    }

    /// Optional folding, then degree flattening, then the bound check.
    fn finish(
        &mut self,
        handle: &Handle,
        module: ModuleId,
        expr: AirExpr<F>,
    ) -> Result<AirExpr<F>> {
        let expr = if self.options.opt_level >= OptLevel::Basic {
            fold(expr)
        } else {
            expr
        };
        let expr = self.flatten(handle, module, expr)?;
        let degree = expr.degree();
        if degree > self.out.degree_bound {
            return Err(Error::DegreeExceeded {
                handle: handle.clone(),
                degree,
                bound: self.out.degree_bound,
            });
        }
        Ok(expr)
    }

    fn lower_assignment(&mut self, assignment: &Assignment<MirExpr<F>>) -> Result<()> {
        let lowered = match assignment {
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
            } => {
                let module = self.out.register(targets[0]).module;
                Assignment::Computation {
                    handle: handle.clone(),
                    targets: targets.clone(),
                    exprs: exprs
                        .iter()
                        .map(|e| self.lower_expr(handle, module, e, false))
                        .collect::<Result<_>>()?,
                }
            }
            Assignment::Inverse {
                handle,
                target,
                expr,
            } => {
                let module = self.out.register(*target).module;
                Assignment::Inverse {
                    handle: handle.clone(),
                    target: *target,
                    expr: self.lower_expr(handle, module, expr, false)?,
                }
            }
        };
        let index = self.out.assignments.len();
        self.out.assignments.push(lowered);
        self.out.declarations.push(Declaration::Assignment(index));
        Ok(())
    }

    /// Structural recursion; `normalize` nodes fan out into inverse columns.
    ///
    /// `obligated` is true when the expression carries a prover obligation,
    /// in which case the inverse column's correctness is enforced by the
    /// canonical identity pair; engine-filled assignment expressions skip
    /// the identities.
    fn lower_expr(
        &mut self,
        handle: &Handle,
        module: ModuleId,
        expr: &MirExpr<F>,
        obligated: bool,
    ) -> Result<AirExpr<F>> {
        Ok(match expr {
            MirExpr::Const(value) => AirExpr::Const(*value),
            MirExpr::Access { column, shift } => AirExpr::Access {
                column: *column,
                shift: *shift,
            },
            MirExpr::Add(args) => {
                AirExpr::Add(self.lower_all(handle, module, args, obligated)?)
            }
            MirExpr::Sub(args) => {
                AirExpr::Sub(self.lower_all(handle, module, args, obligated)?)
            }
            MirExpr::Mul(args) => {
                AirExpr::Mul(self.lower_all(handle, module, args, obligated)?)
            }
            MirExpr::Normalize(arg) => {
                let x = self.lower_expr(handle, module, arg, obligated)?;
                self.normalized(handle, module, x, obligated)?
            }
        })
    }

    fn lower_all(
        &mut self,
        handle: &Handle,
        module: ModuleId,
        args: &[MirExpr<F>],
        obligated: bool,
    ) -> Result<Vec<AirExpr<F>>> {
        args.iter()
            .map(|e| self.lower_expr(handle, module, e, obligated))
            .collect()
    }

    /// `normalize(x)` becomes `x * inv` over a fresh computed inverse
    /// column holding `x^-1` where `x` is nonzero and zero elsewhere.
    fn normalized(
        &mut self,
        handle: &Handle,
        module: ModuleId,
        x: AirExpr<F>,
        obligated: bool,
    ) -> Result<AirExpr<F>> {
        let multiplier = self.expr_multiplier(&x);
        let serial = self.fresh;
        let name = self.fresh_name(handle, "inv");
        let register = self.out.declare_column(
            module,
            name.clone(),
            F::BANDWIDTH,
            ColumnKind::Computed,
            multiplier,
            None,
        )?;
        let inv = AirExpr::access(self.out.col(register), 0);
        self.out.add_assignment(Assignment::Inverse {
            handle: Handle::new(name),
            target: register,
            expr: x.clone(),
        })?;

        if obligated {
            // x(1 - x inv) = 0 forces inv to be a true inverse wherever x is
            // nonzero; inv(1 - x inv) = 0 forces inv to zero wherever x is.
            let product = x.clone() * inv.clone();
            let complement = AirExpr::one() - product;
            let left_handle = handle.derived(&format!("inv{serial}a"));
            let right_handle = handle.derived(&format!("inv{serial}b"));
            let left = x.clone() * complement.clone();
            let right = inv.clone() * complement;
            let left = self.flatten(&left_handle, module, left)?;
            let right = self.flatten(&right_handle, module, right)?;
            self.out.constraints.push(Constraint::Vanishing {
                handle: left_handle,
                module,
                domain: Domain::All,
                guard: None,
                expr: left,
            });
            self.out.constraints.push(Constraint::Vanishing {
                handle: right_handle,
                module,
                domain: Domain::All,
                guard: None,
                expr: right,
            });
        }
        Ok(x * inv)
    }

    /// Materializes sub-products until the expression fits the degree
    /// bound.
    fn flatten(
        &mut self,
        handle: &Handle,
        module: ModuleId,
        expr: AirExpr<F>,
    ) -> Result<AirExpr<F>> {
        let bound = self.out.degree_bound;
        if expr.degree() <= bound {
            return Ok(expr);
        }
        match expr {
            AirExpr::Add(args) => Ok(AirExpr::Add(
                args.into_iter()
                    .map(|a| self.flatten(handle, module, a))
                    .collect::<Result<_>>()?,
            )),
            AirExpr::Sub(args) => Ok(AirExpr::Sub(
                args.into_iter()
                    .map(|a| self.flatten(handle, module, a))
                    .collect::<Result<_>>()?,
            )),
            AirExpr::Mul(args) => {
                let mut acc: Option<AirExpr<F>> = None;
                for arg in args {
                    let arg = self.flatten(handle, module, arg)?;
                    acc = Some(match acc {
                        None => arg,
                        Some(a) => {
                            if a.degree() + arg.degree() <= bound {
                                a * arg
                            } else {
                                let a = self.reduce_factor(handle, module, a)?;
                                let arg = if a.degree() + arg.degree() > bound {
                                    self.reduce_factor(handle, module, arg)?
                                } else {
                                    arg
                                };
                                let degree = a.degree() + arg.degree();
                                if degree > bound {
                                    return Err(Error::DegreeExceeded {
                                        handle: handle.clone(),
                                        degree,
                                        bound,
                                    });
                                }
                                a * arg
                            }
                        }
                    });
                }
                Ok(acc.unwrap_or_else(AirExpr::one))
            }
            expr => Ok(expr),
        }
    }

    /// Turns a non-trivial factor into a degree-one access to a fresh
    /// computed column tied by an equality constraint.
    fn reduce_factor(
        &mut self,
        handle: &Handle,
        module: ModuleId,
        expr: AirExpr<F>,
    ) -> Result<AirExpr<F>> {
        if expr.degree() <= 1 {
            return Ok(expr);
        }
        let multiplier = self.expr_multiplier(&expr);
        let name = self.fresh_name(handle, "prod");
        let register = self.out.declare_column(
            module,
            name.clone(),
            F::BANDWIDTH,
            ColumnKind::Computed,
            multiplier,
            None,
        )?;
        self.out.add_assignment(Assignment::Computation {
            handle: Handle::new(name.clone()),
            targets: vec![register],
            exprs: vec![expr.clone()],
        })?;
        let access = AirExpr::access(self.out.col(register), 0);
        self.out.constraints.push(Constraint::Vanishing {
            handle: Handle::new(name),
            module,
            domain: Domain::All,
            guard: None,
            expr: access.clone() - expr,
        });
        Ok(access)
    }

    fn expr_multiplier(&self, expr: &AirExpr<F>) -> usize {
        expr.accesses()
            .first()
            .map(|&(column, _)| self.out.column(column).multiplier)
            .unwrap_or(1)
    }

    fn fresh_name(&mut self, handle: &Handle, tag: &str) -> String {
        let base: String = handle
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let name = format!("{base}${tag}{}", self.fresh);
        self.fresh += 1;
        name
    }
}

/// Constant folding with the usual identities: zero factors annihilate,
/// unit factors and zero terms drop, constant subtrees collapse.
fn fold<F: Field>(expr: AirExpr<F>) -> AirExpr<F> {
    match expr {
        AirExpr::Add(args) => {
            let mut constant = F::ZERO;
            let mut rest = Vec::new();
            for arg in args.into_iter().map(fold) {
                match arg.as_const() {
                    Some(value) => constant += value,
                    None => rest.push(arg),
                }
            }
            if rest.is_empty() {
                return AirExpr::Const(constant);
            }
            if constant.is_nonzero() {
                rest.push(AirExpr::Const(constant));
            }
            unwrap_single(AirExpr::Add(rest))
        }
        AirExpr::Sub(args) => {
            let folded: Vec<_> = args.into_iter().map(fold).collect();
            if let Some(values) = folded
                .iter()
                .map(|a| a.as_const())
                .collect::<Option<Vec<_>>>()
            {
                let mut iter = values.into_iter();
                let first = iter.next().unwrap_or(F::ZERO);
                return AirExpr::Const(iter.fold(first, |acc, v| acc - v));
            }
            // Trailing zero subtrahends do nothing.
            let mut folded = folded;
            while folded.len() > 1
                && folded.last().and_then(|a| a.as_const()) == Some(F::ZERO)
            {
                folded.pop();
            }
            unwrap_single(AirExpr::Sub(folded))
        }
        AirExpr::Mul(args) => {
            let mut constant = F::ONE;
            let mut rest = Vec::new();
            for arg in args.into_iter().map(fold) {
                match arg.as_const() {
                    Some(value) => {
                        if value.is_zero() {
                            return AirExpr::Const(F::ZERO);
                        }
                        constant *= value;
                    }
                    None => rest.push(arg),
                }
            }
            if rest.is_empty() {
                return AirExpr::Const(constant);
            }
            if !constant.is_one() {
                rest.insert(0, AirExpr::Const(constant));
            }
            unwrap_single(AirExpr::Mul(rest))
        }
        expr => expr,
    }
}

fn unwrap_single<F: Field>(expr: AirExpr<F>) -> AirExpr<F> {
    match expr {
        AirExpr::Add(mut args) | AirExpr::Sub(mut args) | AirExpr::Mul(mut args)
            if args.len() == 1 =>
        {
            args.pop().unwrap()
        }
        expr => expr,
    }
}

#[cfg(test)]
mod tests {
    use cinch_field::fermat::FermatField;

    use crate::ir::Expression;
    use crate::schema::ColumnId;

    use super::*;

    type F = FermatField;
    type E = AirExpr<F>;

    fn f(n: u64) -> F {
        F::from_canonical_u64(n)
    }

    #[test]
    fn fold_collapses_constants() {
        let e = E::constant(f(2)) + E::constant(f(3));
        assert_eq!(fold(e), E::constant(f(5)));

        let x = E::access(ColumnId(0), 0);
        let e = x.clone() * E::constant(f(0));
        assert_eq!(fold(e), E::constant(f(0)));

        let e = x.clone() * E::constant(f(1));
        assert_eq!(fold(e), x.clone());

        let e = x.clone() + E::constant(f(0));
        assert_eq!(fold(e), x.clone());

        let e = x.clone() - E::constant(f(0));
        assert_eq!(fold(e), x);
    }
}
