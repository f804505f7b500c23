use std::fmt;
use std::ops::Index;

use cinch_field::types::Field;
use cinch_util::ceil_div_usize;
use serde::{Deserialize, Serialize};

use crate::assignment::Assignment;
use crate::constraint::{Constraint, Domain};
use crate::errors::{Error, Result};
use crate::ir::{AirExpr, Expression, HirExpr, Layer, MirExpr};

/// Index of a module within a schema.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ModuleId(pub usize);

/// Index of a conceptual column (a register) within a schema. Stable across
/// lowerings, concretization included.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct RegisterId(pub usize);

/// Index of a concrete column within a schema. Expressions address these;
/// concretization replaces wide columns with limbs and renumbers.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ColumnId(pub usize);

/// Stable identifier of a constraint or assignment, used in diagnostics.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Handle(String);

impl Handle {
    pub fn new(name: impl Into<String>) -> Self {
        Handle(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The handle of the `i`-th constraint split off this one, e.g. by list
    /// expansion.
    pub fn indexed(&self, i: usize) -> Handle {
        Handle(format!("{}#{}", self.0, i))
    }

    /// The handle of a constraint or column derived from this one by a
    /// lowering.
    pub fn derived(&self, tag: &str) -> Handle {
        Handle(format!("{}#{}", self.0, tag))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Handle {
    fn from(s: &str) -> Self {
        Handle(s.to_string())
    }
}

impl From<String> for Handle {
    fn from(s: String) -> Self {
        Handle(s)
    }
}

/// How a column's values come to exist.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ColumnKind {
    /// Bound from the raw input trace.
    Input,
    /// Filled by a computation or inverse assignment.
    Computed,
    /// Filled by an interleaving assignment.
    Interleaved,
    /// Lexicographic-sort helper.
    Sorted,
    /// Filled by a sorted-permutation assignment.
    Permuted,
    /// Filled by a decomposition assignment.
    ByteDecomposed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleDecl {
    pub id: ModuleId,
    pub name: String,
    pub public: bool,
    /// User-declared (left, right) spillage. `None` means inferred from the
    /// schema's shift ranges.
    pub spillage: Option<(usize, usize)>,
}

/// A conceptual column: what constraints, assignments, and input binding
/// address. Realized by one concrete column, or by several limbs after
/// concretization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Register<F: Field> {
    pub id: RegisterId,
    pub module: ModuleId,
    pub name: String,
    pub width: usize,
    pub multiplier: usize,
    pub kind: ColumnKind,
    /// Value filling padding rows; zero when absent.
    pub padding_value: Option<F>,
    /// Concrete columns realizing this register, low limb first.
    pub limbs: Vec<ColumnId>,
    /// Width of each limb but the last; equals `width` when unsplit.
    pub limb_width: usize,
}

impl<F: Field> Register<F> {
    pub fn is_split(&self) -> bool {
        self.limbs.len() > 1
    }
}

/// A concrete column as an expression sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnDecl {
    pub id: ColumnId,
    pub register: RegisterId,
    pub module: ModuleId,
    pub name: String,
    pub width: usize,
    pub multiplier: usize,
}

/// The register-to-limb mapping of a schema: identity before concretization,
/// the projection record afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct RegisterMap<F: Field> {
    registers: Vec<Register<F>>,
    /// Owning register of each concrete column.
    owners: Vec<RegisterId>,
}

impl<F: Field> RegisterMap<F> {
    pub(crate) fn empty() -> Self {
        Self {
            registers: Vec::new(),
            owners: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Register<F>> {
        self.registers.iter()
    }

    pub fn get(&self, id: RegisterId) -> &Register<F> {
        &self.registers[id.0]
    }

    /// The register realized (in part) by `column`.
    pub fn column_register(&self, column: ColumnId) -> RegisterId {
        self.owners[column.0]
    }

    pub(crate) fn push(&mut self, register: Register<F>) {
        for &limb in &register.limbs {
            debug_assert_eq!(limb.0, self.owners.len());
            self.owners.push(register.id);
        }
        self.registers.push(register);
    }
}

impl<F: Field> Index<RegisterId> for RegisterMap<F> {
    type Output = Register<F>;

    fn index(&self, id: RegisterId) -> &Register<F> {
        self.get(id)
    }
}

/// One entry of the schema's declaration order: input columns and
/// assignments, interleaved the way they were declared.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Declaration {
    Column(RegisterId),
    Assignment(usize),
}

/// An ordered catalog of modules, columns, constraints, and assignments over
/// one expression layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Schema<F: Field, E: Expression<F>> {
    pub(crate) modules: Vec<ModuleDecl>,
    pub(crate) registers: RegisterMap<F>,
    pub(crate) columns: Vec<ColumnDecl>,
    pub(crate) constants: Vec<(String, F)>,
    pub(crate) constraints: Vec<Constraint<F, E>>,
    pub(crate) assignments: Vec<Assignment<E>>,
    pub(crate) declarations: Vec<Declaration>,
    pub(crate) degree_bound: usize,
}

pub type HirSchema<F> = Schema<F, HirExpr<F>>;
pub type MirSchema<F> = Schema<F, MirExpr<F>>;
pub type AirSchema<F> = Schema<F, AirExpr<F>>;

pub const DEFAULT_DEGREE_BOUND: usize = 2;

impl<F: Field, E: Expression<F>> Default for Schema<F, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Field, E: Expression<F>> Schema<F, E> {
    pub fn new() -> Self {
        Self::with_degree_bound(DEFAULT_DEGREE_BOUND)
    }

    pub fn with_degree_bound(degree_bound: usize) -> Self {
        Self {
            modules: Vec::new(),
            registers: RegisterMap::empty(),
            columns: Vec::new(),
            constants: Vec::new(),
            constraints: Vec::new(),
            assignments: Vec::new(),
            declarations: Vec::new(),
            degree_bound,
        }
    }

    pub fn layer(&self) -> Layer {
        E::LAYER
    }

    pub fn degree_bound(&self) -> usize {
        self.degree_bound
    }

    pub fn modules(&self) -> &[ModuleDecl] {
        &self.modules
    }

    pub fn module(&self, id: ModuleId) -> &ModuleDecl {
        &self.modules[id.0]
    }

    pub fn module_named(&self, name: &str) -> Option<&ModuleDecl> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn registers(&self) -> &RegisterMap<F> {
        &self.registers
    }

    pub fn register(&self, id: RegisterId) -> &Register<F> {
        self.registers.get(id)
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnDecl> {
        self.columns.iter()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, id: ColumnId) -> &ColumnDecl {
        &self.columns[id.0]
    }

    pub fn constraints(&self) -> impl Iterator<Item = &Constraint<F, E>> {
        self.constraints.iter()
    }

    pub fn assignments(&self) -> impl Iterator<Item = &Assignment<E>> {
        self.assignments.iter()
    }

    /// Input columns and assignments in declaration order.
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn constants(&self) -> &[(String, F)] {
        &self.constants
    }

    pub fn constant(&self, name: &str) -> Option<F> {
        self.constants
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|&(_, v)| v)
    }

    pub fn input_registers(&self) -> impl Iterator<Item = &Register<F>> {
        self.registers
            .iter()
            .filter(|r| r.kind == ColumnKind::Input)
    }

    /// `module.name` of a register.
    pub fn qualified_name(&self, id: RegisterId) -> String {
        let reg = self.register(id);
        format!("{}.{}", self.module(reg.module).name, reg.name)
    }

    /// `module.name` of a concrete column, with its limb suffix if split.
    pub fn column_qualified_name(&self, id: ColumnId) -> String {
        let col = self.column(id);
        format!("{}.{}", self.module(col.module).name, col.name)
    }

    /// The single concrete column of an unsplit register; building
    /// expressions over registers goes through here.
    pub fn col(&self, id: RegisterId) -> ColumnId {
        let reg = self.register(id);
        assert!(
            !reg.is_split(),
            "register {} is split; address its limbs instead",
            reg.name
        );
        reg.limbs[0]
    }

    pub fn declare_module(&mut self, name: impl Into<String>, public: bool) -> Result<ModuleId> {
        let name = name.into();
        if self.modules.iter().any(|m| m.name == name) {
            return Err(Error::ConflictingDefinition(format!("module {name}")));
        }
        let id = ModuleId(self.modules.len());
        self.modules.push(ModuleDecl {
            id,
            name,
            public,
            spillage: None,
        });
        Ok(id)
    }

    /// Overrides inferred spillage for a module; checked against the
    /// schema's shift ranges by [`Schema::validate`].
    pub fn set_module_spillage(&mut self, module: ModuleId, left: usize, right: usize) {
        self.modules[module.0].spillage = Some((left, right));
    }

    pub fn declare_column(
        &mut self,
        module: ModuleId,
        name: impl Into<String>,
        width: usize,
        kind: ColumnKind,
        multiplier: usize,
        padding_value: Option<F>,
    ) -> Result<RegisterId> {
        let name = name.into();
        if width == 0 || width > F::BANDWIDTH {
            return Err(Error::OutOfRange(format!(
                "column {name} declares width {width}, outside 1..={}",
                F::BANDWIDTH
            )));
        }
        if multiplier == 0 {
            return Err(Error::OutOfRange(format!(
                "column {name} declares a zero length multiplier"
            )));
        }
        if let Some(pad) = padding_value {
            if pad.bits() > width {
                return Err(Error::OutOfRange(format!(
                    "padding value {pad} does not fit the {width}-bit column {name}"
                )));
            }
        }
        let module_name = &self.module(module).name;
        if self
            .registers
            .iter()
            .any(|r| r.module == module && r.name == name)
        {
            return Err(Error::ConflictingDefinition(format!(
                "column {module_name}.{name}"
            )));
        }

        let reg_id = RegisterId(self.registers.len());
        let col_id = ColumnId(self.columns.len());
        self.columns.push(ColumnDecl {
            id: col_id,
            register: reg_id,
            module,
            name: name.clone(),
            width,
            multiplier,
        });
        self.registers.push(Register {
            id: reg_id,
            module,
            name,
            width,
            multiplier,
            kind,
            padding_value,
            limbs: vec![col_id],
            limb_width: width,
        });
        if kind == ColumnKind::Input {
            self.declarations.push(Declaration::Column(reg_id));
        }
        Ok(reg_id)
    }

    pub fn declare_input(
        &mut self,
        module: ModuleId,
        name: impl Into<String>,
        width: usize,
    ) -> Result<RegisterId> {
        self.declare_column(module, name, width, ColumnKind::Input, 1, None)
    }

    pub fn declare_computed(
        &mut self,
        module: ModuleId,
        name: impl Into<String>,
        width: usize,
    ) -> Result<RegisterId> {
        self.declare_column(module, name, width, ColumnKind::Computed, 1, None)
    }

    pub fn declare_constant(&mut self, name: impl Into<String>, value: F) -> Result<()> {
        let name = name.into();
        if self.constants.iter().any(|(n, _)| *n == name) {
            return Err(Error::ConflictingDefinition(format!("constant {name}")));
        }
        self.constants.push((name, value));
        Ok(())
    }

    /// Registers a constraint after structural validation: handle uniqueness
    /// within its kind, same-module column references, matching arities, and
    /// (at the arithmetic layer) the degree bound.
    pub fn add_constraint(&mut self, constraint: Constraint<F, E>) -> Result<()> {
        let handle = constraint.handle();
        if self
            .constraints
            .iter()
            .any(|c| c.kind() == constraint.kind() && c.handle() == handle)
        {
            return Err(Error::ConflictingDefinition(format!(
                "{} constraint {handle}",
                constraint.kind()
            )));
        }

        match &constraint {
            Constraint::Vanishing { module, guard, expr, .. }
            | Constraint::Assertion { module, guard, expr, .. } => {
                let mut exprs = vec![expr];
                exprs.extend(guard.iter());
                self.check_exprs(handle, &exprs, *module)?;
            }
            Constraint::Lookup {
                source_module,
                target_module,
                sources,
                targets,
                ..
            } => {
                if sources.is_empty() || sources.len() != targets.len() {
                    return Err(Error::Parse(format!(
                        "lookup {handle} has {} source and {} target expressions",
                        sources.len(),
                        targets.len()
                    )));
                }
                self.check_exprs(handle, &sources.iter().collect::<Vec<_>>(), *source_module)?;
                self.check_exprs(handle, &targets.iter().collect::<Vec<_>>(), *target_module)?;
            }
            Constraint::Range { module, expr, bound, .. } => {
                if bound.is_zero() {
                    return Err(Error::Parse(format!("range {handle} has a zero bound")));
                }
                self.check_exprs(handle, &[expr], *module)?;
            }
            Constraint::Permutation { sources, targets, .. } => {
                if sources.is_empty() || sources.len() != targets.len() {
                    return Err(Error::Parse(format!(
                        "permutation {handle} has mismatched column groups"
                    )));
                }
                self.check_register_group(handle, sources)?;
                self.check_register_group(handle, targets)?;
                for (&s, &t) in sources.iter().zip(targets) {
                    if self.register(s).width != self.register(t).width {
                        return Err(Error::Parse(format!(
                            "permutation {handle} pairs columns of different widths"
                        )));
                    }
                }
            }
            Constraint::Interleaving { target, sources, .. } => {
                self.check_interleaving(handle, *target, sources)?;
            }
            Constraint::Sorted { registers, signs, .. } => {
                if registers.is_empty() || registers.len() != signs.len() {
                    return Err(Error::Parse(format!(
                        "sorted {handle} needs one sign per column"
                    )));
                }
                self.check_register_group(handle, registers)?;
            }
        }

        if E::LAYER == Layer::Arith {
            let degree = constraint.degree();
            if degree > self.degree_bound {
                return Err(Error::DegreeExceeded {
                    handle: handle.clone(),
                    degree,
                    bound: self.degree_bound,
                });
            }
        }

        self.constraints.push(constraint);
        Ok(())
    }

    pub fn vanishing(
        &mut self,
        handle: impl Into<Handle>,
        module: ModuleId,
        domain: Domain,
        guard: Option<E>,
        expr: E,
    ) -> Result<()> {
        self.add_constraint(Constraint::Vanishing {
            handle: handle.into(),
            module,
            domain,
            guard,
            expr,
        })
    }

    pub fn assertion(
        &mut self,
        handle: impl Into<Handle>,
        module: ModuleId,
        domain: Domain,
        guard: Option<E>,
        expr: E,
    ) -> Result<()> {
        self.add_constraint(Constraint::Assertion {
            handle: handle.into(),
            module,
            domain,
            guard,
            expr,
        })
    }

    pub fn lookup(
        &mut self,
        handle: impl Into<Handle>,
        source_module: ModuleId,
        target_module: ModuleId,
        sources: Vec<E>,
        targets: Vec<E>,
    ) -> Result<()> {
        self.add_constraint(Constraint::Lookup {
            handle: handle.into(),
            source_module,
            target_module,
            sources,
            targets,
        })
    }

    pub fn range(
        &mut self,
        handle: impl Into<Handle>,
        module: ModuleId,
        expr: E,
        bound: F,
    ) -> Result<()> {
        self.add_constraint(Constraint::Range {
            handle: handle.into(),
            module,
            expr,
            bound,
        })
    }

    pub fn permutation(
        &mut self,
        handle: impl Into<Handle>,
        sources: Vec<RegisterId>,
        targets: Vec<RegisterId>,
    ) -> Result<()> {
        self.add_constraint(Constraint::Permutation {
            handle: handle.into(),
            sources,
            targets,
        })
    }

    pub fn interleaving(
        &mut self,
        handle: impl Into<Handle>,
        target: RegisterId,
        sources: Vec<RegisterId>,
    ) -> Result<()> {
        self.add_constraint(Constraint::Interleaving {
            handle: handle.into(),
            target,
            sources,
        })
    }

    pub fn sorted(
        &mut self,
        handle: impl Into<Handle>,
        registers: Vec<RegisterId>,
        signs: Vec<bool>,
    ) -> Result<()> {
        self.add_constraint(Constraint::Sorted {
            handle: handle.into(),
            registers,
            signs,
        })
    }

    /// Registers an assignment after validating its targets and shapes, and
    /// records it in declaration order.
    pub fn add_assignment(&mut self, assignment: Assignment<E>) -> Result<()> {
        let handle = assignment.handle().clone();
        let writes = assignment.writes();
        if writes.is_empty() {
            return Err(Error::Parse(format!("assignment {handle} writes nothing")));
        }
        for &target in &writes {
            if target.0 >= self.registers.len() {
                return Err(Error::UnknownColumn(format!("register #{}", target.0)));
            }
            let reg = self.register(target);
            if reg.kind == ColumnKind::Input {
                return Err(Error::Parse(format!(
                    "assignment {handle} writes the input column {}",
                    self.qualified_name(target)
                )));
            }
            if self
                .assignments
                .iter()
                .any(|a| a.writes().contains(&target))
            {
                return Err(Error::ConflictingDefinition(format!(
                    "column {} is written by two assignments",
                    self.qualified_name(target)
                )));
            }
        }

        match &assignment {
            Assignment::Decomposition {
                source,
                parts,
                part_width,
                ..
            } => {
                if *part_width == 0 {
                    return Err(Error::Parse(format!(
                        "decomposition {handle} has a zero part width"
                    )));
                }
                let width = self.register(*source).width;
                let expected = ceil_div_usize(width, *part_width);
                if parts.len() != expected {
                    return Err(Error::Parse(format!(
                        "decomposition {handle} of a {width}-bit column needs {expected} parts, has {}",
                        parts.len()
                    )));
                }
                for (i, &part) in parts.iter().enumerate() {
                    let needed = (width - i * part_width).min(*part_width);
                    if self.register(part).width < needed {
                        return Err(Error::Parse(format!(
                            "part {} of decomposition {handle} is narrower than its {needed} bits",
                            self.qualified_name(part)
                        )));
                    }
                }
            }
            Assignment::Interleaving { target, sources, .. } => {
                self.check_interleaving(&handle, *target, sources)?;
            }
            Assignment::SortedPermutation {
                sources,
                targets,
                keys,
                signs,
                ..
            } => {
                if sources.is_empty() || sources.len() != targets.len() {
                    return Err(Error::Parse(format!(
                        "sorted permutation {handle} has mismatched column groups"
                    )));
                }
                if keys.is_empty() || keys.len() != signs.len() {
                    return Err(Error::Parse(format!(
                        "sorted permutation {handle} needs one sign per key"
                    )));
                }
                if keys.iter().any(|&k| k >= sources.len()) {
                    return Err(Error::Parse(format!(
                        "sorted permutation {handle} keys index outside its sources"
                    )));
                }
                self.check_register_group(&handle, sources)?;
                self.check_register_group(&handle, targets)?;
            }
            Assignment::LexicographicHelpers {
                registers, signs, selectors, ..
            } => {
                if registers.is_empty()
                    || registers.len() != signs.len()
                    || registers.len() != selectors.len()
                {
                    return Err(Error::Parse(format!(
                        "lexicographic helpers {handle} need one sign and one selector per column"
                    )));
                }
                self.check_register_group(&handle, registers)?;
            }
            Assignment::Computation { targets, exprs, .. } => {
                if targets.is_empty() || targets.len() != exprs.len() {
                    return Err(Error::Parse(format!(
                        "computation {handle} needs one expression per target"
                    )));
                }
                let module = self.register(targets[0]).module;
                self.check_exprs(&handle, &exprs.iter().collect::<Vec<_>>(), module)?;
            }
            Assignment::Inverse { target, expr, .. } => {
                let module = self.register(*target).module;
                self.check_exprs(&handle, &[expr], module)?;
            }
        }

        let index = self.assignments.len();
        self.assignments.push(assignment);
        self.declarations.push(Declaration::Assignment(index));
        Ok(())
    }

    /// The (left, right) spillage a module needs so that no shifted access
    /// leaves its rows: the magnitudes of the most negative and most
    /// positive shift over every expression touching the module.
    pub fn required_padding(&self, module: ModuleId) -> (usize, usize) {
        let mut min = 0isize;
        let mut max = 0isize;
        let mut scan = |expr: &E| {
            expr.for_each_access(&mut |column, shift| {
                if self.column(column).module == module {
                    min = min.min(shift);
                    max = max.max(shift);
                }
            });
        };
        for constraint in &self.constraints {
            for expr in constraint.exprs() {
                scan(expr);
            }
        }
        for assignment in &self.assignments {
            match assignment {
                Assignment::Computation { exprs, .. } => {
                    for expr in exprs {
                        scan(expr);
                    }
                }
                Assignment::Inverse { expr, .. } => scan(expr),
                _ => {}
            }
        }
        (min.unsigned_abs(), max.unsigned_abs())
    }

    /// Whole-schema validation: user spillage overrides against inferred
    /// shift ranges, and acyclicity of the assignment graph.
    pub fn validate(&self) -> Result<()> {
        for module in &self.modules {
            if let Some((left, right)) = module.spillage {
                let (need_left, need_right) = self.required_padding(module.id);
                if need_left > left {
                    return Err(Error::ShiftOutOfSpillage {
                        module: module.name.clone(),
                        shift: -(need_left as isize),
                        spillage: left,
                    });
                }
                if need_right > right {
                    return Err(Error::ShiftOutOfSpillage {
                        module: module.name.clone(),
                        shift: need_right as isize,
                        spillage: right,
                    });
                }
            }
        }
        crate::expansion::assignment_levels(self)?;
        Ok(())
    }

    fn check_exprs(&self, handle: &Handle, exprs: &[&E], module: ModuleId) -> Result<()> {
        let mut err = None;
        let mut multiplier = None;
        for expr in exprs {
            expr.for_each_access(&mut |column, _| {
                if err.is_some() {
                    return;
                }
                if column.0 >= self.columns.len() {
                    err = Some(Error::UnknownColumn(format!("column #{}", column.0)));
                    return;
                }
                let col = self.column(column);
                if col.module != module {
                    err = Some(Error::Parse(format!(
                        "constraint {handle} references {} outside module {}",
                        self.column_qualified_name(column),
                        self.module(module).name
                    )));
                    return;
                }
                match multiplier {
                    None => multiplier = Some(col.multiplier),
                    Some(m) if m != col.multiplier => {
                        err = Some(Error::Parse(format!(
                            "constraint {handle} mixes length multipliers {m} and {}",
                            col.multiplier
                        )));
                    }
                    _ => {}
                }
            });
            expr.for_each_extern(&mut |name| {
                if err.is_none() && self.constant(name).is_none() {
                    err = Some(Error::Parse(format!(
                        "constraint {handle} references the undeclared constant {name}"
                    )));
                }
            });
        }
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn check_register_group(&self, handle: &Handle, group: &[RegisterId]) -> Result<()> {
        let mut module = None;
        for &id in group {
            if id.0 >= self.registers.len() {
                return Err(Error::UnknownColumn(format!("register #{}", id.0)));
            }
            let reg = self.register(id);
            match module {
                None => module = Some(reg.module),
                Some(m) if m != reg.module => {
                    return Err(Error::Parse(format!(
                        "{handle} groups columns from different modules"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_interleaving(
        &self,
        handle: &Handle,
        target: RegisterId,
        sources: &[RegisterId],
    ) -> Result<()> {
        if sources.is_empty() {
            return Err(Error::Parse(format!("interleaving {handle} has no sources")));
        }
        self.check_register_group(handle, sources)?;
        let target_reg = self.register(target);
        let first = self.register(sources[0]);
        if target_reg.module != first.module {
            return Err(Error::Parse(format!(
                "interleaving {handle} crosses modules"
            )));
        }
        if sources
            .iter()
            .any(|&s| self.register(s).multiplier != first.multiplier)
        {
            return Err(Error::Parse(format!(
                "interleaving {handle} mixes source multipliers"
            )));
        }
        if target_reg.multiplier != first.multiplier * sources.len() {
            return Err(Error::Parse(format!(
                "interleaving {handle} target multiplier must be {} times the source multiplier",
                sources.len()
            )));
        }
        Ok(())
    }
}

/// Human-readable schema dump, the payload of debug output at any layer.
impl<F: Field, E: Expression<F>> fmt::Display for Schema<F, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "schema ({} layer, degree bound {})",
            E::LAYER,
            self.degree_bound
        )?;
        for (name, value) in &self.constants {
            writeln!(f, "const {name} = {value}")?;
        }
        for module in &self.modules {
            let visibility = if module.public { " (public)" } else { "" };
            writeln!(f, "module {}{visibility}", module.name)?;
            for reg in self.registers.iter().filter(|r| r.module == module.id) {
                let multiplier = if reg.multiplier > 1 {
                    format!(" x{}", reg.multiplier)
                } else {
                    String::new()
                };
                let limbs = if reg.is_split() {
                    format!(" [{} limbs of {} bits]", reg.limbs.len(), reg.limb_width)
                } else {
                    String::new()
                };
                writeln!(
                    f,
                    "  {}: u{}{multiplier} ({:?}){limbs}",
                    reg.name, reg.width, reg.kind
                )?;
            }
        }
        for assignment in &self.assignments {
            writeln!(f, "{}", assignment.render(self))?;
        }
        for constraint in &self.constraints {
            writeln!(f, "{}", constraint.render(self))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cinch_field::fermat::FermatField;

    use crate::constraint::Domain;
    use crate::ir::Expression;

    use super::*;

    type F = FermatField;
    type E = HirExpr<F>;

    #[test]
    fn duplicate_declarations_are_rejected() {
        let mut schema = HirSchema::<F>::new();
        let m = schema.declare_module("m", false).unwrap();
        schema.declare_input(m, "x", 8).unwrap();
        assert!(matches!(
            schema.declare_input(m, "x", 8),
            Err(Error::ConflictingDefinition(_))
        ));
        assert!(matches!(
            schema.declare_module("m", true),
            Err(Error::ConflictingDefinition(_))
        ));
    }

    #[test]
    fn width_zero_and_oversized_are_rejected() {
        let mut schema = HirSchema::<F>::new();
        let m = schema.declare_module("m", false).unwrap();
        assert!(matches!(
            schema.declare_input(m, "z", 0),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            schema.declare_input(m, "w", F::BANDWIDTH + 1),
            Err(Error::OutOfRange(_))
        ));
    }

    #[test]
    fn handles_are_unique_per_kind() {
        let mut schema = HirSchema::<F>::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema.declare_input(m, "x", 8).unwrap();
        let access = E::access(schema.col(x), 0);
        schema
            .vanishing("c", m, Domain::All, None, access.clone())
            .unwrap();
        assert!(matches!(
            schema.vanishing("c", m, Domain::All, None, access.clone()),
            Err(Error::ConflictingDefinition(_))
        ));
        // Same handle under a different kind is fine.
        schema
            .range("c", m, access, F::from_canonical_u64(16))
            .unwrap();
    }

    #[test]
    fn cross_module_references_are_rejected() {
        let mut schema = HirSchema::<F>::new();
        let m1 = schema.declare_module("a", false).unwrap();
        let m2 = schema.declare_module("b", false).unwrap();
        let x = schema.declare_input(m1, "x", 8).unwrap();
        let access = E::access(schema.col(x), 0);
        assert!(schema.vanishing("c", m2, Domain::All, None, access).is_err());
    }

    #[test]
    fn undeclared_constant_is_rejected() {
        let mut schema = HirSchema::<F>::new();
        let m = schema.declare_module("m", false).unwrap();
        schema.declare_input(m, "x", 8).unwrap();
        let expr = E::extern_const("ALPHA");
        assert!(schema.vanishing("c", m, Domain::All, None, expr.clone()).is_err());
        schema.declare_constant("ALPHA", F::from_canonical_u64(7)).unwrap();
        schema.vanishing("c", m, Domain::All, None, expr).unwrap();
    }

    #[test]
    fn required_padding_scans_shifts() {
        let mut schema = HirSchema::<F>::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema.declare_input(m, "x", 8).unwrap();
        let expr = E::access(schema.col(x), 1) - E::access(schema.col(x), -2);
        schema.vanishing("c", m, Domain::All, None, expr).unwrap();
        assert_eq!(schema.required_padding(m), (2, 1));
    }

    #[test]
    fn spillage_override_is_checked() {
        let mut schema = HirSchema::<F>::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema.declare_input(m, "x", 8).unwrap();
        let expr = E::access(schema.col(x), 1) - E::access(schema.col(x), 0);
        schema.vanishing("c", m, Domain::Transition, None, expr).unwrap();
        schema.set_module_spillage(m, 0, 0);
        assert!(matches!(
            schema.validate(),
            Err(Error::ShiftOutOfSpillage { .. })
        ));
        schema.set_module_spillage(m, 0, 1);
        schema.validate().unwrap();
    }

    #[test]
    fn schema_dump_names_everything() {
        let mut schema = HirSchema::<F>::new();
        let m = schema.declare_module("m", true).unwrap();
        let x = schema.declare_input(m, "x", 8).unwrap();
        schema.declare_constant("ALPHA", F::from_canonical_u64(3)).unwrap();
        let expr = E::access(schema.col(x), 1) - E::access(schema.col(x), 0);
        schema.vanishing("step", m, Domain::Transition, None, expr).unwrap();
        let dump = schema.to_string();
        assert!(dump.contains("schema (hir layer, degree bound 2)"));
        assert!(dump.contains("const ALPHA = 3"));
        assert!(dump.contains("module m (public)"));
        assert!(dump.contains("x: u8"));
        assert!(dump.contains("vanish step (transition): (- (shift m.x 1) m.x)"));
    }

    #[test]
    fn degree_bound_enforced_at_air_only() {
        use crate::ir::AirExpr;
        let mut hir = HirSchema::<F>::new();
        let m = hir.declare_module("m", false).unwrap();
        let x = hir.declare_input(m, "x", 8).unwrap();
        let xc = hir.col(x);
        let cubic = E::access(xc, 0) * E::access(xc, 0) * E::access(xc, 0);
        hir.vanishing("cubic", m, Domain::All, None, cubic).unwrap();

        let mut air = AirSchema::<F>::new();
        let m = air.declare_module("m", false).unwrap();
        let x = air.declare_input(m, "x", 8).unwrap();
        let xc = air.col(x);
        let cubic =
            AirExpr::access(xc, 0) * AirExpr::access(xc, 0) * AirExpr::access(xc, 0);
        assert!(matches!(
            air.vanishing("cubic", m, Domain::All, None, cubic),
            Err(Error::DegreeExceeded { degree: 3, bound: 2, .. })
        ));
    }
}
