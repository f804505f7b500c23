//! Semantics-preserving transformations down the layer stack.

pub mod concretize;
pub mod hir_to_mir;
pub mod mir_to_air;

pub use concretize::concretize;
pub use hir_to_mir::lower_to_mir;
pub use mir_to_air::{lower_to_air, AirOptions, OptLevel};

use cinch_field::types::Field;

use crate::errors::Result;
use crate::ir::{AirExpr, HirExpr, MirExpr};
use crate::schema::{AirSchema, MirSchema, Schema};

impl<F: Field> Schema<F, HirExpr<F>> {
    /// Lowers to MIR: list expansion, if-zero elimination, extern-constant
    /// resolution.
    pub fn lower(&self) -> Result<MirSchema<F>> {
        lower_to_mir(self)
    }
}

impl<F: Field> Schema<F, MirExpr<F>> {
    /// Lowers to AIR: normalize elimination, degree flattening, optional
    /// optimizations.
    pub fn lower(&self, options: &AirOptions) -> Result<AirSchema<F>> {
        lower_to_air(self, options)
    }
}

impl<F: Field> Schema<F, AirExpr<F>> {
    /// Splits registers wider than `register_width` into limbs.
    pub fn concretize(&self, register_width: usize) -> Result<AirSchema<F>> {
        concretize(self, register_width)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::constraint::Domain;
    use crate::ir::{Expression, HirExpr};
    use crate::report::{Failure, FailureKind};
    use crate::schema::{ColumnKind, HirSchema, RegisterId};
    use crate::testing::{build, evaluate, f, raw, TestField};
    use crate::trace::RawTrace;

    use super::*;

    type S = HirSchema<TestField>;
    type E = HirExpr<TestField>;

    /// A schema exercising every HIR-only feature: lists, if-zero, extern
    /// constants, normalize, plus a lookup and a range.
    fn rich_schema() -> S {
        let mut schema = S::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema.declare_input(m, "x", 8).unwrap();
        let y = schema.declare_input(m, "y", 8).unwrap();
        schema.declare_constant("ALPHA", f(3)).unwrap();
        let (xc, yc) = (schema.col(x), schema.col(y));
        let xa = || E::access(xc, 0);
        let ya = || E::access(yc, 0);

        schema
            .vanishing(
                "pair",
                m,
                Domain::All,
                None,
                E::list(vec![xa() - ya(), xa() * xa() - ya() * xa()]),
            )
            .unwrap();
        schema
            .vanishing(
                "branch",
                m,
                Domain::All,
                None,
                E::if_zero(xa() - ya(), E::zero(), E::one()),
            )
            .unwrap();
        schema
            .vanishing(
                "scaled",
                m,
                Domain::All,
                None,
                E::extern_const("ALPHA") * xa() - E::extern_const("ALPHA") * ya(),
            )
            .unwrap();
        schema
            .assertion("dbg", m, Domain::All, None, E::normalize(xa() - ya()))
            .unwrap();
        schema
            .lookup("lk", m, m, vec![xa()], vec![ya()])
            .unwrap();
        schema.range("rng", m, xa(), f(256)).unwrap();
        schema
    }

    /// Failure identity modulo the handle suffixes lowering introduces.
    fn base_failures(failures: &[Failure]) -> BTreeSet<(FailureKind, String, Option<usize>)> {
        failures
            .iter()
            .map(|failure| {
                let base = failure
                    .handle
                    .as_str()
                    .split('#')
                    .next()
                    .unwrap()
                    .to_string();
                (failure.kind, base, failure.row)
            })
            .collect()
    }

    fn layer_outcomes(input: RawTrace<TestField>) -> Vec<(bool, BTreeSet<(FailureKind, String, Option<usize>)>)> {
        let hir = rich_schema();
        let mir = hir.lower().unwrap();
        let air = mir.lower(&AirOptions::default()).unwrap();

        let mut out = Vec::new();
        let hir_trace = build(&hir, input.clone());
        let evaluation = evaluate(&hir, &hir_trace);
        out.push((evaluation.accepted(), base_failures(evaluation.failures())));

        let mir_trace = build(&mir, input.clone());
        let evaluation = evaluate(&mir, &mir_trace);
        out.push((evaluation.accepted(), base_failures(evaluation.failures())));

        let air_trace = build(&air, input);
        let evaluation = evaluate(&air, &air_trace);
        out.push((evaluation.accepted(), base_failures(evaluation.failures())));
        out
    }

    #[test]
    fn layers_agree_on_acceptance() {
        let outcomes = layer_outcomes(raw(&[
            ("m", "x", &[1, 2, 3, 4]),
            ("m", "y", &[1, 2, 3, 4]),
        ]));
        assert!(outcomes.iter().all(|(accepted, _)| *accepted));
    }

    #[test]
    fn layers_agree_on_rejection_rows() {
        let outcomes = layer_outcomes(raw(&[
            ("m", "x", &[1, 2, 3, 4]),
            ("m", "y", &[1, 2, 5, 4]),
        ]));
        assert!(outcomes.iter().all(|(accepted, _)| !*accepted));
        let reference = &outcomes[0].1;
        for (_, failures) in &outcomes[1..] {
            assert_eq!(failures, reference);
        }
        assert!(reference.contains(&(FailureKind::Vanishing, "pair".to_string(), Some(2))));
        assert!(reference.contains(&(FailureKind::Lookup, "lk".to_string(), Some(2))));
    }

    #[test]
    fn randomized_layer_equivalence() {
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha8Rng;

        let _ = env_logger::builder().is_test(true).try_init();
        let mut rng = ChaCha8Rng::seed_from_u64(0x636f7265);
        for round in 0..16 {
            let n = rng.gen_range(1..9usize);
            let x: Vec<u64> = (0..n).map(|_| rng.gen_range(1..255)).collect();
            let y: Vec<u64> = x
                .iter()
                .map(|&v| {
                    if rng.gen_bool(0.8) {
                        v
                    } else {
                        rng.gen_range(1..255)
                    }
                })
                .collect();
            let mut input = RawTrace::new();
            input.push("m", "x", x.iter().map(|&v| f(v)).collect::<Vec<_>>());
            input.push("m", "y", y.iter().map(|&v| f(v)).collect::<Vec<_>>());

            let outcomes = layer_outcomes(input);
            let reference = &outcomes[0];
            for outcome in &outcomes[1..] {
                assert_eq!(outcome, reference, "round {round}: x={x:?} y={y:?}");
            }
        }
    }

    #[test]
    fn list_expansion_suffixes_handles() {
        let hir = rich_schema();
        let mir = hir.lower().unwrap();
        let handles: Vec<_> = mir
            .constraints()
            .map(|c| c.handle().as_str().to_string())
            .collect();
        assert!(handles.contains(&"pair#0".to_string()));
        assert!(handles.contains(&"pair#1".to_string()));
        assert!(!handles.contains(&"pair".to_string()));
    }

    #[test]
    fn normalize_inverse_column_values() {
        // normalize(x) compared against a nonzero flag; the engine must fill
        // the inverse column with x^-1 on nonzero rows and zero elsewhere.
        let mut schema = S::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema.declare_input(m, "x", 8).unwrap();
        let nz = schema.declare_input(m, "nz", 1).unwrap();
        let expr = E::normalize(E::access(schema.col(x), 0)) - E::access(schema.col(nz), 0);
        schema.vanishing("is_nz", m, Domain::All, None, expr).unwrap();

        let air = schema.lower().unwrap().lower(&AirOptions::default()).unwrap();
        let input = raw(&[("m", "x", &[0, 5, 0, 7]), ("m", "nz", &[0, 1, 0, 1])]);
        let trace = build(&air, input);
        assert!(evaluate(&air, &trace).accepted());

        let inverse_register = air
            .registers()
            .iter()
            .find(|reg| reg.kind == ColumnKind::Computed && reg.name.contains("inv"))
            .expect("normalize introduced an inverse register")
            .id;
        use cinch_field::types::Field;
        assert_eq!(
            trace.register_values(air.registers(), inverse_register),
            vec![f(0), f(5).inverse(), f(0), f(7).inverse()]
        );

        // Any other inverse assignment is rejected.
        let mut tampered = trace.clone();
        tampered
            .write_register(air.registers(), inverse_register, 1, f(123))
            .unwrap();
        assert!(!evaluate(&air, &tampered).accepted());
    }

    #[test]
    fn air_constraints_respect_the_degree_bound() {
        let air = rich_schema()
            .lower()
            .unwrap()
            .lower(&AirOptions::default())
            .unwrap();
        for constraint in air.constraints() {
            assert!(
                constraint.degree() <= air.degree_bound(),
                "{} has degree {}",
                constraint.handle(),
                constraint.degree()
            );
        }
    }

    #[test]
    fn range_narrowing_drops_implied_checks() {
        let mut schema = S::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema.declare_input(m, "x", 8).unwrap();
        schema.range("rng", m, E::access(schema.col(x), 0), f(256)).unwrap();
        let mir = schema.lower().unwrap();

        let basic = mir
            .lower(&AirOptions { opt_level: OptLevel::Basic })
            .unwrap();
        assert_eq!(basic.constraints().count(), 1);

        let full = mir
            .lower(&AirOptions { opt_level: OptLevel::Full })
            .unwrap();
        assert_eq!(full.constraints().count(), 0);
    }

    fn wide_schema() -> crate::schema::AirSchema<TestField> {
        let mut schema = S::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema.declare_input(m, "x", 16).unwrap();
        let xc = schema.col(x);
        schema
            .vanishing(
                "step",
                m,
                Domain::Transition,
                None,
                E::access(xc, 1) - E::access(xc, 0) - E::constant(f(256)),
            )
            .unwrap();
        schema.lower().unwrap().lower(&AirOptions::default()).unwrap()
    }

    fn register_named<P: cinch_field::types::Field>(
        schema: &crate::schema::AirSchema<P>,
        name: &str,
    ) -> RegisterId {
        schema
            .registers()
            .iter()
            .find(|reg| reg.name == name)
            .unwrap()
            .id
    }

    #[test]
    fn concretization_splits_and_preserves_acceptance() {
        let air = wide_schema();
        let split = air.concretize(8).unwrap();

        let x = register_named(&split, "x");
        assert_eq!(split.register(x).limbs.len(), 2);
        assert_eq!(split.registers().len(), air.registers().len());
        // Two limb range checks were added.
        assert_eq!(
            split.constraints().count(),
            air.constraints().count() + 2
        );

        let good = raw(&[("m", "x", &[0, 256, 512, 768])]);
        let bad = raw(&[("m", "x", &[0, 256, 513, 768])]);

        for (input, expected) in [(good, true), (bad, false)] {
            let plain_trace = build(&air, input.clone());
            let split_trace = build(&split, input);
            assert_eq!(evaluate(&air, &plain_trace).accepted(), expected);
            assert_eq!(evaluate(&split, &split_trace).accepted(), expected);
        }
    }

    #[test]
    fn concretized_traces_decompose_inputs() {
        let split = wide_schema().concretize(8).unwrap();
        let trace = build(&split, raw(&[("m", "x", &[513, 0, 1, 65535])]));
        let x = register_named(&split, "x");
        let limbs = &split.register(x).limbs;
        assert_eq!(
            trace.column(limbs[0]).values(),
            [1, 0, 1, 255].map(f).as_slice()
        );
        assert_eq!(
            trace.column(limbs[1]).values(),
            [2, 0, 0, 255].map(f).as_slice()
        );
        assert_eq!(
            trace.register_values(split.registers(), x),
            [513, 0, 1, 65535].map(f).to_vec()
        );
    }

    #[test]
    fn production_field_concretization() {
        use cinch_field::bls12_377_scalar::Bls12377Scalar;
        use cinch_field::types::Field;

        use crate::builder::{BuildConfig, TraceBuilder};
        use crate::evaluator::{check, CheckConfig};
        use crate::util::CancelToken;

        type P = Bls12377Scalar;
        let mut schema = crate::schema::HirSchema::<P>::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema.declare_input(m, "x", 40).unwrap();
        let xc = schema.col(x);
        schema
            .vanishing(
                "held",
                m,
                Domain::Transition,
                None,
                HirExpr::access(xc, 1) - HirExpr::access(xc, 0),
            )
            .unwrap();
        let split = schema
            .lower()
            .unwrap()
            .lower(&AirOptions::default())
            .unwrap()
            .concretize(16)
            .unwrap();

        let held = P::from_canonical_u64(0xAABBCCDDEE);
        let mut input = crate::trace::RawTrace::new();
        input.push("m", "x", vec![held; 4]);
        let config = BuildConfig {
            defensive: false,
            ..BuildConfig::default()
        };
        let (trace, warnings) = TraceBuilder::with_config(&split, config)
            .build(input, &CancelToken::new())
            .unwrap();
        assert!(warnings.is_empty());

        let x = register_named(&split, "x");
        let limbs = &split.register(x).limbs;
        assert_eq!(limbs.len(), 3);
        let limb_value = |i: usize| trace.column(limbs[i]).value(0).try_to_canonical_u64();
        assert_eq!(limb_value(0), Some(0xDDEE));
        assert_eq!(limb_value(1), Some(0xBBCC));
        assert_eq!(limb_value(2), Some(0xAA));
        assert_eq!(trace.read_register(split.registers(), x, 0), held);

        let evaluation = check(&split, &trace, &CheckConfig::default(), &CancelToken::new())
            .unwrap();
        assert!(evaluation.accepted(), "{:?}", evaluation.outcome);
    }

    #[test]
    fn goldilocks_concretization_at_register_width() {
        use cinch_field::goldilocks_field::GoldilocksField;
        use cinch_field::types::Field;

        use crate::builder::{BuildConfig, TraceBuilder};
        use crate::evaluator::{check, CheckConfig};
        use crate::util::CancelToken;

        type G = GoldilocksField;
        let mut schema = crate::schema::HirSchema::<G>::new();
        let m = schema.declare_module("m", false).unwrap();
        let x = schema.declare_input(m, "x", 48).unwrap();
        let xc = schema.col(x);
        schema
            .vanishing(
                "held",
                m,
                Domain::Transition,
                None,
                HirExpr::access(xc, 1) - HirExpr::access(xc, 0),
            )
            .unwrap();
        let split = schema
            .lower()
            .unwrap()
            .lower(&AirOptions::default())
            .unwrap()
            .concretize(G::REGISTER_WIDTH)
            .unwrap();

        let held = G::from_canonical_u64(0xAABB_CCDD_EEFF);
        let build = |values: Vec<G>| {
            let mut input = crate::trace::RawTrace::new();
            input.push("m", "x", values);
            let config = BuildConfig {
                defensive: false,
                ..BuildConfig::default()
            };
            TraceBuilder::with_config(&split, config)
                .build(input, &CancelToken::new())
                .unwrap()
                .0
        };

        let trace = build(vec![held; 4]);
        let x = register_named(&split, "x");
        let limbs = &split.register(x).limbs;
        assert_eq!(limbs.len(), 2);
        assert_eq!(
            trace.column(limbs[0]).value(0).try_to_canonical_u64(),
            Some(0xCCDD_EEFF)
        );
        assert_eq!(
            trace.column(limbs[1]).value(0).try_to_canonical_u64(),
            Some(0xAABB)
        );
        assert_eq!(trace.read_register(split.registers(), x, 0), held);
        let evaluation =
            check(&split, &trace, &CheckConfig::default(), &CancelToken::new()).unwrap();
        assert!(evaluation.accepted(), "{:?}", evaluation.outcome);

        let bumped = build(vec![held, held, held + G::ONE, held]);
        let evaluation =
            check(&split, &bumped, &CheckConfig::default(), &CancelToken::new()).unwrap();
        assert!(!evaluation.accepted());
        assert_eq!(evaluation.failures()[0].row, Some(1));
    }

    #[test]
    fn double_concretization_is_rejected() {
        let split = wide_schema().concretize(8).unwrap();
        assert!(split.concretize(8).is_err());
    }
}
