//! End-to-end runs of small programs through the refinement loop.

use std::rc::Rc;

use test_log::test;

use predabs::algorithm::{CegarAlgorithm, Verdict};
use predabs::cfa::{Cfa, CfaBuilder};
use predabs::config::{AbstractionFrequency, InterpolationDirection, MergeStrategy, PredicateConfig, RefinementScope};
use predabs::cpa::PredicateCpa;
use predabs::formula::{Formula, Symbol};
use predabs::lemma::{LemmaPrecision, LemmaSet};
use predabs::pathformula::PathFormulaManager;
use predabs::predicates::{Precision, PredicatePrecision};
use predabs::shutdown::ShutdownNotifier;
use predabs::solver::{BddSolver, Solver};

fn var(name: &str) -> Formula {
    Formula::var(Symbol::bv(name, 8))
}

fn cpa(cfa: Cfa, config: &PredicateConfig) -> PredicateCpa {
    let solver: Rc<dyn Solver> =
        Rc::new(BddSolver::new(ShutdownNotifier::new()).with_direction(config.interpolation));
    PredicateCpa::new(Rc::new(cfa), config, solver, LemmaSet::new()).unwrap()
}

/// `x = 0; assume(x == 1); ERROR:`
fn contradiction() -> (Cfa, usize) {
    let x = Symbol::bv("x", 8);
    let mut b = CfaBuilder::new();
    let (entry, _exit) = b.function("main");
    let n1 = b.node("main");
    let err = b.error_node("main");
    b.assign(entry, n1, &x, Formula::bv(0, 8));
    b.assume(n1, err, Formula::eq(var("x"), Formula::bv(1, 8)), true);
    (b.build("main").unwrap(), n1)
}

#[test]
fn test_contradicting_assumption_is_refined_away() {
    let config = PredicateConfig {
        abstraction_frequency: AbstractionFrequency::EveryLocation,
        interpolation: InterpolationDirection::Backward,
        ..Default::default()
    };
    let (cfa, n1) = contradiction();
    let mut cegar = CegarAlgorithm::new(cpa(cfa, &config));
    let verdict = cegar.run(Precision::default());
    assert!(verdict.is_safe(), "{}", verdict);
    assert_eq!(cegar.cpa().stats.refinements.get(), 1);

    let atoms: Vec<String> = cegar
        .precision()
        .predicates
        .locations()
        .filter(|(node, _)| *node == n1)
        .flat_map(|(_, preds)| preds.iter().map(|p| p.atom().to_string()))
        .collect();
    assert_eq!(atoms, vec!["(= x (_ bv1 8))".to_string()]);
}

#[test]
fn test_contradicting_assumption_forward() {
    let config = PredicateConfig {
        abstraction_frequency: AbstractionFrequency::EveryLocation,
        interpolation: InterpolationDirection::Forward,
        ..Default::default()
    };
    let (cfa, _) = contradiction();
    let mut cegar = CegarAlgorithm::new(cpa(cfa, &config));
    assert!(cegar.run(Precision::default()).is_safe());
    assert!(!cegar.precision().predicates.is_empty());
}

#[test]
fn test_function_scope_refinement() {
    let config = PredicateConfig {
        abstraction_frequency: AbstractionFrequency::EveryLocation,
        refinement_scope: RefinementScope::Function,
        ..Default::default()
    };
    let (cfa, _) = contradiction();
    let mut cegar = CegarAlgorithm::new(cpa(cfa, &config));
    let verdict = cegar.run(Precision::default());
    assert!(verdict.is_safe(), "{}", verdict);
    assert_eq!(cegar.cpa().stats.refinements.get(), 1);

    let predicates = &cegar.precision().predicates;
    let scoped: Vec<(String, Vec<String>)> = predicates
        .functions()
        .map(|(f, preds)| (f.to_string(), preds.iter().map(|p| p.atom().to_string()).collect()))
        .collect();
    assert_eq!(scoped, vec![("main".to_string(), vec!["(= x (_ bv1 8))".to_string()])]);
    assert!(predicates.global().is_empty());
    assert_eq!(predicates.locations().count(), 0);
}

#[test]
fn test_location_instance_scope_refinement() {
    let config = PredicateConfig {
        abstraction_frequency: AbstractionFrequency::EveryLocation,
        refinement_scope: RefinementScope::LocationInstance,
        ..Default::default()
    };
    let (cfa, n1) = contradiction();
    let mut cegar = CegarAlgorithm::new(cpa(cfa, &config));
    let verdict = cegar.run(Precision::default());
    assert!(verdict.is_safe(), "{}", verdict);
    assert_eq!(cegar.cpa().stats.refinements.get(), 1);

    let instances: Vec<(usize, u32, usize)> = cegar
        .precision()
        .predicates
        .location_instances()
        .map(|(node, k, preds)| (node, k, preds.len()))
        .collect();
    assert_eq!(instances, vec![(n1, 1, 1)]);
}

/// `x := *; if (x == 0) y := 1 else y := 2; if (y == 2) ERROR`
fn branch_then_check() -> Cfa {
    let x = Symbol::bv("x", 8);
    let y = Symbol::bv("y", 8);
    let mut b = CfaBuilder::new();
    let (entry, exit) = b.function("main");
    let n1 = b.node("main");
    let then = b.node("main");
    let otherwise = b.node("main");
    let joined = b.node("main");
    let err = b.error_node("main");
    b.havoc(entry, n1, &x);
    b.branch(n1, Formula::eq(var("x"), Formula::bv(0, 8)), then, otherwise);
    b.assign(then, joined, &y, Formula::bv(1, 8));
    b.assign(otherwise, joined, &y, Formula::bv(2, 8));
    b.branch(joined, Formula::eq(var("y"), Formula::bv(2, 8)), err, exit);
    b.build("main").unwrap()
}

#[test]
fn test_merged_states_report_a_real_path() {
    let config = PredicateConfig {
        merge: MergeStrategy::Abe,
        ..Default::default()
    };
    let cfa = branch_then_check();
    let mut cegar = CegarAlgorithm::new(cpa(cfa, &config));
    let verdict = cegar.run(Precision::default());
    let Verdict::Unsafe(info) = verdict else {
        panic!("expected a counterexample, got {}", verdict);
    };
    let cpa = cegar.cpa();
    assert!(cpa.stats.states_merged.get() >= 1);

    // the reported edges agree with the reported model
    let mut pf = cpa.fmgr.empty();
    for &edge in &info.edges {
        pf = cpa.fmgr.make_and_edge(&pf, cpa.cfa.edge(edge), &LemmaPrecision::new()).unwrap();
    }
    let check = Formula::and([pf.formula().clone(), info.model.to_formula()]);
    assert!(cpa.solver.is_sat(&check).unwrap());
    let assigned: Vec<String> = info
        .edges
        .iter()
        .map(|&e| cpa.cfa.edge(e).to_string())
        .filter(|e| e.contains("y :="))
        .collect();
    assert_eq!(assigned.len(), 1);
    assert!(assigned[0].ends_with("y := (_ bv2 8)"), "{}", assigned[0]);
}

/// `x := 0; if (y == 0) z := 1 else z := 2; L: if (x != 0) ERROR`
#[test]
fn test_merged_states_refine_along_every_path() {
    let x = Symbol::bv("x", 8);
    let z = Symbol::bv("z", 8);
    let mut b = CfaBuilder::new();
    let (entry, exit) = b.function("main");
    let n1 = b.node("main");
    let then = b.node("main");
    let otherwise = b.node("main");
    let joined = b.node("main");
    let head = b.loop_head("main");
    let err = b.error_node("main");
    b.assign(entry, n1, &x, Formula::bv(0, 8));
    b.branch(n1, Formula::eq(var("y"), Formula::bv(0, 8)), then, otherwise);
    b.assign(then, joined, &z, Formula::bv(1, 8));
    b.assign(otherwise, joined, &z, Formula::bv(2, 8));
    b.blank(joined, head);
    b.branch(head, Formula::eq(var("x"), Formula::bv(0, 8)), exit, err);

    let config = PredicateConfig {
        merge: MergeStrategy::Abe,
        ..Default::default()
    };
    let mut cegar = CegarAlgorithm::new(cpa(b.build("main").unwrap(), &config));
    let verdict = cegar.run(Precision::default());
    assert!(verdict.is_safe(), "{}", verdict);
    let stats = &cegar.cpa().stats;
    assert!(stats.states_merged.get() >= 1);
    assert_eq!(stats.refinements.get(), 1);
}

/// `assume(x > 0); f(); f();` or a single call, with `f: y := x`.
fn calls_with_positive_x(calls: usize) -> Cfa {
    let y = Symbol::bv("y", 8);
    let mut b = CfaBuilder::new();
    let (entry, exit) = b.function("main");
    let (f_entry, f_exit) = b.function("f");
    b.assign(f_entry, f_exit, &y, var("x"));

    let mut at = b.node("main");
    b.assume(entry, at, Formula::ugt(var("x"), Formula::bv(0, 8)), true);
    for _ in 1..calls {
        let next = b.node("main");
        b.call(at, next, "f", vec![], None);
        at = next;
    }
    b.call(at, exit, "f", vec![], None);
    b.build("main").unwrap()
}

fn run_with_positive_x(calls: usize) -> CegarAlgorithm {
    let config = PredicateConfig {
        bam: true,
        ..Default::default()
    };
    let cpa = cpa(calls_with_positive_x(calls), &config);
    let mut predicates = PredicatePrecision::new();
    predicates.add_global([cpa.pmgr.make_predicate(Formula::ugt(var("x"), Formula::bv(0, 8)))]);
    let mut cegar = CegarAlgorithm::new(cpa);
    let verdict = cegar.run(Precision::new(predicates, Default::default()));
    assert!(verdict.is_safe(), "{}", verdict);
    cegar
}

#[test]
fn test_second_entry_with_same_context_is_a_cache_hit() {
    let once = run_with_positive_x(1);
    let twice = run_with_positive_x(2);

    let stats = &twice.cpa().stats;
    assert_eq!(stats.bam_cache_misses.get(), 1);
    assert!(stats.bam_cache_hits.get() >= 1);
    assert_eq!(twice.bam().map(|bam| bam.cache_size()), Some(1));
    // the hit adds no abstraction work inside the block
    assert_eq!(
        stats.block_abstractions("f"),
        once.cpa().stats.block_abstractions("f")
    );
}

#[test]
fn test_interpolants_of_three_formulas() {
    for direction in [InterpolationDirection::Backward, InterpolationDirection::Forward] {
        let solver: Rc<dyn Solver> = Rc::new(BddSolver::new(ShutdownNotifier::new()).with_direction(direction));
        let formulas = [
            Formula::eq(var("a@1"), Formula::bv(2, 8)),
            Formula::eq(var("b@1"), Formula::bvadd(var("a@1"), var("a@1"))),
            Formula::ult(var("b@1"), Formula::bv(4, 8)),
        ];
        let itps = solver.interpolate(&formulas).unwrap().unwrap();
        assert_eq!(itps.len(), 2);
        assert!(solver.implies(&formulas[0], &itps[0]).unwrap());
        let step = Formula::and([itps[0].clone(), formulas[1].clone()]);
        assert!(solver.implies(&step, &itps[1]).unwrap());
        let last = Formula::and([itps[1].clone(), formulas[2].clone()]);
        assert!(solver.is_unsat(&last).unwrap());
    }
}

/// `x := *; if (x == 7) ERROR`
#[test]
fn test_reachable_error_has_witness() {
    let x = Symbol::bv("x", 8);
    let mut b = CfaBuilder::new();
    let (entry, exit) = b.function("main");
    let n1 = b.node("main");
    let err = b.error_node("main");
    b.havoc(entry, n1, &x);
    b.branch(n1, Formula::eq(var("x"), Formula::bv(7, 8)), err, exit);

    let mut cegar = CegarAlgorithm::new(cpa(b.build("main").unwrap(), &PredicateConfig::default()));
    let verdict = cegar.run(Precision::default());
    let Verdict::Unsafe(info) = verdict else {
        panic!("expected a counterexample, got {}", verdict);
    };
    let witness = info.witness.as_ref().expect("model of the shape variable = constant");
    let value = witness.get(&Symbol::bv("x@2", 8)).and_then(|c| c.as_bv()).map(|(v, _)| v.clone());
    assert_eq!(value, Some(7u32.into()));
}
