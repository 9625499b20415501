//! Predicate maps and lemma files feeding into analysis runs.

use std::rc::Rc;

use test_log::test;

use predabs::algorithm::CegarAlgorithm;
use predabs::cfa::{Cfa, CfaBuilder};
use predabs::config::{AbstractionFrequency, LemmaMode, PredicateConfig};
use predabs::cpa::PredicateCpa;
use predabs::error::CpaError;
use predabs::formula::{Formula, Sort, Symbol};
use predabs::lemma::file::parse_lemma_file;
use predabs::lemma::LemmaSet;
use predabs::predicates::predmap::{parse_predicate_map, write_predicate_map};
use predabs::predicates::Precision;
use predabs::shutdown::ShutdownNotifier;
use predabs::solver::{BddSolver, Solver};

fn var(name: &str) -> Formula {
    Formula::var(Symbol::bv(name, 8))
}

fn cpa(cfa: Rc<Cfa>, config: &PredicateConfig, lemmas: LemmaSet) -> PredicateCpa {
    let solver: Rc<dyn Solver> = Rc::new(BddSolver::new(ShutdownNotifier::new()));
    PredicateCpa::new(cfa, config, solver, lemmas).unwrap()
}

/// `x := 0; y := x + 1; if (y != 1) ERROR`
fn offset() -> Cfa {
    let x = Symbol::bv("x", 8);
    let y = Symbol::bv("y", 8);
    let mut b = CfaBuilder::new();
    let (entry, exit) = b.function("main");
    let n1 = b.node("main");
    let n2 = b.node("main");
    let err = b.error_node("main");
    b.assign(entry, n1, &x, Formula::bv(0, 8));
    b.assign(n1, n2, &y, Formula::bvadd(var("x"), Formula::bv(1, 8)));
    b.branch(n2, Formula::eq(var("y"), Formula::bv(1, 8)), exit, err);
    b.build("main").unwrap()
}

#[test]
fn test_predicate_map_seeds_a_later_run() {
    let config = PredicateConfig {
        abstraction_frequency: AbstractionFrequency::EveryLocation,
        ..Default::default()
    };
    let cfa = Rc::new(offset());

    let mut first = CegarAlgorithm::new(cpa(cfa.clone(), &config, LemmaSet::new()));
    assert!(first.run(Precision::default()).is_safe());
    assert!(first.cpa().stats.refinements.get() >= 1);
    let text = write_predicate_map(&first.precision().predicates, &cfa);
    assert!(text.contains("(declare-fun"));
    assert!(text.contains("main N"));

    let second_cpa = cpa(cfa.clone(), &config, LemmaSet::new());
    let predicates = parse_predicate_map(&text, &cfa, &second_cpa.pmgr).unwrap();
    assert_eq!(predicates, first.precision().predicates);
    let mut second = CegarAlgorithm::new(second_cpa);
    assert!(second.run(Precision::new(predicates, Default::default())).is_safe());
    assert_eq!(second.cpa().stats.refinements.get(), 0);
}

const INC: &str = "
    ; successor on 8-bit values
    (lemma inc (forall ((a (_ BitVec 8))) (= (inc a) (bvadd a #x01))))
";

/// `x := *; y := inc(x); if (y == x) ERROR`
fn successor() -> Cfa {
    let x = Symbol::bv("x", 8);
    let y = Symbol::bv("y", 8);
    let mut b = CfaBuilder::new();
    let (entry, exit) = b.function("main");
    let n1 = b.node("main");
    let n2 = b.node("main");
    let err = b.error_node("main");
    b.havoc(entry, n1, &x);
    b.assign(n1, n2, &y, Formula::call("inc", Sort::BitVec(8), vec![var("x")]));
    b.branch(n2, Formula::eq(var("y"), var("x")), err, exit);
    b.build("main").unwrap()
}

#[test]
fn test_lemma_file_makes_program_safe() {
    for mode in [LemmaMode::Assert, LemmaMode::Inline] {
        let config = PredicateConfig {
            lemma_mode: mode,
            ..Default::default()
        };
        let lemmas = parse_lemma_file(INC).unwrap();
        let mut cegar = CegarAlgorithm::new(cpa(Rc::new(successor()), &config, lemmas));
        let verdict = cegar.run(Precision::default());
        assert!(verdict.is_safe(), "{:?}: {}", mode, verdict);
        assert_eq!(cegar.cpa().stats.lemma_refinements.get(), 1);
        assert!(cegar.precision().lemmas.is_active("inc"));
    }
}

#[test]
fn test_program_is_unsafe_without_lemmas() {
    let mut cegar = CegarAlgorithm::new(cpa(Rc::new(successor()), &PredicateConfig::default(), LemmaSet::new()));
    assert!(cegar.run(Precision::default()).is_unsafe());
}

#[test]
fn test_malformed_inputs_are_configuration_errors() {
    let cfa = offset();
    let pmgr = predabs::predicates::PredicateManager::new();
    let err = parse_predicate_map("main N1:\n(assert (= z #x00))", &cfa, &pmgr).unwrap_err();
    assert!(matches!(err, CpaError::Configuration(_)));
    let err = parse_lemma_file("(lemma inc (forall ((a (_ BitVec 8))) (= (dec a) a)))").unwrap_err();
    assert!(matches!(err, CpaError::Configuration(_)));
}
