//! Path formulas: symbolic execution of edge sequences in SSA form.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use crate::cfa::{CfaEdge, EdgeKind};
use crate::config::LemmaMode;
use crate::error::{CpaError, CpaResult};
use crate::formula::ssa::{instantiate, versioned, SsaMap};
use crate::formula::{Formula, Sort, Symbol};
use crate::lemma::{apply_lemmas, select_facts, LemmaPrecision, LemmaSet};

/// A formula over versioned variables with the versions it was built with.
///
/// Every free variable `x@i` of `formula` that belongs to a program variable
/// tracked in `ssa` carries the version recorded there when the formula was
/// extended last.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathFormula {
    formula: Formula,
    ssa: SsaMap,
    length: usize,
}

impl PathFormula {
    pub fn new(formula: Formula, ssa: SsaMap, length: usize) -> Self {
        Self { formula, ssa, length }
    }

    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    pub fn ssa(&self) -> &SsaMap {
        &self.ssa
    }

    /// Number of edges encoded.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn is_true(&self) -> bool {
        self.formula.is_true()
    }
}

impl Display for PathFormula {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{} edges]", self.formula, self.length)
    }
}

pub trait PathFormulaManager {
    fn empty(&self) -> PathFormula {
        self.empty_with(SsaMap::new())
    }

    /// `true`, continuing the versions of `ssa`.
    fn empty_with(&self, ssa: SsaMap) -> PathFormula;

    fn make_and_edge(&self, pf: &PathFormula, edge: &CfaEdge, lemmas: &LemmaPrecision) -> CpaResult<PathFormula>;

    /// Conjoins a program-vocabulary formula, instantiated at the current versions.
    fn make_and(&self, pf: &PathFormula, f: &Formula) -> PathFormula;

    fn make_or(&self, a: &PathFormula, b: &PathFormula) -> PathFormula;
}

pub struct SsaPathFormulaManager {
    lemmas: Rc<LemmaSet>,
    mode: LemmaMode,
    depth: usize,
}

impl SsaPathFormulaManager {
    pub fn new(lemmas: Rc<LemmaSet>, mode: LemmaMode, depth: usize) -> Self {
        Self { lemmas, mode, depth }
    }

    pub fn lemmas(&self) -> &LemmaSet {
        &self.lemmas
    }

    /// Calls without a lemma stay uninterpreted; calls of a lemma must match its signature.
    fn check_calls(&self, f: &Formula, edge: &CfaEdge) -> CpaResult<()> {
        for call in f.calls() {
            let Some((name, sort, args)) = call.as_call() else {
                continue;
            };
            if let Some(lemma) = self.lemmas.get(name) {
                if lemma.sort() != sort || lemma.instantiate(args).is_none() {
                    return Err(CpaError::transfer(edge, format!("ill-typed call {}", call)));
                }
            }
        }
        Ok(())
    }

    /// Instantiates an edge expression and resolves its active lemma calls.
    fn expression(&self, f: &Formula, ssa: &SsaMap, edge: &CfaEdge, lemmas: &LemmaPrecision) -> CpaResult<Formula> {
        f.check_sorts().map_err(|e| CpaError::transfer(edge, e))?;
        self.check_calls(f, edge)?;
        let f = instantiate(f, ssa);
        Ok(match self.mode {
            LemmaMode::Inline => apply_lemmas(&f, &self.lemmas, lemmas, self.depth),
            LemmaMode::Assert => f,
        })
    }

    /// Facts for the active calls of `f` in assert mode.
    fn facts(&self, f: &Formula, lemmas: &LemmaPrecision) -> Vec<Formula> {
        match self.mode {
            LemmaMode::Assert if !lemmas.is_empty() => select_facts(f, &self.lemmas, lemmas, self.depth),
            _ => Vec::new(),
        }
    }

    fn assignment(
        &self,
        ssa: &mut SsaMap,
        target: &Symbol,
        value: &Formula,
        edge: &CfaEdge,
        lemmas: &LemmaPrecision,
    ) -> CpaResult<Formula> {
        if target.sort() != value.sort() {
            return Err(CpaError::transfer(
                edge,
                format!("cannot assign {} to {} of sort {}", value, target, target.sort()),
            ));
        }
        let value = self.expression(value, ssa, edge, lemmas)?;
        let index = ssa.make_fresh(target);
        Ok(Formula::eq(Formula::var(versioned(target, index)), value))
    }
}

impl PathFormulaManager for SsaPathFormulaManager {
    fn empty_with(&self, ssa: SsaMap) -> PathFormula {
        PathFormula::new(Formula::tt(), ssa, 0)
    }

    fn make_and_edge(&self, pf: &PathFormula, edge: &CfaEdge, lemmas: &LemmaPrecision) -> CpaResult<PathFormula> {
        let mut ssa = pf.ssa.clone();
        let encoded = match &edge.kind {
            EdgeKind::Blank | EdgeKind::Return { assign: None, .. } => Formula::tt(),
            EdgeKind::Assume { condition, truth } => {
                if condition.sort() != Sort::Bool {
                    return Err(CpaError::transfer(edge, format!("condition {} is not boolean", condition)));
                }
                let c = self.expression(condition, &ssa, edge, lemmas)?;
                if *truth {
                    c
                } else {
                    Formula::not(c)
                }
            }
            EdgeKind::Assign { target, value } => self.assignment(&mut ssa, target, value, edge, lemmas)?,
            EdgeKind::Return {
                assign: Some((target, value)),
                ..
            } => self.assignment(&mut ssa, target, value, edge, lemmas)?,
            EdgeKind::Havoc(target) => {
                ssa.make_fresh(target);
                Formula::tt()
            }
            EdgeKind::Call { args, .. } => {
                // Actuals are read before any formal is written.
                let mut values = Vec::with_capacity(args.len());
                for (formal, actual) in args {
                    if formal.sort() != actual.sort() {
                        return Err(CpaError::transfer(edge, format!("cannot pass {} as {}", actual, formal)));
                    }
                    values.push(self.expression(actual, &ssa, edge, lemmas)?);
                }
                let mut parts = Vec::with_capacity(args.len());
                for ((formal, _), value) in args.iter().zip(values) {
                    let index = ssa.make_fresh(formal);
                    parts.push(Formula::eq(Formula::var(versioned(formal, index)), value));
                }
                Formula::and(parts)
            }
        };
        let facts = self.facts(&encoded, lemmas);
        let formula = Formula::and([pf.formula.clone(), encoded].into_iter().chain(facts));
        Ok(PathFormula::new(formula, ssa, pf.length + 1))
    }

    fn make_and(&self, pf: &PathFormula, f: &Formula) -> PathFormula {
        let f = instantiate(f, &pf.ssa);
        PathFormula::new(Formula::and([pf.formula.clone(), f]), pf.ssa.clone(), pf.length)
    }

    /// Disjunction; each side is padded with `x@max = x@i` for every
    /// variable whose version is lower on that side.
    fn make_or(&self, a: &PathFormula, b: &PathFormula) -> PathFormula {
        let ssa = a.ssa.max_merge(&b.ssa);
        let mut pad_a = Vec::new();
        let mut pad_b = Vec::new();
        for (symbol, index) in ssa.symbols() {
            let (ia, ib) = (a.ssa.index(symbol), b.ssa.index(symbol));
            let top = Formula::var(versioned(symbol, index));
            match ia.cmp(&ib) {
                Ordering::Less => pad_a.push(Formula::eq(top, Formula::var(versioned(symbol, ia)))),
                Ordering::Greater => pad_b.push(Formula::eq(top, Formula::var(versioned(symbol, ib)))),
                Ordering::Equal => {}
            }
        }
        let left = Formula::and(std::iter::once(a.formula.clone()).chain(pad_a));
        let right = Formula::and(std::iter::once(b.formula.clone()).chain(pad_b));
        PathFormula::new(Formula::or([left, right]), ssa, a.length.max(b.length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::{Cfa, CfaBuilder};
    use crate::lemma::tests::even;

    fn x() -> Symbol {
        Symbol::bv("x", 8)
    }

    fn manager(mode: LemmaMode) -> SsaPathFormulaManager {
        let mut set = LemmaSet::new();
        set.insert(even()).unwrap();
        SsaPathFormulaManager::new(Rc::new(set), mode, 1)
    }

    fn straight_line() -> Cfa {
        let mut b = CfaBuilder::new();
        let (entry, exit) = b.function("main");
        let n1 = b.node("main");
        let n2 = b.node("main");
        b.assign(entry, n1, &x(), Formula::bv(0, 8));
        b.assign(n1, n2, &x(), Formula::bvadd(Formula::var(x()), Formula::bv(1, 8)));
        b.assume(n2, exit, Formula::eq(Formula::var(x()), Formula::bv(1, 8)), false);
        b.build("main").unwrap()
    }

    #[test]
    fn test_assignments_take_fresh_versions() {
        let cfa = straight_line();
        let fmgr = manager(LemmaMode::Assert);
        let mut pf = fmgr.empty();
        for edge in cfa.edges() {
            pf = fmgr.make_and_edge(&pf, edge, &LemmaPrecision::new()).unwrap();
        }
        assert_eq!(pf.length(), 3);
        assert_eq!(pf.ssa().index(&x()), 3);
        assert_eq!(
            pf.formula().to_string(),
            "(and (= x@2 (_ bv0 8)) (= x@3 (bvadd x@2 (_ bv1 8))) (not (= x@3 (_ bv1 8))))"
        );
    }

    #[test]
    fn test_sort_mismatch_is_transfer_failure() {
        let mut b = CfaBuilder::new();
        let (entry, exit) = b.function("main");
        b.assign(entry, exit, &x(), Formula::tt());
        let cfa = b.build("main").unwrap();
        let fmgr = manager(LemmaMode::Assert);
        let err = fmgr
            .make_and_edge(&fmgr.empty(), &cfa.edges()[0], &LemmaPrecision::new())
            .unwrap_err();
        assert!(err.is_local());
    }

    #[test]
    fn test_call_without_lemma_stays_uninterpreted() {
        let mut b = CfaBuilder::new();
        let (entry, exit) = b.function("main");
        b.assume(entry, exit, Formula::call("odd", Sort::Bool, vec![Formula::var(x())]), true);
        let cfa = b.build("main").unwrap();
        let fmgr = manager(LemmaMode::Inline);
        let pf = fmgr
            .make_and_edge(&fmgr.empty(), &cfa.edges()[0], &LemmaPrecision::with(["even"]))
            .unwrap();
        assert_eq!(pf.formula().to_string(), "(odd x@1)");
    }

    #[test]
    fn test_ill_typed_lemma_call_is_transfer_failure() {
        let mut b = CfaBuilder::new();
        let (entry, exit) = b.function("main");
        b.assume(entry, exit, Formula::call("even", Sort::Bool, vec![Formula::tt()]), true);
        let cfa = b.build("main").unwrap();
        let fmgr = manager(LemmaMode::Assert);
        let err = fmgr
            .make_and_edge(&fmgr.empty(), &cfa.edges()[0], &LemmaPrecision::new())
            .unwrap_err();
        assert!(matches!(err, CpaError::Transfer { .. }));
    }

    #[test]
    fn test_lemma_modes() {
        let mut b = CfaBuilder::new();
        let (entry, exit) = b.function("main");
        let cond = Formula::call("even", Sort::Bool, vec![Formula::var(x())]);
        b.assume(entry, exit, cond, true);
        let cfa = b.build("main").unwrap();
        let edge = &cfa.edges()[0];
        let active = LemmaPrecision::with(["even"]);

        let asserted = manager(LemmaMode::Assert);
        let pf = asserted.make_and_edge(&asserted.empty(), edge, &active).unwrap();
        // the call plus one unfolding fact per level
        assert_eq!(pf.formula().conjuncts().len(), 3);

        let inlined = manager(LemmaMode::Inline);
        let pf = inlined.make_and_edge(&inlined.empty(), edge, &active).unwrap();
        assert_eq!(pf.formula().calls().len(), 1);
        assert!(pf.formula().as_call().is_none());

        let inactive = asserted
            .make_and_edge(&asserted.empty(), edge, &LemmaPrecision::new())
            .unwrap();
        assert!(inactive.formula().as_call().is_some());
    }

    #[test]
    fn test_make_or_unifies_versions() {
        let fmgr = manager(LemmaMode::Assert);
        let mut ssa = SsaMap::new();
        ssa.set(&x(), 3);
        let a = PathFormula::new(Formula::var(Symbol::bool("a")), ssa, 1);
        let b = PathFormula::new(Formula::var(Symbol::bool("b")), SsaMap::new(), 2);
        let m = fmgr.make_or(&a, &b);
        assert_eq!(m.ssa().index(&x()), 3);
        assert_eq!(m.length(), 2);
        assert_eq!(m.formula().to_string(), "(or a (and b (= x@3 x@1)))");
    }
}
