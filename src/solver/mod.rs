//! Solver abstraction.
//!
//! Every query is a potential long-running call and the only place where the
//! analysis observes the [`ShutdownNotifier`]. Implementations report
//! interruption as [`SolverError::Interrupted`]; callers never retry.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use crate::error::SolverError;
use crate::formula::simplify::simplify;
use crate::formula::{Constant, Formula, Symbol};
use crate::shutdown::ShutdownNotifier;

pub mod bdd_solver;
mod bitblast;

pub use self::bdd_solver::BddSolver;

pub type SolverResult<T> = Result<T, SolverError>;

/// Satisfying assignment of the free variables of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    values: BTreeMap<Symbol, Constant>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: Symbol, value: Constant) {
        self.values.insert(symbol, value);
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&Constant> {
        self.values.get(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &Constant)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &BTreeMap<Symbol, Constant> {
        &self.values
    }

    /// The model as a conjunction of `symbol = value` equalities.
    pub fn to_formula(&self) -> Formula {
        Formula::and(
            self.values
                .iter()
                .map(|(s, c)| Formula::eq(Formula::var(s.clone()), Formula::constant(c.clone()))),
        )
    }
}

impl Display for Model {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, (s, c)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match c.as_bv() {
                Some((value, _)) => write!(f, "{} = {}", s, value)?,
                None => write!(f, "{} = {}", s, c)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SolverStatistics {
    pub sat_checks: usize,
    pub models: usize,
    pub interpolations: usize,
    pub all_sat_calls: usize,
    pub quantifier_eliminations: usize,
}

impl SolverStatistics {
    pub fn total(&self) -> usize {
        self.sat_checks + self.models + self.interpolations + self.all_sat_calls + self.quantifier_eliminations
    }
}

pub trait Solver {
    fn is_unsat(&self, f: &Formula) -> SolverResult<bool>;

    fn is_sat(&self, f: &Formula) -> SolverResult<bool> {
        Ok(!self.is_unsat(f)?)
    }

    /// Whether `a ⇒ b` is valid.
    fn implies(&self, a: &Formula, b: &Formula) -> SolverResult<bool> {
        self.is_unsat(&Formula::and([a.clone(), Formula::not(b.clone())]))
    }

    fn is_unsat_assuming(&self, f: &Formula, assumptions: &[Formula]) -> SolverResult<bool> {
        self.is_unsat(&Formula::and(std::iter::once(f.clone()).chain(assumptions.iter().cloned())))
    }

    fn model(&self, f: &Formula) -> SolverResult<Option<Model>>;

    /// Sequence interpolants for an unsatisfiable conjunction.
    ///
    /// For `n` formulas returns `n - 1` interpolants `I_1..I_{n-1}` such that
    /// `F_0 ⇒ I_1`, `I_i ∧ F_i ⇒ I_{i+1}` and `I_{n-1} ∧ F_{n-1}` is
    /// unsatisfiable, each over the shared vocabulary of its prefix and
    /// suffix. Returns `None` when the conjunction is satisfiable.
    fn interpolate(&self, formulas: &[Formula]) -> SolverResult<Option<Vec<Formula>>>;

    /// Interpolant between `a` and `b`.
    fn interpolate_pair(&self, a: &Formula, b: &Formula) -> SolverResult<Option<Formula>> {
        Ok(self
            .interpolate(&[a.clone(), b.clone()])?
            .and_then(|mut itps| itps.pop()))
    }

    /// Every satisfiable truth assignment of `atoms` under `f`, as cubes of
    /// `(atom index, value)` pairs; atoms missing from a cube are unconstrained.
    fn all_sat(&self, f: &Formula, atoms: &[Formula]) -> SolverResult<Vec<Vec<(usize, bool)>>>;

    fn simplify(&self, f: &Formula) -> SolverResult<Formula> {
        Ok(simplify(f))
    }

    fn eliminate_quantifiers(&self, f: &Formula) -> SolverResult<Formula>;

    fn shutdown_notifier(&self) -> &ShutdownNotifier;

    fn statistics(&self) -> SolverStatistics;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_to_formula() {
        let mut model = Model::new();
        model.insert(Symbol::bv("x", 8), Constant::bv(3u32, 8));
        model.insert(Symbol::bool("p"), Constant::Bool(true));
        assert_eq!(model.to_formula().to_string(), "(and (= p true) (= x (_ bv3 8)))");
        assert_eq!(model.to_string(), "p = true, x = 3");
    }
}
