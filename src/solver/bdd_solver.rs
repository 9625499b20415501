//! Reference solver deciding bit-vector formulas by bit-blasting into BDDs.
//!
//! Interpolants are projections: the backward direction computes
//! `I_i = ¬∃(V(suffix) \ V(prefix)). suffix`, the forward direction
//! `I_{i+1} = ∃(V \ V(suffix)). (I_i ∧ F_i)`. Both are sequence interpolants
//! over the shared vocabulary.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, trace};
use num_bigint::BigUint;

use crate::config::InterpolationDirection;
use crate::formula::{Constant, Formula, Sort};
use crate::region::Ref;
use crate::shutdown::ShutdownNotifier;

use super::bitblast::{BitBlaster, EncodingContext};
use super::{Model, Solver, SolverResult, SolverStatistics};

pub struct BddSolver {
    blaster: RefCell<BitBlaster>,
    shutdown: ShutdownNotifier,
    direction: InterpolationDirection,
    stats: Cell<SolverStatistics>,
}

impl BddSolver {
    pub fn new(shutdown: ShutdownNotifier) -> Self {
        Self {
            blaster: RefCell::new(BitBlaster::new()),
            shutdown,
            direction: InterpolationDirection::Backward,
            stats: Cell::new(SolverStatistics::default()),
        }
    }

    pub fn with_direction(mut self, direction: InterpolationDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn direction(&self) -> InterpolationDirection {
        self.direction
    }

    fn bump(&self, update: impl FnOnce(&mut SolverStatistics)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }

    /// Encodes `f` together with the functional consistency of its calls.
    fn encode_closed(&self, f: &Formula) -> SolverResult<Ref> {
        let mut blaster = self.blaster.borrow_mut();
        let mut ctx = EncodingContext::default();
        let r = blaster.encode(f, &mut ctx)?;
        let ack = blaster.ackermann(&ctx.calls);
        Ok(blaster.bdd().apply_and(r, ack))
    }

    /// Encodes a sequence of partitions; each call pair constraint lands in
    /// the later of the two partitions it mentions.
    fn encode_partitions(&self, formulas: &[Formula]) -> SolverResult<Vec<Ref>> {
        let mut blaster = self.blaster.borrow_mut();
        let mut contexts: Vec<EncodingContext> = Vec::with_capacity(formulas.len());
        let mut parts = Vec::with_capacity(formulas.len());
        for f in formulas {
            self.shutdown.check()?;
            let mut ctx = EncodingContext::default();
            let r = blaster.encode(f, &mut ctx)?;
            let mut r = blaster.bdd().apply_and(r, blaster.ackermann(&ctx.calls));
            for earlier in &contexts {
                let ack = blaster.ackermann_between(&earlier.calls, &ctx.calls);
                r = blaster.bdd().apply_and(r, ack);
            }
            contexts.push(ctx);
            parts.push(r);
        }
        Ok(parts)
    }

    fn backward_interpolants(&self, parts: &[Ref]) -> SolverResult<Vec<Formula>> {
        let blaster = self.blaster.borrow();
        let bdd = blaster.bdd();
        let n = parts.len();

        let mut prefix_vars = vec![BTreeSet::new(); n];
        for i in 1..n {
            let mut vars = prefix_vars[i - 1].clone();
            vars.extend(bdd.support(parts[i - 1]));
            prefix_vars[i] = vars;
        }

        let mut result = vec![Formula::tt(); n.saturating_sub(1)];
        let mut suffix = bdd.one();
        for i in (1..n).rev() {
            self.shutdown.check()?;
            suffix = bdd.apply_and(suffix, parts[i]);
            let local: BTreeSet<u32> = bdd.support(suffix).difference(&prefix_vars[i]).copied().collect();
            let itp = -bdd.exists(suffix, &local);
            result[i - 1] = blaster.to_formula(itp);
        }
        Ok(result)
    }

    fn forward_interpolants(&self, parts: &[Ref]) -> SolverResult<Vec<Formula>> {
        let blaster = self.blaster.borrow();
        let bdd = blaster.bdd();
        let n = parts.len();

        let mut suffix_vars = vec![BTreeSet::new(); n + 1];
        for i in (0..n).rev() {
            let mut vars = suffix_vars[i + 1].clone();
            vars.extend(bdd.support(parts[i]));
            suffix_vars[i] = vars;
        }

        let mut result = Vec::with_capacity(n.saturating_sub(1));
        let mut current = bdd.one();
        for i in 0..n.saturating_sub(1) {
            self.shutdown.check()?;
            current = bdd.apply_and(current, parts[i]);
            let local: BTreeSet<u32> = bdd.support(current).difference(&suffix_vars[i + 1]).copied().collect();
            current = bdd.exists(current, &local);
            result.push(blaster.to_formula(current));
        }
        Ok(result)
    }
}

impl Solver for BddSolver {
    fn is_unsat(&self, f: &Formula) -> SolverResult<bool> {
        self.shutdown.check()?;
        self.bump(|s| s.sat_checks += 1);
        let r = self.encode_closed(f)?;
        let unsat = self.blaster.borrow().bdd().is_zero(r);
        trace!("is_unsat({}) = {}", f, unsat);
        Ok(unsat)
    }

    fn model(&self, f: &Formula) -> SolverResult<Option<Model>> {
        self.shutdown.check()?;
        self.bump(|s| s.models += 1);
        let r = self.encode_closed(f)?;
        let blaster = self.blaster.borrow();
        let Some(literals) = blaster.bdd().one_sat(r) else {
            return Ok(None);
        };
        let assignment: HashMap<u32, bool> = literals.iter().map(|&l| (l.unsigned_abs(), l > 0)).collect();

        let mut model = Model::new();
        for symbol in f.free_symbols() {
            let Some(bits) = blaster.existing_symbol_bits(&symbol) else {
                continue;
            };
            let value_of = |v: &u32| assignment.get(v).copied().unwrap_or(false);
            let value = match symbol.sort() {
                Sort::Bool => Constant::Bool(bits.first().map_or(false, value_of)),
                Sort::BitVec(width) => {
                    let mut value = BigUint::default();
                    for (i, v) in bits.iter().enumerate() {
                        if value_of(v) {
                            value.set_bit(i as u64, true);
                        }
                    }
                    Constant::bv(value, width)
                }
            };
            model.insert(symbol, value);
        }
        Ok(Some(model))
    }

    fn interpolate(&self, formulas: &[Formula]) -> SolverResult<Option<Vec<Formula>>> {
        self.shutdown.check()?;
        self.bump(|s| s.interpolations += 1);
        let parts = self.encode_partitions(formulas)?;
        let conjunction = {
            let blaster = self.blaster.borrow();
            blaster.bdd().and_many(parts.iter().copied())
        };
        if !self.blaster.borrow().bdd().is_zero(conjunction) {
            debug!("Interpolation query over {} formulas is satisfiable", formulas.len());
            return Ok(None);
        }
        let interpolants = match self.direction {
            InterpolationDirection::Backward => self.backward_interpolants(&parts)?,
            InterpolationDirection::Forward => self.forward_interpolants(&parts)?,
        };
        debug!("Computed {} interpolants", interpolants.len());
        Ok(Some(interpolants))
    }

    fn all_sat(&self, f: &Formula, atoms: &[Formula]) -> SolverResult<Vec<Vec<(usize, bool)>>> {
        self.shutdown.check()?;
        self.bump(|s| s.all_sat_calls += 1);
        let mut blaster = self.blaster.borrow_mut();
        let mut ctx = EncodingContext::default();
        let mut r = blaster.encode(f, &mut ctx)?;

        let mut selectors = BTreeMap::new();
        for (i, atom) in atoms.iter().enumerate() {
            self.shutdown.check()?;
            let a = blaster.encode(atom, &mut ctx)?;
            let v = blaster.bdd().new_var();
            selectors.insert(v, i);
            let def = blaster.bdd().apply_eq(blaster.bdd().mk_var(v), a);
            r = blaster.bdd().apply_and(r, def);
        }
        let ack = blaster.ackermann(&ctx.calls);
        let bdd = blaster.bdd();
        r = bdd.apply_and(r, ack);

        let others: BTreeSet<u32> = bdd.support(r).into_iter().filter(|v| !selectors.contains_key(v)).collect();
        let projected = bdd.exists(r, &others);
        let cubes = bdd
            .cubes(projected)
            .into_iter()
            .map(|cube| {
                cube.into_iter()
                    .filter_map(|lit| selectors.get(&lit.unsigned_abs()).map(|&i| (i, lit > 0)))
                    .collect()
            })
            .collect();
        Ok(cubes)
    }

    fn eliminate_quantifiers(&self, f: &Formula) -> SolverResult<Formula> {
        if !f.has_quantifier() {
            return Ok(f.clone());
        }
        self.shutdown.check()?;
        self.bump(|s| s.quantifier_eliminations += 1);
        let mut blaster = self.blaster.borrow_mut();
        let mut ctx = EncodingContext::default();
        let r = blaster.encode(f, &mut ctx)?;
        Ok(blaster.to_formula(r))
    }

    fn shutdown_notifier(&self) -> &ShutdownNotifier {
        &self.shutdown
    }

    fn statistics(&self) -> SolverStatistics {
        self.stats.get()
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::error::SolverError;
    use crate::formula::Symbol;

    fn var(name: &str) -> Formula {
        Formula::var(Symbol::bv(name, 8))
    }

    fn solver() -> BddSolver {
        BddSolver::new(ShutdownNotifier::new())
    }

    #[test]
    fn test_sat_and_model() {
        let solver = solver();
        let f = Formula::and([
            Formula::eq(var("x"), Formula::bvadd(var("y"), Formula::bv(1, 8))),
            Formula::eq(var("y"), Formula::bv(41, 8)),
        ]);
        assert!(solver.is_sat(&f).unwrap());
        let model = solver.model(&f).unwrap().unwrap();
        assert_eq!(model.get(&Symbol::bv("x", 8)), Some(&Constant::bv(42u32, 8)));
        assert_eq!(f.eval(model.values()), Some(Constant::Bool(true)));
    }

    #[test]
    fn test_implies() {
        let solver = solver();
        let a = Formula::ult(var("x"), Formula::bv(3, 8));
        let b = Formula::ule(var("x"), Formula::bv(5, 8));
        assert!(solver.implies(&a, &b).unwrap());
        assert!(!solver.implies(&b, &a).unwrap());
    }

    #[test]
    fn test_interpolants_are_sequence_interpolants() {
        for direction in [InterpolationDirection::Backward, InterpolationDirection::Forward] {
            let solver = solver().with_direction(direction);
            let formulas = vec![
                Formula::eq(var("x@1"), Formula::bv(0, 8)),
                Formula::eq(var("x@2"), Formula::bvadd(var("x@1"), Formula::bv(1, 8))),
                Formula::eq(var("x@2"), Formula::bv(5, 8)),
            ];
            let itps = solver.interpolate(&formulas).unwrap().unwrap();
            assert_eq!(itps.len(), 2);
            assert!(solver.implies(&formulas[0], &itps[0]).unwrap());
            let step = Formula::and([itps[0].clone(), formulas[1].clone()]);
            assert!(solver.implies(&step, &itps[1]).unwrap());
            let last = Formula::and([itps[1].clone(), formulas[2].clone()]);
            assert!(solver.is_unsat(&last).unwrap());
            assert!(itps[0].free_symbols().iter().all(|s| s.name() == "x@1"));
            assert!(itps[1].free_symbols().iter().all(|s| s.name() == "x@2"));
        }
    }

    #[test]
    fn test_interpolate_satisfiable() {
        let solver = solver();
        let formulas = vec![
            Formula::eq(var("x"), Formula::bv(0, 8)),
            Formula::ult(var("x"), Formula::bv(2, 8)),
        ];
        assert_eq!(solver.interpolate(&formulas).unwrap(), None);
    }

    #[test]
    fn test_all_sat() {
        let solver = solver();
        let f = Formula::ult(var("x"), Formula::bv(2, 8));
        let atoms = vec![
            Formula::eq(var("x"), Formula::bv(0, 8)),
            Formula::eq(var("x"), Formula::bv(5, 8)),
        ];
        // x = 0 or x = 1: the first atom is unconstrained, the second false
        let cubes = solver.all_sat(&f, &atoms).unwrap();
        assert_eq!(cubes, vec![vec![(1, false)]]);
        let unsat = Formula::eq(var("x"), Formula::bv(9, 8));
        assert_eq!(solver.all_sat(&Formula::and([f, unsat]), &atoms).unwrap(), Vec::<Vec<(usize, bool)>>::new());
    }

    #[test]
    fn test_quantifier_elimination() {
        let solver = solver();
        let y = Symbol::bv("y", 8);
        let f = Formula::exists(
            vec![y.clone()],
            Formula::and([
                Formula::eq(var("x"), Formula::var(y.clone())),
                Formula::eq(Formula::var(y), Formula::bv(7, 8)),
            ]),
        );
        let g = solver.eliminate_quantifiers(&f).unwrap();
        assert!(!g.has_quantifier());
        assert_eq!(g, Formula::eq(var("x"), Formula::bv(7, 8)));
    }

    #[test]
    fn test_interrupted() {
        let notifier = ShutdownNotifier::new();
        let solver = BddSolver::new(notifier.clone());
        notifier.request_shutdown();
        assert_eq!(solver.is_unsat(&Formula::tt()), Err(SolverError::Interrupted));
    }
}
