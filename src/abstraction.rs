//! Predicate abstraction of path formulas.
//!
//! The abstraction of a path formula `pf` that starts in abstraction `a`
//! with predicates `P` is the strongest boolean combination of `P` implied
//! by `a ∧ pf`. Boolean abstraction computes it exactly by enumerating the
//! satisfiable predicate assignments. Cartesian abstraction only keeps the
//! predicates (or negations) implied individually. Hybrid abstraction treats
//! predicates that share no variable with another predicate cartesianly.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use log::{debug, trace};

use crate::config::AbstractionType;
use crate::domain::AbstractionFormula;
use crate::error::CpaResult;
use crate::formula::ssa::instantiate;
use crate::formula::Formula;
use crate::pathformula::PathFormula;
use crate::predicates::{AbstractionPredicate, PredicateManager};
use crate::region::cache::OpCache;
use crate::region::Region;
use crate::solver::Solver;
use crate::stats::{inc, Statistics};

type CacheKey = (Formula, PathFormula, BTreeSet<AbstractionPredicate>);

pub struct AbstractionManager {
    solver: Rc<dyn Solver>,
    pmgr: Rc<PredicateManager>,
    abstraction_type: AbstractionType,
    stats: Rc<Statistics>,
    cache: RefCell<OpCache<CacheKey, Rc<AbstractionFormula>>>,
}

impl AbstractionManager {
    pub fn new(
        solver: Rc<dyn Solver>,
        pmgr: Rc<PredicateManager>,
        abstraction_type: AbstractionType,
        stats: Rc<Statistics>,
    ) -> Self {
        Self {
            solver,
            pmgr,
            abstraction_type,
            stats,
            cache: RefCell::new(OpCache::with_capacity(256)),
        }
    }

    pub fn predicate_manager(&self) -> &Rc<PredicateManager> {
        &self.pmgr
    }

    /// Abstraction of `pf` following `last` over `predicates`.
    ///
    /// Returns the abstraction and whether it came from the cache.
    pub fn build_abstraction(
        &self,
        last: &AbstractionFormula,
        pf: &PathFormula,
        predicates: &BTreeSet<AbstractionPredicate>,
    ) -> CpaResult<(Rc<AbstractionFormula>, bool)> {
        let key = (last.instantiated().clone(), pf.clone(), predicates.clone());
        if let Some(cached) = self.cache.borrow_mut().get(&key) {
            inc(&self.stats.abstractions_cached);
            trace!("Abstraction cache hit for {}", pf);
            return Ok((cached, true));
        }

        self.solver.shutdown_notifier().check()?;
        inc(&self.stats.abstractions_computed);
        let f = Formula::and([last.instantiated().clone(), pf.formula().clone()]);
        let region = self.compute(&f, pf, predicates)?;
        if self.pmgr.bdd().is_zero(region) {
            inc(&self.stats.abstractions_false);
        }
        let formula = self.pmgr.region_to_formula(region);
        debug!(
            "Abstraction over {} predicates after {} edges: {}",
            predicates.len(),
            pf.length(),
            formula
        );
        let result = Rc::new(AbstractionFormula::new(
            self.pmgr.next_abstraction_id(),
            region,
            formula,
            pf.clone(),
        ));
        self.cache.borrow_mut().insert(key, result.clone());
        Ok((result, false))
    }

    fn compute(&self, f: &Formula, pf: &PathFormula, predicates: &BTreeSet<AbstractionPredicate>) -> CpaResult<Region> {
        let bdd = self.pmgr.bdd();
        let (fixed, open) = syntactic_split(f, pf, predicates);
        let fixed_region = bdd.and_many(fixed.iter().map(|(p, value)| {
            let r = self.pmgr.region(p);
            if *value {
                r
            } else {
                -r
            }
        }));

        let open_region = match self.abstraction_type {
            AbstractionType::Boolean => self.boolean(f, pf, &open)?,
            AbstractionType::Cartesian => self.cartesian(f, pf, &open)?,
            AbstractionType::Hybrid => {
                let (independent, dependent): (Vec<_>, Vec<_>) = open.iter().cloned().partition(|p| {
                    let vars = p.atom().free_symbols();
                    !predicates
                        .iter()
                        .any(|q| q != p && !q.atom().free_symbols().is_disjoint(&vars))
                });
                let cartesian = self.cartesian(f, pf, &independent)?;
                if bdd.is_zero(cartesian) || dependent.is_empty() {
                    cartesian
                } else {
                    bdd.apply_and(cartesian, self.boolean(f, pf, &dependent)?)
                }
            }
        };
        Ok(bdd.apply_and(fixed_region, open_region))
    }

    fn boolean(&self, f: &Formula, pf: &PathFormula, predicates: &[AbstractionPredicate]) -> CpaResult<Region> {
        let bdd = self.pmgr.bdd();
        let atoms: Vec<Formula> = predicates.iter().map(|p| instantiate(p.atom(), pf.ssa())).collect();
        inc(&self.stats.abstraction_solver_calls);
        let cubes = self.solver.all_sat(f, &atoms)?;
        Ok(bdd.or_many(cubes.into_iter().map(|cube| {
            bdd.and_many(cube.into_iter().map(|(i, value)| {
                let r = self.pmgr.region(&predicates[i]);
                if value {
                    r
                } else {
                    -r
                }
            }))
        })))
    }

    fn cartesian(&self, f: &Formula, pf: &PathFormula, predicates: &[AbstractionPredicate]) -> CpaResult<Region> {
        let bdd = self.pmgr.bdd();
        inc(&self.stats.abstraction_solver_calls);
        if self.solver.is_unsat(f)? {
            return Ok(bdd.zero());
        }
        let mut region = bdd.one();
        for p in predicates {
            let atom = instantiate(p.atom(), pf.ssa());
            inc(&self.stats.abstraction_solver_calls);
            if self.solver.implies(f, &atom)? {
                region = bdd.apply_and(region, self.pmgr.region(p));
                continue;
            }
            inc(&self.stats.abstraction_solver_calls);
            if self.solver.implies(f, &Formula::not(atom))? {
                region = bdd.apply_and(region, -self.pmgr.region(p));
            }
        }
        Ok(region)
    }

    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }
}

/// Splits predicates into those whose value is fixed by a top-level
/// conjunct of `f` and the rest.
fn syntactic_split(
    f: &Formula,
    pf: &PathFormula,
    predicates: &BTreeSet<AbstractionPredicate>,
) -> (Vec<(AbstractionPredicate, bool)>, Vec<AbstractionPredicate>) {
    let conjuncts = f.conjuncts();
    let mut fixed = Vec::new();
    let mut open = Vec::new();
    for p in predicates {
        if p.is_false() {
            fixed.push((p.clone(), false));
            continue;
        }
        let atom = instantiate(p.atom(), pf.ssa());
        if conjuncts.contains(&atom) {
            fixed.push((p.clone(), true));
        } else if conjuncts.contains(&Formula::not(atom)) {
            fixed.push((p.clone(), false));
        } else {
            open.push(p.clone());
        }
    }
    (fixed, open)
}
