//! Counterexample-guided refinement.
//!
//! A target path is split into blocks at its abstraction states. If the
//! conjunction of the block formulas is unsatisfiable, the sequence
//! interpolants at the block boundaries become new predicates at the
//! corresponding locations, and exploration restarts from the last
//! abstraction state before the first place whose precision grew.
//!
//! A satisfiable path is first checked against the known lemmas: if some
//! lemma, which the path does not yet interpret, makes it infeasible, the
//! needed lemmas are activated and exploration restarts from the root.
//! Otherwise the path is a real counterexample.

pub mod formulas;
pub mod interpolation;
pub mod predicates;
pub mod strategy;

use std::collections::HashSet;

use log::{debug, info, warn};

use crate::arg::{Arg, ArgId, CounterexampleInfo, PathElement};
use crate::cfa::EdgeId;
use crate::config::RefinementScope;
use crate::cpa::PredicateCpa;
use crate::error::{CpaError, CpaResult};
use crate::formula::Formula;
use crate::lemma::extract::{guard, referenced_lemmas, witness_map};
use crate::lemma::{select_facts, LemmaPrecision};
use crate::predicates::{AbstractionPredicate, Precision, PredicatePrecision};
use crate::solver::Model;
use crate::stats::{add, inc};

use self::formulas::{abstraction_points, block_formulas};
use self::interpolation::{check_path, Feasibility};
use self::predicates::extract_predicates;
use self::strategy::{restart_point, update_precision};

#[derive(Debug, Clone)]
pub enum RefinementResult {
    /// The path is infeasible; continue with `precision` from `pivot`.
    Spurious { precision: Precision, pivot: ArgId },
    Counterexample(CounterexampleInfo),
}

#[derive(Debug, Default)]
pub struct PredicateRefiner {
    /// Edge sequences of the spurious paths refined so far.
    seen: HashSet<Vec<EdgeId>>,
}

impl PredicateRefiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the paths to `target`. After merges the graph holds several
    /// paths to one target: the first feasible one is the counterexample,
    /// and if all are spurious the precision grows from all of them.
    pub fn refine(
        &mut self,
        cpa: &PredicateCpa,
        arg: &Arg,
        target: ArgId,
        precision: &Precision,
    ) -> CpaResult<RefinementResult> {
        let paths = arg.flattened_paths(target, MAX_PATHS);
        let root = paths
            .first()
            .and_then(|path| path.first())
            .map_or(target, |e| e.outer);

        let mut spurious = Vec::with_capacity(paths.len());
        for path in paths {
            let edges: Vec<EdgeId> = path.iter().filter_map(|e| e.edge).collect();
            let points = abstraction_points(&path);
            let blocks = block_formulas(cpa, &path, &points, &precision.lemmas)?;
            debug!("Checking path of {} edges split into {} blocks", edges.len(), blocks.len());

            match check_path(cpa.solver.as_ref(), &blocks)? {
                Feasibility::Spurious(interpolants) => spurious.push(SpuriousPath {
                    path,
                    edges,
                    points,
                    interpolants,
                }),
                Feasibility::Feasible(model) => {
                    if let Some(lemmas) = self.refine_lemmas(cpa, &blocks, &precision.lemmas)? {
                        inc(&cpa.stats.lemma_refinements);
                        info!("Path is infeasible under lemmas {:?}", lemmas.iter().collect::<Vec<_>>());
                        return Ok(RefinementResult::Spurious {
                            precision: Precision::new(precision.predicates.clone(), lemmas),
                            pivot: root,
                        });
                    }
                    let witness = witness_map(&model.to_formula()).map(|values| {
                        let mut witness = Model::new();
                        for (symbol, value) in values {
                            witness.insert(symbol, value);
                        }
                        witness
                    });
                    info!("Path of {} edges is feasible", edges.len());
                    return Ok(RefinementResult::Counterexample(CounterexampleInfo {
                        path,
                        edges,
                        model,
                        witness,
                    }));
                }
            }
        }

        inc(&cpa.stats.refinements);
        let mut repeated = true;
        for path in &spurious {
            repeated &= !self.seen.insert(path.edges.clone());
        }
        let config = &cpa.config;
        let mut per_path = Vec::with_capacity(spurious.len());
        for path in &spurious {
            let mut per_point = Vec::with_capacity(path.interpolants.len());
            for itp in &path.interpolants {
                per_point.push(extract_predicates(
                    cpa.solver.as_ref(),
                    &cpa.pmgr,
                    itp,
                    config.atomize_interpolants,
                    config.split_equalities,
                )?);
            }
            per_path.push(per_point);
        }

        let base = &precision.predicates;
        let mut update = grow(cpa, base, &spurious, &per_path, config.refinement_scope);
        if update.pivots.is_empty() && config.refinement_scope != RefinementScope::Global {
            inc(&cpa.stats.scope_fallbacks);
            debug!("No new predicates at {:?} scope, adding them globally", config.refinement_scope);
            update = grow(cpa, base, &spurious, &per_path, RefinementScope::Global);
        }

        if update.pivots.is_empty() {
            if repeated && !config.aggressive_caching {
                let path = spurious
                    .first()
                    .map(|p| {
                        p.edges
                            .iter()
                            .map(|&e| cpa.cfa.edge(e).to_string())
                            .collect::<Vec<_>>()
                            .join("; ")
                    })
                    .unwrap_or_default();
                return Err(CpaError::NonConvergence { path });
            }
            warn!("Refinement found no new predicates, restarting from the root");
            return Ok(RefinementResult::Spurious {
                precision: precision.clone(),
                pivot: root,
            });
        }

        let added = update.predicates.all_predicates().len() - base.all_predicates().len();
        add(&cpa.stats.predicates_added, added);
        let pivot = match update.pivots.as_slice() {
            [first, rest @ ..] if rest.iter().all(|p| p == first) => *first,
            _ => root,
        };
        debug!(
            "Refinement {} grew the precision along {} of {} paths, restarting at {}",
            cpa.stats.refinements.get(),
            update.pivots.len(),
            spurious.len(),
            pivot
        );
        Ok(RefinementResult::Spurious {
            precision: Precision::new(update.predicates, precision.lemmas.clone()),
            pivot,
        })
    }

    /// Lemmas that make a feasible path infeasible, added to `active`.
    ///
    /// Every inactive lemma gets a guard literal implying its facts along the
    /// path. The guards needed for unsatisfiability are minimized by deletion.
    fn refine_lemmas(
        &self,
        cpa: &PredicateCpa,
        blocks: &[Formula],
        active: &LemmaPrecision,
    ) -> CpaResult<Option<LemmaPrecision>> {
        let path_formula = Formula::and(blocks.iter().cloned());
        let mut guards = Vec::new();
        let mut guarded = Vec::new();
        for id in cpa.lemmas.ids().filter(|id| !active.is_active(id)) {
            let only = LemmaPrecision::with([&**id]);
            let facts = select_facts(&path_formula, &cpa.lemmas, &only, cpa.config.lemma_depth);
            if facts.is_empty() {
                continue;
            }
            let g = Formula::var(guard(id));
            guarded.push(Formula::implies(g.clone(), Formula::and(facts)));
            guards.push(g);
        }
        if guards.is_empty() {
            return Ok(None);
        }

        let query = Formula::and(std::iter::once(path_formula).chain(guarded));
        if !cpa.solver.is_unsat_assuming(&query, &guards)? {
            return Ok(None);
        }
        let mut needed = guards;
        let mut i = 0;
        while i < needed.len() {
            let mut without = needed.clone();
            without.remove(i);
            if cpa.solver.is_unsat_assuming(&query, &without)? {
                needed = without;
            } else {
                i += 1;
            }
        }

        let mut lemmas = active.clone();
        for id in referenced_lemmas(&Formula::and(needed)) {
            lemmas.add(&id);
        }
        Ok(Some(lemmas))
    }
}

/// Paths through merged states checked per refinement.
const MAX_PATHS: usize = 64;

struct SpuriousPath {
    path: Vec<PathElement>,
    edges: Vec<EdgeId>,
    points: Vec<usize>,
    interpolants: Vec<Formula>,
}

struct Growth {
    predicates: PredicatePrecision,
    /// Restart points of the paths that added predicates.
    pivots: Vec<ArgId>,
}

fn grow(
    cpa: &PredicateCpa,
    base: &PredicatePrecision,
    paths: &[SpuriousPath],
    per_path: &[Vec<Vec<AbstractionPredicate>>],
    scope: RefinementScope,
) -> Growth {
    let mut predicates = base.clone();
    let mut pivots = Vec::new();
    for (path, per_point) in paths.iter().zip(per_path) {
        let update = update_precision(&cpa.cfa, &predicates, &path.path, &path.points, per_point, scope);
        if update.is_progress() {
            pivots.push(restart_point(&path.path, &path.points, update.changed[0]));
            predicates = update.predicates;
        }
    }
    Growth { predicates, pivots }
}
