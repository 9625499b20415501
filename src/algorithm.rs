//! Worklist exploration and the refinement loop around it.

use std::fmt::{Display, Formatter};
use std::rc::Rc;

use log::{debug, info, trace, warn};

use crate::arg::{Arg, ArgEdge, ArgId, CounterexampleInfo};
use crate::bam::BamCpa;
use crate::cfa::{EdgeKind, NodeId};
use crate::cpa::{PrecisionAdjustment, PrecisionResult, PredicateCpa, StopOperator, TransferRelation};
use crate::domain::StateRef;
use crate::error::{CpaError, CpaResult};
use crate::predicates::Precision;
use crate::refinement::{PredicateRefiner, RefinementResult};
use crate::stats::inc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachabilityResult {
    /// The waitlist ran empty.
    Complete,
    Target(ArgId),
}

/// Sequential breadth-first exploration of an [`Arg`].
pub struct ReachabilityAlgorithm<'a> {
    cpa: &'a PredicateCpa,
    bam: Option<&'a BamCpa>,
}

impl<'a> ReachabilityAlgorithm<'a> {
    pub fn new(cpa: &'a PredicateCpa, bam: Option<&'a BamCpa>) -> Self {
        Self { cpa, bam }
    }

    /// Explores until the waitlist is empty or a target is added.
    ///
    /// States at `stop_at` with an empty call stack are kept but not expanded.
    pub fn run(&self, arg: &mut Arg, stop_at: Option<NodeId>) -> CpaResult<ReachabilityResult> {
        while let Some(id) = arg.pop_waitlist() {
            self.cpa.solver.shutdown_notifier().check()?;
            inc(&self.cpa.stats.states_explored);

            let (state, call_stack, precision) = {
                let s = arg.state(id);
                (s.state.clone(), s.call_stack.clone(), s.precision.clone())
            };
            let location = state.location();
            if stop_at == Some(location) && call_stack.is_empty() && arg.root() != Some(id) {
                continue;
            }

            if let Some(bam) = self.bam {
                if arg.root() != Some(id) {
                    if let Some(block) = bam.block_at(location) {
                        let summary = bam.summarize(self.cpa, &block, &state, &precision)?;
                        for exit in summary {
                            let child = arg.add_child(
                                id,
                                ArgEdge::Summary(exit.path.clone()),
                                exit.state.clone(),
                                call_stack.clone(),
                                precision.clone(),
                            );
                            if exit.is_target {
                                arg.mark_target(child);
                                return Ok(ReachabilityResult::Target(child));
                            }
                        }
                        continue;
                    }
                }
            }

            for edge in self.cpa.cfa.leaving(location) {
                let next_stack = match &edge.kind {
                    EdgeKind::Call { return_site, .. } => {
                        let mut stack = (*call_stack).clone();
                        stack.push(*return_site);
                        Rc::new(stack)
                    }
                    EdgeKind::Return { .. } => {
                        if call_stack.last() != Some(&edge.to) {
                            continue;
                        }
                        Rc::new(call_stack[..call_stack.len() - 1].to_vec())
                    }
                    _ => call_stack.clone(),
                };

                for successor in self.cpa.transfer.successors(&state, &precision, edge)? {
                    let successor = match self.cpa.precision_adjustment.adjust(successor, &precision)? {
                        PrecisionResult::Continue(s) => s,
                        PrecisionResult::Unreachable => continue,
                    };
                    let edge = ArgEdge::Cfa(edge.id);
                    if let Some(target) = self.add_successor(arg, id, edge, successor, &next_stack, &precision)? {
                        return Ok(ReachabilityResult::Target(target));
                    }
                }
            }
        }
        Ok(ReachabilityResult::Complete)
    }

    fn add_successor(
        &self,
        arg: &mut Arg,
        parent: ArgId,
        edge: ArgEdge,
        state: StateRef,
        call_stack: &Rc<Vec<NodeId>>,
        precision: &Rc<Precision>,
    ) -> CpaResult<Option<ArgId>> {
        let location = state.location();
        if self.cpa.cfa.is_error(location) {
            if !state.is_abstraction() {
                let reach = crate::formula::Formula::and([
                    state.abstraction_formula().instantiated().clone(),
                    state.path_formula().formula().clone(),
                ]);
                if self.cpa.solver.is_unsat(&reach)? {
                    trace!("Target N{} is infeasible within its block", location);
                    return Ok(None);
                }
            }
            let child = arg.add_child(parent, edge, state, call_stack.clone(), precision.clone());
            arg.mark_target(child);
            debug!("Reached target N{} as ARG state {}", location, child);
            return Ok(Some(child));
        }

        for r in arg.reached_at(location, call_stack) {
            let reached = arg.state(r).state.clone();
            if let Some(merged) = self.cpa.merge.merge(&state, &reached, precision)? {
                if !Rc::ptr_eq(&merged, &reached) {
                    inc(&self.cpa.stats.states_merged);
                    arg.replace_state(r, merged, Some((parent, edge.clone())));
                }
            }
        }

        let reached = arg.reached_at(location, call_stack);
        let states: Vec<StateRef> = reached.iter().map(|&r| arg.state(r).state.clone()).collect();
        let covering = self.cpa.stop.stop(&state, &states, precision)?;
        let child = arg.add_child(parent, edge, state, call_stack.clone(), precision.clone());
        if let Some(index) = covering {
            inc(&self.cpa.stats.states_covered);
            arg.set_covered(child, reached[index]);
        }
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnknownReason {
    Failure(CpaError),
    RefinementLimit(usize),
    /// Some edges could not be encoded, so the explored graph may be incomplete.
    TransferFailures(usize),
}

impl Display for UnknownReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UnknownReason::Failure(e) => write!(f, "{}", e),
            UnknownReason::RefinementLimit(n) => write!(f, "refinement limit of {} reached", n),
            UnknownReason::TransferFailures(n) => write!(f, "{} edges could not be encoded", n),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Verdict {
    Safe,
    Unsafe(Box<CounterexampleInfo>),
    Unknown(UnknownReason),
}

impl Verdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, Verdict::Safe)
    }

    pub fn is_unsafe(&self) -> bool {
        matches!(self, Verdict::Unsafe(_))
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Safe => write!(f, "SAFE"),
            Verdict::Unsafe(_) => write!(f, "UNSAFE"),
            Verdict::Unknown(reason) => write!(f, "UNKNOWN ({})", reason),
        }
    }
}

/// Alternates exploration and refinement until a verdict is reached.
pub struct CegarAlgorithm {
    cpa: PredicateCpa,
    bam: Option<BamCpa>,
    refiner: PredicateRefiner,
    arg: Arg,
    precision: Rc<Precision>,
}

impl CegarAlgorithm {
    pub fn new(cpa: PredicateCpa) -> Self {
        let bam = cpa.blocks.clone().map(|blocks| BamCpa::new(blocks, &cpa));
        Self {
            cpa,
            bam,
            refiner: PredicateRefiner::new(),
            arg: Arg::new(),
            precision: Rc::default(),
        }
    }

    pub fn cpa(&self) -> &PredicateCpa {
        &self.cpa
    }

    pub fn bam(&self) -> Option<&BamCpa> {
        self.bam.as_ref()
    }

    pub fn arg(&self) -> &Arg {
        &self.arg
    }

    /// The precision reached by the last run.
    pub fn precision(&self) -> &Precision {
        &self.precision
    }

    /// Runs the analysis from the program entry. Failures become an unknown verdict.
    pub fn run(&mut self, initial: Precision) -> Verdict {
        match self.run_inner(initial) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Analysis stopped: {}", e);
                Verdict::Unknown(UnknownReason::Failure(e))
            }
        }
    }

    fn run_inner(&mut self, initial: Precision) -> CpaResult<Verdict> {
        self.precision = Rc::new(initial);
        self.arg = Arg::new();
        self.arg
            .add_root(self.cpa.initial_state(), Rc::default(), self.precision.clone());

        let mut refinements = 0;
        loop {
            let reachability = ReachabilityAlgorithm::new(&self.cpa, self.bam.as_ref());
            let target = match reachability.run(&mut self.arg, None)? {
                ReachabilityResult::Complete => {
                    let failures = self.cpa.stats.transfer_failures.get();
                    if failures > 0 {
                        return Ok(Verdict::Unknown(UnknownReason::TransferFailures(failures)));
                    }
                    info!("Program is safe after {} refinements", refinements);
                    return Ok(Verdict::Safe);
                }
                ReachabilityResult::Target(target) => target,
            };

            match self.refiner.refine(&self.cpa, &self.arg, target, &self.precision)? {
                RefinementResult::Counterexample(info) => {
                    info!("Found a feasible counterexample of {} edges", info.edges.len());
                    self.arg.attach_counterexample(info.clone());
                    return Ok(Verdict::Unsafe(Box::new(info)));
                }
                RefinementResult::Spurious { precision, pivot } => {
                    if let Some(limit) = self.cpa.config.max_refinements {
                        if refinements >= limit {
                            return Ok(Verdict::Unknown(UnknownReason::RefinementLimit(limit)));
                        }
                    }
                    refinements += 1;
                    self.precision = Rc::new(precision);
                    if let Some(bam) = &self.bam {
                        bam.clear_cache();
                    }
                    debug!("Restarting exploration at ARG state {}", pivot);
                    self.arg.remove_children_and_readd(pivot, self.precision.clone());
                }
            }
        }
    }
}
