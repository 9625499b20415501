//! # predabs: predicate abstraction with CEGAR
//!
//! **`predabs`** checks reachability of error locations in programs given as
//! control-flow automata over bit-vector and boolean variables. It explores
//! an abstract reachability graph whose states are boolean combinations of
//! predicates, and refines the predicates from spurious counterexamples.
//!
//! ## How it works
//!
//! - Each abstract state pairs a **region** (a BDD over predicate variables)
//!   with a **path formula** for the edges taken since the last abstraction.
//! - At abstraction points the path formula is summarized into a new region,
//!   using Boolean, Cartesian or hybrid abstraction.
//! - A reached target is checked precisely. Infeasible paths yield sequence
//!   interpolants, which become new predicates; feasible paths are reported
//!   with a model.
//! - With block summaries enabled, every function is a block whose exits are
//!   cached per reduced entry context and reused at every call.
//! - Uninterpreted calls can be given meaning by **lemmas**, which refinement
//!   activates when a path is only infeasible under them.
//!
//! ## Basic Usage
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use predabs::algorithm::CegarAlgorithm;
//! use predabs::cfa::CfaBuilder;
//! use predabs::config::PredicateConfig;
//! use predabs::cpa::PredicateCpa;
//! use predabs::formula::{Formula, Symbol};
//! use predabs::lemma::LemmaSet;
//! use predabs::predicates::Precision;
//! use predabs::shutdown::ShutdownNotifier;
//! use predabs::solver::{bdd_solver::BddSolver, Solver};
//!
//! // x := 0; if x != 0 goto ERR
//! let x = Symbol::bv("x", 8);
//! let mut b = CfaBuilder::new();
//! let (entry, exit) = b.function("main");
//! let n1 = b.node("main");
//! let err = b.error_node("main");
//! b.assign(entry, n1, &x, Formula::bv(0, 8));
//! b.branch(n1, Formula::not(Formula::eq(Formula::var(x), Formula::bv(0, 8))), err, exit);
//! let cfa = Rc::new(b.build("main").unwrap());
//!
//! let solver: Rc<dyn Solver> = Rc::new(BddSolver::new(ShutdownNotifier::new()));
//! let cpa = PredicateCpa::new(cfa, &PredicateConfig::default(), solver, LemmaSet::new()).unwrap();
//! let mut cegar = CegarAlgorithm::new(cpa);
//! assert!(cegar.run(Precision::default()).is_safe());
//! ```
//!
//! ## Core Components
//!
//! - **[`region`]**: the BDD manager behind regions and the reference solver.
//! - **[`formula`]** and **[`solver`]**: terms, SSA versioning and satisfiability.
//! - **[`cpa`]**: the predicate analysis and its operators.
//! - **[`bam`]**: block summaries.
//! - **[`algorithm`]** and **[`refinement`]**: the CEGAR loop.

pub mod abstraction;
pub mod algorithm;
pub mod arg;
pub mod bam;
pub mod blocks;
pub mod cfa;
pub mod config;
pub mod cpa;
pub mod domain;
pub mod error;
pub mod formula;
pub mod lemma;
pub mod merge;
pub mod pathformula;
pub mod precision_adjust;
pub mod predicates;
pub mod refinement;
pub mod region;
pub mod relevant;
pub mod shutdown;
pub mod solver;
pub mod stats;
pub mod transfer;
