//! Abstraction predicates and the region variables that stand for them.
//!
//! Every predicate is a boolean formula over unversioned program variables
//! and owns exactly one region variable for the lifetime of the manager.
//! Regions are boolean functions over those variables; an abstract state's
//! region is translated back to a formula by reading its cubes as
//! conjunctions of predicate literals.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use log::debug;

use crate::formula::Formula;
use crate::region::{Bdd, Region};

pub mod precision;
pub mod predmap;

pub use self::precision::{Precision, PredicatePrecision};

/// An atom with its region variable. Equality, hashing and order go by the atom.
#[derive(Debug, Clone)]
pub struct AbstractionPredicate {
    atom: Formula,
    var: u32,
}

impl PartialEq for AbstractionPredicate {
    fn eq(&self, other: &Self) -> bool {
        self.atom == other.atom
    }
}

impl Eq for AbstractionPredicate {}

impl Hash for AbstractionPredicate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.atom.hash(state);
    }
}

impl PartialOrd for AbstractionPredicate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AbstractionPredicate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.atom.cmp(&other.atom)
    }
}

impl AbstractionPredicate {
    pub fn atom(&self) -> &Formula {
        &self.atom
    }

    /// Region variable of this predicate.
    pub fn var(&self) -> u32 {
        self.var
    }

    pub fn is_false(&self) -> bool {
        self.atom.is_false()
    }
}

#[derive(Default)]
pub struct PredicateManager {
    bdd: Bdd,
    by_atom: RefCell<BTreeMap<Formula, AbstractionPredicate>>,
    by_var: RefCell<BTreeMap<u32, AbstractionPredicate>>,
    next_abstraction: Cell<usize>,
}

impl PredicateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bdd(&self) -> &Bdd {
        &self.bdd
    }

    /// The predicate for `atom`, allocating a region variable on first use.
    pub fn make_predicate(&self, atom: Formula) -> AbstractionPredicate {
        debug_assert!(atom.sort().is_bool(), "predicate {} is not boolean", atom);
        if let Some(p) = self.by_atom.borrow().get(&atom) {
            return p.clone();
        }
        let var = self.bdd.new_var();
        debug!("New predicate {} as region variable {}", atom, var);
        let p = AbstractionPredicate { atom: atom.clone(), var };
        self.by_atom.borrow_mut().insert(atom, p.clone());
        self.by_var.borrow_mut().insert(var, p.clone());
        p
    }

    /// The predicate `false`, which marks states proven unreachable.
    pub fn false_predicate(&self) -> AbstractionPredicate {
        self.make_predicate(Formula::ff())
    }

    pub fn predicate_for_var(&self, var: u32) -> Option<AbstractionPredicate> {
        self.by_var.borrow().get(&var).cloned()
    }

    pub fn predicates(&self) -> Vec<AbstractionPredicate> {
        self.by_var.borrow().values().cloned().collect()
    }

    pub fn region(&self, p: &AbstractionPredicate) -> Region {
        self.bdd.mk_var(p.var)
    }

    /// Predicates whose variables occur in `r`.
    pub fn support(&self, r: Region) -> BTreeSet<AbstractionPredicate> {
        self.bdd
            .support(r)
            .into_iter()
            .filter_map(|v| self.predicate_for_var(v))
            .collect()
    }

    /// Formula of `r` over predicate atoms, built from whichever of `r` and
    /// its negation has fewer cubes.
    pub fn region_to_formula(&self, r: Region) -> Formula {
        if self.bdd.is_zero(r) {
            return Formula::ff();
        }
        if self.bdd.is_one(r) {
            return Formula::tt();
        }
        let pos = self.bdd.cubes(r);
        let neg = self.bdd.cubes(-r);
        if neg.len() < pos.len() {
            Formula::not(self.cover_to_formula(&neg))
        } else {
            self.cover_to_formula(&pos)
        }
    }

    fn cover_to_formula(&self, cubes: &[Vec<i32>]) -> Formula {
        let by_var = self.by_var.borrow();
        Formula::or(cubes.iter().map(|cube| {
            Formula::and(cube.iter().filter_map(|&lit| {
                let p = by_var.get(&lit.unsigned_abs())?;
                Some(if lit > 0 {
                    p.atom.clone()
                } else {
                    Formula::not(p.atom.clone())
                })
            }))
        }))
    }

    /// Fresh identifier for an abstraction formula.
    pub fn next_abstraction_id(&self) -> usize {
        let id = self.next_abstraction.get();
        self.next_abstraction.set(id + 1);
        id
    }
}
