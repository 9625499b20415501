//! Named, possibly recursive relations substitutable at call sites.
//!
//! A lemma `f(x1, ..., xn) = body` gives meaning to the uninterpreted call
//! `f` for the states whose [`LemmaPrecision`] activates it. Inactive lemmas
//! leave their calls uninterpreted.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

use crate::error::{CpaError, CpaResult};
use crate::formula::{Formula, Sort, Symbol};

pub mod apply;
pub mod extract;
pub mod file;
pub mod selection;

pub use self::apply::apply_lemmas;
pub use self::selection::select_facts;

/// Prefix of the guard literals that name lemmas inside formulas.
pub const LEMMA_PREFIX: &str = "__lemma.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lemma {
    id: Rc<str>,
    formals: Vec<Symbol>,
    sort: Sort,
    body: Formula,
}

impl Lemma {
    /// Checks that formals are distinct and cover the body's free variables.
    pub fn new(id: &str, formals: Vec<Symbol>, body: Formula) -> CpaResult<Self> {
        let distinct: BTreeSet<&Symbol> = formals.iter().collect();
        if distinct.len() != formals.len() {
            return Err(CpaError::config(format!("lemma `{}` has repeated formal parameters", id)));
        }
        if let Some(free) = body.free_symbols().into_iter().find(|s| !formals.contains(s)) {
            return Err(CpaError::config(format!(
                "lemma `{}` mentions `{}`, which is not a formal parameter",
                id, free
            )));
        }
        body.check_sorts()
            .map_err(|e| CpaError::config(format!("lemma `{}`: {}", id, e)))?;
        Ok(Self {
            id: Rc::from(id),
            sort: body.sort(),
            formals,
            body,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn formals(&self) -> &[Symbol] {
        &self.formals
    }

    pub fn sort(&self) -> Sort {
        self.sort
    }

    pub fn body(&self) -> &Formula {
        &self.body
    }

    /// The call term `id(formals)`.
    pub fn head(&self) -> Formula {
        Formula::call(&self.id, self.sort, self.formals.iter().cloned().map(Formula::var).collect())
    }

    /// `∀ formals. id(formals) = body`.
    pub fn definition(&self) -> Formula {
        Formula::forall(self.formals.clone(), Formula::eq(self.head(), self.body.clone()))
    }

    /// The body with formals replaced by `args`.
    ///
    /// Returns `None` when the arity or argument sorts do not match.
    pub fn instantiate(&self, args: &[Formula]) -> Option<Formula> {
        if args.len() != self.formals.len() || args.iter().zip(&self.formals).any(|(a, f)| a.sort() != f.sort()) {
            return None;
        }
        let map: HashMap<Symbol, Formula> = self.formals.iter().cloned().zip(args.iter().cloned()).collect();
        Some(self.body.substitute(&map))
    }

    /// The guard literal naming this lemma.
    pub fn guard(&self) -> Symbol {
        extract::guard(&self.id)
    }
}

/// All lemmas known to a run.
#[derive(Debug, Clone, Default)]
pub struct LemmaSet {
    lemmas: BTreeMap<Rc<str>, Rc<Lemma>>,
}

impl LemmaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, lemma: Lemma) -> CpaResult<()> {
        if self.lemmas.contains_key(lemma.id()) {
            return Err(CpaError::config(format!("lemma `{}` is defined twice", lemma.id())));
        }
        self.lemmas.insert(lemma.id.clone(), Rc::new(lemma));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Rc<Lemma>> {
        self.lemmas.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lemmas.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<Lemma>> {
        self.lemmas.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &Rc<str>> {
        self.lemmas.keys()
    }

    pub fn len(&self) -> usize {
        self.lemmas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lemmas.is_empty()
    }
}

/// Lemmas active for a state. Grows by merge, never shrinks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LemmaPrecision {
    active: BTreeSet<Rc<str>>,
}

impl LemmaPrecision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(ids: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            active: ids.into_iter().map(|id| Rc::from(id.as_ref())).collect(),
        }
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.contains(id)
    }

    pub fn add(&mut self, id: &str) -> bool {
        self.active.insert(Rc::from(id))
    }

    pub fn merge(&self, other: &LemmaPrecision) -> LemmaPrecision {
        Self {
            active: self.active.union(&other.active).cloned().collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.active.iter().map(|id| id.as_ref())
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// `even(n) = ite(n = 0, true, !even(n - 1))` over 8-bit `n`.
    pub fn even() -> Lemma {
        let n = Symbol::bv("n", 8);
        let v = Formula::var(n.clone());
        let rec = Formula::call("even", Sort::Bool, vec![Formula::bvsub(v.clone(), Formula::bv(1, 8))]);
        let body = Formula::ite(Formula::eq(v, Formula::bv(0, 8)), Formula::tt(), Formula::not(rec));
        Lemma::new("even", vec![n], body).unwrap()
    }

    #[test]
    fn test_instantiate() {
        let lemma = even();
        let arg = Formula::bv(3, 8);
        let body = lemma.instantiate(&[arg.clone()]).unwrap();
        assert!(body.free_symbols().is_empty());
        assert_eq!(body.calls().len(), 1);
        assert!(lemma.instantiate(&[]).is_none());
        assert!(lemma.instantiate(&[Formula::tt()]).is_none());
    }

    #[test]
    fn test_rejects_free_variables() {
        let n = Symbol::bv("n", 8);
        let m = Formula::var(Symbol::bv("m", 8));
        let err = Lemma::new("bad", vec![n.clone()], Formula::eq(Formula::var(n.clone()), m)).unwrap_err();
        assert!(matches!(err, CpaError::Configuration(_)));
        assert!(Lemma::new("dup", vec![n.clone(), n], Formula::tt()).is_err());
    }

    #[test]
    fn test_precision_only_grows() {
        let a = LemmaPrecision::with(["even"]);
        let mut b = LemmaPrecision::new();
        assert!(b.add("odd"));
        assert!(!b.add("odd"));
        let m = a.merge(&b);
        assert!(m.is_active("even") && m.is_active("odd"));
        assert_eq!(m.iter().collect::<Vec<_>>(), vec!["even", "odd"]);
    }

    #[test]
    fn test_set_rejects_duplicates() {
        let mut set = LemmaSet::new();
        set.insert(even()).unwrap();
        assert!(set.insert(even()).is_err());
        assert_eq!(set.get("even").unwrap().formals().len(), 1);
    }
}
