//! Precisions: which predicates apply where.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use super::AbstractionPredicate;
use crate::cfa::NodeId;
use crate::lemma::LemmaPrecision;

type Predicates = BTreeSet<AbstractionPredicate>;

/// Predicates attached at four granularities.
///
/// The predicates used at a location are the union of the global ones, those
/// of the location's function, those of the location, and those of the
/// location's current visit count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PredicatePrecision {
    global: Predicates,
    function: BTreeMap<Rc<str>, Predicates>,
    location: BTreeMap<NodeId, Predicates>,
    location_instance: BTreeMap<(NodeId, u32), Predicates>,
}

fn extend(target: &mut Predicates, predicates: impl IntoIterator<Item = AbstractionPredicate>) -> bool {
    let before = target.len();
    target.extend(predicates);
    target.len() > before
}

impl PredicatePrecision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_location(&self, node: NodeId, function: &str, instance: u32) -> Predicates {
        let mut out = self.global.clone();
        out.extend(self.function.get(function).into_iter().flatten().cloned());
        out.extend(self.location.get(&node).into_iter().flatten().cloned());
        out.extend(
            self.location_instance
                .get(&(node, instance))
                .into_iter()
                .flatten()
                .cloned(),
        );
        out
    }

    /// Each `add_*` returns whether the precision grew.
    pub fn add_global(&mut self, predicates: impl IntoIterator<Item = AbstractionPredicate>) -> bool {
        extend(&mut self.global, predicates)
    }

    pub fn add_function(
        &mut self,
        function: &str,
        predicates: impl IntoIterator<Item = AbstractionPredicate>,
    ) -> bool {
        extend(self.function.entry(Rc::from(function)).or_default(), predicates)
    }

    pub fn add_location(&mut self, node: NodeId, predicates: impl IntoIterator<Item = AbstractionPredicate>) -> bool {
        extend(self.location.entry(node).or_default(), predicates)
    }

    pub fn add_location_instance(
        &mut self,
        node: NodeId,
        instance: u32,
        predicates: impl IntoIterator<Item = AbstractionPredicate>,
    ) -> bool {
        extend(self.location_instance.entry((node, instance)).or_default(), predicates)
    }

    pub fn merge(&self, other: &PredicatePrecision) -> PredicatePrecision {
        let mut result = self.clone();
        result.add_global(other.global.iter().cloned());
        for (f, ps) in &other.function {
            result.add_function(f, ps.iter().cloned());
        }
        for (&n, ps) in &other.location {
            result.add_location(n, ps.iter().cloned());
        }
        for (&(n, k), ps) in &other.location_instance {
            result.add_location_instance(n, k, ps.iter().cloned());
        }
        result
    }

    /// The same precision with every predicate rejected by `keep` dropped.
    pub fn restrict(&self, keep: impl Fn(&AbstractionPredicate) -> bool) -> PredicatePrecision {
        let filter = |ps: &Predicates| -> Predicates { ps.iter().filter(|p| keep(p)).cloned().collect() };
        let mut result = PredicatePrecision {
            global: filter(&self.global),
            ..Default::default()
        };
        for (f, ps) in &self.function {
            result.add_function(f, filter(ps));
        }
        for (&n, ps) in &self.location {
            result.add_location(n, filter(ps));
        }
        for (&(n, k), ps) in &self.location_instance {
            result.add_location_instance(n, k, filter(ps));
        }
        result.prune();
        result
    }

    fn prune(&mut self) {
        self.function.retain(|_, ps| !ps.is_empty());
        self.location.retain(|_, ps| !ps.is_empty());
        self.location_instance.retain(|_, ps| !ps.is_empty());
    }

    pub fn all_predicates(&self) -> Predicates {
        let mut out = self.global.clone();
        out.extend(self.function.values().flatten().cloned());
        out.extend(self.location.values().flatten().cloned());
        out.extend(self.location_instance.values().flatten().cloned());
        out
    }

    pub fn is_empty(&self) -> bool {
        self.all_predicates().is_empty()
    }

    pub fn global(&self) -> &Predicates {
        &self.global
    }

    pub fn functions(&self) -> impl Iterator<Item = (&str, &Predicates)> {
        self.function.iter().map(|(f, ps)| (f.as_ref(), ps))
    }

    pub fn locations(&self) -> impl Iterator<Item = (NodeId, &Predicates)> {
        self.location.iter().map(|(&n, ps)| (n, ps))
    }

    pub fn location_instances(&self) -> impl Iterator<Item = (NodeId, u32, &Predicates)> {
        self.location_instance.iter().map(|(&(n, k), ps)| (n, k, ps))
    }
}

/// Predicate and lemma precision of a reached state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Precision {
    pub predicates: PredicatePrecision,
    pub lemmas: LemmaPrecision,
}

impl Precision {
    pub fn new(predicates: PredicatePrecision, lemmas: LemmaPrecision) -> Self {
        Self { predicates, lemmas }
    }

    pub fn merge(&self, other: &Precision) -> Precision {
        Precision {
            predicates: self.predicates.merge(&other.predicates),
            lemmas: self.lemmas.merge(&other.lemmas),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{Formula, Symbol};
    use crate::predicates::PredicateManager;

    fn preds(pmgr: &PredicateManager) -> Vec<AbstractionPredicate> {
        let x = Formula::var(Symbol::bv("x", 8));
        (0..4)
            .map(|i| pmgr.make_predicate(Formula::eq(x.clone(), Formula::bv(i, 8))))
            .collect()
    }

    #[test]
    fn test_scopes_combine_at_location() {
        let pmgr = PredicateManager::new();
        let ps = preds(&pmgr);
        let mut prec = PredicatePrecision::new();
        assert!(prec.add_global([ps[0].clone()]));
        assert!(prec.add_function("f", [ps[1].clone()]));
        assert!(prec.add_location(3, [ps[2].clone()]));
        assert!(prec.add_location_instance(3, 2, [ps[3].clone()]));
        assert!(!prec.add_location(3, [ps[2].clone()]));

        assert_eq!(prec.for_location(3, "f", 2).len(), 4);
        assert_eq!(prec.for_location(3, "f", 1).len(), 3);
        assert_eq!(prec.for_location(4, "f", 1).len(), 2);
        assert_eq!(prec.for_location(4, "main", 1).len(), 1);
    }

    #[test]
    fn test_merge_and_restrict() {
        let pmgr = PredicateManager::new();
        let ps = preds(&pmgr);
        let mut a = PredicatePrecision::new();
        a.add_location(1, [ps[0].clone()]);
        let mut b = PredicatePrecision::new();
        b.add_location(1, [ps[1].clone()]);
        b.add_function("f", [ps[2].clone()]);

        let merged = a.merge(&b);
        assert_eq!(merged.for_location(1, "f", 1).len(), 3);
        assert!(merged.all_predicates().is_superset(&a.all_predicates()));

        let restricted = merged.restrict(|p| *p != ps[2]);
        assert_eq!(restricted.functions().count(), 0);
        assert_eq!(restricted.all_predicates().len(), 2);
    }
}
