//! Region manager: reduced ordered BDDs with complement edges.
//!
//! Regions are the finite-domain half of an abstraction formula: every
//! abstraction predicate owns one BDD variable and an abstract state is a
//! boolean function over those variables. The same manager also backs the
//! bit-blasting reference solver, where BDD variables stand for single bits
//! of bit-vector terms.
//!
//! Variables are 1-indexed; a smaller index is closer to the root. All
//! operations go through the manager, which hash-conses nodes and memoizes
//! `ite` results, so structurally equal functions always share one [`Ref`].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;

use log::trace;

pub mod cache;
pub mod reference;
mod sat;

use self::cache::OpCache;
pub use self::reference::Ref;

/// A region is a handle into a [`Bdd`] manager.
pub type Region = Ref;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
struct Node {
    variable: u32,
    low: Ref,
    high: Ref,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
enum OpKey {
    Ite(Ref, Ref, Ref),
}

pub struct Bdd {
    nodes: RefCell<Vec<Node>>,
    unique: RefCell<HashMap<Node, u32>>,
    cache: RefCell<OpCache<OpKey, Ref>>,
    next_var: Cell<u32>,
    one: Ref,
    zero: Ref,
}

impl Bdd {
    pub fn new() -> Self {
        // Index 0 is a sentinel, index 1 is the single terminal.
        let terminal = Node {
            variable: 0,
            low: Ref::positive(0),
            high: Ref::positive(0),
        };
        let one = Ref::positive(1);
        Self {
            nodes: RefCell::new(vec![terminal; 2]),
            unique: RefCell::new(HashMap::new()),
            cache: RefCell::new(OpCache::default()),
            next_var: Cell::new(1),
            one,
            zero: -one,
        }
    }
}

impl Default for Bdd {
    fn default() -> Self {
        Bdd::new()
    }
}

impl Debug for Bdd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bdd")
            .field("nodes", &self.num_nodes())
            .field("vars", &self.num_vars())
            .field("cache_hits", &self.cache_hits())
            .field("cache_misses", &self.cache_misses())
            .finish()
    }
}

impl Bdd {
    pub fn one(&self) -> Ref {
        self.one
    }
    pub fn zero(&self) -> Ref {
        self.zero
    }

    pub fn is_one(&self, node: Ref) -> bool {
        node == self.one
    }
    pub fn is_zero(&self, node: Ref) -> bool {
        node == self.zero
    }
    pub fn is_terminal(&self, node: Ref) -> bool {
        node.index() == 1
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.borrow().len() - 1
    }
    pub fn num_vars(&self) -> u32 {
        self.next_var.get() - 1
    }
    pub fn cache_hits(&self) -> usize {
        self.cache.borrow().hits()
    }
    pub fn cache_misses(&self) -> usize {
        self.cache.borrow().misses()
    }

    /// Variable labelling the node, or 0 for the terminal.
    pub fn variable(&self, node: Ref) -> u32 {
        self.nodes.borrow()[node.index() as usize].variable
    }

    fn raw_low(&self, node: Ref) -> Ref {
        self.nodes.borrow()[node.index() as usize].low
    }
    fn raw_high(&self, node: Ref) -> Ref {
        self.nodes.borrow()[node.index() as usize].high
    }

    pub fn low_node(&self, node: Ref) -> Ref {
        let low = self.raw_low(node);
        if node.is_negated() {
            -low
        } else {
            low
        }
    }
    pub fn high_node(&self, node: Ref) -> Ref {
        let high = self.raw_high(node);
        if node.is_negated() {
            -high
        } else {
            high
        }
    }

    /// Allocate a fresh variable below all existing ones.
    pub fn new_var(&self) -> u32 {
        let v = self.next_var.get();
        self.next_var.set(v + 1);
        v
    }

    pub fn mk_node(&self, v: u32, low: Ref, high: Ref) -> Ref {
        assert_ne!(v, 0, "Variable index should not be zero");

        // Complement edges are only allowed on the low branch.
        if high.is_negated() {
            return -self.mk_node(v, -low, -high);
        }
        if low == high {
            return low;
        }

        let node = Node {
            variable: v,
            low,
            high,
        };
        if let Some(&index) = self.unique.borrow().get(&node) {
            return Ref::positive(index);
        }
        let index = {
            let mut nodes = self.nodes.borrow_mut();
            nodes.push(node);
            (nodes.len() - 1) as u32
        };
        self.unique.borrow_mut().insert(node, index);
        Ref::positive(index)
    }

    pub fn mk_var(&self, v: u32) -> Ref {
        assert_ne!(v, 0, "Variable index should not be zero");
        if v >= self.next_var.get() {
            self.next_var.set(v + 1);
        }
        self.mk_node(v, self.zero, self.one)
    }

    /// Conjunction of literals given in DIMACS style (`-v` is negative).
    pub fn cube(&self, literals: impl IntoIterator<Item = i32>) -> Ref {
        let mut literals = literals.into_iter().collect::<Vec<_>>();
        literals.sort_by_key(|l| std::cmp::Reverse(l.unsigned_abs()));
        let mut current = self.one;
        for lit in literals {
            assert_ne!(lit, 0, "Variable index should not be zero");
            let v = lit.unsigned_abs();
            if v >= self.next_var.get() {
                self.next_var.set(v + 1);
            }
            current = if lit < 0 {
                self.mk_node(v, current, self.zero)
            } else {
                self.mk_node(v, self.zero, current)
            };
        }
        current
    }

    fn top_cofactors(&self, node: Ref, v: u32) -> (Ref, Ref) {
        if self.is_terminal(node) || v < self.variable(node) {
            return (node, node);
        }
        debug_assert_eq!(v, self.variable(node));
        (self.low_node(node), self.high_node(node))
    }

    /// Apply the ITE operation to the arguments.
    ///
    /// ```text
    /// ITE(f, g, h) = (f ∧ g) ∨ (¬f ∧ h)
    /// ```
    pub fn apply_ite(&self, f: Ref, g: Ref, h: Ref) -> Ref {
        // Base cases:
        //   ite(1,G,H) => G
        //   ite(0,G,H) => H
        //   ite(F,G,G) => G
        //   ite(F,1,0) => F
        //   ite(F,0,1) => ~F
        if self.is_one(f) {
            return g;
        }
        if self.is_zero(f) {
            return h;
        }
        if g == h {
            return g;
        }
        if self.is_one(g) && self.is_zero(h) {
            return f;
        }
        if self.is_zero(g) && self.is_one(h) {
            return -f;
        }

        // Standard triples:
        //   ite(F,F,H) => ite(F,1,H)
        //   ite(F,~F,H) => ite(F,0,H)
        //   ite(F,G,F) => ite(F,G,0)
        //   ite(F,G,~F) => ite(F,G,1)
        let g = if g == f {
            self.one
        } else if g == -f {
            self.zero
        } else {
            g
        };
        let h = if h == f {
            self.zero
        } else if h == -f {
            self.one
        } else {
            h
        };
        if g == h {
            return g;
        }
        if self.is_one(g) && self.is_zero(h) {
            return f;
        }
        if self.is_zero(g) && self.is_one(h) {
            return -f;
        }

        // ite(~F,G,H) => ite(F,H,G)
        let (f, g, h) = if f.is_negated() { (-f, h, g) } else { (f, g, h) };
        // ite(F,~G,H) => ~ite(F,G,~H)
        let (g, h, negate) = if g.is_negated() {
            (-g, -h, true)
        } else {
            (g, h, false)
        };

        let key = OpKey::Ite(f, g, h);
        if let Some(res) = self.cache.borrow_mut().get(&key) {
            trace!("cache: ite({}, {}, {}) -> {}", f, g, h, res);
            return if negate { -res } else { res };
        }

        let m = [f, g, h]
            .into_iter()
            .filter(|&r| !self.is_terminal(r))
            .map(|r| self.variable(r))
            .min()
            .unwrap_or(0);
        assert_ne!(m, 0, "ite on terminals must be handled by base cases");

        let (f0, f1) = self.top_cofactors(f, m);
        let (g0, g1) = self.top_cofactors(g, m);
        let (h0, h1) = self.top_cofactors(h, m);

        let e = self.apply_ite(f0, g0, h0);
        let t = self.apply_ite(f1, g1, h1);
        let res = self.mk_node(m, e, t);
        self.cache.borrow_mut().insert(key, res);

        if negate {
            -res
        } else {
            res
        }
    }

    pub fn apply_not(&self, f: Ref) -> Ref {
        -f
    }

    pub fn apply_and(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, self.zero)
    }

    pub fn apply_or(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, self.one, v)
    }

    pub fn apply_xor(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, -v, v)
    }

    pub fn apply_eq(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, -v)
    }

    pub fn apply_imply(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, self.one)
    }

    pub fn and_many(&self, nodes: impl IntoIterator<Item = Ref>) -> Ref {
        let mut res = self.one;
        for node in nodes {
            res = self.apply_and(res, node);
            if self.is_zero(res) {
                break;
            }
        }
        res
    }

    pub fn or_many(&self, nodes: impl IntoIterator<Item = Ref>) -> Ref {
        let mut res = self.zero;
        for node in nodes {
            res = self.apply_or(res, node);
            if self.is_one(res) {
                break;
            }
        }
        res
    }

    pub fn is_implies(&self, f: Ref, g: Ref) -> bool {
        self.is_zero(self.apply_and(f, -g))
    }

    /// Existential quantification: `∃ vars. f`.
    pub fn exists(&self, f: Ref, vars: &BTreeSet<u32>) -> Ref {
        let Some(&max) = vars.last() else {
            return f;
        };
        let mut cache = HashMap::new();
        self.exists_(f, vars, max, &mut cache)
    }

    fn exists_(&self, f: Ref, vars: &BTreeSet<u32>, max: u32, cache: &mut HashMap<Ref, Ref>) -> Ref {
        if self.is_terminal(f) {
            return f;
        }
        let v = self.variable(f);
        if v > max {
            // Nothing below depends on a quantified variable.
            return f;
        }
        if let Some(&res) = cache.get(&f) {
            return res;
        }
        let low = self.exists_(self.low_node(f), vars, max, cache);
        let high = self.exists_(self.high_node(f), vars, max, cache);
        let res = if vars.contains(&v) {
            self.apply_or(low, high)
        } else {
            self.mk_node(v, low, high)
        };
        cache.insert(f, res);
        res
    }

    /// Universal quantification: `∀ vars. f`.
    pub fn forall(&self, f: Ref, vars: &BTreeSet<u32>) -> Ref {
        -self.exists(-f, vars)
    }

    /// Cofactor `f|v<-b`.
    pub fn restrict(&self, f: Ref, v: u32, b: bool) -> Ref {
        let values = HashMap::from([(v, b)]);
        self.restrict_many(f, &values)
    }

    pub fn restrict_many(&self, f: Ref, values: &HashMap<u32, bool>) -> Ref {
        let mut cache = HashMap::new();
        self.restrict_many_(f, values, &mut cache)
    }

    fn restrict_many_(&self, f: Ref, values: &HashMap<u32, bool>, cache: &mut HashMap<Ref, Ref>) -> Ref {
        if self.is_terminal(f) || values.is_empty() {
            return f;
        }
        if let Some(&res) = cache.get(&f) {
            return res;
        }
        let v = self.variable(f);
        let res = match values.get(&v) {
            Some(true) => self.restrict_many_(self.high_node(f), values, cache),
            Some(false) => self.restrict_many_(self.low_node(f), values, cache),
            None => {
                let low = self.restrict_many_(self.low_node(f), values, cache);
                let high = self.restrict_many_(self.high_node(f), values, cache);
                self.mk_node(v, low, high)
            }
        };
        cache.insert(f, res);
        res
    }

    /// Variables the function actually depends on.
    pub fn support(&self, f: Ref) -> BTreeSet<u32> {
        let mut vars = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut stack = vec![f.index()];
        while let Some(index) = stack.pop() {
            if index <= 1 || !visited.insert(index) {
                continue;
            }
            let node = Ref::positive(index);
            vars.insert(self.variable(node));
            stack.push(self.raw_low(node).index());
            stack.push(self.raw_high(node).index());
        }
        vars
    }

    /// Number of distinct nodes reachable from `f`, terminal included.
    pub fn size(&self, f: Ref) -> usize {
        let mut visited = BTreeSet::new();
        let mut stack = vec![f.index()];
        while let Some(index) = stack.pop() {
            if !visited.insert(index) || index <= 1 {
                continue;
            }
            let node = Ref::positive(index);
            stack.push(self.raw_low(node).index());
            stack.push(self.raw_high(node).index());
        }
        visited.len()
    }

    pub fn to_bracket_string(&self, node: Ref) -> String {
        if self.is_zero(node) {
            return "(0)".to_string();
        } else if self.is_one(node) {
            return "(1)".to_string();
        }
        format!(
            "{}:(x{}, {}, {})",
            node,
            self.variable(node),
            self.to_bracket_string(self.high_node(node)),
            self.to_bracket_string(self.low_node(node))
        )
    }
}
