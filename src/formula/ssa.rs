//! Single-assignment naming of program variables.
//!
//! Program variable `x` at version `i` is the symbol `x@i`. A variable that
//! was never assigned has version 1.

use std::collections::BTreeMap;
use std::rc::Rc;

use super::{Formula, Symbol};

pub const INDEX_SEPARATOR: char = '@';
pub const DEFAULT_INDEX: u32 = 1;

/// Versioned copy of a program variable.
pub fn versioned(symbol: &Symbol, index: u32) -> Symbol {
    symbol.with_name(&format!("{}{}{}", symbol.name(), INDEX_SEPARATOR, index))
}

/// Splits `x@i` into `x` and `i`.
pub fn parse_versioned(symbol: &Symbol) -> Option<(Symbol, u32)> {
    let (base, index) = symbol.name().rsplit_once(INDEX_SEPARATOR)?;
    let index = index.parse().ok()?;
    Some((symbol.with_name(base), index))
}

/// Lower bounds for the next version of each variable.
///
/// Persists across block boundaries so that versions handed out after a
/// summarized block never collide with versions used inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FreshValueProvider {
    next: BTreeMap<Rc<str>, u32>,
}

impl FreshValueProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next version for `name` given its current version.
    pub fn fresh_index(&self, name: &str, current: u32) -> u32 {
        let floor = self.next.get(name).copied().unwrap_or(0);
        (current + 1).max(floor)
    }

    /// Marks `index` as used for `name`.
    pub fn record(&mut self, name: &str, index: u32) {
        let entry = self.next.entry(Rc::from(name)).or_insert(0);
        *entry = (*entry).max(index + 1);
    }

    /// Per-variable maximum of both providers.
    pub fn merge(&self, other: &FreshValueProvider) -> FreshValueProvider {
        let mut result = self.clone();
        for (name, &next) in &other.next {
            let entry = result.next.entry(name.clone()).or_insert(0);
            *entry = (*entry).max(next);
        }
        result
    }

    /// Every floor raised by `offset(name)`.
    pub fn shifted(&self, offset: impl Fn(&str) -> u32) -> FreshValueProvider {
        let next = self.next.iter().map(|(name, &next)| (name.clone(), next + offset(name))).collect();
        FreshValueProvider { next }
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SsaMap {
    indices: BTreeMap<Symbol, u32>,
    provider: FreshValueProvider,
}

impl SsaMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self, symbol: &Symbol) -> u32 {
        self.indices.get(symbol).copied().unwrap_or(DEFAULT_INDEX)
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.indices.contains_key(symbol)
    }

    pub fn set(&mut self, symbol: &Symbol, index: u32) {
        self.indices.insert(symbol.clone(), index);
        self.provider.record(symbol.name(), index);
    }

    /// Assigns and returns a fresh version of `symbol`.
    pub fn make_fresh(&mut self, symbol: &Symbol) -> u32 {
        let index = self.provider.fresh_index(symbol.name(), self.index(symbol));
        self.set(symbol, index);
        index
    }

    pub fn symbols(&self) -> impl Iterator<Item = (&Symbol, u32)> {
        self.indices.iter().map(|(s, &i)| (s, i))
    }

    pub fn provider(&self) -> &FreshValueProvider {
        &self.provider
    }

    pub fn with_provider(mut self, provider: FreshValueProvider) -> Self {
        self.provider = provider;
        self
    }

    /// Per-variable maximum of both maps, providers merged.
    pub fn max_merge(&self, other: &SsaMap) -> SsaMap {
        let mut result = self.clone();
        for (s, i) in other.symbols() {
            let index = i.max(result.index(s));
            result.indices.insert(s.clone(), index);
        }
        result.provider = self.provider.merge(&other.provider);
        result
    }
}

/// Renames every free variable `x` to `x@ssa(x)`.
pub fn instantiate(f: &Formula, ssa: &SsaMap) -> Formula {
    f.substitute_with(&|s| Some(Formula::var(versioned(s, ssa.index(s)))))
}

/// Strips versions from every free variable.
pub fn uninstantiate(f: &Formula) -> Formula {
    f.substitute_with(&|s| parse_versioned(s).map(|(base, _)| Formula::var(base)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_index() {
        let x = Symbol::bv("x", 8);
        let mut ssa = SsaMap::new();
        assert_eq!(ssa.index(&x), 1);
        assert_eq!(ssa.make_fresh(&x), 2);
        assert_eq!(ssa.make_fresh(&x), 3);
    }

    #[test]
    fn test_provider_prevents_reuse() {
        let x = Symbol::bv("x", 8);
        let mut provider = FreshValueProvider::new();
        provider.record("x", 7);
        let mut ssa = SsaMap::new().with_provider(provider);
        assert_eq!(ssa.make_fresh(&x), 8);
    }

    #[test]
    fn test_provider_merge_takes_maximum() {
        let mut a = FreshValueProvider::new();
        a.record("x", 3);
        a.record("y", 1);
        let mut b = FreshValueProvider::new();
        b.record("x", 5);
        let m = a.merge(&b);
        assert_eq!(m.fresh_index("x", 1), 6);
        assert_eq!(m.fresh_index("y", 1), 2);
        assert_eq!(m.fresh_index("z", 1), 2);
    }

    #[test]
    fn test_shifted_provider() {
        let mut provider = FreshValueProvider::new();
        provider.record("x", 4);
        let shifted = provider.shifted(|name| if name == "x" { 2 } else { 0 });
        assert_eq!(shifted.fresh_index("x", 1), 7);
        assert_eq!(shifted.fresh_index("y", 1), 2);
    }

    #[test]
    fn test_instantiate_roundtrip() {
        let x = Symbol::bv("x", 8);
        let mut ssa = SsaMap::new();
        ssa.set(&x, 4);
        let f = Formula::ult(Formula::var(x.clone()), Formula::var(Symbol::bv("y", 8)));
        let g = instantiate(&f, &ssa);
        assert_eq!(g.to_string(), "(bvult x@4 y@1)");
        assert_eq!(uninstantiate(&g), f);
    }

    #[test]
    fn test_parse_versioned() {
        let s = Symbol::bool("flag@12");
        assert_eq!(parse_versioned(&s), Some((Symbol::bool("flag"), 12)));
        assert_eq!(parse_versioned(&Symbol::bool("flag")), None);
    }
}
