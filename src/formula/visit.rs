//! Pure traversals over [`Formula`] trees.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use num_bigint::BigUint;
use num_traits::{One, Zero};

use super::{bv_mask, Constant, Formula, Node, Op, Sort, Symbol};

impl Formula {
    /// Variables occurring free, i.e. not under a binder for them.
    pub fn free_symbols(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        self.collect_free(&mut Vec::new(), &mut out);
        out
    }

    fn collect_free(&self, bound: &mut Vec<Symbol>, out: &mut BTreeSet<Symbol>) {
        match self.node() {
            Node::Var(s) => {
                if !bound.contains(s) {
                    out.insert(s.clone());
                }
            }
            Node::Const(_) => {}
            Node::App(_, args) => {
                for arg in args {
                    arg.collect_free(bound, out);
                }
            }
            Node::Quant(_, vars, body) => {
                let depth = bound.len();
                bound.extend(vars.iter().cloned());
                body.collect_free(bound, out);
                bound.truncate(depth);
            }
        }
    }

    /// Maximal boolean subterms that are not built from connectives.
    pub fn atoms(&self) -> BTreeSet<Formula> {
        let mut out = BTreeSet::new();
        self.collect_atoms(&mut out);
        out
    }

    fn collect_atoms(&self, out: &mut BTreeSet<Formula>) {
        match self.node() {
            Node::Const(_) => {}
            Node::App(op, args) if op.is_connective() => {
                for arg in args {
                    arg.collect_atoms(out);
                }
            }
            Node::App(Op::Ite, args) if self.sort().is_bool() => {
                for arg in args {
                    arg.collect_atoms(out);
                }
            }
            Node::App(Op::Eq, args) if args.iter().all(|a| a.sort().is_bool()) => {
                for arg in args {
                    arg.collect_atoms(out);
                }
            }
            _ => {
                if self.sort().is_bool() {
                    out.insert(self.clone());
                }
            }
        }
    }

    /// Distinct uninterpreted call subterms, innermost first.
    pub fn calls(&self) -> Vec<Formula> {
        let mut out = Vec::new();
        self.collect_calls(&mut out);
        out
    }

    fn collect_calls(&self, out: &mut Vec<Formula>) {
        match self.node() {
            Node::Var(_) | Node::Const(_) => {}
            Node::App(op, args) => {
                for arg in args {
                    arg.collect_calls(out);
                }
                if matches!(op, Op::Call { .. }) && !out.contains(self) {
                    out.push(self.clone());
                }
            }
            Node::Quant(_, _, body) => body.collect_calls(out),
        }
    }

    pub fn has_quantifier(&self) -> bool {
        match self.node() {
            Node::Var(_) | Node::Const(_) => false,
            Node::App(_, args) => args.iter().any(|a| a.has_quantifier()),
            Node::Quant(..) => true,
        }
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        match self.node() {
            Node::Var(_) | Node::Const(_) => 1,
            Node::App(_, args) => 1 + args.iter().map(|a| a.size()).sum::<usize>(),
            Node::Quant(_, _, body) => 1 + body.size(),
        }
    }

    /// Capture-avoiding substitution of free variables.
    pub fn substitute(&self, map: &HashMap<Symbol, Formula>) -> Formula {
        if map.is_empty() {
            return self.clone();
        }
        self.substitute_with(&|s| map.get(s).cloned())
    }

    /// Capture-avoiding substitution driven by a lookup function.
    ///
    /// Bound variables are never passed to `lookup`. When a replacement
    /// mentions a variable bound by an enclosing quantifier, that binder is
    /// renamed first.
    pub fn substitute_with(&self, lookup: &dyn Fn(&Symbol) -> Option<Formula>) -> Formula {
        self.subst(lookup, &BTreeSet::new())
    }

    fn subst(&self, lookup: &dyn Fn(&Symbol) -> Option<Formula>, shadow: &BTreeSet<Symbol>) -> Formula {
        match self.node() {
            Node::Var(s) => {
                if shadow.contains(s) {
                    self.clone()
                } else {
                    lookup(s).unwrap_or_else(|| self.clone())
                }
            }
            Node::Const(_) => self.clone(),
            Node::App(op, args) => Formula::app(op.clone(), args.iter().map(|a| a.subst(lookup, shadow)).collect()),
            Node::Quant(q, vars, body) => {
                let body_free = body.free_symbols();
                let mut incoming = BTreeSet::new();
                for s in &body_free {
                    if vars.contains(s) || shadow.contains(s) {
                        continue;
                    }
                    if let Some(r) = lookup(s) {
                        incoming.extend(r.free_symbols());
                    }
                }

                let mut avoid: BTreeSet<&str> = incoming.iter().map(|s| s.name()).collect();
                avoid.extend(body_free.iter().map(|s| s.name()));
                avoid.extend(vars.iter().map(|s| s.name()));

                let mut renaming = HashMap::new();
                let mut new_vars = Vec::with_capacity(vars.len());
                let mut fresh_names = Vec::new();
                for v in vars {
                    if incoming.iter().any(|s| s.name() == v.name()) {
                        let fresh = fresh_symbol(v, &avoid, &fresh_names);
                        fresh_names.push(fresh.name().to_string());
                        renaming.insert(v.clone(), Formula::var(fresh.clone()));
                        new_vars.push(fresh);
                    } else {
                        new_vars.push(v.clone());
                    }
                }
                let body = body.substitute(&renaming);

                let mut shadow = shadow.clone();
                shadow.extend(new_vars.iter().cloned());
                Formula::quant(*q, new_vars, body.subst(lookup, &shadow))
            }
        }
    }

    /// Replaces whole subterms, outermost match first.
    ///
    /// A subterm mentioning a variable bound above it is never replaced, and
    /// neither is one whose replacement would be captured by such a binder.
    pub fn replace_terms(&self, map: &HashMap<Formula, Formula>) -> Formula {
        if map.is_empty() {
            return self.clone();
        }
        self.replace_(map, &BTreeSet::new())
    }

    fn replace_(&self, map: &HashMap<Formula, Formula>, bound: &BTreeSet<Symbol>) -> Formula {
        if let Some(r) = map.get(self) {
            if bound.is_empty() || (self.free_symbols().is_disjoint(bound) && r.free_symbols().is_disjoint(bound)) {
                return r.clone();
            }
        }
        match self.node() {
            Node::Var(_) | Node::Const(_) => self.clone(),
            Node::App(op, args) => Formula::app(op.clone(), args.iter().map(|a| a.replace_(map, bound)).collect()),
            Node::Quant(q, vars, body) => {
                let mut bound = bound.clone();
                bound.extend(vars.iter().cloned());
                Formula::quant(*q, vars.clone(), body.replace_(map, &bound))
            }
        }
    }

    /// Evaluates a closed-over formula under an assignment of its free variables.
    ///
    /// Returns `None` for unassigned variables, uninterpreted calls and quantifiers.
    pub fn eval(&self, env: &BTreeMap<Symbol, Constant>) -> Option<Constant> {
        match self.node() {
            Node::Var(s) => env.get(s).cloned(),
            Node::Const(c) => Some(c.clone()),
            Node::Quant(..) => None,
            Node::App(op, args) => {
                let vals = args.iter().map(|a| a.eval(env)).collect::<Option<Vec<_>>>()?;
                eval_op(op, &vals)
            }
        }
    }

    /// Checks arities and argument sorts.
    pub fn check_sorts(&self) -> Result<(), String> {
        match self.node() {
            Node::Var(_) | Node::Const(_) => Ok(()),
            Node::Quant(_, _, body) => {
                body.check_sorts()?;
                expect_sort(body, Sort::Bool)
            }
            Node::App(op, args) => {
                for arg in args {
                    arg.check_sorts()?;
                }
                let arity = |n: usize| {
                    if args.len() == n {
                        Ok(())
                    } else {
                        Err(format!("{:?} expects {} arguments, got {}", op, n, args.len()))
                    }
                };
                match op {
                    Op::Not => {
                        arity(1)?;
                        expect_sort(&args[0], Sort::Bool)
                    }
                    Op::And | Op::Or => args.iter().try_for_each(|a| expect_sort(a, Sort::Bool)),
                    Op::Implies | Op::Xor => {
                        arity(2)?;
                        args.iter().try_for_each(|a| expect_sort(a, Sort::Bool))
                    }
                    Op::Ite => {
                        arity(3)?;
                        expect_sort(&args[0], Sort::Bool)?;
                        expect_sort(&args[2], args[1].sort())
                    }
                    Op::Eq => {
                        arity(2)?;
                        expect_sort(&args[1], args[0].sort())
                    }
                    Op::BvNeg | Op::BvNot => {
                        arity(1)?;
                        expect_bv(&args[0])
                    }
                    Op::Call { .. } => Ok(()),
                    _ => {
                        arity(2)?;
                        expect_bv(&args[0])?;
                        expect_sort(&args[1], args[0].sort())
                    }
                }
            }
        }
    }
}

fn expect_sort(f: &Formula, sort: Sort) -> Result<(), String> {
    if f.sort() == sort {
        Ok(())
    } else {
        Err(format!("expected sort {} for {}, got {}", sort, f, f.sort()))
    }
}

fn expect_bv(f: &Formula) -> Result<(), String> {
    match f.sort() {
        Sort::BitVec(_) => Ok(()),
        Sort::Bool => Err(format!("expected a bit-vector, got boolean {}", f)),
    }
}

fn fresh_symbol(v: &Symbol, avoid: &BTreeSet<&str>, taken: &[String]) -> Symbol {
    let mut k = 1usize;
    loop {
        let name = format!("{}!{}", v.name(), k);
        if !avoid.contains(name.as_str()) && !taken.contains(&name) {
            return v.with_name(&name);
        }
        k += 1;
    }
}

fn to_signed_order(value: &BigUint, width: u32) -> BigUint {
    // Flipping the sign bit maps two's complement order onto unsigned order.
    value ^ (BigUint::one() << (width - 1))
}

fn eval_op(op: &Op, vals: &[Constant]) -> Option<Constant> {
    let bools = || vals.iter().map(|v| v.as_bool()).collect::<Option<Vec<_>>>();
    let bv2 = || -> Option<(BigUint, BigUint, u32)> {
        let (a, w) = vals.first()?.as_bv()?;
        let (b, _) = vals.get(1)?.as_bv()?;
        Some((a.clone(), b.clone(), w))
    };
    let wrap = |v: BigUint, w: u32| Some(Constant::bv(v, w));
    match op {
        Op::Not => Some(Constant::Bool(!vals.first()?.as_bool()?)),
        Op::And => Some(Constant::Bool(bools()?.into_iter().all(|b| b))),
        Op::Or => Some(Constant::Bool(bools()?.into_iter().any(|b| b))),
        Op::Implies => {
            let b = bools()?;
            Some(Constant::Bool(!b[0] || b[1]))
        }
        Op::Xor => {
            let b = bools()?;
            Some(Constant::Bool(b[0] != b[1]))
        }
        Op::Ite => {
            let c = vals.first()?.as_bool()?;
            Some(if c { vals.get(1)?.clone() } else { vals.get(2)?.clone() })
        }
        Op::Eq => Some(Constant::Bool(vals.first()? == vals.get(1)?)),
        Op::BvAdd => bv2().and_then(|(a, b, w)| wrap(a + b, w)),
        Op::BvSub => bv2().and_then(|(a, b, w)| wrap((BigUint::one() << w) + a - b, w)),
        Op::BvMul => bv2().and_then(|(a, b, w)| wrap(a * b, w)),
        Op::BvAnd => bv2().and_then(|(a, b, w)| wrap(a & b, w)),
        Op::BvOr => bv2().and_then(|(a, b, w)| wrap(a | b, w)),
        Op::BvXor => bv2().and_then(|(a, b, w)| wrap(a ^ b, w)),
        Op::BvNeg => {
            let (a, w) = vals.first()?.as_bv()?;
            if a.is_zero() {
                wrap(BigUint::zero(), w)
            } else {
                wrap((BigUint::one() << w) - a, w)
            }
        }
        Op::BvNot => {
            let (a, w) = vals.first()?.as_bv()?;
            wrap(a ^ bv_mask(w), w)
        }
        Op::BvUlt => bv2().map(|(a, b, _)| Constant::Bool(a < b)),
        Op::BvUle => bv2().map(|(a, b, _)| Constant::Bool(a <= b)),
        Op::BvSlt => bv2().map(|(a, b, w)| Constant::Bool(to_signed_order(&a, w) < to_signed_order(&b, w))),
        Op::BvSle => bv2().map(|(a, b, w)| Constant::Bool(to_signed_order(&a, w) <= to_signed_order(&b, w))),
        Op::Call { .. } => None,
    }
}
