//! Bit-blasting of formulas into BDDs.
//!
//! Each bit of a free bit-vector variable (and of each distinct
//! uninterpreted call term) is a BDD variable, least significant bit first.
//! Uninterpreted calls are Ackermannized: equal arguments force equal results.
//! Quantified variables get fresh bits that are projected away right after
//! the body is encoded.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use num_bigint::BigUint;
use num_traits::Zero;

use crate::error::SolverError;
use crate::formula::{Constant, Formula, Node, Op, Quantifier, Sort, Symbol};
use crate::region::{Bdd, Ref};

use super::SolverResult;

/// Encoded arguments and result of one call term.
#[derive(Debug, Clone)]
pub(crate) struct CallInstance {
    name: String,
    args: Vec<Vec<Ref>>,
    result: Vec<Ref>,
}

/// Per-query encoding state.
#[derive(Debug, Default)]
pub(crate) struct EncodingContext {
    bound: Vec<(Symbol, Vec<u32>)>,
    pub calls: BTreeMap<Formula, CallInstance>,
}

pub(crate) struct BitBlaster {
    bdd: Bdd,
    symbols: HashMap<Symbol, Vec<u32>>,
    calls: HashMap<Formula, Vec<u32>>,
    owners: HashMap<u32, (Formula, u32)>,
}

impl BitBlaster {
    pub fn new() -> Self {
        Self {
            bdd: Bdd::default(),
            symbols: HashMap::new(),
            calls: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    pub fn bdd(&self) -> &Bdd {
        &self.bdd
    }

    fn width(sort: Sort) -> u32 {
        sort.width().unwrap_or(1)
    }

    fn alloc_bits(&mut self, owner: &Formula, sort: Sort) -> Vec<u32> {
        (0..Self::width(sort))
            .map(|i| {
                let v = self.bdd.new_var();
                self.owners.insert(v, (owner.clone(), i));
                v
            })
            .collect()
    }

    fn symbol_bits(&mut self, symbol: &Symbol) -> Vec<u32> {
        if let Some(bits) = self.symbols.get(symbol) {
            return bits.clone();
        }
        let bits = self.alloc_bits(&Formula::var(symbol.clone()), symbol.sort());
        self.symbols.insert(symbol.clone(), bits.clone());
        bits
    }

    /// Bits of an already encoded symbol.
    pub fn existing_symbol_bits(&self, symbol: &Symbol) -> Option<&[u32]> {
        self.symbols.get(symbol).map(|b| b.as_slice())
    }

    fn vars(&self, bits: &[u32]) -> Vec<Ref> {
        bits.iter().map(|&v| self.bdd.mk_var(v)).collect()
    }

    pub fn encode(&mut self, f: &Formula, ctx: &mut EncodingContext) -> SolverResult<Ref> {
        self.encode_bool(f, ctx)
    }

    fn encode_bool(&mut self, f: &Formula, ctx: &mut EncodingContext) -> SolverResult<Ref> {
        if !f.sort().is_bool() {
            return Err(SolverError::Unsupported(format!("expected a boolean term, got {}", f)));
        }
        match f.node() {
            Node::Const(c) => Ok(if c.bit(0) { self.bdd.one() } else { self.bdd.zero() }),
            Node::Var(_) => Ok(self.encode_bv(f, ctx)?[0]),
            Node::Quant(q, vars, body) => {
                let depth = ctx.bound.len();
                let mut quantified = BTreeSet::new();
                for v in vars {
                    let bits: Vec<u32> = (0..Self::width(v.sort())).map(|_| self.bdd.new_var()).collect();
                    quantified.extend(bits.iter().copied());
                    ctx.bound.push((v.clone(), bits));
                }
                let body = self.encode_bool(body, ctx);
                ctx.bound.truncate(depth);
                let body = body?;
                Ok(match q {
                    Quantifier::Exists => self.bdd.exists(body, &quantified),
                    Quantifier::Forall => self.bdd.forall(body, &quantified),
                })
            }
            Node::App(op, args) => match op {
                Op::Not => Ok(-self.encode_bool(&args[0], ctx)?),
                Op::And => {
                    let mut res = self.bdd.one();
                    for arg in args {
                        let r = self.encode_bool(arg, ctx)?;
                        res = self.bdd.apply_and(res, r);
                        if self.bdd.is_zero(res) {
                            break;
                        }
                    }
                    Ok(res)
                }
                Op::Or => {
                    let mut res = self.bdd.zero();
                    for arg in args {
                        let r = self.encode_bool(arg, ctx)?;
                        res = self.bdd.apply_or(res, r);
                        if self.bdd.is_one(res) {
                            break;
                        }
                    }
                    Ok(res)
                }
                Op::Implies => {
                    let a = self.encode_bool(&args[0], ctx)?;
                    let b = self.encode_bool(&args[1], ctx)?;
                    Ok(self.bdd.apply_imply(a, b))
                }
                Op::Xor => {
                    let a = self.encode_bool(&args[0], ctx)?;
                    let b = self.encode_bool(&args[1], ctx)?;
                    Ok(self.bdd.apply_xor(a, b))
                }
                Op::Ite | Op::Call { .. } => Ok(self.encode_bv(f, ctx)?[0]),
                Op::Eq => {
                    let a = self.encode_bv(&args[0], ctx)?;
                    let b = self.encode_bv(&args[1], ctx)?;
                    self.bits_eq(&a, &b)
                }
                Op::BvUlt => {
                    let a = self.encode_bv(&args[0], ctx)?;
                    let b = self.encode_bv(&args[1], ctx)?;
                    Ok(self.ult(&a, &b))
                }
                Op::BvUle => {
                    let a = self.encode_bv(&args[0], ctx)?;
                    let b = self.encode_bv(&args[1], ctx)?;
                    Ok(-self.ult(&b, &a))
                }
                Op::BvSlt => {
                    let a = self.encode_bv(&args[0], ctx)?;
                    let b = self.encode_bv(&args[1], ctx)?;
                    let (a, b) = (flip_sign(a), flip_sign(b));
                    Ok(self.ult(&a, &b))
                }
                Op::BvSle => {
                    let a = self.encode_bv(&args[0], ctx)?;
                    let b = self.encode_bv(&args[1], ctx)?;
                    let (a, b) = (flip_sign(a), flip_sign(b));
                    Ok(-self.ult(&b, &a))
                }
                _ => Err(SolverError::Unsupported(format!("not a boolean operator: {}", f))),
            },
        }
    }

    /// Encodes a term as a vector of bits; booleans are one-bit vectors.
    fn encode_bv(&mut self, f: &Formula, ctx: &mut EncodingContext) -> SolverResult<Vec<Ref>> {
        match f.node() {
            Node::Var(s) => {
                if let Some((_, bits)) = ctx.bound.iter().rev().find(|(b, _)| b == s) {
                    return Ok(self.vars(bits));
                }
                let bits = self.symbol_bits(s);
                Ok(self.vars(&bits))
            }
            Node::Const(c) => {
                let width = Self::width(c.sort());
                Ok((0..width)
                    .map(|i| if c.bit(i) { self.bdd.one() } else { self.bdd.zero() })
                    .collect())
            }
            Node::Quant(..) => Ok(vec![self.encode_bool(f, ctx)?]),
            Node::App(op, args) => match op {
                Op::Ite => {
                    let c = self.encode_bool(&args[0], ctx)?;
                    let t = self.encode_bv(&args[1], ctx)?;
                    let e = self.encode_bv(&args[2], ctx)?;
                    Ok(t.iter().zip(&e).map(|(&t, &e)| self.bdd.apply_ite(c, t, e)).collect())
                }
                Op::BvAdd => {
                    let a = self.encode_bv(&args[0], ctx)?;
                    let b = self.encode_bv(&args[1], ctx)?;
                    Ok(self.add(&a, &b, self.bdd.zero()))
                }
                Op::BvSub => {
                    let a = self.encode_bv(&args[0], ctx)?;
                    let b = self.encode_bv(&args[1], ctx)?;
                    let nb: Vec<Ref> = b.iter().map(|&r| -r).collect();
                    Ok(self.add(&a, &nb, self.bdd.one()))
                }
                Op::BvNeg => {
                    let a = self.encode_bv(&args[0], ctx)?;
                    let na: Vec<Ref> = a.iter().map(|&r| -r).collect();
                    let zeros = vec![self.bdd.zero(); na.len()];
                    Ok(self.add(&na, &zeros, self.bdd.one()))
                }
                Op::BvMul => {
                    let a = self.encode_bv(&args[0], ctx)?;
                    let b = self.encode_bv(&args[1], ctx)?;
                    Ok(self.mul(&a, &b))
                }
                Op::BvAnd | Op::BvOr | Op::BvXor => {
                    let a = self.encode_bv(&args[0], ctx)?;
                    let b = self.encode_bv(&args[1], ctx)?;
                    Ok(a.iter()
                        .zip(&b)
                        .map(|(&x, &y)| match op {
                            Op::BvAnd => self.bdd.apply_and(x, y),
                            Op::BvOr => self.bdd.apply_or(x, y),
                            _ => self.bdd.apply_xor(x, y),
                        })
                        .collect())
                }
                Op::BvNot => Ok(self.encode_bv(&args[0], ctx)?.into_iter().map(|r| -r).collect()),
                Op::Call { name, sort } => self.encode_call(f, name, *sort, args, ctx),
                _ => Ok(vec![self.encode_bool(f, ctx)?]),
            },
        }
    }

    fn encode_call(
        &mut self,
        f: &Formula,
        name: &str,
        sort: Sort,
        args: &[Formula],
        ctx: &mut EncodingContext,
    ) -> SolverResult<Vec<Ref>> {
        if ctx.bound.iter().any(|(s, _)| f.free_symbols().contains(s)) {
            return Err(SolverError::Unsupported(format!(
                "call over quantified variables: {}",
                f
            )));
        }
        let mut encoded_args = Vec::with_capacity(args.len());
        for arg in args {
            encoded_args.push(self.encode_bv(arg, ctx)?);
        }
        let bits = match self.calls.get(f) {
            Some(bits) => bits.clone(),
            None => {
                let bits = self.alloc_bits(f, sort);
                self.calls.insert(f.clone(), bits.clone());
                bits
            }
        };
        let result = self.vars(&bits);
        ctx.calls.insert(
            f.clone(),
            CallInstance {
                name: name.to_string(),
                args: encoded_args,
                result: result.clone(),
            },
        );
        Ok(result)
    }

    fn bits_eq(&self, a: &[Ref], b: &[Ref]) -> SolverResult<Ref> {
        if a.len() != b.len() {
            return Err(SolverError::Unsupported(format!(
                "equality between widths {} and {}",
                a.len(),
                b.len()
            )));
        }
        Ok(self.bdd.and_many(a.iter().zip(b).map(|(&x, &y)| self.bdd.apply_eq(x, y))))
    }

    fn add(&self, a: &[Ref], b: &[Ref], carry_in: Ref) -> Vec<Ref> {
        let mut carry = carry_in;
        let mut sum = Vec::with_capacity(a.len());
        for (&x, &y) in a.iter().zip(b) {
            let xy = self.bdd.apply_xor(x, y);
            sum.push(self.bdd.apply_xor(xy, carry));
            let both = self.bdd.apply_and(x, y);
            let propagate = self.bdd.apply_and(carry, xy);
            carry = self.bdd.apply_or(both, propagate);
        }
        sum
    }

    fn mul(&self, a: &[Ref], b: &[Ref]) -> Vec<Ref> {
        let width = a.len();
        let mut acc = vec![self.bdd.zero(); width];
        for (i, &bi) in b.iter().enumerate() {
            if self.bdd.is_zero(bi) {
                continue;
            }
            let partial: Vec<Ref> = (0..width)
                .map(|j| {
                    if j >= i {
                        self.bdd.apply_and(a[j - i], bi)
                    } else {
                        self.bdd.zero()
                    }
                })
                .collect();
            acc = self.add(&acc, &partial, self.bdd.zero());
        }
        acc
    }

    fn ult(&self, a: &[Ref], b: &[Ref]) -> Ref {
        let mut lt = self.bdd.zero();
        for (&x, &y) in a.iter().zip(b) {
            let same = self.bdd.apply_eq(x, y);
            let here = self.bdd.apply_and(-x, y);
            lt = self.bdd.apply_ite(same, lt, here);
        }
        lt
    }

    /// Functional consistency of all call pairs within `calls`.
    pub fn ackermann(&self, calls: &BTreeMap<Formula, CallInstance>) -> Ref {
        let instances: Vec<&CallInstance> = calls.values().collect();
        let mut constraints = Vec::new();
        for (i, x) in instances.iter().enumerate() {
            for y in &instances[i + 1..] {
                constraints.push(self.congruence(x, y));
            }
        }
        self.bdd.and_many(constraints)
    }

    /// Functional consistency of pairs with one call from each side.
    pub fn ackermann_between(
        &self,
        left: &BTreeMap<Formula, CallInstance>,
        right: &BTreeMap<Formula, CallInstance>,
    ) -> Ref {
        let mut constraints = Vec::new();
        for (fx, x) in left {
            for (fy, y) in right {
                if fx != fy {
                    constraints.push(self.congruence(x, y));
                }
            }
        }
        self.bdd.and_many(constraints)
    }

    fn congruence(&self, x: &CallInstance, y: &CallInstance) -> Ref {
        if x.name != y.name || x.args.len() != y.args.len() || x.result.len() != y.result.len() {
            return self.bdd.one();
        }
        let mut args_eq = self.bdd.one();
        for (a, b) in x.args.iter().zip(&y.args) {
            if a.len() != b.len() {
                return self.bdd.one();
            }
            for (&p, &q) in a.iter().zip(b) {
                args_eq = self.bdd.apply_and(args_eq, self.bdd.apply_eq(p, q));
            }
        }
        let results_eq = self
            .bdd
            .and_many(x.result.iter().zip(&y.result).map(|(&p, &q)| self.bdd.apply_eq(p, q)));
        self.bdd.apply_imply(args_eq, results_eq)
    }

    /// Converts a region over owned bits back into a formula.
    ///
    /// Picks the smaller of the cube covers of `r` and `¬r`.
    pub fn to_formula(&self, r: Ref) -> Formula {
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
        Formula::or(cubes.iter().map(|cube| self.cube_to_formula(cube)))
    }

    fn cube_to_formula(&self, cube: &[i32]) -> Formula {
        let mut groups: BTreeMap<Formula, Vec<(u32, bool)>> = BTreeMap::new();
        for &lit in cube {
            let var = lit.unsigned_abs();
            match self.owners.get(&var) {
                Some((term, pos)) => groups.entry(term.clone()).or_default().push((*pos, lit > 0)),
                None => debug_assert!(false, "bit {} has no owning term", var),
            }
        }
        Formula::and(groups.into_iter().map(|(term, bits)| match term.sort() {
            Sort::Bool => {
                if bits[0].1 {
                    term
                } else {
                    Formula::not(term)
                }
            }
            Sort::BitVec(width) => {
                let mut value = BigUint::zero();
                let mut mask = BigUint::zero();
                for &(pos, b) in &bits {
                    mask.set_bit(pos as u64, true);
                    if b {
                        value.set_bit(pos as u64, true);
                    }
                }
                let value = Formula::constant(Constant::bv(value, width));
                if bits.len() as u32 == width {
                    Formula::eq(term, value)
                } else {
                    Formula::eq(Formula::bvand(term, Formula::constant(Constant::bv(mask, width))), value)
                }
            }
        }))
    }
}

fn flip_sign(mut bits: Vec<Ref>) -> Vec<Ref> {
    if let Some(msb) = bits.last_mut() {
        *msb = -*msb;
    }
    bits
}
