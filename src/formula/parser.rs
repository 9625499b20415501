//! S-expression reader for formulas in SMT-LIB syntax.
//!
//! Used by the predicate-map reader and the lemma-file loader. Only the
//! fragment printed by [`Display`][std::fmt::Display] on [`Formula`] is
//! accepted, plus `#b`/`#x` literals and the `bvugt`/`bvuge`/`bvsgt`/`bvsge`
//! comparisons.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use logos::Logos;
use num_bigint::BigUint;
use num_traits::Num;

use super::{Formula, Quantifier, Sort, Symbol};
use crate::error::{CpaError, CpaResult};

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\n\r]+")]
#[logos(skip r";[^\n]*")]
enum Token<'a> {
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[regex(r"[0-9]+", |lex| lex.slice())]
    Numeral(&'a str),

    #[regex(r"#x[0-9a-fA-F]+", |lex| lex.slice())]
    Hexadecimal(&'a str),

    #[regex(r"#b[01]+", |lex| lex.slice())]
    Binary(&'a str),

    #[regex(r"[a-zA-Z~!@$%^&*_+=<>.?/\-][a-zA-Z0-9~!@$%^&*_+=<>.?/\-]*", |lex| lex.slice())]
    Symbol(&'a str),

    #[regex(r"\|[^|]*\|", |lex| lex.slice())]
    QuotedSymbol(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SExpr {
    Symbol(String),
    Numeral(String),
    Hexadecimal(String),
    Binary(String),
    List(Vec<SExpr>),
}

impl Display for SExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SExpr::Symbol(s) | SExpr::Numeral(s) | SExpr::Hexadecimal(s) | SExpr::Binary(s) => write!(f, "{}", s),
            SExpr::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl SExpr {
    pub fn is_symbol(&self, name: &str) -> bool {
        matches!(self, SExpr::Symbol(s) if s == name)
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            SExpr::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            SExpr::List(items) => Some(items),
            _ => None,
        }
    }
}

fn parse_error(message: impl Display) -> CpaError {
    CpaError::config(format!("parse error: {}", message))
}

struct SExprParser<'a> {
    lexer: logos::Lexer<'a, Token<'a>>,
    current: Option<Result<Token<'a>, ()>>,
}

impl<'a> SExprParser<'a> {
    fn new(input: &'a str) -> Self {
        let mut lexer = Token::lexer(input);
        let current = lexer.next();
        SExprParser { lexer, current }
    }

    fn advance(&mut self) {
        self.current = self.lexer.next();
    }

    fn is_eof(&self) -> bool {
        self.current.is_none()
    }

    fn parse_sexp(&mut self) -> CpaResult<SExpr> {
        let token = match &self.current {
            None => return Err(parse_error("unexpected end of input")),
            Some(Err(())) => {
                return Err(parse_error(format!(
                    "invalid token at position {}",
                    self.lexer.span().start
                )))
            }
            Some(Ok(token)) => token.clone(),
        };
        let sexp = match token {
            Token::LParen => return self.parse_list(),
            Token::RParen => {
                return Err(parse_error(format!(
                    "unexpected ')' at position {}",
                    self.lexer.span().start
                )))
            }
            Token::Numeral(n) => SExpr::Numeral(n.to_string()),
            Token::Hexadecimal(h) => SExpr::Hexadecimal(h.to_string()),
            Token::Binary(b) => SExpr::Binary(b.to_string()),
            Token::Symbol(s) => SExpr::Symbol(s.to_string()),
            Token::QuotedSymbol(s) => SExpr::Symbol(s[1..s.len() - 1].to_string()),
        };
        self.advance();
        Ok(sexp)
    }

    fn parse_list(&mut self) -> CpaResult<SExpr> {
        self.advance(); // consume '('
        let mut items = Vec::new();
        loop {
            match &self.current {
                None => return Err(parse_error("unexpected end of input in list")),
                Some(Ok(Token::RParen)) => {
                    self.advance();
                    return Ok(SExpr::List(items));
                }
                Some(_) => items.push(self.parse_sexp()?),
            }
        }
    }
}

/// Parses all s-expressions in `input`.
pub fn parse_sexps(input: &str) -> CpaResult<Vec<SExpr>> {
    let mut parser = SExprParser::new(input);
    let mut result = Vec::new();
    while !parser.is_eof() {
        result.push(parser.parse_sexp()?);
    }
    Ok(result)
}

pub fn parse_sexp(input: &str) -> CpaResult<SExpr> {
    let mut all = parse_sexps(input)?;
    if all.len() != 1 {
        return Err(parse_error(format!("expected one expression, found {}", all.len())));
    }
    Ok(all.remove(0))
}

pub fn parse_sort(sexp: &SExpr) -> CpaResult<Sort> {
    match sexp {
        SExpr::Symbol(s) if s == "Bool" => Ok(Sort::Bool),
        SExpr::List(items) if items.len() == 3 && items[0].is_symbol("_") && items[1].is_symbol("BitVec") => {
            match &items[2] {
                SExpr::Numeral(n) => n
                    .parse::<u32>()
                    .ok()
                    .filter(|&w| w > 0)
                    .map(Sort::BitVec)
                    .ok_or_else(|| parse_error(format!("invalid bit-vector width {}", n))),
                other => Err(parse_error(format!("invalid bit-vector width {}", other))),
            }
        }
        other => Err(parse_error(format!("unknown sort {}", other))),
    }
}

/// Symbols and uninterpreted functions introduced by `declare-fun`.
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    symbols: HashMap<String, Sort>,
    functions: HashMap<String, (Vec<Sort>, Sort)>,
}

impl Declarations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_symbol(&mut self, symbol: &Symbol) {
        self.symbols.insert(symbol.name().to_string(), symbol.sort());
    }

    pub fn declare_function(&mut self, name: &str, args: Vec<Sort>, sort: Sort) {
        self.functions.insert(name.to_string(), (args, sort));
    }

    pub fn function(&self, name: &str) -> Option<&(Vec<Sort>, Sort)> {
        self.functions.get(name)
    }

    /// Handles `(declare-fun name (arg-sorts) sort)`; returns false for other commands.
    pub fn try_declare(&mut self, sexp: &SExpr) -> CpaResult<bool> {
        let Some(items) = sexp.as_list() else {
            return Ok(false);
        };
        if items.first().map_or(true, |h| !h.is_symbol("declare-fun")) {
            return Ok(false);
        }
        if items.len() != 4 {
            return Err(parse_error(format!("malformed declaration {}", sexp)));
        }
        let name = items[1]
            .as_symbol()
            .ok_or_else(|| parse_error(format!("malformed declaration {}", sexp)))?;
        let args = items[2]
            .as_list()
            .ok_or_else(|| parse_error(format!("malformed declaration {}", sexp)))?
            .iter()
            .map(parse_sort)
            .collect::<CpaResult<Vec<_>>>()?;
        let sort = parse_sort(&items[3])?;
        if args.is_empty() {
            self.symbols.insert(name.to_string(), sort);
        } else {
            self.functions.insert(name.to_string(), (args, sort));
        }
        Ok(true)
    }

    pub fn parse_formula(&self, sexp: &SExpr) -> CpaResult<Formula> {
        let f = self.parse_term(sexp, &mut Vec::new())?;
        f.check_sorts().map_err(parse_error)?;
        Ok(f)
    }

    pub fn parse_formula_str(&self, input: &str) -> CpaResult<Formula> {
        self.parse_formula(&parse_sexp(input)?)
    }

    fn lookup_symbol(&self, name: &str, bound: &[Symbol]) -> Option<Symbol> {
        if let Some(s) = bound.iter().rev().find(|s| s.name() == name) {
            return Some(s.clone());
        }
        self.symbols.get(name).map(|&sort| Symbol::new(name, sort))
    }

    fn parse_term(&self, sexp: &SExpr, bound: &mut Vec<Symbol>) -> CpaResult<Formula> {
        match sexp {
            SExpr::Symbol(s) if s == "true" => Ok(Formula::tt()),
            SExpr::Symbol(s) if s == "false" => Ok(Formula::ff()),
            SExpr::Symbol(s) => {
                if let Some(symbol) = self.lookup_symbol(s, bound) {
                    return Ok(Formula::var(symbol));
                }
                match self.functions.get(s.as_str()) {
                    Some((args, sort)) if args.is_empty() => Ok(Formula::call(s, *sort, Vec::new())),
                    _ => Err(parse_error(format!("undeclared symbol {}", s))),
                }
            }
            SExpr::Binary(b) => {
                let digits = &b[2..];
                let value = BigUint::from_str_radix(digits, 2).map_err(parse_error)?;
                Ok(Formula::bv_big(value, digits.len() as u32))
            }
            SExpr::Hexadecimal(h) => {
                let digits = &h[2..];
                let value = BigUint::from_str_radix(digits, 16).map_err(parse_error)?;
                Ok(Formula::bv_big(value, 4 * digits.len() as u32))
            }
            SExpr::Numeral(n) => Err(parse_error(format!("bare numeral {} has no sort", n))),
            SExpr::List(items) => self.parse_list(sexp, items, bound),
        }
    }

    fn parse_list(&self, sexp: &SExpr, items: &[SExpr], bound: &mut Vec<Symbol>) -> CpaResult<Formula> {
        let Some(head) = items.first() else {
            return Err(parse_error("empty application"));
        };

        // (_ bvN w)
        if head.is_symbol("_") {
            if let [_, SExpr::Symbol(bv), SExpr::Numeral(w)] = items {
                if let Some(digits) = bv.strip_prefix("bv") {
                    let value = BigUint::from_str_radix(digits, 10).map_err(parse_error)?;
                    let width = w.parse::<u32>().map_err(parse_error)?;
                    return Ok(Formula::bv_big(value, width));
                }
            }
            return Err(parse_error(format!("unsupported indexed term {}", sexp)));
        }

        if head.is_symbol("forall") || head.is_symbol("exists") {
            let q = if head.is_symbol("forall") {
                Quantifier::Forall
            } else {
                Quantifier::Exists
            };
            let [_, SExpr::List(decls), body] = items else {
                return Err(parse_error(format!("malformed quantifier {}", sexp)));
            };
            let mut vars = Vec::new();
            for decl in decls {
                match decl.as_list() {
                    Some([SExpr::Symbol(name), sort]) => vars.push(Symbol::new(name, parse_sort(sort)?)),
                    _ => return Err(parse_error(format!("malformed binder {}", decl))),
                }
            }
            let depth = bound.len();
            bound.extend(vars.iter().cloned());
            let body = self.parse_term(body, bound);
            bound.truncate(depth);
            return Ok(Formula::quant(q, vars, body?));
        }

        let Some(name) = head.as_symbol() else {
            return Err(parse_error(format!("invalid operator in {}", sexp)));
        };
        let args = items[1..]
            .iter()
            .map(|a| self.parse_term(a, bound))
            .collect::<CpaResult<Vec<_>>>()?;
        let arity = |n: usize| {
            if args.len() == n {
                Ok(())
            } else {
                Err(parse_error(format!("{} expects {} arguments in {}", name, n, sexp)))
            }
        };
        let binary = |build: fn(Formula, Formula) -> Formula| -> CpaResult<Formula> {
            arity(2)?;
            Ok(build(args[0].clone(), args[1].clone()))
        };
        match name {
            "not" => {
                arity(1)?;
                Ok(Formula::not(args[0].clone()))
            }
            "and" => Ok(Formula::and(args.clone())),
            "or" => Ok(Formula::or(args.clone())),
            "=>" => binary(Formula::implies),
            "xor" => binary(Formula::xor),
            "ite" => {
                arity(3)?;
                Ok(Formula::ite(args[0].clone(), args[1].clone(), args[2].clone()))
            }
            "=" => {
                if args.len() < 2 {
                    return Err(parse_error(format!("= expects at least 2 arguments in {}", sexp)));
                }
                Ok(Formula::and(args.windows(2).map(|w| Formula::eq(w[0].clone(), w[1].clone()))))
            }
            "bvadd" => binary(Formula::bvadd),
            "bvsub" => binary(Formula::bvsub),
            "bvmul" => binary(Formula::bvmul),
            "bvand" => binary(Formula::bvand),
            "bvor" => binary(Formula::bvor),
            "bvxor" => binary(Formula::bvxor),
            "bvult" => binary(Formula::ult),
            "bvule" => binary(Formula::ule),
            "bvugt" => binary(Formula::ugt),
            "bvuge" => binary(Formula::uge),
            "bvslt" => binary(Formula::slt),
            "bvsle" => binary(Formula::sle),
            "bvsgt" => binary(Formula::sgt),
            "bvsge" => binary(Formula::sge),
            "bvneg" => {
                arity(1)?;
                Ok(Formula::bvneg(args[0].clone()))
            }
            "bvnot" => {
                arity(1)?;
                Ok(Formula::bvnot(args[0].clone()))
            }
            _ => match self.functions.get(name) {
                Some((sorts, sort)) => {
                    arity(sorts.len())?;
                    Ok(Formula::call(name, *sort, args.clone()))
                }
                None => Err(parse_error(format!("undeclared function {}", name))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sexps() {
        let sexps = parse_sexps("(a (b c)) ; comment\n d").unwrap();
        assert_eq!(sexps.len(), 2);
        assert_eq!(sexps[0].to_string(), "(a (b c))");
        assert_eq!(sexps[1], SExpr::Symbol("d".to_string()));
    }

    #[test]
    fn test_unbalanced() {
        assert!(parse_sexps("(a (b c)").is_err());
        assert!(parse_sexps(")").is_err());
    }

    #[test]
    fn test_parse_formula_roundtrip() {
        let mut decls = Declarations::new();
        decls.try_declare(&parse_sexp("(declare-fun x () (_ BitVec 8))").unwrap()).unwrap();
        decls
            .try_declare(&parse_sexp("(declare-fun f ((_ BitVec 8)) (_ BitVec 8))").unwrap())
            .unwrap();
        let text = "(and (= x (_ bv1 8)) (not (bvult (f x) #x03)))";
        let f = decls.parse_formula_str(text).unwrap();
        assert_eq!(f.to_string(), "(and (= x (_ bv1 8)) (not (bvult (f x) (_ bv3 8))))");
        assert_eq!(decls.parse_formula_str(&f.to_string()).unwrap(), f);
    }

    #[test]
    fn test_parse_quantifier() {
        let decls = Declarations::new();
        let f = decls
            .parse_formula_str("(forall ((n (_ BitVec 4))) (bvule n #b1111))")
            .unwrap();
        assert!(f.free_symbols().is_empty());
        assert!(f.has_quantifier());
    }

    #[test]
    fn test_undeclared_symbol_is_configuration_error() {
        let decls = Declarations::new();
        let err = decls.parse_formula_str("(= y (_ bv1 8))").unwrap_err();
        assert!(matches!(err, CpaError::Configuration(_)));
    }

    #[test]
    fn test_ill_sorted_is_rejected() {
        let mut decls = Declarations::new();
        decls.declare_symbol(&Symbol::bv("x", 8));
        assert!(decls.parse_formula_str("(= x (_ bv1 16))").is_err());
    }
}
