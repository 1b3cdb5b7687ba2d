//! Expression engine for selections, weights and plotted variables.
//!
//! Expressions are compiled once from text into an AST ([`CompiledExpr`]),
//! then bound against a dataset [`Schema`] and a [`Corrections`] registry
//! ([`BoundExpr`]). Binding resolves every identifier, so an unknown field or
//! lookup is reported before any row is read.
//!
//! Supported syntax: arithmetic (`+ - * / %`), comparisons
//! (`== != < <= > >=`), boolean operators (`&& || !`), the ternary
//! `c ? a : b`, array subscripts `jet_pt[1]`, built-in functions (`abs`,
//! `sqrt`, `log`, `log10`, `exp`, `pow`, `min`, `max`, `sin`, `cos`, `len`)
//! and calls to named correction lookups, e.g. `getTauIDSF(dm_2, 0)`.
//! `TMath::` prefixes on built-ins are accepted. `==` and `!=` compare
//! exactly, with no tolerance.

use std::sync::Arc;

use tf_core::{Error, Result, ScalarLookup};

use crate::corrections::Corrections;
use crate::dataset::{FieldKind, Row, Schema};

// ── AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    /// Index into the referenced fields.
    Var(usize),
    Elem(usize, Box<Expr>),
    Len(usize),
    UnaryNeg(Box<Expr>),
    UnaryNot(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
    /// Index into the referenced lookups.
    Lookup(usize, Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Log10,
    Exp,
    Pow,
    Min,
    Max,
    Sin,
    Cos,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        let name = name.strip_prefix("TMath::").unwrap_or(name);
        Some(match name {
            "abs" | "Abs" | "fabs" => Func::Abs,
            "sqrt" | "Sqrt" => Func::Sqrt,
            "log" | "Log" => Func::Log,
            "log10" | "Log10" => Func::Log10,
            "exp" | "Exp" => Func::Exp,
            "pow" | "Power" => Func::Pow,
            "min" | "Min" => Func::Min,
            "max" | "Max" => Func::Max,
            "sin" | "Sin" => Func::Sin,
            "cos" | "Cos" => Func::Cos,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Func::Pow | Func::Min | Func::Max => 2,
            _ => 1,
        }
    }
}

// ── Compiled expression ────────────────────────────────────────

/// A parsed expression, not yet tied to a schema.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    text: String,
    ast: Expr,
    /// Field names referenced by this expression (ordered by first occurrence).
    pub required_fields: Vec<String>,
    /// Correction lookups called by this expression (ordered by first occurrence).
    pub lookups: Vec<String>,
    /// `true` for fields used with a subscript or `len()`.
    indexed: Vec<bool>,
}

impl CompiledExpr {
    /// Parse and compile an expression string.
    pub fn compile(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser::new(&tokens);
        let ast = parser.parse_ternary()?;
        if parser.pos < parser.tokens.len() {
            return Err(Error::Expression(format!(
                "unexpected token after expression in '{input}': {:?}",
                parser.tokens[parser.pos]
            )));
        }
        Ok(CompiledExpr {
            text: input.trim().to_string(),
            ast,
            required_fields: parser.fields,
            lookups: parser.lookups,
            indexed: parser.indexed,
        })
    }

    /// Source text, trimmed.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// `true` if the expression reads no field and calls no lookup.
    pub fn is_constant(&self) -> bool {
        self.required_fields.is_empty() && self.lookups.is_empty()
    }
}

// ── Bound expression ───────────────────────────────────────────

/// An expression resolved against a schema and a correction registry.
///
/// Evaluation of expressions that only read scalar fields gathers one value
/// per field and never touches array storage. Expressions reading a jagged
/// field are flagged once at bind time and resolve the row's arrays instead.
pub struct BoundExpr {
    text: String,
    ast: Expr,
    fields: Vec<usize>,
    lookups: Vec<Arc<dyn ScalarLookup>>,
    ragged: bool,
    scratch: Vec<f64>,
}

impl std::fmt::Debug for BoundExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundExpr")
            .field("text", &self.text)
            .field("fields", &self.fields)
            .field("lookups", &self.lookups.len())
            .field("ragged", &self.ragged)
            .finish()
    }
}

impl BoundExpr {
    /// Resolve `expr` against `schema` and `corrections`.
    pub fn bind(expr: &CompiledExpr, schema: &Schema, corrections: &Corrections) -> Result<Self> {
        let mut fields = Vec::with_capacity(expr.required_fields.len());
        let mut ragged = false;
        for (name, &indexed) in expr.required_fields.iter().zip(&expr.indexed) {
            let idx = schema.index_of(name).ok_or_else(|| {
                Error::Schema(format!("unknown field '{name}' in expression '{}'", expr.text))
            })?;
            let jagged = schema.field(idx).kind == FieldKind::Jagged;
            if indexed && !jagged {
                return Err(Error::Schema(format!(
                    "field '{name}' is scalar but used as an array in '{}'",
                    expr.text
                )));
            }
            ragged |= jagged;
            fields.push(idx);
        }

        let mut lookups = Vec::with_capacity(expr.lookups.len());
        for name in &expr.lookups {
            let lookup = corrections.get(name).ok_or_else(|| {
                Error::Schema(format!("unknown function '{name}' in expression '{}'", expr.text))
            })?;
            lookups.push(Arc::clone(lookup));
        }
        check_lookup_arity(&expr.ast, &lookups, &expr.lookups, &expr.text)?;

        Ok(Self {
            text: expr.text.clone(),
            ast: expr.ast.clone(),
            scratch: vec![0.0; fields.len()],
            fields,
            lookups,
            ragged,
        })
    }

    /// Compile and bind in one step.
    pub fn parse(text: &str, schema: &Schema, corrections: &Corrections) -> Result<Self> {
        Self::bind(&CompiledExpr::compile(text)?, schema, corrections)
    }

    /// Source text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// `true` if the expression reads at least one jagged field.
    pub fn is_ragged(&self) -> bool {
        self.ragged
    }

    /// Evaluate for one row.
    #[inline]
    pub fn eval(&mut self, row: &Row<'_>) -> f64 {
        if self.ragged {
            let env = RaggedEnv { row, fields: &self.fields };
            eval_expr(&self.ast, &env, &self.lookups)
        } else {
            for (slot, &field) in self.scratch.iter_mut().zip(&self.fields) {
                *slot = row.scalar(field);
            }
            let env = FixedEnv(&self.scratch);
            eval_expr(&self.ast, &env, &self.lookups)
        }
    }
}

fn check_lookup_arity(
    e: &Expr,
    lookups: &[Arc<dyn ScalarLookup>],
    names: &[String],
    text: &str,
) -> Result<()> {
    let walk = |sub: &Expr| check_lookup_arity(sub, lookups, names, text);
    match e {
        Expr::Number(_) | Expr::Var(_) | Expr::Len(_) => Ok(()),
        Expr::Elem(_, a) | Expr::UnaryNeg(a) | Expr::UnaryNot(a) => walk(a),
        Expr::BinOp(_, a, b) => {
            walk(a)?;
            walk(b)
        }
        Expr::Ternary(c, a, b) => {
            walk(c)?;
            walk(a)?;
            walk(b)
        }
        Expr::Call(_, args) => args.iter().try_for_each(walk),
        Expr::Lookup(i, args) => {
            let arity = lookups[*i].arity();
            if !arity.contains(&args.len()) {
                return Err(Error::Schema(format!(
                    "'{}' takes {}..={} arguments, got {} in '{text}'",
                    names[*i],
                    arity.start(),
                    arity.end(),
                    args.len()
                )));
            }
            args.iter().try_for_each(walk)
        }
    }
}

// ── Evaluation ─────────────────────────────────────────────────

trait Env {
    fn var(&self, i: usize) -> f64;
    fn elem(&self, i: usize, index: f64) -> f64;
    fn len(&self, i: usize) -> f64;
}

/// Scalar fields only, pre-gathered.
struct FixedEnv<'a>(&'a [f64]);

impl Env for FixedEnv<'_> {
    #[inline]
    fn var(&self, i: usize) -> f64 {
        self.0[i]
    }
    // Binding rejects subscripts on scalar fields.
    fn elem(&self, _i: usize, _index: f64) -> f64 {
        0.0
    }
    fn len(&self, _i: usize) -> f64 {
        1.0
    }
}

struct RaggedEnv<'a, 'r> {
    row: &'a Row<'r>,
    fields: &'a [usize],
}

impl Env for RaggedEnv<'_, '_> {
    #[inline]
    fn var(&self, i: usize) -> f64 {
        self.row.scalar(self.fields[i])
    }
    #[inline]
    fn elem(&self, i: usize, index: f64) -> f64 {
        if index.is_nan() || index < 0.0 {
            return 0.0;
        }
        self.row.array(self.fields[i]).get(index as usize).copied().unwrap_or(0.0)
    }
    #[inline]
    fn len(&self, i: usize) -> f64 {
        self.row.array(self.fields[i]).len() as f64
    }
}

#[inline]
fn truth(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn eval_expr<E: Env>(e: &Expr, env: &E, lookups: &[Arc<dyn ScalarLookup>]) -> f64 {
    let ev = |sub: &Expr| eval_expr(sub, env, lookups);
    match e {
        Expr::Number(n) => *n,
        Expr::Var(i) => env.var(*i),
        Expr::Elem(i, index) => env.elem(*i, ev(index)),
        Expr::Len(i) => env.len(*i),
        Expr::UnaryNeg(a) => -ev(a),
        Expr::UnaryNot(a) => truth(ev(a) <= 0.0),
        Expr::Ternary(c, a, b) => {
            if ev(c) > 0.0 {
                ev(a)
            } else {
                ev(b)
            }
        }
        Expr::BinOp(BinOp::And, a, b) => truth(ev(a) > 0.0 && ev(b) > 0.0),
        Expr::BinOp(BinOp::Or, a, b) => truth(ev(a) > 0.0 || ev(b) > 0.0),
        Expr::BinOp(op, a, b) => {
            let lhs = ev(a);
            let rhs = ev(b);
            match op {
                BinOp::Add => lhs + rhs,
                BinOp::Sub => lhs - rhs,
                BinOp::Mul => lhs * rhs,
                BinOp::Div => lhs / rhs,
                BinOp::Rem => lhs % rhs,
                BinOp::Eq => truth(lhs == rhs),
                BinOp::Ne => truth(lhs != rhs),
                BinOp::Lt => truth(lhs < rhs),
                BinOp::Le => truth(lhs <= rhs),
                BinOp::Gt => truth(lhs > rhs),
                BinOp::Ge => truth(lhs >= rhs),
                BinOp::And | BinOp::Or => unreachable!("short-circuit operators handled above"),
            }
        }
        Expr::Call(f, args) => {
            let a0 = || ev(&args[0]);
            let a1 = || ev(&args[1]);
            match f {
                Func::Abs => a0().abs(),
                Func::Sqrt => a0().sqrt(),
                Func::Log => a0().ln(),
                Func::Log10 => a0().log10(),
                Func::Exp => a0().exp(),
                Func::Pow => a0().powf(a1()),
                Func::Min => a0().min(a1()),
                Func::Max => a0().max(a1()),
                Func::Sin => a0().sin(),
                Func::Cos => a0().cos(),
            }
        }
        Expr::Lookup(i, args) => {
            const INLINE: usize = 8;
            if args.len() <= INLINE {
                let mut buf = [0.0f64; INLINE];
                for (slot, a) in buf.iter_mut().zip(args) {
                    *slot = ev(a);
                }
                lookups[*i].lookup(&buf[..args.len()])
            } else {
                let vals: Vec<f64> = args.iter().map(ev).collect();
                lookups[*i].lookup(&vals)
            }
        }
    }
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Question,
    Colon,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        // Two-character operators
        if i + 1 < bytes.len() {
            let tok = match &bytes[i..i + 2] {
                b"&&" => Some(Token::And),
                b"||" => Some(Token::Or),
                b"==" => Some(Token::Eq),
                b"!=" => Some(Token::Ne),
                b"<=" => Some(Token::Le),
                b">=" => Some(Token::Ge),
                _ => None,
            };
            if let Some(t) = tok {
                tokens.push(t);
                i += 2;
                continue;
            }
        }

        let single = match c {
            b'+' => Some(Token::Plus),
            b'-' => Some(Token::Minus),
            b'*' => Some(Token::Star),
            b'/' => Some(Token::Slash),
            b'%' => Some(Token::Percent),
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b'[' => Some(Token::LBracket),
            b']' => Some(Token::RBracket),
            b',' => Some(Token::Comma),
            b'?' => Some(Token::Question),
            b':' => Some(Token::Colon),
            b'<' => Some(Token::Lt),
            b'>' => Some(Token::Gt),
            b'!' => Some(Token::Not),
            _ => None,
        };
        if let Some(t) = single {
            tokens.push(t);
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == b'.' {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_digit()
                    || bytes[i] == b'.'
                    || bytes[i] == b'e'
                    || bytes[i] == b'E'
                    || ((bytes[i] == b'+' || bytes[i] == b'-')
                        && i > start
                        && (bytes[i - 1] == b'e' || bytes[i - 1] == b'E')))
            {
                i += 1;
            }
            let s = &input[start..i];
            let n: f64 =
                s.parse().map_err(|_| Error::Expression(format!("invalid number: '{s}'")))?;
            tokens.push(Token::Num(n));
        } else if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            loop {
                if i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                } else if bytes[i..].starts_with(b"::") {
                    i += 2;
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(input[start..i].to_string()));
        } else {
            let ch = input[i..].chars().next().unwrap_or('?');
            return Err(Error::Expression(format!("unexpected character '{ch}' in '{input}'")));
        }
    }

    Ok(tokens)
}

// ── Parser (recursive descent) ─────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    fields: Vec<String>,
    indexed: Vec<bool>,
    lookups: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0, fields: Vec::new(), indexed: Vec::new(), lookups: Vec::new() }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            other => Err(Error::Expression(format!("expected {expected:?}, got {other:?}"))),
        }
    }

    fn resolve_var(&mut self, name: &str, indexed: bool) -> usize {
        if let Some(i) = self.fields.iter().position(|b| b == name) {
            self.indexed[i] |= indexed;
            i
        } else {
            self.fields.push(name.to_string());
            self.indexed.push(indexed);
            self.fields.len() - 1
        }
    }

    fn resolve_lookup(&mut self, name: &str) -> usize {
        if let Some(i) = self.lookups.iter().position(|l| l == name) {
            i
        } else {
            self.lookups.push(name.to_string());
            self.lookups.len() - 1
        }
    }

    // ── Grammar rules ──────────────────────────────────────────

    fn parse_ternary(&mut self) -> Result<Expr> {
        let cond = self.parse_or()?;
        if !matches!(self.peek(), Some(Token::Question)) {
            return Ok(cond);
        }
        self.advance();
        let then = self.parse_ternary()?;
        self.expect(&Token::Colon)?;
        let otherwise = self.parse_ternary()?;
        Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::BinOp(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = Expr::BinOp(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_add()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinOp::Eq,
                Some(Token::Ne) => BinOp::Ne,
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Ge) => BinOp::Ge,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_add()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNeg(Box::new(e)))
            }
            Some(Token::Plus) => {
                self.advance();
                self.parse_unary()
            }
            Some(Token::Not) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNot(Box::new(e)))
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            self.advance();
            return Ok(args);
        }
        args.push(self.parse_ternary()?);
        while matches!(self.peek(), Some(Token::Comma)) {
            self.advance();
            args.push(self.parse_ternary()?);
        }
        self.expect(&Token::RParen)?;
        Ok(args)
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.advance().cloned() {
            Some(Token::Num(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let e = self.parse_ternary()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) => match self.peek() {
                Some(Token::LParen) => {
                    self.advance(); // consume '('
                    self.parse_call(name)
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_ternary()?;
                    self.expect(&Token::RBracket)?;
                    let idx = self.resolve_var(&name, true);
                    Ok(Expr::Elem(idx, Box::new(index)))
                }
                _ => Ok(Expr::Var(self.resolve_var(&name, false))),
            },
            other => Err(Error::Expression(format!(
                "expected number, identifier, or '(', got {other:?}"
            ))),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr> {
        if name == "len" {
            let field = match self.advance().cloned() {
                Some(Token::Ident(f)) => f,
                other => {
                    return Err(Error::Expression(format!(
                        "len() takes a field name, got {other:?}"
                    )));
                }
            };
            self.expect(&Token::RParen)?;
            return Ok(Expr::Len(self.resolve_var(&field, true)));
        }
        let args = self.parse_args()?;
        match Func::from_name(&name) {
            Some(func) if args.len() == func.arity() => Ok(Expr::Call(func, args)),
            Some(func) => Err(Error::Expression(format!(
                "{name}() takes {} argument(s), got {}",
                func.arity(),
                args.len()
            ))),
            None => Ok(Expr::Lookup(self.resolve_lookup(&name), args)),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
