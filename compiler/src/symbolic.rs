// symbolic.rs — Integer symbolic expressions
//
// Expression trees over integer literals and named symbols, with the
// arithmetic that loop bounds, extents and memlet volumes need: `+ - *`,
// integer powers, floor/ceiling division, modulo, min and max.
//
// Simplification rewrites an expression into a canonical sum of monomials.
// Anything that is not polynomial (a division that does not divide evenly,
// `min`, `max`, `Mod`) becomes an opaque atom whose arguments are themselves
// simplified. Two expressions that are equal as polynomials therefore
// simplify to structurally equal trees, which is what the rest of the crate
// relies on when it compares ranges and volumes.
//
// Preconditions: none.
// Postconditions: `simplify` output is canonical; `evaluate` is exact.
// Failure modes: division by a zero divisor → `SymbolError::DivisionByZero`;
//   unbound symbol during full evaluation → `SymbolError::Unbound`;
//   i64 overflow → `SymbolError::Overflow`.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::error::{SdfgError, SymbolError};

/// A symbolic integer expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Expr {
    Int(i64),
    Sym(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, u32),
    /// Integer division rounding toward negative infinity.
    FloorDiv(Box<Expr>, Box<Expr>),
    /// Integer division rounding toward positive infinity.
    CeilDiv(Box<Expr>, Box<Expr>),
    /// Euclidean remainder (always non-negative for a non-zero divisor).
    Mod(Box<Expr>, Box<Expr>),
    Min(Vec<Expr>),
    Max(Vec<Expr>),
}

/// Bindings used by substitution: each symbol maps to an integer
/// (`Expr::Int`) or to another expression.
pub type SymbolMap = HashMap<String, Expr>;

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Int(v)
    }
}

impl From<&str> for Expr {
    fn from(name: &str) -> Self {
        Expr::Sym(name.to_string())
    }
}

// ── Construction helpers ────────────────────────────────────────────────────

impl Expr {
    pub fn sym(name: impl Into<String>) -> Self {
        Expr::Sym(name.into())
    }

    pub fn zero() -> Self {
        Expr::Int(0)
    }

    pub fn one() -> Self {
        Expr::Int(1)
    }

    pub fn add(a: Expr, b: Expr) -> Self {
        Expr::Add(Box::new(a), Box::new(b))
    }

    pub fn sub(a: Expr, b: Expr) -> Self {
        Expr::Sub(Box::new(a), Box::new(b))
    }

    pub fn mul(a: Expr, b: Expr) -> Self {
        Expr::Mul(Box::new(a), Box::new(b))
    }

    pub fn floor_div(a: Expr, b: Expr) -> Self {
        Expr::FloorDiv(Box::new(a), Box::new(b))
    }

    pub fn ceil_div(a: Expr, b: Expr) -> Self {
        Expr::CeilDiv(Box::new(a), Box::new(b))
    }

    pub fn modulo(a: Expr, b: Expr) -> Self {
        Expr::Mod(Box::new(a), Box::new(b))
    }

    /// Parse expression text. The result is not simplified.
    pub fn parse(text: &str) -> Result<Expr, SdfgError> {
        crate::parser::parse_expr(text)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_int(&self, v: i64) -> bool {
        self.as_int() == Some(v)
    }

    /// All symbol names referenced by the expression.
    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Int(_) => {}
            Expr::Sym(name) => {
                out.insert(name.clone());
            }
            Expr::Neg(a) | Expr::Pow(a, _) => a.collect_symbols(out),
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::FloorDiv(a, b)
            | Expr::CeilDiv(a, b)
            | Expr::Mod(a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
            Expr::Min(args) | Expr::Max(args) => {
                for a in args {
                    a.collect_symbols(out);
                }
            }
        }
    }

    // ── Evaluation ──────────────────────────────────────────────────────

    /// Full evaluation: every free symbol must be bound.
    pub fn evaluate(&self, bindings: &HashMap<String, i64>) -> Result<i64, SymbolError> {
        let overflow = || SymbolError::Overflow(self.to_string());
        match self {
            Expr::Int(v) => Ok(*v),
            Expr::Sym(name) => bindings
                .get(name)
                .copied()
                .ok_or_else(|| SymbolError::Unbound(name.clone())),
            Expr::Neg(a) => a.evaluate(bindings)?.checked_neg().ok_or_else(overflow),
            Expr::Add(a, b) => a
                .evaluate(bindings)?
                .checked_add(b.evaluate(bindings)?)
                .ok_or_else(overflow),
            Expr::Sub(a, b) => a
                .evaluate(bindings)?
                .checked_sub(b.evaluate(bindings)?)
                .ok_or_else(overflow),
            Expr::Mul(a, b) => a
                .evaluate(bindings)?
                .checked_mul(b.evaluate(bindings)?)
                .ok_or_else(overflow),
            Expr::Pow(a, k) => a.evaluate(bindings)?.checked_pow(*k).ok_or_else(overflow),
            Expr::FloorDiv(a, b) => {
                let (x, y) = (a.evaluate(bindings)?, b.evaluate(bindings)?);
                int_floor_div(x, y).ok_or_else(|| self.division_error(y))
            }
            Expr::CeilDiv(a, b) => {
                let (x, y) = (a.evaluate(bindings)?, b.evaluate(bindings)?);
                int_ceil_div(x, y).ok_or_else(|| self.division_error(y))
            }
            Expr::Mod(a, b) => {
                let (x, y) = (a.evaluate(bindings)?, b.evaluate(bindings)?);
                x.checked_rem_euclid(y).ok_or_else(|| self.division_error(y))
            }
            Expr::Min(args) => fold_extreme(args, bindings, i64::min),
            Expr::Max(args) => fold_extreme(args, bindings, i64::max),
        }
    }

    fn division_error(&self, divisor: i64) -> SymbolError {
        if divisor == 0 {
            SymbolError::DivisionByZero(self.to_string())
        } else {
            SymbolError::Overflow(self.to_string())
        }
    }

    /// Partial evaluation: replace bound symbols and simplify the residual.
    pub fn substitute(&self, map: &SymbolMap) -> Result<Expr, SymbolError> {
        self.replace_symbols(map).simplify()
    }

    fn replace_symbols(&self, map: &SymbolMap) -> Expr {
        let r = |e: &Expr| Box::new(e.replace_symbols(map));
        match self {
            Expr::Int(v) => Expr::Int(*v),
            Expr::Sym(name) => map.get(name).cloned().unwrap_or_else(|| self.clone()),
            Expr::Neg(a) => Expr::Neg(r(a)),
            Expr::Add(a, b) => Expr::Add(r(a), r(b)),
            Expr::Sub(a, b) => Expr::Sub(r(a), r(b)),
            Expr::Mul(a, b) => Expr::Mul(r(a), r(b)),
            Expr::Pow(a, k) => Expr::Pow(r(a), *k),
            Expr::FloorDiv(a, b) => Expr::FloorDiv(r(a), r(b)),
            Expr::CeilDiv(a, b) => Expr::CeilDiv(r(a), r(b)),
            Expr::Mod(a, b) => Expr::Mod(r(a), r(b)),
            Expr::Min(args) => Expr::Min(args.iter().map(|a| a.replace_symbols(map)).collect()),
            Expr::Max(args) => Expr::Max(args.iter().map(|a| a.replace_symbols(map)).collect()),
        }
    }

    // ── Simplification ──────────────────────────────────────────────────

    /// Rewrite into canonical polynomial form.
    pub fn simplify(&self) -> Result<Expr, SymbolError> {
        Ok(Poly::from_expr(self)?.into_expr())
    }

    /// True if the expression is non-negative for every assignment of
    /// non-negative integers to its free symbols.
    pub fn is_provably_nonnegative(&self) -> bool {
        match Poly::from_expr(self) {
            Ok(p) => p.is_nonnegative(),
            Err(_) => false,
        }
    }

    /// True if the expression is strictly positive for every assignment of
    /// non-negative integers to its free symbols.
    pub fn is_provably_positive(&self) -> bool {
        match Poly::from_expr(self) {
            Ok(p) => p.is_nonnegative() && p.constant() > 0,
            Err(_) => false,
        }
    }

    /// Simplified `self - other == 0`.
    pub fn provably_equal(&self, other: &Expr) -> bool {
        matches!(Expr::sub(self.clone(), other.clone()).simplify(), Ok(Expr::Int(0)))
    }
}

fn fold_extreme(
    args: &[Expr],
    bindings: &HashMap<String, i64>,
    pick: fn(i64, i64) -> i64,
) -> Result<i64, SymbolError> {
    let mut acc: Option<i64> = None;
    for a in args {
        let v = a.evaluate(bindings)?;
        acc = Some(match acc {
            Some(cur) => pick(cur, v),
            None => v,
        });
    }
    Ok(acc.unwrap_or(0))
}

/// Floor division; `None` on a zero divisor or overflow.
pub fn int_floor_div(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    if (x % y != 0) && ((x < 0) != (y < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

/// Ceiling division; `None` on a zero divisor or overflow.
pub fn int_ceil_div(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    if (x % y != 0) && ((x < 0) == (y < 0)) {
        Some(q + 1)
    } else {
        Some(q)
    }
}

// ── Polynomial normal form ─────────────────────────────────────────────────

/// Product of atoms with positive exponents. The empty monomial is `1`.
type Monomial = BTreeMap<Expr, u32>;

/// Sum of monomials with non-zero integer coefficients.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Poly {
    terms: BTreeMap<Monomial, i64>,
}

fn overflow_err() -> SymbolError {
    SymbolError::Overflow("polynomial coefficient".to_string())
}

impl Poly {
    fn constant_poly(c: i64) -> Self {
        let mut terms = BTreeMap::new();
        if c != 0 {
            terms.insert(Monomial::new(), c);
        }
        Poly { terms }
    }

    fn atom(atom: Expr) -> Self {
        let mut mono = Monomial::new();
        mono.insert(atom, 1);
        let mut terms = BTreeMap::new();
        terms.insert(mono, 1);
        Poly { terms }
    }

    fn as_constant(&self) -> Option<i64> {
        match self.terms.len() {
            0 => Some(0),
            1 => self.terms.get(&Monomial::new()).copied(),
            _ => None,
        }
    }

    fn constant(&self) -> i64 {
        self.terms.get(&Monomial::new()).copied().unwrap_or(0)
    }

    fn add(mut self, other: Poly) -> Result<Poly, SymbolError> {
        for (mono, c) in other.terms {
            let entry = self.terms.entry(mono).or_insert(0);
            *entry = entry.checked_add(c).ok_or_else(overflow_err)?;
        }
        self.terms.retain(|_, c| *c != 0);
        Ok(self)
    }

    fn scale(mut self, k: i64) -> Result<Poly, SymbolError> {
        if k == 0 {
            return Ok(Poly::constant_poly(0));
        }
        for c in self.terms.values_mut() {
            *c = c.checked_mul(k).ok_or_else(overflow_err)?;
        }
        Ok(self)
    }

    fn mul(&self, other: &Poly) -> Result<Poly, SymbolError> {
        let mut out = Poly::constant_poly(0);
        for (ma, ca) in &self.terms {
            for (mb, cb) in &other.terms {
                let mut mono = ma.clone();
                for (atom, exp) in mb {
                    *mono.entry(atom.clone()).or_insert(0) += exp;
                }
                let c = ca.checked_mul(*cb).ok_or_else(overflow_err)?;
                let mut single = BTreeMap::new();
                single.insert(mono, c);
                out = out.add(Poly { terms: single })?;
            }
        }
        Ok(out)
    }

    /// Exact division by a non-zero constant, if every coefficient divides.
    fn exact_div(&self, k: i64) -> Option<Poly> {
        if self.terms.values().any(|c| c % k != 0) {
            return None;
        }
        let terms = self
            .terms
            .iter()
            .map(|(m, c)| (m.clone(), c / k))
            .collect();
        Some(Poly { terms })
    }

    fn from_expr(expr: &Expr) -> Result<Poly, SymbolError> {
        match expr {
            Expr::Int(v) => Ok(Poly::constant_poly(*v)),
            Expr::Sym(_) => Ok(Poly::atom(expr.clone())),
            Expr::Neg(a) => Poly::from_expr(a)?.scale(-1),
            Expr::Add(a, b) => Poly::from_expr(a)?.add(Poly::from_expr(b)?),
            Expr::Sub(a, b) => Poly::from_expr(a)?.add(Poly::from_expr(b)?.scale(-1)?),
            Expr::Mul(a, b) => Poly::from_expr(a)?.mul(&Poly::from_expr(b)?),
            Expr::Pow(a, k) => {
                let base = Poly::from_expr(a)?;
                let mut acc = Poly::constant_poly(1);
                for _ in 0..*k {
                    acc = acc.mul(&base)?;
                }
                Ok(acc)
            }
            Expr::FloorDiv(a, b) => Poly::divide(expr, a, b, DivKind::Floor),
            Expr::CeilDiv(a, b) => Poly::divide(expr, a, b, DivKind::Ceil),
            Expr::Mod(a, b) => {
                let (pa, pb) = (Poly::from_expr(a)?, Poly::from_expr(b)?);
                match (pa.as_constant(), pb.as_constant()) {
                    (_, Some(0)) => Err(SymbolError::DivisionByZero(expr.to_string())),
                    (Some(x), Some(y)) => Ok(Poly::constant_poly(
                        x.checked_rem_euclid(y).ok_or_else(overflow_err)?,
                    )),
                    (_, Some(1)) | (_, Some(-1)) => Ok(Poly::constant_poly(0)),
                    _ if pa.exact_div_by(&pb) => Ok(Poly::constant_poly(0)),
                    _ => Ok(Poly::atom(Expr::modulo(pa.into_expr(), pb.into_expr()))),
                }
            }
            Expr::Min(args) => Poly::extreme(args, Extreme::Min),
            Expr::Max(args) => Poly::extreme(args, Extreme::Max),
        }
    }

    /// `self` is a constant multiple of the non-constant `divisor`.
    fn exact_div_by(&self, divisor: &Poly) -> bool {
        if divisor.as_constant().is_some() || self.terms.is_empty() {
            return false;
        }
        let Some((mono, c)) = divisor.terms.iter().next() else {
            return false;
        };
        let Some(mine) = self.terms.get(mono) else {
            return false;
        };
        if mine % c != 0 {
            return false;
        }
        match divisor.clone().scale(mine / c) {
            Ok(scaled) => &scaled == self,
            Err(_) => false,
        }
    }

    fn divide(expr: &Expr, a: &Expr, b: &Expr, kind: DivKind) -> Result<Poly, SymbolError> {
        let (pa, pb) = (Poly::from_expr(a)?, Poly::from_expr(b)?);
        match (pa.as_constant(), pb.as_constant()) {
            (_, Some(0)) => Err(SymbolError::DivisionByZero(expr.to_string())),
            (Some(x), Some(y)) => {
                let q = match kind {
                    DivKind::Floor => int_floor_div(x, y),
                    DivKind::Ceil => int_ceil_div(x, y),
                };
                Ok(Poly::constant_poly(q.ok_or_else(overflow_err)?))
            }
            (_, Some(k)) => match pa.exact_div(k) {
                Some(q) => Ok(q),
                None => Ok(Poly::atom(kind.build(pa.into_expr(), pb.into_expr()))),
            },
            _ => {
                if pa.exact_div_by(&pb) {
                    // a = k * b, so a / b = k whenever b != 0.
                    let k = pa.terms.values().next().copied().unwrap_or(0)
                        / pb.terms.values().next().copied().unwrap_or(1);
                    Ok(Poly::constant_poly(k))
                } else {
                    Ok(Poly::atom(kind.build(pa.into_expr(), pb.into_expr())))
                }
            }
        }
    }

    fn extreme(args: &[Expr], which: Extreme) -> Result<Poly, SymbolError> {
        let mut kept: Vec<Poly> = Vec::new();
        for a in args {
            let p = Poly::from_expr(a)?;
            let mut dominated = false;
            let mut i = 0;
            while i < kept.len() {
                // diff = candidate - kept; constant diffs decide dominance.
                let diff = p.clone().add(kept[i].clone().scale(-1)?)?;
                match diff.as_constant() {
                    Some(d) => {
                        let candidate_wins = match which {
                            Extreme::Min => d < 0,
                            Extreme::Max => d > 0,
                        };
                        if candidate_wins {
                            kept.remove(i);
                            continue;
                        }
                        dominated = true;
                        break;
                    }
                    None => i += 1,
                }
            }
            if !dominated {
                kept.push(p);
            }
        }
        if kept.len() == 1 {
            return Ok(kept.remove(0));
        }
        let mut exprs: Vec<Expr> = kept.into_iter().map(Poly::into_expr).collect();
        exprs.sort();
        Ok(Poly::atom(match which {
            Extreme::Min => Expr::Min(exprs),
            Extreme::Max => Expr::Max(exprs),
        }))
    }

    fn is_nonnegative(&self) -> bool {
        self.terms
            .iter()
            .all(|(mono, c)| *c >= 0 && mono.keys().all(atom_is_nonnegative))
    }

    fn into_expr(self) -> Expr {
        let mut constant = 0;
        let mut acc: Option<Expr> = None;
        for (mono, c) in self.terms {
            if mono.is_empty() {
                constant = c;
                continue;
            }
            acc = Some(match acc {
                None => term_expr(c, mono),
                Some(prev) if c < 0 => Expr::sub(prev, term_expr(-c, mono)),
                Some(prev) => Expr::add(prev, term_expr(c, mono)),
            });
        }
        match acc {
            None => Expr::Int(constant),
            Some(e) if constant > 0 => Expr::add(e, Expr::Int(constant)),
            Some(e) if constant < 0 => Expr::sub(e, Expr::Int(-constant)),
            Some(e) => e,
        }
    }
}

fn atom_is_nonnegative(atom: &Expr) -> bool {
    match atom {
        Expr::Sym(_) | Expr::Mod(_, _) => true,
        Expr::FloorDiv(a, b) | Expr::CeilDiv(a, b) => {
            a.is_provably_nonnegative() && b.is_provably_positive()
        }
        Expr::Min(args) => args.iter().all(Expr::is_provably_nonnegative),
        Expr::Max(args) => args.iter().any(Expr::is_provably_nonnegative),
        _ => false,
    }
}

/// One signed term: coefficient folded in as the leftmost factor.
fn term_expr(c: i64, mono: Monomial) -> Expr {
    let mut acc = match c {
        1 => None,
        -1 => None,
        _ => Some(Expr::Int(c)),
    };
    for (atom, exp) in mono {
        let factor = if exp == 1 {
            atom
        } else {
            Expr::Pow(Box::new(atom), exp)
        };
        acc = Some(match acc {
            None => factor,
            Some(prev) => Expr::mul(prev, factor),
        });
    }
    let product = acc.unwrap_or(Expr::Int(c.abs()));
    if c == -1 {
        Expr::Neg(Box::new(product))
    } else {
        product
    }
}

#[derive(Clone, Copy)]
enum DivKind {
    Floor,
    Ceil,
}

impl DivKind {
    fn build(self, a: Expr, b: Expr) -> Expr {
        match self {
            DivKind::Floor => Expr::floor_div(a, b),
            DivKind::Ceil => Expr::ceil_div(a, b),
        }
    }
}

#[derive(Clone, Copy)]
enum Extreme {
    Min,
    Max,
}

// ── Display ────────────────────────────────────────────────────────────────

impl Expr {
    fn precedence(&self) -> u8 {
        match self {
            Expr::Add(..) | Expr::Sub(..) => 1,
            Expr::Mul(..) => 2,
            Expr::Neg(_) => 3,
            Expr::Int(v) if *v < 0 => 3,
            Expr::Pow(..) => 4,
            _ => 5,
        }
    }

    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "(")?;
            self.fmt_inner(f)?;
            write!(f, ")")
        } else {
            self.fmt_inner(f)
        }
    }

    fn fmt_inner(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(v) => write!(f, "{v}"),
            Expr::Sym(name) => write!(f, "{name}"),
            Expr::Neg(a) => {
                write!(f, "-")?;
                a.fmt_prec(f, 2)
            }
            Expr::Add(a, b) => {
                a.fmt_prec(f, 1)?;
                write!(f, " + ")?;
                b.fmt_prec(f, 2)
            }
            Expr::Sub(a, b) => {
                a.fmt_prec(f, 1)?;
                write!(f, " - ")?;
                b.fmt_prec(f, 2)
            }
            Expr::Mul(a, b) => {
                a.fmt_prec(f, 2)?;
                write!(f, "*")?;
                b.fmt_prec(f, 3)
            }
            Expr::Pow(a, k) => {
                a.fmt_prec(f, 5)?;
                write!(f, "**{k}")
            }
            Expr::FloorDiv(a, b) => {
                write!(f, "floor(")?;
                a.fmt_prec(f, 2)?;
                write!(f, "/")?;
                b.fmt_prec(f, 3)?;
                write!(f, ")")
            }
            Expr::CeilDiv(a, b) => {
                write!(f, "ceil(")?;
                a.fmt_prec(f, 2)?;
                write!(f, "/")?;
                b.fmt_prec(f, 3)?;
                write!(f, ")")
            }
            Expr::Mod(a, b) => write!(f, "Mod({a}, {b})"),
            Expr::Min(args) => write_call(f, "min", args),
            Expr::Max(args) => write_call(f, "max", args),
        }
    }
}

fn write_call(f: &mut fmt::Formatter<'_>, name: &str, args: &[Expr]) -> fmt::Result {
    write!(f, "{name}(")?;
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{a}")?;
    }
    write!(f, ")")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_inner(f)
    }
}

// ── Parse cache ────────────────────────────────────────────────────────────

/// Memoises parsed-and-simplified expressions by source text, so a document
/// that repeats the same range or volume text parses it once.
#[derive(Debug, Default)]
pub struct ExprCache {
    entries: HashMap<String, Expr>,
    hits: usize,
}

impl ExprCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, text: &str) -> Result<Expr, SdfgError> {
        if let Some(e) = self.entries.get(text) {
            self.hits += 1;
            return Ok(e.clone());
        }
        let expr = Expr::parse(text)?.simplify()?;
        self.entries.insert(text.to_string(), expr.clone());
        Ok(expr)
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
