// subset.rs — Symbolic ranges and multi-dimensional subsets
//
// A `Range` is one dimension `start..=end` with a step and a tile size. The
// end is stored inclusive; the text form follows the persisted convention
// `start:end_exclusive[:step[:tile]]`, and a single index `i` is shorthand
// for `i:i+1`. A `Subset` is an ordered list of ranges, one per array rank.
//
// Preconditions: expressions are simplified on construction.
// Postconditions: element counts follow `ceil((end - start + 1) / step) * tile`.
// Failure modes: `SymbolError` from simplification (e.g. a zero step).
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{SdfgError, SymbolError};
use crate::parser::{parse_dims, RawDim};
use crate::symbolic::{Expr, SymbolMap};

/// One dimension of an iteration space or data subset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Range {
    pub start: Expr,
    /// Inclusive upper bound.
    pub end: Expr,
    pub step: Expr,
    pub tile: Expr,
}

impl Range {
    /// `start..=end` with the given step and tile size 1.
    pub fn new(start: Expr, end: Expr, step: Expr) -> Self {
        let simplify = |e: Expr| e.simplify().unwrap_or(e);
        Range {
            start: simplify(start),
            end: simplify(end),
            step: simplify(step),
            tile: Expr::one(),
        }
    }

    /// `start..stop` (exclusive stop), the way ranges are written in text.
    pub fn exclusive(start: Expr, stop: Expr, step: Expr) -> Self {
        Range::new(start, Expr::sub(stop, Expr::one()), step)
    }

    /// A single index.
    pub fn index(at: Expr) -> Self {
        let at = at.simplify().unwrap_or(at);
        Range {
            start: at.clone(),
            end: at,
            step: Expr::one(),
            tile: Expr::one(),
        }
    }

    pub fn with_tile(mut self, tile: Expr) -> Self {
        self.tile = tile.simplify().unwrap_or(tile);
        self
    }

    /// True if the range denotes exactly one index.
    pub fn is_index(&self) -> bool {
        self.start == self.end && self.step.is_int(1) && self.tile.is_int(1)
    }

    /// Number of iterations: `ceil((end - start + 1) / step)`.
    pub fn trip_count(&self) -> Result<Expr, SymbolError> {
        let extent = Expr::add(Expr::sub(self.end.clone(), self.start.clone()), Expr::one());
        Expr::ceil_div(extent, self.step.clone()).simplify()
    }

    /// Number of elements covered, counting `tile` elements per iteration.
    pub fn num_elements(&self) -> Result<Expr, SymbolError> {
        Expr::mul(self.trip_count()?, self.tile.clone()).simplify()
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = self.start.free_symbols();
        out.extend(self.end.free_symbols());
        out.extend(self.step.free_symbols());
        out.extend(self.tile.free_symbols());
        out
    }

    pub fn substitute(&self, map: &SymbolMap) -> Result<Range, SymbolError> {
        Ok(Range {
            start: self.start.substitute(map)?,
            end: self.end.substitute(map)?,
            step: self.step.substitute(map)?,
            tile: self.tile.substitute(map)?,
        })
    }

    /// Every expression of the range, in declaration order.
    pub fn exprs(&self) -> [&Expr; 4] {
        [&self.start, &self.end, &self.step, &self.tile]
    }

    fn from_raw(mut raw: RawDim) -> Result<Range, SymbolError> {
        let simplify = |e: Expr| e.simplify();
        match raw.len() {
            1 => Ok(Range::index(simplify(raw.remove(0))?)),
            n => {
                let tile = if n == 4 { raw.pop() } else { None };
                let step = if n >= 3 { raw.pop() } else { None };
                let stop = raw.pop().unwrap_or_else(Expr::one);
                let start = raw.pop().unwrap_or_else(Expr::zero);
                let end = simplify(Expr::sub(stop, Expr::one()))?;
                Ok(Range {
                    start: simplify(start)?,
                    end,
                    step: simplify(step.unwrap_or_else(Expr::one))?,
                    tile: simplify(tile.unwrap_or_else(Expr::one))?,
                })
            }
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_index() {
            return write!(f, "{}", self.start);
        }
        let stop = Expr::add(self.end.clone(), Expr::one());
        let stop = stop.simplify().unwrap_or(stop);
        write!(f, "{}:{}", self.start, stop)?;
        if !self.step.is_int(1) || !self.tile.is_int(1) {
            write!(f, ":{}", self.step)?;
        }
        if !self.tile.is_int(1) {
            write!(f, ":{}", self.tile)?;
        }
        Ok(())
    }
}

/// A multi-dimensional subset of a data container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subset {
    pub dims: Vec<Range>,
}

/// A dimension of a subset that provably leaves the descriptor's shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundsViolation {
    pub dim: usize,
    pub range: Range,
    pub extent: Expr,
}

impl Subset {
    pub fn new(dims: Vec<Range>) -> Self {
        Subset { dims }
    }

    /// Parse text such as `0:N:32, i`.
    pub fn parse(text: &str) -> Result<Subset, SdfgError> {
        let dims = parse_dims(text)?
            .into_iter()
            .map(Range::from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Subset { dims })
    }

    /// The whole of a container with the given shape.
    pub fn full(shape: &[Expr]) -> Self {
        Subset {
            dims: shape
                .iter()
                .map(|s| Range::exclusive(Expr::zero(), s.clone(), Expr::one()))
                .collect(),
        }
    }

    /// A single element.
    pub fn at(indices: Vec<Expr>) -> Self {
        Subset {
            dims: indices.into_iter().map(Range::index).collect(),
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total element count: the product of per-dimension counts.
    pub fn num_elements(&self) -> Result<Expr, SymbolError> {
        let mut total = Expr::one();
        for d in &self.dims {
            total = Expr::mul(total, d.num_elements()?);
        }
        total.simplify()
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        self.dims.iter().flat_map(Range::free_symbols).collect()
    }

    pub fn substitute(&self, map: &SymbolMap) -> Result<Subset, SymbolError> {
        Ok(Subset {
            dims: self
                .dims
                .iter()
                .map(|d| d.substitute(map))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Dimensions that provably fall outside `shape`, assuming every free
    /// symbol is a non-negative integer. Ranks must already agree.
    pub fn bounds_violations(&self, shape: &[Expr]) -> Vec<BoundsViolation> {
        self.dims
            .iter()
            .zip(shape)
            .enumerate()
            .filter(|(_, (range, extent))| dim_out_of_bounds(range, extent))
            .map(|(dim, (range, extent))| BoundsViolation {
                dim,
                range: range.clone(),
                extent: extent.clone(),
            })
            .collect()
    }

    /// Clamp each dimension to `[0, extent - 1]` where it provably exceeds it.
    pub fn clamp_to(&self, shape: &[Expr]) -> Subset {
        let dims = self
            .dims
            .iter()
            .zip(shape)
            .map(|(range, extent)| {
                let mut r = range.clone();
                let last = Expr::sub(extent.clone(), Expr::one());
                if Expr::sub(r.end.clone(), last.clone()).is_provably_positive() {
                    r.end = last.simplify().unwrap_or(last);
                }
                if Expr::Neg(Box::new(r.start.clone())).is_provably_positive() {
                    r.start = Expr::zero();
                }
                r
            })
            .chain(self.dims.iter().skip(shape.len()).cloned())
            .collect();
        Subset { dims }
    }

    /// True if some dimension separates the two subsets for every
    /// assignment of non-negative integers to free symbols.
    pub fn is_provably_disjoint(&self, other: &Subset) -> bool {
        if self.rank() != other.rank() {
            return false;
        }
        self.dims.iter().zip(&other.dims).any(|(a, b)| {
            Expr::sub(b.start.clone(), a.end.clone()).is_provably_positive()
                || Expr::sub(a.start.clone(), b.end.clone()).is_provably_positive()
        })
    }
}

/// The last element a range touches is `end + tile - 1`.
fn dim_out_of_bounds(range: &Range, extent: &Expr) -> bool {
    let last = Expr::add(
        range.end.clone(),
        Expr::sub(range.tile.clone(), Expr::one()),
    );
    let past_end = Expr::sub(last, Expr::sub(extent.clone(), Expr::one()));
    past_end.is_provably_positive() || Expr::Neg(Box::new(range.start.clone())).is_provably_positive()
}

impl fmt::Display for Subset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn e(text: &str) -> Expr {
        Expr::parse(text).unwrap().simplify().unwrap()
    }

    #[test]
    fn parse_stores_inclusive_end() {
        let s = Subset::parse("0:N:32").unwrap();
        assert_eq!(s.rank(), 1);
        assert_eq!(s.dims[0].start, Expr::Int(0));
        assert_eq!(s.dims[0].end, e("N - 1"));
        assert_eq!(s.dims[0].step, Expr::Int(32));
    }

    #[test]
    fn display_round_trips_text() {
        for text in ["0:N:32", "i", "0:N, j", "i + j", "0:N:32:4", "1:M - 1"] {
            let s = Subset::parse(text).unwrap();
            assert_eq!(Subset::parse(&s.to_string()).unwrap(), s, "{text}");
        }
        assert_eq!(Subset::parse("0:N").unwrap().to_string(), "0:N");
        assert_eq!(Subset::parse("i:i + 1").unwrap().to_string(), "i");
    }

    #[test]
    fn tiled_volume_is_ceiling_product() {
        let outer = Range::exclusive(Expr::zero(), e("N"), Expr::Int(32));
        assert_eq!(outer.trip_count().unwrap().to_string(), "ceil(N/32)");

        let inner = Subset::parse("0:32").unwrap();
        let volume = Expr::mul(inner.num_elements().unwrap(), outer.trip_count().unwrap())
            .simplify()
            .unwrap();
        assert_eq!(volume.to_string(), "32*ceil(N/32)");
    }

    #[test]
    fn element_count_of_index_is_one() {
        assert_eq!(Subset::parse("i, j").unwrap().num_elements().unwrap(), Expr::one());
        assert_eq!(Subset::parse("0:M, 0:N").unwrap().num_elements().unwrap(), e("M*N"));
    }

    #[test]
    fn zero_step_is_division_by_zero() {
        let r = Range {
            start: Expr::zero(),
            end: e("N - 1"),
            step: Expr::zero(),
            tile: Expr::one(),
        };
        assert!(matches!(r.trip_count(), Err(SymbolError::DivisionByZero(_))));
    }

    #[test]
    fn bounds_violations_are_provable_only() {
        let shape = [e("N")];
        assert!(Subset::parse("0:N").unwrap().bounds_violations(&shape).is_empty());
        assert_eq!(Subset::parse("0:N + 1").unwrap().bounds_violations(&shape).len(), 1);
        assert_eq!(Subset::parse("-1:N").unwrap().bounds_violations(&shape).len(), 1);
        // `i` is an unknown non-negative value: not provably out of bounds.
        assert!(Subset::parse("i").unwrap().bounds_violations(&shape).is_empty());
    }

    #[test]
    fn tile_extends_the_last_touched_element() {
        let shape = [e("N")];
        // Tiles of 4 starting at N - 1 reach N + 2.
        let tiled = Subset::parse("0:N:32:4").unwrap();
        assert_eq!(tiled.bounds_violations(&shape).len(), 1);
        let fits = Subset::parse("0:N - 3:32:4").unwrap();
        assert!(fits.bounds_violations(&shape).is_empty());
    }

    #[test]
    fn clamp_pulls_end_back_to_extent() {
        let s = Subset::parse("0:N + 31").unwrap().clamp_to(&[e("N")]);
        assert_eq!(s.to_string(), "0:N");
    }

    #[test]
    fn disjointness() {
        let a = Subset::parse("0:16").unwrap();
        let b = Subset::parse("16:32").unwrap();
        let c = Subset::parse("8:24").unwrap();
        assert!(a.is_provably_disjoint(&b));
        assert!(!a.is_provably_disjoint(&c));
        let row_i = Subset::parse("i, 0:N").unwrap();
        let row_j = Subset::parse("j, 0:N").unwrap();
        assert!(!row_i.is_provably_disjoint(&row_j));
    }

    #[test]
    fn substitution() {
        let mut map = SymbolMap::new();
        map.insert("i".into(), Expr::Int(3));
        let s = Subset::parse("i:i + 4").unwrap().substitute(&map).unwrap();
        assert_eq!(s.to_string(), "3:7");

        let mut ints = HashMap::new();
        ints.insert("N".to_string(), 100);
        let n = Subset::parse("0:N:32").unwrap().num_elements().unwrap();
        assert_eq!(n.evaluate(&ints).unwrap(), 4);
    }
}
