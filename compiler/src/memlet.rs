// memlet.rs — Data-movement descriptors carried on dataflow edges

use std::collections::BTreeSet;
use std::fmt;

use crate::error::SdfgResult;
use crate::subset::Subset;
use crate::symbolic::Expr;

/// Write-conflict resolution: the reduction applied when several writers
/// target the same element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Wcr {
    Sum,
    Product,
    Min,
    Max,
    /// Any other lambda, kept verbatim.
    Custom(String),
}

impl Wcr {
    /// Persisted lambda text.
    pub fn to_lambda(&self) -> String {
        match self {
            Wcr::Sum => "lambda a, b: a + b".to_string(),
            Wcr::Product => "lambda a, b: a * b".to_string(),
            Wcr::Min => "lambda a, b: min(a, b)".to_string(),
            Wcr::Max => "lambda a, b: max(a, b)".to_string(),
            Wcr::Custom(text) => text.clone(),
        }
    }

    /// Recognise the common reductions; anything else is `Custom`.
    pub fn from_lambda(text: &str) -> Wcr {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let Some((params, body)) = compact
            .strip_prefix("lambda")
            .and_then(|rest| rest.split_once(':'))
        else {
            return Wcr::Custom(text.to_string());
        };
        let Some((a, b)) = params.split_once(',') else {
            return Wcr::Custom(text.to_string());
        };
        if body == format!("{a}+{b}") || body == format!("{b}+{a}") {
            Wcr::Sum
        } else if body == format!("{a}*{b}") || body == format!("{b}*{a}") {
            Wcr::Product
        } else if body == format!("min({a},{b})") {
            Wcr::Min
        } else if body == format!("max({a},{b})") {
            Wcr::Max
        } else {
            Wcr::Custom(text.to_string())
        }
    }
}

impl fmt::Display for Wcr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wcr::Sum => write!(f, "Sum"),
            Wcr::Product => write!(f, "Product"),
            Wcr::Min => write!(f, "Min"),
            Wcr::Max => write!(f, "Max"),
            Wcr::Custom(text) => write!(f, "{text}"),
        }
    }
}

/// Payload of a dataflow edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memlet {
    pub data: String,
    pub subset: Subset,
    /// Subset on the other end of a copy between differently shaped containers.
    pub other_subset: Option<Subset>,
    /// Total number of elements moved.
    pub volume: Expr,
    pub wcr: Option<Wcr>,
    /// Lambda text `wcr` was read from, kept when it differs from the
    /// canonical spelling so a document is written back as it was read.
    pub wcr_source: Option<String>,
    pub allow_oob: bool,
    /// The number of accesses is only known at run time; `volume` is an
    /// upper bound.
    pub dynamic: bool,
}

impl Memlet {
    /// A memlet whose volume is the element count of `subset`.
    pub fn new(data: impl Into<String>, subset: Subset) -> Self {
        let volume = subset.num_elements().unwrap_or_else(|_| Expr::one());
        Memlet {
            data: data.into(),
            subset,
            other_subset: None,
            volume,
            wcr: None,
            wcr_source: None,
            allow_oob: false,
            dynamic: false,
        }
    }

    /// Build from subset text, e.g. `Memlet::parse("A", "0:N")`.
    pub fn parse(data: impl Into<String>, subset: &str) -> SdfgResult<Self> {
        Ok(Memlet::new(data, Subset::parse(subset)?))
    }

    pub fn with_volume(mut self, volume: Expr) -> Self {
        self.volume = volume.simplify().unwrap_or(volume);
        self
    }

    pub fn with_wcr(mut self, wcr: Wcr) -> Self {
        self.wcr = Some(wcr);
        self.wcr_source = None;
        self
    }

    /// Set the reduction from lambda text, remembering non-canonical text.
    pub fn with_wcr_lambda(mut self, text: &str) -> Self {
        let wcr = Wcr::from_lambda(text);
        self.wcr_source = (wcr.to_lambda() != text).then(|| text.to_string());
        self.wcr = Some(wcr);
        self
    }

    /// Lambda text to persist for the reduction, if any.
    pub fn wcr_lambda(&self) -> Option<String> {
        let wcr = self.wcr.as_ref()?;
        Some(self.wcr_source.clone().unwrap_or_else(|| wcr.to_lambda()))
    }

    pub fn with_other_subset(mut self, other: Subset) -> Self {
        self.other_subset = Some(other);
        self
    }

    pub fn allow_oob(mut self) -> Self {
        self.allow_oob = true;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// Symbols referenced by the subsets and the volume.
    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = self.subset.free_symbols();
        if let Some(other) = &self.other_subset {
            out.extend(other.free_symbols());
        }
        out.extend(self.volume.free_symbols());
        out
    }
}

impl fmt::Display for Memlet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.data, self.subset)?;
        if let Some(other) = &self.other_subset {
            write!(f, " -> [{other}]")?;
        }
        if let Some(wcr) = &self.wcr {
            write!(f, " (CR: {wcr})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_defaults_to_subset_size() {
        let m = Memlet::parse("A", "0:N, 0:4").unwrap();
        assert_eq!(m.volume.to_string(), "4*N");
        let m = Memlet::parse("A", "i").unwrap();
        assert_eq!(m.volume, Expr::one());
    }

    #[test]
    fn display() {
        let m = Memlet::parse("B", "i").unwrap().with_wcr(Wcr::Sum);
        assert_eq!(m.to_string(), "B[i] (CR: Sum)");
    }

    #[test]
    fn wcr_lambda_recognition() {
        assert_eq!(Wcr::from_lambda("lambda a, b: a + b"), Wcr::Sum);
        assert_eq!(Wcr::from_lambda("lambda x,y: y*x"), Wcr::Product);
        assert_eq!(Wcr::from_lambda("lambda a, b: max(a, b)"), Wcr::Max);
        assert!(matches!(
            Wcr::from_lambda("lambda a, b: a - b"),
            Wcr::Custom(_)
        ));
        for w in [Wcr::Sum, Wcr::Product, Wcr::Min, Wcr::Max] {
            assert_eq!(Wcr::from_lambda(&w.to_lambda()), w);
        }
    }

    #[test]
    fn lambda_text_is_kept_as_written() {
        let m = Memlet::parse("B", "i").unwrap().with_wcr_lambda("lambda x,y: x+y");
        assert_eq!(m.wcr, Some(Wcr::Sum));
        assert_eq!(m.wcr_lambda().as_deref(), Some("lambda x,y: x+y"));

        let canonical = Memlet::parse("B", "i").unwrap().with_wcr_lambda("lambda a, b: a + b");
        assert_eq!(canonical, Memlet::parse("B", "i").unwrap().with_wcr(Wcr::Sum));

        let replaced = m.with_wcr(Wcr::Max);
        assert_eq!(replaced.wcr_lambda().as_deref(), Some("lambda a, b: max(a, b)"));
    }

    #[test]
    fn free_symbols_cover_volume() {
        let m = Memlet::parse("A", "i")
            .unwrap()
            .with_volume(Expr::sym("K"))
            .dynamic();
        let syms: Vec<_> = m.free_symbols().into_iter().collect();
        assert_eq!(syms, vec!["K", "i"]);
        assert!(m.dynamic);
    }
}
