// diag.rs — Unified diagnostics model
//
// Shared diagnostic types used by validation, schedule checking and lowering.
// A diagnostic points at a graph element (state, node or edge) instead of a
// source span: the IR has no source text of its own.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::id::{EdgeId, NodeId, StateId};

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`, `W0601`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // Structural
    pub const E0101: DiagCode = DiagCode("E0101"); // unknown data container
    pub const E0102: DiagCode = DiagCode("E0102"); // dangling or unmatched scope bracket
    pub const E0103: DiagCode = DiagCode("E0103"); // scope reference is not a MapEntry / cyclic nesting
    pub const E0104: DiagCode = DiagCode("E0104"); // edge crosses a scope boundary
    pub const E0105: DiagCode = DiagCode("E0105"); // unbound connector
    pub const E0106: DiagCode = DiagCode("E0106"); // connector bound more than once
    pub const E0107: DiagCode = DiagCode("E0107"); // edge binds an undeclared connector
    pub const E0108: DiagCode = DiagCode("E0108"); // IN_/OUT_ connector mismatch across scope
    pub const E0109: DiagCode = DiagCode("E0109"); // edge references a missing node
    pub const E0110: DiagCode = DiagCode("E0110"); // map parameter / range arity mismatch
    pub const E0111: DiagCode = DiagCode("E0111"); // interstate edge references a missing state
    pub const E0112: DiagCode = DiagCode("E0112"); // dataflow of a state has a cycle

    // Bounds
    pub const E0201: DiagCode = DiagCode("E0201"); // subset out of bounds
    pub const E0202: DiagCode = DiagCode("E0202"); // subset rank differs from descriptor rank

    // Symbols
    pub const E0301: DiagCode = DiagCode("E0301"); // undeclared or out-of-scope symbol
    pub const E0302: DiagCode = DiagCode("E0302"); // division by zero in range or volume
    pub const E0303: DiagCode = DiagCode("E0303"); // map parameter shadows a symbol in scope
    pub const E0304: DiagCode = DiagCode("E0304"); // memlet propagation failed

    // Schedule / storage
    pub const E0401: DiagCode = DiagCode("E0401"); // incompatible nested schedule
    pub const E0402: DiagCode = DiagCode("E0402"); // device scope touches host-only storage
    pub const E0403: DiagCode = DiagCode("E0403"); // construct the backend cannot emit

    // Conflicts
    pub const E0501: DiagCode = DiagCode("E0501"); // concurrent writes without WCR

    // Warnings
    pub const W0601: DiagCode = DiagCode("W0601"); // declared volume differs from derived volume
    pub const W0602: DiagCode = DiagCode("W0602"); // possible write overlap (conservative mode)
    pub const W0603: DiagCode = DiagCode("W0603"); // reduction emitted without an atomic operation

    // Pass verification
    pub const E0701: DiagCode = DiagCode("E0701"); // schedule verification failed
    pub const E0702: DiagCode = DiagCode("E0702"); // lowering verification failed
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Category ─────────────────────────────────────────────────────────────

/// Error taxonomy category of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagKind {
    Structural,
    Bounds,
    Symbol,
    ScheduleCompatibility,
    Storage,
    Conflict,
}

impl fmt::Display for DiagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagKind::Structural => "structural",
            DiagKind::Bounds => "bounds",
            DiagKind::Symbol => "symbol",
            DiagKind::ScheduleCompatibility => "schedule",
            DiagKind::Storage => "storage",
            DiagKind::Conflict => "conflict",
        };
        write!(f, "{s}")
    }
}

// ── Location ─────────────────────────────────────────────────────────────

/// The graph element a diagnostic refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Program,
    State(StateId),
    Node(StateId, NodeId),
    Edge(StateId, EdgeId),
    InterstateEdge(usize),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Program => write!(f, "program"),
            Location::State(s) => write!(f, "state {s}"),
            Location::Node(s, n) => write!(f, "state {s}, node {n}"),
            Location::Edge(s, e) => write!(f, "state {s}, edge {e}"),
            Location::InterstateEdge(i) => write!(f, "interstate edge #{i}"),
        }
    }
}

// ── Related location ─────────────────────────────────────────────────────

/// A secondary location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedLocation {
    pub location: Location,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub kind: DiagKind,
    pub location: Location,
    pub message: String,
    pub hint: Option<String>,
    pub related: Vec<RelatedLocation>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint or related locations.
    pub fn new(
        level: DiagLevel,
        kind: DiagKind,
        location: Location,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: None,
            level,
            kind,
            location,
            message: message.into(),
            hint: None,
            related: Vec::new(),
        }
    }

    pub fn error(kind: DiagKind, location: Location, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, kind, location, message)
    }

    pub fn warning(kind: DiagKind, location: Location, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, kind, location, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related location.
    pub fn with_related(mut self, location: Location, label: impl Into<String>) -> Self {
        self.related.push(RelatedLocation {
            location,
            label: label.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

/// True if any diagnostic in the slice is error-level.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}: {}", level, code, self.location, self.message)?;
        } else {
            write!(f, "{}: {}: {}", level, self.location, self.message)?;
        }
        for rel in &self.related {
            write!(f, "\n  note: {}: {}", rel.location, rel.label)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_loc() -> Location {
        Location::Node(StateId(0), NodeId(3))
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::error(DiagKind::Structural, node_loc(), "something failed");
        assert_eq!(format!("{d}"), "error: state s0, node n3: something failed");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::warning(DiagKind::Conflict, Location::Program, "possible overlap")
            .with_code(codes::W0602);
        assert_eq!(format!("{d}"), "warning[W0602]: program: possible overlap");
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(DiagKind::ScheduleCompatibility, node_loc(), "bad nesting")
            .with_code(codes::E0401)
            .with_hint("move the device map to the top level")
            .with_related(Location::Node(StateId(0), NodeId(1)), "enclosing scope here");

        assert_eq!(d.code, Some(codes::E0401));
        assert_eq!(d.hint.as_deref(), Some("move the device map to the top level"));
        assert_eq!(d.related.len(), 1);
        assert!(d.is_error());
        assert!(has_errors(&[d]));
    }
}
