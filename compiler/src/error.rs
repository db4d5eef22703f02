// error.rs — Hard error types
//
// Validation problems are reported as `Diagnostic` values; the errors here
// are the conditions that stop an operation outright, such as an unreadable
// document or a bad expression.

use thiserror::Error;

use crate::id::{NodeId, StateId};

/// Result type for fallible SDFG operations.
pub type SdfgResult<T> = Result<T, SdfgError>;

/// Failures of symbolic evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("division by zero in `{0}`")]
    DivisionByZero(String),

    #[error("symbol `{0}` is not bound")]
    Unbound(String),

    #[error("integer overflow while evaluating `{0}`")]
    Overflow(String),
}

#[derive(Debug, Error)]
pub enum SdfgError {
    /// The persisted document carries an unsupported version tag.
    #[error("incompatible document version `{found}` (supported: {supported}.x)")]
    Compatibility { found: String, supported: u32 },

    #[error("malformed document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("invalid document: {0}")]
    Schema(String),

    #[error("cannot parse `{text}`: {message}")]
    Parse { text: String, message: String },

    #[error(transparent)]
    Symbol(#[from] SymbolError),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("unknown state {0}")]
    UnknownState(StateId),

    #[error("duplicate data descriptor `{0}`")]
    DuplicateData(String),

    /// A map bracket has an outer edge but nothing inside to derive it from.
    #[error("map `{map}` has no inner memlet to propagate")]
    NoInnerMemlet { map: String },

    /// A non-monotonic access sweeps a dimension whose extent is unknown.
    #[error("cannot bound dimension {dim} accessed inside map `{map}`: the access is not monotonic and the container shape is unknown")]
    UnboundedProjection { map: String, dim: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
