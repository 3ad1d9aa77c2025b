use thiserror::Error;

/// Failures of the reconstruction engine that a caller may want to
/// tell apart. They travel inside `anyhow::Error`; recover the kind
/// with `err.downcast_ref::<ReconstructionError>()`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconstructionError {
    /// Matrix or vector dimensions disagree.
    #[error("shape mismatch in {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: String,
        expected: String,
        found: String,
    },

    /// A marker cost was requested without any marker genes.
    #[error("marker cost requested with an empty marker set")]
    EmptyMarkerSet,

    /// The kNN graph over cells is not connected.
    #[error("kNN graph has {components} connected components; increase k or clamp unreachable pairs")]
    DisconnectedGraph { components: usize },

    /// Negative weights or zero total mass.
    #[error("invalid distribution: {0}")]
    InvalidDistribution(String),

    /// The entropic transport step produced non-finite values.
    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    /// A run parameter outside its valid range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Input values violating the data model (negative, NaN, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ReconstructionError {
    pub fn shape(what: &str, expected: impl ToString, found: impl ToString) -> Self {
        ReconstructionError::ShapeMismatch {
            what: what.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// The typed reconstruction error behind an `anyhow::Error`, if any
pub fn error_kind(err: &anyhow::Error) -> Option<&ReconstructionError> {
    err.downcast_ref::<ReconstructionError>()
}
