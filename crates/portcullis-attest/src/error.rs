//! Error types for the attestation data model.

/// Errors from parsing attestation artifacts.
#[derive(Debug, thiserror::Error)]
pub enum AttestError {
    /// The image reference could not be parsed.
    #[error("invalid image reference `{reference}`: {reason}")]
    InvalidReference {
        /// The reference as given.
        reference: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The DSSE envelope is structurally invalid.
    #[error("invalid DSSE envelope: {0}")]
    InvalidEnvelope(String),

    /// The in-toto statement is structurally invalid.
    #[error("invalid in-toto statement: {0}")]
    InvalidStatement(String),

    /// The predicate does not match the schema of its declared type.
    #[error("predicate does not match `{predicate_type}`: {reason}")]
    InvalidPredicate {
        /// The declared predicate type URI.
        predicate_type: String,
        /// The schema failure.
        reason: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
