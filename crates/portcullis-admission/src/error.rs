//! Error types for attestation stores and admission requests.

use std::path::PathBuf;
use std::time::Duration;

/// Attestations for an image could not be obtained.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The store has no attestations for the image.
    #[error("no attestations found for {image}")]
    NotFound {
        /// The image that was looked up.
        image: String,
    },

    /// None of the fetched attestations has the required predicate type.
    #[error("no attestation of type {predicate_type} found for {image}")]
    NoMatchingAttestation {
        /// The image that was looked up.
        image: String,
        /// The required predicate type.
        predicate_type: String,
    },

    /// A tag could not be resolved to a digest.
    #[error("cannot resolve tag `{tag}` of {image} to a digest")]
    UnresolvedTag {
        /// The image that was looked up.
        image: String,
        /// The tag.
        tag: String,
    },

    /// The fetch did not finish before the deadline.
    #[error("fetching attestations for {image} timed out after {}s", after.as_secs())]
    Timeout {
        /// The image that was looked up.
        image: String,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// A store file could not be read.
    #[error("failed to read `{path}`: {source}")]
    Io {
        /// The file that was read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A store file is malformed.
    #[error("malformed store file `{path}`: {reason}")]
    Parse {
        /// The file that was read.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },
}

/// An admission request document is malformed.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The document is not valid JSON.
    #[error("invalid request JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is missing or has the wrong type.
    #[error("request is missing `{0}`")]
    MissingField(&'static str),

    /// The document is neither a bare request nor an `AdmissionReview`.
    #[error("unrecognized request document: {0}")]
    Unrecognized(String),
}
