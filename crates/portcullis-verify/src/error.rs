//! Error types for the verification subsystem.
//!
//! The three enums map onto admission stages: [`VerificationError`] for
//! authenticity, [`ConditionError`] for predicate policy, and
//! [`ConfigError`] for a malformed policy or trust configuration.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use portcullis_attest::AttestError;

/// An attestation could not be authenticated or bound to the image.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// The envelope or its statement is structurally invalid.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// A signature is not decodable.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// No trusted key validates any signature on the envelope.
    #[error("no trusted key matches any signature ({tried} keys tried)")]
    NoMatchingKey {
        /// Number of trusted keys that were tried.
        tried: usize,
    },

    /// The signature does not verify with the certificate's key.
    #[error("signature verification failed: {0}")]
    InvalidSignature(String),

    /// The signing certificate was not valid at verification time.
    #[error("certificate expired at {not_after} (verified at {at})")]
    ExpiredCertificate {
        /// End of the certificate's validity window.
        not_after: DateTime<Utc>,
        /// Verification time.
        at: DateTime<Utc>,
    },

    /// The signing certificate is not valid yet.
    #[error("certificate not valid before {not_before} (verified at {at})")]
    CertificateNotYetValid {
        /// Start of the certificate's validity window.
        not_before: DateTime<Utc>,
        /// Verification time.
        at: DateTime<Utc>,
    },

    /// The certificate chain does not lead to a trusted root.
    #[error("untrusted certificate: {0}")]
    UntrustedCertificate(String),

    /// The certificate identity is not one of the trusted identities.
    #[error("signer identity {subject} (issuer {issuer}) is not trusted")]
    IdentityMismatch {
        /// OIDC issuer from the certificate.
        issuer: String,
        /// Subject (email or URI) from the certificate.
        subject: String,
    },

    /// The statement does not name the image digest.
    #[error("attestation subject does not match image digest {digest}")]
    SubjectMismatch {
        /// The resolved image digest.
        digest: String,
    },
}

impl From<AttestError> for VerificationError {
    fn from(e: AttestError) -> Self {
        Self::InvalidEnvelope(e.to_string())
    }
}

/// A predicate does not satisfy a policy condition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("condition on `{key}` failed: {reason}")]
pub struct ConditionError {
    /// The key path of the failing condition.
    pub key: String,
    /// Why it failed.
    pub reason: String,
}

impl ConditionError {
    /// Build an error for `key`.
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// The policy or trust configuration is malformed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("failed to read `{path}`: {source}")]
    Io {
        /// The file that was read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A policy file failed to parse.
    #[error("invalid policy `{path}`: {reason}")]
    Parse {
        /// The policy file.
        path: PathBuf,
        /// The parser's message.
        reason: String,
    },

    /// The policy file extension is not recognized.
    #[error("unsupported policy format `{0}` (expected .toml or .json)")]
    UnsupportedFormat(PathBuf),

    /// A trusted public key could not be decoded.
    #[error("invalid key `{name}`: {reason}")]
    InvalidKey {
        /// Name of the key entry.
        name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A trusted root certificate could not be decoded.
    #[error("invalid root certificate: {0}")]
    InvalidCertificate(String),

    /// A condition is malformed.
    #[error("invalid condition on `{key}`: {reason}")]
    InvalidCondition {
        /// Key path of the condition.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Any other structural problem with the policy.
    #[error("invalid policy: {0}")]
    Invalid(String),
}
