//! in-toto v1 attestation statements.
//!
//! See: <https://github.com/in-toto/attestation/blob/main/spec/v1/statement.md>

use serde::{Deserialize, Serialize};

use crate::error::AttestError;

/// An in-toto v1 attestation statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InTotoStatement {
    /// Always [`InTotoStatement::TYPE`].
    #[serde(rename = "_type")]
    pub statement_type: String,
    /// The artifacts this statement is about.
    pub subject: Vec<Subject>,
    /// URI identifying the predicate schema.
    #[serde(rename = "predicateType")]
    pub predicate_type: String,
    /// The predicate body.
    #[serde(default)]
    pub predicate: serde_json::Value,
}

impl InTotoStatement {
    /// The canonical statement type URI.
    pub const TYPE: &str = "https://in-toto.io/Statement/v1";
    /// The DSSE payload type for in-toto statements.
    pub const PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

    /// Parse and validate a statement from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AttestError> {
        let statement: Self = serde_json::from_slice(bytes)
            .map_err(|e| AttestError::InvalidStatement(e.to_string()))?;
        statement.validate()?;
        Ok(statement)
    }

    fn validate(&self) -> Result<(), AttestError> {
        if self.statement_type != Self::TYPE {
            return Err(AttestError::InvalidStatement(format!(
                "unexpected statement type: expected '{}', got '{}'",
                Self::TYPE,
                self.statement_type
            )));
        }
        if self.subject.is_empty() {
            return Err(AttestError::InvalidStatement("statement has no subjects".to_owned()));
        }
        if self.predicate_type.is_empty() {
            return Err(AttestError::InvalidStatement("empty predicateType".to_owned()));
        }
        Ok(())
    }

    /// Whether any subject carries the given `sha256:<hex>` digest.
    pub fn binds_digest(&self, digest: &str) -> bool {
        let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
        self.subject
            .iter()
            .filter_map(|s| s.digest.sha256.as_deref())
            .any(|d| d.eq_ignore_ascii_case(hex))
    }
}

/// A subject (attested artifact) of a statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    /// Artifact name, usually the image repository.
    pub name: String,
    /// Content digests.
    pub digest: DigestSet,
}

/// A set of digest algorithms and their hex-encoded values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestSet {
    /// SHA-256 hex digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}
