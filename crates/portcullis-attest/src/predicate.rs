//! Typed predicates.
//!
//! Conditions are evaluated against the raw predicate JSON, but predicate
//! types with a known schema are decoded first so that a malformed report
//! fails with a schema error rather than a confusing missing-key error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AttestError;

/// Predicate type of cosign vulnerability scan attestations.
pub const VULN_PREDICATE_TYPE: &str = "https://cosign.sigstore.dev/attestation/vuln/v1";

/// A vulnerability scan report, as attested by `cosign attest --type vuln`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnPredicate {
    /// How the scan was invoked.
    #[serde(default)]
    pub invocation: Option<Invocation>,
    /// The scanner and its raw result.
    pub scanner: Scanner,
    /// Scan timing.
    pub metadata: ScanMetadata,
}

/// Scan invocation details. Every field is optional in practice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Invocation {
    /// Invocation parameters.
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    /// URI of the invoking system (e.g. a CI run).
    #[serde(default)]
    pub uri: Option<String>,
    /// Event identifier of the invocation.
    #[serde(default)]
    pub event_id: Option<String>,
    /// Identifier of the builder that ran the scan.
    #[serde(default, rename = "builder.id")]
    pub builder_id: Option<String>,
}

/// The scanner that produced the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scanner {
    /// Scanner identity, usually a purl.
    pub uri: String,
    /// Scanner version.
    #[serde(default)]
    pub version: Option<String>,
    /// Vulnerability database used.
    #[serde(default)]
    pub db: Option<ScannerDb>,
    /// Scanner-specific result document.
    #[serde(default)]
    pub result: serde_json::Value,
}

/// Vulnerability database metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerDb {
    /// Database URI.
    #[serde(default)]
    pub uri: Option<String>,
    /// Database version.
    #[serde(default)]
    pub version: Option<String>,
}

/// When the scan ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanMetadata {
    /// Scan start time.
    pub scan_started_on: DateTime<Utc>,
    /// Scan finish time.
    pub scan_finished_on: DateTime<Utc>,
}

impl VulnPredicate {
    /// Decode a predicate body.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, AttestError> {
        Self::deserialize(value).map_err(|e| AttestError::InvalidPredicate {
            predicate_type: VULN_PREDICATE_TYPE.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Time elapsed between scan completion and `now`.
    pub fn scan_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.metadata.scan_finished_on)
    }
}

/// Check a predicate body against the schema of its type, when known.
///
/// Unknown predicate types are accepted as-is.
pub fn check_schema(predicate_type: &str, value: &serde_json::Value) -> Result<(), AttestError> {
    if predicate_type == VULN_PREDICATE_TYPE {
        VulnPredicate::from_value(value)?;
    }
    Ok(())
}
