//! Admission decisions and the per-request state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// API version of emitted `AdmissionReview` responses.
pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";

/// The stage of evaluation that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Attestations could not be obtained.
    Fetch,
    /// An attestation failed signature, trust, or subject checks.
    Verify,
    /// A predicate failed a policy condition.
    Condition,
    /// The policy or engine is misconfigured.
    Config,
    /// Policy routing (rule matching, reference parsing).
    Policy,
}

impl Stage {
    /// Lowercase stage name used as the reason prefix.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Verify => "verify",
            Self::Condition => "condition",
            Self::Config => "config",
            Self::Policy => "policy",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The workload may run.
    Allow,
    /// The workload is rejected.
    Deny,
}

/// Lifecycle of one admission request.
///
/// `Pending → Verifying → Evaluating → Decided`. Any non-terminal state may
/// jump straight to `Decided`; nothing leaves `Decided`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionState {
    /// Received; images not yet looked at.
    Pending,
    /// Fetching and verifying attestations.
    Verifying,
    /// Evaluating predicate conditions.
    Evaluating,
    /// Terminal.
    Decided(Verdict),
}

/// An attempted transition the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal admission state transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    /// State before the attempt.
    pub from: AdmissionState,
    /// Requested state.
    pub to: AdmissionState,
}

impl AdmissionState {
    /// Move to `next`, if the transition is legal.
    pub fn advance(self, next: Self) -> Result<Self, InvalidTransition> {
        let legal = matches!(
            (self, next),
            (Self::Pending, Self::Verifying)
                | (Self::Verifying, Self::Evaluating)
                | (Self::Pending | Self::Verifying | Self::Evaluating, Self::Decided(_))
        );
        if legal {
            tracing::debug!(from = ?self, to = ?next, "admission state transition");
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Whether the request has been decided.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Decided(_))
    }
}

/// The decision for one admission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Request identifier.
    pub uid: String,
    /// Whether the workload may run.
    pub allowed: bool,
    /// The stage that decided the request, if one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    /// Human-readable reason, prefixed with the stage name.
    pub reason: String,
    /// Audit-mode and fail-open warnings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Decision {
    /// Allow with no deciding stage.
    pub fn allow(uid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            stage: None,
            reason: reason.into(),
            warnings: Vec::new(),
        }
    }

    /// Allow because of a stage outcome (e.g. no rule matched).
    pub fn allow_at(uid: impl Into<String>, stage: Stage, detail: impl fmt::Display) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            stage: Some(stage),
            reason: format!("{stage}: {detail}"),
            warnings: Vec::new(),
        }
    }

    /// Deny at `stage`.
    pub fn deny(uid: impl Into<String>, stage: Stage, detail: impl fmt::Display) -> Self {
        Self {
            uid: uid.into(),
            allowed: false,
            stage: Some(stage),
            reason: format!("{stage}: {detail}"),
            warnings: Vec::new(),
        }
    }

    /// Attach warnings.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// The verdict this decision carries.
    pub const fn verdict(&self) -> Verdict {
        if self.allowed { Verdict::Allow } else { Verdict::Deny }
    }

    /// Render as a Kubernetes `AdmissionReview` response.
    pub fn to_admission_review(&self) -> serde_json::Value {
        let mut response = serde_json::json!({
            "uid": self.uid,
            "allowed": self.allowed,
        });
        if !self.allowed {
            response["status"] = serde_json::json!({
                "code": 403,
                "message": self.reason,
            });
        }
        if !self.warnings.is_empty() {
            response["warnings"] = serde_json::json!(self.warnings);
        }
        serde_json::json!({
            "apiVersion": ADMISSION_API_VERSION,
            "kind": "AdmissionReview",
            "response": response,
        })
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.allowed { "ALLOW" } else { "DENY" };
        write!(f, "{verdict} {} {}", self.uid, self.reason)
    }
}
