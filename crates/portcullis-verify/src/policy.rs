//! Admission policies.
//!
//! A policy is a list of rules. Each rule selects images by glob pattern,
//! names who may sign their attestations, and lists the attestations an
//! image must carry: a predicate type plus the conditions its predicate
//! must satisfy. Policies are written in TOML or JSON and compiled once into
//! a [`Policy`] that is shared read-only across requests.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use portcullis_attest::ImageReference;
use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::error::ConfigError;
use crate::pattern::wildcard_match;
use crate::trust::{TrustDocument, TrustSet};

/// Default fetch deadline, matching the Kubernetes webhook default.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// What to do when an image fails verification or conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationAction {
    /// Deny the request.
    #[default]
    Enforce,
    /// Allow the request and record the failure as a warning.
    Audit,
}

/// What to do when attestations cannot be fetched before the deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Fail closed: deny.
    #[default]
    Fail,
    /// Fail open: allow with a warning.
    Ignore,
}

/// An attestation a rule requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequiredAttestation {
    /// Predicate type URI to look for.
    pub predicate_type: String,
    /// Conditions the predicate must satisfy, all of them.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Serialized rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDocument {
    /// Rule name, reported in decisions.
    pub name: String,
    /// Image glob patterns.
    pub image_references: Vec<String>,
    /// Who may sign.
    pub attestors: TrustDocument,
    /// Required attestations.
    pub attestations: Vec<RequiredAttestation>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Serialized policy, as written in a policy file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    /// Policy name.
    pub name: String,
    /// Enforce or audit.
    #[serde(default)]
    pub validation_failure_action: ValidationAction,
    /// Fail closed or open on fetch timeout.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Fetch deadline in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Deny images no rule matches.
    #[serde(default)]
    pub require_match: bool,
    /// Rules, in order.
    #[serde(default)]
    pub rules: Vec<RuleDocument>,
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    patterns: Vec<String>,
    trust: TrustSet,
    attestations: Vec<RequiredAttestation>,
}

impl Rule {
    /// Rule name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Image glob patterns.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Trusted signers for this rule.
    pub const fn trust(&self) -> &TrustSet {
        &self.trust
    }

    /// Required attestations.
    pub fn attestations(&self) -> &[RequiredAttestation] {
        &self.attestations
    }

    /// Whether any pattern matches the image's full or short form.
    pub fn matches(&self, image: &ImageReference) -> bool {
        let full = image.to_string();
        let name = image.name();
        self.patterns
            .iter()
            .any(|p| wildcard_match(p, &full) || wildcard_match(p, &name))
    }

    fn compile(doc: &RuleDocument, base_dir: &Path) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid(format!("rule `{}`: {reason}", doc.name));

        if doc.image_references.is_empty() {
            return Err(invalid("image_references is empty"));
        }
        if doc.image_references.iter().any(String::is_empty) {
            return Err(invalid("empty image pattern"));
        }
        if doc.attestations.is_empty() {
            return Err(invalid("no attestations required"));
        }
        for required in &doc.attestations {
            if required.predicate_type.is_empty() {
                return Err(invalid("empty predicate_type"));
            }
            for condition in &required.conditions {
                condition.validate()?;
            }
        }

        let trust = doc.attestors.load(base_dir)?;
        Ok(Self {
            name: doc.name.clone(),
            patterns: doc.image_references.clone(),
            trust,
            attestations: doc.attestations.clone(),
        })
    }
}

/// A compiled, validated policy.
#[derive(Debug, Clone)]
pub struct Policy {
    name: String,
    action: ValidationAction,
    failure_policy: FailurePolicy,
    timeout: Duration,
    require_match: bool,
    rules: Vec<Rule>,
}

impl Policy {
    /// Compile a policy document, resolving PEM paths against `base_dir`.
    pub fn from_document(doc: &PolicyDocument, base_dir: &Path) -> Result<Self, ConfigError> {
        if doc.name.is_empty() {
            return Err(ConfigError::Invalid("policy name is empty".to_owned()));
        }
        if doc.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".to_owned()));
        }
        if doc.rules.is_empty() {
            return Err(ConfigError::Invalid("policy has no rules".to_owned()));
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(doc.rules.len());
        for rule in &doc.rules {
            if rule.name.is_empty() {
                return Err(ConfigError::Invalid("rule name is empty".to_owned()));
            }
            if !seen.insert(rule.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate rule name `{}`", rule.name)));
            }
            rules.push(Rule::compile(rule, base_dir)?);
        }

        tracing::debug!(policy = %doc.name, rules = rules.len(), "policy compiled");
        Ok(Self {
            name: doc.name.clone(),
            action: doc.validation_failure_action,
            failure_policy: doc.failure_policy,
            timeout: Duration::from_secs(doc.timeout_secs),
            require_match: doc.require_match,
            rules,
        })
    }

    /// Parse and compile a TOML policy.
    pub fn from_toml_str(text: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let doc: PolicyDocument = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: base_dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_document(&doc, base_dir)
    }

    /// Parse and compile a JSON policy.
    pub fn from_json_str(text: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let doc: PolicyDocument = serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            path: base_dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_document(&doc, base_dir)
    }

    /// Policy name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enforce or audit.
    pub const fn action(&self) -> ValidationAction {
        self.action
    }

    /// Fail closed or open on fetch timeout.
    pub const fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Fetch deadline.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether unmatched images are denied.
    pub const fn require_match(&self) -> bool {
        self.require_match
    }

    /// All rules, in order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Rules that apply to `image`, in order.
    pub fn rules_for(&self, image: &ImageReference) -> Vec<&Rule> {
        self.rules.iter().filter(|r| r.matches(image)).collect()
    }
}

/// Load a policy file, choosing the format by extension.
pub fn load_policy(path: &Path) -> Result<Policy, ConfigError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let text = || {
        std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    };
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let parse_error = |reason: String| ConfigError::Parse {
        path: path.to_path_buf(),
        reason,
    };

    let doc: PolicyDocument = match ext {
        "toml" => toml::from_str(&text()?).map_err(|e| parse_error(e.to_string()))?,
        "json" => serde_json::from_str(&text()?).map_err(|e| parse_error(e.to_string()))?,
        _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    };
    Policy::from_document(&doc, base_dir)
}
