//! Verification and policy evaluation for Portcullis attestations.
//!
//! `portcullis-verify` checks that an attestation was signed by someone in
//! the configured trust set, that it is bound to the image being admitted,
//! and that its predicate satisfies the policy's conditions.
//!
//! The pipeline has three phases:
//! 1. **Signature**: ECDSA over the DSSE PAE, by a trusted key or a
//!    keyless certificate chaining to a trusted root
//! 2. **Subject**: the statement must name the image digest
//! 3. **Conditions**: declarative checks against the predicate

pub mod certificate;
pub mod condition;
pub mod digest;
pub mod duration;
pub mod error;
pub mod key;
pub mod pattern;
pub mod policy;
pub mod signature;
pub mod trust;

// Re-export primary types for convenience.
pub use condition::{Condition, Operator, evaluate_all};
pub use error::{ConditionError, ConfigError, VerificationError};
pub use policy::{FailurePolicy, Policy, RequiredAttestation, Rule, ValidationAction, load_policy};
pub use signature::{SignerIdentity, VerifiedAttestation, verify_attestation};
pub use trust::TrustSet;
