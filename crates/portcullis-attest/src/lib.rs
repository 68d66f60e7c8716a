//! Attestation data model for Portcullis.
//!
//! `portcullis-attest` parses the artifacts an admission verifier consumes:
//! container image references, DSSE envelopes carrying in-toto v1
//! statements, and the typed predicates inside them.

pub mod envelope;
pub mod error;
pub mod predicate;
pub mod reference;
pub mod statement;

pub use envelope::{Attestation, DsseEnvelope, DsseSignature, VerificationMaterial};
pub use error::AttestError;
pub use reference::ImageReference;
pub use statement::InTotoStatement;
