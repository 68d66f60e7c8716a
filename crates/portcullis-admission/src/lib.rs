//! Admission decisions for Portcullis.
//!
//! `portcullis-admission` ties the pieces together: an [`AttestationStore`]
//! supplies attestations for each image in an [`AdmissionRequest`], and the
//! [`AdmissionEngine`] verifies and evaluates them against a policy to
//! produce one [`Decision`] per request.

pub mod decision;
pub mod engine;
pub mod error;
pub mod request;
pub mod store;

pub use decision::{AdmissionState, Decision, Stage, Verdict};
pub use engine::AdmissionEngine;
pub use error::{FetchError, RequestError};
pub use request::AdmissionRequest;
pub use store::{AttestationStore, FileStore, MemoryStore};
