//! Signature verification for attestation envelopes.
//!
//! Two signing modes are supported:
//! - **Key**: the envelope is signed by a long-lived ECDSA key that must be
//!   in the trust set. Keys embedded in the attestation are never trusted;
//!   the signer's hint only decides which trusted key is tried first.
//! - **Keyless**: the envelope is signed by a short-lived key certified by
//!   a CA chaining to a trusted root, for an OIDC identity the trust set
//!   lists.
//!
//! Signatures cover the DSSE PAE, never the raw payload.

use std::fmt;

use chrono::{DateTime, Utc};
use portcullis_attest::{Attestation, DsseEnvelope, InTotoStatement, VerificationMaterial};

use crate::certificate::{ParsedCertificate, verify_chain};
use crate::error::VerificationError;
use crate::trust::{TrustSet, TrustedKey};

/// Who signed a verified attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerIdentity {
    /// A trusted public key, by name.
    Key {
        /// Name of the trusted key entry.
        name: String,
    },
    /// A keyless identity from a certificate.
    Keyless {
        /// OIDC issuer.
        issuer: String,
        /// Certificate subject (email or URI).
        subject: String,
    },
}

impl fmt::Display for SignerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key { name } => write!(f, "key `{name}`"),
            Self::Keyless { issuer, subject } => write!(f, "{subject} (issuer {issuer})"),
        }
    }
}

/// An attestation whose signature checked out, with its decoded statement.
#[derive(Debug, Clone)]
pub struct VerifiedAttestation {
    /// The statement; safe to evaluate.
    pub statement: InTotoStatement,
    /// Who signed it.
    pub signer: SignerIdentity,
}

/// Verify an attestation's signature against `trust` at time `at`.
///
/// Only after a signature verifies is the payload parsed as a statement.
pub fn verify_attestation(
    attestation: &Attestation,
    trust: &TrustSet,
    at: DateTime<Utc>,
) -> Result<VerifiedAttestation, VerificationError> {
    let envelope = &attestation.dsse_envelope;
    envelope.validate()?;
    let pae = envelope.pae_bytes()?;
    let signatures = decode_signatures(envelope)?;

    let signer = match &attestation.verification_material {
        VerificationMaterial::PublicKey { hint } => {
            verify_keyed(&pae, &signatures, trust, hint.as_deref())?
        }
        VerificationMaterial::Certificate { certificate_chain } => {
            verify_keyless(&pae, &signatures, certificate_chain, trust, at)?
        }
    };

    let statement = envelope.extract_statement()?;
    tracing::debug!(
        signer = %signer,
        predicate_type = %statement.predicate_type,
        attestation = %attestation.content_digest(),
        "attestation signature verified"
    );
    Ok(VerifiedAttestation { statement, signer })
}

fn decode_signatures(envelope: &DsseEnvelope) -> Result<Vec<Vec<u8>>, VerificationError> {
    envelope
        .signatures
        .iter()
        .enumerate()
        .map(|(i, s)| {
            s.decode_sig()
                .map_err(|e| VerificationError::MalformedSignature(format!("signature {i}: {e}")))
        })
        .collect()
}

fn verify_keyed(
    pae: &[u8],
    signatures: &[Vec<u8>],
    trust: &TrustSet,
    hint: Option<&str>,
) -> Result<SignerIdentity, VerificationError> {
    // The hinted key goes first; every trusted key is still tried.
    let mut keys: Vec<&TrustedKey> = trust.keys().iter().collect();
    if let Some(hint) = hint {
        keys.sort_by_key(|k| k.name != hint);
    }

    for key in &keys {
        if signatures.iter().any(|sig| key.key.verify_native(pae, sig)) {
            return Ok(SignerIdentity::Key {
                name: key.name.clone(),
            });
        }
    }
    Err(VerificationError::NoMatchingKey { tried: keys.len() })
}

fn verify_keyless(
    pae: &[u8],
    signatures: &[Vec<u8>],
    certificate_chain: &str,
    trust: &TrustSet,
    at: DateTime<Utc>,
) -> Result<SignerIdentity, VerificationError> {
    if trust.identities().is_empty() {
        return Err(VerificationError::UntrustedCertificate(
            "no keyless identities are trusted".to_owned(),
        ));
    }

    let chain = ParsedCertificate::chain_from_pem(certificate_chain)
        .map_err(VerificationError::UntrustedCertificate)?;
    verify_chain(&chain, trust.roots(), at)?;

    let leaf = &chain[0];
    let identity = leaf.identity();
    let issuer = identity.issuer.unwrap_or_default();
    let matched = identity
        .subjects
        .iter()
        .find(|subject| trust.identities().iter().any(|id| id.matches(&issuer, subject)));
    let Some(subject) = matched else {
        return Err(VerificationError::IdentityMismatch {
            issuer,
            subject: identity.subjects.join(", "),
        });
    };

    let leaf_key = leaf
        .public_key()
        .map_err(VerificationError::UntrustedCertificate)?;
    if !signatures.iter().any(|sig| leaf_key.verify_native(pae, sig)) {
        return Err(VerificationError::InvalidSignature(
            "no signature verifies with the certificate key".to_owned(),
        ));
    }

    Ok(SignerIdentity::Keyless {
        issuer,
        subject: subject.clone(),
    })
}
