//! DSSE envelopes and the attestations that carry them.
//!
//! An [`Attestation`] is what an attestation store hands back for an
//! image: a DSSE envelope whose payload is an in-toto statement, plus the
//! verification material the signer published alongside it.
//!
//! See: <https://github.com/secure-systems-lab/dsse/blob/master/protocol.md>

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AttestError;
use crate::statement::InTotoStatement;

/// A DSSE (Dead Simple Signing Envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DsseEnvelope {
    /// MIME type of the payload.
    pub payload_type: String,
    /// Base64-encoded payload.
    pub payload: String,
    /// Signatures over `PAE(payloadType, payload)`.
    pub signatures: Vec<DsseSignature>,
}

impl DsseEnvelope {
    /// Check structural integrity: non-empty type, payload, and signatures.
    pub fn validate(&self) -> Result<(), AttestError> {
        if self.payload_type.is_empty() {
            return Err(AttestError::InvalidEnvelope("empty payloadType".to_owned()));
        }
        if self.payload.is_empty() {
            return Err(AttestError::InvalidEnvelope("empty payload".to_owned()));
        }
        if self.signatures.is_empty() {
            return Err(AttestError::InvalidEnvelope("no signatures".to_owned()));
        }
        Ok(())
    }

    /// Decode the payload bytes.
    pub fn decode_payload(&self) -> Result<Vec<u8>, AttestError> {
        decode_base64(&self.payload)
            .map_err(|e| AttestError::InvalidEnvelope(format!("payload is not base64: {e}")))
    }

    /// The bytes every signature in this envelope is computed over.
    pub fn pae_bytes(&self) -> Result<Vec<u8>, AttestError> {
        let decoded = self.decode_payload()?;
        Ok(pae(&self.payload_type, &decoded))
    }

    /// Decode and parse the payload as an in-toto statement.
    pub fn extract_statement(&self) -> Result<InTotoStatement, AttestError> {
        if self.payload_type != InTotoStatement::PAYLOAD_TYPE {
            return Err(AttestError::InvalidEnvelope(format!(
                "unexpected payloadType: expected '{}', got '{}'",
                InTotoStatement::PAYLOAD_TYPE,
                self.payload_type
            )));
        }
        InTotoStatement::from_slice(&self.decode_payload()?)
    }
}

/// A single signature within a DSSE envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DsseSignature {
    /// Optional key identifier. Not authenticated by DSSE.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub keyid: String,
    /// Base64-encoded signature.
    pub sig: String,
}

impl DsseSignature {
    /// Decode the raw signature bytes.
    pub fn decode_sig(&self) -> Result<Vec<u8>, base64::DecodeError> {
        decode_base64(&self.sig)
    }
}

/// Compute the DSSE Pre-Authentication Encoding.
///
/// ```text
/// PAE(type, body) = "DSSEv1" + SP + LEN(type) + SP + type + SP + LEN(body) + SP + body
/// ```
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let header = format!(
        "DSSEv1 {} {} {} ",
        payload_type.len(),
        payload_type,
        payload.len()
    );
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Signers emit either standard or URL-safe base64; accept both.
fn decode_base64(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};

    STANDARD
        .decode(s)
        .or_else(|_| URL_SAFE.decode(s))
        .or_else(|_| URL_SAFE_NO_PAD.decode(s))
}

/// A signed attestation as fetched from an attestation store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    /// The signed envelope.
    pub dsse_envelope: DsseEnvelope,
    /// Material the signer published to support verification.
    pub verification_material: VerificationMaterial,
}

impl Attestation {
    /// Stable identifier for logs: `sha256:` of the encoded payload.
    pub fn content_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.dsse_envelope.payload.as_bytes());
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }

    /// The declared predicate type, read without verifying anything.
    ///
    /// Used only for routing; callers must verify before trusting the
    /// statement.
    pub fn unverified_predicate_type(&self) -> Option<String> {
        self.dsse_envelope
            .extract_statement()
            .ok()
            .map(|s| s.predicate_type)
    }
}

/// Material needed to verify an attestation's signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VerificationMaterial {
    /// Signed with a long-lived key; the verifier must already trust it.
    #[serde(rename = "public_key")]
    PublicKey {
        /// Optional key name hint from the signer.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
    /// Keyless signing: a short-lived certificate, leaf first.
    #[serde(rename = "certificate")]
    Certificate {
        /// PEM-encoded certificate chain, leaf first.
        certificate_chain: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_for(statement: &serde_json::Value) -> DsseEnvelope {
        DsseEnvelope {
            payload_type: InTotoStatement::PAYLOAD_TYPE.to_owned(),
            payload: base64::engine::general_purpose::STANDARD.encode(statement.to_string()),
            signatures: vec![DsseSignature {
                keyid: String::new(),
                sig: "c2ln".to_owned(),
            }],
        }
    }

    fn statement() -> serde_json::Value {
        serde_json::json!({
            "_type": InTotoStatement::TYPE,
            "subject": [{ "name": "ghcr.io/acme/api", "digest": { "sha256": "ab" } }],
            "predicateType": "https://example.com/predicate/v1",
            "predicate": {}
        })
    }

    #[test]
    fn pae_matches_dsse_reference_vector() {
        let encoded = pae("http://example.com/HelloWorld", b"hello world");
        assert_eq!(
            encoded,
            b"DSSEv1 29 http://example.com/HelloWorld 11 hello world".to_vec()
        );
    }

    #[test]
    fn extracts_statement() {
        let env = envelope_for(&statement());
        env.validate().expect("valid");
        let stmt = env.extract_statement().expect("statement");
        assert_eq!(stmt.predicate_type, "https://example.com/predicate/v1");
    }

    #[test]
    fn url_safe_payload_is_accepted() {
        let mut env = envelope_for(&statement());
        env.payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(statement().to_string());
        assert!(env.extract_statement().is_ok());
    }

    #[test]
    fn wrong_payload_type_rejected() {
        let mut env = envelope_for(&statement());
        env.payload_type = "text/plain".to_owned();
        let err = env.extract_statement().unwrap_err();
        assert!(err.to_string().contains("unexpected payloadType"));
    }

    #[test]
    fn empty_signatures_rejected() {
        let mut env = envelope_for(&statement());
        env.signatures.clear();
        assert!(env.validate().is_err());
    }

    #[test]
    fn attestation_json_shape() {
        let att = Attestation {
            dsse_envelope: envelope_for(&statement()),
            verification_material: VerificationMaterial::PublicKey {
                hint: Some("ci".to_owned()),
            },
        };
        let value = serde_json::to_value(&att).expect("serialize");
        assert_eq!(value["verificationMaterial"]["type"], "public_key");
        assert_eq!(value["dsseEnvelope"]["payloadType"], InTotoStatement::PAYLOAD_TYPE);
        assert!(att.content_digest().starts_with("sha256:"));
        assert_eq!(
            att.unverified_predicate_type().as_deref(),
            Some("https://example.com/predicate/v1")
        );
    }

    #[test]
    fn certificate_material_round_trips() {
        let json = r#"{"type":"certificate","certificate_chain":"-----BEGIN CERTIFICATE-----"}"#;
        let material: VerificationMaterial = serde_json::from_str(json).expect("parse");
        assert!(matches!(material, VerificationMaterial::Certificate { .. }));
    }
}
