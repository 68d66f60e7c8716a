//! X.509 handling for keyless (certificate-based) signatures.
//!
//! A keyless attestation carries a short-lived leaf certificate binding a
//! public key to an OIDC identity. Verification checks the validity window,
//! walks the presented chain up to a trusted CA, and reads the identity from
//! the subject alternative name and the Fulcio issuer extension.
//!
//! Only CA certificates may issue: every certificate above the leaf needs
//! `BasicConstraints` with `cA` set, `keyCertSign` when it carries a key
//! usage, and must respect its path length limit. The leaf must not be a CA.

use chrono::{DateTime, Utc};
use der::{Decode, Encode};
use x509_cert::Certificate;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{BasicConstraints, KeyUsage, KeyUsages, SubjectAltName};

use crate::error::VerificationError;
use crate::key::{HashAlg, PublicKey};

/// OID of the subject alternative name extension.
const OID_SUBJECT_ALT_NAME: &str = "2.5.29.17";
const OID_BASIC_CONSTRAINTS: &str = "2.5.29.19";
const OID_KEY_USAGE: &str = "2.5.29.15";
/// Fulcio OIDC issuer, raw string value (deprecated form).
const OID_FULCIO_ISSUER_V1: &str = "1.3.6.1.4.1.57264.1.1";
/// Fulcio OIDC issuer, DER `UTF8String` value.
const OID_FULCIO_ISSUER_V2: &str = "1.3.6.1.4.1.57264.1.8";

const OID_ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";
const OID_ECDSA_WITH_SHA384: &str = "1.2.840.10045.4.3.3";

/// A decoded certificate with its original DER.
#[derive(Debug, Clone)]
pub struct ParsedCertificate {
    cert: Certificate,
    der: Vec<u8>,
}

/// The identity a keyless certificate was issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateIdentity {
    /// OIDC issuer, if the certificate carries one.
    pub issuer: Option<String>,
    /// Email addresses and URIs from the subject alternative name.
    pub subjects: Vec<String>,
}

impl ParsedCertificate {
    fn new(cert: Certificate) -> Result<Self, String> {
        let der = cert
            .to_der()
            .map_err(|e| format!("failed to re-encode X.509 certificate: {e}"))?;
        Ok(Self { cert, der })
    }

    /// Decode every certificate in a PEM chain, in order.
    pub fn chain_from_pem(pem: &str) -> Result<Vec<Self>, String> {
        let pem = pem.trim();
        if pem.is_empty() {
            return Err("no CERTIFICATE blocks in PEM".to_owned());
        }
        let certs = Certificate::load_pem_chain(pem.as_bytes())
            .map_err(|e| format!("failed to parse certificate chain: {e}"))?;
        if certs.is_empty() {
            return Err("no CERTIFICATE blocks in PEM".to_owned());
        }
        certs.into_iter().map(Self::new).collect()
    }

    /// The certificate's public key.
    pub fn public_key(&self) -> Result<PublicKey, String> {
        PublicKey::from_spki(&self.cert.tbs_certificate.subject_public_key_info)
    }

    /// Start of the validity window.
    pub fn not_before(&self) -> DateTime<Utc> {
        to_datetime(self.cert.tbs_certificate.validity.not_before)
    }

    /// End of the validity window.
    pub fn not_after(&self) -> DateTime<Utc> {
        to_datetime(self.cert.tbs_certificate.validity.not_after)
    }

    /// Check the validity window against `at`.
    pub fn check_validity(&self, at: DateTime<Utc>) -> Result<(), VerificationError> {
        let not_before = self.not_before();
        if at < not_before {
            return Err(VerificationError::CertificateNotYetValid { not_before, at });
        }
        let not_after = self.not_after();
        if at > not_after {
            return Err(VerificationError::ExpiredCertificate { not_after, at });
        }
        Ok(())
    }

    /// Whether this certificate's signature verifies under `issuer_key`.
    pub fn is_signed_by(&self, issuer_key: &PublicKey) -> bool {
        let hash = match self.cert.signature_algorithm.oid.to_string().as_str() {
            OID_ECDSA_WITH_SHA256 => HashAlg::Sha256,
            OID_ECDSA_WITH_SHA384 => HashAlg::Sha384,
            other => {
                tracing::debug!(algorithm = other, "unsupported certificate signature algorithm");
                return false;
            }
        };
        let Ok(tbs) = self.cert.tbs_certificate.to_der() else {
            return false;
        };
        issuer_key.verify(&tbs, self.cert.signature.raw_bytes(), hash)
    }

    fn extension(&self, oid: &str) -> Option<&[u8]> {
        self.cert
            .tbs_certificate
            .extensions
            .iter()
            .flatten()
            .find(|ext| ext.extn_id.to_string() == oid)
            .map(|ext| ext.extn_value.as_bytes())
    }

    /// The basic constraints extension, if present.
    pub fn basic_constraints(&self) -> Result<Option<BasicConstraints>, String> {
        self.extension(OID_BASIC_CONSTRAINTS)
            .map(|value| {
                BasicConstraints::from_der(value)
                    .map_err(|e| format!("malformed basic constraints: {e}"))
            })
            .transpose()
    }

    /// The key usage extension, if present.
    pub fn key_usage(&self) -> Result<Option<KeyUsage>, String> {
        self.extension(OID_KEY_USAGE)
            .map(|value| KeyUsage::from_der(value).map_err(|e| format!("malformed key usage: {e}")))
            .transpose()
    }

    /// Whether the certificate claims to be a CA.
    pub fn is_ca(&self) -> Result<bool, String> {
        Ok(self.basic_constraints()?.is_some_and(|bc| bc.ca))
    }

    /// Check that this certificate may issue a chain with `intermediates_below`
    /// CA certificates between it and the leaf.
    fn check_issuer(&self, intermediates_below: usize) -> Result<(), String> {
        let Some(constraints) = self.basic_constraints()?.filter(|bc| bc.ca) else {
            return Err("issuer is not a CA certificate".to_owned());
        };
        if let Some(limit) = constraints.path_len_constraint {
            if intermediates_below > usize::from(limit) {
                return Err(format!(
                    "path length {intermediates_below} exceeds issuer limit {limit}"
                ));
            }
        }
        if let Some(usage) = self.key_usage()? {
            if !usage.0.contains(KeyUsages::KeyCertSign) {
                return Err("issuer key usage lacks keyCertSign".to_owned());
            }
        }
        Ok(())
    }

    /// Whether this is byte-for-byte the same certificate as `other`.
    pub fn same_as(&self, other: &Self) -> bool {
        self.der == other.der
    }

    /// Read the OIDC issuer and SAN subjects.
    pub fn identity(&self) -> CertificateIdentity {
        let mut issuer_v1 = None;
        let mut issuer_v2 = None;
        let mut subjects = Vec::new();

        for ext in self.cert.tbs_certificate.extensions.iter().flatten() {
            let value = ext.extn_value.as_bytes();
            match ext.extn_id.to_string().as_str() {
                OID_SUBJECT_ALT_NAME => {
                    if let Ok(san) = SubjectAltName::from_der(value) {
                        subjects.extend(san.0.iter().filter_map(|name| match name {
                            GeneralName::Rfc822Name(email) => Some(email.to_string()),
                            GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
                            _ => None,
                        }));
                    }
                }
                OID_FULCIO_ISSUER_V1 => issuer_v1 = std::str::from_utf8(value).ok().map(String::from),
                OID_FULCIO_ISSUER_V2 => issuer_v2 = decode_utf8_extension(value),
                _ => {}
            }
        }

        CertificateIdentity {
            issuer: issuer_v2.or(issuer_v1),
            subjects,
        }
    }
}

/// Check that `chain` (leaf first) is valid at `at` and leads to one of `roots`.
///
/// Every certificate must be signed by its successor, which must be a CA
/// allowed to issue at that depth. The last one must either be a trusted
/// root itself or be signed by one.
pub fn verify_chain(
    chain: &[ParsedCertificate],
    roots: &[ParsedCertificate],
    at: DateTime<Utc>,
) -> Result<(), VerificationError> {
    let Some(last) = chain.last() else {
        return Err(VerificationError::UntrustedCertificate("empty certificate chain".to_owned()));
    };
    if roots.is_empty() {
        return Err(VerificationError::UntrustedCertificate(
            "no trusted roots configured for keyless verification".to_owned(),
        ));
    }

    for cert in chain {
        cert.check_validity(at)?;
    }

    if chain[0].is_ca().map_err(VerificationError::UntrustedCertificate)? {
        return Err(VerificationError::UntrustedCertificate(
            "leaf certificate is a CA".to_owned(),
        ));
    }

    for (position, pair) in chain.windows(2).enumerate() {
        pair[1].check_issuer(position).map_err(|reason| {
            VerificationError::UntrustedCertificate(format!("certificate {}: {reason}", position + 1))
        })?;
        let parent_key = pair[1].public_key().map_err(VerificationError::UntrustedCertificate)?;
        if !pair[0].is_signed_by(&parent_key) {
            return Err(VerificationError::UntrustedCertificate(format!(
                "certificate {position} is not signed by certificate {}",
                position + 1
            )));
        }
    }

    let intermediates = chain.len() - 1;
    let anchored = roots.iter().any(|root| {
        last.same_as(root)
            || (root.check_issuer(intermediates).is_ok()
                && root
                    .public_key()
                    .is_ok_and(|root_key| last.is_signed_by(&root_key)))
    });
    if anchored {
        Ok(())
    } else {
        Err(VerificationError::UntrustedCertificate(
            "chain does not lead to a trusted root".to_owned(),
        ))
    }
}

fn to_datetime(time: x509_cert::time::Time) -> DateTime<Utc> {
    let secs = i64::try_from(time.to_unix_duration().as_secs()).unwrap_or(i64::MAX);
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Decode an extension value as DER `UTF8String`, falling back to raw UTF-8.
fn decode_utf8_extension(value: &[u8]) -> Option<String> {
    if let Ok(s) = der::asn1::Utf8StringRef::from_der(value) {
        return Some(s.to_string());
    }
    std::str::from_utf8(value).ok().map(String::from)
}
