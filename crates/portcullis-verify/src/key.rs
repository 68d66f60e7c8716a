//! ECDSA public keys decoded from SPKI.
//!
//! Uses `aws-lc-rs` for verification. P-256 and P-384 keys are accepted,
//! which covers cosign-generated keys and the Sigstore CA hierarchy.

use aws_lc_rs::signature::{
    self, ECDSA_P256_SHA256_ASN1, ECDSA_P256_SHA384_ASN1, ECDSA_P384_SHA256_ASN1,
    ECDSA_P384_SHA384_ASN1, VerificationAlgorithm,
};
use der::DecodePem;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

/// OID of `id-ecPublicKey`.
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";

const P256_POINT_LEN: usize = 65;
const P384_POINT_LEN: usize = 97;

/// Elliptic curve of a public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    /// NIST P-256.
    P256,
    /// NIST P-384.
    P384,
}

/// Digest used with an ECDSA signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
}

/// An ECDSA public key: curve plus uncompressed point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    curve: Curve,
    point: Vec<u8>,
}

impl PublicKey {
    /// Decode a PEM `PUBLIC KEY` (SPKI) block.
    pub fn from_pem(pem: &str) -> Result<Self, String> {
        let spki = SubjectPublicKeyInfoOwned::from_pem(pem.trim())
            .map_err(|e| format!("invalid PEM public key: {e}"))?;
        Self::from_spki(&spki)
    }

    /// Build from an already-decoded `SubjectPublicKeyInfo`.
    pub fn from_spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self, String> {
        let oid = spki.algorithm.oid.to_string();
        if oid != OID_EC_PUBLIC_KEY {
            return Err(format!("unsupported key algorithm {oid} (only ECDSA keys are accepted)"));
        }
        let point = spki.subject_public_key.raw_bytes();
        let curve = match point.len() {
            P256_POINT_LEN => Curve::P256,
            P384_POINT_LEN => Curve::P384,
            n => return Err(format!("unsupported EC point length {n}")),
        };
        Ok(Self {
            curve,
            point: point.to_vec(),
        })
    }

    /// The key's curve.
    pub const fn curve(&self) -> Curve {
        self.curve
    }

    /// Verify an ASN.1 DER ECDSA signature over `message`.
    pub fn verify(&self, message: &[u8], sig: &[u8], hash: HashAlg) -> bool {
        signature::UnparsedPublicKey::new(self.algorithm(hash), &self.point)
            .verify(message, sig)
            .is_ok()
    }

    /// Verify with the curve's native digest (SHA-256 for P-256, SHA-384 for P-384).
    pub fn verify_native(&self, message: &[u8], sig: &[u8]) -> bool {
        let hash = match self.curve {
            Curve::P256 => HashAlg::Sha256,
            Curve::P384 => HashAlg::Sha384,
        };
        self.verify(message, sig, hash)
    }

    fn algorithm(&self, hash: HashAlg) -> &'static dyn VerificationAlgorithm {
        match (self.curve, hash) {
            (Curve::P256, HashAlg::Sha256) => &ECDSA_P256_SHA256_ASN1,
            (Curve::P256, HashAlg::Sha384) => &ECDSA_P256_SHA384_ASN1,
            (Curve::P384, HashAlg::Sha256) => &ECDSA_P384_SHA256_ASN1,
            (Curve::P384, HashAlg::Sha384) => &ECDSA_P384_SHA384_ASN1,
        }
    }
}
