//! Trust configuration: who may sign attestations.
//!
//! A [`TrustDocument`] is the serialized form found in policy files; it is
//! loaded once into a [`TrustSet`] of decoded keys, identities, and root
//! certificates that stays read-only while requests are evaluated.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::certificate::ParsedCertificate;
use crate::error::ConfigError;
use crate::key::PublicKey;
use crate::pattern::wildcard_match;

/// PEM material given inline or by path (relative to the policy file).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PemSource {
    /// Inline PEM text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pem: Option<String>,
    /// Path to a PEM file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl PemSource {
    /// Read the PEM text, resolving `path` against `base_dir`.
    pub fn read(&self, base_dir: &Path, what: &str) -> Result<String, ConfigError> {
        match (&self.pem, &self.path) {
            (Some(pem), None) => Ok(pem.clone()),
            (None, Some(path)) => {
                let full = base_dir.join(path);
                std::fs::read_to_string(&full).map_err(|source| ConfigError::Io { path: full, source })
            }
            (Some(_), Some(_)) => Err(ConfigError::Invalid(format!(
                "{what}: set either `pem` or `path`, not both"
            ))),
            (None, None) => Err(ConfigError::Invalid(format!("{what}: `pem` or `path` is required"))),
        }
    }
}

/// A named public key entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "KeyEntryDocument")]
pub struct KeyEntry {
    /// Name reported as the signer identity.
    pub name: String,
    /// The PEM `PUBLIC KEY`.
    #[serde(flatten)]
    pub source: PemSource,
}

/// Wire form of [`KeyEntry`]. `flatten` cannot be combined with
/// `deny_unknown_fields`, so the fields are spelled out here.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyEntryDocument {
    name: String,
    #[serde(default)]
    pem: Option<String>,
    #[serde(default)]
    path: Option<PathBuf>,
}

impl From<KeyEntryDocument> for KeyEntry {
    fn from(doc: KeyEntryDocument) -> Self {
        Self {
            name: doc.name,
            source: PemSource {
                pem: doc.pem,
                path: doc.path,
            },
        }
    }
}

/// A keyless signer identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeylessIdentity {
    /// OIDC issuer URL, matched exactly.
    pub issuer: String,
    /// Certificate subject (email or URI); `*` wildcards allowed.
    pub subject: String,
}

impl KeylessIdentity {
    /// Whether a certificate's issuer and subject match this identity.
    pub fn matches(&self, issuer: &str, subject: &str) -> bool {
        self.issuer == issuer && wildcard_match(&self.subject, subject)
    }
}

/// Serialized trust configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustDocument {
    /// Trusted public keys.
    #[serde(default)]
    pub keys: Vec<KeyEntry>,
    /// Trusted keyless identities.
    #[serde(default)]
    pub keyless: Vec<KeylessIdentity>,
    /// CA certificates that keyless chains must lead to.
    #[serde(default)]
    pub roots: Vec<PemSource>,
}

impl TrustDocument {
    /// Decode all key and certificate material.
    pub fn load(&self, base_dir: &Path) -> Result<TrustSet, ConfigError> {
        let mut keys = Vec::with_capacity(self.keys.len());
        for entry in &self.keys {
            let pem = entry.source.read(base_dir, &format!("key `{}`", entry.name))?;
            let key = PublicKey::from_pem(&pem).map_err(|reason| ConfigError::InvalidKey {
                name: entry.name.clone(),
                reason,
            })?;
            keys.push(TrustedKey {
                name: entry.name.clone(),
                key,
            });
        }

        let mut roots = Vec::new();
        for source in &self.roots {
            let pem = source.read(base_dir, "root certificate")?;
            roots.extend(
                ParsedCertificate::chain_from_pem(&pem).map_err(ConfigError::InvalidCertificate)?,
            );
        }

        if !self.keyless.is_empty() && roots.is_empty() {
            return Err(ConfigError::Invalid(
                "keyless identities require at least one trusted root".to_owned(),
            ));
        }

        let set = TrustSet {
            keys,
            identities: self.keyless.clone(),
            roots,
        };
        if set.is_empty() {
            return Err(ConfigError::Invalid(
                "attestors must list at least one key or keyless identity".to_owned(),
            ));
        }
        Ok(set)
    }
}

/// A trusted public key.
#[derive(Debug, Clone)]
pub struct TrustedKey {
    /// Name reported as the signer identity.
    pub name: String,
    /// The decoded key.
    pub key: PublicKey,
}

/// Decoded, read-only trust configuration.
#[derive(Debug, Clone, Default)]
pub struct TrustSet {
    keys: Vec<TrustedKey>,
    identities: Vec<KeylessIdentity>,
    roots: Vec<ParsedCertificate>,
}

impl TrustSet {
    /// Build a trust set from decoded parts.
    pub const fn new(
        keys: Vec<TrustedKey>,
        identities: Vec<KeylessIdentity>,
        roots: Vec<ParsedCertificate>,
    ) -> Self {
        Self {
            keys,
            identities,
            roots,
        }
    }

    /// Trusted public keys.
    pub fn keys(&self) -> &[TrustedKey] {
        &self.keys
    }

    /// Trusted keyless identities.
    pub fn identities(&self) -> &[KeylessIdentity] {
        &self.identities
    }

    /// Trusted CA certificates.
    pub fn roots(&self) -> &[ParsedCertificate] {
        &self.roots
    }

    /// Whether nothing at all is trusted.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::test_support;

    fn public_pem() -> String {
        test_support::public_key_pem(&test_support::keypair())
    }

    #[test]
    fn inline_key_loads() {
        let doc = TrustDocument {
            keys: vec![KeyEntry {
                name: "ci".to_owned(),
                source: PemSource {
                    pem: Some(public_pem()),
                    path: None,
                },
            }],
            ..Default::default()
        };
        let set = doc.load(Path::new(".")).expect("load");
        assert_eq!(set.keys().len(), 1);
        assert_eq!(set.keys()[0].name, "ci");
    }

    #[test]
    fn key_path_is_relative_to_base_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("cosign.pub"), public_pem()).expect("write");
        let doc: TrustDocument = toml::from_str(
            r#"
            keys = [{ name = "ci", path = "cosign.pub" }]
            "#,
        )
        .expect("parse");
        let set = doc.load(dir.path()).expect("load");
        assert_eq!(set.keys()[0].name, "ci");
    }

    #[test]
    fn misspelled_key_field_is_rejected() {
        let err = toml::from_str::<TrustDocument>(
            r#"
            keys = [{ name = "ci", pth = "cosign.pub" }]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("pth"), "got: {err}");
    }

    #[test]
    fn misspelled_identity_field_is_rejected() {
        let err = toml::from_str::<TrustDocument>(
            r#"
            keyless = [{ issuer = "https://issuer", subject = "*@acme.com", subjct = "x" }]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("subjct"), "got: {err}");
    }

    #[test]
    fn misspelled_root_field_is_rejected() {
        let result = serde_json::from_str::<TrustDocument>(r#"{ "roots": [{ "file": "root.pem" }] }"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_key_file_is_io_error() {
        let doc = TrustDocument {
            keys: vec![KeyEntry {
                name: "ci".to_owned(),
                source: PemSource {
                    pem: None,
                    path: Some(PathBuf::from("does-not-exist.pub")),
                },
            }],
            ..Default::default()
        };
        assert!(matches!(doc.load(Path::new("/nonexistent")), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn malformed_key_is_rejected() {
        let doc = TrustDocument {
            keys: vec![KeyEntry {
                name: "bad".to_owned(),
                source: PemSource {
                    pem: Some("garbage".to_owned()),
                    path: None,
                },
            }],
            ..Default::default()
        };
        let err = doc.load(Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("invalid key `bad`"), "got: {err}");
    }

    #[test]
    fn keyless_without_roots_is_rejected() {
        let doc = TrustDocument {
            keyless: vec![KeylessIdentity {
                issuer: "https://issuer".to_owned(),
                subject: "*@acme.com".to_owned(),
            }],
            ..Default::default()
        };
        let err = doc.load(Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("trusted root"), "got: {err}");
    }

    #[test]
    fn empty_trust_is_rejected() {
        assert!(TrustDocument::default().load(Path::new(".")).is_err());
    }

    #[test]
    fn keyless_with_root_loads() {
        let ca = test_support::keypair();
        let doc = TrustDocument {
            keyless: vec![KeylessIdentity {
                issuer: "https://issuer".to_owned(),
                subject: "*@acme.com".to_owned(),
            }],
            roots: vec![PemSource {
                pem: Some(test_support::root(&ca)),
                path: None,
            }],
            ..Default::default()
        };
        let set = doc.load(Path::new(".")).expect("load");
        assert_eq!(set.roots().len(), 1);
        assert_eq!(set.identities().len(), 1);
    }

    #[test]
    fn identity_matching() {
        let id = KeylessIdentity {
            issuer: "https://token.actions.githubusercontent.com".to_owned(),
            subject: "https://github.com/acme/*".to_owned(),
        };
        assert!(id.matches(
            "https://token.actions.githubusercontent.com",
            "https://github.com/acme/api/.github/workflows/scan.yml@refs/heads/main"
        ));
        assert!(!id.matches("https://accounts.google.com", "https://github.com/acme/api"));
        assert!(!id.matches("https://token.actions.githubusercontent.com", "https://github.com/evil/api"));
    }
}
