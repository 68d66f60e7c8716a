//! Container image references.
//!
//! A reference has the shape `[registry/]repository[:tag][@sha256:<hex>]`.
//! Short Docker Hub names are normalized the way container runtimes do it:
//! `nginx` becomes `docker.io/library/nginx:latest`.
//!
//! Registries are hostnames with an optional port. Repository components
//! start and end with a lowercase letter or digit and are joined by `.`,
//! `_`, `__`, or runs of `-`, so no component can be `.` or `..`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AttestError;

/// Registry used when a reference does not name one.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag used when a reference carries neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

const DIGEST_PREFIX: &str = "sha256:";
const SHA256_HEX_LEN: usize = 64;
const MAX_TAG_LEN: usize = 128;

/// A parsed, normalized container image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference string.
    pub fn parse(reference: &str) -> Result<Self, AttestError> {
        let invalid = |reason: &str| AttestError::InvalidReference {
            reference: reference.to_owned(),
            reason: reason.to_owned(),
        };

        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty reference"));
        }

        let (rest, digest) = match trimmed.split_once('@') {
            Some((rest, digest)) => {
                validate_digest(digest).map_err(|reason| invalid(&reason))?;
                (rest, Some(digest.to_owned()))
            }
            None => (trimmed, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong
        // to a registry port.
        let last_slash = rest.rfind('/');
        let (name, tag) = match rest.rfind(':') {
            Some(idx) if last_slash.is_none_or(|slash| idx > slash) => {
                (&rest[..idx], Some(&rest[idx + 1..]))
            }
            _ => (rest, None),
        };

        if let Some(tag) = tag {
            validate_tag(tag).map_err(|reason| invalid(&reason))?;
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_owned(), remainder.to_owned())
            }
            _ => (DEFAULT_REGISTRY.to_owned(), name.to_owned()),
        };

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        validate_registry(&registry).map_err(|reason| invalid(&reason))?;
        validate_repository(&repository).map_err(|reason| invalid(&reason))?;

        let tag = match (tag, &digest) {
            (Some(tag), _) => Some(tag.to_owned()),
            (None, None) => Some(DEFAULT_TAG.to_owned()),
            (None, Some(_)) => None,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// The registry host (with port, if any).
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// The repository path within the registry.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The tag, if the reference carries one.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// The `sha256:<hex>` digest, if the reference is pinned.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Whether the reference is pinned to an immutable digest.
    pub const fn is_resolved(&self) -> bool {
        self.digest.is_some()
    }

    /// `registry/repository` without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Return a copy of this reference pinned to `digest`.
    ///
    /// The tag is kept for display; verification only uses the digest.
    pub fn resolved(&self, digest: &str) -> Result<Self, AttestError> {
        validate_digest(digest).map_err(|reason| AttestError::InvalidReference {
            reference: format!("{}@{digest}", self.name()),
            reason,
        })?;
        Ok(Self {
            digest: Some(digest.to_owned()),
            ..self.clone()
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for ImageReference {
    type Err = AttestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ImageReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ImageReference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Check that `digest` is `sha256:` followed by 64 lowercase hex characters.
pub fn validate_digest(digest: &str) -> Result<(), String> {
    let hex = digest
        .strip_prefix(DIGEST_PREFIX)
        .ok_or_else(|| format!("digest `{digest}` must start with `{DIGEST_PREFIX}`"))?;
    if hex.len() != SHA256_HEX_LEN {
        return Err(format!(
            "sha256 digest must be {SHA256_HEX_LEN} hex characters, got {}",
            hex.len()
        ));
    }
    if !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err("sha256 digest must be lowercase hex".to_owned());
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<(), String> {
    if tag.is_empty() {
        return Err("empty tag".to_owned());
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(format!("tag longer than {MAX_TAG_LEN} characters"));
    }
    if tag.starts_with(['.', '-']) {
        return Err(format!("tag `{tag}` must not start with '.' or '-'"));
    }
    if !tag
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
    {
        return Err(format!("tag `{tag}` contains invalid characters"));
    }
    Ok(())
}

fn validate_registry(registry: &str) -> Result<(), String> {
    let (host, port) = match registry.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (registry, None),
    };
    if let Some(port) = port {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("registry port `{port}` must be numeric"));
        }
    }
    let valid_label = |label: &str| {
        let bytes = label.as_bytes();
        match (bytes.first(), bytes.last()) {
            (Some(first), Some(last)) => {
                first.is_ascii_alphanumeric()
                    && last.is_ascii_alphanumeric()
                    && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
            }
            _ => false,
        }
    };
    if !host.split('.').all(valid_label) {
        return Err(format!("registry `{registry}` is not a valid hostname"));
    }
    Ok(())
}

/// Whether `sep` may join two alphanumeric runs in a repository component.
fn is_separator(sep: &[u8]) -> bool {
    matches!(sep, b"." | b"_" | b"__") || (!sep.is_empty() && sep.iter().all(|b| *b == b'-'))
}

fn validate_component(component: &str) -> Result<(), String> {
    let bytes = component.as_bytes();
    if bytes.is_empty() {
        return Err("repository has an empty path component".to_owned());
    }
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !bytes.iter().all(|b| alnum(b) || matches!(b, b'.' | b'_' | b'-')) {
        return Err(format!(
            "repository component `{component}` must be lowercase alphanumeric"
        ));
    }
    if !alnum(&bytes[0]) || !alnum(&bytes[bytes.len() - 1]) {
        return Err(format!(
            "repository component `{component}` must start and end with a letter or digit"
        ));
    }
    let mut separators = bytes.split(alnum).filter(|sep| !sep.is_empty());
    if separators.any(|sep| !is_separator(sep)) {
        return Err(format!(
            "repository component `{component}` has an invalid separator"
        ));
    }
    Ok(())
}

fn validate_repository(repository: &str) -> Result<(), String> {
    if repository.is_empty() {
        return Err("empty repository".to_owned());
    }
    repository.split('/').try_for_each(validate_component)
}
