//! Attestation stores.
//!
//! A store resolves image tags to digests and returns the attestations
//! published for a digest. [`FileStore`] reads a directory laid out like an
//! OCI registry's cosign tags:
//!
//! ```text
//! <root>/<registry>/<repository>/tags.json                 {"v1": "sha256:..."}
//! <root>/<registry>/<repository>/sha256-<hex>.att.json     [attestation, ...]
//! ```
//!
//! [`MemoryStore`] keeps the same data in memory for embedding and tests.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use portcullis_attest::{Attestation, ImageReference};

use crate::error::FetchError;

/// Source of attestations for images.
///
/// Implementations must be shareable across concurrent requests; the
/// engine never mutates a store.
pub trait AttestationStore: Send + Sync {
    /// Pin `image` to a digest. Already-pinned references are returned as-is.
    fn resolve(
        &self,
        image: &ImageReference,
    ) -> impl Future<Output = Result<ImageReference, FetchError>> + Send;

    /// Fetch every attestation stored for a pinned `image`.
    fn fetch(
        &self,
        image: &ImageReference,
    ) -> impl Future<Output = Result<Vec<Attestation>, FetchError>> + Send;
}

/// Filesystem-backed store.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn repository_dir(&self, image: &ImageReference) -> PathBuf {
        self.root.join(image.registry()).join(image.repository())
    }

    /// Path of the attestation file for a pinned image.
    pub fn attestation_path(&self, image: &ImageReference) -> Option<PathBuf> {
        let digest = image.digest()?;
        Some(
            self.repository_dir(image)
                .join(format!("{}.att.json", digest.replace(':', "-"))),
        )
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, FetchError> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(FetchError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| FetchError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

impl AttestationStore for FileStore {
    async fn resolve(&self, image: &ImageReference) -> Result<ImageReference, FetchError> {
        if image.is_resolved() {
            return Ok(image.clone());
        }
        let tag = image.tag().unwrap_or(portcullis_attest::reference::DEFAULT_TAG);
        let unresolved = || FetchError::UnresolvedTag {
            image: image.to_string(),
            tag: tag.to_owned(),
        };

        let path = self.repository_dir(image).join("tags.json");
        let tags: HashMap<String, String> = Self::read_json(&path).await?.ok_or_else(unresolved)?;
        let digest = tags.get(tag).ok_or_else(unresolved)?;
        image.resolved(digest).map_err(|e| FetchError::Parse {
            path,
            reason: e.to_string(),
        })
    }

    async fn fetch(&self, image: &ImageReference) -> Result<Vec<Attestation>, FetchError> {
        let not_found = || FetchError::NotFound {
            image: image.to_string(),
        };
        let path = self.attestation_path(image).ok_or_else(not_found)?;
        tracing::debug!(path = %path.display(), "reading attestations");

        let attestations: Vec<Attestation> = Self::read_json(&path).await?.ok_or_else(not_found)?;
        if attestations.is_empty() {
            return Err(not_found());
        }
        Ok(attestations)
    }
}

/// In-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tags: HashMap<String, String>,
    attestations: HashMap<String, Vec<Attestation>>,
    latency: Option<Duration>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `name:tag` to a digest.
    pub fn insert_tag(&mut self, image: &ImageReference, digest: &str) {
        if let Some(tag) = image.tag() {
            self.tags
                .insert(format!("{}:{tag}", image.name()), digest.to_owned());
        }
    }

    /// Add an attestation for a pinned image.
    pub fn insert_attestation(&mut self, image: &ImageReference, attestation: Attestation) {
        if let Some(digest) = image.digest() {
            self.attestations
                .entry(format!("{}@{digest}", image.name()))
                .or_default()
                .push(attestation);
        }
    }

    /// Delay every fetch by `latency`, simulating a slow registry.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

impl AttestationStore for MemoryStore {
    async fn resolve(&self, image: &ImageReference) -> Result<ImageReference, FetchError> {
        if image.is_resolved() {
            return Ok(image.clone());
        }
        let tag = image.tag().unwrap_or(portcullis_attest::reference::DEFAULT_TAG);
        let unresolved = || FetchError::UnresolvedTag {
            image: image.to_string(),
            tag: tag.to_owned(),
        };
        let digest = self
            .tags
            .get(&format!("{}:{tag}", image.name()))
            .ok_or_else(unresolved)?;
        image.resolved(digest).map_err(|_| unresolved())
    }

    async fn fetch(&self, image: &ImageReference) -> Result<Vec<Attestation>, FetchError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let not_found = || FetchError::NotFound {
            image: image.to_string(),
        };
        let digest = image.digest().ok_or_else(not_found)?;
        self.attestations
            .get(&format!("{}@{digest}", image.name()))
            .filter(|list| !list.is_empty())
            .cloned()
            .ok_or_else(not_found)
    }
}
