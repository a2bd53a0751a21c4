//! Registry client: "what is the newest digest published under this tag?"
//!
//! Provider selection follows the repository prefix; release-tracking sources act as a
//! version-string fallback when a registry manifest cannot be resolved.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RegistryError;
use crate::types::ImageRef;

pub mod cache;
pub mod client;
pub mod types;

pub use cache::{DigestCache, TokenCache};
pub use client::HttpRegistryClient;

/// Registry kinds an update can come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistryProvider {
    DockerHub,
    Ghcr,
    Gitlab,
    Quay,
    Generic,
    /// Version-only source (release feed), never supplies digests
    GithubReleases,
}

impl RegistryProvider {
    /// Provider for an image, from its repository prefix (Docker Hub when none matches)
    pub fn detect(image: &ImageRef) -> Self {
        if image.is_docker_hub() {
            return RegistryProvider::DockerHub;
        }
        match image.registry_host() {
            "ghcr.io" => RegistryProvider::Ghcr,
            "registry.gitlab.com" => RegistryProvider::Gitlab,
            "quay.io" => RegistryProvider::Quay,
            _ => RegistryProvider::Generic,
        }
    }

    /// Whether this provider only tracks version strings
    pub fn is_fallback(&self) -> bool {
        matches!(self, RegistryProvider::GithubReleases)
    }
}

impl fmt::Display for RegistryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegistryProvider::DockerHub => "docker-hub",
            RegistryProvider::Ghcr => "ghcr",
            RegistryProvider::Gitlab => "gitlab",
            RegistryProvider::Quay => "quay",
            RegistryProvider::Generic => "generic",
            RegistryProvider::GithubReleases => "github-releases",
        };
        f.write_str(s)
    }
}

/// Newest image metadata a provider knows for a repository and tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestImage {
    pub digest: Option<String>,
    pub tag: String,
    pub publish_date: Option<DateTime<Utc>>,
    pub provider: RegistryProvider,
    pub is_fallback: bool,
    /// Per-platform digests when `digest` names a manifest list
    #[serde(default)]
    pub platform_digests: Vec<String>,
}

impl LatestImage {
    pub fn with_digest(provider: RegistryProvider, tag: &str, digest: &str) -> Self {
        Self {
            digest: Some(digest.to_string()),
            tag: tag.to_string(),
            publish_date: None,
            provider,
            is_fallback: false,
            platform_digests: Vec::new(),
        }
    }

    pub fn fallback(tag: &str, publish_date: Option<DateTime<Utc>>) -> Self {
        Self {
            digest: None,
            tag: tag.to_string(),
            publish_date,
            provider: RegistryProvider::GithubReleases,
            is_fallback: true,
            platform_digests: Vec::new(),
        }
    }
}

/// Per-provider digest/version lookup.
///
/// `Ok(None)` means the provider has no manifest for the reference. Rate limiting is the
/// one failure that must reach the caller as [`RegistryError::RateLimited`].
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn latest(&self, image: &ImageRef) -> Result<Option<LatestImage>, RegistryError>;

    /// Drop any cached lookup for the image's repository and tag
    fn invalidate(&self, image: &ImageRef);
}
