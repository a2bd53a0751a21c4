use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::DigestNormalizer;
use crate::registry::{LatestImage, RegistryProvider};

/// What the host knows about the image a container runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentImage {
    pub tag: String,
    pub digest: Option<String>,
    /// Every digest the local image is known under (multi-arch manifest members included)
    #[serde(default)]
    pub repo_digests: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub current_tag: String,
    pub current_digest: Option<String>,
    pub latest_digest: Option<String>,
    pub latest_tag: String,
    pub has_update: bool,
    pub provider: RegistryProvider,
    pub is_fallback: bool,
    pub publish_date: Option<DateTime<Utc>>,
}

impl UpdateInfo {
    /// "No update" when the registry had nothing to compare against
    pub fn unknown(current: &CurrentImage, provider: RegistryProvider) -> Self {
        Self {
            current_tag: current.tag.clone(),
            current_digest: current.digest.clone(),
            latest_digest: None,
            latest_tag: current.tag.clone(),
            has_update: false,
            provider,
            is_fallback: false,
            publish_date: None,
        }
    }
}

/// Decide whether `latest` is newer than `current`.
///
/// Only a positively established difference reports an update: a digest mismatch where
/// neither digest belongs to the other side's multi-arch set, or, for version-tracking
/// providers, differing version strings. Everything uncertain resolves to "no update".
///
/// The version comparison runs whenever the latest digest is missing, including when the
/// current digest is known: a release feed never carries a digest to compare against.
pub fn evaluate(current: &CurrentImage, latest: &LatestImage) -> UpdateInfo {
    let current_digest = non_empty(current.digest.as_deref());
    let latest_digest = non_empty(latest.digest.as_deref());

    let has_update = match (current_digest, latest_digest) {
        (Some(current_digest), Some(latest_digest)) => digests_differ(
            current_digest,
            latest_digest,
            &current.repo_digests,
            &latest.platform_digests,
        ),
        // No baseline: staleness cannot be asserted on first observation.
        (None, Some(_)) => false,
        (_, None) if latest.is_fallback || latest.provider.is_fallback() => {
            versions_differ(&current.tag, &latest.tag)
        }
        (_, None) => false,
    };

    UpdateInfo {
        current_tag: current.tag.clone(),
        current_digest: current.digest.clone(),
        latest_digest: latest.digest.clone(),
        latest_tag: latest.tag.clone(),
        has_update,
        provider: latest.provider,
        is_fallback: latest.is_fallback,
        publish_date: latest.publish_date,
    }
}

fn non_empty(digest: Option<&str>) -> Option<&str> {
    digest.filter(|d| !DigestNormalizer::normalize(d).is_empty())
}

fn digests_differ(
    current: &str,
    latest: &str,
    current_set: &[String],
    latest_set: &[String],
) -> bool {
    let current = DigestNormalizer::normalize(current);
    let latest = DigestNormalizer::normalize(latest);
    if current == latest {
        return false;
    }

    let current_set: HashSet<String> = DigestNormalizer::normalize_set(current_set);
    if current_set.contains(&latest) {
        return false;
    }
    let latest_set: HashSet<String> = DigestNormalizer::normalize_set(latest_set);
    !latest_set.contains(&current)
}

fn versions_differ(current: &str, latest: &str) -> bool {
    let current = DigestNormalizer::normalize_version(current);
    let latest = DigestNormalizer::normalize_version(latest);
    // A floating tag is not a version; nothing to compare against.
    if current.is_empty() || latest.is_empty() || current == "latest" {
        return false;
    }
    current != latest
}
