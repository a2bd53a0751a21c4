use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// Media types requested when resolving a tag, manifest lists first
pub const MANIFEST_ACCEPT: &str = concat!(
    "application/vnd.oci.image.index.v1+json, ",
    "application/vnd.docker.distribution.manifest.list.v2+json, ",
    "application/vnd.docker.distribution.manifest.v2+json, ",
    "application/vnd.oci.image.manifest.v1+json"
);

/// Docker Hub `GET /v2/repositories/{ns}/{repo}/tags/{tag}`
#[derive(Debug, Clone, Deserialize)]
pub struct HubTag {
    pub name: String,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tag_last_pushed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub images: Vec<HubImage>,
}

impl HubTag {
    pub fn publish_date(&self) -> Option<DateTime<Utc>> {
        self.tag_last_pushed.or(self.last_updated)
    }

    pub fn platform_digests(&self) -> Vec<String> {
        self.images
            .iter()
            .filter_map(|image| image.digest.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubImage {
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
}

/// Manifest list / image index body; single-platform manifests have no `manifests`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestIndex {
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<ManifestDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDescriptor {
    pub digest: String,
    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
}

impl ManifestIndex {
    /// Platform manifests, skipping attestation entries (`unknown/unknown`)
    pub fn platform_digests(&self) -> Vec<String> {
        self.manifests
            .iter()
            .filter(|m| {
                m.platform
                    .as_ref()
                    .is_none_or(|p| p.architecture != "unknown" && p.os != "unknown")
            })
            .map(|m| m.digest.clone())
            .collect()
    }
}

/// GitHub `GET /repos/{owner}/{repo}/releases/latest`
#[derive(Debug, Clone, Deserialize)]
pub struct GithubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
}

/// Token endpoint response; registries disagree on the field name
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    pub fn into_token(self) -> Option<String> {
        self.token.or(self.access_token).filter(|t| !t.is_empty())
    }
}

/// Parsed `WWW-Authenticate: Bearer realm="..",service="..",scope=".."`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl AuthChallenge {
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut values = HashMap::new();
        let mut rest = params.trim();
        while !rest.is_empty() {
            let (key, after_key) = rest.split_once('=')?;
            let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
            let after_key = after_key.trim_start();
            let (value, remainder) = if let Some(quoted) = after_key.strip_prefix('"') {
                let end = quoted.find('"')?;
                (&quoted[..end], &quoted[end + 1..])
            } else {
                match after_key.find(',') {
                    Some(end) => (&after_key[..end], &after_key[end..]),
                    None => (after_key, ""),
                }
            };
            values.insert(key, value.to_string());
            rest = remainder.trim_start().trim_start_matches(',').trim_start();
        }

        Some(Self {
            realm: values.remove("realm")?,
            service: values.remove("service"),
            scope: values.remove("scope"),
        })
    }
}
