use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::types::{
    AuthChallenge, GithubRelease, HubTag, MANIFEST_ACCEPT, ManifestIndex, TokenResponse,
};
use super::*;
use crate::config::RegistrySettings;

const USER_AGENT: &str = concat!("drydock/", env!("CARGO_PKG_VERSION"));
const HUB_API: &str = "https://hub.docker.com";
const GITHUB_API: &str = "https://api.github.com";
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60);

/// Registry client over the Docker Hub API, OCI distribution registries and GitHub releases.
///
/// Owns its digest cache and bearer-token cache; two clients never share either.
pub struct HttpRegistryClient {
    client: Client,
    cache: DigestCache,
    tokens: TokenCache,
    release_sources: Vec<(ImageRef, String)>,
}

impl HttpRegistryClient {
    pub fn new(settings: &RegistrySettings) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(transport_error)?;

        let mut release_sources = Vec::new();
        for source in &settings.release_sources {
            release_sources.push((ImageRef::parse(&source.image)?, source.github.clone()));
        }

        Ok(Self {
            client,
            cache: DigestCache::new(Duration::from_secs(settings.cache_ttl_seconds)),
            tokens: TokenCache::default(),
            release_sources,
        })
    }

    pub fn cache(&self) -> &DigestCache {
        &self.cache
    }

    async fn lookup(&self, image: &ImageRef) -> Result<Option<LatestImage>, RegistryError> {
        let provider = RegistryProvider::detect(image);
        debug!("🔎 Resolving {} via {}", image, provider);

        let result = match provider {
            RegistryProvider::DockerHub => self.docker_hub(image).await,
            _ => self.oci_registry(image, provider).await,
        };

        match result {
            Ok(Some(latest)) => Ok(Some(latest)),
            Ok(None) => self.release_fallback(image).await,
            Err(e) if e.is_rate_limit() => Err(e),
            Err(e) => match self.release_source(image) {
                Some(_) => {
                    warn!("Registry lookup for {} failed ({}), trying release feed", image, e);
                    self.release_fallback(image).await
                }
                None => Err(e),
            },
        }
    }

    async fn docker_hub(&self, image: &ImageRef) -> Result<Option<LatestImage>, RegistryError> {
        let tag = image.tag_or_latest();
        let url = format!(
            "{}/v2/repositories/{}/tags/{}",
            HUB_API,
            image.api_repository(),
            tag
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(transport_error)?;

        let Some(response) = check_status(response, RegistryProvider::DockerHub, &url)? else {
            return Ok(None);
        };
        let hub_tag: HubTag = response.json().await.map_err(malformed)?;

        let Some(digest) = hub_tag.digest.clone() else {
            return Ok(None);
        };
        Ok(Some(LatestImage {
            digest: Some(digest),
            tag: hub_tag.name.clone(),
            publish_date: hub_tag.publish_date(),
            provider: RegistryProvider::DockerHub,
            is_fallback: false,
            platform_digests: hub_tag.platform_digests(),
        }))
    }

    async fn oci_registry(
        &self,
        image: &ImageRef,
        provider: RegistryProvider,
    ) -> Result<Option<LatestImage>, RegistryError> {
        let host = image.registry_host();
        let repository = image.api_repository();
        let tag = image.tag_or_latest();
        let scheme = if host.starts_with("localhost") || host.starts_with("127.0.0.1") {
            "http"
        } else {
            "https"
        };
        let url = format!("{}://{}/v2/{}/manifests/{}", scheme, host, repository, tag);
        let token_key = format!("{}|repository:{}:pull", host, repository);

        let mut response = self.get_manifest(&url, self.tokens.get(&token_key)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(AuthChallenge::parse);
            let Some(challenge) = challenge else {
                return Err(RegistryError::Http {
                    status: 401,
                    url,
                });
            };
            let token = self
                .fetch_token(&challenge, &repository, provider, &token_key)
                .await?;
            response = self.get_manifest(&url, Some(token)).await?;
        }

        let Some(response) = check_status(response, provider, &url)? else {
            return Ok(None);
        };
        let header_digest = response
            .headers()
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(transport_error)?;
        let digest = header_digest
            .unwrap_or_else(|| format!("sha256:{}", hex::encode(Sha256::digest(&body))));
        let platform_digests = serde_json::from_slice::<ManifestIndex>(&body)
            .map(|index| index.platform_digests())
            .unwrap_or_default();

        Ok(Some(LatestImage {
            digest: Some(digest),
            tag: tag.to_string(),
            publish_date: None,
            provider,
            is_fallback: false,
            platform_digests,
        }))
    }

    async fn get_manifest(
        &self,
        url: &str,
        token: Option<String>,
    ) -> Result<Response, RegistryError> {
        let mut request = self.client.get(url).header(ACCEPT, MANIFEST_ACCEPT);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.map_err(transport_error)
    }

    async fn fetch_token(
        &self,
        challenge: &AuthChallenge,
        repository: &str,
        provider: RegistryProvider,
        cache_key: &str,
    ) -> Result<String, RegistryError> {
        let scope = challenge
            .scope
            .clone()
            .unwrap_or_else(|| format!("repository:{}:pull", repository));
        let mut query = vec![("scope", scope)];
        if let Some(service) = &challenge.service {
            query.push(("service", service.clone()));
        }

        let response = self
            .client
            .get(&challenge.realm)
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;
        let Some(response) = check_status(response, provider, &challenge.realm)? else {
            return Err(RegistryError::Http {
                status: 404,
                url: challenge.realm.clone(),
            });
        };
        let token_response: TokenResponse = response.json().await.map_err(malformed)?;
        let lifetime = token_response
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let token = token_response.into_token().ok_or_else(|| RegistryError::Malformed {
            reason: format!("token endpoint {} returned no token", challenge.realm),
        })?;

        self.tokens.insert(cache_key, token.clone(), lifetime);
        Ok(token)
    }

    fn release_source(&self, image: &ImageRef) -> Option<&str> {
        self.release_sources
            .iter()
            .find(|(source, _)| source.same_repository(image))
            .map(|(_, github)| github.as_str())
    }

    async fn release_fallback(
        &self,
        image: &ImageRef,
    ) -> Result<Option<LatestImage>, RegistryError> {
        let Some(project) = self.release_source(image) else {
            return Ok(None);
        };
        let url = format!("{}/repos/{}/releases/latest", GITHUB_API, project);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::FORBIDDEN
            && github_quota_exhausted(response.headers())
        {
            return Err(RegistryError::RateLimited {
                provider: RegistryProvider::GithubReleases.to_string(),
                retry_after: github_reset_after(response.headers()),
            });
        }
        let Some(response) = check_status(response, RegistryProvider::GithubReleases, &url)? else {
            return Ok(None);
        };
        let release: GithubRelease = response.json().await.map_err(malformed)?;
        if release.draft || release.prerelease {
            return Ok(None);
        }

        info!("📰 {} falls back to release {} of {}", image, release.tag_name, project);
        Ok(Some(LatestImage::fallback(&release.tag_name, release.published_at)))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn latest(&self, image: &ImageRef) -> Result<Option<LatestImage>, RegistryError> {
        if let Some(cached) = self.cache.get(image) {
            debug!("Cache hit for {}", image);
            return Ok(cached);
        }

        let latest = self.lookup(image).await?;
        self.cache.insert(image, latest.clone());
        Ok(latest)
    }

    fn invalidate(&self, image: &ImageRef) {
        self.cache.invalidate(image);
    }
}

/// `Ok(None)` for 404, `RateLimited` for 429, `Http` for any other failure
fn check_status(
    response: Response,
    provider: RegistryProvider,
    url: &str,
) -> Result<Option<Response>, RegistryError> {
    match response.status() {
        status if status.is_success() => Ok(Some(response)),
        StatusCode::NOT_FOUND => Ok(None),
        StatusCode::TOO_MANY_REQUESTS => Err(RegistryError::RateLimited {
            provider: provider.to_string(),
            retry_after: retry_after(response.headers()),
        }),
        status => Err(RegistryError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        }),
    }
}

fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn github_quota_exhausted(headers: &HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0")
}

fn github_reset_after(headers: &HeaderMap) -> Option<u64> {
    let reset: i64 = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())?;
    let now = chrono::Utc::now().timestamp();
    Some(reset.saturating_sub(now).max(0) as u64)
}

fn transport_error(err: reqwest::Error) -> RegistryError {
    RegistryError::Transport {
        message: err.to_string(),
    }
}

fn malformed(err: reqwest::Error) -> RegistryError {
    RegistryError::Malformed {
        reason: err.to_string(),
    }
}
