//! Lookup caches owned by a registry client instance.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

use super::LatestImage;
use crate::types::ImageRef;

/// "Latest digest" cache keyed by repository and tag.
///
/// Entries expire after the TTL; invalidating one repository+tag never touches others.
#[derive(Debug)]
pub struct DigestCache {
    ttl: Duration,
    entries: RwLock<HashMap<(String, String), (Option<LatestImage>, Instant)>>,
}

impl DigestCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached lookup result; the outer `None` is a miss, the inner one a cached "not found"
    pub fn get(&self, image: &ImageRef) -> Option<Option<LatestImage>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&image.cache_key())
            .filter(|(_, stored)| stored.elapsed() < self.ttl)
            .map(|(latest, _)| latest.clone())
    }

    pub fn insert(&self, image: &ImageRef, latest: Option<LatestImage>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, (_, stored)| stored.elapsed() < self.ttl);
        entries.insert(image.cache_key(), (latest, Instant::now()));
    }

    pub fn invalidate(&self, image: &ImageRef) {
        let key = image.cache_key();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.remove(&key).is_some() {
            debug!("🧹 Invalidated cached digest for {}:{}", key.0, key.1);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bearer tokens per `realm|service|scope`
#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: RwLock<HashMap<String, (String, Instant)>>,
}

impl TokenCache {
    pub fn get(&self, key: &str) -> Option<String> {
        let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        tokens
            .get(key)
            .filter(|(_, expires)| Instant::now() < *expires)
            .map(|(token, _)| token.clone())
    }

    pub fn insert(&self, key: &str, token: String, lifetime: Duration) {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens.insert(key.to_string(), (token, Instant::now() + lifetime));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryProvider;

    fn image(reference: &str) -> ImageRef {
        ImageRef::parse(reference).unwrap()
    }

    #[test]
    fn test_invalidate_is_per_repository_and_tag() {
        let cache = DigestCache::new(Duration::from_secs(60));
        let web = image("nginx:1.25");
        let web_next = image("nginx:1.26");
        cache.insert(
            &web,
            Some(LatestImage::with_digest(RegistryProvider::DockerHub, "1.25", "sha256:aa")),
        );
        cache.insert(&web_next, None);
        assert_eq!(cache.len(), 2);

        cache.invalidate(&image("docker.io/library/nginx:1.25"));
        assert!(cache.get(&web).is_none());
        assert_eq!(cache.get(&web_next), Some(None));
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let cache = DigestCache::new(Duration::ZERO);
        let web = image("nginx:1.25");
        cache.insert(&web, None);
        assert!(cache.get(&web).is_none());
    }

    #[test]
    fn test_token_cache_expiry() {
        let cache = TokenCache::default();
        cache.insert("ghcr|pull", "t0k".to_string(), Duration::from_secs(60));
        cache.insert("stale", "old".to_string(), Duration::ZERO);
        assert_eq!(cache.get("ghcr|pull").as_deref(), Some("t0k"));
        assert!(cache.get("stale").is_none());
    }
}
