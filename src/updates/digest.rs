use std::collections::HashSet;

/// Canonical forms for digest and version comparison
pub struct DigestNormalizer;

impl DigestNormalizer {
    /// Trim, lower-case and strip an optional `sha256:` prefix.
    ///
    /// Also accepts repo-digest form (`repo@sha256:...`), keeping only the digest part.
    pub fn normalize(digest: &str) -> String {
        let digest = digest.trim();
        let digest = digest.rsplit_once('@').map_or(digest, |(_, d)| d.trim());
        let lower = digest.to_ascii_lowercase();
        match lower.strip_prefix("sha256:") {
            Some(hex) => hex.to_string(),
            None => lower,
        }
    }

    pub fn eq(a: &str, b: &str) -> bool {
        Self::normalize(a) == Self::normalize(b)
    }

    /// Normalized set, dropping empty entries
    pub fn normalize_set<'a>(digests: impl IntoIterator<Item = &'a String>) -> HashSet<String> {
        digests
            .into_iter()
            .map(|d| Self::normalize(d))
            .filter(|d| !d.is_empty())
            .collect()
    }

    /// Version strings compare without a leading `v`, surrounding whitespace or case
    pub fn normalize_version(version: &str) -> String {
        let trimmed = version.trim();
        let stripped = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        stripped.trim().to_ascii_lowercase()
    }
}
