use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{CurrentImage, UpdateInfo, evaluate};
use crate::error::{DrydockError, Result};
use crate::gateway::ContainerGateway;
use crate::registry::{RegistryClient, RegistryProvider};
use crate::types::{ContainerIdentity, ContainerSnapshot, ImageRef};

/// Update verdict for one container
#[derive(Debug, Clone, Serialize)]
pub struct ContainerUpdate {
    pub container: ContainerIdentity,
    pub image: ImageRef,
    pub info: UpdateInfo,
}

/// Batch detection pass over every container on one endpoint
pub struct UpdateScanner {
    registry: Arc<dyn RegistryClient>,
    concurrency: usize,
}

impl UpdateScanner {
    pub fn new(registry: Arc<dyn RegistryClient>, concurrency: usize) -> Self {
        Self {
            registry,
            concurrency: concurrency.max(1),
        }
    }

    /// Evaluate every container the gateway lists.
    ///
    /// A registry rate limit aborts the whole pass and is returned unchanged; other registry
    /// failures only downgrade the affected container to "no update".
    pub async fn scan(&self, gateway: &dyn ContainerGateway) -> Result<Vec<ContainerUpdate>> {
        let containers = gateway.list_all().await?;
        info!("🔍 Checking {} containers for updates", containers.len());

        let mut updates: Vec<ContainerUpdate> = stream::iter(containers)
            .map(|summary| async move { self.check(gateway, &summary.id).await })
            .buffer_unordered(self.concurrency)
            .try_filter_map(|update| async move { Ok(update) })
            .try_collect()
            .await?;

        updates.sort_by(|a, b| a.container.name.cmp(&b.container.name));
        let available = updates.iter().filter(|u| u.info.has_update).count();
        info!("✅ Update check finished: {} of {} with updates", available, updates.len());
        Ok(updates)
    }

    /// Evaluate one container; `Ok(None)` when it cannot be tracked
    pub async fn check(
        &self,
        gateway: &dyn ContainerGateway,
        container_id: &str,
    ) -> Result<Option<ContainerUpdate>> {
        let inspect = match gateway.inspect(container_id).await {
            Ok(inspect) => inspect,
            Err(e) => {
                warn!("Skipping {}: {}", container_id, e);
                return Ok(None);
            }
        };
        let snapshot = ContainerSnapshot::from_inspect(inspect);

        let Some(image) = snapshot.image.clone() else {
            debug!("{} runs an untagged image, not tracked", snapshot.name());
            return Ok(None);
        };
        if image.tag.is_none() && image.digest.is_some() {
            debug!("{} is pinned to {}, not tracked", snapshot.name(), image);
            return Ok(None);
        }

        let current = current_image(gateway, &snapshot, &image).await;
        let lookup = image.with_tag(image.tag_or_latest());
        let info = match self.registry.latest(&lookup).await {
            Ok(Some(latest)) => evaluate(&current, &latest),
            Ok(None) => {
                debug!("No registry data for {}", lookup);
                UpdateInfo::unknown(&current, RegistryProvider::detect(&lookup))
            }
            Err(e) if e.is_rate_limit() => return Err(DrydockError::Registry(e)),
            Err(e) => {
                warn!("Registry lookup for {} failed: {}", lookup, e);
                UpdateInfo::unknown(&current, RegistryProvider::detect(&lookup))
            }
        };

        if info.has_update {
            info!("⬆️  Update available for {} ({})", snapshot.name(), lookup);
        }

        Ok(Some(ContainerUpdate {
            container: snapshot.identity.clone(),
            image: lookup,
            info,
        }))
    }
}

/// Local digests of the container's image, restricted to the image's own repository
pub async fn current_image(
    gateway: &dyn ContainerGateway,
    snapshot: &ContainerSnapshot,
    image: &ImageRef,
) -> CurrentImage {
    let tag = image.tag_or_latest().to_string();

    let repo_digests: Vec<String> = match gateway.inspect_image(&snapshot.image_id).await {
        Ok(local) => local
            .repo_digests
            .into_iter()
            .filter(|repo_digest| {
                repo_digest
                    .split_once('@')
                    .and_then(|(repo, _)| ImageRef::parse(repo).ok())
                    .is_some_and(|repo| repo.same_repository(image))
            })
            .collect(),
        Err(e) => {
            debug!("Could not inspect image of {}: {}", snapshot.name(), e);
            Vec::new()
        }
    };

    let digest = image.digest.clone().or_else(|| {
        repo_digests
            .first()
            .and_then(|d| d.split_once('@'))
            .map(|(_, digest)| digest.to_string())
    });

    CurrentImage {
        tag,
        digest,
        repo_digests,
    }
}
