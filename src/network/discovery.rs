use futures::{StreamExt, stream};
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::gateway::{ContainerGateway, GatewayResult};
use crate::types::ContainerSnapshot;

/// Inspect every container on the endpoint.
///
/// Hosts with more than `parallel_threshold` containers are inspected with up to
/// `concurrency` requests in flight; smaller hosts one at a time. Containers that disappear
/// between list and inspect are skipped. Results keep the listing order.
pub async fn discover_snapshots(
    gateway: &dyn ContainerGateway,
    concurrency: usize,
    parallel_threshold: usize,
) -> GatewayResult<Vec<ContainerSnapshot>> {
    let containers = gateway.list_all().await?;
    debug!("Discovering {} containers", containers.len());

    let inspected: Vec<GatewayResult<ContainerSnapshot>> = if containers.len() > parallel_threshold
    {
        stream::iter(containers.iter())
            .map(|summary| async move {
                gateway
                    .inspect(&summary.id)
                    .await
                    .map(ContainerSnapshot::from_inspect)
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    } else {
        let mut results = Vec::with_capacity(containers.len());
        for summary in &containers {
            results.push(
                gateway
                    .inspect(&summary.id)
                    .await
                    .map(ContainerSnapshot::from_inspect),
            );
        }
        results
    };

    let mut snapshots = Vec::with_capacity(inspected.len());
    for (summary, result) in containers.iter().zip(inspected) {
        match result {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(GatewayError::NotFound { .. }) => {
                debug!("{} vanished during discovery", summary.primary_name());
            }
            Err(e) => {
                warn!("Failed to inspect {}: {}", summary.primary_name(), e);
                return Err(e);
            }
        }
    }
    Ok(snapshots)
}
