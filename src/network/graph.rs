use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use super::IdentityIndex;
use crate::types::{ContainerIdentity, ContainerSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyReason {
    /// Shares the provider's network namespace (`service:` / `container:` mode)
    NetworkMode,
    /// Belongs to the same compose project or stack
    StackGroup,
}

impl fmt::Display for DependencyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyReason::NetworkMode => f.write_str("network_mode"),
            DependencyReason::StackGroup => f.write_str("stack_group"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependent {
    pub identity: ContainerIdentity,
    pub reason: DependencyReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge {
    pub provider: ContainerIdentity,
    pub dependents: Vec<Dependent>,
}

/// One-hop "who shares whose network namespace" edges for a host.
///
/// Rebuilt from scratch for every orchestration run. Chains (a dependent that is itself a
/// provider) are not followed.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    edges: Vec<DependencyEdge>,
    by_key: HashMap<String, usize>,
}

impl DependencyGraph {
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Dependents of the container named by `reference` (name, full ID or short ID)
    pub fn dependents_of(&self, reference: &str) -> &[Dependent] {
        self.by_key
            .get(reference.trim_start_matches('/'))
            .map(|&i| self.edges[i].dependents.as_slice())
            .unwrap_or(&[])
    }

    fn add(&mut self, provider: &ContainerIdentity, dependent: Dependent) {
        let position = match self.by_key.get(&provider.id) {
            Some(&position) => position,
            None => {
                self.edges.push(DependencyEdge {
                    provider: provider.clone(),
                    dependents: Vec::new(),
                });
                let position = self.edges.len() - 1;
                for key in provider.keys() {
                    self.by_key.insert(key.to_string(), position);
                }
                position
            }
        };
        self.edges[position].dependents.push(dependent);
    }
}

/// Build the network dependency graph for a set of snapshots
pub fn build_graph(snapshots: &[ContainerSnapshot]) -> DependencyGraph {
    let index = IdentityIndex::new(snapshots.to_vec());
    build_graph_indexed(&index)
}

pub fn build_graph_indexed(index: &IdentityIndex) -> DependencyGraph {
    let mut graph = DependencyGraph::default();

    for snapshot in index.snapshots() {
        let Some(reference) = snapshot.network_mode.shared_namespace_ref() else {
            continue;
        };
        let Some(provider) = index.resolve(reference) else {
            debug!(
                "{} references unknown network provider '{}'",
                snapshot.name(),
                reference
            );
            continue;
        };
        if provider.identity == snapshot.identity {
            continue;
        }
        graph.add(
            &provider.identity,
            Dependent {
                identity: snapshot.identity.clone(),
                reason: DependencyReason::NetworkMode,
            },
        );
    }

    graph
}

/// True when any of the snapshot's identity keys has dependents
pub fn provides_network(snapshot: &ContainerSnapshot, graph: &DependencyGraph) -> bool {
    snapshot
        .identity
        .keys()
        .iter()
        .any(|key| !graph.dependents_of(key).is_empty())
}

/// True when the snapshot shares another container's network namespace
pub fn uses_network_mode(snapshot: &ContainerSnapshot) -> bool {
    snapshot.uses_network_mode()
}

/// Same-group containers of `target`, excluding `exclude` (usually its network dependents)
pub fn stack_peers(
    snapshots: &[ContainerSnapshot],
    target: &ContainerSnapshot,
    exclude: &[Dependent],
) -> Vec<Dependent> {
    let Some(group) = target.group.as_deref() else {
        return Vec::new();
    };
    snapshots
        .iter()
        .filter(|s| s.group.as_deref() == Some(group))
        .filter(|s| s.identity != target.identity)
        .filter(|s| !exclude.iter().any(|d| d.identity == s.identity))
        .map(|s| Dependent {
            identity: s.identity.clone(),
            reason: DependencyReason::StackGroup,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ContainerInspect;
    use crate::types::COMPOSE_PROJECT_LABEL;
    use pretty_assertions::assert_eq;

    fn snapshot(name: &str, id: &str, mode: &str) -> ContainerSnapshot {
        ContainerSnapshot::from_inspect(
            ContainerInspect::new(name, id, "acme/app:1").with_network_mode(mode),
        )
    }

    const API_ID: &str = "a1b2c3d4e5f60718293a4b5c6d7e8f90";

    #[test]
    fn test_service_mode_resolves_by_every_identity_key() {
        let snapshots = vec![
            snapshot("api", API_ID, "bridge"),
            snapshot("sidecar", "ffff0000ffff0000ffff", "service:api"),
        ];
        let graph = build_graph(&snapshots);

        for key in ["api", API_ID, "a1b2c3d4e5f6"] {
            let dependents = graph.dependents_of(key);
            assert_eq!(dependents.len(), 1, "lookup by {}", key);
            assert_eq!(dependents[0].identity.name, "sidecar");
            assert_eq!(dependents[0].reason, DependencyReason::NetworkMode);
        }
        assert!(provides_network(&snapshots[0], &graph));
        assert!(!provides_network(&snapshots[1], &graph));
        assert!(uses_network_mode(&snapshots[1]));
    }

    #[test]
    fn test_container_mode_by_short_and_full_id() {
        let snapshots = vec![
            snapshot("vpn", API_ID, "bridge"),
            snapshot("torrent", "1111222233334444", "container:a1b2c3d4e5f6"),
            snapshot("indexer", "5555666677778888", &format!("container:{}", API_ID)),
        ];
        let graph = build_graph(&snapshots);
        let names: Vec<&str> = graph
            .dependents_of("vpn")
            .iter()
            .map(|d| d.identity.name.as_str())
            .collect();
        assert_eq!(names, vec!["torrent", "indexer"]);
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn test_unknown_and_self_references_are_ignored() {
        let snapshots = vec![
            snapshot("lonely", "9999888877776666", "service:missing"),
            snapshot("loop", "1212121212121212", "container:loop"),
        ];
        let graph = build_graph(&snapshots);
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_only_direct_edges() {
        let snapshots = vec![
            snapshot("a", "aaaaaaaaaaaaaaaa", "bridge"),
            snapshot("b", "bbbbbbbbbbbbbbbb", "service:a"),
            snapshot("c", "cccccccccccccccc", "service:b"),
        ];
        let graph = build_graph(&snapshots);
        assert_eq!(graph.dependents_of("a").len(), 1);
        assert_eq!(graph.dependents_of("b")[0].identity.name, "c");
    }

    #[test]
    fn test_stack_peers_exclude_network_dependents() {
        let grouped = |name: &str, id: &str, mode: &str| {
            ContainerSnapshot::from_inspect(
                ContainerInspect::new(name, id, "acme/app:1")
                    .with_network_mode(mode)
                    .with_label(COMPOSE_PROJECT_LABEL, "acme"),
            )
        };
        let snapshots = vec![
            grouped("api", API_ID, "bridge"),
            grouped("sidecar", "ffff0000ffff0000", "service:api"),
            grouped("worker", "eeee0000eeee0000", "bridge"),
            snapshot("unrelated", "dddd0000dddd0000", "bridge"),
        ];
        let graph = build_graph(&snapshots);
        let peers = stack_peers(&snapshots, &snapshots[0], graph.dependents_of("api"));
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].identity.name, "worker");
        assert_eq!(peers[0].reason, DependencyReason::StackGroup);
    }
}
