use std::collections::HashMap;

use crate::types::ContainerSnapshot;

/// Arena of snapshots addressable by name, full ID or short ID
#[derive(Debug, Default, Clone)]
pub struct IdentityIndex {
    snapshots: Vec<ContainerSnapshot>,
    keys: HashMap<String, usize>,
}

impl IdentityIndex {
    pub fn new(snapshots: Vec<ContainerSnapshot>) -> Self {
        let mut keys = HashMap::with_capacity(snapshots.len() * 3);
        for (position, snapshot) in snapshots.iter().enumerate() {
            for key in snapshot.identity.keys() {
                if !key.is_empty() {
                    keys.entry(key.to_string()).or_insert(position);
                }
            }
        }
        Self { snapshots, keys }
    }

    pub fn position(&self, reference: &str) -> Option<usize> {
        let reference = reference.trim_start_matches('/');
        if let Some(position) = self.keys.get(reference) {
            return Some(*position);
        }
        // Gateways sometimes report IDs longer than the short form but shorter than the full one.
        if reference.len() > 12 {
            return self
                .snapshots
                .iter()
                .position(|s| s.identity.id.starts_with(reference));
        }
        None
    }

    pub fn resolve(&self, reference: &str) -> Option<&ContainerSnapshot> {
        self.position(reference).map(|p| &self.snapshots[p])
    }

    pub fn snapshots(&self) -> &[ContainerSnapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
