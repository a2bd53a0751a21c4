use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::gateway::EndpointRef;

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// One async mutex per `gateway/endpoint/container`, shared by every run of an orchestrator.
/// An entry lives only while some run holds or waits on it.
#[derive(Debug, Default)]
pub struct UpgradeLocks {
    locks: LockTable,
}

/// Held for the duration of a run; releases every container lock on drop
#[derive(Debug)]
pub struct UpgradeGuard {
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl UpgradeGuard {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl Drop for UpgradeGuard {
    fn drop(&mut self) {
        self.guards.clear();
        let mut locks = lock_table(&self.table);
        for key in &self.keys {
            // The table's own reference is the last one: nobody holds or awaits it.
            if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(key);
            }
        }
    }
}

impl UpgradeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(endpoint: &EndpointRef, container: &str) -> String {
        format!("{}/{}", endpoint, container.trim_start_matches('/'))
    }

    /// Lock every named container, always in sorted order so overlapping runs cannot deadlock
    pub async fn acquire<I, S>(&self, endpoint: &EndpointRef, containers: I) -> UpgradeGuard
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys: Vec<String> = containers
            .into_iter()
            .map(|c| Self::key(endpoint, c.as_ref()))
            .collect();
        keys.sort();
        keys.dedup();

        let mut guard = UpgradeGuard {
            keys: Vec::with_capacity(keys.len()),
            guards: Vec::with_capacity(keys.len()),
            table: self.locks.clone(),
        };
        for key in keys {
            let lock = self.lock_for(&key);
            if lock.try_lock().is_err() {
                debug!("Waiting for upgrade lock on {}", key);
            }
            guard.keys.push(key);
            guard.guards.push(lock.lock_owned().await);
        }
        guard
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        lock_table(&self.locks)
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        lock_table(&self.locks).len()
    }
}

fn lock_table(table: &LockTable) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
    match table.lock() {
        Ok(locks) => locks,
        Err(poisoned) => poisoned.into_inner(),
    }
}
