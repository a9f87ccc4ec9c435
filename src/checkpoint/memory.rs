//! In-memory checkpoint store.
//!
//! Volatile process-local storage; suitable for tests and ephemeral runs.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use super::{Checkpoint, CheckpointError, CheckpointStore, Result};

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    inner: RwLock<FxHashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints.
    pub fn len(&self) -> usize {
        self.inner.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint, expected_version: Option<u64>) -> Result<()> {
        let mut map = self.inner.write().map_err(|e| CheckpointError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        if let Some(expected) = expected_version {
            if let Some(existing) = map.get(&checkpoint.checkpoint_id) {
                if existing.version != expected {
                    return Err(CheckpointError::ConcurrencyConflict {
                        checkpoint_id: checkpoint.checkpoint_id.clone(),
                        expected,
                        actual: existing.version,
                    });
                }
            }
        }
        map.insert(checkpoint.checkpoint_id.clone(), checkpoint);
        Ok(())
    }

    async fn load(&self, checkpoint_id: &str) -> Result<Checkpoint> {
        let map = self.inner.read().map_err(|e| CheckpointError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        map.get(checkpoint_id)
            .cloned()
            .ok_or_else(|| CheckpointError::NotFound {
                checkpoint_id: checkpoint_id.to_string(),
            })
    }

    async fn latest_for_run(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let map = self.inner.read().map_err(|e| CheckpointError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        Ok(map
            .values()
            .filter(|cp| cp.run_id == run_id)
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.version.cmp(&b.version))
            })
            .cloned())
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<()> {
        let mut map = self.inner.write().map_err(|e| CheckpointError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        map.remove(checkpoint_id);
        Ok(())
    }

    async fn list_expired(&self, as_of: DateTime<Utc>) -> Result<Vec<String>> {
        let map = self.inner.read().map_err(|e| CheckpointError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        let mut expired: Vec<String> = map
            .values()
            .filter(|cp| cp.is_expired(as_of))
            .map(|cp| cp.checkpoint_id.clone())
            .collect();
        expired.sort();
        Ok(expired)
    }
}
