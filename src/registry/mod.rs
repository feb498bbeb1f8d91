use std::sync::Arc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Cancellation handles of every in-flight run, keyed by session id.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    active: Arc<DashMap<String, CancellationToken>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `token` under `id` until the returned guard is dropped.
    pub fn register(&self, id: impl Into<String>, token: CancellationToken) -> RunGuard {
        let id = id.into();
        debug!(run_id = %id, "Registering active run");
        self.active.insert(id.clone(), token);
        RunGuard {
            id,
            active: Arc::clone(&self.active),
        }
    }

    /// Returns whether a run with this id was active.
    pub fn cancel(&self, id: &str) -> bool {
        match self.active.get(id) {
            Some(entry) => {
                info!(run_id = %id, "Cancelling run");
                entry.value().cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Unregisters its run on drop.
#[derive(Debug)]
pub struct RunGuard {
    id: String,
    active: Arc<DashMap<String, CancellationToken>>,
}

impl RunGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}
