//! One memory store per memory-owning role.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::collab::EmbeddingClient;
use crate::domain::{MemoryBackendFailure, MemoryRole};

use super::store::MemoryStore;

/// Handles to the per-role stores, injected into steps and the reflector.
#[derive(Clone, Default)]
pub struct MemoryBank {
    stores: BTreeMap<MemoryRole, Arc<MemoryStore>>,
}

impl MemoryBank {
    /// A bank with no stores: steps skip recall, reflection stores nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Process-local stores for every memory role.
    pub fn in_memory(embedder: Arc<dyn EmbeddingClient>) -> Self {
        let stores = MemoryRole::ALL
            .into_iter()
            .map(|role| {
                let store = MemoryStore::in_memory(role.as_str(), Arc::clone(&embedder));
                (role, Arc::new(store))
            })
            .collect();
        Self { stores }
    }

    /// Stores persisted as `<dir>/<role>.json`.
    pub fn open(
        dir: impl AsRef<Path>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self, MemoryBackendFailure> {
        let mut stores = BTreeMap::new();
        for role in MemoryRole::ALL {
            let path = dir.as_ref().join(format!("{}.json", role.as_str()));
            let store = MemoryStore::open(role.as_str(), path, Arc::clone(&embedder))?;
            stores.insert(role, Arc::new(store));
        }
        Ok(Self { stores })
    }

    pub fn get(&self, role: MemoryRole) -> Option<Arc<MemoryStore>> {
        self.stores.get(&role).cloned()
    }

    pub fn roles(&self) -> impl Iterator<Item = MemoryRole> + '_ {
        self.stores.keys().copied()
    }
}
