//! Per-role nearest-neighbour store over past (situation, recommendation) pairs.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collab::EmbeddingClient;
use crate::domain::MemoryBackendFailure;

use super::persist;

/// An immutable stored memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub id: u64,
    pub embedding: Vec<f32>,
    pub situation: String,
    pub recommendation: String,
}

/// A retrieval hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryMatch {
    pub id: u64,
    pub matched_situation: String,
    pub recommendation: String,
    /// `1 - cosine distance`; 1.0 for an identical embedding.
    pub similarity: f64,
}

/// Nearest-neighbour memory for one role.
///
/// Entries are append-only and identifiers are assigned monotonically. When
/// opened with a path, every `store` rewrites the snapshot file atomically.
pub struct MemoryStore {
    name: String,
    embedder: Arc<dyn EmbeddingClient>,
    entries: Mutex<Vec<MemoryEntry>>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create an empty, process-local store.
    pub fn in_memory(name: impl Into<String>, embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            name: name.into(),
            embedder,
            entries: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// Open a store persisted at `path`, loading existing entries if present.
    pub fn open(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self, MemoryBackendFailure> {
        let path = path.as_ref().to_path_buf();
        let entries = persist::load_entries(&path)?;
        Ok(Self {
            name: name.into(),
            embedder,
            entries: Mutex::new(entries),
            path: Some(path),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embed `situation` and append a new entry. Returns the assigned id.
    pub async fn store(
        &self,
        situation: &str,
        recommendation: &str,
    ) -> Result<u64, MemoryBackendFailure> {
        let embedding = self.embedder.embed(situation).await?;

        let mut entries = self.lock()?;
        if let Some(first) = entries.first() {
            check_dimension(first.embedding.len(), embedding.len())?;
        }
        let id = entries.last().map_or(1, |e| e.id + 1);
        entries.push(MemoryEntry {
            id,
            embedding,
            situation: situation.to_string(),
            recommendation: recommendation.to_string(),
        });

        if let Some(path) = &self.path {
            if let Err(e) = persist::save_entries(path, &self.name, &entries) {
                entries.pop();
                return Err(e);
            }
        }
        crate::obs::emit_memory_stored(&self.name, id);
        Ok(id)
    }

    /// Return the `k` entries most similar to `query`, best first.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<MemoryMatch>, MemoryBackendFailure> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed(query).await?;

        let entries = self.lock()?;
        let mut scored = Vec::with_capacity(entries.len());
        for entry in entries.iter() {
            check_dimension(entry.embedding.len(), query_vec.len())?;
            scored.push((cosine_similarity(&entry.embedding, &query_vec), entry));
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.id.cmp(&b.1.id)));

        let matches: Vec<MemoryMatch> = scored
            .into_iter()
            .take(k)
            .map(|(similarity, e)| MemoryMatch {
                id: e.id,
                matched_situation: e.situation.clone(),
                recommendation: e.recommendation.clone(),
                similarity,
            })
            .collect();
        debug!(store = %self.name, hits = matches.len(), "memory retrieved");
        Ok(matches)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<MemoryEntry>>, MemoryBackendFailure> {
        self.entries
            .lock()
            .map_err(|_| MemoryBackendFailure::Persistence("memory store lock poisoned".into()))
    }
}

fn check_dimension(expected: usize, actual: usize) -> Result<(), MemoryBackendFailure> {
    if expected != actual {
        return Err(MemoryBackendFailure::DimensionMismatch { expected, actual });
    }
    Ok(())
}

/// Cosine similarity, 0.0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut na, mut nb) = (0f64, 0f64, 0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::HashEmbedder;

    fn store() -> MemoryStore {
        MemoryStore::in_memory("bull", Arc::new(HashEmbedder::default()))
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_store_assigns_monotonic_ids() {
        let s = store();
        assert_eq!(s.store("a", "x").await.unwrap(), 1);
        assert_eq!(s.store("b", "y").await.unwrap(), 2);
        assert_eq!(s.len(), 2);
    }

    #[tokio::test]
    async fn test_roundtrip_returns_recommendation() {
        let s = store();
        s.store("rates rising, consumer spending falling", "rotate into staples")
            .await
            .unwrap();
        s.store("tech volatility with institutional selling", "trim growth names")
            .await
            .unwrap();

        let hits = s
            .retrieve("rates rising, consumer spending falling", 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].recommendation, "rotate into staples");
        assert!(hits[0].similarity >= 0.999);
    }

    #[tokio::test]
    async fn test_retrieve_from_empty_store() {
        let s = store();
        assert!(s.retrieve("anything", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_caps_at_store_size() {
        let s = store();
        s.store("one", "r1").await.unwrap();
        let hits = s.retrieve("one two", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}
