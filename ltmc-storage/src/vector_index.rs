//! Persisted flat vector index with cosine-similarity search.
//!
//! Grounded on the MessagePack persistence format used by
//! `llmspell-kernel`'s HNSW storage (`rmp_serde::to_vec` /
//! `rmp_serde::from_slice`), but its save path writes straight to the
//! canonical file with `std::fs::write` — a crash mid-write leaves a
//! truncated, unloadable index. Here `save` always goes through a sibling
//! temp file, `fsync`s it, then renames it into place so the canonical path
//! only ever observes whole writes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use ltmc_types::{LtmcError, Result, StorageKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedEntry {
    vector_id: i64,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    dimensions: usize,
    entries: Vec<PersistedEntry>,
}

/// A single entry returned by [`VectorIndex::search`]: a vector id paired
/// with its cosine similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredVectorId {
    pub vector_id: i64,
    pub score: f32,
}

struct IndexState {
    entries: Vec<PersistedEntry>,
}

/// In-memory flat vector index, periodically persisted to `path`.
///
/// Every vector id it stores was allocated by
/// [`crate::relational::RelationalStore::allocate_vector_id`] — this index
/// never mints its own ids.
pub struct VectorIndex {
    path: PathBuf,
    dimensions: usize,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    /// Load a persisted index from `path`, or start empty if the file is
    /// missing or unreadable. A corrupt file never crashes startup: it is
    /// logged and treated as an empty index, relying on the consistency
    /// sweep to re-embed whatever relational rows no longer have a vector.
    ///
    /// # Errors
    ///
    /// This function does not itself return storage errors for a missing or
    /// corrupt file; it only returns [`LtmcError::Validation`] if `path`'s
    /// parent directory cannot be determined.
    pub async fn load(path: &Path, dimensions: usize) -> Result<Self> {
        if path.parent().is_none() {
            return Err(LtmcError::Validation(format!(
                "vector index path `{}` has no parent directory",
                path.display()
            )));
        }

        let entries = match tokio::fs::read(path).await {
            Ok(bytes) => match rmp_serde::from_slice::<PersistedIndex>(&bytes) {
                Ok(persisted) if persisted.dimensions == dimensions => persisted.entries,
                Ok(persisted) => {
                    warn!(
                        found = persisted.dimensions,
                        expected = dimensions,
                        "vector index dimension mismatch, starting empty"
                    );
                    Vec::new()
                }
                Err(e) => {
                    warn!(error = %e, "vector index file is corrupt, starting empty");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(error = %e, "could not read vector index file, starting empty");
                Vec::new()
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            dimensions,
            state: RwLock::new(IndexState { entries }),
        })
    }

    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of vectors currently held.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Insert a vector under `vector_id`, replacing any existing entry with
    /// the same id (idempotent — spec §4.3). Does not persist; callers batch
    /// inserts and call [`VectorIndex::save`] once per logical operation.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Validation`] if `vector.len()` does not match
    /// the configured dimension.
    pub async fn add(&self, vector_id: i64, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(LtmcError::Validation(format!(
                "vector has {} dimensions, expected {}",
                vector.len(),
                self.dimensions
            )));
        }
        let mut state = self.state.write().await;
        state.entries.retain(|e| e.vector_id != vector_id);
        state.entries.push(PersistedEntry { vector_id, vector });
        Ok(())
    }

    /// Remove a vector id, e.g. during rollback of a partially committed
    /// write. No-op if absent.
    pub async fn remove(&self, vector_id: i64) {
        let mut state = self.state.write().await;
        state.entries.retain(|e| e.vector_id != vector_id);
    }

    /// All vector ids currently present, for the consistency sweep.
    pub async fn all_vector_ids(&self) -> Vec<i64> {
        self.state.read().await.entries.iter().map(|e| e.vector_id).collect()
    }

    /// Cosine similarity between two stored vectors, for `auto_link_documents`
    /// (spec §4.6). `None` if either id is absent.
    pub async fn pairwise_similarity(&self, a: i64, b: i64) -> Option<f32> {
        let state = self.state.read().await;
        let vec_a = state.entries.iter().find(|e| e.vector_id == a)?;
        let vec_b = state.entries.iter().find(|e| e.vector_id == b)?;
        Some(cosine_similarity(&vec_a.vector, &vec_b.vector))
    }

    /// Cosine-similarity search, best matches first.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Validation`] if `query.len()` does not match the
    /// configured dimension.
    pub async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredVectorId>> {
        if query.len() != self.dimensions {
            return Err(LtmcError::Validation(format!(
                "query has {} dimensions, expected {}",
                query.len(),
                self.dimensions
            )));
        }
        let state = self.state.read().await;
        let mut scored: Vec<ScoredVectorId> = state
            .entries
            .iter()
            .map(|e| ScoredVectorId {
                vector_id: e.vector_id,
                score: cosine_similarity(query, &e.vector),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Discard in-memory state and reload from the last durable snapshot on
    /// disk. Used after a failed write: entries added in memory during a
    /// phase that was then aborted must not linger (§4.1 Phase B failure
    /// handling — "any in-memory vector additions are discarded by reloading
    /// the on-disk index").
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] only if the on-disk file exists but
    /// cannot be read for a reason other than corruption (corruption falls
    /// back to empty, same as [`VectorIndex::load`]).
    pub async fn reload(&self) -> Result<()> {
        let reloaded = Self::load(&self.path, self.dimensions).await?;
        let mut state = self.state.write().await;
        state.entries = reloaded.state.into_inner().entries;
        Ok(())
    }

    /// Persist the index: serialize to MessagePack, write to a sibling temp
    /// file, `fsync`, then atomically rename into place. The canonical path
    /// is never observed in a partially-written state.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] if any step of the write, fsync, or
    /// rename fails.
    pub async fn save(&self) -> Result<()> {
        let snapshot = {
            let state = self.state.read().await;
            PersistedIndex {
                dimensions: self.dimensions,
                entries: state.entries.clone(),
            }
        };
        let bytes = rmp_serde::to_vec(&snapshot)
            .map_err(|e| LtmcError::storage(StorageKind::Vector, format!("serializing index: {e}")))?;

        let parent = self.path.parent().ok_or_else(|| {
            LtmcError::storage(StorageKind::Vector, "vector index path has no parent directory")
        })?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Vector, format!("creating index directory: {e}")))?;

        let tmp_path = parent.join(format!(
            ".{}.tmp",
            self.path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("vector_index")
        ));

        let file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Vector, format!("creating temp file: {e}")))?;
        {
            use tokio::io::AsyncWriteExt;
            let mut file = file;
            file.write_all(&bytes)
                .await
                .map_err(|e| LtmcError::storage(StorageKind::Vector, format!("writing temp file: {e}")))?;
            file.sync_all()
                .await
                .map_err(|e| LtmcError::storage(StorageKind::Vector, format!("fsyncing temp file: {e}")))?;
        }

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Vector, format!("renaming into place: {e}")))?;
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
