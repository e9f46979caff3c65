//! Shared types for context-link binding and context assembly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single ranked chunk, as returned by `ltmc-retrieval`'s pipeline, ready
/// for assembly into a context block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedChunk {
    pub chunk_id: i64,
    pub resource_id: i64,
    pub file_name: String,
    pub chunk_text: String,
    pub score: f32,
    pub rank: usize,
    pub created_at: DateTime<Utc>,
}

/// Context assembled from a set of [`RankedChunk`]s, ready to both answer a
/// query and to bind as [`ltmc_types::ContextLink`]s once the answering
/// message is logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembledContext {
    pub chunks: Vec<RankedChunk>,
    pub token_count: usize,
    pub formatted: String,
}

impl AssembledContext {
    /// `chunk_id`s this context was built from, in the order they appear —
    /// exactly what `ask_with_context` binds as `ContextLink` rows.
    #[must_use]
    pub fn chunk_ids(&self) -> Vec<i64> {
        self.chunks.iter().map(|c| c.chunk_id).collect()
    }
}
