// ABOUTME: Embedding retrieval and ranking pipeline for the LTMC memory service
// ABOUTME: Fuses vector search with relational hydration, optional graph enrichment, and caching

//! Grounded on the teacher's `llmspell-rag` hybrid-search traits
//! (`HybridStorage`/`HybridQuery`/`RetrievalWeights`), which already fuse a
//! vector score with other signals behind one query call. Here the fusion is
//! narrower and fixed by spec rather than configurable weights: vector
//! similarity is the sole ranking signal, with deterministic tie-breaks
//! (chunk position, then resource recency) standing in for the teacher's
//! weighted blend.

pub mod ranking;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use ltmc_cache::{self as cache};
use ltmc_coordinator::Coordinator;
use ltmc_context::{AssembledContext, ContextAssembler, RankedChunk};
use ltmc_types::{ChatMessage, ChatRole, Chunk, Resource, ResourceLink, ResourceType, Result};

const OVER_FETCH_FACTOR: usize = 3;
const SIMILARITY_THRESHOLD_DEFAULT: f32 = 0.7;
const MAX_LINKS_PER_DOC_DEFAULT: usize = 5;

/// One ranked, hydrated result from [`RetrievalPipeline::retrieve`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub resource: Resource,
    pub score: f32,
    pub rank: usize,
    /// Ids of the owning resource's 1-hop graph neighbors. Empty unless
    /// enrichment was requested; always empty when the resource has none.
    pub neighbor_resource_ids: Vec<String>,
}

impl RetrievedChunk {
    fn to_ranked_chunk(&self) -> RankedChunk {
        RankedChunk {
            chunk_id: self.chunk.id,
            resource_id: self.resource.id,
            file_name: self.resource.file_name.clone(),
            chunk_text: self.chunk.chunk_text.clone(),
            score: self.score,
            rank: self.rank,
            created_at: self.resource.created_at,
        }
    }
}

/// Result of [`RetrievalPipeline::ask_with_context`]: the logged assistant
/// turn plus the context it was given, already bound as `ContextLink`s.
#[derive(Debug, Clone)]
pub struct AskWithContextOutcome {
    pub message: ChatMessage,
    pub context: AssembledContext,
}

/// Turns a query into ranked, hydrated chunks, fusing vector search with the
/// relational, graph, and cache adapters the [`Coordinator`] already holds.
///
/// Never owns its stores directly — it borrows them through the coordinator
/// so that a write via `store_resource` and a read via `retrieve` always see
/// the same underlying `Arc`s.
pub struct RetrievalPipeline {
    coordinator: Arc<Coordinator>,
    cache_ttl: Duration,
}

impl RetrievalPipeline {
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator>, cache_ttl: Duration) -> Self {
        Self { coordinator, cache_ttl }
    }

    /// `retrieve`: the nine-step algorithm from spec §4.6.
    ///
    /// # Errors
    ///
    /// Returns [`ltmc_types::LtmcError::Internal`] if embedding fails, or a
    /// relational [`ltmc_types::LtmcError::Storage`] if hydration fails.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        type_filter: Option<ResourceType>,
        enrich_graph: bool,
    ) -> Result<Vec<RetrievedChunk>> {
        let filters = ranking::filters_hash(type_filter.map(|t| t.to_string()).as_deref(), None);
        let cache_key = cache::retrieve_key(&ranking::query_hash(query), top_k, &filters);

        if let Some(cached) = self.coordinator.cache().get(&cache_key) {
            if let Ok(chunks) = serde_json::from_value::<Vec<RetrievedChunk>>(cached) {
                debug!(query, top_k, "retrieve cache hit");
                return Ok(chunks);
            }
        }

        let query_vector = self.coordinator.embedder().embed_one(query).await?;
        let over_fetch = top_k.saturating_mul(OVER_FETCH_FACTOR).max(top_k);
        let hits = self.coordinator.vector().search(&query_vector, over_fetch).await?;

        if hits.is_empty() {
            return Ok(Vec::new());
        }
        let vector_ids: Vec<i64> = hits.iter().map(|h| h.vector_id).collect();
        let scores: std::collections::HashMap<i64, f32> =
            hits.iter().map(|h| (h.vector_id, h.score)).collect();

        let hydrated = self.coordinator.relational().hydrate_chunks(&vector_ids).await?;
        if hydrated.len() < vector_ids.len() {
            warn!(
                requested = vector_ids.len(),
                hydrated = hydrated.len(),
                "some vector hits had no backing chunk; consistency sweep will clean them up"
            );
        }

        let triples: Vec<(Chunk, Resource, f32)> = hydrated
            .into_iter()
            .filter(|(_, resource)| type_filter.map_or(true, |f| f == resource.resource_type))
            .map(|(chunk, resource)| {
                let score = scores.get(&chunk.vector_id).copied().unwrap_or(0.0);
                (chunk, resource, score)
            })
            .collect();

        let mut ranked = ranking::rank(triples);
        ranked.truncate(top_k);
        for (rank, item) in ranked.iter_mut().enumerate() {
            item.rank = rank;
        }

        if enrich_graph {
            self.attach_neighbors(&mut ranked).await;
        }

        if let Ok(value) = serde_json::to_value(&ranked) {
            self.coordinator.cache().set(cache_key, value, self.cache_ttl);
        }
        Ok(ranked)
    }

    /// Attach each result's 1-hop graph neighbors in place (or the relational
    /// `ResourceLinks` fallback when the graph is degraded).
    async fn attach_neighbors(&self, ranked: &mut [RetrievedChunk]) {
        for item in ranked.iter_mut() {
            let id = item.resource.id.to_string();
            let result = self.coordinator.graph().neighbors(&id, None, 1).await;
            if result.graph_available {
                item.neighbor_resource_ids = result.items.into_iter().map(|n| n.id).collect();
            } else if let Ok(links) = self.coordinator.relational().resource_links_for(item.resource.id).await {
                item.neighbor_resource_ids = links
                    .into_iter()
                    .map(|link| {
                        if link.source_resource_id == item.resource.id {
                            link.target_resource_id.to_string()
                        } else {
                            link.source_resource_id.to_string()
                        }
                    })
                    .collect();
            }
        }
    }

    /// `build_context`: run [`RetrievalPipeline::retrieve`] (no graph
    /// enrichment — it only dilutes the token budget) and assemble the
    /// result into one formatted block.
    ///
    /// # Errors
    ///
    /// Returns whatever [`RetrievalPipeline::retrieve`] returns.
    pub async fn build_context(
        &self,
        query: &str,
        top_k: usize,
        type_filter: Option<ResourceType>,
        max_tokens: usize,
    ) -> Result<AssembledContext> {
        let ranked = self.retrieve(query, top_k, type_filter, false).await?;
        let chunks: Vec<RankedChunk> = ranked.iter().map(RetrievedChunk::to_ranked_chunk).collect();
        Ok(ContextAssembler::with_max_tokens(max_tokens).assemble(chunks))
    }

    /// `ask_with_context`: retrieve, log the assistant turn, and bind
    /// `ContextLink`s to the chunks that informed it. The three steps are
    /// deliberately not atomic (spec §4.6): a chat-write failure after a
    /// successful retrieval drops no partial state, and a partial
    /// context-link failure still leaves the logged message intact.
    ///
    /// # Errors
    ///
    /// Returns whatever [`RetrievalPipeline::retrieve`] or
    /// [`Coordinator::log_chat`] return. Context-link failures are logged,
    /// not propagated.
    pub async fn ask_with_context(
        &self,
        query: &str,
        conversation_id: &str,
        top_k: usize,
    ) -> Result<AskWithContextOutcome> {
        let context = self.build_context(query, top_k, None, 8000).await?;
        let message = self
            .coordinator
            .log_chat(conversation_id, ChatRole::Assistant, &context.formatted, Some("retrieval"))
            .await?;

        let chunk_ids = context.chunk_ids();
        if !chunk_ids.is_empty() {
            if let Err(e) = self
                .coordinator
                .relational()
                .create_context_links(message.id, &chunk_ids)
                .await
            {
                warn!(error = %e, message_id = message.id, "context link creation failed; chat message stands alone");
            }
        }

        Ok(AskWithContextOutcome { message, context })
    }

    /// `auto_link_documents`: pairwise-compare the vectors backing
    /// `resource_ids` and create a `similar_to` [`ResourceLink`] for every
    /// pair above `similarity_threshold`, capped at `max_links_per_doc` links
    /// per resource. Skips pairs that already have a link (idempotent).
    ///
    /// # Errors
    ///
    /// Returns [`ltmc_types::LtmcError::Storage`] if relational reads fail.
    /// Individual link-creation failures are logged and skipped, not
    /// propagated, so one bad pair cannot abort the whole batch.
    pub async fn auto_link_documents(
        &self,
        resource_ids: &[i64],
        similarity_threshold: Option<f32>,
        max_links_per_doc: Option<usize>,
    ) -> Result<Vec<ResourceLink>> {
        let threshold = similarity_threshold.unwrap_or(SIMILARITY_THRESHOLD_DEFAULT);
        let cap = max_links_per_doc.unwrap_or(MAX_LINKS_PER_DOC_DEFAULT);

        let mut representative_vectors = Vec::with_capacity(resource_ids.len());
        for &resource_id in resource_ids {
            let vector_ids = self.coordinator.relational().chunk_vector_ids_for_resource(resource_id).await?;
            if let Some(&vector_id) = vector_ids.first() {
                representative_vectors.push((resource_id, vector_id));
            }
        }

        let mut created = Vec::new();
        let mut links_per_doc: std::collections::HashMap<i64, usize> = std::collections::HashMap::new();

        for i in 0..representative_vectors.len() {
            for j in (i + 1)..representative_vectors.len() {
                let (source_id, source_vec) = representative_vectors[i];
                let (target_id, target_vec) = representative_vectors[j];

                if *links_per_doc.get(&source_id).unwrap_or(&0) >= cap
                    || *links_per_doc.get(&target_id).unwrap_or(&0) >= cap
                {
                    continue;
                }

                let Some(similarity) = self.coordinator.vector().pairwise_similarity(source_vec, target_vec).await else {
                    continue;
                };
                if similarity < threshold {
                    continue;
                }

                let existing = self.coordinator.relational().resource_links_for(source_id).await?;
                if existing
                    .iter()
                    .any(|l| l.target_resource_id == target_id && l.link_type == "similar_to")
                {
                    continue;
                }

                match self
                    .coordinator
                    .create_resource_link(source_id, target_id, "similar_to", f64::from(similarity), json!(null))
                    .await
                {
                    Ok(link) => {
                        *links_per_doc.entry(source_id).or_insert(0) += 1;
                        *links_per_doc.entry(target_id).or_insert(0) += 1;
                        created.push(link);
                    }
                    Err(e) => warn!(error = %e, source_id, target_id, "auto-link creation failed; skipping pair"),
                }
            }
        }

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ltmc_cache::CacheAdapter;
    use ltmc_embed::{EmbeddingService, HashEmbedder};
    use ltmc_graph::GraphAdapter;
    use ltmc_storage::relational::RelationalStore;
    use ltmc_storage::vector_index::VectorIndex;

    async fn harness() -> (RetrievalPipeline, Arc<Coordinator>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let relational = Arc::new(
            RelationalStore::open(dir.path().join("db").to_str().unwrap())
                .await
                .unwrap(),
        );
        let vector = Arc::new(VectorIndex::load(&dir.path().join("idx"), 8).await.unwrap());
        let graph_backend = ltmc_graph::SurrealDbBackend::open(dir.path()).await.unwrap();
        let graph = Arc::new(GraphAdapter::new(Arc::new(graph_backend), true));
        let cache = Arc::new(CacheAdapter::new(true));
        let embedder = Arc::new(EmbeddingService::new(Arc::new(HashEmbedder::new(8))));
        let coordinator = Arc::new(Coordinator::new(relational, vector, graph, cache, embedder, 1000, 200));
        let pipeline = RetrievalPipeline::new(coordinator.clone(), Duration::from_secs(300));
        (pipeline, coordinator, dir)
    }

    #[tokio::test]
    async fn retrieve_finds_the_stored_chunk_that_matches_the_query() {
        let (pipeline, coordinator, _dir) = harness().await;
        coordinator
            .store_resource("a.md", ResourceType::Document, "the quick brown fox", None)
            .await
            .unwrap();
        coordinator
            .store_resource("b.md", ResourceType::Document, "a totally unrelated sentence", None)
            .await
            .unwrap();

        let results = pipeline.retrieve("the quick brown fox", 1, None, false).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_text, "the quick brown fox");
    }

    #[tokio::test]
    async fn retrieve_respects_type_filter() {
        let (pipeline, coordinator, _dir) = harness().await;
        coordinator
            .store_resource("a.md", ResourceType::Document, "hello", None)
            .await
            .unwrap();
        coordinator
            .store_resource("a.rs", ResourceType::Code, "hello", None)
            .await
            .unwrap();

        let results = pipeline
            .retrieve("hello", 10, Some(ResourceType::Code), false)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].resource.resource_type, ResourceType::Code);
    }

    #[tokio::test]
    async fn deleted_resource_never_resurfaces_in_retrieve() {
        let (pipeline, coordinator, _dir) = harness().await;
        let kept = coordinator
            .store_resource("a.md", ResourceType::Document, "the quick brown fox", None)
            .await
            .unwrap();
        let deleted = coordinator
            .store_resource("b.md", ResourceType::Document, "the quick brown fox too", None)
            .await
            .unwrap();

        coordinator.delete_resource(deleted.resource_id).await.unwrap();

        let results = pipeline.retrieve("the quick brown fox", 10, None, false).await.unwrap();
        assert!(results.iter().all(|r| r.resource.id == kept.resource_id));
        assert!(results.iter().all(|r| r.resource.id != deleted.resource_id));
    }

    #[tokio::test]
    async fn second_identical_retrieve_is_served_from_cache() {
        let (pipeline, coordinator, _dir) = harness().await;
        coordinator
            .store_resource("a.md", ResourceType::Document, "cached content", None)
            .await
            .unwrap();

        pipeline.retrieve("cached content", 1, None, false).await.unwrap();
        assert_eq!(coordinator.cache().stats().sets, 1);
        pipeline.retrieve("cached content", 1, None, false).await.unwrap();
        assert_eq!(coordinator.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn build_context_assembles_a_formatted_block() {
        let (pipeline, coordinator, _dir) = harness().await;
        coordinator
            .store_resource("a.md", ResourceType::Document, "hello world", None)
            .await
            .unwrap();
        let context = pipeline.build_context("hello world", 5, None, 8000).await.unwrap();
        assert!(context.formatted.contains("hello world"));
    }

    #[tokio::test]
    async fn ask_with_context_logs_a_chat_message_and_binds_context_links() {
        let (pipeline, coordinator, _dir) = harness().await;
        coordinator
            .store_resource("a.md", ResourceType::Document, "hello world", None)
            .await
            .unwrap();

        let outcome = pipeline.ask_with_context("hello world", "conv-1", 5).await.unwrap();
        assert_eq!(outcome.message.conversation_id, "conv-1");
        assert!(!outcome.context.chunk_ids().is_empty());
    }

    #[tokio::test]
    async fn auto_link_documents_links_similar_resources() {
        let (pipeline, coordinator, _dir) = harness().await;
        let a = coordinator
            .store_resource("a.md", ResourceType::Document, "identical phrasing", None)
            .await
            .unwrap();
        let b = coordinator
            .store_resource("b.md", ResourceType::Document, "identical phrasing", None)
            .await
            .unwrap();

        let created = pipeline
            .auto_link_documents(&[a.resource_id, b.resource_id], Some(0.99), None)
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].link_type, "similar_to");
    }

    #[tokio::test]
    async fn auto_link_documents_is_idempotent() {
        let (pipeline, coordinator, _dir) = harness().await;
        let a = coordinator
            .store_resource("a.md", ResourceType::Document, "identical phrasing", None)
            .await
            .unwrap();
        let b = coordinator
            .store_resource("b.md", ResourceType::Document, "identical phrasing", None)
            .await
            .unwrap();

        pipeline
            .auto_link_documents(&[a.resource_id, b.resource_id], Some(0.99), None)
            .await
            .unwrap();
        let second = pipeline
            .auto_link_documents(&[a.resource_id, b.resource_id], Some(0.99), None)
            .await
            .unwrap();
        assert!(second.is_empty());
    }
}
