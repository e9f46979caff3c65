// ABOUTME: Atomic multi-store write coordinator for the LTMC memory service
// ABOUTME: Orchestrates relational, vector, graph, and cache stores as one logical transaction
//!
//! Grounded on the teacher's `DefaultMemoryManager`
//! (`llmspell-memory/src/manager.rs`): an aggregate struct holding one
//! `Arc<dyn _>`/store handle per subsystem, constructed once at startup and
//! shared behind `Arc` by every caller. The difference from the teacher is
//! that here the stores are not independent — `store_resource` must commit
//! to all four as a single logical unit, which the teacher's aggregate never
//! attempted (its subsystems are genuinely independent memory kinds).

pub mod chunking;
pub mod locking;
pub mod sweep;

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use ltmc_cache::{self as cache, CacheAdapter};
use ltmc_embed::EmbeddingService;
use ltmc_graph::GraphAdapter;
use ltmc_storage::relational::RelationalStore;
use ltmc_storage::vector_index::VectorIndex;
use ltmc_types::{
    ChatMessage, ChatRole, CodePattern, PatternResult, Resource, ResourceLink, ResourceType,
    Result, Todo, TodoPriority, TodoStatus,
};

use chunking::chunk_content;
use locking::ResourceLockTable;

/// Result of a successful [`Coordinator::store_resource`] call.
#[derive(Debug, Clone)]
pub struct StoreResourceOutcome {
    pub resource_id: i64,
    pub chunk_count: usize,
}

/// Aggregate of the four stores plus the embedder, wired together by the
/// atomic write protocol (spec §4.1).
pub struct Coordinator {
    relational: Arc<RelationalStore>,
    vector: Arc<VectorIndex>,
    graph: Arc<GraphAdapter>,
    cache: Arc<CacheAdapter>,
    embedder: Arc<EmbeddingService>,
    locks: ResourceLockTable,
    max_chunk_size: usize,
    overlap_size: usize,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        relational: Arc<RelationalStore>,
        vector: Arc<VectorIndex>,
        graph: Arc<GraphAdapter>,
        cache: Arc<CacheAdapter>,
        embedder: Arc<EmbeddingService>,
        max_chunk_size: usize,
        overlap_size: usize,
    ) -> Self {
        Self {
            relational,
            vector,
            graph,
            cache,
            embedder,
            locks: ResourceLockTable::new(),
            max_chunk_size,
            overlap_size,
        }
    }

    #[must_use]
    pub fn relational(&self) -> &Arc<RelationalStore> {
        &self.relational
    }

    #[must_use]
    pub fn vector(&self) -> &Arc<VectorIndex> {
        &self.vector
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<GraphAdapter> {
        &self.graph
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheAdapter> {
        &self.cache
    }

    #[must_use]
    pub fn embedder(&self) -> &Arc<EmbeddingService> {
        &self.embedder
    }

    /// Aggregate health, combining the two optional backends. The relational
    /// and vector stores are load-bearing and are not reflected here — their
    /// failure means the process cannot serve at all.
    #[must_use]
    pub fn health(&self) -> Value {
        json!({
            "graph": self.graph.health(),
            "cache": self.cache.health(),
        })
    }

    /// `store_resource`: the five-phase atomic write protocol (§4.1).
    ///
    /// # Errors
    ///
    /// Returns [`ltmc_types::LtmcError::Validation`] if `content` is empty,
    /// [`ltmc_types::LtmcError::Storage`] (kind relational or vector) if
    /// either load-bearing store fails. Graph and cache failures never
    /// surface here; they degrade instead.
    pub async fn store_resource(
        &self,
        file_name: &str,
        resource_type: ResourceType,
        content: &str,
        metadata: Option<Value>,
    ) -> Result<StoreResourceOutcome> {
        if content.trim().is_empty() {
            return Err(ltmc_types::LtmcError::Validation(
                "content must not be empty".to_string(),
            ));
        }

        let _guard = self.locks.lock(file_name).await;

        // Prepare: chunk and embed before touching any store.
        let prepared = chunk_content(content, self.max_chunk_size, self.overlap_size);
        let texts: Vec<String> = prepared.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;

        // Phase A: relational insert, not yet committed.
        let tx = self.relational.begin().await?;
        let resource = tx.insert_resource(file_name, resource_type).await?;

        let mut rows = Vec::with_capacity(prepared.len());
        let mut vector_ids = Vec::with_capacity(prepared.len());
        for chunk in &prepared {
            let vector_id = tx.allocate_vector_id().await?;
            vector_ids.push(vector_id);
            rows.push((chunk.text.clone(), vector_id, chunk.position));
        }
        tx.insert_chunks(resource.id, &rows).await?;

        // Phase B: vector persistence. Must durably succeed before the
        // relational transaction commits (§4.1 ordering rationale).
        for (vector_id, embedding) in vector_ids.iter().zip(embeddings.iter()) {
            if let Err(e) = self.vector.add(*vector_id, embedding.clone()).await {
                warn!(error = %e, resource_id = resource.id, "vector add failed; aborting write");
                tx.rollback().await?;
                self.reload_vector_index_after_failure().await;
                return Err(e);
            }
        }
        if let Err(e) = self.vector.save().await {
            warn!(error = %e, resource_id = resource.id, "vector save failed; aborting write");
            tx.rollback().await?;
            self.reload_vector_index_after_failure().await;
            return Err(e);
        }

        // Phase C: graph, best-effort.
        let properties = json!({
            "file_name": file_name,
            "resource_type": resource_type.to_string(),
        });
        if let Err(e) = self.graph.upsert_resource_node(&resource.id.to_string(), properties).await
        {
            warn!(error = %e, resource_id = resource.id, "graph upsert failed; continuing in degraded mode");
        }

        // Phase D: commit relational. From here the write is durable.
        tx.commit().await?;

        // Phase E: cache invalidation, best-effort.
        self.cache.invalidate(cache::retrieve_invalidation_pattern());

        let _ = metadata; // reserved for future resource-level metadata storage
        info!(resource_id = resource.id, chunks = rows.len(), "stored resource");
        Ok(StoreResourceOutcome {
            resource_id: resource.id,
            chunk_count: rows.len(),
        })
    }

    /// On a vector-phase failure the in-memory index may hold additions that
    /// were never fsynced; reload from the last durable snapshot so memory
    /// and disk agree again (§4.1 Phase B failure handling).
    async fn reload_vector_index_after_failure(&self) {
        if let Err(e) = self.vector.reload().await {
            warn!(error = %e, "failed to reload vector index after a write failure");
        }
    }

    /// `create_resource_link`: relational is authoritative; the graph edge is
    /// best-effort and mirrors it.
    ///
    /// # Errors
    ///
    /// Returns [`ltmc_types::LtmcError::AlreadyExists`] or
    /// [`ltmc_types::LtmcError::NotFound`] per the relational contract.
    pub async fn create_resource_link(
        &self,
        source_id: i64,
        target_id: i64,
        link_type: &str,
        weight: f64,
        metadata: Value,
    ) -> Result<ResourceLink> {
        let link = self
            .relational
            .create_resource_link(source_id, target_id, link_type, weight, &metadata)
            .await?;

        if let Err(e) = self
            .graph
            .create_edge(&source_id.to_string(), &target_id.to_string(), link_type, metadata)
            .await
        {
            warn!(error = %e, source_id, target_id, "graph edge creation failed; relational link is authoritative");
        }

        self.cache.invalidate(&cache::graph_invalidation_pattern(source_id));
        self.cache.invalidate(&cache::graph_invalidation_pattern(target_id));
        self.cache.invalidate(cache::retrieve_invalidation_pattern());
        Ok(link)
    }

    /// `log_code_pattern`: embedded text is `input_prompt + "\n" + generated_code`
    /// (§4.1), stored with the same atomicity discipline as `store_resource`
    /// but without a parent `Resource` row — the pattern owns its own
    /// `vector_id` directly.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_code_pattern(
        &self,
        input_prompt: &str,
        generated_code: &str,
        result: PatternResult,
        function_name: Option<&str>,
        file_name: Option<&str>,
        module_name: Option<&str>,
        execution_time_ms: Option<i64>,
        error_message: Option<&str>,
        tags: &[String],
    ) -> Result<CodePattern> {
        let embedding_text = format!("{input_prompt}\n{generated_code}");
        let embedding = self.embedder.embed_one(&embedding_text).await?;

        let tx = self.relational.begin().await?;
        let vector_id = tx.allocate_vector_id().await?;
        let pattern = RelationalStore::insert_code_pattern_in_tx(
            &tx,
            input_prompt,
            generated_code,
            result,
            function_name,
            file_name,
            module_name,
            execution_time_ms,
            error_message,
            tags,
            vector_id,
        )
        .await?;

        if let Err(e) = self.vector.add(vector_id, embedding).await {
            tx.rollback().await?;
            self.reload_vector_index_after_failure().await;
            return Err(e);
        }
        if let Err(e) = self.vector.save().await {
            tx.rollback().await?;
            self.reload_vector_index_after_failure().await;
            return Err(e);
        }
        tx.commit().await?;

        self.cache.invalidate(cache::retrieve_invalidation_pattern());
        Ok(pattern)
    }

    /// `log_chat`: relational-only write with cache invalidation.
    ///
    /// # Errors
    ///
    /// Returns [`ltmc_types::LtmcError::Storage`] on a relational failure.
    pub async fn log_chat(
        &self,
        conversation_id: &str,
        role: ChatRole,
        content: &str,
        source_tool: Option<&str>,
    ) -> Result<ChatMessage> {
        let message = self
            .relational
            .log_chat(conversation_id, role, content, source_tool)
            .await?;
        self.cache.invalidate(&format!("chat:{conversation_id}:*"));
        Ok(message)
    }

    /// # Errors
    ///
    /// Returns [`ltmc_types::LtmcError::Storage`] on a relational failure.
    pub async fn add_todo(&self, title: &str, description: &str, priority: TodoPriority) -> Result<Todo> {
        let todo = self.relational.add_todo(title, description, priority).await?;
        self.cache.invalidate("todo:*");
        Ok(todo)
    }

    /// # Errors
    ///
    /// Returns [`ltmc_types::LtmcError::NotFound`] if `todo_id` does not exist.
    pub async fn complete_todo(&self, todo_id: i64) -> Result<Todo> {
        let todo = self.relational.complete_todo(todo_id).await?;
        self.cache.invalidate("todo:*");
        Ok(todo)
    }

    /// # Errors
    ///
    /// Returns [`ltmc_types::LtmcError::Storage`] on a relational failure.
    pub async fn search_todos(
        &self,
        status: Option<TodoStatus>,
        priority: Option<TodoPriority>,
        limit: i64,
    ) -> Result<Vec<Todo>> {
        self.relational.search_todos(status, priority, limit).await
    }

    /// # Errors
    ///
    /// Returns [`ltmc_types::LtmcError::Storage`] on a relational failure.
    pub async fn resource_by_id(&self, id: i64) -> Result<Option<Resource>> {
        self.relational.resource_by_id(id).await
    }

    /// `delete_resource`: relational cascade (Resources → ResourceChunks →
    /// ContextLinks/ResourceLinks) is authoritative and durable — once it
    /// commits, `retrieve` can never surface a chunk of `resource_id` again,
    /// since `hydrate_chunks` only returns chunks with a live relational row.
    /// The vector removal that follows is best-effort cleanup of the
    /// now-dangling vector entries; leaving them would only cost the next
    /// consistency sweep a few extra removals (§4.1.1), not correctness.
    ///
    /// # Errors
    ///
    /// Returns [`ltmc_types::LtmcError::Storage`] if the relational cascade
    /// fails. A vector save failure after a successful cascade is logged and
    /// swallowed.
    pub async fn delete_resource(&self, resource_id: i64) -> Result<()> {
        let vector_ids = self.relational.chunk_vector_ids_for_resource(resource_id).await?;

        self.relational.delete_resource(resource_id).await?;

        for vector_id in vector_ids {
            self.vector.remove(vector_id).await;
        }
        if let Err(e) = self.vector.save().await {
            warn!(error = %e, resource_id, "vector save failed after resource deletion");
        }

        self.cache.invalidate(cache::retrieve_invalidation_pattern());
        info!(resource_id, "deleted resource");
        Ok(())
    }

    /// Run the startup/on-demand consistency sweep (§4.1.1).
    ///
    /// # Errors
    ///
    /// Returns [`ltmc_types::LtmcError::Storage`] only if the relational
    /// store itself is unreadable; partial graph/vector drift is repaired,
    /// not failed on.
    pub async fn consistency_sweep(&self) -> Result<sweep::SweepReport> {
        sweep::run(&self.relational, &self.vector, &self.graph).await
    }
}
