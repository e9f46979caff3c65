//! ABOUTME: Typed-relationship graph adapter for the LTMC memory service
//! ABOUTME: Degrades to the relational `ResourceLinks` table when the graph backend is unreachable
//!
//! Generalized from the teacher's bi-temporal knowledge graph down to the
//! single responsibility the memory service actually needs: typed edges
//! between resources and shallow neighbor queries, with the graph treated
//! as an optional backend the way cache is — never load-bearing for
//! correctness, only for enrichment.

pub mod storage;
pub mod types;

pub use storage::GraphBackend;
pub use storage::surrealdb::SurrealDbBackend;
pub use types::{GraphEdge, GraphNode, GraphQueryResult};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::warn;

use ltmc_types::{LtmcError, Result};

/// Wraps a [`GraphBackend`] with the degraded-mode bookkeeping §4.4
/// requires: an `available` flag that write operations respect (returning
/// [`LtmcError::Unavailable`] rather than propagating a raw backend error)
/// and that reads expose via [`GraphQueryResult::graph_available`].
pub struct GraphAdapter {
    backend: Arc<dyn GraphBackend>,
    available: AtomicBool,
}

impl GraphAdapter {
    #[must_use]
    pub fn new(backend: Arc<dyn GraphBackend>, available: bool) -> Self {
        Self {
            backend,
            available: AtomicBool::new(available),
        }
    }

    /// Probe the backend and update the degraded-mode flag, returning the
    /// new state.
    pub async fn probe(&self) -> bool {
        let reachable = self.backend.ping().await;
        self.available.store(reachable, Ordering::Relaxed);
        if !reachable {
            warn!("graph backend unreachable; degrading to relational fallback");
        }
        reachable
    }

    #[must_use]
    pub fn available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// `ok` while reachable, matching the health-endpoint contract shared
    /// with the cache adapter.
    #[must_use]
    pub fn health(&self) -> &'static str {
        if self.available() {
            "ok"
        } else {
            "unavailable"
        }
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::Unavailable`] if the graph backend is degraded,
    /// otherwise whatever the backend itself returns.
    pub async fn upsert_resource_node(&self, id: &str, properties: Value) -> Result<()> {
        if !self.available() {
            return Err(LtmcError::Unavailable("graph backend is degraded".to_string()));
        }
        self.backend.upsert_resource_node(id, properties).await
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::Unavailable`] if the graph backend is degraded,
    /// otherwise whatever the backend itself returns. `type_label` is passed
    /// through verbatim; the backend is responsible for sanitizing it into a
    /// safe identifier while preserving the original for round-tripping.
    pub async fn create_edge(
        &self,
        source_id: &str,
        target_id: &str,
        type_label: &str,
        properties: Value,
    ) -> Result<()> {
        if !self.available() {
            return Err(LtmcError::Unavailable("graph backend is degraded".to_string()));
        }
        self.backend
            .create_edge(source_id, target_id, type_label, properties)
            .await
    }

    /// Never fails: in degraded mode returns an empty result tagged
    /// `graph_available: false` so the retrieval pipeline can fall back to
    /// the relational `ResourceLinks` table itself.
    pub async fn neighbors(
        &self,
        id: &str,
        type_filter: Option<&str>,
        depth: usize,
    ) -> GraphQueryResult<GraphNode> {
        if !self.available() {
            return GraphQueryResult::from_fallback(Vec::new());
        }
        match self.backend.neighbors(id, type_filter, depth).await {
            Ok(nodes) => GraphQueryResult::from_graph(nodes),
            Err(e) => {
                warn!(error = %e, "graph neighbors() failed; falling back");
                self.available.store(false, Ordering::Relaxed);
                GraphQueryResult::from_fallback(Vec::new())
            }
        }
    }

    pub async fn query(&self, entity: &str, relation_type: Option<&str>) -> GraphQueryResult<GraphEdge> {
        if !self.available() {
            return GraphQueryResult::from_fallback(Vec::new());
        }
        match self.backend.query(entity, relation_type).await {
            Ok(edges) => GraphQueryResult::from_graph(edges),
            Err(e) => {
                warn!(error = %e, "graph query() failed; falling back");
                self.available.store(false, Ordering::Relaxed);
                GraphQueryResult::from_fallback(Vec::new())
            }
        }
    }

    /// Every edge in the graph backend, for the consistency sweep. Empty,
    /// not an error, while degraded.
    pub async fn all_edges(&self) -> Vec<GraphEdge> {
        if !self.available() {
            return Vec::new();
        }
        match self.backend.all_edges().await {
            Ok(edges) => edges,
            Err(e) => {
                warn!(error = %e, "graph all_edges() failed; falling back");
                self.available.store(false, Ordering::Relaxed);
                Vec::new()
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::Unavailable`] if the graph backend is degraded,
    /// otherwise whatever the backend itself returns.
    pub async fn delete_edge(&self, source_id: &str, target_id: &str, type_label: &str) -> Result<()> {
        if !self.available() {
            return Err(LtmcError::Unavailable("graph backend is degraded".to_string()));
        }
        self.backend.delete_edge(source_id, target_id, type_label).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FailingBackend;

    #[async_trait]
    impl GraphBackend for FailingBackend {
        async fn upsert_resource_node(&self, _id: &str, _properties: Value) -> Result<()> {
            Err(LtmcError::Internal("unreachable".to_string()))
        }
        async fn create_edge(&self, _s: &str, _t: &str, _l: &str, _p: Value) -> Result<()> {
            Err(LtmcError::Internal("unreachable".to_string()))
        }
        async fn neighbors(&self, _id: &str, _f: Option<&str>, _d: usize) -> Result<Vec<GraphNode>> {
            Err(LtmcError::Internal("unreachable".to_string()))
        }
        async fn query(&self, _e: &str, _r: Option<&str>) -> Result<Vec<GraphEdge>> {
            Err(LtmcError::Internal("unreachable".to_string()))
        }
        async fn all_edges(&self) -> Result<Vec<GraphEdge>> {
            Err(LtmcError::Internal("unreachable".to_string()))
        }
        async fn delete_edge(&self, _s: &str, _t: &str, _l: &str) -> Result<()> {
            Err(LtmcError::Internal("unreachable".to_string()))
        }
        async fn ping(&self) -> bool {
            false
        }
    }

    struct RecordingBackend {
        edges: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl GraphBackend for RecordingBackend {
        async fn upsert_resource_node(&self, _id: &str, _properties: Value) -> Result<()> {
            Ok(())
        }
        async fn create_edge(&self, s: &str, t: &str, l: &str, _p: Value) -> Result<()> {
            self.edges.lock().unwrap().push((s.to_string(), t.to_string(), l.to_string()));
            Ok(())
        }
        async fn neighbors(&self, _id: &str, _f: Option<&str>, _d: usize) -> Result<Vec<GraphNode>> {
            Ok(Vec::new())
        }
        async fn query(&self, _e: &str, _r: Option<&str>) -> Result<Vec<GraphEdge>> {
            Ok(Vec::new())
        }
        async fn all_edges(&self) -> Result<Vec<GraphEdge>> {
            Ok(Vec::new())
        }
        async fn delete_edge(&self, _s: &str, _t: &str, _l: &str) -> Result<()> {
            Ok(())
        }
        async fn ping(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn writes_return_unavailable_when_degraded() {
        let adapter = GraphAdapter::new(Arc::new(FailingBackend), false);
        let err = adapter
            .create_edge("1", "2", "similar_to", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, LtmcError::Unavailable(_)));
    }

    #[tokio::test]
    async fn reads_fall_back_without_erroring_when_degraded() {
        let adapter = GraphAdapter::new(Arc::new(FailingBackend), false);
        let result = adapter.neighbors("1", None, 1).await;
        assert!(!result.graph_available);
        assert!(result.items.is_empty());
    }

    #[tokio::test]
    async fn a_failing_call_while_available_flips_to_degraded() {
        let adapter = GraphAdapter::new(Arc::new(FailingBackend), true);
        let result = adapter.neighbors("1", None, 1).await;
        assert!(!result.graph_available);
        assert!(!adapter.available());
    }

    #[tokio::test]
    async fn link_type_reaches_the_backend_verbatim() {
        let backend = Arc::new(RecordingBackend { edges: Mutex::new(Vec::new()) });
        let adapter = GraphAdapter::new(backend.clone(), true);
        adapter
            .create_edge("1", "2", "cites; weird label", Value::Null)
            .await
            .unwrap();
        let edges = backend.edges.lock().unwrap();
        assert_eq!(edges[0].2, "cites; weird label");
    }
}
