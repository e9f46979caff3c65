//! Swappable backend trait for the graph adapter.

use async_trait::async_trait;
use serde_json::Value;

use ltmc_types::Result;

use crate::types::{GraphEdge, GraphNode};

/// Graph backend contract (§4.4). Every write that names an edge type must
/// use `type_label` verbatim as the backend's actual edge/relation type —
/// never as a property on a fixed relation.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Create or update a node for `id` with `properties`.
    async fn upsert_resource_node(&self, id: &str, properties: Value) -> Result<()>;

    /// Create a typed edge. `type_label` is used as the actual edge type.
    async fn create_edge(
        &self,
        source_id: &str,
        target_id: &str,
        type_label: &str,
        properties: Value,
    ) -> Result<()>;

    /// Nodes reachable from `id` within `depth` hops, optionally filtered to
    /// edges whose type equals `type_filter`.
    async fn neighbors(
        &self,
        id: &str,
        type_filter: Option<&str>,
        depth: usize,
    ) -> Result<Vec<GraphNode>>;

    /// Edges touching `entity`, optionally filtered by `relation_type`.
    async fn query(&self, entity: &str, relation_type: Option<&str>) -> Result<Vec<GraphEdge>>;

    /// Every edge currently stored, across all relation types. Used by the
    /// consistency sweep to find edges with no backing `ResourceLink` row.
    async fn all_edges(&self) -> Result<Vec<GraphEdge>>;

    /// Remove the edge(s) of type `type_label` between `source_id` and
    /// `target_id`. No-op if absent.
    async fn delete_edge(&self, source_id: &str, target_id: &str, type_label: &str) -> Result<()>;

    /// Cheap reachability probe used at startup and by the health endpoint.
    async fn ping(&self) -> bool;
}
