//! Graph-adapter data shapes: nodes, edges, and neighbor query results.

use serde_json::Value;

/// A node mirroring a `Resource` (or any other entity the coordinator
/// chooses to upsert). `id` is the caller's own id — typically a
/// `Resource.id` — not a SurrealDB-generated one.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub properties: Value,
}

/// A directed, typed edge. `type_label` is the caller-supplied, free-form
/// `ResourceLink.link_type` used verbatim as the SurrealDB relation name —
/// never collapsed into a constant edge type.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GraphEdge {
    pub source_id: String,
    pub target_id: String,
    pub type_label: String,
    pub properties: Value,
}

/// Result of a [`crate::GraphAdapter::neighbors`] or
/// [`crate::GraphAdapter::query`] call, tagged with whether it was served by
/// the real graph backend or the relational fallback.
#[derive(Debug, Clone)]
pub struct GraphQueryResult<T> {
    pub items: Vec<T>,
    pub graph_available: bool,
}

impl<T> GraphQueryResult<T> {
    #[must_use]
    pub const fn from_graph(items: Vec<T>) -> Self {
        Self {
            items,
            graph_available: true,
        }
    }

    #[must_use]
    pub const fn from_fallback(items: Vec<T>) -> Self {
        Self {
            items,
            graph_available: false,
        }
    }
}
