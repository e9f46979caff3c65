//! Startup/on-demand consistency sweep (§4.1.1): reconciles drift between
//! the relational store, the vector index, and the graph store left behind
//! by a crash between phases of the atomic write protocol.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use ltmc_graph::GraphAdapter;
use ltmc_storage::relational::RelationalStore;
use ltmc_storage::vector_index::VectorIndex;
use ltmc_types::Result;

/// Counts of drift found and repaired by one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub chunks_marked_orphaned: usize,
    pub garbage_vectors_removed: usize,
    pub graph_edges_reupserted: usize,
    pub graph_edges_deleted: usize,
}

/// Run one sweep pass. Never fails unless the relational store itself is
/// unreadable — vector and graph drift are repaired best-effort.
///
/// # Errors
///
/// Returns [`ltmc_types::LtmcError::Storage`] (kind relational) if the
/// relational store cannot be read at all.
pub async fn run(
    relational: &Arc<RelationalStore>,
    vector: &Arc<VectorIndex>,
    graph: &Arc<GraphAdapter>,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    let chunk_vector_pairs = relational.all_chunk_ids_and_vector_ids().await?;
    let chunk_vector_ids: HashSet<i64> = chunk_vector_pairs.iter().map(|(_, v)| *v).collect();
    let index_vector_ids: HashSet<i64> = vector.all_vector_ids().await.into_iter().collect();

    // Chunks pointing at a vector id the index no longer has: mark orphaned
    // and let re-embedding pick them up idempotently.
    for (chunk_id, vector_id) in &chunk_vector_pairs {
        if !index_vector_ids.contains(vector_id) {
            warn!(chunk_id, vector_id, "chunk references a vector missing from the index; marking orphaned");
            relational.mark_chunk_orphaned(*chunk_id).await?;
            report.chunks_marked_orphaned += 1;
        }
    }

    // Vectors in the index with no backing chunk row: garbage, remove them.
    for vector_id in &index_vector_ids {
        if !chunk_vector_ids.contains(vector_id) {
            vector.remove(*vector_id).await;
            report.garbage_vectors_removed += 1;
        }
    }
    if report.garbage_vectors_removed > 0 {
        vector.save().await?;
    }

    // ResourceLinks and graph edges both mirror the same relationship;
    // reconcile both directions (best-effort; the graph may simply be
    // degraded, which is not itself drift).
    if graph.available() {
        let links = relational.all_resource_links().await?;
        let mut mirrored = HashSet::new();

        // Links with no backing edge: re-upsert.
        for link in &links {
            let source = link.source_resource_id.to_string();
            let target = link.target_resource_id.to_string();
            mirrored.insert((source.clone(), target.clone(), link.link_type.clone()));
            if graph
                .query(&source, Some(&link.link_type))
                .await
                .items
                .iter()
                .any(|e| e.target_id == target)
            {
                continue;
            }
            if graph
                .create_edge(&source, &target, &link.link_type, link.metadata.clone())
                .await
                .is_ok()
            {
                report.graph_edges_reupserted += 1;
            }
        }

        // Edges with no backing ResourceLink row: delete.
        for edge in graph.all_edges().await {
            let key = (edge.source_id.clone(), edge.target_id.clone(), edge.type_label.clone());
            if mirrored.contains(&key) {
                continue;
            }
            warn!(
                source = %edge.source_id,
                target = %edge.target_id,
                link_type = %edge.type_label,
                "graph edge has no backing ResourceLink row; deleting"
            );
            if graph
                .delete_edge(&edge.source_id, &edge.target_id, &edge.type_label)
                .await
                .is_ok()
            {
                report.graph_edges_deleted += 1;
            }
        }
    }

    info!(
        chunks_marked_orphaned = report.chunks_marked_orphaned,
        garbage_vectors_removed = report.garbage_vectors_removed,
        graph_edges_reupserted = report.graph_edges_reupserted,
        graph_edges_deleted = report.graph_edges_deleted,
        "consistency sweep complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ltmc_types::ResourceType;
    use std::sync::Arc;

    async fn setup() -> (Arc<RelationalStore>, Arc<VectorIndex>, Arc<GraphAdapter>) {
        let dir = tempfile::tempdir().unwrap();
        let relational = Arc::new(RelationalStore::open(dir.path().join("db").to_str().unwrap()).await.unwrap());
        let vector = Arc::new(VectorIndex::load(&dir.path().join("idx"), 2).await.unwrap());
        let graph_backend = ltmc_graph::SurrealDbBackend::open(dir.path()).await.unwrap();
        let graph = Arc::new(GraphAdapter::new(Arc::new(graph_backend), true));
        (relational, vector, graph)
    }

    #[tokio::test]
    async fn garbage_vector_with_no_chunk_is_removed() {
        let (relational, vector, graph) = setup().await;
        vector.add(999, vec![1.0, 0.0]).await.unwrap();
        let report = run(&relational, &vector, &graph).await.unwrap();
        assert_eq!(report.garbage_vectors_removed, 1);
        assert!(vector.is_empty().await);
    }

    #[tokio::test]
    async fn chunk_with_missing_vector_is_flagged() {
        let (relational, vector, graph) = setup().await;
        let tx = relational.begin().await.unwrap();
        let resource = tx.insert_resource("a.md", ResourceType::Document).await.unwrap();
        let vid = tx.allocate_vector_id().await.unwrap();
        tx.insert_chunks(resource.id, &[("hello".to_string(), vid, 0)]).await.unwrap();
        tx.commit().await.unwrap();

        let report = run(&relational, &vector, &graph).await.unwrap();
        assert_eq!(report.chunks_marked_orphaned, 1);
    }

    #[tokio::test]
    async fn graph_edge_with_no_resource_link_row_is_deleted() {
        let (relational, vector, graph) = setup().await;
        graph
            .upsert_resource_node("1", serde_json::json!({}))
            .await
            .unwrap();
        graph
            .upsert_resource_node("2", serde_json::json!({}))
            .await
            .unwrap();
        graph
            .create_edge("1", "2", "orphaned_edge", serde_json::json!({}))
            .await
            .unwrap();

        let report = run(&relational, &vector, &graph).await.unwrap();
        assert_eq!(report.graph_edges_deleted, 1);
        assert!(graph.all_edges().await.is_empty());
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let (relational, vector, graph) = setup().await;
        vector.add(999, vec![1.0, 0.0]).await.unwrap();
        graph
            .upsert_resource_node("1", serde_json::json!({}))
            .await
            .unwrap();
        graph
            .upsert_resource_node("2", serde_json::json!({}))
            .await
            .unwrap();
        graph
            .create_edge("1", "2", "orphaned_edge", serde_json::json!({}))
            .await
            .unwrap();

        let first = run(&relational, &vector, &graph).await.unwrap();
        assert!(first.garbage_vectors_removed > 0 || first.graph_edges_deleted > 0);

        let second = run(&relational, &vector, &graph).await.unwrap();
        assert_eq!(second, SweepReport::default());
    }
}
