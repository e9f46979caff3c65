//! ABOUTME: Startup sequence for the LTMC MCP server (spec §4.8)
//! ABOUTME: load config → run migrations → load vector index → probe graph → probe cache → sweep

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use ltmc_cache::CacheAdapter;
use ltmc_coordinator::Coordinator;
use ltmc_embed::{EmbeddingService, HashEmbedder};
use ltmc_graph::{GraphAdapter, SurrealDbBackend};
use ltmc_retrieval::RetrievalPipeline;
use ltmc_storage::relational::RelationalStore;
use ltmc_storage::vector_index::VectorIndex;

/// Everything a running server needs, constructed in the order spec §4.8
/// mandates. Logging suppression happens in `main` before this runs, since
/// it must predate even loading the config file.
pub struct Services {
    pub coordinator: Arc<Coordinator>,
    pub retrieval: Arc<RetrievalPipeline>,
}

pub async fn bootstrap(config: &ltmc_config::LtmcConfig) -> Result<Services> {
    std::fs::create_dir_all(config.data_dir_path()).context("creating data_dir")?;

    let relational = Arc::new(
        RelationalStore::open(&config.relational_db_path)
            .await
            .context("opening relational store / running migrations")?,
    );

    let vector = Arc::new(
        VectorIndex::load(std::path::Path::new(&config.vector_index_path), config.embedding_dim)
            .await
            .context("loading vector index")?,
    );

    let graph_backend = Arc::new(
        SurrealDbBackend::open(config.data_dir_path())
            .await
            .context("opening graph backend")?,
    );
    let graph = Arc::new(GraphAdapter::new(graph_backend, config.has_graph()));
    if config.has_graph() {
        let reachable = graph.probe().await;
        info!(reachable, "graph backend probed");
    } else {
        info!("no graph_uri configured; graph adapter stays degraded");
    }

    let cache = Arc::new(CacheAdapter::new(config.has_cache()));
    if !config.has_cache() {
        info!("no cache_uri configured; cache adapter stays degraded");
    }

    let embedder = Arc::new(EmbeddingService::new(Arc::new(HashEmbedder::new(config.embedding_dim))));
    if embedder.dimensions() != config.embedding_dim {
        anyhow::bail!(
            "embedder dimension {} does not match configured embedding_dim {}",
            embedder.dimensions(),
            config.embedding_dim
        );
    }

    let coordinator = Arc::new(Coordinator::new(
        relational,
        vector,
        graph,
        cache,
        embedder,
        config.max_chunk_size,
        config.overlap_size,
    ));

    let sweep = coordinator
        .consistency_sweep()
        .await
        .context("running startup consistency sweep")?;
    if sweep.chunks_marked_orphaned > 0
        || sweep.garbage_vectors_removed > 0
        || sweep.graph_edges_reupserted > 0
        || sweep.graph_edges_deleted > 0
    {
        warn!(
            chunks_marked_orphaned = sweep.chunks_marked_orphaned,
            garbage_vectors_removed = sweep.garbage_vectors_removed,
            graph_edges_reupserted = sweep.graph_edges_reupserted,
            graph_edges_deleted = sweep.graph_edges_deleted,
            "consistency sweep repaired drift from a prior crash"
        );
    } else {
        info!("consistency sweep found no drift");
    }

    let retrieval = Arc::new(RetrievalPipeline::new(
        coordinator.clone(),
        Duration::from_secs(config.cache_ttl_seconds),
    ));

    Ok(Services { coordinator, retrieval })
}
