//! `SurrealDB` backend: embedded, file-based graph storage via `RocksDB`.
//!
//! A known defect class in graph layers is collapsing every relationship
//! into one fixed edge table with the real type stashed in a string
//! property, so the graph database never actually models the relationship
//! as a first-class edge type. Here `type_label` becomes the SurrealDB
//! RELATE table name itself (`RELATE a->similar_to->b`), sanitized to a
//! safe identifier, so distinct link types are distinct edges in the
//! graph's own schema.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use surrealdb::engine::local::{Db, RocksDb};
use surrealdb::sql::Thing;
use surrealdb::Surreal;
use tracing::warn;

use ltmc_types::{LtmcError, Result, StorageKind};

use super::GraphBackend;
use crate::types::{GraphEdge, GraphNode};

const NODE_TABLE: &str = "resource_node";

/// `SurrealDB`-backed [`GraphBackend`], embedded mode with `RocksDB`
/// persistence at `<data_dir>/graph.db`.
#[derive(Clone)]
pub struct SurrealDbBackend {
    db: Surreal<Db>,
}

impl SurrealDbBackend {
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] if the embedded database cannot be
    /// opened or its namespace/database cannot be selected.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let db_path: PathBuf = data_dir.as_ref().join("graph.db");
        let db = Surreal::new::<RocksDb>(db_path)
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Graph, e.to_string()))?;
        db.use_ns("ltmc")
            .use_db("ltmc")
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Graph, e.to_string()))?;
        Ok(Self { db })
    }
}

/// Turn a free-form `link_type` into a safe, unquoted SurrealDB table
/// identifier: lowercase alphanumerics and underscores, every other byte
/// replaced with `_`. Collisions across distinct inputs are acceptable —
/// the original string survives verbatim in the edge's `_link_type`
/// property for exact round-tripping.
fn sanitize_type_label(type_label: &str) -> String {
    let pattern = Regex::new(r"[^a-zA-Z0-9_]").expect("static regex is valid");
    let sanitized = pattern.replace_all(type_label, "_").to_lowercase();
    if sanitized.is_empty() || sanitized.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("t_{sanitized}")
    } else {
        sanitized
    }
}

fn node_thing(id: &str) -> Thing {
    Thing::from((NODE_TABLE, id))
}

#[async_trait]
impl GraphBackend for SurrealDbBackend {
    async fn upsert_resource_node(&self, id: &str, properties: Value) -> Result<()> {
        let thing = node_thing(id);
        self.db
            .upsert::<Option<Value>>(thing)
            .content(properties)
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Graph, e.to_string()))?;
        Ok(())
    }

    async fn create_edge(
        &self,
        source_id: &str,
        target_id: &str,
        type_label: &str,
        properties: Value,
    ) -> Result<()> {
        let relation = sanitize_type_label(type_label);
        let mut content = properties;
        if let Value::Object(map) = &mut content {
            map.insert("_link_type".to_string(), Value::String(type_label.to_string()));
        }

        let sql = format!("RELATE $source->{relation}->$target CONTENT $content");
        self.db
            .query(sql)
            .bind(("source", node_thing(source_id)))
            .bind(("target", node_thing(target_id)))
            .bind(("content", content))
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Graph, e.to_string()))?;
        Ok(())
    }

    async fn neighbors(
        &self,
        id: &str,
        type_filter: Option<&str>,
        depth: usize,
    ) -> Result<Vec<GraphNode>> {
        let depth = depth.clamp(1, 10);
        let relation = type_filter.map(sanitize_type_label);
        let hop = relation
            .as_deref()
            .map_or_else(|| "->?->resource_node".to_string(), |r| format!("->{r}->resource_node"));
        let path = hop.repeat(depth);
        let sql = format!("SELECT {path} AS n FROM $start");

        let mut response = self
            .db
            .query(sql)
            .bind(("start", node_thing(id)))
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Graph, e.to_string()))?;

        #[derive(serde::Deserialize)]
        struct Row {
            n: Vec<Value>,
        }
        let rows: Vec<Row> = response
            .take(0)
            .map_err(|e| LtmcError::storage(StorageKind::Graph, e.to_string()))?;

        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for row in rows {
            for value in row.n {
                let node_id = value
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if node_id.is_empty() || !seen.insert(node_id.clone()) {
                    continue;
                }
                nodes.push(GraphNode {
                    id: node_id,
                    properties: value,
                });
            }
        }
        Ok(nodes)
    }

    async fn query(&self, entity: &str, relation_type: Option<&str>) -> Result<Vec<GraphEdge>> {
        let Some(relation) = relation_type.map(sanitize_type_label) else {
            warn!("unscoped graph query() across all edge tables is not supported by this backend; pass relation_type");
            return Ok(Vec::new());
        };
        let sql = format!("SELECT * FROM {relation} WHERE in = $entity OR out = $entity");
        let mut response = self
            .db
            .query(sql)
            .bind(("entity", node_thing(entity)))
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Graph, e.to_string()))?;
        Self::rows_to_edges(&mut response, &relation)
    }

    async fn all_edges(&self) -> Result<Vec<GraphEdge>> {
        let mut edges = Vec::new();
        for table in self.edge_table_names().await? {
            let sql = format!("SELECT * FROM {table}");
            let mut response = self
                .db
                .query(sql)
                .await
                .map_err(|e| LtmcError::storage(StorageKind::Graph, e.to_string()))?;
            edges.extend(Self::rows_to_edges(&mut response, &table)?);
        }
        Ok(edges)
    }

    async fn delete_edge(&self, source_id: &str, target_id: &str, type_label: &str) -> Result<()> {
        let relation = sanitize_type_label(type_label);
        let sql = format!("DELETE FROM {relation} WHERE in = $source AND out = $target");
        self.db
            .query(sql)
            .bind(("source", node_thing(source_id)))
            .bind(("target", node_thing(target_id)))
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Graph, e.to_string()))?;
        Ok(())
    }

    async fn ping(&self) -> bool {
        self.db.query("RETURN 1").await.is_ok()
    }
}

#[derive(serde::Deserialize)]
struct EdgeRow {
    #[serde(rename = "in")]
    from: Thing,
    #[serde(rename = "out")]
    to: Thing,
    #[serde(flatten)]
    rest: serde_json::Map<String, Value>,
}

impl SurrealDbBackend {
    /// Table names holding edges (every table `INFO FOR DB` reports, minus
    /// the resource-node table).
    async fn edge_table_names(&self) -> Result<Vec<String>> {
        let mut response = self
            .db
            .query("INFO FOR DB")
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Graph, e.to_string()))?;
        let info: Value = response
            .take(0)
            .map_err(|e| LtmcError::storage(StorageKind::Graph, e.to_string()))?;
        Ok(info
            .get("tables")
            .and_then(Value::as_object)
            .map(|tables| {
                tables
                    .keys()
                    .filter(|name| name.as_str() != NODE_TABLE)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Decode the rows of a `SELECT * FROM <table>`-shaped response into
    /// edges, falling back to `table_name` as the type label when an edge
    /// predates the `_link_type` property convention.
    fn rows_to_edges(response: &mut surrealdb::Response, table_name: &str) -> Result<Vec<GraphEdge>> {
        let rows: Vec<EdgeRow> = response
            .take(0)
            .map_err(|e| LtmcError::storage(StorageKind::Graph, e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut properties = Value::Object(row.rest);
                let type_label = properties
                    .get("_link_type")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| table_name.to_string());
                if let Value::Object(map) = &mut properties {
                    map.remove("_link_type");
                }
                GraphEdge {
                    source_id: row.from.id.to_string(),
                    target_id: row.to.id.to_string(),
                    type_label,
                    properties,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_arbitrary_link_types_to_safe_identifiers() {
        assert_eq!(sanitize_type_label("similar_to"), "similar_to");
        assert_eq!(sanitize_type_label("depends-on"), "depends_on");
        assert_eq!(sanitize_type_label("cites; DROP TABLE x;--"), "cites__drop_table_x__");
        assert_eq!(sanitize_type_label("123abc").chars().next(), Some('t'));
    }

    #[tokio::test]
    async fn upsert_then_edge_then_neighbors() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SurrealDbBackend::open(dir.path()).await.unwrap();
        backend
            .upsert_resource_node("1", serde_json::json!({"file_name": "a.md"}))
            .await
            .unwrap();
        backend
            .upsert_resource_node("2", serde_json::json!({"file_name": "b.md"}))
            .await
            .unwrap();
        backend
            .create_edge("1", "2", "similar_to", serde_json::json!({"weight": 0.9}))
            .await
            .unwrap();

        let neighbors = backend.neighbors("1", Some("similar_to"), 1).await.unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].id, "2");
    }

    #[tokio::test]
    async fn ping_reports_reachable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SurrealDbBackend::open(dir.path()).await.unwrap();
        assert!(backend.ping().await);
    }
}
