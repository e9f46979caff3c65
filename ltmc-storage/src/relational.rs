//! Relational primary store: schema ownership, migrations, CRUD, and the
//! monotonic vector-id sequence allocator.
//!
//! Grounded in the same libsql-backed, migration-owning shape the teacher
//! uses for its `SqliteBackend` (`run_migrations` applied at startup,
//! forward-only, idempotent); see `ltmc-memory`'s retired sqlite episodic
//! backend for the pattern this mirrors.

use chrono::{DateTime, Utc};
use libsql::{params, Connection, Database};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use ltmc_types::{
    ChatMessage, ChatRole, Chunk, CodePattern, ContextLink, LtmcError, PatternResult, Resource,
    ResourceLink, ResourceType, Result, StorageKind, Todo, TodoPriority, TodoStatus,
};

/// Counts by [`PatternResult`] over every logged `CodePattern`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PatternStats {
    pub pass_count: i64,
    pub fail_count: i64,
    pub partial_count: i64,
}

/// Forward-only schema migrations, applied in order under an exclusive lock
/// at startup. Each statement must be idempotent (`IF NOT EXISTS` throughout)
/// so a migration can be safely re-applied after a crash mid-run.
const MIGRATIONS: &[(i64, &str)] = &[
    (1, include_str!("migrations/0001_init.sql")),
    (2, include_str!("migrations/0002_resource_links.sql")),
];

/// Columns `CodePatterns` must carry. The original system shipped code that
/// referenced fields missing from its schema; we verify presence explicitly
/// at startup rather than discovering the gap at query time.
const CODE_PATTERNS_REQUIRED_COLUMNS: &[&str] = &[
    "id",
    "function_name",
    "file_name",
    "module_name",
    "input_prompt",
    "generated_code",
    "result",
    "execution_time_ms",
    "error_message",
    "tags",
    "created_at",
    "vector_id",
];

/// The relational primary store.
///
/// Holds the `libsql` database handle plus a single write connection
/// serialized behind a mutex (writes are additionally serialized per-resource
/// by the coordinator); reads open short-lived connections against the same
/// database so they never block behind an in-flight write transaction.
pub struct RelationalStore {
    db: Database,
    write_conn: tokio::sync::Mutex<Connection>,
}

impl RelationalStore {
    /// Open (creating if absent) the relational store at `path` and run any
    /// pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] if the database cannot be opened, or
    /// [`LtmcError::Schema`] if migrations fail or required columns are
    /// missing — in both cases startup must not proceed.
    pub async fn open(path: &str) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        let write_conn = db
            .connect()
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        write_conn
            .execute("PRAGMA journal_mode=WAL;", ())
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        write_conn
            .execute("PRAGMA foreign_keys=ON;", ())
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;

        let store = Self {
            db,
            write_conn: tokio::sync::Mutex::new(write_conn),
        };
        store.run_migrations().await?;
        store.verify_schema().await?;
        Ok(store)
    }

    async fn read_conn(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))
    }

    async fn run_migrations(&self) -> Result<()> {
        let conn = self.write_conn.lock().await;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS SchemaMigrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
            (),
        )
        .await
        .map_err(|e| LtmcError::Schema(e.to_string()))?;

        for (version, sql) in MIGRATIONS {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM SchemaMigrations WHERE version = ?1",
                    params![*version],
                )
                .await
                .map_err(|e| LtmcError::Schema(e.to_string()))?;
            let already_applied = rows
                .next()
                .await
                .map_err(|e| LtmcError::Schema(e.to_string()))?
                .map(|row| row.get::<i64>(0).unwrap_or(0) > 0)
                .unwrap_or(false);
            if already_applied {
                continue;
            }

            conn.execute_batch(sql)
                .await
                .map_err(|e| LtmcError::Schema(format!("migration {version} failed: {e}")))?;
            conn.execute(
                "INSERT INTO SchemaMigrations (version, applied_at) VALUES (?1, ?2)",
                params![*version, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| LtmcError::Schema(e.to_string()))?;
            info!(version, "applied schema migration");
        }
        Ok(())
    }

    /// Verify every column `CodePatterns` must carry actually exists.
    /// Refuses to serve rather than fail at first query against a drifted
    /// schema.
    async fn verify_schema(&self) -> Result<()> {
        let conn = self.read_conn().await?;
        let mut rows = conn
            .query("PRAGMA table_info(CodePatterns);", ())
            .await
            .map_err(|e| LtmcError::Schema(e.to_string()))?;
        let mut found = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| LtmcError::Schema(e.to_string()))?
        {
            let name: String = row.get(1).map_err(|e| LtmcError::Schema(e.to_string()))?;
            found.push(name);
        }
        for required in CODE_PATTERNS_REQUIRED_COLUMNS {
            if !found.iter().any(|c| c == required) {
                return Err(LtmcError::Schema(format!(
                    "CodePatterns is missing required column `{required}`; refusing to serve on a drifted schema"
                )));
            }
        }
        Ok(())
    }

    /// Open a relational write transaction. The caller drives it through the
    /// coordinator's multi-phase protocol and commits only after the vector
    /// store has durably persisted (§4.1 ordering rationale); dropping the
    /// handle without committing rolls back.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] if a transaction cannot be started.
    pub async fn begin(&self) -> Result<RelationalTx<'_>> {
        let conn = self.write_conn.lock().await;
        conn.execute("BEGIN IMMEDIATE;", ())
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        Ok(RelationalTx {
            conn,
            finished: false,
        })
    }

    /// Allocate one vector id, independent of any open write transaction.
    /// Used by the consistency sweep and by `auto_link_documents`, which do
    /// not need the full `store_resource` write protocol.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn allocate_vector_id(&self) -> Result<i64> {
        let conn = self.write_conn.lock().await;
        allocate_vector_id_on(&conn).await
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn resource_by_id(&self, id: i64) -> Result<Option<Resource>> {
        let conn = self.read_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, file_name, resource_type, created_at FROM Resources WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        match rows
            .next()
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
        {
            Some(row) => Ok(Some(resource_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Batched hydration for the retrieval pipeline: fetch every chunk whose
    /// `vector_id` is in `vector_ids`, joined with its parent resource, in one
    /// query. Vector ids with no backing chunk row are silently omitted —
    /// the caller schedules them as garbage vectors.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn hydrate_chunks(&self, vector_ids: &[i64]) -> Result<Vec<(Chunk, Resource)>> {
        if vector_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=vector_ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT c.id, c.resource_id, c.chunk_text, c.vector_id, c.position,
                    r.id, r.file_name, r.resource_type, r.created_at
             FROM ResourceChunks c
             JOIN Resources r ON r.id = c.resource_id
             WHERE c.vector_id IN ({placeholders})"
        );
        let conn = self.read_conn().await?;
        let values: Vec<libsql::Value> = vector_ids.iter().map(|v| (*v).into()).collect();
        let mut rows = conn
            .query(&sql, values)
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
        {
            let chunk = Chunk {
                id: row.get(0).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
                resource_id: row.get(1).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
                chunk_text: row.get(2).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
                vector_id: row.get(3).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
                position: row.get(4).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
            };
            let resource = Resource {
                id: row.get(5).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
                file_name: row.get(6).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
                resource_type: parse_resource_type(&row.get::<String>(7).map_err(|e| {
                    LtmcError::storage(StorageKind::Relational, e.to_string())
                })?)?,
                created_at: parse_timestamp(&row.get::<String>(8).map_err(|e| {
                    LtmcError::storage(StorageKind::Relational, e.to_string())
                })?)?,
            };
            out.push((chunk, resource));
        }
        Ok(out)
    }

    /// The `vector_id`s of every chunk belonging to `resource_id`, in
    /// position order. Used by `auto_link_documents` to pick the vectors two
    /// resources are compared on.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn chunk_vector_ids_for_resource(&self, resource_id: i64) -> Result<Vec<i64>> {
        let conn = self.read_conn().await?;
        let mut rows = conn
            .query(
                "SELECT vector_id FROM ResourceChunks WHERE resource_id = ?1 ORDER BY position",
                params![resource_id],
            )
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
        {
            ids.push(row.get(0).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?);
        }
        Ok(ids)
    }

    /// All vector ids currently referenced by a `ResourceChunks` row. Used by
    /// the consistency sweep to find garbage vectors (present in the index,
    /// absent here).
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn all_chunk_vector_ids(&self) -> Result<Vec<i64>> {
        Ok(self.all_chunk_ids_and_vector_ids().await?.into_iter().map(|(_, v)| v).collect())
    }

    /// Every `(chunk_id, vector_id)` pair, for the consistency sweep to
    /// identify and mark the specific chunks whose vector has gone missing.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn all_chunk_ids_and_vector_ids(&self) -> Result<Vec<(i64, i64)>> {
        let conn = self.read_conn().await?;
        let mut rows = conn
            .query("SELECT id, vector_id FROM ResourceChunks", ())
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
        {
            let chunk_id = row.get(0).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
            let vector_id = row.get(1).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
            ids.push((chunk_id, vector_id));
        }
        Ok(ids)
    }

    /// Mark a chunk orphaned (its vector is missing from the index) so it can
    /// be scheduled for idempotent re-embedding.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn mark_chunk_orphaned(&self, chunk_id: i64) -> Result<()> {
        let conn = self.write_conn.lock().await;
        conn.execute(
            "UPDATE ResourceChunks SET generation_method = 'orphaned_chunk' WHERE id = ?1",
            params![chunk_id],
        )
        .await
        .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn delete_resource(&self, resource_id: i64) -> Result<()> {
        let conn = self.write_conn.lock().await;
        conn.execute("BEGIN IMMEDIATE;", ())
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        let result = async {
            conn.execute(
                "DELETE FROM ContextLinks WHERE chunk_id IN (SELECT id FROM ResourceChunks WHERE resource_id = ?1)",
                params![resource_id],
            )
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
            conn.execute(
                "DELETE FROM ResourceChunks WHERE resource_id = ?1",
                params![resource_id],
            )
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
            conn.execute(
                "DELETE FROM ResourceLinks WHERE source_resource_id = ?1 OR target_resource_id = ?1",
                params![resource_id],
            )
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
            conn.execute("DELETE FROM Resources WHERE id = ?1", params![resource_id])
                .await
                .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
            Ok::<(), LtmcError>(())
        }
        .await;

        match result {
            Ok(()) => {
                conn.execute("COMMIT;", ())
                    .await
                    .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK;", ()).await;
                Err(e)
            }
        }
    }

    // -- Chat / context links -------------------------------------------------

    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn log_chat(
        &self,
        conversation_id: &str,
        role: ChatRole,
        content: &str,
        source_tool: Option<&str>,
    ) -> Result<ChatMessage> {
        let conn = self.write_conn.lock().await;
        let timestamp = Utc::now();
        conn.execute(
            "INSERT INTO ChatHistory (conversation_id, role, content, timestamp, source_tool)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation_id,
                role.to_string(),
                content,
                timestamp.to_rfc3339(),
                source_tool
            ],
        )
        .await
        .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        let id = conn.last_insert_rowid();
        Ok(ChatMessage {
            id,
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            timestamp,
            source_tool: source_tool.map(str::to_string),
        })
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn chats_by_tool(
        &self,
        source_tool: &str,
        limit: i64,
    ) -> Result<Vec<ChatMessage>> {
        let conn = self.read_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, conversation_id, role, content, timestamp, source_tool
                 FROM ChatHistory WHERE source_tool = ?1 ORDER BY timestamp DESC LIMIT ?2",
                params![source_tool, limit],
            )
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
        {
            out.push(chat_message_from_row(&row)?);
        }
        Ok(out)
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn create_context_links(&self, message_id: i64, chunk_ids: &[i64]) -> Result<Vec<ContextLink>> {
        let conn = self.write_conn.lock().await;
        let mut out = Vec::with_capacity(chunk_ids.len());
        for chunk_id in chunk_ids {
            conn.execute(
                "INSERT INTO ContextLinks (message_id, chunk_id) VALUES (?1, ?2)",
                params![message_id, *chunk_id],
            )
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
            out.push(ContextLink {
                id: conn.last_insert_rowid(),
                message_id,
                chunk_id: *chunk_id,
            });
        }
        Ok(out)
    }

    // -- Todos ----------------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn add_todo(
        &self,
        title: &str,
        description: &str,
        priority: TodoPriority,
    ) -> Result<Todo> {
        let conn = self.write_conn.lock().await;
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO Todos (title, description, priority, status, created_at, completed_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, NULL)",
            params![title, description, priority.to_string(), created_at.to_rfc3339()],
        )
        .await
        .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        Ok(Todo {
            id: conn.last_insert_rowid(),
            title: title.to_string(),
            description: description.to_string(),
            priority,
            status: TodoStatus::Pending,
            created_at,
            completed_at: None,
        })
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::NotFound`] if `todo_id` does not exist, otherwise
    /// [`LtmcError::Storage`] on a relational failure.
    pub async fn complete_todo(&self, todo_id: i64) -> Result<Todo> {
        let conn = self.write_conn.lock().await;
        let completed_at = Utc::now();
        let changed = conn
            .execute(
                "UPDATE Todos SET status = 'completed', completed_at = ?1 WHERE id = ?2 AND status != 'completed'",
                params![completed_at.to_rfc3339(), todo_id],
            )
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        if changed == 0 {
            let mut rows = conn
                .query("SELECT COUNT(*) FROM Todos WHERE id = ?1", params![todo_id])
                .await
                .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
            let exists = rows
                .next()
                .await
                .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
                .map(|row| row.get::<i64>(0).unwrap_or(0) > 0)
                .unwrap_or(false);
            if !exists {
                return Err(LtmcError::NotFound(format!("todo {todo_id}")));
            }
        }
        drop(conn);
        self.todo_by_id(todo_id)
            .await?
            .ok_or_else(|| LtmcError::NotFound(format!("todo {todo_id}")))
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn todo_by_id(&self, todo_id: i64) -> Result<Option<Todo>> {
        let conn = self.read_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, title, description, priority, status, created_at, completed_at
                 FROM Todos WHERE id = ?1",
                params![todo_id],
            )
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        match rows
            .next()
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
        {
            Some(row) => Ok(Some(todo_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn search_todos(
        &self,
        status: Option<TodoStatus>,
        priority: Option<TodoPriority>,
        limit: i64,
    ) -> Result<Vec<Todo>> {
        let conn = self.read_conn().await?;
        let mut sql = "SELECT id, title, description, priority, status, created_at, completed_at FROM Todos WHERE 1 = 1".to_string();
        let mut values: Vec<libsql::Value> = Vec::new();
        if let Some(status) = status {
            sql.push_str(&format!(" AND status = ?{}", values.len() + 1));
            values.push(status.to_string().into());
        }
        if let Some(priority) = priority {
            sql.push_str(&format!(" AND priority = ?{}", values.len() + 1));
            values.push(priority.to_string().into());
        }
        sql.push_str(&format!(" ORDER BY created_at DESC LIMIT ?{}", values.len() + 1));
        values.push(limit.into());

        let mut rows = conn
            .query(&sql, values)
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
        {
            out.push(todo_from_row(&row)?);
        }
        Ok(out)
    }

    // -- Code patterns ----------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_code_pattern_in_tx(
        tx: &RelationalTx<'_>,
        input_prompt: &str,
        generated_code: &str,
        result: PatternResult,
        function_name: Option<&str>,
        file_name: Option<&str>,
        module_name: Option<&str>,
        execution_time_ms: Option<i64>,
        error_message: Option<&str>,
        tags: &[String],
        vector_id: i64,
    ) -> Result<CodePattern> {
        let created_at = Utc::now();
        let tags_json = serde_json::to_string(tags)?;
        tx.conn
            .execute(
                "INSERT INTO CodePatterns (
                    function_name, file_name, module_name, input_prompt, generated_code,
                    result, execution_time_ms, error_message, tags, created_at, vector_id
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    function_name,
                    file_name,
                    module_name,
                    input_prompt,
                    generated_code,
                    result.to_string(),
                    execution_time_ms,
                    error_message,
                    tags_json,
                    created_at.to_rfc3339(),
                    vector_id
                ],
            )
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        Ok(CodePattern {
            id: tx.conn.last_insert_rowid(),
            input_prompt: input_prompt.to_string(),
            generated_code: generated_code.to_string(),
            result,
            function_name: function_name.map(str::to_string),
            file_name: file_name.map(str::to_string),
            module_name: module_name.map(str::to_string),
            execution_time_ms,
            error_message: error_message.map(str::to_string),
            tags: tags.to_vec(),
            vector_id,
            created_at,
        })
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn pattern_by_id(&self, pattern_id: i64) -> Result<Option<CodePattern>> {
        let conn = self.read_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, function_name, file_name, module_name, input_prompt, generated_code,
                        result, execution_time_ms, error_message, tags, created_at, vector_id
                 FROM CodePatterns WHERE id = ?1",
                params![pattern_id],
            )
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        match rows
            .next()
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
        {
            Some(row) => Ok(Some(code_pattern_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Aggregate counts by [`PatternResult`] over every logged `CodePattern`,
    /// for the `pattern analyze` action.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn pattern_stats(&self) -> Result<PatternStats> {
        let conn = self.read_conn().await?;
        let mut rows = conn
            .query("SELECT result, COUNT(*) FROM CodePatterns GROUP BY result", ())
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        let mut stats = PatternStats::default();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
        {
            let result: String = row.get(0).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
            let count: i64 = row.get(1).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
            match result.as_str() {
                "pass" => stats.pass_count = count,
                "fail" => stats.fail_count = count,
                "partial" => stats.partial_count = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    // -- Resource links -----------------------------------------------------

    /// # Errors
    ///
    /// Returns [`LtmcError::AlreadyExists`] if `(source, target, link_type)`
    /// already exists, [`LtmcError::NotFound`] if either endpoint is missing,
    /// otherwise [`LtmcError::Storage`].
    pub async fn create_resource_link(
        &self,
        source_id: i64,
        target_id: i64,
        link_type: &str,
        weight: f64,
        metadata: &Value,
    ) -> Result<ResourceLink> {
        let conn = self.write_conn.lock().await;
        for endpoint in [source_id, target_id] {
            let mut rows = conn
                .query("SELECT COUNT(*) FROM Resources WHERE id = ?1", params![endpoint])
                .await
                .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
            let exists = rows
                .next()
                .await
                .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
                .map(|row| row.get::<i64>(0).unwrap_or(0) > 0)
                .unwrap_or(false);
            if !exists {
                return Err(LtmcError::NotFound(format!("resource {endpoint}")));
            }
        }

        let mut existing = conn
            .query(
                "SELECT COUNT(*) FROM ResourceLinks WHERE source_resource_id = ?1 AND target_resource_id = ?2 AND link_type = ?3",
                params![source_id, target_id, link_type],
            )
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        let duplicate = existing
            .next()
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
            .map(|row| row.get::<i64>(0).unwrap_or(0) > 0)
            .unwrap_or(false);
        if duplicate {
            return Err(LtmcError::AlreadyExists(format!(
                "resource link {source_id}->{target_id} ({link_type})"
            )));
        }

        let created_at = Utc::now();
        let metadata_json = serde_json::to_string(metadata)?;
        conn.execute(
            "INSERT INTO ResourceLinks (source_resource_id, target_resource_id, link_type, created_at, metadata, weight)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![source_id, target_id, link_type, created_at.to_rfc3339(), metadata_json, weight],
        )
        .await
        .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        Ok(ResourceLink {
            id: conn.last_insert_rowid(),
            source_resource_id: source_id,
            target_resource_id: target_id,
            link_type: link_type.to_string(),
            weight,
            metadata: metadata.clone(),
            created_at,
        })
    }

    /// Relational-derived neighbors, used both by the graph adapter's
    /// degraded-mode fallback and by the consistency sweep.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn resource_links_for(&self, resource_id: i64) -> Result<Vec<ResourceLink>> {
        let conn = self.read_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, source_resource_id, target_resource_id, link_type, weight, metadata, created_at
                 FROM ResourceLinks WHERE source_resource_id = ?1 OR target_resource_id = ?1",
                params![resource_id],
            )
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
        {
            out.push(resource_link_from_row(&row)?);
        }
        Ok(out)
    }

    /// All resource links, used by the consistency sweep to find links
    /// unmirrored in the graph store.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn all_resource_links(&self) -> Result<Vec<ResourceLink>> {
        let conn = self.read_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, source_resource_id, target_resource_id, link_type, weight, metadata, created_at
                 FROM ResourceLinks",
                (),
            )
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
        {
            out.push(resource_link_from_row(&row)?);
        }
        Ok(out)
    }
}

/// An open relational write transaction driven through the coordinator's
/// atomic write protocol (§4.1). Dropping without calling
/// [`RelationalTx::commit`] rolls back.
pub struct RelationalTx<'a> {
    conn: tokio::sync::MutexGuard<'a, Connection>,
    finished: bool,
}

impl RelationalTx<'_> {
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn insert_resource(
        &self,
        file_name: &str,
        resource_type: ResourceType,
    ) -> Result<Resource> {
        let created_at = Utc::now();
        self.conn
            .execute(
                "INSERT INTO Resources (file_name, resource_type, created_at) VALUES (?1, ?2, ?3)",
                params![file_name, resource_type.to_string(), created_at.to_rfc3339()],
            )
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        Ok(Resource {
            id: self.conn.last_insert_rowid(),
            file_name: file_name.to_string(),
            resource_type,
            created_at,
        })
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn allocate_vector_id(&self) -> Result<i64> {
        allocate_vector_id_on(&self.conn).await
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] on a relational failure.
    pub async fn insert_chunks(
        &self,
        resource_id: i64,
        chunks: &[(String, i64, i64)],
    ) -> Result<Vec<Chunk>> {
        let mut out = Vec::with_capacity(chunks.len());
        for (text, vector_id, position) in chunks {
            self.conn
                .execute(
                    "INSERT INTO ResourceChunks (resource_id, chunk_text, vector_id, position)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![resource_id, text.as_str(), *vector_id, *position],
                )
                .await
                .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
            out.push(Chunk {
                id: self.conn.last_insert_rowid(),
                resource_id,
                chunk_text: text.clone(),
                vector_id: *vector_id,
                position: *position,
            });
        }
        Ok(out)
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] if the commit fails.
    pub async fn commit(mut self) -> Result<()> {
        self.conn
            .execute("COMMIT;", ())
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        self.finished = true;
        Ok(())
    }

    /// Explicit rollback. Equivalent to dropping the handle, but lets callers
    /// log the reason before the guard goes out of scope.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Storage`] if the rollback statement itself fails.
    pub async fn rollback(mut self) -> Result<()> {
        self.conn
            .execute("ROLLBACK;", ())
            .await
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for RelationalTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("relational transaction dropped without commit; relying on connection-level rollback");
        }
    }
}

async fn allocate_vector_id_on(conn: &Connection) -> Result<i64> {
    let mut rows = conn
        .query(
            "UPDATE VectorIdSequence SET last_vector_id = last_vector_id + 1
             WHERE id = 1 RETURNING last_vector_id",
            (),
        )
        .await
        .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?;
    let row = rows
        .next()
        .await
        .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
        .ok_or_else(|| {
            LtmcError::storage(StorageKind::Relational, "VectorIdSequence row missing")
        })?;
    row.get(0)
        .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))
}

fn parse_resource_type(s: &str) -> Result<ResourceType> {
    s.parse().map_err(LtmcError::Internal)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LtmcError::Internal(format!("bad timestamp `{s}`: {e}")))
}

fn resource_from_row(row: &libsql::Row) -> Result<Resource> {
    Ok(Resource {
        id: row.get(0).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        file_name: row.get(1).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        resource_type: parse_resource_type(
            &row.get::<String>(2)
                .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        )?,
        created_at: parse_timestamp(
            &row.get::<String>(3)
                .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        )?,
    })
}

fn chat_message_from_row(row: &libsql::Row) -> Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        conversation_id: row.get(1).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        role: row
            .get::<String>(2)
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
            .parse()
            .map_err(LtmcError::Internal)?,
        content: row.get(3).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        timestamp: parse_timestamp(
            &row.get::<String>(4)
                .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        )?,
        source_tool: row.get(5).ok(),
    })
}

fn todo_from_row(row: &libsql::Row) -> Result<Todo> {
    let completed_at: Option<String> = row.get(6).ok();
    Ok(Todo {
        id: row.get(0).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        title: row.get(1).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        description: row.get(2).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        priority: row
            .get::<String>(3)
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
            .parse()
            .map_err(LtmcError::Internal)?,
        status: row
            .get::<String>(4)
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
            .parse()
            .map_err(LtmcError::Internal)?,
        created_at: parse_timestamp(
            &row.get::<String>(5)
                .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        )?,
        completed_at: completed_at.map(|s| parse_timestamp(&s)).transpose()?,
    })
}

fn code_pattern_from_row(row: &libsql::Row) -> Result<CodePattern> {
    let tags_json: String = row.get(9).unwrap_or_else(|_| "[]".to_string());
    Ok(CodePattern {
        id: row.get(0).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        function_name: row.get(1).ok(),
        file_name: row.get(2).ok(),
        module_name: row.get(3).ok(),
        input_prompt: row.get(4).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        generated_code: row.get(5).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        result: row
            .get::<String>(6)
            .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?
            .parse()
            .map_err(LtmcError::Internal)?,
        execution_time_ms: row.get(7).ok(),
        error_message: row.get(8).ok(),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        created_at: parse_timestamp(
            &row.get::<String>(10)
                .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        )?,
        vector_id: row.get(11).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
    })
}

fn resource_link_from_row(row: &libsql::Row) -> Result<ResourceLink> {
    let metadata_json: String = row.get(5).unwrap_or_else(|_| "null".to_string());
    Ok(ResourceLink {
        id: row.get(0).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        source_resource_id: row.get(1).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        target_resource_id: row.get(2).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        link_type: row.get(3).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        weight: row.get(4).map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(Value::Null),
        created_at: parse_timestamp(
            &row.get::<String>(6)
                .map_err(|e| LtmcError::storage(StorageKind::Relational, e.to_string()))?,
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ltmc_types::ResourceType;

    async fn store() -> RelationalStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ltmc.db");
        let store = RelationalStore::open(path.to_str().unwrap()).await.unwrap();
        // Keep the tempdir alive for the store's lifetime by leaking it; each
        // test gets its own process-unique path so this never collides.
        std::mem::forget(dir);
        store
    }

    #[tokio::test]
    async fn open_is_idempotent_across_repeated_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ltmc.db");
        RelationalStore::open(path.to_str().unwrap()).await.unwrap();
        // Reopening an already-migrated database must not fail or re-apply.
        RelationalStore::open(path.to_str().unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn insert_resource_and_chunks_commit_and_are_readable() {
        let store = store().await;
        let tx = store.begin().await.unwrap();
        let resource = tx.insert_resource("a.md", ResourceType::Document).await.unwrap();
        let vector_id = tx.allocate_vector_id().await.unwrap();
        let chunks = tx
            .insert_chunks(resource.id, &[("hello world".to_string(), vector_id, 0)])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(chunks.len(), 1);
        let fetched = store.resource_by_id(resource.id).await.unwrap();
        assert_eq!(fetched.unwrap().file_name, "a.md");
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = store().await;
        {
            let tx = store.begin().await.unwrap();
            tx.insert_resource("dropped.md", ResourceType::Document).await.unwrap();
            // tx dropped here without commit
        }
        let tx = store.begin().await.unwrap();
        let resource = tx.insert_resource("kept.md", ResourceType::Document).await.unwrap();
        tx.commit().await.unwrap();
        // Only the committed resource should exist; ids start fresh so a
        // rolled-back insert would otherwise have consumed id 1.
        assert_eq!(resource.file_name, "kept.md");
        assert!(store.resource_by_id(resource.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn allocate_vector_id_is_monotonic_and_unique() {
        let store = store().await;
        let a = store.allocate_vector_id().await.unwrap();
        let b = store.allocate_vector_id().await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn hydrate_chunks_omits_vector_ids_with_no_backing_chunk() {
        let store = store().await;
        let tx = store.begin().await.unwrap();
        let resource = tx.insert_resource("doc.md", ResourceType::Document).await.unwrap();
        let vector_id = tx.allocate_vector_id().await.unwrap();
        tx.insert_chunks(resource.id, &[("chunk one".to_string(), vector_id, 0)])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let garbage_vector_id = vector_id + 1000;
        let hydrated = store.hydrate_chunks(&[vector_id, garbage_vector_id]).await.unwrap();
        assert_eq!(hydrated.len(), 1);
        assert_eq!(hydrated[0].0.vector_id, vector_id);
    }

    #[tokio::test]
    async fn chunk_vector_ids_for_resource_returns_in_position_order() {
        let store = store().await;
        let tx = store.begin().await.unwrap();
        let resource = tx.insert_resource("doc.md", ResourceType::Document).await.unwrap();
        let v0 = tx.allocate_vector_id().await.unwrap();
        let v1 = tx.allocate_vector_id().await.unwrap();
        tx.insert_chunks(
            resource.id,
            &[
                ("second".to_string(), v1, 1),
                ("first".to_string(), v0, 0),
            ],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let ids = store.chunk_vector_ids_for_resource(resource.id).await.unwrap();
        assert_eq!(ids, vec![v0, v1]);
    }

    #[tokio::test]
    async fn mark_chunk_orphaned_does_not_error_on_unknown_chunk() {
        let store = store().await;
        store.mark_chunk_orphaned(9999).await.unwrap();
    }

    #[tokio::test]
    async fn create_resource_link_rejects_missing_endpoint_and_duplicate() {
        let store = store().await;
        let tx = store.begin().await.unwrap();
        let a = tx.insert_resource("a.md", ResourceType::Document).await.unwrap();
        let b = tx.insert_resource("b.md", ResourceType::Document).await.unwrap();
        tx.commit().await.unwrap();

        let missing = store
            .create_resource_link(a.id, 99999, "similar_to", 0.8, &Value::Null)
            .await;
        assert!(matches!(missing, Err(LtmcError::NotFound(_))));

        let link = store
            .create_resource_link(a.id, b.id, "similar_to", 0.8, &Value::Null)
            .await
            .unwrap();
        assert_eq!(link.source_resource_id, a.id);

        let duplicate = store
            .create_resource_link(a.id, b.id, "similar_to", 0.8, &Value::Null)
            .await;
        assert!(matches!(duplicate, Err(LtmcError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn resource_links_for_and_all_resource_links_see_the_same_link() {
        let store = store().await;
        let tx = store.begin().await.unwrap();
        let a = tx.insert_resource("a.md", ResourceType::Document).await.unwrap();
        let b = tx.insert_resource("b.md", ResourceType::Document).await.unwrap();
        tx.commit().await.unwrap();
        store
            .create_resource_link(a.id, b.id, "similar_to", 0.5, &Value::Null)
            .await
            .unwrap();

        let from_a = store.resource_links_for(a.id).await.unwrap();
        let from_b = store.resource_links_for(b.id).await.unwrap();
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_b.len(), 1);
        assert_eq!(store.all_resource_links().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn log_chat_round_trips_through_chats_by_tool() {
        let store = store().await;
        store
            .log_chat("conv-1", ChatRole::User, "hello", Some("retrieval"))
            .await
            .unwrap();
        let logged = store
            .log_chat("conv-1", ChatRole::Assistant, "hi there", Some("retrieval"))
            .await
            .unwrap();

        let found = store.chats_by_tool("retrieval", 10).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, logged.id);

        let links = store.create_context_links(logged.id, &[1, 2]).await.unwrap();
        assert_eq!(links.len(), 2);
    }

    #[tokio::test]
    async fn todo_lifecycle_add_complete_search() {
        let store = store().await;
        let todo = store
            .add_todo("write tests", "cover relational.rs", TodoPriority::High)
            .await
            .unwrap();
        assert_eq!(todo.status, TodoStatus::Pending);

        let completed = store.complete_todo(todo.id).await.unwrap();
        assert_eq!(completed.status, TodoStatus::Completed);
        assert!(completed.completed_at.is_some());

        let not_found = store.complete_todo(999_999).await;
        assert!(matches!(not_found, Err(LtmcError::NotFound(_))));

        let found = store
            .search_todos(Some(TodoStatus::Completed), Some(TodoPriority::High), 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, todo.id);
    }

    #[tokio::test]
    async fn code_pattern_round_trips_and_aggregates_into_stats() {
        let store = store().await;
        let tx = store.begin().await.unwrap();
        let vector_id = tx.allocate_vector_id().await.unwrap();
        let pattern = RelationalStore::insert_code_pattern_in_tx(
            &tx,
            "write a fibonacci function",
            "fn fib(n: u64) -> u64 { ... }",
            PatternResult::Pass,
            Some("fib"),
            Some("lib.rs"),
            None,
            Some(12),
            None,
            &["rust".to_string()],
            vector_id,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let fetched = store.pattern_by_id(pattern.id).await.unwrap().unwrap();
        assert_eq!(fetched.input_prompt, pattern.input_prompt);
        assert_eq!(fetched.tags, vec!["rust".to_string()]);

        let stats = store.pattern_stats().await.unwrap();
        assert_eq!(stats.pass_count, 1);
        assert_eq!(stats.fail_count, 0);
    }

    #[tokio::test]
    async fn delete_resource_cascades_chunks_and_context_links() {
        let store = store().await;
        let tx = store.begin().await.unwrap();
        let resource = tx.insert_resource("gone.md", ResourceType::Document).await.unwrap();
        let vector_id = tx.allocate_vector_id().await.unwrap();
        tx.insert_chunks(resource.id, &[("bye".to_string(), vector_id, 0)])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        store.delete_resource(resource.id).await.unwrap();
        assert!(store.resource_by_id(resource.id).await.unwrap().is_none());
        assert!(store.hydrate_chunks(&[vector_id]).await.unwrap().is_empty());
    }
}
