//! ABOUTME: The `#[tool_router]`-annotated action dispatcher for every MCP tool (spec §4.7)
//! ABOUTME: Grounded on `mira-server::mcp::MiraServer` — one aggregate struct, one method per tool
//!
//! Every method here resolves to `Ok(String)`: the JSON text of a
//! [`ltmc_protocol::ToolEnvelope`], never a bare `Err`. An unknown action or a
//! failed store call is still a successful MCP tool call carrying a
//! `success: false` envelope (spec §6) — a JSON-RPC-level error is reserved
//! for protocol-layer faults, which `rmcp` itself handles.

use std::str::FromStr;
use std::sync::Arc;

use rmcp::handler::server::wrapper::Parameters;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::model::{
    CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ServerCapabilities,
    ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{tool, tool_router, ErrorData, ServerHandler};
use serde_json::json;

use ltmc_coordinator::Coordinator;
use ltmc_protocol::{CacheRequest, ChatRequest, GraphRequest, MemoryRequest, PatternRequest, ToolEnvelope, TodoRequest};
use ltmc_retrieval::RetrievalPipeline;
use ltmc_types::{ChatRole, LtmcError, ResourceType, TodoPriority, TodoStatus};

/// Aggregate MCP server state: the two entry points every tool call goes
/// through, plus the `rmcp` tool router built from the `#[tool]` methods
/// below.
#[derive(Clone)]
pub struct LtmcServer {
    coordinator: Arc<Coordinator>,
    retrieval: Arc<RetrievalPipeline>,
    tool_router: ToolRouter<Self>,
}

impl LtmcServer {
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator>, retrieval: Arc<RetrievalPipeline>) -> Self {
        Self {
            coordinator,
            retrieval,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl LtmcServer {
    #[tool(description = "Store, retrieve, or assemble context from documents. Actions: store/retrieve/build_context")]
    async fn memory(&self, Parameters(req): Parameters<MemoryRequest>) -> Result<String, String> {
        let envelope = match req.action.as_str() {
            "store" => self.memory_store(&req).await,
            "retrieve" => self.memory_retrieve(&req).await,
            "build_context" => self.memory_build_context(&req).await,
            other => ToolEnvelope::validation(format!("unknown memory action: {other}")),
        };
        Ok(envelope.to_json_string())
    }

    #[tool(description = "Log or answer with conversation history. Actions: log/context/by_tool")]
    async fn chat(&self, Parameters(req): Parameters<ChatRequest>) -> Result<String, String> {
        let envelope = match req.action.as_str() {
            "log" => self.chat_log(&req).await,
            "context" => self.chat_context(&req).await,
            "by_tool" => self.chat_by_tool(&req).await,
            other => ToolEnvelope::validation(format!("unknown chat action: {other}")),
        };
        Ok(envelope.to_json_string())
    }

    #[tool(description = "Manage structured tasks. Actions: add/list/complete/search")]
    async fn todo(&self, Parameters(req): Parameters<TodoRequest>) -> Result<String, String> {
        let envelope = match req.action.as_str() {
            "add" => self.todo_add(&req).await,
            "list" => self.todo_search(&req).await,
            "complete" => self.todo_complete(&req).await,
            "search" => self.todo_search(&req).await,
            other => ToolEnvelope::validation(format!("unknown todo action: {other}")),
        };
        Ok(envelope.to_json_string())
    }

    #[tool(description = "Log or inspect code-generation outcomes. Actions: log/get/analyze")]
    async fn pattern(&self, Parameters(req): Parameters<PatternRequest>) -> Result<String, String> {
        let envelope = match req.action.as_str() {
            "log" => self.pattern_log(&req).await,
            "get" => self.pattern_get(&req).await,
            "analyze" => self.pattern_analyze().await,
            other => ToolEnvelope::validation(format!("unknown pattern action: {other}")),
        };
        Ok(envelope.to_json_string())
    }

    #[tool(description = "Create or query typed relationships between resources. Actions: link/query/auto_link/get_relationships")]
    async fn graph(&self, Parameters(req): Parameters<GraphRequest>) -> Result<String, String> {
        let envelope = match req.action.as_str() {
            "link" => self.graph_link(&req).await,
            "query" => self.graph_query(&req).await,
            "auto_link" => self.graph_auto_link(&req).await,
            "get_relationships" => self.graph_get_relationships(&req).await,
            other => ToolEnvelope::validation(format!("unknown graph action: {other}")),
        };
        Ok(envelope.to_json_string())
    }

    #[tool(description = "Inspect or clear the retrieval cache. Actions: stats/flush/health/reset")]
    async fn cache(&self, Parameters(req): Parameters<CacheRequest>) -> Result<String, String> {
        let envelope = match req.action.as_str() {
            "stats" => self.cache_stats(),
            "flush" | "reset" => self.cache_flush(&req),
            "health" => self.cache_health(),
            other => ToolEnvelope::validation(format!("unknown cache action: {other}")),
        };
        Ok(envelope.to_json_string())
    }
}

impl LtmcServer {
    async fn memory_store(&self, req: &MemoryRequest) -> ToolEnvelope {
        let (Some(file_name), Some(resource_type), Some(content)) =
            (req.file_name.as_deref(), req.resource_type.as_deref(), req.content.as_deref())
        else {
            return ToolEnvelope::validation("store requires file_name, resource_type, and content");
        };
        let Ok(resource_type) = ResourceType::from_str(resource_type) else {
            return ToolEnvelope::validation(format!("unknown resource_type: {resource_type}"));
        };
        let result = self
            .coordinator
            .store_resource(file_name, resource_type, content, req.metadata.clone())
            .await;
        ltmc_protocol::envelope::from_result(result, |outcome| {
            json!({"resource_id": outcome.resource_id, "chunk_count": outcome.chunk_count})
        })
    }

    async fn memory_retrieve(&self, req: &MemoryRequest) -> ToolEnvelope {
        let Some(query) = req.query.as_deref() else {
            return ToolEnvelope::validation("retrieve requires query");
        };
        let type_filter = match parse_type_filter(req.type_filter.as_deref()) {
            Ok(f) => f,
            Err(e) => return e,
        };
        let result = self
            .retrieval
            .retrieve(query, req.top_k.unwrap_or(5), type_filter, req.enrich_graph.unwrap_or(false))
            .await;
        ltmc_protocol::envelope::from_result(result, |chunks| json!({"chunks": chunks}))
    }

    async fn memory_build_context(&self, req: &MemoryRequest) -> ToolEnvelope {
        let Some(query) = req.query.as_deref() else {
            return ToolEnvelope::validation("build_context requires query");
        };
        let type_filter = match parse_type_filter(req.type_filter.as_deref()) {
            Ok(f) => f,
            Err(e) => return e,
        };
        let result = self
            .retrieval
            .build_context(query, req.top_k.unwrap_or(5), type_filter, req.max_tokens.unwrap_or(8000))
            .await;
        ltmc_protocol::envelope::from_result(result, |context| serde_json::to_value(context).unwrap_or(json!({})))
    }

    async fn chat_log(&self, req: &ChatRequest) -> ToolEnvelope {
        let (Some(conversation_id), Some(role), Some(content)) =
            (req.conversation_id.as_deref(), req.role.as_deref(), req.content.as_deref())
        else {
            return ToolEnvelope::validation("log requires conversation_id, role, and content");
        };
        let Ok(role) = ChatRole::from_str(role) else {
            return ToolEnvelope::validation(format!("unknown role: {role}"));
        };
        let result = self
            .coordinator
            .log_chat(conversation_id, role, content, req.source_tool.as_deref())
            .await;
        ltmc_protocol::envelope::from_result(result, |message| json!({"message_id": message.id}))
    }

    async fn chat_context(&self, req: &ChatRequest) -> ToolEnvelope {
        let (Some(query), Some(conversation_id)) = (req.query.as_deref(), req.conversation_id.as_deref()) else {
            return ToolEnvelope::validation("context requires query and conversation_id");
        };
        let result = self
            .retrieval
            .ask_with_context(query, conversation_id, req.top_k.unwrap_or(5))
            .await;
        ltmc_protocol::envelope::from_result(result, |outcome| {
            json!({"message_id": outcome.message.id, "context": outcome.context})
        })
    }

    async fn chat_by_tool(&self, req: &ChatRequest) -> ToolEnvelope {
        let Some(source_tool) = req.source_tool.as_deref() else {
            return ToolEnvelope::validation("by_tool requires source_tool");
        };
        let result = self
            .coordinator
            .relational()
            .chats_by_tool(source_tool, req.limit.unwrap_or(20))
            .await;
        ltmc_protocol::envelope::from_result(result, |messages| json!({"messages": messages}))
    }

    async fn todo_add(&self, req: &TodoRequest) -> ToolEnvelope {
        let (Some(title), Some(description)) = (req.title.as_deref(), req.description.as_deref()) else {
            return ToolEnvelope::validation("add requires title and description");
        };
        let priority = match req.priority.as_deref().map(TodoPriority::from_str) {
            Some(Ok(p)) => p,
            Some(Err(_)) => return ToolEnvelope::validation("unknown priority"),
            None => TodoPriority::Medium,
        };
        let result = self.coordinator.add_todo(title, description, priority).await;
        ltmc_protocol::envelope::from_result(result, |todo| json!({"todo": todo}))
    }

    async fn todo_complete(&self, req: &TodoRequest) -> ToolEnvelope {
        let Some(todo_id) = req.todo_id else {
            return ToolEnvelope::validation("complete requires todo_id");
        };
        let result = self.coordinator.complete_todo(todo_id).await;
        ltmc_protocol::envelope::from_result(result, |todo| json!({"todo": todo}))
    }

    async fn todo_search(&self, req: &TodoRequest) -> ToolEnvelope {
        let status = match req.status.as_deref().map(TodoStatus::from_str) {
            Some(Ok(s)) => Some(s),
            Some(Err(_)) => return ToolEnvelope::validation("unknown status"),
            None => None,
        };
        let priority = match req.priority.as_deref().map(TodoPriority::from_str) {
            Some(Ok(p)) => Some(p),
            Some(Err(_)) => return ToolEnvelope::validation("unknown priority"),
            None => None,
        };
        let result = self
            .coordinator
            .search_todos(status, priority, req.limit.unwrap_or(20))
            .await;
        ltmc_protocol::envelope::from_result(result, |todos| json!({"todos": todos}))
    }

    async fn pattern_log(&self, req: &PatternRequest) -> ToolEnvelope {
        let (Some(input_prompt), Some(generated_code), Some(result_str)) =
            (req.input_prompt.as_deref(), req.generated_code.as_deref(), req.result.as_deref())
        else {
            return ToolEnvelope::validation("log requires input_prompt, generated_code, and result");
        };
        let Ok(pattern_result) = ltmc_types::PatternResult::from_str(result_str) else {
            return ToolEnvelope::validation(format!("unknown result: {result_str}"));
        };
        let tags = req.tags.clone().unwrap_or_default();
        let result = self
            .coordinator
            .log_code_pattern(
                input_prompt,
                generated_code,
                pattern_result,
                req.function_name.as_deref(),
                req.file_name.as_deref(),
                req.module_name.as_deref(),
                req.execution_time_ms,
                req.error_message.as_deref(),
                &tags,
            )
            .await;
        ltmc_protocol::envelope::from_result(result, |pattern| json!({"pattern_id": pattern.id}))
    }

    async fn pattern_get(&self, req: &PatternRequest) -> ToolEnvelope {
        let Some(pattern_id) = req.pattern_id else {
            return ToolEnvelope::validation("get requires pattern_id");
        };
        let result = self.coordinator.relational().pattern_by_id(pattern_id).await;
        match result {
            Ok(Some(pattern)) => ToolEnvelope::ok(json!({"pattern": pattern})),
            Ok(None) => ToolEnvelope::err(&LtmcError::NotFound(format!("pattern {pattern_id}"))),
            Err(e) => ToolEnvelope::err(&e),
        }
    }

    async fn pattern_analyze(&self) -> ToolEnvelope {
        let result = self.coordinator.relational().pattern_stats().await;
        ltmc_protocol::envelope::from_result(result, |stats| {
            json!({"pass_count": stats.pass_count, "fail_count": stats.fail_count, "partial_count": stats.partial_count})
        })
    }

    async fn graph_link(&self, req: &GraphRequest) -> ToolEnvelope {
        let (Some(source_id), Some(target_id), Some(link_type)) =
            (req.source_id, req.target_id, req.link_type.as_deref())
        else {
            return ToolEnvelope::validation("link requires source_id, target_id, and link_type");
        };
        let weight = req.weight.unwrap_or(1.0);
        let metadata = req.metadata.clone().unwrap_or(serde_json::Value::Null);
        let result = self
            .coordinator
            .create_resource_link(source_id, target_id, link_type, weight, metadata)
            .await;
        ltmc_protocol::envelope::from_result(result, |link| json!({"link_id": link.id}))
    }

    async fn graph_query(&self, req: &GraphRequest) -> ToolEnvelope {
        let Some(entity) = req.entity.as_deref() else {
            return ToolEnvelope::validation("query requires entity");
        };
        let result = self.coordinator.graph().query(entity, req.relation_type.as_deref()).await;
        ToolEnvelope::ok(json!({"edges": result.items, "graph_available": result.graph_available}))
    }

    async fn graph_get_relationships(&self, req: &GraphRequest) -> ToolEnvelope {
        let Some(resource_id) = req.resource_id.as_deref() else {
            return ToolEnvelope::validation("get_relationships requires resource_id");
        };
        let result = self
            .coordinator
            .graph()
            .neighbors(resource_id, req.relation_type.as_deref(), req.depth.unwrap_or(1))
            .await;
        ToolEnvelope::ok(json!({"neighbors": result.items, "graph_available": result.graph_available}))
    }

    async fn graph_auto_link(&self, req: &GraphRequest) -> ToolEnvelope {
        let Some(resource_ids) = req.resource_ids.as_ref() else {
            return ToolEnvelope::validation("auto_link requires resource_ids");
        };
        let result = self
            .retrieval
            .auto_link_documents(resource_ids, req.similarity_threshold, req.max_links_per_doc)
            .await;
        ltmc_protocol::envelope::from_result(result, |links| json!({"links": links}))
    }

    fn cache_stats(&self) -> ToolEnvelope {
        let stats = self.coordinator.cache().stats();
        ToolEnvelope::ok(json!({
            "hits": stats.hits,
            "misses": stats.misses,
            "sets": stats.sets,
            "invalidations": stats.invalidations,
            "hit_rate": stats.hit_rate(),
        }))
    }

    fn cache_flush(&self, req: &CacheRequest) -> ToolEnvelope {
        self.coordinator.cache().flush(req.scope.as_deref().unwrap_or(""));
        ToolEnvelope::ok(json!({"flushed": true}))
    }

    fn cache_health(&self) -> ToolEnvelope {
        ToolEnvelope::ok(json!({"health": self.coordinator.cache().health()}))
    }
}

fn parse_type_filter(type_filter: Option<&str>) -> Result<Option<ResourceType>, ToolEnvelope> {
    match type_filter {
        None => Ok(None),
        Some(s) => ResourceType::from_str(s)
            .map(Some)
            .map_err(|_| ToolEnvelope::validation(format!("unknown type_filter: {s}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ltmc_cache::CacheAdapter;
    use ltmc_embed::{EmbeddingService, HashEmbedder};
    use ltmc_graph::GraphAdapter;
    use ltmc_storage::relational::RelationalStore;
    use ltmc_storage::vector_index::VectorIndex;
    use serde_json::Value;

    use super::*;

    async fn harness() -> (LtmcServer, tempfile::TempDir) {
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
        let retrieval = Arc::new(RetrievalPipeline::new(coordinator.clone(), Duration::from_secs(300)));
        (LtmcServer::new(coordinator, retrieval), dir)
    }

    fn blank_memory(action: &str) -> MemoryRequest {
        MemoryRequest {
            action: action.to_string(),
            file_name: None,
            resource_type: None,
            content: None,
            metadata: None,
            query: None,
            top_k: None,
            type_filter: None,
            enrich_graph: None,
            max_tokens: None,
        }
    }

    fn blank_chat(action: &str) -> ChatRequest {
        ChatRequest {
            action: action.to_string(),
            conversation_id: None,
            role: None,
            content: None,
            source_tool: None,
            query: None,
            top_k: None,
            limit: None,
        }
    }

    fn blank_todo(action: &str) -> TodoRequest {
        TodoRequest {
            action: action.to_string(),
            title: None,
            description: None,
            priority: None,
            todo_id: None,
            status: None,
            limit: None,
        }
    }

    fn blank_pattern(action: &str) -> PatternRequest {
        PatternRequest {
            action: action.to_string(),
            input_prompt: None,
            generated_code: None,
            result: None,
            function_name: None,
            file_name: None,
            module_name: None,
            execution_time_ms: None,
            error_message: None,
            tags: None,
            pattern_id: None,
        }
    }

    fn blank_graph(action: &str) -> GraphRequest {
        GraphRequest {
            action: action.to_string(),
            source_id: None,
            target_id: None,
            link_type: None,
            weight: None,
            metadata: None,
            entity: None,
            relation_type: None,
            resource_ids: None,
            similarity_threshold: None,
            max_links_per_doc: None,
            resource_id: None,
            depth: None,
        }
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn memory_store_then_retrieve_round_trips() {
        let (server, _dir) = harness().await;
        let mut store_req = blank_memory("store");
        store_req.file_name = Some("a.md".to_string());
        store_req.resource_type = Some("document".to_string());
        store_req.content = Some("the quick brown fox jumps".to_string());
        let stored = parse(&server.memory_store(&store_req).await.to_json_string());
        assert_eq!(stored["success"], Value::Bool(true));
        assert_eq!(stored["result"]["chunk_count"], Value::from(1));

        let mut retrieve_req = blank_memory("retrieve");
        retrieve_req.query = Some("brown fox".to_string());
        retrieve_req.top_k = Some(1);
        let retrieved = parse(&server.memory_retrieve(&retrieve_req).await.to_json_string());
        assert_eq!(retrieved["success"], Value::Bool(true));
        assert_eq!(retrieved["result"]["chunks"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn memory_store_rejects_missing_fields_with_validation_envelope() {
        let (server, _dir) = harness().await;
        let req = blank_memory("store");
        let envelope = parse(&server.memory_store(&req).await.to_json_string());
        assert_eq!(envelope["success"], Value::Bool(false));
        assert_eq!(envelope["error"]["kind"], Value::from("ValidationError"));
    }

    #[tokio::test]
    async fn memory_build_context_assembles_a_context_block() {
        let (server, _dir) = harness().await;
        let mut store_req = blank_memory("store");
        store_req.file_name = Some("a.md".to_string());
        store_req.resource_type = Some("document".to_string());
        store_req.content = Some("alpha beta gamma".to_string());
        server.memory_store(&store_req).await;

        let mut ctx_req = blank_memory("build_context");
        ctx_req.query = Some("alpha".to_string());
        let result = parse(&server.memory_build_context(&ctx_req).await.to_json_string());
        assert_eq!(result["success"], Value::Bool(true));
    }

    #[tokio::test]
    async fn chat_log_then_context_then_by_tool() {
        let (server, _dir) = harness().await;
        let mut log_req = blank_chat("log");
        log_req.conversation_id = Some("c1".to_string());
        log_req.role = Some("user".to_string());
        log_req.content = Some("hello".to_string());
        log_req.source_tool = Some("cli".to_string());
        let logged = parse(&server.chat_log(&log_req).await.to_json_string());
        assert_eq!(logged["success"], Value::Bool(true));

        let mut store_req = blank_memory("store");
        store_req.file_name = Some("a.md".to_string());
        store_req.resource_type = Some("document".to_string());
        store_req.content = Some("hello world".to_string());
        server.memory_store(&store_req).await;

        let mut context_req = blank_chat("context");
        context_req.query = Some("hello".to_string());
        context_req.conversation_id = Some("c1".to_string());
        let context = parse(&server.chat_context(&context_req).await.to_json_string());
        assert_eq!(context["success"], Value::Bool(true));

        let mut by_tool_req = blank_chat("by_tool");
        by_tool_req.source_tool = Some("cli".to_string());
        let by_tool = parse(&server.chat_by_tool(&by_tool_req).await.to_json_string());
        assert_eq!(by_tool["success"], Value::Bool(true));
        assert_eq!(by_tool["result"]["messages"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn todo_add_complete_and_search() {
        let (server, _dir) = harness().await;
        let mut add_req = blank_todo("add");
        add_req.title = Some("write tests".to_string());
        add_req.description = Some("cover the dispatcher".to_string());
        add_req.priority = Some("high".to_string());
        let added = parse(&server.todo_add(&add_req).await.to_json_string());
        assert_eq!(added["success"], Value::Bool(true));
        let todo_id = added["result"]["todo"]["id"].as_i64().unwrap();

        let mut complete_req = blank_todo("complete");
        complete_req.todo_id = Some(todo_id);
        let completed = parse(&server.todo_complete(&complete_req).await.to_json_string());
        assert_eq!(completed["success"], Value::Bool(true));

        let mut search_req = blank_todo("search");
        search_req.status = Some("completed".to_string());
        let found = parse(&server.todo_search(&search_req).await.to_json_string());
        assert_eq!(found["result"]["todos"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pattern_log_get_and_analyze() {
        let (server, _dir) = harness().await;
        let mut log_req = blank_pattern("log");
        log_req.input_prompt = Some("write a fibonacci function".to_string());
        log_req.generated_code = Some("fn fib(n: u64) -> u64 { n }".to_string());
        log_req.result = Some("pass".to_string());
        let logged = parse(&server.pattern_log(&log_req).await.to_json_string());
        assert_eq!(logged["success"], Value::Bool(true));
        let pattern_id = logged["result"]["pattern_id"].as_i64().unwrap();

        let mut get_req = blank_pattern("get");
        get_req.pattern_id = Some(pattern_id);
        let fetched = parse(&server.pattern_get(&get_req).await.to_json_string());
        assert_eq!(fetched["success"], Value::Bool(true));

        let missing_req = {
            let mut r = blank_pattern("get");
            r.pattern_id = Some(pattern_id + 1000);
            r
        };
        let missing = parse(&server.pattern_get(&missing_req).await.to_json_string());
        assert_eq!(missing["error"]["kind"], Value::from("NotFound"));

        let analyzed = parse(&server.pattern_analyze().await.to_json_string());
        assert_eq!(analyzed["result"]["pass_count"], Value::from(1));
    }

    #[tokio::test]
    async fn graph_link_query_auto_link_and_get_relationships() {
        let (server, _dir) = harness().await;
        let mut store_a = blank_memory("store");
        store_a.file_name = Some("a.md".to_string());
        store_a.resource_type = Some("document".to_string());
        store_a.content = Some("shared topic one".to_string());
        let a = parse(&server.memory_store(&store_a).await.to_json_string());
        let resource_a = a["result"]["resource_id"].as_i64().unwrap();

        let mut store_b = blank_memory("store");
        store_b.file_name = Some("b.md".to_string());
        store_b.resource_type = Some("document".to_string());
        store_b.content = Some("shared topic two".to_string());
        let b = parse(&server.memory_store(&store_b).await.to_json_string());
        let resource_b = b["result"]["resource_id"].as_i64().unwrap();

        let mut link_req = blank_graph("link");
        link_req.source_id = Some(resource_a);
        link_req.target_id = Some(resource_b);
        link_req.link_type = Some("semantic_similarity_v1".to_string());
        link_req.weight = Some(0.9);
        let linked = parse(&server.graph_link(&link_req).await.to_json_string());
        assert_eq!(linked["success"], Value::Bool(true));

        let mut query_req = blank_graph("query");
        query_req.entity = Some(resource_a.to_string());
        let queried = parse(&server.graph_query(&query_req).await.to_json_string());
        assert_eq!(queried["success"], Value::Bool(true));

        let mut neighbors_req = blank_graph("get_relationships");
        neighbors_req.resource_id = Some(resource_a.to_string());
        let neighbors = parse(&server.graph_get_relationships(&neighbors_req).await.to_json_string());
        assert_eq!(neighbors["success"], Value::Bool(true));

        let mut auto_link_req = blank_graph("auto_link");
        auto_link_req.resource_ids = Some(vec![resource_a, resource_b]);
        let auto_linked = parse(&server.graph_auto_link(&auto_link_req).await.to_json_string());
        assert_eq!(auto_linked["success"], Value::Bool(true));
    }

    #[tokio::test]
    async fn cache_stats_flush_and_health() {
        let (server, _dir) = harness().await;
        let stats = parse(&server.cache_stats().to_json_string());
        assert_eq!(stats["success"], Value::Bool(true));

        let flush_req = CacheRequest { action: "flush".to_string(), scope: None };
        let flushed = parse(&server.cache_flush(&flush_req).to_json_string());
        assert_eq!(flushed["result"]["flushed"], Value::Bool(true));

        let health = parse(&server.cache_health().to_json_string());
        assert_eq!(health["success"], Value::Bool(true));
    }

    #[tokio::test]
    async fn unknown_action_yields_a_validation_envelope_for_every_tool() {
        let (server, _dir) = harness().await;

        let memory_result = server.memory(Parameters(blank_memory("frobnicate"))).await.unwrap();
        assert_eq!(parse(&memory_result)["error"]["kind"], Value::from("ValidationError"));

        let chat_result = server.chat(Parameters(blank_chat("frobnicate"))).await.unwrap();
        assert_eq!(parse(&chat_result)["error"]["kind"], Value::from("ValidationError"));

        let todo_result = server.todo(Parameters(blank_todo("frobnicate"))).await.unwrap();
        assert_eq!(parse(&todo_result)["error"]["kind"], Value::from("ValidationError"));

        let pattern_result = server.pattern(Parameters(blank_pattern("frobnicate"))).await.unwrap();
        assert_eq!(parse(&pattern_result)["error"]["kind"], Value::from("ValidationError"));

        let graph_result = server.graph(Parameters(blank_graph("frobnicate"))).await.unwrap();
        assert_eq!(parse(&graph_result)["error"]["kind"], Value::from("ValidationError"));

        let cache_req = CacheRequest { action: "frobnicate".to_string(), scope: None };
        let cache_result = server.cache(Parameters(cache_req)).await.unwrap();
        assert_eq!(parse(&cache_result)["error"]["kind"], Value::from("ValidationError"));
    }
}

impl ServerHandler for LtmcServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "ltmc".into(),
                title: Some("LTMC — long-term memory and context for LLM agents".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Long-term memory and context service: store and retrieve documents, conversations, todos, code patterns, and typed relationships over MCP.".into(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult {
            tools: self.tool_router.list_all(),
            next_cursor: None,
            meta: None,
        }))
    }

    fn call_tool(
        &self,
        request: rmcp::model::CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let ctx = rmcp::handler::server::tool::ToolCallContext::new(self, request, context);
            self.tool_router.call(ctx).await
        }
    }
}
