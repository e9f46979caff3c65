//! ABOUTME: Action-dispatched request payloads for each MCP tool (spec §4.7)
//! ABOUTME: One `action: String` field per tool plus every optional field any of its actions need
//!
//! Grounded on `mira-server`'s `TaskRequest`/`GoalRequest`/`IndexRequest` shape:
//! one flat struct per tool, every field `Option<_>` except `action` itself,
//! `#[schemars(description = "...")]` per field so `tools/list` advertises a
//! useful schema without a second definition to keep in sync.

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

/// `memory` — store / retrieve / build_context.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct MemoryRequest {
    #[schemars(description = "Action: store/retrieve/build_context")]
    pub action: String,
    #[schemars(description = "File name for a stored resource (store)")]
    pub file_name: Option<String>,
    #[schemars(description = "Resource type: document/code/chat/pattern/blueprint (store)")]
    pub resource_type: Option<String>,
    #[schemars(description = "Raw content to chunk and embed (store)")]
    pub content: Option<String>,
    #[schemars(description = "Arbitrary resource metadata (store)")]
    pub metadata: Option<Value>,
    #[schemars(description = "Natural-language query (retrieve/build_context)")]
    pub query: Option<String>,
    #[schemars(description = "Number of results to return, default 5 (retrieve/build_context)")]
    pub top_k: Option<usize>,
    #[schemars(description = "Restrict to one resource type (retrieve/build_context)")]
    pub type_filter: Option<String>,
    #[schemars(description = "Attach each result's 1-hop graph neighbors (retrieve)")]
    pub enrich_graph: Option<bool>,
    #[schemars(description = "Token budget for the assembled context block (build_context)")]
    pub max_tokens: Option<usize>,
}

/// `chat` — log / context / by_tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ChatRequest {
    #[schemars(description = "Action: log/context/by_tool")]
    pub action: String,
    #[schemars(description = "Conversation id (log/context)")]
    pub conversation_id: Option<String>,
    #[schemars(description = "Role: user/assistant/system (log)")]
    pub role: Option<String>,
    #[schemars(description = "Message content (log)")]
    pub content: Option<String>,
    #[schemars(description = "Originating tool name (log/by_tool)")]
    pub source_tool: Option<String>,
    #[schemars(description = "Query to answer with retrieved context (context)")]
    pub query: Option<String>,
    #[schemars(description = "Number of chunks to retrieve as context, default 5 (context)")]
    pub top_k: Option<usize>,
    #[schemars(description = "Max rows to return, default 20 (by_tool)")]
    pub limit: Option<i64>,
}

/// `todo` — add / list / complete / search.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TodoRequest {
    #[schemars(description = "Action: add/list/complete/search")]
    pub action: String,
    #[schemars(description = "Title (add)")]
    pub title: Option<String>,
    #[schemars(description = "Description (add)")]
    pub description: Option<String>,
    #[schemars(description = "Priority: low/medium/high (add/search)")]
    pub priority: Option<String>,
    #[schemars(description = "Todo id (complete)")]
    pub todo_id: Option<i64>,
    #[schemars(description = "Status: pending/completed (search)")]
    pub status: Option<String>,
    #[schemars(description = "Max rows to return, default 20 (list/search)")]
    pub limit: Option<i64>,
}

/// `pattern` — log / get / analyze. `extract_*` actions are out of core scope.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PatternRequest {
    #[schemars(description = "Action: log/get/analyze")]
    pub action: String,
    #[schemars(description = "Prompt that produced the code (log)")]
    pub input_prompt: Option<String>,
    #[schemars(description = "Generated code (log)")]
    pub generated_code: Option<String>,
    #[schemars(description = "Outcome: pass/fail/partial (log)")]
    pub result: Option<String>,
    #[schemars(description = "Function name (log)")]
    pub function_name: Option<String>,
    #[schemars(description = "File name (log)")]
    pub file_name: Option<String>,
    #[schemars(description = "Module name (log)")]
    pub module_name: Option<String>,
    #[schemars(description = "Execution time in milliseconds (log)")]
    pub execution_time_ms: Option<i64>,
    #[schemars(description = "Error message, if any (log)")]
    pub error_message: Option<String>,
    #[schemars(description = "Free-form tags (log)")]
    pub tags: Option<Vec<String>>,
    #[schemars(description = "Pattern id (get)")]
    pub pattern_id: Option<i64>,
}

/// `graph` — link / query / auto_link / get_relationships.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GraphRequest {
    #[schemars(description = "Action: link/query/auto_link/get_relationships")]
    pub action: String,
    #[schemars(description = "Source resource id (link)")]
    pub source_id: Option<i64>,
    #[schemars(description = "Target resource id (link)")]
    pub target_id: Option<i64>,
    #[schemars(description = "Free-form relationship label, used verbatim as the edge type (link)")]
    pub link_type: Option<String>,
    #[schemars(description = "Edge weight, default 1.0 (link)")]
    pub weight: Option<f64>,
    #[schemars(description = "Edge metadata (link)")]
    pub metadata: Option<Value>,
    #[schemars(description = "Entity id to query edges for (query)")]
    pub entity: Option<String>,
    #[schemars(description = "Restrict to one relation type (query)")]
    pub relation_type: Option<String>,
    #[schemars(description = "Resource ids to pairwise-compare and auto-link (auto_link)")]
    pub resource_ids: Option<Vec<i64>>,
    #[schemars(description = "Minimum cosine similarity to link, default 0.7 (auto_link)")]
    pub similarity_threshold: Option<f32>,
    #[schemars(description = "Max links created per resource, default 5 (auto_link)")]
    pub max_links_per_doc: Option<usize>,
    #[schemars(description = "Resource id to fetch neighbors for (get_relationships)")]
    pub resource_id: Option<String>,
    #[schemars(description = "Neighbor traversal depth, default 1 (get_relationships)")]
    pub depth: Option<usize>,
}

/// `cache` — stats / flush / health / reset.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CacheRequest {
    #[schemars(description = "Action: stats/flush/health/reset")]
    pub action: String,
    #[schemars(description = "Key prefix to flush; empty clears everything (flush/reset)")]
    pub scope: Option<String>,
}
