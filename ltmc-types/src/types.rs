//! Core data model: resources, chunks, conversations, and structured records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of artifact a [`Resource`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Document,
    Code,
    Chat,
    Pattern,
    Blueprint,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Document => "document",
            Self::Code => "code",
            Self::Chat => "chat",
            Self::Pattern => "pattern",
            Self::Blueprint => "blueprint",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(Self::Document),
            "code" => Ok(Self::Code),
            "chat" => Ok(Self::Chat),
            "pattern" => Ok(Self::Pattern),
            "blueprint" => Ok(Self::Blueprint),
            other => Err(format!("unknown resource_type: {other}")),
        }
    }
}

/// A logical document owning one or more [`Chunk`]s.
///
/// Immutable once created except via explicit delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    pub file_name: String,
    pub resource_type: ResourceType,
    pub created_at: DateTime<Utc>,
}

/// A fixed-size-by-tokens slice of a [`Resource`].
///
/// `vector_id` exists iff an entry with the same id exists in the vector
/// index (invariant I1/I2); the monotonic allocator guarantees it is never
/// reused once assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub resource_id: i64,
    pub chunk_text: String,
    pub vector_id: i64,
    pub position: i64,
}

/// A single conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ChatRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A conversation turn recorded by [`coordinator.log_chat`](crate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub conversation_id: String,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub source_tool: Option<String>,
}

/// Binds a [`ChatMessage`] to the [`Chunk`]s that informed it.
///
/// Many-to-many; deletion of either endpoint cascades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextLink {
    pub id: i64,
    pub message_id: i64,
    pub chunk_id: i64,
}

/// Priority of a [`Todo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoPriority {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for TodoPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TodoPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Status of a [`Todo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    Completed,
}

impl std::fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TodoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// A structured task, independent of the document/chunk model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub priority: TodoPriority,
    pub status: TodoStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Outcome of a code-generation attempt recorded by `log_code_pattern`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternResult {
    Pass,
    Fail,
    Partial,
}

impl std::fmt::Display for PatternResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Partial => "partial",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PatternResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            "partial" => Ok(Self::Partial),
            other => Err(format!("unknown result: {other}")),
        }
    }
}

/// A code generation experience: prompt, generated code, and its outcome.
///
/// Carries its own `vector_id` so prompts can be retrieved semantically
/// alongside documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodePattern {
    pub id: i64,
    pub input_prompt: String,
    pub generated_code: String,
    pub result: PatternResult,
    pub function_name: Option<String>,
    pub file_name: Option<String>,
    pub module_name: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub tags: Vec<String>,
    pub vector_id: i64,
    pub created_at: DateTime<Utc>,
}

impl CodePattern {
    /// The text embedded for this pattern: prompt followed by the code it produced.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}", self.input_prompt, self.generated_code)
    }
}

/// A typed, weighted edge between two [`Resource`]s, mirrored in both the
/// relational store and the graph store.
///
/// `link_type` is free-form and MUST be used verbatim as the graph edge's
/// type label — never collapsed into a constant relationship type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLink {
    pub id: i64,
    pub source_resource_id: i64,
    pub target_resource_id: i64,
    pub link_type: String,
    pub weight: f64,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Filter applied by [`crate`] consumers when narrowing retrieval to one
/// [`ResourceType`].
pub type TypeFilter = Option<ResourceType>;
