//! ABOUTME: MCP tool schemas and the JSON-RPC response envelope for the LTMC memory service
//! ABOUTME: Owns the wire shape `ltmc-server` dispatches into; no store access lives here
//!
//! `ltmc-server` (the bootstrap, store wiring, and `#[tool]` dispatch methods
//! themselves) is grounded on `ConaryLabs-Mira`'s `rmcp`-based MCP server
//! rather than on the teacher, which never implements an MCP endpoint at
//! all — its protocol crate is a TCP Jupyter-style multi-channel transport
//! for an entirely different purpose. This crate supplies only the request
//! schemas and the success/error envelope every tool method resolves to;
//! `rmcp` itself owns framing, `initialize`, and `tools/list`.

pub mod envelope;
pub mod requests;

pub use envelope::{ErrorPayload, ToolEnvelope};
pub use requests::{CacheRequest, ChatRequest, GraphRequest, MemoryRequest, PatternRequest, TodoRequest};
