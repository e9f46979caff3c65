//! ABOUTME: Shared data model and error types for the LTMC long-term memory service
//! ABOUTME: Depended on by every other ltmc-* crate; carries no storage logic itself
//!
//! # Data model
//!
//! - [`Resource`] / [`Chunk`]: documents split into token-bounded chunks, each chunk
//!   carrying a globally unique, monotonic `vector_id`.
//! - [`ChatMessage`] / [`ContextLink`]: conversation turns and the chunks that
//!   informed them.
//! - [`Todo`] / [`CodePattern`]: structured records that stand alone.
//! - [`ResourceLink`]: a typed, weighted edge between two resources, mirrored in
//!   the relational store and the graph store under the same type label.

pub mod error;
pub mod types;

pub use error::{LtmcError, Result, StorageKind};
pub use types::{
    ChatMessage, ChatRole, Chunk, CodePattern, ContextLink, PatternResult, Resource, ResourceLink,
    ResourceType, Todo, TodoPriority, TodoStatus, TypeFilter,
};
