//! ABOUTME: Relational DAL and persisted vector index for the LTMC memory service
//! ABOUTME: Owns schema migrations, the vector-id sequence, and atomic index persistence

pub mod relational;
pub mod vector_index;

pub use relational::{PatternStats, RelationalStore, RelationalTx};
pub use vector_index::{ScoredVectorId, VectorIndex};
