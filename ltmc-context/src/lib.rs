// ABOUTME: Context-link model and context assembly for the LTMC memory service
// ABOUTME: Turns a ranked chunk list from the retrieval pipeline into one formatted context block

//! Kept to the single responsibility the memory service needs downstream of
//! the retrieval pipeline: assembling already-ranked chunks into a
//! token-budgeted context string, and the `ContextLink`-ready chunk ids that
//! come with it.

pub mod assembler;
pub mod types;

pub use assembler::ContextAssembler;
pub use types::{AssembledContext, RankedChunk};
