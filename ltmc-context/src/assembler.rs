//! Builds [`AssembledContext`] from an already-ranked chunk list.
//!
//! Never re-sorts its input: `retrieve`'s rank order (similarity, then
//! position, then recency) is the contract the retrieval pipeline promises
//! callers, and assembly must preserve it. The only thing this stage adds is
//! a token budget — an LLM context window is finite regardless of how good
//! the ranking is.

use tracing::trace;

use crate::types::{AssembledContext, RankedChunk};

/// Assembles ranked chunks into one formatted context block, truncated to a
/// token budget.
pub struct ContextAssembler {
    max_tokens: usize,
}

impl ContextAssembler {
    /// 8000 tokens, matching typical leftover budget under a prompt window.
    #[must_use]
    pub const fn new() -> Self {
        Self { max_tokens: 8000 }
    }

    #[must_use]
    pub const fn with_max_tokens(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    /// Truncate `chunks` to fit the token budget (dropping from the tail,
    /// since they are already ranked best-first) and format them into one
    /// context string.
    #[must_use]
    pub fn assemble(&self, chunks: Vec<RankedChunk>) -> AssembledContext {
        let (selected, token_count) = self.enforce_token_budget(chunks);
        let formatted = Self::format_context(&selected);
        AssembledContext {
            chunks: selected,
            token_count,
            formatted,
        }
    }

    fn enforce_token_budget(&self, chunks: Vec<RankedChunk>) -> (Vec<RankedChunk>, usize) {
        let mut selected = Vec::new();
        let mut token_count = 0;
        for chunk in chunks {
            let chunk_tokens = estimate_tokens(&chunk.chunk_text);
            if token_count + chunk_tokens > self.max_tokens {
                trace!(token_count, chunk_tokens, max = self.max_tokens, "truncating context at budget");
                break;
            }
            token_count += chunk_tokens;
            selected.push(chunk);
        }
        (selected, token_count)
    }

    fn format_context(chunks: &[RankedChunk]) -> String {
        chunks
            .iter()
            .map(|c| {
                format!(
                    "[rank {} | score {:.3} | {}]\n{}",
                    c.rank, c.score, c.file_name, c.chunk_text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// 4 characters ≈ 1 token. Approximate but sufficient for budget enforcement.
const fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(id: i64, rank: usize, text: &str) -> RankedChunk {
        RankedChunk {
            chunk_id: id,
            resource_id: 1,
            file_name: "doc.md".to_string(),
            chunk_text: text.to_string(),
            score: 1.0 - (rank as f32 * 0.1),
            rank,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn preserves_input_rank_order() {
        let assembler = ContextAssembler::new();
        let context = assembler.assemble(vec![chunk(1, 0, "first"), chunk(2, 1, "second")]);
        assert_eq!(context.chunks[0].chunk_id, 1);
        assert_eq!(context.chunks[1].chunk_id, 2);
    }

    #[test]
    fn truncates_to_fit_budget() {
        let assembler = ContextAssembler::with_max_tokens(3);
        let context = assembler.assemble(vec![
            chunk(1, 0, "0123456789"),
            chunk(2, 1, "0123456789"),
        ]);
        assert_eq!(context.chunks.len(), 1);
        assert!(context.token_count <= 3);
    }

    #[test]
    fn empty_input_yields_empty_context() {
        let assembler = ContextAssembler::new();
        let context = assembler.assemble(vec![]);
        assert!(context.chunks.is_empty());
        assert_eq!(context.token_count, 0);
        assert_eq!(context.formatted, "");
    }
}
