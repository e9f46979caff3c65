//! Splits resource content into overlapping chunks ahead of the atomic write
//! protocol.
//!
//! Grounded on the teacher's `SlidingWindowChunker`
//! (`llmspell-rag/src/chunking/strategies.rs`): byte-offset sliding window,
//! 4-characters-per-token estimate in the absence of a real tokenizer. This
//! crate has no tokenizer dependency, so it always uses that estimate.

const CHARS_PER_TOKEN: usize = 4;

/// One chunk of a resource's content, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedChunk {
    pub text: String,
    pub position: i64,
}

/// Split `content` into chunks of at most `max_chunk_size` tokens, each
/// overlapping the previous by `overlap_size` tokens.
///
/// # Panics
///
/// Does not panic; `overlap_size >= max_chunk_size` is rejected by
/// `LtmcConfig::finalize` before this is ever called.
#[must_use]
pub fn chunk_content(content: &str, max_chunk_size: usize, overlap_size: usize) -> Vec<PreparedChunk> {
    if content.is_empty() {
        return Vec::new();
    }
    let max_chars = max_chunk_size * CHARS_PER_TOKEN;
    let overlap_chars = overlap_size * CHARS_PER_TOKEN;
    let step = max_chars.saturating_sub(overlap_chars).max(1);

    let bytes = content.as_bytes();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut position = 0i64;

    while start < bytes.len() {
        let end = char_boundary_at(content, (start + max_chars).min(bytes.len()));
        chunks.push(PreparedChunk {
            text: content[start..end].to_string(),
            position,
        });
        position += 1;
        if end >= bytes.len() {
            break;
        }
        start = char_boundary_at(content, start + step);
    }
    chunks
}

/// Snap `pos` back to the nearest preceding UTF-8 character boundary.
fn char_boundary_at(text: &str, mut pos: usize) -> usize {
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}
