//! Paragraph-boundary text chunker with overlap.
//!
//! Splits a source file into [`Chunk`]s of at most `max_chars` characters.
//! Splitting prefers blank lines, then newlines, then spaces, so functions
//! and paragraphs stay together where they fit. Each chunk after the first
//! starts with the last `overlap` characters of its predecessor so that
//! retrieval does not lose context at the seams.
//!
//! Each chunk carries a SHA-256 hash of its text, which the index uses to
//! drop duplicates.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Split `text` into chunks of at most `max_chars` characters, carrying
/// `overlap` characters from one chunk into the next.
/// Returns chunks with contiguous indices starting at 0.
pub fn chunk_text(source: &str, text: &str, max_chars: usize, overlap: usize) -> Vec<Chunk> {
    let max_chars = max_chars.max(1);
    let overlap = overlap.min(max_chars.saturating_sub(1));

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index: i64 = 0;

    while start < chars.len() {
        let hard_end = (start + max_chars).min(chars.len());
        let end = if hard_end < chars.len() {
            split_point(&chars[start..hard_end]).map_or(hard_end, |p| start + p)
        } else {
            hard_end
        };

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(make_chunk(source, chunk_index, piece));
            chunk_index += 1;
        }

        if end >= chars.len() {
            break;
        }
        // Step back by the overlap but always make progress.
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}

/// Best place to end a window: just after the last blank line, newline or
/// space, ignoring boundaries in the first half of the window.
fn split_point(window: &[char]) -> Option<usize> {
    let min = window.len() / 2;
    let last_blank = window
        .windows(2)
        .rposition(|w| w[0] == '\n' && w[1] == '\n')
        .map(|p| p + 2);
    let last_newline = window.iter().rposition(|c| *c == '\n').map(|p| p + 1);
    let last_space = window.iter().rposition(|c| *c == ' ').map(|p| p + 1);

    [last_blank, last_newline, last_space]
        .into_iter()
        .flatten()
        .find(|p| *p > min)
}

fn make_chunk(source: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        source: source.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
