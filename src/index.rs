//! In-process retrieval index, one collection per repository.
//!
//! Collections hold the chunks produced at ingestion time. Retrieval is a
//! keyword score (number of distinct query terms found in the chunk, ties
//! broken by ingestion order); when nothing matches, the first `k` chunks are
//! returned so prompts never go out without context.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::models::Chunk;

/// Terms shorter than this carry no signal ("a", "in", "of").
const MIN_TERM_LEN: usize = 3;

#[derive(Default)]
pub struct IndexStore {
    collections: RwLock<HashMap<String, Arc<Vec<Chunk>>>>,
}

impl IndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the collection for `repo_id` with `chunks`, keeping only the
    /// first chunk for each distinct text hash. Returns the number kept.
    pub fn replace_collection(&self, repo_id: &str, chunks: Vec<Chunk>) -> usize {
        let mut seen = HashSet::new();
        let unique: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| seen.insert(c.hash.clone()))
            .collect();
        let kept = unique.len();
        self.collections
            .write()
            .insert(repo_id.to_string(), Arc::new(unique));
        kept
    }

    pub fn contains(&self, repo_id: &str) -> bool {
        self.collections.read().contains_key(repo_id)
    }

    pub fn chunk_count(&self, repo_id: &str) -> usize {
        self.collections
            .read()
            .get(repo_id)
            .map_or(0, |c| c.len())
    }

    /// Top `k` chunks of `repo_id` for `query`. `None` if the repository has
    /// never been indexed.
    pub fn search(&self, repo_id: &str, query: &str, k: usize) -> Option<Vec<Chunk>> {
        // Clone the Arc so scoring runs without holding the lock.
        let collection = self.collections.read().get(repo_id).cloned()?;

        let query_lower = query.to_lowercase();
        let mut terms: Vec<&str> = query_lower
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| t.len() >= MIN_TERM_LEN)
            .collect();
        terms.sort_unstable();
        terms.dedup();

        let mut scored: Vec<(usize, usize)> = collection
            .iter()
            .enumerate()
            .filter_map(|(pos, chunk)| {
                let text = chunk.text.to_lowercase();
                let source = chunk.source.to_lowercase();
                let matches = terms
                    .iter()
                    .filter(|t| text.contains(**t) || source.contains(**t))
                    .count();
                (matches > 0).then_some((matches, pos))
            })
            .collect();

        if scored.is_empty() {
            return Some(collection.iter().take(k).cloned().collect());
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        Some(
            scored
                .into_iter()
                .take(k)
                .map(|(_, pos)| collection[pos].clone())
                .collect(),
        )
    }
}

/// Render retrieved chunks as prompt context, each tagged with its file and
/// its position in that file.
pub fn format_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("File: {} (chunk {})\n{}", c.source, c.chunk_index, c.text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
