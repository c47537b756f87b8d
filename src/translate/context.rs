//! Context block assembly: a bounded excerpt of earlier translations from this
//! session and from the translation memory, included in the prompt to keep
//! terminology and tone consistent across chunks.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::memory::TranslationMemory;
use super::similarity::similarity_ci;

/// Rough multilingual estimate.
pub const AVERAGE_TOKENS_PER_CHAR: f64 = 0.25;
/// Prompt budget considered safe for a single call.
pub const PROMPT_TOKEN_LIMIT: usize = 30_000;

const HISTORY_HIGH_WATER: usize = 500;
const HISTORY_KEEP: usize = 300;
const LIMITED_LAST_CHUNK: usize = 5;
const MEMORY_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    Full,
    Limited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    pub mode: ContextMode,
    pub max_tokens: usize,
    pub max_examples: usize,
    pub similarity_threshold: f64,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            mode: ContextMode::Limited,
            max_tokens: 1000,
            max_examples: 10,
            similarity_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub source: String,
    pub target: String,
    pub chunk_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TokenEstimate {
    pub context: usize,
    pub prompt: usize,
    pub total: usize,
    pub is_within_limit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContextStats {
    pub total_entries: usize,
    pub chunks: usize,
    pub avg_entries_per_chunk: usize,
    pub memory_entries: usize,
}

pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f64 * AVERAGE_TOKENS_PER_CHAR).ceil() as usize
}

pub fn token_estimate(context: &str, prompt: &str) -> TokenEstimate {
    let context = estimate_tokens(context);
    let prompt = estimate_tokens(prompt);
    let total = context + prompt;
    TokenEstimate {
        context,
        prompt,
        total,
        is_within_limit: total < PROMPT_TOKEN_LIMIT,
    }
}

fn format_pair(source: &str, target: &str) -> String {
    format!("• \"{source}\" → \"{target}\"")
}

/// Highest similarity between `candidate` and any of `texts`.
fn best_similarity(texts: &[String], candidate: &str) -> f64 {
    texts
        .iter()
        .map(|t| similarity_ci(t, candidate))
        .fold(0.0, f64::max)
}

/// Translations produced so far in this session, oldest first.
#[derive(Debug, Default)]
pub struct ContextHistory {
    entries: Vec<HistoryEntry>,
}

impl ContextHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        debug!("context history cleared");
    }

    /// Record a chunk's `(source, target)` pairs. History is trimmed to the
    /// newest entries once it grows past the high-water mark.
    pub fn add_chunk<I>(&mut self, chunk_index: usize, pairs: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let before = self.entries.len();
        self.entries
            .extend(pairs.into_iter().map(|(source, target)| HistoryEntry {
                source,
                target,
                chunk_index,
            }));

        if self.entries.len() > HISTORY_HIGH_WATER {
            let excess = self.entries.len() - HISTORY_KEEP;
            self.entries.drain(..excess);
        }
        debug!(
            added = self.entries.len().saturating_sub(before),
            total = self.entries.len(),
            "context history updated"
        );
    }

    fn last_chunk_entries(&self, count: usize) -> Vec<&HistoryEntry> {
        let Some(last) = self.entries.last() else {
            return Vec::new();
        };
        let last_chunk: Vec<&HistoryEntry> = self
            .entries
            .iter()
            .filter(|e| e.chunk_index == last.chunk_index)
            .collect();
        last_chunk[last_chunk.len().saturating_sub(count)..].to_vec()
    }

    fn relevant_entries(&self, texts: &[String], threshold: f64) -> Vec<&HistoryEntry> {
        let mut scored: Vec<(&HistoryEntry, f64)> = self
            .entries
            .iter()
            .map(|e| (e, best_similarity(texts, &e.source)))
            .filter(|(_, s)| *s >= threshold)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(e, _)| e).collect()
    }

    pub fn stats(&self, memory: &TranslationMemory) -> ContextStats {
        let chunks = self
            .entries
            .iter()
            .map(|e| e.chunk_index)
            .collect::<HashSet<_>>()
            .len();
        ContextStats {
            total_entries: self.entries.len(),
            chunks,
            avg_entries_per_chunk: if chunks > 0 {
                (self.entries.len() as f64 / chunks as f64).round() as usize
            } else {
                0
            },
            memory_entries: memory.len(),
        }
    }

    /// Build the context block for `texts`, truncated to the token budget.
    pub fn build_context(
        &self,
        texts: &[String],
        memory: &TranslationMemory,
        options: &ContextOptions,
    ) -> String {
        let context = match options.mode {
            ContextMode::Full => self.build_full(texts, memory, options),
            ContextMode::Limited => self.build_limited(texts, memory, options),
        };

        if estimate_tokens(&context) > options.max_tokens {
            let target_chars = (options.max_tokens as f64 / AVERAGE_TOKENS_PER_CHAR) as usize;
            let mut truncated: String = context.chars().take(target_chars).collect();
            truncated.push_str("...");
            debug!(target_chars, "context truncated to token budget");
            return truncated;
        }
        context
    }

    fn build_full(
        &self,
        texts: &[String],
        memory: &TranslationMemory,
        options: &ContextOptions,
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        let history_budget = (options.max_examples as f64 * 0.6).floor() as usize;
        let relevant = self.relevant_entries(texts, options.similarity_threshold);
        if !relevant.is_empty() && history_budget > 0 {
            parts.push("Previous translations in this session:".to_string());
            parts.extend(
                relevant
                    .iter()
                    .take(history_budget)
                    .map(|e| format_pair(&e.source, &e.target)),
            );
        }

        let memory_budget = (options.max_examples as f64 * 0.4).floor() as usize;
        if let Some(block) = memory_context(texts, memory, memory_budget, options.similarity_threshold) {
            if !parts.is_empty() {
                parts.push(String::new());
            }
            parts.push(block);
        }

        parts.join("\n")
    }

    fn build_limited(
        &self,
        texts: &[String],
        memory: &TranslationMemory,
        options: &ContextOptions,
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        let last = self.last_chunk_entries(LIMITED_LAST_CHUNK);
        if !last.is_empty() {
            parts.push("Recent translations:".to_string());
            parts.extend(last.iter().map(|e| format_pair(&e.source, &e.target)));
        }

        let memory_budget = options.max_examples.saturating_sub(last.len()).max(3);
        if let Some(block) = memory_context(texts, memory, memory_budget, options.similarity_threshold) {
            if !parts.is_empty() {
                parts.push(String::new());
            }
            parts.push(block);
        }

        parts.join("\n")
    }
}

/// Relevant memory pairs among the most recent entries; falls back to the
/// newest few when nothing is relevant.
fn memory_context(
    texts: &[String],
    memory: &TranslationMemory,
    max_examples: usize,
    threshold: f64,
) -> Option<String> {
    let recent = memory.recent(MEMORY_WINDOW);
    if recent.is_empty() || max_examples == 0 {
        return None;
    }

    let mut scored: Vec<(&_, f64)> = recent
        .iter()
        .map(|e| (e, best_similarity(texts, &e.source)))
        .filter(|(_, s)| *s >= threshold)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    if scored.is_empty() {
        let lines: Vec<String> = recent
            .iter()
            .take(max_examples.min(3))
            .map(|e| format_pair(&e.source, &e.target))
            .collect();
        return Some(format!("Recent translation patterns:\n{}", lines.join("\n")));
    }

    let lines: Vec<String> = scored
        .into_iter()
        .take(max_examples)
        .map(|(e, _)| format_pair(&e.source, &e.target))
        .collect();
    Some(format!("Similar translation patterns:\n{}", lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::memory::MemoryEntry;
    use crate::translate::store::InMemoryStore;
    use std::sync::Arc;

    fn empty_memory() -> TranslationMemory {
        TranslationMemory::load(Arc::new(InMemoryStore::new()), 100)
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(s, t)| (s.to_string(), t.to_string()))
            .collect()
    }

    #[test]
    fn empty_history_and_memory_give_empty_context() {
        let history = ContextHistory::new();
        let memory = empty_memory();
        let options = ContextOptions::default();
        assert_eq!(history.build_context(&["Hi".into()], &memory, &options), "");
    }

    #[test]
    fn limited_mode_uses_only_last_chunk() {
        let mut history = ContextHistory::new();
        history.add_chunk(0, pairs(&[("Old line", "قدیمی")]));
        history.add_chunk(1, pairs(&[("New line", "جدید")]));
        let memory = empty_memory();

        let ctx = history.build_context(&["anything".into()], &memory, &ContextOptions::default());
        assert!(ctx.contains("New line"));
        assert!(!ctx.contains("Old line"));
    }

    #[test]
    fn full_mode_ranks_by_similarity() {
        let mut history = ContextHistory::new();
        history.add_chunk(0, pairs(&[("Where is the car?", "ماشین کجاست؟"), ("zzzz", "x")]));
        let mut memory = empty_memory();
        memory.upsert(MemoryEntry::new("Where is the car", "ماشین کجاست", 1.0, None));

        let options = ContextOptions {
            mode: ContextMode::Full,
            ..ContextOptions::default()
        };
        let ctx = history.build_context(&["Where is the car?".into()], &memory, &options);
        assert!(ctx.starts_with("Previous translations in this session:"));
        assert!(ctx.contains("Similar translation patterns:"));
        assert!(!ctx.contains("zzzz"));
    }

    #[test]
    fn memory_falls_back_to_recent_entries() {
        let history = ContextHistory::new();
        let mut memory = empty_memory();
        memory.upsert(MemoryEntry::new("qqqqqqqq", "x", 1.0, None));
        let ctx = history.build_context(&["Hello".into()], &memory, &ContextOptions::default());
        assert!(ctx.starts_with("Recent translation patterns:"));
    }

    #[test]
    fn context_is_truncated_to_budget() {
        let mut history = ContextHistory::new();
        let long: Vec<(String, String)> = (0..5)
            .map(|i| (format!("line number {i} {}", "x".repeat(80)), "y".repeat(80)))
            .collect();
        history.add_chunk(0, long);
        let options = ContextOptions {
            max_tokens: 25,
            ..ContextOptions::default()
        };
        let ctx = history.build_context(&["line".into()], &empty_memory(), &options);
        assert_eq!(ctx.chars().count(), 100 + 3);
        assert!(ctx.ends_with("..."));
    }

    #[test]
    fn history_is_capped() {
        let mut history = ContextHistory::new();
        for chunk in 0..6 {
            let batch = (0..100).map(|i| (format!("s{chunk}-{i}"), "t".to_string()));
            history.add_chunk(chunk, batch);
        }
        assert!(history.len() <= HISTORY_HIGH_WATER);
        let stats = history.stats(&empty_memory());
        assert_eq!(stats.total_entries, history.len());
        assert!(stats.chunks >= 3);
    }

    #[test]
    fn token_estimates() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        let est = token_estimate("abcd", "abcdefgh");
        assert_eq!(est.total, 3);
        assert!(est.is_within_limit);
    }
}
