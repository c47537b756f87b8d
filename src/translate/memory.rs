//! Translation memory: ordered (most-recent-first) list of prior translations,
//! capped at a fixed capacity and persisted as one JSON array under a fixed
//! namespace in a key-value store.
//!
//! Two lookup tiers: an LRU exact-match index keyed by the blake3 hash of the
//! normalized source, then a linear similarity scan over every entry.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::normalize::normalize_key;
use super::similarity::similarity;
use super::store::KeyValueStore;
use super::TranslateError;

pub const MEMORY_NAMESPACE: &str = "translation_memory";
pub const DEFAULT_CAPACITY: usize = 1000;

/// Minimum similarity for a "same line" decision.
pub const HIT_SIMILARITY: f64 = 0.95;
/// Minimum effective confidence (similarity × stored confidence) for a hit.
pub const HIT_CONFIDENCE: f64 = 0.98;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub source: String,
    pub target: String,
    pub confidence: f64,
    /// Unix time in milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl MemoryEntry {
    pub fn new(source: &str, target: &str, confidence: f64, context: Option<String>) -> Self {
        Self {
            source: normalize_key(source),
            target: target.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: now_millis(),
            context,
        }
    }
}

/// An entry together with its similarity to the queried text.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarMatch {
    pub entry: MemoryEntry,
    pub similarity: f64,
}

impl SimilarMatch {
    #[inline]
    pub fn effective_confidence(&self) -> f64 {
        self.similarity * self.entry.confidence
    }

    #[inline]
    pub fn is_hit(&self) -> bool {
        self.similarity >= HIT_SIMILARITY && self.effective_confidence() > HIT_CONFIDENCE
    }
}

pub struct TranslationMemory {
    entries: Vec<MemoryEntry>,
    capacity: usize,
    exact: LruCache<[u8; 32], (String, f64)>,
    store: Arc<dyn KeyValueStore>,
}

impl TranslationMemory {
    /// Load the persisted collection. An unreadable payload yields an empty memory.
    pub fn load(store: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let entries = match store.get(MEMORY_NAMESPACE) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<MemoryEntry>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "stored translation memory unreadable, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "translation memory load failed, starting empty");
                Vec::new()
            }
        };

        let mut memory = Self {
            entries,
            capacity,
            exact: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            store,
        };
        memory.entries = canonical(std::mem::take(&mut memory.entries), capacity);
        memory.rebuild_index();
        info!(entries = memory.entries.len(), capacity, "translation memory loaded");
        memory
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    /// The `n` most recent entries.
    pub fn recent(&self, n: usize) -> &[MemoryEntry] {
        &self.entries[..n.min(self.entries.len())]
    }

    fn key_hash(source: &str) -> [u8; 32] {
        *blake3::hash(source.as_bytes()).as_bytes()
    }

    fn rebuild_index(&mut self) {
        self.exact.clear();
        // Oldest first so the most recent entries are the most recently used.
        for entry in self.entries.iter().rev() {
            self.exact.put(
                Self::key_hash(&entry.source),
                (entry.target.clone(), entry.confidence),
            );
        }
    }

    /// Replace the entry with the same source, or prepend and enforce the cap.
    pub fn upsert(&mut self, mut entry: MemoryEntry) {
        entry.source = normalize_key(&entry.source);
        entry.confidence = entry.confidence.clamp(0.0, 1.0);
        let hash = Self::key_hash(&entry.source);
        self.exact
            .put(hash, (entry.target.clone(), entry.confidence));

        if let Some(existing) = self.entries.iter_mut().find(|e| e.source == entry.source) {
            *existing = entry;
            return;
        }

        self.entries.insert(0, entry);
        if self.entries.len() > self.capacity {
            for dropped in self.entries.drain(self.capacity..) {
                self.exact.pop(&Self::key_hash(&dropped.source));
            }
        }
    }

    /// Every entry whose source similarity to `text` is at least `threshold`,
    /// best match first.
    pub fn find_similar(&self, text: &str, threshold: f64) -> Vec<SimilarMatch> {
        let text = normalize_key(text);
        let mut matches: Vec<SimilarMatch> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let similarity = similarity(&text, &entry.source);
                (similarity >= threshold).then(|| SimilarMatch {
                    entry: entry.clone(),
                    similarity,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches
    }

    /// Resolve `text` from memory if it is effectively the same line as a stored one.
    pub fn lookup(&mut self, text: &str) -> Option<SimilarMatch> {
        let key = normalize_key(text);
        if let Some((target, confidence)) = self.exact.get(&Self::key_hash(&key)) {
            let hit = SimilarMatch {
                entry: MemoryEntry {
                    source: key.clone(),
                    target: target.clone(),
                    confidence: *confidence,
                    timestamp: 0,
                    context: None,
                },
                similarity: 1.0,
            };
            if hit.is_hit() {
                debug!("memory exact hit");
                return Some(hit);
            }
        }

        self.find_similar(&key, HIT_SIMILARITY)
            .into_iter()
            .next()
            .filter(SimilarMatch::is_hit)
    }

    /// Write the whole collection to the store.
    pub fn persist(&self) -> Result<(), TranslateError> {
        let json = serde_json::to_string(&self.entries)?;
        self.store.set(MEMORY_NAMESPACE, &json)
    }

    pub fn clear(&mut self) -> Result<(), TranslateError> {
        self.entries.clear();
        self.exact.clear();
        self.store.remove(MEMORY_NAMESPACE)?;
        info!("translation memory cleared");
        Ok(())
    }

    /// Pretty-printed JSON array of every entry.
    pub fn export_json(&self) -> Result<String, TranslateError> {
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }

    /// Replace the collection with `json`. The payload must be an array of
    /// entries; anything else is rejected without touching current state.
    pub fn import_json(&mut self, json: &str) -> Result<usize, TranslateError> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| TranslateError::InvalidInput(format!("not JSON: {e}")))?;
        if !value.is_array() {
            return Err(TranslateError::InvalidInput(
                "translation memory import must be a JSON array".into(),
            ));
        }
        let entries: Vec<MemoryEntry> = serde_json::from_value(value)
            .map_err(|e| TranslateError::InvalidInput(format!("invalid entry: {e}")))?;
        let entries = canonical(entries, self.capacity);

        let previous = std::mem::replace(&mut self.entries, entries);
        if let Err(e) = self.persist() {
            self.entries = previous;
            return Err(e);
        }
        self.rebuild_index();
        info!(entries = self.entries.len(), "translation memory imported");
        Ok(self.entries.len())
    }
}

/// Normalize keys and clamp confidences, keep the first entry per key, drop
/// blank keys and cap the result.
fn canonical(entries: Vec<MemoryEntry>, capacity: usize) -> Vec<MemoryEntry> {
    let mut seen = HashSet::with_capacity(entries.len());
    entries
        .into_iter()
        .map(|mut entry| {
            entry.source = normalize_key(&entry.source);
            entry.confidence = entry.confidence.clamp(0.0, 1.0);
            entry
        })
        .filter(|entry| !entry.source.is_empty() && seen.insert(entry.source.clone()))
        .take(capacity)
        .collect()
}

/// Current time as Unix timestamp (milliseconds).
fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::store::InMemoryStore;

    fn memory(capacity: usize) -> TranslationMemory {
        TranslationMemory::load(Arc::new(InMemoryStore::new()), capacity)
    }

    #[test]
    fn upsert_same_source_keeps_one_entry() {
        let mut mem = memory(10);
        mem.upsert(MemoryEntry::new("Hello", "درود", 1.0, None));
        mem.upsert(MemoryEntry::new("Hello", "سلام", 1.0, None));
        assert_eq!(mem.len(), 1);
        assert_eq!(mem.entries()[0].target, "سلام");
        assert_eq!(mem.lookup("Hello").unwrap().entry.target, "سلام");
    }

    #[test]
    fn upsert_normalizes_whitespace_in_key() {
        let mut mem = memory(10);
        mem.upsert(MemoryEntry::new("Hello  world", "a", 1.0, None));
        mem.upsert(MemoryEntry::new(" Hello world ", "b", 1.0, None));
        assert_eq!(mem.len(), 1);
        assert_eq!(mem.entries()[0].target, "b");
    }

    #[test]
    fn cap_drops_oldest_entries() {
        let mut mem = memory(2);
        mem.upsert(MemoryEntry::new("one", "1", 1.0, None));
        mem.upsert(MemoryEntry::new("two", "2", 1.0, None));
        mem.upsert(MemoryEntry::new("three", "3", 1.0, None));
        let sources: Vec<&str> = mem.entries().iter().map(|e| e.source.as_str()).collect();
        assert_eq!(sources, vec!["three", "two"]);
        assert!(mem.lookup("one").is_none());
    }

    #[test]
    fn find_similar_is_monotonic_in_threshold() {
        let mut mem = memory(10);
        for s in ["Hello there", "Hello there!", "Goodbye", "Hello"] {
            mem.upsert(MemoryEntry::new(s, "x", 1.0, None));
        }
        let mut previous = usize::MAX;
        for t in [0.0, 0.3, 0.5, 0.9, 0.95, 1.0] {
            let found = mem.find_similar("Hello there", t);
            assert!(found.len() <= previous);
            assert!(found.windows(2).all(|w| w[0].similarity >= w[1].similarity));
            previous = found.len();
        }
        assert_eq!(mem.find_similar("Hello there", 1.0).len(), 1);
    }

    #[test]
    fn lookup_requires_high_effective_confidence() {
        let mut mem = memory(10);
        mem.upsert(MemoryEntry::new("Hello", "سلام", 0.5, None));
        assert!(mem.lookup("Hello").is_none());

        mem.upsert(MemoryEntry::new("I am going home now", "دارم میرم خونه", 1.0, None));
        // 0.95 <= similarity < 0.98: similar, but not the same line.
        assert!(mem.lookup("I am going home now!").is_none());
        assert!(mem.lookup("I am going home now").is_some());
    }

    #[test]
    fn import_rejects_non_arrays_without_side_effects() {
        let mut mem = memory(10);
        mem.upsert(MemoryEntry::new("Hello", "سلام", 1.0, None));
        assert!(mem.import_json(r#"{"source":"x"}"#).is_err());
        assert!(mem.import_json("not json").is_err());
        assert!(mem.import_json(r#"[{"source":"x"}]"#).is_err());
        assert_eq!(mem.len(), 1);
    }

    #[test]
    fn import_canonicalizes_entries() {
        let mut mem = memory(10);
        let json = r#"[
            {"source":"  Hello   there ","target":"سلام","confidence":1.7,"timestamp":3},
            {"source":"Hello there","target":"درود","confidence":1.0,"timestamp":2},
            {"source":"   ","target":"خالی","confidence":1.0,"timestamp":1},
            {"source":"Bye","target":"خداحافظ","confidence":-2.0,"timestamp":1}
        ]"#;

        assert_eq!(mem.import_json(json).unwrap(), 2);
        assert_eq!(mem.entries()[0].source, "Hello there");
        assert_eq!(mem.entries()[0].target, "سلام");
        assert_eq!(mem.entries()[0].confidence, 1.0);
        assert_eq!(mem.entries()[1].confidence, 0.0);

        mem.upsert(MemoryEntry::new("Hello there", "سلام!", 1.0, None));
        assert_eq!(mem.len(), 2);
        assert_eq!(mem.lookup("Hello there").unwrap().entry.target, "سلام!");
    }

    #[test]
    fn export_import_and_reload() {
        let store = Arc::new(InMemoryStore::new());
        let mut mem = TranslationMemory::load(store.clone(), 10);
        mem.upsert(MemoryEntry::new("Hello", "سلام", 1.0, Some("movie".into())));
        let exported = mem.export_json().unwrap();
        assert!(exported.contains('\n'));

        mem.clear().unwrap();
        assert!(mem.is_empty());
        assert_eq!(mem.import_json(&exported).unwrap(), 1);

        let reloaded = TranslationMemory::load(store, 10);
        assert_eq!(reloaded.entries()[0].target, "سلام");
        assert_eq!(reloaded.entries()[0].context.as_deref(), Some("movie"));
    }

    #[test]
    fn persist_roundtrips_through_store() {
        let store = Arc::new(InMemoryStore::new());
        let mut mem = TranslationMemory::load(store.clone(), 10);
        mem.upsert(MemoryEntry::new("Yes", "بله", 1.0, None));
        mem.persist().unwrap();
        let mut reloaded = TranslationMemory::load(store, 10);
        assert_eq!(reloaded.lookup("Yes").unwrap().entry.target, "بله");
    }
}
