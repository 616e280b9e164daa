//! Two-tier judgment cache: exact key lookup, then near-duplicate matching.
//!
//! Storage is delegated to an injected [`CacheStore`]; this module owns the
//! key derivation and the lookup policy.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::similarity::SimilarityMatcher;
use crate::store::{CacheStore, StoreError};
use crate::types::{Judgment, JudgmentSource, SentenceId};

/// Identity of a (sentence, normalized translation) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub sentence_id: SentenceId,
    pub key_hash: String,
}

impl CacheKey {
    pub fn new(sentence_id: SentenceId, normalized_translation: &str) -> Self {
        let key_hash = hash_fields(&[&sentence_id.to_string(), normalized_translation]);
        Self {
            sentence_id,
            key_hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub normalized_translation: String,
    pub judgment: Judgment,
    /// Similarity at the time the entry was matched; 1.0 for judged entries.
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn new(key: CacheKey, normalized_translation: impl Into<String>, judgment: Judgment) -> Self {
        let now = Utc::now();
        Self {
            key,
            normalized_translation: normalized_translation.into(),
            judgment,
            confidence: 1.0,
            created_at: now,
            last_used_at: now,
            hit_count: 0,
        }
    }
}

/// A judgment served from one of the cache tiers.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub judgment: Judgment,
    pub source: JudgmentSource,
    /// 1.0 for exact hits; the blended similarity otherwise.
    pub confidence: f64,
    pub matched_key: CacheKey,
}

#[derive(Clone)]
pub struct JudgmentCache {
    store: Arc<dyn CacheStore>,
    matcher: SimilarityMatcher,
}

impl JudgmentCache {
    pub fn new(store: Arc<dyn CacheStore>, matcher: SimilarityMatcher) -> Self {
        Self { store, matcher }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn matcher(&self) -> &SimilarityMatcher {
        &self.matcher
    }

    /// Exact tier first, then the similarity tier restricted to the sentence.
    ///
    /// Similarity-derived judgments are returned but never written back.
    pub async fn lookup(
        &self,
        sentence_id: SentenceId,
        normalized: &str,
    ) -> Result<Option<CacheHit>, StoreError> {
        if normalized.is_empty() {
            return Ok(None);
        }

        let key = CacheKey::new(sentence_id, normalized);
        if let Some(entry) = self.store.get(&key).await? {
            debug!(sentence_id, key = %key.key_hash, hits = entry.hit_count, "exact cache hit");
            return Ok(Some(CacheHit {
                judgment: entry.judgment,
                source: JudgmentSource::Exact,
                confidence: 1.0,
                matched_key: key,
            }));
        }

        let candidates = self.store.entries_for_sentence(sentence_id).await?;
        let Some(found) = self.matcher.best_match(normalized, &candidates) else {
            return Ok(None);
        };
        debug!(
            sentence_id,
            similarity = found.similarity,
            matched = %found.entry.key.key_hash,
            "similarity cache hit"
        );
        let hit = CacheHit {
            judgment: self.matcher.adjust(&found.entry.judgment, found.similarity),
            source: JudgmentSource::Similarity,
            confidence: found.similarity,
            matched_key: found.entry.key.clone(),
        };
        self.store.record_hit(&hit.matched_key).await?;
        Ok(Some(hit))
    }

    /// Record a freshly judged translation in both tiers.
    pub async fn insert(
        &self,
        sentence_id: SentenceId,
        normalized: &str,
        judgment: &Judgment,
    ) -> Result<(), StoreError> {
        if normalized.is_empty() {
            return Ok(());
        }
        let key = CacheKey::new(sentence_id, normalized);
        let entry = CacheEntry::new(key, normalized, judgment.clone());
        self.store.put(&entry).await
    }
}

pub(crate) fn hash_fields(fields: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (idx, field) in fields.iter().enumerate() {
        if idx > 0 {
            hasher.update(b"|");
        }
        hasher.update(field.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_and_sentence_scoped() {
        let a = CacheKey::new(1, "bebo cafe");
        let b = CacheKey::new(1, "bebo cafe");
        let c = CacheKey::new(2, "bebo cafe");
        assert_eq!(a, b);
        assert_ne!(a.key_hash, c.key_hash);
    }

    #[test]
    fn field_separator_prevents_concatenation_collisions() {
        assert_ne!(hash_fields(&["1", "2x"]), hash_fields(&["12", "x"]));
    }
}
