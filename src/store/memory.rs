//! In-process store implementations.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{CacheStore, RecordStore, StoreError};
use crate::cache::{CacheEntry, CacheKey};
use crate::config::CacheConfig;
use crate::scoring::ScoreRecord;
use crate::types::SentenceId;
use crate::weakness::WeaknessEntry;

#[derive(Default)]
struct CacheArena {
    entries: HashMap<String, (CacheEntry, u64)>,
    by_sentence: HashMap<SentenceId, HashSet<String>>,
    /// Access tick -> key hash, oldest first.
    recency: BTreeMap<u64, String>,
    tick: u64,
}

impl CacheArena {
    fn touch(&mut self, key_hash: &str) {
        self.tick += 1;
        let tick = self.tick;
        if let Some((_, old)) = self.entries.get_mut(key_hash) {
            self.recency.remove(old);
            *old = tick;
            self.recency.insert(tick, key_hash.to_string());
        }
    }

    fn remove(&mut self, key_hash: &str) -> Option<CacheEntry> {
        let (entry, tick) = self.entries.remove(key_hash)?;
        self.recency.remove(&tick);
        if let Some(set) = self.by_sentence.get_mut(&entry.key.sentence_id) {
            set.remove(key_hash);
            if set.is_empty() {
                self.by_sentence.remove(&entry.key.sentence_id);
            }
        }
        Some(entry)
    }

    fn evict_lru(&mut self) {
        if let Some((_, key_hash)) = self.recency.pop_first() {
            self.remove(&key_hash);
        }
    }
}

/// Arena of cache entries owned by one engine instance.
pub struct InMemoryCacheStore {
    ttl: chrono::Duration,
    max_entries: usize,
    arena: Mutex<CacheArena>,
}

impl InMemoryCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            ttl: config.ttl(),
            max_entries: config.max_entries.max(1),
            arena: Mutex::new(CacheArena::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.arena.lock().map(|a| a.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.created_at > self.ttl
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let mut arena = self.arena.lock().map_err(|_| StoreError::Poisoned)?;
        let now = Utc::now();
        let expired = match arena.entries.get(&key.key_hash) {
            None => return Ok(None),
            Some((entry, _)) => self.expired(entry, now),
        };
        if expired {
            arena.remove(&key.key_hash);
            return Ok(None);
        }
        arena.touch(&key.key_hash);
        let Some((entry, _)) = arena.entries.get_mut(&key.key_hash) else {
            return Ok(None);
        };
        entry.hit_count += 1;
        entry.last_used_at = now;
        Ok(Some(entry.clone()))
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let mut arena = self.arena.lock().map_err(|_| StoreError::Poisoned)?;
        let key_hash = entry.key.key_hash.clone();
        arena.remove(&key_hash);
        arena.tick += 1;
        let tick = arena.tick;
        arena.recency.insert(tick, key_hash.clone());
        arena
            .by_sentence
            .entry(entry.key.sentence_id)
            .or_default()
            .insert(key_hash.clone());
        arena.entries.insert(key_hash, (entry.clone(), tick));
        while arena.entries.len() > self.max_entries {
            arena.evict_lru();
        }
        Ok(())
    }

    async fn record_hit(&self, key: &CacheKey) -> Result<(), StoreError> {
        let mut arena = self.arena.lock().map_err(|_| StoreError::Poisoned)?;
        arena.touch(&key.key_hash);
        if let Some((entry, _)) = arena.entries.get_mut(&key.key_hash) {
            entry.hit_count += 1;
            entry.last_used_at = Utc::now();
        }
        Ok(())
    }

    async fn entries_for_sentence(
        &self,
        sentence_id: SentenceId,
    ) -> Result<Vec<CacheEntry>, StoreError> {
        let arena = self.arena.lock().map_err(|_| StoreError::Poisoned)?;
        let now = Utc::now();
        let Some(keys) = arena.by_sentence.get(&sentence_id) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<CacheEntry> = keys
            .iter()
            .filter_map(|k| arena.entries.get(k))
            .map(|(entry, _)| entry)
            .filter(|entry| !self.expired(entry, now))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.key.key_hash.cmp(&b.key.key_hash));
        Ok(out)
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut arena = self.arena.lock().map_err(|_| StoreError::Poisoned)?;
        let stale: Vec<String> = arena
            .entries
            .iter()
            .filter(|(_, (entry, _))| self.expired(entry, now))
            .map(|(k, _)| k.clone())
            .collect();
        for key_hash in &stale {
            arena.remove(key_hash);
        }
        Ok(stale.len())
    }
}

#[derive(Default)]
struct RecordLog {
    scores: Vec<ScoreRecord>,
    score_ids: HashSet<Uuid>,
    applied: HashSet<Uuid>,
    weakness_log: Vec<WeaknessEntry>,
    /// (user, concept) -> index of the latest snapshot in `weakness_log`.
    latest: HashMap<(String, String), usize>,
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    log: Mutex<RecordLog>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn append_score(&self, record: &ScoreRecord) -> Result<bool, StoreError> {
        let mut log = self.log.lock().map_err(|_| StoreError::Poisoned)?;
        if !log.score_ids.insert(record.id) {
            return Ok(false);
        }
        log.scores.push(record.clone());
        Ok(true)
    }

    async fn scores_for_user(&self, user_id: &str) -> Result<Vec<ScoreRecord>, StoreError> {
        let log = self.log.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(log
            .scores
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn apply_weakness(
        &self,
        record_id: Uuid,
        entries: &[WeaknessEntry],
    ) -> Result<bool, StoreError> {
        let mut log = self.log.lock().map_err(|_| StoreError::Poisoned)?;
        if !log.applied.insert(record_id) {
            return Ok(false);
        }
        for entry in entries {
            log.weakness_log.push(entry.clone());
            let idx = log.weakness_log.len() - 1;
            log.latest
                .insert((entry.user_id.clone(), entry.concept.clone()), idx);
        }
        Ok(true)
    }

    async fn latest_weakness(
        &self,
        user_id: &str,
        concept: &str,
    ) -> Result<Option<WeaknessEntry>, StoreError> {
        let log = self.log.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(log
            .latest
            .get(&(user_id.to_string(), concept.to_string()))
            .and_then(|idx| log.weakness_log.get(*idx))
            .cloned())
    }

    async fn weaknesses_for_user(&self, user_id: &str) -> Result<Vec<WeaknessEntry>, StoreError> {
        let log = self.log.lock().map_err(|_| StoreError::Poisoned)?;
        let mut out: Vec<WeaknessEntry> = log
            .latest
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .filter_map(|(_, idx)| log.weakness_log.get(*idx))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.concept.cmp(&b.concept));
        Ok(out)
    }
}
