//! Persistence seams: a key-value store for cache entries and an
//! append-only log for score records and weakness snapshots.
//!
//! The engine only talks to these traits. `memory` backs tests and embedded
//! use; `sqlite` is the durable implementation.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cache::{CacheEntry, CacheKey};
use crate::scoring::ScoreRecord;
use crate::types::SentenceId;
use crate::weakness::WeaknessEntry;

pub use memory::{InMemoryCacheStore, InMemoryRecordStore};
pub use sqlite::{CacheExportRow, SqliteStore, StoreLock, StorePruneStats};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry, counting the read as a hit.
    ///
    /// Entries past their TTL are treated as absent.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or replace an entry, evicting least recently used entries
    /// beyond capacity.
    async fn put(&self, entry: &CacheEntry) -> Result<(), StoreError>;

    /// Count a hit on an entry served through the similarity tier.
    async fn record_hit(&self, key: &CacheKey) -> Result<(), StoreError>;

    /// Live entries for one sentence, the similarity tier's search space.
    async fn entries_for_sentence(
        &self,
        sentence_id: SentenceId,
    ) -> Result<Vec<CacheEntry>, StoreError>;

    /// Drop every entry created before `now - ttl`. Returns the number removed.
    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append a finalized score. Returns `false` if the id was already logged.
    async fn append_score(&self, record: &ScoreRecord) -> Result<bool, StoreError>;

    async fn scores_for_user(&self, user_id: &str) -> Result<Vec<ScoreRecord>, StoreError>;

    /// Mark a score record as folded into weakness stats and append the new
    /// snapshots, all or nothing. Returns `false`, writing nothing, if the
    /// record had already been applied.
    async fn apply_weakness(
        &self,
        record_id: Uuid,
        entries: &[WeaknessEntry],
    ) -> Result<bool, StoreError>;

    /// Latest snapshot for a (user, concept) pair.
    async fn latest_weakness(
        &self,
        user_id: &str,
        concept: &str,
    ) -> Result<Option<WeaknessEntry>, StoreError>;

    /// Latest snapshot of every concept for a user.
    async fn weaknesses_for_user(&self, user_id: &str) -> Result<Vec<WeaknessEntry>, StoreError>;
}
