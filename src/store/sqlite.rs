//! SQLite-backed store for cached judgments, score records and weakness
//! snapshots.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use super::{CacheStore, RecordStore, StoreError};
use crate::cache::{CacheEntry, CacheKey};
use crate::config::CacheConfig;
use crate::scoring::{IndependenceClass, ScoreRecord};
use crate::types::{Judgment, JudgmentSource, SentenceId};
use crate::weakness::WeaknessEntry;

const SCHEMA: &str = "PRAGMA journal_mode=WAL;\
     PRAGMA synchronous=NORMAL;\
     CREATE TABLE IF NOT EXISTS cache_entries (\
       key_hash TEXT PRIMARY KEY,\
       sentence_id INTEGER NOT NULL,\
       normalized_translation TEXT NOT NULL,\
       judgment_json TEXT NOT NULL,\
       confidence REAL NOT NULL,\
       created_at INTEGER NOT NULL,\
       last_used_at INTEGER NOT NULL,\
       hit_count INTEGER NOT NULL DEFAULT 0\
     );\
     CREATE INDEX IF NOT EXISTS idx_cache_sentence ON cache_entries(sentence_id);\
     CREATE TABLE IF NOT EXISTS score_records (\
       id TEXT PRIMARY KEY,\
       user_id TEXT NOT NULL,\
       sentence_id INTEGER NOT NULL,\
       session_id TEXT NOT NULL,\
       raw_score REAL NOT NULL,\
       final_score REAL NOT NULL,\
       independence TEXT NOT NULL,\
       hint_cost_total REAL NOT NULL,\
       judgment_source TEXT NOT NULL,\
       created_at INTEGER NOT NULL\
     );\
     CREATE INDEX IF NOT EXISTS idx_scores_user ON score_records(user_id);\
     CREATE TABLE IF NOT EXISTS applied_records (\
       record_id TEXT PRIMARY KEY,\
       applied_at INTEGER NOT NULL\
     );\
     CREATE TABLE IF NOT EXISTS weakness_log (\
       seq INTEGER PRIMARY KEY AUTOINCREMENT,\
       user_id TEXT NOT NULL,\
       concept TEXT NOT NULL,\
       hint_requests INTEGER NOT NULL,\
       total_exposures INTEGER NOT NULL,\
       weakness_score REAL NOT NULL,\
       last_exposure_at INTEGER NOT NULL,\
       next_review_at INTEGER NOT NULL\
     );\
     CREATE INDEX IF NOT EXISTS idx_weakness_user_concept ON weakness_log(user_id, concept);";

#[derive(Clone)]
pub struct SqliteStore {
    path: PathBuf,
    ttl: chrono::Duration,
    max_entries: usize,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(path: impl AsRef<Path>, config: &CacheConfig) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            path,
            ttl: config.ttl(),
            max_entries: config.max_entries.max(1),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("TRANSLATION_JUDGE_DB") {
            return PathBuf::from(path);
        }
        PathBuf::from(".translation_judge.sqlite")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exclusive maintenance lock on a sibling `.lock` file.
    pub fn lock_exclusive(&self) -> Result<StoreLock, StoreError> {
        StoreLock::new(&self.path)
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError>,
    {
        let guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&guard)
    }

    async fn blocking<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_conn(f))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    fn ttl_cutoff(&self, now: DateTime<Utc>) -> i64 {
        (now - self.ttl).timestamp_millis()
    }
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_entry(row: &Row<'_>) -> Result<CacheEntry, StoreError> {
    let judgment_json: String = row.get(3)?;
    let judgment: Judgment =
        serde_json::from_str(&judgment_json).map_err(|e| StoreError::Serde(e.to_string()))?;
    Ok(CacheEntry {
        key: CacheKey {
            key_hash: row.get(0)?,
            sentence_id: row.get(1)?,
        },
        normalized_translation: row.get(2)?,
        judgment,
        confidence: row.get(4)?,
        created_at: from_millis(row.get(5)?),
        last_used_at: from_millis(row.get(6)?),
        hit_count: row.get::<_, i64>(7)?.max(0) as u64,
    })
}

const ENTRY_COLUMNS: &str = "key_hash, sentence_id, normalized_translation, judgment_json, \
     confidence, created_at, last_used_at, hit_count";

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let key_hash = key.key_hash.clone();
        let now = Utc::now();
        let cutoff = self.ttl_cutoff(now);
        self.blocking(move |conn| {
            let updated = conn.execute(
                "UPDATE cache_entries SET hit_count = hit_count + 1, last_used_at = ?1 \
                 WHERE key_hash = ?2 AND created_at >= ?3",
                params![to_millis(now), key_hash, cutoff],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM cache_entries WHERE key_hash = ?1"
            ))?;
            let mut rows = stmt.query(params![key_hash])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_entry(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let entry = entry.clone();
        let judgment_json =
            serde_json::to_string(&entry.judgment).map_err(|e| StoreError::Serde(e.to_string()))?;
        let max_entries = self.max_entries as i64;
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO cache_entries (\
                    key_hash, sentence_id, normalized_translation, judgment_json,\
                    confidence, created_at, last_used_at, hit_count\
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)\
                 ON CONFLICT(key_hash) DO UPDATE SET \
                    judgment_json = excluded.judgment_json,\
                    confidence = excluded.confidence,\
                    created_at = excluded.created_at,\
                    last_used_at = excluded.last_used_at",
                params![
                    entry.key.key_hash,
                    entry.key.sentence_id,
                    entry.normalized_translation,
                    judgment_json,
                    entry.confidence,
                    to_millis(entry.created_at),
                    to_millis(entry.last_used_at),
                    entry.hit_count as i64,
                ],
            )?;
            conn.execute(
                "DELETE FROM cache_entries WHERE key_hash IN (\
                    SELECT key_hash FROM cache_entries \
                    ORDER BY last_used_at DESC LIMIT -1 OFFSET ?1\
                 )",
                params![max_entries],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_hit(&self, key: &CacheKey) -> Result<(), StoreError> {
        let key_hash = key.key_hash.clone();
        let now = to_millis(Utc::now());
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE cache_entries SET hit_count = hit_count + 1, last_used_at = ?1 \
                 WHERE key_hash = ?2",
                params![now, key_hash],
            )?;
            Ok(())
        })
        .await
    }

    async fn entries_for_sentence(
        &self,
        sentence_id: SentenceId,
    ) -> Result<Vec<CacheEntry>, StoreError> {
        let cutoff = self.ttl_cutoff(Utc::now());
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM cache_entries \
                 WHERE sentence_id = ?1 AND created_at >= ?2 ORDER BY key_hash"
            ))?;
            let mut rows = stmt.query(params![sentence_id, cutoff])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_entry(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = self.ttl_cutoff(now);
        self.blocking(move |conn| {
            Ok(conn.execute(
                "DELETE FROM cache_entries WHERE created_at < ?1",
                params![cutoff],
            )?)
        })
        .await
    }
}

fn row_to_score(row: &Row<'_>) -> Result<ScoreRecord, StoreError> {
    let id: String = row.get(0)?;
    let independence: String = row.get(6)?;
    let source: String = row.get(8)?;
    Ok(ScoreRecord {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::Serde(e.to_string()))?,
        user_id: row.get(1)?,
        sentence_id: row.get(2)?,
        session_id: row.get(3)?,
        raw_score: row.get(4)?,
        final_score: row.get(5)?,
        independence: IndependenceClass::from_str(&independence)
            .ok_or_else(|| StoreError::Serde(format!("unknown independence class: {independence}")))?,
        hint_cost_total: row.get(7)?,
        judgment_source: JudgmentSource::from_str(&source)
            .ok_or_else(|| StoreError::Serde(format!("unknown judgment source: {source}")))?,
        created_at: from_millis(row.get(9)?),
    })
}

fn row_to_weakness(row: &Row<'_>) -> Result<WeaknessEntry, rusqlite::Error> {
    Ok(WeaknessEntry {
        user_id: row.get(0)?,
        concept: row.get(1)?,
        hint_requests: row.get::<_, i64>(2)?.max(0) as u64,
        total_exposures: row.get::<_, i64>(3)?.max(0) as u64,
        weakness_score: row.get(4)?,
        last_exposure_at: from_millis(row.get(5)?),
        next_review_at: from_millis(row.get(6)?),
    })
}

const WEAKNESS_COLUMNS: &str = "user_id, concept, hint_requests, total_exposures, \
     weakness_score, last_exposure_at, next_review_at";

#[async_trait]
impl RecordStore for SqliteStore {
    async fn append_score(&self, record: &ScoreRecord) -> Result<bool, StoreError> {
        let record = record.clone();
        self.blocking(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO score_records (\
                    id, user_id, sentence_id, session_id, raw_score, final_score,\
                    independence, hint_cost_total, judgment_source, created_at\
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id.to_string(),
                    record.user_id,
                    record.sentence_id,
                    record.session_id,
                    record.raw_score,
                    record.final_score,
                    record.independence.as_str(),
                    record.hint_cost_total,
                    record.judgment_source.as_str(),
                    to_millis(record.created_at),
                ],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn scores_for_user(&self, user_id: &str) -> Result<Vec<ScoreRecord>, StoreError> {
        let user_id = user_id.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, sentence_id, session_id, raw_score, final_score,\
                        independence, hint_cost_total, judgment_source, created_at \
                 FROM score_records WHERE user_id = ?1 ORDER BY created_at, id",
            )?;
            let mut rows = stmt.query(params![user_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_score(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn apply_weakness(
        &self,
        record_id: Uuid,
        entries: &[WeaknessEntry],
    ) -> Result<bool, StoreError> {
        let entries = entries.to_vec();
        self.blocking(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO applied_records (record_id, applied_at) VALUES (?1, ?2)",
                params![record_id.to_string(), to_millis(Utc::now())],
            )?;
            if inserted == 0 {
                return Ok(false);
            }
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO weakness_log ({WEAKNESS_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ))?;
                for entry in &entries {
                    stmt.execute(params![
                        entry.user_id,
                        entry.concept,
                        entry.hint_requests as i64,
                        entry.total_exposures as i64,
                        entry.weakness_score,
                        to_millis(entry.last_exposure_at),
                        to_millis(entry.next_review_at),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn latest_weakness(
        &self,
        user_id: &str,
        concept: &str,
    ) -> Result<Option<WeaknessEntry>, StoreError> {
        let user_id = user_id.to_string();
        let concept = concept.to_string();
        self.blocking(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {WEAKNESS_COLUMNS} FROM weakness_log \
                         WHERE user_id = ?1 AND concept = ?2 ORDER BY seq DESC LIMIT 1"
                    ),
                    params![user_id, concept],
                    row_to_weakness,
                )
                .optional()?)
        })
        .await
    }

    async fn weaknesses_for_user(&self, user_id: &str) -> Result<Vec<WeaknessEntry>, StoreError> {
        let user_id = user_id.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {WEAKNESS_COLUMNS} FROM weakness_log w \
                 WHERE user_id = ?1 AND seq = (\
                    SELECT MAX(seq) FROM weakness_log \
                    WHERE user_id = w.user_id AND concept = w.concept\
                 ) ORDER BY concept"
            ))?;
            let rows = stmt.query_map(params![user_id], row_to_weakness)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }
}

#[derive(Debug)]
pub struct StoreLock {
    _file: std::fs::File,
}

impl StoreLock {
    fn new(db_path: &Path) -> Result<Self, StoreError> {
        let mut lock_path = db_path.to_path_buf();
        lock_path.set_extension("lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}

#[derive(Debug, Serialize)]
pub struct CacheExportRow {
    pub key_hash: String,
    pub sentence_id: SentenceId,
    pub normalized_translation: String,
    pub judgment: Judgment,
    pub confidence: f64,
    pub created_at: i64,
    pub last_used_at: i64,
    pub hit_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorePruneStats {
    pub deleted: usize,
    pub remaining: usize,
}

impl SqliteStore {
    /// Write every cache row as one JSON object per line, most recently used first.
    pub async fn export_jsonl(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref().to_path_buf();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM cache_entries ORDER BY last_used_at DESC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut file = std::fs::File::create(path)?;
            while let Some(row) = rows.next()? {
                let entry = row_to_entry(row)?;
                let record = CacheExportRow {
                    key_hash: entry.key.key_hash,
                    sentence_id: entry.key.sentence_id,
                    normalized_translation: entry.normalized_translation,
                    judgment: entry.judgment,
                    confidence: entry.confidence,
                    created_at: to_millis(entry.created_at),
                    last_used_at: to_millis(entry.last_used_at),
                    hit_count: entry.hit_count as i64,
                };
                let line =
                    serde_json::to_string(&record).map_err(|e| StoreError::Serde(e.to_string()))?;
                use std::io::Write;
                writeln!(file, "{line}")?;
            }
            Ok(())
        })
        .await
    }

    /// Delete cache rows older than `max_age_days` and/or beyond `max_rows`
    /// (keeping the most recently used).
    pub async fn prune(
        &self,
        max_age_days: Option<u64>,
        max_rows: Option<usize>,
    ) -> Result<StorePruneStats, StoreError> {
        self.blocking(move |conn| {
            let mut deleted: usize = 0;
            if let Some(days) = max_age_days {
                let cutoff = to_millis(Utc::now())
                    .saturating_sub((days as i64).saturating_mul(86_400_000));
                let removed = conn.execute(
                    "DELETE FROM cache_entries WHERE created_at < ?1",
                    params![cutoff],
                )?;
                deleted = deleted.saturating_add(removed);
            }

            if let Some(max_rows) = max_rows {
                let removed = conn.execute(
                    "DELETE FROM cache_entries WHERE key_hash IN (\
                        SELECT key_hash FROM cache_entries \
                        ORDER BY last_used_at DESC LIMIT -1 OFFSET ?1\
                     )",
                    params![max_rows as i64],
                )?;
                deleted = deleted.saturating_add(removed);
            }

            let remaining: i64 =
                conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
            Ok(StorePruneStats {
                deleted,
                remaining: remaining.max(0) as usize,
            })
        })
        .await
    }
}
