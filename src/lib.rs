#![forbid(unsafe_code)]

//! # translation-judge
//!
//! Grading and progressive-hint scoring for translation exercises.
//!
//! Each attempt goes through a three-tier lookup: an exact cache keyed on the
//! normalized translation, a similarity tier that reuses near-duplicate
//! judgments with a small penalty, and finally an external judge guarded by a
//! timeout, a single retry and a local heuristic fallback. Concurrent misses
//! for the same translation share one judge call.
//!
//! Hints are revealed one level at a time per word and each reveal is charged
//! against the attempt's score. Finished attempts feed a per-concept weakness
//! tracker that schedules reviews.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod hints;
pub mod inflight;
pub mod judge;
pub mod normalize;
pub mod prompts;
pub mod scoring;
pub mod similarity;
pub mod store;
pub mod types;
pub mod weakness;

pub use cache::{CacheEntry, CacheHit, CacheKey, JudgmentCache};
pub use catalog::{InMemoryCatalog, SentenceCatalog, SentenceInfo};
pub use config::{ConfigError, EngineConfig};
pub use engine::{EvaluateRequest, EvaluateResponse, EvaluationEngine, MaintenanceStats};
pub use error::EngineError;
pub use gateway::{ChatGateway, OpenRouterAdapter, ProviderError};
pub use hints::{HintContent, HintEngine, HintError, HintRequest, HintResponse, LedgerKey};
pub use inflight::InFlightDeduper;
pub use judge::{
    GuardedJudge, HeuristicJudge, JudgeError, JudgeGateway, JudgeOutcome, JudgeRequest, LlmJudge,
};
pub use normalize::normalize;
pub use scoring::{IndependenceClass, ScoreCalculator, ScoreOutcome, ScoreRecord};
pub use similarity::SimilarityMatcher;
pub use store::{
    CacheStore, InMemoryCacheStore, InMemoryRecordStore, RecordStore, SqliteStore, StoreError,
};
pub use types::{Judgment, JudgmentSource, ScoreComponents};
pub use weakness::{
    ConceptUsage, EvaluationEvent, WeaknessAggregator, WeaknessEntry, WeaknessError, WeaknessSink,
    WeaknessWorker,
};
