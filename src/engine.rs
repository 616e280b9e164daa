//! Request orchestration: normalize, look up, judge, score, record.
//!
//! ```text
//! evaluate: normalize -> exact tier -> similarity tier
//!             -> (miss) single-flight guarded judge -> cache write
//!             -> (timeout/failure) heuristic fallback, not cached
//!           -> finalize hint ledger -> score -> append record
//!           -> queue weakness update
//! ```
//!
//! A periodic maintenance sweep drops expired cache entries and releases hint
//! ledgers of attempts that were never evaluated.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, JudgmentCache};
use crate::catalog::{SentenceCatalog, SentenceInfo};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::hints::{HintEngine, HintRequest, HintResponse, LedgerKey, LedgerSnapshot};
use crate::inflight::InFlightDeduper;
use crate::judge::{GuardedJudge, HeuristicJudge, JudgeGateway, JudgeOutcome, JudgeRequest};
use crate::normalize::normalize;
use crate::scoring::{IndependenceClass, ScoreCalculator, ScoreRecord};
use crate::similarity::SimilarityMatcher;
use crate::store::{CacheStore, RecordStore};
use crate::types::{Judgment, JudgmentSource, SentenceId, SessionId, UserId};
use crate::weakness::{ConceptUsage, EvaluationEvent, WeaknessSink};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub sentence_id: SentenceId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub raw_translation: String,
    /// Falls back to the catalog's answers when empty.
    #[serde(default)]
    pub expected_answers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateResponse {
    pub record_id: Uuid,
    pub raw_score: f64,
    pub final_score: f64,
    pub independence_class: IndependenceClass,
    pub feedback_text: String,
    pub alternative_answers: Vec<String>,
    pub cached: bool,
    pub cache_source: JudgmentSource,
    pub hint_cost_total: f64,
}

/// What one maintenance sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceStats {
    pub expired_entries: usize,
    pub released_ledgers: usize,
}

pub struct EvaluationEngine {
    config: EngineConfig,
    cache: Arc<JudgmentCache>,
    judge: GuardedJudge,
    fallback: HeuristicJudge,
    inflight: InFlightDeduper<CacheKey, JudgeOutcome>,
    hints: HintEngine,
    scorer: ScoreCalculator,
    records: Arc<dyn RecordStore>,
    catalog: Arc<dyn SentenceCatalog>,
    weakness: Option<WeaknessSink>,
}

impl EvaluationEngine {
    pub fn new(
        config: EngineConfig,
        cache_store: Arc<dyn CacheStore>,
        records: Arc<dyn RecordStore>,
        judge: Arc<dyn JudgeGateway>,
        catalog: Arc<dyn SentenceCatalog>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let matcher = SimilarityMatcher::new(config.similarity.clone());
        Ok(Self {
            cache: Arc::new(JudgmentCache::new(cache_store, matcher.clone())),
            judge: GuardedJudge::new(judge, config.judge.clone()),
            fallback: HeuristicJudge::new(matcher),
            inflight: InFlightDeduper::new(),
            hints: HintEngine::new(config.hints.clone(), catalog.clone()),
            scorer: ScoreCalculator::new(config.scoring.clone()),
            records,
            catalog,
            weakness: None,
            config,
        })
    }

    /// Queue every finalized evaluation for weakness tracking.
    pub fn with_weakness_sink(mut self, sink: WeaknessSink) -> Self {
        self.weakness = Some(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn hints(&self) -> &HintEngine {
        &self.hints
    }

    pub fn cache(&self) -> &JudgmentCache {
        &self.cache
    }

    /// Judge calls currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Drop expired cache entries and release hint ledgers idle for longer
    /// than `limits.ledger_idle_minutes`.
    pub async fn run_maintenance(&self) -> MaintenanceStats {
        let expired_entries = match self.cache.store().evict_expired(Utc::now()).await {
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "cache expiry sweep failed");
                0
            }
        };
        let released_ledgers = self.hints.release_idle(self.config.limits.ledger_idle());
        if expired_entries > 0 || released_ledgers > 0 {
            info!(expired_entries, released_ledgers, "maintenance sweep");
        }
        MaintenanceStats {
            expired_entries,
            released_ledgers,
        }
    }

    /// Run [`Self::run_maintenance`] every `limits.maintenance_interval_secs`.
    /// The task ends once the engine is dropped.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        let mut ticker = tokio::time::interval(self.config.limits.maintenance_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::spawn(async move {
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    debug!("engine dropped, maintenance stopped");
                    break;
                };
                engine.run_maintenance().await;
            }
        })
    }

    pub async fn request_hint(&self, req: &HintRequest) -> Result<HintResponse, EngineError> {
        Ok(self.hints.request_hint(req).await?)
    }

    pub async fn evaluate(&self, req: EvaluateRequest) -> Result<EvaluateResponse, EngineError> {
        self.validate(&req)?;

        let sentence = self.catalog.sentence(req.sentence_id).await;
        let expected_answers = if req.expected_answers.is_empty() {
            sentence
                .as_ref()
                .map(|s| s.expected_answers.clone())
                .unwrap_or_default()
        } else {
            req.expected_answers.clone()
        };

        let normalized = normalize(&req.raw_translation);
        let (judgment, source) = match self.lookup(req.sentence_id, &normalized).await {
            Lookup::Hit(judgment, source) => (judgment, source),
            Lookup::Miss { cacheable } => {
                let mut judge_req =
                    JudgeRequest::new(req.sentence_id, req.raw_translation.clone(), expected_answers.clone());
                if let Some(s) = &sentence {
                    judge_req = judge_req.with_source(s.source_text.clone());
                }
                self.judge_fresh(judge_req, &normalized, cacheable).await
            }
        };

        let key = LedgerKey::new(req.user_id.clone(), req.sentence_id, req.session_id.clone());
        let ledger = self.hints.finalize(&key).await;
        let outcome = self.scorer.finalize(&judgment, &ledger);
        let record = ScoreRecord::new(
            req.user_id.clone(),
            req.sentence_id,
            req.session_id.clone(),
            &outcome,
            source,
        );

        if let Err(err) = self.records.append_score(&record).await {
            warn!(error = %err, record_id = %record.id, "failed to append score record");
        }
        self.queue_weakness(&record, sentence.as_deref(), &ledger);

        info!(
            sentence_id = req.sentence_id,
            user_id = %req.user_id,
            source = source.as_str(),
            final_score = outcome.final_score,
            independence = outcome.independence.as_str(),
            "evaluation finished"
        );

        Ok(EvaluateResponse {
            record_id: record.id,
            raw_score: outcome.raw_score,
            final_score: outcome.final_score,
            independence_class: outcome.independence,
            feedback_text: judgment.feedback_text,
            alternative_answers: judgment.alternative_answers,
            cached: source.is_cached(),
            cache_source: source,
            hint_cost_total: outcome.hint_cost_total,
        })
    }

    fn validate(&self, req: &EvaluateRequest) -> Result<(), EngineError> {
        if req.user_id.trim().is_empty() {
            return Err(EngineError::invalid("user_id must not be empty"));
        }
        if req.session_id.trim().is_empty() {
            return Err(EngineError::invalid("session_id must not be empty"));
        }
        let max = self.config.limits.max_translation_chars;
        let len = req.raw_translation.chars().count();
        if len > max {
            return Err(EngineError::invalid(format!(
                "translation is {len} characters (max {max})"
            )));
        }
        Ok(())
    }

    async fn lookup(&self, sentence_id: SentenceId, normalized: &str) -> Lookup {
        match self.cache.lookup(sentence_id, normalized).await {
            Ok(Some(hit)) => Lookup::Hit(hit.judgment, hit.source),
            Ok(None) => Lookup::Miss { cacheable: true },
            Err(err) => {
                warn!(error = %err, sentence_id, "cache store unavailable, judging without cache");
                Lookup::Miss { cacheable: false }
            }
        }
    }

    async fn judge_fresh(
        &self,
        req: JudgeRequest,
        normalized: &str,
        cacheable: bool,
    ) -> (Judgment, JudgmentSource) {
        let key = CacheKey::new(req.sentence_id, normalized);
        let judge = self.judge.clone();
        let cache = Arc::clone(&self.cache);
        let normalized_owned = normalized.to_string();
        let task_req = req.clone();

        let outcome = self
            .inflight
            .run(key, move || async move {
                let outcome = judge.call(&task_req).await;
                if let (JudgeOutcome::Judged(judgment), true) = (&outcome, cacheable) {
                    if let Err(err) = cache
                        .insert(task_req.sentence_id, &normalized_owned, judgment)
                        .await
                    {
                        warn!(error = %err, sentence_id = task_req.sentence_id, "failed to cache judgment");
                    }
                }
                outcome
            })
            .await;

        match outcome {
            Ok(deduped) => {
                if deduped.joined {
                    debug!(sentence_id = req.sentence_id, "shared an in-flight judgment");
                }
                match deduped.value {
                    JudgeOutcome::Judged(judgment) => (judgment, JudgmentSource::Fresh),
                    JudgeOutcome::TimedOut | JudgeOutcome::Failed(_) => self.fallback_judgment(&req),
                }
            }
            Err(err) => {
                warn!(error = %err, sentence_id = req.sentence_id, "in-flight judge task failed");
                self.fallback_judgment(&req)
            }
        }
    }

    fn fallback_judgment(&self, req: &JudgeRequest) -> (Judgment, JudgmentSource) {
        warn!(sentence_id = req.sentence_id, "using heuristic fallback judgment");
        (
            self.fallback.evaluate(&req.translation, &req.expected_answers),
            JudgmentSource::Fallback,
        )
    }

    fn queue_weakness(
        &self,
        record: &ScoreRecord,
        sentence: Option<&SentenceInfo>,
        ledger: &LedgerSnapshot,
    ) {
        let (Some(sink), Some(sentence)) = (&self.weakness, sentence) else {
            return;
        };
        let concepts = concept_usage(sentence, ledger);
        if concepts.is_empty() {
            return;
        }
        let event = EvaluationEvent {
            record: record.clone(),
            concepts,
        };
        if let Err(err) = sink.record(event) {
            warn!(error = %err, record_id = %record.id, "weakness update dropped");
        }
    }
}

enum Lookup {
    Hit(Judgment, JudgmentSource),
    Miss { cacheable: bool },
}

/// Every concept on the sentence, flagged when a hinted word touches it.
pub fn concept_usage(sentence: &SentenceInfo, ledger: &LedgerSnapshot) -> Vec<ConceptUsage> {
    let hinted: Vec<String> = ledger
        .hinted_words()
        .into_iter()
        .flat_map(|idx| sentence.concepts_for_word(idx))
        .collect();
    sentence
        .all_concepts()
        .into_iter()
        .map(|concept| ConceptUsage {
            hinted: hinted.contains(&concept),
            concept,
        })
        .collect()
}
