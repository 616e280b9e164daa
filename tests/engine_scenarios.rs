mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::*;
use translation_judge::cache::{CacheEntry, CacheKey};
use translation_judge::config::EngineConfig;
use translation_judge::engine::{EvaluationEngine, MaintenanceStats};
use translation_judge::error::EngineError;
use translation_judge::hints::LedgerKey;
use translation_judge::scoring::IndependenceClass;
use translation_judge::store::{CacheStore, InMemoryRecordStore, RecordStore, StoreError};
use translation_judge::types::{JudgmentSource, ScoreComponents, SentenceId};

#[tokio::test]
async fn perfect_answer_without_hints_is_independent_ten() {
    let judge = ScriptedJudge::answering(perfect());
    let h = harness(judge.clone());

    let resp = h
        .engine
        .evaluate(eval(1, "ana", "s1", "Bebo café cada mañana"))
        .await
        .unwrap();

    assert_eq!(resp.final_score, 10.0);
    assert_eq!(resp.independence_class, IndependenceClass::Independent);
    assert_eq!(resp.cache_source, JudgmentSource::Fresh);
    assert!(!resp.cached);
    assert_eq!(resp.hint_cost_total, 0.0);
    assert_eq!(resp.feedback_text, "¡Perfecto!");
    assert_eq!(judge.calls(), 1);

    let records = h.records.scores_for_user("ana").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, resp.record_id);
    assert_eq!(records[0].final_score, 10.0);
}

#[tokio::test]
async fn repeated_answer_is_served_from_exact_cache() {
    let judge = ScriptedJudge::answering(perfect());
    let h = harness(judge.clone());

    h.engine
        .evaluate(eval(1, "ana", "s1", "Bebo café cada mañana"))
        .await
        .unwrap();
    let again = h
        .engine
        .evaluate(eval(1, "luis", "s9", "  bebo CAFE cada manana. "))
        .await
        .unwrap();

    assert_eq!(again.cache_source, JudgmentSource::Exact);
    assert!(again.cached);
    assert_eq!(again.final_score, 10.0);
    assert_eq!(judge.calls(), 1);
}

#[tokio::test]
async fn verb_and_choice_hints_make_a_strategic_seven_and_a_half() {
    let judge = ScriptedJudge::answering(perfect());
    let h = harness(judge);

    let l1 = h.engine.request_hint(&hint(1, "ana", "s1", 0, 1)).await.unwrap();
    assert_eq!(l1.cost_incurred, 1.0);
    let mc = h.engine.request_hint(&hint(1, "ana", "s1", 1, 1)).await.unwrap();
    assert_eq!(mc.cost_incurred, 1.5);
    assert_eq!(mc.cumulative_cost, 2.5);

    let resp = h
        .engine
        .evaluate(eval(1, "ana", "s1", "Bebo café cada mañana"))
        .await
        .unwrap();
    assert_eq!(resp.final_score, 7.5);
    assert_eq!(resp.hint_cost_total, 2.5);
    assert_eq!(resp.independence_class, IndependenceClass::Strategic);

    // The attempt's ledger is gone once scored.
    assert!(!h.engine.hints().has_ledger(&LedgerKey::new("ana", 1, "s1")));
    let next = h
        .engine
        .evaluate(eval(1, "ana", "s1", "Bebo café cada mañana"))
        .await
        .unwrap();
    assert_eq!(next.final_score, 10.0);
}

#[tokio::test]
async fn hints_only_charge_their_own_attempt() {
    let judge = ScriptedJudge::answering(perfect());
    let h = harness(judge);

    h.engine.request_hint(&hint(1, "ana", "s1", 0, 1)).await.unwrap();
    let other_session = h
        .engine
        .evaluate(eval(1, "ana", "s2", "Bebo café cada mañana"))
        .await
        .unwrap();
    let other_user = h
        .engine
        .evaluate(eval(1, "luis", "s1", "Bebo café cada mañana"))
        .await
        .unwrap();

    assert_eq!(other_session.final_score, 10.0);
    assert_eq!(other_user.final_score, 10.0);
    assert!(h.engine.hints().has_ledger(&LedgerKey::new("ana", 1, "s1")));
}

#[tokio::test]
async fn verb_level_two_without_level_one_is_invalid() {
    let h = harness(ScriptedJudge::answering(perfect()));

    let err = h
        .engine
        .request_hint(&hint(1, "ana", "s1", 0, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
    assert!(!h.engine.hints().has_ledger(&LedgerKey::new("ana", 1, "s1")));

    let resp = h
        .engine
        .evaluate(eval(1, "ana", "s1", "Bebo café cada mañana"))
        .await
        .unwrap();
    assert_eq!(resp.hint_cost_total, 0.0);
}

#[tokio::test(start_paused = true)]
async fn slow_judge_falls_back_within_bounds() {
    let judge = ScriptedJudge::slow(perfect(), Duration::from_millis(3_000));
    let h = harness(judge.clone());

    let resp = h
        .engine
        .evaluate(eval(1, "ana", "s1", "Bebo café cada mañana"))
        .await
        .unwrap();

    assert_eq!(resp.cache_source, JudgmentSource::Fallback);
    assert!(!resp.cached);
    assert!((1.0..=10.0).contains(&resp.final_score));
    assert!(!resp.feedback_text.is_empty());
    assert_eq!(judge.calls(), 1);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn failing_judge_is_retried_once_then_falls_back() {
    let judge = ScriptedJudge::failing();
    let h = harness(judge.clone());

    let resp = h
        .engine
        .evaluate(eval(1, "ana", "s1", "Bebo cafe cada manana"))
        .await
        .unwrap();

    assert_eq!(resp.cache_source, JudgmentSource::Fallback);
    assert_eq!(judge.calls(), 2);
    // Heuristic grading accepts the accent-free spelling of the expected answer.
    assert_eq!(resp.final_score, 10.0);
    assert!(h.cache.is_empty());

    let records = h.records.scores_for_user("ana").await.unwrap();
    assert_eq!(records[0].judgment_source, JudgmentSource::Fallback);
}

#[tokio::test]
async fn near_duplicate_is_served_from_similarity_tier() {
    let judge = ScriptedJudge::answering(perfect());
    let h = harness(judge.clone());

    h.engine
        .evaluate(eval(1, "ana", "s1", "Yo bebo café cada mañana por favor"))
        .await
        .unwrap();
    let near = h
        .engine
        .evaluate(eval(1, "luis", "s1", "Yo bebo café cada mañana por favor ya"))
        .await
        .unwrap();

    assert_eq!(near.cache_source, JudgmentSource::Similarity);
    assert!(near.cached);
    assert!(near.final_score < 10.0 && near.final_score > 9.0);
    assert_eq!(judge.calls(), 1);
    // Similarity results are not written back as entries of their own.
    assert_eq!(h.cache.len(), 1);
}

#[tokio::test]
async fn unrelated_answer_is_judged_fresh() {
    let judge = ScriptedJudge::answering(perfect());
    let h = harness(judge.clone());

    h.engine
        .evaluate(eval(1, "ana", "s1", "Bebo café cada mañana"))
        .await
        .unwrap();
    let other = h
        .engine
        .evaluate(eval(1, "ana", "s2", "Tomo té por la noche"))
        .await
        .unwrap();
    assert_eq!(other.cache_source, JudgmentSource::Fresh);
    assert_eq!(judge.calls(), 2);
}

#[tokio::test]
async fn empty_translation_always_reaches_the_judge_and_is_not_cached() {
    let judge = ScriptedJudge::answering(perfect());
    let h = harness(judge.clone());

    for session in ["s1", "s2"] {
        let resp = h.engine.evaluate(eval(1, "ana", session, " ¿? ")).await.unwrap();
        assert_eq!(resp.cache_source, JudgmentSource::Fresh);
    }
    assert_eq!(judge.calls(), 2);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn oversized_or_anonymous_requests_are_rejected() {
    let judge = ScriptedJudge::answering(perfect());
    let h = harness(judge.clone());

    let long = "a".repeat(2_001);
    let err = h.engine.evaluate(eval(1, "ana", "s1", &long)).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    let err = h.engine.evaluate(eval(1, "", "s1", "Hola")).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    assert_eq!(judge.calls(), 0);
    assert!(h.records.scores_for_user("ana").await.unwrap().is_empty());
}

#[tokio::test]
async fn request_answers_override_catalog_answers() {
    let judge = ScriptedJudge::failing();
    let h = harness(judge);

    let mut req = eval(1, "ana", "s1", "Tomo café cada mañana");
    req.expected_answers = vec!["Tomo café cada mañana".into()];
    let resp = h.engine.evaluate(req).await.unwrap();
    assert_eq!(resp.cache_source, JudgmentSource::Fallback);
    assert_eq!(resp.final_score, 10.0);
}

struct UnavailableCache;

#[async_trait]
impl CacheStore for UnavailableCache {
    async fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn put(&self, _entry: &CacheEntry) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn record_hit(&self, _key: &CacheKey) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn entries_for_sentence(
        &self,
        _sentence_id: SentenceId,
    ) -> Result<Vec<CacheEntry>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn evict_expired(&self, _now: DateTime<Utc>) -> Result<usize, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

#[tokio::test]
async fn unavailable_cache_degrades_to_judging_every_time() {
    let judge = ScriptedJudge::answering(perfect());
    let engine = EvaluationEngine::new(
        EngineConfig::default(),
        Arc::new(UnavailableCache),
        Arc::new(InMemoryRecordStore::new()),
        judge.clone(),
        catalog(),
    )
    .unwrap();

    for _ in 0..2 {
        let resp = engine
            .evaluate(eval(1, "ana", "s1", "Bebo café cada mañana"))
            .await
            .unwrap();
        assert_eq!(resp.cache_source, JudgmentSource::Fresh);
        assert_eq!(resp.final_score, 10.0);
    }
    assert_eq!(judge.calls(), 2);
}

#[tokio::test]
async fn partial_judgment_uses_weighted_components() {
    let judgment = translation_judge::types::Judgment {
        is_correct: false,
        components: ScoreComponents::new(0.5, 1.0, 1.0),
        feedback_text: "Revisa la conjugación.".into(),
        alternative_answers: vec![],
    };
    let h = harness(ScriptedJudge::answering(judgment));

    let resp = h
        .engine
        .evaluate(eval(2, "ana", "s1", "Vivo en Madrid"))
        .await
        .unwrap();
    assert!((resp.raw_score - 8.0).abs() < 1e-9);
    assert_eq!(resp.independence_class, IndependenceClass::Independent);
}

#[tokio::test]
async fn invalid_config_is_rejected_at_construction() {
    let mut config = EngineConfig::default();
    config.similarity.threshold = 1.5;
    let result = EvaluationEngine::new(
        config,
        Arc::new(UnavailableCache),
        Arc::new(InMemoryRecordStore::new()),
        ScriptedJudge::answering(perfect()),
        catalog(),
    );
    assert!(matches!(result, Err(EngineError::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn maintenance_sweeps_expired_entries_and_abandoned_ledgers() {
    let h = harness(ScriptedJudge::answering(perfect()));
    let mut stale = CacheEntry::new(CacheKey::new(1, "bebo te"), "bebo te", perfect());
    stale.created_at = Utc::now() - chrono::Duration::days(31);
    h.cache.put(&stale).await.unwrap();
    h.engine
        .request_hint(&hint(1, "ana", "abandoned", 0, 1))
        .await
        .unwrap();

    assert_eq!(
        h.engine.run_maintenance().await,
        MaintenanceStats {
            expired_entries: 1,
            released_ledgers: 0,
        }
    );
    assert!(h.cache.is_empty());

    tokio::time::advance(Duration::from_secs(121 * 60)).await;
    h.engine
        .request_hint(&hint(1, "ana", "active", 0, 1))
        .await
        .unwrap();
    let stats = h.engine.run_maintenance().await;
    assert_eq!(stats.released_ledgers, 1);
    assert!(!h.engine.hints().has_ledger(&LedgerKey::new("ana", 1, "abandoned")));
    assert!(h.engine.hints().has_ledger(&LedgerKey::new("ana", 1, "active")));

    // The abandoned attempt starts over at no cost.
    let resp = h
        .engine
        .evaluate(eval(1, "ana", "abandoned", "Bebo café cada mañana"))
        .await
        .unwrap();
    assert_eq!(resp.hint_cost_total, 0.0);
}

#[tokio::test(start_paused = true)]
async fn background_maintenance_stops_with_the_engine() {
    let h = harness(ScriptedJudge::answering(perfect()));
    let engine = Arc::new(h.engine);
    let key = LedgerKey::new("ana", 1, "s1");
    engine.request_hint(&hint(1, "ana", "s1", 0, 1)).await.unwrap();

    let task = engine.spawn_maintenance();
    tokio::time::sleep(Duration::from_secs(120 * 60 + 360)).await;
    assert!(!engine.hints().has_ledger(&key));

    drop(engine);
    tokio::time::timeout(Duration::from_secs(600), task)
        .await
        .unwrap()
        .unwrap();
}
