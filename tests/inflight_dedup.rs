mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use futures::future::join_all;
use translation_judge::types::JudgmentSource;

#[tokio::test(start_paused = true)]
async fn concurrent_first_time_evaluations_call_the_judge_once() {
    let judge = ScriptedJudge::slow(perfect(), Duration::from_millis(300));
    let h = Arc::new(harness(judge.clone()));

    let calls = (0..16).map(|i| {
        let h = h.clone();
        async move {
            h.engine
                .evaluate(eval(1, &format!("user{i}"), "s1", "Bebo café cada mañana"))
                .await
                .unwrap()
        }
    });
    let results = join_all(calls).await;

    assert_eq!(judge.calls(), 1);
    assert!(results
        .iter()
        .all(|r| r.cache_source == JudgmentSource::Fresh && r.final_score == 10.0));
    assert_eq!(h.engine.in_flight(), 0);
    assert_eq!(h.cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn surface_variants_share_one_call() {
    let judge = ScriptedJudge::slow(perfect(), Duration::from_millis(300));
    let h = Arc::new(harness(judge.clone()));

    let variants = [
        "Bebo café cada mañana",
        "bebo cafe cada manana",
        "¡Bebo café cada mañana!",
        "  BEBO CAFÉ CADA MAÑANA.",
    ];
    let calls = variants.iter().map(|text| {
        let h = h.clone();
        async move { h.engine.evaluate(eval(1, "ana", "s1", text)).await.unwrap() }
    });
    join_all(calls).await;

    assert_eq!(judge.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn distinct_keys_are_judged_in_parallel() {
    let judge = ScriptedJudge::slow(perfect(), Duration::from_millis(300));
    let h = Arc::new(harness(judge.clone()));

    let started = tokio::time::Instant::now();
    let calls = [(1, "Bebo café cada mañana"), (2, "Vivimos en Madrid"), (1, "Tomo té")]
        .into_iter()
        .map(|(sentence, text)| {
            let h = h.clone();
            async move { h.engine.evaluate(eval(sentence, "ana", "s1", text)).await.unwrap() }
        });
    join_all(calls).await;

    assert_eq!(judge.calls(), 3);
    assert!(started.elapsed() < Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn abandoned_caller_still_populates_the_cache() {
    let judge = ScriptedJudge::slow(perfect(), Duration::from_millis(300));
    let h = Arc::new(harness(judge.clone()));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        h.engine.evaluate(eval(1, "ana", "s1", "Bebo café cada mañana")),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.engine.in_flight(), 0);
    assert_eq!(h.cache.len(), 1);

    let resp = h
        .engine
        .evaluate(eval(1, "luis", "s1", "Bebo café cada mañana"))
        .await
        .unwrap();
    assert_eq!(resp.cache_source, JudgmentSource::Exact);
    assert_eq!(judge.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn timed_out_calls_release_the_slot_without_caching() {
    let judge = ScriptedJudge::slow(perfect(), Duration::from_millis(5_000));
    let h = Arc::new(harness(judge.clone()));

    let calls = (0..4).map(|i| {
        let h = h.clone();
        async move {
            h.engine
                .evaluate(eval(1, &format!("user{i}"), "s1", "Bebo café cada mañana"))
                .await
                .unwrap()
        }
    });
    let results = join_all(calls).await;

    assert_eq!(judge.calls(), 1);
    assert!(results.iter().all(|r| r.cache_source == JudgmentSource::Fallback));
    assert_eq!(h.engine.in_flight(), 0);
    assert!(h.cache.is_empty());
}
