#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use translation_judge::catalog::InMemoryCatalog;
use translation_judge::config::EngineConfig;
use translation_judge::engine::{EvaluateRequest, EvaluationEngine};
use translation_judge::hints::HintRequest;
use translation_judge::judge::{JudgeError, JudgeGateway, JudgeRequest};
use translation_judge::store::{InMemoryCacheStore, InMemoryRecordStore};
use translation_judge::types::{Judgment, ScoreComponents};

pub const CATALOG: &str = r#"[
  {
    "id": 1,
    "source_text": "I drink coffee every morning",
    "expected_answers": ["Bebo café cada mañana"],
    "concepts": ["present_tense"],
    "words": [
      {"text": "Bebo", "kind": "verb", "concepts": ["present_regular_er"],
       "verb": {"infinitive": "beber", "form_description": "present tense, first person singular", "conjugated": "bebo"}},
      {"text": "café", "kind": "other", "distractors": ["té", "leche"]},
      {"text": "cada", "kind": "other"},
      {"text": "mañana", "kind": "other", "distractors": ["noche", "tarde"], "concepts": ["time_expressions"]}
    ]
  },
  {
    "id": 2,
    "source_text": "We live in Madrid",
    "expected_answers": ["Vivimos en Madrid"],
    "concepts": ["present_regular_ir"],
    "words": [
      {"text": "Vivimos", "kind": "verb",
       "verb": {"infinitive": "vivir", "form_description": "present tense, first person plural", "conjugated": "vivimos"}},
      {"text": "en", "kind": "other", "distractors": ["a", "de"]},
      {"text": "Madrid", "kind": "other"}
    ]
  }
]"#;

pub fn catalog() -> Arc<InMemoryCatalog> {
    Arc::new(InMemoryCatalog::from_json_str(CATALOG).unwrap())
}

pub fn perfect() -> Judgment {
    Judgment {
        is_correct: true,
        components: ScoreComponents::perfect(),
        feedback_text: "¡Perfecto!".into(),
        alternative_answers: vec!["Tomo café cada mañana".into()],
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Behavior {
    Answer,
    Fail,
}

/// Judge double: counts calls, optionally sleeps and fails.
pub struct ScriptedJudge {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub behavior: Behavior,
    pub judgment: Judgment,
}

impl ScriptedJudge {
    pub fn answering(judgment: Judgment) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            behavior: Behavior::Answer,
            judgment,
        })
    }

    pub fn slow(judgment: Judgment, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            behavior: Behavior::Answer,
            judgment,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            behavior: Behavior::Fail,
            judgment: perfect(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JudgeGateway for ScriptedJudge {
    async fn judge(&self, _req: &JudgeRequest, _timeout: Duration) -> Result<Judgment, JudgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.behavior {
            Behavior::Answer => Ok(self.judgment.clone()),
            Behavior::Fail => Err(JudgeError::Failed {
                message: "upstream unavailable".into(),
                retryable: true,
            }),
        }
    }
}

pub struct Harness {
    pub engine: EvaluationEngine,
    pub cache: Arc<InMemoryCacheStore>,
    pub records: Arc<InMemoryRecordStore>,
}

pub fn harness(judge: Arc<ScriptedJudge>) -> Harness {
    harness_with(EngineConfig::default(), judge)
}

pub fn harness_with(config: EngineConfig, judge: Arc<ScriptedJudge>) -> Harness {
    let cache = Arc::new(InMemoryCacheStore::new(&config.cache));
    let records = Arc::new(InMemoryRecordStore::new());
    let engine =
        EvaluationEngine::new(config, cache.clone(), records.clone(), judge, catalog()).unwrap();
    Harness {
        engine,
        cache,
        records,
    }
}

pub fn eval(sentence_id: i64, user: &str, session: &str, text: &str) -> EvaluateRequest {
    EvaluateRequest {
        sentence_id,
        user_id: user.into(),
        session_id: session.into(),
        raw_translation: text.into(),
        expected_answers: vec![],
    }
}

pub fn hint(sentence_id: i64, user: &str, session: &str, word: usize, level: u8) -> HintRequest {
    HintRequest {
        sentence_id,
        user_id: user.into(),
        session_id: session.into(),
        word_index: word,
        requested_level: level,
    }
}
