//! Progressive hint reveal with a per-attempt cost ledger.
//!
//! Each (user, sentence, session) attempt owns one [`HintLedger`]. Per word,
//! the ledger tracks a forward-only state:
//!
//! ```text
//! verb:  NotStarted -> Level1Requested -> Level2Requested -> Level3Requested
//! other: NotStarted -> ChoicesRevealed
//! ```
//!
//! Every forward transition appends a fixed-cost entry. Ledgers live in an
//! arena keyed by [`LedgerKey`]; each one sits behind its own async mutex so
//! requests on one key apply in arrival order while different keys proceed
//! in parallel. A ledger leaves the arena only while its lock is held, and is
//! marked closed in the same critical section.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::catalog::{SentenceCatalog, Word, WordKind};
use crate::config::HintCosts;
use crate::types::{SentenceId, SessionId, UserId};

pub const MAX_VERB_LEVEL: u8 = 3;

#[derive(Debug, thiserror::Error)]
pub enum HintError {
    #[error("invalid hint request: {0}")]
    InvalidRequest(String),
    #[error("hint ledger was finalized concurrently; retry the request")]
    ConcurrencyConflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub user_id: UserId,
    pub sentence_id: SentenceId,
    pub session_id: SessionId,
}

impl LedgerKey {
    pub fn new(
        user_id: impl Into<UserId>,
        sentence_id: SentenceId,
        session_id: impl Into<SessionId>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            sentence_id,
            session_id: session_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintState {
    #[default]
    NotStarted,
    Level1Requested,
    Level2Requested,
    Level3Requested,
    ChoicesRevealed,
}

impl HintState {
    pub fn level(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Level1Requested | Self::ChoicesRevealed => 1,
            Self::Level2Requested => 2,
            Self::Level3Requested => 3,
        }
    }

    fn verb_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::Level1Requested),
            2 => Some(Self::Level2Requested),
            3 => Some(Self::Level3Requested),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintKind {
    Verb,
    MultipleChoice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Transition {
    Advance(HintState),
    /// Level already reached: content is shown again at no cost.
    Replay,
    Reject(String),
}

/// The transition table.
fn transition(kind: WordKind, state: HintState, requested: u8) -> Transition {
    match kind {
        WordKind::Verb => {
            let Some(next) = HintState::verb_level(requested) else {
                return Transition::Reject(format!(
                    "verb hints go from level 1 to {MAX_VERB_LEVEL}, got {requested}"
                ));
            };
            let current = state.level();
            if requested <= current {
                Transition::Replay
            } else if requested == current + 1 {
                Transition::Advance(next)
            } else {
                Transition::Reject(format!(
                    "level {requested} requires level {} first",
                    requested - 1
                ))
            }
        }
        WordKind::Other => match (requested, state) {
            (1, HintState::ChoicesRevealed) => Transition::Replay,
            (1, _) => Transition::Advance(HintState::ChoicesRevealed),
            (other, _) => Transition::Reject(format!(
                "multiple-choice hints have a single level, got {other}"
            )),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub word_index: usize,
    pub kind: HintKind,
    pub level_reached: u8,
    pub cost: f64,
}

#[derive(Debug)]
pub struct HintLedger {
    entries: Vec<LedgerEntry>,
    states: HashMap<usize, HintState>,
    closed: bool,
    touched: Instant,
}

impl HintLedger {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            states: HashMap::new(),
            closed: false,
            touched: Instant::now(),
        }
    }

    pub fn state(&self, word_index: usize) -> HintState {
        self.states.get(&word_index).copied().unwrap_or_default()
    }

    pub fn total_cost(&self) -> f64 {
        self.entries.iter().map(|e| e.cost).sum()
    }
}

/// Frozen copy of a ledger taken at finalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub entries: Vec<LedgerEntry>,
}

impl LedgerSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_cost(&self) -> f64 {
        self.entries.iter().map(|e| e.cost).sum()
    }

    /// Distinct word indexes that received at least one hint.
    pub fn hinted_words(&self) -> Vec<usize> {
        let mut words: Vec<usize> = self.entries.iter().map(|e| e.word_index).collect();
        words.sort_unstable();
        words.dedup();
        words
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HintContent {
    Infinitive { infinitive: String },
    VerbForm { description: String },
    Conjugation { form: String },
    Choices { options: Vec<String> },
}

impl fmt::Display for HintContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infinitive { infinitive } => write!(f, "This is a form of the verb \"{infinitive}\""),
            Self::VerbForm { description } => write!(f, "Use the {description}"),
            Self::Conjugation { form } => write!(f, "The verb form is \"{form}\""),
            Self::Choices { options } => write!(f, "One of: {}", options.join(" / ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HintRequest {
    pub sentence_id: SentenceId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub word_index: usize,
    pub requested_level: u8,
}

impl HintRequest {
    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey::new(self.user_id.clone(), self.sentence_id, self.session_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HintResponse {
    pub hint_content: HintContent,
    pub cost_incurred: f64,
    pub cumulative_cost: f64,
    pub level_reached: u8,
    /// True when the level had already been revealed and nothing was charged.
    pub replayed: bool,
}

type LedgerHandle = Arc<tokio::sync::Mutex<HintLedger>>;

pub struct HintEngine {
    costs: HintCosts,
    catalog: Arc<dyn SentenceCatalog>,
    ledgers: Mutex<HashMap<LedgerKey, LedgerHandle>>,
}

impl HintEngine {
    pub fn new(costs: HintCosts, catalog: Arc<dyn SentenceCatalog>) -> Self {
        Self {
            costs,
            catalog,
            ledgers: Mutex::new(HashMap::new()),
        }
    }

    fn cost_of(&self, kind: WordKind, level: u8) -> f64 {
        match (kind, level) {
            (WordKind::Verb, 1) => self.costs.verb_level1,
            (WordKind::Verb, 2) => self.costs.verb_level2,
            (WordKind::Verb, _) => self.costs.verb_level3,
            (WordKind::Other, _) => self.costs.multiple_choice,
        }
    }

    fn handle(&self, key: &LedgerKey) -> (LedgerHandle, bool) {
        let mut map = self.ledgers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = map.get(key) {
            return (existing.clone(), false);
        }
        let fresh: LedgerHandle = Arc::new(tokio::sync::Mutex::new(HintLedger::new()));
        map.insert(key.clone(), fresh.clone());
        (fresh, true)
    }

    fn discard_if_current(&self, key: &LedgerKey, handle: &LedgerHandle) {
        let mut map = self.ledgers.lock().unwrap_or_else(PoisonError::into_inner);
        if map.get(key).is_some_and(|h| Arc::ptr_eq(h, handle)) {
            map.remove(key);
        }
    }

    /// Whether an open ledger exists for the attempt.
    pub fn has_ledger(&self, key: &LedgerKey) -> bool {
        self.ledgers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Current word state, `NotStarted` when no ledger exists.
    pub async fn state(&self, key: &LedgerKey, word_index: usize) -> HintState {
        let handle = {
            let map = self.ledgers.lock().unwrap_or_else(PoisonError::into_inner);
            map.get(key).cloned()
        };
        match handle {
            Some(h) => h.lock().await.state(word_index),
            None => HintState::NotStarted,
        }
    }

    pub async fn cumulative_cost(&self, key: &LedgerKey) -> f64 {
        let handle = {
            let map = self.ledgers.lock().unwrap_or_else(PoisonError::into_inner);
            map.get(key).cloned()
        };
        match handle {
            Some(h) => h.lock().await.total_cost(),
            None => 0.0,
        }
    }

    pub async fn request_hint(&self, req: &HintRequest) -> Result<HintResponse, HintError> {
        let sentence = self.catalog.sentence(req.sentence_id).await.ok_or_else(|| {
            HintError::InvalidRequest(format!("unknown sentence {}", req.sentence_id))
        })?;
        let word = sentence.words.get(req.word_index).ok_or_else(|| {
            HintError::InvalidRequest(format!(
                "word index {} not in sentence {} ({} words)",
                req.word_index,
                req.sentence_id,
                sentence.words.len()
            ))
        })?;
        check_material(word)?;

        let key = req.ledger_key();
        // A ledger closed between lookup and lock was finalized, released or
        // discarded; resolve again once so the hint lands on the live ledger.
        for _ in 0..2 {
            let (handle, created) = self.handle(&key);
            let mut ledger = handle.lock().await;
            if ledger.closed {
                continue;
            }
            ledger.touched = Instant::now();

            let state = ledger.state(req.word_index);
            match transition(word.kind, state, req.requested_level) {
                Transition::Reject(reason) => {
                    if created && ledger.entries.is_empty() {
                        // Waiters already holding this handle must re-resolve.
                        self.discard_if_current(&key, &handle);
                        ledger.closed = true;
                    }
                    return Err(HintError::InvalidRequest(reason));
                }
                Transition::Replay => {
                    return Ok(HintResponse {
                        hint_content: self.content(&key, req.word_index, word, req.requested_level),
                        cost_incurred: 0.0,
                        cumulative_cost: ledger.total_cost(),
                        level_reached: state.level(),
                        replayed: true,
                    });
                }
                Transition::Advance(next) => {
                    let cost = self.cost_of(word.kind, next.level());
                    ledger.entries.push(LedgerEntry {
                        word_index: req.word_index,
                        kind: match word.kind {
                            WordKind::Verb => HintKind::Verb,
                            WordKind::Other => HintKind::MultipleChoice,
                        },
                        level_reached: next.level(),
                        cost,
                    });
                    ledger.states.insert(req.word_index, next);
                    let cumulative_cost = ledger.total_cost();
                    debug!(
                        user_id = %key.user_id,
                        sentence_id = key.sentence_id,
                        word_index = req.word_index,
                        level = next.level(),
                        cost,
                        cumulative_cost,
                        "hint revealed"
                    );
                    return Ok(HintResponse {
                        hint_content: self.content(&key, req.word_index, word, next.level()),
                        cost_incurred: cost,
                        cumulative_cost,
                        level_reached: next.level(),
                        replayed: false,
                    });
                }
            }
        }
        Err(HintError::ConcurrencyConflict)
    }

    /// Close the attempt's ledger and return its frozen contents.
    ///
    /// Later hint requests for the same key start a new ledger.
    pub async fn finalize(&self, key: &LedgerKey) -> LedgerSnapshot {
        let handle = {
            let mut map = self.ledgers.lock().unwrap_or_else(PoisonError::into_inner);
            map.remove(key)
        };
        let Some(handle) = handle else {
            return LedgerSnapshot::default();
        };
        let mut ledger = handle.lock().await;
        ledger.closed = true;
        LedgerSnapshot {
            entries: std::mem::take(&mut ledger.entries),
        }
    }

    /// Release ledgers untouched for at least `max_idle`, the hints of
    /// attempts that were abandoned before evaluation. Ledgers locked by an
    /// in-progress request are skipped. Returns the number released.
    pub fn release_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut map = self.ledgers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut released = 0;
        map.retain(|key, handle| {
            let Ok(mut ledger) = handle.try_lock() else {
                return true;
            };
            if now.saturating_duration_since(ledger.touched) < max_idle {
                return true;
            }
            ledger.closed = true;
            released += 1;
            debug!(
                user_id = %key.user_id,
                sentence_id = key.sentence_id,
                abandoned_cost = ledger.total_cost(),
                "released idle hint ledger"
            );
            false
        });
        released
    }

    /// Number of open ledgers.
    pub fn open_ledgers(&self) -> usize {
        self.ledgers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn content(&self, key: &LedgerKey, word_index: usize, word: &Word, level: u8) -> HintContent {
        match (word.kind, &word.verb) {
            (WordKind::Verb, Some(verb)) => match level {
                1 => HintContent::Infinitive {
                    infinitive: verb.infinitive.clone(),
                },
                2 => HintContent::VerbForm {
                    description: verb.form_description.clone(),
                },
                _ => HintContent::Conjugation {
                    form: verb.conjugated.clone(),
                },
            },
            _ => {
                let mut options: Vec<String> = word.distractors.clone();
                options.push(word.text.clone());
                let mut rng = StdRng::seed_from_u64(choice_seed(key, word_index));
                options.shuffle(&mut rng);
                HintContent::Choices { options }
            }
        }
    }
}

fn check_material(word: &Word) -> Result<(), HintError> {
    match word.kind {
        WordKind::Verb if word.verb.is_none() => Err(HintError::InvalidRequest(format!(
            "no verb hints authored for \"{}\"",
            word.text
        ))),
        WordKind::Other if word.distractors.is_empty() => Err(HintError::InvalidRequest(format!(
            "no choices authored for \"{}\"",
            word.text
        ))),
        _ => Ok(()),
    }
}

/// Stable per-attempt shuffle so a replayed hint shows the same order.
fn choice_seed(key: &LedgerKey, word_index: usize) -> u64 {
    let hash = blake3::hash(
        format!(
            "{}|{}|{}|{}",
            key.user_id, key.sentence_id, key.session_id, word_index
        )
        .as_bytes(),
    );
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(buf)
}
