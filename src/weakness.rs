//! Concept-level weakness tracking and review scheduling.
//!
//! Finalized evaluations arrive here asynchronously, possibly out of order and
//! possibly more than once. Every update is commutative (counters and a
//! max over exposure times) and each score record is applied at most once, so
//! the resulting entries do not depend on delivery order.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ReviewConfig;
use crate::scoring::ScoreRecord;
use crate::store::{RecordStore, StoreError};
use crate::types::UserId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaknessEntry {
    pub user_id: UserId,
    pub concept: String,
    pub hint_requests: u64,
    pub total_exposures: u64,
    /// `hint_requests / total_exposures`, in `0.0..=1.0`.
    pub weakness_score: f64,
    pub last_exposure_at: DateTime<Utc>,
    pub next_review_at: DateTime<Utc>,
}

/// One concept exercised by an evaluated sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptUsage {
    pub concept: String,
    /// A hint on a word tagged with this concept was used.
    pub hinted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationEvent {
    pub record: ScoreRecord,
    pub concepts: Vec<ConceptUsage>,
}

#[derive(Debug, thiserror::Error)]
pub enum WeaknessError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("weakness channel closed")]
    Closed,
    #[error("weakness worker failed: {0}")]
    Join(String),
}

pub struct WeaknessAggregator {
    store: Arc<dyn RecordStore>,
    config: ReviewConfig,
}

impl WeaknessAggregator {
    pub fn new(store: Arc<dyn RecordStore>, config: ReviewConfig) -> Self {
        Self { store, config }
    }

    /// Fold one evaluation into the user's concept entries.
    ///
    /// The new snapshots and the applied mark are committed together, so a
    /// failed delivery leaves nothing behind and can be redelivered. Returns
    /// `false` when the record had already been applied.
    pub async fn apply(&self, event: &EvaluationEvent) -> Result<bool, WeaknessError> {
        let record = &event.record;
        let mut entries: Vec<WeaknessEntry> = Vec::with_capacity(event.concepts.len());
        for usage in &event.concepts {
            let pending = entries.iter().position(|e| e.concept == usage.concept);
            let previous = match pending {
                Some(idx) => Some(entries.swap_remove(idx)),
                None => {
                    self.store
                        .latest_weakness(&record.user_id, &usage.concept)
                        .await?
                }
            };
            let (hint_requests, total_exposures, last_exposure_at) = match previous {
                Some(prev) => (
                    prev.hint_requests + u64::from(usage.hinted),
                    prev.total_exposures + 1,
                    prev.last_exposure_at.max(record.created_at),
                ),
                None => (u64::from(usage.hinted), 1, record.created_at),
            };
            let weakness_score = hint_requests as f64 / total_exposures as f64;
            entries.push(WeaknessEntry {
                user_id: record.user_id.clone(),
                concept: usage.concept.clone(),
                hint_requests,
                total_exposures,
                weakness_score,
                last_exposure_at,
                next_review_at: self.next_review_at(last_exposure_at, weakness_score),
            });
        }

        let applied = self.store.apply_weakness(record.id, &entries).await?;
        if !applied {
            debug!(record_id = %record.id, "duplicate evaluation event ignored");
        }
        Ok(applied)
    }

    /// `base * 2^round((1 - weakness) * max_exponent)`: weaker concepts come back sooner.
    /// Saturates at `Duration::MAX`.
    pub fn review_interval(&self, weakness_score: f64) -> Duration {
        let strength = 1.0 - weakness_score.clamp(0.0, 1.0);
        let exponent = (strength * f64::from(self.config.max_backoff_exponent)).round() as u32;
        2i64.checked_pow(exponent)
            .and_then(|factor| i64::from(self.config.base_interval_hours).checked_mul(factor))
            .and_then(Duration::try_hours)
            .unwrap_or(Duration::MAX)
    }

    fn next_review_at(&self, last_exposure_at: DateTime<Utc>, weakness_score: f64) -> DateTime<Utc> {
        last_exposure_at
            .checked_add_signed(self.review_interval(weakness_score))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Concepts due for review at `now`, weakest first.
    pub async fn review_queue(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<WeaknessEntry>, WeaknessError> {
        let mut due: Vec<WeaknessEntry> = self
            .store
            .weaknesses_for_user(user_id)
            .await?
            .into_iter()
            .filter(|e| e.next_review_at <= now)
            .collect();
        due.sort_by(|a, b| {
            b.weakness_score
                .total_cmp(&a.weakness_score)
                .then(a.next_review_at.cmp(&b.next_review_at))
                .then_with(|| a.concept.cmp(&b.concept))
        });
        Ok(due)
    }

    /// Start a background task that applies events as they arrive.
    pub fn spawn(self: Arc<Self>) -> (WeaknessSink, WeaknessWorker) {
        let (sender, receiver) = mpsc::unbounded_channel::<EvaluationEvent>();
        let handle = tokio::spawn(apply_loop(self, receiver));
        (
            WeaknessSink { sender },
            WeaknessWorker {
                handle: Some(handle),
            },
        )
    }
}

/// Cheap handle for queueing evaluations.
#[derive(Clone)]
pub struct WeaknessSink {
    sender: mpsc::UnboundedSender<EvaluationEvent>,
}

impl WeaknessSink {
    pub fn record(&self, event: EvaluationEvent) -> Result<(), WeaknessError> {
        self.sender.send(event).map_err(|_| WeaknessError::Closed)
    }
}

pub struct WeaknessWorker {
    handle: Option<tokio::task::JoinHandle<u64>>,
}

impl WeaknessWorker {
    /// Wait for the worker to drain. Completes once every sink is dropped.
    /// Returns the number of events applied.
    pub async fn join(mut self) -> Result<u64, WeaknessError> {
        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| WeaknessError::Join(e.to_string())),
            None => Ok(0),
        }
    }
}

async fn apply_loop(
    aggregator: Arc<WeaknessAggregator>,
    mut receiver: mpsc::UnboundedReceiver<EvaluationEvent>,
) -> u64 {
    let mut applied = 0u64;
    while let Some(event) = receiver.recv().await {
        match aggregator.apply(&event).await {
            Ok(true) => applied += 1,
            Ok(false) => {}
            Err(err) => warn!(
                error = %err,
                record_id = %event.record.id,
                user_id = %event.record.user_id,
                "failed to apply evaluation to weakness stats"
            ),
        }
    }
    applied
}
