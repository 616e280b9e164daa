//! Severe scoring: judgment quality minus hint costs, floored at 1.0.
//!
//! This is the single place the score bounds and the independence
//! classification are defined. Reporting must read them from
//! [`ScoreOutcome`], never recompute them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::hints::LedgerSnapshot;
use crate::types::{Judgment, JudgmentSource, SentenceId, SessionId, UserId};

pub const MIN_SCORE: f64 = 1.0;
pub const MAX_SCORE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndependenceClass {
    /// No hints, score untouched by deductions.
    Independent,
    /// Hints used, but the result stayed at or above the strategic threshold.
    Strategic,
    Dependent,
}

impl IndependenceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Independent => "independent",
            Self::Strategic => "strategic",
            Self::Dependent => "dependent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "independent" => Some(Self::Independent),
            "strategic" => Some(Self::Strategic),
            "dependent" => Some(Self::Dependent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreOutcome {
    pub raw_score: f64,
    pub final_score: f64,
    pub independence: IndependenceClass,
    pub hint_cost_total: f64,
}

/// One finalized attempt. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub sentence_id: SentenceId,
    pub session_id: SessionId,
    pub raw_score: f64,
    pub final_score: f64,
    pub independence: IndependenceClass,
    pub hint_cost_total: f64,
    pub judgment_source: JudgmentSource,
    pub created_at: DateTime<Utc>,
}

impl ScoreRecord {
    pub fn new(
        user_id: impl Into<UserId>,
        sentence_id: SentenceId,
        session_id: impl Into<SessionId>,
        outcome: &ScoreOutcome,
        judgment_source: JudgmentSource,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            sentence_id,
            session_id: session_id.into(),
            raw_score: outcome.raw_score,
            final_score: outcome.final_score,
            independence: outcome.independence,
            hint_cost_total: outcome.hint_cost_total,
            judgment_source,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoreCalculator {
    config: ScoringConfig,
}

impl ScoreCalculator {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// `10 * weighted average` of the judgment's components, in `0.0..=10.0`.
    pub fn raw_score(&self, judgment: &Judgment) -> f64 {
        let w = &self.config;
        let c = judgment.components.clamped();
        let total = w.weight_sum();
        if total <= 0.0 {
            return 0.0;
        }
        let avg = (w.grammar_weight * c.grammar
            + w.naturalness_weight * c.naturalness
            + w.completeness_weight * c.completeness)
            / total;
        (MAX_SCORE * avg).clamp(0.0, MAX_SCORE)
    }

    pub fn finalize(&self, judgment: &Judgment, ledger: &LedgerSnapshot) -> ScoreOutcome {
        let raw_score = self.raw_score(judgment);
        let hint_cost_total = ledger.total_cost();
        let final_score = (raw_score - hint_cost_total).clamp(MIN_SCORE, MAX_SCORE);

        let independence = if ledger.is_empty() && final_score == raw_score {
            IndependenceClass::Independent
        } else if !ledger.is_empty() && final_score >= self.config.strategic_threshold {
            IndependenceClass::Strategic
        } else {
            IndependenceClass::Dependent
        };

        ScoreOutcome {
            raw_score,
            final_score,
            independence,
            hint_cost_total,
        }
    }
}
