//! Core value types shared across the evaluation pipeline.

use serde::{Deserialize, Serialize};

pub type SentenceId = i64;
pub type UserId = String;
pub type SessionId = String;

/// Per-dimension quality of a translation, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub grammar: f64,
    pub naturalness: f64,
    pub completeness: f64,
}

impl ScoreComponents {
    pub fn new(grammar: f64, naturalness: f64, completeness: f64) -> Self {
        Self {
            grammar,
            naturalness,
            completeness,
        }
        .clamped()
    }

    pub fn perfect() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }

    /// Clamp every component into `0.0..=1.0`; NaN becomes 0.
    pub fn clamped(self) -> Self {
        let c = |v: f64| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        Self {
            grammar: c(self.grammar),
            naturalness: c(self.naturalness),
            completeness: c(self.completeness),
        }
    }

    /// Multiply every component by `factor`, staying within bounds.
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            grammar: self.grammar * factor,
            naturalness: self.naturalness * factor,
            completeness: self.completeness * factor,
        }
        .clamped()
    }
}

/// A verdict on one translation attempt. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub is_correct: bool,
    pub components: ScoreComponents,
    pub feedback_text: String,
    #[serde(default)]
    pub alternative_answers: Vec<String>,
}

/// Where the judgment behind an evaluation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgmentSource {
    Exact,
    Similarity,
    Fresh,
    Fallback,
}

impl JudgmentSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Similarity => "similarity",
            Self::Fresh => "fresh",
            Self::Fallback => "fallback",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(Self::Exact),
            "similarity" => Some(Self::Similarity),
            "fresh" => Some(Self::Fresh),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }

    /// Whether the judgment was served without a judging call.
    pub fn is_cached(self) -> bool {
        matches!(self, Self::Exact | Self::Similarity)
    }
}
