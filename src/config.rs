//! Typed engine configuration.
//!
//! Every tunable constant of the evaluation pipeline lives here with a
//! documented default. Configuration is loaded from TOML; missing keys fall
//! back to the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub similarity: SimilarityConfig,
    pub cache: CacheConfig,
    pub judge: JudgeConfig,
    pub hints: HintCosts,
    pub scoring: ScoringConfig,
    pub review: ReviewConfig,
    pub limits: RequestLimits,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.similarity;
        if !(s.threshold > 0.0 && s.threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "similarity.threshold must be in (0, 1], got {}",
                s.threshold
            )));
        }
        if s.edit_weight < 0.0 || s.token_weight < 0.0 || s.edit_weight + s.token_weight <= 0.0 {
            return Err(ConfigError::Invalid(
                "similarity weights must be non-negative with a positive sum".into(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be > 0".into()));
        }
        if self.judge.timeout_ms == 0 || self.judge.retry_timeout_ms == 0 {
            return Err(ConfigError::Invalid("judge timeouts must be > 0".into()));
        }
        let h = &self.hints;
        if [h.verb_level1, h.verb_level2, h.verb_level3, h.multiple_choice]
            .iter()
            .any(|c| !c.is_finite() || *c < 0.0)
        {
            return Err(ConfigError::Invalid("hint costs must be finite and >= 0".into()));
        }
        let w = &self.scoring;
        if [w.grammar_weight, w.naturalness_weight, w.completeness_weight]
            .iter()
            .any(|v| *v < 0.0)
            || w.weight_sum() <= 0.0
        {
            return Err(ConfigError::Invalid(
                "scoring weights must be non-negative with a positive sum".into(),
            ));
        }
        if self.review.base_interval_hours == 0 {
            return Err(ConfigError::Invalid("review.base_interval_hours must be > 0".into()));
        }
        if self.review.max_backoff_exponent > MAX_BACKOFF_EXPONENT {
            return Err(ConfigError::Invalid(format!(
                "review.max_backoff_exponent must be <= {MAX_BACKOFF_EXPONENT}, got {}",
                self.review.max_backoff_exponent
            )));
        }
        if self.limits.ledger_idle_minutes == 0 || self.limits.maintenance_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "limits.ledger_idle_minutes and limits.maintenance_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Near-duplicate matching parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Minimum blended similarity for a match to be accepted.
    pub threshold: f64,
    /// Weight of normalized edit-distance similarity.
    pub edit_weight: f64,
    /// Weight of token-set (Jaccard) overlap.
    pub token_weight: f64,
    /// Component multiplier at exactly `threshold`.
    pub adjust_base: f64,
    /// Multiplier slope per unit of similarity above `threshold`.
    pub adjust_slope: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            edit_weight: 0.5,
            token_weight: 0.5,
            adjust_base: 0.95,
            adjust_slope: 0.33,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_days: u32,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_days: 30,
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.ttl_days))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Hard timeout for the first judging attempt.
    pub timeout_ms: u64,
    /// Shorter timeout used for retries.
    pub retry_timeout_ms: u64,
    pub max_retries: u32,
    /// Model id handed to the LLM judge.
    pub model: String,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            retry_timeout_ms: 500,
            max_retries: 1,
            model: "openai/gpt-4o-mini".to_string(),
        }
    }
}

impl JudgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }
}

/// Point cost of each hint transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HintCosts {
    pub verb_level1: f64,
    pub verb_level2: f64,
    pub verb_level3: f64,
    pub multiple_choice: f64,
}

impl Default for HintCosts {
    fn default() -> Self {
        Self {
            verb_level1: 1.0,
            verb_level2: 1.5,
            verb_level3: 2.0,
            multiple_choice: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub grammar_weight: f64,
    pub naturalness_weight: f64,
    pub completeness_weight: f64,
    /// Minimum final score for a hinted attempt to count as strategic.
    pub strategic_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            grammar_weight: 0.4,
            naturalness_weight: 0.3,
            completeness_weight: 0.3,
            strategic_threshold: 7.0,
        }
    }
}

impl ScoringConfig {
    pub fn weight_sum(&self) -> f64 {
        self.grammar_weight + self.naturalness_weight + self.completeness_weight
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Review interval for a concept at maximum weakness.
    pub base_interval_hours: u32,
    /// Interval doubles up to this many times as weakness falls to zero.
    pub max_backoff_exponent: u32,
}

/// Past 2^16 the base interval already spans several lifetimes.
pub const MAX_BACKOFF_EXPONENT: u32 = 16;

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            base_interval_hours: 24,
            max_backoff_exponent: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLimits {
    pub max_translation_chars: usize,
    /// Hint ledgers untouched for this long are released by the maintenance sweep.
    pub ledger_idle_minutes: u64,
    /// Period of the background maintenance sweep.
    pub maintenance_interval_secs: u64,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_translation_chars: 2_000,
            ledger_idle_minutes: 120,
            maintenance_interval_secs: 300,
        }
    }
}

impl RequestLimits {
    pub fn ledger_idle(&self) -> Duration {
        Duration::from_secs(self.ledger_idle_minutes.saturating_mul(60))
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [similarity]
            threshold = 0.9

            [hints]
            multiple_choice = 2.0
            "#,
        )
        .unwrap();
        assert_eq!(config.similarity.threshold, 0.9);
        assert_eq!(config.similarity.edit_weight, 0.5);
        assert_eq!(config.hints.multiple_choice, 2.0);
        assert_eq!(config.hints.verb_level1, 1.0);
        assert_eq!(config.judge.timeout(), Duration::from_millis(2_000));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = EngineConfig::from_toml_str("[similarity]\nthreshold = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_negative_hint_cost() {
        let err = EngineConfig::from_toml_str("[hints]\nverb_level2 = -1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_backoff_exponent_that_overflows_review_dates() {
        let err = EngineConfig::from_toml_str("[review]\nmax_backoff_exponent = 30\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref m) if m.contains("max_backoff_exponent")));

        let config = EngineConfig::from_toml_str("[review]\nmax_backoff_exponent = 16\n").unwrap();
        assert_eq!(config.review.max_backoff_exponent, MAX_BACKOFF_EXPONENT);
    }

    #[test]
    fn rejects_zero_ledger_idle_window() {
        let err = EngineConfig::from_toml_str("[limits]\nledger_idle_minutes = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(
            EngineConfig::default().limits.ledger_idle(),
            Duration::from_secs(120 * 60)
        );
    }
}
