//! Near-duplicate matching against prior judgments for the same sentence.
//!
//! Blends two signals over normalized text:
//! - normalized Levenshtein similarity (typos, small inflection slips)
//! - token-set Jaccard overlap (word order, inserted/dropped words)

use std::collections::HashSet;

use crate::cache::CacheEntry;
use crate::config::SimilarityConfig;
use crate::normalize::tokens;
use crate::types::Judgment;

/// Jaccard overlap of the token sets of two normalized strings.
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta: HashSet<&str> = tokens(a).into_iter().collect();
    let tb: HashSet<&str> = tokens(b).into_iter().collect();
    if ta.is_empty() && tb.is_empty() {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    inter / union
}

/// Edit-distance similarity in `0.0..=1.0`.
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

#[derive(Debug, Clone)]
pub struct SimilarityMatch<'a> {
    pub entry: &'a CacheEntry,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SimilarityMatcher {
    config: SimilarityConfig,
}

impl SimilarityMatcher {
    pub fn new(config: SimilarityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// Blended similarity of two normalized strings. Empty input never matches.
    pub fn score(&self, a: &str, b: &str) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let we = self.config.edit_weight;
        let wt = self.config.token_weight;
        let total = we + wt;
        if total <= 0.0 {
            return 0.0;
        }
        ((we * edit_similarity(a, b) + wt * token_jaccard(a, b)) / total).clamp(0.0, 1.0)
    }

    /// Best candidate at or above the configured threshold.
    ///
    /// Ties on similarity go to the entry seen more often.
    pub fn best_match<'a, I>(&self, normalized: &str, candidates: I) -> Option<SimilarityMatch<'a>>
    where
        I: IntoIterator<Item = &'a CacheEntry>,
    {
        let mut best: Option<SimilarityMatch<'a>> = None;
        for entry in candidates {
            let similarity = self.score(normalized, &entry.normalized_translation);
            if similarity < self.config.threshold {
                continue;
            }
            let better = match &best {
                None => true,
                Some(b) => {
                    similarity > b.similarity
                        || (similarity == b.similarity && entry.hit_count > b.entry.hit_count)
                }
            };
            if better {
                best = Some(SimilarityMatch { entry, similarity });
            }
        }
        best
    }

    /// Multiplier applied to a matched judgment's components.
    pub fn adjustment_factor(&self, similarity: f64) -> f64 {
        let c = &self.config;
        (c.adjust_base + c.adjust_slope * (similarity - c.threshold)).clamp(0.0, 1.0)
    }

    /// Derive a judgment for a near-duplicate from the matched one.
    pub fn adjust(&self, judgment: &Judgment, similarity: f64) -> Judgment {
        let factor = self.adjustment_factor(similarity);
        Judgment {
            is_correct: judgment.is_correct,
            components: judgment.components.scaled(factor),
            feedback_text: judgment.feedback_text.clone(),
            alternative_answers: judgment.alternative_answers.clone(),
        }
    }
}
