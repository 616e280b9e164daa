//! Local template-based grading used when the external judge is unavailable.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use super::{JudgeError, JudgeGateway, JudgeRequest};
use crate::normalize::{normalize, tokens};
use crate::similarity::{edit_similarity, SimilarityMatcher};
use crate::types::{Judgment, ScoreComponents};

/// Grades by closeness to the expected answers.
#[derive(Debug, Clone, Default)]
pub struct HeuristicJudge {
    matcher: SimilarityMatcher,
}

impl HeuristicJudge {
    pub fn new(matcher: SimilarityMatcher) -> Self {
        Self { matcher }
    }

    pub fn evaluate(&self, translation: &str, expected_answers: &[String]) -> Judgment {
        let normalized = normalize(translation);
        if normalized.is_empty() {
            return verdict(false, ScoreComponents::new(0.0, 0.0, 0.0), "No translation was given.");
        }

        let best = expected_answers
            .iter()
            .map(|answer| {
                let expected = normalize(answer);
                let sim = self.matcher.score(&normalized, &expected);
                (answer, expected, sim)
            })
            .filter(|(_, expected, _)| !expected.is_empty())
            .max_by(|a, b| a.2.total_cmp(&b.2));

        let Some((answer, expected, sim)) = best else {
            return verdict(
                false,
                ScoreComponents::new(0.5, 0.5, 0.5),
                "Your answer was saved, but it could not be checked right now.",
            );
        };

        if expected == normalized {
            let mut j = verdict(true, ScoreComponents::perfect(), "Correct!");
            j.alternative_answers = others(expected_answers, answer);
            return j;
        }

        let components = ScoreComponents::new(
            edit_similarity(&normalized, &expected),
            sim,
            coverage(&normalized, &expected),
        );
        let threshold = self.matcher.config().threshold;
        let feedback = if sim >= threshold {
            format!("Almost! Compare your answer with \u{ab}{}\u{bb}.", answer.trim())
        } else if sim >= threshold / 2.0 {
            format!(
                "Part of the meaning is there. One correct translation is \u{ab}{}\u{bb}.",
                answer.trim()
            )
        } else {
            format!("Not quite. A correct translation is \u{ab}{}\u{bb}.", answer.trim())
        };
        let mut j = verdict(sim >= threshold, components, &feedback);
        j.alternative_answers = others(expected_answers, answer);
        j
    }
}

#[async_trait]
impl JudgeGateway for HeuristicJudge {
    async fn judge(&self, req: &JudgeRequest, _timeout: Duration) -> Result<Judgment, JudgeError> {
        Ok(self.evaluate(&req.translation, &req.expected_answers))
    }
}

fn verdict(is_correct: bool, components: ScoreComponents, feedback: &str) -> Judgment {
    Judgment {
        is_correct,
        components,
        feedback_text: feedback.to_string(),
        alternative_answers: Vec::new(),
    }
}

/// Fraction of the expected tokens present in the translation.
fn coverage(normalized: &str, expected: &str) -> f64 {
    let want: HashSet<&str> = tokens(expected).into_iter().collect();
    if want.is_empty() {
        return 0.0;
    }
    let have: HashSet<&str> = tokens(normalized).into_iter().collect();
    want.intersection(&have).count() as f64 / want.len() as f64
}

fn others(expected_answers: &[String], chosen: &str) -> Vec<String> {
    expected_answers
        .iter()
        .filter(|a| a.as_str() != chosen)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers() -> Vec<String> {
        vec![
            "Bebo café cada mañana".to_string(),
            "Tomo café todas las mañanas".to_string(),
        ]
    }

    #[test]
    fn normalized_match_is_perfect() {
        let j = HeuristicJudge::default().evaluate("  bebo cafe cada manana!", &answers());
        assert!(j.is_correct);
        assert_eq!(j.components, ScoreComponents::perfect());
        assert_eq!(j.alternative_answers, vec!["Tomo café todas las mañanas"]);
    }

    #[test]
    fn close_answer_gets_partial_credit() {
        let j = HeuristicJudge::default().evaluate("Bebo cafe cada manan", &answers());
        assert!(j.components.grammar > 0.8);
        assert!(j.components.completeness < 1.0);
        assert!(j.feedback_text.contains("Bebo café cada mañana"));
    }

    #[test]
    fn unrelated_answer_scores_low() {
        let j = HeuristicJudge::default().evaluate("El perro duerme", &answers());
        assert!(!j.is_correct);
        assert!(j.feedback_text.starts_with("Not quite"));
    }

    #[test]
    fn empty_input_and_missing_references() {
        let judge = HeuristicJudge::default();
        let empty = judge.evaluate("  ...  ", &answers());
        assert!(!empty.is_correct);
        assert_eq!(empty.components.grammar, 0.0);

        let unchecked = judge.evaluate("Hola", &[]);
        assert_eq!(unchecked.components.naturalness, 0.5);
    }
}
