//! LLM-backed judge: grading prompt in, JSON verdict out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{JudgeError, JudgeGateway, JudgeRequest};
use crate::gateway::{ChatGateway, ChatRequest, ProviderError};
use crate::prompts::{GradingInput, PromptTemplate, DEFAULT_PROMPT};
use crate::types::{Judgment, ScoreComponents};

/// Cap on generated tokens; the verdict schema is small.
pub const GRADING_MAX_OUTPUT_TOKENS: u32 = 256;

#[derive(Debug, Deserialize)]
struct GradingJson {
    #[serde(default)]
    is_correct: Option<bool>,
    #[serde(default)]
    grammar: Option<f64>,
    #[serde(default)]
    naturalness: Option<f64>,
    #[serde(default)]
    completeness: Option<f64>,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default)]
    alternatives: Vec<String>,
    #[serde(default)]
    refused: Option<bool>,
}

/// Parse a grading reply into a [`Judgment`]. Components are clamped to `[0,1]`.
pub fn parse_judgment_response(raw: &str) -> Result<Judgment, JudgeError> {
    let json_str = extract_json(raw);
    let parsed: GradingJson = serde_json::from_str(json_str)
        .map_err(|e| JudgeError::failed(format!("unparseable verdict: {e}")))?;

    if parsed.refused.unwrap_or(false) {
        return Err(JudgeError::failed("model refused to grade"));
    }

    let field = |v: Option<f64>, name: &str| {
        v.ok_or_else(|| JudgeError::failed(format!("missing '{name}'")))
    };
    let components = ScoreComponents::new(
        field(parsed.grammar, "grammar")?,
        field(parsed.naturalness, "naturalness")?,
        field(parsed.completeness, "completeness")?,
    );
    let is_correct = parsed
        .is_correct
        .ok_or_else(|| JudgeError::failed("missing 'is_correct'"))?;

    Ok(Judgment {
        is_correct,
        components,
        feedback_text: parsed.feedback.unwrap_or_default().trim().to_string(),
        alternative_answers: parsed
            .alternatives
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect(),
    })
}

/// First balanced `{...}` object in the reply, for models that add prose.
fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find('{') else {
        return trimmed;
    };
    let remainder = &trimmed[start..];
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in remainder.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &remainder[..=i];
                }
            }
            _ => {}
        }
    }
    trimmed
}

pub struct LlmJudge {
    gateway: Arc<dyn ChatGateway>,
    model: String,
    template: PromptTemplate,
}

impl LlmJudge {
    pub fn new(gateway: Arc<dyn ChatGateway>, model: impl Into<String>) -> Self {
        Self {
            gateway,
            model: model.into(),
            template: DEFAULT_PROMPT,
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl JudgeGateway for LlmJudge {
    async fn judge(&self, req: &JudgeRequest, timeout: Duration) -> Result<Judgment, JudgeError> {
        let prompt = self.template.render(GradingInput {
            source_text: req.source_text.as_deref(),
            translation: &req.translation,
            expected_answers: &req.expected_answers,
        });
        let chat = ChatRequest::new(&self.model, prompt.to_messages())
            .with_max_tokens(GRADING_MAX_OUTPUT_TOKENS)
            .json_object();

        let response = tokio::time::timeout(timeout, self.gateway.chat(&chat))
            .await
            .map_err(|_| JudgeError::Timeout(timeout))?
            .map_err(|e: ProviderError| {
                if e.is_retryable() {
                    JudgeError::Failed {
                        message: e.to_string(),
                        retryable: true,
                    }
                } else {
                    JudgeError::Provider(e)
                }
            })?;

        debug!(
            sentence_id = req.sentence_id,
            model = %self.model,
            template = %prompt.template_slug,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            latency_ms = response.latency.as_millis() as u64,
            "llm judge replied"
        );
        parse_judgment_response(&response.content)
    }
}
