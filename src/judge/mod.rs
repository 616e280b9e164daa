//! The judging seam and its guarded invocation.
//!
//! [`JudgeGateway`] is the only way out to an external grader. Callers never
//! see its errors directly: [`GuardedJudge`] bounds every call with a timeout,
//! retries a failed call once on a shorter budget, and reports the result as a
//! [`JudgeOutcome`] so the fallback path is an ordinary match arm.

pub mod heuristic;
pub mod llm;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::JudgeConfig;
use crate::gateway::ProviderError;
use crate::types::{Judgment, SentenceId};

pub use heuristic::HeuristicJudge;
pub use llm::{parse_judgment_response, LlmJudge};

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeRequest {
    pub sentence_id: SentenceId,
    /// Learner text as submitted (not normalized).
    pub translation: String,
    pub expected_answers: Vec<String>,
    pub source_text: Option<String>,
}

impl JudgeRequest {
    pub fn new(
        sentence_id: SentenceId,
        translation: impl Into<String>,
        expected_answers: Vec<String>,
    ) -> Self {
        Self {
            sentence_id,
            translation: translation.into(),
            expected_answers,
            source_text: None,
        }
    }

    pub fn with_source(mut self, source_text: impl Into<String>) -> Self {
        self.source_text = Some(source_text.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("judge timed out after {0:?}")]
    Timeout(Duration),
    #[error("judge failed: {message}")]
    Failed { message: String, retryable: bool },
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl JudgeError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[async_trait]
pub trait JudgeGateway: Send + Sync {
    /// Grade one translation. Implementations must give up within `timeout`.
    async fn judge(&self, req: &JudgeRequest, timeout: Duration) -> Result<Judgment, JudgeError>;
}

/// Result of a guarded judge call.
#[derive(Debug, Clone, PartialEq)]
pub enum JudgeOutcome {
    Judged(Judgment),
    TimedOut,
    Failed(String),
}

impl JudgeOutcome {
    pub fn judgment(&self) -> Option<&Judgment> {
        match self {
            Self::Judged(j) => Some(j),
            Self::TimedOut | Self::Failed(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct GuardedJudge {
    gateway: Arc<dyn JudgeGateway>,
    config: JudgeConfig,
}

impl GuardedJudge {
    pub fn new(gateway: Arc<dyn JudgeGateway>, config: JudgeConfig) -> Self {
        Self { gateway, config }
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    /// Call the gateway under the primary timeout, then retry failures on the
    /// shorter retry budget. A timeout ends the call immediately.
    pub async fn call(&self, req: &JudgeRequest) -> JudgeOutcome {
        let mut budget = self.config.timeout();
        let mut attempt = 0u32;
        loop {
            match self.attempt(req, budget).await {
                Ok(judgment) => return JudgeOutcome::Judged(judgment),
                Err(err) if err.is_timeout() => {
                    warn!(
                        sentence_id = req.sentence_id,
                        attempt,
                        timeout_ms = budget.as_millis() as u64,
                        "judge timed out"
                    );
                    return JudgeOutcome::TimedOut;
                }
                Err(err) if attempt < self.config.max_retries => {
                    debug!(sentence_id = req.sentence_id, error = %err, "judge failed, retrying");
                    attempt += 1;
                    budget = self.config.retry_timeout();
                }
                Err(err) => {
                    warn!(sentence_id = req.sentence_id, error = %err, attempts = attempt + 1, "judge failed");
                    return JudgeOutcome::Failed(err.to_string());
                }
            }
        }
    }

    async fn attempt(&self, req: &JudgeRequest, budget: Duration) -> Result<Judgment, JudgeError> {
        match tokio::time::timeout(budget, self.gateway.judge(req, budget)).await {
            Ok(result) => result,
            Err(_) => Err(JudgeError::Timeout(budget)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScoreComponents;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        calls: AtomicU32,
        failures_before_success: u32,
        delay: Duration,
    }

    #[async_trait]
    impl JudgeGateway for Scripted {
        async fn judge(&self, _req: &JudgeRequest, _timeout: Duration) -> Result<Judgment, JudgeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if n < self.failures_before_success {
                return Err(JudgeError::Failed {
                    message: "upstream 503".into(),
                    retryable: true,
                });
            }
            Ok(Judgment {
                is_correct: true,
                components: ScoreComponents::perfect(),
                feedback_text: "ok".into(),
                alternative_answers: vec![],
            })
        }
    }

    fn guarded(failures: u32, delay_ms: u64) -> (Arc<Scripted>, GuardedJudge) {
        let gw = Arc::new(Scripted {
            calls: AtomicU32::new(0),
            failures_before_success: failures,
            delay: Duration::from_millis(delay_ms),
        });
        let judge = GuardedJudge::new(gw.clone(), JudgeConfig::default());
        (gw, judge)
    }

    fn req() -> JudgeRequest {
        JudgeRequest::new(1, "Bebo café", vec!["Bebo café".into()])
    }

    #[tokio::test(start_paused = true)]
    async fn single_failure_is_retried() {
        let (gw, judge) = guarded(1, 10);
        assert!(matches!(judge.call(&req()).await, JudgeOutcome::Judged(_)));
        assert_eq!(gw.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_gives_up_after_one_retry() {
        let (gw, judge) = guarded(5, 10);
        assert!(matches!(judge.call(&req()).await, JudgeOutcome::Failed(_)));
        assert_eq!(gw.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_gateway_times_out_without_retry() {
        let (gw, judge) = guarded(0, 2_500);
        assert_eq!(judge.call(&req()).await, JudgeOutcome::TimedOut);
        assert_eq!(gw.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_uses_the_shorter_budget() {
        // First call fails fast; the retry takes 800ms which exceeds 500ms.
        struct FailThenSlow(AtomicU32);

        #[async_trait]
        impl JudgeGateway for FailThenSlow {
            async fn judge(&self, _req: &JudgeRequest, _t: Duration) -> Result<Judgment, JudgeError> {
                if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(JudgeError::failed("boom"));
                }
                tokio::time::sleep(Duration::from_millis(800)).await;
                Err(JudgeError::failed("unreachable"))
            }
        }

        let judge = GuardedJudge::new(
            Arc::new(FailThenSlow(AtomicU32::new(0))),
            JudgeConfig::default(),
        );
        assert_eq!(judge.call(&req()).await, JudgeOutcome::TimedOut);
    }
}
