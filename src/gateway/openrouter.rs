//! OpenRouter chat-completions adapter.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::{ChatRequest, ChatResponse, FinishReason, Message};
use super::ChatGateway;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Grading replies are a few hundred bytes; anything near this is garbage.
const MAX_RESPONSE_BYTES: usize = 256 * 1024;

const MAX_PROMPT_CHARS: usize = 32_000;

/// Used when a 429 carries no usable `retry-after`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenRouterAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    /// Reads `OPENROUTER_API_KEY`, and optionally `OPENROUTER_BASE_URL` and
    /// `OPENROUTER_TIMEOUT_SECONDS`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ProviderError::Config("OPENROUTER_API_KEY not set".into()))?;
        let base_url =
            std::env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        let timeout = std::env::var("OPENROUTER_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);
        Self::with_config(api_key, base_url, timeout)
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key.into()))
            .map_err(|_| ProviderError::Config("API key is not a valid header value".into()))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireFormat>,
}

#[derive(Serialize)]
struct WireFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: Option<WireMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct WireError {
    message: Option<String>,
    code: Option<serde_json::Value>,
}

/// Drain the body, failing once it grows past the cap.
async fn read_capped(mut response: reqwest::Response) -> Result<Vec<u8>, ProviderError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if bytes.len() + chunk.len() > MAX_RESPONSE_BYTES {
            return Err(ProviderError::upstream(
                format!("response exceeds {MAX_RESPONSE_BYTES} bytes"),
                false,
            ));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs)
}

/// Map a non-2xx reply onto a classified error.
fn classify_failure(status: StatusCode, mut context: ErrorContext, body: &[u8]) -> ProviderError {
    let wire_error = serde_json::from_slice::<WireResponse>(body)
        .ok()
        .and_then(|r| r.error);
    let message = match wire_error {
        Some(err) => {
            context.provider_code = err.code.map(|c| match c {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            });
            err.message.unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
        }
        None => format!("HTTP {}", status.as_u16()),
    };
    match status {
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => {
            ProviderError::InvalidRequest(message)
        }
        _ => ProviderError::Upstream {
            message,
            retryable: status.is_server_error(),
            context,
        },
    }
}

fn into_chat_response(body: &[u8], started: Instant) -> Result<ChatResponse, ProviderError> {
    let parsed: WireResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::upstream(format!("malformed completion: {e}"), false))?;
    if let Some(err) = parsed.error {
        return Err(ProviderError::upstream(
            err.message.unwrap_or_else(|| "provider error in 200 body".into()),
            false,
        ));
    }

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::upstream("completion has no choices", false))?;
    let finish_reason = FinishReason::parse(choice.finish_reason.as_deref());
    if finish_reason == FinishReason::ContentFilter {
        return Err(ProviderError::Refused("content filtered by provider".into()));
    }
    let content = choice.message.and_then(|m| m.content).unwrap_or_default();
    if content.trim().is_empty() {
        return Err(ProviderError::upstream("empty completion", true));
    }

    let usage = parsed.usage.unwrap_or(WireUsage {
        prompt_tokens: 0,
        completion_tokens: 0,
    });
    Ok(ChatResponse {
        content,
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        latency: started.elapsed(),
        finish_reason,
    })
}

#[async_trait]
impl ChatGateway for OpenRouterAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let chars = req.prompt_chars();
        if chars > MAX_PROMPT_CHARS {
            return Err(ProviderError::InvalidRequest(format!(
                "prompt is {chars} characters (max {MAX_PROMPT_CHARS})"
            )));
        }

        let started = Instant::now();
        let wire = WireRequest {
            model: &req.model,
            messages: &req.messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: req.json_mode.then_some(WireFormat {
                kind: "json_object",
            }),
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&wire)
            .send()
            .await?;

        let status = response.status();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let context = ErrorContext::from_status(status.as_u16(), request_id);

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                retry_after: retry_after(response.headers()),
                context,
            });
        }

        let body = read_capped(response).await?;
        if !status.is_success() {
            return Err(classify_failure(status, context, &body));
        }
        into_chat_response(&body, started)
    }
}
