//! Transport failures, classified so the judge knows whether to try again.

use std::fmt;
use std::time::Duration;

/// What the provider told us about a failed call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub http_status: Option<u16>,
    /// e.g. "rate_limit_exceeded"
    pub provider_code: Option<String>,
    /// `x-request-id` response header.
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn from_status(status: u16, request_id: Option<String>) -> Self {
        Self {
            http_status: Some(status),
            provider_code: None,
            request_id,
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(status) = self.http_status {
            parts.push(format!("status={status}"));
        }
        if let Some(code) = &self.provider_code {
            parts.push(format!("code={code}"));
        }
        if let Some(id) = &self.request_id {
            parts.push(format!("request_id={id}"));
        }
        f.write_str(&parts.join(" "))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited, retry after {retry_after:?} ({context})")]
    RateLimited {
        retry_after: Duration,
        context: ErrorContext,
    },

    /// The request can never succeed as sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The provider declined to grade, e.g. a content filter.
    #[error("refused: {0}")]
    Refused(String),

    #[error("upstream error: {message} ({context})")]
    Upstream {
        message: String,
        retryable: bool,
        context: ErrorContext,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn upstream(message: impl Into<String>, retryable: bool) -> Self {
        Self::Upstream {
            message: message.into(),
            retryable,
            context: ErrorContext::default(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Upstream { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::InvalidRequest(_) | Self::Refused(_) | Self::Config(_) => false,
        }
    }

    /// Stable label for log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Refused(_) => "refused",
            Self::Upstream { .. } => "upstream",
            Self::Http(_) => "http",
            Self::Config(_) => "config",
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RateLimited { context, .. } | Self::Upstream { context, .. } => Some(context),
            _ => None,
        }
    }
}
