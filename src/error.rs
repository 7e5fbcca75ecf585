use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::retry::RateLimited;

// Providers do not agree on how they report throttling: some send a bare 429,
// Gemini also wraps it in a RESOURCE_EXHAUSTED body.
static RATE_LIMIT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b429\b|RESOURCE_EXHAUSTED|rate.?limit|too many requests").unwrap()
});

/// Failure talking to an embedding or generation backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rate limited the request: {0}")]
    RateLimited(String),
    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("request to provider failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("provider initialization failed: {0}")]
    Init(String),
}

impl ProviderError {
    /// Builds the error for a non-success HTTP reply, classifying throttling.
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 429 || RATE_LIMIT_PATTERN.is_match(&body) {
            ProviderError::RateLimited(format!("{} - {}", status, body))
        } else {
            ProviderError::Api { status, body }
        }
    }
}

impl RateLimited for ProviderError {
    fn is_rate_limited(&self) -> bool {
        match self {
            ProviderError::RateLimited(_) => true,
            ProviderError::Api { status, body } => {
                *status == 429 || RATE_LIMIT_PATTERN.is_match(body)
            }
            _ => false,
        }
    }
}
