mod openai;

pub use openai::OpenAiProvider;

use thiserror::Error;

/// Classified provider failure. The orchestrator never shows these to the
/// user verbatim; they exist so logs say *why* a model call failed.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed (status {0})")]
    Auth(u16),
    #[error("rate limited")]
    RateLimit,
    #[error("provider-side error (status {0})")]
    Server(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed provider response: {0}")]
    BadResponse(String),
}

impl ProviderError {
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::Auth(status),
            429 => Self::RateLimit,
            500..=599 => Self::Server(status),
            _ => Self::BadResponse(format!("status {}: {}", status, truncate(body, 300))),
        }
    }
}

fn truncate(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}
