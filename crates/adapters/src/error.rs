use reqwest::StatusCode;
use thiserror::Error;

use qbank_core::LanguageModelError;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http request failed: {0}")]
    Http(reqwest::Error),
    #[error("failed to parse response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
    #[error("no API key for provider `{provider}`: set {vars}")]
    MissingCredential { provider: String, vars: String },
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("operation failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        source: Box<AdapterError>,
    },
    #[error("API returned an empty response")]
    EmptyResponse,
}

impl AdapterError {
    pub fn retry_exhausted(attempts: usize, source: AdapterError) -> Self {
        AdapterError::RetryExhausted {
            attempts,
            source: Box::new(source),
        }
    }

    /// 429 responses and bodies that mention a quota or rate limit.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            AdapterError::HttpStatus { status, body } => {
                let lower = body.to_ascii_lowercase();
                *status == StatusCode::TOO_MANY_REQUESTS
                    || lower.contains("quota")
                    || lower.contains("rate limit")
                    || lower.contains("rate_limit")
            }
            _ => false,
        }
    }
}

/// The request URL is dropped because the Gemini key travels in the query.
impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        AdapterError::Http(err.without_url())
    }
}

impl From<AdapterError> for LanguageModelError {
    fn from(err: AdapterError) -> Self {
        LanguageModelError::new(err)
    }
}
