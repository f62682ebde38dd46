mod credentials;
mod error;
mod llm;
mod retry;

pub use credentials::{resolve_api_key, resolve_api_key_with};
pub use error::AdapterError;
pub use llm::{
    create_language_model, create_language_model_with_key, ClaudeAdapter, GeminiAdapter,
    ANTHROPIC_VERSION, CLAUDE_DEFAULT_BASE_URL, GEMINI_DEFAULT_BASE_URL,
};
pub use retry::{call_with_rate_limit_retry, thread_sleep, RateLimitPolicy};

pub use qbank_core::{GenerationParams, LanguageModel, LanguageModelError, ProviderConfig};
