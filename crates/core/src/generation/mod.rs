use std::error::Error as StdError;
use std::fmt;

mod backoff;
mod batch;
mod orchestrator;

pub use backoff::{backoff_delay, Backoff, ThreadBackoff};
pub use batch::{parse_batch, strip_code_fence, FormatError, ParsedBatch};
pub use orchestrator::{
    decide_attempt, AttemptDecision, GenerationOutcome, GenerationState, QuestionGenerator,
};

pub const DEFAULT_TEMPERATURE: f32 = 0.8;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8000;

#[derive(Debug)]
pub struct LanguageModelError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl LanguageModelError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
        }
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
        self.inner
    }

    pub fn as_inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.as_ref()
    }
}

impl fmt::Display for LanguageModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for LanguageModelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

/// A text completion provider. Calls block until the provider answers or fails.
pub trait LanguageModel: Send + Sync {
    fn generate(&self, prompt: &str, params: &GenerationParams)
        -> Result<String, LanguageModelError>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, LanguageModelError> {
        (**self).generate(prompt, params)
    }
}

impl<M: LanguageModel + ?Sized> LanguageModel for &M {
    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, LanguageModelError> {
        (**self).generate(prompt, params)
    }
}
