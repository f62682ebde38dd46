use std::fmt;

use super::backoff::{backoff_delay, Backoff, ThreadBackoff};
use super::batch::parse_batch;
use super::{GenerationParams, LanguageModel};
use crate::exemplar::Exemplar;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::GeneratedQuestion;
use crate::prompts::PromptComposer;

static THREAD_BACKOFF: ThreadBackoff = ThreadBackoff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationState {
    Pending,
    Attempting(usize),
    Complete,
    PartialAccepted,
    Failed,
}

impl GenerationState {
    pub fn yielded_items(self) -> bool {
        matches!(self, Self::Complete | Self::PartialAccepted)
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Attempting(attempt) => write!(f, "attempting ({attempt})"),
            Self::Complete => f.write_str("complete"),
            Self::PartialAccepted => f.write_str("partial accepted"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptDecision {
    AcceptFull,
    AcceptPartial,
    Retry,
    Fail,
}

/// Decides what follows an attempt that produced `items` usable entries.
/// Failed calls and batches with nothing usable count as zero items. A batch whose size differs from
/// `expected` is retried while attempts remain and accepted on the last one.
pub fn decide_attempt(
    attempt: usize,
    max_attempts: usize,
    items: usize,
    expected: usize,
) -> AttemptDecision {
    let attempts_remain = attempt < max_attempts;
    if items == expected && items > 0 {
        AttemptDecision::AcceptFull
    } else if attempts_remain {
        AttemptDecision::Retry
    } else if items > 0 {
        AttemptDecision::AcceptPartial
    } else {
        AttemptDecision::Fail
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenerationOutcome {
    pub node_id: String,
    pub state: GenerationState,
    pub attempts: usize,
    pub questions: Vec<GeneratedQuestion>,
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        self.state.yielded_items() && !self.questions.is_empty()
    }
}

/// Drives the per-node attempt loop.
pub struct QuestionGenerator<'a> {
    composer: &'a PromptComposer,
    sink: &'a dyn LogSink,
    backoff: &'a dyn Backoff,
    params: GenerationParams,
    count: usize,
    max_retries: usize,
}

impl<'a> QuestionGenerator<'a> {
    pub fn new(composer: &'a PromptComposer, sink: &'a dyn LogSink) -> Self {
        Self {
            composer,
            sink,
            backoff: &THREAD_BACKOFF,
            params: GenerationParams::default(),
            count: 5,
            max_retries: 3,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_backoff(mut self, backoff: &'a dyn Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub fn generate<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        exemplar: &Exemplar,
        ordinal: usize,
        recent_question_texts: &[String],
    ) -> GenerationOutcome {
        let node_id = exemplar.id.as_str();
        self.log(
            LogLevel::Info,
            format!(
                "[{node_id}] generating {} questions for node {ordinal} \"{}\"",
                self.count, exemplar.title
            ),
        );

        self.log(
            LogLevel::Trace,
            format!("[{node_id}] {}", GenerationState::Pending),
        );

        for attempt in 1..=self.max_retries {
            self.log(
                LogLevel::Trace,
                format!("[{node_id}] {}", GenerationState::Attempting(attempt)),
            );
            let items = self.attempt(model, exemplar, ordinal, recent_question_texts, attempt);
            let returned = items.len();

            match decide_attempt(attempt, self.max_retries, returned, self.count) {
                AttemptDecision::AcceptFull => {
                    self.log(
                        LogLevel::Info,
                        format!("[{node_id}] received {returned}/{} questions", self.count),
                    );
                    return self.accept(node_id, GenerationState::Complete, attempt, ordinal, items);
                }
                AttemptDecision::AcceptPartial => {
                    self.log(
                        LogLevel::Warn,
                        format!(
                            "[{node_id}] retries exhausted, accepting batch of {returned}/{} questions",
                            self.count
                        ),
                    );
                    return self.accept(
                        node_id,
                        GenerationState::PartialAccepted,
                        attempt,
                        ordinal,
                        items,
                    );
                }
                AttemptDecision::Retry => {
                    let delay = backoff_delay(attempt);
                    let reason = if returned == 0 {
                        "no usable questions".to_string()
                    } else {
                        format!("mismatched batch of {returned}/{}", self.count)
                    };
                    self.log(
                        LogLevel::Warn,
                        format!(
                            "[{node_id}] {reason}, retrying (attempt {}/{}) in {}s",
                            attempt + 1,
                            self.max_retries,
                            delay.as_secs()
                        ),
                    );
                    self.backoff.wait(delay);
                }
                AttemptDecision::Fail => {
                    self.log(
                        LogLevel::Error,
                        format!(
                            "[{node_id}] failed to generate questions after {} attempts",
                            self.max_retries
                        ),
                    );
                    return GenerationOutcome {
                        node_id: node_id.to_string(),
                        state: GenerationState::Failed,
                        attempts: attempt,
                        questions: Vec::new(),
                    };
                }
            }
        }

        GenerationOutcome {
            node_id: node_id.to_string(),
            state: GenerationState::Failed,
            attempts: self.max_retries,
            questions: Vec::new(),
        }
    }

    fn attempt<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        exemplar: &Exemplar,
        ordinal: usize,
        recent_question_texts: &[String],
        attempt: usize,
    ) -> Vec<GeneratedQuestion> {
        let node_id = exemplar.id.as_str();
        let prompt = match self
            .composer
            .compose(exemplar, self.count, ordinal, recent_question_texts)
        {
            Ok(prompt) => prompt,
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    format!("[{node_id}] could not compose prompt: {err}"),
                );
                return Vec::new();
            }
        };
        self.log(
            LogLevel::Debug,
            format!(
                "[{node_id}] prompt (attempt {attempt}/{}):\n{prompt}",
                self.max_retries
            ),
        );

        let response = match model.generate(&prompt, &self.params) {
            Ok(response) => response,
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    format!("[{node_id}] provider call failed (attempt {attempt}): {err}"),
                );
                return Vec::new();
            }
        };
        self.log(
            LogLevel::Debug,
            format!("[{node_id}] response (attempt {attempt}):\n{response}"),
        );

        match parse_batch(&response, self.count) {
            Ok(batch) => {
                if !batch.is_complete() {
                    self.log(
                        LogLevel::Warn,
                        format!(
                            "[{node_id}] requested {}, got {} questions",
                            self.count,
                            batch.len()
                        ),
                    );
                }
                let returned = batch.len();
                let usable: Vec<GeneratedQuestion> = batch
                    .into_items()
                    .into_iter()
                    .filter(GeneratedQuestion::is_usable)
                    .collect();
                let dropped = returned - usable.len();
                if dropped > 0 {
                    self.log(
                        LogLevel::Warn,
                        format!("[{node_id}] dropped {dropped} questions without problem text"),
                    );
                }
                usable
            }
            Err(err) => {
                let preview: String = response.chars().take(300).collect();
                self.log(
                    LogLevel::Warn,
                    format!("[{node_id}] unusable response (attempt {attempt}): {err}; preview: {preview}"),
                );
                Vec::new()
            }
        }
    }

    fn accept(
        &self,
        node_id: &str,
        state: GenerationState,
        attempts: usize,
        ordinal: usize,
        mut questions: Vec<GeneratedQuestion>,
    ) -> GenerationOutcome {
        for (index, question) in questions.iter_mut().enumerate() {
            question.assign_ids(ordinal, index + 1);
        }

        GenerationOutcome {
            node_id: node_id.to_string(),
            state,
            attempts,
            questions,
        }
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}
