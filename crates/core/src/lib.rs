pub mod config;
pub mod exemplar;
pub mod generation;
pub mod logging;
pub mod model;
pub mod progress;
pub mod prompts;
pub mod run;

pub use config::{
    ConfigError, GenerationConfig, GeneratorConfig, PromptConfig, ProviderConfig, CLAUDE_PROFILE,
    GEMINI_PROFILE,
};
pub use exemplar::{Exemplar, ExemplarProblem, ExemplarRepository, LoadError};
pub use generation::{
    backoff_delay, decide_attempt, parse_batch, AttemptDecision, Backoff, FormatError,
    GenerationOutcome, GenerationParams, GenerationState, LanguageModel, LanguageModelError,
    ParsedBatch, QuestionGenerator, ThreadBackoff,
};
pub use logging::{
    LogBridge, LogLevel, LogRecord, LogSink, NullLogSink, SharedLogSink, StdoutLogSink,
    VecLogSink,
};
pub use model::{GeneratedQuestion, NodeDescriptor, NodeResult};
pub use progress::{
    completed_node_ids, load_existing, save, test_output_path, topic_label_from_path,
    PersistError, ProgressStore, RunState,
};
pub use prompts::{PromptComposer, PromptError, PromptRegistry, PromptSource, PromptTemplate};
pub use run::{NodeSelection, RunController, RunRequest, RunSummary, DEFAULT_TRIAL_NODES};
