//! Drives a whole run: resolves which nodes still need questions, generates
//! them one at a time and persists after every node.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::exemplar::ExemplarRepository;
use crate::generation::{LanguageModel, QuestionGenerator};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::NodeResult;
use crate::progress::{completed_node_ids, ProgressStore, RunState};

pub const ALL_NODES: &str = "all";
pub const DEFAULT_TRIAL_NODES: usize = 3;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum NodeSelection {
    #[default]
    All,
    Explicit(Vec<String>),
    /// The first `n` nodes in declaration order.
    Trial(usize),
}

impl NodeSelection {
    /// `all` (any case) selects every node; anything else is a comma separated
    /// id list with blanks ignored.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(ALL_NODES) {
            return Self::All;
        }
        Self::Explicit(
            trimmed
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    fn requested_ids(&self, repository: &ExemplarRepository) -> Vec<String> {
        match self {
            Self::All => repository.ids().map(str::to_string).collect(),
            Self::Trial(count) => repository.ids().take(*count).map(str::to_string).collect(),
            Self::Explicit(ids) => {
                let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
                let mut requested: Vec<String> = repository
                    .ids()
                    .filter(|id| wanted.contains(id))
                    .map(str::to_string)
                    .collect();

                // Unknown ids trail the declared ones so they can be reported.
                let mut seen = HashSet::new();
                requested.extend(
                    ids.iter()
                        .filter(|id| !repository.contains(id) && seen.insert(id.as_str()))
                        .cloned(),
                );
                requested
            }
        }
    }
}

impl fmt::Display for NodeSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all nodes"),
            Self::Explicit(ids) => write!(f, "nodes {}", ids.join(", ")),
            Self::Trial(count) => write!(f, "trial run of the first {count} nodes"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunRequest {
    pub selection: NodeSelection,
    pub store: ProgressStore,
}

impl RunRequest {
    pub fn new(
        selection: NodeSelection,
        output_path: impl Into<PathBuf>,
        topic_label: impl Into<String>,
    ) -> Self {
        Self {
            selection,
            store: ProgressStore::new(output_path, topic_label),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total_nodes: usize,
    pub previously_completed: usize,
    pub newly_generated: usize,
    pub failed_nodes: Vec<String>,
    pub skipped_unknown: Vec<String>,
    pub total_questions: usize,
    pub output_path: PathBuf,
    pub save_failures: usize,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed_nodes.is_empty() && self.skipped_unknown.is_empty() && self.save_failures == 0
    }
}

pub struct RunController<'a> {
    model: &'a dyn LanguageModel,
    generator: QuestionGenerator<'a>,
    sink: &'a dyn LogSink,
}

impl<'a> RunController<'a> {
    pub fn new(
        model: &'a dyn LanguageModel,
        generator: QuestionGenerator<'a>,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            model,
            generator,
            sink,
        }
    }

    pub fn run(&self, request: &RunRequest, repository: &ExemplarRepository) -> RunSummary {
        let store = &request.store;
        let mut state = self.load_progress(store);
        let completed = completed_node_ids(&state);
        let previously_completed = state.len();

        let mut summary = RunSummary {
            previously_completed,
            output_path: store.path().to_path_buf(),
            ..RunSummary::default()
        };

        self.log(LogLevel::Info, format!("Selected {}", request.selection));
        let mut pending = Vec::new();
        for node_id in request.selection.requested_ids(repository) {
            if completed.contains(&node_id) {
                continue;
            }
            if !repository.contains(&node_id) {
                self.log(
                    LogLevel::Warn,
                    format!("Node `{node_id}` not found in exemplars, skipping"),
                );
                summary.skipped_unknown.push(node_id);
                continue;
            }
            pending.push(node_id);
        }

        if pending.is_empty() {
            self.log(
                LogLevel::Info,
                "All requested nodes are already generated, nothing to do",
            );
            summary.total_nodes = state.len();
            summary.total_questions = state.total_questions();
            return summary;
        }

        self.log(
            LogLevel::Info,
            format!("Generating {} nodes: {}", pending.len(), pending.join(", ")),
        );

        for node_id in &pending {
            let Some(exemplar) = repository.get(node_id) else {
                continue;
            };
            let ordinal = state.next_ordinal();
            let outcome =
                self.generator
                    .generate(self.model, exemplar, ordinal, state.question_pool());

            if !outcome.is_success() {
                self.log(
                    LogLevel::Warn,
                    format!("Skipping node `{node_id}`: no questions generated"),
                );
                summary.failed_nodes.push(node_id.clone());
                continue;
            }

            let generated = outcome.questions.len();
            state.push(NodeResult::new(
                node_id.as_str(),
                ordinal,
                exemplar.title.as_str(),
                outcome.questions,
            ));
            summary.newly_generated += 1;
            if self.persist(store, &state, &mut summary) {
                self.log(
                    LogLevel::Info,
                    format!(
                        "Saved node {ordinal} `{node_id}` with {generated} questions ({} nodes in file)",
                        state.len()
                    ),
                );
            }
        }

        self.persist(store, &state, &mut summary);

        summary.total_nodes = state.len();
        summary.total_questions = state.total_questions();
        self.report(&summary);
        summary
    }

    fn load_progress(&self, store: &ProgressStore) -> RunState {
        let state = store.load_existing(self.sink);
        if state.is_empty() {
            self.log(LogLevel::Info, "No existing progress found, starting fresh");
            return state;
        }

        let ids = state.completed_ids();
        let preview = ids.iter().take(5).copied().collect::<Vec<_>>().join(", ");
        let ellipsis = if ids.len() > 5 { "..." } else { "" };
        self.log(
            LogLevel::Info,
            format!(
                "Found existing file with {} completed nodes: {preview}{ellipsis}",
                ids.len()
            ),
        );
        state
    }

    fn persist(&self, store: &ProgressStore, state: &RunState, summary: &mut RunSummary) -> bool {
        match store.save(state) {
            Ok(()) => true,
            Err(err) => {
                summary.save_failures += 1;
                self.log(
                    LogLevel::Error,
                    format!("Failed to save progress to {}: {err}", display(store.path())),
                );
                false
            }
        }
    }

    fn report(&self, summary: &RunSummary) {
        self.log(
            LogLevel::Info,
            format!(
                "Run complete: {} nodes in file ({} previously completed, {} newly generated), {} questions total",
                summary.total_nodes,
                summary.previously_completed,
                summary.newly_generated,
                summary.total_questions
            ),
        );
        if !summary.failed_nodes.is_empty() {
            self.log(
                LogLevel::Warn,
                format!("Nodes without output: {}", summary.failed_nodes.join(", ")),
            );
        }
        if summary.save_failures > 0 {
            self.log(
                LogLevel::Error,
                format!("{} saves failed", summary.save_failures),
            );
        }
        self.log(
            LogLevel::Info,
            format!("Output: {}", display(&summary.output_path)),
        );
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{Backoff, GenerationParams, LanguageModelError};
    use crate::logging::VecLogSink;
    use crate::prompts::{PromptComposer, PromptRegistry};
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    const EXEMPLARS: &str = r#"{
        "n-a": {"title": "Alpha", "exemplarProblems": [{"problemText": "a"}]},
        "n-b": {"title": "Beta", "exemplarProblems": [{"problemText": "b"}]},
        "n-c": {"title": "Gamma", "exemplarProblems": [{"problemText": "c"}]},
        "n-d": {"title": "Delta", "exemplarProblems": [{"problemText": "d"}]}
    }"#;

    struct NoWait;

    impl Backoff for NoWait {
        fn wait(&self, _delay: Duration) {}
    }

    /// Returns two questions per call, failing for prompts about `Beta`.
    #[derive(Default)]
    struct TitleModel {
        prompts: Mutex<Vec<String>>,
    }

    impl LanguageModel for TitleModel {
        fn generate(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<String, LanguageModelError> {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            if prompt.contains("**Title**: Beta") {
                return Ok("no questions today".to_string());
            }
            let call = prompts.len();
            Ok(format!(
                r#"[{{"problemText": "call {call} first"}}, {{"problemText": "call {call} second"}}]"#
            ))
        }
    }

    fn composer() -> PromptComposer {
        PromptComposer::new(PromptRegistry::new().unwrap(), "Secondary 3 students")
    }

    #[test]
    fn parses_node_selection() {
        assert_eq!(NodeSelection::parse("all"), NodeSelection::All);
        assert_eq!(NodeSelection::parse(" ALL "), NodeSelection::All);
        assert_eq!(
            NodeSelection::parse("n-b, ,n-a,"),
            NodeSelection::Explicit(vec!["n-b".into(), "n-a".into()])
        );
    }

    #[test]
    fn trial_selection_takes_declared_prefix() {
        let repository = ExemplarRepository::from_json_str(EXEMPLARS).unwrap();
        assert_eq!(
            NodeSelection::Trial(DEFAULT_TRIAL_NODES).requested_ids(&repository),
            vec!["n-a", "n-b", "n-c"]
        );
    }

    #[test]
    fn explicit_selection_follows_declaration_order() {
        let repository = ExemplarRepository::from_json_str(EXEMPLARS).unwrap();
        assert_eq!(
            NodeSelection::Explicit(vec!["n-c".into(), "n-a".into(), "n-c".into()])
                .requested_ids(&repository),
            vec!["n-a", "n-c"]
        );
        assert_eq!(
            NodeSelection::parse("n-zzz, n-d, n-b, n-zzz, n-yyy").requested_ids(&repository),
            vec!["n-b", "n-d", "n-zzz", "n-yyy"]
        );
    }

    #[test]
    fn failed_nodes_do_not_consume_ordinals() {
        let temp = tempdir().unwrap();
        let output = temp.path().join("topic.yaml");
        let repository = ExemplarRepository::from_json_str(EXEMPLARS).unwrap();
        let composer = composer();
        let sink = VecLogSink::new();
        let generator = QuestionGenerator::new(&composer, &sink)
            .with_count(2)
            .with_max_retries(2)
            .with_backoff(&NoWait);
        let model = TitleModel::default();
        let controller = RunController::new(&model, generator, &sink);

        let summary = controller.run(
            &RunRequest::new(NodeSelection::All, &output, "Topic"),
            &repository,
        );

        assert_eq!(summary.newly_generated, 3);
        assert_eq!(summary.failed_nodes, vec!["n-b"]);
        assert_eq!(summary.total_questions, 6);
        assert_eq!(summary.save_failures, 0);

        let state = ProgressStore::new(&output, "Topic").load_existing(&sink);
        let numbered: Vec<(&str, usize)> = state
            .nodes()
            .iter()
            .map(|node| (node.id.as_str(), node.node_number))
            .collect();
        assert_eq!(numbered, vec![("n-a", 1), ("n-c", 2), ("n-d", 3)]);
        assert_eq!(state.nodes()[1].questions()[0].id, "q2-1");
        assert!(sink.contains(LogLevel::Warn, "Skipping node `n-b`"));
    }

    #[test]
    fn later_prompts_carry_earlier_questions() {
        let temp = tempdir().unwrap();
        let output = temp.path().join("topic.yaml");
        let repository = ExemplarRepository::from_json_str(EXEMPLARS).unwrap();
        let composer = composer();
        let sink = VecLogSink::new();
        let generator = QuestionGenerator::new(&composer, &sink)
            .with_count(2)
            .with_backoff(&NoWait);
        let model = TitleModel::default();
        let controller = RunController::new(&model, generator, &sink);

        controller.run(
            &RunRequest::new(
                NodeSelection::Explicit(vec!["n-a".into(), "n-c".into()]),
                &output,
                "Topic",
            ),
            &repository,
        );

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[0].contains("ANTI-REPETITION"));
        assert!(prompts[1].contains("1. call 1 first"));
        assert!(prompts[1].contains("2. call 1 second"));
    }

    #[test]
    fn unknown_and_completed_nodes_are_skipped() {
        let temp = tempdir().unwrap();
        let output = temp.path().join("topic.yaml");
        let repository = ExemplarRepository::from_json_str(EXEMPLARS).unwrap();
        let composer = composer();
        let sink = VecLogSink::new();
        let model = TitleModel::default();

        let first = RunController::new(
            &model,
            QuestionGenerator::new(&composer, &sink)
                .with_count(2)
                .with_backoff(&NoWait),
            &sink,
        );
        first.run(
            &RunRequest::new(NodeSelection::parse("n-a"), &output, "Topic"),
            &repository,
        );
        let before = fs::read_to_string(&output).unwrap();

        let second = RunController::new(
            &model,
            QuestionGenerator::new(&composer, &sink)
                .with_count(2)
                .with_backoff(&NoWait),
            &sink,
        );
        let summary = second.run(
            &RunRequest::new(NodeSelection::parse("n-a,n-zzz"), &output, "Topic"),
            &repository,
        );

        assert_eq!(summary.previously_completed, 1);
        assert_eq!(summary.newly_generated, 0);
        assert_eq!(summary.skipped_unknown, vec!["n-zzz"]);
        assert_eq!(fs::read_to_string(&output).unwrap(), before);
        assert!(sink.contains(LogLevel::Info, "nothing to do"));
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[test]
    fn save_failures_are_counted_not_fatal() {
        let temp = tempdir().unwrap();
        let blocker = temp.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();
        let output = blocker.join("topic.yaml");
        let repository = ExemplarRepository::from_json_str(EXEMPLARS).unwrap();
        let composer = composer();
        let sink = VecLogSink::new();
        let model = TitleModel::default();
        let controller = RunController::new(
            &model,
            QuestionGenerator::new(&composer, &sink)
                .with_count(2)
                .with_backoff(&NoWait),
            &sink,
        );

        let summary = controller.run(
            &RunRequest::new(NodeSelection::parse("n-a"), &output, "Topic"),
            &repository,
        );

        assert_eq!(summary.newly_generated, 1);
        assert_eq!(summary.save_failures, 2);
        assert!(!summary.is_clean());
        assert!(sink.contains(LogLevel::Error, "Failed to save progress"));
    }
}
