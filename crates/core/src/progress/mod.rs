//! Incremental persistence of generated nodes and resume-by-diff support.

use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::model::NodeResult;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

static LEVEL_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]\d+-[a-z]+-").expect("invalid level prefix regex"));

const TEST_SUFFIX: &str = "-TEST";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to prepare output directory `{path}`: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to serialize progress: {0}")]
    Serialize(#[from] serde_yaml::Error),
    #[error("failed to write progress to `{path}`: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to move progress into place at `{path}`: {source}")]
    Rename { path: PathBuf, source: io::Error },
}

/// Accumulated output of a run plus the flat pool of problem texts used for
/// anti-repetition prompting. Nodes are append-only.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunState {
    nodes: Vec<NodeResult>,
    question_pool: Vec<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: Vec<NodeResult>) -> Self {
        let mut state = Self::default();
        for node in nodes {
            state.push(node);
        }
        state
    }

    pub fn push(&mut self, node: NodeResult) {
        self.question_pool
            .extend(node.problem_texts().map(str::to_string));
        self.nodes.push(node);
    }

    pub fn nodes(&self) -> &[NodeResult] {
        &self.nodes
    }

    pub fn question_pool(&self) -> &[String] {
        &self.question_pool
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn next_ordinal(&self) -> usize {
        self.nodes.len() + 1
    }

    pub fn completed_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|node| node.id.as_str()).collect()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.iter().any(|node| node.id == node_id)
    }

    pub fn total_questions(&self) -> usize {
        self.nodes.iter().map(|node| node.questions().len()).sum()
    }
}

pub fn completed_node_ids(state: &RunState) -> BTreeSet<String> {
    state.nodes.iter().map(|node| node.id.clone()).collect()
}

#[derive(Debug, Default, Deserialize)]
struct ProgressDocument {
    #[serde(default)]
    nodes: Vec<NodeResult>,
}

#[derive(Serialize)]
struct ProgressDocumentRef<'a> {
    nodes: &'a [NodeResult],
}

/// Loads prior output. A missing, unreadable or unparsable file degrades to
/// an empty state with a warning.
pub fn load_existing(path: &Path, sink: &dyn LogSink) -> RunState {
    if !path.exists() {
        return RunState::default();
    }

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(source) => {
            sink.log(LogRecord::new(
                LogLevel::Warn,
                format!(
                    "could not read existing output {}, starting fresh: {}",
                    path.display(),
                    source
                ),
            ));
            return RunState::default();
        }
    };

    let body = skip_header_comments(&contents);
    if body.trim().is_empty() {
        return RunState::default();
    }

    match serde_yaml::from_str::<ProgressDocument>(body) {
        Ok(document) => RunState::from_nodes(document.nodes),
        Err(source) => {
            sink.log(LogRecord::new(
                LogLevel::Warn,
                format!(
                    "could not parse existing output {}, starting fresh: {}",
                    path.display(),
                    source
                ),
            ));
            RunState::default()
        }
    }
}

/// Skips the comment block ahead of the document. Lines further down are
/// left alone since block scalars may start a line with `#`.
fn skip_header_comments(contents: &str) -> &str {
    let mut rest = contents;
    loop {
        let (line, tail) = rest.split_once('\n').unwrap_or((rest, ""));
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            return rest;
        }
        if tail.is_empty() {
            return "";
        }
        rest = tail;
    }
}

pub fn render_header(topic_label: &str) -> String {
    format!(
        "# {topic_label} - Unified Practice Path\n\
         # Generated using exemplar-based AI question generation\n\
         # All nodes are accessible (no locks), with smart prerequisite suggestions\n\n"
    )
}

/// Replaces the output file with the full node sequence. The document is
/// written to a sibling temporary file first and renamed over the target.
pub fn save(path: &Path, state: &RunState, topic_label: &str) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| PersistError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let yaml = serde_yaml::to_string(&ProgressDocumentRef {
        nodes: state.nodes(),
    })?;
    let mut contents = render_header(topic_label);
    contents.push_str(&yaml);

    let temp_path = temporary_path(path);
    fs::write(&temp_path, contents).map_err(|source| PersistError::Write {
        path: temp_path.clone(),
        source,
    })?;
    fs::rename(&temp_path, path).map_err(|source| PersistError::Rename {
        path: path.to_path_buf(),
        source,
    })
}

fn temporary_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "progress".to_string());
    path.with_file_name(format!(".{file_name}.tmp"))
}

/// Output location bound to the topic label written into its header.
#[derive(Clone, Debug)]
pub struct ProgressStore {
    path: PathBuf,
    topic_label: String,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>, topic_label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            topic_label: topic_label.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn topic_label(&self) -> &str {
        &self.topic_label
    }

    pub fn load_existing(&self, sink: &dyn LogSink) -> RunState {
        load_existing(&self.path, sink)
    }

    pub fn save(&self, state: &RunState) -> Result<(), PersistError> {
        save(&self.path, state, &self.topic_label)
    }
}

/// `s3-math-sets-venn-diagrams.yaml` becomes `Sets Venn Diagrams`.
pub fn topic_label_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = stem.strip_suffix(TEST_SUFFIX).unwrap_or(&stem);
    let stem = LEVEL_PREFIX_RE.replace(stem, "");
    title_case(&stem.replace('-', " "))
}

/// Trial runs write next to the real output: `topic.yaml` -> `topic-TEST.yaml`.
pub fn test_output_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{stem}{TEST_SUFFIX}.{}", ext.to_string_lossy()),
        None => format!("{stem}{TEST_SUFFIX}"),
    };
    path.with_file_name(file_name)
}

fn title_case(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut previous_alpha = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if previous_alpha {
                output.extend(ch.to_lowercase());
            } else {
                output.extend(ch.to_uppercase());
            }
            previous_alpha = true;
        } else {
            output.push(ch);
            previous_alpha = false;
        }
    }
    output
}
