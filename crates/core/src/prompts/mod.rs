//! Prompt templates: a built-in TOML document plus optional override files.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PromptConfig;

mod compose;

pub use compose::{
    truncate_question, PromptComposer, ANTI_REPETITION_KEY, BATCH_GENERATION_KEY,
    MAX_RECENT_QUESTIONS, MAX_RECENT_QUESTION_CHARS,
};

const BUILT_IN_PROMPTS: &str = include_str!("../../prompts/default.toml");

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt `{0}` not found")]
    NotFound(String),
    #[error("no value for `{{{placeholder}}}` when rendering prompt `{key}`")]
    MissingArgument { key: String, placeholder: String },
    #[error("prompt `{key}` has an unclosed placeholder")]
    UnclosedPlaceholder { key: String },
    #[error("prompt `{key}` has an invalid placeholder `{{{name}}}`")]
    InvalidPlaceholder { key: String, name: String },
    #[error("failed to read prompt file `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse built-in prompt definitions: {0}")]
    ParseBuiltIn(#[source] toml::de::Error),
    #[error("failed to parse prompt file `{path}` as TOML: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to parse prompt file `{path}` as YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptSource {
    BuiltIn,
    File(PathBuf),
}

impl PromptSource {
    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::BuiltIn)
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::BuiltIn => None,
            Self::File(path) => Some(path),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Piece {
    Text(String),
    Slot(String),
}

#[derive(Clone, Debug)]
pub struct PromptTemplate {
    key: String,
    description: Option<String>,
    source: PromptSource,
    pieces: Vec<Piece>,
}

impl PromptTemplate {
    pub fn parse(
        key: impl Into<String>,
        text: &str,
        description: Option<String>,
        source: PromptSource,
    ) -> Result<Self, PromptError> {
        let key = key.into();
        let pieces = split_template(&key, text)?;
        Ok(Self {
            key,
            description,
            source,
            pieces,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> &PromptSource {
        &self.source
    }

    /// Placeholder names in order of first use.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for piece in &self.pieces {
            if let Piece::Slot(name) = piece {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Every placeholder must have a value; unused values are ignored.
    pub fn render<V: AsRef<str>>(&self, values: &[(&str, V)]) -> Result<String, PromptError> {
        let mut output = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => output.push_str(text),
                Piece::Slot(name) => {
                    let (_, value) = values
                        .iter()
                        .find(|(candidate, _)| *candidate == name.as_str())
                        .ok_or_else(|| PromptError::MissingArgument {
                            key: self.key.clone(),
                            placeholder: name.clone(),
                        })?;
                    output.push_str(value.as_ref());
                }
            }
        }
        Ok(output)
    }
}

fn split_template(key: &str, text: &str) -> Result<Vec<Piece>, PromptError> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
        literal.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            literal.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            literal.push('}');
            rest = &tail[1..];
            continue;
        }

        let close = tail.find('}').ok_or_else(|| PromptError::UnclosedPlaceholder {
            key: key.to_string(),
        })?;
        let name = tail[1..close].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(PromptError::InvalidPlaceholder {
                key: key.to_string(),
                name: name.to_string(),
            });
        }
        if !literal.is_empty() {
            pieces.push(Piece::Text(std::mem::take(&mut literal)));
        }
        pieces.push(Piece::Slot(name.to_string()));
        rest = &tail[close + 1..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        pieces.push(Piece::Text(literal));
    }
    Ok(pieces)
}

#[derive(Debug, Default, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    prompts: BTreeMap<String, TemplateEntry>,
}

#[derive(Debug, Deserialize)]
struct TemplateEntry {
    #[serde(alias = "text")]
    template: String,
    #[serde(default)]
    description: Option<String>,
}

impl TemplateFile {
    fn into_templates(self, source: &PromptSource) -> Result<Vec<PromptTemplate>, PromptError> {
        self.prompts
            .into_iter()
            .map(|(key, entry)| {
                PromptTemplate::parse(key, &entry.template, entry.description, source.clone())
            })
            .collect()
    }
}

/// Templates by key. Files in the custom directories override the built-in
/// set; later files win, directories are read in the configured order.
#[derive(Debug)]
pub struct PromptRegistry {
    templates: BTreeMap<String, PromptTemplate>,
    directories: Vec<PathBuf>,
}

impl PromptRegistry {
    pub fn new() -> Result<Self, PromptError> {
        Self::with_custom_directories(Vec::<PathBuf>::new())
    }

    pub fn from_prompt_config(config: &PromptConfig) -> Result<Self, PromptError> {
        Self::with_custom_directories(config.custom_directories.clone())
    }

    pub fn with_custom_directories<I, P>(directories: I) -> Result<Self, PromptError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut registry = Self {
            templates: BTreeMap::new(),
            directories: directories.into_iter().map(Into::into).collect(),
        };
        registry.reload()?;
        Ok(registry)
    }

    pub fn custom_directories(&self) -> &[PathBuf] {
        &self.directories
    }

    pub fn reload(&mut self) -> Result<(), PromptError> {
        let built_in: TemplateFile =
            toml::from_str(BUILT_IN_PROMPTS).map_err(PromptError::ParseBuiltIn)?;
        let mut templates = BTreeMap::new();
        for template in built_in.into_templates(&PromptSource::BuiltIn)? {
            templates.insert(template.key.clone(), template);
        }

        for dir in &self.directories {
            for path in template_files(dir)? {
                let file = read_template_file(&path)?;
                for template in file.into_templates(&PromptSource::File(path.clone()))? {
                    templates.insert(template.key.clone(), template);
                }
            }
        }

        self.templates = templates;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&PromptTemplate> {
        self.templates.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.templates.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn render<V: AsRef<str>>(
        &self,
        key: &str,
        values: &[(&str, V)],
    ) -> Result<String, PromptError> {
        self.get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))?
            .render(values)
    }
}

fn template_files(dir: &Path) -> Result<Vec<PathBuf>, PromptError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let io_error = |source| PromptError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_file() && template_format(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TemplateFormat {
    Toml,
    Yaml,
}

fn template_format(path: &Path) -> Option<TemplateFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "toml" => Some(TemplateFormat::Toml),
        "yaml" | "yml" => Some(TemplateFormat::Yaml),
        _ => None,
    }
}

fn read_template_file(path: &Path) -> Result<TemplateFile, PromptError> {
    let contents = fs::read_to_string(path).map_err(|source| PromptError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match template_format(path) {
        Some(TemplateFormat::Yaml) => {
            serde_yaml::from_str(&contents).map_err(|source| PromptError::ParseYaml {
                path: path.to_path_buf(),
                source,
            })
        }
        _ => toml::from_str(&contents).map_err(|source| PromptError::ParseToml {
            path: path.to_path_buf(),
            source,
        }),
    }
}
