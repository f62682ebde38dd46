use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const GEMINI_PROFILE: &str = "gemini";
pub const CLAUDE_PROFILE: &str = "claude";

fn default_temperature() -> f32 {
    0.8
}

fn default_max_tokens() -> u32 {
    8000
}

fn default_timeout() -> u64 {
    600
}

fn default_rate_limit_retries() -> usize {
    2
}

fn default_count() -> usize {
    5
}

fn default_max_retries() -> usize {
    3
}

fn default_audience() -> String {
    "Secondary 3 students".to_string()
}

fn default_trial_node_count() -> usize {
    3
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Connection settings for one generative provider.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(default)]
    pub interface_format: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default)]
    pub fallback_api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            interface_format: String::new(),
            model_name: String::new(),
            base_url: String::new(),
            api_key_env: String::new(),
            fallback_api_key_env: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
            rate_limit_retries: default_rate_limit_retries(),
        }
    }
}

impl ProviderConfig {
    pub fn gemini() -> Self {
        Self {
            interface_format: "gemini".to_string(),
            model_name: "gemini-3-flash-preview".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            fallback_api_key_env: Some("VITE_GEMINI_API_KEY".to_string()),
            ..Self::default()
        }
    }

    pub fn claude() -> Self {
        Self {
            interface_format: "claude".to_string(),
            model_name: "claude-sonnet-4-5-20250929".to_string(),
            api_key_env: "CLAUDE_API_KEY".to_string(),
            fallback_api_key_env: Some("VITE_CLAUDE_API_KEY".to_string()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    #[serde(default = "default_count")]
    pub count: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default = "default_trial_node_count")]
    pub trial_node_count: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            count: default_count(),
            max_retries: default_max_retries(),
            audience: default_audience(),
            trial_node_count: default_trial_node_count(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    #[serde(default)]
    pub custom_directories: Vec<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeneratorConfig {
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    BTreeMap::from([
        (GEMINI_PROFILE.to_string(), ProviderConfig::gemini()),
        (CLAUDE_PROFILE.to_string(), ProviderConfig::claude()),
    ])
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            generation: GenerationConfig::default(),
            prompts: PromptConfig::default(),
        }
    }
}

impl GeneratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    pub fn provider_mut(&mut self, name: &str) -> Option<&mut ProviderConfig> {
        self.providers.get_mut(name)
    }

    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(|name| name.as_str())
    }

    /// Parses a JSON document. Built-in provider profiles that the document
    /// does not mention are kept, so a config only has to list overrides.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut config: Self = serde_json::from_str(input)?;
        for (name, profile) in default_providers() {
            config.providers.entry(name).or_insert(profile);
        }
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&data)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::default()),
        }
    }
}
