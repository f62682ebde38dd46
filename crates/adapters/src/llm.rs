use std::time::Duration;

use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use qbank_core::{GenerationParams, LanguageModel, LanguageModelError, ProviderConfig};

use crate::credentials::resolve_api_key;
use crate::error::AdapterError;
use crate::retry::{call_with_rate_limit_retry, thread_sleep, RateLimitPolicy};

pub const GEMINI_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const CLAUDE_DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Builds the adapter named by the profile's `interface_format`, reading its
/// API key from the environment.
pub fn create_language_model(
    profile_name: &str,
    profile: &ProviderConfig,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let api_key = resolve_api_key(profile_name, profile)?;
    create_language_model_with_key(profile, api_key)
}

pub fn create_language_model_with_key(
    profile: &ProviderConfig,
    api_key: String,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let fmt = profile.interface_format.trim().to_lowercase();
    match fmt.as_str() {
        "gemini" | "google" => Ok(Box::new(GeminiAdapter::from_profile(profile, api_key)?)),
        "claude" | "anthropic" => Ok(Box::new(ClaudeAdapter::from_profile(profile, api_key)?)),
        other => Err(AdapterError::InvalidConfig(format!(
            "unknown interface_format: {}",
            other
        ))),
    }
}

fn build_client(timeout: u64) -> Result<Client, AdapterError> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout.max(1)))
        .build()?)
}

fn resolve_base_url(base_url: &str, default: &str) -> String {
    let raw = base_url.trim();
    if raw.is_empty() {
        default.to_string()
    } else {
        raw.trim_end_matches('/').to_string()
    }
}

fn require(value: &str, what: &str) -> Result<(), AdapterError> {
    if value.trim().is_empty() {
        return Err(AdapterError::InvalidConfig(format!("{what} must not be empty")));
    }
    Ok(())
}

fn check_status(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, AdapterError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        return Err(AdapterError::HttpStatus { status, body });
    }
    Ok(response)
}

fn read_json<T: DeserializeOwned>(response: reqwest::blocking::Response) -> Result<T, AdapterError> {
    let body = response.text()?;
    decode_json(&body)
}

fn decode_json<T: DeserializeOwned>(body: &str) -> Result<T, AdapterError> {
    Ok(serde_json::from_str(body)?)
}

pub struct GeminiAdapter {
    client: Client,
    url: String,
    rate_limit: RateLimitPolicy,
}

impl GeminiAdapter {
    pub fn from_profile(profile: &ProviderConfig, api_key: String) -> Result<Self, AdapterError> {
        require(&api_key, "Gemini api_key")?;
        require(&profile.model_name, "Gemini model_name")?;

        let base = resolve_base_url(&profile.base_url, GEMINI_DEFAULT_BASE_URL);
        Ok(Self {
            client: build_client(profile.timeout)?,
            url: format!(
                "{base}/models/{model}:generateContent?key={api}",
                model = profile.model_name.trim(),
                api = api_key
            ),
            rate_limit: RateLimitPolicy::new(profile.rate_limit_retries, Duration::from_secs(5)),
        })
    }

    fn generate_once(&self, prompt: &str, params: &GenerationParams) -> Result<String, AdapterError> {
        let request = gemini_request(prompt, params);
        let response = check_status(self.client.post(&self.url).json(&request).send()?)?;
        let parsed: GeminiResponse = read_json(response)?;
        parse_gemini_response(parsed)
    }
}

impl LanguageModel for GeminiAdapter {
    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, LanguageModelError> {
        debug!("sending {} byte prompt to Gemini", prompt.len());
        call_with_rate_limit_retry("Gemini", &self.rate_limit, thread_sleep, || {
            self.generate_once(prompt, params)
        })
        .map_err(LanguageModelError::from)
    }
}

pub struct ClaudeAdapter {
    client: Client,
    url: String,
    api_key: String,
    model_name: String,
    rate_limit: RateLimitPolicy,
}

impl ClaudeAdapter {
    pub fn from_profile(profile: &ProviderConfig, api_key: String) -> Result<Self, AdapterError> {
        require(&api_key, "Claude api_key")?;
        require(&profile.model_name, "Claude model_name")?;

        let base = resolve_base_url(&profile.base_url, CLAUDE_DEFAULT_BASE_URL);
        Ok(Self {
            client: build_client(profile.timeout)?,
            url: format!("{base}/messages"),
            api_key,
            model_name: profile.model_name.trim().to_string(),
            rate_limit: RateLimitPolicy::new(profile.rate_limit_retries, Duration::from_secs(5)),
        })
    }

    fn headers(&self) -> Result<HeaderMap, AdapterError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|err| {
                AdapterError::InvalidConfig(format!("invalid api key header: {}", err))
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        Ok(headers)
    }

    fn generate_once(&self, prompt: &str, params: &GenerationParams) -> Result<String, AdapterError> {
        let body = claude_request(&self.model_name, prompt, params);
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers()?)
            .json(&body)
            .send()?;
        let parsed: ClaudeResponse = read_json(check_status(response)?)?;
        parse_claude_response(parsed)
    }
}

impl LanguageModel for ClaudeAdapter {
    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, LanguageModelError> {
        debug!("sending {} byte prompt to Claude", prompt.len());
        call_with_rate_limit_retry("Claude", &self.rate_limit, thread_sleep, || {
            self.generate_once(prompt, params)
        })
        .map_err(LanguageModelError::from)
    }
}

fn gemini_request<'a>(prompt: &'a str, params: &GenerationParams) -> GeminiRequest<'a> {
    GeminiRequest {
        contents: vec![GeminiRequestContent {
            role: "user",
            parts: vec![GeminiRequestPart { text: prompt }],
        }],
        generation_config: GeminiGenerationConfig {
            max_output_tokens: params.max_output_tokens,
            temperature: params.temperature,
        },
    }
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiRequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiRequestContent<'a> {
    role: &'static str,
    parts: Vec<GeminiRequestPart<'a>>,
}

#[derive(Serialize)]
struct GeminiRequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    Other(serde_json::Value),
}

fn parse_gemini_response(response: GeminiResponse) -> Result<String, AdapterError> {
    for candidate in response.candidates {
        if let Some(reason) = candidate.finish_reason.as_deref() {
            match reason {
                "MAX_TOKENS" => warn!("Gemini response truncated due to max_tokens limit"),
                "SAFETY" => warn!("Gemini response blocked by safety filters"),
                "RECITATION" => warn!("Gemini response blocked due to recitation concerns"),
                _ => {}
            }
        }

        if let Some(content) = candidate.content {
            let text: String = content
                .parts
                .into_iter()
                .filter_map(|part| match part {
                    GeminiPart::Text { text } => Some(text),
                    GeminiPart::Other(_) => None,
                })
                .collect();
            if !text.trim().is_empty() {
                return Ok(text);
            }
        }
    }

    Err(AdapterError::EmptyResponse)
}

fn claude_request<'a>(model: &'a str, prompt: &'a str, params: &GenerationParams) -> ClaudeRequest<'a> {
    ClaudeRequest {
        model,
        messages: vec![ClaudeMessage {
            role: "user",
            content: prompt,
        }],
        max_tokens: params.max_output_tokens,
        temperature: params.temperature,
    }
}

#[derive(Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    messages: Vec<ClaudeMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ClaudeMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    #[serde(default)]
    content: Vec<ClaudeContent>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

fn parse_claude_response(response: ClaudeResponse) -> Result<String, AdapterError> {
    if response.stop_reason.as_deref() == Some("max_tokens") {
        warn!("Claude response truncated due to max_tokens limit");
    }

    let text: String = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();

    if text.trim().is_empty() {
        return Err(AdapterError::EmptyResponse);
    }
    Ok(text)
}
