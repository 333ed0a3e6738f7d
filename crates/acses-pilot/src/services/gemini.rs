//! Gemini `generateContent` client over plain REST.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::generator::{GenerationError, GenerationParams, TextGenerator};
use super::governor::{GenericRateLimiter, normalize_model_id};
use crate::constants::{DEFAULT_GEMINI_BASE_URL, DEFAULT_REQUEST_TIMEOUT_SECS};

const API_KEY_HEADER: &str = "x-goog-api-key";
const RETRY_INFO_TYPE: &str = "type.googleapis.com/google.rpc.RetryInfo";

#[derive(Debug, Error)]
pub enum GeminiClientError {
    #[error("GOOGLE_AI_API_KEY or GEMINI_API_KEY must be set")]
    MissingApiKey,
    #[error("invalid Gemini base url: {0}")]
    InvalidBaseUrl(String),
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

#[derive(Clone)]
pub struct GeminiGenerator {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    limiter: Option<Arc<GenericRateLimiter>>,
}

impl std::fmt::Debug for GeminiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiGenerator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("limited", &self.limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl GeminiGenerator {
    pub fn from_env(model: impl Into<String>) -> Result<Self, GeminiClientError> {
        Self::new(
            api_key_from_env()?,
            model,
            DEFAULT_GEMINI_BASE_URL,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, GeminiClientError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GeminiClientError::MissingApiKey);
        }
        let base = base_url.trim().trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(GeminiClientError::InvalidBaseUrl(base_url.to_string()));
        }

        let model = normalize_model_id(&model.into());
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("acses-pilot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(GeminiClientError::Build)?;

        Ok(Self {
            http,
            endpoint: format!("{base}/v1beta/{model}:generateContent"),
            api_key,
            model,
            limiter: None,
        })
    }

    /// Put a hard requests-per-minute ceiling in front of every call.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<GenericRateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// `GOOGLE_AI_API_KEY`, falling back to `GEMINI_API_KEY`.
pub fn api_key_from_env() -> Result<String, GeminiClientError> {
    std::env::var("GOOGLE_AI_API_KEY")
        .or_else(|_| std::env::var("GEMINI_API_KEY"))
        .map_err(|_| GeminiClientError::MissingApiKey)
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let body = GenerateRequest::new(prompt, params);
        let response = self
            .http
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| GenerationError::Transport(err.to_string()))?;

        let status = response.status();
        let payload = response
            .bytes()
            .await
            .map_err(|err| GenerationError::Transport(err.to_string()))?;
        debug!(
            model = %self.model,
            status = status.as_u16(),
            bytes = payload.len(),
            "gemini response received"
        );

        if !status.is_success() {
            return Err(classify_error(status, &payload));
        }

        let parsed: GenerateResponse = serde_json::from_slice(&payload)
            .map_err(|err| GenerationError::Malformed(err.to_string()))?;
        parsed.into_text()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [RequestContent<'a>; 1],
    generation_config: GenerationConfig,
}

impl<'a> GenerateRequest<'a> {
    fn new(prompt: &'a str, params: &GenerationParams) -> Self {
        Self {
            contents: [RequestContent {
                role: "user",
                parts: [RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                top_p: params.top_p,
                top_k: params.top_k,
                max_output_tokens: params.max_output_tokens,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: [RequestPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Result<String, GenerationError> {
        if let Some(reason) = self.prompt_feedback.and_then(|feedback| feedback.block_reason) {
            return Err(GenerationError::Remote {
                status: StatusCode::OK.as_u16(),
                message: format!("prompt blocked: {reason}"),
            });
        }
        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(GenerationError::Remote {
                status: StatusCode::OK.as_u16(),
                message: "response contained no candidates".to_string(),
            });
        };
        let text: String = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            Err(GenerationError::EmptyResponse)
        } else {
            Ok(text)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

fn classify_error(status: StatusCode, payload: &[u8]) -> GenerationError {
    let envelope = serde_json::from_slice::<ErrorEnvelope>(payload).ok();
    let message = match &envelope {
        Some(env) if !env.error.message.is_empty() => env.error.message.clone(),
        _ => String::from_utf8_lossy(payload).trim().to_string(),
    };
    let rpc_status = envelope
        .as_ref()
        .map(|env| env.error.status.as_str())
        .unwrap_or_default();

    let is_quota = status == StatusCode::TOO_MANY_REQUESTS
        || rpc_status == "RESOURCE_EXHAUSTED"
        || message.to_ascii_lowercase().contains("quota");

    if !is_quota {
        return GenerationError::Remote {
            status: status.as_u16(),
            message,
        };
    }

    let retry_after = envelope
        .as_ref()
        .and_then(|env| retry_info_delay(&env.error.details))
        .or_else(|| parse_retry_delay(&message));
    GenerationError::RateLimited {
        message,
        retry_after,
    }
}

fn retry_info_delay(details: &[serde_json::Value]) -> Option<Duration> {
    details
        .iter()
        .filter(|detail| detail.get("@type").and_then(|t| t.as_str()) == Some(RETRY_INFO_TYPE))
        .find_map(|detail| detail.get("retryDelay").and_then(|d| d.as_str()))
        .and_then(parse_duration_secs)
}

fn parse_duration_secs(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().strip_suffix('s')?.parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

/// Pull a server-suggested wait out of free-form error text
/// (`"Please retry in 33.2s"`, `"retryDelay": "33s"`,
/// `retry_delay { seconds: 33 }`).
pub fn parse_retry_delay(message: &str) -> Option<Duration> {
    static BLOCK_RE: OnceLock<Regex> = OnceLock::new();
    static RETRY_RE: OnceLock<Regex> = OnceLock::new();
    let block = BLOCK_RE.get_or_init(|| {
        Regex::new(r"(?i)retry_delay\s*\{\s*seconds:\s*(\d+)").expect("valid retry block regex")
    });
    let inline = RETRY_RE.get_or_init(|| {
        Regex::new(r#"(?i)retry(?:[ _-]?delay)?(?:\s+in)?["':\s]*(\d+(?:\.\d+)?)s"#)
            .expect("valid retry delay regex")
    });
    let caps = block.captures(message).or_else(|| inline.captures(message))?;
    let secs: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(Duration::from_secs_f64(secs))
}
