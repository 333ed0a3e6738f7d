use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use thiserror::Error;

use crate::constants::{DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_K, DEFAULT_TOP_P};
use crate::pipeline::FailureKind;

/// Sampling parameters sent with every generation request.
#[derive(Debug, Clone, Copy, PartialEq, Builder)]
pub struct GenerationParams {
    #[builder(default = DEFAULT_TEMPERATURE)]
    pub temperature: f32,
    #[builder(default = DEFAULT_TOP_P)]
    pub top_p: f32,
    #[builder(default = DEFAULT_TOP_K)]
    pub top_k: u32,
    #[builder(default = DEFAULT_MAX_OUTPUT_TOKENS)]
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Quota or rate-limit rejection. `retry_after` carries the server hint.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("remote service error ({status}): {message}")]
    Remote { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl GenerationError {
    /// True for errors that indicate the per-minute or daily quota is spent.
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::RateLimited { .. } | Self::Remote { .. } => FailureKind::RemoteService,
            Self::Transport(_) => FailureKind::Transport,
            Self::EmptyResponse => FailureKind::EmptyResponse,
            Self::Malformed(_) => FailureKind::MalformedResponse,
        }
    }
}

/// Remote text-generation capability used by the pilot runner.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier recorded alongside every attempt.
    fn model_name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_default_to_pilot_sampling() {
        let params = GenerationParams::default();
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.top_p, 0.8);
        assert_eq!(params.top_k, 40);
        assert_eq!(params.max_output_tokens, 2048);

        let custom = GenerationParams::builder().temperature(0.2).build();
        assert_eq!(custom.temperature, 0.2);
        assert_eq!(custom.top_k, 40);
    }

    #[test]
    fn only_rate_limits_count_as_quota() {
        let quota = GenerationError::RateLimited {
            message: "RESOURCE_EXHAUSTED".into(),
            retry_after: Some(Duration::from_secs(33)),
        };
        assert!(quota.is_quota());
        assert_eq!(quota.retry_after(), Some(Duration::from_secs(33)));
        assert_eq!(quota.failure_kind(), FailureKind::RemoteService);

        let server = GenerationError::Remote {
            status: 500,
            message: "internal".into(),
        };
        assert!(!server.is_quota());
        assert_eq!(GenerationError::EmptyResponse.failure_kind(), FailureKind::EmptyResponse);
    }
}
