use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tracing::{debug, warn};

use super::generator::{GenerationError, GenerationParams, TextGenerator};
use crate::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};
use crate::pipeline::{FailureKind, PayloadError, ValidationPayload, extract_json_from_response};

/// Bounded retry budget for a single run attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
        }
    }

    /// Linear backoff: `base_delay * attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        )
    }
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl CallError {
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Generation(err) if err.is_quota())
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Generation(err) => err.failure_kind(),
            Self::Payload(_) => FailureKind::PayloadParse,
        }
    }
}

/// Issues one generation request with retries, then extracts the payload.
#[derive(Clone)]
pub struct RemoteCallExecutor {
    generator: Arc<dyn TextGenerator>,
    params: GenerationParams,
    policy: RetryPolicy,
    quota_wait: Duration,
}

impl RemoteCallExecutor {
    /// `quota_wait` is the pacing delay used after a rate-limit error that
    /// carries no server-suggested wait.
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        params: GenerationParams,
        policy: RetryPolicy,
        quota_wait: Duration,
    ) -> Self {
        Self {
            generator,
            params,
            policy,
            quota_wait,
        }
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    pub async fn execute(&self, prompt: &str) -> Result<ValidationPayload, CallError> {
        let text = self.generate_with_retry(prompt).await?;
        Ok(extract_json_from_response(&text)?)
    }

    /// Raw response text; the final attempt's error is returned unchanged.
    pub async fn generate_with_retry(&self, prompt: &str) -> Result<String, GenerationError> {
        let max = self.policy.max_retries;
        let mut attempt = 1;
        loop {
            let err = match self.generator.generate(prompt, &self.params).await {
                Ok(text) => {
                    debug!(model = self.model_name(), attempt, "generation succeeded");
                    return Ok(text);
                }
                Err(err) => err,
            };

            if attempt >= max {
                warn!(
                    model = self.model_name(),
                    attempt,
                    max_retries = max,
                    error = %err,
                    "generation failed; retry budget exhausted"
                );
                return Err(err);
            }

            let wait = if err.is_quota() {
                err.retry_after().unwrap_or(self.quota_wait)
            } else {
                self.policy.backoff(attempt)
            };
            warn!(
                model = self.model_name(),
                attempt,
                max_retries = max,
                quota = err.is_quota(),
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "generation failed; retrying"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Scripted generator: pops one response per call, repeating the last
    /// scripted entry once the queue is drained.
    pub(crate) struct ScriptedGenerator {
        script: Mutex<VecDeque<Result<String, GenerationError>>>,
        fallback: fn() -> Result<String, GenerationError>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        pub(crate) fn new(
            script: Vec<Result<String, GenerationError>>,
            fallback: fn() -> Result<String, GenerationError>,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        fn model_name(&self) -> &str {
            "models/scripted"
        }

        async fn generate(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<String, GenerationError> {
            self.calls.lock().unwrap().push(prompt.to_string());
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(self.fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::testing::ScriptedGenerator;
    use super::*;

    const OK_BODY: &str = "```json\n{\"is_correct\": true, \"confidence_score\": 0.9}\n```";

    fn ok() -> Result<String, GenerationError> {
        Ok(OK_BODY.to_string())
    }

    fn server_error() -> Result<String, GenerationError> {
        Err(GenerationError::Remote {
            status: 503,
            message: "unavailable".into(),
        })
    }

    fn executor(script: Arc<ScriptedGenerator>, max_retries: u32) -> RemoteCallExecutor {
        RemoteCallExecutor::new(
            script,
            GenerationParams::default(),
            RetryPolicy::new(max_retries, Duration::from_secs(2)),
            Duration::from_millis(4400),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_back_off_linearly() {
        let script = Arc::new(ScriptedGenerator::new(
            vec![server_error(), server_error()],
            ok,
        ));
        let started = Instant::now();
        let payload = executor(script.clone(), 3).execute("p").await.unwrap();

        assert_eq!(payload.is_correct, Some(true));
        assert_eq!(script.calls(), 3);
        // 2s after the first failure, 4s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn final_failure_propagates_without_sleeping() {
        let script = Arc::new(ScriptedGenerator::new(vec![], server_error));
        let started = Instant::now();
        let err = executor(script.clone(), 2).execute("p").await.unwrap_err();

        assert!(matches!(
            err,
            CallError::Generation(GenerationError::Remote { status: 503, .. })
        ));
        assert_eq!(err.failure_kind(), FailureKind::RemoteService);
        assert_eq!(script.calls(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_prefers_server_hint_then_governor_delay() {
        let script = Arc::new(ScriptedGenerator::new(
            vec![
                Err(GenerationError::RateLimited {
                    message: "retry in 33s".into(),
                    retry_after: Some(Duration::from_secs(33)),
                }),
                Err(GenerationError::RateLimited {
                    message: "quota".into(),
                    retry_after: None,
                }),
            ],
            ok,
        ));
        let started = Instant::now();
        executor(script.clone(), 3).execute("p").await.unwrap();

        assert_eq!(script.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(33_000 + 4_400));
    }

    #[tokio::test(start_paused = true)]
    async fn quota_on_final_attempt_is_reported_as_quota() {
        let script = Arc::new(ScriptedGenerator::new(vec![], || {
            Err(GenerationError::RateLimited {
                message: "RESOURCE_EXHAUSTED".into(),
                retry_after: None,
            })
        }));
        let err = executor(script, 1).execute("p").await.unwrap_err();
        assert!(err.is_quota());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_response_is_retried() {
        let script = Arc::new(ScriptedGenerator::new(
            vec![Err(GenerationError::EmptyResponse)],
            ok,
        ));
        executor(script.clone(), 3).execute("p").await.unwrap();
        assert_eq!(script.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_payload_is_not_retried() {
        let script = Arc::new(ScriptedGenerator::new(
            vec![Ok("I think the code is fine.".into())],
            ok,
        ));
        let err = executor(script.clone(), 3).execute("p").await.unwrap_err();

        assert!(matches!(err, CallError::Payload(PayloadError::NotFound { .. })));
        assert_eq!(err.failure_kind(), FailureKind::PayloadParse);
        assert_eq!(script.calls(), 1);
    }
}
