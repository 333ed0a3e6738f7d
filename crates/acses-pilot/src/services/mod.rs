//! IO-bound services: the remote model client, retries, pacing, the durable
//! ledger and the batch orchestrator that ties them together.
//!
//! Pure transforms (prompt rendering, payload extraction, record shaping) live
//! in `crate::pipeline`; nothing here should reimplement them.

pub mod executor;
pub mod gemini;
pub mod generator;
pub mod governor;
pub mod ledger;
pub mod preflight;
pub mod runner;

pub use executor::{CallError, RemoteCallExecutor, RetryPolicy};
pub use gemini::{GeminiClientError, GeminiGenerator, api_key_from_env, parse_retry_delay};
pub use generator::{GenerationError, GenerationParams, TextGenerator};
pub use governor::{
    GenericRateLimiter, ModelRegistry, ModelTier, delay_for_rpm, normalize_model_id,
};
pub use ledger::{
    CompletionIndex, LedgerError, LedgerSnapshot, LedgerStats, ResultLedger,
};
pub use preflight::{
    CheckItem, CheckStatus, PreflightReport, check_connectivity, check_inputs,
};
pub use runner::{HaltReason, PilotRunner, RunConfig, RunError, RunReport};
