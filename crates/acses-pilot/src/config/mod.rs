//! Layered configuration: built-in defaults, then the XDG config file, then
//! `./config/settings.*`, then the file named by `ACSES_CONFIG_FILE`, then
//! `ACSES__SECTION__KEY` environment variables. CLI flags apply on top.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::constants::{
    DEFAULT_DATASET, DEFAULT_GEMINI_BASE_URL, DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_MAX_RETRIES,
    DEFAULT_MODEL, DEFAULT_MODEL_COOLDOWN_SECS, DEFAULT_N_RUNS, DEFAULT_PASSES, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_RETRY_DELAY_MS, DEFAULT_TEMPERATURE, DEFAULT_TOP_K, DEFAULT_TOP_P,
};
use crate::paths::{AppPaths, PathError};
use crate::services::{GenerationParams, ModelRegistry, ModelTier, RetryPolicy};

const LOCAL_CONFIG_FILE: &str = "config/settings";
const SETTINGS_FILE: &str = "settings.toml";
const OVERRIDE_ENV: &str = "ACSES_CONFIG_FILE";
const ENV_PREFIX: &str = "ACSES";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("unable to resolve project directories")]
    MissingProjectDirs,
    #[error(transparent)]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub pilot: PilotConfig,
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    /// Extra or overriding model tiers (`[[models]]`).
    #[serde(default)]
    pub models: Vec<ModelTier>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PilotConfig {
    pub model: String,
    pub dataset: String,
    pub n_runs: u32,
    pub passes: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Pause between consecutive models of a comparison run.
    pub model_cooldown_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PathsConfig {
    pub project_root: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams::builder()
            .temperature(self.pilot.temperature)
            .top_p(self.pilot.top_p)
            .top_k(self.pilot.top_k)
            .max_output_tokens(self.pilot.max_output_tokens)
            .build()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.pilot.max_retries,
            Duration::from_millis(self.pilot.retry_delay_ms),
        )
    }

    pub fn model_cooldown(&self) -> Duration {
        Duration::from_secs(self.pilot.model_cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.gemini.request_timeout_secs)
    }

    /// Built-in tiers with configured `[[models]]` layered on top.
    pub fn model_registry(&self) -> ModelRegistry {
        self.models
            .iter()
            .cloned()
            .fold(ModelRegistry::builtin(), ModelRegistry::with_tier)
    }

    /// A relative `output_dir` resolves against the working directory, not
    /// the project root.
    pub fn app_paths(&self) -> Result<AppPaths, PathError> {
        let paths = match &self.paths.project_root {
            Some(root) => AppPaths::new(root),
            None => AppPaths::from_current_dir()?,
        };
        Ok(match &self.paths.output_dir {
            Some(dir) if dir.is_relative() => {
                let cwd = std::env::current_dir().map_err(PathError::CurrentDir)?;
                paths.with_output_dir(cwd.join(dir))
            }
            Some(dir) => paths.with_output_dir(dir),
            None => paths,
        })
    }

    /// Re-run after CLI overrides are applied.
    pub fn validate(self) -> Result<Self, AppConfigError> {
        if self.pilot.n_runs == 0 {
            return Err(AppConfigError::Invalid("pilot.n_runs must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.pilot.temperature) {
            return Err(AppConfigError::Invalid(format!(
                "pilot.temperature must be within 0.0..=2.0, got {}",
                self.pilot.temperature
            )));
        }
        if self.pilot.model.trim().is_empty() {
            return Err(AppConfigError::Invalid("pilot.model must not be empty".into()));
        }
        if let Some(tier) = self.models.iter().find(|tier| tier.requests_per_minute == 0) {
            return Err(AppConfigError::Invalid(format!(
                "model tier `{}` has requests_per_minute = 0",
                tier.id
            )));
        }
        Ok(self)
    }
}

pub fn load() -> Result<AppConfig, AppConfigError> {
    let mut builder = with_defaults(Config::builder())?;

    if let Ok(dirs) = project_dirs() {
        let xdg = dirs.config_dir().join(SETTINGS_FILE);
        builder = builder.add_source(File::from(xdg).required(false));
    }
    builder = builder.add_source(File::with_name(LOCAL_CONFIG_FILE).required(false));
    if let Some(path) = std::env::var_os(OVERRIDE_ENV) {
        builder = builder.add_source(File::from(PathBuf::from(path)).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()
}

pub fn project_dirs() -> Result<ProjectDirs, AppConfigError> {
    ProjectDirs::from("id", "acses", "acses").ok_or(AppConfigError::MissingProjectDirs)
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, AppConfigError> {
    Ok(builder
        .set_default("pilot.model", DEFAULT_MODEL)?
        .set_default("pilot.dataset", DEFAULT_DATASET)?
        .set_default("pilot.n_runs", i64::from(DEFAULT_N_RUNS))?
        .set_default("pilot.passes", i64::from(DEFAULT_PASSES))?
        .set_default("pilot.temperature", f64::from(DEFAULT_TEMPERATURE))?
        .set_default("pilot.top_p", f64::from(DEFAULT_TOP_P))?
        .set_default("pilot.top_k", i64::from(DEFAULT_TOP_K))?
        .set_default("pilot.max_output_tokens", i64::from(DEFAULT_MAX_OUTPUT_TOKENS))?
        .set_default("pilot.max_retries", i64::from(DEFAULT_MAX_RETRIES))?
        .set_default("pilot.retry_delay_ms", DEFAULT_RETRY_DELAY_MS as i64)?
        .set_default(
            "pilot.model_cooldown_secs",
            DEFAULT_MODEL_COOLDOWN_SECS as i64,
        )?
        .set_default("gemini.base_url", DEFAULT_GEMINI_BASE_URL)?
        .set_default(
            "gemini.request_timeout_secs",
            DEFAULT_REQUEST_TIMEOUT_SECS as i64,
        )?)
}
