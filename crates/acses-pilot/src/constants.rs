//! Cross-cutting application constants.

/// Model used when neither config nor CLI names one.
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-lite";

/// Dataset file (under `data/input`) evaluated by default.
pub const DEFAULT_DATASET: &str = "mini_test_with_ids.csv";

/// Repeated calls per sample.
pub const DEFAULT_N_RUNS: u32 = 3;

pub const DEFAULT_PASSES: u32 = 1;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TOP_P: f32 = 0.8;
pub const DEFAULT_TOP_K: u32 = 40;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2048;

/// Attempts per run inside the executor, including the first one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base for linear backoff between non-quota retries.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;

/// Pause between models when one invocation compares several.
pub const DEFAULT_MODEL_COOLDOWN_SECS: u64 = 30;

/// Requests per minute assumed for models without a registered tier.
pub const DEFAULT_RPM: u32 = 15;

/// Multiplier applied on top of the nominal inter-request spacing.
pub const RATE_SAFETY_MARGIN: f64 = 1.1;

/// Emit a progress line every this many processed samples.
pub const PROGRESS_LOG_INTERVAL: usize = 10;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

pub const CODEBOOK_FILE: &str = "kbli_codebook_hierarchical.csv";
pub const TEMPLATE_FILE: &str = "master_prompt.txt";
pub const RESULTS_DIR: &str = "pilot_results_models";

/// Suffix appended to a dataset stem once sample ids have been assigned.
pub const WITH_IDS_SUFFIX: &str = "_with_ids";
