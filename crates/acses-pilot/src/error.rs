//! Application-level error type shared by the binary and its commands.

use thiserror::Error;

use crate::config;
use crate::ingestion::IngestError;
use crate::paths::PathError;
use crate::services::{GeminiClientError, LedgerError, RunError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    ConfigLoad(#[from] config::AppConfigError),
    #[error(transparent)]
    Paths(#[from] PathError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Client(#[from] GeminiClientError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("ledger not found at {0}")]
    MissingLedger(std::path::PathBuf),
}
