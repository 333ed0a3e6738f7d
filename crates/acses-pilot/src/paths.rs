//! Project layout: where datasets, the codebook, the prompt template and
//! result ledgers live relative to the project root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::constants::{CODEBOOK_FILE, RESULTS_DIR, TEMPLATE_FILE};

#[derive(Debug, Error)]
pub enum PathError {
    #[error("unable to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Paths rooted at the project directory. In production this is the working
/// directory (or `paths.project_root`); tests construct custom instances.
#[derive(Debug, Clone)]
pub struct AppPaths {
    project_root: PathBuf,
    output_dir: Option<PathBuf>,
}

impl AppPaths {
    pub fn new<P: AsRef<Path>>(project_root: P) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            output_dir: None,
        }
    }

    pub fn from_current_dir() -> Result<Self, PathError> {
        std::env::current_dir()
            .map(Self::new)
            .map_err(PathError::CurrentDir)
    }

    /// Override the ledger directory. The path is used as given; callers
    /// resolve relative paths first.
    #[must_use]
    pub fn with_output_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.output_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// `data/input`: raw and id-annotated datasets.
    pub fn input_dir(&self) -> PathBuf {
        self.project_root.join("data").join("input")
    }

    /// `data/output`: derived artifacts such as the hierarchical codebook.
    pub fn data_output_dir(&self) -> PathBuf {
        self.project_root.join("data").join("output")
    }

    pub fn codebook_path(&self) -> PathBuf {
        self.data_output_dir().join(CODEBOOK_FILE)
    }

    pub fn template_path(&self) -> PathBuf {
        self.project_root.join("prompts").join(TEMPLATE_FILE)
    }

    /// Directory holding one JSONL ledger per (model, dataset) pair.
    pub fn results_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.data_output_dir().join(RESULTS_DIR))
    }

    pub fn ensure_results_dir(&self) -> Result<PathBuf, PathError> {
        ensure_dir(&self.results_dir())
    }

    /// Ledger for `model` over `dataset`, e.g.
    /// `models/gemini-2.5-flash-lite` + `mini_test_with_ids.csv` becomes
    /// `models_gemini_2.5_flash_lite_mini_test_with_ids.jsonl`.
    pub fn results_path(&self, model: &str, dataset: &str) -> PathBuf {
        self.results_dir().join(results_file_name(model, dataset))
    }
}

pub fn results_file_name(model: &str, dataset: &str) -> String {
    let model_slug = model.trim().replace(['/', '-'], "_");
    let stem = Path::new(dataset.trim())
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{model_slug}_{stem}.jsonl")
}

fn ensure_dir(path: &Path) -> Result<PathBuf, PathError> {
    if let Err(err) = fs::create_dir_all(path) {
        if err.kind() != io::ErrorKind::AlreadyExists {
            return Err(PathError::CreateDir {
                path: path.to_path_buf(),
                source: err,
            });
        }
    }
    Ok(path.to_path_buf())
}
