//! Loaders for the pilot's external inputs: the sample dataset, the prepared
//! KBLI codebook and the master prompt template.

pub mod codebook;
pub mod dataset;
pub mod template;

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::TemplateError;

pub use codebook::load_codebook;
pub use dataset::{
    AssignReport, LoadedDataset, assign_sample_ids, load_samples, resolve_dataset_path,
    with_ids_file_name,
};
pub use template::load_template;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path} is missing required columns: {missing:?}")]
    MissingColumns { path: PathBuf, missing: Vec<String> },
    #[error("invalid prompt template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: TemplateError,
    },
    #[error("refusing to overwrite {path}; pass --force to replace it")]
    OutputExists { path: PathBuf },
    #[error("generated duplicate sample id `{id}`")]
    DuplicateId { id: String },
}

impl IngestError {
    pub(crate) fn csv(path: &std::path::Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Column positions looked up by header name.
pub(crate) struct Columns {
    headers: csv::StringRecord,
}

impl Columns {
    pub(crate) fn new(headers: csv::StringRecord) -> Self {
        Self { headers }
    }

    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header.trim() == name)
    }

    pub(crate) fn require(
        &self,
        path: &std::path::Path,
        names: &[&str],
    ) -> Result<Vec<usize>, IngestError> {
        let missing: Vec<String> = names
            .iter()
            .filter(|name| self.position(name).is_none())
            .map(|name| (*name).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(IngestError::MissingColumns {
                path: path.to_path_buf(),
                missing,
            });
        }
        Ok(names.iter().filter_map(|name| self.position(name)).collect())
    }

    pub(crate) fn headers(&self) -> &csv::StringRecord {
        &self.headers
    }
}

/// Trimmed, non-empty field value.
pub(crate) fn field(record: &csv::StringRecord, idx: Option<usize>) -> Option<&str> {
    idx.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
