//! Sample dataset loading and one-off sample id assignment.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::{Columns, IngestError, field};
use crate::constants::WITH_IDS_SUFFIX;
use crate::pipeline::{Sample, SampleId};

const TEXT_COLUMN: &str = "text";
const CODE_COLUMN: &str = "kbli_code";
const ID_COLUMN: &str = "sample_id";
const CATEGORY_COLUMN: &str = "category";
const CREATED_AT_COLUMN: &str = "id_created_at";
const ROW_INDEX_COLUMN: &str = "original_row_index";

/// Samples plus what the loader learned about the file.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub path: PathBuf,
    pub samples: Vec<Sample>,
    /// `false` when ids were synthesized as `row_{index}`.
    pub has_sample_ids: bool,
}

/// `mini_test.csv` → `mini_test_with_ids.csv`.
pub fn with_ids_file_name(dataset: &str) -> String {
    let path = Path::new(dataset);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    format!("{stem}{WITH_IDS_SUFFIX}.{ext}")
}

/// Prefer the id-annotated sibling of `dataset` when one exists.
pub fn resolve_dataset_path(input_dir: &Path, dataset: &str) -> PathBuf {
    let direct = input_dir.join(dataset);
    let already_annotated = Path::new(dataset)
        .file_stem()
        .is_some_and(|stem| stem.to_string_lossy().ends_with(WITH_IDS_SUFFIX));
    if already_annotated {
        return direct;
    }
    let annotated = direct.with_file_name(with_ids_file_name(dataset));
    if annotated.is_file() { annotated } else { direct }
}

pub fn load_samples(path: &Path) -> Result<LoadedDataset, IngestError> {
    let mut reader = csv::Reader::from_path(path).map_err(|err| IngestError::csv(path, err))?;
    let columns = Columns::new(
        reader
            .headers()
            .map_err(|err| IngestError::csv(path, err))?
            .clone(),
    );
    let required = columns.require(path, &[TEXT_COLUMN, CODE_COLUMN])?;
    let (text_idx, code_idx) = (required[0], required[1]);
    let id_idx = columns.position(ID_COLUMN);
    let category_idx = columns.position(CATEGORY_COLUMN);
    let created_idx = columns.position(CREATED_AT_COLUMN);
    let row_idx = columns.position(ROW_INDEX_COLUMN);

    if id_idx.is_none() {
        warn!(
            path = %path.display(),
            "dataset has no sample_id column; using row_<index> identifiers"
        );
    }

    let mut samples = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|err| IngestError::csv(path, err))?;
        let row_index = field(&record, row_idx)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(index);
        let id = field(&record, id_idx)
            .map(SampleId::new)
            .unwrap_or_else(|| SampleId::from_row(index));
        let text = record.get(text_idx).unwrap_or_default().trim();
        let code = record.get(code_idx).unwrap_or_default().trim();

        let mut sample = Sample::new(id, row_index, text, code);
        sample.category = field(&record, category_idx).map(str::to_string);
        sample.id_created_at = field(&record, created_idx).map(str::to_string);
        samples.push(sample);
    }

    info!(
        path = %path.display(),
        samples = samples.len(),
        has_sample_ids = id_idx.is_some(),
        "dataset loaded"
    );
    Ok(LoadedDataset {
        path: path.to_path_buf(),
        samples,
        has_sample_ids: id_idx.is_some(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignReport {
    pub output: PathBuf,
    pub rows: usize,
}

/// Write `<stem>_with_ids.csv` next to `input`, with a fresh UUID v4
/// `sample_id` as the first column and `id_created_at` /
/// `original_row_index` appended. Existing id columns are regenerated.
pub fn assign_sample_ids(input: &Path, force: bool) -> Result<AssignReport, IngestError> {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let output = input.with_file_name(with_ids_file_name(&name));
    if output.exists() && !force {
        return Err(IngestError::OutputExists { path: output });
    }

    let mut reader = csv::Reader::from_path(input).map_err(|err| IngestError::csv(input, err))?;
    let columns = Columns::new(
        reader
            .headers()
            .map_err(|err| IngestError::csv(input, err))?
            .clone(),
    );
    columns.require(input, &[TEXT_COLUMN, CODE_COLUMN])?;
    let generated = [ID_COLUMN, CREATED_AT_COLUMN, ROW_INDEX_COLUMN];
    let kept: Vec<usize> = columns
        .headers()
        .iter()
        .enumerate()
        .filter(|(_, header)| !generated.contains(&header.trim()))
        .map(|(idx, _)| idx)
        .collect();

    let mut writer = csv::Writer::from_path(&output).map_err(|err| IngestError::csv(&output, err))?;
    let mut header = vec![ID_COLUMN];
    header.extend(kept.iter().filter_map(|&idx| columns.headers().get(idx)));
    header.extend([CREATED_AT_COLUMN, ROW_INDEX_COLUMN]);
    writer
        .write_record(&header)
        .map_err(|err| IngestError::csv(&output, err))?;

    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    let mut seen = HashSet::new();
    let mut rows = 0usize;
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|err| IngestError::csv(input, err))?;
        let id = Uuid::new_v4().to_string();
        if !seen.insert(id.clone()) {
            return Err(IngestError::DuplicateId { id });
        }
        let row_index = index.to_string();
        let mut out: Vec<&str> = Vec::with_capacity(kept.len() + 3);
        out.push(&id);
        out.extend(kept.iter().map(|&idx| record.get(idx).unwrap_or_default()));
        out.push(&created_at);
        out.push(&row_index);
        writer
            .write_record(&out)
            .map_err(|err| IngestError::csv(&output, err))?;
        rows += 1;
    }
    writer.flush().map_err(|source| IngestError::Io {
        path: output.clone(),
        source,
    })?;

    info!(input = %input.display(), output = %output.display(), rows, "sample ids assigned");
    Ok(AssignReport { output, rows })
}
