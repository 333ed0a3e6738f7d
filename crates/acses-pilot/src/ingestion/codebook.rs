//! Prepared hierarchical codebook (`kbli_codebook_hierarchical.csv`).
//!
//! One row per sub-class with `code_N`, `title_N` and optional `desc_N`
//! columns for depths 1 through 5.

use std::path::Path;

use strum::IntoEnumIterator;
use tracing::{info, warn};

use super::{Columns, IngestError, field};
use crate::pipeline::{Codebook, HierarchyEntry, HierarchyLevel, LevelEntry};

struct LevelColumns {
    level: HierarchyLevel,
    code: usize,
    title: usize,
    desc: Option<usize>,
}

pub fn load_codebook(path: &Path) -> Result<Codebook, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|err| IngestError::csv(path, err))?;
    let columns = Columns::new(
        reader
            .headers()
            .map_err(|err| IngestError::csv(path, err))?
            .clone(),
    );

    let mut required = Vec::with_capacity(HierarchyLevel::COUNT * 2);
    for level in HierarchyLevel::iter() {
        required.push(format!("code_{}", level.depth()));
        required.push(format!("title_{}", level.depth()));
    }
    let required: Vec<&str> = required.iter().map(String::as_str).collect();
    let positions = columns.require(path, &required)?;

    let layout: Vec<LevelColumns> = HierarchyLevel::iter()
        .zip(positions.chunks(2))
        .map(|(level, pair)| LevelColumns {
            level,
            code: pair[0],
            title: pair[1],
            desc: columns.position(&format!("desc_{}", level.depth())),
        })
        .collect();

    let mut codebook = Codebook::new();
    let mut duplicates = 0usize;
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|err| IngestError::csv(path, err))?;
        let Some(levels) = layout
            .iter()
            .map(|cols| {
                Some(LevelEntry {
                    level: cols.level,
                    code: field(&record, Some(cols.code))?.to_string(),
                    title: field(&record, Some(cols.title)).unwrap_or_default().to_string(),
                    description: field(&record, cols.desc).map(str::to_string),
                })
            })
            .collect::<Option<Vec<_>>>()
        else {
            warn!(path = %path.display(), row = row + 1, "codebook row lacks a code; skipped");
            continue;
        };

        let Some(entry) = HierarchyEntry::new(levels) else {
            continue;
        };
        let code = entry.code().to_string();
        if !codebook.insert(entry) {
            duplicates += 1;
            warn!(path = %path.display(), code = %code, "duplicate codebook code; keeping first");
        }
    }

    info!(
        path = %path.display(),
        entries = codebook.len(),
        duplicates,
        "codebook loaded"
    );
    Ok(codebook)
}
