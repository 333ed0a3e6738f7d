//! Append-only JSONL result ledger and the completion index rebuilt from it.
//!
//! Every attempt, successful or not, is one self-contained JSON line. The
//! ledger is the only durable state: on startup the set of successful
//! `(sample_id, run_number)` pairs is reconstructed by scanning it, so a
//! crash can only ever damage the final line, which the loader skips.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

use crate::pipeline::{LedgerRecord, SampleId};

const MAX_REPORTED_PARSE_ERRORS: usize = 5;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize ledger record: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl LedgerError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Successful run indices per sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionIndex {
    runs: HashMap<SampleId, BTreeSet<u32>>,
}

impl CompletionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the pair was not already present.
    pub fn insert(&mut self, sample_id: SampleId, run: u32) -> bool {
        self.runs.entry(sample_id).or_default().insert(run)
    }

    pub fn contains(&self, sample_id: &SampleId, run: u32) -> bool {
        self.runs
            .get(sample_id)
            .is_some_and(|runs| runs.contains(&run))
    }

    /// `{1..=n_runs} - completed`, ascending.
    pub fn remaining_runs(&self, sample_id: &SampleId, n_runs: u32) -> Vec<u32> {
        let done = self.runs.get(sample_id);
        (1..=n_runs)
            .filter(|run| done.is_none_or(|runs| !runs.contains(run)))
            .collect()
    }

    pub fn is_complete(&self, sample_id: &SampleId, n_runs: u32) -> bool {
        self.remaining_runs(sample_id, n_runs).is_empty()
    }

    /// Number of completed `(sample, run)` pairs.
    pub fn len(&self) -> usize {
        self.runs.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> FromIterator<&'a LedgerRecord> for CompletionIndex {
    fn from_iter<I: IntoIterator<Item = &'a LedgerRecord>>(records: I) -> Self {
        let mut index = Self::new();
        for record in records.into_iter().filter(|record| record.success) {
            index.insert(record.sample_id.clone(), record.run_number);
        }
        index
    }
}

/// Everything recoverable from the ledger file.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub records: Vec<LedgerRecord>,
    pub completed: CompletionIndex,
    pub skipped_lines: usize,
}

/// Line-level scan summary used by `status`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerStats {
    pub total_lines: usize,
    pub valid_records: usize,
    pub invalid_lines: usize,
    pub empty_lines: usize,
    pub successes: usize,
    pub failures: usize,
    pub unique_samples: usize,
    pub completed_pairs: usize,
    /// `(line number, message)` for the first few unparseable lines.
    pub parse_errors: Vec<(usize, String)>,
}

impl LedgerStats {
    pub fn success_rate(&self) -> f64 {
        if self.valid_records == 0 {
            0.0
        } else {
            self.successes as f64 / self.valid_records as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultLedger {
    path: PathBuf,
}

impl ResultLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all parseable records; a missing file yields an empty snapshot.
    pub async fn load(&self) -> Result<LedgerSnapshot, LedgerError> {
        let Some(bytes) = self.read_bytes().await? else {
            return Ok(LedgerSnapshot::default());
        };

        let mut records = Vec::new();
        let mut skipped_lines = 0;
        for (idx, line) in non_empty_lines(&bytes) {
            match serde_json::from_slice::<LedgerRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    skipped_lines += 1;
                    warn!(
                        path = %self.path.display(),
                        line = idx + 1,
                        error = %err,
                        "skipping malformed ledger line"
                    );
                }
            }
        }

        let completed = records.iter().collect();
        Ok(LedgerSnapshot {
            records,
            completed,
            skipped_lines,
        })
    }

    /// Append one record as a single line, then flush it to stable storage.
    ///
    /// A previous crash may have left a torn final line without a newline;
    /// in that case a newline is written first so the new record stays
    /// parseable on its own.
    pub async fn append(&self, record: &LedgerRecord) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| LedgerError::io(parent, err))?;
        }

        let json = serde_json::to_vec(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|err| LedgerError::io(&self.path, err))?;

        let mut buf = Vec::with_capacity(json.len() + 2);
        if !ends_with_newline(&mut file)
            .await
            .map_err(|err| LedgerError::io(&self.path, err))?
        {
            buf.push(b'\n');
        }
        buf.extend_from_slice(&json);
        buf.push(b'\n');

        file.write_all(&buf)
            .await
            .map_err(|err| LedgerError::io(&self.path, err))?;
        file.flush()
            .await
            .map_err(|err| LedgerError::io(&self.path, err))?;
        file.sync_data()
            .await
            .map_err(|err| LedgerError::io(&self.path, err))?;
        Ok(())
    }

    /// Fraction of successful records; `0.0` when the ledger is absent or empty.
    pub async fn success_rate(&self) -> Result<f64, LedgerError> {
        Ok(self.stats().await?.success_rate())
    }

    pub async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let mut stats = LedgerStats::default();
        let Some(bytes) = self.read_bytes().await? else {
            return Ok(stats);
        };

        let mut samples = HashSet::new();
        let mut completed = CompletionIndex::new();
        for (idx, line) in split_lines(&bytes) {
            stats.total_lines += 1;
            if line.iter().all(u8::is_ascii_whitespace) {
                stats.empty_lines += 1;
                continue;
            }
            match serde_json::from_slice::<LedgerRecord>(line) {
                Ok(record) => {
                    stats.valid_records += 1;
                    if record.success {
                        stats.successes += 1;
                        completed.insert(record.sample_id.clone(), record.run_number);
                    } else {
                        stats.failures += 1;
                    }
                    samples.insert(record.sample_id);
                }
                Err(err) => {
                    stats.invalid_lines += 1;
                    if stats.parse_errors.len() < MAX_REPORTED_PARSE_ERRORS {
                        stats.parse_errors.push((idx + 1, err.to_string()));
                    }
                }
            }
        }
        stats.unique_samples = samples.len();
        stats.completed_pairs = completed.len();
        Ok(stats)
    }

    async fn read_bytes(&self) -> Result<Option<Vec<u8>>, LedgerError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(LedgerError::io(&self.path, err)),
        }
    }
}

/// Split on `\n` without decoding, so a torn multi-byte character only
/// poisons its own line. A trailing empty segment is not a line.
fn split_lines(bytes: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let lines = (!bytes.is_empty()).then(|| body.split(|b| *b == b'\n'));
    lines.into_iter().flatten().enumerate()
}

fn non_empty_lines(bytes: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    split_lines(bytes).filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
}

async fn ends_with_newline(file: &mut tokio::fs::File) -> std::io::Result<bool> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}
