//! Setup checks run by `acses-pilot check` before committing to a long run:
//! the inputs load and agree with each other, and the model answers.

use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::ingestion::{load_codebook, load_samples, load_template};
use crate::pipeline::CodebookLookup;
use crate::services::generator::{GenerationParams, TextGenerator};

pub const CONNECTIVITY_PROMPT: &str = "Say 'API test successful'";
const CONNECTIVITY_PHRASE: &str = "successful";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Pass => "ok",
            Self::Warn => "warn",
            Self::Fail => "FAIL",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckItem {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckItem {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }

    pub fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Pass, detail)
    }

    pub fn warn(name: &'static str, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warn, detail)
    }

    pub fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Fail, detail)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreflightReport {
    pub items: Vec<CheckItem>,
}

impl PreflightReport {
    pub fn push(&mut self, item: CheckItem) {
        self.items.push(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = CheckItem>) {
        self.items.extend(items);
    }

    /// Warnings do not block a run; failures do.
    pub fn passed(&self) -> bool {
        self.items
            .iter()
            .all(|item| item.status != CheckStatus::Fail)
    }
}

/// Load every input once and check that dataset codes resolve in the
/// codebook. Load failures are reported, never returned.
pub fn check_inputs(dataset: &Path, codebook: &Path, template: &Path) -> Vec<CheckItem> {
    let mut items = Vec::with_capacity(4);

    let samples = match load_samples(dataset) {
        Ok(loaded) if loaded.samples.is_empty() => {
            items.push(CheckItem::fail(
                "dataset",
                format!("{} has no rows", dataset.display()),
            ));
            None
        }
        Ok(loaded) => {
            let detail = format!("{} samples in {}", loaded.samples.len(), dataset.display());
            items.push(if loaded.has_sample_ids {
                CheckItem::pass("dataset", detail)
            } else {
                CheckItem::warn(
                    "dataset",
                    format!("{detail}; no sample_id column, run `assign-ids` for stable ids"),
                )
            });
            Some(loaded.samples)
        }
        Err(err) => {
            items.push(CheckItem::fail("dataset", err.to_string()));
            None
        }
    };

    let codebook = match load_codebook(codebook) {
        Ok(book) if book.is_empty() => {
            items.push(CheckItem::fail(
                "codebook",
                format!("{} has no usable entries", codebook.display()),
            ));
            None
        }
        Ok(book) => {
            items.push(CheckItem::pass(
                "codebook",
                format!("{} entries in {}", book.len(), codebook.display()),
            ));
            Some(book)
        }
        Err(err) => {
            items.push(CheckItem::fail("codebook", err.to_string()));
            None
        }
    };

    items.push(match load_template(template) {
        Ok(_) => CheckItem::pass("template", template.display().to_string()),
        Err(err) => CheckItem::fail("template", err.to_string()),
    });

    if let (Some(samples), Some(codebook)) = (samples, codebook) {
        let matched = samples
            .iter()
            .filter(|sample| codebook.lookup(&sample.code).is_some())
            .count();
        let detail = format!("{matched} of {} sample codes found in codebook", samples.len());
        items.push(match matched {
            0 => CheckItem::fail("coverage", detail),
            n if n < samples.len() => {
                CheckItem::warn("coverage", format!("{detail}; the rest will be skipped"))
            }
            _ => CheckItem::pass("coverage", detail),
        });
    }

    items
}

/// One-shot generation against the configured model.
pub async fn check_connectivity(
    generator: &dyn TextGenerator,
    params: &GenerationParams,
) -> CheckItem {
    match generator.generate(CONNECTIVITY_PROMPT, params).await {
        Ok(text) if text.to_lowercase().contains(CONNECTIVITY_PHRASE) => CheckItem::pass(
            "api",
            format!("{} answered the test prompt", generator.model_name()),
        ),
        Ok(text) => {
            debug!(response = %text, "connectivity response without test phrase");
            CheckItem::warn(
                "api",
                format!(
                    "{} responded but the test phrase was missing",
                    generator.model_name()
                ),
            )
        }
        Err(err) if err.is_quota() => CheckItem::warn(
            "api",
            format!("{} is reachable but rate limited: {err}", generator.model_name()),
        ),
        Err(err) => CheckItem::fail("api", format!("{}: {err}", generator.model_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::executor::testing::ScriptedGenerator;
    use crate::services::generator::GenerationError;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const CODEBOOK_CSV: &str = "code_1,title_1,desc_1,code_2,title_2,desc_2,code_3,title_3,desc_3,code_4,title_4,desc_4,code_5,title_5,desc_5\n\
A,Pertanian,,01,Tanaman,,011,Semusim,,0111,Serealia,,01111,Jagung,Budidaya jagung\n";
    const TEMPLATE: &str = "{job_description} {code_to_check} {hierarchy_context}";

    fn write_inputs(dir: &TempDir, dataset: &str) -> (PathBuf, PathBuf, PathBuf) {
        let dataset_path = dir.path().join("mini.csv");
        let codebook_path = dir.path().join("codebook.csv");
        let template_path = dir.path().join("prompt.txt");
        std::fs::write(&dataset_path, dataset).unwrap();
        std::fs::write(&codebook_path, CODEBOOK_CSV).unwrap();
        std::fs::write(&template_path, TEMPLATE).unwrap();
        (dataset_path, codebook_path, template_path)
    }

    fn status_of(items: &[CheckItem], name: &str) -> CheckStatus {
        items
            .iter()
            .find(|item| item.name == name)
            .map(|item| item.status)
            .unwrap()
    }

    #[test]
    fn consistent_inputs_pass() {
        let dir = TempDir::new().unwrap();
        let (dataset, codebook, template) = write_inputs(
            &dir,
            "sample_id,text,kbli_code\ns1,menanam jagung,01111\n",
        );
        let items = check_inputs(&dataset, &codebook, &template);
        assert_eq!(items.len(), 4);
        assert!(items.iter().all(|item| item.status == CheckStatus::Pass), "{items:?}");
    }

    #[test]
    fn partial_coverage_and_missing_ids_warn() {
        let dir = TempDir::new().unwrap();
        let (dataset, codebook, template) = write_inputs(
            &dir,
            "text,kbli_code\nmenanam jagung,01111\ntoko kelontong,47111\n",
        );
        let items = check_inputs(&dataset, &codebook, &template);
        assert_eq!(status_of(&items, "dataset"), CheckStatus::Warn);
        assert_eq!(status_of(&items, "coverage"), CheckStatus::Warn);

        let mut report = PreflightReport::default();
        report.extend(items);
        assert!(report.passed());
    }

    #[test]
    fn missing_template_fails_without_coverage_skip() {
        let dir = TempDir::new().unwrap();
        let (dataset, codebook, _) = write_inputs(
            &dir,
            "sample_id,text,kbli_code\ns1,menanam jagung,01111\n",
        );
        let items = check_inputs(&dataset, &codebook, &dir.path().join("absent.txt"));
        assert_eq!(status_of(&items, "template"), CheckStatus::Fail);
        assert_eq!(status_of(&items, "coverage"), CheckStatus::Pass);

        let mut report = PreflightReport::default();
        report.extend(items);
        assert!(!report.passed());
    }

    #[tokio::test]
    async fn connectivity_classifies_responses() {
        let params = GenerationParams::default();
        let answers = ScriptedGenerator::new(
            vec![
                Ok("API test successful!".to_string()),
                Ok("Hello".to_string()),
                Err(GenerationError::RateLimited {
                    message: "quota".to_string(),
                    retry_after: None,
                }),
            ],
            || {
                Err(GenerationError::Remote {
                    status: 403,
                    message: "API key not valid".to_string(),
                })
            },
        );

        let statuses = [
            check_connectivity(&answers, &params).await.status,
            check_connectivity(&answers, &params).await.status,
            check_connectivity(&answers, &params).await.status,
            check_connectivity(&answers, &params).await.status,
        ];
        assert_eq!(
            statuses,
            [
                CheckStatus::Pass,
                CheckStatus::Warn,
                CheckStatus::Warn,
                CheckStatus::Fail
            ]
        );
        assert_eq!(answers.calls(), 4);
    }
}
