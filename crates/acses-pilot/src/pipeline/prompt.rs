//! Prompt rendering for a single sample.

use thiserror::Error;

use crate::pipeline::codebook::{CodebookLookup, HierarchyEntry};
use crate::pipeline::sample::Sample;

pub const TEXT_PLACEHOLDER: &str = "{job_description}";
pub const CODE_PLACEHOLDER: &str = "{code_to_check}";
pub const HIERARCHY_PLACEHOLDER: &str = "{hierarchy_context}";

const PLACEHOLDERS: [&str; 3] = [TEXT_PLACEHOLDER, CODE_PLACEHOLDER, HIERARCHY_PLACEHOLDER];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("prompt template is empty")]
    Empty,
    #[error("prompt template is missing placeholders: {missing:?}")]
    MissingPlaceholders { missing: Vec<&'static str> },
}

/// Master prompt with the three substitution slots verified up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    body: String,
}

impl PromptTemplate {
    pub fn new(body: impl Into<String>) -> Result<Self, TemplateError> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(TemplateError::Empty);
        }
        let missing: Vec<&'static str> = PLACEHOLDERS
            .into_iter()
            .filter(|placeholder| !body.contains(placeholder))
            .collect();
        if !missing.is_empty() {
            return Err(TemplateError::MissingPlaceholders { missing });
        }
        Ok(Self { body })
    }

    pub fn as_str(&self) -> &str {
        &self.body
    }

    pub fn render(&self, text: &str, code: &str, hierarchy: &str) -> String {
        self.body
            .replace(TEXT_PLACEHOLDER, text)
            .replace(CODE_PLACEHOLDER, code)
            .replace(HIERARCHY_PLACEHOLDER, hierarchy)
    }
}

/// Render the section → sub-class chain as a bullet list.
pub fn format_hierarchy(entry: &HierarchyEntry) -> String {
    let mut lines: Vec<String> = entry
        .levels()
        .iter()
        .map(|level| format!("- {} {}: {}", level.level.label(), level.code, level.title))
        .collect();
    if let Some(description) = entry.description() {
        lines.push(format!("- Description: {description}"));
    }
    lines.join("\n")
}

/// Build the prompt for `sample`, or `None` when its code is not in the codebook.
///
/// `None` is a skip signal, not an error: the sample takes no run slots.
pub fn build_prompt<C>(template: &PromptTemplate, sample: &Sample, codebook: &C) -> Option<String>
where
    C: CodebookLookup + ?Sized,
{
    let entry = codebook.lookup(&sample.code)?;
    let hierarchy = format_hierarchy(entry);
    Some(template.render(&sample.text, &sample.code, &hierarchy))
}
