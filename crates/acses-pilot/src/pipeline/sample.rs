use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Stable, externally assigned sample identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(String);

impl SampleId {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        debug_assert!(!id.is_empty());
        Self(id)
    }

    /// Fallback identifier for datasets without a `sample_id` column.
    pub fn from_row(index: usize) -> Self {
        Self(format!("row_{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SampleId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One job description with the KBLI code assigned to it.
///
/// Samples are produced once per invocation by the dataset loader and stay
/// immutable for the rest of the run.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: SampleId,
    /// Position in the source dataset (zero-based).
    pub row_index: usize,
    pub text: String,
    /// Five digit KBLI sub-class code; leading zeros are significant.
    pub code: String,
    pub category: Option<String>,
    pub id_created_at: Option<String>,
}

impl Sample {
    pub fn new(
        id: impl Into<SampleId>,
        row_index: usize,
        text: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            row_index,
            text: text.into(),
            code: code.into(),
            category: None,
            id_created_at: None,
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

impl From<String> for SampleId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_fallback_ids_are_prefixed() {
        assert_eq!(SampleId::from_row(7).as_str(), "row_7");
    }

    #[test]
    fn sample_id_serializes_as_plain_string() {
        let id = SampleId::new("4f1c");
        let json = serde_json::to_string(&id).expect("serialize id");
        assert_eq!(json, "\"4f1c\"");
    }
}
