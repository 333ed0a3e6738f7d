//! Pure pipeline types and transformations for KBLI validation runs.
//!
//! Modules under this namespace must remain free of IO and external side effects
//! so they can be reused by the batch runner, the CLI, and test harnesses.

pub mod codebook;
pub mod payload;
pub mod prompt;
pub mod record;
pub mod sample;

pub use codebook::{Codebook, CodebookLookup, HierarchyEntry, HierarchyLevel, LevelEntry};
pub use payload::{PayloadError, ValidationPayload, extract_json_from_response};
pub use prompt::{PromptTemplate, TemplateError, build_prompt, format_hierarchy};
pub use record::{AttemptOutcome, FailureKind, LedgerRecord, RunMetadata};
pub use sample::{Sample, SampleId};
