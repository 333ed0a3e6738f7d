//! Typed attempt outcomes and their flat ledger representation.
//!
//! [`AttemptOutcome`] is what the runner produces; [`LedgerRecord`] is the
//! JSON line written to and read back from the ledger. Conversions only go
//! from outcome to record: the ledger is a projection, never a source of
//! outcomes.

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::pipeline::payload::{ValidationPayload, lenient_text};
use crate::pipeline::sample::{Sample, SampleId};

/// Metadata shared by every attempt, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetadata {
    pub sample_id: SampleId,
    pub original_row_index: usize,
    pub original_text: String,
    pub assigned_kbli_code: String,
    pub category: String,
    pub run_number: u32,
    pub model_name: String,
    pub dataset_name: String,
    pub timestamp: String,
    pub processing_time_seconds: f64,
    pub sample_id_created_at: Option<String>,
}

impl RunMetadata {
    pub fn for_attempt(
        sample: &Sample,
        run_number: u32,
        model_name: &str,
        dataset_name: &str,
        processing_time_seconds: f64,
    ) -> Self {
        debug_assert!(run_number >= 1);
        Self {
            sample_id: sample.id.clone(),
            original_row_index: sample.row_index,
            original_text: sample.text.clone(),
            assigned_kbli_code: sample.code.clone(),
            category: sample.category.clone().unwrap_or_else(|| "N/A".to_string()),
            run_number,
            model_name: model_name.to_string(),
            dataset_name: dataset_name.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            processing_time_seconds,
            sample_id_created_at: sample.id_created_at.clone(),
        }
    }
}

/// Classification recorded in `error_type` for failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RemoteService,
    Transport,
    EmptyResponse,
    MalformedResponse,
    PayloadParse,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RemoteService => "RemoteServiceError",
            Self::Transport => "TransportError",
            Self::EmptyResponse => "EmptyResponseError",
            Self::MalformedResponse => "MalformedResponseError",
            Self::PayloadParse => "PayloadParseError",
        }
    }
}

/// Result of one (sample, run) attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success {
        metadata: RunMetadata,
        payload: ValidationPayload,
    },
    Failure {
        metadata: RunMetadata,
        kind: FailureKind,
        message: String,
    },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// One JSON line of the result ledger.
///
/// Only `sample_id`, `run_number` and `success` decide whether a line loads.
/// Every other field tolerates absence and unexpected types, so a completed
/// run is never dropped from the completion index over a cosmetic field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub sample_id: SampleId,
    #[serde(default, deserialize_with = "lenient")]
    pub original_row_index: Option<usize>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub original_text: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub assigned_kbli_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub category: Option<String>,
    pub run_number: u32,
    #[serde(default, deserialize_with = "lenient_string")]
    pub model_name: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub dataset_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "lenient")]
    pub processing_time_seconds: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub sample_id_created_at: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub payload: ValidationPayload,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(serde_json::from_value(JsonValue::deserialize(deserializer)?).ok())
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.unwrap_or_default())
}

impl LedgerRecord {
    fn from_metadata(metadata: &RunMetadata, success: bool, payload: ValidationPayload) -> Self {
        Self {
            sample_id: metadata.sample_id.clone(),
            original_row_index: Some(metadata.original_row_index),
            original_text: Some(metadata.original_text.clone()),
            assigned_kbli_code: Some(metadata.assigned_kbli_code.clone()),
            category: Some(metadata.category.clone()),
            run_number: metadata.run_number,
            model_name: metadata.model_name.clone(),
            dataset_name: Some(metadata.dataset_name.clone()),
            timestamp: metadata.timestamp.clone(),
            processing_time_seconds: Some(metadata.processing_time_seconds),
            sample_id_created_at: metadata.sample_id_created_at.clone(),
            success,
            error_type: None,
            error_message: None,
            payload,
        }
    }
}

impl From<&AttemptOutcome> for LedgerRecord {
    fn from(outcome: &AttemptOutcome) -> Self {
        match outcome {
            AttemptOutcome::Success { metadata, payload } => {
                Self::from_metadata(metadata, true, payload.clone())
            }
            AttemptOutcome::Failure {
                metadata,
                kind,
                message,
            } => {
                let mut record = Self::from_metadata(metadata, false, ValidationPayload::default());
                record.error_type = Some(kind.as_str().to_string());
                record.error_message = Some(message.clone());
                record
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn metadata() -> RunMetadata {
        let sample = Sample::new("s1", 4, "menanam jagung", "01111").with_category("agri");
        RunMetadata::for_attempt(&sample, 2, "models/gemini-2.5-flash-lite", "mini.csv", 1.25)
    }

    #[test]
    fn success_record_merges_payload_fields() {
        let outcome = AttemptOutcome::Success {
            metadata: metadata(),
            payload: ValidationPayload {
                is_correct: Some(true),
                confidence_score: Some(0.8),
                reasoning: Some("fits".to_string()),
                alternative_codes: vec!["01112".to_string()],
                alternative_reasoning: None,
            },
        };
        let json: Value = serde_json::to_value(LedgerRecord::from(&outcome)).expect("serialize");

        assert_eq!(json["sample_id"], "s1");
        assert_eq!(json["run_number"], 2);
        assert_eq!(json["success"], true);
        assert_eq!(json["is_correct"], true);
        assert_eq!(json["alternative_codes"][0], "01112");
        assert_eq!(json["category"], "agri");
        assert!(json.get("error_type").is_none());
    }

    #[test]
    fn failure_record_nulls_payload_fields() {
        let outcome = AttemptOutcome::Failure {
            metadata: metadata(),
            kind: FailureKind::PayloadParse,
            message: "no JSON object found".to_string(),
        };
        let json: Value = serde_json::to_value(LedgerRecord::from(&outcome)).expect("serialize");

        assert_eq!(json["success"], false);
        assert_eq!(json["error_type"], "PayloadParseError");
        assert!(json["is_correct"].is_null());
        assert!(json["confidence_score"].is_null());
        assert!(json["reasoning"].is_null());
        assert!(json["alternative_reasoning"].is_null());
        assert_eq!(json["alternative_codes"], serde_json::json!([]));
    }

    #[test]
    fn minimal_line_deserializes() {
        let record: LedgerRecord =
            serde_json::from_str(r#"{"sample_id":"s9","run_number":3,"success":true}"#)
                .expect("minimal record");
        assert_eq!(record.sample_id, SampleId::new("s9"));
        assert_eq!(record.run_number, 3);
        assert!(record.success);
        assert!(record.payload.alternative_codes.is_empty());
    }

    #[test]
    fn mistyped_fields_do_not_reject_a_success_line() {
        let line = r#"{"sample_id":"s1","run_number":1,"success":true,"model_name":7,"original_row_index":"x","processing_time_seconds":"slow","is_correct":"yes","confidence_score":"high","alternative_codes":null}"#;
        let record: LedgerRecord = serde_json::from_str(line).expect("tolerant record");
        assert!(record.success);
        assert_eq!(record.model_name, "7");
        assert_eq!(record.original_row_index, None);
        assert_eq!(record.processing_time_seconds, None);
        assert_eq!(record.payload.is_correct, Some(true));
        assert_eq!(record.payload.confidence_score, None);
    }

    #[test]
    fn missing_category_defaults_to_placeholder() {
        let sample = Sample::new("s2", 0, "text", "47111");
        let meta = RunMetadata::for_attempt(&sample, 1, "m", "d.csv", 0.0);
        assert_eq!(meta.category, "N/A");
        assert!(meta.timestamp.ends_with('Z'));
    }
}
