//! Structured verdict returned by the model and its recovery from free text.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

const PREVIEW_CHARS: usize = 200;

/// Verdict fields merged into every successful ledger record.
///
/// Decoding never fails on a field's type: models quote booleans and numbers
/// freely, and a ledger line must stay loadable whatever its verdict holds.
/// Values that cannot be coerced become `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationPayload {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_correct: Option<bool>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub confidence_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reasoning: Option<String>,
    #[serde(default, deserialize_with = "lenient_codes")]
    pub alternative_codes: Vec<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub alternative_reasoning: Option<String>,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("no JSON object found in response: {preview}")]
    NotFound { preview: String },
    #[error("invalid JSON payload: {source}; payload: {preview}")]
    Invalid {
        preview: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Locate and parse the JSON verdict inside a model response.
///
/// A fenced code block wins over a bare `{...}` span. Only the first fenced
/// block is considered; the bare span runs from the first `{` to the last `}`.
pub fn extract_json_from_response(text: &str) -> Result<ValidationPayload, PayloadError> {
    let candidate = fenced_json(text)
        .or_else(|| bare_json(text))
        .ok_or_else(|| PayloadError::NotFound {
            preview: preview(text),
        })?;

    serde_json::from_str(candidate).map_err(|source| PayloadError::Invalid {
        preview: preview(candidate),
        source,
    })
}

fn fenced_json(text: &str) -> Option<&str> {
    static FENCED_RE: OnceLock<Regex> = OnceLock::new();
    let regex = FENCED_RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("fenced json regex compiles")
    });
    regex
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn bare_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().nth(PREVIEW_CHARS).is_some() {
        out.push_str("...");
    }
    out
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Bool(flag) => Some(flag),
        JsonValue::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "benar" | "1" => Some(true),
            "false" | "no" | "salah" | "0" => Some(false),
            _ => None,
        },
        JsonValue::Number(number) => match number.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Number(number) => number.as_f64(),
        JsonValue::String(text) => text.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    })
}

/// Strings pass through; other non-null scalars and containers keep their
/// JSON rendering.
pub(crate) fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Null => None,
        JsonValue::String(text) => Some(text),
        other => Some(other.to_string()),
    })
}

/// Accept `null`, a single code, or a list of strings and bare numbers.
fn lenient_codes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let code = |value: JsonValue| match value {
        JsonValue::String(code) => Some(code),
        JsonValue::Number(number) => Some(number.to_string()),
        _ => None,
    };
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Array(values) => values.into_iter().filter_map(code).collect(),
        single => code(single).into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_block() {
        let text = "Here is my verdict:\n```json\n{\"is_correct\": true, \"confidence_score\": 0.9, \"reasoning\": \"matches\", \"alternative_codes\": [], \"alternative_reasoning\": null}\n```\nThanks.";
        let payload = extract_json_from_response(text).expect("fenced payload");
        assert_eq!(payload.is_correct, Some(true));
        assert_eq!(payload.confidence_score, Some(0.9));
        assert_eq!(payload.reasoning.as_deref(), Some("matches"));
        assert!(payload.alternative_codes.is_empty());
    }

    #[test]
    fn fenced_block_with_nested_object_is_captured_whole() {
        let text = "```json\n{\"is_correct\": false, \"meta\": {\"x\": 1}, \"alternative_codes\": [\"01112\"]}\n``` trailing {junk}";
        let payload = extract_json_from_response(text).expect("nested payload");
        assert_eq!(payload.is_correct, Some(false));
        assert_eq!(payload.alternative_codes, vec!["01112".to_string()]);
    }

    #[test]
    fn falls_back_to_bare_object() {
        let text = "Verdict {\"is_correct\": false, \"alternative_codes\": [\"47111\", 1234]} end";
        let payload = extract_json_from_response(text).expect("bare payload");
        assert_eq!(payload.is_correct, Some(false));
        assert_eq!(payload.alternative_codes, vec!["47111", "1234"]);
    }

    #[test]
    fn null_alternative_codes_become_empty() {
        let payload =
            extract_json_from_response("{\"alternative_codes\": null}").expect("null codes");
        assert!(payload.alternative_codes.is_empty());
        assert_eq!(payload.is_correct, None);
    }

    #[test]
    fn quoted_verdict_values_are_coerced() {
        let text = "```json\n{\"is_correct\": \"true\", \"confidence_score\": \"0.85\", \"reasoning\": \"cocok\", \"alternative_codes\": \"01112\"}\n```";
        let payload = extract_json_from_response(text).expect("quoted payload");
        assert_eq!(payload.is_correct, Some(true));
        assert_eq!(payload.confidence_score, Some(0.85));
        assert_eq!(payload.reasoning.as_deref(), Some("cocok"));
        assert_eq!(payload.alternative_codes, vec!["01112".to_string()]);
    }

    #[test]
    fn uncoercible_verdict_values_become_none() {
        let payload = extract_json_from_response(
            "{\"is_correct\": \"maybe\", \"confidence_score\": \"high\", \"reasoning\": 42, \"alternative_codes\": {\"a\": 1}}",
        )
        .expect("payload still parses");
        assert_eq!(payload.is_correct, None);
        assert_eq!(payload.confidence_score, None);
        assert_eq!(payload.reasoning.as_deref(), Some("42"));
        assert!(payload.alternative_codes.is_empty());
    }

    #[test]
    fn missing_object_is_not_found() {
        let err = extract_json_from_response("I cannot answer that.").expect_err("no json");
        assert!(matches!(err, PayloadError::NotFound { .. }));
    }

    #[test]
    fn malformed_object_is_invalid() {
        let err = extract_json_from_response("{\"is_correct\": tru}").expect_err("bad json");
        assert!(matches!(err, PayloadError::Invalid { .. }));
    }

    #[test]
    fn preview_is_truncated() {
        let long = "x".repeat(500);
        let err = extract_json_from_response(&long).expect_err("no json");
        let PayloadError::NotFound { preview } = err else {
            panic!("expected NotFound");
        };
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 3);
    }
}
