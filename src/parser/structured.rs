use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::completion::CompletionResponse;
use crate::utils::excerpt;

static OPEN_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^```(?:json)?[ \t]*\r?\n?").unwrap());
static CLOSE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\r?\n)?[ \t]*```$").unwrap());

/// What the caller expects the model to have produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// A bare JSON array of `{type, reason}` objects.
    Types,
    /// Any JSON document, usually a JSON-LD object.
    SchemaObject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRecommendation {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub reason: String,
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedPayload {
    Types(Vec<TypeRecommendation>),
    SchemaObject(Value),
    /// `raw` is the completion text exactly as received.
    ExtractionFailure { raw: String, reason: String },
}

impl ExtractedPayload {
    fn failure(raw: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!(
            "Could not extract JSON from completion ({}): {:?}",
            reason,
            excerpt(raw, 120)
        );
        ExtractedPayload::ExtractionFailure {
            raw: raw.to_string(),
            reason,
        }
    }
}

/// Recover a JSON payload from free-form completion text.
///
/// 1. trim, then drop a leading ```` ``` ````/```` ```json ```` fence line and a trailing ```` ``` ````
/// 2. for [`Shape::SchemaObject`], if the rest is not clean JSON, retry on the span from
///    the first `{` to the last `}`
/// 3. parse; anything that fails yields [`ExtractedPayload::ExtractionFailure`]
///
/// The brace span is a plain first/last scan: a stray `{` in prose before the
/// object, or a `}` after it, breaks recovery. Braces inside the object's own
/// string values are fine.
pub fn extract_structured(resp: &CompletionResponse, shape: Shape) -> ExtractedPayload {
    let raw = resp.raw_text.as_str();
    let candidate = strip_fences(raw.trim());
    if candidate.is_empty() {
        return ExtractedPayload::failure(raw, "empty completion");
    }

    match shape {
        Shape::Types => {
            let value: Value = match serde_json::from_str(candidate) {
                Ok(v) => v,
                Err(e) => return ExtractedPayload::failure(raw, format!("invalid JSON: {}", e)),
            };
            match serde_json::from_value::<Vec<TypeRecommendation>>(value) {
                Ok(types) => ExtractedPayload::Types(types),
                Err(e) => ExtractedPayload::failure(raw, format!("unexpected shape: {}", e)),
            }
        }
        Shape::SchemaObject => {
            let parsed = serde_json::from_str::<Value>(candidate).or_else(|first| {
                match brace_span(candidate) {
                    Some(span) => serde_json::from_str::<Value>(span),
                    None => Err(first),
                }
            });
            match parsed {
                Ok(v) => ExtractedPayload::SchemaObject(v),
                Err(e) => ExtractedPayload::failure(raw, format!("invalid JSON: {}", e)),
            }
        }
    }
}

fn strip_fences(text: &str) -> &str {
    let start = OPEN_FENCE_RE.find(text).map_or(0, |m| m.end());
    let rest = &text[start..];
    let end = CLOSE_FENCE_RE.find(rest).map_or(rest.len(), |m| m.start());
    rest[..end].trim()
}

fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}
