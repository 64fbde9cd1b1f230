use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// One JSON-LD document parsed out of a page.
pub type EmbeddedSchemaBlock = Value;

static LD_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script\b(?:[^>]*?\s)?type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script\s*>"#)
        .unwrap()
});

/// Pull every `application/ld+json` script body out of raw HTML.
/// Blocks that are not valid JSON are skipped; the rest are kept in page order.
pub fn extract_embedded(html: &str) -> Vec<EmbeddedSchemaBlock> {
    LD_JSON_RE
        .captures_iter(html)
        .enumerate()
        .filter_map(|(i, caps)| {
            let body = caps.get(1)?.as_str().trim();
            match serde_json::from_str::<Value>(body) {
                Ok(v) => Some(v),
                Err(e) => {
                    debug!("Skipping malformed JSON-LD block #{}: {}", i, e);
                    None
                }
            }
        })
        .collect()
}

/// Every `@type` named by the blocks, including `@graph` members, deduplicated in order.
pub fn schema_types(blocks: &[EmbeddedSchemaBlock]) -> Vec<String> {
    let mut out = Vec::new();
    for block in blocks {
        collect_types(block, &mut out);
    }
    out
}

fn collect_types(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_types(v, out)),
        Value::Object(map) => {
            match map.get("@type") {
                Some(Value::String(t)) => push_unique(out, t),
                Some(Value::Array(ts)) => ts
                    .iter()
                    .filter_map(Value::as_str)
                    .for_each(|t| push_unique(out, t)),
                _ => {}
            }
            if let Some(graph) = map.get("@graph") {
                collect_types(graph, out);
            }
        }
        _ => {}
    }
}

fn push_unique(out: &mut Vec<String>, t: &str) {
    if !out.iter().any(|x| x == t) {
        out.push(t.to_string());
    }
}
