use serde::Serialize;

/// Appended to capped HTML so the model knows it is looking at a prefix.
pub const TRUNCATION_SENTINEL: &str = "\n<!-- HTML truncated for prompt size -->\n";

/// Prompt budget for type recommendation.
pub const RECOMMEND_CAP_BYTES: usize = 5 * 1024;
/// Prompt budget for JSON-LD generation.
pub const GENERATE_CAP_BYTES: usize = 5000;

/// Page markup bounded for prompt inclusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResult {
    pub html: String,
    pub truncated: bool,
    /// Original length when untouched; the enforced cap when truncated.
    pub byte_length: usize,
}

/// Cap `html` at `cap_bytes`. `None` leaves the markup unbounded.
///
/// The cut backs off to the nearest char boundary, so multi-byte text may keep
/// a few bytes less than the cap. ASCII input is cut at exactly `cap_bytes`.
pub fn normalize(html: String, cap_bytes: Option<usize>) -> FetchResult {
    let cap = match cap_bytes {
        Some(cap) if html.len() > cap => cap,
        _ => {
            let byte_length = html.len();
            return FetchResult {
                html,
                truncated: false,
                byte_length,
            };
        }
    };

    let mut cut = cap;
    while !html.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut bounded = String::with_capacity(cut + TRUNCATION_SENTINEL.len());
    bounded.push_str(&html[..cut]);
    bounded.push_str(TRUNCATION_SENTINEL);

    FetchResult {
        html: bounded,
        truncated: true,
        byte_length: cap,
    }
}
