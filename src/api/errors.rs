//! Helpers for turning API error bodies into short, readable messages.

/// Pull a human-readable summary out of a JSON error body.
///
/// Understands the common shapes: `{"error":{"message":..}}`,
/// `{"error":".."}` and `{"message":..}`. Whitespace is collapsed so the
/// result fits on one line.
pub fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
}

/// Format an error body for inclusion in an error value.
///
/// JSON bodies with a recognizable message are reduced to that message;
/// anything else is trimmed and truncated.
pub fn format_api_error(error_text: &str) -> String {
    const MAX_LEN: usize = 300;

    let trimmed = error_text.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&json_value) {
            return summary;
        }
    }

    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_LEN {
        let cut: String = collapsed.chars().take(MAX_LEN).collect();
        format!("{cut}…")
    } else {
        collapsed
    }
}
