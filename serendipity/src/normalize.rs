//! Best-effort extraction of article stubs from free-form model output.
//!
//! Nothing in here fails: malformed input degrades to zero stubs.

use serde_json::Value;
use tracing::debug;

use crate::models::{ArticleStub, RECENT};

/// Slice from the first `[` to the last `]`, if both exist in that order.
pub fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse every usable stub out of a search response text.
pub fn parse_stubs(text: &str) -> Vec<ArticleStub> {
    let Some(raw) = extract_json_array(text) else {
        debug!("no JSON array found in search response");
        return Vec::new();
    };

    let items = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items,
        Ok(_) => return Vec::new(),
        Err(e) => {
            debug!(error = %e, "search response array did not parse");
            return Vec::new();
        }
    };

    items.iter().filter_map(stub_from_value).collect()
}

/// A stub needs a non-empty string `title` and `url`; other fields are optional.
fn stub_from_value(value: &Value) -> Option<ArticleStub> {
    let obj = value.as_object()?;
    let text = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    };

    let title = text("title");
    let url = text("url");
    if title.is_empty() || url.is_empty() {
        return None;
    }

    let date = text("date");
    Some(ArticleStub {
        title,
        url,
        source: text("source"),
        date: if date.is_empty() { RECENT.to_string() } else { date },
        snippet: text("snippet"),
    })
}
