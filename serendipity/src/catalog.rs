//! Fixed, ordered list of search angles issued by every aggregation run.

pub const SEARCH_QUERIES: [&str; 6] = [
    "veterinary artificial intelligence machine learning diagnosis 2024 2025",
    "AI pet health animal medicine deep learning research",
    "dvm360 AVMA veterinary technology innovation AI",
    "machine learning veterinary radiology imaging pathology",
    "AI veterinary practice management automation software",
    "livestock cattle poultry AI health monitoring",
];

pub fn len() -> usize {
    SEARCH_QUERIES.len()
}

pub fn query(index: usize) -> Option<&'static str> {
    SEARCH_QUERIES.get(index).copied()
}

/// Prompt sent with the web search tool enabled. The model is asked for a bare JSON array.
pub fn search_prompt(query: &str) -> String {
    format!(
        r#"Search: {}

Return ONLY a JSON array of 8-10 recent articles. Each must have:
- title: article title
- url: source URL
- source: publication name
- date: publication date or "Recent"
- snippet: 1-2 sentence summary

ONLY valid JSON array, no other text:
[{{"title":"...","url":"...","source":"...","date":"...","snippet":"..."}}]"#,
        query
    )
}
