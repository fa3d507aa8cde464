use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel used by upstream search results when no publication date is known.
pub const RECENT: &str = "Recent";

/// Coarse publication category used for badges and filtering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Research,
    Preprint,
    Industry,
    #[default]
    News,
}

impl SourceType {
    pub const ALL: [SourceType; 4] = [
        SourceType::Research,
        SourceType::Preprint,
        SourceType::Industry,
        SourceType::News,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Research => "research",
            SourceType::Preprint => "preprint",
            SourceType::Industry => "industry",
            SourceType::News => "news",
        }
    }

    /// Display label shown next to an article
    pub fn label(self) -> &'static str {
        match self {
            SourceType::Research => "Research",
            SourceType::Preprint => "Preprint",
            SourceType::Industry => "Industry",
            SourceType::News => "News",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown source type: {}", s))
    }
}

/// Candidate article extracted from a search response, before dedup and classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleStub {
    pub title: String,
    pub url: String,
    pub source: String,
    pub date: String,
    pub snippet: String,
}

/// Canonical article produced by an aggregation run. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub url: String,
    pub source: String,
    pub date: String,
    pub snippet: String,
    pub source_type: SourceType,
    pub source_label: String,
    pub topics: Vec<String>,
}

/// Human-friendly age of an article date relative to `today`.
///
/// `Recent` (or an empty date) stays `Recent`; dates that cannot be parsed are
/// returned unchanged.
pub fn display_date(date: &str, today: NaiveDate) -> String {
    let trimmed = date.trim();
    if trimmed.is_empty() || trimmed == RECENT {
        return RECENT.to_string();
    }

    let parsed = DateTime::parse_from_rfc3339(trimmed)
        .map(|d| d.date_naive())
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%B %d, %Y"))
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%b %d, %Y"));

    let Ok(day) = parsed else {
        return date.to_string();
    };

    match (today - day).num_days() {
        0 => "Today".to_string(),
        1 => "Yesterday".to_string(),
        n @ 2..=6 => format!("{}d ago", n),
        _ => day.format("%b %-d").to_string(),
    }
}
