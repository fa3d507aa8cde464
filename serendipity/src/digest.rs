//! Digest synthesis over the top articles, and rendering of its `[n]` citations.

use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use crate::llm::{LlmProvider, LlmRequest, LlmResponse};
use crate::models::Article;

pub const NO_ARTICLES: &str = "No articles loaded yet.";

/// Narrative text plus the articles its citation numbers point at
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Digest {
    pub text: String,
    /// `references[n - 1]` is the article cited as `[n]`
    pub references: Vec<Article>,
}

impl Digest {
    fn placeholder(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            references: Vec::new(),
        }
    }

    fn failed(reason: impl std::fmt::Display) -> Self {
        Self::placeholder(format!("Failed: {}", reason))
    }

    /// Clipboard export: the text followed by the numbered reference list.
    pub fn to_plain_text(&self) -> String {
        let mut out = self.text.clone();
        if !self.references.is_empty() {
            out.push_str("\n\n---\nReferences:\n");
            let lines: Vec<String> = self
                .references
                .iter()
                .enumerate()
                .map(|(i, r)| format!("[{}] {} - {}", i + 1, r.title, r.url))
                .collect();
            out.push_str(&lines.join("\n"));
        }
        out
    }

    pub fn segments(&self) -> Vec<Segment<'_>> {
        segments(&self.text, &self.references)
    }

    pub fn to_html(&self) -> String {
        render_html(&self.text, &self.references)
    }
}

/// `[i] title (source): snippet` lines, numbered from 1.
pub fn reference_lines(articles: &[Article]) -> String {
    articles
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let snippet = if a.snippet.is_empty() {
                "No summary"
            } else {
                a.snippet.as_str()
            };
            format!("[{}] {} ({}): {}", i + 1, a.title, a.source, snippet)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn digest_prompt(articles: &[Article]) -> String {
    format!(
        r#"You are writing a weekly intelligence briefing on veterinary AI for an executive audience.

Here are {} recent articles (numbered for citation):
{}

Write a concise digest (3-4 paragraphs) that:
1. Opens with the most significant development or trend
2. Synthesizes key themes across research, industry, and news
3. Highlights notable papers, product launches, or strategic moves
4. Closes with implications for veterinary practice leaders

IMPORTANT: When referencing specific articles, include the citation number in brackets, e.g., [1], [3], [7].

Write in a crisp, newsletter style. No bullet points. Use citation numbers to reference sources."#,
        articles.len(),
        reference_lines(articles)
    )
}

/// Builds digests through one summarization call per request.
#[derive(Clone)]
pub struct DigestSynthesizer {
    provider: Option<Arc<dyn LlmProvider>>,
    max_tokens: usize,
    limit: usize,
}

impl DigestSynthesizer {
    pub fn new(provider: Option<Arc<dyn LlmProvider>>, max_tokens: usize, limit: usize) -> Self {
        Self {
            provider,
            max_tokens,
            limit,
        }
    }

    /// Largest number of articles sent upstream
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Raw upstream call for the first `limit` articles. Callers reject empty input.
    pub async fn request(&self, articles: &[Article]) -> anyhow::Result<LlmResponse> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("API key not configured"))?;
        let selected = &articles[..articles.len().min(self.limit)];

        provider
            .generate(LlmRequest {
                prompt: digest_prompt(selected),
                max_tokens: Some(self.max_tokens),
                ..Default::default()
            })
            .await
    }

    /// Never fails: problems become placeholder text with no references.
    pub async fn synthesize(&self, articles: &[Article]) -> Digest {
        if articles.is_empty() {
            return Digest::placeholder(NO_ARTICLES);
        }
        let selected = &articles[..articles.len().min(self.limit)];

        match self.request(selected).await {
            Ok(response) if response.content.trim().is_empty() => {
                warn!("digest response had no text");
                Digest::failed("No content")
            }
            Ok(response) => {
                info!(
                    model = %response.model,
                    references = selected.len(),
                    output_tokens = response.usage.output_tokens,
                    "digest generated"
                );
                Digest {
                    text: response.content,
                    references: selected.to_vec(),
                }
            }
            Err(e) => {
                warn!(error = %e, "digest generation failed");
                Digest::failed(e)
            }
        }
    }
}

/// Piece of digest text: plain text or a resolvable citation marker.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment<'a> {
    Text(&'a str),
    Citation {
        number: usize,
        marker: &'a str,
        article: &'a Article,
    },
}

fn citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("valid citation regex"))
}

/// Split `text` at `[n]` markers. Markers outside `1..=references.len()` stay text.
pub fn segments<'a>(text: &'a str, references: &'a [Article]) -> Vec<Segment<'a>> {
    let mut out = Vec::new();
    let mut last = 0;

    for caps in citation_regex().captures_iter(text) {
        let whole = caps.get(0).expect("group 0 always present");
        let article = caps[1]
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
            .and_then(|n| references.get(n - 1).map(|a| (n, a)));

        if let Some((number, article)) = article {
            if whole.start() > last {
                out.push(Segment::Text(&text[last..whole.start()]));
            }
            out.push(Segment::Citation {
                number,
                marker: whole.as_str(),
                article,
            });
            last = whole.end();
        }
    }

    if last < text.len() {
        out.push(Segment::Text(&text[last..]));
    }
    out
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Paragraphs (split on blank lines) as `<p>` elements with citations linked to their sources.
pub fn render_html(text: &str, references: &[Article]) -> String {
    text.split("\n\n")
        .map(|para| {
            let body: String = segments(para, references)
                .into_iter()
                .map(|seg| match seg {
                    Segment::Text(t) => escape_html(t),
                    Segment::Citation {
                        marker, article, ..
                    } => format!(
                        concat!(
                            r#"<a href="{}" title="{}" "#,
                            r#"target="_blank" rel="noopener noreferrer">{}</a>"#,
                        ),
                        escape_html(&article.url),
                        escape_html(&article.title),
                        marker
                    ),
                })
                .collect();
            format!("<p>{}</p>", body)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
