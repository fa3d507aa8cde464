//! Sequential aggregation run: search every catalog entry, normalize,
//! deduplicate, classify and cluster.

use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog;
use crate::classify::{categorize, detect_topics};
use crate::cluster::TopicClusters;
use crate::error::GatewayError;
use crate::gateway::SearchSource;
use crate::models::{Article, ArticleStub};
use crate::normalize::parse_stubs;

/// Number of leading title characters used as the second dedup key.
pub const TITLE_KEY_CHARS: usize = 50;

/// Idle time inserted between consecutive searches of one run.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub delay: Duration,
}

impl Pacing {
    pub fn from_config(cfg: &common::AggregationConfig) -> Self {
        Self { delay: cfg.delay() }
    }

    pub fn none() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(common::DEFAULT_DELAY_MILLIS),
        }
    }
}

fn title_key(title: &str) -> String {
    title.to_lowercase().chars().take(TITLE_KEY_CHARS).collect()
}

/// Accumulates articles across queries, first seen wins.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen_urls: HashSet<String>,
    seen_titles: HashSet<String>,
    articles: Vec<Article>,
    next_seq: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number accepted articles from `first_seq` on, so ids never repeat within a session.
    pub fn starting_at(first_seq: usize) -> Self {
        Self {
            next_seq: first_seq,
            ..Self::default()
        }
    }

    /// Sequence number the next accepted article would get
    pub fn next_seq(&self) -> usize {
        self.next_seq
    }

    /// Classify and keep `stub` unless its url or title key was already seen.
    pub fn offer(&mut self, stub: ArticleStub) -> bool {
        if self.seen_urls.contains(&stub.url) {
            return false;
        }
        let key = title_key(&stub.title);
        if self.seen_titles.contains(&key) {
            return false;
        }
        self.seen_urls.insert(stub.url.clone());
        self.seen_titles.insert(key);

        let source_type = categorize(&stub.url, &stub.title);
        let topics = detect_topics(&stub.title, &stub.snippet);
        self.articles.push(Article {
            id: format!("a-{}", self.next_seq),
            title: stub.title,
            url: stub.url,
            source: stub.source,
            date: stub.date,
            snippet: stub.snippet,
            source_type,
            source_label: source_type.label().to_string(),
            topics,
        });
        self.next_seq += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn into_articles(self) -> Vec<Article> {
        self.articles
    }
}

/// Dedup and classify batches of stubs given in query order.
pub fn deduplicate<I>(batches: I) -> Vec<Article>
where
    I: IntoIterator<Item = Vec<ArticleStub>>,
{
    let mut dedup = Deduplicator::new();
    for stub in batches.into_iter().flatten() {
        dedup.offer(stub);
    }
    dedup.into_articles()
}

/// Result of one catalog query within a run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QueryOutcome {
    Ok {
        index: usize,
        query: String,
        stubs: usize,
        accepted: usize,
    },
    Failed {
        index: usize,
        query: String,
        error: String,
    },
}

impl QueryOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, QueryOutcome::Ok { .. })
    }
}

/// Identity of one run and the first article sequence number it may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTicket {
    pub run_id: Uuid,
    pub first_seq: usize,
}

impl RunTicket {
    /// Ticket for a run outside any session
    pub fn detached() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            first_seq: 0,
        }
    }
}

/// Everything produced by one aggregation run.
#[derive(Debug, Clone)]
pub struct AggregationRun {
    pub run_id: Uuid,
    pub articles: Vec<Article>,
    /// First sequence number left unused by this run
    pub next_seq: usize,
    pub clusters: TopicClusters,
    pub outcomes: Vec<QueryOutcome>,
}

/// Run every catalog query strictly one after the other, waiting `pacing.delay`
/// between calls.
///
/// A failing query is recorded and skipped. Only a missing credential aborts the run.
pub async fn run_aggregation(
    source: &dyn SearchSource,
    pacing: &Pacing,
    ticket: RunTicket,
) -> Result<AggregationRun, GatewayError> {
    let run_id = ticket.run_id;
    let total = source.query_count();
    let mut dedup = Deduplicator::starting_at(ticket.first_seq);
    let mut outcomes = Vec::with_capacity(total);

    info!(%run_id, queries = total, "aggregation run started");

    for index in 0..total {
        let query = catalog::query(index).unwrap_or_default().to_string();

        match source.search(index).await {
            Ok(text) => {
                let stubs = parse_stubs(&text);
                let found = stubs.len();
                let before = dedup.len();
                for stub in stubs {
                    dedup.offer(stub);
                }
                let accepted = dedup.len() - before;
                info!(%run_id, index, found, accepted, "search query done");
                outcomes.push(QueryOutcome::Ok {
                    index,
                    query,
                    stubs: found,
                    accepted,
                });
            }
            Err(GatewayError::Configuration) => {
                warn!(%run_id, "aggregation run aborted: API key not configured");
                return Err(GatewayError::Configuration);
            }
            Err(e) => {
                warn!(%run_id, index, error = %e, "search query failed, continuing");
                outcomes.push(QueryOutcome::Failed {
                    index,
                    query,
                    error: e.to_string(),
                });
            }
        }

        if index + 1 < total && !pacing.delay.is_zero() {
            tokio::time::sleep(pacing.delay).await;
        }
    }

    let next_seq = dedup.next_seq();
    let articles = dedup.into_articles();
    let clusters = TopicClusters::from_articles(&articles);
    info!(
        %run_id,
        articles = articles.len(),
        topics = clusters.len(),
        "aggregation run finished"
    );

    Ok(AggregationRun {
        run_id,
        articles,
        next_seq,
        clusters,
        outcomes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn stub(title: &str, url: &str) -> ArticleStub {
        ArticleStub {
            title: title.to_string(),
            url: url.to_string(),
            source: "Src".to_string(),
            date: "Recent".to_string(),
            snippet: String::new(),
        }
    }

    /// Canned responses per catalog index; missing entries fail upstream.
    struct FakeSource {
        responses: HashMap<usize, Result<String, ()>>,
        calls: Mutex<Vec<usize>>,
        count: usize,
        missing_key: bool,
    }

    impl FakeSource {
        fn new(responses: Vec<(usize, Result<&str, ()>)>) -> Self {
            Self {
                responses: responses
                    .into_iter()
                    .map(|(i, r)| (i, r.map(str::to_string)))
                    .collect(),
                calls: Mutex::new(Vec::new()),
                count: catalog::len(),
                missing_key: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl SearchSource for FakeSource {
        fn query_count(&self) -> usize {
            self.count
        }

        async fn search(&self, index: usize) -> Result<String, GatewayError> {
            self.calls.lock().unwrap().push(index);
            if self.missing_key {
                return Err(GatewayError::Configuration);
            }
            match self.responses.get(&index) {
                Some(Ok(text)) => Ok(text.clone()),
                _ => Err(GatewayError::Upstream("502 Bad Gateway".into())),
            }
        }
    }

    #[test]
    fn scenario_single_pubmed_stub() {
        let articles = deduplicate(vec![vec![ArticleStub {
            title: "A Study on AI".into(),
            url: "https://pubmed.ncbi.nlm.nih.gov/1".into(),
            source: "PubMed".into(),
            date: "2025-01-01".into(),
            snippet: "radiology study".into(),
        }]]);

        assert_eq!(articles.len(), 1);
        let a = &articles[0];
        assert_eq!(a.id, "a-0");
        assert_eq!(a.source_type, SourceType::Research);
        assert_eq!(a.source_label, "Research");
        assert!(a.topics.contains(&"Diagnostic Imaging".to_string()));
        assert!(a.topics.contains(&"Research & Academia".to_string()));
    }

    #[test]
    fn duplicate_url_keeps_first() {
        let articles = deduplicate(vec![
            vec![stub("First title", "https://x.org/1")],
            vec![stub("Second title", "https://x.org/1")],
        ]);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "First title");
    }

    #[test]
    fn duplicate_title_prefix_is_dropped() {
        let long = "A".repeat(50);
        let articles = deduplicate(vec![vec![
            stub(&format!("{} original ending", long), "https://x.org/1"),
            stub(&format!("{} DIFFERENT ending", long.to_lowercase()), "https://x.org/2"),
            stub("Something else", "https://x.org/3"),
        ]]);
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[1].url, "https://x.org/3");
        assert_eq!(articles[1].id, "a-1");
    }

    #[test]
    fn sequence_continues_from_starting_point() {
        let mut dedup = Deduplicator::starting_at(3);
        assert!(dedup.offer(stub("One", "https://x.org/1")));
        assert!(!dedup.offer(stub("one", "https://x.org/2")));
        assert!(dedup.offer(stub("Two", "https://x.org/3")));
        assert_eq!(dedup.next_seq(), 5);

        let ids: Vec<_> = dedup.into_articles().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, ["a-3", "a-4"]);
    }

    #[test]
    fn rejected_title_does_not_reserve_its_url() {
        let mut dedup = Deduplicator::new();
        assert!(dedup.offer(stub("Same", "https://x.org/1")));
        assert!(!dedup.offer(stub("same", "https://x.org/2")));
        // url 2 was never accepted, so a fresh title may still use it
        assert!(dedup.offer(stub("Other", "https://x.org/2")));
    }

    #[test]
    fn output_never_repeats_url_or_title_key() {
        let batches: Vec<Vec<ArticleStub>> = (0..6)
            .map(|q| {
                (0..10)
                    .map(|i| {
                        stub(
                            &format!("Title {}", (q + i) % 7),
                            &format!("https://x.org/{}", (q * i) % 9),
                        )
                    })
                    .collect()
            })
            .collect();
        let articles = deduplicate(batches);

        let urls: HashSet<_> = articles.iter().map(|a| a.url.clone()).collect();
        let titles: HashSet<_> = articles.iter().map(|a| title_key(&a.title)).collect();
        assert_eq!(urls.len(), articles.len());
        assert_eq!(titles.len(), articles.len());
        assert!(articles.iter().all(|a| !a.topics.is_empty()));
    }

    #[test]
    fn title_key_counts_characters_not_bytes() {
        let title = "é".repeat(60);
        assert_eq!(title_key(&title).chars().count(), TITLE_KEY_CHARS);
    }

    #[tokio::test]
    async fn failed_queries_do_not_abort_the_run() {
        let source = FakeSource::new(vec![
            (0, Ok(r#"[{"title":"Cattle AI","url":"https://farm.news/1"}]"#)),
            (2, Ok("no json here")),
            (
                4,
                Ok(concat!(
                    r#"Sure! [{"title":"Cattle AI","url":"https://farm.news/dup"},"#,
                    r#"{"title":"Telehealth launch","url":"https://arxiv.org/abs/1"}]"#
                )),
            ),
        ]);

        let ticket = RunTicket {
            run_id: Uuid::new_v4(),
            first_seq: 7,
        };
        let run = run_aggregation(&source, &Pacing::none(), ticket)
            .await
            .expect("run");

        assert_eq!(run.run_id, ticket.run_id);
        let ids: Vec<_> = run.articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["a-7", "a-8"]);
        assert_eq!(run.next_seq, 9);
        assert_eq!(*source.calls.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(run.outcomes.len(), 6);
        assert_eq!(run.outcomes.iter().filter(|o| o.is_ok()).count(), 3);

        let titles: Vec<_> = run.articles.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, ["Cattle AI", "Telehealth launch"]);
        assert_eq!(run.articles[1].source_type, SourceType::Preprint);
        assert!(run.clusters.get("Livestock & Production").is_some());

        match &run.outcomes[4] {
            QueryOutcome::Ok { stubs, accepted, .. } => {
                assert_eq!(*stubs, 2);
                assert_eq!(*accepted, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_credential_aborts_the_run() {
        let mut source = FakeSource::new(vec![]);
        source.missing_key = true;

        let result = run_aggregation(&source, &Pacing::none(), RunTicket::detached()).await;
        assert!(matches!(result, Err(GatewayError::Configuration)));
        assert_eq!(*source.calls.lock().unwrap(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_waits_between_but_not_after_queries() {
        let source = FakeSource::new(vec![]);
        let pacing = Pacing {
            delay: Duration::from_millis(400),
        };

        let started = tokio::time::Instant::now();
        run_aggregation(&source, &pacing, RunTicket::detached())
            .await
            .expect("run");
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(2000));
        assert!(elapsed < Duration::from_millis(2400));
    }
}
