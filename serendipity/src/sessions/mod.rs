//! Per-visitor reading state: the current article set, bookmarks, notes and last digest.
//!
//! Sessions live in process memory only and are addressed by a random id.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::{AggregationRun, QueryOutcome, RunTicket};
use crate::cluster::TopicClusters;
use crate::digest::Digest;
use crate::models::{display_date, Article, SourceType};
use crate::registration::Registration;

/// Characters of each preview title shown on a topic card
const PREVIEW_CHARS: usize = 55;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown session")]
    UnknownSession,

    #[error("unknown article: {0}")]
    UnknownArticle(String),
}

/// Session represents one registered visitor's reading state
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user: Registration,
    pub started_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub articles: Vec<Article>,
    /// Next article sequence number; ids are never reused within a session
    pub next_seq: usize,
    pub clusters: TopicClusters,
    /// Bookmarks in the order they were saved
    pub saved: Vec<Article>,
    pub notes: HashMap<String, String>,
    pub digest: Option<Digest>,
    /// Run whose results may still be committed
    pub current_run: Option<Uuid>,
    pub last_outcomes: Vec<QueryOutcome>,
}

impl Session {
    fn new(user: Registration, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user,
            started_at: now,
            last_seen: now,
            articles: Vec::new(),
            next_seq: 0,
            clusters: TopicClusters::default(),
            saved: Vec::new(),
            notes: HashMap::new(),
            digest: None,
            current_run: None,
            last_outcomes: Vec::new(),
        }
    }

    fn is_saved(&self, article_id: &str) -> bool {
        self.saved.iter().any(|a| a.id == article_id)
    }

    fn knows(&self, article_id: &str) -> bool {
        self.is_saved(article_id) || self.articles.iter().any(|a| a.id == article_id)
    }
}

/// Which article list a feed request starts from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum View {
    #[default]
    Feed,
    Saved,
}

/// Filters applied on top of the selected view
#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    pub view: View,
    pub topic: Option<String>,
    pub source_type: Option<SourceType>,
    pub search: Option<String>,
}

/// Article decorated with per-session display state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    #[serde(flatten)]
    pub article: Article,
    pub display_date: String,
    pub saved: bool,
    pub note: Option<String>,
}

/// Topic card: label, size and the first two titles
#[derive(Debug, Clone, Serialize)]
pub struct TopicSummary {
    pub topic: String,
    pub count: usize,
    pub previews: Vec<String>,
}

fn preview(title: &str) -> String {
    let mut out: String = title.chars().take(PREVIEW_CHARS).collect();
    out.push_str("...");
    out
}

/// Apply view, topic, source-type and text filters in that order.
pub fn filter_articles(session: &Session, query: &FeedQuery) -> Vec<Article> {
    let base: Vec<Article> = match (query.view, query.topic.as_deref()) {
        (View::Saved, _) => session.saved.clone(),
        (View::Feed, Some(topic)) => session
            .clusters
            .get(topic)
            .map(<[Article]>::to_vec)
            .unwrap_or_default(),
        (View::Feed, None) => session.articles.clone(),
    };

    let needle = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    base.into_iter()
        .filter(|a| query.source_type.map_or(true, |t| a.source_type == t))
        .filter(|a| match &needle {
            Some(q) => a.title.to_lowercase().contains(q) || a.snippet.to_lowercase().contains(q),
            None => true,
        })
        .collect()
}

/// Process-wide map of live sessions; idle ones expire.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
    idle_ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_idle_ttl(std::time::Duration::from_secs(
            60 * common::DEFAULT_SESSION_IDLE_MINUTES,
        ))
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_ttl(ttl: std::time::Duration) -> Self {
        let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).min(i64::from(u32::MAX));
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_ttl: Duration::seconds(secs),
        }
    }

    fn is_idle(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(session.last_seen) > self.idle_ttl
    }

    /// Start a session for a freshly registered visitor
    pub async fn create(&self, user: Registration) -> Uuid {
        self.create_at(user, Utc::now()).await
    }

    async fn create_at(&self, user: Registration, now: DateTime<Utc>) -> Uuid {
        let session = Session::new(user, now);
        let id = session.id;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !self.is_idle(s, now));
        if sessions.len() < before {
            info!(expired = before - sessions.len(), "idle sessions dropped");
        }
        sessions.insert(id, session);
        info!(session_id = %id, live = sessions.len(), "session started");
        id
    }

    /// Mark a session as active; false if it is unknown or has expired.
    pub async fn touch(&self, id: Uuid) -> bool {
        self.touch_at(id, Utc::now()).await
    }

    async fn touch_at(&self, id: Uuid, now: DateTime<Utc>) -> bool {
        let mut sessions = self.sessions.write().await;
        let idle = match sessions.get(&id) {
            Some(session) => self.is_idle(session, now),
            None => return false,
        };
        if idle {
            sessions.remove(&id);
            info!(session_id = %id, "session expired");
            return false;
        }
        if let Some(session) = sessions.get_mut(&id) {
            session.last_seen = now;
        }
        true
    }

    /// Drop every session idle for longer than the TTL; returns how many went.
    pub async fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(Utc::now()).await
    }

    async fn sweep_idle_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !self.is_idle(s, now));
        before - sessions.len()
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Snapshot of a session
    pub async fn get(&self, id: Uuid) -> Result<Session, SessionError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SessionError::UnknownSession)
    }

    /// Mark a new run as the only one allowed to commit results
    pub async fn begin_run(&self, id: Uuid) -> Result<RunTicket, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(SessionError::UnknownSession)?;
        let run_id = Uuid::new_v4();
        if let Some(previous) = session.current_run.replace(run_id) {
            info!(session_id = %id, %previous, %run_id, "superseding in-flight run");
        }
        Ok(RunTicket {
            run_id,
            first_seq: session.next_seq,
        })
    }

    /// Store a run's results unless a newer run was started meanwhile.
    pub async fn commit_run(&self, id: Uuid, run: AggregationRun) -> Result<bool, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(SessionError::UnknownSession)?;

        if session.current_run != Some(run.run_id) {
            warn!(session_id = %id, run_id = %run.run_id, "discarding stale run results");
            return Ok(false);
        }

        // An article seen before under the same url keeps its id, so bookmarks
        // and notes follow it across refreshes.
        let known: HashMap<&str, &str> = session
            .saved
            .iter()
            .chain(session.articles.iter())
            .map(|a| (a.url.as_str(), a.id.as_str()))
            .collect();
        let articles: Vec<Article> = run
            .articles
            .into_iter()
            .map(|mut a| {
                if let Some(id) = known.get(a.url.as_str()) {
                    a.id = id.to_string();
                }
                a
            })
            .collect();

        session.clusters = TopicClusters::from_articles(&articles);
        session.articles = articles;
        session.next_seq = session.next_seq.max(run.next_seq);
        session.last_outcomes = run.outcomes;
        session.current_run = None;
        Ok(true)
    }

    /// Release a run that ended without results (e.g. missing credential).
    pub async fn abandon_run(&self, id: Uuid, run_id: Uuid) {
        if let Some(session) = self.sessions.write().await.get_mut(&id) {
            if session.current_run == Some(run_id) {
                session.current_run = None;
            }
        }
    }

    /// Bookmark or un-bookmark an article; returns whether it is now saved.
    pub async fn toggle_saved(&self, id: Uuid, article_id: &str) -> Result<bool, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(SessionError::UnknownSession)?;

        if let Some(pos) = session.saved.iter().position(|a| a.id == article_id) {
            session.saved.remove(pos);
            return Ok(false);
        }

        let article = session
            .articles
            .iter()
            .find(|a| a.id == article_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownArticle(article_id.to_string()))?;
        session.saved.push(article);
        Ok(true)
    }

    pub async fn set_note(
        &self,
        id: Uuid,
        article_id: &str,
        note: String,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(SessionError::UnknownSession)?;
        if !session.knows(article_id) {
            return Err(SessionError::UnknownArticle(article_id.to_string()));
        }
        session.notes.insert(article_id.to_string(), note);
        Ok(())
    }

    pub async fn feed(
        &self,
        id: Uuid,
        query: &FeedQuery,
        today: NaiveDate,
    ) -> Result<Vec<FeedEntry>, SessionError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(SessionError::UnknownSession)?;

        Ok(filter_articles(session, query)
            .into_iter()
            .map(|article| FeedEntry {
                display_date: display_date(&article.date, today),
                saved: session.is_saved(&article.id),
                note: session.notes.get(&article.id).cloned(),
                article,
            })
            .collect())
    }

    /// Topic cards, largest first
    pub async fn topics(&self, id: Uuid) -> Result<Vec<TopicSummary>, SessionError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(SessionError::UnknownSession)?;

        Ok(session
            .clusters
            .sorted_by_size()
            .into_iter()
            .map(|c| TopicSummary {
                topic: c.topic.clone(),
                count: c.articles.len(),
                previews: c.articles.iter().take(2).map(|a| preview(&a.title)).collect(),
            })
            .collect())
    }

    /// Leading articles of the feed, as sent to the digest
    pub async fn digest_input(&self, id: Uuid, limit: usize) -> Result<Vec<Article>, SessionError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(SessionError::UnknownSession)?;
        Ok(session.articles.iter().take(limit).cloned().collect())
    }

    pub async fn store_digest(&self, id: Uuid, digest: Digest) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(SessionError::UnknownSession)?;
        session.digest = Some(digest);
        Ok(())
    }

    pub async fn digest(&self, id: Uuid) -> Result<Option<Digest>, SessionError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(SessionError::UnknownSession)?;
        Ok(session.digest.clone())
    }
}
