use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use rocket::http::{Cookie, CookieJar};
use rocket::response::content::RawJson;
use rocket::serde::json::{Error as JsonError, Json};
use rocket::{get, post, put, routes, Build, Rocket, State};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use common::Config;

use crate::aggregate::{run_aggregation, Pacing, QueryOutcome};
use crate::digest::{Digest, DigestSynthesizer};
use crate::error::ApiError;
use crate::gateway::SearchGateway;
use crate::llm::remote::AnthropicProvider;
use crate::llm::LlmProvider;
use crate::models::{Article, SourceType};
use crate::registration::{InMemoryRegistrationStore, NewRegistration, RegistrationStore};
use crate::sessions::{FeedEntry, FeedQuery, SessionStore, TopicSummary, View};

/// Private cookie carrying the session id handed out at registration.
pub const SESSION_COOKIE: &str = "sid";

const SESSION_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm_provider: Option<Arc<dyn LlmProvider>>,
    pub registrations: Arc<dyn RegistrationStore>,
    pub sessions: Arc<SessionStore>,
    /// Shared secret for reading the registration log; `None` locks it.
    pub admin_key: Option<String>,
}

impl AppState {
    pub fn new(
        config: Config,
        llm_provider: Option<Arc<dyn LlmProvider>>,
        admin_key: Option<String>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::with_idle_ttl(config.sessions.idle_ttl()));
        Self {
            config: Arc::new(config),
            llm_provider,
            registrations: Arc::new(InMemoryRegistrationStore::new()),
            sessions,
            admin_key,
        }
    }

    /// Resolve secrets from the environment and build the provider.
    pub fn from_config(config: Config) -> Self {
        let llm_provider = match config.llm_api_key() {
            Some(api_key) => {
                let provider = AnthropicProvider::from_config(&config.llm, api_key);
                tracing::info!(
                    "LLM provider initialized: anthropic ({}) at {}",
                    provider.model(),
                    config.llm.api_url()
                );
                Some(Arc::new(provider) as Arc<dyn LlmProvider>)
            }
            None => {
                tracing::warn!(
                    "LLM API key env var '{}' not set; search and digest will fail",
                    config.llm.api_key_env()
                );
                None
            }
        };

        let admin_key = config.admin_key();
        if admin_key.is_none() {
            tracing::warn!(
                "admin key env var '{}' not set; registration log is unreadable",
                config.admin.key_env()
            );
        }

        Self::new(config, llm_provider, admin_key)
    }

    pub fn search_gateway(&self) -> SearchGateway {
        SearchGateway::new(self.llm_provider.clone(), self.config.llm.search_max_tokens())
    }

    pub fn synthesizer(&self) -> DigestSynthesizer {
        DigestSynthesizer::new(
            self.llm_provider.clone(),
            self.config.llm.digest_max_tokens(),
            self.config.aggregation.digest_limit(),
        )
    }

    pub fn pacing(&self) -> Pacing {
        Pacing::from_config(&self.config.aggregation)
    }
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

/// Missing or empty `q` means the first catalog entry.
fn parse_index(q: Option<&str>) -> Result<usize, ApiError> {
    match q.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(0),
        Some(s) => s.parse::<usize>().map_err(|_| ApiError::InvalidIndex),
    }
}

/// Search proxy: one catalog query, upstream body passed through untouched.
#[get("/api/search?<q>")]
async fn search(state: &State<AppState>, q: Option<&str>) -> Result<RawJson<String>, ApiError> {
    let index = parse_index(q)?;
    let response = state.search_gateway().query(index).await?;
    Ok(RawJson(response.raw))
}

#[derive(Deserialize)]
struct DigestRequest {
    #[serde(default)]
    articles: Option<Vec<Article>>,
}

/// Digest proxy for caller-supplied articles.
#[post("/api/digest", data = "<body>")]
async fn digest(
    state: &State<AppState>,
    body: Result<Json<DigestRequest>, JsonError<'_>>,
) -> Result<RawJson<String>, ApiError> {
    if state.llm_provider.is_none() {
        return Err(ApiError::Configuration("API key not configured".into()));
    }

    let articles = body
        .ok()
        .and_then(|Json(req)| req.articles)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ApiError::Validation("No articles provided".into()))?;

    let response = state
        .synthesizer()
        .request(&articles)
        .await
        .map_err(|e| ApiError::Upstream(format!("Digest generation failed: {:#}", e)))?;
    Ok(RawJson(response.raw))
}

/// Register a visitor and open a session for them.
#[post("/api/register", data = "<body>")]
async fn register(
    state: &State<AppState>,
    cookies: &CookieJar<'_>,
    body: Result<Json<NewRegistration>, JsonError<'_>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let registration = body
        .ok()
        .and_then(|Json(form)| form.into_registration(Utc::now()))
        .ok_or_else(|| ApiError::Validation("All fields required".into()))?;

    state
        .registrations
        .append(registration.clone())
        .await
        .map_err(|e| ApiError::Internal(format!("Registration failed: {:#}", e)))?;

    // Registering again replaces the caller's previous session
    if let Some(previous) = cookies
        .get_private(SESSION_COOKIE)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
    {
        if state.sessions.remove(previous).await {
            tracing::info!(session_id = %previous, "session replaced by new registration");
        }
    }

    let session_id = state.sessions.create(registration).await;
    cookies.add_private(Cookie::new(SESSION_COOKIE, session_id.to_string()));

    Ok(Json(json!({ "success": true })))
}

/// Registration log, for holders of the admin key only.
#[get("/api/register?<key>")]
async fn list_registrations(
    state: &State<AppState>,
    key: Option<&str>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match (state.admin_key.as_deref(), key) {
        (Some(expected), Some(given)) if expected == given => {}
        _ => return Err(ApiError::Unauthorized),
    }

    let registrations = state
        .registrations
        .list()
        .await
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;
    Ok(Json(json!({ "registrations": registrations })))
}

// Unauthorized unless the private cookie names a live session.
async fn session_id(state: &AppState, cookies: &CookieJar<'_>) -> Result<Uuid, ApiError> {
    let id = cookies
        .get_private(SESSION_COOKIE)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
        .ok_or(ApiError::Unauthorized)?;

    if !state.sessions.touch(id).await {
        return Err(ApiError::Unauthorized);
    }
    Ok(id)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshSummary {
    run_id: Uuid,
    /// False when a newer refresh superseded this one
    committed: bool,
    article_count: usize,
    topic_count: usize,
    outcomes: Vec<QueryOutcome>,
}

/// Run a full aggregation for the caller's session.
#[post("/api/session/refresh")]
async fn refresh(
    state: &State<AppState>,
    cookies: &CookieJar<'_>,
) -> Result<Json<RefreshSummary>, ApiError> {
    let id = session_id(state, cookies).await?;
    let ticket = state.sessions.begin_run(id).await?;
    let run_id = ticket.run_id;

    let run = match run_aggregation(&state.search_gateway(), &state.pacing(), ticket).await {
        Ok(run) => run,
        Err(e) => {
            state.sessions.abandon_run(id, run_id).await;
            return Err(e.into());
        }
    };

    let article_count = run.articles.len();
    let topic_count = run.clusters.len();
    let outcomes = run.outcomes.clone();
    let committed = state.sessions.commit_run(id, run).await?;

    Ok(Json(RefreshSummary {
        run_id,
        committed,
        article_count,
        topic_count,
        outcomes,
    }))
}

fn parse_view(view: Option<&str>) -> Result<View, ApiError> {
    match view.map(str::trim) {
        None | Some("") | Some("feed") => Ok(View::Feed),
        Some("saved") => Ok(View::Saved),
        Some(other) => Err(ApiError::Validation(format!("unknown view: {}", other))),
    }
}

fn parse_filter(filter: Option<&str>) -> Result<Option<SourceType>, ApiError> {
    match filter.map(str::trim) {
        None | Some("") => Ok(None),
        Some(f) if f.eq_ignore_ascii_case("all") => Ok(None),
        Some(f) => SourceType::from_str(f).map(Some).map_err(ApiError::Validation),
    }
}

#[get("/api/session/feed?<view>&<filter>&<search>&<topic>")]
async fn feed(
    state: &State<AppState>,
    cookies: &CookieJar<'_>,
    view: Option<&str>,
    filter: Option<&str>,
    search: Option<&str>,
    topic: Option<&str>,
) -> Result<Json<Vec<FeedEntry>>, ApiError> {
    let id = session_id(state, cookies).await?;
    let query = FeedQuery {
        view: parse_view(view)?,
        topic: topic.filter(|t| !t.is_empty()).map(str::to_string),
        source_type: parse_filter(filter)?,
        search: search.map(str::to_string),
    };

    let entries = state
        .sessions
        .feed(id, &query, Utc::now().date_naive())
        .await?;
    Ok(Json(entries))
}

#[get("/api/session/topics")]
async fn topics(
    state: &State<AppState>,
    cookies: &CookieJar<'_>,
) -> Result<Json<Vec<TopicSummary>>, ApiError> {
    let id = session_id(state, cookies).await?;
    Ok(Json(state.sessions.topics(id).await?))
}

#[post("/api/session/saved/<article_id>")]
async fn toggle_saved(
    state: &State<AppState>,
    cookies: &CookieJar<'_>,
    article_id: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = session_id(state, cookies).await?;
    let saved = state.sessions.toggle_saved(id, article_id).await?;
    Ok(Json(json!({ "saved": saved })))
}

#[derive(Deserialize)]
struct NoteRequest {
    note: String,
}

#[put("/api/session/notes/<article_id>", data = "<body>")]
async fn set_note(
    state: &State<AppState>,
    cookies: &CookieJar<'_>,
    article_id: &str,
    body: Result<Json<NoteRequest>, JsonError<'_>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = session_id(state, cookies).await?;
    let Json(req) = body.map_err(|_| ApiError::Validation("note is required".into()))?;
    state.sessions.set_note(id, article_id, req.note).await?;
    Ok(Json(json!({ "success": true })))
}

/// Digest as shown to the reader
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DigestView {
    text: String,
    references: Vec<Article>,
    html: String,
    plain_text: String,
}

impl From<Digest> for DigestView {
    fn from(digest: Digest) -> Self {
        Self {
            html: digest.to_html(),
            plain_text: digest.to_plain_text(),
            text: digest.text,
            references: digest.references,
        }
    }
}

#[post("/api/session/digest")]
async fn generate_digest(
    state: &State<AppState>,
    cookies: &CookieJar<'_>,
) -> Result<Json<DigestView>, ApiError> {
    let id = session_id(state, cookies).await?;
    let synthesizer = state.synthesizer();
    let articles = state.sessions.digest_input(id, synthesizer.limit()).await?;

    let digest = synthesizer.synthesize(&articles).await;
    state.sessions.store_digest(id, digest.clone()).await?;
    Ok(Json(digest.into()))
}

#[get("/api/session/digest")]
async fn latest_digest(
    state: &State<AppState>,
    cookies: &CookieJar<'_>,
) -> Result<Json<DigestView>, ApiError> {
    let id = session_id(state, cookies).await?;
    let digest = state
        .sessions
        .digest(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("No digest generated yet".into()))?;
    Ok(Json(digest.into()))
}

/// Build Rocket with managed state and mount routes, applying server.bind and server.port.
pub fn rocket(state: AppState) -> Rocket<Build> {
    let mut fig = rocket::Config::figment();
    if let Some(bind) = &state.config.server.bind {
        fig = fig.merge(("address", bind.clone()));
    }
    if let Some(port) = state.config.server.port {
        fig = fig.merge(("port", port));
    }

    rocket::custom(fig).manage(state).mount(
        "/",
        routes![
            health,
            search,
            digest,
            register,
            list_registrations,
            // Session routes
            refresh,
            feed,
            topics,
            toggle_saved,
            set_note,
            generate_digest,
            latest_digest,
        ],
    )
}

/// Periodically drop sessions that went idle without a follow-up request.
fn spawn_session_sweeper(sessions: Arc<SessionStore>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SESSION_SWEEP_INTERVAL).await;
            let expired = sessions.sweep_idle().await;
            if expired > 0 {
                let live = sessions.len().await;
                tracing::info!(expired, live, "idle sessions swept");
            }
        }
    });
}

pub async fn launch_rocket(config: Config) -> Result<()> {
    let state = AppState::from_config(config);
    spawn_session_sweeper(state.sessions.clone());

    // Launch Rocket - this will run until shutdown (SIGINT/SIGTERM etc.)
    tracing::info!("Starting Rocket HTTP server");
    rocket(state)
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
