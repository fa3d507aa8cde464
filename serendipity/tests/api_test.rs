use std::sync::Arc;

use mockito::Matcher;
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use serde_json::{json, Value};

use common::Config;
use serendipity::catalog;
use serendipity::llm::remote::AnthropicProvider;
use serendipity::llm::LlmProvider;
use serendipity::server::{self, AppState};

fn test_config() -> Config {
    let mut config = Config::default();
    config.aggregation.delay_millis = Some(0);
    config
}

fn provider_for(server: &mockito::ServerGuard) -> Option<Arc<dyn LlmProvider>> {
    let provider = AnthropicProvider::new(server.url(), "test-key", "claude-sonnet-4-20250514");
    Some(Arc::new(provider) as Arc<dyn LlmProvider>)
}

async fn client(provider: Option<Arc<dyn LlmProvider>>, admin_key: Option<&str>) -> Client {
    let state = AppState::new(test_config(), provider, admin_key.map(str::to_string));
    Client::tracked(server::rocket(state))
        .await
        .expect("valid rocket instance")
}

async fn json_body(response: rocket::local::asynchronous::LocalResponse<'_>) -> Value {
    let body = response.into_string().await.expect("response body");
    serde_json::from_str(&body).expect("json body")
}

async fn register(client: &Client) {
    let response = client
        .post("/api/register")
        .header(ContentType::JSON)
        .body(r#"{"name":"Jane","email":"jane@vet.com","org":"Clinic"}"#)
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
}

fn search_reply() -> String {
    let stubs = json!([
        {
            "title": "AI radiology study",
            "url": "https://pubmed.ncbi.nlm.nih.gov/1",
            "source": "PubMed",
            "date": "Recent",
            "snippet": "imaging results"
        },
        {
            "title": "Dairy herd sensors",
            "url": "https://farm.news/2",
            "source": "Farm News",
            "snippet": "cattle monitoring"
        },
        { "title": "", "url": "https://dropped.example" }
    ]);
    json!({
        "content": [
            { "type": "text", "text": format!("Found these: {} done", stubs) }
        ]
    })
    .to_string()
}

#[tokio::test]
async fn health_is_ok() {
    let client = client(None, None).await;
    let response = client.get("/health").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.into_string().await.unwrap(), "OK");
}

#[tokio::test]
async fn search_rejects_bad_index_before_credentials() {
    let client = client(None, None).await;

    for uri in ["/api/search?q=6", "/api/search?q=abc", "/api/search?q=-1"] {
        let response = client.get(uri).dispatch().await;
        assert_eq!(response.status(), Status::BadRequest, "{}", uri);
        assert_eq!(json_body(response).await["error"], "Invalid query index");
    }

    let response = client.get("/api/search").dispatch().await;
    assert_eq!(response.status(), Status::InternalServerError);
    assert_eq!(json_body(response).await["error"], "API key not configured");
}

#[tokio::test]
async fn search_passes_upstream_body_through() {
    let mut upstream = mockito::Server::new_async().await;
    let reply = search_reply();
    let mock = upstream
        .mock("POST", "/")
        .match_header("x-api-key", "test-key")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({
                "tools": [{ "type": "web_search_20250305", "name": "web_search" }]
            })),
            Matcher::Regex(regex::escape(catalog::SEARCH_QUERIES[2])),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(&reply)
        .create_async()
        .await;

    let client = client(provider_for(&upstream), None).await;
    let response = client.get("/api/search?q=2").dispatch().await;

    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.content_type(), Some(ContentType::JSON));
    assert_eq!(response.into_string().await.unwrap(), reply);
    mock.assert_async().await;
}

#[tokio::test]
async fn upstream_failure_is_bad_gateway() {
    let mut upstream = mockito::Server::new_async().await;
    let _mock = upstream
        .mock("POST", "/")
        .with_status(500)
        .with_body("overloaded")
        .create_async()
        .await;

    let client = client(provider_for(&upstream), None).await;
    let response = client.get("/api/search?q=0").dispatch().await;

    assert_eq!(response.status(), Status::BadGateway);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().starts_with("Search failed"));
}

#[tokio::test]
async fn digest_proxy_validates_then_passes_through() {
    let no_key = client(None, None).await;
    let response = no_key
        .post("/api/digest")
        .header(ContentType::JSON)
        .body("{}")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::InternalServerError);

    let mut upstream = mockito::Server::new_async().await;
    let reply = r#"{"content":[{"type":"text","text":"Imaging leads [1]."}]}"#;
    let mock = upstream
        .mock("POST", "/")
        .match_body(Matcher::Regex("Here are 1 recent articles".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(reply)
        .expect(1)
        .create_async()
        .await;
    let client = client(provider_for(&upstream), None).await;

    for body in ["{}", r#"{"articles":[]}"#, r#"{"articles":"nope"}"#, "not json"] {
        let response = client
            .post("/api/digest")
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest, "{}", body);
        assert_eq!(json_body(response).await["error"], "No articles provided");
    }

    let response = client
        .post("/api/digest")
        .header(ContentType::JSON)
        .body(r#"{"articles":[{"title":"A","url":"https://a","source":"S","snippet":""}]}"#)
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.into_string().await.unwrap(), reply);
    mock.assert_async().await;
}

#[tokio::test]
async fn registration_requires_every_field() {
    let client = client(None, Some("secret")).await;

    for body in [
        r#"{"name":"Jane","email":"jane@vet.com"}"#,
        r#"{"name":"  ","email":"jane@vet.com","org":"Clinic"}"#,
        "garbage",
    ] {
        let response = client
            .post("/api/register")
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        assert_eq!(json_body(response).await["error"], "All fields required");
    }
}

#[tokio::test]
async fn registration_log_needs_admin_key() {
    let client = client(None, Some("secret")).await;
    register(&client).await;

    for uri in ["/api/register", "/api/register?key=wrong"] {
        let response = client.get(uri).dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
        assert_eq!(json_body(response).await["error"], "Unauthorized");
    }

    let response = client.get("/api/register?key=secret").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let body = json_body(response).await;
    let registrations = body["registrations"].as_array().unwrap();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0]["name"], "Jane");
    assert_eq!(registrations[0]["org"], "Clinic");
    assert!(registrations[0]["timestamp"].is_string());
}

#[tokio::test]
async fn registration_log_is_locked_without_configured_key() {
    let client = client(None, None).await;
    register(&client).await;

    let response = client.get("/api/register").dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);
}

#[tokio::test]
async fn session_routes_require_registration() {
    let client = client(None, None).await;
    for uri in ["/api/session/topics", "/api/session/feed", "/api/session/digest"] {
        let response = client.get(uri).dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized, "{}", uri);
    }
    let response = client.post("/api/session/refresh").dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);
}

#[tokio::test]
async fn registering_again_replaces_the_session() {
    let state = AppState::new(test_config(), None, None);
    let sessions = state.sessions.clone();
    let client = Client::tracked(server::rocket(state))
        .await
        .expect("valid rocket instance");

    register(&client).await;
    register(&client).await;
    assert_eq!(sessions.len().await, 1);

    // The cookie now names the replacement session
    let response = client.get("/api/session/feed").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
}

#[tokio::test]
async fn refresh_without_key_is_configuration_error() {
    let client = client(None, None).await;
    register(&client).await;

    let response = client.post("/api/session/refresh").dispatch().await;
    assert_eq!(response.status(), Status::InternalServerError);
    assert_eq!(json_body(response).await["error"], "API key not configured");
}

#[tokio::test]
async fn session_flow_from_refresh_to_digest() {
    let mut upstream = mockito::Server::new_async().await;
    let search_mock = upstream
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({
            "tools": [{ "type": "web_search_20250305", "name": "web_search" }]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(search_reply())
        .expect(catalog::len())
        .create_async()
        .await;
    let digest_mock = upstream
        .mock("POST", "/")
        .match_body(Matcher::Regex("weekly intelligence briefing".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"content":[{"type":"text","text":"Imaging leads [1].\n\nHerds follow [2]."}]}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let client = client(provider_for(&upstream), None).await;
    register(&client).await;

    // Refresh: every catalog query returns the same two stubs
    let response = client.post("/api/session/refresh").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let summary = json_body(response).await;
    assert_eq!(summary["committed"], true);
    assert_eq!(summary["articleCount"], 2);
    let outcomes = summary["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), catalog::len());
    assert!(outcomes.iter().all(|o| o["status"] == "ok"));
    search_mock.assert_async().await;

    // Feed
    let response = client.get("/api/session/feed").dispatch().await;
    let feed = json_body(response).await;
    let feed = feed.as_array().unwrap();
    assert_eq!(feed.len(), 2);
    assert_eq!(feed[0]["id"], "a-0");
    assert_eq!(feed[0]["sourceType"], "research");
    assert_eq!(feed[0]["displayDate"], "Recent");
    assert_eq!(feed[0]["saved"], false);

    let response = client
        .get("/api/session/feed?filter=research&search=RADIOLOGY")
        .dispatch()
        .await;
    assert_eq!(json_body(response).await.as_array().unwrap().len(), 1);

    let response = client.get("/api/session/feed?filter=blog").dispatch().await;
    assert_eq!(response.status(), Status::BadRequest);

    // Topics
    let response = client.get("/api/session/topics").dispatch().await;
    let topics = json_body(response).await;
    let topics = topics.as_array().unwrap();
    assert!(topics.iter().any(|t| t["topic"] == "Livestock & Production" && t["count"] == 1));

    let response = client
        .get("/api/session/feed?topic=Diagnostic%20Imaging")
        .dispatch()
        .await;
    let imaging = json_body(response).await;
    assert_eq!(imaging.as_array().unwrap().len(), 1);
    assert_eq!(imaging[0]["id"], "a-0");

    // Bookmarks and notes
    let response = client.post("/api/session/saved/a-1").dispatch().await;
    assert_eq!(json_body(response).await["saved"], true);
    let response = client.post("/api/session/saved/a-42").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);

    let response = client
        .put("/api/session/notes/a-1")
        .header(ContentType::JSON)
        .body(r#"{"note":"share with herd team"}"#)
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let response = client.get("/api/session/feed?view=saved").dispatch().await;
    let saved = json_body(response).await;
    assert_eq!(saved.as_array().unwrap().len(), 1);
    assert_eq!(saved[0]["id"], "a-1");
    assert_eq!(saved[0]["saved"], true);
    assert_eq!(saved[0]["note"], "share with herd team");

    // Digest
    let response = client.get("/api/session/digest").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);

    let response = client.post("/api/session/digest").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let digest = json_body(response).await;
    assert_eq!(digest["references"].as_array().unwrap().len(), 2);
    let html = digest["html"].as_str().unwrap();
    assert!(html.starts_with("<p>Imaging leads <a href=\"https://pubmed.ncbi.nlm.nih.gov/1\""));
    assert!(html.contains("<p>Herds follow <a href=\"https://farm.news/2\""));
    let plain = digest["plainText"].as_str().unwrap();
    assert!(plain.ends_with(concat!(
        "---\nReferences:\n",
        "[1] AI radiology study - https://pubmed.ncbi.nlm.nih.gov/1\n",
        "[2] Dairy herd sensors - https://farm.news/2",
    )));
    digest_mock.assert_async().await;

    let response = client.get("/api/session/digest").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(json_body(response).await["text"], "Imaging leads [1].\n\nHerds follow [2].");
}
