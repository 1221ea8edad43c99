//! End-to-end tests of the HTTP API with in-process mock providers.

use std::sync::Arc;

use advisory_chat::config::Config;
use advisory_chat::embedding::EmbeddingProvider;
use advisory_chat::llm::{ChatProvider, CompletionOptions, FragmentStream};
use advisory_chat::server::{run_server_with_services, Services};
use advisory_chat::vector::{InMemoryVectorIndex, Metadata, VectorIndex, VectorRecord};
use advisory_core::models::ConversationTurn;
use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use tempfile::TempDir;

// ─── Mock providers ─────────────────────────────────────────────────

struct MockChat;

#[async_trait]
impl ChatProvider for MockChat {
    async fn complete(&self, _: &[ConversationTurn], _: &CompletionOptions) -> Result<String> {
        Ok("Strong fit for a small farm.".to_string())
    }

    async fn stream(&self, _: &[ConversationTurn], _: &CompletionOptions) -> Result<FragmentStream> {
        let parts: Vec<Result<String>> = ["Welcome! ", "What does ", "your farm grow?"]
            .iter()
            .map(|p| Ok(p.to_string()))
            .collect();
        Ok(stream::iter(parts).boxed())
    }
}

fn keyword_vector(text: &str) -> Vec<f32> {
    let t = text.to_lowercase();
    vec![
        if t.contains("crop") { 1.0 } else { 0.05 },
        if t.contains("solar") { 1.0 } else { 0.05 },
        if t.contains("patient") { 1.0 } else { 0.05 },
    ]
}

struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

async fn seeded_index() -> Arc<InMemoryVectorIndex> {
    let index = Arc::new(InMemoryVectorIndex::new());
    let mut metadata = Metadata::new();
    metadata.insert("text".into(), "Drones photograph crop rows weekly.".into());
    metadata.insert("title".into(), "Drone scouting".into());
    metadata.insert("industry".into(), "agriculture".into());
    index
        .upsert(
            "agriculture",
            vec![VectorRecord {
                id: "agri_drones_chunk_000".into(),
                values: keyword_vector("crop"),
                metadata,
            }],
        )
        .await
        .unwrap();
    index
}

// ─── Harness ────────────────────────────────────────────────────────

fn test_config(tmp: &TempDir, port: u16, rate_limit_backend: &str) -> Config {
    let config_content = format!(
        r#"
[db]
path = "{}"

[server]
bind = "127.0.0.1:{}"
api_secret = "{}"

[rate_limit]
backend = "{}"
"#,
        tmp.path().join("advisor.sqlite").display(),
        port,
        API_SECRET,
        rate_limit_backend
    );
    toml::from_str(&config_content).unwrap()
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Start a server on a free port; returns its base URL.
async fn start_server(tmp: &TempDir, rate_limit_backend: &str) -> String {
    let port = find_free_port();
    let cfg = test_config(tmp, port, rate_limit_backend);
    let services = Services {
        chat: Arc::new(MockChat),
        embedder: Arc::new(KeywordEmbedder),
        index: seeded_index().await,
    };
    tokio::spawn(async move {
        run_server_with_services(&cfg, services).await.ok();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

/// Split an event-stream body into its `data:` payloads.
fn sse_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|record| record.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

const GUID: &str = "0b6c3f2a-9d4e-4f1a-8b2c-7d5e6f708192";
const API_SECRET: &str = "test-key";

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_discovery_chat_turn_streams_and_persists() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, "memory").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/chat", base))
        .header("x-api-key", API_SECRET)
        .header("x-user-id", "farmer-1")
        .json(&json!({ "content": "Hi, I run a small wheat farm", "guid": GUID }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(resp.headers()["x-conversation-guid"], GUID);
    assert_eq!(resp.headers()["x-ratelimit-limit"], "20");

    let body = resp.text().await.unwrap();
    let payloads = sse_payloads(&body);
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));

    let records: Vec<Value> = payloads[..payloads.len() - 1]
        .iter()
        .map(|p| serde_json::from_str(p).unwrap())
        .collect();
    let answer: String = records
        .iter()
        .filter(|r| r.get("stage").is_none())
        .map(|r| r["content"].as_str().unwrap())
        .collect();
    assert_eq!(answer, "Welcome! What does your farm grow?");

    let control = records.last().unwrap();
    assert_eq!(control["stage"], "discovery");
    assert_eq!(control["content"], "");
    let follow_ups = control["followUpQuestions"].as_array().unwrap();
    assert!(!follow_ups.is_empty() && follow_ups.len() <= 3);

    let messages: Value = client
        .get(format!("{}/api/messages/{}", base, GUID))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let messages = messages["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "Welcome! What does your farm grow?");
}

#[tokio::test]
async fn test_chat_validation_errors() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, "memory").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/chat", base))
        .header("x-api-key", API_SECRET)
        .header("x-user-id", "farmer-1")
        .json(&json!({ "content": "   ", "guid": "not-a-guid" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    let paths: Vec<&str> = body["error"]["issues"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["path"].as_str().unwrap())
        .collect();
    assert!(paths.contains(&"content"));
    assert!(paths.contains(&"guid"));

    let alerts: Value = client
        .get(format!("{}/api/security/alerts", base))
        .header("x-api-key", API_SECRET)
        .header("x-user-id", "farmer-1")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alerts["metrics"]["eventsByKind"]["VALIDATION_FAIL"], 1);

    let anonymous = client
        .get(format!("{}/api/security/alerts", base))
        .header("x-user-id", "farmer-1")
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), 401);
    let body: Value = anonymous.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unauthorized");

    let wrong_key = client
        .get(format!("{}/api/security/alerts", base))
        .header("x-api-key", "guessed-key")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_key.status(), 401);
}

#[tokio::test]
async fn test_anonymous_requests_are_rate_limited() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, "sqlite").await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/retrieval/health", base);

    for i in 0..5 {
        let resp = client
            .get(&url)
            .header("x-forwarded-for", "198.51.100.7")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "request {} should pass", i + 1);
        assert_eq!(
            resp.headers()["x-ratelimit-remaining"],
            (4 - i).to_string().as_str()
        );
    }

    let denied = client
        .get(&url)
        .header("x-forwarded-for", "198.51.100.7")
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 429);
    assert!(denied.headers().contains_key("retry-after"));
    let body: Value = denied.json().await.unwrap();
    assert_eq!(body["error"], "Too many requests");
    assert!(body["retryAfter"].as_u64().unwrap() > 0);

    // Other clients and non-API routes are unaffected.
    let other = client
        .get(&url)
        .header("x-forwarded-for", "203.0.113.9")
        .send()
        .await
        .unwrap();
    assert_eq!(other.status(), 200);
    let health = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(health.status(), 200);
}

#[tokio::test]
async fn test_rotating_user_id_does_not_escape_anonymous_limit() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, "memory").await;
    let client = reqwest::Client::new();
    let profile = json!({
        "profile": {
            "industry": "agriculture",
            "size": "small",
            "digitalMaturity": "basic",
            "budget": "low",
            "technicalCapacity": "limited"
        }
    });

    let mut statuses = Vec::new();
    for i in 0..12 {
        let resp = client
            .post(format!("{}/api/recommendations", base))
            .header("x-forwarded-for", "198.51.100.20")
            .header("x-user-id", format!("anon-{}", i))
            .json(&profile)
            .send()
            .await
            .unwrap();
        if i == 0 {
            assert_eq!(resp.headers()["x-ratelimit-limit"], "5");
        }
        statuses.push(resp.status().as_u16());
    }
    assert!(statuses[..5].iter().all(|s| *s == 200), "statuses: {:?}", statuses);
    assert!(statuses[5..].iter().all(|s| *s == 429), "statuses: {:?}", statuses);

    let wrong_key = client
        .post(format!("{}/api/recommendations", base))
        .header("x-forwarded-for", "198.51.100.21")
        .header("x-api-key", "guessed-key")
        .json(&profile)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_key.status(), 200);
    assert_eq!(wrong_key.headers()["x-ratelimit-limit"], "5");

    let authenticated = client
        .post(format!("{}/api/recommendations", base))
        .header("x-forwarded-for", "198.51.100.20")
        .header("x-api-key", API_SECRET)
        .json(&profile)
        .send()
        .await
        .unwrap();
    assert_eq!(authenticated.status(), 200);
    assert_eq!(authenticated.headers()["x-ratelimit-limit"], "60");
}

#[tokio::test]
async fn test_agriculture_assessment() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, "memory").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/assessment", base))
        .header("x-api-key", API_SECRET)
        .json(&json!({
            "profile": {
                "industry": "agriculture",
                "size": "small",
                "digitalMaturity": "developing",
                "budget": "medium",
                "technicalCapacity": "limited",
                "currentPainPoints": ["water costs"],
                "businessGoals": ["reduce waste"]
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let report: Value = resp.json().await.unwrap();

    let opportunities = report["opportunities"].as_array().unwrap();
    assert!(!opportunities.is_empty() && opportunities.len() <= 5);
    let composites: Vec<f64> = opportunities
        .iter()
        .map(|o| o["score"]["composite"].as_f64().unwrap())
        .collect();
    for pair in composites.windows(2) {
        assert!(pair[0] >= pair[1]);
    }
    for op in opportunities {
        assert_eq!(op["industry"], "agriculture");
        assert_eq!(op["rationale"], "Strong fit for a small farm.");
        for axis in ["readiness", "impact", "complexity", "cost"] {
            assert!(op["score"][axis].as_u64().unwrap() <= 5);
        }
    }
    assert!(report["recommendations"].as_array().unwrap().len() <= 5);

    let bad = client
        .post(format!("{}/api/assessment", base))
        .header("x-api-key", API_SECRET)
        .json(&json!({ "profile": { "industry": "mining" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);
}

#[tokio::test]
async fn test_conversation_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, "memory").await;
    let client = reqwest::Client::new();

    let missing = client
        .get(format!("{}/api/conversation/{}", base, GUID))
        .header("x-api-key", API_SECRET)
        .header("x-user-id", "farmer-1")
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    let bad = client
        .get(format!("{}/api/conversation/not-a-guid", base))
        .header("x-api-key", API_SECRET)
        .header("x-user-id", "farmer-1")
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);

    let saved = client
        .post(format!("{}/api/conversation/{}", base, GUID))
        .header("x-api-key", API_SECRET)
        .header("x-user-id", "farmer-1")
        .json(&json!({
            "title": "Irrigation planning",
            "messages": [
                { "role": "user", "content": "How do sensors help?" },
                { "role": "assistant", "content": "They schedule watering." }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(saved.status(), 200);

    let body: Value = client
        .get(format!("{}/api/conversation/{}", base, GUID))
        .header("x-api-key", API_SECRET)
        .header("x-user-id", "farmer-1")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["conversation"]["title"], "Irrigation planning");
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_retrieval_search() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, "memory").await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/api/retrieval/search", base))
        .header("x-api-key", API_SECRET)
        .header("x-user-id", "farmer-1")
        .json(&json!({ "industry": "agriculture", "query": "crop scouting", "profile": "fast" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"], "agri_drones_chunk_000");

    let empty = client
        .post(format!("{}/api/retrieval/search", base))
        .header("x-api-key", API_SECRET)
        .header("x-user-id", "farmer-1")
        .json(&json!({ "industry": "agriculture", "query": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 400);
}
