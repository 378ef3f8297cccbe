//! Integration tests for the HTTP service.
//!
//! Each test serves the router on an ephemeral port and talks to it over
//! real HTTP.
#![cfg(feature = "server")]

mod common;

use base64::Engine;
use common::{a_over_b, png_bytes};
use handtex::server::{serve, AppState};
use handtex::ConversionConfig;
use serde_json::{json, Value};
use std::time::Duration;

struct TestServer {
    base: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start(ttl: Option<Duration>) -> Self {
        Self::start_with(ConversionConfig::default(), ttl).await
    }

    async fn start_with(config: ConversionConfig, ttl: Option<Duration>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AppState::new(config, ttl, ttl);
        let handle = tokio::spawn(async move {
            serve(listener, state).await.unwrap();
        });
        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap();
        read(response).await
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let response = self
            .client
            .post(format!("{}{path}", self.base))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        read(response).await
    }

    async fn convert(&self, png: &[u8]) -> (u16, Value) {
        let body = json!({
            "image_base64": base64::engine::general_purpose::STANDARD.encode(png),
            "mime_type": "image/png",
        });
        self.post("/conversions", body).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read(response: reqwest::Response) -> (u16, Value) {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap();
    let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
    (status, value)
}

/// Id of the first leaf drawing `name` in a serialised tree.
fn leaf_id(node: &Value, name: &str) -> Option<u64> {
    if node["type"] == "leaf" && node["symbol"] == name {
        return node["id"].as_u64();
    }
    match node {
        Value::Object(map) => map.values().find_map(|v| leaf_id(v, name)),
        Value::Array(items) => items.iter().find_map(|v| leaf_id(v, name)),
        _ => None,
    }
}

#[tokio::test]
async fn health_reports_version() {
    let server = TestServer::start(None).await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn conversion_is_stored_and_fetchable() {
    let server = TestServer::start(None).await;
    let (status, created) = server.convert(&png_bytes(&a_over_b())).await;
    assert_eq!(status, 201, "{created}");
    assert_eq!(created["latex"], "\\frac{a}{b}");

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = server.get(&format!("/conversions/{id}")).await;
    assert_eq!(status, 200);
    assert_eq!(fetched["latex"], created["latex"]);
}

#[tokio::test]
async fn request_config_overrides_detection() {
    let server = TestServer::start(None).await;
    let body = json!({
        "image_base64": base64::engine::general_purpose::STANDARD.encode(png_bytes(&a_over_b())),
        "mime_type": "image/png",
        "config": { "confidence_threshold": 1.0 },
    });
    let (status, created) = server.post("/conversions", body).await;
    assert_eq!(status, 201);
    assert_eq!(created["latex"], "");
}

#[tokio::test]
async fn bad_uploads_map_to_client_errors() {
    let server = TestServer::start(None).await;

    let (status, body) = server
        .post("/conversions", json!({ "image_base64": "R0lGODlh", "mime_type": "image/gif" }))
        .await;
    assert_eq!(status, 415);
    assert_eq!(body["error"], "unsupported_format");
    assert_eq!(body["retryable"], false);

    let (status, body) = server
        .post("/conversions", json!({ "image_base64": "!!!", "mime_type": "image/png" }))
        .await;
    assert_eq!(status, 422);
    assert_eq!(body["error"], "decode_error");

    let (status, _) = server
        .get("/conversions/00000000-0000-0000-0000-000000000000")
        .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn oversized_bodies_are_image_too_large() {
    let config = ConversionConfig::builder().max_bytes(1024).build().unwrap();
    let server = TestServer::start_with(config, None).await;
    let body = json!({ "image_base64": "A".repeat(100_000), "mime_type": "image/png" });
    let (status, body) = server.post("/conversions", body).await;
    assert_eq!(status, 413, "{body}");
    assert_eq!(body["error"], "image_too_large");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn malformed_edit_payloads_are_invalid_edits() {
    let server = TestServer::start(None).await;
    let (_, created) = server.convert(&png_bytes(&a_over_b())).await;
    let conversion = created["id"].as_str().unwrap();
    let (_, session) = server
        .post(&format!("/conversions/{conversion}/sessions"), json!({}))
        .await;
    let edits = format!("/sessions/{}/edits", session["id"].as_str().unwrap());

    for payload in [
        json!({ "edits": [{ "node_id": 1, "kind": "teleport" }] }),
        json!({ "edits": [{ "kind": "delete" }] }),
        json!({ "edits": [{ "node_id": 1, "kind": "replace-symbol" }] }),
        json!({ "changes": [] }),
    ] {
        let (status, body) = server.post(&edits, payload.clone()).await;
        assert_eq!(status, 422, "{payload}: {body}");
        assert_eq!(body["error"], "invalid_edit", "{payload}");
    }

    let (_, current) = server
        .get(&format!("/sessions/{}", session["id"].as_str().unwrap()))
        .await;
    assert_eq!(current["snapshot"]["version"], 0);
    assert_eq!(current["snapshot"]["latex"], "\\frac{a}{b}");
}

#[tokio::test]
async fn session_edit_undo_commit() {
    let server = TestServer::start(None).await;
    let (_, created) = server.convert(&png_bytes(&a_over_b())).await;
    let conversion = created["id"].as_str().unwrap();
    let a = leaf_id(&created["tree"], "a").unwrap();

    let (status, session) = server
        .post(&format!("/conversions/{conversion}/sessions"), json!({}))
        .await;
    assert_eq!(status, 201);
    assert_eq!(session["state"], "open");
    let session_id = session["id"].as_str().unwrap().to_string();
    let path = |suffix: &str| format!("/sessions/{session_id}{suffix}");

    let (status, edited) = server
        .post(
            &path("/edits"),
            json!({ "edits": [{ "node_id": a, "kind": "replace-symbol", "symbol": "c" }] }),
        )
        .await;
    assert_eq!(status, 200, "{edited}");
    assert_eq!(edited["snapshot"]["latex"], "\\frac{c}{b}");

    let (status, rejected) = server
        .post(
            &path("/edits"),
            json!({ "edits": [
                { "node_id": a, "kind": "replace-symbol", "symbol": "d" },
                { "node_id": 9999, "kind": "delete" }
            ] }),
        )
        .await;
    assert_eq!(status, 422);
    assert_eq!(rejected["error"], "invalid_edit");
    let (_, current) = server.get(&path("")).await;
    assert_eq!(current["snapshot"]["latex"], "\\frac{c}{b}");

    let (status, undone) = server.post(&path("/undo"), json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(undone["snapshot"]["latex"], "\\frac{a}{b}");

    let (status, committed) = server.post(&path("/commit"), json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(committed["latex"], "\\frac{a}{b}");

    let (status, closed) = server
        .post(
            &path("/edits"),
            json!({ "edits": [{ "node_id": a, "kind": "confirm" }] }),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(closed["error"], "session_closed");
    let (_, after) = server.get(&path("")).await;
    assert_eq!(after["state"], "committed");
    assert_eq!(after["snapshot"]["latex"], "\\frac{a}{b}");
}

#[tokio::test]
async fn expired_entries_are_not_found() {
    let server = TestServer::start(Some(Duration::from_millis(200))).await;
    let (_, created) = server.convert(&png_bytes(&a_over_b())).await;
    let id = created["id"].as_str().unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    let (status, body) = server.get(&format!("/conversions/{id}")).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "not_found");

    let (status, _) = server
        .post(&format!("/conversions/{id}/sessions"), json!({}))
        .await;
    assert_eq!(status, 404);
}
