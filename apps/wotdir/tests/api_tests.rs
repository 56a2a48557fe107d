//! Integration tests for the wotdir HTTP API.
//!
//! Uses axum-test to drive the router without binding a socket.

// Holding the env MutexGuard across await is deliberate: tests touching
// WOTDIR_* variables are serialized.
#![allow(clippy::unwrap_used, clippy::panic, clippy::await_holding_lock)]

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum_test::{TestResponse, TestServer};
use serde_json::{Value, json};
use std::sync::Mutex;
use wotdir::api::{
    AppState, ErrorDetails, HealthResponse, LD_JSON, MERGE_PATCH_JSON, PROBLEM_JSON, TD_JSON,
    create_router,
};
use wotdir::config::AppConfig;
use wotdir_core::{Directory, DirectoryConfig, MemoryStore, StorageBackend};

/// Serializes tests since the router reads WOTDIR_* env vars.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

struct TestGuard {
    _guard: std::sync::MutexGuard<'static, ()>,
}

fn lock_env() -> TestGuard {
    let guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: Tests run sequentially under ENV_MUTEX, so no concurrent env access.
    unsafe { std::env::remove_var("WOTDIR_RATE_LIMIT") };
    TestGuard { _guard: guard }
}

fn build_server() -> TestServer {
    let config = AppConfig {
        directory: DirectoryConfig {
            replay_delay_ms: 0,
            ..DirectoryConfig::default()
        },
        ..AppConfig::default()
    };
    let directory = Directory::new(
        StorageBackend::InMemory(MemoryStore::new()),
        config.directory.clone(),
    );
    TestServer::new(create_router(AppState::new(directory, &config))).unwrap()
}

/// A fresh server over an empty in-memory store.
fn create_test_server() -> (TestServer, TestGuard) {
    let guard = lock_env();
    (build_server(), guard)
}

fn thing(title: &str) -> Value {
    json!({
        "@context": "https://www.w3.org/2022/wot/td/v1.1",
        "title": title,
        "securityDefinitions": {"nosec_sc": {"scheme": "nosec"}},
        "security": ["nosec_sc"],
        "properties": {
            "on": {"type": "boolean", "forms": [{"href": "https://lamp.example.com/on"}]}
        }
    })
}

fn thing_with_id(id: &str, title: &str) -> Value {
    let mut doc = thing(title);
    doc["id"] = Value::String(id.to_string());
    doc
}

fn body(value: &Value) -> Bytes {
    Bytes::from(serde_json::to_vec(value).unwrap())
}

fn header_str<'a>(response: &'a TestResponse, name: header::HeaderName) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

async fn put_thing(server: &TestServer, id: &str, title: &str) -> TestResponse {
    server
        .put(&format!("/things/{id}"))
        .bytes(body(&thing_with_id(id, title)))
        .content_type(TD_JSON)
        .await
}

// =============================================================================
// HEALTH ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_health_reports_version_and_count() {
    let (server, _guard) = create_test_server();
    put_thing(&server, "urn:dev:lamp", "Lamp").await;

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(health.things, 1);
}

#[tokio::test]
async fn test_health_is_get_only() {
    let (server, _guard) = create_test_server();
    let response = server.post("/health").await;
    assert_eq!(response.status_code(), StatusCode::METHOD_NOT_ALLOWED);
}

// =============================================================================
// ANONYMOUS REGISTRATION
// =============================================================================

#[tokio::test]
async fn test_post_assigns_id_and_location() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/things")
        .bytes(body(&thing("Lamp")))
        .content_type(TD_JSON)
        .await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    let location = header_str(&response, header::LOCATION).unwrap().to_string();
    assert!(location.starts_with("/things/urn:uuid:"), "{location}");

    let stored = server.get(&location).await;
    stored.assert_status_ok();
    assert_eq!(header_str(&stored, header::CONTENT_TYPE), Some(TD_JSON));
    let doc: Value = stored.json();
    assert_eq!(Some(doc["id"].as_str().unwrap()), location.strip_prefix("/things/"));
    assert_eq!(doc["title"], "Lamp");
    assert!(doc["registration"]["created"].is_string());
}

#[tokio::test]
async fn test_post_with_id_is_rejected() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/things")
        .json(&thing_with_id("urn:dev:lamp", "Lamp"))
        .await;

    response.assert_status_bad_request();
    assert_eq!(header_str(&response, header::CONTENT_TYPE), Some(PROBLEM_JSON));
    let details: ErrorDetails = response.json();
    assert_eq!(details.status, 400);
    assert!(details.validation_errors.is_none());

    let health: HealthResponse = server.get("/health").await.json();
    assert_eq!(health.things, 0);
}

#[tokio::test]
async fn test_post_unsupported_content_type() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/things")
        .bytes(body(&thing("Lamp")))
        .content_type("text/plain")
        .await;

    assert_eq!(response.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let details: ErrorDetails = response.json();
    assert_eq!(details.status, 415);
}

#[tokio::test]
async fn test_post_accepts_ld_json() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/things")
        .bytes(body(&thing("Lamp")))
        .content_type(LD_JSON)
        .await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_invalid_json_body() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/things")
        .bytes(Bytes::from("not valid json"))
        .content_type("application/json")
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_validation_failure_lists_violations() {
    let (server, _guard) = create_test_server();

    let mut doc = thing_with_id("urn:dev:lamp", "Lamp");
    let map = doc.as_object_mut().unwrap();
    map.shift_remove("@context");
    map.insert("@version".to_string(), json!("1.1"));

    let response = server
        .put("/things/urn:dev:lamp")
        .bytes(body(&doc))
        .content_type(TD_JSON)
        .await;

    response.assert_status_bad_request();
    let details: ErrorDetails = response.json();
    assert_eq!(details.title, "Validation Exception");
    let violations = details.validation_errors.unwrap();
    assert!(!violations.is_empty());
    assert!(violations.iter().all(|v| {
        v.category == "Syntactic Validation" || v.category == "Semantic Validation"
    }));

    server.get("/things/urn:dev:lamp").await.assert_status_not_found();
}

// =============================================================================
// RETRIEVAL
// =============================================================================

#[tokio::test]
async fn test_get_unknown_thing_is_404() {
    let (server, _guard) = create_test_server();

    let response = server.get("/things/urn:dev:missing").await;

    response.assert_status_not_found();
    let details: ErrorDetails = response.json();
    assert_eq!(details.detail, "Thing with id: urn:dev:missing does not exist.");
}

#[tokio::test]
async fn test_head_reports_existence() {
    let (server, _guard) = create_test_server();
    put_thing(&server, "urn:dev:lamp", "Lamp").await;

    let present = server.method(Method::HEAD, "/things/urn:dev:lamp").await;
    present.assert_status_ok();
    assert!(present.as_bytes().is_empty());

    let missing = server.method(Method::HEAD, "/things/urn:dev:other").await;
    missing.assert_status_not_found();
}

// =============================================================================
// UPSERT
// =============================================================================

#[tokio::test]
async fn test_put_creates_then_replaces() {
    let (server, _guard) = create_test_server();

    let created = put_thing(&server, "urn:dev:lamp", "Lamp").await;
    assert_eq!(created.status_code(), StatusCode::CREATED);
    assert_eq!(
        header_str(&created, header::LOCATION),
        Some("/things/urn:dev:lamp")
    );
    let first: Value = server.get("/things/urn:dev:lamp").await.json();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let replaced = put_thing(&server, "urn:dev:lamp", "Desk Lamp").await;
    assert_eq!(replaced.status_code(), StatusCode::NO_CONTENT);

    let second: Value = server.get("/things/urn:dev:lamp").await.json();
    assert_eq!(second["title"], "Desk Lamp");
    assert_eq!(
        second["registration"]["created"],
        first["registration"]["created"]
    );
    assert_ne!(
        second["registration"]["modified"],
        first["registration"]["modified"]
    );
}

#[tokio::test]
async fn test_put_without_id_takes_path_id() {
    let (server, _guard) = create_test_server();

    let response = server
        .put("/things/urn:dev:fan")
        .bytes(body(&thing("Fan")))
        .content_type(TD_JSON)
        .await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    let doc: Value = server.get("/things/urn:dev:fan").await.json();
    assert_eq!(doc["id"], "urn:dev:fan");
}

#[tokio::test]
async fn test_put_with_mismatched_id_is_rejected() {
    let (server, _guard) = create_test_server();

    let response = server
        .put("/things/urn:dev:fan")
        .bytes(body(&thing_with_id("urn:dev:lamp", "Lamp")))
        .content_type(TD_JSON)
        .await;

    response.assert_status_bad_request();
    server.get("/things/urn:dev:fan").await.assert_status_not_found();
    server.get("/things/urn:dev:lamp").await.assert_status_not_found();
}

// =============================================================================
// PATCH
// =============================================================================

#[tokio::test]
async fn test_patch_merges_and_removes_fields() {
    let (server, _guard) = create_test_server();
    put_thing(&server, "urn:dev:lamp", "Lamp").await;

    let response = server
        .patch("/things/urn:dev:lamp")
        .bytes(body(&json!({"title": "Porch Lamp", "description": "outside"})))
        .content_type(MERGE_PATCH_JSON)
        .await;
    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);

    let doc: Value = server.get("/things/urn:dev:lamp").await.json();
    assert_eq!(doc["title"], "Porch Lamp");
    assert_eq!(doc["description"], "outside");
    assert!(doc["properties"]["on"].is_object());

    let response = server
        .patch("/things/urn:dev:lamp")
        .bytes(body(&json!({"description": null})))
        .content_type(MERGE_PATCH_JSON)
        .await;
    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);

    let doc: Value = server.get("/things/urn:dev:lamp").await.json();
    assert!(doc.get("description").is_none());
    assert_eq!(doc["title"], "Porch Lamp");
}

#[tokio::test]
async fn test_patch_unknown_thing_is_404() {
    let (server, _guard) = create_test_server();

    let response = server
        .patch("/things/urn:dev:ghost")
        .bytes(body(&json!({"title": "Ghost"})))
        .content_type(MERGE_PATCH_JSON)
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn test_patch_rejects_ld_json() {
    let (server, _guard) = create_test_server();
    put_thing(&server, "urn:dev:lamp", "Lamp").await;

    let response = server
        .patch("/things/urn:dev:lamp")
        .bytes(body(&json!({"title": "x"})))
        .content_type(LD_JSON)
        .await;

    assert_eq!(response.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

// =============================================================================
// DELETE
// =============================================================================

#[tokio::test]
async fn test_delete_then_404() {
    let (server, _guard) = create_test_server();
    put_thing(&server, "urn:dev:lamp", "Lamp").await;

    let response = server.delete("/things/urn:dev:lamp").await;
    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);

    server.get("/things/urn:dev:lamp").await.assert_status_not_found();
    server
        .delete("/things/urn:dev:lamp")
        .await
        .assert_status_not_found();

    // The id is free again.
    let again = put_thing(&server, "urn:dev:lamp", "Lamp").await;
    assert_eq!(again.status_code(), StatusCode::CREATED);
}

// =============================================================================
// LISTING
// =============================================================================

async fn populated_server() -> (TestServer, TestGuard) {
    let (server, guard) = create_test_server();
    for (id, title) in [("urn:dev:c", "C"), ("urn:dev:a", "A"), ("urn:dev:b", "B")] {
        put_thing(&server, id, title).await;
    }
    (server, guard)
}

#[tokio::test]
async fn test_list_pages_in_id_order() {
    let (server, _guard) = populated_server().await;

    let first = server.get("/things?limit=2").await;
    first.assert_status_ok();
    let page: Vec<Value> = first.json();
    let ids: Vec<&str> = page.iter().map(|d| d["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["urn:dev:a", "urn:dev:b"]);
    assert_eq!(
        header_str(&first, header::LINK),
        Some("</things?offset=2&limit=2>; rel=\"next\"")
    );

    let last = server.get("/things?offset=2&limit=2").await;
    let page: Vec<Value> = last.json();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["id"], "urn:dev:c");
    assert!(last.headers().get(header::LINK).is_none());
}

#[tokio::test]
async fn test_list_collection_format() {
    let (server, _guard) = populated_server().await;

    let response = server.get("/things?format=collection&limit=2").await;

    response.assert_status_ok();
    let collection: Value = response.json();
    assert_eq!(collection["@type"], "ThingCollection");
    assert_eq!(collection["total"], 3);
    assert_eq!(
        collection["@id"],
        "/things?offset=0&limit=2&format=collection"
    );
    assert_eq!(
        collection["next"],
        "/things?offset=2&limit=2&format=collection"
    );
    assert_eq!(collection["members"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_list_default_page_holds_everything() {
    let (server, _guard) = populated_server().await;

    let response = server.get("/things").await;

    let page: Vec<Value> = response.json();
    assert_eq!(page.len(), 3);
    assert!(response.headers().get(header::LINK).is_none());
}

// =============================================================================
// EVENTS
// =============================================================================

#[tokio::test]
async fn test_events_diff_not_implemented() {
    let (server, _guard) = create_test_server();

    let response = server.get("/events/thing_updated?diff=true").await;

    assert_eq!(response.status_code(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_events_unknown_category_is_rejected() {
    let (server, _guard) = create_test_server();

    let response = server.get("/events/thing_exploded").await;

    response.assert_status_bad_request();
}

// =============================================================================
// ROUTING
// =============================================================================

#[tokio::test]
async fn test_root_redirects_to_things() {
    let (server, _guard) = create_test_server();

    for method in [Method::GET, Method::POST, Method::DELETE] {
        let response = server.method(method, "/").await;
        assert_eq!(response.status_code(), StatusCode::FOUND);
        assert_eq!(header_str(&response, header::LOCATION), Some("/things"));
    }
}

#[tokio::test]
async fn test_trailing_slash_listing_and_registration() {
    let (server, _guard) = create_test_server();

    let created = server
        .post("/things/")
        .bytes(body(&thing("Lamp")))
        .content_type(TD_JSON)
        .await;
    created.assert_status(StatusCode::CREATED);

    let listed = server.get("/things/").await;
    listed.assert_status_ok();
    assert_eq!(listed.json::<Value>().as_array().map(Vec::len), Some(1));

    let head = server.method(Method::HEAD, "/things/").await;
    head.assert_status_ok();
}
