//! In-process tracker for tests
//!
//! Serves `/manifest/:name` and `/info/:digest` the way the fleet tracker
//! does, accepting manifests only for a fixed set of known repositories.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::sync::RwLock;

/// Repositories the test tracker treats as existing upstream
pub const KNOWN_REPOSITORIES: &[&str] = &["successrepo", "library/redis"];

/// Repository whose lookups fail with a server error
pub const BROKEN_REPOSITORY: &str = "brokenrepo";

/// Body of the server error
pub const TRACKER_FAILURE_BODY: &str = "registry backend unavailable";

/// Records are kept as raw JSON so tests can plant malformed ones
#[derive(Default)]
struct TrackerState {
    manifests: RwLock<HashMap<String, serde_json::Value>>,
    infos: RwLock<HashMap<String, Vec<u8>>>,
}

type SharedState = Arc<TrackerState>;

fn not_found(name: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("{} not found", name)).into_response()
}

/// GET /manifest/:name
async fn handle_get_manifest(State(state): State<SharedState>, Path(name): Path<String>) -> Response {
    if name.starts_with(&format!("{}:", BROKEN_REPOSITORY)) {
        return (StatusCode::INTERNAL_SERVER_ERROR, TRACKER_FAILURE_BODY).into_response();
    }
    match state.manifests.read().await.get(&name) {
        Some(record) => Json(record.clone()).into_response(),
        None => not_found(&name),
    }
}

/// POST /manifest/:name
async fn handle_post_manifest(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Json(record): Json<serde_json::Value>,
) -> Response {
    let repository = name.rsplit_once(':').map(|(repo, _)| repo).unwrap_or(&name);
    if !KNOWN_REPOSITORIES.contains(&repository) {
        return not_found(&name);
    }
    state.manifests.write().await.insert(name, record);
    StatusCode::OK.into_response()
}

/// GET /info/:digest
async fn handle_get_info(State(state): State<SharedState>, Path(digest): Path<String>) -> Response {
    match state.infos.read().await.get(&digest) {
        Some(body) => body.clone().into_response(),
        None => not_found(&digest),
    }
}

/// POST /info/:digest
async fn handle_post_info(State(state): State<SharedState>, Path(digest): Path<String>, body: Bytes) -> Response {
    state.infos.write().await.insert(digest, body.to_vec());
    StatusCode::OK.into_response()
}

/// Store `body` under `name` without any validation
pub async fn post_raw_manifest(base_url: &str, name: &str, body: &str) {
    let url = format!("{}/manifest/{}", base_url, urlencoding::encode(name));
    let status = reqwest::Client::new()
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .send()
        .await
        .unwrap()
        .status();
    assert!(status.is_success(), "tracker refused {}: {}", name, status);
}

/// Start a tracker on an ephemeral local port and return its base URL
pub async fn spawn_tracker() -> String {
    let app = Router::new()
        .route("/manifest/:name", get(handle_get_manifest).post(handle_post_manifest))
        .route("/info/:digest", get(handle_get_info).post(handle_post_info))
        .with_state(SharedState::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
