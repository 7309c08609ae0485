//! The HTTP feed client against a local axum server.

mod support;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use pinning_engine::config::FeedSettings;
use pinning_engine::feed::{FeedError, HttpViewFeed, ViewFeed};
use support::at;

#[derive(Clone, Default)]
struct FeedServer {
    status: Arc<Mutex<Option<StatusCode>>>,
    body: Arc<Mutex<String>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

async fn find_views(
    State(server): State<FeedServer>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    server.queries.lock().push(query);
    let status = (*server.status.lock()).unwrap_or(StatusCode::OK);
    (status, server.body.lock().clone())
}

async fn spawn(server: FeedServer) -> String {
    let app = Router::new()
        .route("/preferences/search/findViews", get(find_views))
        .with_state(server);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn settings(base_url: String) -> FeedSettings {
    FeedSettings {
        base_url,
        timeout_secs: Some(5),
        ..FeedSettings::default()
    }
}

const PAGE: &str = r#"{
  "_embedded": {
    "preferences": [
      {
        "id": 11,
        "disabled": false,
        "preference": "{\"layers\":[{\"id\":\"fes\"}],\"time\":{\"mode\":\"absolute\",\"value\":\"2025-03-20T15:00:00Z\"}}",
        "lastUpdate": "2025-03-20T18:00:00Z"
      },
      {
        "id": 12,
        "disabled": true,
        "preference": "{\"layers\":[],\"time\":{\"mode\":\"relative\",\"value\":\"2025-03-20T16:00:00Z\"}}",
        "lastUpdate": "2025-03-20T18:05:00Z"
      }
    ]
  },
  "page": { "size": 20, "totalElements": 2 }
}"#;

#[tokio::test]
async fn test_fetch_decodes_envelope() {
    let server = FeedServer::default();
    *server.body.lock() = PAGE.to_string();
    let feed = HttpViewFeed::new(&settings(spawn(server.clone()).await)).unwrap();

    let views = feed.fetch_views(None).await.unwrap();

    assert_eq!(views.len(), 2);
    assert_eq!(views[0].id, 11);
    assert!(!views[0].disabled);
    assert_eq!(views[0].last_update, Some(at(18, 0, 0)));
    assert!(views[1].disabled);
    assert!(server.queries.lock()[0].is_empty());
}

#[tokio::test]
async fn test_fetch_sends_watermark() {
    let server = FeedServer::default();
    *server.body.lock() = "{}".to_string();
    let feed = HttpViewFeed::new(&settings(spawn(server.clone()).await)).unwrap();

    let views = feed.fetch_views(Some(at(18, 0, 0))).await.unwrap();

    assert!(views.is_empty());
    let queries = server.queries.lock();
    assert_eq!(
        queries[0].get("lastUpdate").map(String::as_str),
        Some("2025-03-20T18:00:00Z")
    );
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = FeedServer::default();
    *server.status.lock() = Some(StatusCode::SERVICE_UNAVAILABLE);
    *server.body.lock() = "maintenance".to_string();
    let feed = HttpViewFeed::new(&settings(spawn(server).await)).unwrap();

    match feed.fetch_views(None).await {
        Err(FeedError::Status { status, body, .. }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_envelope_names_path() {
    let server = FeedServer::default();
    *server.body.lock() = r#"{"_embedded":{"preferences":[{"id":"eleven","preference":"{}"}]}}"#
        .to_string();
    let feed = HttpViewFeed::new(&settings(spawn(server).await)).unwrap();

    match feed.fetch_views(None).await {
        Err(FeedError::Envelope { path, .. }) => {
            assert_eq!(path, "_embedded.preferences[0].id");
        }
        other => panic!("expected envelope error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_feed_is_request_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let feed = HttpViewFeed::new(&settings(format!("http://{}", addr))).unwrap();

    let err = feed.fetch_views(None).await.unwrap_err();

    assert!(matches!(err, FeedError::Request { .. }));
}
