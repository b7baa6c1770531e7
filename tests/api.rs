//! HTTP surface tests driving the router in process.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use playfeed::api::{create_router, AppState};
use playfeed::config::{ApiConfig, FeedConfig, RecommendationConfig};
use playfeed::store::{
    Cell, CommitSummary, DataSource, EntityKind, FeedBatch, FeedSink, MemoryStore, Store, Table,
};
use playfeed::{Error, FeedJobs, RecommendationEngine};

fn api_config() -> ApiConfig {
    ApiConfig {
        port: 0,
        host: "127.0.0.1".to_string(),
        request_timeout: Duration::from_secs(10),
        cors_enabled: false,
        metrics_port: 0,
    }
}

fn store() -> MemoryStore {
    let mut sessions = Table::new(
        EntityKind::GameSession,
        &["user_id", "game_id", "session_total_time"],
    );
    for (user_id, game_id, secs) in [(1, 10, 300), (1, 11, 60), (2, 10, 20), (2, 12, 400)] {
        sessions.push_row(vec![
            Cell::Int(user_id),
            Cell::Int(game_id),
            Cell::from(chrono::Duration::seconds(secs)),
        ]);
    }

    let mut activity = Table::new(EntityKind::Activity, &["id", "user_id", "target_id"]);
    for id in 1..=3 {
        activity.push_row(vec![Cell::Int(id), Cell::Int(2), Cell::Int(12)]);
    }

    MemoryStore::new()
        .with_table(sessions)
        .with_table(activity)
        .with_table(
            Table::new(EntityKind::User, &["id"])
                .with_row(vec![Cell::Int(1)])
                .with_row(vec![Cell::Int(2)]),
        )
        .with_table(
            Table::new(
                EntityKind::PlaylistSession,
                &["user_id", "playlist_id", "completed"],
            )
            .with_row(vec![Cell::Int(1), Cell::Int(70), Cell::Bool(true)])
            .with_row(vec![Cell::Int(1), Cell::Int(60), Cell::Bool(true)]),
        )
}

fn app(store: MemoryStore) -> Router {
    app_over(Arc::new(store))
}

fn app_over<S: Store + 'static>(store: Arc<S>) -> Router {
    let engine = RecommendationEngine::new(store.clone(), RecommendationConfig::default())
        .expect("default weights are valid");
    let jobs = FeedJobs::new(store, engine.clone(), FeedConfig::default());
    create_router(Arc::new(AppState { engine, jobs }), &api_config())
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health() {
    let app = app(MemoryStore::new());
    let (status, body) = send(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_recommendations_for_user() {
    let app = app(store());
    let (status, body) = send(&app, "GET", "/recommendations/1").await;
    assert_eq!(status, StatusCode::OK);

    let recs = body["recommendations"].as_array().unwrap();
    assert_eq!(recs.len(), 3);
    assert!(recs.iter().all(|r| r["game_id"].is_i64() && r["score"].is_f64()));

    let (status, body) = send(&app, "GET", "/recommendations/404").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recommendations"], Value::Array(vec![]));
}

#[tokio::test]
async fn test_non_numeric_user_is_rejected() {
    let app = app(store());
    let (status, _) = send(&app, "GET", "/recommendations/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_playlist_recommendations_endpoint() {
    let app = app(store());
    let (status, body) = send(&app, "POST", "/fetch_playlist_recommendations/1").await;
    assert_eq!(status, StatusCode::OK);

    let playlists: Vec<i64> = body["playlist_recommendations"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["item_id"].as_i64())
        .collect();
    assert_eq!(playlists, vec![60, 70]);
    assert!(!body["game_recommendations"].as_array().unwrap().is_empty());

    let (status, body) = send(&app, "POST", "/fetch_playlist_recommendations/9").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["game_recommendations"], Value::Array(vec![]));
    assert_eq!(body["playlist_recommendations"], Value::Array(vec![]));
}

#[tokio::test]
async fn test_missing_session_columns_return_empty_list() {
    let store = MemoryStore::new().with_table(
        Table::new(EntityKind::GameSession, &["user_id"]).with_row(vec![Cell::Int(1)]),
    );
    let app = app(store);
    let (status, body) = send(&app, "GET", "/recommendations/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recommendations"], Value::Array(vec![]));
}

#[tokio::test]
async fn test_jobs_then_feed() {
    let app = app(store());

    let (status, body) = send(&app, "POST", "/populate_dynamic_items").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Dynamic items populated");

    let (status, body) = send(&app, "POST", "/update_playlist_recommendations").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Playlist recommendations updated successfully.");

    let (status, body) = send(&app, "POST", "/populate_dynamic_item_priority").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Dynamic item priorities populated");
    assert!(body["rows"].as_u64().unwrap() > 0);

    let (status, body) = send(&app, "POST", "/generate_user_feed").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "User feeds generated");

    let (status, body) = send(&app, "GET", "/feed/1").await;
    assert_eq!(status, StatusCode::OK);
    let types: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|i| i["item_type"].as_str())
        .collect();
    assert_eq!(types, vec!["activity", "activity", "activity", "recommendation", "ad"]);
}

#[tokio::test]
async fn test_job_routes_only_accept_post() {
    let app = app(store());
    let (status, _) = send(&app, "GET", "/populate_dynamic_items").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

/// Store whose every read fails as an unreachable database would
struct UnreachableStore;

#[async_trait]
impl DataSource for UnreachableStore {
    async fn fetch_table(&self, _kind: EntityKind) -> playfeed::Result<Table> {
        Err(Error::Database {
            message: "connection refused".into(),
            source: None,
        })
    }
}

#[async_trait]
impl FeedSink for UnreachableStore {
    async fn commit(&self, _batch: FeedBatch) -> playfeed::Result<CommitSummary> {
        Ok(CommitSummary::default())
    }
}

fn assert_database_error(status: StatusCode, body: &Value) {
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        *body,
        serde_json::json!({
            "error": {"code": "DATABASE_ERROR", "message": "An internal error occurred"}
        })
    );
}

#[tokio::test]
async fn test_playlist_fetch_reports_database_failure() {
    let app = app_over(Arc::new(UnreachableStore));
    let (status, body) = send(&app, "POST", "/fetch_playlist_recommendations/1").await;
    assert_database_error(status, &body);
}

#[tokio::test]
async fn test_playlist_update_reports_database_failure() {
    let app = app_over(Arc::new(UnreachableStore));
    let (status, body) = send(&app, "POST", "/update_playlist_recommendations").await;
    assert_database_error(status, &body);
}
