//! HTTP API Server for Recommendations
//!
//! Exposes the recommendation queries and the feed batch jobs over REST.

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::feed::{FeedEntry, FeedJobs, JobReport};
use crate::recommendation::{GameScore, PlaylistRecommendations, RecommendationEngine};

/// Shared application state
pub struct AppState {
    pub engine: RecommendationEngine,
    pub jobs: FeedJobs,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response for the per-user recommendation endpoint
#[derive(Debug, Serialize)]
pub struct RecommendationsResponse {
    pub recommendations: Vec<GameScore>,
}

/// Response for batch job endpoints
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub message: &'static str,
    pub rows: usize,
}

/// Response for the feed read endpoint
#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub items: Vec<FeedEntry>,
}

/// Build the router with tracing, timeout and optional CORS layers
pub fn create_router(state: Arc<AppState>, config: &ApiConfig) -> Router {
    let router = Router::new()
        // Health check
        .route("/health", get(health_check))
        // Recommendation queries
        .route("/recommendations/:user_id", get(get_recommendations))
        .route(
            "/fetch_playlist_recommendations/:user_id",
            post(fetch_playlist_recommendations),
        )
        // Batch jobs
        .route("/populate_dynamic_items", post(populate_dynamic_items))
        .route(
            "/populate_dynamic_item_priority",
            post(populate_dynamic_item_priority),
        )
        .route("/generate_user_feed", post(generate_user_feed))
        .route(
            "/update_playlist_recommendations",
            post(update_playlist_recommendations),
        )
        // Materialized feeds
        .route("/feed/:user_id", get(get_user_feed))
        .with_state(state);

    let service = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.request_timeout));
    let router = router.layer(service);

    if config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}

/// Start the API server, stopping when `shutdown` resolves
pub async fn start_server(
    state: Arc<AppState>,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_router(state, config);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting recommendation API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Config {
            message: format!("Failed to bind {}", addr).into(),
            source: Some(Box::new(e)),
        })?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(Error::internal)?;

    info!("API server stopped");
    Ok(())
}

fn log_failure(operation: &str, e: &Error) {
    if e.is_error_level() {
        error!("Failed to {}: {:?}", operation, e);
    } else {
        warn!("Failed to {}: {}", operation, e);
    }
}

fn job_response(message: &'static str, report: JobReport) -> Json<JobResponse> {
    Json(JobResponse {
        message,
        rows: report.rows_written,
    })
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Top games for one user
async fn get_recommendations(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<RecommendationsResponse>> {
    match state.engine.recommend_for_user(user_id).await {
        Ok(recommendations) => Ok(Json(RecommendationsResponse { recommendations })),
        Err(e) => {
            log_failure("get recommendations", &e);
            Err(e)
        }
    }
}

/// Game and playlist recommendations for one user
async fn fetch_playlist_recommendations(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<PlaylistRecommendations>> {
    match state.engine.fetch_playlist_recommendations(user_id).await {
        Ok(recommendations) => Ok(Json(recommendations)),
        Err(e) => {
            log_failure("fetch playlist recommendations", &e);
            Err(e)
        }
    }
}

async fn populate_dynamic_items(State(state): State<Arc<AppState>>) -> Result<Json<JobResponse>> {
    match state.jobs.populate_dynamic_items().await {
        Ok(report) => Ok(job_response("Dynamic items populated", report)),
        Err(e) => {
            log_failure("populate dynamic items", &e);
            Err(e)
        }
    }
}

async fn populate_dynamic_item_priority(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JobResponse>> {
    match state.jobs.populate_item_priorities().await {
        Ok(report) => Ok(job_response("Dynamic item priorities populated", report)),
        Err(e) => {
            log_failure("populate item priorities", &e);
            Err(e)
        }
    }
}

async fn generate_user_feed(State(state): State<Arc<AppState>>) -> Result<Json<JobResponse>> {
    match state.jobs.generate_user_feeds().await {
        Ok(report) => Ok(job_response("User feeds generated", report)),
        Err(e) => {
            log_failure("generate user feeds", &e);
            Err(e)
        }
    }
}

async fn update_playlist_recommendations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JobResponse>> {
    match state.jobs.update_playlist_recommendations().await {
        Ok(report) => Ok(job_response(
            "Playlist recommendations updated successfully.",
            report,
        )),
        Err(e) => {
            log_failure("update playlist recommendations", &e);
            Err(e)
        }
    }
}

/// Materialized feed of one user
async fn get_user_feed(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<FeedResponse>> {
    match state.jobs.feed_for_user(user_id).await {
        Ok(items) => Ok(Json(FeedResponse { items })),
        Err(e) => {
            log_failure("read user feed", &e);
            Err(e)
        }
    }
}
