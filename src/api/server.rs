//! HTTP server implementation for the API

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use super::handlers;
use super::models::{ApiError, GenerateRequest, Requester, SearchQuery, REQUESTER_HEADER};
use crate::config::Config;
use crate::jobs::JobController;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<JobController>,
    pub config: Arc<Config>,
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .server
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(REQUESTER_HEADER),
        ])
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/health", get(health_handler))
        // Generation and job tracking
        .route("/api/flashcards/generate", post(generate_handler))
        .route("/api/jobs/:video_id", get(job_status_handler).delete(cancel_job_handler))
        // Saved flashcard sets
        .route("/api/flashcards", get(list_handler))
        .route("/api/flashcards/search", get(search_handler))
        .route("/api/flashcards/suggestions", get(suggestions_handler))
        .route(
            "/api/flashcards/:video_id",
            get(get_flashcards_handler).delete(delete_flashcards_handler),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Configure and start the HTTP server
pub async fn start_http_server(
    controller: Arc<JobController>,
    config: Arc<Config>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = router(AppState { controller, config });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🌐 API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(handlers::health_check(&state.controller).await)
}

async fn generate_handler(
    State(state): State<AppState>,
    Requester(requester): Requester,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return ApiError::bad_request(format!("Invalid request body: {}", rejection.body_text())).into_response()
        }
    };
    match handlers::generate(&state.controller, &requester, payload).await {
        Ok(data) => (StatusCode::ACCEPTED, Json(data)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn job_status_handler(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(video_id): Path<String>,
) -> Response {
    match handlers::job_status(&state.controller, &requester, &video_id).await {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn cancel_job_handler(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(video_id): Path<String>,
) -> Response {
    match handlers::cancel_job(&state.controller, &requester, &video_id).await {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_flashcards_handler(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(video_id): Path<String>,
) -> Response {
    match handlers::get_flashcards(&state.controller, &requester, &video_id).await {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn delete_flashcards_handler(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(video_id): Path<String>,
) -> Response {
    match handlers::delete_flashcards(&state.controller, &requester, &video_id).await {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_handler(State(state): State<AppState>, Requester(requester): Requester) -> Response {
    match handlers::list_flashcards(&state.controller, &requester).await {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn search_handler(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Query(params): Query<SearchQuery>,
) -> Response {
    match handlers::search_flashcards(&state.controller, &requester, params.query).await {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn suggestions_handler(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Query(params): Query<SearchQuery>,
) -> Response {
    match handlers::suggestions(&state.controller, &requester, params.query).await {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(e) => e.into_response(),
    }
}
