use std::sync::Arc;

use axum::{
    http::{header, HeaderValue},
    response::IntoResponse,
    routing::{get, post},
    Router,
};

use crate::AppState;

pub mod handlers;

/// Build the insight API router.
/// Routes are relative; `app_router` mounts them under `/api/v1`.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new().route("/insights", post(handlers::generate_insights))
}

/// Full application router: health, metrics and the versioned API.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api_router())
        .with_state(state)
}

async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        state.insights.metrics().render(),
    )
}
