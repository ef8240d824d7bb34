use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use tracing::error;

use crate::{
    config, maintenance, modules, usage,
    web::{ApiMessage, AppState, json_error, storage},
};

const ROBOTS_TXT_BODY: &str = include_str!("../../robots.txt");

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/robots.txt", get(robots_txt))
        .route("/media/journal-images/:name", get(storage::serve_image))
        .route("/api/usage", get(usage_window))
        .route("/api/data/wipe", post(maintenance::wipe_all_data))
        .merge(modules::chat::router())
        .merge(modules::journal::router())
        .merge(modules::gratitude::router())
        .merge(modules::capsule::router())
        .merge(modules::summary::router())
        .merge(modules::feedback::router())
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

async fn robots_txt() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        ROBOTS_TXT_BODY,
    )
}

/// Trailing-week token totals per module, for keeping an eye on how much of
/// the generation quota the companion has been using.
async fn usage_window(
    State(state): State<AppState>,
) -> Result<Json<Vec<usage::ModuleUsage>>, (StatusCode, Json<ApiMessage>)> {
    usage::window_totals(state.pool_ref())
        .await
        .map(Json)
        .map_err(|err| {
            error!(?err, "failed to load usage window");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, config::CONNECTION_MESSAGE)
        })
}
