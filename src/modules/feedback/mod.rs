//! Feedback drop box: write-only, stamped with a best-effort client IP.

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::{
    AppState, config,
    web::{ApiMessage, ClientIp, json_error},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/feedback", post(submit_feedback))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub content: String,
}

async fn submit_feedback(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<FeedbackBody>,
) -> Result<StatusCode, (StatusCode, Json<ApiMessage>)> {
    let content = body.content.trim();
    if content.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Feedback needs some words.",
        ));
    }

    sqlx::query("INSERT INTO feedback (id, content, ip_address) VALUES ($1, $2, $3)")
        .bind(Uuid::new_v4())
        .bind(content)
        .bind(ip.map(|ip| ip.to_string()))
        .execute(&state.pool())
        .await
        .map_err(|err| {
            error!(?err, "failed to store feedback");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, config::CONNECTION_MESSAGE)
        })?;

    Ok(StatusCode::CREATED)
}
