//! Gratitude notes: tiny immutable entries, listed newest first.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::{
    AppState, config,
    web::{ApiMessage, json_error},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/gratitude/notes", get(list_notes).post(create_note))
}

#[derive(Debug, sqlx::FromRow)]
struct GratitudeNoteRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    content: String,
}

#[derive(Debug, Serialize)]
pub struct GratitudeNoteBody {
    pub id: Uuid,
    pub created_at: String,
    pub content: String,
}

impl From<GratitudeNoteRow> for GratitudeNoteBody {
    fn from(row: GratitudeNoteRow) -> Self {
        Self {
            id: row.id,
            created_at: row.created_at.to_rfc3339(),
            content: row.content,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateNoteBody {
    pub content: String,
}

async fn create_note(
    State(state): State<AppState>,
    Json(body): Json<CreateNoteBody>,
) -> Result<Json<GratitudeNoteBody>, (StatusCode, Json<ApiMessage>)> {
    let content = body.content.trim();
    if content.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "A gratitude note needs some words.",
        ));
    }

    let row = sqlx::query_as::<_, GratitudeNoteRow>(
        "INSERT INTO gratitude_notes (id, content) VALUES ($1, $2) \
         RETURNING id, created_at, content",
    )
    .bind(Uuid::new_v4())
    .bind(content)
    .fetch_one(&state.pool())
    .await
    .map_err(internal_error)?;

    Ok(Json(row.into()))
}

async fn list_notes(
    State(state): State<AppState>,
) -> Result<Json<Vec<GratitudeNoteBody>>, (StatusCode, Json<ApiMessage>)> {
    let rows = sqlx::query_as::<_, GratitudeNoteRow>(
        "SELECT id, created_at, content FROM gratitude_notes ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(&state.pool())
    .await
    .map_err(internal_error)?;

    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

fn internal_error(err: sqlx::Error) -> (StatusCode, Json<ApiMessage>) {
    error!(?err, "gratitude database error");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, config::CONNECTION_MESSAGE)
}
