//! Journal entries: immutable notes, optionally with an attached image, and
//! the gentle reflection the companion offers on a past memory.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Multipart, Path as AxumPath, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::{
    AppState, config,
    llm::LlmRequest,
    usage::{self, MODULE_JOURNAL},
    web::{ApiMessage, GeneratedText, json_error, llm_failure_response, storage},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/journal/entries", get(list_entries).post(create_entry))
        .route("/api/journal/entries/:id/reflection", post(entry_reflection))
}

#[derive(Debug, sqlx::FromRow)]
struct JournalEntryRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    content: Option<String>,
    image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JournalEntryBody {
    pub id: Uuid,
    pub created_at: String,
    pub content: Option<String>,
    pub image_url: Option<String>,
}

impl From<JournalEntryRow> for JournalEntryBody {
    fn from(row: JournalEntryRow) -> Self {
        Self {
            id: row.id,
            created_at: row.created_at.to_rfc3339(),
            content: row.content,
            image_url: row.image_url,
        }
    }
}

struct PendingImage {
    original_name: String,
    content_type: String,
    bytes: Bytes,
}

/// Multipart form: optional `content` text field, optional `image` file
/// field; a note needs at least one of the two.
async fn create_entry(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<JournalEntryBody>, (StatusCode, Json<ApiMessage>)> {
    let mut content: Option<String> = None;
    let mut image: Option<PendingImage> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(?err, "failed to parse journal entry form");
        json_error(StatusCode::BAD_REQUEST, "Could not read the note form.")
    })? {
        match field.name() {
            Some("content") => {
                let value = field.text().await.map_err(|err| {
                    error!(?err, "failed to read note content field");
                    json_error(StatusCode::BAD_REQUEST, "Could not read the note form.")
                })?;
                content = Some(value);
            }
            Some("image") => {
                let original_name = field.file_name().unwrap_or("entry.png").to_string();
                let content_type = field.content_type().unwrap_or("image/png").to_string();
                let bytes = field.bytes().await.map_err(|err| {
                    error!(?err, "failed to read note image field");
                    json_error(StatusCode::BAD_REQUEST, "Could not read the attached image.")
                })?;
                image = Some(PendingImage {
                    original_name,
                    content_type,
                    bytes,
                });
            }
            _ => {}
        }
    }

    let content = content
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    if content.is_none() && image.is_none() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "A note needs some words or a picture.",
        ));
    }

    let image_url = match image {
        Some(image) => {
            if !storage::is_supported_image(&image.content_type) {
                return Err(json_error(
                    StatusCode::BAD_REQUEST,
                    "Only image files can be attached to a note.",
                ));
            }

            let stored_name =
                storage::save_image(storage::default_root(), &image.original_name, &image.bytes)
                    .await
                    .map_err(|err| {
                        error!(?err, "failed to store journal image");
                        json_error(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            config::CONNECTION_MESSAGE,
                        )
                    })?;
            Some(storage::public_url(&stored_name))
        }
        None => None,
    };

    let row = insert_entry(&state.pool(), content.as_deref(), image_url.as_deref())
        .await
        .map_err(internal_error)?;

    Ok(Json(row.into()))
}

async fn insert_entry(
    pool: &PgPool,
    content: Option<&str>,
    image_url: Option<&str>,
) -> sqlx::Result<JournalEntryRow> {
    sqlx::query_as::<_, JournalEntryRow>(
        "INSERT INTO journal_entries (id, content, image_url) VALUES ($1, $2, $3) \
         RETURNING id, created_at, content, image_url",
    )
    .bind(Uuid::new_v4())
    .bind(content)
    .bind(image_url)
    .fetch_one(pool)
    .await
}

async fn list_entries(
    State(state): State<AppState>,
) -> Result<Json<Vec<JournalEntryBody>>, (StatusCode, Json<ApiMessage>)> {
    let rows = sqlx::query_as::<_, JournalEntryRow>(
        "SELECT id, created_at, content, image_url FROM journal_entries \
         ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(&state.pool())
    .await
    .map_err(internal_error)?;

    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

async fn entry_reflection(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<GeneratedText>, (StatusCode, Json<ApiMessage>)> {
    let pool = state.pool();

    let entry = sqlx::query_as::<_, JournalEntryRow>(
        "SELECT id, created_at, content, image_url FROM journal_entries WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await
    .map_err(internal_error)?
    .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "That memory could not be found."))?;

    let prompt = build_memory_prompt(entry.content.as_deref(), entry.image_url.is_some());
    let request = LlmRequest::new(config::PERSONA).user(prompt);

    let response = state.llm_client().generate(request).await.map_err(|err| {
        error!(?err, "memory reflection generation failed");
        llm_failure_response(&err)
    })?;

    if let Err(err) = usage::record_usage(&pool, MODULE_JOURNAL, &response.token_usage).await {
        error!(?err, "failed to record journal usage");
    }

    Ok(Json(GeneratedText::new(response.text)))
}

fn build_memory_prompt(content: Option<&str>, has_image: bool) -> String {
    let mut prompt =
        String::from("[Interface: Memory Reflection]\nSoundous is looking back at a past memory.");
    if let Some(content) = content.filter(|value| !value.is_empty()) {
        prompt.push_str(&format!(" The note says: \"{content}\""));
    }
    if has_image {
        prompt.push_str(" The memory also has an image attached.");
    }
    prompt.push_str(
        "\n\nGenerate a gentle, short, and caring reflection on this memory for her, in your usual persona.",
    );
    prompt
}

fn internal_error(err: sqlx::Error) -> (StatusCode, Json<ApiMessage>) {
    error!(?err, "journal database error");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, config::CONNECTION_MESSAGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_prompt_includes_note_text() {
        let prompt = build_memory_prompt(Some("we watched the rain"), false);

        assert!(prompt.starts_with("[Interface: Memory Reflection]"));
        assert!(prompt.contains(" The note says: \"we watched the rain\""));
        assert!(!prompt.contains("image attached"));
        assert!(prompt.ends_with("in your usual persona."));
    }

    #[test]
    fn memory_prompt_marks_attached_images() {
        let prompt = build_memory_prompt(None, true);

        assert!(!prompt.contains("The note says"));
        assert!(prompt.contains(" The memory also has an image attached."));
    }

    #[test]
    fn memory_prompt_skips_empty_content() {
        let prompt = build_memory_prompt(Some(""), false);
        assert!(!prompt.contains("The note says"));
    }
}
