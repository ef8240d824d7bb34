//! Time-capsule lifecycle: Absent -> Sealed -> Unlockable -> Opened -> Absent.
//!
//! At most one capsule row exists at a time; creating a new one replaces
//! whatever was there. "Unlockable" is never stored: it is derived from the
//! clock on every read, and `open` re-checks the gate inside its UPDATE so a
//! fast-forwarded client clock cannot force an early open.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::{
    AppState, config,
    llm::LlmRequest,
    usage::{self, MODULE_CAPSULE},
    web::{ApiMessage, GeneratedText, json_error, llm_failure_response},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/capsule",
            get(active_capsule).post(create_capsule).delete(delete_capsule),
        )
        .route("/api/capsule/open", post(open_capsule))
        .route("/api/capsule/reflection", post(capsule_reflection))
}

#[derive(Debug, sqlx::FromRow)]
struct CapsuleRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    open_at: DateTime<Utc>,
    content: String,
    opened: bool,
}

#[derive(Debug, Serialize)]
pub struct CapsuleBody {
    pub id: Uuid,
    pub created_at: String,
    pub open_at: String,
    pub content: String,
    pub opened: bool,
    pub unlockable: bool,
}

impl CapsuleRow {
    fn into_body(self, now: DateTime<Utc>) -> CapsuleBody {
        let unlockable = is_unlockable(self.opened, self.open_at, now);
        CapsuleBody {
            id: self.id,
            created_at: self.created_at.to_rfc3339(),
            open_at: self.open_at.to_rfc3339(),
            content: self.content,
            opened: self.opened,
            unlockable,
        }
    }
}

/// Derived predicate; evaluating it never mutates state, so two reads at
/// different times may disagree.
fn is_unlockable(opened: bool, open_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    !opened && now >= open_at
}

/// The earliest acceptable unlock date is one full day after sealing.
fn earliest_open_date(today: NaiveDate) -> NaiveDate {
    today + Duration::days(1)
}

#[derive(Debug, Deserialize)]
pub struct CreateCapsuleBody {
    pub content: String,
    /// Unlock date as `YYYY-MM-DD`; the capsule unlocks at midnight UTC.
    pub open_at: String,
}

async fn create_capsule(
    State(state): State<AppState>,
    Json(body): Json<CreateCapsuleBody>,
) -> Result<Json<CapsuleBody>, (StatusCode, Json<ApiMessage>)> {
    let content = body.content.trim();
    if content.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "A capsule needs a message inside.",
        ));
    }

    let open_date = NaiveDate::parse_from_str(body.open_at.trim(), "%Y-%m-%d").map_err(|_| {
        json_error(StatusCode::BAD_REQUEST, "The unlock date is not a valid date.")
    })?;

    let now = Utc::now();
    if open_date < earliest_open_date(now.date_naive()) {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Pick an unlock date at least one day away.",
        ));
    }
    let open_at = open_date.and_time(NaiveTime::MIN).and_utc();

    let row = replace_capsule(&state.pool(), content, open_at)
        .await
        .map_err(internal_error)?;

    Ok(Json(row.into_body(now)))
}

/// Replace-on-create keeps the single-capsule invariant: the old row (in any
/// state) goes away in the same transaction that seals the new one.
async fn replace_capsule(
    pool: &PgPool,
    content: &str,
    open_at: DateTime<Utc>,
) -> sqlx::Result<CapsuleRow> {
    let mut transaction = pool.begin().await?;

    sqlx::query("DELETE FROM time_capsule_notes")
        .execute(&mut *transaction)
        .await?;

    let row = sqlx::query_as::<_, CapsuleRow>(
        "INSERT INTO time_capsule_notes (id, open_at, content, opened) VALUES ($1, $2, $3, FALSE) \
         RETURNING id, created_at, open_at, content, opened",
    )
    .bind(Uuid::new_v4())
    .bind(open_at)
    .bind(content)
    .fetch_one(&mut *transaction)
    .await?;

    transaction.commit().await?;

    Ok(row)
}

/// Zero rows is the normal Absent state, not an error.
async fn active_capsule(
    State(state): State<AppState>,
) -> Result<Json<Option<CapsuleBody>>, (StatusCode, Json<ApiMessage>)> {
    let row = fetch_active(&state.pool()).await.map_err(internal_error)?;
    let now = Utc::now();
    Ok(Json(row.map(|row| row.into_body(now))))
}

async fn fetch_active(pool: &PgPool) -> sqlx::Result<Option<CapsuleRow>> {
    sqlx::query_as::<_, CapsuleRow>(
        "SELECT id, created_at, open_at, content, opened FROM time_capsule_notes LIMIT 1",
    )
    .fetch_optional(pool)
    .await
}

#[derive(Debug, Deserialize)]
pub struct OpenCapsuleBody {
    pub id: Uuid,
}

async fn open_capsule(
    State(state): State<AppState>,
    Json(body): Json<OpenCapsuleBody>,
) -> Result<Json<CapsuleBody>, (StatusCode, Json<ApiMessage>)> {
    let pool = state.pool();
    let now = Utc::now();

    // Conditional update: only an unlockable capsule transitions, and a
    // repeated click cannot mutate anything twice.
    let updated = sqlx::query_as::<_, CapsuleRow>(
        "UPDATE time_capsule_notes SET opened = TRUE \
         WHERE id = $1 AND opened = FALSE AND open_at <= NOW() \
         RETURNING id, created_at, open_at, content, opened",
    )
    .bind(body.id)
    .fetch_optional(&pool)
    .await
    .map_err(internal_error)?;

    if let Some(row) = updated {
        return Ok(Json(row.into_body(now)));
    }

    let current = fetch_active(&pool).await.map_err(internal_error)?;
    match current {
        Some(row) if row.id == body.id && row.opened => Ok(Json(row.into_body(now))),
        Some(row) if row.id == body.id => Err(json_error(
            StatusCode::CONFLICT,
            "This capsule is still sealed.",
        )),
        _ => Err(json_error(
            StatusCode::NOT_FOUND,
            "There is no capsule to open.",
        )),
    }
}

async fn capsule_reflection(
    State(state): State<AppState>,
) -> Result<Json<GeneratedText>, (StatusCode, Json<ApiMessage>)> {
    let pool = state.pool();

    let capsule = fetch_active(&pool)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "There is no capsule to reflect on."))?;

    if !capsule.opened {
        return Err(json_error(
            StatusCode::CONFLICT,
            "The capsule has not been opened yet.",
        ));
    }

    let prompt = build_reflection_prompt(capsule.created_at, &capsule.content);
    let request = LlmRequest::new(config::PERSONA).user(prompt);

    // Gateway failure only surfaces an error; the capsule stays opened.
    let response = state.llm_client().generate(request).await.map_err(|err| {
        error!(?err, "capsule reflection generation failed");
        llm_failure_response(&err)
    })?;

    if let Err(err) = usage::record_usage(&pool, MODULE_CAPSULE, &response.token_usage).await {
        error!(?err, "failed to record capsule usage");
    }

    Ok(Json(GeneratedText::new(response.text)))
}

async fn delete_capsule(
    State(state): State<AppState>,
) -> Result<StatusCode, (StatusCode, Json<ApiMessage>)> {
    // Unconditional: deleting a still-sealed capsule is the abandon path.
    sqlx::query("DELETE FROM time_capsule_notes")
        .execute(&state.pool())
        .await
        .map_err(internal_error)?;

    Ok(StatusCode::NO_CONTENT)
}

fn build_reflection_prompt(sealed_at: DateTime<Utc>, content: &str) -> String {
    format!(
        "Soundous wrote a message to her future self on {}. Today, she opened it. The message is: \"{}\". Generate a gentle, short, and caring reflection on this moment for her, in your usual persona.",
        sealed_at.format("%-m/%-d/%Y"),
        content
    )
}

fn internal_error(err: sqlx::Error) -> (StatusCode, Json<ApiMessage>) {
    error!(?err, "capsule database error");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, config::CONNECTION_MESSAGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn sealed_capsule_unlocks_exactly_at_open_time() {
        let open_at = at(2026, 8, 10, 0);

        assert!(!is_unlockable(false, open_at, at(2026, 8, 9, 23)));
        assert!(is_unlockable(false, open_at, open_at));
        assert!(is_unlockable(false, open_at, at(2026, 8, 11, 12)));
    }

    #[test]
    fn opened_capsule_is_never_unlockable() {
        let open_at = at(2026, 8, 10, 0);
        assert!(!is_unlockable(true, open_at, at(2026, 8, 11, 0)));
    }

    #[test]
    fn minimum_delay_is_one_day() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        let tomorrow = NaiveDate::from_ymd_opt(2026, 8, 7).unwrap();

        assert_eq!(earliest_open_date(today), tomorrow);
        // Today and the past fall short of the minimum; tomorrow is fine.
        assert!(today < earliest_open_date(today));
        assert!(!(tomorrow < earliest_open_date(today)));
    }

    #[test]
    fn minimum_delay_crosses_month_end() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        assert_eq!(
            earliest_open_date(today),
            NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()
        );
    }

    #[test]
    fn reflection_prompt_carries_seal_date_and_message() {
        let prompt = build_reflection_prompt(at(2026, 3, 5, 14), "dear future me");

        assert!(prompt.starts_with(
            "Soundous wrote a message to her future self on 3/5/2026. Today, she opened it."
        ));
        assert!(prompt.contains("The message is: \"dear future me\"."));
    }

    #[test]
    fn body_reports_derived_unlockable_flag() {
        let row = CapsuleRow {
            id: Uuid::new_v4(),
            created_at: at(2026, 8, 1, 9),
            open_at: at(2026, 8, 10, 0),
            content: "hi".to_string(),
            opened: false,
        };

        let body = row.into_body(at(2026, 8, 12, 0));
        assert!(body.unlockable);
        assert!(!body.opened);
    }
}
