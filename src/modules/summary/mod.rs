//! Weekly wellness summary: a seven-day cooldown gate over an append-only
//! generation log, plus the prompt built from the trailing week of journal
//! entries.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::{
    AppState, config,
    llm::LlmRequest,
    usage::{self, MODULE_SUMMARY},
    web::{ApiMessage, GeneratedText, json_error, llm_failure_response},
};

const COOLDOWN_DAYS: i64 = 7;
const SNIPPET_CHARS: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/summary/status", get(summary_status))
        .route("/api/summary", post(generate_summary))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SummaryEligibility {
    pub can_generate: bool,
    pub days_remaining: i64,
}

impl SummaryEligibility {
    fn eligible() -> Self {
        Self {
            can_generate: true,
            days_remaining: 0,
        }
    }
}

/// Whole-day cooldown arithmetic, rounded up: one millisecond into a day
/// still counts that day as remaining.
fn eligibility(last_generated_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> SummaryEligibility {
    let Some(last) = last_generated_at else {
        return SummaryEligibility::eligible();
    };

    let cooldown = Duration::days(COOLDOWN_DAYS);
    let elapsed = now - last;
    if elapsed >= cooldown {
        return SummaryEligibility::eligible();
    }

    let remaining_millis = (cooldown - elapsed).num_milliseconds();
    let millis_per_day = Duration::days(1).num_milliseconds();
    let days_remaining = (remaining_millis + millis_per_day - 1) / millis_per_day;

    SummaryEligibility {
        can_generate: false,
        days_remaining,
    }
}

async fn last_generated_at(pool: &PgPool) -> sqlx::Result<Option<DateTime<Utc>>> {
    sqlx::query_scalar(
        "SELECT created_at FROM weekly_summaries ORDER BY created_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await
}

async fn summary_status(
    State(state): State<AppState>,
) -> Result<Json<SummaryEligibility>, (StatusCode, Json<ApiMessage>)> {
    let last = last_generated_at(&state.pool())
        .await
        .map_err(internal_error)?;

    Ok(Json(eligibility(last, Utc::now())))
}

async fn generate_summary(
    State(state): State<AppState>,
) -> Result<Json<GeneratedText>, (StatusCode, Json<ApiMessage>)> {
    let pool = state.pool();
    let now = Utc::now();

    // The cooldown is enforced here, not trusted to the caller.
    let last = last_generated_at(&pool).await.map_err(internal_error)?;
    let status = eligibility(last, now);
    if !status.can_generate {
        return Err(json_error(
            StatusCode::TOO_MANY_REQUESTS,
            format!(
                "The weekly summary was made recently. A new one unlocks in {} day(s).",
                status.days_remaining
            ),
        ));
    }

    let entries = fetch_week_entries(&pool, now).await.map_err(internal_error)?;
    let prompt = format!(
        "[Interface: Weekly Summary]\n{}\nBased on this data, create a simple wellness summary for Soundous.",
        build_weekly_prompt(&entries)
    );

    let request = LlmRequest::new(config::PERSONA).user(prompt);
    let response = state.llm_client().generate(request).await.map_err(|err| {
        error!(?err, "weekly summary generation failed");
        llm_failure_response(&err)
    })?;

    if let Err(err) = usage::record_usage(&pool, MODULE_SUMMARY, &response.token_usage).await {
        error!(?err, "failed to record summary usage");
    }

    // Logged only after a successful generation, so a failed call never
    // burns the week's slot.
    record_generation(&pool).await.map_err(internal_error)?;

    Ok(Json(GeneratedText::new(response.text)))
}

async fn record_generation(pool: &PgPool) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO weekly_summaries (id) VALUES ($1)")
        .bind(Uuid::new_v4())
        .execute(pool)
        .await?;
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct WeekEntryRow {
    created_at: DateTime<Utc>,
    content: Option<String>,
    image_url: Option<String>,
}

async fn fetch_week_entries(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> sqlx::Result<Vec<WeekEntryRow>> {
    sqlx::query_as::<_, WeekEntryRow>(
        "SELECT created_at, content, image_url FROM journal_entries \
         WHERE created_at >= $1 ORDER BY created_at DESC",
    )
    .bind(now - Duration::days(COOLDOWN_DAYS))
    .fetch_all(pool)
    .await
}

/// One line per entry, newest first; the result is opaque input for the
/// generation call and is never parsed back.
fn build_weekly_prompt(entries: &[WeekEntryRow]) -> String {
    if entries.is_empty() {
        return config::WEEKLY_FALLBACK.to_string();
    }

    let lines = entries
        .iter()
        .map(entry_line)
        .collect::<Vec<_>>()
        .join("\n");

    format!("Here are some of Soundous's notes from the past week:\n{lines}")
}

fn entry_line(entry: &WeekEntryRow) -> String {
    let image_indicator = if entry.image_url.is_some() {
        " [Image attached]"
    } else {
        ""
    };
    let snippet = match entry.content.as_deref().filter(|content| !content.is_empty()) {
        Some(content) => format!(": \"{}...\"", truncate_chars(content, SNIPPET_CHARS)),
        None => " (Image only)".to_string(),
    };

    format!(
        "- On {}, she wrote{}{}",
        entry.created_at.format("%-m/%-d/%Y"),
        snippet,
        image_indicator
    )
}

/// Char-boundary-safe prefix of at most `max` characters.
fn truncate_chars(input: &str, max: usize) -> &str {
    match input.char_indices().nth(max) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

fn internal_error(err: sqlx::Error) -> (StatusCode, Json<ApiMessage>) {
    error!(?err, "summary database error");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, config::CONNECTION_MESSAGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap()
    }

    #[test]
    fn no_prior_record_is_immediately_eligible() {
        assert_eq!(eligibility(None, now()), SummaryEligibility::eligible());
    }

    #[test]
    fn three_days_in_leaves_four_remaining() {
        let status = eligibility(Some(now() - Duration::days(3)), now());
        assert_eq!(
            status,
            SummaryEligibility {
                can_generate: false,
                days_remaining: 4
            }
        );
    }

    #[test]
    fn one_second_past_the_window_is_eligible() {
        let last = now() - Duration::days(7) - Duration::seconds(1);
        assert_eq!(eligibility(Some(last), now()), SummaryEligibility::eligible());
    }

    #[test]
    fn exactly_seven_days_is_eligible() {
        let last = now() - Duration::days(7);
        assert_eq!(eligibility(Some(last), now()), SummaryEligibility::eligible());
    }

    #[test]
    fn remaining_days_round_up() {
        // One millisecond into day six still reports one whole day left.
        let last = now() - Duration::days(6) - Duration::milliseconds(1);
        assert_eq!(eligibility(Some(last), now()).days_remaining, 1);

        // A summary generated a moment ago reports the full week.
        let last = now() - Duration::milliseconds(1);
        assert_eq!(eligibility(Some(last), now()).days_remaining, 7);
    }

    #[test]
    fn empty_week_emits_exactly_the_fallback() {
        assert_eq!(build_weekly_prompt(&[]), config::WEEKLY_FALLBACK);
    }

    #[test]
    fn entry_lines_carry_date_snippet_and_image_markers() {
        let entries = vec![
            WeekEntryRow {
                created_at: Utc.with_ymd_and_hms(2026, 8, 5, 9, 30, 0).unwrap(),
                content: Some("walked by the sea".to_string()),
                image_url: Some("/media/journal-images/sea.png".to_string()),
            },
            WeekEntryRow {
                created_at: Utc.with_ymd_and_hms(2026, 8, 3, 20, 0, 0).unwrap(),
                content: None,
                image_url: Some("/media/journal-images/sky.png".to_string()),
            },
        ];

        let prompt = build_weekly_prompt(&entries);
        let mut lines = prompt.lines();

        assert_eq!(
            lines.next(),
            Some("Here are some of Soundous's notes from the past week:")
        );
        assert_eq!(
            lines.next(),
            Some("- On 8/5/2026, she wrote: \"walked by the sea...\" [Image attached]")
        );
        assert_eq!(
            lines.next(),
            Some("- On 8/3/2026, she wrote (Image only) [Image attached]")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn long_content_is_cut_at_one_hundred_chars() {
        let long = "a".repeat(140);
        let entry = WeekEntryRow {
            created_at: Utc.with_ymd_and_hms(2026, 8, 4, 8, 0, 0).unwrap(),
            content: Some(long),
            image_url: None,
        };

        let line = entry_line(&entry);
        assert!(line.contains(&format!("\"{}...\"", "a".repeat(SNIPPET_CHARS))));
        assert!(!line.contains(&"a".repeat(SNIPPET_CHARS + 1)));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let accented = "é".repeat(120);
        assert_eq!(truncate_chars(&accented, 100).chars().count(), 100);
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
