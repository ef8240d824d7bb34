//! Append-only token ledger for generation calls, aggregated over a rolling
//! seven-day window.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::llm::TokenUsage;

const WINDOW_DAYS: i64 = 7;

pub const MODULE_CHAT: &str = "chat";
pub const MODULE_CHECKIN: &str = "checkin";
pub const MODULE_JOURNAL: &str = "journal";
pub const MODULE_CAPSULE: &str = "capsule";
pub const MODULE_SUMMARY: &str = "summary";

#[derive(Debug, Clone, Serialize)]
pub struct ModuleUsage {
    pub module: String,
    pub prompt_tokens: i64,
    pub response_tokens: i64,
}

pub async fn record_usage(pool: &PgPool, module_key: &str, usage: &TokenUsage) -> Result<()> {
    sqlx::query(
        "INSERT INTO llm_usage_events (id, module_key, prompt_tokens, response_tokens, occurred_at) VALUES ($1, $2, $3, $4, NOW())",
    )
    .bind(Uuid::new_v4())
    .bind(module_key)
    .bind(usage.prompt_tokens as i64)
    .bind(usage.response_tokens as i64)
    .execute(pool)
    .await
    .context("failed to insert usage event")?;

    Ok(())
}

pub async fn window_totals(pool: &PgPool) -> Result<Vec<ModuleUsage>> {
    let window_start = Utc::now() - Duration::days(WINDOW_DAYS);

    let rows = sqlx::query(
        "SELECT module_key, \
                COALESCE(SUM(prompt_tokens)::BIGINT, 0::BIGINT) AS prompt_tokens, \
                COALESCE(SUM(response_tokens)::BIGINT, 0::BIGINT) AS response_tokens \
         FROM llm_usage_events \
         WHERE occurred_at >= $1 \
         GROUP BY module_key \
         ORDER BY module_key",
    )
    .bind(window_start)
    .fetch_all(pool)
    .await
    .context("failed to aggregate usage window")?;

    rows.into_iter()
        .map(|row| {
            Ok(ModuleUsage {
                module: row.try_get("module_key")?,
                prompt_tokens: row.try_get("prompt_tokens")?,
                response_tokens: row.try_get("response_tokens")?,
            })
        })
        .collect()
}
