//! Full data wipe: clears every entity table in a fixed order, then the
//! image store, returning the deployment to first-run state. The first
//! failure aborts the remaining steps; tables already cleared stay cleared,
//! and the caller sees a failed wipe.

use anyhow::{Context, Result};
use axum::{Json, extract::State, http::StatusCode};
use sqlx::PgPool;
use tracing::{error, info};

use crate::web::{ApiMessage, AppState, json_error, storage};

const WIPE_TABLES: &[&str] = &[
    "journal_entries",
    "gratitude_notes",
    "time_capsule_notes",
    "weekly_summaries",
    "chat_messages",
    "feedback",
    "llm_usage_events",
];

pub async fn wipe_all_data(
    State(state): State<AppState>,
) -> Result<StatusCode, (StatusCode, Json<ApiMessage>)> {
    match run_wipe(&state.pool()).await {
        Ok(images_removed) => {
            info!(images_removed, "all user data cleared");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(err) => {
            error!(?err, "data wipe failed");
            Err(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Sorry, there was an error trying to clear your data. Please try again.",
            ))
        }
    }
}

async fn run_wipe(pool: &PgPool) -> Result<u64> {
    // Table names come from the fixed list above, never from input.
    for table in WIPE_TABLES {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(pool)
            .await
            .with_context(|| format!("failed to clear table {table}"))?;
    }

    storage::remove_all_images(storage::default_root())
        .await
        .context("failed to clear stored images")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wipe_covers_every_entity_table() {
        // Every table created by the initial migration must be in the list,
        // or a wipe would leave stale rows behind.
        let migration = include_str!("../../migrations/0001_initial.sql");

        for table in WIPE_TABLES {
            assert!(
                migration.contains(&format!("CREATE TABLE {table}")),
                "{table} missing from initial migration"
            );
        }

        let table_count = migration.matches("CREATE TABLE").count();
        assert_eq!(table_count, WIPE_TABLES.len());
    }
}
