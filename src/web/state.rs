use std::env;

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::llm::LlmClient;

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    llm: LlmClient,
}

impl AppState {
    /// Connect to Postgres, run migrations, and build the generation client.
    /// Missing configuration fails here, at startup, rather than surfacing
    /// later as a half-working backend.
    pub async fn new() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;

        let llm = LlmClient::from_env().context("failed to initialize generation client")?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        Ok(Self { pool, llm })
    }

    pub fn llm_client(&self) -> LlmClient {
        self.llm.clone()
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }
}
