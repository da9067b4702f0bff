pub mod comments;
pub mod state;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use stitch_common::error::{StitchError, StitchResult};

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> StitchResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| StitchError::Database(e.to_string()))
}
