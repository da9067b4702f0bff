use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;

use crate::state::backend::StateBackend;
use stitch_common::error::{StitchError, StitchResult};

/// Postgres-backed state store.
///
/// `set_key` stages writes in memory; `flush` persists the staged set in a
/// single transaction. A process that dies between the two leaves the stored
/// watermark untouched, so a half-finished run never advances it.
#[derive(Clone)]
pub struct PgStateBackend {
    pool: PgPool,
    pending: Arc<Mutex<HashMap<String, String>>>,
}

impl PgStateBackend {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Create the sync-state table if it does not exist.
pub async fn ensure_schema(pool: &PgPool) -> StitchResult<()> {
    sqlx::query(
        "create table if not exists sync_state (
           key text primary key,
           value text not null,
           updated_at timestamptz not null
         )",
    )
    .execute(pool)
    .await
    .map_err(|e| StitchError::Database(e.to_string()))?;

    Ok(())
}

#[async_trait]
impl StateBackend for PgStateBackend {
    async fn get_key(&self, key: &str) -> StitchResult<Option<String>> {
        // A value staged this run wins over the stored one.
        {
            let pending = self.pending.lock().await;
            if let Some(value) = pending.get(key) {
                return Ok(Some(value.clone()));
            }
        }

        let row = sqlx::query("select value from sync_state where key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StitchError::Database(e.to_string()))?;

        Ok(row.map(|r| r.get("value")))
    }

    async fn set_key(&self, key: &str, value: &str) -> StitchResult<()> {
        let mut pending = self.pending.lock().await;
        pending.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn flush(&self) -> StitchResult<()> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StitchError::Database(e.to_string()))?;

        let now = Utc::now();
        for (key, value) in pending.iter() {
            sqlx::query(
                "insert into sync_state (key, value, updated_at)
                 values ($1, $2, $3)
                 on conflict (key) do update set
                   value = excluded.value,
                   updated_at = excluded.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| StitchError::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StitchError::Database(e.to_string()))?;

        pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;

    async fn test_backend() -> Option<PgStateBackend> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url).await.expect("db should connect");
        ensure_schema(&pool).await.ok()?;
        Some(PgStateBackend::new(pool))
    }

    fn unique_key() -> String {
        format!(
            "test-state-{}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        )
    }

    #[tokio::test]
    async fn get_missing_key_returns_none() {
        let backend = match test_backend().await {
            Some(b) => b,
            None => return,
        };
        let value = backend.get_key(&unique_key()).await.expect("get");
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn staged_value_visible_before_flush_but_not_durable() {
        let backend = match test_backend().await {
            Some(b) => b,
            None => return,
        };
        let key = unique_key();

        backend.set_key(&key, "staged").await.expect("set");
        let staged = backend.get_key(&key).await.expect("get");
        assert_eq!(staged.as_deref(), Some("staged"));

        // A fresh backend over the same pool sees nothing until flush.
        let other = PgStateBackend::new(backend.pool.clone());
        let stored = other.get_key(&key).await.expect("get");
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn flush_persists_staged_writes() {
        let backend = match test_backend().await {
            Some(b) => b,
            None => return,
        };
        let key = unique_key();

        backend
            .set_key(&key, "2026-03-01T00:00:00+00:00")
            .await
            .expect("set");
        backend.flush().await.expect("flush");

        let other = PgStateBackend::new(backend.pool.clone());
        let stored = other.get_key(&key).await.expect("get");
        assert_eq!(stored.as_deref(), Some("2026-03-01T00:00:00+00:00"));
    }

    #[tokio::test]
    async fn flush_upserts_existing_key() {
        let backend = match test_backend().await {
            Some(b) => b,
            None => return,
        };
        let key = unique_key();

        backend.set_key(&key, "first").await.expect("set");
        backend.flush().await.expect("flush");
        backend.set_key(&key, "second").await.expect("set again");
        backend.flush().await.expect("flush again");

        let other = PgStateBackend::new(backend.pool.clone());
        let stored = other.get_key(&key).await.expect("get");
        assert_eq!(stored.as_deref(), Some("second"));
    }
}
