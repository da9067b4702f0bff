use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::comments::models::CommentRow;
use crate::comments::repositories::CommentRepository;
use stitch_common::error::{StitchError, StitchResult};

#[derive(Clone)]
pub struct PgCommentRepository {
    pool: PgPool,
}

impl PgCommentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> StitchResult<CommentRow> {
        Ok(CommentRow {
            id: row.get("id"),
            integration_account_id: row.get("integration_account_id"),
            ticket_id: row.get("ticket_id"),
            body: row.get("body"),
            html_body: row.get("html_body"),
            created_by_id: row.get("created_by_id"),
            is_private: row.get("is_private"),
            source_created_at: row.get("source_created_at"),
            source_updated_at: row.get("source_updated_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            raw_ref: row.get("raw_ref"),
        })
    }
}

/// Create the comments table if it does not exist.
pub async fn ensure_schema(pool: &PgPool) -> StitchResult<()> {
    sqlx::query(
        "create table if not exists ticketing_comments (
           id text not null,
           integration_account_id text not null,
           ticket_id text,
           body text,
           html_body text,
           created_by_id text,
           is_private boolean,
           source_created_at timestamptz,
           source_updated_at timestamptz,
           created_at timestamptz not null,
           updated_at timestamptz not null,
           raw_ref jsonb,
           primary key (id, integration_account_id)
         )",
    )
    .execute(pool)
    .await
    .map_err(|e| StitchError::Database(e.to_string()))?;

    Ok(())
}

#[async_trait]
impl CommentRepository for PgCommentRepository {
    async fn upsert(&self, row: &CommentRow) -> StitchResult<()> {
        sqlx::query(
            "insert into ticketing_comments
             (id, integration_account_id, ticket_id, body, html_body, created_by_id,
              is_private, source_created_at, source_updated_at, created_at, updated_at, raw_ref)
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             on conflict (id, integration_account_id) do update set
               ticket_id = excluded.ticket_id,
               body = excluded.body,
               html_body = excluded.html_body,
               created_by_id = excluded.created_by_id,
               is_private = excluded.is_private,
               source_created_at = excluded.source_created_at,
               source_updated_at = excluded.source_updated_at,
               updated_at = excluded.updated_at,
               raw_ref = excluded.raw_ref",
        )
        .bind(&row.id)
        .bind(&row.integration_account_id)
        .bind(&row.ticket_id)
        .bind(&row.body)
        .bind(&row.html_body)
        .bind(&row.created_by_id)
        .bind(row.is_private)
        .bind(row.source_created_at)
        .bind(row.source_updated_at)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(&row.raw_ref)
        .execute(&self.pool)
        .await
        .map_err(|e| StitchError::Database(e.to_string()))?;

        Ok(())
    }

    async fn get_by_key(
        &self,
        integration_account_id: &str,
        id: &str,
    ) -> StitchResult<Option<CommentRow>> {
        let row = sqlx::query(
            "select id, integration_account_id, ticket_id, body, html_body, created_by_id,
                    is_private, source_created_at, source_updated_at, created_at, updated_at, raw_ref
             from ticketing_comments
             where integration_account_id = $1 and id = $2",
        )
        .bind(integration_account_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StitchError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }
}
