use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A synced ticket comment as stored in Postgres.
///
/// `created_at`/`updated_at` are sync-time stamps set by the fetch engine;
/// the comment's own timestamps from the ticketing API live in
/// `source_created_at`/`source_updated_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRow {
    pub id: String,
    pub integration_account_id: String,
    pub ticket_id: Option<String>,
    pub body: Option<String>,
    pub html_body: Option<String>,
    pub created_by_id: Option<String>,
    pub is_private: Option<bool>,
    pub source_created_at: Option<DateTime<Utc>>,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub raw_ref: Option<serde_json::Value>,
}

/// Static schema declaration for a synced table, consumed by the sync driver.
#[derive(Debug, Clone, Copy)]
pub struct TableDescriptor {
    pub name: &'static str,
    pub primary_keys: &'static [&'static str],
    pub incremental_key: Option<&'static str>,
}

/// The ticket-comment table: idempotent on `(id, integration_account_id)`,
/// incrementally synced on the source's `updated_at`.
pub const fn comment_table() -> TableDescriptor {
    TableDescriptor {
        name: "ticketing_comments",
        primary_keys: &["id", "integration_account_id"],
        incremental_key: Some("source_updated_at"),
    }
}
