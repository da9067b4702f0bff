use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A comment on a ticket from the unified ticketing API.
///
/// `record_created_at`, `record_updated_at` and `integration_account_id`
/// never come off the wire; the fetch engine stamps them when it emits the
/// record downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub ticket_id: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_body: Option<String>,
    #[serde(default)]
    pub created_by_id: Option<String>,
    #[serde(default)]
    pub is_private: Option<bool>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_deserializing)]
    pub record_created_at: Option<DateTime<Utc>>,
    #[serde(skip_deserializing)]
    pub record_updated_at: Option<DateTime<Utc>>,
    #[serde(skip_deserializing)]
    pub integration_account_id: Option<String>,
}

/// One page of comments plus the continuation token for the next one.
#[derive(Debug, Clone, Deserialize)]
pub struct CommentPage {
    #[serde(default)]
    pub data: Vec<Comment>,
    #[serde(default)]
    pub meta: Option<PageMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageMeta {
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// A ticket reference scoping a comment fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRef {
    pub id: String,
    pub collection_id: String,
}

#[derive(Debug, Clone)]
pub struct CollectionRef {
    pub id: String,
}

/// Parent entity handed to a fetch run by the sync driver.
///
/// Comments are fetched per ticket; any other variant is rejected with a
/// type-mismatch error before any I/O happens.
#[derive(Debug, Clone)]
pub enum SyncParent {
    Ticket(TicketRef),
    Collection(CollectionRef),
}

impl SyncParent {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncParent::Ticket(_) => "ticket",
            SyncParent::Collection(_) => "collection",
        }
    }
}
