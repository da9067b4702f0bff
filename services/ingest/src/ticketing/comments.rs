use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stitch_common::error::StitchError;
use stitch_db::state::StateBackend;

use super::client::{CommentQuery, TicketingClient, TicketingClientError};
use super::models::{Comment, SyncParent};

#[derive(Debug, thiserror::Error)]
pub enum CommentSyncError {
    #[error("parent entity is not a ticket, it is a {actual}")]
    TypeMismatch { actual: &'static str },

    #[error("parent ticket is missing an id or collection id")]
    InvalidParent,

    #[error("failed to read sync state for {key}: {source}")]
    StateRead { key: String, source: StitchError },

    #[error("stored sync state for {key} is not a valid timestamp: {value:?}")]
    StateParse {
        key: String,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("failed to fetch comments page: {0}")]
    Fetch(#[from] TicketingClientError),

    #[error("failed to store sync state for {key}: {source}")]
    StateWrite { key: String, source: StitchError },

    #[error("failed to flush sync state: {0}")]
    StateFlush(StitchError),

    #[error("downstream consumer dropped before the run finished")]
    ChannelClosed,

    #[error("sync cancelled")]
    Cancelled,
}

fn state_key(workspace_id: &str, integration_account_id: &str, ticket_id: &str) -> String {
    format!("ticketing-comment-{workspace_id}-{integration_account_id}-{ticket_id}")
}

/// Incremental comment fetcher for one parent ticket.
///
/// Pages through the comments endpoint from the last synced watermark,
/// stamps each record, emits page-sized batches downstream, and advances the
/// watermark once, only after every page has been delivered. Without a state
/// backend every run is a full resync from the configured start date.
pub struct CommentFetcher<B> {
    client: TicketingClient,
    backend: Option<B>,
}

impl<B> CommentFetcher<B>
where
    B: StateBackend,
{
    pub fn new(client: TicketingClient, backend: Option<B>) -> Self {
        Self { client, backend }
    }

    /// Fetch and emit every comment updated since the watermark.
    ///
    /// Returns the number of records emitted. Any error aborts the run
    /// before the watermark is committed, so a retry re-scans the same
    /// window; consumers must be idempotent on
    /// `(id, integration_account_id)`.
    pub async fn run(
        &self,
        parent: &SyncParent,
        batch_tx: &mpsc::Sender<Vec<Comment>>,
        cancel: &CancellationToken,
    ) -> Result<usize, CommentSyncError> {
        let ticket = match parent {
            SyncParent::Ticket(t) => t,
            other => {
                return Err(CommentSyncError::TypeMismatch {
                    actual: other.kind(),
                })
            }
        };
        if ticket.id.is_empty() || ticket.collection_id.is_empty() {
            return Err(CommentSyncError::InvalidParent);
        }

        let config = self.client.config();
        let key = state_key(
            &config.workspace_id,
            &config.integration_account_id,
            &ticket.id,
        );

        let floor = self.resolve_floor(&key, cancel).await?;
        tracing::debug!(
            ticket_id = %ticket.id,
            floor = %floor.to_rfc3339(),
            "resolved sync window"
        );

        let path = format!("/{}/tickets/{}/comments", ticket.collection_id, ticket.id);
        let mut query = Some(CommentQuery::new(floor));
        let mut emitted = 0usize;

        while let Some(current) = query {
            if cancel.is_cancelled() {
                return Err(CommentSyncError::Cancelled);
            }

            let (page, next) = self.client.fetch_comment_page(&path, &current).await?;

            let now = Utc::now();
            let mut records = page.data;
            for record in &mut records {
                record.record_created_at = Some(now);
                record.record_updated_at = Some(now);
                record.integration_account_id = Some(config.integration_account_id.clone());
            }

            if !records.is_empty() {
                emitted += records.len();
                if batch_tx.send(records).await.is_err() {
                    return Err(CommentSyncError::ChannelClosed);
                }
            }

            query = next;
        }

        if let Some(backend) = &self.backend {
            if cancel.is_cancelled() {
                return Err(CommentSyncError::Cancelled);
            }

            // Wall clock, not max observed updated_at: the next run re-scans
            // the window covering this run's duration.
            let watermark = Utc::now().to_rfc3339();
            backend
                .set_key(&key, &watermark)
                .await
                .map_err(|source| CommentSyncError::StateWrite {
                    key: key.clone(),
                    source,
                })?;
            backend
                .flush()
                .await
                .map_err(CommentSyncError::StateFlush)?;
            tracing::debug!(ticket_id = %ticket.id, watermark = %watermark, "advanced watermark");
        }

        Ok(emitted)
    }

    /// Resolve the window floor: the stored watermark when present and
    /// parseable, the configured start date otherwise. A stored value that
    /// does not parse is a hard error, never a silent fallback.
    async fn resolve_floor(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<DateTime<Utc>, CommentSyncError> {
        let floor = self.client.config().start_date;

        let Some(backend) = &self.backend else {
            return Ok(floor);
        };
        if cancel.is_cancelled() {
            return Err(CommentSyncError::Cancelled);
        }

        let stored = backend
            .get_key(key)
            .await
            .map_err(|source| CommentSyncError::StateRead {
                key: key.to_string(),
                source,
            })?;

        match stored.filter(|v| !v.is_empty()) {
            Some(value) => DateTime::parse_from_rfc3339(&value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|source| CommentSyncError::StateParse {
                    key: key.to_string(),
                    value,
                    source,
                }),
            None => Ok(floor),
        }
    }
}
