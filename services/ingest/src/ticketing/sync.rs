use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stitch_db::comments::{comment_table, CommentRepository, CommentRow};
use stitch_db::state::StateBackend;

use super::client::TicketingClient;
use super::comments::CommentFetcher;
use super::models::{Comment, SyncParent, TicketRef};
use crate::connector::{Connector, SyncResult};

const SOURCE_NAME: &str = "ticketing_comments";
const BATCH_CHANNEL_CAPACITY: usize = 8;

/// Convert an emitted comment into a table row.
fn comment_to_row(integration_account_id: &str, ticket: &TicketRef, comment: &Comment) -> CommentRow {
    let now = Utc::now();
    CommentRow {
        id: comment.id.clone(),
        integration_account_id: comment
            .integration_account_id
            .clone()
            .unwrap_or_else(|| integration_account_id.to_string()),
        ticket_id: comment.ticket_id.clone().or_else(|| Some(ticket.id.clone())),
        body: comment.body.clone(),
        html_body: comment.html_body.clone(),
        created_by_id: comment.created_by_id.clone(),
        is_private: comment.is_private,
        source_created_at: comment.created_at,
        source_updated_at: comment.updated_at,
        created_at: comment.record_created_at.unwrap_or(now),
        updated_at: comment.record_updated_at.unwrap_or(now),
        raw_ref: serde_json::to_value(comment).ok(),
    }
}

/// Drives one incremental comment fetch per configured ticket and persists
/// the emitted batches. A failing ticket is logged and counted; the
/// remaining tickets still sync.
pub struct TicketCommentSyncer<R, B> {
    client: TicketingClient,
    tickets: Vec<TicketRef>,
    comment_repo: R,
    backend: Option<B>,
    cancel: CancellationToken,
}

impl<R, B> TicketCommentSyncer<R, B>
where
    R: CommentRepository,
    B: StateBackend + Clone + 'static,
{
    pub fn new(
        client: TicketingClient,
        tickets: Vec<TicketRef>,
        comment_repo: R,
        backend: Option<B>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            tickets,
            comment_repo,
            backend,
            cancel,
        }
    }
}

#[async_trait]
impl<R, B> Connector for TicketCommentSyncer<R, B>
where
    R: CommentRepository,
    B: StateBackend + Clone + 'static,
{
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    async fn sync(&self) -> Result<SyncResult, Box<dyn std::error::Error + Send + Sync>> {
        let table = comment_table();
        tracing::info!(
            source = self.source_name(),
            table = table.name,
            tickets = self.tickets.len(),
            "starting comment sync"
        );

        let account_id = self.client.config().integration_account_id.clone();
        let mut fetched = 0usize;
        let mut upserted = 0usize;
        let mut errors = 0usize;

        for ticket in &self.tickets {
            if self.cancel.is_cancelled() {
                tracing::info!("cancellation requested, stopping comment sync");
                break;
            }

            let (batch_tx, mut batch_rx) = mpsc::channel::<Vec<Comment>>(BATCH_CHANNEL_CAPACITY);
            let fetch_inner = CommentFetcher::new(self.client.clone(), self.backend.clone());
            let parent = SyncParent::Ticket(ticket.clone());
            let cancel = self.cancel.clone();

            let fetch = tokio::spawn(async move {
                fetch_inner.run(&parent, &batch_tx, &cancel).await
            });

            while let Some(batch) = batch_rx.recv().await {
                for comment in &batch {
                    let row = comment_to_row(&account_id, ticket, comment);
                    match self.comment_repo.upsert(&row).await {
                        Ok(()) => upserted += 1,
                        Err(e) => {
                            tracing::warn!(
                                comment_id = %comment.id,
                                ticket_id = %ticket.id,
                                error = %e,
                                "failed to upsert comment"
                            );
                            errors += 1;
                        }
                    }
                }
            }

            match fetch.await {
                Ok(Ok(count)) => {
                    fetched += count;
                    tracing::info!(ticket_id = %ticket.id, count, "ticket comments fetched");
                }
                Ok(Err(e)) => {
                    tracing::error!(ticket_id = %ticket.id, error = %e, "comment fetch failed");
                    errors += 1;
                }
                Err(e) => {
                    tracing::error!(ticket_id = %ticket.id, error = %e, "comment fetch task failed");
                    errors += 1;
                }
            }
        }

        let result = SyncResult {
            source: SOURCE_NAME.to_string(),
            fetched,
            upserted,
            errors,
        };
        tracing::info!(?result, "comment sync completed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticketing::client::TicketingClientConfig;
    use chrono::{DateTime, TimeZone};
    use std::sync::{Arc, Mutex};
    use stitch_common::error::{StitchError, StitchResult};
    use stitch_db::state::MemoryStateBackend;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // ── Mock comment repository ──────────────────────────────────

    #[derive(Clone, Default)]
    struct MockCommentRepo {
        rows: Arc<Mutex<Vec<CommentRow>>>,
        fail: bool,
    }

    impl MockCommentRepo {
        fn new() -> Self {
            Self::default()
        }

        fn failing() -> Self {
            Self {
                rows: Arc::new(Mutex::new(Vec::new())),
                fail: true,
            }
        }

        fn rows(&self) -> Vec<CommentRow> {
            self.rows.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommentRepository for MockCommentRepo {
        async fn upsert(&self, row: &CommentRow) -> StitchResult<()> {
            if self.fail {
                return Err(StitchError::Database("upsert failed".to_string()));
            }
            self.rows.lock().unwrap().push(row.clone());
            Ok(())
        }

        async fn get_by_key(
            &self,
            integration_account_id: &str,
            id: &str,
        ) -> StitchResult<Option<CommentRow>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.integration_account_id == integration_account_id && r.id == id)
                .cloned())
        }
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn test_config(base_url: &str, tickets: Vec<TicketRef>) -> TicketingClientConfig {
        TicketingClientConfig {
            base_url: base_url.to_string(),
            api_key: "key".to_string(),
            workspace_id: "ws-1".to_string(),
            integration_account_id: "acct-test".to_string(),
            start_date: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            tickets,
            max_retries: 0,
            timeout_secs: 5,
        }
    }

    fn ticket(id: &str) -> TicketRef {
        TicketRef {
            id: id.to_string(),
            collection_id: "eng".to_string(),
        }
    }

    fn make_comments(count: usize, offset: usize) -> Vec<serde_json::Value> {
        (0..count)
            .map(|i| {
                serde_json::json!({
                    "id": format!("cmt-{}", i + offset),
                    "body": format!("comment {}", i + offset),
                    "updated_at": "2026-03-02T11:30:00Z"
                })
            })
            .collect()
    }

    fn make_page(comments: Vec<serde_json::Value>, next_cursor: Option<&str>) -> serde_json::Value {
        match next_cursor {
            Some(cursor) => serde_json::json!({"data": comments, "meta": {"next_cursor": cursor}}),
            None => serde_json::json!({"data": comments}),
        }
    }

    fn syncer(
        server_uri: &str,
        tickets: Vec<TicketRef>,
        repo: MockCommentRepo,
        backend: Option<MemoryStateBackend>,
    ) -> TicketCommentSyncer<MockCommentRepo, MemoryStateBackend> {
        let client = TicketingClient::new(test_config(server_uri, tickets.clone())).unwrap();
        TicketCommentSyncer::new(client, tickets, repo, backend, CancellationToken::new())
    }

    // ── comment_to_row ───────────────────────────────────────────

    #[test]
    fn comment_to_row_maps_stamps_and_source_timestamps() {
        let stamped = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let source = Utc.with_ymd_and_hms(2026, 3, 2, 11, 30, 0).unwrap();
        let comment = Comment {
            id: "cmt-1".to_string(),
            ticket_id: Some("TICK-1".to_string()),
            body: Some("hello".to_string()),
            html_body: None,
            created_by_id: Some("user-1".to_string()),
            is_private: Some(false),
            created_at: Some(source),
            updated_at: Some(source),
            record_created_at: Some(stamped),
            record_updated_at: Some(stamped),
            integration_account_id: Some("acct-test".to_string()),
        };

        let row = comment_to_row("acct-fallback", &ticket("TICK-1"), &comment);

        assert_eq!(row.id, "cmt-1");
        assert_eq!(row.integration_account_id, "acct-test");
        assert_eq!(row.created_at, stamped);
        assert_eq!(row.updated_at, stamped);
        assert_eq!(row.source_created_at, Some(source));
        assert_eq!(row.source_updated_at, Some(source));
        assert!(row.raw_ref.is_some());
    }

    #[test]
    fn comment_to_row_falls_back_to_configured_account_and_parent_ticket() {
        let comment = Comment {
            id: "cmt-2".to_string(),
            ticket_id: None,
            body: None,
            html_body: None,
            created_by_id: None,
            is_private: None,
            created_at: None,
            updated_at: None,
            record_created_at: None,
            record_updated_at: None,
            integration_account_id: None,
        };

        let row = comment_to_row("acct-fallback", &ticket("TICK-7"), &comment);

        assert_eq!(row.integration_account_id, "acct-fallback");
        assert_eq!(row.ticket_id.as_deref(), Some("TICK-7"));
    }

    // ── Driver behavior ──────────────────────────────────────────

    #[tokio::test]
    async fn sync_upserts_all_comments_across_pages() {
        let server = MockServer::start().await;

        let page2 = make_page(make_comments(2, 5), None);
        Mock::given(method("GET"))
            .and(path("/eng/tickets/TICK-1/comments"))
            .and(query_param("cursor", "t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&page2))
            .mount(&server)
            .await;

        let page1 = make_page(make_comments(5, 0), Some("t1"));
        Mock::given(method("GET"))
            .and(path("/eng/tickets/TICK-1/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&page1))
            .mount(&server)
            .await;

        let repo = MockCommentRepo::new();
        let backend = MemoryStateBackend::new();
        let syncer = syncer(
            &server.uri(),
            vec![ticket("TICK-1")],
            repo.clone(),
            Some(backend.clone()),
        );

        let result = syncer.sync().await.expect("sync should succeed");

        assert_eq!(result.source, "ticketing_comments");
        assert_eq!(result.fetched, 7);
        assert_eq!(result.upserted, 7);
        assert_eq!(result.errors, 0);

        let rows = repo.rows();
        assert_eq!(rows.len(), 7);
        assert!(rows.iter().all(|r| r.integration_account_id == "acct-test"));

        // Watermark advanced and is parseable
        let stored = backend
            .get_key("ticketing-comment-ws-1-acct-test-TICK-1")
            .await
            .expect("get should work")
            .expect("watermark should be stored");
        DateTime::parse_from_rfc3339(&stored).expect("watermark should be RFC 3339");
    }

    #[tokio::test]
    async fn failed_ticket_does_not_block_others() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/eng/tickets/BAD-1/comments"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let page = make_page(make_comments(3, 0), None);
        Mock::given(method("GET"))
            .and(path("/eng/tickets/GOOD-1/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&page))
            .mount(&server)
            .await;

        let repo = MockCommentRepo::new();
        let syncer = syncer(
            &server.uri(),
            vec![ticket("BAD-1"), ticket("GOOD-1")],
            repo.clone(),
            Some(MemoryStateBackend::new()),
        );

        let result = syncer.sync().await.expect("sync should succeed");

        assert_eq!(result.errors, 1);
        assert_eq!(result.upserted, 3);
        assert_eq!(repo.rows().len(), 3);
    }

    #[tokio::test]
    async fn upsert_failures_are_counted_not_fatal() {
        let server = MockServer::start().await;

        let page = make_page(make_comments(2, 0), None);
        Mock::given(method("GET"))
            .and(path("/eng/tickets/TICK-1/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&page))
            .mount(&server)
            .await;

        let repo = MockCommentRepo::failing();
        let syncer = syncer(
            &server.uri(),
            vec![ticket("TICK-1")],
            repo,
            Some(MemoryStateBackend::new()),
        );

        let result = syncer.sync().await.expect("sync should succeed");

        assert_eq!(result.fetched, 2);
        assert_eq!(result.upserted, 0);
        assert_eq!(result.errors, 2);
    }

    #[tokio::test]
    async fn cancelled_syncer_skips_remaining_tickets() {
        let repo = MockCommentRepo::new();
        let client =
            TicketingClient::new(test_config("http://127.0.0.1:9", vec![ticket("TICK-1")]))
                .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let syncer: TicketCommentSyncer<MockCommentRepo, MemoryStateBackend> =
            TicketCommentSyncer::new(client, vec![ticket("TICK-1")], repo.clone(), None, cancel);

        let result = syncer.sync().await.expect("sync should succeed");

        assert_eq!(result.fetched, 0);
        assert_eq!(result.upserted, 0);
        assert!(repo.rows().is_empty());
    }
}
