mod connector;
mod ticketing;

use tokio_util::sync::CancellationToken;

use stitch_config::{init_tracing, AppConfig};
use stitch_db::comments::PgCommentRepository;
use stitch_db::state::PgStateBackend;

use crate::connector::Connector;
use crate::ticketing::client::{TicketingClient, TicketingClientConfig};
use crate::ticketing::sync::TicketCommentSyncer;

#[tokio::main]
async fn main() {
    init_tracing("info");

    let config = AppConfig::from_env().expect("failed to load config");
    tracing::info!(service = "stitch-ingest", "starting");

    let pool = stitch_db::create_pool(&config.database_url)
        .await
        .expect("failed to connect to database");

    stitch_db::comments::pg_repository::ensure_schema(&pool)
        .await
        .expect("failed to create comments table");
    stitch_db::state::pg_backend::ensure_schema(&pool)
        .await
        .expect("failed to create sync state table");

    // Ticketing connector (optional — only runs if TICKETING env vars are set)
    // Fails fast if credentials are present but the workspace/account/ticket
    // configuration is missing or malformed
    match TicketingClientConfig::from_env() {
        Ok(Some(ticketing_config)) => {
            tracing::info!(
                workspace_id = %ticketing_config.workspace_id,
                tickets = ticketing_config.tickets.len(),
                start_date = %ticketing_config.start_date.to_rfc3339(),
                "ticketing connector configured, starting comment sync"
            );

            let tickets = ticketing_config.tickets.clone();
            let client =
                TicketingClient::new(ticketing_config).expect("failed to create ticketing client");
            let comment_repo = PgCommentRepository::new(pool.clone());
            let backend = PgStateBackend::new(pool.clone());

            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("ctrl-c received, cancelling sync");
                        cancel.cancel();
                    }
                });
            }

            let syncer =
                TicketCommentSyncer::new(client, tickets, comment_repo, Some(backend), cancel);

            match syncer.sync().await {
                Ok(result) => {
                    tracing::info!(
                        source = result.source,
                        fetched = result.fetched,
                        upserted = result.upserted,
                        errors = result.errors,
                        "comment sync completed"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "comment sync failed");
                }
            }
        }
        Ok(None) => {
            tracing::info!("no ticketing credentials found, skipping comment sync");
        }
        Err(e) => {
            panic!("ticketing configuration error (fail-fast): {e}");
        }
    }

    tracing::info!("ingest service finished");
}
