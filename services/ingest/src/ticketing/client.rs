use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::models::{CommentPage, TicketRef};

/// Page size requested from the comments endpoint.
pub const COMMENT_PAGE_LIMIT: u32 = 5;

#[derive(Debug, Clone)]
pub struct TicketingClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub workspace_id: String,
    pub integration_account_id: String,
    pub start_date: DateTime<Utc>,
    pub tickets: Vec<TicketRef>,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl TicketingClientConfig {
    /// Load ticketing config from environment.
    ///
    /// Returns `Ok(None)` if the connector is not configured (base URL / API
    /// key missing). Returns `Err` if credentials ARE set but the workspace,
    /// account or ticket list is missing or malformed (fail-fast on
    /// misconfiguration).
    pub fn from_env() -> Result<Option<Self>, String> {
        let base_url = match std::env::var("TICKETING_BASE_URL").ok() {
            Some(v) => v,
            None => return Ok(None),
        };
        let api_key = match std::env::var("TICKETING_API_KEY").ok() {
            Some(v) => v,
            None => return Ok(None),
        };

        // The connector IS configured — identifiers are now mandatory
        let workspace_id = require_var("TICKETING_WORKSPACE_ID")?;
        let integration_account_id = require_var("TICKETING_ACCOUNT_ID")?;
        let tickets = parse_ticket_refs("TICKETING_TICKETS")?;

        let start_date = match std::env::var("TICKETING_START_DATE").ok() {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| format!("TICKETING_START_DATE is not valid RFC 3339: {e}"))?,
            None => DateTime::UNIX_EPOCH,
        };

        let max_retries = std::env::var("TICKETING_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);
        let timeout_secs = std::env::var("TICKETING_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Ok(Some(Self {
            base_url,
            api_key,
            workspace_id,
            integration_account_id,
            start_date,
            tickets,
            max_retries,
            timeout_secs,
        }))
    }
}

fn require_var(key: &str) -> Result<String, String> {
    let value = std::env::var(key)
        .map_err(|_| format!("{key} is required when ticketing credentials are set, but not found"))?;
    if value.trim().is_empty() {
        return Err(format!("{key} is set but empty"));
    }
    Ok(value)
}

/// Parse a comma-separated list of `collection_id/ticket_id` pairs from an
/// env var.
pub fn parse_ticket_refs(env_key: &str) -> Result<Vec<TicketRef>, String> {
    let raw = std::env::var(env_key)
        .map_err(|_| format!("{env_key} is required when ticketing credentials are set, but not found"))?;

    let mut refs = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let parsed = entry.split_once('/').and_then(|(collection_id, ticket_id)| {
            let collection_id = collection_id.trim();
            let ticket_id = ticket_id.trim();
            (!collection_id.is_empty() && !ticket_id.is_empty()).then(|| TicketRef {
                id: ticket_id.to_string(),
                collection_id: collection_id.to_string(),
            })
        });
        match parsed {
            Some(ticket) => refs.push(ticket),
            None => {
                return Err(format!(
                    "{env_key} entry {entry:?} is not in collection_id/ticket_id form"
                ))
            }
        }
    }

    if refs.is_empty() {
        return Err(format!(
            "{env_key} is set but contains no valid ticket references"
        ));
    }

    Ok(refs)
}

/// Query parameters for one comments-page request. The `cursor` field carries
/// the opaque continuation token between pages; everything else stays fixed
/// for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentQuery {
    pub since: String,
    pub raw: bool,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl CommentQuery {
    pub fn new(floor: DateTime<Utc>) -> Self {
        Self {
            since: floor.to_rfc3339_opts(SecondsFormat::Secs, true),
            raw: true,
            limit: COMMENT_PAGE_LIMIT,
            cursor: None,
        }
    }

    fn with_cursor(&self, cursor: &str) -> Self {
        let mut next = self.clone();
        next.cursor = Some(cursor.to_string());
        next
    }
}

#[derive(Clone)]
pub struct TicketingClient {
    client: Client,
    config: TicketingClientConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum TicketingClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl TicketingClient {
    pub fn new(config: TicketingClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TicketingClientConfig {
        &self.config
    }

    /// For testing: create a client pointing at a specific base URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    /// Fetch one page of comments, retrying transient errors.
    ///
    /// Returns the page plus the query for the next one; `None` means
    /// pagination is complete. An absent or empty continuation token always
    /// ends pagination, even when the page carried records.
    pub async fn fetch_comment_page(
        &self,
        path: &str,
        query: &CommentQuery,
    ) -> Result<(CommentPage, Option<CommentQuery>), TicketingClientError> {
        let url = format!("{}{}", self.config.base_url, path);
        let page: CommentPage = self.request_with_retry(&url, query).await?;

        let next = page
            .meta
            .as_ref()
            .and_then(|m| m.next_cursor.as_deref())
            .filter(|c| !c.is_empty())
            .map(|c| query.with_cursor(c));

        Ok((page, next))
    }

    async fn request_with_retry(
        &self,
        url: &str,
        query: &CommentQuery,
    ) -> Result<CommentPage, TicketingClientError> {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff_secs = std::cmp::min(1u64 << attempt, 30);
                tracing::warn!(attempt, backoff_secs, "retrying after backoff");
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }

            let response = match self
                .client
                .get(url)
                .bearer_auth(&self.config.api_key)
                .query(query)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(TicketingClientError::RequestError(e));
                }
            };

            let status = response.status();

            if status.is_success() {
                return response
                    .json::<CommentPage>()
                    .await
                    .map_err(TicketingClientError::RequestError);
            }

            // Honor Retry-After header for 429
            if status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    let wait = std::cmp::min(retry_after, 60);
                    tracing::warn!(wait, "rate-limited, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                last_error = "429 Too Many Requests".to_string();
                continue;
            }

            // Retry on 5xx
            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                continue;
            }

            // Fail fast on 4xx (except 429 handled above)
            let body = response.text().await.unwrap_or_default();
            return Err(TicketingClientError::HttpError { status, body });
        }

        Err(TicketingClientError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}
