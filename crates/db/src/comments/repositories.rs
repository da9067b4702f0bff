use async_trait::async_trait;

use crate::comments::models::CommentRow;
use stitch_common::error::StitchResult;

#[async_trait]
pub trait CommentRepository: Send + Sync {
    /// Insert or update a comment row, idempotent on `(id, integration_account_id)`.
    async fn upsert(&self, row: &CommentRow) -> StitchResult<()>;

    /// Fetch a comment by its composite key.
    async fn get_by_key(
        &self,
        integration_account_id: &str,
        id: &str,
    ) -> StitchResult<Option<CommentRow>>;
}
