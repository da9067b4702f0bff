use async_trait::async_trait;

use stitch_common::error::StitchResult;

/// Durable key/value store for sync watermarks.
///
/// Writes may be buffered; `flush` makes every prior `set_key` durable.
/// A watermark is only trusted once its flush has returned.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Read the stored value for `key`, `None` if never written.
    async fn get_key(&self, key: &str) -> StitchResult<Option<String>>;

    /// Stage `value` under `key`. Durable only after the next `flush`.
    async fn set_key(&self, key: &str, value: &str) -> StitchResult<()>;

    /// Persist all staged writes.
    async fn flush(&self) -> StitchResult<()>;
}
