use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::state::backend::StateBackend;
use stitch_common::error::{StitchError, StitchResult};

/// In-memory state backend for tests and database-less local runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateBackend {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn get_key(&self, key: &str) -> StitchResult<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StitchError::Internal("state lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set_key(&self, key: &str, value: &str) -> StitchResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StitchError::Internal("state lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn flush(&self) -> StitchResult<()> {
        Ok(())
    }
}
