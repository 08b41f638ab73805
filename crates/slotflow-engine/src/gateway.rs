//! Persistence gateway: where finished records go.
//!
//! Gateways store a record's `commit_key` at most once. Saving the same
//! finished record again returns the existing entry, which is what makes a
//! retry after a timed-out write safe.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use slotflow_core::error::SlotflowError;
use slotflow_core::types::{RecordId, UserId};
use slotflow_storage::{NewRecord, RecordRepository};

use crate::error::GatewayError;
use crate::slots::FinishedRecord;

/// Acknowledgement of a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedRecord {
    pub id: RecordId,
    /// The commit key was already stored; nothing new was written.
    pub duplicate: bool,
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn save(
        &self,
        user_id: &UserId,
        record: &FinishedRecord,
    ) -> Result<SavedRecord, GatewayError>;
}

// =============================================================================
// In-memory
// =============================================================================

/// A stored entry of the in-memory gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub id: RecordId,
    pub user_id: UserId,
    pub record: FinishedRecord,
}

/// Process-local gateway for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    entries: Mutex<Vec<StoredEntry>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<StoredEntry> {
        self.lock().clone()
    }

    pub fn records(&self) -> Vec<FinishedRecord> {
        self.lock().iter().map(|e| e.record.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StoredEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Synchronous insert-once, shared with wrappers that add latency.
    pub fn store(
        &self,
        user_id: &UserId,
        record: &FinishedRecord,
    ) -> Result<SavedRecord, GatewayError> {
        if user_id.as_str().trim().is_empty() {
            return Err(GatewayError::Validation {
                slot: None,
                reason: "user_id must not be empty".to_string(),
            });
        }
        if record.fields.is_empty() {
            return Err(GatewayError::Validation {
                slot: None,
                reason: "record has no fields".to_string(),
            });
        }

        let mut entries = self.lock();
        if let Some(existing) = entries
            .iter()
            .find(|e| e.record.commit_key == record.commit_key)
        {
            debug!(commit_key = %record.commit_key, "Commit key already stored");
            return Ok(SavedRecord {
                id: existing.id,
                duplicate: true,
            });
        }

        let id = RecordId::new();
        entries.push(StoredEntry {
            id,
            user_id: user_id.clone(),
            record: record.clone(),
        });
        Ok(SavedRecord {
            id,
            duplicate: false,
        })
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn save(
        &self,
        user_id: &UserId,
        record: &FinishedRecord,
    ) -> Result<SavedRecord, GatewayError> {
        self.store(user_id, record)
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// Gateway over the SQLite record repository. Blocking database calls run
/// on the blocking thread pool.
pub struct SqliteGateway {
    repository: Arc<RecordRepository>,
}

impl SqliteGateway {
    pub fn new(repository: Arc<RecordRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn save(
        &self,
        user_id: &UserId,
        record: &FinishedRecord,
    ) -> Result<SavedRecord, GatewayError> {
        let new_record = NewRecord {
            commit_key: record.commit_key,
            user_id: user_id.to_string(),
            domain: record.domain.to_string(),
            payload: record.payload(),
            summary: record.summary.clone(),
            created_at: record.completed_at,
        };
        let repository = Arc::clone(&self.repository);

        let outcome = tokio::task::spawn_blocking(move || repository.insert_once(&new_record))
            .await
            .map_err(|e| GatewayError::Transient(format!("save task failed: {}", e)))?
            .map_err(|e| match e {
                SlotflowError::Constraint(reason) => GatewayError::Validation { slot: None, reason },
                other => GatewayError::Transient(other.to_string()),
            })?;

        Ok(SavedRecord {
            id: RecordId(outcome.record.id),
            duplicate: !outcome.created,
        })
    }
}
