//! Repository for finished records.
//!
//! Records are stored as JSON payloads. Every insert is keyed by the record's
//! commit key, so replaying the same commit returns the row written first
//! instead of creating a second one.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use slotflow_core::error::SlotflowError;

use crate::db::Database;

const SELECT_COLUMNS: &str =
    "SELECT id, commit_key, user_id, domain, payload, summary, created_at FROM records";

/// A record about to be written.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub commit_key: Uuid,
    pub user_id: String,
    pub domain: String,
    pub payload: serde_json::Value,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// A record as read back from the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: Uuid,
    pub commit_key: Uuid,
    pub user_id: String,
    pub domain: String,
    pub payload: serde_json::Value,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// Result of [`RecordRepository::insert_once`].
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    pub record: StoredRecord,
    /// `false` when a row with the same commit key already existed.
    pub created: bool,
}

/// Filters for listing a user's records.
#[derive(Debug, Clone)]
pub struct RecordQuery {
    pub user_id: String,
    pub domain: Option<String>,
    /// Case-insensitive equality on a top-level payload field.
    pub field_equals: Option<(String, String)>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: u32,
    pub newest_first: bool,
}

impl RecordQuery {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            domain: None,
            field_equals: None,
            since: None,
            until: None,
            limit: 50,
            newest_first: true,
        }
    }
}

/// SQLite-backed record repository.
pub struct RecordRepository {
    db: Arc<Database>,
}

impl RecordRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a record unless its commit key was already stored.
    pub fn insert_once(&self, record: &NewRecord) -> Result<InsertOutcome, SlotflowError> {
        if record.user_id.trim().is_empty() {
            return Err(SlotflowError::Constraint("user_id must not be empty".to_string()));
        }
        if !record.payload.is_object() {
            return Err(SlotflowError::Constraint(
                "payload must be a JSON object".to_string(),
            ));
        }
        let payload = serde_json::to_string(&record.payload)?;

        self.db.with_conn(|conn| {
            let inserted = conn
                .execute(
                    "INSERT INTO records (id, commit_key, user_id, domain, payload, summary, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(commit_key) DO NOTHING",
                    rusqlite::params![
                        Uuid::new_v4().to_string(),
                        record.commit_key.to_string(),
                        record.user_id,
                        record.domain,
                        payload,
                        record.summary,
                        record.created_at.timestamp(),
                    ],
                )
                .map_err(map_write_error)?;

            let stored = conn
                .query_row(
                    &format!("{} WHERE commit_key = ?1", SELECT_COLUMNS),
                    rusqlite::params![record.commit_key.to_string()],
                    |row| Ok(row_to_record(row)),
                )
                .map_err(|e| SlotflowError::Storage(e.to_string()))??;

            if inserted == 0 {
                debug!(commit_key = %record.commit_key, "Commit key already stored");
            } else {
                info!(record_id = %stored.id, domain = %stored.domain, "Record stored");
            }
            Ok(InsertOutcome {
                record: stored,
                created: inserted > 0,
            })
        })
    }

    /// Find a record by ID.
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<StoredRecord>, SlotflowError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                    rusqlite::params![id.to_string()],
                    |row| Ok(row_to_record(row)),
                )
                .optional()
                .map_err(|e| SlotflowError::Storage(e.to_string()))?;

            match result {
                Some(record) => Ok(Some(record?)),
                None => Ok(None),
            }
        })
    }

    /// List a user's records matching the query filters.
    pub fn query(&self, query: &RecordQuery) -> Result<Vec<StoredRecord>, SlotflowError> {
        let mut sql = format!("{} WHERE user_id = ?1", SELECT_COLUMNS);
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(query.user_id.clone())];

        if let Some(domain) = &query.domain {
            params.push(Box::new(domain.clone()));
            sql.push_str(&format!(" AND domain = ?{}", params.len()));
        }
        if let Some((field, value)) = &query.field_equals {
            if !is_plain_field(field) {
                return Err(SlotflowError::Constraint(format!(
                    "invalid field name: {}",
                    field
                )));
            }
            params.push(Box::new(format!("$.{}", field)));
            let path_idx = params.len();
            params.push(Box::new(value.clone()));
            sql.push_str(&format!(
                " AND lower(CAST(json_extract(payload, ?{}) AS TEXT)) = lower(?{})",
                path_idx,
                params.len()
            ));
        }
        if let Some(since) = query.since {
            params.push(Box::new(since.timestamp()));
            sql.push_str(&format!(" AND created_at >= ?{}", params.len()));
        }
        if let Some(until) = query.until {
            params.push(Box::new(until.timestamp()));
            sql.push_str(&format!(" AND created_at <= ?{}", params.len()));
        }
        let order = if query.newest_first { "DESC" } else { "ASC" };
        params.push(Box::new(query.limit as i64));
        sql.push_str(&format!(
            " ORDER BY created_at {}, rowid {} LIMIT ?{}",
            order,
            order,
            params.len()
        ));

        self.db.with_conn(|conn| {
            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| SlotflowError::Storage(format!("Record query prepare: {}", e)))?;

            let rows = stmt
                .query_map(params_refs.as_slice(), |row| Ok(row_to_record(row)))
                .map_err(|e| SlotflowError::Storage(format!("Record query: {}", e)))?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(|e| SlotflowError::Storage(e.to_string()))??);
            }
            Ok(records)
        })
    }

    /// Most recent record of a domain for a user.
    pub fn latest(
        &self,
        user_id: &str,
        domain: &str,
    ) -> Result<Option<StoredRecord>, SlotflowError> {
        let mut query = RecordQuery::for_user(user_id);
        query.domain = Some(domain.to_string());
        query.limit = 1;
        Ok(self.query(&query)?.into_iter().next())
    }

    /// Replace the payload and summary of a record owned by `user_id`.
    ///
    /// Returns `None` when no such record belongs to the user.
    pub fn update(
        &self,
        id: Uuid,
        user_id: &str,
        payload: &serde_json::Value,
        summary: &str,
    ) -> Result<Option<StoredRecord>, SlotflowError> {
        if !payload.is_object() {
            return Err(SlotflowError::Constraint(
                "payload must be a JSON object".to_string(),
            ));
        }
        let payload = serde_json::to_string(payload)?;
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE records SET payload = ?1, summary = ?2 WHERE id = ?3 AND user_id = ?4",
                rusqlite::params![payload, summary, id.to_string(), user_id],
            )
            .map_err(map_write_error)
        })?;

        if changed == 0 {
            return Ok(None);
        }
        self.find_by_id(id)
    }

    /// Delete a record owned by `user_id`. Returns whether a row was removed.
    pub fn delete(&self, id: Uuid, user_id: &str) -> Result<bool, SlotflowError> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM records WHERE id = ?1 AND user_id = ?2",
                    rusqlite::params![id.to_string(), user_id],
                )
                .map_err(|e| SlotflowError::Storage(format!("Failed to delete record: {}", e)))?;
            Ok(removed > 0)
        })
    }

    /// Count a user's records.
    pub fn count(&self, user_id: &str) -> Result<u64, SlotflowError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM records WHERE user_id = ?1",
                    rusqlite::params![user_id],
                    |row| row.get(0),
                )
                .map_err(|e| SlotflowError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

fn map_write_error(err: rusqlite::Error) -> SlotflowError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => SlotflowError::Constraint(err.to_string()),
        _ => SlotflowError::Storage(format!("Failed to write record: {}", err)),
    }
}

fn is_plain_field(field: &str) -> bool {
    !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<StoredRecord, SlotflowError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| SlotflowError::Storage(e.to_string()))?;
    let key_str: String = row
        .get(1)
        .map_err(|e| SlotflowError::Storage(e.to_string()))?;
    let user_id: String = row
        .get(2)
        .map_err(|e| SlotflowError::Storage(e.to_string()))?;
    let domain: String = row
        .get(3)
        .map_err(|e| SlotflowError::Storage(e.to_string()))?;
    let payload_str: String = row
        .get(4)
        .map_err(|e| SlotflowError::Storage(e.to_string()))?;
    let summary: String = row
        .get(5)
        .map_err(|e| SlotflowError::Storage(e.to_string()))?;
    let created_at: i64 = row
        .get(6)
        .map_err(|e| SlotflowError::Storage(e.to_string()))?;

    Ok(StoredRecord {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| SlotflowError::Storage(format!("Invalid UUID: {}", e)))?,
        commit_key: Uuid::parse_str(&key_str)
            .map_err(|e| SlotflowError::Storage(format!("Invalid UUID: {}", e)))?,
        user_id,
        domain,
        payload: serde_json::from_str(&payload_str)?,
        summary,
        created_at: Utc
            .timestamp_opt(created_at, 0)
            .single()
            .unwrap_or_default(),
    })
}
