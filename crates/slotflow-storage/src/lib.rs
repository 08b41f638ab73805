//! Slotflow Storage crate - SQLite persistence for finished records.
//!
//! Provides a WAL-mode SQLite database with versioned migrations and a
//! repository that stores each finished record exactly once per commit key.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{InsertOutcome, NewRecord, RecordQuery, RecordRepository, StoredRecord};
