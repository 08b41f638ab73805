//! Conversations saved through the SQLite gateway survive a reopen.

use std::sync::Arc;

use slotflow_core::config::SlotflowConfig;
use slotflow_engine::{
    ConversationEngine, DomainRegistry, RuleExtractor, SqliteGateway, TurnInput, TurnOutcome,
};
use slotflow_storage::db::Database;
use slotflow_storage::repository::{RecordQuery, RecordRepository};

fn repository_at(path: &std::path::Path) -> Arc<RecordRepository> {
    let db = Arc::new(Database::new(path).unwrap());
    Arc::new(RecordRepository::new(db))
}

#[tokio::test]
async fn test_committed_workout_is_queryable_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slotflow.db");

    {
        let config = SlotflowConfig::default();
        let engine = ConversationEngine::new(
            &config,
            DomainRegistry::with_defaults(&config),
            Arc::new(RuleExtractor::new()),
            Arc::new(SqliteGateway::new(repository_at(&path))),
        );
        for text in ["bench press 3 sets of 10 at 135 lbs", "yes"] {
            let outcome = engine
                .handle_turn(TurnInput::new("s-1", "user-1", text))
                .await
                .unwrap();
            if text == "yes" {
                assert!(matches!(outcome, TurnOutcome::Committed { .. }), "{:?}", outcome);
            }
        }
    }

    let repository = repository_at(&path);
    let mut query = RecordQuery::for_user("user-1");
    query.domain = Some("workout".to_string());
    query.field_equals = Some(("movement".to_string(), "Bench Press".to_string()));
    let records = repository.query(&query).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload["reps"], 10);
    assert_eq!(records[0].payload["sets"], 3);
    assert_eq!(records[0].summary, "bench press, 3 sets of 10 reps at 135 lbs");
    assert_eq!(repository.count("user-2").unwrap(), 0);
}
