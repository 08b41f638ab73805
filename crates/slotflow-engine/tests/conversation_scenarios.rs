//! End-to-end conversations through `ConversationEngine`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use slotflow_core::config::SlotflowConfig;
use slotflow_core::types::{DomainId, SessionId, UserId};
use slotflow_engine::{
    ConversationEngine, DomainRegistry, EngineError, Extraction, ExtractionError,
    ExtractionRequest, FinishedRecord, FlowStage, GatewayError, InMemoryGateway,
    PersistenceGateway, RuleExtractor, SavedRecord, SlotExtractor, SlotStatus, SlotValue,
    TurnInput, TurnOutcome,
};

const SESSION: &str = "session-1";
const USER: &str = "user-1";

// =============================================================================
// Fakes
// =============================================================================

/// Saves land, but the first acknowledgement arrives after the engine has
/// given up waiting.
struct SlowOnce {
    inner: InMemoryGateway,
    delay: Duration,
    slowed: AtomicBool,
    calls: AtomicU32,
}

impl SlowOnce {
    fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryGateway::new(),
            delay,
            slowed: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl PersistenceGateway for SlowOnce {
    async fn save(
        &self,
        user_id: &UserId,
        record: &FinishedRecord,
    ) -> Result<SavedRecord, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let saved = self.inner.store(user_id, record)?;
        if !self.slowed.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
        }
        Ok(saved)
    }
}

/// Rejects the first save as invalid for one slot.
struct RejectOnce {
    inner: InMemoryGateway,
    slot: String,
    rejected: AtomicBool,
}

impl RejectOnce {
    fn new(slot: &str) -> Self {
        Self {
            inner: InMemoryGateway::new(),
            slot: slot.to_string(),
            rejected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PersistenceGateway for RejectOnce {
    async fn save(
        &self,
        user_id: &UserId,
        record: &FinishedRecord,
    ) -> Result<SavedRecord, GatewayError> {
        if !self.rejected.swap(true, Ordering::SeqCst) {
            return Err(GatewayError::Validation {
                slot: Some(self.slot.clone()),
                reason: "value exceeds the recorded max".to_string(),
            });
        }
        self.inner.store(user_id, record)
    }
}

/// Stores every record and counts those missing a required slot.
#[derive(Default)]
struct Auditing {
    inner: InMemoryGateway,
    incomplete: AtomicU32,
}

#[async_trait]
impl PersistenceGateway for Auditing {
    async fn save(
        &self,
        user_id: &UserId,
        record: &FinishedRecord,
    ) -> Result<SavedRecord, GatewayError> {
        let required: &[&str] = match record.domain.as_str() {
            "workout" => &["movement", "reps", "weight"],
            _ => &["metric", "value"],
        };
        if required.iter().any(|slot| record.field(slot).is_none()) {
            self.incomplete.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.store(user_id, record)
    }
}

/// Delegates to the rule extractor until switched off.
struct Switchable {
    rules: RuleExtractor,
    down: AtomicBool,
}

#[async_trait]
impl SlotExtractor for Switchable {
    async fn extract(
        &self,
        request: &ExtractionRequest<'_>,
    ) -> Result<Extraction, ExtractionError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ExtractionError::Transient("upstream unavailable".to_string()));
        }
        Ok(self.rules.extract_values(request))
    }

    fn name(&self) -> &str {
        "switchable"
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn engine_with(
    config: &SlotflowConfig,
    extractor: Arc<dyn SlotExtractor>,
    gateway: Arc<dyn PersistenceGateway>,
) -> ConversationEngine {
    ConversationEngine::new(
        config,
        DomainRegistry::with_defaults(config),
        extractor,
        gateway,
    )
}

fn engine(gateway: Arc<dyn PersistenceGateway>) -> ConversationEngine {
    engine_with(
        &SlotflowConfig::default(),
        Arc::new(RuleExtractor::new()),
        gateway,
    )
}

async fn say(engine: &ConversationEngine, text: &str) -> TurnOutcome {
    engine
        .handle_turn(TurnInput::new(SESSION, USER, text))
        .await
        .unwrap()
}

async fn slot_status(engine: &ConversationEngine, slot: &str) -> Option<SlotStatus> {
    let snapshot = engine
        .snapshot(&SessionId::from(SESSION), &UserId::from(USER))
        .await
        .unwrap();
    snapshot
        .slots
        .iter()
        .find(|s| s.name == slot)
        .map(|s| s.status)
}

async fn stage(engine: &ConversationEngine) -> Option<FlowStage> {
    engine
        .snapshot(&SessionId::from(SESSION), &UserId::from(USER))
        .await
        .unwrap()
        .stage
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_movement_first_prompts_for_reps() {
    let engine = engine(Arc::new(InMemoryGateway::new()));

    let outcome = say(&engine, "I did bench press").await;

    assert_eq!(outcome.asked_slot(), Some("reps"));
    assert_eq!(outcome.domain(), Some(&DomainId::from("workout")));
    assert_eq!(slot_status(&engine, "movement").await, Some(SlotStatus::Tentative));
    assert_eq!(slot_status(&engine, "reps").await, Some(SlotStatus::Unfilled));
}

#[tokio::test]
async fn test_numbers_first_prompts_for_movement() {
    let engine = engine(Arc::new(InMemoryGateway::new()));

    let outcome = say(&engine, "3 sets of 10 at 135 lbs").await;

    assert_eq!(outcome.asked_slot(), Some("movement"));
    assert_eq!(outcome.text(), "What exercise did you do?");
    assert_eq!(slot_status(&engine, "reps").await, Some(SlotStatus::Tentative));
    assert_eq!(slot_status(&engine, "weight").await, Some(SlotStatus::Tentative));
    assert_eq!(slot_status(&engine, "movement").await, Some(SlotStatus::Unfilled));
}

#[tokio::test]
async fn test_confirm_then_commit_clears_domain() {
    let gateway = Arc::new(InMemoryGateway::new());
    let engine = engine(gateway.clone());

    say(&engine, "3 sets of 10 at 135 lbs").await;
    let outcome = say(&engine, "bench press").await;
    match &outcome {
        TurnOutcome::Confirm { summary, .. } => {
            assert_eq!(summary, "bench press, 3 sets of 10 reps at 135 lbs")
        }
        other => panic!("expected confirmation, got {:?}", other),
    }

    let outcome = say(&engine, "yes").await;
    match &outcome {
        TurnOutcome::Committed { record, text, .. } => {
            assert_eq!(text, "Workout saved! bench press: 3x10 @ 135 lbs");
            assert_eq!(record.field("reps"), Some(&SlotValue::Integer(10)));
            assert_eq!(
                record.field("weight"),
                Some(&SlotValue::quantity(135.0, "lbs"))
            );
        }
        other => panic!("expected commit, got {:?}", other),
    }

    let snapshot = engine
        .snapshot(&SessionId::from(SESSION), &UserId::from(USER))
        .await
        .unwrap();
    assert_eq!(snapshot.active_domain, None);
    assert!(snapshot.slots.is_empty());
    assert_eq!(gateway.count(), 1);
}

#[tokio::test]
async fn test_denial_naming_value_recollects_weight() {
    let engine = engine(Arc::new(InMemoryGateway::new()));

    say(&engine, "bench press 10 reps at 135 lbs").await;
    assert_eq!(stage(&engine).await, Some(FlowStage::Confirming));

    let outcome = say(&engine, "no, it was 145 not 135").await;

    assert_eq!(stage(&engine).await, Some(FlowStage::Collecting));
    assert_eq!(outcome.asked_slot(), Some("weight"));
    assert_eq!(slot_status(&engine, "weight").await, Some(SlotStatus::Unfilled));
    assert_eq!(slot_status(&engine, "reps").await, Some(SlotStatus::Tentative));
    assert_eq!(slot_status(&engine, "movement").await, Some(SlotStatus::Tentative));

    let outcome = say(&engine, "145").await;
    assert!(outcome.text().contains("at 145 lbs"), "{}", outcome.text());
}

#[tokio::test]
async fn test_commit_timeout_then_retry_persists_once() {
    let mut config = SlotflowConfig::default();
    config.persistence.timeout_ms = 50;
    let gateway = Arc::new(SlowOnce::new(Duration::from_millis(500)));
    let engine = engine_with(&config, Arc::new(RuleExtractor::new()), gateway.clone());

    say(&engine, "squat 5 reps at 225 lbs").await;
    let outcome = say(&engine, "yes").await;

    let retained = match outcome {
        TurnOutcome::CommitFailed {
            retryable: true,
            record,
            ..
        } => record,
        other => panic!("expected retryable failure, got {:?}", other),
    };
    assert_eq!(stage(&engine).await, Some(FlowStage::Committing));

    let outcome = engine
        .retry_commit(&SessionId::from(SESSION), &UserId::from(USER))
        .await
        .unwrap();
    match outcome {
        TurnOutcome::Committed { record, .. } => {
            assert_eq!(record.commit_key, retained.commit_key)
        }
        other => panic!("expected commit, got {:?}", other),
    }

    assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
    assert_eq!(gateway.inner.count(), 1);
    assert_eq!(stage(&engine).await, None);
}

#[tokio::test]
async fn test_denial_then_restated_values_returns_to_summary() {
    let gateway = Arc::new(InMemoryGateway::new());
    let engine = engine(gateway.clone());

    say(&engine, "bench press 10 reps at 135 lbs").await;
    let outcome = say(&engine, "no").await;
    assert_eq!(outcome.text(), "No problem. What should I change?");

    let outcome = say(&engine, "bench press 10 reps at 135 lbs").await;
    assert_eq!(stage(&engine).await, Some(FlowStage::Confirming));
    assert_eq!(
        outcome.text(),
        "Let me confirm: bench press, 10 reps at 135 lbs. Is that right?"
    );

    let outcome = say(&engine, "yes").await;
    assert!(matches!(outcome, TurnOutcome::Committed { .. }));
    assert_eq!(gateway.count(), 1);
}

#[tokio::test]
async fn test_pronoun_after_did_keeps_movement() {
    let engine = engine(Arc::new(InMemoryGateway::new()));

    say(&engine, "I did bench press").await;
    let outcome = say(&engine, "I did it for 10 reps").await;
    assert_eq!(outcome.asked_slot(), Some("weight"));
    assert_eq!(slot_status(&engine, "reps").await, Some(SlotStatus::Tentative));

    let outcome = say(&engine, "I did that at 135 lbs").await;
    assert_eq!(stage(&engine).await, Some(FlowStage::Confirming));
    assert_eq!(
        outcome.text(),
        "Let me confirm: bench press, 10 reps at 135 lbs. Is that right?"
    );
}

// =============================================================================
// Properties
// =============================================================================

#[tokio::test]
async fn test_no_incomplete_record_reaches_gateway() {
    let gateway = Arc::new(Auditing::default());
    let engine = engine(gateway.clone());

    let script = [
        "I did bench press",
        "yes",
        "10",
        "no",
        "never mind",
        "I did deadlift",
        "8 reps",
        "yes",
        "at 315",
        "actually it was 6 reps",
        "no, the reps are wrong",
        "6",
        "yes",
        "I weighed in",
        "yes",
        "182 lbs",
        "yes",
    ];
    for line in script {
        say(&engine, line).await;
    }

    assert_eq!(gateway.incomplete.load(Ordering::SeqCst), 0);
    let records = gateway.inner.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].field("reps"), Some(&SlotValue::Integer(6)));
    assert_eq!(records[1].domain, DomainId::from("measurement"));
}

#[tokio::test]
async fn test_correction_replaces_confirmed_value() {
    let gateway = Arc::new(RejectOnce::new("weight"));
    let engine = engine(gateway.clone());

    // The rejected save leaves the other slots confirmed.
    say(&engine, "bench press 10 reps at 135 lbs").await;
    let outcome = say(&engine, "yes").await;
    assert!(matches!(
        outcome,
        TurnOutcome::CommitFailed { retryable: false, .. }
    ));
    assert_eq!(slot_status(&engine, "reps").await, Some(SlotStatus::Confirmed));
    assert_eq!(slot_status(&engine, "weight").await, Some(SlotStatus::Unfilled));

    let outcome = say(&engine, "actually 12 reps at 140 lbs").await;
    assert!(outcome.text().contains("12 reps at 140 lbs"), "{}", outcome.text());
    assert_eq!(slot_status(&engine, "reps").await, Some(SlotStatus::Tentative));

    let outcome = say(&engine, "yes").await;
    match outcome {
        TurnOutcome::Committed { record, .. } => {
            assert_eq!(record.field("reps"), Some(&SlotValue::Integer(12)));
            assert_eq!(
                record.field("weight"),
                Some(&SlotValue::quantity(140.0, "lbs"))
            );
        }
        other => panic!("expected commit, got {:?}", other),
    }
    assert_eq!(gateway.inner.count(), 1);
}

#[tokio::test]
async fn test_answer_stays_with_active_domain() {
    let engine = engine(Arc::new(InMemoryGateway::new()));

    say(&engine, "pull ups 12 reps").await;
    let outcome = say(&engine, "body weight").await;

    assert_eq!(outcome.domain(), Some(&DomainId::from("workout")));
    match outcome {
        TurnOutcome::Confirm { summary, .. } => {
            assert_eq!(summary, "pull up, 12 reps at bodyweight")
        }
        other => panic!("expected confirmation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_explicit_switch_starts_other_domain() {
    let engine = engine(Arc::new(InMemoryGateway::new()));

    say(&engine, "I did bench press").await;
    let outcome = say(&engine, "actually let's log my weight").await;

    assert_eq!(outcome.domain(), Some(&DomainId::from("measurement")));
    assert_eq!(outcome.asked_slot(), Some("value"));
}

#[tokio::test]
async fn test_extraction_is_repeatable() {
    let schema = slotflow_engine::domains::workout_schema("lbs");
    let extractor = RuleExtractor::new();
    let mut request = ExtractionRequest::new("5 by 5 at 100 kilos", &schema);
    request
        .known
        .insert("movement".to_string(), SlotValue::Text("squat".to_string()));

    let first = extractor.extract(&request).await.unwrap();
    let second = extractor.extract(&request).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_transient_extractor_failure_leaves_session_unchanged() {
    let extractor = Arc::new(Switchable {
        rules: RuleExtractor::new(),
        down: AtomicBool::new(false),
    });
    let engine = engine_with(
        &SlotflowConfig::default(),
        extractor.clone(),
        Arc::new(InMemoryGateway::new()),
    );

    say(&engine, "I did bench press").await;
    let before = engine
        .snapshot(&SessionId::from(SESSION), &UserId::from(USER))
        .await
        .unwrap();

    extractor.down.store(true, Ordering::SeqCst);
    let err = engine
        .handle_turn(TurnInput::new(SESSION, USER, "10 reps"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ExtractionUnavailable(_)));

    let after = engine
        .snapshot(&SessionId::from(SESSION), &UserId::from(USER))
        .await
        .unwrap();
    assert_eq!(before, after);

    // The same utterance succeeds once the capability is back.
    extractor.down.store(false, Ordering::SeqCst);
    let outcome = say(&engine, "10 reps").await;
    assert_eq!(outcome.asked_slot(), Some("weight"));
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let engine = Arc::new(engine(Arc::new(InMemoryGateway::new())));

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let session = format!("s-{}", i);
            engine
                .handle_turn(TurnInput::new(session.as_str(), USER, "I did bench press"))
                .await
                .unwrap();
            engine
                .handle_turn(TurnInput::new(session.as_str(), USER, "10 reps"))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.asked_slot(), Some("weight"));
    }
    assert_eq!(engine.sessions().len(), 8);
}

#[tokio::test]
async fn test_turns_on_one_session_are_serialized() {
    let gateway = Arc::new(SlowOnce::new(Duration::from_millis(200)));
    let engine = Arc::new(engine(gateway.clone()));
    say(&engine, "bench press 10 reps at 135 lbs").await;
    assert_eq!(stage(&engine).await, Some(FlowStage::Confirming));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .handle_turn(TurnInput::new(SESSION, USER, "yes"))
                .await
                .unwrap()
        }));
    }
    let mut committed = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), TurnOutcome::Committed { .. }) {
            committed += 1;
        }
    }

    assert_eq!(committed, 1);
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.inner.count(), 1);
    assert_eq!(stage(&engine).await, None);
}
