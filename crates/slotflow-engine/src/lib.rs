//! Slotflow Engine crate - multi-turn slot filling over routed domain flows.
//!
//! A turn enters [`ConversationEngine::handle_turn`], the [`Router`] picks the
//! domain that owns it, and the [`FlowDriver`] moves that domain's flow through
//! collecting, confirming and committing until a finished record reaches the
//! [`PersistenceGateway`].

pub mod domains;
pub mod engine;
pub mod error;
pub mod extract;
pub mod flow;
pub mod gateway;
pub mod outcome;
pub mod registry;
pub mod reply;
pub mod router;
pub mod schema;
pub mod session;
pub mod slots;
pub mod text;

pub use engine::{ConversationEngine, TurnInput};
pub use error::{EngineError, ExtractionError, FlowError, GatewayError, SlotError};
pub use extract::guard::GuardedExtractor;
pub use extract::llm::{CompletionClient, LlmSlotExtractor};
pub use extract::rules::RuleExtractor;
pub use extract::{ExtractedValue, Extraction, ExtractionRequest, SlotExtractor};
pub use flow::{DomainFlow, FlowDriver, FlowStage};
pub use gateway::{InMemoryGateway, PersistenceGateway, SavedRecord, SqliteGateway};
pub use outcome::TurnOutcome;
pub use registry::{DomainRegistry, DomainSubgraph};
pub use router::{RouteTarget, Router, RoutingDecision};
pub use schema::{ChoiceOption, RecordSchema, SlotKind, SlotSpec, SlotValue, UnitAlias};
pub use session::{Session, SessionSnapshot, SessionStore};
pub use slots::{FinishedRecord, RecordField, SlotSet, SlotStatus, SlotUpdate};
