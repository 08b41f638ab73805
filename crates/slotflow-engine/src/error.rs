//! Error types for the conversation engine.

use slotflow_core::types::{DomainId, SessionId};

use crate::flow::FlowStage;
use crate::slots::SlotStatus;

/// Errors from a slot extractor call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    /// The capability is unreachable or timed out; the call may be retried.
    #[error("Extractor unavailable: {0}")]
    Transient(String),
    /// The capability answered with something that could not be interpreted.
    #[error("Malformed extractor output: {0}")]
    Malformed(String),
}

/// Errors from a persistence gateway save.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("Record rejected: {reason}")]
    Validation { slot: Option<String>, reason: String },
    #[error("Save failed: {0}")]
    Transient(String),
}

impl GatewayError {
    /// Transient failures can be retried without re-collecting the record.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

/// Errors from slot set bookkeeping.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SlotError {
    #[error("Invalid slot transition for {slot}: {from} -> {to}")]
    InvalidTransition {
        slot: String,
        from: SlotStatus,
        to: SlotStatus,
    },
    #[error("Unknown slot: {0}")]
    UnknownSlot(String),
    #[error("Record incomplete: {0} is not confirmed")]
    Incomplete(String),
}

/// Errors from flow stage bookkeeping.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
    #[error("Invalid stage transition: {0} -> {1}")]
    InvalidTransition(FlowStage, FlowStage),
}

/// Errors that end a turn without a conversational outcome.
///
/// The session is left exactly as it was before the turn.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Utterance is empty")]
    EmptyUtterance,
    #[error("Utterance exceeds {0} characters")]
    UtteranceTooLong(usize),
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("Session {0} belongs to another user")]
    OwnerMismatch(SessionId),
    #[error("Extraction unavailable, try again: {0}")]
    ExtractionUnavailable(String),
    #[error("Domain not registered: {0}")]
    UnknownDomain(DomainId),
    #[error("No record is waiting to be saved")]
    NothingToCommit,
    #[error("Slot error: {0}")]
    Slot(#[from] SlotError),
    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),
}

impl From<ExtractionError> for EngineError {
    fn from(err: ExtractionError) -> Self {
        EngineError::ExtractionUnavailable(err.to_string())
    }
}
