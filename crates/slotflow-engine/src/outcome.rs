//! What a turn produced, as returned to the transport layer.

use serde::Serialize;

use slotflow_core::types::{DomainId, RecordId};

use crate::slots::FinishedRecord;

/// Result of one turn. Every variant carries the text to show or speak.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// A clarifying question; `slot` is the slot being asked for, if any.
    Prompt {
        domain: DomainId,
        slot: Option<String>,
        text: String,
    },
    /// Summary of the collected values, awaiting yes or no.
    Confirm {
        domain: DomainId,
        summary: String,
        text: String,
    },
    /// The record was saved.
    Committed {
        domain: DomainId,
        record: FinishedRecord,
        record_id: RecordId,
        text: String,
    },
    /// The save failed. Retryable failures keep the record for another
    /// attempt; non-retryable ones send the flow back to collecting.
    CommitFailed {
        domain: DomainId,
        retryable: bool,
        record: FinishedRecord,
        text: String,
    },
    /// The record in progress was discarded.
    Aborted {
        domain: Option<DomainId>,
        text: String,
    },
    /// No domain matched; nothing changed.
    Unrouted { text: String },
}

impl TurnOutcome {
    pub fn text(&self) -> &str {
        match self {
            TurnOutcome::Prompt { text, .. }
            | TurnOutcome::Confirm { text, .. }
            | TurnOutcome::Committed { text, .. }
            | TurnOutcome::CommitFailed { text, .. }
            | TurnOutcome::Aborted { text, .. }
            | TurnOutcome::Unrouted { text } => text,
        }
    }

    pub fn domain(&self) -> Option<&DomainId> {
        match self {
            TurnOutcome::Prompt { domain, .. }
            | TurnOutcome::Confirm { domain, .. }
            | TurnOutcome::Committed { domain, .. }
            | TurnOutcome::CommitFailed { domain, .. } => Some(domain),
            TurnOutcome::Aborted { domain, .. } => domain.as_ref(),
            TurnOutcome::Unrouted { .. } => None,
        }
    }

    /// Slot the user is being asked about, for prompts.
    pub fn asked_slot(&self) -> Option<&str> {
        match self {
            TurnOutcome::Prompt { slot, .. } => slot.as_deref(),
            _ => None,
        }
    }
}
