//! The slot extractor contract and its implementations.
//!
//! An extractor is stateless: given an utterance, a schema, the slots it may
//! fill and the values already known, it returns the values it recognised or
//! [`Extraction::Unresolved`]. Only unfilled and tentative slots are passed as
//! targets, so confirmed values are never overwritten unprompted.

pub mod guard;
pub mod llm;
pub mod rules;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::ExtractionError;
use crate::schema::{RecordSchema, SlotValue};

/// Input to a single extraction call.
#[derive(Debug, Clone)]
pub struct ExtractionRequest<'a> {
    pub utterance: &'a str,
    pub schema: &'a RecordSchema,
    /// Slot names the extractor may fill, in schema order.
    pub targets: Vec<String>,
    /// Values already held for this record.
    pub known: BTreeMap<String, SlotValue>,
    /// The slot the user was last asked about, if any.
    pub focus: Option<String>,
}

impl<'a> ExtractionRequest<'a> {
    /// A request targeting every slot of the schema with nothing known.
    pub fn new(utterance: &'a str, schema: &'a RecordSchema) -> Self {
        Self {
            utterance,
            schema,
            targets: schema.slot_names(),
            known: BTreeMap::new(),
            focus: None,
        }
    }

    pub fn is_target(&self, slot: &str) -> bool {
        self.targets.iter().any(|t| t == slot)
    }
}

/// A value recognised for one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedValue {
    pub slot: String,
    pub value: SlotValue,
    pub confidence: f32,
}

impl ExtractedValue {
    pub fn new(slot: &str, value: SlotValue, confidence: f32) -> Self {
        Self {
            slot: slot.to_string(),
            value,
            confidence,
        }
    }
}

/// Result of a successful extraction call.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Resolved(Vec<ExtractedValue>),
    /// Nothing could be recognised with enough confidence.
    Unresolved,
}

impl Extraction {
    /// Wrap a list of values, treating an empty list as unresolved.
    pub fn from_values(values: Vec<ExtractedValue>) -> Self {
        if values.is_empty() {
            Extraction::Unresolved
        } else {
            Extraction::Resolved(values)
        }
    }

    pub fn values(&self) -> &[ExtractedValue] {
        match self {
            Extraction::Resolved(values) => values,
            Extraction::Unresolved => &[],
        }
    }

    pub fn get(&self, slot: &str) -> Option<&ExtractedValue> {
        self.values().iter().find(|v| v.slot == slot)
    }
}

/// Capability that turns an utterance into slot values.
#[async_trait]
pub trait SlotExtractor: Send + Sync {
    async fn extract(
        &self,
        request: &ExtractionRequest<'_>,
    ) -> Result<Extraction, ExtractionError>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}
