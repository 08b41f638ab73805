//! Slot sets: the in-progress values of one record, with fill status.
//!
//! A slot moves Unfilled -> Tentative -> Confirmed. A confirmed slot may be
//! overwritten by an explicit correction, which sends it back to Tentative;
//! it is never silently kept alongside a conflicting value.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use slotflow_core::types::DomainId;

use crate::error::SlotError;
use crate::schema::{RecordSchema, SlotSpec, SlotValue};

/// Fill status of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Unfilled,
    Tentative,
    Confirmed,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotStatus::Unfilled => "unfilled",
            SlotStatus::Tentative => "tentative",
            SlotStatus::Confirmed => "confirmed",
        };
        f.write_str(s)
    }
}

/// Validate that a slot status transition is allowed.
///
/// Valid transitions:
/// - Unfilled -> Tentative (extracted)
/// - Tentative -> Tentative (re-extracted)
/// - Tentative -> Confirmed (user affirmed)
/// - Confirmed -> Tentative (user correction)
/// - Tentative/Confirmed -> Unfilled (explicit reset)
pub fn validate_slot_transition(
    slot: &str,
    from: SlotStatus,
    to: SlotStatus,
) -> Result<(), SlotError> {
    let valid = matches!(
        (from, to),
        (SlotStatus::Unfilled, SlotStatus::Tentative)
            | (SlotStatus::Tentative, SlotStatus::Tentative)
            | (SlotStatus::Tentative, SlotStatus::Confirmed)
            | (SlotStatus::Confirmed, SlotStatus::Tentative)
            | (SlotStatus::Tentative, SlotStatus::Unfilled)
            | (SlotStatus::Confirmed, SlotStatus::Unfilled)
    );

    if valid {
        Ok(())
    } else {
        Err(SlotError::InvalidTransition {
            slot: slot.to_string(),
            from,
            to,
        })
    }
}

/// Current state of one slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotEntry {
    pub value: Option<SlotValue>,
    pub status: SlotStatus,
    /// Extraction confidence of the current value.
    pub confidence: f32,
}

impl SlotEntry {
    fn unfilled() -> Self {
        Self {
            value: None,
            status: SlotStatus::Unfilled,
            confidence: 0.0,
        }
    }
}

/// What [`SlotSet::apply`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotUpdate {
    /// An unfilled slot received a value.
    Filled,
    /// An existing value was replaced.
    Corrected { previous: SlotValue },
    /// The slot already held this value.
    Unchanged,
}

/// Values collected so far for one record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotSet {
    entries: BTreeMap<String, SlotEntry>,
}

impl SlotSet {
    /// An empty slot set with every schema slot unfilled.
    pub fn new(schema: &RecordSchema) -> Self {
        Self {
            entries: schema
                .slots
                .iter()
                .map(|s| (s.name.clone(), SlotEntry::unfilled()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SlotEntry> {
        self.entries.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&SlotValue> {
        self.entries.get(name).and_then(|e| e.value.as_ref())
    }

    pub fn status(&self, name: &str) -> Option<SlotStatus> {
        self.entries.get(name).map(|e| e.status)
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut SlotEntry, SlotError> {
        self.entries
            .get_mut(name)
            .ok_or_else(|| SlotError::UnknownSlot(name.to_string()))
    }

    /// Record an extracted value. The slot becomes (or stays) tentative.
    pub fn apply(
        &mut self,
        name: &str,
        value: SlotValue,
        confidence: f32,
    ) -> Result<SlotUpdate, SlotError> {
        let entry = self.entry_mut(name)?;
        if entry.value.as_ref() == Some(&value) {
            entry.confidence = entry.confidence.max(confidence);
            return Ok(SlotUpdate::Unchanged);
        }

        validate_slot_transition(name, entry.status, SlotStatus::Tentative)?;
        let previous = entry.value.replace(value);
        entry.status = SlotStatus::Tentative;
        entry.confidence = confidence;

        Ok(match previous {
            Some(previous) => {
                debug!(slot = name, previous = %previous, "Slot corrected");
                SlotUpdate::Corrected { previous }
            }
            None => SlotUpdate::Filled,
        })
    }

    /// Mark every tentative slot confirmed. Returns how many changed.
    pub fn confirm_tentative(&mut self) -> usize {
        let mut confirmed = 0;
        for entry in self.entries.values_mut() {
            if entry.status == SlotStatus::Tentative {
                entry.status = SlotStatus::Confirmed;
                confirmed += 1;
            }
        }
        confirmed
    }

    /// Clear a slot back to unfilled.
    pub fn reset(&mut self, name: &str) -> Result<(), SlotError> {
        let entry = self.entry_mut(name)?;
        if entry.status == SlotStatus::Unfilled {
            return Ok(());
        }
        validate_slot_transition(name, entry.status, SlotStatus::Unfilled)?;
        *entry = SlotEntry::unfilled();
        Ok(())
    }

    /// Send every confirmed slot back to tentative for re-extraction.
    pub fn reset_all_to_tentative(&mut self) {
        for entry in self.entries.values_mut() {
            if entry.status == SlotStatus::Confirmed {
                entry.status = SlotStatus::Tentative;
            }
        }
    }

    /// Slots the extractor may fill: everything not yet confirmed, in
    /// schema order.
    pub fn extraction_targets(&self, schema: &RecordSchema) -> Vec<String> {
        schema
            .slots
            .iter()
            .filter(|s| self.status(&s.name) != Some(SlotStatus::Confirmed))
            .map(|s| s.name.clone())
            .collect()
    }

    /// Every filled value, keyed by slot name.
    pub fn known_values(&self) -> BTreeMap<String, SlotValue> {
        self.entries
            .iter()
            .filter_map(|(name, e)| e.value.clone().map(|v| (name.clone(), v)))
            .collect()
    }

    /// The first required slot without a value, in declaration order.
    pub fn first_unfilled_required<'s>(&self, schema: &'s RecordSchema) -> Option<&'s SlotSpec> {
        schema
            .required_slots()
            .find(|s| self.value(&s.name).is_none())
    }

    pub fn all_required_filled(&self, schema: &RecordSchema) -> bool {
        self.first_unfilled_required(schema).is_none()
    }

    /// Lowest confidence among filled slots, or `None` when nothing is filled.
    pub fn min_confidence(&self) -> Option<f32> {
        self.entries
            .values()
            .filter(|e| e.value.is_some())
            .map(|e| e.confidence)
            .reduce(f32::min)
    }

    /// Build the finished record. Every required slot must be confirmed and
    /// no filled slot may still be tentative.
    pub fn finish(&self, schema: &RecordSchema) -> Result<FinishedRecord, SlotError> {
        let mut fields = Vec::new();
        for spec in &schema.slots {
            let entry = self
                .entries
                .get(&spec.name)
                .ok_or_else(|| SlotError::UnknownSlot(spec.name.clone()))?;
            match (&entry.value, entry.status) {
                (Some(value), SlotStatus::Confirmed) => fields.push(RecordField {
                    name: spec.name.clone(),
                    label: spec.label.clone(),
                    value: value.clone(),
                }),
                (None, SlotStatus::Unfilled) if !spec.required => {}
                _ => return Err(SlotError::Incomplete(spec.name.clone())),
            }
        }

        Ok(FinishedRecord {
            commit_key: Uuid::new_v4(),
            domain: schema.domain.clone(),
            fields,
            summary: String::new(),
            completed_at: Utc::now(),
        })
    }

    /// Iterate entries in schema order.
    pub fn iter_in_order<'a>(
        &'a self,
        schema: &'a RecordSchema,
    ) -> impl Iterator<Item = (&'a SlotSpec, &'a SlotEntry)> + 'a {
        schema
            .slots
            .iter()
            .filter_map(move |s| self.entries.get(&s.name).map(|e| (s, e)))
    }
}

/// One field of a finished record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordField {
    pub name: String,
    pub label: String,
    pub value: SlotValue,
}

/// A record whose required slots are all confirmed, ready to persist.
///
/// `commit_key` is minted once when the record is finished; gateways store
/// a key at most once, so retrying the same record cannot duplicate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedRecord {
    pub commit_key: Uuid,
    pub domain: DomainId,
    pub fields: Vec<RecordField>,
    pub summary: String,
    pub completed_at: DateTime<Utc>,
}

impl FinishedRecord {
    pub fn field(&self, name: &str) -> Option<&SlotValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Field values keyed by name.
    pub fn values(&self) -> BTreeMap<String, SlotValue> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.value.clone()))
            .collect()
    }

    /// JSON object of the fields, as stored by the gateways.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|f| (f.name.clone(), f.value.to_json()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SlotKind, SlotSpec};

    fn schema() -> RecordSchema {
        RecordSchema::new(
            "workout",
            vec![
                SlotSpec::new("movement", SlotKind::Text { vocabulary: vec![], open: true })
                    .required(),
                SlotSpec::new("reps", SlotKind::Integer).required(),
                SlotSpec::new("weight", SlotKind::Integer).required(),
                SlotSpec::new("sets", SlotKind::Integer),
            ],
        )
    }

    fn text(s: &str) -> SlotValue {
        SlotValue::Text(s.to_string())
    }

    // =====================================================================
    // Transitions
    // =====================================================================

    #[test]
    fn test_valid_slot_transitions() {
        use SlotStatus::*;
        for (from, to) in [
            (Unfilled, Tentative),
            (Tentative, Tentative),
            (Tentative, Confirmed),
            (Confirmed, Tentative),
            (Tentative, Unfilled),
            (Confirmed, Unfilled),
        ] {
            assert!(validate_slot_transition("x", from, to).is_ok(), "{from} -> {to}");
        }
    }

    #[test]
    fn test_unfilled_to_confirmed_invalid() {
        assert!(
            validate_slot_transition("x", SlotStatus::Unfilled, SlotStatus::Confirmed).is_err()
        );
        assert!(
            validate_slot_transition("x", SlotStatus::Confirmed, SlotStatus::Confirmed).is_err()
        );
        assert!(
            validate_slot_transition("x", SlotStatus::Unfilled, SlotStatus::Unfilled).is_err()
        );
    }

    // =====================================================================
    // Apply / confirm / reset
    // =====================================================================

    #[test]
    fn test_new_set_all_unfilled() {
        let set = SlotSet::new(&schema());
        assert_eq!(set.status("movement"), Some(SlotStatus::Unfilled));
        assert_eq!(set.status("sets"), Some(SlotStatus::Unfilled));
        assert!(set.known_values().is_empty());
        assert_eq!(set.min_confidence(), None);
    }

    #[test]
    fn test_apply_fills_tentative() {
        let mut set = SlotSet::new(&schema());
        assert_eq!(
            set.apply("reps", SlotValue::Integer(10), 0.9).unwrap(),
            SlotUpdate::Filled
        );
        let entry = set.get("reps").unwrap();
        assert_eq!(entry.status, SlotStatus::Tentative);
        assert_eq!(entry.value, Some(SlotValue::Integer(10)));
    }

    #[test]
    fn test_apply_same_value_unchanged() {
        let mut set = SlotSet::new(&schema());
        set.apply("reps", SlotValue::Integer(10), 0.6).unwrap();
        set.confirm_tentative();
        assert_eq!(
            set.apply("reps", SlotValue::Integer(10), 0.9).unwrap(),
            SlotUpdate::Unchanged
        );
        assert_eq!(set.status("reps"), Some(SlotStatus::Confirmed));
        assert!((set.get("reps").unwrap().confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_correcting_confirmed_slot_returns_to_tentative() {
        let mut set = SlotSet::new(&schema());
        set.apply("weight", SlotValue::Integer(135), 0.9).unwrap();
        set.confirm_tentative();

        let update = set.apply("weight", SlotValue::Integer(145), 0.9).unwrap();
        assert_eq!(
            update,
            SlotUpdate::Corrected {
                previous: SlotValue::Integer(135)
            }
        );
        assert_eq!(set.status("weight"), Some(SlotStatus::Tentative));
        assert_eq!(set.value("weight"), Some(&SlotValue::Integer(145)));
    }

    #[test]
    fn test_apply_unknown_slot() {
        let mut set = SlotSet::new(&schema());
        assert_eq!(
            set.apply("tempo", SlotValue::Integer(3), 0.9).unwrap_err(),
            SlotError::UnknownSlot("tempo".to_string())
        );
    }

    #[test]
    fn test_reset_and_reset_all() {
        let mut set = SlotSet::new(&schema());
        set.apply("movement", text("squat"), 0.9).unwrap();
        set.apply("reps", SlotValue::Integer(5), 0.9).unwrap();
        set.confirm_tentative();

        set.reset("reps").unwrap();
        assert_eq!(set.status("reps"), Some(SlotStatus::Unfilled));
        assert_eq!(set.value("reps"), None);
        set.reset("reps").unwrap();

        set.reset_all_to_tentative();
        assert_eq!(set.status("movement"), Some(SlotStatus::Tentative));
        assert_eq!(set.status("reps"), Some(SlotStatus::Unfilled));
    }

    // =====================================================================
    // Queries
    // =====================================================================

    #[test]
    fn test_extraction_targets_skip_confirmed() {
        let schema = schema();
        let mut set = SlotSet::new(&schema);
        set.apply("movement", text("squat"), 0.9).unwrap();
        set.confirm_tentative();
        set.apply("reps", SlotValue::Integer(5), 0.9).unwrap();

        assert_eq!(
            set.extraction_targets(&schema),
            vec!["reps", "weight", "sets"]
        );
    }

    #[test]
    fn test_first_unfilled_required_uses_declaration_order() {
        let schema = schema();
        let mut set = SlotSet::new(&schema);
        set.apply("weight", SlotValue::Integer(135), 0.9).unwrap();
        assert_eq!(set.first_unfilled_required(&schema).unwrap().name, "movement");

        set.apply("movement", text("bench press"), 0.9).unwrap();
        assert_eq!(set.first_unfilled_required(&schema).unwrap().name, "reps");

        set.apply("reps", SlotValue::Integer(10), 0.9).unwrap();
        assert!(set.all_required_filled(&schema));
    }

    #[test]
    fn test_min_confidence() {
        let mut set = SlotSet::new(&schema());
        set.apply("movement", text("squat"), 0.9).unwrap();
        set.apply("reps", SlotValue::Integer(5), 0.6).unwrap();
        assert!((set.min_confidence().unwrap() - 0.6).abs() < f32::EPSILON);
    }

    // =====================================================================
    // Finish
    // =====================================================================

    #[test]
    fn test_finish_requires_confirmation() {
        let schema = schema();
        let mut set = SlotSet::new(&schema);
        set.apply("movement", text("squat"), 0.9).unwrap();
        set.apply("reps", SlotValue::Integer(5), 0.9).unwrap();
        set.apply("weight", SlotValue::Integer(225), 0.9).unwrap();

        assert_eq!(
            set.finish(&schema).unwrap_err(),
            SlotError::Incomplete("movement".to_string())
        );

        set.confirm_tentative();
        let record = set.finish(&schema).unwrap();
        assert_eq!(record.fields.len(), 3);
        assert_eq!(record.field("reps"), Some(&SlotValue::Integer(5)));
        assert!(record.field("sets").is_none());
        assert_eq!(record.payload()["movement"], "squat");
    }

    #[test]
    fn test_finish_rejects_missing_required() {
        let schema = schema();
        let mut set = SlotSet::new(&schema);
        set.apply("movement", text("squat"), 0.9).unwrap();
        set.confirm_tentative();
        assert_eq!(
            set.finish(&schema).unwrap_err(),
            SlotError::Incomplete("reps".to_string())
        );
    }

    #[test]
    fn test_finish_mints_distinct_commit_keys() {
        let schema = schema();
        let mut set = SlotSet::new(&schema);
        set.apply("movement", text("squat"), 0.9).unwrap();
        set.apply("reps", SlotValue::Integer(5), 0.9).unwrap();
        set.apply("weight", SlotValue::Integer(225), 0.9).unwrap();
        set.confirm_tentative();
        assert_ne!(
            set.finish(&schema).unwrap().commit_key,
            set.finish(&schema).unwrap().commit_key
        );
    }
}
