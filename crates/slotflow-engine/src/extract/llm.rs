//! Slot extraction backed by a language-model completion service.
//!
//! The completion call itself is the [`CompletionClient`] seam; this module
//! only renders the prompt and interprets the JSON reply.

use std::fmt::Write as _;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::extract::{ExtractedValue, Extraction, ExtractionRequest, SlotExtractor};
use crate::reply::has_correction_cue;
use crate::schema::{SlotKind, SlotSpec, SlotValue};

/// A black-box text completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Complete `user` under the `system` instructions. Network and quota
    /// failures are reported as [`ExtractionError::Transient`].
    async fn complete(&self, system: &str, user: &str) -> Result<String, ExtractionError>;
}

/// Extractor that asks a completion service for a JSON object of slot values.
pub struct LlmSlotExtractor<C> {
    client: C,
    min_confidence: f32,
}

impl<C: CompletionClient> LlmSlotExtractor<C> {
    pub fn new(client: C, min_confidence: f32) -> Self {
        Self {
            client,
            min_confidence,
        }
    }

    /// Render the system and user prompts for a request.
    pub fn build_prompt(request: &ExtractionRequest<'_>) -> (String, String) {
        let system = format!(
            "You extract fields of a {} record from one user utterance. \
             Reply with JSON only, shaped as {{\"values\": {{<field>: <value or null>}}, \"confidence\": <0.0-1.0>}}. \
             Use null for any field the utterance does not state. Never guess.",
            request.schema.domain
        );

        let mut user = String::from("Fields:\n");
        for spec in request
            .schema
            .slots
            .iter()
            .filter(|s| request.is_target(&s.name))
        {
            let _ = writeln!(user, "- {} ({}): {}", spec.name, describe_kind(&spec.kind), spec.prompt);
        }
        if !request.known.is_empty() {
            user.push_str("Already known:\n");
            for (name, value) in &request.known {
                let _ = writeln!(user, "- {}: {}", name, value);
            }
        }
        if let Some(focus) = &request.focus {
            let _ = writeln!(user, "The user was just asked about: {}", focus);
        }
        let _ = write!(user, "Utterance: {:?}", request.utterance);

        (system, user)
    }

    /// Interpret a completion reply.
    pub fn parse_reply(
        &self,
        reply: &str,
        request: &ExtractionRequest<'_>,
    ) -> Result<Extraction, ExtractionError> {
        let json = strip_code_fence(reply);
        let parsed: Value = serde_json::from_str(json)
            .map_err(|e| ExtractionError::Malformed(format!("invalid JSON: {}", e)))?;
        let values = parsed
            .get("values")
            .and_then(Value::as_object)
            .ok_or_else(|| ExtractionError::Malformed("missing \"values\" object".to_string()))?;
        let confidence = parsed
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0) as f32;

        if confidence < self.min_confidence {
            debug!(confidence, "Completion below confidence threshold");
            return Ok(Extraction::Unresolved);
        }

        let correcting = has_correction_cue(request.utterance);
        let mut extracted = Vec::new();
        for spec in &request.schema.slots {
            if !(correcting || request.is_target(&spec.name)) {
                continue;
            }
            let Some(raw) = values.get(&spec.name).filter(|v| !v.is_null()) else {
                continue;
            };
            match json_to_slot_value(spec, raw) {
                Some(value) => extracted.push(ExtractedValue::new(&spec.name, value, confidence)),
                None => warn!(slot = %spec.name, raw = %raw, "Ignoring uninterpretable value"),
            }
        }
        Ok(Extraction::from_values(extracted))
    }
}

#[async_trait]
impl<C: CompletionClient> SlotExtractor for LlmSlotExtractor<C> {
    async fn extract(
        &self,
        request: &ExtractionRequest<'_>,
    ) -> Result<Extraction, ExtractionError> {
        let (system, user) = Self::build_prompt(request);
        let reply = self.client.complete(&system, &user).await?;
        self.parse_reply(&reply, request)
    }

    fn name(&self) -> &str {
        "llm"
    }
}

fn describe_kind(kind: &SlotKind) -> String {
    match kind {
        SlotKind::Integer => "integer".to_string(),
        SlotKind::Decimal => "number".to_string(),
        SlotKind::Quantity { units, .. } => format!(
            "object {{\"amount\": number, \"unit\": one of {}}}",
            units
                .iter()
                .map(|u| u.unit.as_str())
                .collect::<Vec<_>>()
                .join("|")
        ),
        SlotKind::Duration => "integer seconds".to_string(),
        SlotKind::Choice { options } => format!(
            "one of {}",
            options
                .iter()
                .map(|o| o.id.as_str())
                .collect::<Vec<_>>()
                .join("|")
        ),
        SlotKind::Text { .. } => "text".to_string(),
    }
}

/// Models often wrap JSON in a Markdown fence or surround it with prose.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn json_to_slot_value(spec: &SlotSpec, raw: &Value) -> Option<SlotValue> {
    match &spec.kind {
        SlotKind::Integer => {
            let n = raw
                .as_i64()
                .or_else(|| raw.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))?;
            Some(SlotValue::Integer(n))
        }
        SlotKind::Decimal => raw
            .as_f64()
            .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
            .map(SlotValue::Decimal),
        SlotKind::Quantity { default_unit, .. } => {
            if raw.as_str().and_then(|s| spec.kind.canonical_unit(&s.to_lowercase())) == Some("bodyweight") {
                return Some(SlotValue::quantity(0.0, "bodyweight"));
            }
            let (amount, unit) = match raw {
                Value::Object(map) => (
                    map.get("amount").and_then(Value::as_f64),
                    map.get("unit")
                        .and_then(Value::as_str)
                        .map(|u| u.to_lowercase()),
                ),
                _ => (raw.as_f64(), None),
            };
            let unit = match unit {
                Some(u) => spec.kind.canonical_unit(&u)?.to_string(),
                None => default_unit.clone()?,
            };
            if unit == "bodyweight" {
                return Some(SlotValue::quantity(0.0, &unit));
            }
            Some(SlotValue::quantity(amount?, &unit))
        }
        SlotKind::Duration => raw
            .as_u64()
            .and_then(|s| u32::try_from(s).ok())
            .map(SlotValue::Seconds),
        SlotKind::Choice { options } => {
            let said = raw.as_str()?.trim().to_lowercase();
            options
                .iter()
                .find(|o| {
                    o.id == said
                        || o.id.replace('_', " ") == said
                        || o.synonyms.iter().any(|s| s.to_lowercase() == said)
                })
                .map(|o| SlotValue::Choice(o.id.clone()))
        }
        SlotKind::Text { .. } => raw
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| SlotValue::Text(s.to_lowercase())),
    }
}
