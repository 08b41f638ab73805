//! Deterministic, schema-driven slot extraction.
//!
//! Extraction runs in passes over the number-normalised utterance:
//! 1. slot patterns for typed slots (numbers, quantities, durations),
//! 2. vocabulary and choice spotting,
//! 3. patterns for free-text slots,
//! 4. a fallback for the slot the user was just asked about.
//!
//! Each recognised span is consumed so a number is never claimed twice.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::{Captures, Regex};
use tracing::debug;

use crate::error::ExtractionError;
use crate::extract::{ExtractedValue, Extraction, ExtractionRequest, SlotExtractor};
use crate::reply::has_correction_cue;
use crate::schema::{ChoiceOption, SlotKind, SlotSpec, SlotValue};
use crate::text::{find_phrase, normalize_numbers};

const PATTERN_CONFIDENCE: f32 = 0.9;
const VOCABULARY_CONFIDENCE: f32 = 0.9;
const CHOICE_CONFIDENCE: f32 = 0.95;
const FOCUS_CONFIDENCE: f32 = 0.8;
const DEFAULT_UNIT_CONFIDENCE: f32 = 0.75;
const FREE_TEXT_CONFIDENCE: f32 = 0.6;

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("Invalid number regex"));

static FILLER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:um+|uh+|so|well|okay|ok|i\s+think|i\s+did|i\s+was\s+doing|i'?m\s+doing|i\s+am\s+doing|i\s+do|it\s+was|it'?s|it\s+is|that\s+was|was|did|doing|just|some|the|a|an|my)\b[\s,]*)+",
    )
    .expect("Invalid filler regex")
});

static TRAILING_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s.!?,;:]+$").expect("Invalid punctuation regex"));

/// Rule-based extractor over the patterns and vocabularies declared on each
/// slot. Stateless and deterministic.
#[derive(Debug, Clone, Default)]
pub struct RuleExtractor;

impl RuleExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous extraction used by the async contract and benchmarks.
    pub fn extract_values(&self, request: &ExtractionRequest<'_>) -> Extraction {
        let text = normalize_numbers(request.utterance);
        let mut pass = Pass {
            text: &text,
            consumed: Vec::new(),
            found: BTreeMap::new(),
        };

        for spec in &request.schema.slots {
            if !matches!(spec.kind, SlotKind::Text { .. }) {
                pass.apply_patterns(spec);
            }
        }
        for spec in &request.schema.slots {
            if !pass.found.contains_key(&spec.name) {
                pass.spot_vocabulary(spec);
            }
        }
        for spec in &request.schema.slots {
            if matches!(spec.kind, SlotKind::Text { .. }) && !pass.found.contains_key(&spec.name) {
                pass.apply_patterns(spec);
            }
        }
        if let Some(spec) = request
            .focus
            .as_deref()
            .filter(|f| request.is_target(f))
            .and_then(|f| request.schema.slot(f))
        {
            if !pass.found.contains_key(&spec.name) {
                pass.focused_fallback(spec);
            }
        }

        let correcting = has_correction_cue(request.utterance);
        let values: Vec<ExtractedValue> = request
            .schema
            .slots
            .iter()
            .filter(|spec| correcting || request.is_target(&spec.name))
            .filter_map(|spec| pass.found.remove(&spec.name))
            .collect();

        debug!(
            recognised = values.len(),
            correcting,
            "Rule extraction finished"
        );
        Extraction::from_values(values)
    }
}

#[async_trait]
impl SlotExtractor for RuleExtractor {
    async fn extract(
        &self,
        request: &ExtractionRequest<'_>,
    ) -> Result<Extraction, ExtractionError> {
        Ok(self.extract_values(request))
    }

    fn name(&self) -> &str {
        "rules"
    }
}

/// Mutable state of one extraction.
struct Pass<'t> {
    text: &'t str,
    consumed: Vec<Range<usize>>,
    found: BTreeMap<String, ExtractedValue>,
}

impl<'t> Pass<'t> {
    fn is_free(&self, span: &Range<usize>) -> bool {
        !self
            .consumed
            .iter()
            .any(|c| span.start < c.end && c.start < span.end)
    }

    fn record(&mut self, spec: &SlotSpec, value: SlotValue, confidence: f32, spans: Vec<Range<usize>>) {
        self.consumed.extend(spans);
        self.found.insert(
            spec.name.clone(),
            ExtractedValue::new(&spec.name, value, confidence),
        );
    }

    fn apply_patterns(&mut self, spec: &SlotSpec) {
        for pattern in &spec.patterns {
            let hit = pattern
                .captures_iter(self.text)
                .find_map(|caps| self.read_captures(spec, &caps));
            if let Some((value, spans)) = hit {
                self.record(spec, value, PATTERN_CONFIDENCE, spans);
                return;
            }
        }
    }

    fn read_captures(
        &self,
        spec: &SlotSpec,
        caps: &Captures<'_>,
    ) -> Option<(SlotValue, Vec<Range<usize>>)> {
        let spans: Vec<Range<usize>> = ["value", "amount", "unit"]
            .iter()
            .filter_map(|g| caps.name(g).map(|m| m.range()))
            .collect();
        let spans = if spans.is_empty() {
            vec![caps.get(0)?.range()]
        } else {
            spans
        };
        if !spans.iter().all(|s| self.is_free(s)) {
            return None;
        }

        let value = caps.name("value").map(|m| m.as_str().trim());
        let amount = caps.name("amount").map(|m| m.as_str());
        let unit = caps.name("unit").map(|m| m.as_str());

        let slot_value = match &spec.kind {
            SlotKind::Integer => SlotValue::Integer(value.or(amount)?.parse().ok()?),
            SlotKind::Decimal => SlotValue::Decimal(value.or(amount)?.parse().ok()?),
            SlotKind::Quantity { default_unit, .. } => {
                let unit = match unit {
                    Some(word) => spec.kind.canonical_unit(word)?.to_string(),
                    None => default_unit.clone()?,
                };
                if unit == "bodyweight" {
                    SlotValue::quantity(0.0, &unit)
                } else {
                    SlotValue::quantity(value.or(amount)?.parse().ok()?, &unit)
                }
            }
            SlotKind::Duration => {
                let n: u32 = value.or(amount)?.parse::<f64>().ok()?.round() as u32;
                let multiplier = match unit {
                    Some(word) => duration_multiplier(word)?,
                    None => 1,
                };
                SlotValue::Seconds(n.saturating_mul(multiplier))
            }
            SlotKind::Choice { options } => {
                SlotValue::Choice(match_option(options, value?)?.id.clone())
            }
            SlotKind::Text { .. } => {
                let cleaned = clean_free_text(value?);
                if cleaned.is_empty() || spec.is_ignored(&cleaned) {
                    return None;
                }
                SlotValue::Text(cleaned)
            }
        };
        Some((slot_value, spans))
    }

    fn spot_vocabulary(&mut self, spec: &SlotSpec) {
        match &spec.kind {
            SlotKind::Text { vocabulary, .. } => {
                let best = vocabulary
                    .iter()
                    .filter_map(|entry| {
                        let phrase = entry.to_lowercase();
                        [phrase.clone(), format!("{}s", phrase), format!("{}es", phrase)]
                            .iter()
                            .find_map(|form| {
                                find_phrase(self.text, form).map(|start| start..start + form.len())
                            })
                            .filter(|span| self.is_free(span))
                            .map(|span| (entry, span))
                    })
                    .fold(None::<(&String, Range<usize>)>, |best, candidate| match best {
                        Some(b) if b.0.len() >= candidate.0.len() => Some(b),
                        _ => Some(candidate),
                    });
                if let Some((entry, span)) = best {
                    self.record(
                        spec,
                        SlotValue::Text(entry.to_lowercase()),
                        VOCABULARY_CONFIDENCE,
                        vec![span],
                    );
                }
            }
            SlotKind::Choice { options } => {
                if let Some((id, confidence)) = spot_choice(self.text, options) {
                    self.record(spec, SlotValue::Choice(id), confidence, Vec::new());
                }
            }
            _ => {}
        }
    }

    fn first_free_number(&self) -> Option<(Range<usize>, &'t str)> {
        let text: &'t str = self.text;
        NUMBER_RE
            .find_iter(text)
            .map(|m| (m.range(), m.as_str()))
            .find(|(span, _)| self.is_free(span))
    }

    /// The word right after a span, e.g. the unit following a number.
    fn next_word(&self, after: usize) -> &'t str {
        let text: &'t str = self.text;
        let rest = text[after..].trim_start();
        let end = rest
            .find(|c: char| !(c.is_alphabetic() || c == '%'))
            .unwrap_or(rest.len());
        &rest[..end]
    }

    fn focused_fallback(&mut self, spec: &SlotSpec) {
        match &spec.kind {
            SlotKind::Integer => {
                if let Some((span, digits)) = self.first_free_number() {
                    if let Ok(n) = digits.parse::<i64>() {
                        self.record(spec, SlotValue::Integer(n), FOCUS_CONFIDENCE, vec![span]);
                    }
                }
            }
            SlotKind::Decimal => {
                if let Some((span, digits)) = self.first_free_number() {
                    if let Ok(d) = digits.parse::<f64>() {
                        self.record(spec, SlotValue::Decimal(d), FOCUS_CONFIDENCE, vec![span]);
                    }
                }
            }
            SlotKind::Quantity {
                units,
                default_unit,
            } => {
                if let Some((span, digits)) = self.first_free_number() {
                    let Ok(amount) = digits.parse::<f64>() else {
                        return;
                    };
                    let word = self.next_word(span.end);
                    let (unit, confidence) = match spec.kind.canonical_unit(word) {
                        Some(unit) => (unit.to_string(), FOCUS_CONFIDENCE),
                        None => match default_unit {
                            Some(unit) => (unit.clone(), DEFAULT_UNIT_CONFIDENCE),
                            None => return,
                        },
                    };
                    self.record(spec, SlotValue::quantity(amount, &unit), confidence, vec![span]);
                } else if let Some(bodyweight) = units.iter().find(|u| u.unit == "bodyweight") {
                    let spoken = std::iter::once(&bodyweight.unit)
                        .chain(bodyweight.aliases.iter())
                        .any(|alias| find_phrase(self.text, alias).is_some());
                    if spoken {
                        self.record(
                            spec,
                            SlotValue::quantity(0.0, "bodyweight"),
                            FOCUS_CONFIDENCE,
                            Vec::new(),
                        );
                    }
                }
            }
            SlotKind::Duration => {
                if let Some((span, digits)) = self.first_free_number() {
                    let Ok(amount) = digits.parse::<f64>() else {
                        return;
                    };
                    let multiplier = duration_multiplier(self.next_word(span.end)).unwrap_or(1);
                    let seconds = (amount.round() as u32).saturating_mul(multiplier);
                    self.record(spec, SlotValue::Seconds(seconds), FOCUS_CONFIDENCE, vec![span]);
                }
            }
            SlotKind::Text { open: true, .. } if self.found.is_empty() => {
                let cleaned = clean_free_text(self.text);
                if cleaned.chars().any(|c| c.is_alphabetic()) && !spec.is_ignored(&cleaned) {
                    self.record(spec, SlotValue::Text(cleaned), FREE_TEXT_CONFIDENCE, Vec::new());
                }
            }
            _ => {}
        }
    }
}

/// Seconds per spoken duration unit.
fn duration_multiplier(word: &str) -> Option<u32> {
    match word {
        "s" | "sec" | "secs" | "second" | "seconds" => Some(1),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(60),
        _ => None,
    }
}

fn option_phrases(option: &ChoiceOption) -> impl Iterator<Item = String> + '_ {
    std::iter::once(option.id.replace('_', " "))
        .chain(option.synonyms.iter().map(|s| s.to_lowercase()))
}

fn match_option<'o>(options: &'o [ChoiceOption], said: &str) -> Option<&'o ChoiceOption> {
    let said = said.trim().to_lowercase();
    options
        .iter()
        .find(|o| o.id == said || option_phrases(o).any(|p| p == said))
}

/// Pick the option whose phrases occur most often. Confidence drops with
/// competing options.
fn spot_choice(text: &str, options: &[ChoiceOption]) -> Option<(String, f32)> {
    let mut best: Option<(&ChoiceOption, usize)> = None;
    let mut total = 0;
    for option in options {
        let mut phrases: Vec<String> = option_phrases(option).collect();
        phrases.sort();
        phrases.dedup();
        let hits = phrases
            .iter()
            .filter(|p| find_phrase(text, p).is_some())
            .count();
        total += hits;
        if hits > best.map_or(0, |(_, h)| h) {
            best = Some((option, hits));
        }
    }
    let (option, hits) = best?;
    let confidence = CHOICE_CONFIDENCE * hits as f32 / total as f32;
    Some((option.id.clone(), confidence))
}

fn clean_free_text(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let stripped = FILLER_RE.replace(&lowered, "");
    TRAILING_PUNCT_RE.replace(stripped.trim(), "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::measurement::measurement_schema;
    use crate::domains::workout::workout_schema;
    use crate::schema::RecordSchema;

    fn extract(schema: &RecordSchema, utterance: &str) -> Extraction {
        RuleExtractor::new().extract_values(&ExtractionRequest::new(utterance, schema))
    }

    fn focused(schema: &RecordSchema, utterance: &str, focus: &str) -> Extraction {
        let mut request = ExtractionRequest::new(utterance, schema);
        request.focus = Some(focus.to_string());
        RuleExtractor::new().extract_values(&request)
    }

    fn value(extraction: &Extraction, slot: &str) -> Option<SlotValue> {
        extraction.get(slot).map(|v| v.value.clone())
    }

    // ---- Workout patterns ----

    #[test]
    fn test_movement_from_vocabulary() {
        let schema = workout_schema("lbs");
        let result = extract(&schema, "I did bench press");
        assert_eq!(
            value(&result, "movement"),
            Some(SlotValue::Text("bench press".to_string()))
        );
        assert!(result.get("reps").is_none());
        assert!(result.get("weight").is_none());
    }

    #[test]
    fn test_sets_reps_weight_sentence() {
        let schema = workout_schema("lbs");
        let result = extract(&schema, "3 sets of 10 at 135 lbs");
        assert_eq!(value(&result, "reps"), Some(SlotValue::Integer(10)));
        assert_eq!(value(&result, "sets"), Some(SlotValue::Integer(3)));
        assert_eq!(
            value(&result, "weight"),
            Some(SlotValue::quantity(135.0, "lbs"))
        );
        assert!(result.get("movement").is_none());
    }

    #[test]
    fn test_spoken_numbers_and_cross_notation() {
        let schema = workout_schema("lbs");
        let result = extract(&schema, "squats, five by five at one hundred kilos");
        assert_eq!(
            value(&result, "movement"),
            Some(SlotValue::Text("squat".to_string()))
        );
        assert_eq!(value(&result, "sets"), Some(SlotValue::Integer(5)));
        assert_eq!(value(&result, "reps"), Some(SlotValue::Integer(5)));
        assert_eq!(value(&result, "weight"), Some(SlotValue::quantity(100.0, "kg")));
    }

    #[test]
    fn test_unitless_at_weight_uses_default_unit() {
        let schema = workout_schema("kg");
        let result = extract(&schema, "deadlift 5 reps at 140");
        assert_eq!(value(&result, "weight"), Some(SlotValue::quantity(140.0, "kg")));
        assert_eq!(value(&result, "reps"), Some(SlotValue::Integer(5)));
    }

    #[test]
    fn test_bodyweight() {
        let schema = workout_schema("lbs");
        let result = extract(&schema, "pull ups, 12 reps, body weight");
        assert_eq!(
            value(&result, "weight"),
            Some(SlotValue::quantity(0.0, "bodyweight"))
        );
        assert_eq!(value(&result, "reps"), Some(SlotValue::Integer(12)));
    }

    #[test]
    fn test_rest_and_notes() {
        let schema = workout_schema("lbs");
        let result = extract(&schema, "rested 2 minutes between sets, notes: felt strong");
        assert_eq!(value(&result, "rest"), Some(SlotValue::Seconds(120)));
        assert_eq!(
            value(&result, "notes"),
            Some(SlotValue::Text("felt strong".to_string()))
        );
    }

    #[test]
    fn test_movement_after_did_pattern() {
        let schema = workout_schema("lbs");
        let result = extract(&schema, "I did some cable flyes for 15 reps");
        assert_eq!(
            value(&result, "movement"),
            Some(SlotValue::Text("cable flyes".to_string()))
        );
        assert_eq!(value(&result, "reps"), Some(SlotValue::Integer(15)));
    }

    #[test]
    fn test_pronoun_is_not_a_movement() {
        let schema = workout_schema("lbs");
        let result = extract(&schema, "I did it for 10 reps");
        assert_eq!(value(&result, "movement"), None);
        assert_eq!(value(&result, "reps"), Some(SlotValue::Integer(10)));

        let result = focused(&schema, "that", "movement");
        assert_eq!(value(&result, "movement"), None);
    }

    // ---- Focus fallback ----

    #[test]
    fn test_bare_number_fills_focused_slot() {
        let schema = workout_schema("lbs");
        assert_eq!(
            value(&focused(&schema, "10", "reps"), "reps"),
            Some(SlotValue::Integer(10))
        );
        let weight = focused(&schema, "145", "weight");
        assert_eq!(value(&weight, "weight"), Some(SlotValue::quantity(145.0, "lbs")));
        assert!((weight.get("weight").unwrap().confidence - DEFAULT_UNIT_CONFIDENCE).abs() < 1e-6);
    }

    #[test]
    fn test_bare_number_without_focus_unresolved() {
        let schema = workout_schema("lbs");
        assert_eq!(extract(&schema, "145"), Extraction::Unresolved);
    }

    #[test]
    fn test_free_text_movement_when_focused() {
        let schema = workout_schema("lbs");
        let result = focused(&schema, "it was Zercher carries.", "movement");
        assert_eq!(
            value(&result, "movement"),
            Some(SlotValue::Text("zercher carries".to_string()))
        );
        assert!((result.get("movement").unwrap().confidence - FREE_TEXT_CONFIDENCE).abs() < 1e-6);
    }

    #[test]
    fn test_focus_on_non_target_ignored() {
        let schema = workout_schema("lbs");
        let mut request = ExtractionRequest::new("10", &schema);
        request.targets = vec!["weight".to_string()];
        request.focus = Some("reps".to_string());
        assert_eq!(RuleExtractor::new().extract_values(&request), Extraction::Unresolved);
    }

    // ---- Targets and corrections ----

    #[test]
    fn test_only_targets_reported() {
        let schema = workout_schema("lbs");
        let mut request = ExtractionRequest::new("10 reps at 135 lbs", &schema);
        request.targets = vec!["weight".to_string()];
        let result = RuleExtractor::new().extract_values(&request);
        assert!(result.get("reps").is_none());
        assert_eq!(value(&result, "weight"), Some(SlotValue::quantity(135.0, "lbs")));
    }

    #[test]
    fn test_correction_cue_reports_confirmed_slots() {
        let schema = workout_schema("lbs");
        let mut request = ExtractionRequest::new("actually it was 8 reps", &schema);
        request.targets = vec!["weight".to_string()];
        let result = RuleExtractor::new().extract_values(&request);
        assert_eq!(value(&result, "reps"), Some(SlotValue::Integer(8)));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let schema = workout_schema("lbs");
        let first = extract(&schema, "bench press 3x8 @ 185 lbs");
        let second = extract(&schema, "bench press 3x8 @ 185 lbs");
        assert_eq!(first, second);
        assert_eq!(value(&first, "sets"), Some(SlotValue::Integer(3)));
        assert_eq!(value(&first, "reps"), Some(SlotValue::Integer(8)));
    }

    // ---- Choice spotting ----

    #[test]
    fn test_measurement_choice_and_quantity() {
        let schema = measurement_schema();
        let result = extract(&schema, "I weighed in at 180.4 lbs this morning");
        assert_eq!(
            value(&result, "metric"),
            Some(SlotValue::Choice("body_weight".to_string()))
        );
        assert_eq!(value(&result, "value"), Some(SlotValue::quantity(180.4, "lbs")));
    }

    #[test]
    fn test_percentage_unit() {
        let schema = measurement_schema();
        let result = extract(&schema, "body fat is 18%");
        assert_eq!(
            value(&result, "metric"),
            Some(SlotValue::Choice("body_fat".to_string()))
        );
        assert_eq!(value(&result, "value"), Some(SlotValue::quantity(18.0, "%")));
    }

    #[test]
    fn test_spot_choice_confidence_splits_on_ties() {
        let options = vec![
            ChoiceOption::new("workout", &["lift"]),
            ChoiceOption::new("measurement", &["scale"]),
        ];
        let (id, confidence) = spot_choice("lift then scale", &options).unwrap();
        assert_eq!(id, "workout");
        assert!(confidence < 0.5);
        let (_, confidence) = spot_choice("heavy lift", &options).unwrap();
        assert!((confidence - CHOICE_CONFIDENCE).abs() < 1e-6);
        assert!(spot_choice("hello there", &options).is_none());
    }

    #[test]
    fn test_clean_free_text() {
        assert_eq!(clean_free_text("Um, I did the Arnold press!"), "arnold press");
        assert_eq!(clean_free_text("just some curls"), "curls");
    }

    #[test]
    fn test_duration_multiplier() {
        assert_eq!(duration_multiplier("seconds"), Some(1));
        assert_eq!(duration_multiplier("min"), Some(60));
        assert_eq!(duration_multiplier("hours"), None);
    }
}
