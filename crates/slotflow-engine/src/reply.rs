//! Regex-based classification of short conversational replies.
//!
//! Answers to a confirmation question, cancellations, requests to switch to
//! another kind of record, and correction cues are recognised here, before
//! any extractor is involved.

use std::sync::LazyLock;

use regex::Regex;

use crate::schema::RecordSchema;
use crate::slots::SlotSet;
use crate::text::{contains_phrase, normalize_numbers};

/// How a user answered a yes/no question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Affirm,
    Deny,
    Cancel,
    Unclear,
}

static CANCEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:please\s+)?(?:cancel|abort|never\s*mind|forget\s+(?:it|that|about\s+it)|scratch\s+that|start\s+over|discard(?:\s+(?:it|that))?|stop)\b|\b(?:cancel|abort|discard)\s+(?:it|that|this|everything)\b",
    )
    .expect("Invalid cancel regex")
});

static DENY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:no|nope|nah|negative|wrong|incorrect|actually|wait|not\s+(?:quite|really|right|correct)|that'?s\s+(?:wrong|not\s+right|incorrect|not\s+it))\b",
    )
    .expect("Invalid deny regex")
});

static AFFIRM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:yes|yeah|yep|yup|ya|sure|correct|right|ok(?:ay)?|confirm(?:ed)?|affirmative|perfect|exactly|looks\s+(?:good|right)|sounds\s+(?:good|right)|that'?s\s+(?:right|correct|it)|(?:it|that)\s+(?:was|is)\s+(?:right|correct|fine)|save\s+it|log\s+it|do\s+it|go\s+ahead)\b",
    )
    .expect("Invalid affirm regex")
});

static HEDGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:but|except|however)\b").expect("Invalid hedge regex"));

static SWITCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:switch\s+(?:to|over)|something\s+else|let'?s\s+(?:log|track|record)|(?:i\s+want|i'?d\s+like)\s+to\s+(?:log|track|record)|(?:log|track|record)\s+(?:a|an|my)\s+(?:new\s+)?\w+|new\s+(?:entry|record))\b",
    )
    .expect("Invalid switch regex")
});

static CORRECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:actually|instead|not|no|correction|change|changed|wrong|meant|make\s+it|should\s+(?:be|have\s+been))\b",
    )
    .expect("Invalid correction regex")
});

/// Classify an answer to a confirmation question.
///
/// Cancellation wins over everything; a denial wins over an affirmation, and
/// an affirmation qualified with "but"/"except" counts as a denial.
pub fn classify_reply(utterance: &str) -> ReplyKind {
    if CANCEL_RE.is_match(utterance) {
        ReplyKind::Cancel
    } else if DENY_RE.is_match(utterance) {
        ReplyKind::Deny
    } else if AFFIRM_RE.is_match(utterance) {
        if HEDGE_RE.is_match(utterance) {
            ReplyKind::Deny
        } else {
            ReplyKind::Affirm
        }
    } else {
        ReplyKind::Unclear
    }
}

/// Explicit request to discard the record in progress.
pub fn is_cancel(utterance: &str) -> bool {
    CANCEL_RE.is_match(utterance)
}

/// Explicit request to start a different kind of record.
pub fn is_switch_request(utterance: &str) -> bool {
    SWITCH_RE.is_match(utterance)
}

/// Whether the utterance restates a value the user already gave.
pub fn has_correction_cue(utterance: &str) -> bool {
    CORRECTION_RE.is_match(utterance)
}

/// Slots a denial refers to, by name, alias or by quoting the current value.
/// Returned in schema order.
pub fn implicated_slots(utterance: &str, schema: &RecordSchema, slots: &SlotSet) -> Vec<String> {
    let text = normalize_numbers(utterance);
    schema
        .slots
        .iter()
        .filter(|spec| {
            let named = contains_phrase(&text, &spec.name.replace('_', " "))
                || contains_phrase(&text, &spec.label.to_lowercase())
                || spec.aliases.iter().any(|a| contains_phrase(&text, a));
            let quoted = slots.value(&spec.name).is_some_and(|value| {
                value
                    .mention_tokens()
                    .iter()
                    .any(|token| contains_phrase(&text, token))
            });
            named || quoted
        })
        .map(|spec| spec.name.clone())
        .collect()
}
