//! Workout logging: one exercise set per record.

use std::collections::BTreeMap;

use crate::registry::DomainSubgraph;
use crate::schema::{RecordSchema, SlotKind, SlotSpec, SlotValue, UnitAlias};
use crate::slots::FinishedRecord;

pub const WORKOUT_DOMAIN: &str = "workout";

/// Lifts recognised verbatim. Anything else is still accepted as free text.
const MOVEMENTS: &[&str] = &[
    "bench press",
    "incline bench press",
    "close grip bench press",
    "squat",
    "back squat",
    "front squat",
    "deadlift",
    "romanian deadlift",
    "sumo deadlift",
    "overhead press",
    "shoulder press",
    "military press",
    "leg press",
    "barbell row",
    "dumbbell row",
    "pull up",
    "pullup",
    "chin up",
    "chinup",
    "push up",
    "pushup",
    "dip",
    "lunge",
    "curl",
    "bicep curl",
    "hammer curl",
    "leg curl",
    "leg extension",
    "tricep extension",
    "lat pulldown",
    "hip thrust",
    "calf raise",
    "lateral raise",
    "face pull",
    "shrug",
];

const INTENT_KEYWORDS: &[&str] = &[
    "workout",
    "work out",
    "worked out",
    "lift",
    "lifted",
    "lifting",
    "exercise",
    "training",
    "gym",
    "reps",
    "sets",
];

const WEIGHT_UNITS: &str = r"lbs?|pounds?|kgs?|kilos?|kilograms?";

/// Words that refer back to something instead of naming a lift.
const NOT_A_MOVEMENT: &[&str] = &["it", "that", "this", "them", "those", "workout", "exercise"];

/// Build the workout schema. Unitless weights are read in `default_unit`.
pub fn workout_schema(default_unit: &str) -> RecordSchema {
    RecordSchema::new(
        WORKOUT_DOMAIN,
        vec![
            SlotSpec::new(
                "movement",
                SlotKind::Text {
                    vocabulary: MOVEMENTS.iter().map(|m| m.to_string()).collect(),
                    open: true,
                },
            )
            .required()
            .label("exercise")
            .prompt("What exercise did you do?")
            .aliases(&["movement", "exercise", "lift"])
            .pattern(
                r"\b(?:did|doing|do|finished|completed|performed)\s+(?:some\s+|a\s+few\s+|my\s+)?(?P<value>[a-z][a-z' -]*?)\s*(?:\bfor\b|\bat\b|\bwith\b|@|\d|[,.!?]|$)",
            )
            .ignore(NOT_A_MOVEMENT)
            .validator(check_movement),
            SlotSpec::new("reps", SlotKind::Integer)
                .required()
                .prompt("How many reps did you do?")
                .aliases(&["reps", "rep", "repetitions"])
                .pattern(r"(?P<value>\d+)\s*(?:reps?|repetitions|times)\b")
                .pattern(r"\bsets?\s+of\s+(?P<value>\d+)")
                .pattern(r"\b\d+\s*(?:x|by)\s*(?P<value>\d+)\b")
                .validator(check_reps),
            SlotSpec::new(
                "weight",
                SlotKind::Quantity {
                    units: vec![
                        UnitAlias::new("lbs", &["lb", "lbs", "pound", "pounds"]),
                        UnitAlias::new("kg", &["kg", "kgs", "kilo", "kilos", "kilogram", "kilograms"]),
                        UnitAlias::new("bodyweight", &["bodyweight", "body weight"]),
                    ],
                    default_unit: Some(default_unit.to_string()),
                },
            )
            .required()
            .prompt("How much weight did you use?")
            .aliases(&["weight", "load", "lbs", "pounds", "kg"])
            .pattern(&format!(
                r"(?P<amount>\d+(?:\.\d+)?)\s*(?P<unit>{})\b",
                WEIGHT_UNITS
            ))
            .pattern(&format!(
                r"(?:\bat|@)\s*(?P<amount>\d+(?:\.\d+)?)(?:\s*(?P<unit>{})\b)?",
                WEIGHT_UNITS
            ))
            .pattern(r"\b(?P<unit>body\s*weight)\b")
            .validator(check_weight),
            SlotSpec::new("sets", SlotKind::Integer)
                .prompt("How many sets did you do?")
                .aliases(&["sets", "set"])
                .pattern(r"(?P<value>\d+)\s*sets?\b")
                .pattern(r"\b(?P<value>\d+)\s*(?:x|by)\s*\d+\b")
                .validator(check_sets),
            SlotSpec::new("rest", SlotKind::Duration)
                .label("rest time")
                .prompt("How long did you rest between sets?")
                .aliases(&["rest", "rested", "break"])
                .pattern(
                    r"(?P<amount>\d+)\s*(?P<unit>seconds?|secs?|s|minutes?|mins?|m)\s+(?:of\s+)?rest\b",
                )
                .pattern(
                    r"\brest(?:ed|ing)?\s+(?:for\s+)?(?P<amount>\d+)\s*(?P<unit>seconds?|secs?|minutes?|mins?)\b",
                )
                .validator(check_rest),
            SlotSpec::new(
                "notes",
                SlotKind::Text {
                    vocabulary: Vec::new(),
                    open: true,
                },
            )
            .prompt("Any notes about the set?")
            .aliases(&["notes", "note"])
            .pattern(r"\bnotes?\s*:?\s*(?P<value>.+)$"),
        ],
    )
}

fn check_movement(value: &SlotValue) -> Result<(), String> {
    let SlotValue::Text(name) = value else {
        return Err("exercise must be text".to_string());
    };
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 60 {
        return Err("exercise names are 1 to 60 characters".to_string());
    }
    if !name.chars().any(char::is_alphabetic) {
        return Err("exercise names need at least one letter".to_string());
    }
    if NOT_A_MOVEMENT.contains(&name) {
        return Err(format!("\"{}\" doesn't name an exercise", name));
    }
    Ok(())
}

fn check_reps(value: &SlotValue) -> Result<(), String> {
    match value {
        SlotValue::Integer(n) if (1..=1000).contains(n) => Ok(()),
        SlotValue::Integer(n) => Err(format!("{} reps is out of range (1 to 1000)", n)),
        _ => Err("reps must be a whole number".to_string()),
    }
}

fn check_sets(value: &SlotValue) -> Result<(), String> {
    match value {
        SlotValue::Integer(n) if (1..=100).contains(n) => Ok(()),
        SlotValue::Integer(n) => Err(format!("{} sets is out of range (1 to 100)", n)),
        _ => Err("sets must be a whole number".to_string()),
    }
}

fn check_weight(value: &SlotValue) -> Result<(), String> {
    match value {
        _ if value.is_bodyweight() => Ok(()),
        SlotValue::Quantity { amount, .. } if (0.0..=2000.0).contains(amount) => Ok(()),
        SlotValue::Quantity { amount, unit } => {
            Err(format!("{} {} is out of range (0 to 2000)", amount, unit))
        }
        _ => Err("weight needs an amount and a unit".to_string()),
    }
}

fn check_rest(value: &SlotValue) -> Result<(), String> {
    match value {
        SlotValue::Seconds(s) if (1..=3600).contains(s) => Ok(()),
        SlotValue::Seconds(s) => Err(format!("{} seconds of rest is out of range (1 to 3600)", s)),
        _ => Err("rest must be a duration".to_string()),
    }
}

fn plural(n: i64, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}

/// The workout domain subgraph.
pub struct WorkoutDomain {
    schema: RecordSchema,
}

impl WorkoutDomain {
    pub fn new(default_unit: &str) -> Self {
        Self {
            schema: workout_schema(default_unit),
        }
    }
}

impl DomainSubgraph for WorkoutDomain {
    fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    fn keywords(&self) -> Vec<String> {
        INTENT_KEYWORDS
            .iter()
            .map(|k| k.to_string())
            .chain(MOVEMENTS.iter().flat_map(|m| [m.to_string(), format!("{}s", m)]))
            .collect()
    }

    fn summarize(&self, values: &BTreeMap<String, SlotValue>) -> String {
        let mut summary = values
            .get("movement")
            .map(|m| m.to_string())
            .unwrap_or_else(|| "workout".to_string());

        let count = |name: &str| match values.get(name) {
            Some(SlotValue::Integer(n)) => Some(*n),
            _ => None,
        };
        match (count("sets"), count("reps")) {
            (Some(sets), Some(reps)) => {
                summary.push_str(&format!(", {} of {}", plural(sets, "set"), plural(reps, "rep")))
            }
            (None, Some(reps)) => summary.push_str(&format!(", {}", plural(reps, "rep"))),
            (Some(sets), None) => summary.push_str(&format!(", {}", plural(sets, "set"))),
            (None, None) => {}
        }
        if let Some(weight) = values.get("weight") {
            summary.push_str(&format!(" at {}", weight));
        }
        if let Some(rest) = values.get("rest") {
            summary.push_str(&format!(", {} rest", rest));
        }
        if let Some(notes) = values.get("notes") {
            summary.push_str(&format!(" (notes: {})", notes));
        }
        summary
    }

    fn describe_saved(&self, record: &FinishedRecord) -> String {
        let movement = record
            .field("movement")
            .map(|m| m.to_string())
            .unwrap_or_default();
        let sets = match record.field("sets") {
            Some(SlotValue::Integer(n)) => *n,
            _ => 1,
        };
        let reps = record.field("reps").map(|r| r.to_string()).unwrap_or_default();
        let weight = record.field("weight").map(|w| w.to_string()).unwrap_or_default();
        format!("Workout saved! {}: {}x{} @ {}", movement, sets, reps, weight)
    }
}
