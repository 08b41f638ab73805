//! Record schemas: the static, per-domain description of what a finished
//! record contains and how each slot is asked for, recognised and validated.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use slotflow_core::types::DomainId;

/// Per-slot validation predicate. Returns a human-readable reason on failure.
pub type Validator = fn(&SlotValue) -> Result<(), String>;

/// A canonical unit and the ways people say it.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitAlias {
    pub unit: String,
    pub aliases: Vec<String>,
}

impl UnitAlias {
    pub fn new(unit: &str, aliases: &[&str]) -> Self {
        Self {
            unit: unit.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Whether `word` names this unit.
    pub fn matches(&self, word: &str) -> bool {
        self.unit == word || self.aliases.iter().any(|a| a == word)
    }
}

/// One allowed value of an enumerated slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceOption {
    pub id: String,
    pub synonyms: Vec<String>,
}

impl ChoiceOption {
    pub fn new(id: &str, synonyms: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// The type of a slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotKind {
    Integer,
    Decimal,
    /// An amount with a unit, e.g. `135 lbs`.
    Quantity {
        units: Vec<UnitAlias>,
        default_unit: Option<String>,
    },
    /// A span of time, stored in seconds.
    Duration,
    Choice { options: Vec<ChoiceOption> },
    /// Free text. `vocabulary` lists well-known values spotted verbatim;
    /// `open` allows values outside it.
    Text { vocabulary: Vec<String>, open: bool },
}

impl SlotKind {
    /// Resolve a spoken unit to its canonical form.
    pub fn canonical_unit(&self, word: &str) -> Option<&str> {
        match self {
            SlotKind::Quantity { units, .. } => units
                .iter()
                .find(|u| u.matches(word))
                .map(|u| u.unit.as_str()),
            _ => None,
        }
    }
}

/// A typed slot value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SlotValue {
    Integer(i64),
    Decimal(f64),
    Quantity { amount: f64, unit: String },
    Seconds(u32),
    Choice(String),
    Text(String),
}

impl SlotValue {
    pub fn quantity(amount: f64, unit: &str) -> Self {
        SlotValue::Quantity {
            amount,
            unit: unit.to_string(),
        }
    }

    /// Quantities measured against the body itself carry no amount.
    pub fn is_bodyweight(&self) -> bool {
        matches!(self, SlotValue::Quantity { unit, .. } if unit == "bodyweight")
    }

    /// Short tokens a user might quote when referring to this value.
    pub fn mention_tokens(&self) -> Vec<String> {
        match self {
            SlotValue::Integer(n) => vec![n.to_string()],
            SlotValue::Decimal(d) => vec![d.to_string()],
            SlotValue::Quantity { unit, .. } if unit == "bodyweight" => {
                vec!["bodyweight".to_string(), "body weight".to_string()]
            }
            SlotValue::Quantity { amount, .. } => vec![amount.to_string()],
            SlotValue::Seconds(s) => vec![s.to_string()],
            SlotValue::Choice(id) => vec![id.clone(), id.replace('_', " ")],
            SlotValue::Text(t) => vec![t.to_lowercase()],
        }
    }

    /// JSON form used in persisted payloads.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SlotValue::Integer(n) => serde_json::json!(n),
            SlotValue::Decimal(d) => serde_json::json!(d),
            SlotValue::Quantity { unit, .. } if unit == "bodyweight" => {
                serde_json::json!({ "amount": null, "unit": unit })
            }
            SlotValue::Quantity { amount, unit } => {
                serde_json::json!({ "amount": amount, "unit": unit })
            }
            SlotValue::Seconds(s) => serde_json::json!(s),
            SlotValue::Choice(id) => serde_json::json!(id),
            SlotValue::Text(t) => serde_json::json!(t),
        }
    }
}

impl fmt::Display for SlotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotValue::Integer(n) => write!(f, "{}", n),
            SlotValue::Decimal(d) => write!(f, "{}", d),
            SlotValue::Quantity { unit, .. } if unit == "bodyweight" => f.write_str("bodyweight"),
            SlotValue::Quantity { amount, unit } if unit == "%" => write!(f, "{}%", amount),
            SlotValue::Quantity { amount, unit } => write!(f, "{} {}", amount, unit),
            SlotValue::Seconds(s) if *s >= 60 && s % 60 == 0 => write!(f, "{} min", s / 60),
            SlotValue::Seconds(s) => write!(f, "{}s", s),
            SlotValue::Choice(id) => f.write_str(&id.replace('_', " ")),
            SlotValue::Text(t) => f.write_str(t),
        }
    }
}

/// Definition of a single slot.
#[derive(Debug, Clone)]
pub struct SlotSpec {
    pub name: String,
    pub label: String,
    pub kind: SlotKind,
    pub required: bool,
    /// Clarifying question asked while the slot is unfilled.
    pub prompt: String,
    /// Words that refer to the slot itself ("reps", "weight").
    pub aliases: Vec<String>,
    /// Recognition patterns with a `value` group, or `amount` and `unit` groups.
    pub patterns: Vec<Regex>,
    /// Words a pattern may capture that never count as a value.
    pub ignored: Vec<String>,
    pub validator: Option<Validator>,
}

impl SlotSpec {
    pub fn new(name: &str, kind: SlotKind) -> Self {
        let label = name.replace('_', " ");
        Self {
            prompt: format!("What was the {}?", label),
            name: name.to_string(),
            label,
            kind,
            required: false,
            aliases: Vec::new(),
            patterns: Vec::new(),
            ignored: Vec::new(),
            validator: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn prompt(mut self, prompt: &str) -> Self {
        self.prompt = prompt.to_string();
        self
    }

    pub fn aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Add a recognition pattern.
    ///
    /// # Panics
    ///
    /// Panics if `pattern` is not a valid regex. Patterns are declared as
    /// literals alongside the domain schema.
    pub fn pattern(mut self, pattern: &str) -> Self {
        self.patterns
            .push(Regex::new(pattern).expect("Invalid slot pattern regex"));
        self
    }

    pub fn ignore(mut self, words: &[&str]) -> Self {
        self.ignored = words.iter().map(|w| w.to_string()).collect();
        self
    }

    pub fn is_ignored(&self, word: &str) -> bool {
        self.ignored.iter().any(|w| w.eq_ignore_ascii_case(word.trim()))
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Check the value against the slot's type, then its validator.
    pub fn validate(&self, value: &SlotValue) -> Result<(), String> {
        match (&self.kind, value) {
            (SlotKind::Integer, SlotValue::Integer(_)) => {}
            (SlotKind::Decimal, SlotValue::Decimal(d)) if d.is_finite() => {}
            (SlotKind::Quantity { units, .. }, SlotValue::Quantity { amount, unit }) => {
                if !units.iter().any(|u| &u.unit == unit) {
                    return Err(format!("{} is not a unit I know for {}", unit, self.label));
                }
                if !amount.is_finite() {
                    return Err(format!("{} must be a number", self.label));
                }
            }
            (SlotKind::Duration, SlotValue::Seconds(_)) => {}
            (SlotKind::Choice { options }, SlotValue::Choice(id)) => {
                if !options.iter().any(|o| &o.id == id) {
                    return Err(format!("{} is not a valid {}", id, self.label));
                }
            }
            (SlotKind::Text { .. }, SlotValue::Text(t)) => {
                if t.trim().is_empty() {
                    return Err(format!("{} must not be empty", self.label));
                }
            }
            _ => return Err(format!("that is not the right kind of value for {}", self.label)),
        }
        match self.validator {
            Some(check) => check(value),
            None => Ok(()),
        }
    }
}

/// Static definition of one domain's record. Immutable once built.
#[derive(Debug, Clone)]
pub struct RecordSchema {
    pub domain: DomainId,
    /// Slots in declaration order; prompts follow this order.
    pub slots: Vec<SlotSpec>,
}

impl RecordSchema {
    pub fn new(domain: impl Into<DomainId>, slots: Vec<SlotSpec>) -> Self {
        Self {
            domain: domain.into(),
            slots,
        }
    }

    pub fn slot(&self, name: &str) -> Option<&SlotSpec> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn required_slots(&self) -> impl Iterator<Item = &SlotSpec> {
        self.slots.iter().filter(|s| s.required)
    }

    pub fn slot_names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positive(value: &SlotValue) -> Result<(), String> {
        match value {
            SlotValue::Integer(n) if *n > 0 => Ok(()),
            _ => Err("must be positive".to_string()),
        }
    }

    fn weight_kind() -> SlotKind {
        SlotKind::Quantity {
            units: vec![
                UnitAlias::new("lbs", &["lb", "pounds"]),
                UnitAlias::new("kg", &["kilos"]),
                UnitAlias::new("bodyweight", &["body weight"]),
            ],
            default_unit: Some("lbs".to_string()),
        }
    }

    #[test]
    fn test_slot_value_display() {
        assert_eq!(SlotValue::Integer(10).to_string(), "10");
        assert_eq!(SlotValue::quantity(135.0, "lbs").to_string(), "135 lbs");
        assert_eq!(SlotValue::quantity(62.5, "kg").to_string(), "62.5 kg");
        assert_eq!(SlotValue::quantity(0.0, "bodyweight").to_string(), "bodyweight");
        assert_eq!(SlotValue::quantity(18.0, "%").to_string(), "18%");
        assert_eq!(SlotValue::Seconds(90).to_string(), "90s");
        assert_eq!(SlotValue::Seconds(120).to_string(), "2 min");
        assert_eq!(SlotValue::Choice("body_fat".to_string()).to_string(), "body fat");
    }

    #[test]
    fn test_slot_value_json() {
        assert_eq!(
            SlotValue::quantity(135.0, "lbs").to_json(),
            serde_json::json!({ "amount": 135.0, "unit": "lbs" })
        );
        assert_eq!(
            SlotValue::quantity(0.0, "bodyweight").to_json()["amount"],
            serde_json::Value::Null
        );
        assert_eq!(SlotValue::Integer(8).to_json(), serde_json::json!(8));
    }

    #[test]
    fn test_mention_tokens() {
        assert_eq!(SlotValue::quantity(135.0, "lbs").mention_tokens(), vec!["135"]);
        assert_eq!(
            SlotValue::Text("Bench Press".to_string()).mention_tokens(),
            vec!["bench press"]
        );
    }

    #[test]
    fn test_unit_canonicalisation() {
        let kind = weight_kind();
        assert_eq!(kind.canonical_unit("pounds"), Some("lbs"));
        assert_eq!(kind.canonical_unit("kg"), Some("kg"));
        assert_eq!(kind.canonical_unit("stone"), None);
        assert_eq!(SlotKind::Integer.canonical_unit("lbs"), None);
    }

    #[test]
    fn test_validate_checks_kind_and_predicate() {
        let reps = SlotSpec::new("reps", SlotKind::Integer).validator(positive);
        assert!(reps.validate(&SlotValue::Integer(5)).is_ok());
        assert_eq!(
            reps.validate(&SlotValue::Integer(0)).unwrap_err(),
            "must be positive"
        );
        assert!(reps.validate(&SlotValue::Text("five".to_string())).is_err());
    }

    #[test]
    fn test_validate_quantity_unit() {
        let weight = SlotSpec::new("weight", weight_kind());
        assert!(weight.validate(&SlotValue::quantity(100.0, "kg")).is_ok());
        assert!(weight.validate(&SlotValue::quantity(100.0, "stone")).is_err());
    }

    #[test]
    fn test_validate_choice_option() {
        let metric = SlotSpec::new(
            "metric",
            SlotKind::Choice {
                options: vec![ChoiceOption::new("waist", &["waistline"])],
            },
        );
        assert!(metric.validate(&SlotValue::Choice("waist".to_string())).is_ok());
        assert!(metric.validate(&SlotValue::Choice("neck".to_string())).is_err());
    }

    #[test]
    fn test_schema_lookup_and_order() {
        let schema = RecordSchema::new(
            "workout",
            vec![
                SlotSpec::new("movement", SlotKind::Text { vocabulary: vec![], open: true })
                    .required(),
                SlotSpec::new("reps", SlotKind::Integer).required(),
                SlotSpec::new("notes", SlotKind::Text { vocabulary: vec![], open: true }),
            ],
        );
        assert_eq!(schema.slot_names(), vec!["movement", "reps", "notes"]);
        assert_eq!(schema.required_slots().count(), 2);
        assert!(schema.slot("reps").is_some());
        assert!(schema.slot("sets").is_none());
        assert_eq!(schema.slot("notes").unwrap().prompt, "What was the notes?");
    }

    #[test]
    #[should_panic(expected = "Invalid slot pattern regex")]
    fn test_invalid_pattern_panics() {
        let _ = SlotSpec::new("reps", SlotKind::Integer).pattern("(unclosed");
    }
}
