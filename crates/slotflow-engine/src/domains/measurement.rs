//! Body measurements: weigh-ins, body fat and waist size.

use std::collections::BTreeMap;

use crate::registry::DomainSubgraph;
use crate::schema::{ChoiceOption, RecordSchema, SlotKind, SlotSpec, SlotValue, UnitAlias};
use crate::slots::FinishedRecord;

pub const MEASUREMENT_DOMAIN: &str = "measurement";

const INTENT_KEYWORDS: &[&str] = &[
    "weigh in",
    "weighed in",
    "weighed",
    "weigh",
    "scale",
    "body weight",
    "body fat",
    "waist",
    "measurement",
    "measurements",
    "measure",
    "my weight",
];

pub fn measurement_schema() -> RecordSchema {
    RecordSchema::new(
        MEASUREMENT_DOMAIN,
        vec![
            SlotSpec::new(
                "metric",
                SlotKind::Choice {
                    options: vec![
                        ChoiceOption::new(
                            "body_weight",
                            &[
                                "bodyweight",
                                "weight",
                                "weighed",
                                "weigh in",
                                "weighed in",
                                "scale",
                                "my weight",
                            ],
                        ),
                        ChoiceOption::new("body_fat", &["body fat", "fat percentage", "bf"]),
                        ChoiceOption::new("waist", &["waist", "waistline"]),
                    ],
                },
            )
            .required()
            .label("measurement")
            .prompt("What did you measure? I can log body weight, body fat or waist.")
            .aliases(&["metric", "measurement", "type"]),
            SlotSpec::new(
                "value",
                SlotKind::Quantity {
                    units: vec![
                        UnitAlias::new("lbs", &["lb", "lbs", "pound", "pounds"]),
                        UnitAlias::new("kg", &["kg", "kgs", "kilo", "kilos", "kilogram", "kilograms"]),
                        UnitAlias::new("%", &["percent"]),
                        UnitAlias::new("in", &["inch", "inches"]),
                        UnitAlias::new(
                            "cm",
                            &["centimeter", "centimeters", "centimetre", "centimetres"],
                        ),
                    ],
                    default_unit: None,
                },
            )
            .required()
            .label("reading")
            .prompt("What was the reading, with its unit? For example 180 lbs or 18%.")
            .aliases(&["value", "reading", "number"])
            .pattern(
                r"(?P<amount>\d+(?:\.\d+)?)\s*(?P<unit>lbs?|pounds?|kgs?|kilos?|kilograms?|percent|inch(?:es)?|in|cm|centimet(?:er|re)s?)\b",
            )
            .pattern(r"(?P<amount>\d+(?:\.\d+)?)\s*(?P<unit>%)")
            .validator(check_reading),
        ],
    )
}

fn check_reading(value: &SlotValue) -> Result<(), String> {
    match value {
        SlotValue::Quantity { amount, unit } if unit == "%" && !(0.0..=100.0).contains(amount) => {
            Err(format!("{}% is not a valid percentage", amount))
        }
        SlotValue::Quantity { amount, unit } if *amount <= 0.0 || *amount > 1000.0 => {
            Err(format!("{} {} is out of range", amount, unit))
        }
        SlotValue::Quantity { .. } => Ok(()),
        _ => Err("the reading needs an amount and a unit".to_string()),
    }
}

/// The body measurement domain subgraph.
pub struct MeasurementDomain {
    schema: RecordSchema,
}

impl MeasurementDomain {
    pub fn new() -> Self {
        Self {
            schema: measurement_schema(),
        }
    }
}

impl Default for MeasurementDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainSubgraph for MeasurementDomain {
    fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    fn keywords(&self) -> Vec<String> {
        INTENT_KEYWORDS.iter().map(|k| k.to_string()).collect()
    }

    fn summarize(&self, values: &BTreeMap<String, SlotValue>) -> String {
        match (values.get("metric"), values.get("value")) {
            (Some(metric), Some(value)) => format!("{}: {}", metric, value),
            (Some(metric), None) => metric.to_string(),
            (None, Some(value)) => format!("measurement: {}", value),
            (None, None) => "measurement".to_string(),
        }
    }

    fn describe_saved(&self, record: &FinishedRecord) -> String {
        format!("Measurement saved! {}", self.summarize(&record.values()))
    }
}
