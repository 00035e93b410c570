//! Archetype classification from the completed onboarding answer set.
//!
//! A total, pure function: every possible answer combination maps to exactly
//! one of nine labels. Implemented as an ordered rule table with a
//! guaranteed catch-all; adding an archetype means inserting a rule above
//! the catch-all.

use std::collections::HashMap;

use serde_json::Value;

use crate::rules::{Rule, RuleTable};

pub const ARCHETYPES: [&str; 9] = [
    "athlete",
    "builder",
    "hustler",
    "investor",
    "deep_worker",
    "sprinter",
    "recharger",
    "night_owl",
    "all_rounder",
];

type Answers = HashMap<String, Value>;

/// First string found under `key` (plain string or first array element),
/// lowercased.
fn answer_str(answers: &Answers, key: &str) -> Option<String> {
    match answers.get(key) {
        Some(Value::String(s)) => Some(s.to_lowercase()),
        Some(Value::Array(items)) => items
            .iter()
            .find_map(|v| v.as_str())
            .map(|s| s.to_lowercase()),
        _ => None,
    }
}

/// True when any string under `key` contains `needle` (case-insensitive).
fn answer_has(answers: &Answers, key: &str, needle: &str) -> bool {
    match answers.get(key) {
        Some(Value::String(s)) => s.to_lowercase().contains(needle),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .any(|s| s.to_lowercase().contains(needle)),
        _ => false,
    }
}

fn answer_num(answers: &Answers, key: &str) -> Option<i64> {
    answers.get(key).and_then(|v| v.as_i64())
}

fn rules() -> RuleTable<Answers, &'static str> {
    RuleTable::new(vec![
        // Training-heavy physical goal beats the plain physical-goal rule;
        // that priority is asserted by test.
        Rule {
            name: "athlete",
            applies: |a| {
                (answer_has(a, "primary_goal", "muscle") || answer_has(a, "primary_goal", "weight"))
                    && answer_num(a, "training_frequency").unwrap_or(0) >= 4
            },
            effect: |_| "athlete",
        },
        Rule {
            name: "builder",
            applies: |a| {
                answer_has(a, "primary_goal", "muscle") || answer_has(a, "primary_goal", "weight")
            },
            effect: |_| "builder",
        },
        Rule {
            name: "hustler",
            applies: |a| answer_has(a, "primary_goal", "income"),
            effect: |_| "hustler",
        },
        Rule {
            name: "investor",
            applies: |a| answer_has(a, "money_focus", "invest"),
            effect: |_| "investor",
        },
        Rule {
            name: "deep_worker",
            applies: |a| {
                answer_has(a, "primary_goal", "focus") && answer_has(a, "work_style", "structured")
            },
            effect: |_| "deep_worker",
        },
        Rule {
            name: "sprinter",
            applies: |a| {
                answer_has(a, "primary_goal", "focus")
                    && (answer_has(a, "work_style", "burst")
                        || answer_has(a, "work_style", "deadline"))
            },
            effect: |_| "sprinter",
        },
        Rule {
            name: "recharger",
            applies: |a| {
                answer_has(a, "primary_goal", "energy")
                    || matches!(
                        answer_str(a, "sleep_quality").as_deref(),
                        Some("poor") | Some("very poor") | Some("very_poor")
                    )
            },
            effect: |_| "recharger",
        },
        Rule {
            name: "night_owl",
            applies: |a| answer_has(a, "energy_peak", "night"),
            effect: |_| "night_owl",
        },
        // Catch-all keeps the function total.
        Rule {
            name: "all_rounder",
            applies: |_| true,
            effect: |_| "all_rounder",
        },
    ])
}

/// Map a completed onboarding answer set to exactly one archetype label.
pub fn classify(answers: &Answers) -> &'static str {
    rules()
        .first_match(answers)
        .map(|(_, label)| label)
        .unwrap_or("all_rounder")
}
