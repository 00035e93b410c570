//! Per-turn personalization cascade.
//!
//! Previously this kind of logic tends to end up as ad hoc conditionals
//! scattered through response generation; here it is one ordered rule table
//! over the metric snapshot, the same shape the archetype classifier uses.
//! Every matching rule contributes one hint for the context payload.

use crate::metrics::MetricsSnapshot;
use crate::rules::{Rule, RuleTable};

fn table() -> RuleTable<MetricsSnapshot, String> {
    RuleTable::new(vec![
        Rule {
            name: "low_energy",
            applies: |m| m.energy.sample_count > 0 && m.energy.value < 40.0,
            effect: |m| {
                format!(
                    "Energy is low ({:.0}/100); prefer lighter plans and recovery today.",
                    m.energy.value
                )
            },
        },
        Rule {
            name: "poor_sleep",
            applies: |m| m.sleep.value < 40.0,
            effect: |_| {
                "Sleep has been poor lately; nudge toward an earlier wind-down.".to_string()
            },
        },
        Rule {
            name: "low_mood",
            applies: |m| m.mood.sample_count > 0 && m.mood.value < 40.0,
            effect: |_| {
                "Mood is below baseline; keep the tone encouraging, celebrate small wins."
                    .to_string()
            },
        },
        Rule {
            name: "strong_execution",
            applies: |m| m.execution.value >= 80.0,
            effect: |_| {
                "Execution is strong this month; acknowledge the streak before suggesting more."
                    .to_string()
            },
        },
        Rule {
            name: "focus_slipping",
            applies: |m| m.focus.sample_count > 0 && m.focus.value < 50.0,
            effect: |_| {
                "Less than half of recent tasks got done; suggest trimming the task list."
                    .to_string()
            },
        },
    ])
}

/// Coaching hints for this turn, in rule order. Empty when nothing applies.
pub fn hints(snapshot: &MetricsSnapshot) -> Vec<String> {
    table().all_matches(snapshot)
}
