//! Built-in flow definitions: the onboarding quiz and the check-in wizards.
//!
//! Flows are data, not code — the engine in `mod.rs` drives any of these
//! without flow-specific branches.

use std::collections::HashMap;

use serde_json::Value;

use crate::types::{Answer, AnswerEntry, CheckinEvent, CheckinType, CheckinValue, FlowKind};

pub struct StepDef {
    pub key: &'static str,
    pub prompt: &'static str,
    pub kind: StepKind,
}

pub enum StepKind {
    Choice {
        options: &'static [&'static str],
        allow_custom_text: bool,
        min_selections: usize,
        max_selections: usize,
    },
    FreeText {
        skippable: bool,
        validator: Option<fn(&str) -> Result<(), String>>,
    },
    NumericRange {
        min: i64,
        max: i64,
    },
}

pub struct FlowDef {
    pub kind: FlowKind,
    pub intro: &'static str,
    pub steps: &'static [StepDef],
    pub completion_text: &'static str,
}

static ONBOARDING: FlowDef = FlowDef {
    kind: FlowKind::Onboarding,
    intro: "Let's set up your profile. A few quick questions:",
    steps: &[
        StepDef {
            key: "primary_goal",
            prompt: "What's your main goal right now?",
            kind: StepKind::Choice {
                options: &[
                    "Build muscle & strength",
                    "Lose weight",
                    "More energy",
                    "Grow my income",
                    "Better focus & deep work",
                    "Overall balance",
                ],
                allow_custom_text: true,
                min_selections: 1,
                max_selections: 1,
            },
        },
        StepDef {
            key: "work_style",
            prompt: "How do you work best?",
            kind: StepKind::Choice {
                options: &["Structured plans", "Flexible bursts", "Deadline pressure"],
                allow_custom_text: false,
                min_selections: 1,
                max_selections: 1,
            },
        },
        StepDef {
            key: "energy_peak",
            prompt: "When is your energy at its peak?",
            kind: StepKind::Choice {
                options: &["Morning", "Afternoon", "Evening", "Night"],
                allow_custom_text: false,
                min_selections: 1,
                max_selections: 1,
            },
        },
        StepDef {
            key: "sleep_quality",
            prompt: "How would you rate your sleep lately?",
            kind: StepKind::Choice {
                options: &["Excellent", "Good", "Average", "Poor", "Very poor"],
                allow_custom_text: false,
                min_selections: 1,
                max_selections: 1,
            },
        },
        StepDef {
            key: "training_frequency",
            prompt: "How many workouts do you do per week?",
            kind: StepKind::NumericRange { min: 0, max: 14 },
        },
        StepDef {
            key: "focus_blockers",
            prompt: "What gets in the way of your focus? Pick up to three.",
            kind: StepKind::Choice {
                options: &[
                    "Notifications",
                    "Meetings",
                    "Low energy",
                    "Procrastination",
                    "Unclear priorities",
                ],
                allow_custom_text: true,
                min_selections: 1,
                max_selections: 3,
            },
        },
        StepDef {
            key: "money_focus",
            prompt: "Where's your head at financially?",
            kind: StepKind::Choice {
                options: &["Grow income", "Save more", "Invest better", "Not a priority"],
                allow_custom_text: false,
                min_selections: 1,
                max_selections: 1,
            },
        },
        StepDef {
            key: "motivation",
            prompt: "In a sentence: what drives you? (reply '-' to skip)",
            kind: StepKind::FreeText {
                skippable: true,
                validator: None,
            },
        },
    ],
    completion_text: "Profile set up — you're ready to go.",
};

static WORKOUT: FlowDef = FlowDef {
    kind: FlowKind::CheckinWorkout,
    intro: "Logging a workout.",
    steps: &[
        StepDef {
            key: "workout_type",
            prompt: "What kind of workout?",
            kind: StepKind::Choice {
                options: &["Cardio", "Strength", "Mobility", "Sports"],
                allow_custom_text: true,
                min_selections: 1,
                max_selections: 1,
            },
        },
        StepDef {
            key: "duration",
            prompt: "How many minutes?",
            kind: StepKind::NumericRange { min: 5, max: 300 },
        },
        StepDef {
            key: "intensity",
            prompt: "How intense was it?",
            kind: StepKind::Choice {
                options: &["Low", "Medium", "High"],
                allow_custom_text: false,
                min_selections: 1,
                max_selections: 1,
            },
        },
        StepDef {
            key: "note",
            prompt: "Anything to note? (reply '-' to skip)",
            kind: StepKind::FreeText {
                skippable: true,
                validator: None,
            },
        },
    ],
    completion_text: "Workout logged.",
};

static NUTRITION: FlowDef = FlowDef {
    kind: FlowKind::CheckinNutrition,
    intro: "Nutrition check-in.",
    steps: &[
        StepDef {
            key: "quality",
            prompt: "How well did you eat today, 1-10?",
            kind: StepKind::NumericRange { min: 1, max: 10 },
        },
        StepDef {
            key: "note",
            prompt: "Anything to note? (reply '-' to skip)",
            kind: StepKind::FreeText {
                skippable: true,
                validator: None,
            },
        },
    ],
    completion_text: "Nutrition logged.",
};

static ENERGY: FlowDef = FlowDef {
    kind: FlowKind::CheckinEnergy,
    intro: "Energy check-in.",
    steps: &[
        StepDef {
            key: "level",
            prompt: "How's your energy right now, 1-10?",
            kind: StepKind::NumericRange { min: 1, max: 10 },
        },
        StepDef {
            key: "note",
            prompt: "Anything to note? (reply '-' to skip)",
            kind: StepKind::FreeText {
                skippable: true,
                validator: None,
            },
        },
    ],
    completion_text: "Energy logged.",
};

static MOOD: FlowDef = FlowDef {
    kind: FlowKind::CheckinMood,
    intro: "Mood check-in.",
    steps: &[
        StepDef {
            key: "score",
            prompt: "How's your mood, 1-10?",
            kind: StepKind::NumericRange { min: 1, max: 10 },
        },
        StepDef {
            key: "note",
            prompt: "Anything to note? (reply '-' to skip)",
            kind: StepKind::FreeText {
                skippable: true,
                validator: None,
            },
        },
    ],
    completion_text: "Mood logged.",
};

static SLEEP: FlowDef = FlowDef {
    kind: FlowKind::CheckinSleep,
    intro: "Sleep check-in.",
    steps: &[
        StepDef {
            key: "hours",
            prompt: "How many hours did you sleep?",
            kind: StepKind::NumericRange { min: 0, max: 16 },
        },
        StepDef {
            key: "quality",
            prompt: "Sleep quality, 1-10?",
            kind: StepKind::NumericRange { min: 1, max: 10 },
        },
        StepDef {
            key: "note",
            prompt: "Anything to note? (reply '-' to skip)",
            kind: StepKind::FreeText {
                skippable: true,
                validator: None,
            },
        },
    ],
    completion_text: "Sleep logged.",
};

pub fn flow_def(kind: FlowKind) -> &'static FlowDef {
    match kind {
        FlowKind::Onboarding => &ONBOARDING,
        FlowKind::CheckinWorkout => &WORKOUT,
        FlowKind::CheckinNutrition => &NUTRITION,
        FlowKind::CheckinEnergy => &ENERGY,
        FlowKind::CheckinMood => &MOOD,
        FlowKind::CheckinSleep => &SLEEP,
    }
}

/// Collected answers as the open-ended map stored on the profile.
pub fn answers_to_map(answers: &[AnswerEntry]) -> HashMap<String, Value> {
    answers
        .iter()
        .map(|entry| {
            let value = match &entry.answer {
                Answer::Selections(items) => Value::Array(
                    items.iter().map(|s| Value::String(s.clone())).collect(),
                ),
                Answer::Text(s) => Value::String(s.clone()),
                Answer::Number(n) => Value::from(*n),
                Answer::Skipped => serde_json::json!({ "skipped": true }),
            };
            (entry.key.to_string(), value)
        })
        .collect()
}

fn first_selection(answers: &[AnswerEntry], key: &str) -> Option<String> {
    answers.iter().find(|e| e.key == key).and_then(|e| match &e.answer {
        Answer::Selections(items) => items.first().cloned(),
        Answer::Text(s) => Some(s.clone()),
        _ => None,
    })
}

fn number(answers: &[AnswerEntry], key: &str) -> Option<i64> {
    answers.iter().find(|e| e.key == key).and_then(|e| match e.answer {
        Answer::Number(n) => Some(n),
        _ => None,
    })
}

fn note(answers: &[AnswerEntry]) -> Option<String> {
    answers.iter().find(|e| e.key == "note").and_then(|e| match &e.answer {
        Answer::Text(s) => Some(s.clone()),
        _ => None,
    })
}

/// Build the check-in event a completed check-in flow records. None for the
/// onboarding flow (which records quiz answers instead).
pub fn checkin_event(kind: FlowKind, user_id: &str, answers: &[AnswerEntry]) -> Option<CheckinEvent> {
    let (checkin_type, value) = match kind {
        FlowKind::Onboarding => return None,
        FlowKind::CheckinWorkout => (
            CheckinType::Workout,
            CheckinValue::Workout {
                kind: first_selection(answers, "workout_type")?.to_lowercase(),
                duration_minutes: number(answers, "duration")? as u32,
                intensity: first_selection(answers, "intensity")?.to_lowercase(),
            },
        ),
        FlowKind::CheckinNutrition => (
            CheckinType::Nutrition,
            CheckinValue::Scale(number(answers, "quality")? as u8),
        ),
        FlowKind::CheckinEnergy => (
            CheckinType::Energy,
            CheckinValue::Scale(number(answers, "level")? as u8),
        ),
        FlowKind::CheckinMood => (
            CheckinType::Mood,
            CheckinValue::Scale(number(answers, "score")? as u8),
        ),
        FlowKind::CheckinSleep => (
            CheckinType::Sleep,
            CheckinValue::Sleep {
                hours: number(answers, "hours")? as f64,
                quality: number(answers, "quality")? as u8,
            },
        ),
    };
    Some(CheckinEvent::new(user_id, checkin_type, value, note(answers)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_flow_has_at_least_one_step() {
        for kind in [
            FlowKind::Onboarding,
            FlowKind::CheckinWorkout,
            FlowKind::CheckinNutrition,
            FlowKind::CheckinEnergy,
            FlowKind::CheckinMood,
            FlowKind::CheckinSleep,
        ] {
            assert!(!flow_def(kind).steps.is_empty());
        }
    }

    #[test]
    fn workout_answers_build_a_structured_event() {
        let answers = vec![
            AnswerEntry {
                key: "workout_type".into(),
                answer: Answer::Selections(vec!["Cardio".into()]),
            },
            AnswerEntry {
                key: "duration".into(),
                answer: Answer::Number(45),
            },
            AnswerEntry {
                key: "intensity".into(),
                answer: Answer::Selections(vec!["High".into()]),
            },
            AnswerEntry {
                key: "note".into(),
                answer: Answer::Skipped,
            },
        ];
        let event = checkin_event(FlowKind::CheckinWorkout, "u1", &answers).unwrap();
        assert_eq!(event.kind, CheckinType::Workout);
        assert_eq!(
            event.value,
            CheckinValue::Workout {
                kind: "cardio".into(),
                duration_minutes: 45,
                intensity: "high".into(),
            }
        );
        assert_eq!(event.note, None);
    }

    #[test]
    fn skip_sentinel_survives_into_the_answer_map() {
        let answers = vec![AnswerEntry {
            key: "motivation".into(),
            answer: Answer::Skipped,
        }];
        let map = answers_to_map(&answers);
        assert_eq!(map["motivation"], serde_json::json!({ "skipped": true }));
    }
}
