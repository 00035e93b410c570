use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A user's persistent profile. Owned by the profile store; mutated only by
/// flow completion and explicit edit commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    /// Behavioral archetype label. None until onboarding completes.
    pub archetype: Option<String>,
    /// Open-ended quiz answer map (string key -> string/array value). Its
    /// consumers only do key lookups, so no fixed schema is imposed.
    #[serde(default)]
    pub quiz_answers: HashMap<String, Value>,
    pub xp: i64,
    pub level: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_profile_review: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            archetype: None,
            quiz_answers: HashMap::new(),
            xp: 0,
            level: 1,
            last_profile_review: None,
            created_at: Utc::now(),
        }
    }
}

/// The kind of a multi-step flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Onboarding,
    CheckinWorkout,
    CheckinNutrition,
    CheckinEnergy,
    CheckinMood,
    CheckinSleep,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Onboarding => "onboarding",
            FlowKind::CheckinWorkout => "checkin_workout",
            FlowKind::CheckinNutrition => "checkin_nutrition",
            FlowKind::CheckinEnergy => "checkin_energy",
            FlowKind::CheckinMood => "checkin_mood",
            FlowKind::CheckinSleep => "checkin_sleep",
        }
    }

    pub fn parse(s: &str) -> Option<FlowKind> {
        match s {
            "onboarding" => Some(FlowKind::Onboarding),
            "checkin_workout" | "workout" => Some(FlowKind::CheckinWorkout),
            "checkin_nutrition" | "nutrition" => Some(FlowKind::CheckinNutrition),
            "checkin_energy" | "energy" => Some(FlowKind::CheckinEnergy),
            "checkin_mood" | "mood" => Some(FlowKind::CheckinMood),
            "checkin_sleep" | "sleep" => Some(FlowKind::CheckinSleep),
            _ => None,
        }
    }
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, validated answer to one flow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Answer {
    /// One or more resolved option keys from a choice step.
    Selections(Vec<String>),
    /// Free text.
    Text(String),
    /// Integer from a numeric-range step.
    Number(i64),
    /// Explicit skip of an optional step. Stored as a sentinel, never "".
    Skipped,
}

/// One collected answer, keyed by the step that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerEntry {
    pub key: String,
    pub answer: Answer,
}

/// Per-user, per-flow-kind progress record. At most one active session per
/// (user, kind); starting the same kind again replaces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSession {
    pub id: String,
    pub user_id: String,
    pub kind: FlowKind,
    pub current_step: usize,
    /// Append-only.
    pub answers: Vec<AnswerEntry>,
    pub completed: bool,
    /// Optional prompt-wording variant requested at start, e.g. "evening".
    pub seed_variant: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl FlowSession {
    pub fn new(user_id: &str, kind: FlowKind) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind,
            current_step: 0,
            answers: Vec::new(),
            completed: false,
            seed_variant: None,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn with_seed(mut self, seed_variant: Option<&str>) -> Self {
        self.seed_variant = seed_variant.map(str::to_string);
        self
    }

    /// True when `last_activity` is older than the inactivity timeout.
    /// Expired sessions must be treated as absent by every read.
    pub fn is_expired(&self, timeout: chrono::Duration) -> bool {
        Utc::now() - self.last_activity > timeout
    }
}

/// Check-in event type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckinType {
    Energy,
    Mood,
    Sleep,
    Workout,
    Focus,
    Nutrition,
    Custom,
}

impl CheckinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckinType::Energy => "energy",
            CheckinType::Mood => "mood",
            CheckinType::Sleep => "sleep",
            CheckinType::Workout => "workout",
            CheckinType::Focus => "focus",
            CheckinType::Nutrition => "nutrition",
            CheckinType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<CheckinType> {
        match s {
            "energy" => Some(CheckinType::Energy),
            "mood" => Some(CheckinType::Mood),
            "sleep" => Some(CheckinType::Sleep),
            "workout" => Some(CheckinType::Workout),
            "focus" => Some(CheckinType::Focus),
            "nutrition" => Some(CheckinType::Nutrition),
            "custom" => Some(CheckinType::Custom),
            _ => None,
        }
    }
}

/// Typed value of a check-in: either a 1-10 scalar or a small structured
/// record for the event types that need one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckinValue {
    Scale(u8),
    Sleep {
        hours: f64,
        quality: u8,
    },
    Workout {
        kind: String,
        duration_minutes: u32,
        intensity: String,
    },
}

/// Immutable check-in record. Append-only; never updated or deleted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinEvent {
    pub id: String,
    pub user_id: String,
    pub kind: CheckinType,
    pub value: CheckinValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CheckinEvent {
    pub fn new(
        user_id: &str,
        kind: CheckinType,
        value: CheckinValue,
        note: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind,
            value,
            note,
            created_at: Utc::now(),
        }
    }
}

/// A derived 0-100 score. Computed on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedMetric {
    pub name: &'static str,
    pub value: f64,
    pub sample_count: usize,
    pub window_days: u32,
    /// Human label for metrics that carry one (mood bands).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<&'static str>,
}

impl DerivedMetric {
    pub fn neutral(name: &'static str, window_days: u32) -> Self {
        Self {
            name,
            value: 50.0,
            sample_count: 0,
            window_days,
            label: None,
        }
    }
}

/// A task tracked for the focus/execution metrics and the pending-tasks
/// context section. Written by out-of-scope edit commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    /// Higher is more urgent.
    pub priority: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A financial transaction. Positive amounts are income.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub amount: f64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A long-running goal shown in the context payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub user_id: String,
    pub description: String,
    pub status: String, // "active", "completed", "abandoned"
    pub created_at: DateTime<Utc>,
}

/// One turn of the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub user_id: String,
    pub role: String, // "user" or "assistant"
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(user_id: &str, role: &str, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Result of an XP grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantOutcome {
    pub new_xp: i64,
    pub new_level: i64,
    pub leveled_up: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_kind_roundtrips_through_str() {
        for kind in [
            FlowKind::Onboarding,
            FlowKind::CheckinWorkout,
            FlowKind::CheckinNutrition,
            FlowKind::CheckinEnergy,
            FlowKind::CheckinMood,
            FlowKind::CheckinSleep,
        ] {
            assert_eq!(FlowKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn flow_kind_accepts_short_checkin_names() {
        assert_eq!(FlowKind::parse("workout"), Some(FlowKind::CheckinWorkout));
        assert_eq!(FlowKind::parse("mood"), Some(FlowKind::CheckinMood));
        assert_eq!(FlowKind::parse("bogus"), None);
    }

    #[test]
    fn fresh_session_is_not_expired() {
        let s = FlowSession::new("u1", FlowKind::Onboarding);
        assert!(!s.is_expired(chrono::Duration::minutes(30)));
    }
}
