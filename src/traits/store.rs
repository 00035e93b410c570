use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::{
    CheckinEvent, CheckinType, ConversationTurn, FlowKind, FlowSession, Goal, Task, Transaction,
    UserProfile,
};

/// User profile persistence. The profile row is the single owner of
/// archetype, quiz answers, and the gamification mirror (xp/level).
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Get a profile by user id. Returns None for unknown users.
    async fn get_profile(&self, user_id: &str) -> anyhow::Result<Option<UserProfile>>;

    /// Create or replace a profile.
    async fn upsert_profile(&self, profile: &UserProfile) -> anyhow::Result<()>;

    /// Set the archetype label after onboarding completes.
    async fn set_archetype(&self, user_id: &str, archetype: &str) -> anyhow::Result<()>;

    /// Merge quiz answers into the profile's answer map (existing keys are
    /// overwritten, others kept).
    async fn merge_quiz_answers(
        &self,
        user_id: &str,
        answers: &HashMap<String, Value>,
    ) -> anyhow::Result<()>;

    /// Mirror the ledger-derived xp/level onto the profile row.
    async fn set_xp_level(&self, user_id: &str, xp: i64, level: i64) -> anyhow::Result<()>;
}

/// Flow session persistence. At most one row per (user, kind).
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(
        &self,
        user_id: &str,
        kind: FlowKind,
    ) -> anyhow::Result<Option<FlowSession>>;

    /// All sessions for a user, most recently active first.
    async fn sessions_for_user(&self, user_id: &str) -> anyhow::Result<Vec<FlowSession>>;

    /// Insert or replace the session for (user, kind). Replacement is
    /// atomic: a new flow of the same kind overwrites the old one whole.
    async fn put_session(&self, session: &FlowSession) -> anyhow::Result<()>;

    /// Delete the session for (user, kind). No error if none exists.
    async fn delete_session(&self, user_id: &str, kind: FlowKind) -> anyhow::Result<()>;

    /// Atomically flip the session's completed flag. Returns true only for
    /// the call that actually flipped it (check-and-set), which is what
    /// makes completion side effects run at most once.
    async fn mark_session_completed(&self, session_id: &str) -> anyhow::Result<bool>;
}

/// Append-only check-in event log.
#[async_trait]
pub trait CheckinStore: Send + Sync {
    async fn record_checkin(&self, event: &CheckinEvent) -> anyhow::Result<()>;

    /// Most recent check-ins of one type, newest first.
    async fn recent_checkins(
        &self,
        user_id: &str,
        kind: CheckinType,
        limit: usize,
    ) -> anyhow::Result<Vec<CheckinEvent>>;

    /// Most recent check-ins of any type, newest first. Used for streak
    /// achievements.
    async fn recent_checkins_any(
        &self,
        user_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<CheckinEvent>>;
}

/// Task persistence for the focus/execution metrics and the pending-tasks
/// context section.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn add_task(&self, task: &Task) -> anyhow::Result<()>;

    /// Mark a task completed now. No-op if already completed.
    async fn complete_task(&self, task_id: &str) -> anyhow::Result<()>;

    /// Tasks due or completed since `since`.
    async fn tasks_in_window(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Task>>;

    /// Uncompleted tasks, ordered by priority then recency.
    async fn pending_tasks(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<Task>>;
}

/// Transaction log reads for the income metric and financial summary.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn add_transaction(&self, tx: &Transaction) -> anyhow::Result<()>;

    /// Positive-amount transactions since `since`, newest first.
    async fn income_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Transaction>>;
}

/// Goal persistence for the active-goals context section.
#[async_trait]
pub trait GoalStore: Send + Sync {
    async fn add_goal(&self, goal: &Goal) -> anyhow::Result<()>;

    async fn active_goals(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<Goal>>;
}

/// Conversation log used by the recent-history context section.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_turn(&self, turn: &ConversationTurn) -> anyhow::Result<()>;

    /// Most recent turns, newest first.
    async fn recent_turns(
        &self,
        user_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ConversationTurn>>;
}

/// Append-only XP ledger plus the persisted achievement-id set.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a grant. When `dedupe_key` is Some and a grant with that key
    /// already exists for the user, nothing is inserted and false is
    /// returned. The check-and-insert must be atomic (compare-and-set).
    async fn insert_grant(
        &self,
        user_id: &str,
        amount: i64,
        reason: &str,
        dedupe_key: Option<&str>,
    ) -> anyhow::Result<bool>;

    /// Cumulative XP for a user.
    async fn total_xp(&self, user_id: &str) -> anyhow::Result<i64>;

    /// Record that an achievement fired. Returns true only the first time
    /// for a given (user, achievement) pair.
    async fn try_record_achievement(
        &self,
        user_id: &str,
        achievement_id: &str,
    ) -> anyhow::Result<bool>;
}

/// Facade over the focused store traits, so call sites can hold one
/// `Arc<dyn DataStore>`.
pub trait DataStore:
    Send
    + Sync
    + ProfileStore
    + SessionStore
    + CheckinStore
    + TaskStore
    + TransactionStore
    + GoalStore
    + MessageStore
    + LedgerStore
{
}

impl<T> DataStore for T where
    T: Send
        + Sync
        + ProfileStore
        + SessionStore
        + CheckinStore
        + TaskStore
        + TransactionStore
        + GoalStore
        + MessageStore
        + LedgerStore
{
}
