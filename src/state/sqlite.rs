use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use serde_json::Value;
use tracing::warn;

use crate::traits::{
    CheckinStore, GoalStore, LedgerStore, MessageStore, ProfileStore, SessionStore, TaskStore,
    TransactionStore,
};
use crate::types::{
    CheckinEvent, CheckinType, CheckinValue, ConversationTurn, FlowKind, FlowSession, Goal, Task,
    Transaction, UserProfile,
};

/// Set restrictive file permissions (0600) on the database and WAL files.
fn set_db_file_permissions(db_path: &str) {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::Permissions::from_mode(0o600);
    if let Err(e) = std::fs::set_permissions(db_path, mode.clone()) {
        warn!("Failed to set permissions on {}: {}", db_path, e);
    }
    for suffix in &["-wal", "-shm"] {
        let path = format!("{}{}", db_path, suffix);
        if std::path::Path::new(&path).exists() {
            if let Err(e) = std::fs::set_permissions(&path, mode.clone()) {
                warn!("Failed to set permissions on {}: {}", path, e);
            }
        }
    }
}

/// All timestamps are stored as RFC 3339 TEXT in UTC, so lexicographic
/// comparison in SQL matches chronological order.
fn fmt_dt(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_dt(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn parse_opt_dt(raw: Option<String>) -> anyhow::Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_dt).transpose()
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(db_path: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        set_db_file_permissions(db_path);
        migrate(&pool).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) async fn in_memory() -> anyhow::Result<Self> {
        // One connection: every pool connection would otherwise get its own
        // private in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn fetch_profile_or_new(&self, user_id: &str) -> anyhow::Result<UserProfile> {
        Ok(self
            .get_profile(user_id)
            .await?
            .unwrap_or_else(|| UserProfile::new(user_id)))
    }
}

async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS profiles (
            user_id TEXT PRIMARY KEY,
            archetype TEXT,
            quiz_answers TEXT NOT NULL DEFAULT '{}',
            xp INTEGER NOT NULL DEFAULT 0,
            level INTEGER NOT NULL DEFAULT 1,
            last_profile_review TEXT,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS flow_sessions (
            id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            current_step INTEGER NOT NULL,
            answers TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            seed_variant TEXT,
            created_at TEXT NOT NULL,
            last_activity TEXT NOT NULL,
            PRIMARY KEY (user_id, kind)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS checkins (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            value TEXT NOT NULL,
            note TEXT,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_checkins_user_kind
         ON checkins(user_id, kind, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            due_at TEXT,
            completed_at TEXT,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id, created_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            amount REAL NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS goals (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            description TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS conversation_turns (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_turns_user ON conversation_turns(user_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS xp_grants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            reason TEXT NOT NULL,
            dedupe_key TEXT,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    // At most one grant per (user, dedupe_key); keyless grants are unlimited.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_grants_dedupe
         ON xp_grants(user_id, dedupe_key) WHERE dedupe_key IS NOT NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS achievements (
            user_id TEXT NOT NULL,
            achievement_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (user_id, achievement_id)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn row_to_profile(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<UserProfile> {
    let quiz_raw: String = row.try_get("quiz_answers")?;
    let quiz_answers: HashMap<String, Value> = serde_json::from_str(&quiz_raw)?;
    Ok(UserProfile {
        user_id: row.try_get("user_id")?,
        archetype: row.try_get("archetype")?,
        quiz_answers,
        xp: row.try_get("xp")?,
        level: row.try_get("level")?,
        last_profile_review: parse_opt_dt(row.try_get("last_profile_review")?)?,
        created_at: parse_dt(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<FlowSession> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = FlowKind::parse(&kind_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown flow kind '{}' in database", kind_raw))?;
    Ok(FlowSession {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind,
        current_step: row.try_get::<i64, _>("current_step")? as usize,
        answers: serde_json::from_str(&row.try_get::<String, _>("answers")?)?,
        completed: row.try_get::<i64, _>("completed")? != 0,
        seed_variant: row.try_get("seed_variant")?,
        created_at: parse_dt(&row.try_get::<String, _>("created_at")?)?,
        last_activity: parse_dt(&row.try_get::<String, _>("last_activity")?)?,
    })
}

fn row_to_checkin(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<CheckinEvent> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = CheckinType::parse(&kind_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown check-in kind '{}' in database", kind_raw))?;
    let value: CheckinValue = serde_json::from_str(&row.try_get::<String, _>("value")?)?;
    Ok(CheckinEvent {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind,
        value,
        note: row.try_get("note")?,
        created_at: parse_dt(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Task> {
    Ok(Task {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        priority: row.try_get("priority")?,
        due_at: parse_opt_dt(row.try_get("due_at")?)?,
        completed_at: parse_opt_dt(row.try_get("completed_at")?)?,
        created_at: parse_dt(&row.try_get::<String, _>("created_at")?)?,
    })
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn get_profile(&self, user_id: &str) -> anyhow::Result<Option<UserProfile>> {
        let row = sqlx::query("SELECT * FROM profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_profile).transpose()
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO profiles
                (user_id, archetype, quiz_answers, xp, level, last_profile_review, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&profile.user_id)
        .bind(&profile.archetype)
        .bind(serde_json::to_string(&profile.quiz_answers)?)
        .bind(profile.xp)
        .bind(profile.level)
        .bind(profile.last_profile_review.as_ref().map(fmt_dt))
        .bind(fmt_dt(&profile.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_archetype(&self, user_id: &str, archetype: &str) -> anyhow::Result<()> {
        let mut profile = self.fetch_profile_or_new(user_id).await?;
        profile.archetype = Some(archetype.to_string());
        profile.last_profile_review = Some(Utc::now());
        self.upsert_profile(&profile).await
    }

    async fn merge_quiz_answers(
        &self,
        user_id: &str,
        answers: &HashMap<String, Value>,
    ) -> anyhow::Result<()> {
        let mut profile = self.fetch_profile_or_new(user_id).await?;
        for (key, value) in answers {
            profile.quiz_answers.insert(key.clone(), value.clone());
        }
        self.upsert_profile(&profile).await
    }

    async fn set_xp_level(&self, user_id: &str, xp: i64, level: i64) -> anyhow::Result<()> {
        let mut profile = self.fetch_profile_or_new(user_id).await?;
        profile.xp = xp;
        profile.level = level;
        self.upsert_profile(&profile).await
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn get_session(
        &self,
        user_id: &str,
        kind: FlowKind,
    ) -> anyhow::Result<Option<FlowSession>> {
        let row = sqlx::query("SELECT * FROM flow_sessions WHERE user_id = ? AND kind = ?")
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn sessions_for_user(&self, user_id: &str) -> anyhow::Result<Vec<FlowSession>> {
        let rows = sqlx::query(
            "SELECT * FROM flow_sessions WHERE user_id = ? ORDER BY last_activity DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_session).collect()
    }

    async fn put_session(&self, session: &FlowSession) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO flow_sessions
                (id, user_id, kind, current_step, answers, completed, seed_variant,
                 created_at, last_activity)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(session.kind.as_str())
        .bind(session.current_step as i64)
        .bind(serde_json::to_string(&session.answers)?)
        .bind(session.completed as i64)
        .bind(&session.seed_variant)
        .bind(fmt_dt(&session.created_at))
        .bind(fmt_dt(&session.last_activity))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_session(&self, user_id: &str, kind: FlowKind) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM flow_sessions WHERE user_id = ? AND kind = ?")
            .bind(user_id)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_session_completed(&self, session_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE flow_sessions SET completed = 1 WHERE id = ? AND completed = 0",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl CheckinStore for SqliteStore {
    async fn record_checkin(&self, event: &CheckinEvent) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO checkins (id, user_id, kind, value, note, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.user_id)
        .bind(event.kind.as_str())
        .bind(serde_json::to_string(&event.value)?)
        .bind(&event.note)
        .bind(fmt_dt(&event.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_checkins(
        &self,
        user_id: &str,
        kind: CheckinType,
        limit: usize,
    ) -> anyhow::Result<Vec<CheckinEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM checkins WHERE user_id = ? AND kind = ?
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_checkin).collect()
    }

    async fn recent_checkins_any(
        &self,
        user_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<CheckinEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM checkins WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_checkin).collect()
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn add_task(&self, task: &Task) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO tasks (id, user_id, title, priority, due_at, completed_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id)
        .bind(&task.user_id)
        .bind(&task.title)
        .bind(task.priority)
        .bind(task.due_at.as_ref().map(fmt_dt))
        .bind(task.completed_at.as_ref().map(fmt_dt))
        .bind(fmt_dt(&task.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_task(&self, task_id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE tasks SET completed_at = ? WHERE id = ? AND completed_at IS NULL")
            .bind(fmt_dt(&Utc::now()))
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn tasks_in_window(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Task>> {
        let since = fmt_dt(&since);
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE user_id = ?1
               AND (created_at >= ?2 OR due_at >= ?2 OR completed_at >= ?2)
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .bind(&since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn pending_tasks(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE user_id = ? AND completed_at IS NULL
             ORDER BY priority DESC, created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_task).collect()
    }
}

#[async_trait]
impl TransactionStore for SqliteStore {
    async fn add_transaction(&self, tx: &Transaction) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO transactions (id, user_id, amount, description, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&tx.id)
        .bind(&tx.user_id)
        .bind(tx.amount)
        .bind(&tx.description)
        .bind(fmt_dt(&tx.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn income_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Transaction>> {
        let rows = sqlx::query(
            "SELECT * FROM transactions WHERE user_id = ? AND amount > 0 AND created_at >= ?
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .bind(fmt_dt(&since))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(Transaction {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    amount: row.try_get("amount")?,
                    description: row.try_get("description")?,
                    created_at: parse_dt(&row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl GoalStore for SqliteStore {
    async fn add_goal(&self, goal: &Goal) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO goals (id, user_id, description, status, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&goal.id)
        .bind(&goal.user_id)
        .bind(&goal.description)
        .bind(&goal.status)
        .bind(fmt_dt(&goal.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_goals(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<Goal>> {
        let rows = sqlx::query(
            "SELECT * FROM goals WHERE user_id = ? AND status = 'active'
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(Goal {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    description: row.try_get("description")?,
                    status: row.try_get("status")?,
                    created_at: parse_dt(&row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append_turn(&self, turn: &ConversationTurn) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO conversation_turns (id, user_id, role, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&turn.id)
        .bind(&turn.user_id)
        .bind(&turn.role)
        .bind(&turn.content)
        .bind(fmt_dt(&turn.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_turns(
        &self,
        user_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            "SELECT * FROM conversation_turns WHERE user_id = ?
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(ConversationTurn {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    role: row.try_get("role")?,
                    content: row.try_get("content")?,
                    created_at: parse_dt(&row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn insert_grant(
        &self,
        user_id: &str,
        amount: i64,
        reason: &str,
        dedupe_key: Option<&str>,
    ) -> anyhow::Result<bool> {
        // The partial unique index turns a duplicate keyed insert into a
        // no-op, which makes this a single atomic check-and-insert.
        let result = sqlx::query(
            "INSERT OR IGNORE INTO xp_grants (user_id, amount, reason, dedupe_key, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(amount)
        .bind(reason)
        .bind(dedupe_key)
        .bind(fmt_dt(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn total_xp(&self, user_id: &str) -> anyhow::Result<i64> {
        let row = sqlx::query("SELECT COALESCE(SUM(amount), 0) AS total FROM xp_grants WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }

    async fn try_record_achievement(
        &self,
        user_id: &str,
        achievement_id: &str,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO achievements (user_id, achievement_id, created_at)
             VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(achievement_id)
        .bind(fmt_dt(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn profile_roundtrip_preserves_quiz_answers() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut profile = UserProfile::new("u1");
        profile
            .quiz_answers
            .insert("primary_goal".to_string(), json!("fitness"));
        store.upsert_profile(&profile).await.unwrap();

        let loaded = store.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(loaded.quiz_answers["primary_goal"], json!("fitness"));
        assert_eq!(loaded.xp, 0);
        assert_eq!(loaded.level, 1);
    }

    #[tokio::test]
    async fn merge_quiz_answers_creates_missing_profile() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut answers = HashMap::new();
        answers.insert("work_style".to_string(), json!("deep_focus"));
        store.merge_quiz_answers("u1", &answers).await.unwrap();

        let profile = store.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.quiz_answers["work_style"], json!("deep_focus"));
    }

    #[tokio::test]
    async fn merge_overwrites_existing_keys_and_keeps_others() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut first = HashMap::new();
        first.insert("a".to_string(), json!("old"));
        first.insert("b".to_string(), json!("kept"));
        store.merge_quiz_answers("u1", &first).await.unwrap();

        let mut second = HashMap::new();
        second.insert("a".to_string(), json!("new"));
        store.merge_quiz_answers("u1", &second).await.unwrap();

        let profile = store.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.quiz_answers["a"], json!("new"));
        assert_eq!(profile.quiz_answers["b"], json!("kept"));
    }

    #[tokio::test]
    async fn session_completion_flips_exactly_once() {
        let store = SqliteStore::in_memory().await.unwrap();
        let session = FlowSession::new("u1", FlowKind::Onboarding);
        store.put_session(&session).await.unwrap();

        assert!(store.mark_session_completed(&session.id).await.unwrap());
        assert!(!store.mark_session_completed(&session.id).await.unwrap());
    }

    #[tokio::test]
    async fn put_session_replaces_same_kind() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = FlowSession::new("u1", FlowKind::CheckinMood);
        store.put_session(&first).await.unwrap();
        let second = FlowSession::new("u1", FlowKind::CheckinMood);
        store.put_session(&second).await.unwrap();

        let loaded = store
            .get_session("u1", FlowKind::CheckinMood)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, second.id);
        assert_eq!(store.sessions_for_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn keyed_grants_are_deduplicated() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store
            .insert_grant("u1", 100, "flow completion", Some("flow:s1"))
            .await
            .unwrap());
        assert!(!store
            .insert_grant("u1", 100, "flow completion", Some("flow:s1"))
            .await
            .unwrap());
        assert_eq!(store.total_xp("u1").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn keyless_grants_accumulate() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.insert_grant("u1", 10, "bonus", None).await.unwrap());
        assert!(store.insert_grant("u1", 10, "bonus", None).await.unwrap());
        assert_eq!(store.total_xp("u1").await.unwrap(), 20);
    }

    #[tokio::test]
    async fn achievements_fire_once_per_user() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store
            .try_record_achievement("u1", "first_checkin")
            .await
            .unwrap());
        assert!(!store
            .try_record_achievement("u1", "first_checkin")
            .await
            .unwrap());
        assert!(store
            .try_record_achievement("u2", "first_checkin")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn checkins_come_back_newest_first_and_typed() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut older = CheckinEvent::new(
            "u1",
            CheckinType::Workout,
            CheckinValue::Workout {
                kind: "cardio".to_string(),
                duration_minutes: 45,
                intensity: "high".to_string(),
            },
            None,
        );
        older.created_at = Utc::now() - chrono::Duration::hours(2);
        store.record_checkin(&older).await.unwrap();
        let newer = CheckinEvent::new("u1", CheckinType::Energy, CheckinValue::Scale(7), None);
        store.record_checkin(&newer).await.unwrap();

        let all = store.recent_checkins_any("u1", 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, newer.id);

        let workouts = store
            .recent_checkins("u1", CheckinType::Workout, 10)
            .await
            .unwrap();
        assert_eq!(workouts.len(), 1);
        assert!(matches!(
            workouts[0].value,
            CheckinValue::Workout { duration_minutes: 45, .. }
        ));
    }

    #[tokio::test]
    async fn pending_tasks_order_by_priority() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mk = |title: &str, priority: i64| Task {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "u1".to_string(),
            title: title.to_string(),
            priority,
            due_at: None,
            completed_at: None,
            created_at: Utc::now(),
        };
        store.add_task(&mk("low", 1)).await.unwrap();
        store.add_task(&mk("high", 5)).await.unwrap();
        let done = Task {
            completed_at: Some(Utc::now()),
            ..mk("done", 9)
        };
        store.add_task(&done).await.unwrap();

        let pending = store.pending_tasks("u1", 10).await.unwrap();
        let titles: Vec<&str> = pending.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn income_excludes_expenses_and_old_rows() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mk = |amount: f64, age_days: i64| Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "u1".to_string(),
            amount,
            description: String::new(),
            created_at: Utc::now() - chrono::Duration::days(age_days),
        };
        store.add_transaction(&mk(1000.0, 1)).await.unwrap();
        store.add_transaction(&mk(-200.0, 1)).await.unwrap();
        store.add_transaction(&mk(500.0, 60)).await.unwrap();

        let since = Utc::now() - chrono::Duration::days(30);
        let income = store.income_since("u1", since).await.unwrap();
        assert_eq!(income.len(), 1);
        assert_eq!(income[0].amount, 1000.0);
    }

    #[tokio::test]
    async fn recent_turns_respect_limit() {
        let store = SqliteStore::in_memory().await.unwrap();
        for i in 0..8 {
            let mut turn = ConversationTurn::new("u1", "user", &format!("msg {}", i));
            turn.created_at = Utc::now() - chrono::Duration::minutes(8 - i);
            store.append_turn(&turn).await.unwrap();
        }
        let turns = store.recent_turns("u1", 5).await.unwrap();
        assert_eq!(turns.len(), 5);
        assert_eq!(turns[0].content, "msg 7");
    }
}
