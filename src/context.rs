//! Context assembly for free-chat turns.
//!
//! Fans out to the profile, quiz, conversation, metrics, task, goal, and
//! transaction sources concurrently, then merges whatever came back into one
//! bounded, priority-ordered payload. A slow or failing source costs its
//! section, never the whole call; only an unreachable profile source fails
//! assembly.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::config::ContextConfig;
use crate::error::CoreError;
use crate::metrics::MetricsEngine;
use crate::traits::{
    DataStore, GoalStore, MessageStore, ProfileStore, TaskStore, TransactionStore,
};

const TRUNCATION_MARKER: &str = " […]";

/// One labeled text section of the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub label: &'static str,
    pub text: String,
}

/// The ephemeral, per-call output: ordered sections ready to concatenate
/// into a prompt body. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct ContextPayload {
    pub sections: Vec<Section>,
}

impl ContextPayload {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str("## ");
            out.push_str(section.label);
            out.push('\n');
            out.push_str(&section.text);
            out.push_str("\n\n");
        }
        out
    }
}

/// Truncate to `budget` chars at a sentence or item boundary, never
/// mid-word, appending an explicit marker.
fn truncate_at_boundary(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    let keep = budget.saturating_sub(marker_len).max(1);
    let cut_byte = text
        .char_indices()
        .nth(keep)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = &text[..cut_byte];

    // Prefer an item boundary, then a sentence end, then any whitespace.
    let boundary = head
        .rfind('\n')
        .or_else(|| head.rfind(". ").map(|i| i + 1))
        .or_else(|| head.rfind(' '));
    // No boundary means one token longer than the budget; keep nothing
    // rather than split it mid-word.
    let cut = boundary.unwrap_or(0);
    let mut out = head[..cut].trim_end().to_string();
    out.push_str(TRUNCATION_MARKER);
    out.trim_start().to_string()
}

/// Drop sections from lowest priority (the end) upward until the rendered
/// total fits. The highest-priority sections always survive.
fn fit_to_budget(mut sections: Vec<Section>, total_budget: usize) -> Vec<Section> {
    let size = |sections: &[Section]| -> usize {
        sections
            .iter()
            .map(|s| s.label.chars().count() + s.text.chars().count() + 5)
            .sum()
    };
    while sections.len() > 1 && size(&sections) > total_budget {
        let dropped = sections.pop();
        if let Some(d) = dropped {
            debug!(section = d.label, "section dropped to fit payload budget");
        }
    }
    sections
}

/// Fixed source order, highest priority first. Used only for truncation and
/// dropping, never for omission.
const SECTION_BUDGETS: &[(&str, usize)] = &[
    ("Profile", 400),
    ("Quiz answers", 600),
    ("Recent conversation", 1500),
    ("Performance signals", 700),
    ("Pending tasks", 400),
    ("Active goals", 400),
    ("Finances", 200),
];

pub struct ContextAssembler {
    store: Arc<dyn DataStore>,
    metrics: Arc<MetricsEngine>,
    cfg: ContextConfig,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn DataStore>, metrics: Arc<MetricsEngine>, cfg: ContextConfig) -> Self {
        Self {
            store,
            metrics,
            cfg,
        }
    }

    /// Produce one payload for this turn. Fails only when the mandatory
    /// profile source is unreachable; the caller then falls back to a
    /// context-free model call.
    pub async fn assemble(
        &self,
        user_id: &str,
        _current_message: &str,
    ) -> Result<ContextPayload, CoreError> {
        let per_source = Duration::from_millis(self.cfg.source_timeout_ms);

        let (profile, quiz, history, signals, tasks, goals, finances) = tokio::join!(
            timeout(per_source, self.profile_section(user_id)),
            timeout(per_source, self.quiz_section(user_id)),
            timeout(per_source, self.history_section(user_id)),
            timeout(per_source, self.signals_section(user_id)),
            timeout(per_source, self.tasks_section(user_id)),
            timeout(per_source, self.goals_section(user_id)),
            timeout(per_source, self.finances_section(user_id)),
        );

        // The profile source is mandatory.
        let profile_text = match profile {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(user_id, error = %e, "profile source failed");
                return Err(CoreError::ContextUnavailable);
            }
            Err(_) => {
                warn!(user_id, "profile source timed out");
                return Err(CoreError::ContextUnavailable);
            }
        };

        let optional = [
            ("Quiz answers", flatten("quiz", quiz)),
            ("Recent conversation", flatten("history", history)),
            ("Performance signals", flatten("signals", signals)),
            ("Pending tasks", flatten("tasks", tasks)),
            ("Active goals", flatten("goals", goals)),
            ("Finances", flatten("finances", finances)),
        ];

        // Sections are placed by fixed priority order regardless of fetch
        // completion order, so identical data yields identical bytes.
        let mut sections = vec![Section {
            label: "Profile",
            text: profile_text,
        }];
        for (label, text) in optional {
            if let Some(text) = text {
                sections.push(Section { label, text });
            }
        }

        for section in &mut sections {
            let budget = SECTION_BUDGETS
                .iter()
                .find(|(label, _)| *label == section.label)
                .map(|(_, b)| *b)
                .unwrap_or(400);
            section.text = truncate_at_boundary(&section.text, budget);
        }

        Ok(ContextPayload {
            sections: fit_to_budget(sections, self.cfg.payload_budget_chars),
        })
    }

    async fn profile_section(&self, user_id: &str) -> anyhow::Result<String> {
        match self.store.get_profile(user_id).await? {
            Some(p) => {
                let mut text = format!(
                    "Archetype: {}\nLevel {} ({} XP)",
                    p.archetype.as_deref().unwrap_or("not yet classified"),
                    p.level,
                    p.xp
                );
                if let Some(reviewed) = p.last_profile_review {
                    text.push_str(&format!(
                        "\nProfile last reviewed: {}",
                        reviewed.format("%Y-%m-%d")
                    ));
                }
                Ok(text)
            }
            None => Ok("New user; onboarding not completed yet.".to_string()),
        }
    }

    async fn quiz_section(&self, user_id: &str) -> anyhow::Result<Option<String>> {
        let Some(profile) = self.store.get_profile(user_id).await? else {
            return Ok(None);
        };
        if profile.quiz_answers.is_empty() {
            return Ok(None);
        }
        // Sorted keys: map iteration order must not leak into the payload.
        let mut keys: Vec<&String> = profile.quiz_answers.keys().collect();
        keys.sort();
        let mut lines = Vec::with_capacity(keys.len());
        for key in keys {
            let value = &profile.quiz_answers[key];
            if value.get("skipped").is_some() {
                continue;
            }
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Array(items) => items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                other => other.to_string(),
            };
            lines.push(format!("- {}: {}", key, rendered));
        }
        if lines.is_empty() {
            return Ok(None);
        }
        Ok(Some(lines.join("\n")))
    }

    async fn history_section(&self, user_id: &str) -> anyhow::Result<Option<String>> {
        let mut turns = self
            .store
            .recent_turns(user_id, self.cfg.history_turns)
            .await?;
        if turns.is_empty() {
            return Ok(None);
        }
        turns.reverse(); // chronological order reads naturally in a prompt
        let lines: Vec<String> = turns
            .iter()
            .map(|t| format!("{}: {}", t.role, t.content))
            .collect();
        Ok(Some(lines.join("\n")))
    }

    async fn signals_section(&self, user_id: &str) -> anyhow::Result<Option<String>> {
        let snapshot = self.metrics.snapshot(user_id).await?;
        let mut lines: Vec<String> = snapshot
            .all()
            .iter()
            .map(|m| {
                let label = m.label.map(|l| format!(" — {}", l)).unwrap_or_default();
                format!(
                    "- {}: {:.0}/100 ({} samples){}",
                    m.name, m.value, m.sample_count, label
                )
            })
            .collect();
        for hint in crate::coaching::hints(&snapshot) {
            lines.push(format!("- hint: {}", hint));
        }
        Ok(Some(lines.join("\n")))
    }

    async fn tasks_section(&self, user_id: &str) -> anyhow::Result<Option<String>> {
        let tasks = self.store.pending_tasks(user_id, 3).await?;
        if tasks.is_empty() {
            return Ok(None);
        }
        let lines: Vec<String> = tasks
            .iter()
            .map(|t| {
                let due = t
                    .due_at
                    .map(|d| format!(" (due {})", d.format("%Y-%m-%d")))
                    .unwrap_or_default();
                format!("- [p{}] {}{}", t.priority, t.title, due)
            })
            .collect();
        Ok(Some(lines.join("\n")))
    }

    async fn goals_section(&self, user_id: &str) -> anyhow::Result<Option<String>> {
        let goals = self.store.active_goals(user_id, 5).await?;
        if goals.is_empty() {
            return Ok(None);
        }
        let lines: Vec<String> = goals.iter().map(|g| format!("- {}", g.description)).collect();
        Ok(Some(lines.join("\n")))
    }

    async fn finances_section(&self, user_id: &str) -> anyhow::Result<Option<String>> {
        let since = Utc::now() - ChronoDuration::days(30);
        let txs = self.store.income_since(user_id, since).await?;
        if txs.is_empty() {
            return Ok(None);
        }
        let sum: f64 = txs.iter().map(|t| t.amount).sum();
        Ok(Some(format!(
            "Income last 30 days: {:.2} across {} transactions.",
            sum,
            txs.len()
        )))
    }
}

/// Collapse a timed-out or failed optional source into "no section".
fn flatten(
    name: &'static str,
    result: Result<anyhow::Result<Option<String>>, tokio::time::error::Elapsed>,
) -> Option<String> {
    match result {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(source = name, error = %e, "context source failed; section omitted");
            None
        }
        Err(_) => {
            let err = CoreError::SourceTimeout(name);
            warn!(source = name, error = %err, "section omitted");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_at_boundary("hello world", 50), "hello world");
    }

    #[test]
    fn truncation_prefers_item_boundaries() {
        let text = "- first item\n- second item\n- third item that is long";
        let out = truncate_at_boundary(text, 30);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert!(!out.contains("third"));
        // Cut lands on a line boundary, not mid-word.
        let body = out.trim_end_matches(TRUNCATION_MARKER);
        assert!(body.ends_with("item"));
    }

    #[test]
    fn truncation_never_cuts_mid_word() {
        let text = "supercalifragilistic expialidocious again and again and again";
        let out = truncate_at_boundary(text, 30);
        let body = out.trim_end_matches(TRUNCATION_MARKER).trim_end();
        assert!(text.split_whitespace().any(|w| body.ends_with(w)));
    }

    #[test]
    fn a_single_oversized_token_yields_only_the_marker() {
        let out = truncate_at_boundary("pneumonoultramicroscopicsilicovolcanoconiosis", 20);
        assert_eq!(out, TRUNCATION_MARKER.trim_start());
        assert!(!out.contains("pneumono"));
    }

    #[test]
    fn lowest_priority_sections_drop_first() {
        let sections = vec![
            Section { label: "Profile", text: "a".repeat(50) },
            Section { label: "Recent conversation", text: "b".repeat(50) },
            Section { label: "Finances", text: "c".repeat(50) },
        ];
        let fitted = fit_to_budget(sections, 140);
        let labels: Vec<&str> = fitted.iter().map(|s| s.label).collect();
        assert_eq!(labels, vec!["Profile", "Recent conversation"]);
    }

    #[test]
    fn the_top_section_always_survives() {
        let sections = vec![Section {
            label: "Profile",
            text: "a".repeat(500),
        }];
        assert_eq!(fit_to_budget(sections, 10).len(), 1);
    }

    #[tokio::test]
    async fn a_timed_out_source_collapses_to_no_section() {
        let slow = tokio::time::timeout(Duration::from_millis(1), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some("never".to_string()))
        })
        .await;
        assert!(flatten("tasks", slow).is_none());

        let fast = tokio::time::timeout(Duration::from_secs(1), async {
            Ok(Some("present".to_string()))
        })
        .await;
        assert_eq!(flatten("goals", fast).as_deref(), Some("present"));
    }

    #[test]
    fn render_is_deterministic_for_identical_sections() {
        let payload = ContextPayload {
            sections: vec![
                Section { label: "Profile", text: "Archetype: hustler".into() },
                Section { label: "Finances", text: "Income: 100".into() },
            ],
        };
        assert_eq!(payload.render(), payload.render());
        assert!(payload.render().starts_with("## Profile\n"));
    }
}
