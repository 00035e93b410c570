//! Derived performance metrics.
//!
//! Six named 0-100 scores, each recomputed on every request from the raw
//! event logs. A user with no underlying data gets the neutral 50 for every
//! metric — never 0, which would read as a negative signal rather than
//! "unknown".

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::config::MetricsConfig;
use crate::traits::{CheckinStore, DataStore, ProfileStore, TaskStore, TransactionStore};
use crate::types::{CheckinType, CheckinValue, DerivedMetric};

/// Everything the rule cascade and context assembly need in one read.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub energy: DerivedMetric,
    pub sleep: DerivedMetric,
    pub focus: DerivedMetric,
    pub execution: DerivedMetric,
    pub income: DerivedMetric,
    pub mood: DerivedMetric,
}

impl MetricsSnapshot {
    pub fn all(&self) -> [&DerivedMetric; 6] {
        [
            &self.energy,
            &self.sleep,
            &self.focus,
            &self.execution,
            &self.income,
            &self.mood,
        ]
    }
}

/// Mean of 1-10 scale values mapped to 0-100.
fn mean_scale_score(values: &[u8]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64;
    Some((mean * 10.0).clamp(0.0, 100.0))
}

/// Hours-and-quality composite for one sleep event, 0-100. Eight hours at
/// quality 10 scores 100.
fn sleep_composite(hours: f64, quality: u8) -> f64 {
    let hours_score = (hours / 8.0 * 100.0).clamp(0.0, 100.0);
    let quality_score = (quality as f64 * 10.0).clamp(0.0, 100.0);
    (hours_score + quality_score) / 2.0
}

/// Fixed 5-bucket table for the onboarding sleep-quality fallback.
fn quiz_sleep_bucket(answer: &str) -> Option<f64> {
    let normalized = answer.trim().to_lowercase().replace(' ', "_");
    match normalized.as_str() {
        "excellent" => Some(90.0),
        "good" => Some(75.0),
        "average" => Some(50.0),
        "poor" => Some(30.0),
        "very_poor" => Some(15.0),
        _ => None,
    }
}

/// Monotonic step function over summed 30-day income. Thresholds are
/// configuration, not a hard-coded contract.
fn income_score(sum: f64, cfg: &MetricsConfig) -> f64 {
    if sum >= cfg.income_strong_threshold {
        100.0
    } else if sum >= cfg.income_moderate_threshold {
        80.0
    } else {
        (sum / cfg.income_moderate_threshold * 80.0).clamp(0.0, 80.0)
    }
}

/// Five fixed mood bands.
fn mood_label(value: f64) -> &'static str {
    if value >= 80.0 {
        "excellent 😄"
    } else if value >= 65.0 {
        "good 🙂"
    } else if value >= 45.0 {
        "neutral 😐"
    } else if value >= 30.0 {
        "low 😕"
    } else {
        "very_low 😞"
    }
}

pub struct MetricsEngine {
    store: Arc<dyn DataStore>,
    cfg: MetricsConfig,
}

impl MetricsEngine {
    pub fn new(store: Arc<dyn DataStore>, cfg: MetricsConfig) -> Self {
        Self { store, cfg }
    }

    /// Mean of the last 3 energy check-ins × 10.
    pub async fn energy(&self, user_id: &str) -> anyhow::Result<DerivedMetric> {
        let events = self
            .store
            .recent_checkins(user_id, CheckinType::Energy, 3)
            .await?;
        let values: Vec<u8> = events
            .iter()
            .filter_map(|e| match e.value {
                CheckinValue::Scale(v) => Some(v),
                _ => None,
            })
            .collect();
        Ok(match mean_scale_score(&values) {
            Some(value) => DerivedMetric {
                name: "energy",
                value,
                sample_count: values.len(),
                window_days: 3,
                label: None,
            },
            None => DerivedMetric::neutral("energy", 3),
        })
    }

    /// Hours-and-quality composite over the last 7 sleep check-ins, falling
    /// back to the onboarding sleep-quality answer, then to neutral.
    pub async fn sleep(&self, user_id: &str) -> anyhow::Result<DerivedMetric> {
        let events = self
            .store
            .recent_checkins(user_id, CheckinType::Sleep, 7)
            .await?;
        let composites: Vec<f64> = events
            .iter()
            .filter_map(|e| match e.value {
                CheckinValue::Sleep { hours, quality } => Some(sleep_composite(hours, quality)),
                _ => None,
            })
            .collect();
        if !composites.is_empty() {
            let value = composites.iter().sum::<f64>() / composites.len() as f64;
            return Ok(DerivedMetric {
                name: "sleep",
                value: value.clamp(0.0, 100.0),
                sample_count: composites.len(),
                window_days: 7,
                label: None,
            });
        }

        // Quiz fallback.
        if let Some(profile) = self.store.get_profile(user_id).await? {
            let bucket = profile
                .quiz_answers
                .get("sleep_quality")
                .and_then(|v| match v {
                    serde_json::Value::String(s) => quiz_sleep_bucket(s),
                    serde_json::Value::Array(items) => {
                        items.iter().filter_map(|v| v.as_str()).find_map(quiz_sleep_bucket)
                    }
                    _ => None,
                });
            if let Some(value) = bucket {
                return Ok(DerivedMetric {
                    name: "sleep",
                    value,
                    sample_count: 0,
                    window_days: 7,
                    label: None,
                });
            }
        }
        Ok(DerivedMetric::neutral("sleep", 7))
    }

    /// Completion ratio of tasks due or completed in the last 7 days.
    pub async fn focus(&self, user_id: &str) -> anyhow::Result<DerivedMetric> {
        let since = Utc::now() - Duration::days(7);
        let tasks = self.store.tasks_in_window(user_id, since).await?;
        if tasks.is_empty() {
            return Ok(DerivedMetric::neutral("focus", 7));
        }
        let completed = tasks.iter().filter(|t| t.completed_at.is_some()).count();
        Ok(DerivedMetric {
            name: "focus",
            value: completed as f64 / tasks.len() as f64 * 100.0,
            sample_count: tasks.len(),
            window_days: 7,
            label: None,
        })
    }

    /// Sustained throughput: tasks completed in the last 30 days, where
    /// about one per day sustained scores 100.
    pub async fn execution(&self, user_id: &str) -> anyhow::Result<DerivedMetric> {
        let since = Utc::now() - Duration::days(30);
        let tasks = self.store.tasks_in_window(user_id, since).await?;
        if tasks.is_empty() {
            return Ok(DerivedMetric::neutral("execution", 30));
        }
        let completed = tasks.iter().filter(|t| t.completed_at.is_some()).count();
        Ok(DerivedMetric {
            name: "execution",
            value: (completed as f64 * (100.0 / 30.0)).min(100.0),
            sample_count: completed,
            window_days: 30,
            label: None,
        })
    }

    /// Step function over positive transactions in the last 30 days.
    pub async fn income(&self, user_id: &str) -> anyhow::Result<DerivedMetric> {
        let since = Utc::now() - Duration::days(30);
        let txs = self.store.income_since(user_id, since).await?;
        if txs.is_empty() {
            return Ok(DerivedMetric::neutral("income", 30));
        }
        let sum: f64 = txs.iter().map(|t| t.amount).sum();
        Ok(DerivedMetric {
            name: "income",
            value: income_score(sum, &self.cfg),
            sample_count: txs.len(),
            window_days: 30,
            label: None,
        })
    }

    /// Mean of the last 7 mood check-ins × 10, with a band label.
    pub async fn mood(&self, user_id: &str) -> anyhow::Result<DerivedMetric> {
        let events = self
            .store
            .recent_checkins(user_id, CheckinType::Mood, 7)
            .await?;
        let values: Vec<u8> = events
            .iter()
            .filter_map(|e| match e.value {
                CheckinValue::Scale(v) => Some(v),
                _ => None,
            })
            .collect();
        Ok(match mean_scale_score(&values) {
            Some(value) => DerivedMetric {
                name: "mood",
                value,
                sample_count: values.len(),
                window_days: 7,
                label: Some(mood_label(value)),
            },
            None => DerivedMetric {
                label: Some(mood_label(50.0)),
                ..DerivedMetric::neutral("mood", 7)
            },
        })
    }

    /// All six metrics in one snapshot.
    pub async fn snapshot(&self, user_id: &str) -> anyhow::Result<MetricsSnapshot> {
        let (energy, sleep, focus, execution, income, mood) = tokio::try_join!(
            self.energy(user_id),
            self.sleep(user_id),
            self.focus(user_id),
            self.execution(user_id),
            self.income(user_id),
            self.mood(user_id),
        )?;
        Ok(MetricsSnapshot {
            energy,
            sleep,
            focus,
            execution,
            income,
            mood,
        })
    }
}
