use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub flows: FlowsConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub gamification: GamificationConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default)]
    pub allowed_user_ids: Vec<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "coachd.db".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FlowsConfig {
    /// Inactivity timeout after which a session is treated as expired.
    #[serde(default = "default_session_timeout_mins")]
    pub session_timeout_mins: i64,
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            session_timeout_mins: default_session_timeout_mins(),
        }
    }
}

fn default_session_timeout_mins() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Per-source fetch timeout in milliseconds.
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
    /// Total character budget for the assembled payload.
    #[serde(default = "default_payload_budget_chars")]
    pub payload_budget_chars: usize,
    /// Conversation turns included in the history section.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: default_source_timeout_ms(),
            payload_budget_chars: default_payload_budget_chars(),
            history_turns: default_history_turns(),
        }
    }
}

fn default_source_timeout_ms() -> u64 {
    1500
}
fn default_payload_budget_chars() -> usize {
    6000
}
fn default_history_turns() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    /// Monthly income (sum of positive transactions, 30 days) at or above
    /// which the income score is 100.
    #[serde(default = "default_income_strong")]
    pub income_strong_threshold: f64,
    /// Threshold at or above which the score is 80; below it the score
    /// scales linearly.
    #[serde(default = "default_income_moderate")]
    pub income_moderate_threshold: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            income_strong_threshold: default_income_strong(),
            income_moderate_threshold: default_income_moderate(),
        }
    }
}

fn default_income_strong() -> f64 {
    5000.0
}
fn default_income_moderate() -> f64 {
    2000.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct GamificationConfig {
    #[serde(default = "default_onboarding_bonus")]
    pub onboarding_bonus: i64,
    #[serde(default = "default_checkin_bonus")]
    pub checkin_bonus: i64,
}

impl Default for GamificationConfig {
    fn default() -> Self {
        Self {
            onboarding_bonus: default_onboarding_bonus(),
            checkin_bonus: default_checkin_bonus(),
        }
    }
}

fn default_onboarding_bonus() -> i64 {
    100
}
fn default_checkin_bonus() -> i64 {
    25
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Hard timeout for handling one inbound message, in seconds. After
    /// this the user gets a degraded (context-free or fallback) response.
    #[serde(default = "default_message_timeout_secs")]
    pub message_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            message_timeout_secs: default_message_timeout_secs(),
        }
    }
}

fn default_message_timeout_secs() -> u64 {
    12
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [provider]
            api_key = "sk-test"

            [telegram]
            bot_token = "123:abc"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.flows.session_timeout_mins, 30);
        assert_eq!(cfg.context.source_timeout_ms, 1500);
        assert_eq!(cfg.metrics.income_moderate_threshold, 2000.0);
        assert_eq!(cfg.gamification.checkin_bonus, 25);
        assert_eq!(cfg.chat.message_timeout_secs, 12);
    }
}
