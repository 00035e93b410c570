//! Per-message routing: slash commands, active flow sessions, free chat.
//!
//! Each inbound message resolves inside a hard deadline. Past the deadline,
//! or on any unrecoverable error, the reply degrades to a fixed, friendly
//! fallback. Internal identifiers and error text never reach the user.

use std::sync::Arc;

use tokio::time::{timeout, Duration};
use tracing::{info, warn};

use crate::config::ChatConfig;
use crate::context::ContextAssembler;
use crate::error::CoreError;
use crate::flows::{StartPolicy, StepEngine, StepResult};
use crate::metrics::MetricsEngine;
use crate::traits::{DataStore, MessageStore, ModelProvider};
use crate::types::{ConversationTurn, FlowKind};

/// What the user sees when a reply cannot be produced. Short, non-technical,
/// and free of identifiers by design contract.
pub const FALLBACK_REPLY: &str =
    "Sorry, I couldn't put together a reply just now. Please try again in a moment.";

const SYSTEM_PREAMBLE: &str = "You are a supportive personal performance coach. \
You know the user's habits from the context below. Be concise, concrete, and \
encouraging. Never mention the context sections or any internal mechanics.";

pub struct Orchestrator {
    store: Arc<dyn DataStore>,
    engine: Arc<StepEngine>,
    assembler: Arc<ContextAssembler>,
    metrics: Arc<MetricsEngine>,
    provider: Arc<dyn ModelProvider>,
    message_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn DataStore>,
        engine: Arc<StepEngine>,
        assembler: Arc<ContextAssembler>,
        metrics: Arc<MetricsEngine>,
        provider: Arc<dyn ModelProvider>,
        chat_cfg: &ChatConfig,
    ) -> Self {
        Self {
            store,
            engine,
            assembler,
            metrics,
            provider,
            message_timeout: Duration::from_secs(chat_cfg.message_timeout_secs),
        }
    }

    /// Entry point for one inbound message. Always returns something
    /// sendable; never panics, never leaks internals.
    pub async fn handle_message(&self, user_id: &str, text: &str) -> String {
        let text = text.trim();
        if text.is_empty() {
            return "Say something and I'll do my best to help.".to_string();
        }

        match timeout(self.message_timeout, self.dispatch(user_id, text)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(user_id, error = %e, "message handling failed");
                FALLBACK_REPLY.to_string()
            }
            Err(_) => {
                warn!(user_id, "message handling exceeded deadline");
                FALLBACK_REPLY.to_string()
            }
        }
    }

    async fn dispatch(&self, user_id: &str, text: &str) -> Result<String, CoreError> {
        if let Some(command) = text.strip_prefix('/') {
            return self.handle_command(user_id, command).await;
        }

        // An active flow captures all plain text as the current answer.
        if let Some(session) = self.engine.any_active_session(user_id).await? {
            return self.handle_flow_answer(user_id, session.kind, text).await;
        }

        self.free_chat(user_id, text).await
    }

    async fn handle_command(&self, user_id: &str, command: &str) -> Result<String, CoreError> {
        let mut parts = command.split_whitespace();
        let verb = parts.next().unwrap_or("").to_lowercase();
        let arg = parts.next().map(|s| s.to_lowercase());
        // Optional trailing token selects a prompt-wording variant.
        let seed = parts.next().map(|s| s.to_lowercase());

        match verb.as_str() {
            "start" | "onboard" => self.start_flow(user_id, FlowKind::Onboarding, None).await,
            "checkin" => match arg.as_deref().and_then(|a| FlowKind::parse(a)) {
                Some(kind) if kind != FlowKind::Onboarding => {
                    self.start_flow(user_id, kind, seed.as_deref()).await
                }
                _ => Ok(
                    "Which check-in? Try: /checkin workout, nutrition, energy, mood, or sleep."
                        .to_string(),
                ),
            },
            "cancel" => self.cancel_active(user_id).await,
            "stats" => self.stats(user_id).await,
            "help" => Ok(help_text()),
            _ => Ok("I don't know that command. Try /help.".to_string()),
        }
    }

    async fn start_flow(
        &self,
        user_id: &str,
        kind: FlowKind,
        seed: Option<&str>,
    ) -> Result<String, CoreError> {
        info!(user_id, flow = %kind, "starting flow");
        let (_, prompt) = self
            .engine
            .start_flow(user_id, kind, seed, StartPolicy::Overwrite)
            .await?;
        Ok(prompt.text)
    }

    async fn cancel_active(&self, user_id: &str) -> Result<String, CoreError> {
        match self.engine.any_active_session(user_id).await? {
            Some(session) => {
                self.engine.cancel_flow(user_id, session.kind).await?;
                Ok(format!("Okay, I've cancelled the {} flow.", session.kind))
            }
            None => Ok("Nothing to cancel right now.".to_string()),
        }
    }

    async fn stats(&self, user_id: &str) -> Result<String, CoreError> {
        let snapshot = self
            .metrics
            .snapshot(user_id)
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        let mut lines = vec!["Your current signals:".to_string()];
        for m in snapshot.all() {
            let label = m.label.map(|l| format!(" {}", l)).unwrap_or_default();
            lines.push(format!("• {}: {:.0}/100{}", m.name, m.value, label));
        }
        for hint in crate::coaching::hints(&snapshot) {
            lines.push(format!("→ {}", hint));
        }
        Ok(lines.join("\n"))
    }

    async fn handle_flow_answer(
        &self,
        user_id: &str,
        kind: FlowKind,
        text: &str,
    ) -> Result<String, CoreError> {
        match self.engine.submit_answer(user_id, kind, text).await {
            Ok(StepResult {
                done: true,
                outcome: Some(outcome),
                ..
            }) => Ok(outcome.message),
            Ok(StepResult {
                next_prompt: Some(prompt),
                ..
            }) => Ok(prompt.text),
            Ok(_) => Ok(FALLBACK_REPLY.to_string()),
            Err(CoreError::Validation(reason)) => {
                // Recoverable: explain, then re-ask the same question.
                let reprompt = self
                    .engine
                    .active_prompt(user_id, kind)
                    .await?
                    .map(|p| format!("\n\n{}", p.text))
                    .unwrap_or_default();
                Ok(format!("{}{}", reason, reprompt))
            }
            Err(CoreError::FlowExpired) => Ok(format!(
                "That {} session timed out, so I've discarded it. \
                 Start again whenever you're ready.",
                kind
            )),
            Err(e) => Err(e),
        }
    }

    async fn free_chat(&self, user_id: &str, text: &str) -> Result<String, CoreError> {
        // A failed assembly degrades to a context-free call, not an error.
        let context = match self.assembler.assemble(user_id, text).await {
            Ok(payload) => payload.render(),
            Err(e) => {
                warn!(user_id, error = %e, "context assembly failed; calling without context");
                String::new()
            }
        };

        let reply = self
            .provider
            .chat(SYSTEM_PREAMBLE, &context, text)
            .await
            .map_err(|e| CoreError::ModelUnavailable(e.to_string()))?;

        // Log both turns so the next assembly sees this exchange. A logging
        // failure costs future context, not this reply.
        for turn in [
            ConversationTurn::new(user_id, "user", text),
            ConversationTurn::new(user_id, "assistant", &reply),
        ] {
            if let Err(e) = self.store.append_turn(&turn).await {
                warn!(user_id, error = %e, "failed to append conversation turn");
            }
        }

        Ok(reply)
    }
}

fn help_text() -> String {
    [
        "Here's what I can do:",
        "/start — onboarding quiz (sets up your profile)",
        "/checkin <workout|nutrition|energy|mood|sleep> — log a check-in",
        "/stats — your current performance signals",
        "/cancel — abandon the current flow",
        "Anything else — just chat with me.",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_reply_is_non_technical() {
        assert!(!FALLBACK_REPLY.contains("error"));
        assert!(!FALLBACK_REPLY.contains("Error"));
        assert!(!FALLBACK_REPLY.contains("id"));
    }

    #[test]
    fn help_lists_every_checkin_flow() {
        let text = help_text();
        for kind in ["workout", "nutrition", "energy", "mood", "sleep"] {
            assert!(text.contains(kind), "missing {}", kind);
        }
    }
}
