use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::{info, warn};

use super::split_message;
use crate::orchestrator::Orchestrator;
use crate::traits::Channel;

const TELEGRAM_MESSAGE_CAP: usize = 4096;

/// Telegram front end. Inbound messages from allow-listed users go to the
/// orchestrator; everything else is refused with the sender's own ID so they
/// can be added to the allow list.
pub struct TelegramChannel {
    bot: Bot,
    allowed_user_ids: Vec<u64>,
    orchestrator: Arc<Orchestrator>,
}

impl TelegramChannel {
    pub fn new(bot_token: &str, allowed_user_ids: Vec<u64>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            bot: Bot::new(bot_token),
            allowed_user_ids,
            orchestrator,
        }
    }

    /// Run the dispatcher forever, restarting with capped exponential
    /// backoff when the long-poll connection drops.
    pub async fn start_with_retry(self: Arc<Self>) {
        let initial_backoff = Duration::from_secs(5);
        let max_backoff = Duration::from_secs(60);
        let stable_threshold = Duration::from_secs(60);
        let mut backoff = initial_backoff;

        loop {
            info!("Starting Telegram dispatcher");
            let started = tokio::time::Instant::now();
            self.clone().start().await;
            let ran_for = started.elapsed();

            // A long-lived session means the next crash is probably fresh
            // trouble, not the same one; recover quickly.
            if ran_for >= stable_threshold {
                backoff = initial_backoff;
            }

            warn!(
                backoff_secs = backoff.as_secs(),
                ran_for_secs = ran_for.as_secs(),
                "Telegram dispatcher stopped, restarting"
            );
            tokio::time::sleep(backoff).await;
            backoff = std::cmp::min(backoff * 2, max_backoff);
        }
    }

    async fn start(self: Arc<Self>) {
        let handler = dptree::entry().branch(Update::filter_message().endpoint({
            let channel = Arc::clone(&self);
            move |msg: teloxide::types::Message, bot: Bot| {
                let channel = Arc::clone(&channel);
                async move {
                    channel.handle_message(msg, bot).await;
                    respond(())
                }
            }
        }));

        Dispatcher::builder(self.bot.clone(), handler)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    }

    async fn handle_message(&self, msg: teloxide::types::Message, bot: Bot) {
        let Some(from) = msg.from.as_ref() else {
            return;
        };
        let user_id = from.id.0;

        // Fail closed: an empty allow list admits nobody.
        if !self.allowed_user_ids.contains(&user_id) {
            warn!(user_id, "message from unauthorized user");
            let _ = bot
                .send_message(
                    msg.chat.id,
                    format!("You're not on the allow list. Your ID: {}", user_id),
                )
                .await;
            return;
        }

        let Some(text) = msg.text() else {
            let _ = bot
                .send_message(msg.chat.id, "I can only handle text messages for now.")
                .await;
            return;
        };

        let reply = self
            .orchestrator
            .handle_message(&user_id.to_string(), text)
            .await;

        for chunk in split_message(&reply, TELEGRAM_MESSAGE_CAP) {
            if let Err(e) = bot.send_message(msg.chat.id, chunk).await {
                warn!(user_id, error = %e, "failed to send Telegram reply");
                break;
            }
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_text(&self, user_id: &str, text: &str) -> anyhow::Result<()> {
        let chat_id: i64 = user_id.parse()?;
        for chunk in split_message(text, TELEGRAM_MESSAGE_CAP) {
            self.bot.send_message(ChatId(chat_id), chunk).await?;
        }
        Ok(())
    }
}
