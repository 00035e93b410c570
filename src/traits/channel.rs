use async_trait::async_trait;

/// A message transport (Telegram today; the trait is the seam for others).
/// Delivery guarantees and retries are the transport's concern.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique name for this channel (e.g., "telegram").
    fn name(&self) -> &str;

    /// Send a text message to a user.
    async fn send_text(&self, user_id: &str, text: &str) -> anyhow::Result<()>;
}
