use async_trait::async_trait;

/// Model-call collaborator — sends the assembled context plus the user's
/// message to a hosted model and returns the response text.
///
/// May fail or time out; the caller substitutes a fixed, non-technical
/// fallback string rather than surfacing the failure verbatim.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn chat(
        &self,
        system_preamble: &str,
        context: &str,
        user_message: &str,
    ) -> anyhow::Result<String>;
}
