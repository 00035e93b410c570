use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use zeroize::Zeroize;

use crate::providers::ProviderError;
use crate::traits::ModelProvider;

/// Chat client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl Drop for OpenAiProvider {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

/// HTTPS is required for remote hosts so the API key is never sent in
/// cleartext; plain HTTP is allowed only for localhost model servers.
fn validate_base_url(base_url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|e| format!("Invalid base_url '{}': {}", base_url, e))?;

    let host = parsed.host_str().unwrap_or("");
    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            let is_localhost =
                host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";
            if is_localhost {
                warn!(
                    "Using unencrypted HTTP for local model server at '{}'",
                    base_url
                );
                Ok(())
            } else {
                Err(format!(
                    "HTTP is not allowed for remote URLs (base_url: '{}'). Use HTTPS.",
                    base_url
                ))
            }
        }
        scheme => Err(format!(
            "Unsupported URL scheme '{}' in base_url '{}'",
            scheme, base_url
        )),
    }
}

impl OpenAiProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self, String> {
        validate_base_url(base_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn chat(
        &self,
        system_preamble: &str,
        context: &str,
        user_message: &str,
    ) -> anyhow::Result<String> {
        let mut system = system_preamble.to_string();
        if !context.is_empty() {
            system.push_str("\n\n");
            system.push_str(context);
        }

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user_message },
            ],
        });

        let url = format!("{}/chat/completions", self.base_url);
        info!(model = %self.model, url = %url, "calling model API");

        let resp = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("HTTP request failed: {}", e);
                return Err(ProviderError::Network(e.to_string()).into());
            }
        };

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            error!(status = %status, "provider API error: {}", text);
            return Err(ProviderError::from_status(status.as_u16(), &text).into());
        }

        debug!(bytes = text.len(), "provider response received");

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::BadResponse(e.to_string()))?;
        let content = data["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .ok_or_else(|| ProviderError::BadResponse("no choices in response".to_string()))?;

        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_accepted() {
        assert!(validate_base_url("https://api.openai.com/v1").is_ok());
    }

    #[test]
    fn http_localhost_accepted() {
        assert!(validate_base_url("http://localhost:8080").is_ok());
        assert!(validate_base_url("http://127.0.0.1:1234").is_ok());
        assert!(validate_base_url("http://[::1]:8080").is_ok());
    }

    #[test]
    fn http_remote_rejected() {
        let err = validate_base_url("http://api.example.com").unwrap_err();
        assert!(err.contains("HTTP is not allowed"));
    }

    #[test]
    fn other_schemes_rejected() {
        assert!(validate_base_url("ftp://example.com").is_err());
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn trailing_slash_trimmed() {
        let provider =
            OpenAiProvider::new("https://api.openai.com/v1/", "test-key", "gpt-4o-mini").unwrap();
        assert!(!provider.base_url.ends_with('/'));
    }
}
