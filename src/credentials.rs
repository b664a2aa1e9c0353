use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::GatewayError;

const GITHUB_TOKEN_URL: &str = "https://api.github.com/copilot_internal/v2/token";
const EDITOR_VERSION: &str = "vscode/1.99.0";
const EDITOR_PLUGIN_VERSION: &str = "copilot-chat/0.26.7";
const GATEWAY_USER_AGENT: &str = "llm-gateway/0.1";

// Refresh slightly early so an in-flight request never races expiry.
const EXPIRY_MARGIN_SECS: u64 = 60;

/// Credential source for backends whose auth material the gateway does not
/// own directly. The Copilot implementation exchanges a long-lived GitHub
/// token for a short-lived bearer token and refreshes it as needed.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_headers(&self) -> Result<HeaderMap, GatewayError>;
    fn get_base_url(&self, account_tier: &str) -> String;
}

struct CachedToken {
    token: String,
    expires_at: u64,
}

pub struct CopilotCredentials {
    client: reqwest::Client,
    github_token: Option<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl CopilotCredentials {
    pub fn new(client: reqwest::Client, github_token: Option<String>) -> Self {
        Self {
            client,
            github_token,
            cached: Mutex::new(None),
        }
    }

    async fn bearer_token(&self) -> Result<String, GatewayError> {
        let github_token = self.github_token.as_deref().ok_or_else(|| {
            GatewayError::Internal(
                "Copilot provider is configured but COPILOT_GITHUB_TOKEN is not set".to_string(),
            )
        })?;

        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > now_unix() + EXPIRY_MARGIN_SECS {
                return Ok(token.token.clone());
            }
        }

        debug!("refreshing copilot token");
        let response = self
            .client
            .get(GITHUB_TOKEN_URL)
            .header(AUTHORIZATION, format!("token {github_token}"))
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, GATEWAY_USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(GatewayError::upstream(status, text));
        }

        let body: Value = serde_json::from_str(&text).map_err(|_| {
            GatewayError::Internal("Copilot token endpoint returned invalid JSON".to_string())
        })?;

        let token = body
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatewayError::Internal("Copilot token endpoint returned no token".to_string())
            })?
            .to_string();
        let expires_at = body
            .get("expires_at")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| now_unix() + 600);

        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });

        Ok(token)
    }
}

#[async_trait]
impl CredentialProvider for CopilotCredentials {
    async fn get_headers(&self) -> Result<HeaderMap, GatewayError> {
        let token = self.bearer_token().await?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| GatewayError::Internal("Invalid copilot token".to_string()))?,
        );
        headers.insert(
            "copilot-integration-id",
            HeaderValue::from_static("vscode-chat"),
        );
        headers.insert("editor-version", HeaderValue::from_static(EDITOR_VERSION));
        headers.insert(
            "editor-plugin-version",
            HeaderValue::from_static(EDITOR_PLUGIN_VERSION),
        );
        Ok(headers)
    }

    fn get_base_url(&self, account_tier: &str) -> String {
        match account_tier {
            "business" => "https://api.business.githubcopilot.com".to_string(),
            "enterprise" => "https://api.enterprise.githubcopilot.com".to_string(),
            _ => "https://api.githubcopilot.com".to_string(),
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_follows_account_tier() {
        let credentials = CopilotCredentials::new(reqwest::Client::new(), None);
        assert_eq!(
            credentials.get_base_url("individual"),
            "https://api.githubcopilot.com"
        );
        assert_eq!(
            credentials.get_base_url("business"),
            "https://api.business.githubcopilot.com"
        );
        assert_eq!(
            credentials.get_base_url("enterprise"),
            "https://api.enterprise.githubcopilot.com"
        );
        assert_eq!(
            credentials.get_base_url("unknown"),
            "https://api.githubcopilot.com"
        );
    }

    #[tokio::test]
    async fn missing_github_token_is_an_error() {
        let credentials = CopilotCredentials::new(reqwest::Client::new(), None);
        assert!(credentials.get_headers().await.is_err());
    }
}
