use std::collections::BTreeMap;
use std::env;
use std::fs;

use serde::Deserialize;

use crate::error::GatewayError;

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub providers_path: String,
    pub request_timeout_secs: u64,
    pub copilot_github_token: Option<String>,
    pub copilot_account_tier: String,
}

impl Config {
    pub fn from_env() -> Self {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let providers_path =
            env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "providers.json".to_string());

        let request_timeout_secs = env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(300);

        let copilot_github_token = env::var("COPILOT_GITHUB_TOKEN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let copilot_account_tier =
            env::var("COPILOT_ACCOUNT_TIER").unwrap_or_else(|_| "individual".to_string());

        Self {
            host,
            port,
            providers_path,
            request_timeout_secs,
            copilot_github_token,
            copilot_account_tier,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The provider snapshot handed to the dispatcher at construction time.
/// Loaded once per process; never mutated afterwards.
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderFile {
    pub default_model: Option<String>,
    pub providers: Vec<ProviderConfig>,
}

impl ProviderFile {
    pub fn load(path: &str) -> Result<Self, GatewayError> {
        let raw = fs::read_to_string(path).map_err(|error| {
            GatewayError::Internal(format!("Failed to read provider config {path}: {error}"))
        })?;
        serde_json::from_str(&raw).map_err(|error| {
            GatewayError::Internal(format!("Invalid provider config {path}: {error}"))
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub models: ModelCatalog,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Copilot,
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub fn id(self) -> &'static str {
        match self {
            Self::Copilot => "copilot",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    /// The wire format the backend itself speaks.
    pub fn wire_format(self) -> WireFormat {
        match self {
            Self::Copilot | Self::OpenAi => WireFormat::OpenAi,
            Self::Anthropic => WireFormat::Anthropic,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WireFormat {
    Anthropic,
    OpenAi,
}

impl WireFormat {
    pub fn id(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }
}

/// A provider's model set: either a plain list of ids, or a map of
/// user-chosen alias -> backend model id.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ModelCatalog {
    List(Vec<String>),
    Aliased(BTreeMap<String, String>),
}
