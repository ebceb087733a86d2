//! Configuration loading from tiller.toml.

use std::path::Path;
use std::time::Duration;

use runtime::{AnthropicAuth, AnthropicBackend, OpenAiBackend, OrchestratorConfig, Provider};
use serde::Deserialize;
use toolhost::ServerConfig;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are Tiller, a helpful assistant that can use tools. Be concise and direct.";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Model backend configuration.
    #[serde(default)]
    pub backend: BackendConfig,

    /// How to spawn the tool host.
    pub host: Option<ServerConfig>,

    /// Loop limits and prompt.
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    OpenAi,
}

/// Backend provider configuration.
#[derive(Debug, Default, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    /// Model to use. Defaults per provider.
    pub model: Option<String>,

    /// API key. Falls back to `ANTHROPIC_API_KEY` or `OPENAI_API_KEY`.
    /// Mutually exclusive with oauth_token.
    pub api_key: Option<String>,

    /// Claude Code OAuth token (sk-ant-oat-...), Anthropic only.
    /// Mutually exclusive with api_key.
    pub oauth_token: Option<String>,

    /// API root override, e.g. for OpenAI-compatible services.
    pub base_url: Option<String>,

    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tool_timeout_secs: default_tool_timeout_secs(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_max_iterations() -> u32 {
    OrchestratorConfig::default().max_iterations
}

fn default_tool_timeout_secs() -> u64 {
    OrchestratorConfig::default().tool_timeout.as_secs()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

impl ProviderKind {
    fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::OpenAi => "gpt-4o",
        }
    }

    fn key_variable(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load `path` if it exists, otherwise start from defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_iterations must be at least 1".into(),
            ));
        }
        if self.orchestrator.tool_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.tool_timeout_secs must be at least 1".into(),
            ));
        }
        if self.backend.provider == ProviderKind::OpenAi && self.backend.oauth_token.is_some() {
            return Err(ConfigError::Invalid(
                "backend.oauth_token is only supported for the anthropic provider".into(),
            ));
        }
        Ok(())
    }

    pub fn model(&self) -> &str {
        self.backend
            .model
            .as_deref()
            .unwrap_or_else(|| self.backend.provider.default_model())
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_iterations: self.orchestrator.max_iterations,
            tool_timeout: Duration::from_secs(self.orchestrator.tool_timeout_secs),
        }
    }

    /// The tool host to spawn.
    pub fn host(&self) -> Result<ServerConfig, ConfigError> {
        let mut host = self.host.clone().ok_or(ConfigError::MissingHost)?;
        if host.name.is_empty() {
            host.name = host.command.clone();
        }
        Ok(host)
    }

    /// Build the authentication from config.
    ///
    /// Requires exactly one of api_key or oauth_token to be set. `env` looks
    /// up the API key variable when neither is.
    pub fn auth(&self, env: impl Fn(&str) -> Option<String>) -> Result<AnthropicAuth, ConfigError> {
        match (&self.backend.api_key, &self.backend.oauth_token) {
            (Some(key), None) => Ok(AnthropicAuth::ApiKey(key.clone())),
            (None, Some(token)) => Ok(AnthropicAuth::ClaudeCodeOauth(token.clone())),
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousAuth),
            (None, None) => env(ProviderKind::Anthropic.key_variable())
                .map(AnthropicAuth::ApiKey)
                .ok_or(ConfigError::MissingAuth),
        }
    }

    /// Build the configured model backend.
    pub fn provider(&self, env: impl Fn(&str) -> Option<String>) -> Result<Provider, ConfigError> {
        let backend = &self.backend;
        let provider = match backend.provider {
            ProviderKind::Anthropic => {
                let mut builder = AnthropicBackend::builder(self.auth(env)?, self.model());
                if let Some(max_tokens) = backend.max_tokens {
                    builder = builder.max_tokens(max_tokens);
                }
                if let Some(base_url) = &backend.base_url {
                    builder = builder.base_url(base_url);
                }
                Provider::from(builder.build())
            }
            ProviderKind::OpenAi => {
                let key = backend
                    .api_key
                    .clone()
                    .or_else(|| env(ProviderKind::OpenAi.key_variable()))
                    .ok_or(ConfigError::MissingAuth)?;
                let mut openai = OpenAiBackend::new(key, self.model());
                if let Some(max_tokens) = backend.max_tokens {
                    openai = openai.max_tokens(max_tokens);
                }
                if let Some(base_url) = &backend.base_url {
                    openai = openai.base_url(base_url);
                }
                Provider::from(openai)
            }
        };
        Ok(provider)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(
        "authentication not configured: set backend.api_key, backend.oauth_token or the provider's API key variable"
    )]
    MissingAuth,

    #[error(
        "ambiguous authentication: set either backend.api_key OR backend.oauth_token, not both"
    )]
    AmbiguousAuth,

    #[error("no tool host configured: add a [host] section with a command")]
    MissingHost,
}
