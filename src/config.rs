//! Configuration for the chat layer.
//!
//! All tunables are loaded from a TOML file if present. Missing files or
//! missing keys fall back to defaults so the library is usable with zero
//! configuration. The LLM API key is never stored in the file; it is read
//! from the environment variable named by [`LlmConfig::api_key_env`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Chat-layer tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Token budget for the chapter context injected into each turn.
    pub token_budget: usize,
    /// Maximum number of turns (user + assistant messages) retained in a
    /// session's history.
    pub max_history_turns: usize,
    pub llm: LlmConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            token_budget: 6000,
            max_history_turns: 20,
            llm: LlmConfig::default(),
        }
    }
}

/// LLM provider settings (chat-completions style endpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    /// Upper bound on one model call, enforced by the orchestrator.
    pub timeout_secs: u64,
    /// Name of the environment variable holding the bearer token.
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.blackbox.ai/chat/completions".to_string(),
            model: "blackboxai/anthropic/claude-sonnet-4.5".to_string(),
            timeout_secs: 120,
            api_key_env: "BLACKBOX_API_KEY".to_string(),
        }
    }
}

impl ChatConfig {
    /// Load config from a TOML file, falling back to defaults if the file
    /// is absent or unreadable.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), "invalid config, using defaults: {e}");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.token_budget, 6000);
        assert_eq!(config.max_history_turns, 20);
        assert_eq!(config.llm.timeout_secs, 120);
    }

    #[test]
    fn test_parse_partial_config() {
        let config: ChatConfig = toml::from_str(
            r#"
token_budget = 1500

[llm]
model = "test-model"
"#,
        )
        .unwrap();

        assert_eq!(config.token_budget, 1500);
        // Unspecified keys keep their defaults
        assert_eq!(config.max_history_turns, 20);
        assert_eq!(config.llm.model, "test-model");
        assert_eq!(config.llm.timeout_secs, 120);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = ChatConfig::load("/nonexistent/lectern.toml");
        assert_eq!(config, ChatConfig::default());
    }
}
