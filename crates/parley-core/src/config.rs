use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};

/// Top-level configuration for the Parley agent.
///
/// Loaded from `~/.parley/config.toml` by default. Each section corresponds
/// to one subsystem. Provider credentials are deliberately not part of this
/// file; they come from the environment via [`Credentials`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub general: GeneralConfig,
    pub providers: ProvidersConfig,
    pub knowledge: KnowledgeConfig,
    pub retrieval: RetrievalConfig,
    pub session: SessionConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Language/locale code passed through to recognition and synthesis.
    pub language: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            language: "en".to_string(),
        }
    }
}

/// Provider model selection. Which model a provider runs is configuration,
/// not code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Language model used for generation and summarization.
    pub llm_model: String,
    /// Speech recognition model.
    pub recognition_model: String,
    /// Synthesis voice identifier.
    pub synthesis_voice: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            llm_model: "gpt-4o-mini".to_string(),
            recognition_model: "nova-3".to_string(),
            synthesis_voice: "sonic-default".to_string(),
        }
    }
}

/// Knowledge base builder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters.
    pub chunk_overlap: usize,
    /// Attempt ceiling for transient provider failures during ingestion.
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub retry_base_delay_ms: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 120,
            max_attempts: 3,
            retry_base_delay_ms: 250,
        }
    }
}

/// Retrieval engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// How many chunks feed each generation.
    pub top_k: usize,
    /// Digest length budget in characters (oldest articles truncated first).
    pub digest_budget_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            digest_budget_chars: 4_000,
        }
    }
}

/// Unit used for the conversation history budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryUnit {
    /// Budget counts whole turns.
    Turns,
    /// Budget counts estimated tokens across all turns.
    Tokens,
}

/// Per-session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// History budget, in units of `history_unit`.
    pub history_budget: usize,
    /// Whether the history budget counts turns or estimated tokens.
    pub history_unit: HistoryUnit,
    /// Per-call timeout for recognition, generation, and synthesis.
    pub call_timeout_ms: u64,
    /// Greeting spoken when a session connects. Empty disables the greeting.
    pub greeting: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_budget: 20,
            history_unit: HistoryUnit::Turns,
            call_timeout_ms: 10_000,
            greeting: "Hello! Ask me anything about the articles I have loaded.".to_string(),
        }
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Provider credentials, sourced from the environment only.
///
/// Missing required credentials are a startup-fatal configuration error;
/// they are never surfaced mid-session.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Language model provider API key.
    pub llm_api_key: String,
    /// Speech recognition provider API key.
    pub recognition_api_key: String,
    /// Speech synthesis provider API key.
    pub synthesis_api_key: String,
}

/// Environment variables [`Credentials::from_env`] requires.
pub const REQUIRED_CREDENTIAL_VARS: [&str; 3] = [
    "PARLEY_LLM_API_KEY",
    "PARLEY_RECOGNITION_API_KEY",
    "PARLEY_SYNTHESIS_API_KEY",
];

impl Credentials {
    /// Read credentials from the environment, erroring on any missing
    /// variable with a message that names all of them at once.
    pub fn from_env() -> Result<Self> {
        let missing: Vec<&str> = REQUIRED_CREDENTIAL_VARS
            .iter()
            .copied()
            .filter(|var| std::env::var(var).map(|v| v.is_empty()).unwrap_or(true))
            .collect();

        if !missing.is_empty() {
            return Err(ParleyError::Config(format!(
                "Missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            llm_api_key: std::env::var("PARLEY_LLM_API_KEY").unwrap_or_default(),
            recognition_api_key: std::env::var("PARLEY_RECOGNITION_API_KEY").unwrap_or_default(),
            synthesis_api_key: std::env::var("PARLEY_SYNTHESIS_API_KEY").unwrap_or_default(),
        })
    }

    /// Masked view of the credentials, safe to log.
    pub fn mask_sensitive(&self) -> Vec<(&'static str, String)> {
        vec![
            ("llm_api_key", mask_value(&self.llm_api_key)),
            (
                "recognition_api_key",
                mask_value(&self.recognition_api_key),
            ),
            ("synthesis_api_key", mask_value(&self.synthesis_api_key)),
        ]
    }
}

/// Mask a secret, showing only the first and last four characters.
fn mask_value(value: &str) -> String {
    if value.len() < 12 {
        return "***".to_string();
    }
    format!("{}...{}", &value[..4], &value[value.len() - 4..])
}

// =============================================================================
// Tests
// =============================================================================
