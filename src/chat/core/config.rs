//! Configuration for the chat service.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::chat::core::errors::{ChatError, ChatResult};

/// Prefix for every environment override.
pub const ENV_PREFIX: &str = "PARLEY_";

/// Top-level configuration for the chat service.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Language model settings.
    pub llm: LlmConfig,
    /// Per-turn orchestration settings.
    pub turn: TurnConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Weather provider settings.
    pub weather: WeatherConfig,
    /// Static bearer-token identities.
    pub auth: AuthConfig,
}

impl ChatConfig {
    /// Build a configuration from defaults overridden by `PARLEY_*` variables.
    ///
    /// # Errors
    /// Returns an error if an override cannot be parsed or the result is invalid.
    pub fn from_env() -> ChatResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from defaults overridden by a key lookup.
    ///
    /// Keys are the `PARLEY_*` variable names.
    ///
    /// # Errors
    /// Returns an error if an override cannot be parsed or the result is invalid.
    pub fn from_lookup<F>(lookup: F) -> ChatResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(port) = get("PORT") {
            config.server.port = parse_number("PORT", &port)?;
        }
        if let Some(url) = get("OLLAMA_URL") {
            config.llm.base_url = url;
        }
        if let Some(model) = get("MODEL") {
            config.llm.default_model = model.clone();
            if !config.llm.models.iter().any(|m| m.id == model) {
                config.llm.models.push(ModelSpec::named(&model));
            }
        }
        if let Some(model) = get("TITLE_MODEL") {
            config.llm.title_model = model;
        }
        if let Some(steps) = get("MAX_STEPS") {
            config.turn.max_steps = parse_number("MAX_STEPS", &steps)?;
        }
        if let Some(chars) = get("TITLE_MAX_CHARS") {
            config.turn.title_max_chars = parse_number("TITLE_MAX_CHARS", &chars)?;
        }
        if let Some(secs) = get("REQUEST_TIMEOUT_SECS") {
            config.turn.request_timeout_secs = parse_number("REQUEST_TIMEOUT_SECS", &secs)?;
        }
        if let Some(path) = get("DB_PATH") {
            config.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(url) = get("WEATHER_URL") {
            config.weather.base_url = url;
        }
        if let Some(tokens) = get("API_TOKENS") {
            config.auth.tokens = parse_tokens(&tokens)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        if self.turn.max_steps == 0 {
            return Err(ChatError::InvalidConfig(
                "turn.max_steps must be > 0".to_string(),
            ));
        }

        if self.turn.title_max_chars == 0 {
            return Err(ChatError::InvalidConfig(
                "turn.title_max_chars must be > 0".to_string(),
            ));
        }

        if self.turn.request_timeout_secs == 0 {
            return Err(ChatError::InvalidConfig(
                "turn.request_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.llm.models.is_empty() {
            return Err(ChatError::InvalidConfig(
                "llm.models must not be empty".to_string(),
            ));
        }

        if !self.llm.models.iter().any(|m| m.id == self.llm.default_model) {
            return Err(ChatError::InvalidConfig(format!(
                "llm.default_model {} is not in llm.models",
                self.llm.default_model
            )));
        }

        Url::parse(&self.llm.base_url)?;
        Url::parse(&self.weather.base_url)?;

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> ChatResult<T> {
    raw.trim().parse().map_err(|_| {
        ChatError::InvalidConfig(format!("{ENV_PREFIX}{name} is not a valid number: {raw}"))
    })
}

fn parse_tokens(raw: &str) -> ChatResult<Vec<TokenIdentity>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (token, user) = pair.split_once('=').ok_or_else(|| {
                ChatError::InvalidConfig(format!("{ENV_PREFIX}API_TOKENS entry must be token=uuid"))
            })?;
            let user_id = user.trim().parse().map_err(|_| {
                ChatError::InvalidConfig(format!("{ENV_PREFIX}API_TOKENS has invalid user id"))
            })?;
            Ok(TokenIdentity {
                token: token.trim().to_string(),
                user_id,
            })
        })
        .collect()
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// One selectable model variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    /// Identifier sent by clients as `modelId`.
    pub id: String,
    /// Human-readable label.
    pub label: String,
    /// Name passed to the model backend.
    pub api_identifier: String,
    /// Short description.
    pub description: String,
}

impl ModelSpec {
    /// A catalog entry whose id, label and backend name are all `name`.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            id: name.to_string(),
            label: name.to_string(),
            api_identifier: name.to_string(),
            description: String::new(),
        }
    }
}

/// Language model settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama base URL.
    pub base_url: String,
    /// Selectable model variants.
    pub models: Vec<ModelSpec>,
    /// Model used when the client sends no `modelId`.
    pub default_model: String,
    /// Backend model used for title synthesis.
    pub title_model: String,
    /// Sampling temperature for chat turns.
    pub temperature: f64,
    /// System prompt for chat turns.
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let model = "ministral-3:8b-instruct-2512-q8_0";
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            models: vec![ModelSpec {
                id: model.to_string(),
                label: "Ministral 3 8B".to_string(),
                api_identifier: model.to_string(),
                description: "Local instruct model with tool calling.".to_string(),
            }],
            default_model: model.to_string(),
            title_model: model.to_string(),
            temperature: 0.4,
            system_prompt: "You are a friendly assistant! Keep your responses concise and helpful."
                .to_string(),
        }
    }
}

/// Per-turn orchestration settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Maximum model/tool round-trips per user turn.
    pub max_steps: usize,
    /// Maximum characters in a synthesized title.
    pub title_max_chars: usize,
    /// How many times title generation is retried before falling back.
    pub title_retries: u32,
    /// Ceiling for a whole turn, tool loop and nested documents included.
    pub request_timeout_secs: u64,
}

impl TurnConfig {
    /// The per-request ceiling as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_steps: 5,
            title_max_chars: 80,
            title_retries: 1,
            request_timeout_secs: 300,
        }
    }
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("parley.sqlite"),
        }
    }
}

/// Weather provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Open-Meteo compatible base URL.
    pub base_url: String,
    /// HTTP timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.open-meteo.com".to_string(),
            timeout_secs: 10,
        }
    }
}

/// A bearer token mapped to a user.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenIdentity {
    /// Opaque bearer token.
    pub token: String,
    /// User the token authenticates.
    pub user_id: crate::chat::core::ids::UserId,
}

/// Static bearer-token identities.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Known tokens.
    pub tokens: Vec<TokenIdentity>,
}
