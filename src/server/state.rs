//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::auth::{BearerTokenAuth, IdentityProvider};
use crate::chat::core::config::ChatConfig;
use crate::chat::core::errors::ChatResult;
use crate::chat::service::{ChatService, ChatStores, default_tools};
use crate::chat::storage;
use crate::chat::tools::OpenMeteoClient;
use crate::llm::OllamaChatModel;

/// Shared application state.
pub struct AppState {
    /// Chat orchestration.
    pub chat: ChatService,
    /// Resolves the caller of each request.
    pub identity: Arc<dyn IdentityProvider>,
    /// Ollama backend, probed by the health check when present.
    pub backend: Option<Arc<OllamaChatModel>>,
}

impl AppState {
    /// Build the production state: `SQLite` storage, Ollama, Open-Meteo and bearer tokens.
    ///
    /// # Errors
    /// Returns an error if storage cannot be opened or a client cannot be built.
    pub async fn new(config: &ChatConfig) -> ChatResult<Arc<Self>> {
        let conn = storage::open(&config.storage).await?;
        let backend = Arc::new(OllamaChatModel::new(&config.llm)?);
        let weather = Arc::new(OpenMeteoClient::new(&config.weather)?);

        let identity = BearerTokenAuth::from_config(&config.auth);
        if identity.is_empty() {
            tracing::warn!("no API tokens configured, every request will be rejected");
        }

        let chat = ChatService::new(
            config,
            backend.clone(),
            ChatStores::sqlite(conn),
            default_tools(weather),
        )?;

        Ok(Arc::new(Self {
            chat,
            identity: Arc::new(identity),
            backend: Some(backend),
        }))
    }

    /// Assemble state from prebuilt parts.
    #[must_use]
    pub fn from_parts(chat: ChatService, identity: Arc<dyn IdentityProvider>) -> Arc<Self> {
        Arc::new(Self {
            chat,
            identity,
            backend: None,
        })
    }
}
