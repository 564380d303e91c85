//! Selectable model variants.

use crate::chat::core::config::{LlmConfig, ModelSpec};
use crate::chat::core::errors::{ChatError, ChatResult};

/// The configured model variants plus the default choice.
#[derive(Clone, Debug)]
pub struct ModelCatalog {
    models: Vec<ModelSpec>,
    default_model: String,
}

impl ModelCatalog {
    /// Build the catalog from configuration.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            models: config.models.clone(),
            default_model: config.default_model.clone(),
        }
    }

    /// All entries, in configuration order.
    #[must_use]
    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    /// Resolve a client-supplied model id, falling back to the default when absent.
    ///
    /// # Errors
    /// Returns `ModelNotFound` if the id is not in the catalog.
    pub fn find(&self, id: Option<&str>) -> ChatResult<&ModelSpec> {
        let id = id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.default_model);
        self.models
            .iter()
            .find(|model| model.id == id)
            .ok_or_else(|| ChatError::ModelNotFound(id.to_string()))
    }
}
