//! Conversation title synthesis.

use regex::Regex;

use crate::chat::core::config::{LlmConfig, TurnConfig};
use crate::chat::core::message::ChatMessage;
use crate::llm::model::{ChatModel, GenerateRequest};

/// Title used when nothing usable remains after sanitizing.
pub const FALLBACK_TITLE: &str = "New conversation";

/// Cleans model output (or raw user text) into a displayable title.
#[derive(Clone, Debug)]
pub struct TitleSanitizer {
    forbidden: Regex,
    whitespace: Regex,
    max_chars: usize,
}

impl TitleSanitizer {
    /// Build a sanitizer producing titles of at most `max_chars` characters.
    ///
    /// # Errors
    /// Returns an error if the internal patterns fail to compile.
    pub fn new(max_chars: usize) -> Result<Self, regex::Error> {
        Ok(Self {
            forbidden: Regex::new(r#"["'`\u{201C}\u{201D}\u{2018}\u{2019}\u{00AB}\u{00BB}:\u{FF1A}]"#)?,
            whitespace: Regex::new(r"\s+")?,
            max_chars,
        })
    }

    /// Remove quotes and colons, collapse whitespace, trim and truncate.
    #[must_use]
    pub fn sanitize(&self, raw: &str) -> String {
        let stripped = self.forbidden.replace_all(raw, "");
        let collapsed = self.whitespace.replace_all(stripped.trim(), " ");

        let truncated: String = collapsed.chars().take(self.max_chars).collect();
        let title = truncated.trim_end();
        if title.is_empty() {
            FALLBACK_TITLE.to_string()
        } else {
            title.to_string()
        }
    }
}

/// Generates titles with the model, falling back to the message text.
pub struct TitleGenerator {
    sanitizer: TitleSanitizer,
    model_name: String,
    max_chars: usize,
    retries: u32,
}

impl TitleGenerator {
    /// Build a generator from configuration.
    ///
    /// # Errors
    /// Returns an error if the sanitizer cannot be built.
    pub fn new(llm: &LlmConfig, turn: &TurnConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            sanitizer: TitleSanitizer::new(turn.title_max_chars)?,
            model_name: llm.title_model.clone(),
            max_chars: turn.title_max_chars,
            retries: turn.title_retries,
        })
    }

    fn system_prompt(&self) -> String {
        format!(
            "- you will generate a short title based on the first message a user begins a conversation with\n\
             - ensure it is not more than {} characters long\n\
             - the title should be a summary of the user's message\n\
             - do not use quotes or colons",
            self.max_chars
        )
    }

    /// Produce a sanitized title for a conversation's first user message.
    ///
    /// Never fails: after `1 + retries` failed attempts the message text is
    /// used instead.
    pub async fn generate(&self, model: &dyn ChatModel, message: &ChatMessage) -> String {
        let text = message.text();
        let prompt = if text.trim().is_empty() {
            serde_json::to_string(message).unwrap_or_default()
        } else {
            text.clone()
        };

        for attempt in 0..=self.retries {
            let request = GenerateRequest {
                model: self.model_name.clone(),
                system: self.system_prompt(),
                prompt: prompt.clone(),
                temperature: None,
            };
            match model.generate(request).await {
                Ok(raw) => {
                    let title = self.sanitizer.sanitize(&raw);
                    if title != FALLBACK_TITLE {
                        return title;
                    }
                    tracing::debug!(attempt, "title generation returned nothing usable");
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "title generation failed");
                }
            }
        }

        self.sanitizer.sanitize(&text)
    }
}
