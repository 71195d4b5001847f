use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;

use crate::chat::message::{Message, Role};
use crate::config::TitleConfig;
use crate::core::llm::{ApiError, ChatMessage, CompletionApi, CompletionRequest};

pub const TITLE_INSTRUCTION: &str = "Summarize the following conversation in a few words to use as its title. \
     Use title case. Do not refer to yourself, the assistant, or the conversation itself. \
     Output only the title.";

/// Per-message cap on the transcript sent for summarization
const MAX_EXCERPT_CHARS: usize = 500;

static DISALLOWED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9 ]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Error)]
pub enum TitleError {
    #[error("No API credential configured")]
    MissingCredential,

    #[error("Cannot title an empty conversation")]
    EmptyConversation,

    #[error("Model returned no usable title")]
    EmptyTitle,

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Keep ASCII letters, digits and single spaces
pub fn sanitize_title(raw: &str) -> String {
    let spaced = WHITESPACE.replace_all(raw, " ");
    let stripped = DISALLOWED.replace_all(&spaced, "");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

fn excerpt(text: &str) -> String {
    text.chars().take(MAX_EXCERPT_CHARS).collect()
}

#[derive(Clone)]
pub struct TitleGenerator {
    api: Arc<dyn CompletionApi>,
    model: String,
    max_tokens: u32,
}

impl TitleGenerator {
    pub fn new(api: Arc<dyn CompletionApi>, config: &TitleConfig) -> Self {
        Self {
            api,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    pub async fn generate(
        &self,
        session_id: &str,
        messages: &[Message],
        credential: Option<&str>,
    ) -> Result<String, TitleError> {
        let credential = credential
            .filter(|c| !c.trim().is_empty())
            .ok_or(TitleError::MissingCredential)?;

        let transcript: Vec<String> = messages
            .iter()
            .filter(|m| !m.is_loading && m.role != Role::System && !m.content.trim().is_empty())
            .map(|m| format!("{}: {}", m.role, excerpt(&m.content)))
            .collect();
        if transcript.is_empty() {
            return Err(TitleError::EmptyConversation);
        }

        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::new("system", TITLE_INSTRUCTION),
                ChatMessage::new("user", transcript.join("\n\n")),
            ],
            temperature: 0.3,
            max_tokens: Some(self.max_tokens),
        };

        tracing::debug!("[TitleGenerator] Requesting title for session '{}'", session_id);
        let completion = self.api.complete(credential, request).await?;

        let title = sanitize_title(completion.content.as_deref().unwrap_or_default());
        if title.is_empty() {
            return Err(TitleError::EmptyTitle);
        }

        tracing::debug!("[TitleGenerator] Session '{}' titled '{}'", session_id, title);
        Ok(title)
    }
}
