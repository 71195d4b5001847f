use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::core::llm::ChatMessage;

/// Shown in place of a response that carried no content
pub const EMPTY_RESPONSE_MARKER: &str = "Error: the model returned an empty response.";

/// Shown in place of a placeholder whose response never arrived
pub const FAILED_RESPONSE_MARKER: &str = "Error: no response was received for this message.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a conversation. Position in the list is the ordering;
/// `id` stays stable across edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub original_content: Option<String>,
    #[serde(default)]
    pub is_loading: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            timestamp: now_millis(),
            is_edited: false,
            original_content: None,
            is_loading: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Empty assistant message reserving a slot for a pending response
    pub fn placeholder() -> Self {
        Self {
            is_loading: true,
            ..Self::assistant(String::new())
        }
    }

    /// Apply an edit, keeping the content seen before the first edit
    pub fn edit(&mut self, new_content: impl Into<String>) {
        if !self.is_edited {
            self.original_content = Some(self.content.clone());
        }
        self.content = new_content.into();
        self.is_edited = true;
    }

    /// Drop fields that do not apply to the message's state
    pub fn normalized(mut self) -> Self {
        if !self.is_edited {
            self.original_content = None;
        }
        self
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(self.role.as_str(), self.content.clone())
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
