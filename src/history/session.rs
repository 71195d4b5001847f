use serde::{Deserialize, Serialize};

use crate::chat::message::{new_id, now_millis, Message};

pub const DEFAULT_TITLE: &str = "New Chat";
pub const COPY_SUFFIX: &str = " (Copy)";

/// Sampling settings in effect when the session was saved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    pub model: String,
    pub temperature: f32,
    #[serde(default)]
    pub system_prompt: String,
}

/// One persisted conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub last_modified: i64,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub settings: SessionSettings,
    #[serde(default)]
    pub total_tokens: u64,
}

impl ChatSession {
    pub fn new(settings: SessionSettings) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            title: DEFAULT_TITLE.to_string(),
            created_at: now,
            last_modified: now,
            messages: Vec::new(),
            settings,
            total_tokens: 0,
        }
    }

    /// Clone under a new id with fresh timestamps and a copy title
    pub fn duplicate(&self) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            title: format!("{}{}", self.title, COPY_SUFFIX),
            created_at: now,
            last_modified: now,
            ..self.clone()
        }
    }

    pub fn entry(&self) -> HistoryEntry {
        HistoryEntry {
            id: self.id.clone(),
            title: self.title.clone(),
            last_modified: self.last_modified,
        }
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }
}

/// Summary row of the history index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub title: String,
    pub last_modified: i64,
}

/// Most recent first; ties broken by id so the order is total
pub fn sort_entries(entries: &mut [HistoryEntry]) {
    entries.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| a.id.cmp(&b.id))
    });
}
