use thiserror::Error;
use tokio::sync::oneshot;

use crate::chat::Message;
use crate::core::llm::{ApiError, Completion, ModelInfo};
use crate::history::{HistoryEntry, HistoryError, TitleError};
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Chat actor is no longer running")]
    ActorClosed,
}

pub type AppResult<T> = Result<T, AppError>;

/// Everything the UI shell can ask for
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ChangeInput(String),
    Send,
    EditMessage { id: String, content: String },
    DeleteMessage { id: String },
    Retry { id: String },
    NewSession,
    SelectSession { id: String },
    DeleteSession { id: String },
    RenameSession { id: String, title: String },
    DuplicateSession { id: String },
    RegenerateTitle { id: String },
    SetCredential(Option<String>),
    SetTemperature(f32),
    SetSystemPrompt(String),
    SelectModel(String),
    RefreshModels,
    Shutdown,
}

#[derive(Debug)]
pub struct Envelope {
    pub command: Command,
    pub ack: oneshot::Sender<AppResult<()>>,
}

/// Results of background work, fed back into the actor
#[derive(Debug)]
pub(crate) enum Event {
    CompletionSettled {
        ticket: u64,
        result: Result<Completion, ApiError>,
    },
    TitleSettled {
        session_id: String,
        /// Fired by the first exchange rather than requested by the user
        automatic: bool,
        result: Result<String, TitleError>,
    },
    ModelsLoaded(Result<Vec<ModelInfo>, ApiError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No conversation yet
    #[default]
    None,
    /// Messages exist but nothing has been saved
    Draft,
    Persisted,
    Titled,
}

/// Observable state published after every command and event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppSnapshot {
    pub messages: Vec<Message>,
    pub input: String,
    pub is_generating: bool,
    pub error: Option<String>,
    pub retrying_message_id: Option<String>,
    pub total_tokens: u64,
    pub credential_required: bool,
    pub has_credential: bool,
    pub temperature: f32,
    pub system_prompt: String,
    pub history: Vec<HistoryEntry>,
    pub history_loading: bool,
    pub current_session_id: Option<String>,
    pub current_title: Option<String>,
    pub phase: SessionPhase,
    pub models: Vec<ModelInfo>,
    pub selected_model: String,
    pub models_loading: bool,
    pub titles_pending: usize,
}

impl AppSnapshot {
    /// No completion, title or model request outstanding
    pub fn is_idle(&self) -> bool {
        !self.is_generating && self.titles_pending == 0 && !self.models_loading
    }
}
