use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};

use super::messages::*;
use crate::catalog::ModelCatalog;
use crate::chat::{ConversationEngine, Effect, Message, PendingRequest, RequestOptions, Role, SaveReason};
use crate::config::{Settings, StorageBackend};
use crate::core::llm::{CompletionApi, LLMClient};
use crate::history::{ChatSession, HistoryEntry, HistoryStore, SessionSettings, TitleGenerator};
use crate::preferences::{clamp_temperature, PreferenceStore, Preferences};
use crate::storage::{
    FileSystemStorage, InMemoryStorage, PreferenceStorage, SessionStorage, SqliteStorage,
};

const CHANNEL_BUFFER: usize = 32;

/// External collaborators the actor talks to
pub struct Services {
    pub api: Arc<dyn CompletionApi>,
    pub sessions: Arc<dyn SessionStorage>,
    pub preferences: Arc<dyn PreferenceStorage>,
    /// Used when no credential is stored; never written back
    pub fallback_credential: Option<String>,
}

impl Services {
    pub fn new(
        api: Arc<dyn CompletionApi>,
        sessions: Arc<dyn SessionStorage>,
        preferences: Arc<dyn PreferenceStorage>,
    ) -> Self {
        Self {
            api,
            sessions,
            preferences,
            fallback_credential: None,
        }
    }

    pub fn with_fallback_credential(mut self, credential: Option<String>) -> Self {
        self.fallback_credential = credential;
        self
    }

    pub async fn from_settings(settings: &Settings) -> AppResult<Self> {
        let api: Arc<dyn CompletionApi> = Arc::new(LLMClient::new(&settings.api)?);
        let path = PathBuf::from(&settings.storage.path);

        let (sessions, preferences) = match settings.storage.backend {
            StorageBackend::Memory => shared(InMemoryStorage::new()),
            StorageBackend::Filesystem => shared(FileSystemStorage::new(path).await?),
            StorageBackend::Sqlite => shared(SqliteStorage::open(path.join("parley.db")).await?),
        };

        Ok(Self::new(api, sessions, preferences).with_fallback_credential(Settings::api_key()))
    }
}

fn shared<S>(storage: S) -> (Arc<dyn SessionStorage>, Arc<dyn PreferenceStorage>)
where
    S: SessionStorage + PreferenceStorage + 'static,
{
    let storage = Arc::new(storage);
    (
        storage.clone() as Arc<dyn SessionStorage>,
        storage as Arc<dyn PreferenceStorage>,
    )
}

/// Cloneable handle to the chat actor
#[derive(Clone)]
pub struct ChatHandle {
    sender: Sender<Envelope>,
    snapshot: watch::Receiver<AppSnapshot>,
}

impl ChatHandle {
    /// Load preferences and the history index, then start the actor
    pub async fn spawn(settings: Settings, services: Services) -> AppResult<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = ChatState::bootstrap(settings, services, events_tx).await?;

        let (sender, receiver) = mpsc::channel(CHANNEL_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        tokio::spawn(chat_actor(receiver, events_rx, state, snapshot_tx));

        Ok(Self {
            sender,
            snapshot: snapshot_rx,
        })
    }

    /// Resolves once the command's synchronous part, storage writes included, is done
    pub async fn send_command(&self, command: Command) -> AppResult<()> {
        let (ack, response) = oneshot::channel();
        self.sender
            .send(Envelope { command, ack })
            .await
            .map_err(|_| AppError::ActorClosed)?;
        response.await.map_err(|_| AppError::ActorClosed)?
    }

    pub fn snapshot(&self) -> AppSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AppSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until no completion, title or model request is outstanding
    pub async fn wait_until_idle(&self) -> AppResult<AppSnapshot> {
        let mut receiver = self.snapshot.clone();
        let snapshot = receiver
            .wait_for(AppSnapshot::is_idle)
            .await
            .map_err(|_| AppError::ActorClosed)?;
        Ok(snapshot.clone())
    }

    pub async fn change_input(&self, text: impl Into<String>) -> AppResult<()> {
        self.send_command(Command::ChangeInput(text.into())).await
    }

    pub async fn send(&self) -> AppResult<()> {
        self.send_command(Command::Send).await
    }

    pub async fn edit_message(&self, id: impl Into<String>, content: impl Into<String>) -> AppResult<()> {
        self.send_command(Command::EditMessage {
            id: id.into(),
            content: content.into(),
        })
        .await
    }

    pub async fn delete_message(&self, id: impl Into<String>) -> AppResult<()> {
        self.send_command(Command::DeleteMessage { id: id.into() }).await
    }

    pub async fn retry(&self, id: impl Into<String>) -> AppResult<()> {
        self.send_command(Command::Retry { id: id.into() }).await
    }

    pub async fn new_session(&self) -> AppResult<()> {
        self.send_command(Command::NewSession).await
    }

    pub async fn select_session(&self, id: impl Into<String>) -> AppResult<()> {
        self.send_command(Command::SelectSession { id: id.into() }).await
    }

    pub async fn delete_session(&self, id: impl Into<String>) -> AppResult<()> {
        self.send_command(Command::DeleteSession { id: id.into() }).await
    }

    pub async fn rename_session(&self, id: impl Into<String>, title: impl Into<String>) -> AppResult<()> {
        self.send_command(Command::RenameSession {
            id: id.into(),
            title: title.into(),
        })
        .await
    }

    pub async fn duplicate_session(&self, id: impl Into<String>) -> AppResult<()> {
        self.send_command(Command::DuplicateSession { id: id.into() }).await
    }

    pub async fn regenerate_title(&self, id: impl Into<String>) -> AppResult<()> {
        self.send_command(Command::RegenerateTitle { id: id.into() }).await
    }

    pub async fn set_credential(&self, credential: Option<String>) -> AppResult<()> {
        self.send_command(Command::SetCredential(credential)).await
    }

    pub async fn set_temperature(&self, temperature: f32) -> AppResult<()> {
        self.send_command(Command::SetTemperature(temperature)).await
    }

    pub async fn set_system_prompt(&self, prompt: impl Into<String>) -> AppResult<()> {
        self.send_command(Command::SetSystemPrompt(prompt.into())).await
    }

    pub async fn select_model(&self, model: impl Into<String>) -> AppResult<()> {
        self.send_command(Command::SelectModel(model.into())).await
    }

    pub async fn refresh_models(&self) -> AppResult<()> {
        self.send_command(Command::RefreshModels).await
    }

    pub async fn shutdown(&self) -> AppResult<()> {
        self.send_command(Command::Shutdown).await
    }
}

async fn chat_actor(
    mut commands: Receiver<Envelope>,
    mut events: UnboundedReceiver<Event>,
    mut state: ChatState,
    snapshot: watch::Sender<AppSnapshot>,
) {
    tracing::info!("Chat actor started");

    loop {
        tokio::select! {
            envelope = commands.recv() => {
                let Some(Envelope { command, ack }) = envelope else {
                    tracing::info!("Chat actor channel closed, shutting down");
                    break;
                };
                if matches!(command, Command::Shutdown) {
                    tracing::info!("Chat actor received shutdown signal");
                    let _ = ack.send(Ok(()));
                    break;
                }

                let result = state.handle_command(command).await;
                if let Err(e) = &result {
                    tracing::warn!("[ChatActor] Command failed: {}", e);
                }
                snapshot.send_replace(state.snapshot());
                let _ = ack.send(result);
            }

            Some(event) = events.recv() => {
                state.handle_event(event).await;
                snapshot.send_replace(state.snapshot());
            }
        }
    }
}

/// Everything the actor owns. Only touched from inside `chat_actor`.
struct ChatState {
    api: Arc<dyn CompletionApi>,
    engine: ConversationEngine,
    history: HistoryStore,
    preferences: Preferences,
    preference_store: PreferenceStore,
    catalog: ModelCatalog,
    titles: TitleGenerator,
    fallback_credential: Option<String>,
    /// Last persisted version of the active session
    current: Option<ChatSession>,
    auto_titled: HashSet<String>,
    titles_pending: usize,
    credential_required: bool,
    events: UnboundedSender<Event>,
}

impl ChatState {
    async fn bootstrap(
        settings: Settings,
        services: Services,
        events: UnboundedSender<Event>,
    ) -> AppResult<Self> {
        let preference_store = PreferenceStore::new(services.preferences.clone());
        let preferences = preference_store.load(&settings.chat).await?;
        let selected_model = preference_store
            .load_selected_model()
            .await?
            .unwrap_or_else(|| settings.chat.default_model.clone());

        let mut history = HistoryStore::new(services.sessions.clone());
        history.load_index().await?;

        Ok(Self {
            titles: TitleGenerator::new(services.api.clone(), &settings.title),
            api: services.api,
            engine: ConversationEngine::new(),
            history,
            preferences,
            preference_store,
            catalog: ModelCatalog::new(selected_model),
            fallback_credential: services.fallback_credential,
            current: None,
            auto_titled: HashSet::new(),
            titles_pending: 0,
            credential_required: false,
            events,
        })
    }

    fn credential(&self) -> Option<String> {
        if self.preferences.has_credential() {
            self.preferences.api_key.clone()
        } else {
            self.fallback_credential.clone()
        }
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions {
            model: self.catalog.selected().to_string(),
            temperature: self.preferences.temperature,
            system_prompt: self.preferences.system_prompt.clone(),
            has_credential: self.credential().is_some(),
        }
    }

    fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            model: self.catalog.selected().to_string(),
            temperature: self.preferences.temperature,
            system_prompt: self.preferences.system_prompt.clone(),
        }
    }

    fn phase(&self) -> SessionPhase {
        match &self.current {
            Some(session) if !session.has_default_title() => SessionPhase::Titled,
            Some(_) => SessionPhase::Persisted,
            None if self.engine.messages().is_empty() => SessionPhase::None,
            None => SessionPhase::Draft,
        }
    }

    fn snapshot(&self) -> AppSnapshot {
        AppSnapshot {
            messages: self.engine.messages().to_vec(),
            input: self.engine.input().to_string(),
            is_generating: self.engine.is_generating(),
            error: self.engine.error().map(str::to_string),
            retrying_message_id: self.engine.retrying_message_id().map(str::to_string),
            total_tokens: self.engine.total_tokens(),
            credential_required: self.credential_required,
            has_credential: self.credential().is_some(),
            temperature: self.preferences.temperature,
            system_prompt: self.preferences.system_prompt.clone(),
            history: self.history.index().to_vec(),
            history_loading: self.history.is_loading(),
            current_session_id: self.history.current_session_id().map(str::to_string),
            current_title: self.current.as_ref().map(|s| s.title.clone()),
            phase: self.phase(),
            models: self.catalog.models().to_vec(),
            selected_model: self.catalog.selected().to_string(),
            models_loading: self.catalog.is_loading(),
            titles_pending: self.titles_pending,
        }
    }

    async fn handle_command(&mut self, command: Command) -> AppResult<()> {
        match command {
            Command::ChangeInput(text) => self.engine.change_input(text),
            Command::Send => {
                let effects = self.engine.send(&self.request_options());
                self.run_effects(effects).await;
            }
            Command::EditMessage { id, content } => {
                let effects = self.engine.edit_message(&id, content);
                self.run_effects(effects).await;
            }
            Command::DeleteMessage { id } => {
                let effects = self.engine.delete_message(&id);
                self.run_effects(effects).await;
            }
            Command::Retry { id } => {
                let effects = self.engine.retry(&id, &self.request_options());
                self.run_effects(effects).await;
            }
            Command::NewSession => self.start_new_session(),
            Command::SelectSession { id } => self.select_session(&id).await?,
            Command::DeleteSession { id } => {
                let was_current = self.history.current_session_id() == Some(id.as_str());
                self.history.delete_session(&id).await?;
                if was_current {
                    self.start_new_session();
                }
            }
            Command::RenameSession { id, title } => {
                let title = title.trim();
                if title.is_empty() {
                    tracing::debug!("[ChatActor] Ignoring blank title for '{}'", id);
                } else if let Some(entry) = self.history.rename_session(&id, title).await? {
                    self.apply_entry(&entry);
                }
            }
            Command::DuplicateSession { id } => {
                let copy = self.history.duplicate_session(&id).await?;
                self.select_session(&copy.id).await?;
            }
            Command::RegenerateTitle { id } => self.regenerate_title(&id).await?,
            Command::SetCredential(credential) => {
                self.preference_store.save_api_key(credential.as_deref()).await?;
                self.preferences.api_key = credential
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty());
                if self.credential().is_some() {
                    self.credential_required = false;
                }
            }
            Command::SetTemperature(temperature) => {
                let temperature = clamp_temperature(temperature);
                self.preference_store.save_temperature(temperature).await?;
                self.preferences.temperature = temperature;
            }
            Command::SetSystemPrompt(prompt) => {
                self.preference_store.save_system_prompt(&prompt).await?;
                self.preferences.system_prompt = prompt;
            }
            Command::SelectModel(model) => {
                if self.catalog.select(&model) {
                    self.preference_store
                        .save_selected_model(self.catalog.selected())
                        .await?;
                }
            }
            Command::RefreshModels => self.refresh_models(),
            Command::Shutdown => {}
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::CompletionSettled { ticket, result } => {
                let effects = self.engine.complete(ticket, result);
                self.run_effects(effects).await;
            }
            Event::TitleSettled {
                session_id,
                automatic,
                result,
            } => {
                self.titles_pending = self.titles_pending.saturating_sub(1);
                let title = match result {
                    Ok(title) => title,
                    Err(e) => {
                        tracing::warn!(
                            "[ChatActor] Title generation for '{}' failed: {}",
                            session_id,
                            e
                        );
                        return;
                    }
                };

                // An automatic title never replaces one the user chose meanwhile
                let renamed = if automatic {
                    self.history.rename_untitled_session(&session_id, title).await
                } else {
                    self.history.rename_session(&session_id, title).await
                };
                match renamed {
                    Ok(Some(entry)) => self.apply_entry(&entry),
                    Ok(None) => tracing::debug!(
                        "[ChatActor] Title for '{}' not applied, session gone or already titled",
                        session_id
                    ),
                    Err(e) => tracing::warn!(
                        "[ChatActor] Failed to store title for '{}': {}",
                        session_id,
                        e
                    ),
                }
            }
            Event::ModelsLoaded(result) => self.catalog.finish_refresh(result),
        }
    }

    async fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Dispatch(pending) => self.dispatch(pending),
                Effect::PromptForCredential => {
                    tracing::info!("[ChatActor] No API credential configured");
                    self.credential_required = true;
                }
                Effect::InitialSave => {
                    // The first message after the list was emptied starts a new session;
                    // the last saved snapshot of the old one stays on disk
                    if self.current.take().is_some() {
                        self.history.set_current(None);
                    }
                    self.persist(None).await
                }
                Effect::Persist(reason) => self.persist(Some(reason)).await,
                Effect::Busy => tracing::debug!("[ChatActor] A request is already in flight"),
            }
        }
    }

    fn dispatch(&self, pending: PendingRequest) {
        let credential = self.credential().unwrap_or_default();
        let api = self.api.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let result = api.complete(&credential, pending.request).await;
            let _ = events.send(Event::CompletionSettled {
                ticket: pending.ticket,
                result,
            });
        });
    }

    /// Snapshot the live conversation into the current session
    async fn persist(&mut self, reason: Option<SaveReason>) {
        if self.engine.messages().is_empty() {
            return;
        }

        let mut session = match self.current.clone() {
            Some(session) => session,
            None => ChatSession::new(self.session_settings()),
        };
        session.messages = self.engine.messages().to_vec();
        session.total_tokens = self.engine.total_tokens();
        session.settings = self.session_settings();

        let saved = match self.history.save_session(session).await {
            Ok(saved) => saved,
            Err(e) => {
                tracing::error!("[ChatActor] Failed to save session: {}", e);
                return;
            }
        };

        self.history.set_current(Some(saved.id.clone()));
        let auto_title = reason == Some(SaveReason::ResponseApplied)
            && saved.has_default_title()
            && is_first_exchange(&saved.messages)
            && self.auto_titled.insert(saved.id.clone());
        if auto_title {
            self.spawn_title(saved.id.clone(), saved.messages.clone(), true);
        }
        self.current = Some(saved);
    }

    fn spawn_title(&mut self, session_id: String, messages: Vec<Message>, automatic: bool) {
        self.titles_pending += 1;
        let generator = self.titles.clone();
        let credential = self.credential();
        let events = self.events.clone();

        tokio::spawn(async move {
            let result = generator
                .generate(&session_id, &messages, credential.as_deref())
                .await;
            let _ = events.send(Event::TitleSettled {
                session_id,
                automatic,
                result,
            });
        });
    }

    async fn regenerate_title(&mut self, id: &str) -> AppResult<()> {
        let messages = match &self.current {
            Some(session) if session.id == id => self.engine.messages().to_vec(),
            _ => match self.history.load_session(id).await? {
                Some(session) => session.messages,
                None => {
                    tracing::debug!("[ChatActor] Cannot retitle missing session '{}'", id);
                    return Ok(());
                }
            },
        };
        self.spawn_title(id.to_string(), messages, false);
        Ok(())
    }

    fn refresh_models(&mut self) {
        self.catalog.begin_refresh();
        let api = self.api.clone();
        let credential = self.credential();
        let events = self.events.clone();

        tokio::spawn(async move {
            let result = api.list_models(credential.as_deref()).await;
            let _ = events.send(Event::ModelsLoaded(result));
        });
    }

    /// Unsaved state of the previous conversation is discarded
    async fn select_session(&mut self, id: &str) -> AppResult<()> {
        let Some(session) = self.history.load_session(id).await? else {
            tracing::debug!("[ChatActor] Session '{}' not found", id);
            return Ok(());
        };

        if self.engine.is_generating() {
            tracing::debug!("[ChatActor] Abandoning in-flight request on session switch");
        }
        self.engine.load(session.messages.clone(), session.total_tokens);
        self.history.set_current(Some(session.id.clone()));
        self.current = Some(session);
        Ok(())
    }

    fn start_new_session(&mut self) {
        self.engine.reset();
        self.history.set_current(None);
        self.current = None;
    }

    fn apply_entry(&mut self, entry: &HistoryEntry) {
        if let Some(current) = self.current.as_mut().filter(|s| s.id == entry.id) {
            current.title = entry.title.clone();
            current.last_modified = entry.last_modified;
        }
    }
}

fn is_first_exchange(messages: &[Message]) -> bool {
    matches!(messages, [first, second] if first.role == Role::User && second.role == Role::Assistant)
}
