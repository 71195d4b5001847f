//! Conversation Engine
//!
//! Information Hiding:
//! - The message list and request lifecycle are owned here and nowhere else
//! - Handlers are synchronous; follow-up work is returned as `Effect`s
//! - Responses are applied by message id, never by an index captured before the request

use super::message::{Message, Role, EMPTY_RESPONSE_MARKER, FAILED_RESPONSE_MARKER};
use crate::core::llm::{ApiError, ChatMessage, Completion, CompletionRequest};

/// What a request needs from the settings store and model catalog
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub model: String,
    pub temperature: f32,
    pub system_prompt: String,
    pub has_credential: bool,
}

/// Placeholder inserted by a retry whose response must be inserted rather than replaced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderRef {
    pub placeholder_id: String,
    pub original_user_message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseTarget {
    Append,
    Replace(String),
}

/// A request the engine wants sent; its result comes back through `complete`
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub ticket: u64,
    pub request: CompletionRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveReason {
    ResponseApplied,
    Edited,
    Deleted,
    /// A dropped response still consumed tokens
    UsageRecorded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Dispatch(PendingRequest),
    PromptForCredential,
    /// The first message of a conversation was just created
    InitialSave,
    Persist(SaveReason),
    /// A request is already in flight; the command was rejected
    Busy,
}

#[derive(Debug)]
struct InFlight {
    ticket: u64,
    target: ResponseTarget,
}

#[derive(Debug, Default)]
pub struct ConversationEngine {
    messages: Vec<Message>,
    input: String,
    is_generating: bool,
    error: Option<String>,
    retrying_message_id: Option<String>,
    placeholder: Option<PlaceholderRef>,
    total_tokens: u64,
    in_flight: Option<InFlight>,
    next_ticket: u64,
}

impl ConversationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn is_generating(&self) -> bool {
        self.is_generating
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn retrying_message_id(&self) -> Option<&str> {
        self.retrying_message_id.as_deref()
    }

    pub fn placeholder(&self) -> Option<&PlaceholderRef> {
        self.placeholder.as_ref()
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn change_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn send(&mut self, options: &RequestOptions) -> Vec<Effect> {
        let content = self.input.trim();
        if content.is_empty() {
            return Vec::new();
        }
        if self.is_generating {
            tracing::debug!("[ConversationEngine] Send rejected, a request is in flight");
            return vec![Effect::Busy];
        }

        let message = Message::user(content);
        let was_empty = self.messages.is_empty();
        self.messages.push(message);
        self.input.clear();
        self.error = None;

        let mut effects = Vec::new();
        if was_empty {
            effects.push(Effect::InitialSave);
        }

        if !options.has_credential {
            effects.push(Effect::PromptForCredential);
            return effects;
        }

        let request = self.build_request(&self.messages, options);
        effects.push(self.dispatch(request, ResponseTarget::Append));
        effects
    }

    pub fn edit_message(&mut self, id: &str, new_content: impl Into<String>) -> Vec<Effect> {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.edit(new_content);
                vec![Effect::Persist(SaveReason::Edited)]
            }
            None => {
                tracing::debug!("[ConversationEngine] Edit ignored, message '{}' not found", id);
                Vec::new()
            }
        }
    }

    pub fn delete_message(&mut self, id: &str) -> Vec<Effect> {
        let Some(index) = self.position(id) else {
            tracing::debug!("[ConversationEngine] Delete ignored, message '{}' not found", id);
            return Vec::new();
        };

        self.messages.remove(index);
        if self.messages.is_empty() {
            Vec::new()
        } else {
            vec![Effect::Persist(SaveReason::Deleted)]
        }
    }

    /// Re-request the response at the position of `id`.
    ///
    /// Retrying an assistant message replaces it using the history up to the
    /// preceding user message. Retrying a user message replaces the assistant
    /// message right after it, or inserts a loading placeholder there when no
    /// such message exists.
    pub fn retry(&mut self, id: &str, options: &RequestOptions) -> Vec<Effect> {
        if self.is_generating {
            tracing::debug!("[ConversationEngine] Retry rejected, a request is in flight");
            return vec![Effect::Busy];
        }

        let Some(index) = self.position(id) else {
            tracing::debug!("[ConversationEngine] Retry ignored, message '{}' not found", id);
            return Vec::new();
        };

        let role = self.messages[index].role;
        if role == Role::System {
            tracing::warn!("[ConversationEngine] System messages cannot be retried");
            return Vec::new();
        }
        if !options.has_credential {
            return vec![Effect::PromptForCredential];
        }

        let (request, target_id) = match role {
            Role::Assistant => {
                let Some(user_index) = self.messages[..index]
                    .iter()
                    .rposition(|m| m.role == Role::User)
                else {
                    tracing::warn!(
                        "[ConversationEngine] Retry ignored, no user message precedes '{}'",
                        id
                    );
                    return Vec::new();
                };
                let request = self.build_request(&self.messages[..=user_index], options);
                (request, id.to_string())
            }
            _ => {
                let request = self.build_request(&self.messages[..=index], options);
                let next_assistant = self
                    .messages
                    .get(index + 1)
                    .filter(|next| next.role == Role::Assistant)
                    .map(|next| next.id.clone());
                let target_id = match next_assistant {
                    Some(next_id) => next_id,
                    None => {
                        let placeholder = Message::placeholder();
                        let placeholder_id = placeholder.id.clone();
                        self.messages.insert(index + 1, placeholder);
                        self.placeholder = Some(PlaceholderRef {
                            placeholder_id: placeholder_id.clone(),
                            original_user_message_id: id.to_string(),
                        });
                        placeholder_id
                    }
                };
                (request, target_id)
            }
        };

        self.error = None;
        self.retrying_message_id = Some(target_id.clone());
        vec![self.dispatch(request, ResponseTarget::Replace(target_id))]
    }

    /// Settle the request identified by `ticket`
    pub fn complete(&mut self, ticket: u64, result: Result<Completion, ApiError>) -> Vec<Effect> {
        if self.in_flight.as_ref().map(|f| f.ticket) != Some(ticket) {
            tracing::debug!("[ConversationEngine] Dropping stale response for ticket {}", ticket);
            return Vec::new();
        }
        let Some(in_flight) = self.in_flight.take() else {
            return Vec::new();
        };
        self.is_generating = false;

        let mut effects = Vec::new();
        match result {
            Ok(completion) => {
                self.error = None;
                let used = completion.usage.total_tokens;
                self.total_tokens += used;

                let content = completion
                    .content
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| EMPTY_RESPONSE_MARKER.to_string());

                let applied = match in_flight.target {
                    ResponseTarget::Append => {
                        self.messages.push(Message::assistant(content));
                        true
                    }
                    ResponseTarget::Replace(target_id) => match self.position(&target_id) {
                        Some(index) => {
                            self.messages[index] = Message::assistant(content);
                            true
                        }
                        None => {
                            tracing::debug!(
                                "[ConversationEngine] Retry target '{}' is gone, response dropped",
                                target_id
                            );
                            false
                        }
                    },
                };

                if !self.messages.is_empty() {
                    if applied {
                        effects.push(Effect::Persist(SaveReason::ResponseApplied));
                    } else if used > 0 {
                        effects.push(Effect::Persist(SaveReason::UsageRecorded));
                    }
                }
            }
            Err(e) => {
                tracing::warn!("[ConversationEngine] Completion failed: {}", e);
                self.error = Some(e.to_string());
                self.resolve_failed_placeholder();
            }
        }

        self.retrying_message_id = None;
        self.placeholder = None;
        effects
    }

    /// Start a new conversation. Any in-flight response becomes stale.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.is_generating = false;
        self.error = None;
        self.retrying_message_id = None;
        self.placeholder = None;
        self.total_tokens = 0;
        self.in_flight = None;
    }

    /// Replace the conversation with a stored one
    pub fn load(&mut self, messages: Vec<Message>, total_tokens: u64) {
        self.reset();
        self.messages = messages
            .into_iter()
            .map(|mut message| {
                if message.is_loading {
                    message.is_loading = false;
                    message.content = FAILED_RESPONSE_MARKER.to_string();
                }
                message
            })
            .collect();
        self.total_tokens = total_tokens;
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    fn build_request(&self, history: &[Message], options: &RequestOptions) -> CompletionRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !options.system_prompt.trim().is_empty() {
            messages.push(ChatMessage::new("system", options.system_prompt.clone()));
        }
        messages.extend(
            history
                .iter()
                .filter(|m| !m.is_loading)
                .map(Message::to_chat_message),
        );

        CompletionRequest {
            model: options.model.clone(),
            messages,
            temperature: options.temperature,
            max_tokens: None,
        }
    }

    fn dispatch(&mut self, request: CompletionRequest, target: ResponseTarget) -> Effect {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.in_flight = Some(InFlight { ticket, target });
        self.is_generating = true;
        Effect::Dispatch(PendingRequest { ticket, request })
    }

    fn resolve_failed_placeholder(&mut self) {
        let Some(placeholder) = &self.placeholder else {
            return;
        };
        let Some(index) = self.position(&placeholder.placeholder_id) else {
            return;
        };
        let message = &mut self.messages[index];
        if message.is_loading {
            message.is_loading = false;
            message.content = FAILED_RESPONSE_MARKER.to_string();
        }
    }
}
