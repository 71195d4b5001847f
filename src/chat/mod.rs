//! Conversation Engine and its message model

pub mod engine;
pub mod message;

pub use engine::{
    ConversationEngine, Effect, PendingRequest, PlaceholderRef, RequestOptions, ResponseTarget,
    SaveReason,
};
pub use message::{Message, Role, EMPTY_RESPONSE_MARKER, FAILED_RESPONSE_MARKER};
