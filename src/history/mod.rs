//! History Store: persisted sessions, the recency index and titles

pub mod session;
pub mod store;
pub mod title;

pub use session::{ChatSession, HistoryEntry, SessionSettings, COPY_SUFFIX, DEFAULT_TITLE};
pub use store::{HistoryError, HistoryResult, HistoryStore};
pub use title::{sanitize_title, TitleError, TitleGenerator};
