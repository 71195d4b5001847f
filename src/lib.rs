//! Parley - conversation engine and history store for an OpenAI-compatible chat client
//!
//! The engine is a synchronous state machine that returns effects; the
//! [`ChatHandle`] actor executes them against the completion API and storage.

pub mod app;
pub mod catalog;
pub mod chat;
pub mod cli;
pub mod config;
pub mod core;
pub mod history;
pub mod preferences;
pub mod storage;
pub mod utils;

pub use app::{AppError, AppResult, AppSnapshot, ChatHandle, Command, Services, SessionPhase};
pub use crate::config::Settings;
pub use crate::core::llm::{CompletionApi, LLMClient};
