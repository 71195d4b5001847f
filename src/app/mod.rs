//! Chat actor: owns the conversation engine, history and preferences,
//! and executes the effects the engine asks for.

pub mod actor;
pub mod messages;

pub use actor::{ChatHandle, Services};
pub use messages::{AppError, AppResult, AppSnapshot, Command, SessionPhase};
