//! Conversational collaborators for Cadence.
//!
//! This crate provides:
//! - An OpenAI-compatible chat-completions client
//! - Phase and interrupt prompts
//! - The five phase handlers, with pre-authored fallbacks
//! - Telegram and log-only notifiers

mod agent;
mod error;
mod notify;
mod openai;
mod prompt;

pub use agent::{Agent, fallback_message};
pub use error::AgentError;
pub use notify::{LogNotifier, TELEGRAM_API_BASE, TelegramNotifier};
pub use openai::{
    ChatClient, ChatConfig, ChatMessage, ChatRole, Completion, DEFAULT_BASE_URL, DEFAULT_MODEL,
};
pub use prompt::PromptBuilder;
