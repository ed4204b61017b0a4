//! Conversational state shared between the scheduler and inbound messages.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::Phase;

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: NaiveDateTime,
    /// Phase that was active when the message was logged.
    pub phase: Phase,
    /// Whether the message was part of an interrupt exchange.
    #[serde(default)]
    pub interrupt: bool,
    /// Set on assistant messages that carry a fallback after a failure.
    #[serde(default)]
    pub error: bool,
}

impl ConversationMessage {
    /// A message from the user.
    pub fn user(content: impl Into<String>, phase: Phase, timestamp: NaiveDateTime) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            timestamp,
            phase,
            interrupt: false,
            error: false,
        }
    }

    /// A message from the assistant.
    pub fn assistant(content: impl Into<String>, phase: Phase, timestamp: NaiveDateTime) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            timestamp,
            phase,
            interrupt: false,
            error: false,
        }
    }

    /// Mark as part of an interrupt exchange.
    pub fn as_interrupt(mut self) -> Self {
        self.interrupt = true;
        self
    }

    /// Mark as a fallback produced after a failure.
    pub fn as_error(mut self) -> Self {
        self.error = true;
        self
    }
}

/// The day's plan as produced by a planning phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPlan {
    pub content: String,
    pub created: NaiveDateTime,
    pub last_updated: NaiveDateTime,
    /// What produced the latest revision (e.g. `morning_planning`).
    pub update_source: String,
}

impl DailyPlan {
    /// Create a new plan.
    pub fn new(content: impl Into<String>, source: impl Into<String>, now: NaiveDateTime) -> Self {
        Self {
            content: content.into(),
            created: now,
            last_updated: now,
            update_source: source.into(),
        }
    }

    /// Replace the plan's content, keeping its creation time.
    pub fn revise(&mut self, content: impl Into<String>, source: impl Into<String>, now: NaiveDateTime) {
        self.content = content.into();
        self.last_updated = now;
        self.update_source = source.into();
    }
}

/// Saved when an inbound message interrupts the scheduled flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptContext {
    pub interrupted_phase: Phase,
    pub message: String,
    pub timestamp: NaiveDateTime,
}

/// Per-user conversational state.
///
/// Kept in memory next to the scheduler state and guarded by the same lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub user_id: String,
    pub messages: Vec<ConversationMessage>,
    pub daily_plan: Option<DailyPlan>,
    /// Phase the conversation is currently in; set before a phase handler runs.
    pub active_phase: Phase,
    pub interrupt_flag: bool,
    pub interrupt_context: Option<InterruptContext>,
    pub last_activity: Option<NaiveDateTime>,
    /// Free-form context for phase handlers (calendar summaries, etc.).
    #[serde(default)]
    pub context_data: serde_json::Map<String, serde_json::Value>,
}

impl ConversationState {
    /// Fresh state for a user.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Append a message and bump `last_activity`.
    pub fn push(&mut self, message: ConversationMessage) {
        self.last_activity = Some(message.timestamp);
        self.messages.push(message);
    }

    /// Most recent assistant message, if any.
    pub fn last_assistant_message(&self) -> Option<&ConversationMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
    }

    /// Store or revise the daily plan.
    pub fn set_plan(&mut self, content: impl Into<String>, source: impl Into<String>, now: NaiveDateTime) {
        match &mut self.daily_plan {
            Some(plan) => plan.revise(content, source, now),
            None => self.daily_plan = Some(DailyPlan::new(content, source, now)),
        }
    }
}
