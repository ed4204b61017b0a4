//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Filesystem error while reading or writing state.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Phase name is not one of the five daily phases.
    #[error("unknown phase: {0}")]
    UnknownPhase(String),

    /// Time of day could not be parsed as `HH:MM`.
    #[error("invalid time of day: {0}")]
    InvalidTime(String),

    /// No phase handler is registered for the target phase.
    #[error("no handler registered for phase: {0}")]
    NoHandler(String),

    /// The phase handler failed, so the transition did not happen.
    #[error("transition to {phase} failed: {reason}")]
    TransitionFailed { phase: String, reason: String },

    /// The notifier did not deliver a message.
    #[error("notification not delivered: {0}")]
    NotificationFailed(String),

    /// User id cannot be used as a directory name.
    #[error("invalid user id: {0:?}")]
    InvalidUserId(String),

    /// No scheduler is registered for the user.
    #[error("unknown user: {0}")]
    UnknownUser(String),
}
