//! Daily phase scheduler for Cadence.
//!
//! This crate provides the temporal control layer that:
//! - Cycles a user through five conversational phases each day
//! - Polls the wall clock and catches up to the expected phase when overdue
//! - Records missed check-ins and pre-transition nudges
//! - Arbitrates inbound messages as out-of-band interrupts
//! - Persists scheduler state per user so restarts resume where they left off

mod clock;
mod conversation;
mod error;
mod interrupt;
mod manager;
mod phase;
mod schedule;
mod scheduler;
mod state;
mod status;

pub use clock::{Clock, FixedClock, SystemClock};
pub use conversation::{
    ConversationMessage, ConversationState, DailyPlan, InterruptContext, MessageRole,
};
pub use error::SchedulerError;
pub use interrupt::{
    ContentGenerator, INTERRUPT_FALLBACK_MESSAGE, URGENT_KEYWORDS, handle_interrupt,
    resume_from_interrupt, should_interrupt,
};
pub use manager::{InboundReply, SchedulerManager, validate_user_id};
pub use phase::Phase;
pub use schedule::{NextPhase, ScheduleEntry, ScheduleTable, parse_time_of_day};
pub use scheduler::{
    LoopState, Notifier, PhaseFuture, PhaseHandler, PhaseHandlers, SchedulerConfig, SchedulerLoop,
    TickOutcome, UserSession,
};
pub use state::{MissedCheckIn, NUDGE_HISTORY_LIMIT, NudgeRecord, SchedulerState, StateStore};
pub use status::{NextPhaseInfo, ScheduleStatus};
