//! Interrupt arbitration for inbound messages.
//!
//! An interrupt is answered in the context of the phase that was active and
//! never advances the scheduler; scheduled progression resumes on its own.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::{ConversationMessage, ConversationState, InterruptContext, Phase};

/// Keywords that always mark a message as an interrupt (case-insensitive).
pub const URGENT_KEYWORDS: [&str; 7] = [
    "help",
    "urgent",
    "emergency",
    "stuck",
    "overwhelmed",
    "anxiety",
    "panic",
];

/// Reply used when content generation fails during an interrupt.
pub const INTERRUPT_FALLBACK_MESSAGE: &str =
    "I hear you! I'm here to support you. Can you tell me more about what you need right now?";

/// Produces natural-language replies.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generate a reply to `message` in the context of `phase`.
    async fn generate(
        &self,
        phase: Phase,
        conversation: &ConversationState,
        message: &str,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

/// Why a message was accepted as an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptReason {
    UrgentKeyword,
    CheckInPhase,
    Default,
}

fn has_urgent_keyword(message: &str) -> bool {
    let lower = message.to_lowercase();
    URGENT_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn interrupt_reason(current_phase: Phase, message: &str) -> Option<InterruptReason> {
    if has_urgent_keyword(message) {
        return Some(InterruptReason::UrgentKeyword);
    }
    if current_phase.is_check_in() {
        return Some(InterruptReason::CheckInPhase);
    }
    // Every remaining message is accepted too. Returning `None` here is what
    // would route planning-phase chatter through the normal flow.
    Some(InterruptReason::Default)
}

/// Whether `message` should be handled as an interrupt.
pub fn should_interrupt(current_phase: Phase, message: &str) -> bool {
    let reason = interrupt_reason(current_phase, message);
    debug!(phase = %current_phase, ?reason, "interrupt arbitration");
    reason.is_some()
}

/// Answer `message` as an interrupt of `interrupted_phase`.
///
/// Saves an [`InterruptContext`], logs both sides of the exchange, and returns
/// the reply. Generation failures fall back to a canned reply.
pub async fn handle_interrupt(
    conversation: &mut ConversationState,
    interrupted_phase: Phase,
    message: &str,
    generator: &dyn ContentGenerator,
    now: NaiveDateTime,
) -> String {
    info!(phase = %interrupted_phase, "handling interrupt");

    conversation.interrupt_context = Some(InterruptContext {
        interrupted_phase,
        message: message.to_string(),
        timestamp: now,
    });
    conversation.interrupt_flag = true;
    conversation.push(ConversationMessage::user(message, interrupted_phase, now).as_interrupt());

    match generator
        .generate(interrupted_phase, conversation, message)
        .await
    {
        Ok(reply) => {
            conversation.push(
                ConversationMessage::assistant(reply.clone(), interrupted_phase, now).as_interrupt(),
            );
            reply
        }
        Err(e) => {
            warn!(phase = %interrupted_phase, error = %e, "content generation failed, using fallback reply");
            conversation.push(
                ConversationMessage::assistant(INTERRUPT_FALLBACK_MESSAGE, interrupted_phase, now)
                    .as_interrupt()
                    .as_error(),
            );
            INTERRUPT_FALLBACK_MESSAGE.to_string()
        }
    }
}

/// Clear any saved interrupt. Does not change phase.
pub fn resume_from_interrupt(conversation: &mut ConversationState) -> Option<InterruptContext> {
    let context = conversation.interrupt_context.take();
    if let Some(ctx) = &context {
        info!(phase = %ctx.interrupted_phase, "resuming from interrupt");
    }
    conversation.interrupt_flag = false;
    context
}
