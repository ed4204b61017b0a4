//! Phase processing and interrupt replies backed by a chat model.

use std::sync::Arc;

use async_trait::async_trait;
use cadence_scheduler::{
    Clock, ContentGenerator, ConversationMessage, ConversationState, MessageRole, Phase,
    PhaseHandlers, SystemClock,
};
use tracing::{error, info};

use crate::{ChatMessage, Completion, PromptBuilder};

/// Conversation messages sent along with each request.
const HISTORY_WINDOW: usize = 10;

/// Pre-authored message used when generation fails for `phase`.
pub fn fallback_message(phase: Phase) -> &'static str {
    match phase {
        Phase::MorningPlanning => {
            "Good morning! Let's start with a gentle approach to today. What's one thing you'd like to focus on?"
        }
        Phase::MorningCheckin => {
            "Good morning! How are you feeling as we start the day? Remember, we're taking things one step at a time."
        }
        Phase::MiddayCheckin => {
            "Hello! Just checking in at midday. How are you doing? Remember to take breaks and be kind to yourself."
        }
        Phase::EveningCheckin => {
            "Good evening! How was your day? Take a moment to appreciate what you accomplished, no matter how small."
        }
        Phase::NighttimePlanning => {
            "Thank you for a good day. Rest well, and we'll start fresh tomorrow!"
        }
    }
}

/// Runs phases and answers interrupts.
pub struct Agent {
    completion: Arc<dyn Completion>,
    prompts: PromptBuilder,
    clock: Arc<dyn Clock>,
}

impl Agent {
    /// Create an agent over `completion`.
    pub fn new(completion: Arc<dyn Completion>, prompts: PromptBuilder) -> Self {
        Self {
            completion,
            prompts,
            clock: Arc::new(SystemClock),
        }
    }

    /// Timestamp messages with `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run `phase` over `conversation`.
    ///
    /// Appends the model's reply, or the phase's fallback message if the model
    /// could not be reached. Morning planning stores the reply as the day's
    /// plan; nighttime planning retires it.
    #[tracing::instrument(skip(self, conversation), fields(user_id = %conversation.user_id))]
    pub async fn run_phase(&self, phase: Phase, mut conversation: ConversationState) -> ConversationState {
        info!(%phase, "executing phase");
        let now = self.clock.now();

        let mut messages = vec![ChatMessage::system(
            self.prompts.phase_prompt(phase, &conversation),
        )];
        messages.extend(history(&conversation));
        messages.push(ChatMessage::user(
            self.prompts.opening_message(phase, &conversation),
        ));

        match self.completion.complete(&messages).await {
            Ok(content) => {
                match phase {
                    Phase::MorningPlanning => {
                        conversation.set_plan(content.clone(), phase.as_str(), now);
                    }
                    Phase::NighttimePlanning => {
                        if let Some(plan) = conversation.daily_plan.take() {
                            conversation
                                .context_data
                                .insert("previous_plan".to_string(), plan.content.into());
                        }
                    }
                    _ => {}
                }
                conversation.push(ConversationMessage::assistant(content, phase, now));
                info!(%phase, "phase completed");
            }
            Err(e) => {
                error!(%phase, error = %e, "phase generation failed, using fallback");
                conversation.push(
                    ConversationMessage::assistant(fallback_message(phase), phase, now).as_error(),
                );
            }
        }

        conversation
    }

    /// Handlers that run every phase through this agent.
    pub fn phase_handlers(self: &Arc<Self>) -> PhaseHandlers {
        let agent = Arc::clone(self);
        PhaseHandlers::for_every_phase(move |phase, conversation| {
            let agent = Arc::clone(&agent);
            async move { Ok::<_, String>(agent.run_phase(phase, conversation).await) }
        })
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("prompts", &self.prompts)
            .finish_non_exhaustive()
    }
}

/// The most recent conversation messages in chat form.
fn history(conversation: &ConversationState) -> Vec<ChatMessage> {
    let skip = conversation.messages.len().saturating_sub(HISTORY_WINDOW);
    conversation.messages[skip..]
        .iter()
        .map(|m| match m.role {
            MessageRole::User => ChatMessage::user(m.content.clone()),
            MessageRole::Assistant => ChatMessage::assistant(m.content.clone()),
        })
        .collect()
}

#[async_trait]
impl ContentGenerator for Agent {
    async fn generate(
        &self,
        phase: Phase,
        conversation: &ConversationState,
        message: &str,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let mut messages = vec![ChatMessage::system(self.prompts.interrupt_prompt(phase))];
        messages.extend(history(conversation));

        // The interrupt handler usually logs the message before asking for a reply
        let latest = ChatMessage::user(message);
        if messages.last() != Some(&latest) {
            messages.push(latest);
        }

        Ok(self.completion.complete(&messages).await?)
    }
}
