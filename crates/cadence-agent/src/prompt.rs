//! System prompt builder for Cadence.

use cadence_scheduler::{ConversationState, Phase};

const IDENTITY: &str = "\
# Who You Are

You are a gentle, supportive companion helping {name} move through the day. \
Your purpose is gentle awareness: time awareness, smooth transitions between \
activities, and self-compassion. You are not a therapist or a productivity coach.

## How You Communicate

- Warm, friendly and concise
- Ask open-ended questions and offer choices rather than directives
- Use \"we\" language; this is a partnership
- Celebrate small wins
- Never pushy, demanding or judgmental
";

const MORNING_PLANNING: &str = "\
## Phase: Morning Planning

Help shape a loose, flexible plan for today. This is not rigid scheduling.
- Ask about energy and what matters most today
- Suggest two or three focus areas rather than a long list
- Leave room for breaks, meals, movement and buffer time
- Write the plan in natural language and keep it collaborative
";

const MORNING_CHECKIN: &str = "\
## Phase: Morning Check-in

Ease from planning into doing.
- Check how they feel right now
- Reference the plan without pressure and help find one small first step
- Offer flexibility if the plan no longer fits
- Keep it brief and warm
";

const MIDDAY_CHECKIN: &str = "\
## Phase: Midday Check-in

A gentle awareness nudge in the middle of the day.
- Note the time and how the day is flowing
- Offer support for transitions and breaks
- Be understanding if things went differently than planned
- Suggest small adjustments or self-care if it helps
";

const EVENING_CHECKIN: &str = "\
## Phase: Evening Check-in

Wind the day down.
- Acknowledge the day with warmth and acceptance
- Celebrate what did get done, however small
- Meet any disappointment with compassion
- Help shift toward rest and an evening routine
";

const NIGHTTIME_PLANNING: &str = "\
## Phase: Nighttime Planning

Close the day and glance gently at tomorrow.
- Reflect on what worked without judgment
- Encourage gratitude for small moments
- Offer a brief, low-pressure preview of tomorrow
- End on a calm, caring note that supports rest
";

const INTERRUPT_GUIDE: &str = "\
## Responding Outside the Schedule

This message arrived outside the scheduled flow. Respond to what they need right \
now: acknowledge it, help in context, and only steer back to the current phase \
if that feels right. Keep the same gentle tone.
";

/// Builds system prompts and phase openers.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    user_name: String,
}

impl PromptBuilder {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
        }
    }

    /// Identity section shared by every prompt.
    pub fn system_prompt(&self) -> String {
        IDENTITY.replace("{name}", &self.user_name)
    }

    /// Full system prompt for a scheduled phase.
    pub fn phase_prompt(&self, phase: Phase, conversation: &ConversationState) -> String {
        let mut prompt = self.system_prompt();
        prompt.push('\n');
        prompt.push_str(phase_guide(phase));

        if let Some(plan) = &conversation.daily_plan {
            prompt.push_str("\n## Today's Plan\n\n");
            prompt.push_str(&plan.content);
            prompt.push('\n');
        }
        prompt
    }

    /// System prompt for an interrupt during `phase`.
    pub fn interrupt_prompt(&self, phase: Phase) -> String {
        format!(
            "{}\n{}\nThe current phase is {}.\n",
            self.system_prompt(),
            INTERRUPT_GUIDE,
            phase.label()
        )
    }

    /// The message that opens a phase.
    pub fn opening_message(&self, phase: Phase, conversation: &ConversationState) -> String {
        let plan = conversation.daily_plan.as_ref().map(|p| p.content.as_str());
        match phase {
            Phase::MorningPlanning => {
                "Let's create a gentle plan for today. What should I focus on?".to_string()
            }
            Phase::MorningCheckin => format!(
                "Good morning! Here's today's plan: {}. How are you feeling about starting the day?",
                plan.unwrap_or("No plan set yet")
            ),
            Phase::MiddayCheckin => format!(
                "It's midday! Here's what we planned: {}. How's your day going so far?",
                plan.unwrap_or("No plan set")
            ),
            Phase::EveningCheckin => format!(
                "Good evening! Here's what we planned today: {}. How did your day go?",
                plan.unwrap_or("No plan was set")
            ),
            Phase::NighttimePlanning => format!(
                "Here's what I planned for today: {}. Let's reflect on the day and prepare for tomorrow.",
                plan.unwrap_or("No plan was set today")
            ),
        }
    }
}

fn phase_guide(phase: Phase) -> &'static str {
    match phase {
        Phase::MorningPlanning => MORNING_PLANNING,
        Phase::MorningCheckin => MORNING_CHECKIN,
        Phase::MiddayCheckin => MIDDAY_CHECKIN,
        Phase::EveningCheckin => EVENING_CHECKIN,
        Phase::NighttimePlanning => NIGHTTIME_PLANNING,
    }
}
