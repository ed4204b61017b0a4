//! Read-only status snapshot for callers.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::{LoopState, MissedCheckIn, Phase, ScheduleTable, SchedulerState};

/// The next phase and how far away it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NextPhaseInfo {
    pub phase: Phase,
    pub minutes_until: i64,
}

/// Where a user stands relative to their schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleStatus {
    pub current_time: NaiveDateTime,
    pub current_phase: Phase,
    pub expected_phase: Phase,
    pub is_on_schedule: bool,
    pub schedule: BTreeMap<Phase, String>,
    pub next_phase_info: Option<NextPhaseInfo>,
    pub last_transition: Option<NaiveDateTime>,
    pub missed_check_ins_today: Vec<MissedCheckIn>,
}

impl ScheduleStatus {
    /// Snapshot `state` against `schedule` at `now`.
    pub fn new(schedule: &ScheduleTable, state: &SchedulerState, now: NaiveDateTime) -> Self {
        let expected_phase = schedule.expected_phase(now);
        Self {
            current_time: now,
            current_phase: state.current_phase,
            expected_phase,
            is_on_schedule: state.current_phase == expected_phase,
            schedule: schedule.display_times(),
            next_phase_info: schedule.time_until_next(now).map(|next| NextPhaseInfo {
                phase: next.phase,
                minutes_until: next.minutes_until,
            }),
            last_transition: state.last_phase_transition,
            missed_check_ins_today: state.missed_on(now.date()),
        }
    }

    /// Human-readable summary.
    pub fn render(&self, loop_state: LoopState) -> String {
        let mut out = String::from("Schedule Status\n\n");
        let _ = writeln!(out, "Current time: {}", self.current_time.format("%Y-%m-%d %H:%M"));
        let _ = writeln!(out, "Current phase: {}", title(self.current_phase));
        let _ = writeln!(out, "Expected phase: {}", title(self.expected_phase));
        out.push_str(if self.is_on_schedule {
            "On schedule\n"
        } else {
            "Behind schedule\n"
        });

        out.push_str("\nDaily Schedule:\n");
        for (phase, time) in &self.schedule {
            let marker = if *phase == self.current_phase { "*" } else { "-" };
            let _ = writeln!(out, "{marker} {}: {time}", title(*phase));
        }

        if let Some(next) = self.next_phase_info {
            let _ = write!(
                out,
                "\nNext: {} in {} minutes",
                title(next.phase),
                next.minutes_until
            );
        }

        if !self.missed_check_ins_today.is_empty() {
            let missed: Vec<String> = self
                .missed_check_ins_today
                .iter()
                .map(|m| title(m.phase))
                .collect();
            let _ = write!(out, "\nMissed today: {}", missed.join(", "));
        }

        out.push_str(match loop_state {
            LoopState::Running => "\n\nScheduler: running (automatic nudges enabled)",
            LoopState::Stopped => "\n\nScheduler: stopped",
        });
        out
    }
}

fn title(phase: Phase) -> String {
    phase
        .as_str()
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
