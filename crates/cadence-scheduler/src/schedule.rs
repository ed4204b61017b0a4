//! Per-user mapping of phase to time of day.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::state::write_json_atomic;
use crate::{Phase, SchedulerError};

/// Default grace period for a phase, in minutes.
fn default_grace_minutes(phase: Phase) -> u32 {
    match phase {
        Phase::MorningPlanning => 120,
        Phase::MorningCheckin => 180,
        Phase::MiddayCheckin => 240,
        Phase::EveningCheckin => 180,
        Phase::NighttimePlanning => 120,
    }
}

/// Default wall-clock time for a phase.
fn default_time(phase: Phase) -> NaiveTime {
    let hour = match phase {
        Phase::MorningPlanning => 7,
        Phase::MorningCheckin => 9,
        Phase::MiddayCheckin => 13,
        Phase::EveningCheckin => 18,
        Phase::NighttimePlanning => 21,
    };
    NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Parse an `HH:MM` time of day.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, SchedulerError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| SchedulerError::InvalidTime(s.to_string()))
}

/// When a phase is scheduled and how long it may run late.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub phase: Phase,
    pub time: NaiveTime,
    pub grace_minutes: u32,
}

impl ScheduleEntry {
    /// Default entry for a phase.
    pub fn default_for(phase: Phase) -> Self {
        Self {
            phase,
            time: default_time(phase),
            grace_minutes: default_grace_minutes(phase),
        }
    }

    /// The most recent instant at or before `now` this entry was due.
    fn last_due(&self, now: NaiveDateTime) -> NaiveDateTime {
        let scheduled = now.date().and_time(self.time);
        if scheduled > now {
            scheduled - Duration::days(1)
        } else {
            scheduled
        }
    }

    /// The first instant strictly after `now` this entry is due.
    fn next_due(&self, now: NaiveDateTime) -> NaiveDateTime {
        let scheduled = now.date().and_time(self.time);
        if self.time <= now.time() {
            scheduled + Duration::days(1)
        } else {
            scheduled
        }
    }
}

/// The next scheduled phase relative to some instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NextPhase {
    pub phase: Phase,
    pub at: NaiveDateTime,
    /// Whole minutes until `at`, rounded down.
    pub minutes_until: i64,
}

/// The daily schedule: exactly one entry per phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleTable {
    entries: [ScheduleEntry; 5],
}

impl Default for ScheduleTable {
    fn default() -> Self {
        Self {
            entries: Phase::ALL.map(ScheduleEntry::default_for),
        }
    }
}

impl ScheduleTable {
    /// Load a table, applying the override file at `path` if present.
    ///
    /// A missing file yields the defaults. An unreadable or malformed file is
    /// logged and ignored.
    pub async fn load(path: &Path) -> Self {
        let mut table = Self::default();

        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return table,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read schedule overrides, using defaults");
                return table;
            }
        };

        match Self::parse_overrides(&bytes) {
            Ok(overrides) => {
                for (phase, time) in overrides {
                    table.set_time(phase, time);
                }
                info!(path = %path.display(), "loaded custom schedule");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed schedule overrides, using defaults");
            }
        }

        table
    }

    fn parse_overrides(bytes: &[u8]) -> Result<Vec<(Phase, NaiveTime)>, SchedulerError> {
        let raw: BTreeMap<String, String> = serde_json::from_slice(bytes)?;
        raw.iter()
            .map(|(name, time)| Ok((name.parse::<Phase>()?, parse_time_of_day(time)?)))
            .collect()
    }

    /// Write every phase's time to the override file at `path`.
    pub async fn save(&self, path: &Path) -> Result<(), SchedulerError> {
        write_json_atomic(path, &self.display_times()).await?;
        debug!(path = %path.display(), "saved schedule overrides");
        Ok(())
    }

    /// Entry for a phase.
    pub fn entry(&self, phase: Phase) -> &ScheduleEntry {
        &self.entries[phase.index()]
    }

    /// Scheduled time of day for a phase.
    pub fn time_of(&self, phase: Phase) -> NaiveTime {
        self.entry(phase).time
    }

    /// Override a phase's time of day.
    pub fn set_time(&mut self, phase: Phase, time: NaiveTime) {
        self.entries[phase.index()].time = time;
    }

    /// Override a phase's grace period.
    pub fn set_grace(&mut self, phase: Phase, minutes: u32) {
        self.entries[phase.index()].grace_minutes = minutes;
    }

    /// All entries in cycle order.
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Entries sorted by time of day (ties keep cycle order).
    pub fn sorted_by_time(&self) -> Vec<ScheduleEntry> {
        let mut sorted = self.entries.to_vec();
        sorted.sort_by_key(|e| (e.time, e.phase.index()));
        sorted
    }

    /// Phase → `HH:MM`, in cycle order.
    pub fn display_times(&self) -> BTreeMap<Phase, String> {
        self.entries
            .iter()
            .map(|e| (e.phase, e.time.format("%H:%M").to_string()))
            .collect()
    }

    /// Which phase the clock says should be active at `now`.
    ///
    /// The latest entry scheduled at or before `now`'s time of day. Before the
    /// earliest entry, the latest-scheduled phase of the previous day is still
    /// active.
    pub fn expected_phase(&self, now: NaiveDateTime) -> Phase {
        let sorted = self.sorted_by_time();
        let time = now.time();

        sorted
            .iter()
            .take_while(|e| time >= e.time)
            .last()
            .or_else(|| sorted.last())
            .map(|e| e.phase)
            .unwrap_or(Phase::FIRST)
    }

    /// Whether `phase` is past its scheduled time plus grace period.
    ///
    /// Uses the most recent occurrence of the scheduled time, stepping back a
    /// day when today's occurrence is still ahead of `now`.
    pub fn is_overdue(&self, phase: Phase, now: NaiveDateTime) -> bool {
        let entry = self.entry(phase);
        let deadline = entry.last_due(now) + Duration::minutes(i64::from(entry.grace_minutes));
        now > deadline
    }

    /// The soonest upcoming entry after `now`, rolling passed entries to tomorrow.
    pub fn time_until_next(&self, now: NaiveDateTime) -> Option<NextPhase> {
        self.entries
            .iter()
            .map(|e| (e.phase, e.next_due(now)))
            .min_by_key(|(phase, at)| (*at, phase.index()))
            .map(|(phase, at)| NextPhase {
                phase,
                at,
                minutes_until: (at - now).num_minutes(),
            })
    }
}
