//! Durable per-user scheduler state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::{Phase, SchedulerError};

/// Maximum number of nudge records kept.
pub const NUDGE_HISTORY_LIMIT: usize = 50;

/// A phase skipped because the scheduler caught up past it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedCheckIn {
    pub phase: Phase,
    pub missed_date: NaiveDate,
}

/// A pre-transition nudge that was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NudgeRecord {
    pub timestamp: NaiveDateTime,
    pub phase: Phase,
    pub message: String,
}

/// Scheduler state persisted for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState {
    /// When the last transition happened.
    #[serde(default)]
    pub last_phase_transition: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "Phase::deserialize_lenient")]
    pub current_phase: Phase,
    /// Completed daily cycles.
    #[serde(default)]
    pub daily_cycle_count: u64,
    /// Last successful transition into each phase.
    #[serde(default)]
    pub last_check_in_times: BTreeMap<Phase, NaiveDateTime>,
    /// Append-only log of skipped phases.
    #[serde(default)]
    pub missed_check_ins: Vec<MissedCheckIn>,
    /// Most recent nudges, oldest first.
    #[serde(default)]
    pub nudge_history: Vec<NudgeRecord>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            last_phase_transition: None,
            current_phase: Phase::FIRST,
            daily_cycle_count: 0,
            last_check_in_times: BTreeMap::new(),
            missed_check_ins: Vec::new(),
            nudge_history: Vec::new(),
        }
    }
}

impl SchedulerState {
    /// Whether moving to `target` at `now` starts a new day's cycle.
    ///
    /// The move must wrap through the first phase and the clock must have
    /// crossed midnight since the last transition.
    pub fn starts_new_cycle(&self, target: Phase, now: NaiveDateTime) -> bool {
        self.current_phase.wraps_to(target)
            && self
                .last_phase_transition
                .is_none_or(|last| last.date() < now.date())
    }

    /// Whether moving to `target` at `now` steps back within the same day.
    ///
    /// This happens when a schedule override moves the current phase later
    /// than the clock. Nothing was skipped, so no misses are logged.
    pub fn is_realignment(&self, target: Phase, now: NaiveDateTime) -> bool {
        self.current_phase.wraps_to(target) && !self.starts_new_cycle(target, now)
    }

    /// Move to `target`, logging `missed` phases against `now`'s date.
    ///
    /// Bumps the cycle count when the move starts a new day's cycle.
    pub fn apply_transition(&mut self, target: Phase, missed: &[Phase], now: NaiveDateTime) {
        let new_cycle = self.starts_new_cycle(target, now);

        self.missed_check_ins
            .extend(missed.iter().map(|&phase| MissedCheckIn {
                phase,
                missed_date: now.date(),
            }));
        self.current_phase = target;
        self.last_phase_transition = Some(now);
        self.last_check_in_times.insert(target, now);
        if new_cycle {
            self.daily_cycle_count += 1;
        }
    }

    /// Append a nudge, evicting the oldest beyond `limit`.
    pub fn push_nudge(&mut self, record: NudgeRecord, limit: usize) {
        self.nudge_history.push(record);
        if self.nudge_history.len() > limit {
            let excess = self.nudge_history.len() - limit;
            self.nudge_history.drain(..excess);
        }
    }

    /// Missed check-ins recorded on `date`.
    pub fn missed_on(&self, date: NaiveDate) -> Vec<MissedCheckIn> {
        self.missed_check_ins
            .iter()
            .filter(|m| m.missed_date == date)
            .cloned()
            .collect()
    }
}

/// Write-through store for one user's [`SchedulerState`].
///
/// Every mutation rewrites the whole file; a failed write leaves both the file
/// and the in-memory state unchanged.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: SchedulerState,
}

impl StateStore {
    /// Open the store at `path`.
    ///
    /// A missing file starts from defaults. An unreadable or malformed file is
    /// logged and treated as a first run.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(state) => {
                    debug!(path = %path.display(), "loaded scheduler state");
                    state
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed scheduler state, starting fresh");
                    SchedulerState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SchedulerState::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read scheduler state, starting fresh");
                SchedulerState::default()
            }
        };

        Self { path, state }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current state.
    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Mutate the state and persist it.
    pub async fn update<F>(&mut self, mutate: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(&mut SchedulerState),
    {
        let mut next = self.state.clone();
        mutate(&mut next);
        write_json_atomic(&self.path, &next).await?;
        self.state = next;
        Ok(())
    }

    /// Persist a transition to `target`.
    pub async fn record_transition(
        &mut self,
        target: Phase,
        missed: &[Phase],
        now: NaiveDateTime,
    ) -> Result<(), SchedulerError> {
        self.update(|state| state.apply_transition(target, missed, now))
            .await
    }

    /// Persist a sent nudge, keeping at most `limit` records.
    pub async fn record_nudge(
        &mut self,
        phase: Phase,
        message: &str,
        now: NaiveDateTime,
        limit: usize,
    ) -> Result<(), SchedulerError> {
        let record = NudgeRecord {
            timestamp: now,
            phase,
            message: message.to_string(),
        };
        self.update(|state| state.push_nudge(record, limit)).await
    }
}

/// Serialize `value` to `path` via a temp file and rename.
pub(crate) async fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), SchedulerError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_defaults_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path().join("scheduler_state.json")).await;

        let state = store.state();
        assert_eq!(state.current_phase, Phase::MorningPlanning);
        assert_eq!(state.daily_cycle_count, 0);
        assert!(state.last_phase_transition.is_none());
        assert!(state.last_check_in_times.is_empty());
        assert!(state.missed_check_ins.is_empty());
        assert!(state.nudge_history.is_empty());
        // First access does not create the file
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_malformed_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scheduler_state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = StateStore::open(&path).await;
        assert_eq!(store.state(), &SchedulerState::default());
    }

    #[tokio::test]
    async fn test_reads_existing_file_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scheduler_state.json");
        std::fs::write(
            &path,
            r#"{
                "last_phase_transition": "2024-01-15T10:30:00",
                "current_phase": "midday_checkin",
                "daily_cycle_count": 5,
                "last_check_in_times": {"morning_planning": "2024-01-15T07:00:00.123456"},
                "missed_check_ins": [{"phase": "morning_checkin", "missed_date": "2024-01-14"}],
                "nudge_history": []
            }"#,
        )
        .unwrap();

        let store = StateStore::open(&path).await;
        let state = store.state();
        assert_eq!(state.current_phase, Phase::MiddayCheckin);
        assert_eq!(state.daily_cycle_count, 5);
        assert_eq!(state.last_phase_transition, Some(at(10, 30)));
        assert_eq!(state.missed_check_ins.len(), 1);
        assert!(
            state
                .last_check_in_times
                .contains_key(&Phase::MorningPlanning)
        );
    }

    #[tokio::test]
    async fn test_unknown_current_phase_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scheduler_state.json");
        std::fs::write(&path, r#"{"current_phase": "siesta", "daily_cycle_count": 2}"#).unwrap();

        let store = StateStore::open(&path).await;
        assert_eq!(store.state().current_phase, Phase::MorningPlanning);
        assert_eq!(store.state().daily_cycle_count, 2);
    }

    #[tokio::test]
    async fn test_update_writes_through() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users").join("alex").join("scheduler_state.json");

        let mut store = StateStore::open(&path).await;
        store
            .record_transition(Phase::MorningCheckin, &[], at(9, 5))
            .await
            .unwrap();

        let reopened = StateStore::open(&path).await;
        assert_eq!(reopened.state(), store.state());
        assert_eq!(reopened.state().current_phase, Phase::MorningCheckin);
        assert_eq!(
            reopened.state().last_check_in_times.get(&Phase::MorningCheckin),
            Some(&at(9, 5))
        );

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["current_phase"], "morning_checkin");
        assert_eq!(raw["last_phase_transition"], "2024-01-15T09:05:00");
        assert!(raw["nudge_history"].is_array());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_unchanged() {
        let dir = TempDir::new().unwrap();
        // The parent "directory" is a file, so the write must fail
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let mut store = StateStore::open(blocker.join("scheduler_state.json")).await;
        let result = store
            .record_transition(Phase::EveningCheckin, &[], at(18, 0))
            .await;

        assert!(result.is_err());
        assert_eq!(store.state(), &SchedulerState::default());
    }

    #[test]
    fn test_transition_records_missed_with_date() {
        let mut state = SchedulerState::default();
        state.apply_transition(
            Phase::EveningCheckin,
            &[Phase::MorningCheckin, Phase::MiddayCheckin],
            at(21, 30),
        );

        assert_eq!(state.current_phase, Phase::EveningCheckin);
        assert_eq!(
            state.missed_check_ins,
            vec![
                MissedCheckIn {
                    phase: Phase::MorningCheckin,
                    missed_date: at(0, 0).date(),
                },
                MissedCheckIn {
                    phase: Phase::MiddayCheckin,
                    missed_date: at(0, 0).date(),
                },
            ]
        );
        assert_eq!(state.daily_cycle_count, 0);
    }

    #[test]
    fn test_cycle_count_on_wrap() {
        let mut state = SchedulerState::default();
        state.current_phase = Phase::NighttimePlanning;
        state.apply_transition(Phase::MorningPlanning, &[], at(7, 0));
        assert_eq!(state.daily_cycle_count, 1);

        // Catching up across midnight past the first phase also counts
        state.current_phase = Phase::EveningCheckin;
        state.apply_transition(
            Phase::MorningCheckin,
            &[Phase::NighttimePlanning, Phase::MorningPlanning],
            at(9, 0) + Duration::days(1),
        );
        assert_eq!(state.daily_cycle_count, 2);

        // Forward moves within a day do not
        state.apply_transition(Phase::MiddayCheckin, &[], at(13, 0) + Duration::days(1));
        assert_eq!(state.daily_cycle_count, 2);
    }

    #[test]
    fn test_same_day_step_back_is_not_a_new_cycle() {
        let mut state = SchedulerState::default();
        state.apply_transition(Phase::EveningCheckin, &[], at(18, 5));

        assert!(state.is_realignment(Phase::MiddayCheckin, at(19, 0)));
        assert!(!state.starts_new_cycle(Phase::MiddayCheckin, at(19, 0)));

        state.apply_transition(Phase::MiddayCheckin, &[], at(19, 0));
        assert_eq!(state.daily_cycle_count, 0);
        assert!(state.missed_check_ins.is_empty());

        // The next morning the same move is a new cycle
        let tomorrow = at(9, 30) + Duration::days(1);
        assert!(state.starts_new_cycle(Phase::MorningCheckin, tomorrow));
        assert!(!state.is_realignment(Phase::MorningCheckin, tomorrow));
    }

    #[test]
    fn test_missed_on_filters_by_date() {
        let mut state = SchedulerState::default();
        state.apply_transition(Phase::MiddayCheckin, &[Phase::MorningCheckin], at(14, 0));
        state.apply_transition(
            Phase::NighttimePlanning,
            &[Phase::EveningCheckin],
            at(23, 0) + Duration::days(1),
        );

        let today = state.missed_on(at(0, 0).date());
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].phase, Phase::MorningCheckin);
    }

    #[tokio::test]
    async fn test_nudge_history_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let mut store = StateStore::open(dir.path().join("scheduler_state.json")).await;

        for i in 0..51 {
            store
                .record_nudge(
                    Phase::MorningCheckin,
                    &format!("nudge {i}"),
                    at(8, 0) + Duration::minutes(i),
                    NUDGE_HISTORY_LIMIT,
                )
                .await
                .unwrap();
        }

        let history = &store.state().nudge_history;
        assert_eq!(history.len(), NUDGE_HISTORY_LIMIT);
        assert_eq!(history[0].message, "nudge 1");
        assert_eq!(history[49].message, "nudge 50");
    }

    proptest! {
        #[test]
        fn nudge_history_never_exceeds_limit(count in 0usize..200, limit in 1usize..60) {
            let mut state = SchedulerState::default();
            for i in 0..count {
                state.push_nudge(
                    NudgeRecord {
                        timestamp: at(8, 0),
                        phase: Phase::MiddayCheckin,
                        message: i.to_string(),
                    },
                    limit,
                );
                prop_assert!(state.nudge_history.len() <= limit);
            }
            prop_assert_eq!(state.nudge_history.len(), count.min(limit));
            if count > 0 {
                prop_assert_eq!(&state.nudge_history.last().unwrap().message, &(count - 1).to_string());
            }
        }
    }
}
