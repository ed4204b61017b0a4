//! Per-user polling loop.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, NaiveTime};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    Clock, ConversationState, NUDGE_HISTORY_LIMIT, Phase, ScheduleStatus, ScheduleTable,
    SchedulerError, StateStore,
};

/// File holding the persisted [`crate::SchedulerState`].
const STATE_FILE_NAME: &str = "scheduler_state.json";

/// Optional per-user schedule override file.
const SCHEDULE_FILE_NAME: &str = "schedule.json";

/// Future returned by a [`PhaseHandler`].
pub type PhaseFuture =
    Pin<Box<dyn Future<Output = Result<ConversationState, String>> + Send>>;

/// Processes a phase: takes the conversation and returns the updated one.
pub type PhaseHandler = Arc<dyn Fn(ConversationState) -> PhaseFuture + Send + Sync>;

/// Phase handlers keyed by phase.
#[derive(Clone, Default)]
pub struct PhaseHandlers {
    handlers: HashMap<Phase, PhaseHandler>,
}

impl PhaseHandlers {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `phase`, replacing any previous one.
    pub fn with<F, Fut>(mut self, phase: Phase, handler: F) -> Self
    where
        F: Fn(ConversationState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ConversationState, String>> + Send + 'static,
    {
        let boxed: PhaseHandler = Arc::new(move |conversation: ConversationState| -> PhaseFuture {
            Box::pin(handler(conversation))
        });
        self.handlers.insert(phase, boxed);
        self
    }

    /// Register one function for every phase; it receives the target phase.
    pub fn for_every_phase<F, Fut>(handler: F) -> Self
    where
        F: Fn(Phase, ConversationState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ConversationState, String>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Phase::ALL.into_iter().fold(Self::new(), |handlers, phase| {
            let handler = Arc::clone(&handler);
            handlers.with(phase, move |conversation| handler(phase, conversation))
        })
    }

    /// Handler for `phase`, if registered.
    pub fn get(&self, phase: Phase) -> Option<PhaseHandler> {
        self.handlers.get(&phase).cloned()
    }
}

impl fmt::Debug for PhaseHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut phases: Vec<_> = self.handlers.keys().collect();
        phases.sort();
        f.debug_struct("PhaseHandlers")
            .field("phases", &phases)
            .finish()
    }
}

/// Delivers text to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send `message`; returns whether it was delivered.
    async fn send(&self, message: &str) -> bool;
}

/// Loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Pause between passes.
    pub poll_interval: Duration,
    /// Pause after a pass that failed.
    pub error_retry_interval: Duration,
    /// Nudge when the next phase is at most this many minutes away.
    pub nudge_window_minutes: i64,
    /// Nudge records kept in the state file.
    pub nudge_history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            error_retry_interval: Duration::from_secs(60),
            nudge_window_minutes: 30,
            nudge_history_limit: NUDGE_HISTORY_LIMIT,
        }
    }
}

/// Everything the loop and the inbound path share for one user.
///
/// Always accessed through one `tokio::sync::Mutex`.
#[derive(Debug)]
pub struct UserSession {
    pub user_id: String,
    pub store: StateStore,
    pub schedule: ScheduleTable,
    pub schedule_path: PathBuf,
    pub conversation: ConversationState,
}

impl UserSession {
    /// Open a user's session under `<data_dir>/users/<user_id>/`.
    pub async fn open(data_dir: &Path, user_id: &str) -> Self {
        let dir = data_dir.join("users").join(user_id);
        let schedule_path = dir.join(SCHEDULE_FILE_NAME);
        Self {
            user_id: user_id.to_string(),
            store: StateStore::open(dir.join(STATE_FILE_NAME)).await,
            schedule: ScheduleTable::load(&schedule_path).await,
            schedule_path,
            conversation: ConversationState::new(user_id),
        }
    }

    /// Override `phase`'s time and persist the override file.
    ///
    /// The table is left untouched if the file cannot be written.
    pub async fn update_schedule(
        &mut self,
        phase: Phase,
        time: NaiveTime,
    ) -> Result<(), SchedulerError> {
        let mut next = self.schedule.clone();
        next.set_time(phase, time);
        next.save(&self.schedule_path).await?;
        self.schedule = next;
        info!(user_id = %self.user_id, %phase, time = %time.format("%H:%M"), "updated schedule");
        Ok(())
    }

    /// Status snapshot at `now`.
    pub fn status(&self, now: NaiveDateTime) -> ScheduleStatus {
        ScheduleStatus::new(&self.schedule, self.store.state(), now)
    }
}

/// Whether a loop task is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Running,
    Stopped,
}

/// What a single pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Expected phase is current and nothing is close.
    OnSchedule { phase: Phase },
    /// A nudge for the upcoming phase was sent and recorded.
    Nudged {
        phase: Phase,
        upcoming: Phase,
        minutes_until: i64,
    },
    /// The clock has moved on but the current phase is within its grace period.
    Waiting { current: Phase, expected: Phase },
    /// Caught up to the expected phase.
    Transitioned {
        from: Phase,
        to: Phase,
        missed: Vec<Phase>,
    },
}

struct RunHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The polling engine for one user.
pub struct SchedulerLoop {
    user_id: String,
    session: Arc<Mutex<UserSession>>,
    handlers: Arc<PhaseHandlers>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    running: StdMutex<Option<RunHandle>>,
}

impl SchedulerLoop {
    /// Create a stopped loop over `session`.
    pub fn new(
        session: UserSession,
        handlers: Arc<PhaseHandlers>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            user_id: session.user_id.clone(),
            session: Arc::new(Mutex::new(session)),
            handlers,
            notifier,
            clock,
            config,
            running: StdMutex::new(None),
        }
    }

    /// User this loop belongs to.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The shared per-user session.
    pub fn session(&self) -> &Arc<Mutex<UserSession>> {
        &self.session
    }

    /// Current wall-clock time as seen by the loop.
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Run one pass.
    #[tracing::instrument(skip(self), fields(user_id = %self.user_id))]
    pub async fn tick(&self) -> Result<TickOutcome, SchedulerError> {
        let mut session = self.session.lock().await;
        let now = self.clock.now();
        let expected = session.schedule.expected_phase(now);
        let current = session.store.state().current_phase;

        if expected == current {
            return self.maybe_nudge(&mut session, current, now).await;
        }

        if !session.schedule.is_overdue(current, now) {
            debug!(%current, %expected, "transition pending, within grace period");
            return Ok(TickOutcome::Waiting { current, expected });
        }

        let missed = if session.store.state().is_realignment(expected, now) {
            info!(%current, %expected, "schedule moved behind the current phase, realigning");
            Vec::new()
        } else {
            current.phases_between(expected)
        };
        if !missed.is_empty() {
            warn!(%current, %expected, ?missed, "catching up past missed phases");
        }
        self.transition(&mut session, expected, missed, now).await
    }

    async fn maybe_nudge(
        &self,
        session: &mut UserSession,
        current: Phase,
        now: NaiveDateTime,
    ) -> Result<TickOutcome, SchedulerError> {
        let Some(next) = session.schedule.time_until_next(now) else {
            return Ok(TickOutcome::OnSchedule { phase: current });
        };
        if next.minutes_until > self.config.nudge_window_minutes {
            return Ok(TickOutcome::OnSchedule { phase: current });
        }

        let message = format!(
            "Gentle reminder: Your {} is coming up in {} minutes. No pressure!",
            next.phase.label(),
            next.minutes_until
        );
        if !self.notifier.send(&message).await {
            return Err(SchedulerError::NotificationFailed(message));
        }

        session
            .store
            .record_nudge(current, &message, now, self.config.nudge_history_limit)
            .await?;
        info!(phase = %current, upcoming = %next.phase, minutes = next.minutes_until, "sent nudge");
        Ok(TickOutcome::Nudged {
            phase: current,
            upcoming: next.phase,
            minutes_until: next.minutes_until,
        })
    }

    /// Run `target`'s handler and commit the transition.
    ///
    /// State only advances once the handler succeeded and the state file was
    /// written. The handler's reply is then pushed through the notifier.
    #[tracing::instrument(skip(self, session, missed), fields(user_id = %self.user_id))]
    async fn transition(
        &self,
        session: &mut UserSession,
        target: Phase,
        missed: Vec<Phase>,
        now: NaiveDateTime,
    ) -> Result<TickOutcome, SchedulerError> {
        let from = session.store.state().current_phase;
        let handler = self
            .handlers
            .get(target)
            .ok_or_else(|| SchedulerError::NoHandler(target.to_string()))?;

        let mut conversation = session.conversation.clone();
        conversation.active_phase = target;
        let updated = handler(conversation)
            .await
            .map_err(|reason| SchedulerError::TransitionFailed {
                phase: target.to_string(),
                reason,
            })?;

        session.store.record_transition(target, &missed, now).await?;
        session.conversation = updated;
        info!(%from, to = %target, missed = missed.len(), "phase transition");

        let reply = session
            .conversation
            .last_assistant_message()
            .filter(|m| m.phase == target && !m.interrupt)
            .map(|m| m.content.clone());
        if let Some(reply) = reply {
            if !self.notifier.send(&reply).await {
                warn!(phase = %target, "failed to deliver phase message");
            }
        }

        Ok(TickOutcome::Transitioned {
            from,
            to: target,
            missed,
        })
    }

    /// Poll until `shutdown_rx` flips to `true` or its sender goes away.
    ///
    /// A failed pass is logged and retried after the shorter error interval.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(user_id = %self.user_id, "scheduler loop starting");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let pause = match self.tick().await {
                Ok(outcome) => {
                    debug!(user_id = %self.user_id, ?outcome, "scheduler pass complete");
                    self.config.poll_interval
                }
                Err(e) => {
                    error!(user_id = %self.user_id, error = %e, "scheduler pass failed");
                    self.config.error_retry_interval
                }
            };

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(user_id = %self.user_id, "scheduler received shutdown signal");
                        break;
                    }
                }
                _ = sleep(pause) => {}
            }
        }

        info!(user_id = %self.user_id, "scheduler loop stopped");
    }

    /// Spawn the polling task. Returns `false` if it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|h| !h.task.is_finished()) {
            debug!(user_id = %self.user_id, "scheduler already running");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.run(shutdown_rx).await });
        *running = Some(RunHandle { shutdown_tx, task });
        info!(user_id = %self.user_id, "scheduler started");
        true
    }

    /// Signal the task to exit after its current pass. Returns `false` if it
    /// was not running.
    pub fn stop(&self) -> bool {
        self.signal_stop().is_some()
    }

    /// Signal the task to stop and wait for it to exit.
    pub async fn shutdown(&self) {
        let Some(task) = self.signal_stop() else {
            return;
        };
        if let Err(e) = task.await {
            error!(user_id = %self.user_id, error = %e, "scheduler task panicked");
        }
    }

    fn signal_stop(&self) -> Option<JoinHandle<()>> {
        let handle = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        // The task may already have exited, in which case nobody is listening.
        let _ = handle.shutdown_tx.send(true);
        info!(user_id = %self.user_id, "scheduler stop requested");
        Some(handle.task)
    }

    /// Whether the polling task is active.
    pub fn loop_state(&self) -> LoopState {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        match running.as_ref() {
            Some(handle) if !handle.task.is_finished() => LoopState::Running,
            _ => LoopState::Stopped,
        }
    }

    /// Override a phase's time for this user.
    pub async fn update_schedule(&self, phase: Phase, time: NaiveTime) -> Result<(), SchedulerError> {
        self.session.lock().await.update_schedule(phase, time).await
    }

    /// Status snapshot.
    pub async fn status(&self) -> ScheduleStatus {
        let session = self.session.lock().await;
        session.status(self.clock.now())
    }
}

impl fmt::Debug for SchedulerLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerLoop")
            .field("user_id", &self.user_id)
            .field("config", &self.config)
            .field("state", &self.loop_state())
            .finish_non_exhaustive()
    }
}
