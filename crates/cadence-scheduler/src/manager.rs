//! Registry of per-user scheduler loops.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveTime;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::interrupt::{handle_interrupt, resume_from_interrupt, should_interrupt};
use crate::{
    Clock, ContentGenerator, ConversationMessage, DailyPlan, InterruptContext, LoopState,
    Notifier, Phase, PhaseHandlers, ScheduleStatus, SchedulerConfig, SchedulerError,
    SchedulerLoop, SystemClock, UserSession,
};

/// Reply when the normal flow produced no assistant message.
const NO_REPLY_MESSAGE: &str = "I'm processing your request. Please give me a moment!";

/// Result of routing an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundReply {
    pub reply: String,
    /// Phase the message was handled in.
    pub phase: Phase,
    /// Whether it was handled as an interrupt.
    pub interrupted: bool,
}

/// Owns one [`SchedulerLoop`] per user.
///
/// Users are registered lazily on first access; their state file is read at
/// that point.
pub struct SchedulerManager {
    data_dir: PathBuf,
    handlers: Arc<PhaseHandlers>,
    notifier: Arc<dyn Notifier>,
    generator: Arc<dyn ContentGenerator>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    schedulers: RwLock<HashMap<String, Arc<SchedulerLoop>>>,
}

impl SchedulerManager {
    /// Create an empty manager storing user files under `data_dir`.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        handlers: PhaseHandlers,
        notifier: Arc<dyn Notifier>,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            handlers: Arc::new(handlers),
            notifier,
            generator,
            clock: Arc::new(SystemClock),
            config: SchedulerConfig::default(),
            schedulers: RwLock::new(HashMap::new()),
        }
    }

    /// Use `clock` for all loops created from now on.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `config` for all loops created from now on.
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Root directory for user files.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the user's loop, creating it on first access.
    pub async fn scheduler(&self, user_id: &str) -> Result<Arc<SchedulerLoop>, SchedulerError> {
        if let Some(existing) = self.schedulers.read().await.get(user_id) {
            return Ok(Arc::clone(existing));
        }

        validate_user_id(user_id)?;

        let mut schedulers = self.schedulers.write().await;
        // Another task may have registered the user while we waited
        if let Some(existing) = schedulers.get(user_id) {
            return Ok(Arc::clone(existing));
        }

        let session = UserSession::open(&self.data_dir, user_id).await;
        let scheduler = Arc::new(SchedulerLoop::new(
            session,
            Arc::clone(&self.handlers),
            Arc::clone(&self.notifier),
            Arc::clone(&self.clock),
            self.config,
        ));
        schedulers.insert(user_id.to_string(), Arc::clone(&scheduler));
        info!(user_id, "created scheduler");
        Ok(scheduler)
    }

    /// The user's loop, if already registered.
    pub async fn get(&self, user_id: &str) -> Result<Arc<SchedulerLoop>, SchedulerError> {
        self.schedulers
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownUser(user_id.to_string()))
    }

    /// Registered user ids, sorted.
    pub async fn users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.schedulers.read().await.keys().cloned().collect();
        users.sort();
        users
    }

    async fn all(&self) -> Vec<Arc<SchedulerLoop>> {
        self.schedulers.read().await.values().cloned().collect()
    }

    /// Start every registered loop. Returns how many were newly started.
    pub async fn start_all(&self) -> usize {
        let started = self
            .all()
            .await
            .iter()
            .filter(|scheduler| scheduler.start())
            .count();
        info!(started, "started schedulers");
        started
    }

    /// Signal every registered loop to stop.
    pub async fn stop_all(&self) {
        for scheduler in self.all().await {
            scheduler.stop();
        }
        info!("stopped all schedulers");
    }

    /// Stop every loop and wait for each to exit.
    pub async fn shutdown(&self) {
        for scheduler in self.all().await {
            scheduler.shutdown().await;
        }
    }

    /// Start one user's loop.
    pub async fn start(&self, user_id: &str) -> Result<bool, SchedulerError> {
        Ok(self.scheduler(user_id).await?.start())
    }

    /// Stop one user's loop.
    pub async fn stop(&self, user_id: &str) -> Result<bool, SchedulerError> {
        Ok(self.get(user_id).await?.stop())
    }

    /// Whether one user's loop is running.
    pub async fn loop_state(&self, user_id: &str) -> Result<LoopState, SchedulerError> {
        Ok(self.get(user_id).await?.loop_state())
    }

    /// Route an inbound message.
    ///
    /// Interrupts are answered in the context of the current phase without
    /// advancing it. Anything else goes through the current phase's handler.
    #[tracing::instrument(skip(self, message))]
    pub async fn handle_message(
        &self,
        user_id: &str,
        message: &str,
    ) -> Result<InboundReply, SchedulerError> {
        let scheduler = self.scheduler(user_id).await?;
        let mut guard = scheduler.session().lock().await;
        let session = &mut *guard;
        let phase = session.store.state().current_phase;
        let now = self.clock.now();
        info!(%phase, "processing inbound message");

        if should_interrupt(phase, message) {
            let reply = handle_interrupt(
                &mut session.conversation,
                phase,
                message,
                self.generator.as_ref(),
                now,
            )
            .await;
            return Ok(InboundReply {
                reply,
                phase,
                interrupted: true,
            });
        }

        session
            .conversation
            .push(ConversationMessage::user(message, phase, now));

        let handler = self
            .handlers
            .get(phase)
            .ok_or_else(|| SchedulerError::NoHandler(phase.to_string()))?;
        let mut conversation = session.conversation.clone();
        conversation.active_phase = phase;
        match handler(conversation).await {
            Ok(updated) => session.conversation = updated,
            Err(reason) => warn!(%phase, %reason, "phase handler failed on inbound message"),
        }

        let reply = session
            .conversation
            .last_assistant_message()
            .map(|m| m.content.clone())
            .unwrap_or_else(|| NO_REPLY_MESSAGE.to_string());
        Ok(InboundReply {
            reply,
            phase,
            interrupted: false,
        })
    }

    /// Clear the user's saved interrupt, if any.
    pub async fn resume(&self, user_id: &str) -> Result<Option<InterruptContext>, SchedulerError> {
        let scheduler = self.scheduler(user_id).await?;
        let mut session = scheduler.session().lock().await;
        Ok(resume_from_interrupt(&mut session.conversation))
    }

    /// Status snapshot for one user.
    pub async fn status(&self, user_id: &str) -> Result<ScheduleStatus, SchedulerError> {
        Ok(self.scheduler(user_id).await?.status().await)
    }

    /// The user's current daily plan.
    pub async fn plan(&self, user_id: &str) -> Result<Option<DailyPlan>, SchedulerError> {
        let scheduler = self.scheduler(user_id).await?;
        let session = scheduler.session().lock().await;
        Ok(session.conversation.daily_plan.clone())
    }

    /// Override a phase's time for one user.
    ///
    /// `phase` and `time` are validated strictly here: unknown names and
    /// malformed times are errors.
    pub async fn update_schedule(
        &self,
        user_id: &str,
        phase: &str,
        time: &str,
    ) -> Result<(), SchedulerError> {
        let phase: Phase = phase.parse()?;
        let time: NaiveTime = crate::schedule::parse_time_of_day(time)?;
        self.scheduler(user_id)
            .await?
            .update_schedule(phase, time)
            .await
    }
}

impl std::fmt::Debug for SchedulerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerManager")
            .field("data_dir", &self.data_dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// User ids become directory names, so keep them to a safe alphabet.
pub fn validate_user_id(user_id: &str) -> Result<(), SchedulerError> {
    let valid = !user_id.is_empty()
        && user_id != "."
        && user_id != ".."
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SchedulerError::InvalidUserId(user_id.to_string()))
    }
}
