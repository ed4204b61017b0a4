//! Daemon command: per-user scheduler loops plus the HTTP surface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use miette::Result;
use tokio::sync::watch;
use tracing::{info, warn};

use cadence_agent::{Agent, ChatClient, ChatConfig, LogNotifier, PromptBuilder, TelegramNotifier};
use cadence_scheduler::{ContentGenerator, Notifier, SchedulerConfig, SchedulerManager};

/// Configuration for the daemon.
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub users: Vec<String>,
    pub port: u16,
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub model: String,
    pub user_name: String,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// Seconds between scheduler passes.
    pub poll_interval: u64,
    /// Seconds to wait after a failed pass.
    pub error_retry_interval: u64,
    /// Start every user's loop on boot.
    pub autostart: bool,
}

impl DaemonConfig {
    fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_secs(self.poll_interval),
            error_retry_interval: Duration::from_secs(self.error_retry_interval),
            ..SchedulerConfig::default()
        }
    }

    fn chat_config(&self) -> ChatConfig {
        let config = ChatConfig::new(&self.openai_api_key).with_model(&self.model);
        match self.openai_base_url.as_deref().filter(|s| !s.is_empty()) {
            Some(base_url) => config.with_base_url(base_url),
            None => config,
        }
    }

    /// Telegram when a bot token is configured, log-only otherwise.
    fn notifier(&self) -> Result<Arc<dyn Notifier>> {
        match self.telegram_bot_token.as_deref().filter(|s| !s.is_empty()) {
            Some(token) => {
                let chat_id = self.telegram_chat_id.clone().unwrap_or_default();
                let notifier = TelegramNotifier::new(token, chat_id)
                    .map_err(|e| miette::miette!("{}", e))?;
                info!("delivering messages via Telegram");
                Ok(Arc::new(notifier))
            }
            None => {
                warn!("TELEGRAM_BOT_TOKEN not set, messages will only be logged");
                Ok(Arc::new(LogNotifier))
            }
        }
    }
}

/// Run the daemon until ctrl-c.
pub async fn run(config: DaemonConfig) -> Result<()> {
    info!(data_dir = %config.data_dir.display(), "starting cadence daemon");

    let client = ChatClient::new(config.chat_config()).map_err(|e| miette::miette!("{}", e))?;
    info!(model = %client.model(), "chat client ready");

    let agent = Arc::new(Agent::new(
        Arc::new(client),
        PromptBuilder::new(&config.user_name),
    ));
    let notifier = config.notifier()?;

    let manager = Arc::new(
        SchedulerManager::new(
            config.data_dir.clone(),
            agent.phase_handlers(),
            notifier,
            Arc::clone(&agent) as Arc<dyn ContentGenerator>,
        )
        .with_config(config.scheduler_config()),
    );

    for user in &config.users {
        let user = user.trim();
        if user.is_empty() {
            continue;
        }
        manager
            .scheduler(user)
            .await
            .map_err(|e| miette::miette!("failed to register user: {}", e))?;
    }

    if config.autostart {
        manager.start_all().await;
    } else {
        info!("autostart disabled, start loops over HTTP");
    }

    // Handle shutdown signals
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let router = cadence_web::create_router(Arc::clone(&manager));
    let served = cadence_web::serve(addr, router, async move {
        let _ = shutdown_rx.wait_for(|stop| *stop).await;
    })
    .await;

    info!("stopping schedulers");
    manager.shutdown().await;

    served.map_err(|e| miette::miette!("web server failed: {}", e))?;
    info!("cadence daemon stopped");
    Ok(())
}
