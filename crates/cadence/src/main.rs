//! Cadence: daily check-in companion
//!
//! Main binary with subcommands:
//! - `daemon`: Per-user scheduler loops plus the HTTP surface
//! - `status`: Print one user's schedule status
//! - `set-schedule`: Override the time of one phase for a user

use std::path::PathBuf;

use cadence_scheduler::{Phase, parse_time_of_day};
use chrono::NaiveTime;
use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod daemon;

/// Parse an `HH:MM` time of day.
fn parse_time(s: &str) -> Result<NaiveTime, String> {
    parse_time_of_day(s).map_err(|e| e.to_string())
}

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Daily check-in companion", long_about = None)]
struct Cli {
    /// Directory holding per-user state (defaults to the platform data dir)
    #[arg(long, env = "CADENCE_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler loops and the HTTP server
    Daemon {
        /// Users to schedule (comma-separated)
        #[arg(long, env = "CADENCE_USERS", value_delimiter = ',', default_value = "default")]
        users: Vec<String>,

        /// HTTP server port
        #[arg(long, env = "CADENCE_PORT", default_value = "8080")]
        port: u16,

        /// Chat-completions API key
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        openai_api_key: String,

        /// Chat-completions API root
        #[arg(long, env = "OPENAI_BASE_URL")]
        openai_base_url: Option<String>,

        /// Model name
        #[arg(long, env = "CADENCE_MODEL", default_value = cadence_agent::DEFAULT_MODEL)]
        model: String,

        /// How the assistant addresses the user
        #[arg(long, env = "CADENCE_USER_NAME", default_value = "friend")]
        user_name: String,

        /// Telegram bot token; messages are only logged when unset
        #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
        telegram_bot_token: Option<String>,

        /// Telegram chat to deliver to
        #[arg(long, env = "TELEGRAM_CHAT_ID")]
        telegram_chat_id: Option<String>,

        /// Seconds between scheduler passes
        #[arg(long, default_value = "300")]
        poll_interval: u64,

        /// Seconds to wait after a failed pass
        #[arg(long, default_value = "60")]
        error_retry_interval: u64,

        /// Register users without starting their loops
        #[arg(long)]
        no_autostart: bool,
    },

    /// Print a user's schedule status
    Status {
        /// User id
        #[arg(long, default_value = "default")]
        user: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Override the time of one phase for a user
    SetSchedule {
        /// User id
        #[arg(long, default_value = "default")]
        user: String,

        /// Phase name, e.g. `midday_checkin`
        #[arg(long)]
        phase: Phase,

        /// Time of day as HH:MM
        #[arg(long, value_parser = parse_time)]
        time: NaiveTime,
    },
}

/// Resolve the data directory, falling back to `<platform data dir>/cadence`.
fn data_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cadence")
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "cadence=info,cadence_scheduler=info,cadence_agent=info,cadence_web=info"
                    .to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let data_dir = data_dir(cli.data_dir);

    match cli.command {
        Commands::Daemon {
            users,
            port,
            openai_api_key,
            openai_base_url,
            model,
            user_name,
            telegram_bot_token,
            telegram_chat_id,
            poll_interval,
            error_retry_interval,
            no_autostart,
        } => {
            daemon::run(daemon::DaemonConfig {
                data_dir,
                users,
                port,
                openai_api_key,
                openai_base_url,
                model,
                user_name,
                telegram_bot_token,
                telegram_chat_id,
                poll_interval,
                error_retry_interval,
                autostart: !no_autostart,
            })
            .await
        }

        Commands::Status { user, json } => commands::status(&data_dir, &user, json).await,

        Commands::SetSchedule { user, phase, time } => {
            commands::set_schedule(&data_dir, &user, phase, time).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_defaults() {
        let cli = Cli::try_parse_from(["cadence", "daemon", "--openai-api-key", "sk-test"]).unwrap();
        match cli.command {
            Commands::Daemon {
                users,
                port,
                model,
                poll_interval,
                error_retry_interval,
                no_autostart,
                ..
            } => {
                assert_eq!(users, vec!["default".to_string()]);
                assert_eq!(port, 8080);
                assert_eq!(model, "gpt-4o-mini");
                assert_eq!(poll_interval, 300);
                assert_eq!(error_retry_interval, 60);
                assert!(!no_autostart);
            }
            _ => panic!("expected daemon"),
        }
    }

    #[test]
    fn test_users_are_comma_separated() {
        let cli = Cli::try_parse_from([
            "cadence",
            "daemon",
            "--openai-api-key",
            "sk-test",
            "--users",
            "alex,sam",
        ])
        .unwrap();
        match cli.command {
            Commands::Daemon { users, .. } => assert_eq!(users, vec!["alex", "sam"]),
            _ => panic!("expected daemon"),
        }
    }

    #[test]
    fn test_set_schedule_parses_phase_and_time() {
        let cli = Cli::try_parse_from([
            "cadence",
            "set-schedule",
            "--user",
            "alex",
            "--phase",
            "evening_checkin",
            "--time",
            "19:30",
        ])
        .unwrap();
        match cli.command {
            Commands::SetSchedule { user, phase, time } => {
                assert_eq!(user, "alex");
                assert_eq!(phase, Phase::EveningCheckin);
                assert_eq!(time, NaiveTime::from_hms_opt(19, 30, 0).unwrap());
            }
            _ => panic!("expected set-schedule"),
        }
    }

    #[test]
    fn test_set_schedule_rejects_bad_input() {
        assert!(
            Cli::try_parse_from([
                "cadence",
                "set-schedule",
                "--phase",
                "brunch",
                "--time",
                "11:00"
            ])
            .is_err()
        );
        assert!(
            Cli::try_parse_from([
                "cadence",
                "set-schedule",
                "--phase",
                "midday_checkin",
                "--time",
                "noon"
            ])
            .is_err()
        );
    }

    #[test]
    fn test_data_dir_prefers_explicit() {
        assert_eq!(
            data_dir(Some(PathBuf::from("/tmp/cadence"))),
            PathBuf::from("/tmp/cadence")
        );
        assert!(data_dir(None).ends_with("cadence"));
    }
}
