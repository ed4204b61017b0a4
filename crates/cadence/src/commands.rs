//! One-shot commands that work directly on a user's files.

use std::path::Path;

use cadence_scheduler::{Clock, LoopState, Phase, SystemClock, UserSession, validate_user_id};
use chrono::NaiveTime;
use miette::{IntoDiagnostic, Result};
use tracing::info;

/// Open `user_id`'s session under `data_dir`.
async fn open(data_dir: &Path, user_id: &str) -> Result<UserSession> {
    validate_user_id(user_id).map_err(|e| miette::miette!("{}", e))?;
    Ok(UserSession::open(data_dir, user_id).await)
}

/// Print a user's schedule status.
///
/// This reads the files on disk, so the loop state is always reported as
/// stopped; ask the daemon's HTTP surface for live state.
pub async fn status(data_dir: &Path, user_id: &str, json: bool) -> Result<()> {
    let session = open(data_dir, user_id).await?;
    let status = session.status(SystemClock.now());

    if json {
        let out = serde_json::to_string_pretty(&status).into_diagnostic()?;
        println!("{out}");
    } else {
        print!("{}", status.render(LoopState::Stopped));
    }
    Ok(())
}

/// Persist a schedule override for one phase.
pub async fn set_schedule(
    data_dir: &Path,
    user_id: &str,
    phase: Phase,
    time: NaiveTime,
) -> Result<()> {
    let mut session = open(data_dir, user_id).await?;
    session
        .update_schedule(phase, time)
        .await
        .map_err(|e| miette::miette!("failed to update schedule: {}", e))?;
    info!(user_id, %phase, "schedule override saved");
    println!("{} is now scheduled at {}", phase.label(), time.format("%H:%M"));
    Ok(())
}
