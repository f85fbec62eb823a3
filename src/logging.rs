//! Tracing setup: stdout plus one rolling file per day

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_BASENAME: &str = "camlapse.log";
const LOG_DIR_ENV: &str = "CAMLAPSE_LOG_PATH";
const LOG_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Install the global subscriber.
///
/// The returned guard must be held for the life of the process or buffered
/// file output is lost.
pub fn init_logging() -> Result<WorkerGuard> {
    let dir = log_dir()?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory: {:?}", dir))?;
    let pruned = prune_old_logs(&dir, LOG_RETENTION);

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, LOG_FILE_BASENAME));
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    info!("Logging to {:?} ({} expired log files removed)", dir, pruned);
    Ok(guard)
}

/// `CAMLAPSE_LOG_PATH` if set, else `logs/` under the XDG state dir
/// (falling back to the local data dir where there is none)
pub fn log_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(LOG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }

    let dirs = ProjectDirs::from("dev", "camlapse", "recorder")
        .context("Failed to determine project directories for log path")?;
    let base = dirs.state_dir().unwrap_or_else(|| dirs.data_local_dir());
    Ok(base.join("logs"))
}

/// Delete our own log files last modified more than `max_age` ago
fn prune_old_logs(dir: &Path, max_age: Duration) -> usize {
    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return 0;
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut pruned = 0;
    for entry in entries.flatten() {
        let ours = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(LOG_FILE_BASENAME));
        let expired = entry
            .metadata()
            .is_ok_and(|meta| meta.is_file() && meta.modified().is_ok_and(|at| at < cutoff));

        if ours && expired && std::fs::remove_file(entry.path()).is_ok() {
            pruned += 1;
        }
    }
    pruned
}
