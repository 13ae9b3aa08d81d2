//! Logging setup.
//!
//! - Console and daily-rolling file output, both with local timestamps
//! - Filter from `RUST_LOG`, else the configured directive
//! - Background deletion of log files past the retention period

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDate};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::utils::fs;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "stream_dvr=info";

/// Prefix of the rolling log files; the appender adds `.YYYY-MM-DD`.
pub const LOG_FILE_PREFIX: &str = "stream-dvr.log";

const RETENTION_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

fn build_filter(directive: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive.unwrap_or(DEFAULT_LOG_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the lifetime of the program, dropping
/// it flushes and stops the file writer.
pub fn init_logging(log_dir: &Path, filter: Option<&str>) -> crate::Result<WorkerGuard> {
    fs::ensure_dir_all_sync("creating log directory", log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(build_filter(filter))
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    Ok(guard)
}

/// Delete old log files now and then once a day until cancelled.
///
/// A retention of 0 days disables the task.
pub fn start_retention_cleanup(log_dir: PathBuf, retention_days: u64, cancel_token: CancellationToken) {
    if retention_days == 0 {
        return;
    }

    tokio::spawn(async move {
        loop {
            if let Err(e) = cleanup_old_logs(&log_dir, retention_days, Local::now().date_naive()).await {
                warn!(error = %e, "Failed to clean up old logs");
            }

            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Log retention task shutting down");
                    break;
                }
                _ = tokio::time::sleep(RETENTION_CHECK_INTERVAL) => {}
            }
        }
    });
}

/// Remove `stream-dvr.log.YYYY-MM-DD` files dated more than
/// `retention_days` before `today`. Returns how many were deleted.
async fn cleanup_old_logs(log_dir: &Path, retention_days: u64, today: NaiveDate) -> std::io::Result<usize> {
    let Some(cutoff) = today.checked_sub_days(chrono::Days::new(retention_days)) else {
        return Ok(0);
    };

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(LOG_FILE_PREFIX))
            .and_then(|n| n.strip_prefix('.'))
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };

        if date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    if deleted > 0 {
        info!(count = deleted, "Cleaned up old log files");
    }
    Ok(deleted)
}
