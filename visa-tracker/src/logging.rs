use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tokio::task;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

const LOG_PREFIX: &str = "visa-tracker";
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[allow(dead_code)]
pub struct LoggerGuard(WorkerGuard);

fn sanitize_level(level: &str) -> &str {
    match level {
        "trace" | "debug" | "info" | "warn" | "error" => level,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to 'info'", level);
            "info"
        }
    }
}

/// Install stdout + daily-rolling file layers and start the old-log sweeper.
///
/// Must be called from within a tokio runtime.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggerGuard> {
    let level = sanitize_level(&config.level);
    let rust_log = std::env::var("RUST_LOG").unwrap_or_default();

    let builder = EnvFilter::builder().with_default_directive(level.parse()?);
    let console_filter = builder.clone().parse_lossy(&rust_log);
    let file_filter = builder.parse_lossy(&rust_log);

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .build(&config.log_dir)?;
    let (non_blocking, guard) = NonBlocking::new(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(file_filter);
    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_filter(console_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()?;

    let max_age = Duration::from_secs(60 * 60 * 24 * config.retention_days.max(1));
    start_log_cleanup_task(config.log_dir.clone(), max_age);

    Ok(LoggerGuard(guard))
}

fn start_log_cleanup_task(log_dir: PathBuf, max_age: Duration) {
    task::spawn(async move {
        loop {
            if let Err(e) = cleanup_old_logs(&log_dir, LOG_PREFIX, max_age) {
                tracing::warn!("Failed to delete old log file: {}", e);
            }
            tokio::time::sleep(CLEANUP_INTERVAL).await;
        }
    });
}

/// Delete `<prefix>*.log` files older than `max_age`. Returns how many went.
fn cleanup_old_logs(log_dir: &Path, prefix: &str, max_age: Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut deleted = 0;

    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !(file_name.starts_with(prefix) && file_name.ends_with(".log")) {
            continue;
        }
        let modified = fs::metadata(&path)?.modified()?;
        if now.duration_since(modified).unwrap_or_default() > max_age {
            fs::remove_file(&path)?;
            tracing::info!("Old log file deleted: {}", file_name);
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_level() {
        assert_eq!(sanitize_level("debug"), "debug");
        assert_eq!(sanitize_level("loud"), "info");
    }

    #[test]
    fn test_cleanup_only_touches_own_logs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("visa-tracker.2025-08-14.log"), "x").unwrap();
        fs::write(dir.path().join("other.log"), "x").unwrap();

        // nothing is older than an hour
        let deleted = cleanup_old_logs(dir.path(), LOG_PREFIX, Duration::from_secs(3600)).unwrap();
        assert_eq!(deleted, 0);

        // everything is older than zero
        std::thread::sleep(Duration::from_millis(20));
        let deleted = cleanup_old_logs(dir.path(), LOG_PREFIX, Duration::ZERO).unwrap();
        assert_eq!(deleted, 1);
        assert!(dir.path().join("other.log").exists());
    }
}
