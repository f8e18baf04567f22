use camino::Utf8Path;
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "dscs-mod";
const LOG_RETENTION_DAYS: u64 = 7;

/// Sets up stderr logging and, when `log_dir` is given, a daily rolling log file.
///
/// The returned guard must be kept alive until exit so buffered lines are flushed.
pub fn init_logging(log_dir: Option<&Utf8Path>, verbose: bool) -> Option<WorkerGuard> {
    let default_level = if verbose {
        "dscs_mod=debug,dscs_overlay=debug"
    } else {
        "warn"
    };
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter);

    let (guard, file_layer) = match log_dir.map(|dir| (dir, open_appender(dir))) {
        Some((_, Ok(appender))) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(EnvFilter::new("dscs_mod=info,dscs_overlay=info"));
            (Some(guard), Some(layer))
        }
        Some((dir, Err(e))) => {
            eprintln!("Failed to set up log file in {}: {}", dir, e);
            (None, None)
        }
        None => (None, None),
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Some(dir) = log_dir {
        cleanup_old_logs(dir, LOG_RETENTION_DAYS);
    }

    guard
}

fn open_appender(dir: &Utf8Path) -> Result<rolling::RollingFileAppender, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(dir.as_std_path())?;
    Ok(rolling::RollingFileAppender::builder()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(dir.as_std_path())?)
}

/// Delete dated log files older than `max_age_days` from the log directory.
pub fn cleanup_old_logs(log_dir: &Utf8Path, max_age_days: u64) -> usize {
    let max_age = Duration::from_secs(max_age_days * 24 * 60 * 60);

    let entries = match std::fs::read_dir(log_dir.as_std_path()) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("Failed to read log directory for cleanup: {}", e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        // e.g. "dscs-mod.2026-02-17.log"
        if !file_name.starts_with(&format!("{LOG_FILE_PREFIX}.")) || !file_name.ends_with(".log") {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        let Ok(age) = SystemTime::now().duration_since(modified) else {
            continue;
        };

        if age > max_age {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!("Removed old log file: {}", path.display());
                    removed += 1;
                }
                Err(e) => tracing::warn!("Failed to remove old log file {}: {}", path.display(), e),
            }
        }
    }
    removed
}
