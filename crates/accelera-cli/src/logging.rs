use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc, FormatTime};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Timestamp format: 2026-02-14 19:44:09.123 -08:00
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f %:z";

const LOG_FILE_PREFIX: &str = "accelera.log";

/// Install the global subscriber: console always, plus a daily-rolling file
/// under `log_dir` when given. Keep the returned guard alive until exit so
/// buffered file lines are flushed.
pub fn init(filter: &str, utc: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let (file_writer, guard) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    if utc {
        install(env_filter, ChronoUtc::new(TIME_FORMAT.to_string()), file_writer)?;
    } else {
        install(env_filter, ChronoLocal::new(TIME_FORMAT.to_string()), file_writer)?;
    }
    Ok(guard)
}

fn install<T>(filter: EnvFilter, timer: T, file: Option<NonBlocking>) -> Result<()>
where
    T: FormatTime + Clone + Send + Sync + 'static,
{
    let console = fmt::layer().with_timer(timer.clone());
    let file = file.map(|writer| fmt::layer().with_ansi(false).with_timer(timer).with_writer(writer));

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to install the log subscriber")
}
