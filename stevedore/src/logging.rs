//! Tracing setup for the binary.

use std::path::Path;
use stevedore_shared::{StevedoreError, StevedoreResult};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "stevedore.log";

/// Install the global subscriber: `RUST_LOG` filter (default `info`), ANSI
/// output on stderr and, with `log_dir`, a daily-rolling file.
///
/// Keep the returned guard alive for the whole process or buffered file
/// output is lost.
pub fn init_logging(log_dir: Option<&Path>) -> StevedoreResult<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false);

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                StevedoreError::Config(format!("cannot create log directory {}: {}", dir.display(), e))
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .try_init()
        .map_err(|e| StevedoreError::Internal(format!("logging already initialised: {}", e)))?;

    Ok(guard)
}
