use std::fs::OpenOptions;

use anyhow::{Context, Result};
use sluice_shared::LogSettings;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Initialize structured logging with tracing-subscriber.
///
/// `RUST_LOG` wins over the level chosen on the command line. Returns `None`
/// when a global subscriber is already installed. The guard must outlive the
/// run or buffered lines are lost.
pub fn init(settings: &LogSettings) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_filter()));

    let (nb, guard) = match &settings.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let installed = tracing_subscriber::fmt()
        .with_writer(nb)
        .with_env_filter(filter)
        .with_ansi(settings.file.is_none())
        .try_init()
        .is_ok();

    Ok(installed.then_some(guard))
}
