//! Single-value checks used by [`crate::ConfigResolver`].
//!
//! Nothing here touches global state; the directory check goes through a
//! [`DirectoryProbe`] so callers decide what "exists" means.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, UsageError};
use crate::fs::DirectoryProbe;

pub const MAX_PIPELINE_WORKERS: usize = 4096;
pub const MAX_BATCH_SIZE: usize = 1_000_000;
/// One day.
pub const MAX_BATCH_DELAY_MS: u64 = 86_400_000;
/// One day.
pub const MAX_RELOAD_INTERVAL_SECS: u64 = 86_400;

/// A directory that was confirmed to exist when it was validated.
///
/// Only [`validate_directory`] builds one, which keeps unchecked paths out of
/// [`crate::PluginPathRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginDir(PathBuf);

impl PluginDir {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

pub fn validate_directory<P>(probe: &P, path: &Path) -> Result<PluginDir>
where
    P: DirectoryProbe + ?Sized,
{
    if !probe.is_dir(path) {
        return Err(UsageError::InvalidPath(path.to_path_buf()));
    }
    let absolute =
        std::path::absolute(path).map_err(|_| UsageError::InvalidPath(path.to_path_buf()))?;
    Ok(PluginDir(absolute))
}

/// Parses an integer that must be at least 1.
pub fn validate_positive(flag: &'static str, raw: &str) -> Result<u64> {
    let value: u64 = raw.parse().map_err(|_| UsageError::InvalidArgument {
        flag,
        reason: format!("'{raw}' is not a positive integer"),
    })?;
    if value == 0 {
        return Err(UsageError::InvalidArgument {
            flag,
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(value)
}

pub fn validate_worker_count(raw: &str) -> Result<usize> {
    validate_count("--pipeline-workers", raw, MAX_PIPELINE_WORKERS)
}

pub fn validate_batch_size(raw: &str) -> Result<usize> {
    validate_count("--pipeline-batch-size", raw, MAX_BATCH_SIZE)
}

pub fn validate_batch_delay(raw: &str) -> Result<Duration> {
    validate_bounded("--pipeline-batch-delay", raw, MAX_BATCH_DELAY_MS).map(Duration::from_millis)
}

pub fn validate_reload_interval(raw: &str) -> Result<Duration> {
    validate_bounded("--reload-interval", raw, MAX_RELOAD_INTERVAL_SECS).map(Duration::from_secs)
}

fn validate_count(flag: &'static str, raw: &str, max: usize) -> Result<usize> {
    let value = validate_bounded(flag, raw, u64::try_from(max).unwrap_or(u64::MAX))?;
    usize::try_from(value).map_err(|_| too_large(flag, max))
}

/// Like [`validate_positive`], with an inclusive upper bound.
fn validate_bounded(flag: &'static str, raw: &str, max: u64) -> Result<u64> {
    let value = match validate_positive(flag, raw) {
        Err(UsageError::InvalidArgument { .. }) if is_oversized(raw) => {
            return Err(too_large(flag, max))
        }
        other => other?,
    };
    if value > max {
        return Err(too_large(flag, max));
    }
    Ok(value)
}

// Digits only, but beyond u64.
fn is_oversized(raw: &str) -> bool {
    !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) && raw.parse::<u64>().is_err()
}

fn too_large(flag: &'static str, max: impl std::fmt::Display) -> UsageError {
    UsageError::InvalidArgument {
        flag,
        reason: format!("too large; the limit is {max}"),
    }
}

/// Auto-reload watches a file, so an inline definition cannot be reloaded.
pub fn validate_auto_reload(requested: bool, file_backed: bool) -> Result<()> {
    if requested && !file_backed {
        return Err(UsageError::IncompatibleOptions(
            "--auto-reload requires a pipeline file given with -f".to_owned(),
        ));
    }
    Ok(())
}
