//! Errors raised while turning the command line into a [`crate::RunConfiguration`].

use std::path::PathBuf;

use thiserror::Error;

/// Invalid, missing or contradictory command-line input.
///
/// Every variant ends up as the same exit path: the message, the short help,
/// exit status 1.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("no arguments given; supply a pipeline with -e or -f")]
    NoArguments,

    #[error("{0}")]
    Unrecognized(String),

    #[error("no pipeline configuration given; supply one with -e or -f")]
    MissingPipelineSource,

    #[error("'{}' is not an existing directory", .0.display())]
    InvalidPath(PathBuf),

    #[error("invalid value for {flag}: {reason}")]
    InvalidArgument { flag: &'static str, reason: String },

    #[error("{0}")]
    IncompatibleOptions(String),
}

pub type Result<T> = std::result::Result<T, UsageError>;
