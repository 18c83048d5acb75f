use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

pub mod args;
pub mod error;
pub mod fs;
pub mod plugins;
pub mod runtime;
pub mod validate;

pub use args::{ConfigResolver, Invocation};
pub use error::UsageError;
pub use plugins::PluginPathRegistry;
pub use runtime::PipelineSettings;

/// Identifier used when the caller does not name the pipeline.
pub const DEFAULT_PIPELINE_ID: &str = "main";

/// Where the pipeline definition comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum PipelineSource {
    Inline(String),
    File(PathBuf),
}

impl PipelineSource {
    pub const fn is_file_backed(&self) -> bool {
        matches!(self, Self::File(_))
    }

    /// Short human form for logs: the file path, or `inline`.
    pub fn describe(&self) -> String {
        match self {
            Self::Inline(_) => "inline".to_owned(),
            Self::File(path) => path.display().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    pub level: LogLevel,
}

/// Fully validated invocation.
///
/// Produced once by [`ConfigResolver`]. Every optional knob stays `None` when
/// the user did not supply it, so the executor can apply its own default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfiguration {
    pub pipeline_source: PipelineSource,
    pub pipeline_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_delay: Option<Duration>,

    pub auto_reload: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reload_interval: Option<Duration>,

    pub plugin_paths: Vec<PathBuf>,
    pub config_test: bool,
    pub log: LogSettings,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_bind: Option<SocketAddr>,
}

impl RunConfiguration {
    pub fn new(pipeline_source: PipelineSource) -> Self {
        Self {
            pipeline_source,
            pipeline_id: DEFAULT_PIPELINE_ID.to_owned(),
            workers: None,
            batch_size: None,
            batch_delay: None,
            auto_reload: false,
            reload_interval: None,
            plugin_paths: Vec::new(),
            config_test: false,
            log: LogSettings::default(),
            metrics_bind: None,
        }
    }

    /// Settings handed to the pipeline executor. Unset knobs are not forwarded.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            pipeline_id: self.pipeline_id.clone(),
            pipeline_workers: self.workers,
            pipeline_batch_size: self.batch_size,
            pipeline_batch_delay_ms: self
                .batch_delay
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}
