use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings a pipeline is constructed with.
///
/// The optional fields are only present when the user asked for a value; the
/// executor fills in its own defaults through the accessors below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub pipeline_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_workers: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_batch_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_batch_delay_ms: Option<u64>,
}

impl PipelineSettings {
    pub fn new(pipeline_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            pipeline_workers: None,
            pipeline_batch_size: None,
            pipeline_batch_delay_ms: None,
        }
    }

    pub fn workers(&self) -> usize {
        self.pipeline_workers.unwrap_or_else(default_workers)
    }

    pub fn batch_size(&self) -> usize {
        self.pipeline_batch_size.unwrap_or(default_batch_size())
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(
            self.pipeline_batch_delay_ms
                .unwrap_or(default_batch_delay_ms()),
        )
    }
}

fn default_workers() -> usize {
    num_cpus::get()
}

#[must_use]
const fn default_batch_size() -> usize {
    125
}

#[must_use]
const fn default_batch_delay_ms() -> u64 {
    5
}
