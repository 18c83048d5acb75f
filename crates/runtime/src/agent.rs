use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sluice_shared::validate::MAX_RELOAD_INTERVAL_SECS;
use sluice_shared::{PipelineSettings, PipelineSource};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(3);

/// Process-level options an agent is built with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOptions {
    /// Plugin search directories, highest precedence first.
    pub plugin_paths: Vec<PathBuf>,
    pub auto_reload: bool,
    pub reload_interval: Option<Duration>,
}

impl AgentOptions {
    pub fn reload_interval(&self) -> Duration {
        self.reload_interval
            .unwrap_or(DEFAULT_RELOAD_INTERVAL)
            .min(Duration::from_secs(MAX_RELOAD_INTERVAL_SECS))
    }
}

/// Owns pipelines keyed by id and runs them.
#[async_trait]
pub trait Agent: Send {
    /// Fails when `id` is already registered.
    fn register_pipeline(
        &mut self,
        id: &str,
        source: PipelineSource,
        settings: PipelineSettings,
    ) -> Result<()>;

    /// Constructs and starts every registered pipeline.
    async fn execute(&mut self) -> Result<PipelineHandle>;

    /// Requests a graceful stop. Safe to call more than once, or after the
    /// pipelines have completed.
    async fn shutdown(&mut self) -> Result<()>;
}

pub trait AgentFactory {
    fn create_agent(&self, options: AgentOptions) -> Result<Box<dyn Agent>>;
}

impl<F> AgentFactory for F
where
    F: Fn(AgentOptions) -> Result<Box<dyn Agent>>,
{
    fn create_agent(&self, options: AgentOptions) -> Result<Box<dyn Agent>> {
        self(options)
    }
}

/// Running (or finished) pipelines started by [`Agent::execute`].
pub struct PipelineHandle {
    task: Option<JoinHandle<Result<()>>>,
    cancel: CancellationToken,
}

impl PipelineHandle {
    pub fn new(task: JoinHandle<Result<()>>, cancel: CancellationToken) -> Self {
        Self {
            task: Some(task),
            cancel,
        }
    }

    pub fn spawn<F>(cancel: CancellationToken, fut: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self::new(tokio::spawn(fut), cancel)
    }

    /// Asks the pipelines to stop; completion is observed through [`Self::wait`].
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for completion. Cancel safe; once the result has been returned,
    /// further calls return `Ok(())` immediately.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let res = task.await;
        self.task = None;
        flatten(res)
    }
}

pub(crate) fn flatten(res: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match res {
        Ok(inner) => inner,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(anyhow!("pipeline task panicked: {e}")),
    }
}
