use std::ffi::OsString;
use std::future::Future;
use std::io::Write;

use anyhow::{Context, Result};
use sluice_shared::args::short_help;
use sluice_shared::{ConfigResolver, Invocation, PluginPathRegistry, RunConfiguration, UsageError};
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::agent::{AgentFactory, AgentOptions};
use crate::definition::PipelineDefinition;
use crate::{exit_codes, logging, ShutdownSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Init,
    Resolving,
    UsageErrorExit,
    /// `--help` or `--version` was printed.
    HelpExit,
    ConfigTest,
    Executing,
    NormalExit,
    FailureExit,
}

/// Drives one invocation: resolve the command line, run the pipeline through
/// an agent, and map the outcome to an exit code.
pub struct Runner<F> {
    factory: F,
    resolver: ConfigResolver,
    registry: PluginPathRegistry,
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
    states: Vec<RunnerState>,
    // Held so buffered log lines are flushed when the runner is dropped.
    #[allow(dead_code)]
    log_guard: Option<WorkerGuard>,
}

impl<F: AgentFactory> Runner<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            resolver: ConfigResolver::new(),
            registry: PluginPathRegistry::new(),
            stdout: Box::new(std::io::stdout()),
            stderr: Box::new(std::io::stderr()),
            states: vec![RunnerState::Init],
            log_guard: None,
        }
    }

    pub fn with_output(
        mut self,
        stdout: impl Write + Send + 'static,
        stderr: impl Write + Send + 'static,
    ) -> Self {
        self.stdout = Box::new(stdout);
        self.stderr = Box::new(stderr);
        self
    }

    pub fn state(&self) -> RunnerState {
        self.states.last().copied().unwrap_or(RunnerState::Init)
    }

    /// Every state entered so far, in order.
    pub fn states(&self) -> &[RunnerState] {
        &self.states
    }

    pub fn plugin_paths(&self) -> &PluginPathRegistry {
        &self.registry
    }

    /// Runs until the pipeline completes or SIGINT/SIGTERM arrives.
    ///
    /// The signal handlers are installed up front, so a signal received while
    /// the agent is still starting leads to a graceful shutdown.
    pub async fn run<I, T>(&mut self, args: I) -> i32
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let mut signals = match ShutdownSignal::install() {
            Ok(signals) => Some(signals),
            Err(err) => {
                warn!(error = %err, "cannot listen for shutdown signals");
                None
            }
        };
        let shutdown = async move {
            match signals.as_mut() {
                Some(signals) => signals.recv().await,
                None => std::future::pending().await,
            }
        };
        self.run_until(args, shutdown).await
    }

    /// Like [`Self::run`], with `shutdown` standing in for the operator signal.
    pub async fn run_until<I, T, S>(&mut self, args: I, shutdown: S) -> i32
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
        S: Future<Output = ()>,
    {
        self.enter(RunnerState::Resolving);
        let invocation = match self.resolver.resolve(args, &mut self.registry) {
            Ok(invocation) => invocation,
            Err(err) => return self.signal_usage_error(&err),
        };

        let config = match invocation {
            Invocation::Help(text) | Invocation::Version(text) => {
                self.enter(RunnerState::HelpExit);
                let _ = write!(self.stdout, "{text}");
                let _ = self.stdout.flush();
                return exit_codes::OK;
            }
            Invocation::Run(config) => config,
        };

        match logging::init(&config.log) {
            Ok(guard) => self.log_guard = guard,
            Err(err) => return self.fail(err),
        }
        debug!(
            config = %serde_json::to_string(&config).unwrap_or_default(),
            "resolved configuration"
        );

        if config.config_test {
            return self.config_test(&config).await;
        }

        match self.execute(&config, shutdown).await {
            Ok(()) => {
                self.enter(RunnerState::NormalExit);
                exit_codes::OK
            }
            Err(err) => self.fail(err),
        }
    }

    async fn execute<S>(&mut self, config: &RunConfiguration, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        self.enter(RunnerState::Executing);

        let _exporter = config
            .metrics_bind
            .map(prometheus_exporter::start)
            .transpose()
            .context("starting metrics exporter")?;

        let options = AgentOptions {
            plugin_paths: self.registry.paths().to_vec(),
            auto_reload: config.auto_reload,
            reload_interval: config.reload_interval,
        };
        let mut agent = self
            .factory
            .create_agent(options)
            .context("creating agent")?;

        agent.register_pipeline(
            &config.pipeline_id,
            config.pipeline_source.clone(),
            config.pipeline_settings(),
        )?;

        let mut handle = match agent.execute().await {
            Ok(handle) => handle,
            Err(err) => {
                let _ = agent.shutdown().await;
                return Err(err);
            }
        };
        info!(
            pipeline_id = %config.pipeline_id,
            source = %config.pipeline_source.describe(),
            "pipeline running"
        );

        tokio::pin!(shutdown);
        let finished = tokio::select! {
            res = handle.wait() => Some(res),
            () = &mut shutdown => None,
        };

        let res = match finished {
            Some(res) => res,
            None => {
                info!("received shutdown signal...");
                let stopped = agent.shutdown().await;
                handle.wait().await.and(stopped)
            }
        };
        // A pipeline error takes precedence over a failed stop.
        let stopped = agent.shutdown().await;
        res.and(stopped)
    }

    async fn config_test(&mut self, config: &RunConfiguration) -> i32 {
        self.enter(RunnerState::ConfigTest);
        match PipelineDefinition::load(&config.pipeline_source).await {
            Ok(definition) => {
                info!(origin = definition.origin(), "configuration check passed");
                let _ = writeln!(self.stdout, "Configuration OK");
                let _ = self.stdout.flush();
                self.enter(RunnerState::NormalExit);
                exit_codes::OK
            }
            Err(err) => self.fail(err),
        }
    }

    fn signal_usage_error(&mut self, err: &UsageError) -> i32 {
        self.enter(RunnerState::UsageErrorExit);
        let _ = writeln!(self.stderr, "ERROR: {err}");
        self.show_short_help();
        exit_codes::USAGE
    }

    fn show_short_help(&mut self) {
        let _ = writeln!(self.stderr, "{}", short_help());
        let _ = self.stderr.flush();
    }

    fn fail(&mut self, err: anyhow::Error) -> i32 {
        self.enter(RunnerState::FailureExit);
        error!(error = %format!("{err:#}"), "pipeline failed");
        let _ = writeln!(self.stderr, "ERROR: {err:#}");
        let _ = self.stderr.flush();
        exit_codes::FAILURE
    }

    fn enter(&mut self, state: RunnerState) {
        debug!(from = ?self.state(), to = ?state, "runner state");
        self.states.push(state);
    }
}
