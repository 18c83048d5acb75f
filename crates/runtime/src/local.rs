use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use sluice_shared::{PipelineSettings, PipelineSource};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{flatten, Agent, AgentOptions, PipelineHandle};
use crate::definition::PipelineDefinition;
use crate::pipeline::{EventIo, LinePipeline, StdIo};
use crate::{PIPELINES_RUNNING, PIPELINE_RELOADS_TOTAL};

/// Builds the agent the `sluice` binary runs with.
pub fn local_agent(options: AgentOptions) -> Result<Box<dyn Agent>> {
    Ok(Box::new(LocalAgent::new(options, Arc::new(StdIo))))
}

#[derive(Debug, Clone)]
struct Registration {
    source: PipelineSource,
    settings: PipelineSettings,
}

/// In-process agent running every pipeline as a [`LinePipeline`].
pub struct LocalAgent {
    options: AgentOptions,
    io: Arc<dyn EventIo>,
    pipelines: BTreeMap<String, Registration>,
    cancel: CancellationToken,
    started: bool,
}

impl LocalAgent {
    pub fn new(options: AgentOptions, io: Arc<dyn EventIo>) -> Self {
        if !options.plugin_paths.is_empty() {
            info!(paths = ?options.plugin_paths, "plugin search path");
        }
        Self {
            options,
            io,
            pipelines: BTreeMap::new(),
            cancel: CancellationToken::new(),
            started: false,
        }
    }

    pub fn plugin_paths(&self) -> &[std::path::PathBuf] {
        &self.options.plugin_paths
    }

    pub fn pipeline_ids(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }
}

#[async_trait]
impl Agent for LocalAgent {
    fn register_pipeline(
        &mut self,
        id: &str,
        source: PipelineSource,
        settings: PipelineSettings,
    ) -> Result<()> {
        if self.started {
            bail!("cannot register pipeline '{id}' after the agent started");
        }
        if self.pipelines.contains_key(id) {
            bail!("pipeline '{id}' is already registered");
        }
        self.pipelines
            .insert(id.to_owned(), Registration { source, settings });
        Ok(())
    }

    async fn execute(&mut self) -> Result<PipelineHandle> {
        if self.started {
            bail!("agent is already executing");
        }
        if self.pipelines.is_empty() {
            bail!("no pipelines registered");
        }

        // Load every definition before anything is spawned.
        let mut loaded = Vec::with_capacity(self.pipelines.len());
        for (id, reg) in &self.pipelines {
            let definition = PipelineDefinition::load(&reg.source)
                .await
                .with_context(|| format!("constructing pipeline '{id}'"))?;
            loaded.push((id.clone(), reg.clone(), definition));
        }
        self.started = true;

        let reload = self
            .options
            .auto_reload
            .then(|| self.options.reload_interval());

        let mut running = FuturesUnordered::new();
        for (id, reg, definition) in loaded {
            let supervisor = Supervisor {
                id,
                source: reg.source,
                settings: reg.settings,
                io: Arc::clone(&self.io),
                reload,
                cancel: self.cancel.clone(),
            };
            running.push(tokio::spawn(supervisor.run(definition)));
        }

        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            while let Some(res) = running.next().await {
                if let Err(err) = flatten(res) {
                    cancel.cancel();
                    while running.next().await.is_some() {}
                    return Err(err);
                }
            }
            Ok(())
        });

        Ok(PipelineHandle::new(task, self.cancel.clone()))
    }

    async fn shutdown(&mut self) -> Result<()> {
        if !self.cancel.is_cancelled() {
            info!("stopping pipelines...");
            self.cancel.cancel();
        }
        Ok(())
    }
}

/// Runs one pipeline, restarting it when auto-reload sees a new definition.
struct Supervisor {
    id: String,
    source: PipelineSource,
    settings: PipelineSettings,
    io: Arc<dyn EventIo>,
    reload: Option<Duration>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(self, mut definition: PipelineDefinition) -> Result<()> {
        loop {
            let run_cancel = self.cancel.child_token();
            let (reader, writer) = self.io.open(&self.id);
            let pipeline = LinePipeline::new(definition.clone(), &self.settings);
            let mut task = tokio::spawn(pipeline.run(reader, writer, run_cancel.clone()));
            PIPELINES_RUNNING.inc();

            let Some(interval) = self.reload else {
                let res = flatten(task.await);
                PIPELINES_RUNNING.dec();
                return res.with_context(|| format!("pipeline '{}'", self.id));
            };

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            let next = loop {
                tokio::select! {
                    res = &mut task => {
                        PIPELINES_RUNNING.dec();
                        return flatten(res).with_context(|| format!("pipeline '{}'", self.id));
                    }
                    _ = ticker.tick() => {
                        match PipelineDefinition::load(&self.source).await {
                            Ok(fresh) if fresh != definition => break fresh,
                            Ok(_) => {}
                            Err(err) => warn!(
                                pipeline_id = %self.id,
                                error = %format!("{err:#}"),
                                "new pipeline definition rejected; keeping the running one"
                            ),
                        }
                    }
                }
            };

            info!(pipeline_id = %self.id, "pipeline definition changed, reloading");
            run_cancel.cancel();
            let res = flatten(task.await);
            PIPELINES_RUNNING.dec();
            res.with_context(|| format!("pipeline '{}'", self.id))?;

            if self.cancel.is_cancelled() {
                return Ok(());
            }
            PIPELINE_RELOADS_TOTAL.inc();
            definition = next;
        }
    }
}
