use anyhow::Result;

use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

pub mod agent;
pub mod definition;
pub mod exit_codes;
pub mod local;
pub mod logging;
pub mod pipeline;
pub mod runner;

pub use agent::{Agent, AgentFactory, AgentOptions, PipelineHandle};
pub use runner::{Runner, RunnerState};

lazy_static::lazy_static! {
    pub static ref EVENTS_IN_TOTAL: IntCounter =
        register_int_counter!("sluice_events_in_total", "Events read from pipeline inputs").unwrap();

    pub static ref EVENTS_OUT_TOTAL: IntCounter =
        register_int_counter!("sluice_events_out_total", "Events written to pipeline outputs").unwrap();

    pub static ref BATCHES_FLUSHED_TOTAL: IntCounter =
        register_int_counter!("sluice_batches_flushed_total", "Batches flushed by workers").unwrap();

    pub static ref PIPELINE_RELOADS_TOTAL: IntCounter =
        register_int_counter!("sluice_pipeline_reloads_total", "Pipelines restarted after a definition change").unwrap();

    pub static ref PIPELINES_RUNNING: IntGauge =
        register_int_gauge!("sluice_pipelines_running", "Pipelines currently running").unwrap();
}

/// SIGINT/SIGTERM listener.
///
/// The handlers are registered by [`ShutdownSignal::install`], so a signal
/// that arrives before [`ShutdownSignal::recv`] is first awaited is kept.
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(windows)]
    ctrl_c: tokio::signal::windows::CtrlC,
}

impl ShutdownSignal {
    pub fn install() -> Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
            })
        }

        #[cfg(windows)]
        {
            Ok(Self {
                ctrl_c: tokio::signal::windows::ctrl_c()?,
            })
        }
    }

    pub async fn recv(&mut self) {
        #[cfg(unix)]
        tokio::select! {
            _ = self.interrupt.recv() => {},
            _ = self.terminate.recv() => {},
        }

        #[cfg(windows)]
        self.ctrl_c.recv().await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn signal_raised_before_recv_is_kept() {
        let mut signals = ShutdownSignal::install().unwrap();
        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .expect("SIGTERM delivered to the listener");
    }
}
