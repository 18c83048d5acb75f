use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures::StreamExt;
use sluice_shared::validate::{MAX_BATCH_DELAY_MS, MAX_BATCH_SIZE, MAX_PIPELINE_WORKERS};
use sluice_shared::PipelineSettings;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::codec::{Decoder, FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::flatten;
use crate::definition::PipelineDefinition;
use crate::{BATCHES_FLUSHED_TOTAL, EVENTS_IN_TOTAL, EVENTS_OUT_TOTAL};

// Upper bound on up-front allocation per batch buffer and channel.
const PREALLOC_LIMIT: usize = 1024;

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens the event input and output for a pipeline (re)start.
pub trait EventIo: Send + Sync {
    fn open(&self, pipeline_id: &str) -> (BoxReader, BoxWriter);
}

/// Newline-delimited events on stdin, written back to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdIo;

impl EventIo for StdIo {
    fn open(&self, _pipeline_id: &str) -> (BoxReader, BoxWriter) {
        (Box::new(tokio::io::stdin()), Box::new(tokio::io::stdout()))
    }
}

/// Line-oriented pipeline: one reader fans events out round-robin to the
/// workers, each worker batches by size and age, one writer drains batches.
pub struct LinePipeline {
    id: Arc<str>,
    definition: PipelineDefinition,
    workers: usize,
    batch_size: usize,
    batch_delay: Duration,
}

impl LinePipeline {
    pub fn new(definition: PipelineDefinition, settings: &PipelineSettings) -> Self {
        Self {
            id: Arc::from(settings.pipeline_id.as_str()),
            definition,
            workers: settings.workers().clamp(1, MAX_PIPELINE_WORKERS),
            batch_size: settings.batch_size().clamp(1, MAX_BATCH_SIZE),
            batch_delay: settings
                .batch_delay()
                .min(Duration::from_millis(MAX_BATCH_DELAY_MS)),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs until the input ends or `cancel` fires, then drains every
    /// buffered event to the writer before returning.
    pub async fn run<R, W>(self, reader: R, writer: W, cancel: CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!(
            pipeline_id = %self.id,
            origin = self.definition.origin(),
            workers = self.workers,
            batch_size = self.batch_size,
            batch_delay = ?self.batch_delay,
            "pipeline started"
        );

        let (out_tx, out_rx) = mpsc::channel::<Vec<String>>(self.workers * 2);
        let queue = self.batch_size.min(PREALLOC_LIMIT) * 2;
        let writer_task = tokio::spawn(write_batches(out_rx, writer));

        let mut senders = Vec::with_capacity(self.workers);
        let mut workers = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let (tx, rx) = mpsc::channel(queue);
            senders.push(tx);
            let worker = Worker {
                id,
                rx,
                out: out_tx.clone(),
                batch_size: self.batch_size,
                batch_delay: self.batch_delay,
            };
            workers.push(tokio::spawn(worker.run()));
        }
        drop(out_tx);

        let read_res = read_events(reader, &senders, &cancel).await;
        drop(senders);

        for worker in workers {
            flatten(worker.await)?;
        }
        flatten(writer_task.await)?;
        read_res?;

        info!(pipeline_id = %self.id, "pipeline finished");
        Ok(())
    }
}

async fn read_events<R>(
    reader: R,
    senders: &[mpsc::Sender<String>],
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new());
    let mut dispatch = Dispatch { senders, next: 0 };

    loop {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("input stopped by shutdown");
                break;
            }
            line = lines.next() => line,
        };

        match line {
            None => return Ok(()),
            Some(Ok(event)) => dispatch.send(event).await?,
            Some(Err(e)) => return Err(e).context("reading events"),
        }
    }

    // Complete lines already pulled off the input still go to the workers;
    // a trailing partial line is dropped with the reader.
    let mut buffered = std::mem::take(lines.read_buffer_mut());
    while let Some(event) = lines
        .decoder_mut()
        .decode(&mut buffered)
        .context("reading events")?
    {
        dispatch.send(event).await?;
    }
    Ok(())
}

/// Round-robin hand-off to the workers.
struct Dispatch<'a> {
    senders: &'a [mpsc::Sender<String>],
    next: usize,
}

impl Dispatch<'_> {
    async fn send(&mut self, event: String) -> Result<()> {
        EVENTS_IN_TOTAL.inc();
        if self.senders[self.next].send(event).await.is_err() {
            bail!("worker {} stopped accepting events", self.next);
        }
        self.next = (self.next + 1) % self.senders.len();
        Ok(())
    }
}

struct Worker {
    id: usize,
    rx: mpsc::Receiver<String>,
    out: mpsc::Sender<Vec<String>>,
    batch_size: usize,
    batch_delay: Duration,
}

impl Worker {
    async fn run(mut self) -> Result<()> {
        let mut batch = Vec::with_capacity(self.batch_size.min(PREALLOC_LIMIT));

        let sleeper = time::sleep(self.batch_delay);
        tokio::pin!(sleeper);

        loop {
            tokio::select! {
                maybe_event = self.rx.recv() => {
                    match maybe_event {
                        None => {
                            self.flush(&mut batch).await?;
                            break;
                        }
                        Some(event) => {
                            if batch.is_empty() {
                                sleeper.as_mut().reset(Instant::now() + self.batch_delay);
                            }
                            batch.push(event);
                            if batch.len() >= self.batch_size {
                                self.flush(&mut batch).await?;
                            }
                        }
                    }
                }
                () = &mut sleeper, if !batch.is_empty() => {
                    self.flush(&mut batch).await?;
                }
            }
        }

        Ok(())
    }

    async fn flush(&self, batch: &mut Vec<String>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let events = std::mem::replace(
            batch,
            Vec::with_capacity(self.batch_size.min(PREALLOC_LIMIT)),
        );
        BATCHES_FLUSHED_TOTAL.inc();
        self.out
            .send(events)
            .await
            .map_err(|_| anyhow!("output closed; worker {} dropped a batch", self.id))
    }
}

async fn write_batches<W>(mut rx: mpsc::Receiver<Vec<String>>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(batch) = rx.recv().await {
        let mut buf = String::with_capacity(batch.iter().map(|e| e.len() + 1).sum());
        for event in &batch {
            buf.push_str(event);
            buf.push('\n');
        }
        writer
            .write_all(buf.as_bytes())
            .await
            .context("writing events")?;
        EVENTS_OUT_TOTAL.inc_by(batch.len() as u64);
    }
    writer.flush().await.context("flushing output")?;
    Ok(())
}
