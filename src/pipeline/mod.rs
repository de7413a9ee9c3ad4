//! Pull-driven streaming pipeline.
//!
//! A [`Pipeline`] is one [`Source`] followed by any number of synchronous
//! [`Stage`]s. Each call to [`Pipeline::next`] runs one tick: the source
//! produces a bounded chunk, every stage transforms it in order, and the
//! resulting chunks are queued for the caller. Between ticks the task yields
//! to the scheduler, so long inputs never monopolise a worker thread.
//!
//! Flow control goes through a [`PipelineHandle`], which can be cloned and
//! used from other tasks:
//!
//! - `pause()` stops production at the next tick boundary; `resume()`
//!   restarts it. A source that already ended while paused is reported as
//!   finished right after resuming.
//! - `cancel(reason)` injects an error. The error is delivered to the
//!   consumer (after a pending pause is lifted) and the source is told to
//!   release its resources.
//!
//! [`Pipeline::spawn`] runs a pipeline on its own task behind a bounded
//! channel, so a slow consumer holds the producer back.

mod sources;
mod stages;

pub use sources::{BytesSource, RangeSource, ReaderSource};
pub use stages::{Crc32Probe, CompressStage, DecompressStage, LengthField, LengthProbe};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::zip::CompressionMethod;

/// Default size of chunks produced by the built-in sources.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Sidecar metadata carried with each chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChunkMeta {
    /// Progress of the producing source, 0.0..=100.0.
    pub percent: f64,
}

/// The unit of data moving through a pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    pub data: Vec<u8>,
    pub meta: ChunkMeta,
}

impl Chunk {
    pub fn new(data: Vec<u8>, percent: f64) -> Self {
        Self {
            data,
            meta: ChunkMeta { percent },
        }
    }
}

/// Facts accumulated about a stream as it passes through the stages.
///
/// Each participant fills in what it knows, source first and then stages in
/// pipeline order; a later writer overwrites an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub file_name: Option<String>,
    pub crc32: Option<u32>,
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub compression: Option<CompressionMethod>,
}

impl StreamInfo {
    /// Copies every field that is set in `other` over this one.
    pub fn merge(&mut self, other: &StreamInfo) {
        if other.file_name.is_some() {
            self.file_name.clone_from(&other.file_name);
        }
        if other.crc32.is_some() {
            self.crc32 = other.crc32;
        }
        if other.uncompressed_size.is_some() {
            self.uncompressed_size = other.uncompressed_size;
        }
        if other.compressed_size.is_some() {
            self.compressed_size = other.compressed_size;
        }
        if other.compression.is_some() {
            self.compression = other.compression;
        }
    }
}

/// Head of a pipeline: produces chunks until exhausted.
#[async_trait]
pub trait Source: Send {
    /// Produces the next chunk, or `None` once the input is exhausted.
    async fn produce(&mut self) -> Result<Option<Chunk>>;

    /// Contributes what the source knows to the stream info.
    fn describe(&self, _info: &mut StreamInfo) {}

    /// Called once when the pipeline fails or is cancelled, so the source can
    /// release whatever it holds.
    fn abort(&mut self, _reason: &Error) {}
}

#[async_trait]
impl Source for Box<dyn Source> {
    async fn produce(&mut self) -> Result<Option<Chunk>> {
        (**self).produce().await
    }

    fn describe(&self, info: &mut StreamInfo) {
        (**self).describe(info)
    }

    fn abort(&mut self, reason: &Error) {
        (**self).abort(reason)
    }
}

/// A synchronous transformation step.
pub trait Stage: Send {
    fn name(&self) -> &'static str;

    /// Transforms one chunk, pushing any number of output chunks.
    fn process(&mut self, chunk: Chunk, out: &mut Vec<Chunk>) -> Result<()>;

    /// Flushes buffered state once the upstream has ended.
    fn finish(&mut self, _out: &mut Vec<Chunk>) -> Result<()> {
        Ok(())
    }

    fn describe(&self, _info: &mut StreamInfo) {}
}

#[derive(Debug, Default)]
struct Control {
    paused: AtomicBool,
    cancelled: Mutex<Option<Error>>,
    wake: Notify,
}

/// Remote control for a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    control: Arc<Control>,
}

impl PipelineHandle {
    pub fn pause(&self) {
        self.control.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.control.paused.store(false, Ordering::SeqCst);
        self.control.wake.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.control.paused.load(Ordering::SeqCst)
    }

    /// Terminates the pipeline with [`Error::Aborted`]. Only the first
    /// cancellation is kept.
    pub fn cancel(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.control.cancelled.lock() {
            if slot.is_none() {
                *slot = Some(Error::Aborted(reason.into()));
            }
        }
        self.control.wake.notify_waiters();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    Ended,
    Failed,
}

/// A source and its chain of stages. See the [module docs](self).
pub struct Pipeline {
    source: Box<dyn Source>,
    stages: Vec<Box<dyn Stage>>,
    pending: VecDeque<Chunk>,
    control: Arc<Control>,
    state: RunState,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("pending", &self.pending.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(source: impl Source + 'static) -> Self {
        Self::from_boxed(Box::new(source))
    }

    pub fn from_boxed(source: Box<dyn Source>) -> Self {
        Self {
            source,
            stages: Vec::new(),
            pending: VecDeque::new(),
            control: Arc::default(),
            state: RunState::Running,
        }
    }

    /// Appends a stage to the chain.
    pub fn pipe(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            control: Arc::clone(&self.control),
        }
    }

    /// Stream info as currently known, merged from the source and every
    /// stage in order.
    pub fn info(&self) -> StreamInfo {
        let mut info = StreamInfo::default();
        self.source.describe(&mut info);
        for stage in &self.stages {
            let mut own = StreamInfo::default();
            stage.describe(&mut own);
            info.merge(&own);
        }
        info
    }

    /// Runs ticks until a chunk is available or the stream ends.
    pub async fn next(&mut self) -> Result<Option<Chunk>> {
        loop {
            let control = Arc::clone(&self.control);
            Self::wait_while_paused(&control).await;

            let cancelled = self
                .control
                .cancelled
                .lock()
                .ok()
                .and_then(|slot| slot.as_ref().map(Error::duplicate));
            if let Some(err) = cancelled {
                if self.state != RunState::Failed {
                    return Err(self.fail(err));
                }
                return Err(err);
            }

            if let Some(chunk) = self.pending.pop_front() {
                return Ok(Some(chunk));
            }
            match self.state {
                RunState::Ended => return Ok(None),
                RunState::Failed => return Err(Error::InvalidState("pipeline already failed")),
                RunState::Running => {}
            }

            let produced = self.source.produce().await;
            let step = match produced {
                Ok(Some(chunk)) => self.run_stages(chunk),
                Ok(None) => self.end(),
                Err(e) => Err(e),
            };
            if let Err(e) = step {
                return Err(self.fail(e));
            }
            tokio::task::yield_now().await;
        }
    }

    // Stages are not `Sync`; borrowing only the control keeps `next` `Send`.
    async fn wait_while_paused(control: &Control) {
        while control.paused.load(Ordering::SeqCst) {
            let notified = control.wake.notified();
            if !control.paused.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
    }

    fn run_stages(&mut self, chunk: Chunk) -> Result<()> {
        let mut chunks = vec![chunk];
        for stage in &mut self.stages {
            let mut next = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                stage.process(chunk, &mut next)?;
            }
            chunks = next;
        }
        self.pending.extend(chunks);
        Ok(())
    }

    /// Flushes every stage in order. Later calls do nothing.
    fn end(&mut self) -> Result<()> {
        if self.state != RunState::Running {
            return Ok(());
        }
        self.state = RunState::Ended;
        let mut carry: Vec<Chunk> = Vec::new();
        for stage in &mut self.stages {
            let mut out = Vec::new();
            for chunk in carry {
                stage.process(chunk, &mut out)?;
            }
            stage.finish(&mut out)?;
            carry = out;
        }
        self.pending.extend(carry);
        Ok(())
    }

    /// Fails the pipeline from the outside, aborting its source.
    pub fn abort(&mut self, reason: &Error) {
        if self.state != RunState::Failed {
            self.fail(reason.duplicate());
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        log::debug!("pipeline failed: {err}");
        self.state = RunState::Failed;
        self.pending.clear();
        self.source.abort(&err);
        err
    }

    /// Drains the pipeline into one buffer.
    pub async fn collect(mut self) -> Result<(Vec<u8>, StreamInfo)> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await? {
            out.extend_from_slice(&chunk.data);
        }
        Ok((out, self.info()))
    }

    /// Runs the pipeline on a new task. At most `capacity` chunks are
    /// buffered between producer and consumer.
    pub fn spawn(mut self, capacity: usize) -> PipelineTask {
        let (tx, receiver) = mpsc::channel(capacity.max(1));
        let handle = self.handle();
        let join = tokio::spawn(async move {
            loop {
                match self.next().await {
                    Ok(Some(chunk)) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            self.fail(Error::Aborted("consumer went away".into()));
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
            self.info()
        });
        PipelineTask {
            receiver,
            handle,
            join,
        }
    }
}

/// A pipeline running on its own task.
#[derive(Debug)]
pub struct PipelineTask {
    receiver: mpsc::Receiver<Result<Chunk>>,
    handle: PipelineHandle,
    join: JoinHandle<StreamInfo>,
}

impl PipelineTask {
    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Next chunk, an error, or `None` once the task has finished.
    pub async fn recv(&mut self) -> Option<Result<Chunk>> {
        self.receiver.recv().await
    }

    /// Waits for the task and returns the final stream info.
    pub async fn finish(self) -> Result<StreamInfo> {
        drop(self.receiver);
        self.join
            .await
            .map_err(|e| Error::Aborted(format!("pipeline task failed: {e}")))
    }
}
