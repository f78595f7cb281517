//! Compiled pipeline cache with optional background compilation.
//!
//! In synchronous mode a miss compiles inline. In asynchronous mode a miss queues a compile job
//! for the worker pool and the draw uses the compiler's fallback pipeline until a worker publishes
//! the result into the entry's slot. A pipeline that fails to compile keeps using the fallback for
//! as long as its key stays cached; the failure is logged the first time a draw observes it.

use std::num::NonZeroUsize;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use lru::LruCache;
use tracing::{debug, error, trace, warn};
use vgpu_usse::{analyze, AnalyzedProgram};

use crate::backend::{PipelineCompiler, PipelineHandle};
use crate::config::PipelineCacheConfig;
use crate::error::CompileError;
use crate::pipeline_key::{PipelineDescriptor, PipelineKey, PipelineState, ShaderStage};
use crate::stats::RendererStats;

/// Input of [`PipelineCompiler::compile`]: both programs decoded and segmented into blocks.
#[derive(Debug)]
pub struct PipelineSource {
    pub key: PipelineKey,
    pub vertex: AnalyzedProgram,
    pub fragment: AnalyzedProgram,
    pub state: PipelineState,
}

impl PipelineSource {
    pub fn build(key: PipelineKey, desc: &PipelineDescriptor) -> Result<Self, CompileError> {
        if desc.vertex.words().is_empty() {
            return Err(CompileError::EmptyProgram(ShaderStage::Vertex));
        }
        if desc.fragment.words().is_empty() {
            return Err(CompileError::EmptyProgram(ShaderStage::Fragment));
        }
        Ok(Self {
            key,
            vertex: analyze(desc.vertex.words()),
            fragment: analyze(desc.fragment.words()),
            state: desc.state,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStatus {
    Pending,
    Ready(PipelineHandle),
    Failed,
}

#[derive(Debug)]
enum SlotState {
    Pending,
    Ready(PipelineHandle),
    Failed { error: CompileError, reported: bool },
    /// Dropped from the cache; a late compile result is released instead of published.
    Evicted,
}

type Slot = Arc<Mutex<SlotState>>;

struct Job {
    key: PipelineKey,
    desc: PipelineDescriptor,
    slot: Slot,
}

fn compile(
    compiler: &dyn PipelineCompiler,
    stats: &RendererStats,
    key: PipelineKey,
    desc: &PipelineDescriptor,
) -> Result<PipelineHandle, CompileError> {
    stats.inc_pipeline_compiles();
    let source = PipelineSource::build(key, desc)?;
    trace!(
        %key,
        vertex_blocks = source.vertex.blocks().len(),
        fragment_blocks = source.fragment.blocks().len(),
        "compiling pipeline"
    );
    compiler.compile(&source)
}

fn publish(slot: &Slot, result: Result<PipelineHandle, CompileError>, compiler: &dyn PipelineCompiler) {
    let mut state = slot.lock().unwrap();
    match (&*state, result) {
        (SlotState::Evicted, Ok(handle)) => compiler.release(handle),
        (SlotState::Evicted, Err(_)) => {}
        (_, Ok(handle)) => *state = SlotState::Ready(handle),
        (_, Err(error)) => {
            *state = SlotState::Failed {
                error,
                reported: false,
            }
        }
    }
}

struct CompilerPool {
    sender: Option<SyncSender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl CompilerPool {
    /// Returns `None` if no worker thread could be started.
    fn new(
        threads: usize,
        queue_depth: usize,
        compiler: &Arc<dyn PipelineCompiler>,
        stats: &Arc<RendererStats>,
    ) -> Option<Self> {
        let (sender, receiver) = mpsc::sync_channel::<Job>(queue_depth);
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = Arc::clone(&receiver);
            let compiler = Arc::clone(compiler);
            let stats = Arc::clone(stats);
            let spawned = thread::Builder::new()
                .name(format!("pipeline-compiler-{index}"))
                .spawn(move || worker_loop(&receiver, &*compiler, &stats));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => warn!(index, %err, "failed to start pipeline compiler thread"),
            }
        }
        if workers.is_empty() {
            return None;
        }
        Some(Self {
            sender: Some(sender),
            workers,
        })
    }

    fn try_submit(&self, job: Job) -> Result<(), TrySendError<Job>> {
        match &self.sender {
            Some(sender) => sender.try_send(job),
            None => Err(TrySendError::Disconnected(job)),
        }
    }
}

impl CompilerPool {
    /// Closes the queue and joins every worker. Returns how many of them panicked.
    fn shutdown(&mut self) -> usize {
        // Closing the channel ends every worker loop once the queue drains.
        self.sender.take();
        let mut panicked = 0;
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("pipeline-compiler").to_owned();
            if worker.join().is_err() {
                warn!(thread = %name, "pipeline compiler thread panicked");
                panicked += 1;
            }
        }
        panicked
    }
}

impl Drop for CompilerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Job>>, compiler: &dyn PipelineCompiler, stats: &RendererStats) {
    loop {
        let job = receiver.lock().unwrap().recv();
        let Ok(job) = job else {
            break;
        };
        let result = compile(compiler, stats, job.key, &job.desc);
        debug!(key = %job.key, ok = result.is_ok(), "pipeline compile finished");
        publish(&job.slot, result, compiler);
    }
}

pub struct PipelineCache {
    entries: LruCache<PipelineKey, Slot>,
    compiler: Arc<dyn PipelineCompiler>,
    pool: Option<CompilerPool>,
    stats: Arc<RendererStats>,
}

impl PipelineCache {
    pub fn new(
        config: &PipelineCacheConfig,
        compiler: Arc<dyn PipelineCompiler>,
        stats: Arc<RendererStats>,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        let pool = if config.async_compile {
            let pool = CompilerPool::new(
                config.compiler_threads.max(1),
                config.queue_depth.max(1),
                &compiler,
                &stats,
            );
            if pool.is_none() {
                warn!("no pipeline compiler threads; compiling synchronously");
            }
            pool
        } else {
            None
        };
        Self {
            entries: LruCache::new(capacity),
            compiler,
            pool,
            stats,
        }
    }

    pub fn is_async(&self) -> bool {
        self.pool.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fallback(&self) -> PipelineHandle {
        self.compiler.fallback()
    }

    /// Compile state of a cached key, without touching its LRU position.
    pub fn status(&self, key: &PipelineKey) -> Option<PipelineStatus> {
        let slot = self.entries.peek(key)?;
        let state = slot.lock().unwrap();
        Some(match &*state {
            SlotState::Pending | SlotState::Evicted => PipelineStatus::Pending,
            SlotState::Ready(handle) => PipelineStatus::Ready(*handle),
            SlotState::Failed { .. } => PipelineStatus::Failed,
        })
    }

    /// Returns the pipeline to draw with: the compiled one when ready, the fallback otherwise.
    pub fn retrieve_or_compile(&mut self, desc: &PipelineDescriptor) -> PipelineHandle {
        let key = desc.key();
        if let Some(slot) = self.entries.get(&key) {
            let slot = Arc::clone(slot);
            self.stats.inc_pipeline_hits();
            return self.resolve(key, &slot);
        }
        self.stats.inc_pipeline_misses();

        let slot: Slot = Arc::new(Mutex::new(SlotState::Pending));
        match &self.pool {
            Some(pool) => {
                let job = Job {
                    key,
                    desc: desc.clone(),
                    slot: Arc::clone(&slot),
                };
                if pool.try_submit(job).is_err() {
                    // Not cached, so a later draw asks again.
                    self.stats.inc_pipeline_queue_full();
                    self.stats.inc_pipeline_fallbacks();
                    debug!(%key, "pipeline compile queue full");
                    return self.compiler.fallback();
                }
            }
            None => {
                let result = compile(&*self.compiler, &self.stats, key, desc);
                publish(&slot, result, &*self.compiler);
            }
        }

        if let Some((old_key, old_slot)) = self.entries.push(key, Arc::clone(&slot)) {
            if old_key != key {
                self.evict(old_key, &old_slot);
            }
        }
        self.resolve(key, &slot)
    }

    fn evict(&self, key: PipelineKey, slot: &Slot) {
        let previous = std::mem::replace(&mut *slot.lock().unwrap(), SlotState::Evicted);
        if let SlotState::Ready(handle) = previous {
            self.compiler.release(handle);
        }
        self.stats.inc_pipeline_evictions();
        debug!(%key, "evicting pipeline");
    }

    fn resolve(&self, key: PipelineKey, slot: &Slot) -> PipelineHandle {
        let mut state = slot.lock().unwrap();
        match &mut *state {
            SlotState::Ready(handle) => *handle,
            SlotState::Failed { error, reported } => {
                if !*reported {
                    *reported = true;
                    self.stats.inc_pipeline_compile_failures();
                    error!(%key, %error, "pipeline compilation failed; drawing with fallback");
                }
                self.stats.inc_pipeline_fallbacks();
                self.compiler.fallback()
            }
            SlotState::Pending | SlotState::Evicted => {
                self.stats.inc_pipeline_fallbacks();
                self.compiler.fallback()
            }
        }
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        // Join the workers first so no result is published after the release below.
        self.pool.take();
        for (key, slot) in self.entries.iter() {
            if let SlotState::Ready(handle) = &*slot.lock().unwrap() {
                trace!(%key, "releasing pipeline");
                self.compiler.release(*handle);
            }
        }
    }
}
