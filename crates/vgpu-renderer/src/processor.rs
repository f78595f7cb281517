//! The render-thread side: pops ready command lists and executes them against the host backend.
//!
//! `process_next` is a small state machine:
//!
//! ```text
//! Idle -> Checking -> Dispatching -> Idle          (head ready)
//!            |  ^
//!            v  |
//!          Waiting -> Idle                        (head still blocked after `max_stall`)
//! ```
//!
//! A head list is ready unless its first command is a `WaitSyncObject` whose timestamp has not
//! been reached. While blocked the processor waits on the sync object for at most
//! `readiness_wait` at a time, so a signal from another list or a guest thread is picked up
//! immediately, and gives up after `max_stall` so the caller can present a stale frame.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};
use vgpu_sync::{SyncObject, Timestamp};
use vgpu_usse::words_from_le_bytes;

use crate::backend::{DrawCall, HostBackend, PipelineCompiler};
use crate::command::{CommandList, ContextState, DrawParams, ExecutionContext, ProgramRef, RenderCmd};
use crate::config::{ProcessorConfig, RendererConfig};
use crate::display::DisplayState;
use crate::error::GuestMemoryError;
use crate::guest::{GuestMemory, ThreadRegistry};
use crate::pipeline_cache::PipelineCache;
use crate::pipeline_key::{PipelineDescriptor, PipelineState, ProgramBinary, ShaderStage};
use crate::queue::CommandQueue;
use crate::stats::RendererStats;
use crate::surface_cache::SurfaceCache;
use crate::texture_cache::TextureCache;

/// Programs longer than this are rejected by `SetPrograms`.
pub const MAX_PROGRAM_WORDS: u32 = 1 << 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    Checking,
    Waiting,
    Dispatching,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// One list was executed.
    Processed,
    /// The head list stayed blocked for `max_stall`.
    NotReady,
    /// Nothing was submitted within `max_stall`.
    Empty,
    /// The queue is closed and drained.
    Closed,
}

/// Per-processor counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCounters {
    /// Frames presented.
    pub frame: u64,
    /// `SetContext` commands since the last frame.
    pub scene: u64,
    /// Logical clock for cache LRU, advanced by every draw.
    pub cache_time: u64,
}

enum Head {
    Empty,
    Ready,
    Blocked(Arc<SyncObject>, Timestamp),
}

pub struct BatchProcessor<B: HostBackend> {
    queue: Arc<CommandQueue>,
    display: Arc<DisplayState>,
    stats: Arc<RendererStats>,
    memory: Arc<dyn GuestMemory>,
    threads: Arc<ThreadRegistry>,
    backend: B,
    textures: TextureCache,
    surfaces: SurfaceCache,
    pipelines: PipelineCache,
    config: ProcessorConfig,
    counters: FrameCounters,
    state: ProcessorState,
}

impl<B: HostBackend> BatchProcessor<B> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: &RendererConfig,
        queue: Arc<CommandQueue>,
        display: Arc<DisplayState>,
        stats: Arc<RendererStats>,
        memory: Arc<dyn GuestMemory>,
        threads: Arc<ThreadRegistry>,
        backend: B,
        compiler: Arc<dyn PipelineCompiler>,
    ) -> Self {
        Self {
            textures: TextureCache::new(
                config.texture_cache.capacity,
                config.texture_cache.upload_policy,
            ),
            surfaces: SurfaceCache::new(config.surface_cache.capacity),
            pipelines: PipelineCache::new(&config.pipeline_cache, compiler, Arc::clone(&stats)),
            queue,
            display,
            stats,
            memory,
            threads,
            backend,
            config: config.processor,
            counters: FrameCounters::default(),
            state: ProcessorState::Idle,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn counters(&self) -> &FrameCounters {
        &self.counters
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn textures(&self) -> &TextureCache {
        &self.textures
    }

    pub fn surfaces(&self) -> &SurfaceCache {
        &self.surfaces
    }

    pub fn pipelines(&self) -> &PipelineCache {
        &self.pipelines
    }

    /// Executes the head list once it is ready.
    pub fn process_next(&mut self) -> ProcessOutcome {
        let started = Instant::now();
        let max_stall = self.config.max_stall();
        let mut blocked = None;
        self.state = ProcessorState::Checking;

        loop {
            match self.state {
                ProcessorState::Idle | ProcessorState::Checking => match self.check_head() {
                    Head::Ready => self.state = ProcessorState::Dispatching,
                    Head::Blocked(object, timestamp) => {
                        blocked = Some((object, timestamp));
                        self.state = ProcessorState::Waiting;
                    }
                    Head::Empty => {
                        let remaining = max_stall.saturating_sub(started.elapsed());
                        if self.queue.is_closed() || !self.queue.wait_for_work(remaining) {
                            self.state = ProcessorState::Idle;
                            return if self.queue.is_closed() && self.queue.is_empty() {
                                ProcessOutcome::Closed
                            } else {
                                ProcessOutcome::Empty
                            };
                        }
                    }
                },
                ProcessorState::Waiting => {
                    let elapsed = started.elapsed();
                    let Some((object, timestamp)) = blocked.take() else {
                        self.state = ProcessorState::Checking;
                        continue;
                    };
                    if elapsed >= max_stall {
                        self.stats.inc_stalls();
                        debug!(
                            timestamp,
                            current = object.current(),
                            "head command list still blocked; yielding"
                        );
                        self.state = ProcessorState::Idle;
                        return ProcessOutcome::NotReady;
                    }
                    self.stats.inc_readiness_waits();
                    object.wait(timestamp, Some(self.config.readiness_wait().min(max_stall - elapsed)));
                    self.state = ProcessorState::Checking;
                }
                ProcessorState::Dispatching => {
                    let Some(list) = self.queue.pop_head() else {
                        self.state = ProcessorState::Checking;
                        continue;
                    };
                    self.execute_list(list);
                    self.state = ProcessorState::Idle;
                    return ProcessOutcome::Processed;
                }
            }
        }
    }

    /// Processes lists until a frame is ready for display or nothing becomes ready within
    /// `max_stall`. Returns the number of lists executed.
    ///
    /// The display flag is left set; the display side clears it with
    /// [`DisplayState::take_should_display`].
    pub fn process_batches(&mut self) -> usize {
        let mut processed = 0;
        while !self.display.should_display() {
            match self.process_next() {
                ProcessOutcome::Processed => processed += 1,
                ProcessOutcome::NotReady | ProcessOutcome::Empty | ProcessOutcome::Closed => break,
            }
        }
        processed
    }

    /// Render thread main loop; returns once the queue is closed and drained.
    pub fn run(&mut self) {
        while self.process_next() != ProcessOutcome::Closed {}
        debug!(frames = self.counters.frame, "command processor stopped");
    }

    fn check_head(&self) -> Head {
        let Some(wait) = self.queue.with_head(CommandList::head_wait) else {
            return Head::Empty;
        };
        let Some((addr, timestamp)) = wait else {
            return Head::Ready;
        };
        match self.memory.sync_object(addr) {
            Some(object) if object.is_ready(timestamp) => Head::Ready,
            Some(object) => Head::Blocked(object, timestamp),
            None => {
                warn!(addr, timestamp, "head list waits on an unknown sync object; running it");
                Head::Ready
            }
        }
    }

    fn execute_list(&mut self, mut list: CommandList) {
        let context = Arc::clone(list.context());
        trace!(context = context.id().0, commands = list.len(), "executing command list");
        while let Some(command) = list.pop_front() {
            match command.decode() {
                Ok(cmd) => {
                    self.execute(&context, cmd);
                    self.stats.inc_commands_executed();
                }
                Err(err) => {
                    warn!(context = context.id().0, %err, "skipping command");
                    self.stats.inc_commands_skipped();
                }
            }
            context.allocator().release(command);
        }
        self.stats.inc_lists_processed();
    }

    fn execute(&mut self, context: &ExecutionContext, cmd: RenderCmd) {
        let mut state = context.state().lock().unwrap();
        match cmd {
            RenderCmd::Nop => {}
            RenderCmd::SetContext(surface) => {
                state.color_surface = Some(surface);
                self.counters.scene += 1;
            }
            RenderCmd::SetState { index, value } => state.render_state.set(index, value),
            RenderCmd::SetPrograms { vertex, fragment } => {
                let programs = self
                    .fetch_program(ShaderStage::Vertex, vertex)
                    .and_then(|v| Ok((v, self.fetch_program(ShaderStage::Fragment, fragment)?)));
                state.programs = match programs {
                    Ok(programs) => Some(programs),
                    Err(err) => {
                        warn!(%err, "failed to fetch shader programs");
                        None
                    }
                };
            }
            RenderCmd::BindTexture { unit, texture } => {
                if let Some(slot) = state.textures.get_mut(unit as usize) {
                    *slot = Some(texture);
                }
            }
            RenderCmd::Draw(params) => self.draw(&state, params),
            RenderCmd::SyncSurfaceData => self.sync_surface_data(&state),
            RenderCmd::WaitSyncObject { addr, timestamp } => self.wait_sync_object(addr, timestamp),
            RenderCmd::SignalSyncObject { addr, timestamp } => match self.memory.sync_object(addr) {
                Some(object) => object.signal(timestamp),
                None => warn!(addr, timestamp, "signal of unknown sync object"),
            },
            RenderCmd::SignalNotification {
                addr,
                value,
                thread,
            } => {
                if let Err(err) = self.memory.write_u32(addr, value) {
                    warn!(%err, "failed to write notification value");
                }
                match self.threads.get(thread) {
                    Some(thread) => {
                        thread.wake();
                    }
                    None => warn!(thread = thread.0, "notification for unknown guest thread"),
                }
            }
            RenderCmd::NewFrame => self.new_frame(&state),
        }
    }

    fn fetch_program(
        &self,
        stage: ShaderStage,
        program: ProgramRef,
    ) -> Result<ProgramBinary, GuestMemoryError> {
        let len = program.word_count as usize * 8;
        if program.word_count > MAX_PROGRAM_WORDS {
            return Err(GuestMemoryError {
                addr: program.addr,
                len,
            });
        }
        let mut bytes = vec![0u8; len];
        self.memory.read(program.addr, &mut bytes)?;
        Ok(ProgramBinary::new(stage, words_from_le_bytes(&bytes)))
    }

    fn draw(&mut self, state: &ContextState, params: DrawParams) {
        self.counters.cache_time += 1;
        let now = self.counters.cache_time;

        let surface = match &state.color_surface {
            Some(desc) => Some(self.surfaces.retrieve(desc, &mut self.backend, &self.stats, now)),
            None => None,
        };

        let mut textures = Vec::new();
        for (unit, desc) in state.textures.iter().enumerate() {
            let Some(desc) = desc else {
                continue;
            };
            match self
                .textures
                .bind_or_create(desc, &*self.memory, &mut self.backend, &self.stats, now)
            {
                Ok(binding) => textures.push((unit as u32, binding.handle)),
                Err(err) => warn!(unit, %err, "skipping unreadable texture"),
            }
        }

        let pipeline = match &state.programs {
            Some((vertex, fragment)) => {
                let desc = PipelineDescriptor {
                    vertex: vertex.clone(),
                    fragment: fragment.clone(),
                    state: PipelineState::from_render_state(
                        &state.render_state,
                        state.color_surface.map(|surface| surface.format),
                    ),
                };
                self.pipelines.retrieve_or_compile(&desc)
            }
            None => {
                debug!("draw without programs; using the fallback pipeline");
                self.pipelines.fallback()
            }
        };

        self.backend.draw(&DrawCall {
            pipeline,
            surface,
            textures,
            primitive: params.primitive,
            vertex_count: params.vertex_count,
            instance_count: params.instance_count,
        });
        self.stats.inc_draws();
    }

    fn sync_surface_data(&mut self, state: &ContextState) {
        let Some(desc) = state.color_surface else {
            debug!("surface writeback without a color surface");
            return;
        };
        // A surface that was never drawn to has nothing newer than guest memory.
        let Some(handle) = self.surfaces.lookup(&desc) else {
            return;
        };
        if desc.byte_len().is_none() {
            warn!(addr = desc.addr, "surface too large to write back");
            return;
        }
        let bytes = self.backend.read_surface(handle, &desc);
        if let Err(err) = self.memory.write(desc.addr, &bytes) {
            warn!(%err, "failed to write surface back to guest memory");
        }
    }

    fn wait_sync_object(&self, addr: u64, timestamp: Timestamp) {
        let Some(object) = self.memory.sync_object(addr) else {
            warn!(addr, timestamp, "wait on unknown sync object");
            return;
        };
        if !object.wait(timestamp, Some(self.config.max_stall())) {
            self.stats.inc_sync_wait_timeouts();
            warn!(
                addr,
                timestamp,
                current = object.current(),
                "sync object wait timed out; continuing"
            );
        }
    }

    fn new_frame(&mut self, state: &ContextState) {
        let surface = state
            .color_surface
            .and_then(|desc| self.surfaces.lookup(&desc));
        let frame = self.backend.present(surface);
        self.display.publish(frame);
        self.counters.frame += 1;
        self.counters.scene = 0;
        self.stats.inc_frames();
        debug!(frame = self.counters.frame, "frame presented");
    }
}
