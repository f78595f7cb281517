//! Guest-facing half of the renderer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::debug;
use vgpu_sync::Timestamp;

use crate::backend::{HostBackend, PipelineCompiler};
use crate::command::{AllocatorKind, CommandList, CommandListBuilder, ContextId, ExecutionContext};
use crate::config::RendererConfig;
use crate::display::DisplayState;
use crate::error::{ConfigError, SubmitError};
use crate::guest::{GuestMemory, ThreadRegistry};
use crate::processor::BatchProcessor;
use crate::queue::CommandQueue;
use crate::stats::RendererStats;

/// Shared by guest threads: creates contexts, builds and submits command lists.
///
/// The matching [`BatchProcessor`] is returned by [`Renderer::new`] and belongs on the render
/// thread.
pub struct Renderer {
    queue: Arc<CommandQueue>,
    display: Arc<DisplayState>,
    stats: Arc<RendererStats>,
    memory: Arc<dyn GuestMemory>,
    next_context: AtomicU32,
}

impl Renderer {
    pub fn new<B: HostBackend>(
        config: RendererConfig,
        memory: Arc<dyn GuestMemory>,
        threads: Arc<ThreadRegistry>,
        backend: B,
        compiler: Arc<dyn PipelineCompiler>,
    ) -> Result<(Self, BatchProcessor<B>), ConfigError> {
        config.validate()?;
        let queue = Arc::new(CommandQueue::new());
        let display = Arc::new(DisplayState::new());
        let stats = Arc::new(RendererStats::new());
        let processor = BatchProcessor::new(
            &config,
            Arc::clone(&queue),
            Arc::clone(&display),
            Arc::clone(&stats),
            Arc::clone(&memory),
            threads,
            backend,
            compiler,
        );
        debug!(?config, "renderer created");
        let renderer = Self {
            queue,
            display,
            stats,
            memory,
            next_context: AtomicU32::new(1),
        };
        Ok((renderer, processor))
    }

    pub fn create_context(&self, allocator: AllocatorKind) -> Arc<ExecutionContext> {
        let id = ContextId(self.next_context.fetch_add(1, Ordering::Relaxed));
        Arc::new(ExecutionContext::with_kind(id, allocator))
    }

    pub fn command_list(&self, context: &Arc<ExecutionContext>) -> CommandListBuilder {
        CommandListBuilder::new(Arc::clone(context))
    }

    pub fn submit(&self, list: CommandList) -> Result<(), SubmitError> {
        self.queue.submit(list)?;
        self.stats.inc_lists_submitted();
        Ok(())
    }

    /// Promises the next timestamp of the sync object at `addr` and appends the command that
    /// signals it. Returns `None` if no sync object lives at `addr`.
    pub fn promise_signal(&self, builder: &mut CommandListBuilder, addr: u64) -> Option<Timestamp> {
        let object = self.memory.sync_object(addr)?;
        let timestamp = object.promise_next();
        builder.signal_sync_object(addr, timestamp);
        Some(timestamp)
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    pub fn display(&self) -> &Arc<DisplayState> {
        &self.display
    }

    pub fn stats(&self) -> &Arc<RendererStats> {
        &self.stats
    }

    /// Closes the queue. The processor drains what was already submitted and then reports
    /// `ProcessOutcome::Closed`.
    pub fn shutdown(&self) {
        self.queue.close();
    }
}
