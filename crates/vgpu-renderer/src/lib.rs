//! Command processing for the virtualized GPU.
//!
//! Guest threads build [`CommandList`]s through a [`Renderer`] and submit them to the
//! [`CommandQueue`]. The render thread owns the [`BatchProcessor`], which executes lists in order
//! once their head sync wait is satisfied, resolving guest textures, color surfaces and shader
//! pipelines through the caches before handing work to a [`HostBackend`].

pub mod backend;
pub mod command;
pub mod config;
pub mod display;
pub mod error;
pub mod guest;
pub mod pipeline_cache;
pub mod pipeline_key;
pub mod processor;
pub mod queue;
pub mod renderer;
pub mod slot_cache;
pub mod stats;
pub mod surface_cache;
pub mod texture_cache;

pub use backend::{
    BackendCall, DrawCall, Frame, HostBackend, NullBackend, NullCompiler, PipelineCompiler,
    PipelineHandle, RecordingBackend, SurfaceHandle, TextureHandle,
};
pub use command::{
    AllocatorKind, Command, CommandAllocator, CommandList, CommandListBuilder, ContextId,
    ExecutionContext, HeapAllocator, Opcode, PoolAllocator, ProgramRef, RenderCmd,
};
pub use config::{
    PipelineCacheConfig, ProcessorConfig, RendererConfig, SurfaceCacheConfig, TextureCacheConfig,
    UploadPolicy,
};
pub use display::DisplayState;
pub use error::{CommandError, CompileError, ConfigError, GuestMemoryError, SubmitError};
pub use guest::{GuestMemory, GuestThread, ThreadId, ThreadRegistry, ThreadStatus, VecGuestMemory};
pub use pipeline_cache::{PipelineCache, PipelineSource, PipelineStatus};
pub use pipeline_key::{PipelineDescriptor, PipelineKey, PipelineState, ProgramBinary, ShaderStage};
pub use processor::{BatchProcessor, FrameCounters, ProcessOutcome, ProcessorState};
pub use queue::CommandQueue;
pub use renderer::Renderer;
pub use stats::{RendererStats, RendererStatsSnapshot};
pub use surface_cache::{ColorSurface, SurfaceCache, SurfaceFormat, MAX_SURFACE_DIMENSION};
pub use texture_cache::{TextureCache, TextureDescriptor, TextureFormat, MAX_TEXTURE_BYTES};
