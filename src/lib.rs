//! Virtualized GPU: guest command replay on a host graphics backend.
//!
//! - [`sync`]: cross-thread fences shared by guest threads and the render thread.
//! - [`usse`]: shader bytecode decoder and control-flow block segmenter.
//! - [`renderer`]: command queue, batch processor and resource caches.

pub use vgpu_renderer as renderer;
pub use vgpu_sync as sync;
pub use vgpu_usse as usse;

pub use vgpu_renderer::{BatchProcessor, Renderer, RendererConfig};
pub use vgpu_sync::{SyncObject, Timestamp};
