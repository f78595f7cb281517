//! Boundary between the command processor and the host graphics API.
//!
//! The processor only deals in opaque handles; creating the real host objects, translating
//! formats and recording host command buffers is the backend's job. [`NullBackend`] does nothing
//! (headless runs), [`RecordingBackend`] keeps a log of every call for tests and trace tooling.

use std::sync::atomic::{AtomicU32, Ordering};

use hashbrown::HashMap;

use crate::error::CompileError;
use crate::pipeline_cache::PipelineSource;
use crate::surface_cache::ColorSurface;
use crate::texture_cache::TextureDescriptor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawCall {
    pub pipeline: PipelineHandle,
    pub surface: Option<SurfaceHandle>,
    /// `(unit, texture)` pairs in unit order.
    pub textures: Vec<(u32, TextureHandle)>,
    pub primitive: u32,
    pub vertex_count: u32,
    pub instance_count: u32,
}

/// A presented frame, read back as RGBA8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgba8: Vec<u8>,
}

pub trait HostBackend {
    fn create_texture(&mut self, desc: &TextureDescriptor) -> TextureHandle;
    /// Re-targets an existing texture object at a different guest texture (slot reuse after
    /// eviction).
    fn configure_texture(&mut self, handle: TextureHandle, desc: &TextureDescriptor);
    fn upload_texture(
        &mut self,
        handle: TextureHandle,
        desc: &TextureDescriptor,
        texels: &[u8],
        palette: Option<&[u8]>,
    );

    fn create_surface(&mut self, desc: &ColorSurface) -> SurfaceHandle;
    fn destroy_surface(&mut self, handle: SurfaceHandle);
    /// Reads the surface contents back in the guest layout (`desc.byte_len()` bytes, or nothing
    /// if that size overflows).
    fn read_surface(&mut self, handle: SurfaceHandle, desc: &ColorSurface) -> Vec<u8>;

    fn draw(&mut self, draw: &DrawCall);

    /// Presents `surface` (or nothing) and returns the frame if the backend can read it back.
    fn present(&mut self, surface: Option<SurfaceHandle>) -> Option<Frame>;
}

/// Backend that ignores all work.
#[derive(Debug, Default)]
pub struct NullBackend {
    next_handle: u32,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u32 {
        self.next_handle = self.next_handle.wrapping_add(1);
        self.next_handle
    }
}

impl HostBackend for NullBackend {
    fn create_texture(&mut self, _desc: &TextureDescriptor) -> TextureHandle {
        TextureHandle(self.next())
    }

    fn configure_texture(&mut self, _handle: TextureHandle, _desc: &TextureDescriptor) {}

    fn upload_texture(
        &mut self,
        _handle: TextureHandle,
        _desc: &TextureDescriptor,
        _texels: &[u8],
        _palette: Option<&[u8]>,
    ) {
    }

    fn create_surface(&mut self, _desc: &ColorSurface) -> SurfaceHandle {
        SurfaceHandle(self.next())
    }

    fn destroy_surface(&mut self, _handle: SurfaceHandle) {}

    fn read_surface(&mut self, _handle: SurfaceHandle, desc: &ColorSurface) -> Vec<u8> {
        vec![0; desc.byte_len().unwrap_or(0)]
    }

    fn draw(&mut self, _draw: &DrawCall) {}

    fn present(&mut self, _surface: Option<SurfaceHandle>) -> Option<Frame> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    CreateTexture(TextureHandle),
    ConfigureTexture(TextureHandle),
    UploadTexture {
        handle: TextureHandle,
        bytes: usize,
        paletted: bool,
    },
    CreateSurface(SurfaceHandle),
    DestroySurface(SurfaceHandle),
    ReadSurface(SurfaceHandle),
    Draw(DrawCall),
    Present(Option<SurfaceHandle>),
}

/// Backend that records every call. Surfaces read back as a constant fill byte.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Vec<BackendCall>,
    surfaces: HashMap<SurfaceHandle, ColorSurface>,
    next_handle: u32,
    surface_fill: u8,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_surface_fill(mut self, fill: u8) -> Self {
        self.surface_fill = fill;
        self
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<BackendCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn draws(&self) -> impl Iterator<Item = &DrawCall> {
        self.calls.iter().filter_map(|call| match call {
            BackendCall::Draw(draw) => Some(draw),
            _ => None,
        })
    }

    pub fn uploads(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, BackendCall::UploadTexture { .. }))
            .count()
    }

    fn next(&mut self) -> u32 {
        self.next_handle = self.next_handle.wrapping_add(1);
        self.next_handle
    }
}

impl HostBackend for RecordingBackend {
    fn create_texture(&mut self, _desc: &TextureDescriptor) -> TextureHandle {
        let handle = TextureHandle(self.next());
        self.calls.push(BackendCall::CreateTexture(handle));
        handle
    }

    fn configure_texture(&mut self, handle: TextureHandle, _desc: &TextureDescriptor) {
        self.calls.push(BackendCall::ConfigureTexture(handle));
    }

    fn upload_texture(
        &mut self,
        handle: TextureHandle,
        _desc: &TextureDescriptor,
        texels: &[u8],
        palette: Option<&[u8]>,
    ) {
        self.calls.push(BackendCall::UploadTexture {
            handle,
            bytes: texels.len(),
            paletted: palette.is_some(),
        });
    }

    fn create_surface(&mut self, desc: &ColorSurface) -> SurfaceHandle {
        let handle = SurfaceHandle(self.next());
        self.surfaces.insert(handle, *desc);
        self.calls.push(BackendCall::CreateSurface(handle));
        handle
    }

    fn destroy_surface(&mut self, handle: SurfaceHandle) {
        self.surfaces.remove(&handle);
        self.calls.push(BackendCall::DestroySurface(handle));
    }

    fn read_surface(&mut self, handle: SurfaceHandle, desc: &ColorSurface) -> Vec<u8> {
        self.calls.push(BackendCall::ReadSurface(handle));
        vec![self.surface_fill; desc.byte_len().unwrap_or(0)]
    }

    fn draw(&mut self, draw: &DrawCall) {
        self.calls.push(BackendCall::Draw(draw.clone()));
    }

    fn present(&mut self, surface: Option<SurfaceHandle>) -> Option<Frame> {
        self.calls.push(BackendCall::Present(surface));
        let desc = self.surfaces.get(&surface?)?;
        let pixels = desc.width as usize * desc.height as usize;
        Some(Frame {
            width: desc.width,
            height: desc.height,
            rgba8: vec![self.surface_fill; pixels * 4],
        })
    }
}

/// Shader code generation backend.
///
/// Receives both programs already decoded and segmented into blocks. Called from the compiler
/// pool when asynchronous compilation is enabled, hence `Send + Sync`.
pub trait PipelineCompiler: Send + Sync {
    fn compile(&self, source: &PipelineSource) -> Result<PipelineHandle, CompileError>;

    /// Pipeline used while the real one is pending, and forever after it failed.
    fn fallback(&self) -> PipelineHandle;

    fn release(&self, handle: PipelineHandle);
}

/// Compiler that accepts every pipeline and hands out sequential handles. `PipelineHandle(0)` is
/// the fallback.
#[derive(Debug, Default)]
pub struct NullCompiler {
    next_handle: AtomicU32,
}

impl NullCompiler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineCompiler for NullCompiler {
    fn compile(&self, _source: &PipelineSource) -> Result<PipelineHandle, CompileError> {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        Ok(PipelineHandle(id + 1))
    }

    fn fallback(&self) -> PipelineHandle {
        PipelineHandle(0)
    }

    fn release(&self, _handle: PipelineHandle) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface_cache::SurfaceFormat;

    fn surface() -> ColorSurface {
        ColorSurface {
            addr: 0x1000,
            width: 4,
            height: 2,
            format: SurfaceFormat::Rgba8,
        }
    }

    #[test]
    fn recording_backend_presents_known_surfaces() {
        let mut backend = RecordingBackend::new().with_surface_fill(0x7F);
        let handle = backend.create_surface(&surface());
        let frame = backend.present(Some(handle)).unwrap();
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.rgba8.len(), 32);
        assert!(frame.rgba8.iter().all(|&b| b == 0x7F));

        assert_eq!(backend.present(None), None);
        assert_eq!(
            backend.calls(),
            &[
                BackendCall::CreateSurface(handle),
                BackendCall::Present(Some(handle)),
                BackendCall::Present(None),
            ]
        );
    }

    #[test]
    fn null_backend_reads_back_zeroes() {
        let mut backend = NullBackend::new();
        let handle = backend.create_surface(&surface());
        assert_eq!(backend.read_surface(handle, &surface()), vec![0; 32]);
        assert_eq!(backend.present(Some(handle)), None);
    }
}
