//! Guest command lists.
//!
//! A command is a raw `u16` opcode plus a little-endian payload. Lists are built by guest threads
//! through [`CommandListBuilder`], submitted to the [`crate::queue::CommandQueue`] and consumed
//! once by the processor, which decodes every command into a [`RenderCmd`].
//!
//! Payload layouts (all fields little-endian):
//!
//! | opcode | payload |
//! |---|---|
//! | `SetContext` | `addr: u64, width: u32, height: u32, format: u32` |
//! | `SetState` | `index: u32, value: u32` |
//! | `SetPrograms` | `vertex_addr: u64, vertex_words: u32, fragment_addr: u64, fragment_words: u32` |
//! | `BindTexture` | `unit: u32, data_addr: u64, palette_addr: u64, width: u32, height: u32, format: u32` |
//! | `Draw` | `primitive: u32, vertex_count: u32, instance_count: u32` |
//! | `WaitSyncObject`, `SignalSyncObject` | `addr: u64, timestamp: u64` |
//! | `SignalNotification` | `addr: u64, value: u32, thread: u32` |
//! | `Nop`, `SyncSurfaceData`, `NewFrame` | empty |

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use vgpu_sync::Timestamp;

use crate::error::CommandError;
use crate::guest::ThreadId;
use crate::pipeline_key::ProgramBinary;
use crate::surface_cache::{ColorSurface, SurfaceFormat, MAX_SURFACE_DIMENSION};
use crate::texture_cache::{TextureDescriptor, TextureFormat};

pub const MAX_TEXTURE_UNITS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    Nop = 0x0000,
    SetContext = 0x0001,
    SetState = 0x0002,
    SetPrograms = 0x0003,
    BindTexture = 0x0004,
    Draw = 0x0005,
    SyncSurfaceData = 0x0006,

    WaitSyncObject = 0x0010,
    SignalSyncObject = 0x0011,
    SignalNotification = 0x0012,

    NewFrame = 0x0020,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0x0000 => Self::Nop,
            0x0001 => Self::SetContext,
            0x0002 => Self::SetState,
            0x0003 => Self::SetPrograms,
            0x0004 => Self::BindTexture,
            0x0005 => Self::Draw,
            0x0006 => Self::SyncSurfaceData,
            0x0010 => Self::WaitSyncObject,
            0x0011 => Self::SignalSyncObject,
            0x0012 => Self::SignalNotification,
            0x0020 => Self::NewFrame,
            _ => return None,
        })
    }

    /// Fixed payload size in bytes.
    pub fn payload_len(self) -> usize {
        match self {
            Self::Nop | Self::SyncSurfaceData | Self::NewFrame => 0,
            Self::SetState => 8,
            Self::Draw => 12,
            Self::WaitSyncObject | Self::SignalSyncObject | Self::SignalNotification => 16,
            Self::SetContext => 20,
            Self::SetPrograms => 24,
            Self::BindTexture => 32,
        }
    }
}

/// Render state word indices for `SetState`.
pub mod state {
    pub const CULL_MODE: u32 = 0;
    pub const DEPTH_FUNC: u32 = 1;
    pub const DEPTH_WRITE: u32 = 2;
    pub const STENCIL_FUNC: u32 = 3;
    pub const BLEND: u32 = 4;
    pub const COLOR_MASK: u32 = 5;
    pub const FRAGMENT_PROGRAM_ENABLE: u32 = 6;
    pub const TWO_SIDED: u32 = 7;
    pub const POLYGON_MODE: u32 = 8;
    pub const POINT_LINE_WIDTH: u32 = 9;
    pub const REGION_CLIP: u32 = 10;

    pub const COUNT: usize = 16;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderState {
    words: [u32; state::COUNT],
}

impl RenderState {
    /// Out-of-range indices read as zero.
    pub fn get(&self, index: u32) -> u32 {
        self.words.get(index as usize).copied().unwrap_or(0)
    }

    pub fn set(&mut self, index: u32, value: u32) {
        if let Some(word) = self.words.get_mut(index as usize) {
            *word = value;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgramRef {
    pub addr: u64,
    pub word_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawParams {
    pub primitive: u32,
    pub vertex_count: u32,
    pub instance_count: u32,
}

/// A decoded command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderCmd {
    Nop,
    SetContext(ColorSurface),
    SetState { index: u32, value: u32 },
    SetPrograms { vertex: ProgramRef, fragment: ProgramRef },
    BindTexture { unit: u32, texture: TextureDescriptor },
    Draw(DrawParams),
    SyncSurfaceData,
    WaitSyncObject { addr: u64, timestamp: Timestamp },
    SignalSyncObject { addr: u64, timestamp: Timestamp },
    SignalNotification { addr: u64, value: u32, thread: ThreadId },
    NewFrame,
}

struct PayloadReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(opcode: Opcode, bytes: &'a [u8]) -> Result<Self, CommandError> {
        let needed = opcode.payload_len();
        if bytes.len() < needed {
            return Err(CommandError::TruncatedPayload {
                opcode,
                needed,
                actual: bytes.len(),
            });
        }
        Ok(Self { bytes, pos: 0 })
    }

    fn u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.bytes[self.pos..self.pos + 4]);
        self.pos += 4;
        u32::from_le_bytes(buf)
    }

    fn u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.bytes[self.pos..self.pos + 8]);
        self.pos += 8;
        u64::from_le_bytes(buf)
    }
}

/// Where a command's payload buffer came from, and so where it goes back to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocatorKind {
    Heap,
    Pool,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Command {
    pub opcode: u16,
    pub payload: Vec<u8>,
    pub origin: AllocatorKind,
}

impl Command {
    pub fn decode(&self) -> Result<RenderCmd, CommandError> {
        let opcode = Opcode::from_u16(self.opcode).ok_or(CommandError::UnknownOpcode(self.opcode))?;
        let mut r = PayloadReader::new(opcode, &self.payload)?;
        let invalid = |field: &'static str, value: u64| CommandError::InvalidField {
            opcode,
            field,
            value,
        };
        Ok(match opcode {
            Opcode::Nop => RenderCmd::Nop,
            Opcode::SetContext => {
                let addr = r.u64();
                let width = r.u32();
                let height = r.u32();
                let format = r.u32();
                let format =
                    SurfaceFormat::from_u32(format).ok_or_else(|| invalid("format", format.into()))?;
                if width > MAX_SURFACE_DIMENSION {
                    return Err(invalid("surface width", width.into()));
                }
                if height > MAX_SURFACE_DIMENSION {
                    return Err(invalid("surface height", height.into()));
                }
                RenderCmd::SetContext(ColorSurface {
                    addr,
                    width,
                    height,
                    format,
                })
            }
            Opcode::SetState => {
                let index = r.u32();
                let value = r.u32();
                if index as usize >= state::COUNT {
                    return Err(invalid("state index", index.into()));
                }
                RenderCmd::SetState { index, value }
            }
            Opcode::SetPrograms => {
                let vertex = ProgramRef {
                    addr: r.u64(),
                    word_count: r.u32(),
                };
                let fragment = ProgramRef {
                    addr: r.u64(),
                    word_count: r.u32(),
                };
                RenderCmd::SetPrograms { vertex, fragment }
            }
            Opcode::BindTexture => {
                let unit = r.u32();
                if unit as usize >= MAX_TEXTURE_UNITS {
                    return Err(invalid("texture unit", unit.into()));
                }
                let data_addr = r.u64();
                let palette_addr = r.u64();
                let width = r.u32();
                let height = r.u32();
                let format = r.u32();
                let format =
                    TextureFormat::from_u32(format).ok_or_else(|| invalid("format", format.into()))?;
                RenderCmd::BindTexture {
                    unit,
                    texture: TextureDescriptor {
                        data_addr,
                        palette_addr,
                        width,
                        height,
                        format,
                    },
                }
            }
            Opcode::Draw => RenderCmd::Draw(DrawParams {
                primitive: r.u32(),
                vertex_count: r.u32(),
                instance_count: r.u32(),
            }),
            Opcode::SyncSurfaceData => RenderCmd::SyncSurfaceData,
            Opcode::WaitSyncObject => RenderCmd::WaitSyncObject {
                addr: r.u64(),
                timestamp: r.u64(),
            },
            Opcode::SignalSyncObject => RenderCmd::SignalSyncObject {
                addr: r.u64(),
                timestamp: r.u64(),
            },
            Opcode::SignalNotification => RenderCmd::SignalNotification {
                addr: r.u64(),
                value: r.u32(),
                thread: ThreadId(r.u32()),
            },
            Opcode::NewFrame => RenderCmd::NewFrame,
        })
    }
}

/// Storage policy for command payloads.
///
/// Commands are allocated by guest threads while building lists and released by the processor
/// thread after execution.
pub trait CommandAllocator: Send + Sync {
    fn kind(&self) -> AllocatorKind;

    /// Returns an empty buffer with room for at least `len` bytes.
    fn allocate(&self, len: usize) -> Vec<u8>;

    fn release(&self, command: Command);
}

/// Allocates every payload fresh and drops it on release.
#[derive(Debug, Default)]
pub struct HeapAllocator;

impl CommandAllocator for HeapAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Heap
    }

    fn allocate(&self, len: usize) -> Vec<u8> {
        Vec::with_capacity(len)
    }

    fn release(&self, command: Command) {
        debug_assert_eq!(command.origin, AllocatorKind::Heap);
    }
}

/// Recycles released payload buffers.
#[derive(Debug)]
pub struct PoolAllocator {
    free: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
}

impl PoolAllocator {
    pub const DEFAULT_MAX_POOLED: usize = 256;

    pub fn new(max_pooled: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_pooled,
        }
    }

    /// Number of buffers waiting for reuse.
    pub fn pooled(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}

impl Default for PoolAllocator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_POOLED)
    }
}

impl CommandAllocator for PoolAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Pool
    }

    fn allocate(&self, len: usize) -> Vec<u8> {
        let mut free = self.free.lock().unwrap();
        match free.iter().position(|buf| buf.capacity() >= len) {
            Some(index) => free.swap_remove(index),
            None => Vec::with_capacity(len),
        }
    }

    fn release(&self, command: Command) {
        debug_assert_eq!(command.origin, AllocatorKind::Pool);
        let mut payload = command.payload;
        payload.clear();
        let mut free = self.free.lock().unwrap();
        if free.len() < self.max_pooled {
            free.push(payload);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextId(pub u32);

/// Render state the processor tracks for one context between commands.
#[derive(Debug, Default)]
pub struct ContextState {
    pub color_surface: Option<ColorSurface>,
    pub render_state: RenderState,
    /// `(vertex, fragment)`, fetched from guest memory by `SetPrograms`.
    pub programs: Option<(ProgramBinary, ProgramBinary)>,
    pub textures: [Option<TextureDescriptor>; MAX_TEXTURE_UNITS],
}

/// A guest rendering context.
pub struct ExecutionContext {
    id: ContextId,
    allocator: Arc<dyn CommandAllocator>,
    state: Mutex<ContextState>,
}

impl ExecutionContext {
    pub fn new(id: ContextId, allocator: Arc<dyn CommandAllocator>) -> Self {
        Self {
            id,
            allocator,
            state: Mutex::new(ContextState::default()),
        }
    }

    pub fn with_kind(id: ContextId, kind: AllocatorKind) -> Self {
        let allocator: Arc<dyn CommandAllocator> = match kind {
            AllocatorKind::Heap => Arc::new(HeapAllocator),
            AllocatorKind::Pool => Arc::new(PoolAllocator::default()),
        };
        Self::new(id, allocator)
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn allocator(&self) -> &Arc<dyn CommandAllocator> {
        &self.allocator
    }

    pub fn state(&self) -> &Mutex<ContextState> {
        &self.state
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("allocator", &self.allocator.kind())
            .finish_non_exhaustive()
    }
}

/// An ordered list of commands bound to one context. Consumed exactly once.
///
/// Commands still in the list when it is dropped are released through the context's allocator.
#[derive(Debug)]
pub struct CommandList {
    context: Arc<ExecutionContext>,
    commands: VecDeque<Command>,
}

impl CommandList {
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// The `(sync object address, timestamp)` the list waits on before it may run, if its first
    /// command is a well-formed `WaitSyncObject`.
    pub fn head_wait(&self) -> Option<(u64, Timestamp)> {
        let head = self.commands.front()?;
        if head.opcode != Opcode::WaitSyncObject as u16 {
            return None;
        }
        match head.decode() {
            Ok(RenderCmd::WaitSyncObject { addr, timestamp }) => Some((addr, timestamp)),
            _ => None,
        }
    }

    pub fn pop_front(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        for command in self.commands.drain(..) {
            self.context.allocator.release(command);
        }
    }
}

/// Appends commands to a new list, one method per opcode.
#[derive(Debug)]
pub struct CommandListBuilder {
    list: CommandList,
}

impl CommandListBuilder {
    pub fn new(context: Arc<ExecutionContext>) -> Self {
        Self {
            list: CommandList {
                context,
                commands: VecDeque::new(),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn finish(self) -> CommandList {
        self.list
    }

    /// Appends a command with an arbitrary opcode; the payload is not validated.
    pub fn raw(&mut self, opcode: u16, payload: &[u8]) -> &mut Self {
        let allocator = &self.list.context.allocator;
        let mut buf = allocator.allocate(payload.len());
        buf.extend_from_slice(payload);
        self.list.commands.push_back(Command {
            opcode,
            payload: buf,
            origin: allocator.kind(),
        });
        self
    }

    fn push(&mut self, opcode: Opcode, payload: &[u8]) -> &mut Self {
        self.raw(opcode as u16, payload)
    }

    pub fn nop(&mut self) -> &mut Self {
        self.push(Opcode::Nop, &[])
    }

    pub fn set_context(&mut self, surface: &ColorSurface) -> &mut Self {
        let mut payload = Vec::with_capacity(20);
        payload.extend_from_slice(&surface.addr.to_le_bytes());
        payload.extend_from_slice(&surface.width.to_le_bytes());
        payload.extend_from_slice(&surface.height.to_le_bytes());
        payload.extend_from_slice(&(surface.format as u32).to_le_bytes());
        self.push(Opcode::SetContext, &payload)
    }

    pub fn set_state(&mut self, index: u32, value: u32) -> &mut Self {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&index.to_le_bytes());
        payload.extend_from_slice(&value.to_le_bytes());
        self.push(Opcode::SetState, &payload)
    }

    pub fn set_programs(&mut self, vertex: ProgramRef, fragment: ProgramRef) -> &mut Self {
        let mut payload = Vec::with_capacity(24);
        payload.extend_from_slice(&vertex.addr.to_le_bytes());
        payload.extend_from_slice(&vertex.word_count.to_le_bytes());
        payload.extend_from_slice(&fragment.addr.to_le_bytes());
        payload.extend_from_slice(&fragment.word_count.to_le_bytes());
        self.push(Opcode::SetPrograms, &payload)
    }

    pub fn bind_texture(&mut self, unit: u32, texture: &TextureDescriptor) -> &mut Self {
        let mut payload = Vec::with_capacity(32);
        payload.extend_from_slice(&unit.to_le_bytes());
        payload.extend_from_slice(&texture.data_addr.to_le_bytes());
        payload.extend_from_slice(&texture.palette_addr.to_le_bytes());
        payload.extend_from_slice(&texture.width.to_le_bytes());
        payload.extend_from_slice(&texture.height.to_le_bytes());
        payload.extend_from_slice(&(texture.format as u32).to_le_bytes());
        self.push(Opcode::BindTexture, &payload)
    }

    pub fn draw(&mut self, primitive: u32, vertex_count: u32, instance_count: u32) -> &mut Self {
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&primitive.to_le_bytes());
        payload.extend_from_slice(&vertex_count.to_le_bytes());
        payload.extend_from_slice(&instance_count.to_le_bytes());
        self.push(Opcode::Draw, &payload)
    }

    pub fn sync_surface_data(&mut self) -> &mut Self {
        self.push(Opcode::SyncSurfaceData, &[])
    }

    pub fn wait_sync_object(&mut self, addr: u64, timestamp: Timestamp) -> &mut Self {
        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(&timestamp.to_le_bytes());
        self.push(Opcode::WaitSyncObject, &payload)
    }

    pub fn signal_sync_object(&mut self, addr: u64, timestamp: Timestamp) -> &mut Self {
        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(&timestamp.to_le_bytes());
        self.push(Opcode::SignalSyncObject, &payload)
    }

    pub fn signal_notification(&mut self, addr: u64, value: u32, thread: ThreadId) -> &mut Self {
        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(&value.to_le_bytes());
        payload.extend_from_slice(&thread.0.to_le_bytes());
        self.push(Opcode::SignalNotification, &payload)
    }

    pub fn new_frame(&mut self) -> &mut Self {
        self.push(Opcode::NewFrame, &[])
    }
}
