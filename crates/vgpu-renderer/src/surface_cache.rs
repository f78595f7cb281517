//! Host render targets for guest color surfaces.

use tracing::debug;

use crate::backend::{HostBackend, SurfaceHandle};
use crate::slot_cache::SlotCache;
use crate::stats::RendererStats;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SurfaceFormat {
    Rgba8 = 0,
    Rgb565 = 1,
    Rgba16F = 2,
}

impl SurfaceFormat {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Rgba8,
            1 => Self::Rgb565,
            2 => Self::Rgba16F,
            _ => return None,
        })
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb565 => 2,
            Self::Rgba8 => 4,
            Self::Rgba16F => 8,
        }
    }
}

/// Largest width or height a `SetContext` may ask for.
pub const MAX_SURFACE_DIMENSION: u32 = 4096;

/// A guest color surface: where it lives, its size and format. Doubles as the cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColorSurface {
    pub addr: u64,
    pub width: u32,
    pub height: u32,
    pub format: SurfaceFormat,
}

impl ColorSurface {
    /// Size of the surface in guest memory (tightly packed rows), or `None` if it does not fit
    /// in the address space.
    pub fn byte_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.format.bytes_per_pixel())
    }
}

#[derive(Debug)]
pub struct SurfaceCache {
    slots: SlotCache<ColorSurface, SurfaceHandle>,
}

impl SurfaceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: SlotCache::new(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn lookup(&self, desc: &ColorSurface) -> Option<SurfaceHandle> {
        let index = self.slots.find(desc)?;
        self.slots.get(index).copied()
    }

    /// Returns the host surface for `desc`, creating it (and destroying the least recently used
    /// surface when full) on a miss.
    pub fn retrieve(
        &mut self,
        desc: &ColorSurface,
        backend: &mut dyn HostBackend,
        stats: &RendererStats,
        now: u64,
    ) -> SurfaceHandle {
        if let Some(index) = self.slots.find(desc) {
            self.slots.touch(index, now);
            stats.inc_surface_hits();
            if let Some(&handle) = self.slots.get(index) {
                return handle;
            }
        }
        stats.inc_surface_misses();

        let handle = backend.create_surface(desc);
        if self.slots.is_full() {
            if let Some(victim) = self.slots.lru_index(now) {
                let (old, old_handle) = self.slots.replace(victim, *desc, handle, now);
                debug!(addr = old.addr, width = old.width, height = old.height, "evicting surface");
                backend.destroy_surface(old_handle);
                stats.inc_surface_evictions();
            }
        } else {
            self.slots.push(*desc, handle, now);
        }
        handle
    }
}
