//! Host textures for guest texture descriptors.
//!
//! The cache is a fixed set of host texture slots. A descriptor that is not cached takes a free
//! slot or, once all slots are in use, the least recently used one; the host texture object of a
//! reused slot is reconfigured rather than recreated. Texel data lives in guest memory and may be
//! rewritten by the guest at any time, so a cache hit still re-uploads unless
//! [`UploadPolicy::ContentHash`] proves the bytes unchanged.

use tracing::{debug, trace};
use xxhash_rust::xxh3::xxh3_64;

use crate::backend::{HostBackend, TextureHandle};
use crate::config::UploadPolicy;
use crate::error::GuestMemoryError;
use crate::guest::GuestMemory;
use crate::slot_cache::SlotCache;
use crate::stats::RendererStats;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TextureFormat {
    R8 = 0,
    Rgb565 = 1,
    Rgba4444 = 2,
    Rgba8 = 3,
    Rgba16F = 4,
    /// 4-bit indices into a 16-entry RGBA8 palette.
    P4 = 5,
    /// 8-bit indices into a 256-entry RGBA8 palette.
    P8 = 6,
}

impl TextureFormat {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::R8,
            1 => Self::Rgb565,
            2 => Self::Rgba4444,
            3 => Self::Rgba8,
            4 => Self::Rgba16F,
            5 => Self::P4,
            6 => Self::P8,
            _ => return None,
        })
    }

    pub fn bits_per_pixel(self) -> usize {
        match self {
            Self::P4 => 4,
            Self::R8 | Self::P8 => 8,
            Self::Rgb565 | Self::Rgba4444 => 16,
            Self::Rgba8 => 32,
            Self::Rgba16F => 64,
        }
    }

    pub fn palette_entries(self) -> Option<usize> {
        match self {
            Self::P4 => Some(16),
            Self::P8 => Some(256),
            _ => None,
        }
    }
}

/// Largest texel payload a descriptor may describe.
pub const MAX_TEXTURE_BYTES: usize = 64 << 20;

/// A guest texture as bound by the guest. Doubles as the cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub data_addr: u64,
    /// Only meaningful for paletted formats.
    pub palette_addr: u64,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureDescriptor {
    /// Row pitch in pixels. Linear guest textures pad rows to 8 pixels.
    pub fn stride(&self) -> usize {
        (self.width as usize).saturating_add(7) & !7
    }

    /// Texel bytes in guest memory, or `None` past [`MAX_TEXTURE_BYTES`].
    pub fn data_len(&self) -> Option<usize> {
        let bits = self
            .stride()
            .checked_mul(self.height as usize)?
            .checked_mul(self.format.bits_per_pixel())?;
        Some(bits / 8).filter(|&len| len <= MAX_TEXTURE_BYTES)
    }

    pub fn palette_len(&self) -> Option<usize> {
        self.format.palette_entries().map(|entries| entries * 4)
    }
}

/// Hash of the texel bytes, mixed with the palette bytes for paletted formats.
pub fn content_hash(texels: &[u8], palette: Option<&[u8]>) -> u64 {
    let hash = xxh3_64(texels);
    match palette {
        Some(palette) => hash ^ xxh3_64(palette),
        None => hash,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindOutcome {
    /// Miss; a new host texture was created and uploaded.
    Created,
    /// Miss; the least recently used slot was reconfigured and uploaded.
    Evicted,
    /// Hit; the texel data was uploaded again.
    Reuploaded,
    /// Hit; the content hash matched so the upload was skipped.
    Unchanged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureBinding {
    pub handle: TextureHandle,
    pub outcome: BindOutcome,
}

#[derive(Debug)]
struct CachedTexture {
    handle: TextureHandle,
    hash: Option<u64>,
}

#[derive(Debug)]
pub struct TextureCache {
    slots: SlotCache<TextureDescriptor, CachedTexture>,
    policy: UploadPolicy,
}

impl TextureCache {
    pub fn new(capacity: usize, policy: UploadPolicy) -> Self {
        Self {
            slots: SlotCache::new(capacity),
            policy,
        }
    }

    pub fn policy(&self) -> UploadPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, desc: &TextureDescriptor) -> bool {
        self.slots.find(desc).is_some()
    }

    /// Binds the host texture for `desc`, creating or re-uploading it as needed.
    ///
    /// Fails if the descriptor is larger than [`MAX_TEXTURE_BYTES`] or the texel or palette bytes
    /// cannot be read from guest memory; the cache is left untouched in that case.
    pub fn bind_or_create(
        &mut self,
        desc: &TextureDescriptor,
        memory: &dyn GuestMemory,
        backend: &mut dyn HostBackend,
        stats: &RendererStats,
        now: u64,
    ) -> Result<TextureBinding, GuestMemoryError> {
        let Some(len) = desc.data_len() else {
            return Err(GuestMemoryError {
                addr: desc.data_addr,
                len: usize::MAX,
            });
        };
        let mut texels = vec![0u8; len];
        memory.read(desc.data_addr, &mut texels)?;
        let palette = match desc.palette_len() {
            Some(len) => {
                let mut palette = vec![0u8; len];
                memory.read(desc.palette_addr, &mut palette)?;
                Some(palette)
            }
            None => None,
        };
        let hash = match self.policy {
            UploadPolicy::Always => None,
            UploadPolicy::ContentHash => Some(content_hash(&texels, palette.as_deref())),
        };

        if let Some(index) = self.slots.find(desc) {
            self.slots.touch(index, now);
            if let Some(cached) = self.slots.get_mut(index) {
                stats.inc_texture_hits();
                let changed = match (hash, cached.hash) {
                    (Some(new), Some(old)) => new != old,
                    _ => true,
                };
                let handle = cached.handle;
                if !changed {
                    stats.inc_texture_uploads_skipped();
                    trace!(handle = handle.0, "texture unchanged");
                    return Ok(TextureBinding {
                        handle,
                        outcome: BindOutcome::Unchanged,
                    });
                }
                cached.hash = hash;
                backend.upload_texture(handle, desc, &texels, palette.as_deref());
                stats.inc_texture_uploads();
                return Ok(TextureBinding {
                    handle,
                    outcome: BindOutcome::Reuploaded,
                });
            }
        }

        stats.inc_texture_misses();
        let victim = if self.slots.is_full() {
            self.slots.lru_index(now)
        } else {
            None
        };
        let (handle, outcome) = match victim {
            Some(victim) => {
                debug!(
                    slot = victim,
                    last_used = self.slots.last_used(victim),
                    now,
                    "evicting texture"
                );
                self.slots.reassign(victim, *desc, now);
                let handle = match self.slots.get_mut(victim) {
                    Some(cached) => {
                        cached.hash = hash;
                        cached.handle
                    }
                    None => unreachable!("victim index comes from the slot list"),
                };
                backend.configure_texture(handle, desc);
                stats.inc_texture_evictions();
                (handle, BindOutcome::Evicted)
            }
            None => {
                let handle = backend.create_texture(desc);
                self.slots.push(*desc, CachedTexture { handle, hash }, now);
                (handle, BindOutcome::Created)
            }
        };
        backend.upload_texture(handle, desc, &texels, palette.as_deref());
        stats.inc_texture_uploads();
        Ok(TextureBinding { handle, outcome })
    }
}
