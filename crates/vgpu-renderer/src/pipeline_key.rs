//! Pipeline cache keys.
//!
//! Programs are identified by the BLAKE3 hash of their bytecode; a pipeline key is an xxh3 over
//! both program hashes plus the render state that changes generated code. Two draws with the same
//! key can share a compiled pipeline.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use xxhash_rust::xxh3::Xxh3;

use crate::command::{state, RenderState};
use crate::surface_cache::SurfaceFormat;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Shader bytecode fetched from guest memory.
#[derive(Clone, PartialEq, Eq)]
pub struct ProgramBinary {
    stage: ShaderStage,
    words: Arc<[u64]>,
    hash: blake3::Hash,
}

impl ProgramBinary {
    pub fn new(stage: ShaderStage, words: Vec<u64>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for word in &words {
            hasher.update(&word.to_le_bytes());
        }
        Self {
            stage,
            words: words.into(),
            hash: hasher.finalize(),
        }
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn hash(&self) -> &blake3::Hash {
        &self.hash
    }
}

impl fmt::Debug for ProgramBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramBinary")
            .field("stage", &self.stage)
            .field("words", &self.words.len())
            .field("hash", &self.hash.to_hex())
            .finish()
    }
}

/// The part of the render state baked into generated shader code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PipelineState {
    pub blend: u32,
    pub color_mask: u32,
    pub fragment_program_enable: u32,
    pub color_format: Option<SurfaceFormat>,
}

impl PipelineState {
    pub fn from_render_state(render: &RenderState, color_format: Option<SurfaceFormat>) -> Self {
        Self {
            blend: render.get(state::BLEND),
            color_mask: render.get(state::COLOR_MASK),
            fragment_program_enable: render.get(state::FRAGMENT_PROGRAM_ENABLE),
            color_format,
        }
    }

    fn hash_into(&self, hasher: &mut Xxh3) {
        hasher.update(&self.blend.to_le_bytes());
        hasher.update(&self.color_mask.to_le_bytes());
        hasher.update(&self.fragment_program_enable.to_le_bytes());
        let format = self.color_format.map_or(u32::MAX, |format| format as u32);
        hasher.update(&format.to_le_bytes());
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineKey(pub u64);

impl fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Everything needed to build one pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineDescriptor {
    pub vertex: ProgramBinary,
    pub fragment: ProgramBinary,
    pub state: PipelineState,
}

impl PipelineDescriptor {
    pub fn key(&self) -> PipelineKey {
        let mut hasher = Xxh3::new();
        hasher.update(self.vertex.hash.as_bytes());
        hasher.update(self.fragment.hash.as_bytes());
        self.state.hash_into(&mut hasher);
        PipelineKey(hasher.digest())
    }
}
