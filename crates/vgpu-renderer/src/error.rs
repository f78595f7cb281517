use thiserror::Error;

use crate::command::Opcode;
use crate::pipeline_key::ShaderStage;

/// A command that could not be turned into a typed command. The processor logs and skips it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command opcode 0x{0:04x}")]
    UnknownOpcode(u16),
    #[error("truncated {opcode:?} payload: need {needed} bytes, have {actual}")]
    TruncatedPayload {
        opcode: Opcode,
        needed: usize,
        actual: usize,
    },
    #[error("{opcode:?}: invalid {field} {value}")]
    InvalidField {
        opcode: Opcode,
        field: &'static str,
        value: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("guest memory access out of bounds: addr=0x{addr:x}, len=0x{len:x}")]
pub struct GuestMemoryError {
    pub addr: u64,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("command queue is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("{0:?} program is empty")]
    EmptyProgram(ShaderStage),
    #[error("backend rejected pipeline: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid renderer config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0} must be > 0")]
    Zero(&'static str),
}
