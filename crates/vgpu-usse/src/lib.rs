//! Shader front-end for the guest GPU's unified shader instruction set.
//!
//! Instructions are fixed-width 64-bit words. Decoding is table driven (see [`table`]): each
//! entry is a bitstring template compiled into a mask/expect pair plus operand field extractors,
//! and the first matching entry wins. [`analyze`] decodes a whole program and splits it into
//! predicate-uniform control-flow blocks for the code generator.

pub mod analyzer;
pub mod disasm;
pub mod instruction;
pub mod matcher;
pub mod operand;
pub mod table;
pub mod types;

pub use analyzer::{analyze, AnalyzedProgram, Block};
pub use instruction::{decode, DecodeError, Instruction, Offset, Operands};
pub use matcher::{Field, Matcher};
pub use operand::Operand;
pub use table::{InstructionKind, TABLE};
pub use types::{
    ExtPredicate, InstructionFlags, OperandFlags, RegisterBank, ShortPredicate, Swizzle4,
    SwizzleChannel,
};

/// Reinterprets little-endian program bytes as instruction words.
///
/// Trailing bytes that do not form a whole word are ignored.
pub fn words_from_le_bytes(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            u64::from_le_bytes(word)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_from_bytes_drops_partial_tail() {
        let mut bytes = 0x0800_0000_0000_0001u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(words_from_le_bytes(&bytes), vec![0x0800_0000_0000_0001]);
    }
}
