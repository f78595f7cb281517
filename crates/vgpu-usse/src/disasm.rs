//! Text rendering of decoded instructions and block listings.

use std::fmt::{self, Write as _};

use crate::analyzer::AnalyzedProgram;
use crate::instruction::Instruction;
use crate::types::InstructionFlags;

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.predicate.is_none() {
            write!(f, "{} ", self.predicate)?;
        }
        f.write_str(self.mnemonic())?;
        for (flag, suffix) in [
            (InstructionFlags::SKIPINV, ".skipinv"),
            (InstructionFlags::NOSCHED, ".nosched"),
            (InstructionFlags::SYNCSTART, ".syncstart"),
            (InstructionFlags::END, ".end"),
        ] {
            if self.flags.contains(flag) {
                f.write_str(suffix)?;
            }
        }

        let mut first = true;
        for operand in self.operands.iter() {
            f.write_str(if first { " " } else { ", " })?;
            first = false;
            write!(f, "{operand}")?;
        }
        if let Some(target) = self.branch_target() {
            write!(f, " #{target}")?;
        }
        if self.dest_mask != 0 && self.dest_mask != 0xF {
            write!(f, " (mask {:04b})", self.dest_mask)?;
        }
        Ok(())
    }
}

/// Renders every word of the program, one per line: offset, raw word, then the instruction or a
/// decode error marker.
pub fn disassemble(program: &AnalyzedProgram) -> String {
    let mut out = String::new();
    for (offset, inst) in program.instructions().iter().enumerate() {
        match inst {
            Ok(inst) => {
                let _ = writeln!(out, "{offset:5}: {:016x}  {inst}", inst.word);
            }
            Err(err) => {
                let _ = writeln!(out, "{offset:5}: {:016x}  <unknown>", err.word);
            }
        }
    }
    out
}

/// Renders the block list of the program.
pub fn block_listing(program: &AnalyzedProgram) -> String {
    let mut out = String::new();
    for block in program.blocks() {
        let _ = write!(out, "block {} +{}", block.offset, block.size);
        if !block.predicate.is_none() {
            let _ = write!(out, " if {}", block.predicate);
        }
        if let Some(link) = block.link {
            let _ = write!(out, " -> {link}");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::table::{entry, InstructionKind};

    #[test]
    fn renders_predicate_mnemonic_and_operands() {
        let word = entry(InstructionKind::Vmov)
            .encode(&[(b'p', 5), (b'j', 2), (b'u', 1), (b'w', 4), (b'h', 0b0011), (b'e', 0)])
            .unwrap();
        let program = analyze(&[word]);
        let inst = program.instruction(0).unwrap();
        assert_eq!(inst.to_string(), "!p0 VMOV r2, r1 (mask 0011)");
    }

    #[test]
    fn renders_branch_target() {
        let word = entry(InstructionKind::Br).encode(&[(b'o', 2)]).unwrap();
        let program = analyze(&[word]);
        assert_eq!(program.instruction(0).unwrap().to_string(), "BR #2");
    }

    #[test]
    fn listing_marks_unknown_words() {
        let program = analyze(&[0xD800_0000_0000_0000]);
        assert!(disassemble(&program).contains("<unknown>"));
        assert_eq!(block_listing(&program), "block 0 +0\nblock 1 +0\n");
    }
}
