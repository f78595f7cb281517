//! Decoding a single instruction word into its normalized form.

use thiserror::Error;

use crate::matcher::Matcher;
use crate::operand::{
    decode_bank, decode_modifier, decode_swizzle4, decode_vec34_swizzle, register, BankEncoding,
    Operand, SwizzleWidth,
};
use crate::table::{lookup, InstructionKind};
use crate::types::{ExtPredicate, InstructionFlags, OperandFlags, RegisterBank, ShortPredicate};

/// Instruction offset within a program, in 64-bit words.
pub type Offset = u32;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("no instruction matches word {word:#018x} at offset {offset}")]
pub struct DecodeError {
    pub offset: Offset,
    pub word: u64,
}

/// Operand slots by role. The destination may be absent (branches, control instructions) and
/// any subset of the sources may be used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Operands {
    pub dest: Option<Operand>,
    pub src0: Option<Operand>,
    pub src1: Option<Operand>,
    pub src2: Option<Operand>,
}

impl Operands {
    pub fn iter(&self) -> impl Iterator<Item = &Operand> {
        [&self.dest, &self.src0, &self.src1, &self.src2]
            .into_iter()
            .flatten()
    }

    pub fn sources(&self) -> impl Iterator<Item = &Operand> {
        [&self.src0, &self.src1, &self.src2].into_iter().flatten()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub offset: Offset,
    pub word: u64,
    pub kind: InstructionKind,
    pub predicate: ExtPredicate,
    pub flags: InstructionFlags,
    /// Destination write mask; zero for instructions without a masked destination.
    pub dest_mask: u8,
    pub operands: Operands,
    matcher: &'static Matcher,
}

impl Instruction {
    /// Raw value of a template field, for anything the normalized form does not cover.
    pub fn field(&self, symbol: u8) -> Option<u64> {
        self.matcher.field(self.word, symbol)
    }

    pub fn matcher(&self) -> &'static Matcher {
        self.matcher
    }

    pub fn is_branch(&self) -> bool {
        self.kind == InstructionKind::Br
    }

    pub fn is_kill(&self) -> bool {
        self.kind == InstructionKind::Kill
    }

    /// Absolute target of a branch.
    ///
    /// The 20-bit offset is two's complement and relative to the branch itself. Returns `None`
    /// for non-branches and for targets before the start of the program.
    pub fn branch_target(&self) -> Option<Offset> {
        if !self.is_branch() {
            return None;
        }
        let raw = self.field(b'o')? as u32;
        let relative = ((raw << 12) as i32) >> 12;
        self.offset.checked_add_signed(relative)
    }

    /// Predicate register written by a test instruction.
    pub fn predicate_write(&self) -> Option<u8> {
        if !self.kind.writes_predicate() {
            return None;
        }
        // Both test encodings place the destination predicate at bits 34..=35.
        Some(((self.word >> 34) & 0b11) as u8)
    }

    /// Mnemonic including the sub-operation for encodings that select one.
    pub fn mnemonic(&self) -> &'static str {
        const VOP_F32: [&str; 8] = [
            "VMUL", "VADD", "VFRC", "VDSX", "VDSY", "VMIN", "VMAX", "VDP",
        ];
        const VOP_F16: [&str; 8] = [
            "VF16MUL", "VF16ADD", "VF16FRC", "VF16DSX", "VF16DSY", "VF16MIN", "VF16MAX", "VF16DP",
        ];
        let op2 = self.field(b'g').unwrap_or(0) as usize & 0b111;
        match self.kind {
            InstructionKind::Vnmad32 => VOP_F32[op2],
            InstructionKind::Vnmad16 => VOP_F16[op2],
            kind => kind.name(),
        }
    }
}

/// Decodes the word at `offset`.
pub fn decode(offset: Offset, word: u64) -> Result<Instruction, DecodeError> {
    let matcher = lookup(word).ok_or(DecodeError { offset, word })?;
    let fields = Fields { matcher, word };
    let kind = matcher.kind();

    Ok(Instruction {
        offset,
        word,
        kind,
        predicate: predicate(kind, &fields),
        flags: flags(kind, &fields),
        dest_mask: dest_mask(kind, &fields),
        operands: operands(kind, &fields),
        matcher,
    })
}

struct Fields {
    matcher: &'static Matcher,
    word: u64,
}

impl Fields {
    fn get(&self, symbol: u8) -> u64 {
        self.matcher.field(self.word, symbol).unwrap_or(0)
    }

    fn bit(&self, symbol: u8) -> bool {
        self.get(symbol) != 0
    }

    fn width(&self, symbol: u8) -> u32 {
        self.matcher
            .field_info(symbol)
            .map(|f| f.width())
            .unwrap_or(0)
    }

    /// Register operand whose bank comes from a select field plus optional extension bit.
    fn reg(&self, num: u8, encoding: BankEncoding, sel: u8, ext: Option<u8>) -> Operand {
        let ext = ext.is_some_and(|symbol| self.bit(symbol));
        let bank = decode_bank(encoding, self.get(sel), ext);
        register(bank, self.get(num) as u32, self.width(num))
    }

    /// Register operand in a fixed bank.
    fn fixed(&self, num: u8, bank: RegisterBank) -> Operand {
        register(bank, self.get(num) as u32, self.width(num))
    }
}

fn predicate(kind: InstructionKind, f: &Fields) -> ExtPredicate {
    use InstructionKind::*;

    match kind {
        Vmov | Vmad | Vnmad32 | Vnmad16 | Vpck | Vtst | Vtstmsk | Vbw | Br | Smp | Vcomp | Vdp
        | Vldst => ExtPredicate::from_bits(f.get(b'p') as u8),
        // Only the low two extended-predicate encodings fit.
        Vmad2 => ExtPredicate::from_bits((f.get(b'p') & 0b11) as u8),
        Sop2 | Kill => ShortPredicate::from_bits(f.get(b'p') as u8).into(),
        Vdual => match f.get(b's') & 0b11 {
            0 => ExtPredicate::None,
            1 => ExtPredicate::P0,
            2 => ExtPredicate::NegP0,
            _ => ExtPredicate::Pn,
        },
        Phas | Nop | Smlsi | Spec => ExtPredicate::None,
    }
}

fn flags(kind: InstructionKind, f: &Fields) -> InstructionFlags {
    use InstructionKind::*;

    // (skipinv, nosched, syncstart, end)
    let symbols: [Option<u8>; 4] = match kind {
        Vmov => [Some(b's'), Some(b'n'), Some(b'y'), None],
        Vmad => [Some(b's'), Some(b'n'), None, Some(b'e')],
        Vmad2 => [Some(b's'), Some(b'n'), Some(b'y'), None],
        Vnmad32 | Vnmad16 => [Some(b's'), Some(b'n'), Some(b'y'), None],
        Vpck => [Some(b's'), Some(b'n'), Some(b'y'), Some(b'e')],
        Sop2 => [Some(b's'), Some(b'n'), None, Some(b'e')],
        Vtst | Vtstmsk => [Some(b's'), None, Some(b'y'), None],
        Vbw => [Some(b's'), Some(b'n'), Some(b'y'), Some(b'e')],
        Br => [None, Some(b'n'), None, None],
        Smp => [Some(b's'), Some(b'n'), Some(b'y'), None],
        Smlsi => [None, Some(b'n'), None, None],
        Vcomp => [Some(b's'), Some(b'o'), Some(b'y'), Some(b'n')],
        Vdp => [Some(b's'), Some(b'n'), None, Some(b'e')],
        Vdual => [Some(b'k'), None, None, None],
        Vldst => [Some(b's'), Some(b'n'), Some(b'y'), None],
        Phas | Nop | Kill | Spec => [None; 4],
    };

    let mut out = InstructionFlags::empty();
    for (symbol, flag) in symbols.into_iter().zip([
        InstructionFlags::SKIPINV,
        InstructionFlags::NOSCHED,
        InstructionFlags::SYNCSTART,
        InstructionFlags::END,
    ]) {
        if symbol.is_some_and(|s| f.bit(s)) {
            out |= flag;
        }
    }
    out
}

fn dest_mask(kind: InstructionKind, f: &Fields) -> u8 {
    use InstructionKind::*;

    let symbol = match kind {
        Vmov => b'h',
        Vmad | Vcomp | Vdp => b'w',
        Vmad2 | Vnmad32 | Vnmad16 => b'e',
        Vpck => b'm',
        _ => return 0,
    };
    f.get(symbol) as u8
}

fn operands(kind: InstructionKind, f: &Fields) -> Operands {
    use BankEncoding::{Dest, Src0, Src12};
    use InstructionKind::*;

    match kind {
        Vmov => {
            // Unconditional moves only read source 1.
            let conditional = f.get(b'm') != 0;
            Operands {
                dest: Some(f.reg(b'j', Dest, b'l', Some(b'd'))),
                src0: conditional.then(|| f.reg(b'q', Src0, b'k', Some(b'e'))),
                src1: Some(
                    f.reg(b'u', Src12, b'f', Some(b'c'))
                        .with_swizzle(decode_vec34_swizzle(f.get(b'w'), false, SwizzleWidth::Vec4)),
                ),
                src2: conditional.then(|| f.reg(b'v', Src12, b'g', Some(b'b'))),
            }
        }
        Vmad => {
            let src0_flags = flag_bits(f.bit(b'c'), f.bit(b'b'));
            Operands {
                dest: Some(f.reg(b'm', Dest, b'k', Some(b'd'))),
                src0: Some(
                    f.reg(b'B', Src12, b'j', Some(b'r'))
                        .with_swizzle(decode_vec34_swizzle(
                            f.get(b'A'),
                            f.bit(b'y'),
                            SwizzleWidth::Vec4,
                        ))
                        .with_flags(src0_flags),
                ),
                src1: Some(
                    f.fixed(b'l', RegisterBank::FpInternal)
                        .with_swizzle(decode_vec34_swizzle(
                            f.get(b'q'),
                            f.bit(b'z'),
                            SwizzleWidth::Vec4,
                        ))
                        .with_flags(flag_bits(f.bit(b'x'), f.bit(b'a'))),
                ),
                src2: Some(
                    f.fixed(b'v', RegisterBank::FpInternal)
                        .with_swizzle(decode_vec34_swizzle(
                            f.get(b'u'),
                            f.bit(b'g'),
                            SwizzleWidth::Vec4,
                        ))
                        .with_flags(flag_bits(f.bit(b'f'), f.bit(b'h'))),
                ),
            }
        }
        Vmad2 => Operands {
            dest: Some(f.reg(b'h', Dest, b't', None)),
            src0: Some(
                f.reg(b'l', Src0, b'k', None)
                    .with_flags(flag_bits(false, f.bit(b'c'))),
            ),
            src1: Some(f.reg(b'q', Src12, b'f', Some(b'b')).with_flags(decode_modifier(f.get(b'm')))),
            src2: Some(f.reg(b'u', Src12, b'g', Some(b'a')).with_flags(decode_modifier(f.get(b'o')))),
        },
        Vnmad32 | Vnmad16 => {
            let src1_swizzle = f.get(b'z') | f.get(b'i') << 7 | f.get(b'c') << 9 | f.get(b'r') << 10;
            Operands {
                dest: Some(f.reg(b'f', Dest, b't', Some(b'd'))),
                src0: None,
                src1: Some(
                    f.reg(b'h', Src12, b'k', Some(b'b'))
                        .with_swizzle(decode_swizzle4(src1_swizzle))
                        .with_flags(decode_modifier(f.get(b'm'))),
                ),
                src2: Some(
                    f.reg(b'j', Src12, b'l', Some(b'a'))
                        .with_swizzle(decode_vec34_swizzle(f.get(b'w'), false, SwizzleWidth::Vec4))
                        .with_flags(flag_bits(false, f.bit(b'o'))),
                ),
            }
        }
        Vpck => Operands {
            dest: Some(f.reg(b'g', Dest, b'b', Some(b'd'))),
            src0: None,
            src1: Some(f.reg(b'q', Src12, b'k', Some(b'r'))),
            src2: Some(f.reg(b'w', Src12, b'l', Some(b'c'))),
        },
        Sop2 => Operands {
            dest: Some(f.reg(b'q', Dest, b't', Some(b'd'))),
            src0: None,
            src1: Some(f.reg(b'z', Src12, b'k', Some(b'r'))),
            src2: Some(f.reg(b'A', Src12, b'j', Some(b'b'))),
        },
        Vtst => Operands {
            dest: Some(f.reg(b'g', Dest, b'b', Some(b'd'))),
            src0: None,
            src1: Some(
                f.reg(b'j', Src12, b'k', Some(b'c'))
                    .with_flags(flag_bits(f.bit(b'r'), false)),
            ),
            src2: Some(f.reg(b'q', Src12, b'f', Some(b'e'))),
        },
        Vtstmsk => Operands {
            dest: Some(f.reg(b'f', Dest, b'b', Some(b'd'))),
            src0: None,
            src1: Some(f.reg(b'h', Src12, b'n', Some(b'r'))),
            src2: Some(f.reg(b'j', Src12, b'k', Some(b'c'))),
        },
        Vbw => Operands {
            dest: Some(f.reg(b'j', Dest, b'k', Some(b'd'))),
            src0: None,
            src1: Some(f.reg(b'q', Src12, b'f', Some(b'c'))),
            src2: Some(f.reg(b'u', Src12, b'g', Some(b'x'))),
        },
        Smp => {
            let dest_bank = if f.bit(b't') {
                RegisterBank::PrimAttr
            } else {
                RegisterBank::Temp
            };
            Operands {
                dest: Some(f.fixed(b'o', dest_bank)),
                src0: Some(f.reg(b'q', Src0, b'k', Some(b'r'))),
                src1: Some(f.reg(b'u', Src12, b'i', Some(b'c'))),
                src2: Some(f.reg(b'v', Src12, b'j', Some(b'e'))),
            }
        }
        Vcomp => Operands {
            dest: Some(f.reg(b'g', Dest, b't', Some(b'e'))),
            src0: None,
            src1: Some(f.reg(b'h', Src12, b'k', Some(b'r')).with_flags(decode_modifier(f.get(b'm')))),
            src2: None,
        },
        Vdp => {
            let src0_swizzle = f.get(b'x') | f.get(b'y') << 3 | f.get(b'q') << 6 | f.get(b'm') << 9;
            Operands {
                dest: Some(f.reg(b'j', Dest, b't', Some(b'd'))),
                src0: Some(
                    f.reg(b'u', Src12, b'k', Some(b'r'))
                        .with_swizzle(decode_swizzle4(src0_swizzle))
                        .with_flags(flag_bits(f.bit(b'b'), f.bit(b'f'))),
                ),
                src1: Some(
                    f.fixed(b'h', RegisterBank::FpInternal)
                        .with_swizzle(decode_vec34_swizzle(f.get(b'z'), false, SwizzleWidth::Vec4))
                        .with_flags(flag_bits(false, f.bit(b'g'))),
                ),
                src2: None,
            }
        }
        Vldst => {
            let dest_bank = if f.bit(b't') {
                RegisterBank::PrimAttr
            } else {
                RegisterBank::Temp
            };
            Operands {
                dest: Some(f.fixed(b'v', dest_bank)),
                src0: Some(f.reg(b'w', Src0, b'h', Some(b'r'))),
                src1: Some(f.reg(b'x', Src12, b'q', Some(b'b'))),
                src2: Some(f.reg(b'z', Src12, b'u', Some(b'a'))),
            }
        }
        // Dual-issue operand routing depends on the op pair; it is left to the code generator
        // through the raw fields.
        Vdual | Phas | Nop | Br | Smlsi | Kill | Spec => Operands::default(),
    }
}

fn flag_bits(negative: bool, absolute: bool) -> OperandFlags {
    let mut flags = OperandFlags::empty();
    flags.set(OperandFlags::NEGATIVE, negative);
    flags.set(OperandFlags::ABSOLUTE, absolute);
    flags
}
