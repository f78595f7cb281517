//! Operand field decoding: register banks, swizzles and source modifiers.

use std::fmt;

use crate::types::{OperandFlags, RegisterBank, Swizzle4, SwizzleChannel};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Operand {
    pub bank: RegisterBank,
    pub num: u32,
    pub swizzle: Swizzle4,
    pub flags: OperandFlags,
}

impl Operand {
    pub fn new(bank: RegisterBank, num: u32) -> Self {
        Self {
            bank,
            num,
            swizzle: Swizzle4::IDENTITY,
            flags: OperandFlags::empty(),
        }
    }

    pub fn with_swizzle(mut self, swizzle: Swizzle4) -> Self {
        self.swizzle = swizzle;
        self
    }

    pub fn with_flags(mut self, flags: OperandFlags) -> Self {
        self.flags = flags;
        self
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.flags.contains(OperandFlags::NEGATIVE) {
            f.write_str("-")?;
        }
        if self.flags.contains(OperandFlags::ABSOLUTE) {
            f.write_str("|")?;
        }
        write!(f, "{}{}", self.bank.prefix(), self.num)?;
        if !self.swizzle.is_identity() {
            write!(f, ".{}", self.swizzle)?;
        }
        if self.flags.contains(OperandFlags::ABSOLUTE) {
            f.write_str("|")?;
        }
        Ok(())
    }
}

/// Which bank-select encoding an operand slot uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BankEncoding {
    /// Two select bits plus extension, destination form.
    Dest,
    /// One select bit plus extension.
    Src0,
    /// Two select bits plus extension, source 1/2 form.
    Src12,
}

pub fn decode_bank(encoding: BankEncoding, sel: u64, ext: bool) -> RegisterBank {
    match (encoding, ext, sel & 0b11) {
        // Select 3 addresses the first index bank regardless of the extension bit.
        (BankEncoding::Dest, _, 3) => RegisterBank::Indexed1,
        (BankEncoding::Dest, false, 0) => RegisterBank::Temp,
        (BankEncoding::Dest, false, 1) => RegisterBank::Output,
        (BankEncoding::Dest, false, _) => RegisterBank::PrimAttr,
        (BankEncoding::Dest, true, 0) => RegisterBank::SecAttr,
        (BankEncoding::Dest, true, 1) => RegisterBank::Special,
        (BankEncoding::Dest, true, _) => RegisterBank::Index,

        (BankEncoding::Src0, false, s) if s & 1 == 0 => RegisterBank::Temp,
        (BankEncoding::Src0, false, _) => RegisterBank::PrimAttr,
        (BankEncoding::Src0, true, s) if s & 1 == 0 => RegisterBank::Output,
        (BankEncoding::Src0, true, _) => RegisterBank::SecAttr,

        (BankEncoding::Src12, false, 0) => RegisterBank::Temp,
        (BankEncoding::Src12, false, 1) => RegisterBank::Output,
        (BankEncoding::Src12, false, 2) => RegisterBank::PrimAttr,
        (BankEncoding::Src12, false, _) => RegisterBank::SecAttr,
        (BankEncoding::Src12, true, 0) => RegisterBank::Indexed1,
        (BankEncoding::Src12, true, 1) => RegisterBank::Special,
        (BankEncoding::Src12, true, 2) => RegisterBank::Immediate,
        (BankEncoding::Src12, true, _) => RegisterBank::Indexed2,
    }
}

const SPECIAL_GLOBAL_FLAG: u32 = 0x40;

/// Builds a register operand and applies the bank fixups.
///
/// The top temporaries of the register file alias the internal registers, and special registers
/// split into globals and constants on bit 6 of the register number.
pub fn register(bank: RegisterBank, num: u32, num_bits: u32) -> Operand {
    const INTERNAL_REGS: u32 = 4;

    let limit = (1u32 << num_bits.min(31)).saturating_sub(INTERNAL_REGS);
    match bank {
        RegisterBank::Temp if num >= limit => Operand::new(RegisterBank::FpInternal, num - limit),
        RegisterBank::Special if num & SPECIAL_GLOBAL_FLAG != 0 => {
            Operand::new(RegisterBank::Global, num & !SPECIAL_GLOBAL_FLAG)
        }
        RegisterBank::Special => Operand::new(RegisterBank::FpConstant, num),
        _ => Operand::new(bank, num),
    }
}

pub fn decode_modifier(bits: u64) -> OperandFlags {
    match bits & 0b11 {
        1 => OperandFlags::NEGATIVE,
        2 => OperandFlags::ABSOLUTE,
        3 => OperandFlags::NEGATIVE | OperandFlags::ABSOLUTE,
        _ => OperandFlags::empty(),
    }
}

/// Three bits per channel, `x` in the low bits.
pub fn decode_swizzle4(encoded: u64) -> Swizzle4 {
    let channel = |i: u32| SwizzleChannel::from_bits((encoded >> (3 * i)) as u32);
    Swizzle4([channel(0), channel(1), channel(2), channel(3)])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwizzleWidth {
    Scalar,
    Vec3,
    Vec4,
}

use SwizzleChannel::{Half as H, One as I, Two as T, Undefined as U, Zero as O, W, X, Y, Z};

const VEC4_STD: [[SwizzleChannel; 4]; 16] = [
    [X, X, X, X],
    [Y, Y, Y, Y],
    [Z, Z, Z, Z],
    [W, W, W, W],
    [X, Y, Z, W],
    [Y, Z, W, W],
    [X, Y, Z, Z],
    [X, X, Y, Z],
    [X, Y, X, Y],
    [X, Y, W, Z],
    [Z, X, Y, W],
    [Z, W, Z, W],
    [Y, Z, X, Z],
    [X, X, Y, Y],
    [X, Z, W, W],
    [X, Y, Z, I],
];

const VEC4_EXT: [[SwizzleChannel; 4]; 16] = [
    [Y, Z, X, W],
    [Z, W, X, Y],
    [X, Z, W, Y],
    [Y, Y, W, W],
    [W, Y, Z, W],
    [W, Z, W, Z],
    [X, Y, Z, X],
    [Z, Z, W, W],
    [X, W, Z, X],
    [Y, Y, Y, X],
    [Y, Y, Y, Z],
    [X, Z, Y, W],
    [X, X, X, Y],
    [Z, Y, X, W],
    [Y, Y, Z, Z],
    [Z, Z, Z, Y],
];

const VEC3_STD: [[SwizzleChannel; 3]; 16] = [
    [X, X, X],
    [Y, Y, Y],
    [Z, Z, Z],
    [W, W, W],
    [X, Y, Z],
    [Y, Z, W],
    [X, X, Y],
    [X, Y, X],
    [Y, Y, X],
    [Y, Y, Z],
    [Z, X, Y],
    [X, Z, Y],
    [Y, Z, X],
    [Z, Y, X],
    [Z, Z, Y],
    [X, Y, I],
];

const VEC3_EXT: [[SwizzleChannel; 3]; 16] = [
    [X, Y, Y],
    [Y, X, Y],
    [X, X, Z],
    [Y, X, X],
    [X, Y, O],
    [X, I, O],
    [O, O, O],
    [I, I, I],
    [H, H, H],
    [T, T, T],
    [X, O, O],
    [U, U, U],
    [U, U, U],
    [U, U, U],
    [U, U, U],
    [U, U, U],
];

const SCALAR_STD: [SwizzleChannel; 16] = [X, Y, Z, W, O, I, T, H, U, U, U, U, U, U, U, U];

/// Decodes the 4-bit table swizzle used by the vector ALU encodings.
pub fn decode_vec34_swizzle(index: u64, extended: bool, width: SwizzleWidth) -> Swizzle4 {
    let index = (index & 0xF) as usize;
    match (width, extended) {
        (SwizzleWidth::Scalar, true) => Swizzle4::UNDEFINED,
        (SwizzleWidth::Scalar, false) => Swizzle4([SCALAR_STD[index]; 4]),
        (SwizzleWidth::Vec3, ext) => {
            let [a, b, c] = if ext { VEC3_EXT[index] } else { VEC3_STD[index] };
            // The fourth lane of a vec3 swizzle reads x.
            Swizzle4([a, b, c, X])
        }
        (SwizzleWidth::Vec4, false) => Swizzle4(VEC4_STD[index]),
        (SwizzleWidth::Vec4, true) => Swizzle4(VEC4_EXT[index]),
    }
}
