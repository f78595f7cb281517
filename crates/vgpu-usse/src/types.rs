use std::fmt;

use bitflags::bitflags;
use serde::Serialize;

/// Three-bit predicate selector carried by most instructions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ExtPredicate {
    #[default]
    None = 0,
    P0 = 1,
    P1 = 2,
    P2 = 3,
    P3 = 4,
    NegP0 = 5,
    NegP1 = 6,
    /// Per-instance predicate.
    Pn = 7,
}

impl ExtPredicate {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0 => ExtPredicate::None,
            1 => ExtPredicate::P0,
            2 => ExtPredicate::P1,
            3 => ExtPredicate::P2,
            4 => ExtPredicate::P3,
            5 => ExtPredicate::NegP0,
            6 => ExtPredicate::NegP1,
            _ => ExtPredicate::Pn,
        }
    }

    pub fn is_none(self) -> bool {
        self == ExtPredicate::None
    }

    /// The predicate register this selector reads, if any.
    pub fn register(self) -> Option<u8> {
        match self {
            ExtPredicate::P0 | ExtPredicate::NegP0 => Some(0),
            ExtPredicate::P1 | ExtPredicate::NegP1 => Some(1),
            ExtPredicate::P2 => Some(2),
            ExtPredicate::P3 => Some(3),
            ExtPredicate::None | ExtPredicate::Pn => None,
        }
    }

    pub fn is_negated(self) -> bool {
        matches!(self, ExtPredicate::NegP0 | ExtPredicate::NegP1)
    }
}

impl fmt::Display for ExtPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtPredicate::None => "",
            ExtPredicate::P0 => "p0",
            ExtPredicate::P1 => "p1",
            ExtPredicate::P2 => "p2",
            ExtPredicate::P3 => "p3",
            ExtPredicate::NegP0 => "!p0",
            ExtPredicate::NegP1 => "!p1",
            ExtPredicate::Pn => "pn",
        };
        f.write_str(s)
    }
}

/// Two-bit predicate selector used by the compact encodings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ShortPredicate {
    #[default]
    None,
    P0,
    P1,
    NegP0,
}

impl ShortPredicate {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => ShortPredicate::None,
            1 => ShortPredicate::P0,
            2 => ShortPredicate::P1,
            _ => ShortPredicate::NegP0,
        }
    }
}

impl From<ShortPredicate> for ExtPredicate {
    fn from(pred: ShortPredicate) -> Self {
        match pred {
            ShortPredicate::None => ExtPredicate::None,
            ShortPredicate::P0 => ExtPredicate::P0,
            ShortPredicate::P1 => ExtPredicate::P1,
            ShortPredicate::NegP0 => ExtPredicate::NegP0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum RegisterBank {
    Temp,
    PrimAttr,
    Output,
    SecAttr,
    FpInternal,
    Special,
    Global,
    FpConstant,
    Immediate,
    Index,
    Indexed1,
    Indexed2,
    Predicate,
}

impl RegisterBank {
    pub fn prefix(self) -> &'static str {
        match self {
            RegisterBank::Temp => "r",
            RegisterBank::PrimAttr => "pa",
            RegisterBank::Output => "o",
            RegisterBank::SecAttr => "sa",
            RegisterBank::FpInternal => "i",
            RegisterBank::Special => "sp",
            RegisterBank::Global => "g",
            RegisterBank::FpConstant => "c",
            RegisterBank::Immediate => "#",
            RegisterBank::Index => "idx",
            RegisterBank::Indexed1 => "idx1_",
            RegisterBank::Indexed2 => "idx2_",
            RegisterBank::Predicate => "p",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum SwizzleChannel {
    X,
    Y,
    Z,
    W,
    Zero,
    One,
    Two,
    Half,
    Undefined,
}

impl SwizzleChannel {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0b111 {
            0 => SwizzleChannel::X,
            1 => SwizzleChannel::Y,
            2 => SwizzleChannel::Z,
            3 => SwizzleChannel::W,
            4 => SwizzleChannel::Zero,
            5 => SwizzleChannel::One,
            6 => SwizzleChannel::Two,
            _ => SwizzleChannel::Half,
        }
    }

    fn as_char(self) -> char {
        match self {
            SwizzleChannel::X => 'x',
            SwizzleChannel::Y => 'y',
            SwizzleChannel::Z => 'z',
            SwizzleChannel::W => 'w',
            SwizzleChannel::Zero => '0',
            SwizzleChannel::One => '1',
            SwizzleChannel::Two => '2',
            SwizzleChannel::Half => 'h',
            SwizzleChannel::Undefined => '?',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Swizzle4(pub [SwizzleChannel; 4]);

impl Swizzle4 {
    pub const IDENTITY: Swizzle4 = Swizzle4([
        SwizzleChannel::X,
        SwizzleChannel::Y,
        SwizzleChannel::Z,
        SwizzleChannel::W,
    ]);
    pub const UNDEFINED: Swizzle4 = Swizzle4([SwizzleChannel::Undefined; 4]);

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for Swizzle4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl fmt::Display for Swizzle4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for channel in self.0 {
            write!(f, "{}", channel.as_char())?;
        }
        Ok(())
    }
}

bitflags! {
    /// Source operand modifiers.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct OperandFlags: u8 {
        const NEGATIVE = 1 << 0;
        const ABSOLUTE = 1 << 1;
    }
}

bitflags! {
    /// Per-instruction scheduling flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct InstructionFlags: u8 {
        const SKIPINV = 1 << 0;
        const NOSCHED = 1 << 1;
        const SYNCSTART = 1 << 2;
        /// Last instruction of the program.
        const END = 1 << 3;
    }
}
