//! Bitstring instruction templates.
//!
//! Every decoder table entry is written as a 64-character template, most significant bit first:
//!
//! - `0` / `1` pin the bit to that value,
//! - `-` marks a don't-care bit,
//! - any other character names an operand field. All positions carrying the same character
//!   belong to the same field, even when they are not adjacent.
//!
//! [`Matcher::new`] is a `const fn`, so a malformed template in the decoder table is rejected at
//! compile time.

use std::fmt;

use crate::table::InstructionKind;

/// Upper bound on distinct field characters per template.
pub const MAX_FIELDS: usize = 32;

/// A named bit field extracted with `(word & mask) >> shift`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    pub symbol: u8,
    pub mask: u64,
    /// Position of the lowest bit of the field.
    pub shift: u32,
}

impl Field {
    const EMPTY: Field = Field {
        symbol: 0,
        mask: 0,
        shift: 0,
    };

    pub fn extract(&self, word: u64) -> u64 {
        (word & self.mask) >> self.shift
    }

    /// Number of bits the field occupies in the instruction word.
    pub fn width(&self) -> u32 {
        self.mask.count_ones()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Matcher {
    kind: InstructionKind,
    name: &'static str,
    template: &'static str,
    mask: u64,
    expect: u64,
    fields: [Field; MAX_FIELDS],
    field_count: usize,
}

impl Matcher {
    pub const fn new(kind: InstructionKind, name: &'static str, template: &'static str) -> Self {
        let bytes = template.as_bytes();
        if bytes.len() != 64 {
            panic!("instruction template must be exactly 64 characters");
        }

        let mut mask = 0u64;
        let mut expect = 0u64;
        let mut fields = [Field::EMPTY; MAX_FIELDS];
        let mut field_count = 0;

        let mut i = 0;
        while i < 64 {
            let position = 63 - i as u32;
            let bit = 1u64 << position;
            match bytes[i] {
                b'0' => mask |= bit,
                b'1' => {
                    mask |= bit;
                    expect |= bit;
                }
                b'-' => {}
                symbol => {
                    let mut j = 0;
                    let mut found = false;
                    while j < field_count {
                        if fields[j].symbol == symbol {
                            fields[j].mask |= bit;
                            // Scanning runs MSB first, so the last hit is the lowest bit.
                            fields[j].shift = position;
                            found = true;
                            break;
                        }
                        j += 1;
                    }
                    if !found {
                        if field_count == MAX_FIELDS {
                            panic!("instruction template has too many fields");
                        }
                        fields[field_count] = Field {
                            symbol,
                            mask: bit,
                            shift: position,
                        };
                        field_count += 1;
                    }
                }
            }
            i += 1;
        }

        Self {
            kind,
            name,
            template,
            mask,
            expect,
            fields,
            field_count,
        }
    }

    pub fn kind(&self) -> InstructionKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn template(&self) -> &'static str {
        self.template
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    pub fn expect(&self) -> u64 {
        self.expect
    }

    pub fn matches(&self, word: u64) -> bool {
        word & self.mask == self.expect
    }

    /// Fields in order of first appearance in the template.
    pub fn fields(&self) -> &[Field] {
        &self.fields[..self.field_count]
    }

    pub fn field_info(&self, symbol: u8) -> Option<&Field> {
        self.fields().iter().find(|f| f.symbol == symbol)
    }

    /// Extracts the field named `symbol`, or `None` if the template has no such field.
    pub fn field(&self, word: u64, symbol: u8) -> Option<u64> {
        self.field_info(symbol).map(|f| f.extract(word))
    }

    /// Assembles an instruction word from field values.
    ///
    /// Pinned bits come from the template and don't-care bits are left clear. Values wider than
    /// their field are truncated. Returns `None` if a symbol is not a field of this template.
    pub fn encode(&self, values: &[(u8, u64)]) -> Option<u64> {
        let mut word = self.expect;
        for &(symbol, value) in values {
            let field = self.field_info(symbol)?;
            word |= value.checked_shl(field.shift).unwrap_or(0) & field.mask;
        }
        Some(word)
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("name", &self.name)
            .field("mask", &format_args!("{:#018x}", self.mask))
            .field("expect", &format_args!("{:#018x}", self.expect))
            .finish()
    }
}
