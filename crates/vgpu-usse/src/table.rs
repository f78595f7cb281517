//! The instruction decode table.
//!
//! Entries are tried in declaration order and the first match wins. Several templates overlap
//! (`NOP`, `BR`, `SMLSI` and `KILL` all share the `11111` opcode prefix with `SPEC`, which is a
//! catch-all for the remaining special instructions), so the order below is part of the encoding
//! and must not be changed.

use serde::Serialize;

use crate::matcher::Matcher;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum InstructionKind {
    /// Vector move.
    Vmov,
    /// Vector multiply-add.
    Vmad,
    /// Vector multiply-add, normal-precision form.
    Vmad2,
    /// Vector operations except multiply-add, F32.
    Vnmad32,
    /// Vector operations except multiply-add, F16.
    Vnmad16,
    /// Vector pack/unpack.
    Vpck,
    /// Sum of products.
    Sop2,
    /// Test, writing a predicate register.
    Vtst,
    /// Test with mask output.
    Vtstmsk,
    /// Bitwise operations.
    Vbw,
    Phas,
    Nop,
    Br,
    /// Texture sample.
    Smp,
    /// Per-operand increment/limit control.
    Smlsi,
    Kill,
    /// Remaining special instructions.
    Spec,
    /// Vector complex operations (rcp, rsq, log, exp).
    Vcomp,
    /// Vector dot product.
    Vdp,
    /// Dual issue.
    Vdual,
    /// Load/store.
    Vldst,
}

impl InstructionKind {
    pub const fn name(self) -> &'static str {
        match self {
            InstructionKind::Vmov => "VMOV",
            InstructionKind::Vmad => "VMAD",
            InstructionKind::Vmad2 => "VMAD2",
            InstructionKind::Vnmad32 => "VNMAD32",
            InstructionKind::Vnmad16 => "VNMAD16",
            InstructionKind::Vpck => "VPCK",
            InstructionKind::Sop2 => "SOP2",
            InstructionKind::Vtst => "VTST",
            InstructionKind::Vtstmsk => "VTSTMSK",
            InstructionKind::Vbw => "VBW",
            InstructionKind::Phas => "PHAS",
            InstructionKind::Nop => "NOP",
            InstructionKind::Br => "BR",
            InstructionKind::Smp => "SMP",
            InstructionKind::Smlsi => "SMLSI",
            InstructionKind::Kill => "KILL",
            InstructionKind::Spec => "SPEC",
            InstructionKind::Vcomp => "VCOMP",
            InstructionKind::Vdp => "VDP",
            InstructionKind::Vdual => "VDUAL",
            InstructionKind::Vldst => "VLDST",
        }
    }

    /// Whether the instruction writes a predicate register.
    pub fn writes_predicate(self) -> bool {
        matches!(self, InstructionKind::Vtst | InstructionKind::Vtstmsk)
    }
}

macro_rules! inst {
    ($kind:ident, $template:literal) => {
        Matcher::new(InstructionKind::$kind, InstructionKind::$kind.name(), $template)
    };
}

// Field legends for the most common layouts; `operand.rs` documents the symbols it reads for
// the others.
//
// VMOV    p=pred s=skipinv y=syncstart d=dest_ext e=src0_ext c=src1_ext b=src2_ext m=move_type
//         n=nosched w=swizzle k=src0_bank l=dest_bank f=src1_bank g=src2_bank h=dest_mask
//         j=dest q=src0 u=src1 v=src2
// VNMAD   p=pred s=skipinv r=src1_swiz[10:11] y=syncstart d=dest_ext c=src1_swiz[9]
//         b=src1_ext a=src2_ext w=src2_swiz n=nosched e=dest_mask m=src1_mod o=src2_mod
//         i=src1_swiz[7:8] t=dest_bank k=src1_bank l=src2_bank f=dest z=src1_swiz[0:6] g=op2
//         h=src1 j=src2
// BR      p=pred e=exception n=nosched a=save_link r=br_type o=offset (20 bits, signed)
// KILL    p=pred (short form)
pub static TABLE: [Matcher; 21] = [
    inst!(Vmov, "00111pppstrydecbmmaanoooiwwwwkllffgghhhhjjjjjjqqqqqquuuuuuvvvvvv"),
    inst!(Vmad, "00011pppsg1oderiiattnwwwwcbfhzkkjjllmmmmmmqqqquuuuvvxyAAAABBBBBB"),
    inst!(Vmad2, "00000dpps-ry-cbawwwineeeemmookttffgghhhhhhzzjjllllllqqqqqquuuuuu"),
    inst!(Vnmad32, "00001pppsrrydcbawwwwneeeemmoiittkkllffffffzzzzzzzggghhhhhhjjjjjj"),
    inst!(Vnmad16, "00010pppsrrydcbawwwwneeeemmoiittkkllffffffzzzzzzzggghhhhhhjjjjjj"),
    inst!(Vpck, "01000pppsnuyderc-aaaffftttmmmmbbkkllgggggggoohiijjqqqqqqvwwwwwwx"),
    inst!(Sop2, "10000ppcsnaaderbmooofllggghhhittkkjjqqqqqqquvvwwxyzzzzzzzAAAAAAA"),
    inst!(Vtst, "01001ppps-oydrceavttiizzmhhhnnbbkkffgggggggwlluuuujjjjjjjqqqqqqq"),
    inst!(Vtstmsk, "01111ppps-oydtrcevuuiizzm-aa--bbnnkkfffffffwllgggghhhhhhhjjjjjjj"),
    inst!(Vbw, "01ooopppsnrydecxmmmmittttthhabkkffggjjjjjjjlllllllqqqqqqquuuuuuu"),
    inst!(Phas, "11111----100----------------------------------------------------"),
    inst!(Nop, "11111----000-----------101--------------------------------------"),
    inst!(Br, "11111ppps000e-----wynba00r----------------iloooooooooooooooooooo"),
    inst!(Smp, "11100pppsn-ymrceffaaddlltbbggkhhiijjoooooooqqqqqqquuuuuuuvvvvvvv"),
    inst!(Smlsi, "11111010--01-n--ttttppppssssdrcieeeeeeeeaaaaaaaabbbbbbbbffffffff"),
    inst!(Kill, "11111001--11000000000pp00000011011110000000000000000000000000000"),
    inst!(Spec, "11111----scc----------------------------------------------------"),
    inst!(Vcomp, "00110pppsddyenr-aaaaobbccmmff-ttkk--ggggggg-------hhhhhhh---wwww"),
    inst!(Vdp, "00011pppsc0oderiigaanwwwwbflllttkkhhjjjjjjzzzzmmmqqqyyyxxxuuuuuu"),
    inst!(Vdual, "0010cgsskdtpuuuunaaalriiiiwwwwmmffeebbbbbbbooohhjqvvxxyyyzzzzzzz"),
    inst!(Vldst, "111oopppsnmycrbakkkkddeetgffihjlqquuvvvvvvvwwwwwwwxxxxxxxzzzzzzz"),
];

/// Returns the first table entry matching `word`.
pub fn lookup(word: u64) -> Option<&'static Matcher> {
    TABLE.iter().find(|m| m.matches(word))
}

/// Returns the table entry for `kind`.
pub fn entry(kind: InstructionKind) -> &'static Matcher {
    // Every kind has exactly one entry; the table is indexed in declaration order.
    &TABLE[kind as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_indexed_by_kind() {
        for (index, matcher) in TABLE.iter().enumerate() {
            assert_eq!(matcher.kind() as usize, index, "{}", matcher.name());
            assert_eq!(entry(matcher.kind()).name(), matcher.kind().name());
        }
    }

    #[test]
    fn first_match_wins_for_special_group() {
        let nop = entry(InstructionKind::Nop).encode(&[]).unwrap();
        assert_eq!(lookup(nop).unwrap().kind(), InstructionKind::Nop);

        let kill = entry(InstructionKind::Kill).encode(&[(b'p', 1)]).unwrap();
        assert_eq!(lookup(kill).unwrap().kind(), InstructionKind::Kill);

        // Anything else under the special prefix falls through to SPEC.
        let spec = entry(InstructionKind::Spec).encode(&[(b's', 1), (b'c', 2)]).unwrap();
        assert_eq!(lookup(spec).unwrap().kind(), InstructionKind::Spec);
    }

    #[test]
    fn vmad_and_vdp_split_on_present_bit() {
        let vmad = entry(InstructionKind::Vmad).encode(&[]).unwrap();
        let vdp = entry(InstructionKind::Vdp).encode(&[]).unwrap();
        assert_eq!(lookup(vmad).unwrap().kind(), InstructionKind::Vmad);
        assert_eq!(lookup(vdp).unwrap().kind(), InstructionKind::Vdp);
    }

    #[test]
    fn opcode_prefix_selects_f32_or_f16_vector_op() {
        assert_eq!(lookup(0x0800_0000_0000_0000).unwrap().kind(), InstructionKind::Vnmad32);
        assert_eq!(lookup(0x1000_0000_0000_0000).unwrap().kind(), InstructionKind::Vnmad16);
        assert!(!entry(InstructionKind::Vnmad32).matches(0x1000_0000_0000_0000));
    }

    #[test]
    fn every_template_encodes_to_itself() {
        // Some opcode values are claimed by earlier entries: VBW op 0 is VPCK, VLDST op 0 is
        // SMP, an all-zero special word is a branch and special op 0b100 is PHAS.
        let overrides = |kind| match kind {
            InstructionKind::Vbw => vec![(b'o', 0b010)],
            InstructionKind::Vldst => vec![(b'o', 0b01)],
            InstructionKind::Spec => vec![(b'c', 1)],
            _ => Vec::new(),
        };
        for matcher in TABLE.iter() {
            let word = matcher.encode(&overrides(matcher.kind())).unwrap();
            assert_eq!(lookup(word).unwrap().kind(), matcher.kind(), "{}", matcher.name());
        }
        let phas_bits = entry(InstructionKind::Spec).encode(&[(b's', 1)]).unwrap();
        assert_eq!(lookup(phas_bits).unwrap().kind(), InstructionKind::Phas);
    }
}
