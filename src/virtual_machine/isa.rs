//! Instruction Set Architecture (ISA) definitions.
//!
//! Defines the opcode space of the 64-bit ISA. The
//! [`for_each_opcode!`](crate::for_each_opcode) macro holds the canonical
//! opcode table and invokes a callback macro for code generation, so multiple
//! modules can generate opcode-related code without duplicating definitions.
//!
//! This module generates:
//! - The [`Opcode`] enum with byte values
//! - `TryFrom<u8>` for decoding the opcode byte
//! - Per-opcode `mnemonic()` and [`InstrFormat`] lookup
//!
//! # Opcode Space
//!
//! Opcodes are 8 bits wide and split into groups named after bits `[6:4]`:
//!
//! - group 0 (`0x00..=0x0F`): bitwise instructions
//! - group 1 (`0x10..=0x1F`): arithmetic and stack instructions
//! - group 2 (`0x20..=0x2F`): memory and control-flow instructions
//! - group 3 (`0x30..=0x3F`): conditional set, upper immediates, processor
//!   calls, and (reserved, unimplemented) port I/O
//!
//! Groups 4 and above are extension space (floating point, conditional moves,
//! fences) and are not implemented; their opcodes decode as unknown, as do
//! the reserved I/O opcodes `0x3C..=0x3F`.

/// The three 64-bit instruction encodings.
///
/// Every instruction shares the opcode in its low 8 bits; the opcode selects
/// which view is authoritative.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InstrFormat {
    /// Register-register-register.
    R,
    /// Register-register plus a 48-bit immediate.
    S,
    /// Register plus a 52-bit immediate.
    L,
}

/// Error returned when an opcode byte has no assigned instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UnknownOpcode(pub u8);

/// Invokes a callback macro with the complete opcode table.
///
/// This macro enables code generation for opcodes in multiple modules
/// without duplicating the table.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Group 0: bitwise
            // =========================
            /// `and rd, r1, r2` ; bitwise AND
            Andr = 0x00, "andr", R,
            /// `and rd, r1, imm` ; bitwise AND with immediate
            Andi = 0x01, "andi", S,
            /// `xor rd, r1, r2` ; bitwise XOR
            Xorr = 0x02, "xorr", R,
            /// `xor rd, r1, imm` ; bitwise XOR with immediate
            Xori = 0x03, "xori", S,
            /// `or rd, r1, r2` ; bitwise OR
            Orr = 0x04, "orr", R,
            /// `or rd, r1, imm` ; bitwise OR with immediate
            Ori = 0x05, "ori", S,
            /// `not rd, r1` ; bitwise complement
            Not = 0x06, "not", R,
            /// `cnt rd, r1` ; population count (second operand ignored)
            Cnt = 0x07, "cnt", S,
            /// `lls rd, r1, r2` ; logical left shift, zero when shift >= 64
            Llsr = 0x08, "llsr", R,
            /// `lls rd, r1, imm` ; logical left shift by immediate
            Llsi = 0x09, "llsi", S,
            /// `lrs rd, r1, r2` ; logical right shift, zero when shift >= 64
            Lrsr = 0x0A, "lrsr", R,
            /// `lrs rd, r1, imm` ; logical right shift by immediate
            Lrsi = 0x0B, "lrsi", S,
            // =========================
            // Group 1: arithmetic / stack
            // =========================
            /// `add rd, r1, r2` ; wrapping 64-bit addition
            Addr = 0x10, "addr", R,
            /// `add rd, r1, imm` ; wrapping addition with immediate
            Addi = 0x11, "addi", S,
            /// `sub rd, r1, r2` ; wrapping 64-bit subtraction
            Subr = 0x12, "subr", R,
            /// `sub rd, r1, imm` ; wrapping subtraction with immediate
            Subi = 0x13, "subi", S,
            /// `umul rd, r1, r2` ; unsigned multiply, low 64 bits
            Umulr = 0x14, "umulr", R,
            /// `umul rd, r1, imm` ; unsigned multiply with immediate
            Umuli = 0x15, "umuli", S,
            /// `smul rd, r1, r2` ; signed multiply, low 64 bits
            Smulr = 0x16, "smulr", R,
            /// `smul rd, r1, imm` ; signed multiply with sign-extended immediate
            Smuli = 0x17, "smuli", S,
            /// `udiv rd, r1, r2` ; unsigned division, faults on zero divisor
            Udivr = 0x18, "udivr", R,
            /// `udiv rd, r1, imm` ; unsigned division by immediate
            Udivi = 0x19, "udivi", S,
            /// `sdiv rd, r1, r2` ; signed division, faults on zero divisor
            Sdivr = 0x1A, "sdivr", R,
            /// `sdiv rd, r1, imm` ; signed division by sign-extended immediate
            Sdivi = 0x1B, "sdivi", S,
            /// `call rd, r1, r2` ; push frame (r1 = SP, r2 = BP), jump to rd
            Call = 0x1C, "call", R,
            /// `push rd, r1, imm` ; store rd + reg\[imm\] at r1, grow stack
            Push = 0x1D, "push", S,
            /// `retn r1, r2` ; pop frame (r1 = SP, r2 = BP), return
            Retn = 0x1E, "retn", R,
            /// `pull rd, r1` ; shrink stack at r1, load rd
            Pull = 0x1F, "pull", S,
            // =========================
            // Group 2: memory / control flow
            // =========================
            /// `ldb rd, r1, imm` ; load byte, zero-extended
            Ldb = 0x20, "ldb", S,
            /// `ldh rd, r1, imm` ; load half word, zero-extended
            Ldh = 0x21, "ldh", S,
            /// `ldw rd, r1, imm` ; load word, zero-extended
            Ldw = 0x22, "ldw", S,
            /// `ldd rd, r1, imm` ; load double word
            Ldd = 0x23, "ldd", S,
            /// `stb rd, r1, imm` ; store low byte of r1 at rd + imm
            Stb = 0x24, "stb", S,
            /// `sth rd, r1, imm` ; store low half word of r1 at rd + imm
            Sth = 0x25, "sth", S,
            /// `stw rd, r1, imm` ; store low word of r1 at rd + imm
            Stw = 0x26, "stw", S,
            /// `std rd, r1, imm` ; store double word of r1 at rd + imm
            Std = 0x27, "std", S,
            /// `jal r1, imm` ; link pc + 8 into r1, branch by imm
            Jal = 0x28, "jal", L,
            /// `jalr rd, r1, imm` ; link pc + 8 into rd, branch by r1 + imm
            Jalr = 0x29, "jalr", S,
            /// `je rd, r1, imm` ; branch by imm if rd == r1
            Je = 0x2A, "je", S,
            /// `jne rd, r1, imm` ; branch by imm if rd != r1
            Jne = 0x2B, "jne", S,
            /// `jgu rd, r1, imm` ; branch by imm if rd > r1 (unsigned)
            Jgu = 0x2C, "jgu", S,
            /// `jgs rd, r1, imm` ; branch by imm if rd > r1 (signed)
            Jgs = 0x2D, "jgs", S,
            /// `jleu rd, r1, imm` ; branch by imm if rd <= r1 (unsigned)
            Jleu = 0x2E, "jleu", S,
            /// `jles rd, r1, imm` ; branch by imm if rd <= r1 (signed)
            Jles = 0x2F, "jles", S,
            // =========================
            // Group 3: conditional set / upper immediates / pcall
            // =========================
            /// `setgu rd, r1, r2` ; rd = (r1 > r2) unsigned
            Setgur = 0x30, "setgur", R,
            /// `setgu rd, r1, imm` ; rd = (r1 > imm) unsigned
            Setgui = 0x31, "setgui", S,
            /// `setgs rd, r1, r2` ; rd = (r1 > r2) signed
            Setgsr = 0x32, "setgsr", R,
            /// `setgs rd, r1, imm` ; rd = (r1 > imm) signed
            Setgsi = 0x33, "setgsi", S,
            /// `setleu rd, r1, r2` ; rd = (r1 <= r2) unsigned
            Setleur = 0x34, "setleur", R,
            /// `setleu rd, r1, imm` ; rd = (r1 <= imm) unsigned
            Setleui = 0x35, "setleui", S,
            /// `setles rd, r1, r2` ; rd = (r1 <= r2) signed
            Setlesr = 0x36, "setlesr", R,
            /// `setles rd, r1, imm` ; rd = (r1 <= imm) signed
            Setlesi = 0x37, "setlesi", S,
            /// `lui r1, imm` ; OR imm << 13 into r1 (not an assignment, so it
            /// pairs with a low-bits setter)
            Lui = 0x38, "lui", L,
            /// `auipc r1, imm` ; r1 = pc + (imm << 13)
            Auipc = 0x39, "auipc", L,
            /// `pcall imm` ; raise a processor call of the given kind
            Pcall = 0x3A, "pcall", L,
        }
    };
}

#[macro_export]
macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:literal, $mnemonic:literal, $format:ident
        ),* $(,)?
    ) => {
        // =========================
        // Opcode enum
        // =========================
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        #[repr(u8)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Opcode {
            type Error = UnknownOpcode;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Opcode::$name), )*
                    _ => Err(UnknownOpcode(value)),
                }
            }
        }

        impl Opcode {
            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Returns the encoding format the opcode byte selects.
            pub const fn format(&self) -> InstrFormat {
                match self {
                    $( Opcode::$name => InstrFormat::$format, )*
                }
            }
        }
    };
}

for_each_opcode!(define_opcodes);

impl Opcode {
    /// Returns the instruction group, bits `[6:4]` of the opcode byte.
    pub const fn group(&self) -> u8 {
        (*self as u8) >> 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_try_from_invalid() {
        assert_eq!(Opcode::try_from(0xFF), Err(UnknownOpcode(0xFF)));
        // Reserved I/O range decodes as unknown.
        for byte in 0x3C..=0x3F {
            assert!(Opcode::try_from(byte).is_err());
        }
    }

    #[test]
    fn opcode_roundtrips_through_byte() {
        let op = Opcode::try_from(0x2A).unwrap();
        assert_eq!(op, Opcode::Je);
        assert_eq!(op as u8, 0x2A);
    }

    #[test]
    fn groups_follow_high_nibble() {
        assert_eq!(Opcode::Andr.group(), 0);
        assert_eq!(Opcode::Pull.group(), 1);
        assert_eq!(Opcode::Jles.group(), 2);
        assert_eq!(Opcode::Pcall.group(), 3);
    }
}
