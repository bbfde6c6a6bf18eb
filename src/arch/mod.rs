//! Instruction Set Architecture (ISA) definitions.
//!
//! Defines the VM's instruction word codec. The
//! [`for_each_opcode!`](crate::for_each_opcode) macro holds the canonical
//! opcode table and invokes a callback macro for code generation, so
//! multiple modules can generate opcode-related code without duplicating
//! the table.
//!
//! # Instruction word
//!
//! An instruction is a single 64-bit little-endian word. The low 16 bits
//! hold the opcode field; the high 48 bits hold the operands. Within the
//! opcode field:
//!
//! - [`OPCODE_MASK`] extracts the opcode (format tag | operation number),
//! - [`FORMAT_MASK`] extracts the format tag from an opcode,
//! - [`GREEDY`] is the bundle bit, sitting above the opcode proper.
//!
//! Operand lanes (bit offsets within the word):
//!
//! ```text
//! N: [opcode:16]
//! S: [opcode:16][out @16]
//! D: [opcode:16][out @16][in @28]
//! T: [opcode:16][out @16][lhs @28][rhs @40]
//! F: [opcode:16][out @16][imm32 @32]
//! E: [opcode:16][out @16][imm36 @28]
//! R: [opcode:16][out @16][in @28][imm24 @40]
//! ```
//!
//! A register access occupies a 12-bit lane: index in bits 0..8, the
//! direct/indirect bit at bit 8, and the register-set tag in bits 9..12.

use crate::errors::CodecError;

/// Size of one instruction word in bytes.
pub const WORD_SIZE: usize = 8;

/// Extracts the opcode field from an instruction word.
pub const OPCODE_MASK: u64 = 0x7fff;

/// Marks an instruction as part of a greedy bundle.
///
/// The scheduler treats a run of consecutive greedy-flagged words plus the
/// first non-greedy word after them as an atomic group for preemption.
pub const GREEDY: u64 = 0x8000;

/// Extracts the format tag from an opcode.
pub const FORMAT_MASK: u16 = 0x7000;

/// Returns the opcode field of a word, with the greedy bit stripped.
#[inline]
pub const fn opcode_of(word: u64) -> u16 {
    (word & OPCODE_MASK) as u16
}

/// Returns true if the word carries the greedy-bundle bit.
#[inline]
pub const fn is_greedy(word: u64) -> bool {
    (word & GREEDY) != 0
}

/// Instruction encoding formats.
///
/// The format tag is part of the opcode value, so decoding a word's format
/// is a single mask of its opcode field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum Format {
    /// No operands beyond the opcode.
    N = 0x0000,
    /// Three register accesses: out, lhs, rhs.
    T = 0x1000,
    /// Two register accesses: out, in.
    D = 0x2000,
    /// One register access.
    S = 0x3000,
    /// One register access and a 32-bit immediate.
    F = 0x4000,
    /// One register access and a 36-bit immediate.
    E = 0x5000,
    /// Two register accesses and a 24-bit immediate.
    R = 0x6000,
}

impl Format {
    /// Recovers the format of an opcode from its tag bits.
    pub fn of(opcode: u16) -> Result<Format, CodecError> {
        match opcode & FORMAT_MASK {
            0x0000 => Ok(Format::N),
            0x1000 => Ok(Format::T),
            0x2000 => Ok(Format::D),
            0x3000 => Ok(Format::S),
            0x4000 => Ok(Format::F),
            0x5000 => Ok(Format::E),
            0x6000 => Ok(Format::R),
            _ => Err(CodecError::InvalidOpcode(opcode)),
        }
    }
}

// =========================
// Register access
// =========================

/// Register sets addressable by an operand.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum RegisterSet {
    /// The void sentinel: reads as zero, discards writes.
    Void = 0,
    /// Per-frame general-purpose registers.
    Local = 1,
    /// Per-process staging area filled between FRAME and CALL.
    Argument = 2,
    /// The callee's view of the caller's arguments.
    Parameter = 3,
}

impl RegisterSet {
    /// One-letter name used by EBREAK dumps and assembly suffixes.
    pub const fn as_char(self) -> char {
        match self {
            RegisterSet::Void => 'v',
            RegisterSet::Local => 'l',
            RegisterSet::Argument => 'a',
            RegisterSet::Parameter => 'p',
        }
    }
}

impl TryFrom<u8> for RegisterSet {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RegisterSet::Void),
            1 => Ok(RegisterSet::Local),
            2 => Ok(RegisterSet::Argument),
            3 => Ok(RegisterSet::Parameter),
            other => Err(CodecError::InvalidRegisterSet(other)),
        }
    }
}

/// A register reference as encoded in an operand lane: the register set,
/// a direct/indirect bit, and an index within the set.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RegisterAccess {
    pub set: RegisterSet,
    pub direct: bool,
    pub index: u8,
}

impl RegisterAccess {
    /// The distinguished void access.
    pub const fn void() -> Self {
        Self {
            set: RegisterSet::Void,
            direct: true,
            index: 0,
        }
    }

    /// A direct access to a local register.
    pub const fn local(index: u8) -> Self {
        Self {
            set: RegisterSet::Local,
            direct: true,
            index,
        }
    }

    /// A direct access to an argument register.
    pub const fn argument(index: u8) -> Self {
        Self {
            set: RegisterSet::Argument,
            direct: true,
            index,
        }
    }

    /// A direct access to a parameter register.
    pub const fn parameter(index: u8) -> Self {
        Self {
            set: RegisterSet::Parameter,
            direct: true,
            index,
        }
    }

    /// True for the void sentinel.
    pub const fn is_void(&self) -> bool {
        matches!(self.set, RegisterSet::Void)
    }

    /// Packs the access into its 12-bit lane value.
    pub const fn encode(&self) -> u64 {
        (self.index as u64) | ((self.direct as u64) << 8) | ((self.set as u64) << 9)
    }

    /// Unpacks an access from the low 12 bits of `bits`.
    pub fn decode(bits: u64) -> Result<Self, CodecError> {
        let index = (bits & 0xff) as u8;
        let direct = (bits >> 8) & 1 == 1;
        let set = RegisterSet::try_from(((bits >> 9) & 0x7) as u8)?;
        Ok(Self { set, direct, index })
    }
}

impl std::fmt::Display for RegisterAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_void() {
            return write!(f, "void");
        }
        let sigil = if self.direct { '%' } else { '*' };
        write!(f, "{}{}.{}", sigil, self.index, self.set.as_char())
    }
}

// =========================
// Opcode table
// =========================

/// Invokes a callback macro with the complete opcode table.
///
/// Each entry is `Name = value, "mnemonic", Format`. The value's tag bits
/// must agree with the named format; a static check below enforces it.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // =========================
            // N: no operands
            // =========================
            /// NOOP ; does nothing
            Noop = 0x0000, "noop", N,
            /// HALT ; stops the process
            Halt = 0x0001, "halt", N,
            /// EBREAK ; dumps the register file to the trace stream
            Ebreak = 0x0002, "ebreak", N,
            /// RETURN ; pops the current frame, moving local 0 to the caller
            Return = 0x0003, "return", N,
            // =========================
            // T: out, lhs, rhs
            // =========================
            /// ADD out, lhs, rhs
            Add = 0x1001, "add", T,
            /// SUB out, lhs, rhs
            Sub = 0x1002, "sub", T,
            /// MUL out, lhs, rhs
            Mul = 0x1003, "mul", T,
            /// DIV out, lhs, rhs ; traps on zero rhs
            Div = 0x1004, "div", T,
            /// MOD out, lhs, rhs ; traps on zero rhs
            Mod = 0x1005, "mod", T,
            /// BITSHL out, lhs, rhs
            Bitshl = 0x1006, "bitshl", T,
            /// BITSHR out, lhs, rhs ; logical shift right
            Bitshr = 0x1007, "bitshr", T,
            /// BITASHR out, lhs, rhs ; arithmetic shift right
            Bitashr = 0x1008, "bitashr", T,
            /// BITROL out, lhs, rhs
            Bitrol = 0x1009, "bitrol", T,
            /// BITROR out, lhs, rhs
            Bitror = 0x100a, "bitror", T,
            /// BITAND out, lhs, rhs
            Bitand = 0x100b, "bitand", T,
            /// BITOR out, lhs, rhs
            Bitor = 0x100c, "bitor", T,
            /// BITXOR out, lhs, rhs
            Bitxor = 0x100d, "bitxor", T,
            /// EQ out, lhs, rhs
            Eq = 0x100e, "eq", T,
            /// LT out, lhs, rhs
            Lt = 0x100f, "lt", T,
            /// GT out, lhs, rhs
            Gt = 0x1010, "gt", T,
            /// CMP out, lhs, rhs ; three-way compare: -1, 0, or 1
            Cmp = 0x1011, "cmp", T,
            /// AND out, lhs, rhs ; logical
            And = 0x1012, "and", T,
            /// OR out, lhs, rhs ; logical
            Or = 0x1013, "or", T,
            // =========================
            // D: out, in
            // =========================
            /// CALL out, fn ; fn holds a symbol index, out receives the return value
            Call = 0x2001, "call", D,
            /// BITNOT out, in
            Bitnot = 0x2002, "bitnot", D,
            /// NOT out, in ; logical
            Not = 0x2003, "not", D,
            /// COPY out, in ; duplicates, deep for boxed values
            Copy = 0x2004, "copy", D,
            /// MOVE out, in ; transfers ownership, leaves in void
            Move = 0x2005, "move", D,
            /// ATOM out, in ; in holds a symbol index of an atom object
            Atom = 0x2006, "atom", D,
            // =========================
            // S: single register access
            // =========================
            /// DELETE r ; clears the register, destroying boxed values
            Delete = 0x3001, "delete", S,
            /// STRING r ; converts a constant-pool offset into a boxed string
            String = 0x3002, "string", S,
            /// FRAME r ; the access index is the argument count of the next call
            Frame = 0x3003, "frame", S,
            // =========================
            // F: out and a 32-bit immediate
            // =========================
            /// LIH out, imm32 ; out = imm << 32
            Lih = 0x4001, "lih", F,
            /// LIL out, imm32 ; out = (out & hi32) | imm
            Lil = 0x4002, "lil", F,
            /// FLOAT out, imm32 ; loads a single-precision bit pattern
            Float = 0x4003, "float", F,
            // =========================
            // E: out and a 36-bit immediate
            // =========================
            /// LUI out, imm36 ; out = imm << 28, signed
            Lui = 0x5001, "lui", E,
            /// LUIU out, imm36 ; out = imm << 28, unsigned
            Luiu = 0x5002, "luiu", E,
            // =========================
            // R: out, in, and a 24-bit immediate
            // =========================
            /// ADDI out, in, imm24 ; signed
            Addi = 0x6001, "addi", R,
            /// ADDIU out, in, imm24 ; unsigned
            Addiu = 0x6002, "addiu", R,
            /// SUBI out, in, imm24 ; signed
            Subi = 0x6003, "subi", R,
            /// SUBIU out, in, imm24 ; unsigned
            Subiu = 0x6004, "subiu", R,
            /// MULI out, in, imm24 ; signed
            Muli = 0x6005, "muli", R,
            /// MULIU out, in, imm24 ; unsigned
            Muliu = 0x6006, "muliu", R,
            /// DIVI out, in, imm24 ; signed, traps on zero immediate
            Divi = 0x6007, "divi", R,
            /// DIVIU out, in, imm24 ; unsigned, traps on zero immediate
            Diviu = 0x6008, "diviu", R,
            /// AA out, in, imm24 ; allocates in bytes aligned to 1 << imm
            Aa = 0x6009, "aa", R,
        }
    };
}

macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $value:expr, $mnemonic:literal, $format:ident
        ),* $(,)?
    ) => {
        /// Opcodes of the virtual machine.
        ///
        /// The numeric value of each opcode carries its format in the tag
        /// bits, so `opcode & FORMAT_MASK` recovers the format directly.
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
        #[repr(u16)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $value,
            )*
        }

        impl Opcode {
            /// All opcodes, in table order.
            pub const ALL: &'static [Opcode] = &[ $( Opcode::$name, )* ];

            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Returns the encoding format of this opcode.
            pub const fn format(&self) -> Format {
                match self {
                    $( Opcode::$name => Format::$format, )*
                }
            }

            /// Looks an opcode up by its assembly mnemonic.
            pub fn from_mnemonic(name: &str) -> Option<Opcode> {
                match name {
                    $( $mnemonic => Some(Opcode::$name), )*
                    _ => None,
                }
            }
        }

        impl TryFrom<u16> for Opcode {
            type Error = CodecError;

            fn try_from(value: u16) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok(Opcode::$name), )*
                    other => Err(CodecError::InvalidOpcode(other)),
                }
            }
        }

        // Every opcode's value must carry the tag bits of its declared
        // format; a mismatch here is a table bug.
        const _: () = {
            $(
                assert!(($value & FORMAT_MASK) == (Format::$format as u16));
                assert!(($value as u64 & !OPCODE_MASK) == 0);
            )*
        };
    };
}

for_each_opcode!(define_opcodes);

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

// =========================
// Format codecs
// =========================

/// N-format word: opcode only.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct N {
    pub opcode: u16,
}

impl N {
    pub const fn new(opcode: u16) -> Self {
        Self { opcode }
    }

    pub const fn encode(&self) -> u64 {
        self.opcode as u64
    }

    pub const fn decode(word: u64) -> Self {
        Self {
            opcode: opcode_of(word),
        }
    }
}

/// S-format word: one register access.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct S {
    pub opcode: u16,
    pub out: RegisterAccess,
}

impl S {
    pub const fn new(opcode: u16, out: RegisterAccess) -> Self {
        Self { opcode, out }
    }

    pub const fn encode(&self) -> u64 {
        (self.opcode as u64) | (self.out.encode() << 16)
    }

    pub fn decode(word: u64) -> Result<Self, CodecError> {
        Ok(Self {
            opcode: opcode_of(word),
            out: RegisterAccess::decode((word >> 16) & 0xfff)?,
        })
    }
}

/// D-format word: out and in register accesses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct D {
    pub opcode: u16,
    pub out: RegisterAccess,
    pub input: RegisterAccess,
}

impl D {
    pub const fn new(opcode: u16, out: RegisterAccess, input: RegisterAccess) -> Self {
        Self { opcode, out, input }
    }

    pub const fn encode(&self) -> u64 {
        (self.opcode as u64) | (self.out.encode() << 16) | (self.input.encode() << 28)
    }

    pub fn decode(word: u64) -> Result<Self, CodecError> {
        Ok(Self {
            opcode: opcode_of(word),
            out: RegisterAccess::decode((word >> 16) & 0xfff)?,
            input: RegisterAccess::decode((word >> 28) & 0xfff)?,
        })
    }
}

/// T-format word: out, lhs, rhs register accesses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct T {
    pub opcode: u16,
    pub out: RegisterAccess,
    pub lhs: RegisterAccess,
    pub rhs: RegisterAccess,
}

impl T {
    pub const fn new(
        opcode: u16,
        out: RegisterAccess,
        lhs: RegisterAccess,
        rhs: RegisterAccess,
    ) -> Self {
        Self {
            opcode,
            out,
            lhs,
            rhs,
        }
    }

    pub const fn encode(&self) -> u64 {
        (self.opcode as u64)
            | (self.out.encode() << 16)
            | (self.lhs.encode() << 28)
            | (self.rhs.encode() << 40)
    }

    pub fn decode(word: u64) -> Result<Self, CodecError> {
        Ok(Self {
            opcode: opcode_of(word),
            out: RegisterAccess::decode((word >> 16) & 0xfff)?,
            lhs: RegisterAccess::decode((word >> 28) & 0xfff)?,
            rhs: RegisterAccess::decode((word >> 40) & 0xfff)?,
        })
    }
}

/// F-format word: one register access and a 32-bit immediate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct F {
    pub opcode: u16,
    pub out: RegisterAccess,
    pub immediate: u32,
}

impl F {
    pub const fn new(opcode: u16, out: RegisterAccess, immediate: u32) -> Self {
        Self {
            opcode,
            out,
            immediate,
        }
    }

    pub const fn encode(&self) -> u64 {
        (self.opcode as u64) | (self.out.encode() << 16) | ((self.immediate as u64) << 32)
    }

    pub fn decode(word: u64) -> Result<Self, CodecError> {
        Ok(Self {
            opcode: opcode_of(word),
            out: RegisterAccess::decode((word >> 16) & 0xfff)?,
            immediate: (word >> 32) as u32,
        })
    }
}

/// E-format word: one register access and a 36-bit immediate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct E {
    pub opcode: u16,
    pub out: RegisterAccess,
    pub immediate: u64,
}

impl E {
    /// Width of the immediate field in bits.
    pub const IMMEDIATE_BITS: u32 = 36;

    /// Constructs an E word, rejecting immediates wider than 36 bits.
    pub fn new(opcode: u16, out: RegisterAccess, immediate: u64) -> Result<Self, CodecError> {
        if immediate >> Self::IMMEDIATE_BITS != 0 {
            return Err(CodecError::ImmediateOverflow {
                mnemonic: mnemonic_or_raw(opcode),
                value: immediate,
                bits: Self::IMMEDIATE_BITS,
            });
        }
        Ok(Self {
            opcode,
            out,
            immediate,
        })
    }

    pub const fn encode(&self) -> u64 {
        (self.opcode as u64) | (self.out.encode() << 16) | (self.immediate << 28)
    }

    pub fn decode(word: u64) -> Result<Self, CodecError> {
        Ok(Self {
            opcode: opcode_of(word),
            out: RegisterAccess::decode((word >> 16) & 0xfff)?,
            immediate: word >> 28,
        })
    }
}

/// R-format word: two register accesses and a 24-bit immediate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct R {
    pub opcode: u16,
    pub out: RegisterAccess,
    pub input: RegisterAccess,
    pub immediate: u32,
}

impl R {
    /// Width of the immediate field in bits.
    pub const IMMEDIATE_BITS: u32 = 24;

    /// Constructs an R word, rejecting immediates wider than 24 bits.
    pub fn new(
        opcode: u16,
        out: RegisterAccess,
        input: RegisterAccess,
        immediate: u32,
    ) -> Result<Self, CodecError> {
        if immediate >> Self::IMMEDIATE_BITS != 0 {
            return Err(CodecError::ImmediateOverflow {
                mnemonic: mnemonic_or_raw(opcode),
                value: immediate as u64,
                bits: Self::IMMEDIATE_BITS,
            });
        }
        Ok(Self {
            opcode,
            out,
            input,
            immediate,
        })
    }

    pub const fn encode(&self) -> u64 {
        (self.opcode as u64)
            | (self.out.encode() << 16)
            | (self.input.encode() << 28)
            | ((self.immediate as u64) << 40)
    }

    pub fn decode(word: u64) -> Result<Self, CodecError> {
        Ok(Self {
            opcode: opcode_of(word),
            out: RegisterAccess::decode((word >> 16) & 0xfff)?,
            input: RegisterAccess::decode((word >> 28) & 0xfff)?,
            immediate: (word >> 40) as u32,
        })
    }
}

/// Best-effort mnemonic for error messages about possibly-unknown opcodes.
fn mnemonic_or_raw(opcode: u16) -> &'static str {
    Opcode::try_from(opcode & !(GREEDY as u16))
        .map(|op| op.mnemonic())
        .unwrap_or("<unknown>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_access_roundtrip() {
        for access in [
            RegisterAccess::void(),
            RegisterAccess::local(0),
            RegisterAccess::local(255),
            RegisterAccess::argument(7),
            RegisterAccess::parameter(3),
            RegisterAccess {
                set: RegisterSet::Local,
                direct: false,
                index: 42,
            },
        ] {
            let bits = access.encode();
            assert!(bits >> 12 == 0, "access must fit its 12-bit lane");
            assert_eq!(RegisterAccess::decode(bits).unwrap(), access);
        }
    }

    #[test]
    fn void_access_is_sentinel() {
        let void = RegisterAccess::void();
        assert!(void.is_void());
        assert!(!RegisterAccess::local(0).is_void());
    }

    #[test]
    fn n_roundtrip() {
        let word = N::new(Opcode::Halt as u16).encode();
        assert_eq!(word, 0x0001);
        assert_eq!(N::decode(word).opcode, Opcode::Halt as u16);
    }

    #[test]
    fn s_roundtrip() {
        let ins = S::new(Opcode::Delete as u16, RegisterAccess::local(0xff));
        assert_eq!(S::decode(ins.encode()).unwrap(), ins);
    }

    #[test]
    fn d_roundtrip() {
        let ins = D::new(
            Opcode::Call as u16,
            RegisterAccess::local(0xff),
            RegisterAccess::local(0x01),
        );
        assert_eq!(D::decode(ins.encode()).unwrap(), ins);
    }

    #[test]
    fn t_roundtrip() {
        let ins = T::new(
            Opcode::Add as u16,
            RegisterAccess::local(0xff),
            RegisterAccess::local(0x01),
            RegisterAccess::local(0x02),
        );
        assert_eq!(T::decode(ins.encode()).unwrap(), ins);
    }

    #[test]
    fn f_roundtrip_preserves_float_bits() {
        let bits = 3.14f32.to_bits();
        let ins = F::new(Opcode::Float as u16, RegisterAccess::local(0xff), bits);
        let back = F::decode(ins.encode()).unwrap();
        assert_eq!(back, ins);
        assert_eq!(f32::from_bits(back.immediate), 3.14f32);
    }

    #[test]
    fn e_roundtrip() {
        let ins = E::new(
            Opcode::Lui as u16,
            RegisterAccess::local(0xff),
            0xa_bcde_f012,
        )
        .unwrap();
        assert_eq!(E::decode(ins.encode()).unwrap(), ins);
    }

    #[test]
    fn e_rejects_wide_immediate() {
        let err = E::new(Opcode::Lui as u16, RegisterAccess::local(1), 1 << 36);
        assert!(matches!(
            err,
            Err(CodecError::ImmediateOverflow { bits: 36, .. })
        ));
    }

    #[test]
    fn r_roundtrip() {
        let ins = R::new(
            Opcode::Addi as u16,
            RegisterAccess::local(0x55),
            RegisterAccess::local(0x22),
            0xabcdef,
        )
        .unwrap();
        assert_eq!(R::decode(ins.encode()).unwrap(), ins);
    }

    #[test]
    fn r_rejects_wide_immediate() {
        let err = R::new(
            Opcode::Addi as u16,
            RegisterAccess::local(1),
            RegisterAccess::void(),
            1 << 24,
        );
        assert!(matches!(
            err,
            Err(CodecError::ImmediateOverflow { bits: 24, .. })
        ));
    }

    #[test]
    fn format_recovered_from_every_opcode() {
        for &op in Opcode::ALL {
            assert_eq!(Format::of(op as u16).unwrap(), op.format());
        }
    }

    #[test]
    fn opcode_values_partition_by_format() {
        // No two opcodes share a value, and each value decodes back.
        for &op in Opcode::ALL {
            assert_eq!(Opcode::try_from(op as u16).unwrap(), op);
        }
        let mut values: Vec<u16> = Opcode::ALL.iter().map(|&op| op as u16).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), Opcode::ALL.len());
    }

    #[test]
    fn mnemonic_lookup_is_inverse() {
        for &op in Opcode::ALL {
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(op));
        }
        assert_eq!(Opcode::from_mnemonic("frobnicate"), None);
    }

    #[test]
    fn greedy_bit_is_outside_opcode() {
        let word = N::new(Opcode::Noop as u16).encode() | GREEDY;
        assert!(is_greedy(word));
        assert_eq!(opcode_of(word), Opcode::Noop as u16);
        assert!(!is_greedy(N::new(Opcode::Noop as u16).encode()));
    }

    #[test]
    fn invalid_opcode_rejected() {
        assert!(matches!(
            Opcode::try_from(0x7fff),
            Err(CodecError::InvalidOpcode(0x7fff))
        ));
    }
}
