//! Error types for the assembler, the ELF loader, and the interpreter.

use viua_derive::Error;

/// Errors produced by the instruction codec.
///
/// These carry no source location; the assembler stages wrap them into
/// [`AsmError`] together with the offending line.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Immediate does not fit the format's field width.
    #[error("immediate {value:#x} does not fit in {bits} bits of {mnemonic}")]
    ImmediateOverflow {
        mnemonic: &'static str,
        value: u64,
        bits: u32,
    },
    /// Opcode value does not name any known instruction.
    #[error("invalid opcode: {0:#06x}")]
    InvalidOpcode(u16),
    /// Register-set tag out of range in a register access.
    #[error("invalid register set tag: {0}")]
    InvalidRegisterSet(u8),
}

/// Errors surfaced by the assembler pipeline, with source locations.
///
/// Locations are 1-based line and column; `offset` is the byte offset of
/// the token within the source text.
#[derive(Debug, Error)]
pub enum AsmError {
    /// Source contains a character no token can start with.
    #[error("illegal character {character:?}")]
    IllegalCharacter {
        line: usize,
        column: usize,
        offset: usize,
        character: char,
    },
    /// A string literal ran to the end of the line without a closing quote.
    #[error("unterminated string literal (missing closing quote)")]
    UnterminatedString {
        line: usize,
        column: usize,
        offset: usize,
    },
    /// Unrecognized instruction mnemonic.
    #[error("unknown instruction: {name}")]
    UnknownInstruction {
        line: usize,
        column: usize,
        offset: usize,
        name: String,
    },
    /// Parser expected one shape of token and found another.
    #[error("expected {expected}, got {actual}")]
    UnexpectedToken {
        line: usize,
        column: usize,
        offset: usize,
        expected: &'static str,
        actual: String,
    },
    /// Input ended in the middle of a definition.
    #[error("unexpected end of input ({expected})")]
    UnexpectedEndOfInput { expected: &'static str },
    /// More than one function is marked `[[entry_point]]`.
    #[error("duplicated entry point: {function} (first was {first})")]
    DuplicateEntryPoint {
        line: usize,
        column: usize,
        offset: usize,
        function: String,
        first: String,
    },
    /// The same symbol name was defined twice.
    #[error("duplicate symbol: {name}")]
    DuplicateSymbol {
        line: usize,
        column: usize,
        offset: usize,
        name: String,
    },
    /// Reference to a label that no definition provides.
    #[error("undefined label: {name}")]
    UndefinedLabel {
        line: usize,
        column: usize,
        offset: usize,
        name: String,
    },
    /// Wrong number of operands for an instruction.
    #[error("{mnemonic} expects {expected} operand(s), got {actual}")]
    OperandCountMismatch {
        line: usize,
        column: usize,
        offset: usize,
        mnemonic: String,
        expected: usize,
        actual: usize,
    },
    /// Operand has the wrong shape for its slot.
    #[error("invalid operand for {mnemonic}: expected {expected}, got {actual}")]
    InvalidOperand {
        line: usize,
        column: usize,
        offset: usize,
        mnemonic: String,
        expected: &'static str,
        actual: String,
    },
    /// String repetition with a non-integer right-hand side.
    #[error("cannot multiply string constant by non-integer")]
    InvalidRepetition {
        line: usize,
        column: usize,
        offset: usize,
    },
    /// A codec failure attributed to a source line.
    #[error("{source}")]
    Encoding {
        line: usize,
        column: usize,
        offset: usize,
        source: String,
    },
    /// File I/O failure.
    #[error("{path}: {reason}")]
    Io { path: String, reason: String },
}

impl AsmError {
    /// Returns the `(line, column, offset)` triple for errors that carry
    /// a source location.
    pub fn location(&self) -> Option<(usize, usize, usize)> {
        match self {
            AsmError::IllegalCharacter {
                line,
                column,
                offset,
                ..
            }
            | AsmError::UnterminatedString {
                line,
                column,
                offset,
            }
            | AsmError::UnknownInstruction {
                line,
                column,
                offset,
                ..
            }
            | AsmError::UnexpectedToken {
                line,
                column,
                offset,
                ..
            }
            | AsmError::DuplicateEntryPoint {
                line,
                column,
                offset,
                ..
            }
            | AsmError::DuplicateSymbol {
                line,
                column,
                offset,
                ..
            }
            | AsmError::UndefinedLabel {
                line,
                column,
                offset,
                ..
            }
            | AsmError::OperandCountMismatch {
                line,
                column,
                offset,
                ..
            }
            | AsmError::InvalidOperand {
                line,
                column,
                offset,
                ..
            }
            | AsmError::InvalidRepetition {
                line,
                column,
                offset,
            }
            | AsmError::Encoding {
                line,
                column,
                offset,
                ..
            } => Some((*line, *column, *offset)),
            AsmError::UnexpectedEndOfInput { .. } | AsmError::Io { .. } => None,
        }
    }
}

/// Errors produced while validating and mapping an ELF image.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file does not begin with the ELF magic.
    #[error("not an ELF file")]
    NotAnElf,
    /// The `.viua.magic` signature is absent or wrong.
    #[error("missing or corrupt interpreter signature")]
    BadSignature,
    /// A section the loader depends on is not present.
    #[error("missing section: {name}")]
    MissingSection { name: String },
    /// Structural damage: truncated tables, offsets past the end, etc.
    #[error("malformed image: {reason}")]
    Malformed { reason: String },
    /// File I/O failure.
    #[error("{path}: {reason}")]
    Io { path: String, reason: String },
}

/// Runtime conditions that terminate the executing process.
///
/// Every trap records the instruction pointer (as a word index into
/// `.text`) and the opcode that raised it.
#[derive(Debug, Error)]
pub enum Trap {
    /// DIV/DIVI/DIVIU with a zero divisor.
    #[error("division by zero at {ip:#x} (opcode {opcode:#06x})")]
    DivisionByZero { ip: usize, opcode: u16 },
    /// An operand's value tag does not fit the instruction.
    #[error("invalid operand type at {ip:#x} (opcode {opcode:#06x}): expected {expected}, got {actual}")]
    InvalidOperandType {
        ip: usize,
        opcode: u16,
        expected: &'static str,
        actual: &'static str,
    },
    /// Register index outside the register file.
    #[error("register index {index} out of range at {ip:#x} (opcode {opcode:#06x})")]
    RegisterOutOfRange {
        ip: usize,
        opcode: u16,
        index: usize,
    },
    /// The decoded word does not name a known instruction.
    #[error("invalid instruction {raw:#018x} at {ip:#x}")]
    InvalidInstruction { ip: usize, raw: u64 },
    /// Jump or call target outside `.text`.
    #[error("instruction pointer {target:#x} out of range at {ip:#x} (opcode {opcode:#06x})")]
    IpOutOfRange {
        ip: usize,
        opcode: u16,
        target: usize,
    },
    /// Symbol index with no entry in the loaded symbol table.
    #[error("invalid symbol index {index} at {ip:#x} (opcode {opcode:#06x})")]
    InvalidSymbol {
        ip: usize,
        opcode: u16,
        index: usize,
    },
    /// Dereference of an address the pointer registry does not know.
    #[error("invalid pointer {address:#x} at {ip:#x} (opcode {opcode:#06x})")]
    InvalidPointer {
        ip: usize,
        opcode: u16,
        address: u64,
    },
    /// Constant-pool bytes that were expected to be UTF-8 are not.
    #[error("invalid utf-8 in constant at offset {offset} (ip {ip:#x}, opcode {opcode:#06x})")]
    InvalidUtf8 {
        ip: usize,
        opcode: u16,
        offset: usize,
    },
    /// A constant-pool offset that points outside `.rodata`.
    #[error("constant offset {offset:#x} out of range at {ip:#x} (opcode {opcode:#06x})")]
    ConstantOutOfRange {
        ip: usize,
        opcode: u16,
        offset: u64,
    },
    /// A local or parameter access with no frame on the stack.
    #[error("no active frame at {ip:#x} (opcode {opcode:#06x})")]
    NoActiveFrame { ip: usize, opcode: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asm_error_display_includes_fields() {
        let err = AsmError::UnknownInstruction {
            line: 3,
            column: 5,
            offset: 40,
            name: "frobnicate".to_string(),
        };
        assert_eq!(err.to_string(), "unknown instruction: frobnicate");
        assert_eq!(err.location(), Some((3, 5, 40)));
    }

    #[test]
    fn io_error_has_no_location() {
        let err = AsmError::Io {
            path: "missing.asm".to_string(),
            reason: "no such file".to_string(),
        };
        assert!(err.location().is_none());
    }

    #[test]
    fn trap_display_carries_ip_and_opcode() {
        let trap = Trap::DivisionByZero {
            ip: 0x10,
            opcode: 0x1004,
        };
        let rendered = trap.to_string();
        assert!(rendered.contains("0x10"));
        assert!(rendered.contains("0x1004"));
    }

    #[test]
    fn codec_error_display() {
        let err = CodecError::ImmediateOverflow {
            mnemonic: "addi",
            value: 0x1_000_000,
            bits: 24,
        };
        assert!(err.to_string().contains("24 bits"));
    }
}
