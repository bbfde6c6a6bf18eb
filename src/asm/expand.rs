//! Pseudo-instruction expansion.
//!
//! Lowers source instructions into fully-resolved machine instructions:
//!
//! - `li %r, <imm64>` becomes a LUI/ADDI chain (plus a MUL step when the
//!   low part does not fit 24 bits),
//! - `call`/`atom` become a fixed two-word LIH/LIL pair loading the symbol
//!   index, followed by the real CALL/ATOM — the shape the relocation
//!   scanner depends on,
//! - `string` interns its literal and becomes `li` of the constant-pool
//!   offset plus a STRING word.
//!
//! Every word of an expansion except the last carries the GREEDY bit, so
//! the scheduler executes the whole sequence atomically. Each lowered
//! instruction remembers the source line it came from (`physical_index`).

use crate::arch::{self, Opcode, RegisterAccess, GREEDY};
use crate::asm::lexer::{integer_bits, Token, TokenKind};
use crate::asm::parser::{FnDef, SourceInstruction};
use crate::asm::pool::{ConstantPool, SymbolTable};
use crate::errors::{AsmError, CodecError};

/// Scratch registers used by expansions. The high end of the local set is
/// reserved so user code in low registers survives an expansion.
pub const LI_SCRATCH_A: u8 = 254;
pub const LI_SCRATCH_B: u8 = 255;
pub const SYMBOL_SCRATCH: u8 = 253;

/// A fully-resolved instruction, one of the five encodable shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instr {
    N(arch::N),
    S(arch::S),
    D(arch::D),
    T(arch::T),
    F(arch::F),
    E(arch::E),
    R(arch::R),
}

impl Instr {
    /// The instruction's opcode field.
    pub fn opcode(&self) -> u16 {
        match self {
            Instr::N(i) => i.opcode,
            Instr::S(i) => i.opcode,
            Instr::D(i) => i.opcode,
            Instr::T(i) => i.opcode,
            Instr::F(i) => i.opcode,
            Instr::E(i) => i.opcode,
            Instr::R(i) => i.opcode,
        }
    }

    /// Encodes into an instruction word (without the greedy bit).
    pub fn encode(&self) -> u64 {
        match self {
            Instr::N(i) => i.encode(),
            Instr::S(i) => i.encode(),
            Instr::D(i) => i.encode(),
            Instr::T(i) => i.encode(),
            Instr::F(i) => i.encode(),
            Instr::E(i) => i.encode(),
            Instr::R(i) => i.encode(),
        }
    }
}

/// A lowered instruction with its bundle flag and source line.
#[derive(Clone, Copy, Debug)]
pub struct Lowered {
    pub instr: Instr,
    pub greedy: bool,
    pub physical_index: usize,
}

impl Lowered {
    /// Encodes into the final instruction word, greedy bit included.
    pub fn encode(&self) -> u64 {
        let word = self.instr.encode();
        if self.greedy {
            word | GREEDY
        } else {
            word
        }
    }
}

/// Splits a 64-bit value into the parts the `li` expansion loads.
///
/// Returns `(high_36, ((base, multiplier), remainder))`. When the low
/// part fits 24 bits the multiplier is zero and `base` holds the low part
/// itself; otherwise `base * multiplier + remainder` reconstructs it.
pub fn to_loading_parts_unsigned(value: u64) -> (u64, ((u32, u32), u32)) {
    const LOW_24: u64 = 0x0000_0000_00ff_ffff;
    const HIGH_36: u64 = 0xffff_ffff_f000_0000;

    let high_part = (value & HIGH_36) >> 28;
    let low_part = (value & !HIGH_36) as u32;

    // If the low part consists of only 24 bits, two instructions are
    // enough: lui for the high 36 bits, addi for the low 24.
    if (low_part as u64 & LOW_24) == low_part as u64 {
        return (high_part, ((low_part, 0), 0));
    }

    let multiplier = 16;
    let remainder = low_part % multiplier;
    let base = (low_part - remainder) / multiplier;

    (high_part, ((base, multiplier), remainder))
}

/// Emits the `li` expansion for a 64-bit bit pattern.
///
/// `signed` selects the LUI/ADDI family over LUIU/ADDIU. When
/// `whole_greedy` is set the final word keeps its greedy flag too, so the
/// sequence can sit inside a larger bundle.
fn expand_li(
    out: &mut Vec<Lowered>,
    target: RegisterAccess,
    bits: u64,
    signed: bool,
    whole_greedy: bool,
    physical_index: usize,
) -> Result<(), CodecError> {
    let (high, ((base, multiplier), remainder)) = to_loading_parts_unsigned(bits);

    let lui = if signed { Opcode::Lui } else { Opcode::Luiu };
    let addi = if signed { Opcode::Addi } else { Opcode::Addiu };

    let mut instrs = Vec::new();

    // Only use lui if some of the highest 36 bits are set; otherwise it
    // is just overhead.
    let lui_emitted = high != 0;
    if lui_emitted {
        instrs.push(Instr::E(arch::E::new(lui as u16, target, high)?));
    }

    let scratch_a = RegisterAccess::local(LI_SCRATCH_A);
    let scratch_b = RegisterAccess::local(LI_SCRATCH_B);

    if multiplier != 0 {
        instrs.push(Instr::R(arch::R::new(
            addi as u16,
            scratch_a,
            RegisterAccess::void(),
            base,
        )?));
        instrs.push(Instr::R(arch::R::new(
            addi as u16,
            scratch_b,
            RegisterAccess::void(),
            multiplier,
        )?));
        instrs.push(Instr::T(arch::T::new(
            Opcode::Mul as u16,
            scratch_a,
            scratch_a,
            scratch_b,
        )));
        instrs.push(Instr::R(arch::R::new(
            addi as u16,
            scratch_b,
            RegisterAccess::void(),
            remainder,
        )?));
        instrs.push(Instr::T(arch::T::new(
            Opcode::Add as u16,
            scratch_a,
            scratch_a,
            scratch_b,
        )));
        let lhs = if lui_emitted {
            target
        } else {
            RegisterAccess::void()
        };
        instrs.push(Instr::T(arch::T::new(
            Opcode::Add as u16,
            target,
            lhs,
            scratch_a,
        )));
    } else {
        // The low part is added to the lui result when there is one, and
        // stands alone otherwise.
        let input = if lui_emitted {
            target
        } else {
            RegisterAccess::void()
        };
        instrs.push(Instr::R(arch::R::new(addi as u16, target, input, base)?));
    }

    let last = instrs.len() - 1;
    for (i, instr) in instrs.into_iter().enumerate() {
        out.push(Lowered {
            instr,
            greedy: whole_greedy || i != last,
            physical_index,
        });
    }
    Ok(())
}

/// Emits the fixed two-word symbol-index load in front of CALL/ATOM.
fn expand_symbol_index(out: &mut Vec<Lowered>, index: u64, physical_index: usize) {
    let scratch = RegisterAccess::local(SYMBOL_SCRATCH);
    out.push(Lowered {
        instr: Instr::F(arch::F::new(
            Opcode::Lih as u16,
            scratch,
            (index >> 32) as u32,
        )),
        greedy: true,
        physical_index,
    });
    out.push(Lowered {
        instr: Instr::F(arch::F::new(Opcode::Lil as u16, scratch, index as u32)),
        greedy: true,
        physical_index,
    });
}

/// Expands one function body into its lowered instruction sequence.
pub fn expand_function(
    fn_def: &FnDef,
    pool: &mut ConstantPool,
    symbols: &SymbolTable,
) -> Result<Vec<Lowered>, AsmError> {
    let mut out = Vec::with_capacity(fn_def.instructions.len());

    for ins in &fn_def.instructions {
        match ins.mnemonic.as_str() {
            "li" => {
                check_arity(ins, 2)?;
                let target = operand_register(ins, 0)?;
                let (bits, negative) = operand_integer(ins, 1)?;
                expand_li(&mut out, target, bits, negative, ins.greedy, ins.physical_index)
                    .map_err(|e| encoding_error(ins, e))?;
            }
            "call" | "atom" => {
                check_arity(ins, 2)?;
                let target = operand_register(ins, 0)?;
                let name = operand_name(ins, 1)?;
                let index = resolve_symbol(ins, symbols, name)?;

                expand_symbol_index(&mut out, index as u64, ins.physical_index);
                let opcode = if ins.mnemonic == "call" {
                    Opcode::Call
                } else {
                    Opcode::Atom
                };
                out.push(Lowered {
                    instr: Instr::D(arch::D::new(
                        opcode as u16,
                        target,
                        RegisterAccess::local(SYMBOL_SCRATCH),
                    )),
                    greedy: ins.greedy,
                    physical_index: ins.physical_index,
                });
            }
            "string" => {
                check_arity(ins, 2)?;
                let target = operand_register(ins, 0)?;
                let token = &ins.operands[1];
                let offset = match token.kind {
                    TokenKind::String => pool.intern(token.text.as_bytes()),
                    TokenKind::Name => {
                        let index = resolve_symbol(ins, symbols, &token.text)?;
                        symbols.entries[index].st_value
                    }
                    _ => return Err(invalid_operand(ins, 1, "a string literal or label")),
                };

                expand_li(&mut out, target, offset, false, true, ins.physical_index)
                    .map_err(|e| encoding_error(ins, e))?;
                out.push(Lowered {
                    instr: Instr::S(arch::S::new(Opcode::String as u16, target)),
                    greedy: ins.greedy,
                    physical_index: ins.physical_index,
                });
            }
            mnemonic => {
                let Some(opcode) = Opcode::from_mnemonic(mnemonic) else {
                    return Err(AsmError::UnknownInstruction {
                        line: ins.location.line,
                        column: ins.location.column,
                        offset: ins.location.offset,
                        name: mnemonic.to_string(),
                    });
                };
                out.push(lower_plain(ins, opcode)?);
            }
        }
    }

    Ok(out)
}

/// Lowers a non-pseudo instruction straight into its format shape.
fn lower_plain(ins: &SourceInstruction, opcode: Opcode) -> Result<Lowered, AsmError> {
    use crate::arch::Format;

    let instr = match opcode.format() {
        Format::N => {
            check_arity(ins, 0)?;
            Instr::N(arch::N::new(opcode as u16))
        }
        Format::S => {
            check_arity(ins, 1)?;
            Instr::S(arch::S::new(opcode as u16, operand_register(ins, 0)?))
        }
        Format::D => {
            check_arity(ins, 2)?;
            Instr::D(arch::D::new(
                opcode as u16,
                operand_register(ins, 0)?,
                operand_register(ins, 1)?,
            ))
        }
        Format::T => {
            check_arity(ins, 3)?;
            Instr::T(arch::T::new(
                opcode as u16,
                operand_register(ins, 0)?,
                operand_register(ins, 1)?,
                operand_register(ins, 2)?,
            ))
        }
        Format::F => {
            check_arity(ins, 2)?;
            let out = operand_register(ins, 0)?;
            let immediate = operand_imm32(ins, 1, opcode)?;
            Instr::F(arch::F::new(opcode as u16, out, immediate))
        }
        Format::E => {
            check_arity(ins, 2)?;
            let out = operand_register(ins, 0)?;
            let (bits, _) = operand_integer(ins, 1)?;
            Instr::E(
                arch::E::new(opcode as u16, out, bits).map_err(|e| encoding_error(ins, e))?,
            )
        }
        Format::R => {
            check_arity(ins, 3)?;
            let out = operand_register(ins, 0)?;
            let input = operand_register(ins, 1)?;
            let (bits, _) = operand_integer(ins, 2)?;
            if bits > u32::MAX as u64 {
                return Err(encoding_error(
                    ins,
                    CodecError::ImmediateOverflow {
                        mnemonic: opcode.mnemonic(),
                        value: bits,
                        bits: arch::R::IMMEDIATE_BITS,
                    },
                ));
            }
            Instr::R(
                arch::R::new(opcode as u16, out, input, bits as u32)
                    .map_err(|e| encoding_error(ins, e))?,
            )
        }
    };

    Ok(Lowered {
        instr,
        greedy: ins.greedy,
        physical_index: ins.physical_index,
    })
}

fn check_arity(ins: &SourceInstruction, expected: usize) -> Result<(), AsmError> {
    if ins.operands.len() != expected {
        return Err(AsmError::OperandCountMismatch {
            line: ins.location.line,
            column: ins.location.column,
            offset: ins.location.offset,
            mnemonic: ins.mnemonic.clone(),
            expected,
            actual: ins.operands.len(),
        });
    }
    Ok(())
}

fn invalid_operand(ins: &SourceInstruction, index: usize, expected: &'static str) -> AsmError {
    let token: &Token = &ins.operands[index];
    AsmError::InvalidOperand {
        line: token.location.line,
        column: token.location.column,
        offset: token.location.offset,
        mnemonic: ins.mnemonic.clone(),
        expected,
        actual: token.text.clone(),
    }
}

fn encoding_error(ins: &SourceInstruction, err: CodecError) -> AsmError {
    AsmError::Encoding {
        line: ins.location.line,
        column: ins.location.column,
        offset: ins.location.offset,
        source: err.to_string(),
    }
}

fn operand_register(ins: &SourceInstruction, index: usize) -> Result<RegisterAccess, AsmError> {
    ins.operands[index]
        .register
        .ok_or_else(|| invalid_operand(ins, index, "a register access"))
}

fn operand_name<'a>(ins: &'a SourceInstruction, index: usize) -> Result<&'a str, AsmError> {
    let token = &ins.operands[index];
    if token.kind != TokenKind::Name {
        return Err(invalid_operand(ins, index, "a label name"));
    }
    Ok(&token.text)
}

/// Returns an integer operand's raw bits and whether it was negative.
fn operand_integer(ins: &SourceInstruction, index: usize) -> Result<(u64, bool), AsmError> {
    let token = &ins.operands[index];
    if token.kind != TokenKind::Integer {
        return Err(invalid_operand(ins, index, "an integer literal"));
    }
    integer_bits(&token.text).ok_or_else(|| invalid_operand(ins, index, "an integer literal"))
}

/// Parses a 32-bit immediate; FLOAT also accepts a float literal, whose
/// single-precision bit pattern is used.
fn operand_imm32(ins: &SourceInstruction, index: usize, opcode: Opcode) -> Result<u32, AsmError> {
    let token = &ins.operands[index];
    match token.kind {
        TokenKind::Float if opcode == Opcode::Float => {
            let value: f32 = token
                .text
                .parse()
                .map_err(|_| invalid_operand(ins, index, "a float literal"))?;
            Ok(value.to_bits())
        }
        TokenKind::Integer => {
            let (bits, _) = operand_integer(ins, index)?;
            if bits > u32::MAX as u64 {
                return Err(encoding_error(
                    ins,
                    CodecError::ImmediateOverflow {
                        mnemonic: opcode.mnemonic(),
                        value: bits,
                        bits: 32,
                    },
                ));
            }
            Ok(bits as u32)
        }
        _ => Err(invalid_operand(ins, index, "an immediate")),
    }
}

fn resolve_symbol(
    ins: &SourceInstruction,
    symbols: &SymbolTable,
    name: &str,
) -> Result<usize, AsmError> {
    symbols.index_of(name).ok_or_else(|| AsmError::UndefinedLabel {
        line: ins.location.line,
        column: ins.location.column,
        offset: ins.location.offset,
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::lexer::lex;
    use crate::asm::parser::{parse, Node};
    use crate::elf::Elf64Sym;

    fn expand_body(body: &str) -> Result<Vec<Lowered>, AsmError> {
        let source = format!(".function: main\n{body}\n.end");
        let nodes = parse(lex(&source).unwrap()).unwrap();
        let Node::Function(fn_def) = &nodes[0] else {
            panic!("expected a function");
        };
        let mut pool = ConstantPool::new();
        let mut symbols = SymbolTable::new("test.asm");
        let _ = symbols.record("f", Elf64Sym::default());
        expand_function(fn_def, &mut pool, &symbols)
    }

    fn opcodes(lowered: &[Lowered]) -> Vec<Opcode> {
        lowered
            .iter()
            .map(|l| Opcode::try_from(l.instr.opcode()).unwrap())
            .collect()
    }

    #[test]
    fn loading_parts_reconstruct() {
        for wanted in [
            0x0000_0000_0000_0000u64,
            0x0000_0000_0000_0001,
            0x0000_0000_00be_dead,
            0x0000_0000_dead_beef,
            0xdead_beef_d0ad_beef,
            0xdead_beef_dead_beef,
            0xffff_ffff_ffff_ffff,
        ] {
            let (high, ((base, multiplier), remainder)) = to_loading_parts_unsigned(wanted);
            let low = if multiplier != 0 {
                base * multiplier + remainder
            } else {
                base
            };
            assert_eq!((high << 28) | low as u64, wanted, "value {wanted:#x}");
        }
    }

    #[test]
    fn li_low_24_is_single_addiu() {
        let lowered = expand_body("    li %1, 0x00bedead").unwrap();
        assert_eq!(opcodes(&lowered), vec![Opcode::Addiu]);
        assert!(!lowered[0].greedy);

        let Instr::R(r) = lowered[0].instr else {
            panic!("expected an R word");
        };
        assert_eq!(r.immediate, 0x00be_dead);
        assert!(r.input.is_void());
    }

    #[test]
    fn li_full_width_uses_mul_chain() {
        let lowered = expand_body("    li %1, 0xdeadbeefdeadbeef").unwrap();
        assert_eq!(
            opcodes(&lowered),
            vec![
                Opcode::Luiu,
                Opcode::Addiu,
                Opcode::Addiu,
                Opcode::Mul,
                Opcode::Addiu,
                Opcode::Add,
                Opcode::Add,
            ]
        );
        // All flagged greedy except the last.
        let greedy: Vec<bool> = lowered.iter().map(|l| l.greedy).collect();
        assert_eq!(greedy, vec![true, true, true, true, true, true, false]);
    }

    #[test]
    fn li_negative_uses_signed_family() {
        let lowered = expand_body("    li %1, -1").unwrap();
        let ops = opcodes(&lowered);
        assert!(ops.contains(&Opcode::Lui));
        assert!(!ops.contains(&Opcode::Luiu));
    }

    #[test]
    fn li_high_with_low_24_adds_into_target() {
        // High 36 bits set, low part fits 24 bits: lui + addiu where the
        // addiu reads the target back, not void.
        let lowered = expand_body("    li %1, 0xdeadbeefd0adbeef").unwrap();
        assert_eq!(opcodes(&lowered), vec![Opcode::Luiu, Opcode::Addiu]);
        let Instr::R(r) = lowered[1].instr else {
            panic!("expected an R word");
        };
        assert!(!r.input.is_void());
        assert_eq!(r.input, r.out);
    }

    #[test]
    fn call_expands_to_symbol_pair() {
        let lowered = expand_body("    call %1, f").unwrap();
        assert_eq!(
            opcodes(&lowered),
            vec![Opcode::Lih, Opcode::Lil, Opcode::Call]
        );
        assert!(lowered[0].greedy);
        assert!(lowered[1].greedy);
        assert!(!lowered[2].greedy);

        let Instr::F(lil) = lowered[1].instr else {
            panic!("expected an F word");
        };
        // Symbol index of "f" in the table (after undefined + file).
        assert_eq!(lil.immediate, 2);
    }

    #[test]
    fn call_to_unknown_label_rejected() {
        assert!(matches!(
            expand_body("    call %1, missing"),
            Err(AsmError::UndefinedLabel { ref name, .. }) if name == "missing"
        ));
    }

    #[test]
    fn string_literal_expands_to_li_and_string() {
        let lowered = expand_body("    string %1, \"hi\"").unwrap();
        let ops = opcodes(&lowered);
        assert_eq!(*ops.last().unwrap(), Opcode::String);
        // The li chain stays greedy so STRING lands in the same bundle.
        assert!(lowered[..lowered.len() - 1].iter().all(|l| l.greedy));
    }

    #[test]
    fn unknown_mnemonic_rejected() {
        assert!(matches!(
            expand_body("    frobnicate %1"),
            Err(AsmError::UnknownInstruction { ref name, .. }) if name == "frobnicate"
        ));
    }

    #[test]
    fn arity_checked() {
        assert!(matches!(
            expand_body("    add %1, %2"),
            Err(AsmError::OperandCountMismatch {
                expected: 3,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn wide_r_immediate_rejected() {
        assert!(matches!(
            expand_body("    addi %1, void, 0x1000000"),
            Err(AsmError::Encoding { .. })
        ));
    }

    #[test]
    fn physical_index_points_at_source_line() {
        let lowered = expand_body("    noop\n    li %1, 0xdeadbeefdeadbeef").unwrap();
        assert_eq!(lowered[0].physical_index, 2);
        assert!(lowered[1..].iter().all(|l| l.physical_index == 3));
    }
}
