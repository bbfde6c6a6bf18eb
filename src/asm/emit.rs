//! Bytecode emission and relocation scanning.
//!
//! Emission concatenates every function's lowered body into the `.text`
//! image. The first word of the image is a HALT guard, so no function can
//! ever start at offset zero and a wild jump to the image base stops the
//! process instead of running somebody else's code.
//!
//! The relocation scan walks the finished image: every CALL or ATOM was
//! lowered behind a fixed two-word LIH/LIL pair holding the symbol index,
//! so the scanner rebuilds the index from those words and records an
//! `Elf64_Rel` pointing at the first word of the pair.

use crate::arch::{self, opcode_of, Opcode, WORD_SIZE};
use crate::asm::expand::Lowered;
use crate::asm::pool::SymbolTable;
use crate::elf::{r_info, Elf64Rel, R_VIUA_JUMP_SLOT, R_VIUA_OBJECT};

/// One function's lowered body, in declaration order.
#[derive(Debug)]
pub struct FunctionBody {
    pub name: String,
    pub is_extern: bool,
    pub instructions: Vec<Lowered>,
}

/// Emits all function bodies into a `.text` image and patches each
/// function symbol's `st_value` (byte offset) and `st_size` (byte length).
///
/// `[[extern]]` functions have no body and keep their zeroed symbol, which
/// is the signal to the linker that the definition lives elsewhere.
pub fn emit_text(functions: &[FunctionBody], symbols: &mut SymbolTable) -> Vec<u64> {
    let ops_count = 1 + functions
        .iter()
        .map(|f| f.instructions.len())
        .sum::<usize>();

    let mut text = Vec::with_capacity(ops_count);
    text.push(arch::N::new(Opcode::Halt as u16).encode());

    for function in functions {
        if function.is_extern {
            continue;
        }

        let fn_addr = (text.len() * WORD_SIZE) as u64;
        if let Some(symbol) = symbols.get_mut(&function.name) {
            symbol.st_value = fn_addr;
            symbol.st_size = (function.instructions.len() * WORD_SIZE) as u64;
        }

        for lowered in &function.instructions {
            text.push(lowered.encode());
        }
    }

    text
}

/// Scans a `.text` image for CALL and ATOM words and produces the
/// relocation table.
///
/// The symbol index is reconstructed from the two preceding F-format
/// words: the high 32 bits from the word at `i - 2`, the low 32 bits from
/// `i - 1`. The relocation's `r_offset` points at the first of the pair,
/// which is the word a linker would rewrite.
pub fn make_reloc_table(text: &[u64]) -> Vec<Elf64Rel> {
    let mut reloc_table = Vec::new();

    for (i, &word) in text.iter().enumerate() {
        let kind = match Opcode::try_from(opcode_of(word)) {
            Ok(Opcode::Call) => R_VIUA_JUMP_SLOT,
            Ok(Opcode::Atom) => R_VIUA_OBJECT,
            _ => continue,
        };

        if i < 2 {
            continue;
        }
        let (Ok(hi), Ok(lo)) = (arch::F::decode(text[i - 2]), arch::F::decode(text[i - 1]))
        else {
            continue;
        };

        let symtab_entry_index = ((hi.immediate as u64) << 32 | lo.immediate as u64) as u32;
        reloc_table.push(Elf64Rel {
            r_offset: ((i - 2) * WORD_SIZE) as u64,
            r_info: r_info(symtab_entry_index, kind),
        });
    }

    reloc_table
}
