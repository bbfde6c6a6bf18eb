//! Assembler pipeline: source text to the parts of an ELF object.
//!
//! Stage order matters and mirrors the toolchain contract:
//!
//! 1. lexing ([`lexer`]) and parsing ([`parser`]);
//! 2. symbol recording for functions, then constant labels ([`pool`]) —
//!    the string table gets its leading and trailing NUL here;
//! 3. pseudo-instruction expansion ([`expand`]), which may still intern
//!    string literals into the pool;
//! 4. bytecode emission and symbol patch-up, then the relocation scan
//!    ([`emit`]).
//!
//! The output, [`ObjectParts`], is exactly what the ELF writer consumes.

pub mod emit;
pub mod expand;
pub mod lexer;
pub mod parser;
pub mod pool;

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::asm::emit::FunctionBody;
use crate::asm::parser::Node;
use crate::asm::pool::{ConstantPool, SymbolTable};
use crate::elf::{Elf64Rel, Elf64Sym};
use crate::errors::AsmError;

/// Everything the ELF writer needs to produce an object file.
#[derive(Debug)]
pub struct ObjectParts {
    pub text: Vec<u64>,
    pub rodata: Vec<u8>,
    pub symbols: Vec<Elf64Sym>,
    pub strtab: Vec<u8>,
    pub relocations: Vec<Elf64Rel>,
    /// `st_value` of the `[[entry_point]]` function, when one exists.
    pub entry: Option<u64>,
}

/// Assembles a full source string.
///
/// `source_path` is recorded in the object's STT_FILE symbol and used in
/// diagnostics.
pub fn assemble_source(source: &str, source_path: &str) -> Result<ObjectParts, AsmError> {
    let tokens = lexer::lex(source)?;
    let nodes = parser::parse(tokens)?;

    let mut symbols = SymbolTable::new(source_path);
    let mut pool = ConstantPool::new();
    pool::load_function_labels(&nodes, &mut symbols)?;
    pool::load_value_labels(&nodes, &mut pool, &mut symbols)?;
    symbols.finish_strtab();

    let mut functions = Vec::new();
    let mut entry_name: Option<String> = None;
    for node in &nodes {
        let Node::Function(fn_def) = node else {
            continue;
        };
        if fn_def.has_attr("entry_point") {
            entry_name = Some(fn_def.name.text.clone());
        }

        let instructions = if fn_def.has_attr("extern") {
            Vec::new()
        } else {
            expand::expand_function(fn_def, &mut pool, &symbols)?
        };
        functions.push(FunctionBody {
            name: fn_def.name.text.clone(),
            is_extern: fn_def.has_attr("extern"),
            instructions,
        });
    }

    let text = emit::emit_text(&functions, &mut symbols);
    let relocations = emit::make_reloc_table(&text);

    let entry = entry_name
        .and_then(|name| symbols.index_of(&name))
        .map(|index| symbols.entries[index].st_value);

    Ok(ObjectParts {
        text,
        rodata: pool.into_bytes(),
        symbols: symbols.entries,
        strtab: symbols.strtab,
        relocations,
        entry,
    })
}

/// Convenience: assemble directly from a file path.
pub fn assemble_file<P: AsRef<Path>>(path: P) -> Result<ObjectParts, AsmError> {
    let path_ref = path.as_ref();
    let source = fs::read_to_string(path_ref).map_err(|e| AsmError::Io {
        path: path_ref.display().to_string(),
        reason: e.to_string(),
    })?;
    assemble_source(&source, &path_ref.display().to_string())
}

/// Formats a compiler-style diagnostic for an assembly failure.
///
/// ```text
/// error: unknown instruction: frobnicate
///  --> input.asm:3:5
///   |
///    3 |     frobnicate %1
///   |     ^
/// ```
pub fn render_diagnostic(file: &str, source: &str, err: &AsmError) -> String {
    let mut diag = String::new();
    let Some((line, column, _)) = err.location() else {
        let _ = writeln!(diag, "error: {err}");
        return diag;
    };

    let _ = writeln!(diag, "error: {err}");
    let _ = writeln!(diag, " --> {file}:{line}:{column}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let underline = " ".repeat(column.saturating_sub(1));
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", line, line_text);
        let _ = writeln!(diag, "  | {}^", underline);
    }

    diag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{opcode_of, Opcode};
    use crate::elf::{r_sym, st_type, STT_FUNC};

    #[test]
    fn assemble_empty_main() {
        let parts = assemble_source(".function: main\n    return\n.end", "test.asm").unwrap();
        assert_eq!(parts.text.len(), 2);
        assert_eq!(opcode_of(parts.text[0]), Opcode::Halt as u16);
        assert_eq!(opcode_of(parts.text[1]), Opcode::Return as u16);

        let main = parts
            .symbols
            .iter()
            .find(|s| s.st_value == 8 && st_type(s.st_info) == STT_FUNC)
            .expect("main symbol at offset 8");
        assert_eq!(main.st_size, 8);
    }

    #[test]
    fn strtab_starts_and_ends_with_nul() {
        let parts = assemble_source(".function: main\n    return\n.end", "test.asm").unwrap();
        assert_eq!(parts.strtab.first(), Some(&0));
        assert_eq!(parts.strtab.last(), Some(&0));
    }

    #[test]
    fn entry_point_resolved_to_st_value() {
        let parts = assemble_source(
            ".function: [[entry_point]] main\n    return\n.end",
            "test.asm",
        )
        .unwrap();
        assert_eq!(parts.entry, Some(8));
    }

    #[test]
    fn no_entry_point_is_none() {
        let parts = assemble_source(".function: main\n    return\n.end", "test.asm").unwrap();
        assert_eq!(parts.entry, None);
    }

    #[test]
    fn cross_function_call_produces_one_jump_slot_reloc() {
        let parts = assemble_source(
            ".function: f\n    return\n.end\n\
             .function: [[entry_point]] main\n    call %1, f\n    return\n.end",
            "test.asm",
        )
        .unwrap();

        assert_eq!(parts.relocations.len(), 1);
        let rel = &parts.relocations[0];
        // The symbol index resolves to f.
        let sym = &parts.symbols[r_sym(rel.r_info) as usize];
        assert_eq!(st_type(sym.st_info), STT_FUNC);
        // f is the first function: its body starts right after the guard.
        assert_eq!(sym.st_value, 8);
        // r_offset points at the first word of the LIH/LIL pair, which is
        // the first word of main's body.
        let main = parts
            .symbols
            .iter()
            .find(|s| st_type(s.st_info) == STT_FUNC && s.st_value != 8)
            .expect("main symbol");
        assert_eq!(rel.r_offset, main.st_value);
    }

    #[test]
    fn every_call_and_atom_covered_by_relocs() {
        let parts = assemble_source(
            ".label: answer atom everything\n\
             .function: f\n    return\n.end\n\
             .function: main\n    call %1, f\n    atom %2, answer\n    return\n.end",
            "test.asm",
        )
        .unwrap();

        let call_or_atom = parts
            .text
            .iter()
            .filter(|&&w| {
                matches!(
                    Opcode::try_from(opcode_of(w)),
                    Ok(Opcode::Call) | Ok(Opcode::Atom)
                )
            })
            .count();
        assert_eq!(parts.relocations.len(), call_or_atom);
    }

    #[test]
    fn io_error_reported_with_path() {
        let err = assemble_file("/nonexistent/input.asm").unwrap_err();
        assert!(matches!(err, AsmError::Io { ref path, .. } if path.contains("input.asm")));
    }

    #[test]
    fn diagnostic_rendering_points_at_column() {
        let source = ".function: main\n    frobnicate %1\n.end";
        let err = assemble_source(source, "test.asm").unwrap_err();
        let diag = render_diagnostic("test.asm", source, &err);
        assert!(diag.contains("error: unknown instruction: frobnicate"));
        assert!(diag.contains(" --> test.asm:2:5"));
        assert!(diag.contains("   2 |     frobnicate %1"));
    }
}
