//! Constant pool and symbol accumulation.
//!
//! The constant pool collects the bytes that end up in `.rodata`. Every
//! entry is stored as an 8-byte little-endian length prefix followed by
//! the raw bytes; the offset handed back (and recorded in `st_value`)
//! is the offset of the data itself, so the prefix sits at `offset - 8`.
//! The STRING executor relies on this to recover an entry's length from
//! its data offset alone.
//!
//! The symbol table mirrors the `.symtab`/`.strtab` pair of the output
//! file while the assembler is still running: entry 0 is the undefined
//! symbol, entry 1 names the source file.

use std::collections::HashMap;

use crate::asm::parser::{LabelDef, LabelType, Node};
use crate::elf::{
    st_info, Elf64Sym, SHN_ABS, SHN_UNDEF, STB_GLOBAL, STB_LOCAL, STN_UNDEF, STT_FILE, STT_NOTYPE,
    STT_OBJECT, STV_DEFAULT,
};
use crate::errors::AsmError;

/// Accumulates `.rodata` contents.
#[derive(Debug, Default)]
pub struct ConstantPool {
    buf: Vec<u8>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry with its length prefix, returning the offset of
    /// the data bytes.
    pub fn intern(&mut self, bytes: &[u8]) -> u64 {
        self.buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        let offset = self.buf.len() as u64;
        self.buf.extend_from_slice(bytes);
        offset
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// The in-progress `.symtab` and `.strtab` pair.
#[derive(Debug)]
pub struct SymbolTable {
    pub entries: Vec<Elf64Sym>,
    pub strtab: Vec<u8>,
    index_by_name: HashMap<String, usize>,
}

impl SymbolTable {
    /// Creates a table holding the two mandatory leading symbols: the
    /// undefined symbol and an STT_FILE symbol naming the source path.
    pub fn new(source_path: &str) -> Self {
        // ELF requires the first byte of the string table to be zero.
        let mut table = Self {
            entries: Vec::new(),
            strtab: vec![0],
            index_by_name: HashMap::new(),
        };

        table.entries.push(Elf64Sym {
            st_name: STN_UNDEF,
            st_info: st_info(STB_LOCAL, STT_NOTYPE),
            st_shndx: SHN_UNDEF,
            ..Default::default()
        });

        let file_name = table.save_string(source_path);
        table.entries.push(Elf64Sym {
            st_name: file_name,
            st_info: st_info(STB_LOCAL, STT_FILE),
            st_shndx: SHN_ABS,
            ..Default::default()
        });

        table
    }

    /// Appends a NUL-terminated string to `.strtab`, returning its offset.
    pub fn save_string(&mut self, s: &str) -> u32 {
        let offset = self.strtab.len() as u32;
        self.strtab.extend_from_slice(s.as_bytes());
        self.strtab.push(0);
        offset
    }

    /// Records a named symbol. Returns its index, or `None` when the name
    /// was already taken.
    pub fn record(&mut self, name: &str, symbol: Elf64Sym) -> Option<usize> {
        if self.index_by_name.contains_key(name) {
            return None;
        }
        let index = self.entries.len();
        self.entries.push(symbol);
        self.index_by_name.insert(name.to_string(), index);
        Some(index)
    }

    /// Returns the index of a named symbol.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index_by_name.get(name).copied()
    }

    /// Mutable access to a named symbol, for the patch-up passes.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Elf64Sym> {
        let index = self.index_of(name)?;
        self.entries.get_mut(index)
    }

    /// Appends the trailing NUL the ELF standard requires of `.strtab`.
    pub fn finish_strtab(&mut self) {
        self.strtab.push(0);
    }
}

/// Records a symbol for every function definition.
///
/// Size and offset stay empty here; the emitter fills them in once the
/// bytecode exists. For `[[extern]]` functions they stay empty in the
/// output, signaling the linker.
pub fn load_function_labels(nodes: &[Node], symbols: &mut SymbolTable) -> Result<(), AsmError> {
    for node in nodes {
        let Node::Function(fn_def) = node else {
            continue;
        };

        let st_name = symbols.save_string(&fn_def.name.text);
        let symbol = Elf64Sym {
            st_name,
            st_info: st_info(STB_GLOBAL, crate::elf::STT_FUNC),
            st_other: STV_DEFAULT,
            ..Default::default()
        };

        if symbols.record(&fn_def.name.text, symbol).is_none() {
            return Err(AsmError::DuplicateSymbol {
                line: fn_def.name.location.line,
                column: fn_def.name.location.column,
                offset: fn_def.name.location.offset,
                name: fn_def.name.text.clone(),
            });
        }
    }
    Ok(())
}

/// Lays out every label definition into the constant pool and records its
/// STT_OBJECT symbol.
pub fn load_value_labels(
    nodes: &[Node],
    pool: &mut ConstantPool,
    symbols: &mut SymbolTable,
) -> Result<(), AsmError> {
    for node in nodes {
        let Node::Label(label) = node else {
            continue;
        };

        let symbol = if label.has_attr("extern") {
            // Neither address nor size of an extern object is known here,
            // only its label.
            let st_name = symbols.save_string(&label.name.text);
            Elf64Sym {
                st_name,
                st_info: st_info(STB_GLOBAL, STT_OBJECT),
                st_other: STV_DEFAULT,
                ..Default::default()
            }
        } else {
            let bytes = label_bytes(label)?;
            let value_off = pool.intern(&bytes);
            let st_name = symbols.save_string(&label.name.text);
            Elf64Sym {
                st_name,
                st_info: st_info(STB_GLOBAL, STT_OBJECT),
                st_other: STV_DEFAULT,
                st_value: value_off,
                st_size: bytes.len() as u64,
                ..Default::default()
            }
        };

        if symbols.record(&label.name.text, symbol).is_none() {
            return Err(AsmError::DuplicateSymbol {
                line: label.name.location.line,
                column: label.name.location.column,
                offset: label.name.location.offset,
                name: label.name.text.clone(),
            });
        }
    }
    Ok(())
}

/// Evaluates a label body into its constant bytes.
///
/// String bodies concatenate string literals; a `* <integer>` directive
/// repeats everything accumulated so far. Atom bodies are a single name.
fn label_bytes(label: &LabelDef) -> Result<Vec<u8>, AsmError> {
    use crate::asm::lexer::TokenKind;

    match label.label_type {
        LabelType::Atom => {
            let Some(token) = label.value.first() else {
                return Err(AsmError::UnexpectedEndOfInput {
                    expected: "an atom value",
                });
            };
            Ok(token.text.clone().into_bytes())
        }
        LabelType::String => {
            let mut s = String::new();
            let mut i = 0;
            while i < label.value.len() {
                let token = &label.value[i];
                match token.kind {
                    TokenKind::String => s.push_str(&token.text),
                    TokenKind::Star => {
                        i += 1;
                        let Some(count) = label
                            .value
                            .get(i)
                            .filter(|t| t.kind == TokenKind::Integer)
                            .and_then(|t| t.text.parse::<usize>().ok())
                        else {
                            return Err(AsmError::InvalidRepetition {
                                line: token.location.line,
                                column: token.location.column,
                                offset: token.location.offset,
                            });
                        };
                        s = s.repeat(count);
                    }
                    _ => {
                        return Err(AsmError::UnexpectedToken {
                            line: token.location.line,
                            column: token.location.column,
                            offset: token.location.offset,
                            expected: "a string literal or * repetition",
                            actual: token.text.clone(),
                        });
                    }
                }
                i += 1;
            }
            Ok(s.into_bytes())
        }
    }
}
