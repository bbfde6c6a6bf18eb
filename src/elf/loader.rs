//! ELF loading and validation.
//!
//! The loader works from a byte slice, so the assembler/loader pair can
//! round-trip entirely in memory; the interpreter CLI reads the file
//! first and hands the bytes over.
//!
//! Validation covers the ELF magic and the interpreter signature (the
//! `.viua.magic` bytes carried in a PT_NULL program header). The `.text`
//! and `.rodata` images are copied out, the function table is rebuilt
//! from the STT_FUNC entries of `.symtab`, and the entry point is
//! converted from a file offset back to a word index.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::arch::WORD_SIZE;
use crate::elf::{
    st_type, Elf64Ehdr, Elf64Phdr, Elf64Shdr, Elf64Sym, EHDR_SIZE, PT_NULL, STT_FUNC, SYM_SIZE,
    VIUA_MAGIC,
};
use crate::encoding::Decode;
use crate::errors::LoadError;

/// A validated, in-memory ELF image.
#[derive(Debug)]
pub struct LoadedImage {
    pub header: Elf64Ehdr,
    /// `.text` as instruction words.
    pub text: Vec<u64>,
    /// `.rodata` bytes.
    pub rodata: Vec<u8>,
    /// `.symtab` entries.
    pub symbols: Vec<Elf64Sym>,
    /// `.strtab` bytes backing the symbol names.
    pub strtab: Vec<u8>,
    /// Entry point as a word index into `text`.
    pub entry: Option<usize>,
}

fn malformed(reason: impl Into<String>) -> LoadError {
    LoadError::Malformed {
        reason: reason.into(),
    }
}

/// Bounds-checked slice of the input file.
fn slice_of<'a>(bytes: &'a [u8], offset: u64, size: u64, what: &str) -> Result<&'a [u8], LoadError> {
    let start = usize::try_from(offset).map_err(|_| malformed(format!("{what} offset")))?;
    let len = usize::try_from(size).map_err(|_| malformed(format!("{what} size")))?;
    let end = start
        .checked_add(len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| malformed(format!("{what} extends past end of file")))?;
    Ok(&bytes[start..end])
}

/// Decodes a table of `count` fixed-size entries.
fn table_of<T: Decode>(
    bytes: &[u8],
    offset: u64,
    count: usize,
    entsize: usize,
    what: &str,
) -> Result<Vec<T>, LoadError> {
    let mut table = Vec::with_capacity(count);
    let mut input = slice_of(bytes, offset, (count * entsize) as u64, what)?;
    for _ in 0..count {
        table.push(T::decode(&mut input).map_err(|_| malformed(format!("{what} entry")))?);
    }
    Ok(table)
}

/// Reads a NUL-terminated string out of a string table.
fn string_at(table: &[u8], offset: u32) -> Option<&str> {
    let start = offset as usize;
    let rest = table.get(start..)?;
    let end = rest.iter().position(|&b| b == 0)?;
    std::str::from_utf8(&rest[..end]).ok()
}

impl LoadedImage {
    /// Validates and maps an image from raw bytes.
    pub fn load(bytes: &[u8]) -> Result<Self, LoadError> {
        if bytes.len() < EHDR_SIZE || &bytes[0..4] != b"\x7fELF" {
            return Err(LoadError::NotAnElf);
        }
        let header =
            Elf64Ehdr::decode(&mut &bytes[..]).map_err(|_| LoadError::NotAnElf)?;

        // The interpreter signature travels in the p_offset field of a
        // PT_NULL program header.
        let phdrs: Vec<Elf64Phdr> = table_of(
            bytes,
            header.e_phoff,
            header.e_phnum as usize,
            header.e_phentsize as usize,
            "program header table",
        )?;
        let signed = phdrs
            .iter()
            .any(|p| p.p_type == PT_NULL && p.p_offset.to_le_bytes() == VIUA_MAGIC);
        if !signed {
            return Err(LoadError::BadSignature);
        }

        let shdrs: Vec<Elf64Shdr> = table_of(
            bytes,
            header.e_shoff,
            header.e_shnum as usize,
            header.e_shentsize as usize,
            "section header table",
        )?;

        let shstr_section = shdrs
            .get(header.e_shstrndx as usize)
            .ok_or_else(|| malformed("section name table index"))?;
        let shstr = slice_of(
            bytes,
            shstr_section.sh_offset,
            shstr_section.sh_size,
            ".shstrtab",
        )?;

        let find = |name: &str| -> Result<&Elf64Shdr, LoadError> {
            shdrs
                .iter()
                .find(|s| string_at(shstr, s.sh_name) == Some(name))
                .ok_or_else(|| LoadError::MissingSection {
                    name: name.to_string(),
                })
        };

        let text_section = find(".text")?;
        let text_bytes = slice_of(bytes, text_section.sh_offset, text_section.sh_size, ".text")?;
        if text_bytes.len() % WORD_SIZE != 0 {
            return Err(malformed(".text size is not word-aligned"));
        }
        let text: Vec<u64> = text_bytes
            .chunks_exact(WORD_SIZE)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap_or_default()))
            .collect();

        let rodata_section = find(".rodata")?;
        let rodata = slice_of(
            bytes,
            rodata_section.sh_offset,
            rodata_section.sh_size,
            ".rodata",
        )?
        .to_vec();

        let symtab_section = find(".symtab")?;
        if symtab_section.sh_size % SYM_SIZE as u64 != 0 {
            return Err(malformed(".symtab size is not a whole number of entries"));
        }
        let symbols: Vec<Elf64Sym> = table_of(
            bytes,
            symtab_section.sh_offset,
            (symtab_section.sh_size / SYM_SIZE as u64) as usize,
            SYM_SIZE,
            ".symtab",
        )?;

        let strtab_section = find(".strtab")?;
        let strtab = slice_of(
            bytes,
            strtab_section.sh_offset,
            strtab_section.sh_size,
            ".strtab",
        )?
        .to_vec();

        // e_entry is an absolute file offset; the word index inside .text
        // is relative to the section's own offset.
        let entry = if header.e_entry != 0 {
            let relative = header
                .e_entry
                .checked_sub(text_section.sh_offset)
                .ok_or_else(|| malformed("entry point before .text"))?;
            let index = (relative / WORD_SIZE as u64) as usize;
            if relative % WORD_SIZE as u64 != 0 || index >= text.len() {
                return Err(malformed("entry point outside .text"));
            }
            Some(index)
        } else {
            None
        };

        Ok(Self {
            header,
            text,
            rodata,
            symbols,
            strtab,
            entry,
        })
    }

    /// Loads an image from a file.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path_ref = path.as_ref();
        let bytes = fs::read(path_ref).map_err(|e| LoadError::Io {
            path: path_ref.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::load(&bytes)
    }

    /// Resolves a symbol's name through `.strtab`.
    pub fn symbol_name(&self, symbol: &Elf64Sym) -> Option<&str> {
        string_at(&self.strtab, symbol.st_name)
    }

    /// Rebuilds the function table: `.text` byte offset to (name, size),
    /// from the STT_FUNC entries of `.symtab`.
    pub fn function_table(&self) -> BTreeMap<u64, (String, u64)> {
        self.symbols
            .iter()
            .filter(|s| st_type(s.st_info) == STT_FUNC)
            .filter_map(|s| {
                let name = self.symbol_name(s)?;
                Some((s.st_value, (name.to_string(), s.st_size)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble_source;
    use crate::elf::writer::{write_object, WriteParams};

    fn build(source: &str) -> Vec<u8> {
        let parts = assemble_source(source, "test.asm").unwrap();
        write_object(&WriteParams {
            text: &parts.text,
            rodata: &parts.rodata,
            symbols: &parts.symbols,
            strtab: &parts.strtab,
            relocations: &parts.relocations,
            entry: parts.entry,
        })
    }

    #[test]
    fn roundtrip_minimal_executable() {
        let image = build(".function: [[entry_point]] main\n    return\n.end");
        let loaded = LoadedImage::load(&image).unwrap();

        assert_eq!(loaded.text.len(), 2);
        assert_eq!(loaded.entry, Some(1));

        let table = loaded.function_table();
        let (name, size) = table.get(&8).expect("main at byte offset 8");
        assert_eq!(name, "main");
        assert_eq!(*size, 8);
    }

    #[test]
    fn roundtrip_preserves_rodata() {
        let image = build(
            ".label: greeting string \"hi\" * 3\n\
             .function: main\n    return\n.end",
        );
        let loaded = LoadedImage::load(&image).unwrap();

        let sym = loaded
            .symbols
            .iter()
            .find(|s| loaded.symbol_name(s) == Some("greeting"))
            .expect("greeting symbol");
        let start = sym.st_value as usize;
        let end = start + sym.st_size as usize;
        assert_eq!(&loaded.rodata[start..end], b"hihihi");
    }

    #[test]
    fn not_an_elf_rejected() {
        assert!(matches!(
            LoadedImage::load(b"definitely not an elf"),
            Err(LoadError::NotAnElf)
        ));
        assert!(matches!(LoadedImage::load(&[]), Err(LoadError::NotAnElf)));
    }

    #[test]
    fn tampered_signature_rejected() {
        let mut image = build(".function: main\n    return\n.end");
        // The signature lives in the second program header's p_offset.
        let magic_at = EHDR_SIZE + crate::elf::PHDR_SIZE + crate::elf::PHDR_OFFSET_FIELD;
        image[magic_at] ^= 0xff;
        assert!(matches!(
            LoadedImage::load(&image),
            Err(LoadError::BadSignature)
        ));
    }

    #[test]
    fn truncated_image_rejected() {
        let image = build(".function: main\n    return\n.end");
        let truncated = &image[..image.len() / 2];
        assert!(LoadedImage::load(truncated).is_err());
    }

    #[test]
    fn relocatable_has_no_entry() {
        let image = build(".function: main\n    return\n.end");
        let loaded = LoadedImage::load(&image).unwrap();
        assert_eq!(loaded.entry, None);
        assert_eq!(loaded.header.e_type, crate::elf::ET_REL);
    }
}
