//! ELF-64 container types shared by the assembler and the interpreter.
//!
//! The structs below mirror the on-disk layout described in elf(5). All
//! fields are fixed-width little-endian integers (or raw byte arrays), so
//! the derived [`BinaryCodec`](viua_derive::BinaryCodec) implementations
//! serialize each struct to exactly its file representation.
//!
//! # Modules
//!
//! - [`writer`]: assembles headers, segments, sections, and tables into an
//!   output image
//! - [`loader`]: validates an image and maps its sections back into memory

pub mod loader;
pub mod writer;

use viua_derive::BinaryCodec;

/// The signature stored in the `.viua.magic` section.
pub const VIUA_MAGIC: [u8; 8] = *b"\x7fVIUA\x00\x00\x00";

/// Name of the interpreter recorded in `.interp`.
pub const INTERPRETER: &str = "viua-vm";

pub const EI_NIDENT: usize = 16;

pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1;
pub const EV_CURRENT: u8 = 1;
pub const ELFOSABI_STANDALONE: u8 = 255;

pub const ET_REL: u16 = 1;
pub const ET_EXEC: u16 = 2;

pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;
pub const PT_INTERP: u32 = 3;

pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

pub const SHT_NULL: u32 = 0;
pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_REL: u32 = 9;

pub const SHF_ALLOC: u64 = 0x2;
pub const SHF_EXECINSTR: u64 = 0x4;
pub const SHF_INFO_LINK: u64 = 0x40;
pub const SHF_STRINGS: u64 = 0x20;

pub const SHN_UNDEF: u16 = 0;
pub const SHN_ABS: u16 = 0xfff1;

pub const STN_UNDEF: u32 = 0;

pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;

pub const STT_NOTYPE: u8 = 0;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;
pub const STT_FILE: u8 = 4;

pub const STV_DEFAULT: u8 = 0;

/// VM-specific relocation kinds stored in `r_info`.
pub const R_VIUA_JUMP_SLOT: u8 = 1;
pub const R_VIUA_OBJECT: u8 = 2;

/// Packs a symbol's binding and type into `st_info`.
pub const fn st_info(bind: u8, typ: u8) -> u8 {
    (bind << 4) | (typ & 0xf)
}

/// Extracts the type half of `st_info`.
pub const fn st_type(info: u8) -> u8 {
    info & 0xf
}

/// Extracts the binding half of `st_info`.
pub const fn st_bind(info: u8) -> u8 {
    info >> 4
}

/// Packs a symbol index and a relocation kind into `r_info`.
pub const fn r_info(sym: u32, typ: u8) -> u64 {
    ((sym as u64) << 32) | (typ as u64)
}

/// Extracts the symbol index from `r_info`.
pub const fn r_sym(info: u64) -> u32 {
    (info >> 32) as u32
}

/// Extracts the relocation kind from `r_info`.
pub const fn r_type(info: u64) -> u8 {
    info as u8
}

/// ELF file header.
#[derive(Clone, Debug, Default, PartialEq, Eq, BinaryCodec)]
pub struct Elf64Ehdr {
    pub e_ident: [u8; EI_NIDENT],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// Size of the encoded ELF header in bytes.
pub const EHDR_SIZE: usize = 64;

/// Program (segment) header.
#[derive(Clone, Debug, Default, PartialEq, Eq, BinaryCodec)]
pub struct Elf64Phdr {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

/// Size of an encoded program header in bytes.
pub const PHDR_SIZE: usize = 56;

/// Byte offset of `p_offset` within an encoded program header.
///
/// The `.viua.magic` signature is embedded at this position of the PT_NULL
/// program header, which gives the magic a fixed file offset right after
/// the ELF header.
pub const PHDR_OFFSET_FIELD: usize = 8;

/// Section header.
#[derive(Clone, Debug, Default, PartialEq, Eq, BinaryCodec)]
pub struct Elf64Shdr {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

/// Size of an encoded section header in bytes.
pub const SHDR_SIZE: usize = 64;

/// Symbol table entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, BinaryCodec)]
pub struct Elf64Sym {
    pub st_name: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

/// Size of an encoded symbol entry in bytes.
pub const SYM_SIZE: usize = 24;

/// Relocation entry (without addend).
#[derive(Clone, Debug, Default, PartialEq, Eq, BinaryCodec)]
pub struct Elf64Rel {
    pub r_offset: u64,
    pub r_info: u64,
}

/// Size of an encoded relocation entry in bytes.
pub const REL_SIZE: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{Decode, Encode};

    #[test]
    fn encoded_sizes_match_elf64_layout() {
        assert_eq!(Elf64Ehdr::default().to_bytes().len(), EHDR_SIZE);
        assert_eq!(Elf64Phdr::default().to_bytes().len(), PHDR_SIZE);
        assert_eq!(Elf64Shdr::default().to_bytes().len(), SHDR_SIZE);
        assert_eq!(Elf64Sym::default().to_bytes().len(), SYM_SIZE);
        assert_eq!(Elf64Rel::default().to_bytes().len(), REL_SIZE);
    }

    #[test]
    fn sym_roundtrip() {
        let sym = Elf64Sym {
            st_name: 17,
            st_info: st_info(STB_GLOBAL, STT_FUNC),
            st_other: STV_DEFAULT,
            st_shndx: 4,
            st_value: 0x40,
            st_size: 0x18,
        };
        let bytes = sym.to_bytes();
        assert_eq!(Elf64Sym::from_bytes(&bytes).unwrap(), sym);
        assert_eq!(st_type(sym.st_info), STT_FUNC);
        assert_eq!(st_bind(sym.st_info), STB_GLOBAL);
    }

    #[test]
    fn rel_info_roundtrip() {
        let info = r_info(7, R_VIUA_JUMP_SLOT);
        assert_eq!(r_sym(info), 7);
        assert_eq!(r_type(info), R_VIUA_JUMP_SLOT);
    }

    #[test]
    fn phdr_offset_field_position() {
        // The magic-bearing field must sit 8 bytes into the encoded Phdr.
        let mut phdr = Elf64Phdr {
            p_type: PT_NULL,
            ..Default::default()
        };
        phdr.p_offset = u64::from_le_bytes(VIUA_MAGIC);
        let bytes = phdr.to_bytes();
        assert_eq!(
            &bytes[PHDR_OFFSET_FIELD..PHDR_OFFSET_FIELD + 8],
            &VIUA_MAGIC
        );
    }

    #[test]
    fn ehdr_ident_is_first() {
        let mut header = Elf64Ehdr::default();
        header.e_ident[0] = 0x7f;
        header.e_ident[1] = b'E';
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..2], &[0x7f, b'E']);
    }
}
