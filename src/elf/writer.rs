//! ELF emission.
//!
//! Builds the output image in memory: construct header descriptors for
//! every section (and the subset that also gets a program header) in
//! canonical order, size them, assign file offsets monotonically after
//! the prelude, patch the cross-section links, and serialize.
//!
//! Canonical order: SHT_NULL, `.viua.magic`, `.interp`, `.rel` (only when
//! relocations exist), `.text`, `.rodata`, `.comment`, `.symtab`,
//! `.strtab`, `.shstrtab`. The section-name table must stay last: its
//! size is read after its own name has been saved, so any section added
//! behind it would corrupt the names.

use crate::arch::WORD_SIZE;
use crate::elf::{
    st_type, Elf64Ehdr, Elf64Phdr, Elf64Rel, Elf64Shdr, Elf64Sym, EHDR_SIZE, ELFCLASS64,
    ELFDATA2LSB, ELFOSABI_STANDALONE, ET_EXEC, ET_REL, EV_CURRENT, INTERPRETER, PF_R, PF_X,
    PHDR_OFFSET_FIELD, PHDR_SIZE, PT_INTERP, PT_LOAD, PT_NULL, REL_SIZE, SHDR_SIZE, SHF_ALLOC,
    SHF_EXECINSTR, SHF_INFO_LINK, SHF_STRINGS, SHT_NOBITS, SHT_NULL, SHT_PROGBITS, SHT_REL,
    SHT_STRTAB, SHT_SYMTAB, STT_FUNC, STT_OBJECT, SYM_SIZE, VIUA_MAGIC,
};
use crate::encoding::Encode;

/// Input to [`write_object`].
#[derive(Debug)]
pub struct WriteParams<'a> {
    pub text: &'a [u64],
    pub rodata: &'a [u8],
    pub symbols: &'a [Elf64Sym],
    pub strtab: &'a [u8],
    pub relocations: &'a [Elf64Rel],
    /// `st_value` of the entry-point function; its presence selects
    /// ET_EXEC over ET_REL.
    pub entry: Option<u64>,
}

/// One section with its optional program header.
struct HeaderPair {
    segment: Option<Elf64Phdr>,
    section: Elf64Shdr,
}

/// Accumulates `.shstrtab` contents.
struct SectionNames {
    buf: Vec<u8>,
}

impl SectionNames {
    fn new() -> Self {
        // The table starts with the empty name at offset zero.
        Self { buf: vec![0] }
    }

    fn save(&mut self, name: &str) -> u32 {
        let saved_at = self.buf.len() as u32;
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);
        saved_at
    }
}

/// Serializes an ELF object from its parts.
pub fn write_object(params: &WriteParams) -> Vec<u8> {
    let comment = crate::VERSION_FULL;
    let mut shstr = SectionNames::new();
    let mut headers: Vec<HeaderPair> = Vec::new();

    {
        // ELF mandates that the first section header is void and all
        // zeroes; it is reserved for extensions, which this format does
        // not use.
        headers.push(HeaderPair {
            segment: Some(Elf64Phdr {
                p_type: PT_NULL,
                ..Default::default()
            }),
            section: Elf64Shdr {
                sh_type: SHT_NULL,
                ..Default::default()
            },
        });
    }
    {
        // .viua.magic
        //
        // The signature the interpreter (and binfmt registration) checks
        // for. It lives inside the p_offset field of this PT_NULL program
        // header, which puts it at a fixed file position.
        let mut segment = Elf64Phdr {
            p_type: PT_NULL,
            p_filesz: VIUA_MAGIC.len() as u64,
            ..Default::default()
        };
        segment.p_offset = u64::from_le_bytes(VIUA_MAGIC);

        headers.push(HeaderPair {
            segment: Some(segment),
            section: Elf64Shdr {
                sh_name: shstr.save(".viua.magic"),
                sh_type: SHT_NOBITS,
                // The magic phdr is the second one; its p_offset field
                // sits 8 bytes into it.
                sh_offset: (EHDR_SIZE + PHDR_SIZE + PHDR_OFFSET_FIELD) as u64,
                sh_size: VIUA_MAGIC.len() as u64,
                ..Default::default()
            },
        });
    }
    {
        // .interp
        //
        // Names the interpreter binary. Mostly useful for readelf(1) and
        // file(1), and doubles as a second thing to validate.
        let size = (INTERPRETER.len() + 1) as u64;
        headers.push(HeaderPair {
            segment: Some(Elf64Phdr {
                p_type: PT_INTERP,
                p_filesz: size,
                p_flags: PF_R,
                ..Default::default()
            }),
            section: Elf64Shdr {
                sh_name: shstr.save(".interp"),
                sh_type: SHT_PROGBITS,
                sh_size: size,
                ..Default::default()
            },
        });
    }
    let rel_section_ndx = if params.relocations.is_empty() {
        None
    } else {
        // .rel
        //
        // sh_link must point at .symtab and sh_info at .text, but those
        // indexes are unknown until all sections exist; patched below.
        let index = headers.len();
        headers.push(HeaderPair {
            segment: None,
            section: Elf64Shdr {
                sh_name: shstr.save(".rel"),
                sh_type: SHT_REL,
                sh_entsize: REL_SIZE as u64,
                sh_size: (params.relocations.len() * REL_SIZE) as u64,
                sh_flags: SHF_INFO_LINK,
                ..Default::default()
            },
        });
        Some(index)
    };
    let text_section_ndx = headers.len();
    {
        // .text
        let size = (params.text.len() * WORD_SIZE) as u64;
        headers.push(HeaderPair {
            segment: Some(Elf64Phdr {
                p_type: PT_LOAD,
                p_filesz: size,
                p_memsz: size,
                p_flags: PF_R | PF_X,
                p_align: WORD_SIZE as u64,
                ..Default::default()
            }),
            section: Elf64Shdr {
                sh_name: shstr.save(".text"),
                sh_type: SHT_PROGBITS,
                sh_size: size,
                sh_flags: SHF_ALLOC | SHF_EXECINSTR,
                ..Default::default()
            },
        });
    }
    let rodata_section_ndx = headers.len();
    {
        // .rodata
        //
        // The constant pool: strings, atoms, and every other piece of
        // data that does not fit into a single load instruction.
        let size = params.rodata.len() as u64;
        headers.push(HeaderPair {
            segment: Some(Elf64Phdr {
                p_type: PT_LOAD,
                p_filesz: size,
                p_memsz: size,
                p_flags: PF_R,
                p_align: WORD_SIZE as u64,
                ..Default::default()
            }),
            section: Elf64Shdr {
                sh_name: shstr.save(".rodata"),
                sh_type: SHT_PROGBITS,
                sh_size: size,
                sh_flags: SHF_ALLOC,
                ..Default::default()
            },
        });
    }
    {
        // .comment
        headers.push(HeaderPair {
            segment: None,
            section: Elf64Shdr {
                sh_name: shstr.save(".comment"),
                sh_type: SHT_PROGBITS,
                sh_size: (comment.len() + 1) as u64,
                ..Default::default()
            },
        });
    }
    let symtab_section_ndx = headers.len();
    {
        // .symtab
        //
        // Function calls resolve their targets through this table; there
        // are no direct calls.
        headers.push(HeaderPair {
            segment: None,
            section: Elf64Shdr {
                sh_name: shstr.save(".symtab"),
                sh_type: SHT_SYMTAB,
                sh_entsize: SYM_SIZE as u64,
                sh_size: (params.symbols.len() * SYM_SIZE) as u64,
                ..Default::default()
            },
        });
    }
    let strtab_section_ndx = headers.len();
    {
        // .strtab
        headers.push(HeaderPair {
            segment: None,
            section: Elf64Shdr {
                sh_name: shstr.save(".strtab"),
                sh_type: SHT_STRTAB,
                sh_size: params.strtab.len() as u64,
                sh_flags: SHF_STRINGS,
                ..Default::default()
            },
        });
    }
    {
        // .shstrtab — must stay the last section.
        let sh_name = shstr.save(".shstrtab");
        headers.push(HeaderPair {
            segment: None,
            section: Elf64Shdr {
                sh_name,
                sh_type: SHT_STRTAB,
                sh_size: (shstr.buf.len()) as u64,
                sh_flags: SHF_STRINGS,
                ..Default::default()
            },
        });
    }

    // Link .symtab to its string table, and .rel to the tables it
    // describes; readelf(1) reports <corrupt> names otherwise.
    headers[symtab_section_ndx].section.sh_link = strtab_section_ndx as u32;
    if let Some(index) = rel_section_ndx {
        headers[index].section.sh_link = symtab_section_ndx as u32;
        headers[index].section.sh_info = text_section_ndx as u32;
    }

    let phdr_count = headers.iter().filter(|h| h.segment.is_some()).count();
    let shdr_count = headers.len();
    let prelude = EHDR_SIZE + phdr_count * PHDR_SIZE + shdr_count * SHDR_SIZE;

    // Assign file offsets monotonically after the prelude. SHT_NULL and
    // SHT_NOBITS sections consume no file space.
    let mut text_offset: Option<u64> = None;
    {
        let mut accumulator = 0u64;
        for pair in headers.iter_mut() {
            if let Some(segment) = pair.segment.as_mut() {
                if segment.p_type != PT_NULL {
                    // The entry function must live in the first
                    // executable segment; record the first R+X offset.
                    if segment.p_flags == (PF_R | PF_X) && text_offset.is_none() {
                        text_offset = Some(prelude as u64 + accumulator);
                    }
                    segment.p_offset = prelude as u64 + accumulator;
                }
            }

            if pair.section.sh_type == SHT_NULL || pair.section.sh_type == SHT_NOBITS {
                continue;
            }
            pair.section.sh_offset = prelude as u64 + accumulator;
            accumulator += pair.section.sh_size;
        }
    }

    let mut header = Elf64Ehdr {
        e_type: if params.entry.is_some() {
            ET_EXEC
        } else {
            ET_REL
        },
        e_machine: 0,
        e_version: EV_CURRENT as u32,
        e_entry: match (params.entry, text_offset) {
            (Some(entry), Some(text)) => text + entry,
            _ => 0,
        },
        e_phoff: EHDR_SIZE as u64,
        e_shoff: (EHDR_SIZE + phdr_count * PHDR_SIZE) as u64,
        e_flags: 0,
        e_ehsize: EHDR_SIZE as u16,
        e_phentsize: PHDR_SIZE as u16,
        e_phnum: phdr_count as u16,
        e_shentsize: SHDR_SIZE as u16,
        e_shnum: shdr_count as u16,
        e_shstrndx: (shdr_count - 1) as u16,
        ..Default::default()
    };
    header.e_ident[0] = 0x7f;
    header.e_ident[1] = b'E';
    header.e_ident[2] = b'L';
    header.e_ident[3] = b'F';
    header.e_ident[4] = ELFCLASS64;
    header.e_ident[5] = ELFDATA2LSB;
    header.e_ident[6] = EV_CURRENT;
    header.e_ident[7] = ELFOSABI_STANDALONE;

    // Serialize: header, program headers, section headers, then section
    // contents in declaration order.
    let mut out = Vec::with_capacity(prelude);
    header.encode(&mut out);
    for pair in &headers {
        if let Some(segment) = &pair.segment {
            segment.encode(&mut out);
        }
    }
    for pair in &headers {
        pair.section.encode(&mut out);
    }

    out.extend_from_slice(INTERPRETER.as_bytes());
    out.push(0);

    for rel in params.relocations {
        rel.encode(&mut out);
    }

    for word in params.text {
        out.extend_from_slice(&word.to_le_bytes());
    }

    out.extend_from_slice(params.rodata);

    out.extend_from_slice(comment.as_bytes());
    out.push(0);

    // Symbols are patched on the way out: functions index .text, objects
    // index .rodata.
    for symbol in params.symbols {
        let mut patched = symbol.clone();
        match st_type(patched.st_info) {
            STT_FUNC => patched.st_shndx = text_section_ndx as u16,
            STT_OBJECT => patched.st_shndx = rodata_section_ndx as u16,
            _ => {}
        }
        patched.encode(&mut out);
    }

    out.extend_from_slice(params.strtab);
    out.extend_from_slice(&shstr.buf);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Decode;

    fn minimal_params<'a>(text: &'a [u64], entry: Option<u64>) -> WriteParams<'a> {
        WriteParams {
            text,
            rodata: &[],
            symbols: &[],
            strtab: &[0, 0],
            relocations: &[],
            entry,
        }
    }

    #[test]
    fn header_identifies_as_elf64() {
        let text = [0u64];
        let image = write_object(&minimal_params(&text, None));
        let header = Elf64Ehdr::decode(&mut &image[..]).unwrap();
        assert_eq!(&header.e_ident[0..4], b"\x7fELF");
        assert_eq!(header.e_ident[4], ELFCLASS64);
        assert_eq!(header.e_ident[5], ELFDATA2LSB);
        assert_eq!(header.e_ident[7], ELFOSABI_STANDALONE);
        assert_eq!(header.e_ehsize as usize, EHDR_SIZE);
    }

    #[test]
    fn type_follows_entry_presence() {
        let text = [0u64];
        let without = write_object(&minimal_params(&text, None));
        let with = write_object(&minimal_params(&text, Some(8)));

        assert_eq!(Elf64Ehdr::decode(&mut &without[..]).unwrap().e_type, ET_REL);
        assert_eq!(Elf64Ehdr::decode(&mut &with[..]).unwrap().e_type, ET_EXEC);
    }

    #[test]
    fn magic_embedded_in_second_phdr() {
        let text = [0u64];
        let image = write_object(&minimal_params(&text, None));
        let magic_at = EHDR_SIZE + PHDR_SIZE + PHDR_OFFSET_FIELD;
        assert_eq!(&image[magic_at..magic_at + 8], &VIUA_MAGIC);
    }

    #[test]
    fn entry_points_into_text_content() {
        let text = [
            crate::arch::N::new(crate::arch::Opcode::Halt as u16).encode(),
            crate::arch::N::new(crate::arch::Opcode::Return as u16).encode(),
        ];
        let image = write_object(&minimal_params(&text, Some(8)));
        let header = Elf64Ehdr::decode(&mut &image[..]).unwrap();

        // The word at e_entry is the function's first instruction.
        let at = header.e_entry as usize;
        let word = u64::from_le_bytes(image[at..at + 8].try_into().unwrap());
        assert_eq!(
            crate::arch::opcode_of(word),
            crate::arch::Opcode::Return as u16
        );
    }

    #[test]
    fn rel_section_only_when_relocations_exist() {
        let text = [0u64];
        let without = write_object(&minimal_params(&text, None));
        let header = Elf64Ehdr::decode(&mut &without[..]).unwrap();
        // null, magic, interp, text, rodata, comment, symtab, strtab, shstrtab
        assert_eq!(header.e_shnum, 9);

        let relocs = [Elf64Rel {
            r_offset: 0,
            r_info: crate::elf::r_info(2, crate::elf::R_VIUA_JUMP_SLOT),
        }];
        let params = WriteParams {
            relocations: &relocs,
            ..minimal_params(&text, None)
        };
        let with = write_object(&params);
        let header = Elf64Ehdr::decode(&mut &with[..]).unwrap();
        assert_eq!(header.e_shnum, 10);
    }
}
