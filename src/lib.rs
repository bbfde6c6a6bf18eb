//! Process virtual machine with an ELF-hosted bytecode toolchain.
//!
//! The crate has three cooperating parts:
//!
//! - [`arch`]: the instruction set — a fixed-width 64-bit instruction
//!   word, five encoding formats, and the register-access sub-word;
//! - [`asm`]: the assembler pipeline, from source text through lexing,
//!   parsing, constant-pool layout, pseudo-instruction expansion, and
//!   bytecode emission, with [`elf::writer`] producing the output file;
//! - [`vm`]: the interpreter — [`elf::loader`] maps the image, and a
//!   cooperative scheduler drives the dispatcher over a register file of
//!   tagged values.
//!
//! The two binaries (`asm` and `vm`) are thin CLI shells over these
//! modules.

pub mod arch;
pub mod asm;
pub mod elf;
pub mod encoding;
pub mod errors;
pub mod utils;
pub mod vm;

/// Short version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Full version string, recorded in the `.comment` section of every
/// emitted object.
pub const VERSION_FULL: &str = concat!("viua-vm ", env!("CARGO_PKG_VERSION"));
