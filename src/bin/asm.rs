//! Assembly to ELF compiler CLI.
//!
//! # Usage
//! ```text
//! asm [-o <out>] [-v|--verbose] [--version] [--help] [--] <source>
//! ```
//!
//! Exits 0 on success and 1 on any user-visible error (missing or empty
//! input, lex/parse/semantic errors, I/O failures).

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;

use viua::asm::{assemble_source, render_diagnostic};
use viua::elf::writer::{write_object, WriteParams};
use viua::utils::log::{self, Level, Logger};

const USAGE: &str = "\
Assembler for the Viua virtual machine

USAGE:
    asm [OPTIONS] [--] <source>

ARGS:
    <source>    Assembly source file to compile

OPTIONS:
    -o <file>         Output file path (defaults to <source> with extension 'o')
    -v, --verbose     Enable verbose output
    --version         Print the version string
    --help            Show the manual page
";

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut output_path: Option<PathBuf> = None;
    let mut verbosity_level = 0u32;
    let mut show_version = false;
    let mut show_help = false;
    let mut source_arg: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        let each = &args[i];
        if each == "--" {
            // Explicit separator of options and operands.
            source_arg = args.get(i + 1).cloned();
            break;
        } else if each == "-o" {
            i += 1;
            match args.get(i) {
                Some(path) => output_path = Some(PathBuf::from(path)),
                None => {
                    eprintln!("error: -o requires an argument");
                    process::exit(1);
                }
            }
        } else if each == "-v" || each == "--verbose" {
            verbosity_level += 1;
        } else if each == "--version" {
            show_version = true;
        } else if each == "--help" {
            show_help = true;
        } else if each.starts_with('-') {
            eprintln!("error: unknown option: {each}");
            process::exit(1);
        } else {
            source_arg = Some(each.clone());
            break;
        }
        i += 1;
    }

    if show_version {
        if verbosity_level > 0 {
            println!("{}", viua::VERSION_FULL);
        } else {
            println!("{}", viua::VERSION);
        }
        process::exit(0);
    }
    if show_help {
        show_manual();
    }

    if verbosity_level > 0 {
        log::init(Level::Debug);
    }
    let logger = Logger::new("asm");

    let Some(source_path) = source_arg else {
        eprintln!("error: no file to assemble\n");
        eprintln!("{USAGE}");
        process::exit(1);
    };

    let source = match fs::read_to_string(&source_path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{source_path}: error: {e}");
            process::exit(1);
        }
    };
    if source.is_empty() {
        eprintln!("{source_path}: error: empty source file");
        process::exit(1);
    }

    let output_path = output_path.unwrap_or_else(|| {
        let mut path = PathBuf::from(&source_path);
        path.set_extension("o");
        path
    });

    let parts = match assemble_source(&source, &source_path) {
        Ok(parts) => parts,
        Err(err) => {
            eprint!("{}", render_diagnostic(&source_path, &source, &err));
            process::exit(1);
        }
    };

    logger.debug(&format!(
        "emitted {} instruction(s), {} symbol(s), {} relocation(s)",
        parts.text.len(),
        parts.symbols.len(),
        parts.relocations.len()
    ));

    let image = write_object(&WriteParams {
        text: &parts.text,
        rodata: &parts.rodata,
        symbols: &parts.symbols,
        strtab: &parts.strtab,
        relocations: &parts.relocations,
        entry: parts.entry,
    });

    if let Err(e) = fs::write(&output_path, &image) {
        eprintln!("{}: error: {e}", output_path.display());
        process::exit(1);
    }

    logger.debug(&format!(
        "wrote {} byte(s) to {}",
        image.len(),
        output_path.display()
    ));
}

/// Replaces the process with the manual viewer.
fn show_manual() -> ! {
    use std::os::unix::process::CommandExt;

    let err = process::Command::new("man").args(["1", "viua-asm"]).exec();
    eprintln!("error: man(1) page not installed or not found: {err}");
    process::exit(1);
}
