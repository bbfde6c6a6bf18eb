//! Interpreter CLI.
//!
//! # Usage
//! ```text
//! vm [<executable>]
//! ```
//!
//! Loads the given ELF image (default `./a.out`), runs it from its entry
//! point, and exits 0 on normal termination or 1 on a trap.

use std::env;
use std::process;

use viua::elf::loader::LoadedImage;
use viua::utils::log::Logger;
use viua::vm::process::Process;
use viua::vm::Scheduler;

fn main() {
    let executable_path = env::args().nth(1).unwrap_or_else(|| "./a.out".to_string());
    let logger = Logger::new("vm");

    let image = match LoadedImage::load_file(&executable_path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("{executable_path}: error: {e}");
            process::exit(1);
        }
    };

    logger.info(&format!(
        "loaded {} instruction(s) from {}",
        image.text.len(),
        executable_path
    ));

    // Executables carry their entry point; for relocatables fall back to
    // a function named main.
    let entry = image.entry.or_else(|| {
        image
            .function_table()
            .iter()
            .find(|(_, (name, _))| name.as_str() == "main")
            .map(|(&offset, _)| (offset / 8) as usize)
    });
    let Some(entry) = entry else {
        eprintln!("{executable_path}: error: no entry point");
        process::exit(1);
    };

    let mut proc = Process::new(image, entry);
    if let Err(trap) = Scheduler::new().run(&mut proc) {
        eprintln!("{executable_path}: error: {trap}");
        process::exit(1);
    }
}
