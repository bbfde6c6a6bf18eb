//! The interpreter core.
//!
//! A process is driven through quanta of instructions by a cooperative
//! scheduler. Within a quantum the dispatcher executes up to
//! [`PREEMPTION_THRESHOLD`] instructions; a greedy bundle is executed
//! atomically and its full length is charged against the quantum, so a
//! bundle longer than the quantum preempts immediately after it
//! completes.
//!
//! # Modules
//!
//! - [`value`]: tagged register cells and boxed objects
//! - [`process`]: register file, call stack, heap break, pointer registry
//! - [`exec`]: instruction dispatch and per-opcode executors

pub mod exec;
pub mod process;
pub mod value;

#[cfg(test)]
mod tests;

use crate::arch::is_greedy;
use crate::errors::Trap;
use crate::utils::log::Logger;
use crate::vm::process::Process;

/// Default number of instructions per preemption quantum.
pub const PREEMPTION_THRESHOLD: usize = 2;

/// What a quantum ended with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QuantumOutcome {
    /// The quantum budget ran out; `executed` instructions ran.
    Preempted { executed: usize },
    /// The process halted (HALT, final RETURN, or end of `.text`).
    Halted,
}

/// Cooperative scheduler driving a single process.
pub struct Scheduler {
    pub preemption_threshold: usize,
    logger: Logger,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_threshold(PREEMPTION_THRESHOLD)
    }

    pub fn with_threshold(preemption_threshold: usize) -> Self {
        Self {
            preemption_threshold,
            logger: Logger::new("vm"),
        }
    }

    /// Drives the process until it halts or traps.
    pub fn run(&self, proc: &mut Process) -> Result<(), Trap> {
        loop {
            match self.run_quantum(proc)? {
                QuantumOutcome::Halted => return Ok(()),
                QuantumOutcome::Preempted { executed } => {
                    self.logger
                        .debug(&format!("preempted after {executed} op(s)"));
                }
            }
        }
    }

    /// Runs one preemption quantum.
    ///
    /// Greedy bundles are executed whole and charged at their full
    /// length, which may overrun the budget; the overrun ends the
    /// quantum, never splits the bundle.
    pub fn run_quantum(&self, proc: &mut Process) -> Result<QuantumOutcome, Trap> {
        if proc.ip >= proc.image.text.len() {
            return Ok(QuantumOutcome::Halted);
        }

        let mut executed = 0usize;
        while executed < self.preemption_threshold && proc.ip < proc.image.text.len() {
            match run_bundle(proc)? {
                None => return Ok(QuantumOutcome::Halted),
                Some(count) => executed += count,
            }
        }

        if proc.ip >= proc.image.text.len() {
            return Ok(QuantumOutcome::Halted);
        }
        Ok(QuantumOutcome::Preempted { executed })
    }
}

/// Executes one instruction, then keeps going while the executed word
/// carried the GREEDY bit. Returns the number of instructions run, or
/// `None` when the process halted mid-bundle.
fn run_bundle(proc: &mut Process) -> Result<Option<usize>, Trap> {
    let mut count = 0usize;
    loop {
        let Some(&word) = proc.image.text.get(proc.ip) else {
            return Ok(Some(count));
        };

        let next = exec::execute(proc, proc.ip)?;
        count += 1;

        match next {
            None => return Ok(None),
            Some(next_ip) => proc.ip = next_ip,
        }

        if !is_greedy(word) {
            return Ok(Some(count));
        }
    }
}
