//! Per-process execution state.
//!
//! A process owns its loaded image, a stack of call frames, the argument
//! staging area, a growable heap, and the pointer registry. The local
//! register set lives in the current frame; arguments are a per-process
//! staging area filled between FRAME and CALL; parameters are the
//! callee's view of the caller's arguments and are saved into the frame
//! at CALL so nested calls cannot clobber them.

use crate::arch::{RegisterAccess, RegisterSet};
use crate::elf::loader::LoadedImage;
use crate::vm::value::Value;

/// Size of each frame's local register set.
pub const LOCAL_REGISTER_COUNT: usize = 256;

/// One call frame.
#[derive(Debug)]
pub struct Frame {
    pub locals: Vec<Value>,
    pub parameters: Vec<Value>,
    /// Word index to resume the caller at.
    pub return_ip: usize,
    /// Caller register that receives the return value.
    pub return_register: RegisterAccess,
}

impl Frame {
    /// A frame with empty parameters, used for the entry function.
    pub fn root() -> Self {
        Self::new(Vec::new(), 0, RegisterAccess::void())
    }

    pub fn new(parameters: Vec<Value>, return_ip: usize, return_register: RegisterAccess) -> Self {
        Self {
            locals: vec![Value::Void; LOCAL_REGISTER_COUNT],
            parameters,
            return_ip,
            return_register,
        }
    }
}

/// A live pointer handed out by the AA instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Pointer {
    pub address: u64,
    pub size: u64,
}

/// Why a register access could not be honored.
#[derive(Debug)]
pub enum AccessError {
    /// Index past the end of its register set.
    OutOfRange { index: usize },
    /// No frame on the stack (locals and parameters need one).
    NoFrame,
}

/// A process: the unit the scheduler drives.
#[derive(Debug)]
pub struct Process {
    pub image: LoadedImage,
    pub frames: Vec<Frame>,
    /// Argument staging area; moved into the callee's parameters by CALL.
    pub arguments: Vec<Value>,
    /// Backing store for AA allocations. The heap break is its length.
    pub heap: Vec<u8>,
    /// Registry of live raw pointers, for validity checks on deref.
    pub pointers: Vec<Pointer>,
    /// Current instruction pointer, as a word index into `.text`.
    pub ip: usize,
}

impl Process {
    /// Creates a process positioned at `entry` with a root frame.
    pub fn new(image: LoadedImage, entry: usize) -> Self {
        Self {
            image,
            frames: vec![Frame::root()],
            arguments: Vec::new(),
            heap: Vec::new(),
            pointers: Vec::new(),
            ip: entry,
        }
    }

    /// The current heap break.
    pub fn heap_break(&self) -> u64 {
        self.heap.len() as u64
    }

    /// True when `address` was handed out by AA and is still live.
    pub fn pointer_is_live(&self, address: u64) -> bool {
        self.pointers.iter().any(|p| p.address == address)
    }

    /// Reads the register a direct access names.
    ///
    /// Void reads produce a fresh `Value::Void`; the caller interprets it
    /// as zero of whatever signedness it needs.
    pub fn read(&self, access: RegisterAccess) -> Result<Value, AccessError> {
        match access.set {
            RegisterSet::Void => Ok(Value::Void),
            RegisterSet::Local => {
                let frame = self.frames.last().ok_or(AccessError::NoFrame)?;
                frame
                    .locals
                    .get(access.index as usize)
                    .cloned()
                    .ok_or(AccessError::OutOfRange {
                        index: access.index as usize,
                    })
            }
            RegisterSet::Argument => {
                self.arguments
                    .get(access.index as usize)
                    .cloned()
                    .ok_or(AccessError::OutOfRange {
                        index: access.index as usize,
                    })
            }
            RegisterSet::Parameter => {
                let frame = self.frames.last().ok_or(AccessError::NoFrame)?;
                frame
                    .parameters
                    .get(access.index as usize)
                    .cloned()
                    .ok_or(AccessError::OutOfRange {
                        index: access.index as usize,
                    })
            }
        }
    }

    /// Moves the value out of a register, leaving Void behind.
    pub fn take(&mut self, access: RegisterAccess) -> Result<Value, AccessError> {
        let slot = self.slot_mut(access)?;
        match slot {
            None => Ok(Value::Void),
            Some(slot) => Ok(std::mem::take(slot)),
        }
    }

    /// Writes a register. Writes to void are discarded; the previous
    /// value is dropped, destroying boxed contents.
    pub fn write(&mut self, access: RegisterAccess, value: Value) -> Result<(), AccessError> {
        if let Some(slot) = self.slot_mut(access)? {
            *slot = value;
        }
        Ok(())
    }

    /// Resolves an access to its storage slot; `None` for void.
    fn slot_mut(&mut self, access: RegisterAccess) -> Result<Option<&mut Value>, AccessError> {
        let index = access.index as usize;
        match access.set {
            RegisterSet::Void => Ok(None),
            RegisterSet::Local => {
                let frame = self.frames.last_mut().ok_or(AccessError::NoFrame)?;
                frame
                    .locals
                    .get_mut(index)
                    .map(Some)
                    .ok_or(AccessError::OutOfRange { index })
            }
            RegisterSet::Argument => self
                .arguments
                .get_mut(index)
                .map(Some)
                .ok_or(AccessError::OutOfRange { index }),
            RegisterSet::Parameter => {
                let frame = self.frames.last_mut().ok_or(AccessError::NoFrame)?;
                frame
                    .parameters
                    .get_mut(index)
                    .map(Some)
                    .ok_or(AccessError::OutOfRange { index })
            }
        }
    }
}
