//! Native-side error types.
//!
//! Script-side failures travel as pending exceptions on the VM and never
//! appear here. These types cover the other channel: malformed bytecode
//! reaching the loader, and conditions the dispatcher cannot express to
//! the script at all.

use thiserror::Error;

/// Why a RITE02 image failed to load. The partially-built irep tree has
/// already been released when one of these is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("not a RITE02 image")]
    BadHeader,

    #[error("section at offset {at} has impossible size {size}")]
    BadSection { at: usize, size: u32 },

    #[error("truncated image: need {needed} bytes at offset {at}")]
    Truncated { at: usize, needed: usize },

    #[error("unknown pool entry tag {tag:#04x} at offset {at}")]
    UnknownPoolTag { tag: u8, at: usize },

    #[error("symbol name at offset {at} is not valid UTF-8")]
    BadSymbolName { at: usize },

    #[error("symbol table full while loading bytecode")]
    SymbolOverflow,

    #[error("memory pool exhausted while building irep")]
    OutOfMemory,

    #[error("image has no IREP section")]
    MissingIrep,
}

/// A condition that terminates the task from the native side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VmError {
    /// Opcode outside the supported subset.
    UnsupportedOpcode(u8),
    /// Instruction stream ended inside an instruction.
    TruncatedCode,
    /// A frame needs more registers than the machine owns.
    RegisterOverflow { needed: usize, have: usize },
    /// An irep referenced a symbol or literal slot it does not have.
    BadSlot,
    /// `execute` called while the machine is already running. Re-entry
    /// is only legal through the native call snapshot protocol.
    NestedEntry,
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmError::UnsupportedOpcode(b) => write!(f, "unsupported opcode {b:#04x}"),
            VmError::TruncatedCode => write!(f, "truncated instruction stream"),
            VmError::RegisterOverflow { needed, have } => {
                write!(f, "register file overflow: need {needed}, have {have}")
            }
            VmError::BadSlot => write!(f, "irep symbol or pool slot out of range"),
            VmError::NestedEntry => write!(f, "VM entered re-entrantly"),
        }
    }
}

impl std::error::Error for VmError {}
