//! The rite virtual machine.
//!
//! Everything between the substrate (`rite-core`) and the built-in
//! method library:
//! - the tagged value model with reference-counted heap payloads
//! - the class registry and method lookup
//! - the irep tree, its RITE02 loader and the record assembler
//! - the opcode dispatcher with exception unwinding and the re-entrant
//!   native call protocol

pub mod class;
pub mod error;
pub mod irep;
pub mod kv;
pub mod load;
pub mod opcode;
pub mod value;
pub mod vm;

pub use class::{builtin, Class, ClassId, ClassRegistry, Method, NativeFn};
pub use error::{LoadError, VmError};
pub use irep::{CatchHandler, Irep, IrepAssembler, Program};
pub use kv::KvList;
pub use load::load;
pub use value::{compare, Instance, ProcKind, RException, RProc, RRange, RString, Value};
pub use vm::{Raised, Snapshot, StopReason, Vm, VmConfig, DEFAULT_POOL_SIZE};
