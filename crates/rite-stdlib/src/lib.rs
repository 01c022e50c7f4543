//! Built-in method shims for the rite VM.
//!
//! Thin adapters exposing core operations to scripts: each shim is a
//! native function registered on one of the bootstrap classes. The
//! heavy lifting (comparison, class lookup, printing forms, the
//! re-entrant call protocol) lives in `rite-vm`; this crate only binds
//! it to method names.

pub mod exception;
pub mod object;
pub mod string;
pub mod symbol;

use rite_vm::Vm;

/// Register every built-in class's methods.
pub fn register_all(vm: &mut Vm) {
    object::register(vm);
    string::register(vm);
    symbol::register(vm);
    exception::register(vm);
}
