//! Process substrate for the rite VM.
//!
//! This crate holds the two leaves everything else stands on:
//! - a fixed-pool byte allocator ([`alloc::Pool`]) replacing the host
//!   allocator for runtime-managed storage, and
//! - the process-wide symbol interner ([`symbol::SymbolTable`]).
//!
//! Both are plain values, not globals: the embedder owns them and threads
//! them through the machine, so tests can instantiate in isolation.

pub mod alloc;
pub mod symbol;

pub use alloc::{BlockRef, Pool, PoolStats};
pub use symbol::{SymId, SymbolTable, DEFAULT_MAX_SYMBOLS};
