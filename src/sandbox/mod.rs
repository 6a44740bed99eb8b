//! Collaborator contracts around the execution sandbox.
//!
//! The probing core only talks to a sandbox through `ExecutionEngine` (run,
//! snapshot, restore) and its `MachineState` view (memory and registers). The
//! calling convention lives in `abi`, struct layouts in `layout`.
//! `scripted` is the in-process engine; `libc` is a reference routine set for it.

pub mod abi;
pub mod layout;
pub mod libc;
pub mod memory;
pub mod scripted;

use crate::error::{EngineError, MemoryFault};
use std::collections::BTreeMap;
use std::time::Duration;

/// Page-style permissions of a mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Perms {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl Perms {
    pub const READ: Perms = Perms {
        read: true,
        write: false,
        exec: false,
    };
    pub const READ_WRITE: Perms = Perms {
        read: true,
        write: true,
        exec: false,
    };
    pub const READ_EXEC: Perms = Perms {
        read: true,
        write: false,
        exec: true,
    };
}

/// How a bounded run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Control returned to the sentinel address.
    Completed,
    /// The sentinel was not reached within the budget.
    TimedOut,
    /// Abnormal termination: memory fault, invalid fetch, wrong return address.
    Faulted,
}

/// Register file keyed by architectural name. Unset registers read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterFile {
    values: BTreeMap<&'static str, u64>,
}

impl RegisterFile {
    pub fn get(&self, name: &'static str) -> u64 {
        self.values.get(name).copied().unwrap_or(0)
    }

    pub fn set(&mut self, name: &'static str, value: u64) {
        self.values.insert(name, value);
    }
}

/// Memory and register view of a sandbox. Object safe so calling conventions
/// and fixtures can work against any engine.
pub trait MachineState {
    fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryFault>;
    /// Host-side write; ignores region permissions but never maps new memory.
    fn write_memory(&mut self, addr: u64, bytes: &[u8]) -> Result<(), MemoryFault>;
    fn map_region(&mut self, addr: u64, perms: Perms, bytes: &[u8]) -> Result<(), MemoryFault>;
    fn register(&self, name: &'static str) -> u64;
    fn set_register(&mut self, name: &'static str, value: u64);
}

/// The execution sandbox. Owns snapshots; callers only hold their ids.
pub trait ExecutionEngine: MachineState + Send {
    /// Execute from `entry` until control reaches `sentinel_return` or `timeout` elapses.
    fn run(&mut self, entry: u64, sentinel_return: u64, timeout: Duration) -> RunStatus;
    fn take_snapshot(&mut self) -> Result<usize, EngineError>;
    /// Registers are always restored; memory only when `memory` is set.
    fn restore_snapshot(&mut self, id: usize, memory: bool) -> Result<(), EngineError>;
    /// Upcast for code that only needs the machine view.
    fn machine(&self) -> &dyn MachineState;
    fn machine_mut(&mut self) -> &mut dyn MachineState;
}
