//! In-process sandbox that runs host-implemented routines as if they were
//! compiled code at fixed addresses.
//!
//! Routines see the machine only through a `CallFrame`: arguments come from the
//! calling convention, every guest access is permission-checked against the
//! region map, and a cooperative deadline check bounds each run. Control
//! "returns" by popping the return address the caller pushed; anything but the
//! sentinel is an abnormal termination.

use crate::error::{EngineError, MemoryFault};
use crate::sandbox::abi::{unpack_le, width_mask, CallingConvention, ConventionKind};
use crate::sandbox::memory::{Access, RegionMap};
use crate::sandbox::{ExecutionEngine, MachineState, Perms, RegisterFile, RunStatus};
use crate::utils::constants::{DATA_BASE, DATA_SIZE, STACK_BASE, STACK_SIZE};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deadline is polled once every this many guest steps.
const DEADLINE_POLL_STEPS: u64 = 64;

/// Memory plus registers. Also the snapshot representation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineImage {
    pub memory: RegionMap,
    pub registers: RegisterFile,
}

impl MachineState for MachineImage {
    fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryFault> {
        self.memory.read(addr, len, Access::Host)
    }

    fn write_memory(&mut self, addr: u64, bytes: &[u8]) -> Result<(), MemoryFault> {
        self.memory.write(addr, bytes, Access::Host)
    }

    fn map_region(&mut self, addr: u64, perms: Perms, bytes: &[u8]) -> Result<(), MemoryFault> {
        self.memory.map(addr, perms, bytes)
    }

    fn register(&self, name: &'static str) -> u64 {
        self.registers.get(name)
    }

    fn set_register(&mut self, name: &'static str, value: u64) {
        self.registers.set(name, value);
    }
}

/// Why a routine stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    Fault(MemoryFault),
    Timeout,
}

impl From<MemoryFault> for Trap {
    fn from(fault: MemoryFault) -> Self {
        Trap::Fault(fault)
    }
}

pub type Routine = Arc<dyn Fn(&mut CallFrame<'_>) -> Result<u64, Trap> + Send + Sync>;

/// Guest-side view handed to a routine for the duration of one call.
pub struct CallFrame<'a> {
    image: &'a mut MachineImage,
    convention: &'static dyn CallingConvention,
    deadline: Instant,
    steps: u64,
}

impl<'a> CallFrame<'a> {
    /// Count one guest step; fails once the deadline has passed.
    pub fn tick(&mut self) -> Result<(), Trap> {
        self.steps += 1;
        if self.steps % DEADLINE_POLL_STEPS == 0 && Instant::now() >= self.deadline {
            return Err(Trap::Timeout);
        }
        Ok(())
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn pointer_width(&self) -> u32 {
        self.convention.pointer_width()
    }

    pub fn arg(&mut self, index: usize) -> Result<u64, Trap> {
        self.tick()?;
        Ok(self.convention.read_argument(&*self.image, index)?)
    }

    pub fn load_u8(&mut self, addr: u64) -> Result<u8, Trap> {
        self.tick()?;
        let byte = self.image.memory.read(addr, 1, Access::GuestRead)?;
        Ok(byte[0])
    }

    pub fn store_u8(&mut self, addr: u64, value: u8) -> Result<(), Trap> {
        self.tick()?;
        self.image.memory.write(addr, &[value], Access::GuestWrite)?;
        Ok(())
    }

    pub fn load_ptr(&mut self, addr: u64) -> Result<u64, Trap> {
        self.tick()?;
        let width = (self.pointer_width() / 8) as usize;
        let raw = self.image.memory.read(addr, width, Access::GuestRead)?;
        Ok(unpack_le(&raw))
    }

    pub fn store_ptr(&mut self, addr: u64, value: u64) -> Result<(), Trap> {
        self.tick()?;
        let width = (self.pointer_width() / 8) as usize;
        let bytes = (value & width_mask(self.pointer_width())).to_le_bytes();
        self.image
            .memory
            .write(addr, &bytes[..width], Access::GuestWrite)?;
        Ok(())
    }

    /// Address of a pointer-sized static variable in the data segment.
    pub fn static_slot(&self, index: usize) -> u64 {
        DATA_BASE + (index as u64) * 8
    }
}

pub struct ScriptedEngine {
    image: MachineImage,
    convention: &'static dyn CallingConvention,
    routines: HashMap<u64, Routine>,
    snapshots: Vec<MachineImage>,
}

impl std::fmt::Debug for ScriptedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedEngine")
            .field("convention", &self.convention.kind())
            .field("routines", &self.routines.len())
            .field("snapshots", &self.snapshots.len())
            .finish()
    }
}

impl ScriptedEngine {
    /// Fresh machine with a stack and a zeroed data segment mapped.
    pub fn new(kind: ConventionKind) -> Result<Self, EngineError> {
        let convention = kind.convention();
        let mut image = MachineImage::default();
        image
            .map_region(STACK_BASE, Perms::READ_WRITE, &vec![0u8; STACK_SIZE])
            .map_err(|e| EngineError::Unavailable(format!("stack mapping failed: {e}")))?;
        image
            .map_region(DATA_BASE, Perms::READ_WRITE, &vec![0u8; DATA_SIZE])
            .map_err(|e| EngineError::Unavailable(format!("data mapping failed: {e}")))?;
        // Leave some headroom above the initial stack pointer.
        image.set_register(
            convention.stack_pointer(),
            STACK_BASE + STACK_SIZE as u64 - 0x100,
        );
        Ok(Self {
            image,
            convention,
            routines: HashMap::new(),
            snapshots: Vec::new(),
        })
    }

    pub fn convention(&self) -> &'static dyn CallingConvention {
        self.convention
    }

    pub fn image(&self) -> &MachineImage {
        &self.image
    }

    /// Bind `routine` to `addr`, mapping one executable byte there.
    pub fn install<F>(&mut self, addr: u64, routine: F) -> Result<(), MemoryFault>
    where
        F: Fn(&mut CallFrame<'_>) -> Result<u64, Trap> + Send + Sync + 'static,
    {
        self.image.map_region(addr, Perms::READ_EXEC, &[0xc3])?;
        self.routines.insert(addr, Arc::new(routine));
        Ok(())
    }
}

impl MachineState for ScriptedEngine {
    fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryFault> {
        self.image.read_memory(addr, len)
    }

    fn write_memory(&mut self, addr: u64, bytes: &[u8]) -> Result<(), MemoryFault> {
        self.image.write_memory(addr, bytes)
    }

    fn map_region(&mut self, addr: u64, perms: Perms, bytes: &[u8]) -> Result<(), MemoryFault> {
        self.image.map_region(addr, perms, bytes)
    }

    fn register(&self, name: &'static str) -> u64 {
        self.image.register(name)
    }

    fn set_register(&mut self, name: &'static str, value: u64) {
        self.image.set_register(name, value);
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn run(&mut self, entry: u64, sentinel_return: u64, timeout: Duration) -> RunStatus {
        let Some(routine) = self.routines.get(&entry).cloned() else {
            tracing::debug!("[SANDBOX] no code at {:#x}; invalid fetch", entry);
            return RunStatus::Faulted;
        };
        let deadline = Instant::now() + timeout;
        let outcome = {
            let mut frame = CallFrame {
                image: &mut self.image,
                convention: self.convention,
                deadline,
                steps: 0,
            };
            routine(&mut frame)
        };

        match outcome {
            Ok(value) => {
                if Instant::now() > deadline {
                    return RunStatus::TimedOut;
                }
                self.convention.write_return_value(&mut self.image, value);
                match self.convention.pop_return_address(&mut self.image) {
                    Ok(ret) if ret == sentinel_return => RunStatus::Completed,
                    Ok(ret) => {
                        tracing::debug!(
                            "[SANDBOX] {:#x} returned to {:#x}, expected sentinel {:#x}",
                            entry,
                            ret,
                            sentinel_return
                        );
                        RunStatus::Faulted
                    }
                    Err(fault) => {
                        tracing::debug!("[SANDBOX] return address unreadable: {}", fault);
                        RunStatus::Faulted
                    }
                }
            }
            Err(Trap::Timeout) => RunStatus::TimedOut,
            Err(Trap::Fault(fault)) => {
                tracing::debug!("[SANDBOX] {:#x} faulted: {}", entry, fault);
                RunStatus::Faulted
            }
        }
    }

    fn take_snapshot(&mut self) -> Result<usize, EngineError> {
        self.snapshots.push(self.image.clone());
        Ok(self.snapshots.len() - 1)
    }

    fn restore_snapshot(&mut self, id: usize, memory: bool) -> Result<(), EngineError> {
        let snap = self
            .snapshots
            .get(id)
            .ok_or(EngineError::UnknownSnapshot(id))?;
        if memory {
            self.image.memory = snap.memory.clone();
        }
        self.image.registers = snap.registers.clone();
        Ok(())
    }

    fn machine(&self) -> &dyn MachineState {
        &self.image
    }

    fn machine_mut(&mut self) -> &mut dyn MachineState {
        &mut self.image
    }
}
