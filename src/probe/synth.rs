//! Fixture synthesis in sandbox memory.
//!
//! Every fixture is mapped as its own region: logical content, then random
//! filler up to the next 16-byte boundary (at least one byte), then one
//! unmapped byte before the next fixture. A one-byte overrun lands in the
//! fixture's own filler; a longer one faults.

use crate::error::SubtestError;
use crate::sandbox::abi::pack_le;
use crate::sandbox::{MachineState, Perms};
use crate::utils::constants::{ALLOC_ARENA_SIZE, ALLOC_QUANTUM, FIXTURE_GAP};
use crate::utils::det_rng::DetRng;
use crate::utils::hex;

/// Monotonic allocation pointer, reset to `base` at each test case start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationCursor {
    base: u64,
    next: u64,
}

impl AllocationCursor {
    pub fn new(base: u64) -> Self {
        Self { base, next: base }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn next(&self) -> u64 {
        self.next
    }

    pub fn reset(&mut self) {
        self.next = self.base;
    }

    /// Reserve `footprint` bytes plus the trailing gap. Fails instead of
    /// wrapping or leaving the allocation arena.
    pub(crate) fn take(&mut self, footprint: u64) -> Result<u64, SubtestError> {
        let addr = self.next;
        let limit = self.base.saturating_add(ALLOC_ARENA_SIZE);
        let next = addr
            .checked_add(footprint)
            .and_then(|end| end.checked_add(FIXTURE_GAP))
            .filter(|next| *next <= limit)
            .ok_or(SubtestError::ArenaExhausted {
                base: self.base,
                requested: footprint,
            })?;
        self.next = next;
        Ok(addr)
    }
}

/// Filler appended to a fixture of `len` bytes.
pub fn filler_len(len: usize) -> usize {
    ALLOC_QUANTUM - len % ALLOC_QUANTUM
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    pub addr: u64,
    pub len: usize,
    pub content: Vec<u8>,
}

impl Fixture {
    pub fn end(&self) -> u64 {
        self.addr + self.len as u64
    }
}

/// True iff the live bytes at `addr` equal `expected`. Unreadable memory is a
/// mismatch, not an error.
pub fn compare(machine: &dyn MachineState, addr: u64, expected: &[u8]) -> bool {
    match machine.read_memory(addr, expected.len()) {
        Ok(live) if live == expected => true,
        Ok(live) => {
            tracing::trace!(
                "[PROBE] mismatch at {:#x}: live={} expected={}",
                addr,
                hex::encode(&live),
                hex::encode(expected)
            );
            false
        }
        Err(fault) => {
            tracing::trace!("[PROBE] compare at {:#x} unreadable: {}", addr, fault);
            false
        }
    }
}

/// Like [`compare`], but offsets listed in `skip` may hold anything.
pub fn compare_sparse(machine: &dyn MachineState, addr: u64, expected: &[u8], skip: &[usize]) -> bool {
    match machine.read_memory(addr, expected.len()) {
        Ok(live) => {
            let mismatch = live
                .iter()
                .zip(expected)
                .enumerate()
                .find(|(i, (l, e))| l != e && !skip.contains(i));
            if let Some((i, (l, e))) = mismatch {
                tracing::trace!(
                    "[PROBE] sparse mismatch at {:#x}+{}: live={:02x} expected={:02x}",
                    addr,
                    i,
                    l,
                    e
                );
            }
            mismatch.is_none()
        }
        Err(fault) => {
            tracing::trace!("[PROBE] sparse compare at {:#x} unreadable: {}", addr, fault);
            false
        }
    }
}

pub struct MemorySynthesizer<'a> {
    machine: &'a mut dyn MachineState,
    cursor: &'a mut AllocationCursor,
    rng: &'a mut DetRng,
    pointer_width: u32,
}

impl<'a> MemorySynthesizer<'a> {
    pub fn new(
        machine: &'a mut dyn MachineState,
        cursor: &'a mut AllocationCursor,
        rng: &'a mut DetRng,
        pointer_width: u32,
    ) -> Self {
        Self {
            machine,
            cursor,
            rng,
            pointer_width,
        }
    }

    fn place(&mut self, content: Vec<u8>, perms: Perms) -> Result<Fixture, SubtestError> {
        let len = content.len();
        let mut image = content.clone();
        image.extend(self.rng.bytes(filler_len(len)));
        let addr = self.cursor.take(image.len() as u64)?;
        self.machine.map_region(addr, perms, &image)?;
        Ok(Fixture { addr, len, content })
    }

    /// `len` random bytes.
    pub fn allocate(&mut self, len: usize, perms: Perms) -> Result<Fixture, SubtestError> {
        let content = self.rng.bytes(len);
        self.place(content, perms)
    }

    /// UTF-8 bytes of `text` plus one terminating zero. Embedded NULs are kept.
    pub fn allocate_string(&mut self, text: &str, perms: Perms) -> Result<Fixture, SubtestError> {
        let mut content = text.as_bytes().to_vec();
        content.push(0);
        self.place(content, perms)
    }

    /// A pointer-sized little-endian cell holding `value`.
    pub fn allocate_pointer_cell(&mut self, value: u64, perms: Perms) -> Result<Fixture, SubtestError> {
        let content = pack_le(value, self.pointer_width).ok_or(SubtestError::ValueTooWide {
            value,
            width: self.pointer_width,
        })?;
        self.place(content, perms)
    }

    pub fn write(&mut self, addr: u64, bytes: &[u8]) -> Result<(), SubtestError> {
        self.machine.write_memory(addr, bytes)?;
        Ok(())
    }

    pub fn write_string(&mut self, addr: u64, text: &str) -> Result<(), SubtestError> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.write(addr, &bytes)
    }

    pub fn compare(&self, addr: u64, expected: &[u8]) -> bool {
        compare(&*self.machine, addr, expected)
    }
}
