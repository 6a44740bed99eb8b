//! Test cases and the contexts their leaves run in.
//!
//! All per-case state lives in `CaseScratch`, which the launcher resets at
//! case start and threads through every setup and verify call. Addresses
//! remembered in an early sub-test stay valid for later ones.

use crate::error::{ConstructionError, MemoryFault, SubtestError};
use crate::probe::binder::ArgumentBinder;
use crate::probe::synth::{self, AllocationCursor, Fixture, MemorySynthesizer};
use crate::probe::tree::TestTree;
use crate::sandbox::abi::unpack_le;
use crate::sandbox::layout::LayoutResolver;
use crate::sandbox::{MachineState, Perms};
use crate::utils::constants::MAX_ARGUMENTS;
use crate::utils::det_rng::DetRng;
use std::collections::BTreeMap;

/// A named behavioral contract for one catalog function.
#[derive(Debug, Clone)]
pub struct TestCase {
    func: String,
    tree: TestTree,
    arity: usize,
    persistent: bool,
    layout_types: Vec<String>,
}

impl TestCase {
    pub fn new(func: impl Into<String>, tree: TestTree) -> Self {
        Self {
            func: func.into(),
            tree,
            arity: 0,
            persistent: false,
            layout_types: Vec::new(),
        }
    }

    #[must_use]
    pub fn arity(mut self, arity: usize) -> Self {
        self.arity = arity;
        self
    }

    /// Keep memory between sub-tests: each leaf observes what the previous
    /// run left behind.
    #[must_use]
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    #[must_use]
    pub fn requires_layout(mut self, type_name: impl Into<String>) -> Self {
        self.layout_types.push(type_name.into());
        self
    }

    pub fn func(&self) -> &str {
        &self.func
    }

    pub fn tree(&self) -> &TestTree {
        &self.tree
    }

    pub fn declared_arity(&self) -> usize {
        self.arity
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn layout_types(&self) -> &[String] {
        &self.layout_types
    }

    pub fn needs_layout(&self) -> bool {
        !self.layout_types.is_empty()
    }

    /// Structural checks run once, when the launcher is built.
    pub fn validate(&self, index: usize) -> Result<(), ConstructionError> {
        if self.func.trim().is_empty() {
            return Err(ConstructionError::EmptyFunctionName { index });
        }
        if self.arity > MAX_ARGUMENTS {
            return Err(ConstructionError::ArityExceeded {
                func: self.func.clone(),
                arity: self.arity,
                max: MAX_ARGUMENTS,
            });
        }
        Ok(())
    }
}

/// Per-case scratch: the allocation cursor plus values setup wants to hand to
/// verify or to later sub-tests.
#[derive(Debug, Clone)]
pub struct CaseScratch {
    cursor: AllocationCursor,
    slots: BTreeMap<&'static str, u64>,
    canaries: BTreeMap<&'static str, (u64, Vec<u8>)>,
}

impl CaseScratch {
    pub fn new(alloc_base: u64) -> Self {
        Self {
            cursor: AllocationCursor::new(alloc_base),
            slots: BTreeMap::new(),
            canaries: BTreeMap::new(),
        }
    }

    pub fn reset(&mut self) {
        self.cursor.reset();
        self.slots.clear();
        self.canaries.clear();
    }

    pub fn cursor(&self) -> &AllocationCursor {
        &self.cursor
    }

    pub fn set(&mut self, name: &'static str, value: u64) {
        self.slots.insert(name, value);
    }

    pub fn get(&self, name: &'static str) -> Result<u64, SubtestError> {
        self.slots
            .get(name)
            .copied()
            .ok_or(SubtestError::MissingSlot(name))
    }
}

fn read_pointer(
    machine: &dyn MachineState,
    addr: u64,
    pointer_width: u32,
) -> Result<u64, MemoryFault> {
    let raw = machine.read_memory(addr, (pointer_width / 8) as usize)?;
    Ok(unpack_le(&raw))
}

/// What a setup closure may touch.
pub struct SetupContext<'a> {
    pub(crate) machine: &'a mut dyn MachineState,
    pub(crate) scratch: &'a mut CaseScratch,
    pub(crate) rng: &'a mut DetRng,
    pub(crate) binder: &'a mut ArgumentBinder,
    pub(crate) layout: Option<&'a dyn LayoutResolver>,
}

impl<'a> SetupContext<'a> {
    pub fn synth(&mut self) -> MemorySynthesizer<'_> {
        let width = self.binder.pointer_width();
        MemorySynthesizer::new(
            &mut *self.machine,
            &mut self.scratch.cursor,
            &mut *self.rng,
            width,
        )
    }

    pub fn alloc(&mut self, len: usize) -> Result<u64, SubtestError> {
        Ok(self.synth().allocate(len, Perms::READ_WRITE)?.addr)
    }

    /// Read-only NUL-terminated string.
    pub fn string(&mut self, text: &str) -> Result<u64, SubtestError> {
        Ok(self.synth().allocate_string(text, Perms::READ)?.addr)
    }

    /// Writable NUL-terminated string.
    pub fn string_mut(&mut self, text: &str) -> Result<u64, SubtestError> {
        Ok(self.synth().allocate_string(text, Perms::READ_WRITE)?.addr)
    }

    pub fn pointer_cell(&mut self, value: u64) -> Result<u64, SubtestError> {
        Ok(self
            .synth()
            .allocate_pointer_cell(value, Perms::READ_WRITE)?
            .addr)
    }

    pub fn fixture_string(&mut self, text: &str, perms: Perms) -> Result<Fixture, SubtestError> {
        self.synth().allocate_string(text, perms)
    }

    pub fn write(&mut self, addr: u64, bytes: &[u8]) -> Result<(), SubtestError> {
        self.synth().write(addr, bytes)
    }

    pub fn write_string(&mut self, addr: u64, text: &str) -> Result<(), SubtestError> {
        self.synth().write_string(addr, text)
    }

    pub fn bind(&mut self, index: usize, value: u64) -> Result<(), SubtestError> {
        self.binder.bind(index, value)
    }

    /// Bind several arguments starting at index 0.
    pub fn bind_all(&mut self, values: &[u64]) -> Result<(), SubtestError> {
        for (index, value) in values.iter().enumerate() {
            self.binder.bind(index, *value)?;
        }
        Ok(())
    }

    pub fn set_slot(&mut self, name: &'static str, value: u64) {
        self.scratch.set(name, value);
    }

    pub fn slot(&self, name: &'static str) -> Result<u64, SubtestError> {
        self.scratch.get(name)
    }

    /// Overwrite `[addr, addr + bytes.len())` with known bytes and remember
    /// them under `name`. Typically placed in a fixture's filler so verify can
    /// detect writes past the logical end.
    pub fn plant_canary(
        &mut self,
        name: &'static str,
        addr: u64,
        bytes: &[u8],
    ) -> Result<(), SubtestError> {
        self.write(addr, bytes)?;
        self.scratch.canaries.insert(name, (addr, bytes.to_vec()));
        Ok(())
    }

    pub fn layout(&self) -> Result<&dyn LayoutResolver, SubtestError> {
        self.layout.ok_or(SubtestError::LayoutUnavailable)
    }

    pub fn size_of(&self, type_name: &str) -> Result<u64, SubtestError> {
        self.layout()?
            .size_of(type_name)
            .ok_or_else(|| SubtestError::LayoutLookup(type_name.to_string()))
    }

    pub fn field_offset(&self, type_name: &str, field: &str) -> Result<u64, SubtestError> {
        self.layout()?
            .field_offset(type_name, field)
            .ok_or_else(|| SubtestError::LayoutLookup(format!("{type_name}.{field}")))
    }
}

/// Read-only view handed to verify closures after a completed run.
pub struct VerifyContext<'a> {
    pub(crate) machine: &'a dyn MachineState,
    pub(crate) scratch: &'a CaseScratch,
    pub(crate) binder: &'a ArgumentBinder,
    pub(crate) layout: Option<&'a dyn LayoutResolver>,
}

impl<'a> VerifyContext<'a> {
    pub fn result(&self) -> u64 {
        self.binder.result(self.machine)
    }

    pub fn signed_result(&self) -> i64 {
        self.binder.signed_result(self.machine)
    }

    pub fn slot(&self, name: &'static str) -> Result<u64, SubtestError> {
        self.scratch.get(name)
    }

    /// Live bytes at `addr` equal `expected`; false when unreadable.
    pub fn compare(&self, addr: u64, expected: &[u8]) -> bool {
        synth::compare(self.machine, addr, expected)
    }

    /// `text` plus its terminator.
    pub fn compare_string(&self, addr: u64, text: &str) -> bool {
        let mut expected = text.as_bytes().to_vec();
        expected.push(0);
        self.compare(addr, &expected)
    }

    /// As `compare`, ignoring the bytes at the offsets in `skip`.
    pub fn compare_sparse(&self, addr: u64, expected: &[u8], skip: &[usize]) -> bool {
        synth::compare_sparse(self.machine, addr, expected, skip)
    }

    /// Whether the canary planted under `name` is still in place.
    pub fn canary_intact(&self, name: &'static str) -> Result<bool, SubtestError> {
        let (addr, bytes) = self
            .scratch
            .canaries
            .get(name)
            .ok_or(SubtestError::MissingSlot(name))?;
        Ok(self.compare(*addr, bytes))
    }

    pub fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>, SubtestError> {
        Ok(self.machine.read_memory(addr, len)?)
    }

    pub fn read_pointer(&self, addr: u64) -> Result<u64, SubtestError> {
        Ok(read_pointer(self.machine, addr, self.binder.pointer_width())?)
    }

    pub fn layout(&self) -> Result<&dyn LayoutResolver, SubtestError> {
        self.layout.ok_or(SubtestError::LayoutUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::abi::ConventionKind;
    use crate::sandbox::scripted::MachineImage;

    fn trivial_tree() -> TestTree {
        TestTree::leaf("t", |_| Ok(()), |_| Ok(true))
    }

    #[test]
    fn test_validate_rejects_bad_entries() {
        assert!(matches!(
            TestCase::new("  ", trivial_tree()).validate(3),
            Err(ConstructionError::EmptyFunctionName { index: 3 })
        ));
        assert!(matches!(
            TestCase::new("f", trivial_tree())
                .arity(MAX_ARGUMENTS + 1)
                .validate(0),
            Err(ConstructionError::ArityExceeded { .. })
        ));
        assert!(TestCase::new("f", trivial_tree()).arity(3).validate(0).is_ok());
    }

    #[test]
    fn test_scratch_reset_rewinds_cursor_and_slots() {
        let mut scratch = CaseScratch::new(0x4000);
        scratch.set("a", 1);
        scratch.cursor.take(32).unwrap();
        scratch.reset();
        assert_eq!(scratch.cursor().next(), 0x4000);
        assert!(matches!(scratch.get("a"), Err(SubtestError::MissingSlot("a"))));
    }

    #[test]
    fn test_setup_and_verify_share_scratch() {
        let mut image = MachineImage::default();
        let mut scratch = CaseScratch::new(0x4000);
        let mut rng = DetRng::new(5);
        let mut binder = ArgumentBinder::new(ConventionKind::SystemVAmd64.convention(), 1);
        {
            let mut setup = SetupContext {
                machine: &mut image,
                scratch: &mut scratch,
                rng: &mut rng,
                binder: &mut binder,
                layout: None,
            };
            let s = setup.string("hi").unwrap();
            let cell = setup.pointer_cell(s).unwrap();
            setup.set_slot("cell", cell);
            setup.bind(0, cell).unwrap();
            assert!(matches!(setup.layout(), Err(SubtestError::LayoutUnavailable)));
        }
        let verify = VerifyContext {
            machine: &image,
            scratch: &scratch,
            binder: &binder,
            layout: None,
        };
        let cell = verify.slot("cell").unwrap();
        let s = verify.read_pointer(cell).unwrap();
        assert!(verify.compare_string(s, "hi"));
        assert_eq!(binder.bound().get(&0), Some(&cell));
    }

    #[test]
    fn test_canary_detects_writes_past_fixture_end() {
        let mut image = MachineImage::default();
        let mut scratch = CaseScratch::new(0x4000);
        let mut rng = DetRng::new(8);
        let mut binder = ArgumentBinder::new(ConventionKind::SystemVAmd64.convention(), 1);
        let buf = {
            let mut setup = SetupContext {
                machine: &mut image,
                scratch: &mut scratch,
                rng: &mut rng,
                binder: &mut binder,
                layout: None,
            };
            let buf = setup.alloc(4).unwrap();
            setup.plant_canary("tail", buf + 4, &[0x5a; 12]).unwrap();
            buf
        };
        {
            let verify = VerifyContext {
                machine: &image,
                scratch: &scratch,
                binder: &binder,
                layout: None,
            };
            assert!(verify.canary_intact("tail").unwrap());
            assert!(matches!(
                verify.canary_intact("other"),
                Err(SubtestError::MissingSlot("other"))
            ));
        }

        image.write_memory(buf + 4, &[0x00]).unwrap();
        let verify = VerifyContext {
            machine: &image,
            scratch: &scratch,
            binder: &binder,
            layout: None,
        };
        assert!(!verify.canary_intact("tail").unwrap());
        // the clobbered byte is the only difference
        let mut expected = vec![0x5a; 12];
        expected[0] = 0xa5;
        assert!(verify.compare_sparse(buf + 4, &expected, &[0]));
        assert!(!verify.compare_sparse(buf + 4, &expected, &[]));

        scratch.reset();
        assert!(scratch.canaries.is_empty());
    }
}
