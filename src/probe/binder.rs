use crate::error::{MemoryFault, SubtestError};
use crate::sandbox::abi::{width_mask, ArgumentSet, CallingConvention};
use crate::sandbox::MachineState;

/// Collects the logical arguments of one sub-test and hands them to the
/// calling convention. Reset before every sub-test; nothing carries over.
#[derive(Debug, Clone)]
pub struct ArgumentBinder {
    convention: &'static dyn CallingConvention,
    arity: usize,
    args: ArgumentSet,
}

impl ArgumentBinder {
    pub fn new(convention: &'static dyn CallingConvention, arity: usize) -> Self {
        Self {
            convention,
            arity,
            args: ArgumentSet::new(),
        }
    }

    pub fn convention(&self) -> &'static dyn CallingConvention {
        self.convention
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn pointer_width(&self) -> u32 {
        self.convention.pointer_width()
    }

    /// Forget all bindings and adopt the arity of the next case.
    pub fn reset(&mut self, arity: usize) {
        self.arity = arity;
        self.args.clear();
    }

    pub fn bind(&mut self, index: usize, value: u64) -> Result<(), SubtestError> {
        if index >= self.arity {
            return Err(SubtestError::ArgumentOutOfRange {
                index,
                arity: self.arity,
            });
        }
        let width = self.pointer_width();
        if value & !width_mask(width) != 0 {
            return Err(SubtestError::ValueTooWide { value, width });
        }
        self.args.insert(index, value);
        Ok(())
    }

    pub fn bound(&self) -> &ArgumentSet {
        &self.args
    }

    pub fn prepare_call(
        &self,
        machine: &mut dyn MachineState,
        return_addr: u64,
    ) -> Result<(), MemoryFault> {
        self.convention.prepare_call(machine, &self.args, return_addr)
    }

    /// Return register as an unsigned pointer-width quantity.
    pub fn result(&self, machine: &dyn MachineState) -> u64 {
        self.convention.return_value(machine) & width_mask(self.pointer_width())
    }

    /// Return register reinterpreted as a signed native `int`.
    pub fn signed_result(&self, machine: &dyn MachineState) -> i64 {
        let bits = self.convention.int_width();
        let raw = self.convention.return_value(machine) & width_mask(bits);
        if bits >= 64 {
            return raw as i64;
        }
        let shift = 64 - bits;
        ((raw << shift) as i64) >> shift
    }
}
