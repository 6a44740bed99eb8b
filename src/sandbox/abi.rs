//! Calling conventions: where logical argument `i` lives, where the return
//! value comes back, and how the return address is passed.
//!
//! Each convention serves both sides of a call. The launcher uses the caller
//! side (`prepare_call`, `return_value`); the scripted sandbox uses the callee
//! side to run host routines as if they were compiled code.

use crate::error::MemoryFault;
use crate::sandbox::MachineState;
use std::collections::BTreeMap;

/// Logical arguments bound for one call, keyed by 0-based index.
pub type ArgumentSet = BTreeMap<usize, u64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ConventionKind {
    SystemVAmd64,
    CdeclX86,
    Aapcs64,
}

impl ConventionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SystemVAmd64 => "sysv",
            Self::CdeclX86 => "cdecl",
            Self::Aapcs64 => "aapcs64",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sysv" | "sysv64" | "amd64" | "x86_64" => Some(Self::SystemVAmd64),
            "cdecl" | "x86" | "i386" => Some(Self::CdeclX86),
            "aapcs64" | "aarch64" | "arm64" => Some(Self::Aapcs64),
            _ => None,
        }
    }

    pub fn convention(self) -> &'static dyn CallingConvention {
        match self {
            Self::SystemVAmd64 => &SystemVAmd64,
            Self::CdeclX86 => &CdeclX86,
            Self::Aapcs64 => &Aapcs64,
        }
    }
}

pub trait CallingConvention: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ConventionKind;
    /// Native pointer width in bits.
    fn pointer_width(&self) -> u32;
    /// Native `int` width in bits.
    fn int_width(&self) -> u32;
    fn stack_pointer(&self) -> &'static str;

    /// Place `args` and `return_addr` so that a jump to the callee observes a call.
    fn prepare_call(
        &self,
        machine: &mut dyn MachineState,
        args: &ArgumentSet,
        return_addr: u64,
    ) -> Result<(), MemoryFault>;
    /// Raw return register, truncated to the pointer width.
    fn return_value(&self, machine: &dyn MachineState) -> u64;

    fn read_argument(&self, machine: &dyn MachineState, index: usize) -> Result<u64, MemoryFault>;
    fn write_return_value(&self, machine: &mut dyn MachineState, value: u64);
    fn pop_return_address(&self, machine: &mut dyn MachineState) -> Result<u64, MemoryFault>;
}

pub fn width_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Little-endian encoding of `value` on `bits`; `None` when it does not fit.
pub fn pack_le(value: u64, bits: u32) -> Option<Vec<u8>> {
    if value & !width_mask(bits) != 0 {
        return None;
    }
    let bytes = (bits / 8) as usize;
    Some(value.to_le_bytes()[..bytes].to_vec())
}

pub fn unpack_le(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(8)
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (8 * i)))
}

fn read_word(machine: &dyn MachineState, addr: u64, bits: u32) -> Result<u64, MemoryFault> {
    let raw = machine.read_memory(addr, (bits / 8) as usize)?;
    Ok(unpack_le(&raw))
}

fn write_word(
    machine: &mut dyn MachineState,
    addr: u64,
    value: u64,
    bits: u32,
) -> Result<(), MemoryFault> {
    let bytes = (value & width_mask(bits)).to_le_bytes();
    machine.write_memory(addr, &bytes[..(bits / 8) as usize])
}

/// Highest bound index + 1, or 0 for an empty set.
fn arity(args: &ArgumentSet) -> usize {
    args.keys().next_back().map_or(0, |max| max + 1)
}

/// Push stack-passed arguments `first..arity`, then the return address when
/// given. The argument block stays 16-byte aligned.
fn push_frame(
    machine: &mut dyn MachineState,
    sp_reg: &'static str,
    args: &ArgumentSet,
    first: usize,
    slot_bits: u32,
    return_addr: Option<u64>,
) -> Result<(), MemoryFault> {
    let slot = u64::from(slot_bits / 8);
    let stacked = arity(args).saturating_sub(first) as u64;
    let mut sp = machine.register(sp_reg).wrapping_sub(stacked * slot);
    sp &= !0xf;
    for i in 0..stacked {
        let value = args.get(&(first + i as usize)).copied().unwrap_or(0);
        write_word(machine, sp + i * slot, value, slot_bits)?;
    }
    if let Some(ret) = return_addr {
        sp = sp.wrapping_sub(slot);
        write_word(machine, sp, ret, slot_bits)?;
    }
    machine.set_register(sp_reg, sp);
    Ok(())
}

const SYSV_ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

/// x86-64 System V: six integer registers, then the stack; result in rax.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemVAmd64;

impl CallingConvention for SystemVAmd64 {
    fn kind(&self) -> ConventionKind {
        ConventionKind::SystemVAmd64
    }
    fn pointer_width(&self) -> u32 {
        64
    }
    fn int_width(&self) -> u32 {
        32
    }
    fn stack_pointer(&self) -> &'static str {
        "rsp"
    }

    fn prepare_call(
        &self,
        machine: &mut dyn MachineState,
        args: &ArgumentSet,
        return_addr: u64,
    ) -> Result<(), MemoryFault> {
        for (index, value) in args.range(..SYSV_ARG_REGS.len()) {
            machine.set_register(SYSV_ARG_REGS[*index], *value);
        }
        push_frame(machine, "rsp", args, SYSV_ARG_REGS.len(), 64, Some(return_addr))
    }

    fn return_value(&self, machine: &dyn MachineState) -> u64 {
        machine.register("rax")
    }

    fn read_argument(&self, machine: &dyn MachineState, index: usize) -> Result<u64, MemoryFault> {
        if let Some(reg) = SYSV_ARG_REGS.get(index) {
            return Ok(machine.register(reg));
        }
        let offset = 8 + 8 * (index - SYSV_ARG_REGS.len()) as u64;
        read_word(machine, machine.register("rsp") + offset, 64)
    }

    fn write_return_value(&self, machine: &mut dyn MachineState, value: u64) {
        machine.set_register("rax", value);
    }

    fn pop_return_address(&self, machine: &mut dyn MachineState) -> Result<u64, MemoryFault> {
        let sp = machine.register("rsp");
        let ret = read_word(machine, sp, 64)?;
        machine.set_register("rsp", sp + 8);
        Ok(ret)
    }
}

/// 32-bit cdecl: everything on the stack; result in eax.
#[derive(Debug, Clone, Copy, Default)]
pub struct CdeclX86;

impl CallingConvention for CdeclX86 {
    fn kind(&self) -> ConventionKind {
        ConventionKind::CdeclX86
    }
    fn pointer_width(&self) -> u32 {
        32
    }
    fn int_width(&self) -> u32 {
        32
    }
    fn stack_pointer(&self) -> &'static str {
        "esp"
    }

    fn prepare_call(
        &self,
        machine: &mut dyn MachineState,
        args: &ArgumentSet,
        return_addr: u64,
    ) -> Result<(), MemoryFault> {
        push_frame(machine, "esp", args, 0, 32, Some(return_addr))
    }

    fn return_value(&self, machine: &dyn MachineState) -> u64 {
        machine.register("eax") & width_mask(32)
    }

    fn read_argument(&self, machine: &dyn MachineState, index: usize) -> Result<u64, MemoryFault> {
        let offset = 4 + 4 * index as u64;
        read_word(machine, machine.register("esp") + offset, 32)
    }

    fn write_return_value(&self, machine: &mut dyn MachineState, value: u64) {
        machine.set_register("eax", value & width_mask(32));
    }

    fn pop_return_address(&self, machine: &mut dyn MachineState) -> Result<u64, MemoryFault> {
        let sp = machine.register("esp");
        let ret = read_word(machine, sp, 32)?;
        machine.set_register("esp", sp + 4);
        Ok(ret)
    }
}

const AAPCS64_ARG_REGS: [&str; 8] = ["x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7"];

/// AArch64 procedure call standard: x0-x7, then the stack; link register holds
/// the return address; result in x0.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aapcs64;

impl CallingConvention for Aapcs64 {
    fn kind(&self) -> ConventionKind {
        ConventionKind::Aapcs64
    }
    fn pointer_width(&self) -> u32 {
        64
    }
    fn int_width(&self) -> u32 {
        32
    }
    fn stack_pointer(&self) -> &'static str {
        "sp"
    }

    fn prepare_call(
        &self,
        machine: &mut dyn MachineState,
        args: &ArgumentSet,
        return_addr: u64,
    ) -> Result<(), MemoryFault> {
        for (index, value) in args.range(..AAPCS64_ARG_REGS.len()) {
            machine.set_register(AAPCS64_ARG_REGS[*index], *value);
        }
        machine.set_register("lr", return_addr);
        push_frame(machine, "sp", args, AAPCS64_ARG_REGS.len(), 64, None)
    }

    fn return_value(&self, machine: &dyn MachineState) -> u64 {
        machine.register("x0")
    }

    fn read_argument(&self, machine: &dyn MachineState, index: usize) -> Result<u64, MemoryFault> {
        if let Some(reg) = AAPCS64_ARG_REGS.get(index) {
            return Ok(machine.register(reg));
        }
        let offset = 8 * (index - AAPCS64_ARG_REGS.len()) as u64;
        read_word(machine, machine.register("sp") + offset, 64)
    }

    fn write_return_value(&self, machine: &mut dyn MachineState, value: u64) {
        machine.set_register("x0", value);
    }

    fn pop_return_address(&self, machine: &mut dyn MachineState) -> Result<u64, MemoryFault> {
        Ok(machine.register("lr"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::scripted::MachineImage;
    use crate::sandbox::Perms;

    fn image_with_stack(sp_reg: &'static str) -> MachineImage {
        let mut image = MachineImage::default();
        image.map_region(0x8000, Perms::READ_WRITE, &[0u8; 0x100]).unwrap();
        image.set_register(sp_reg, 0x8100);
        image
    }

    fn args(values: &[u64]) -> ArgumentSet {
        values.iter().copied().enumerate().collect()
    }

    #[test]
    fn test_pack_le_rejects_wide_values() {
        assert_eq!(pack_le(0x1234, 16), Some(vec![0x34, 0x12]));
        assert_eq!(pack_le(0x1_0000, 16), None);
        assert_eq!(unpack_le(&[0x34, 0x12, 0, 0]), 0x1234);
    }

    #[test]
    fn test_caller_and_callee_sides_agree() {
        for kind in [
            ConventionKind::SystemVAmd64,
            ConventionKind::CdeclX86,
            ConventionKind::Aapcs64,
        ] {
            let conv = kind.convention();
            let mut image = image_with_stack(conv.stack_pointer());
            let bound = args(&[11, 22, 33, 44, 55, 66, 77, 88, 99, 1010]);
            conv.prepare_call(&mut image, &bound, 0x1337).unwrap();
            for (index, value) in &bound {
                assert_eq!(
                    conv.read_argument(&image, *index).unwrap(),
                    *value,
                    "{} argument {}",
                    kind.as_str(),
                    index
                );
            }
            assert_eq!(conv.pop_return_address(&mut image).unwrap(), 0x1337);
            conv.write_return_value(&mut image, 0xfeed);
            assert_eq!(conv.return_value(&image), 0xfeed);
        }
    }

    #[test]
    fn test_sysv_entry_stack_is_aligned() {
        let conv = SystemVAmd64;
        let mut image = image_with_stack("rsp");
        conv.prepare_call(&mut image, &args(&[1, 2, 3, 4, 5, 6, 7]), 0x1337)
            .unwrap();
        assert_eq!((image.register("rsp") + 8) % 16, 0);
    }

    #[test]
    fn test_cdecl_truncates_return_register() {
        let conv = CdeclX86;
        let mut image = image_with_stack("esp");
        conv.write_return_value(&mut image, 0x1_ffff_ffff);
        assert_eq!(conv.return_value(&image), 0xffff_ffff);
    }
}
