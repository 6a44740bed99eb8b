use crate::error::{MemoryFault, MemoryFaultKind};
use crate::sandbox::Perms;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Region {
    perms: Perms,
    bytes: Vec<u8>,
}

impl Region {
    fn end(&self, base: u64) -> u64 {
        base + self.bytes.len() as u64
    }
}

/// Which permission an access must hold. `Host` bypasses permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Host,
    GuestRead,
    GuestWrite,
}

/// Sparse address space made of non-overlapping mapped regions.
///
/// Accesses may span several regions as long as they are contiguous; any
/// unmapped byte in range faults the whole access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionMap {
    regions: BTreeMap<u64, Region>,
}

impl RegionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn is_mapped(&self, addr: u64) -> bool {
        self.containing(addr).is_some()
    }

    fn containing(&self, addr: u64) -> Option<u64> {
        let (base, region) = self.regions.range(..=addr).next_back()?;
        (addr < region.end(*base)).then_some(*base)
    }

    pub fn map(&mut self, addr: u64, perms: Perms, bytes: &[u8]) -> Result<(), MemoryFault> {
        let len = bytes.len();
        let Some(end) = addr.checked_add(len as u64) else {
            return Err(MemoryFault::new(addr, len, MemoryFaultKind::Overlap));
        };
        if len == 0 {
            return Ok(());
        }
        let prev_overlaps = self.containing(addr).is_some();
        let next_overlaps = self
            .regions
            .range(addr..)
            .next()
            .is_some_and(|(base, _)| *base < end);
        if prev_overlaps || next_overlaps {
            return Err(MemoryFault::new(addr, len, MemoryFaultKind::Overlap));
        }
        self.regions.insert(
            addr,
            Region {
                perms,
                bytes: bytes.to_vec(),
            },
        );
        Ok(())
    }

    /// Walk `[addr, addr+len)` region by region, handing out (region, offset, span).
    fn walk<F>(&self, addr: u64, len: usize, access: Access, mut visit: F) -> Result<(), MemoryFault>
    where
        F: FnMut(&Region, usize, usize, usize),
    {
        let fault = |kind| MemoryFault::new(addr, len, kind);
        let mut cursor = addr;
        let mut done = 0usize;
        while done < len {
            let base = self
                .containing(cursor)
                .ok_or_else(|| fault(MemoryFaultKind::Unmapped))?;
            let region = &self.regions[&base];
            match access {
                Access::GuestRead if !region.perms.read => {
                    return Err(fault(MemoryFaultKind::ReadProtected))
                }
                Access::GuestWrite if !region.perms.write => {
                    return Err(fault(MemoryFaultKind::WriteProtected))
                }
                _ => {}
            }
            let offset = (cursor - base) as usize;
            let span = (region.bytes.len() - offset).min(len - done);
            visit(region, offset, span, done);
            done += span;
            cursor += span as u64;
        }
        Ok(())
    }

    pub fn read(&self, addr: u64, len: usize, access: Access) -> Result<Vec<u8>, MemoryFault> {
        let mut out = vec![0u8; len];
        self.walk(addr, len, access, |region, offset, span, done| {
            out[done..done + span].copy_from_slice(&region.bytes[offset..offset + span]);
        })?;
        Ok(out)
    }

    pub fn write(&mut self, addr: u64, bytes: &[u8], access: Access) -> Result<(), MemoryFault> {
        // Validate the whole range first so a faulting write leaves memory untouched.
        let mut spans = Vec::new();
        self.walk(addr, bytes.len(), access, |_, offset, span, done| {
            spans.push((offset, span, done));
        })?;
        let mut cursor = addr;
        for (offset, span, done) in spans {
            let base = cursor - offset as u64;
            if let Some(region) = self.regions.get_mut(&base) {
                region.bytes[offset..offset + span].copy_from_slice(&bytes[done..done + span]);
            }
            cursor += span as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_spanning_adjacent_regions() {
        let mut mem = RegionMap::new();
        mem.map(0x1000, Perms::READ, b"abcd").unwrap();
        mem.map(0x1004, Perms::READ, b"efgh").unwrap();
        assert_eq!(mem.read(0x1002, 4, Access::GuestRead).unwrap(), b"cdef");
    }

    #[test]
    fn test_read_across_gap_faults() {
        let mut mem = RegionMap::new();
        mem.map(0x1000, Perms::READ, b"abcd").unwrap();
        mem.map(0x1005, Perms::READ, b"efgh").unwrap();
        let err = mem.read(0x1002, 4, Access::Host).unwrap_err();
        assert_eq!(err.kind, MemoryFaultKind::Unmapped);
    }

    #[test]
    fn test_overlapping_map_rejected() {
        let mut mem = RegionMap::new();
        mem.map(0x1000, Perms::READ, &[0; 16]).unwrap();
        assert!(mem.map(0x100f, Perms::READ, &[0; 4]).is_err());
        assert!(mem.map(0x0ff0, Perms::READ, &[0; 17]).is_err());
        assert!(mem.map(0x1010, Perms::READ, &[0; 4]).is_ok());
    }

    #[test]
    fn test_guest_write_respects_permissions_and_is_atomic() {
        let mut mem = RegionMap::new();
        mem.map(0x2000, Perms::READ_WRITE, b"xx").unwrap();
        mem.map(0x2002, Perms::READ, b"yy").unwrap();
        let err = mem.write(0x2000, b"1234", Access::GuestWrite).unwrap_err();
        assert_eq!(err.kind, MemoryFaultKind::WriteProtected);
        assert_eq!(mem.read(0x2000, 4, Access::Host).unwrap(), b"xxyy");
        mem.write(0x2000, b"1234", Access::Host).unwrap();
        assert_eq!(mem.read(0x2000, 4, Access::Host).unwrap(), b"1234");
    }
}
