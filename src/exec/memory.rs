//! Byte-addressable model of the memory hierarchy.
//!
//! One space per level: a single off-chip space, a single on-chip shared
//! space, and one scratchpad per engine. Allocation is linear with
//! alignment and never freed; a full space refuses further allocation.

use std::collections::BTreeMap;

use super::ExecError;
use crate::consts::{DDR_CAPACITY, MIN_ALIGN};
use crate::device::Topology;
use crate::model::MemSpace;

/// One allocation in the bookkeeping ledger, in allocation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocRecord {
    pub buffer: String,
    pub space: MemSpace,
    pub offset: u64,
    pub size: u64,
    pub align: u64,
}

#[derive(Debug, Clone)]
struct Space {
    bytes: Vec<u8>,
    cursor: u64,
    capacity: u64,
}

impl Space {
    fn new(capacity: u64) -> Self {
        Self {
            bytes: Vec::new(),
            cursor: 0,
            capacity,
        }
    }
}

/// The full memory image of one execution.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    spaces: BTreeMap<MemSpace, Space>,
    ledger: Vec<AllocRecord>,
}

impl MemoryImage {
    pub fn new(topology: &Topology) -> Self {
        let mut spaces = BTreeMap::new();
        spaces.insert(MemSpace::Ddr, Space::new(DDR_CAPACITY));
        spaces.insert(MemSpace::L2, Space::new(topology.l2_size));
        for engine in 0..topology.engines {
            spaces.insert(MemSpace::L1(engine), Space::new(topology.l1_size));
        }
        Self {
            spaces,
            ledger: Vec::new(),
        }
    }

    fn space(&self, space: MemSpace) -> Result<&Space, ExecError> {
        self.spaces.get(&space).ok_or(ExecError::Region {
            message: format!("no such memory space {space}"),
        })
    }

    /// Linearly allocate `size` bytes aligned to `align`. The backing
    /// bytes are zeroed.
    pub fn alloc(
        &mut self,
        space: MemSpace,
        buffer: &str,
        size: u64,
        align: u64,
    ) -> Result<u64, ExecError> {
        let entry = self.spaces.get_mut(&space).ok_or(ExecError::Region {
            message: format!("no such memory space {space}"),
        })?;
        let offset = entry.cursor.next_multiple_of(align.max(MIN_ALIGN));
        let end = offset
            .checked_add(size)
            .ok_or(ExecError::AllocationOverflow {
                space,
                requested: size,
                capacity: entry.capacity,
            })?;
        if end > entry.capacity {
            return Err(ExecError::AllocationOverflow {
                space,
                requested: size,
                capacity: entry.capacity,
            });
        }
        entry.cursor = end;
        // Back the allocated range eagerly so reads of untouched bytes
        // observe zeroes.
        if entry.bytes.len() < end as usize {
            entry.bytes.resize(end as usize, 0);
        }
        self.ledger.push(AllocRecord {
            buffer: buffer.to_string(),
            space,
            offset,
            size,
            align,
        });
        Ok(offset)
    }

    pub fn read(&self, space: MemSpace, offset: u64, len: u64) -> Result<&[u8], ExecError> {
        let entry = self.space(space)?;
        let start = offset as usize;
        let end = start + len as usize;
        if (offset + len) > entry.cursor {
            return Err(ExecError::Region {
                message: format!(
                    "read of [{offset}, {}) is outside the allocated {} bytes of {space}",
                    offset + len,
                    entry.cursor
                ),
            });
        }
        Ok(&entry.bytes[start..end])
    }

    pub fn write(&mut self, space: MemSpace, offset: u64, data: &[u8]) -> Result<(), ExecError> {
        let entry = self.spaces.get_mut(&space).ok_or(ExecError::Region {
            message: format!("no such memory space {space}"),
        })?;
        let end = offset + data.len() as u64;
        if end > entry.cursor {
            return Err(ExecError::Region {
                message: format!(
                    "write of [{offset}, {end}) is outside the allocated {} bytes of {space}",
                    entry.cursor
                ),
            });
        }
        entry.bytes[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    pub fn ledger(&self) -> &[AllocRecord] {
        self.ledger.as_slice()
    }

    /// Bytes currently allocated in a space.
    pub fn used(&self, space: MemSpace) -> u64 {
        self.spaces.get(&space).map(|s| s.cursor).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn topology() -> Topology {
        Topology {
            engines: 2,
            l2_size: 1024,
            device_units: BTreeMap::new(),
            per_engine_units: BTreeMap::new(),
            l1_size: 256,
        }
    }

    #[test]
    fn allocation_respects_alignment() {
        let mut image = MemoryImage::new(&topology());
        let a = image.alloc(MemSpace::L2, "a", 10, 1).unwrap();
        let b = image.alloc(MemSpace::L2, "b", 16, 64).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 64);
        assert_eq!(image.used(MemSpace::L2), 80);
    }

    #[test]
    fn full_space_refuses_allocation() {
        let mut image = MemoryImage::new(&topology());
        image.alloc(MemSpace::L1(0), "a", 200, 1).unwrap();
        let err = image.alloc(MemSpace::L1(0), "b", 100, 1).unwrap_err();
        assert!(matches!(err, ExecError::AllocationOverflow { .. }));
        // The sibling scratchpad is unaffected.
        assert!(image.alloc(MemSpace::L1(1), "b", 100, 1).is_ok());
    }

    #[test]
    fn reads_see_zeroed_memory_and_writes() {
        let mut image = MemoryImage::new(&topology());
        image.alloc(MemSpace::Ddr, "a", 8, 1).unwrap();
        assert_eq!(image.read(MemSpace::Ddr, 0, 8).unwrap(), &[0; 8]);
        image.write(MemSpace::Ddr, 2, &[7, 8]).unwrap();
        assert_eq!(image.read(MemSpace::Ddr, 0, 4).unwrap(), &[0, 0, 7, 8]);
        assert!(image.read(MemSpace::Ddr, 4, 8).is_err());
    }
}
