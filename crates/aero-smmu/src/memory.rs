//! Guest physical memory access used by the SMMU for table walks and queue traffic.
//!
//! Every structure the SMMU consumes (stream table entries, context descriptors, queue
//! entries, page table descriptors) lives in guest memory and is guest-controlled. Accesses are
//! therefore fallible and every address is computed with checked arithmetic before the bus is
//! touched.

use thiserror::Error;

/// Errors returned by a [`MemoryBus`] when an access cannot be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("guest memory access out of bounds: addr={addr:#x} len={len}")]
    OutOfBounds { addr: u64, len: usize },

    #[error("guest memory access aborted: addr={addr:#x}")]
    Abort { addr: u64 },

    #[error("integer overflow while computing a guest address")]
    AddressOverflow,
}

/// Guest physical memory access.
///
/// Reads take `&self`; the SMMU never relies on read side effects.
pub trait MemoryBus {
    fn read_physical(&self, paddr: u64, buf: &mut [u8]) -> Result<(), MemoryError>;
    fn write_physical(&mut self, paddr: u64, buf: &[u8]) -> Result<(), MemoryError>;

    fn read_u32(&self, paddr: u64) -> Result<u32, MemoryError> {
        let mut buf = [0u8; 4];
        self.read_physical(paddr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&self, paddr: u64) -> Result<u64, MemoryError> {
        let mut buf = [0u8; 8];
        self.read_physical(paddr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u32(&mut self, paddr: u64, val: u32) -> Result<(), MemoryError> {
        self.write_physical(paddr, &val.to_le_bytes())
    }

    fn write_u64(&mut self, paddr: u64, val: u64) -> Result<(), MemoryError> {
        self.write_physical(paddr, &val.to_le_bytes())
    }
}

/// Address of entry `index` in a table of `entry_size`-byte entries starting at `base`.
pub(crate) fn entry_addr(base: u64, index: u64, entry_size: usize) -> Result<u64, MemoryError> {
    let off = index
        .checked_mul(entry_size as u64)
        .ok_or(MemoryError::AddressOverflow)?;
    let addr = base.checked_add(off).ok_or(MemoryError::AddressOverflow)?;
    // The last byte of the entry must be addressable too.
    addr.checked_add(entry_size as u64 - 1)
        .ok_or(MemoryError::AddressOverflow)?;
    Ok(addr)
}

/// Reads a little-endian structure made of `N` 64-bit words.
pub(crate) fn read_dwords<const N: usize>(
    mem: &dyn MemoryBus,
    addr: u64,
) -> Result<[u64; N], MemoryError> {
    let mut words = [0u64; N];
    let mut buf = [0u8; 8];
    for (i, word) in words.iter_mut().enumerate() {
        let paddr = entry_addr(addr, i as u64, 8)?;
        mem.read_physical(paddr, &mut buf)?;
        *word = u64::from_le_bytes(buf);
    }
    Ok(words)
}

/// Extracts `len` bits starting at `start` from `val`.
#[inline]
pub(crate) const fn extract64(val: u64, start: u32, len: u32) -> u64 {
    if len >= 64 {
        val >> start
    } else {
        (val >> start) & ((1u64 << len) - 1)
    }
}

/// Flat guest memory for unit tests.
#[cfg(test)]
pub(crate) struct TestMem {
    pub(crate) data: Vec<u8>,
}

#[cfg(test)]
impl TestMem {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    fn range(&self, paddr: u64, len: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        let oob = MemoryError::OutOfBounds { addr: paddr, len };
        let start = usize::try_from(paddr).map_err(|_| oob)?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(oob)?;
        Ok(start..end)
    }
}

#[cfg(test)]
impl MemoryBus for TestMem {
    fn read_physical(&self, paddr: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        let range = self.range(paddr, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) -> Result<(), MemoryError> {
        let range = self.range(paddr, buf.len())?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }
}
