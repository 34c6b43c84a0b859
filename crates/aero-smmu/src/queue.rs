//! Circular queue shared by the command, event and PRI queues.
//!
//! A queue lives in guest memory at the address programmed into its `*_BASE` register and holds
//! `2^log2size` fixed-size entries. The producer and consumer registers carry an index in bits
//! `[log2size-1:0]` and a wrap bit at bit `log2size`; the queue is empty when both fields match
//! and full when the indices match but the wrap bits differ.
//!
//! Register flag bits above the wrap bit (CMDQ_CONS.ERR, EVENTQ_PROD.OVFLG, ...) are not part of
//! the queue state and are tracked by the owning component.

use thiserror::Error;

use crate::memory::{entry_addr, MemoryBus, MemoryError};
use crate::regs::{Q_BASE_ADDR_MASK, Q_BASE_LOG2SIZE_MASK};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is empty")]
    Empty,

    #[error("queue is full")]
    Full,

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

#[derive(Debug, Clone)]
pub struct Queue {
    base: u64,
    log2size: u8,
    max_log2size: u8,
    entry_size: usize,
    prod: u32,
    cons: u32,
}

impl Queue {
    pub fn new(entry_size: usize, max_log2size: u8) -> Self {
        Self {
            base: 0,
            log2size: 0,
            max_log2size,
            entry_size,
            prod: 0,
            cons: 0,
        }
    }

    /// Reprograms the queue from a `*_BASE` register value.
    ///
    /// LOG2SIZE is clamped to the advertised maximum. Producer and consumer values are re-masked to
    /// the new geometry.
    pub fn configure(&mut self, base_reg: u64) {
        self.base = base_reg & Q_BASE_ADDR_MASK;
        self.log2size = ((base_reg & Q_BASE_LOG2SIZE_MASK) as u8).min(self.max_log2size);
        self.prod &= self.wrap_mask();
        self.cons &= self.wrap_mask();
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn log2size(&self) -> u8 {
        self.log2size
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn capacity(&self) -> u32 {
        1 << self.log2size
    }

    fn index_mask(&self) -> u32 {
        self.capacity() - 1
    }

    fn wrap_mask(&self) -> u32 {
        (self.capacity() << 1) - 1
    }

    /// Producer index and wrap bit.
    pub fn prod(&self) -> u32 {
        self.prod
    }

    /// Consumer index and wrap bit.
    pub fn cons(&self) -> u32 {
        self.cons
    }

    pub fn set_prod(&mut self, val: u32) {
        self.prod = val & self.wrap_mask();
    }

    pub fn set_cons(&mut self, val: u32) {
        self.cons = val & self.wrap_mask();
    }

    pub fn is_empty(&self) -> bool {
        self.prod == self.cons
    }

    pub fn is_full(&self) -> bool {
        (self.prod ^ self.cons) == self.capacity()
    }

    /// Number of entries between the consumer and the producer.
    pub fn len(&self) -> u32 {
        self.prod.wrapping_sub(self.cons) & self.wrap_mask()
    }

    fn slot_addr(&self, ptr: u32) -> Result<u64, MemoryError> {
        entry_addr(
            self.base,
            u64::from(ptr & self.index_mask()),
            self.entry_size,
        )
    }

    fn incremented(&self, ptr: u32) -> u32 {
        ptr.wrapping_add(1) & self.wrap_mask()
    }

    /// Reads the entry at the consumer index without consuming it.
    pub fn peek(&self, mem: &dyn MemoryBus, buf: &mut [u8]) -> Result<(), QueueError> {
        debug_assert_eq!(buf.len(), self.entry_size);
        if self.is_empty() {
            return Err(QueueError::Empty);
        }
        let addr = self.slot_addr(self.cons)?;
        mem.read_physical(addr, buf)?;
        Ok(())
    }

    pub fn advance_consumer(&mut self) {
        if !self.is_empty() {
            self.cons = self.incremented(self.cons);
        }
    }

    /// Reads the entry at the consumer index and consumes it.
    ///
    /// The consumer only advances when the read succeeds.
    pub fn read_next(&mut self, mem: &dyn MemoryBus, buf: &mut [u8]) -> Result<(), QueueError> {
        self.peek(mem, buf)?;
        self.advance_consumer();
        Ok(())
    }

    /// Writes `entry` at the producer index and publishes it.
    pub fn write_next(&mut self, mem: &mut dyn MemoryBus, entry: &[u8]) -> Result<(), QueueError> {
        debug_assert_eq!(entry.len(), self.entry_size);
        if self.is_full() {
            return Err(QueueError::Full);
        }
        let addr = self.slot_addr(self.prod)?;
        mem.write_physical(addr, entry)?;
        self.prod = self.incremented(self.prod);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.base = 0;
        self.log2size = 0;
        self.prod = 0;
        self.cons = 0;
    }
}
