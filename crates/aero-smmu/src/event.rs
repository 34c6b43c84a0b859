//! Event records and the event queue producer.

use tracing::{trace, warn};

use crate::error::SmmuError;
use crate::memory::MemoryBus;
use crate::queue::{Queue, QueueError};
use crate::regs::EVENTQ_OVFLG;

pub const EVT_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub code: u8,
    pub sid: u32,
    /// Faulting input address, only for the address-carrying fault classes.
    pub addr: Option<u64>,
}

impl EventRecord {
    pub fn from_error(err: &SmmuError) -> Option<Self> {
        Some(Self {
            code: err.event_code()?,
            sid: err.stream_id()?,
            addr: err.fault_address(),
        })
    }

    pub fn encode(&self) -> [u8; EVT_SIZE] {
        let mut bytes = [0u8; EVT_SIZE];
        bytes[0] = self.code;
        bytes[4..8].copy_from_slice(&self.sid.to_le_bytes());
        if let Some(addr) = self.addr {
            bytes[16..24].copy_from_slice(&addr.to_le_bytes());
        }
        bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The record was published; `first` is set when the queue was empty before.
    Written { first: bool },
    /// The queue was full and the record was dropped.
    Overflow,
    /// The record could not be written to guest memory.
    Fault,
}

/// Event queue producer, including the OVFLG/OVACKFLG overflow handshake.
#[derive(Debug, Default)]
pub struct EventReporter {
    ovflg: bool,
    ovackflg: bool,
}

impl EventReporter {
    pub fn report(
        &mut self,
        queue: &mut Queue,
        mem: &mut dyn MemoryBus,
        record: &EventRecord,
    ) -> ReportOutcome {
        let first = queue.is_empty();
        match queue.write_next(mem, &record.encode()) {
            Ok(()) => {
                trace!(code = record.code, sid = record.sid, prod = queue.prod(), "event queued");
                ReportOutcome::Written { first }
            }
            Err(QueueError::Full) => {
                // A new overflow is only signalled once the previous one was acknowledged.
                if self.ovflg == self.ovackflg {
                    self.ovflg = !self.ovflg;
                }
                warn!(code = record.code, sid = record.sid, "event queue overflow");
                ReportOutcome::Overflow
            }
            Err(err) => {
                warn!(code = record.code, sid = record.sid, %err, "failed to write event record");
                ReportOutcome::Fault
            }
        }
    }

    /// EVENTQ_PROD bits outside the queue pointer.
    pub fn prod_flags(&self) -> u32 {
        if self.ovflg {
            EVENTQ_OVFLG
        } else {
            0
        }
    }

    /// EVENTQ_CONS bits outside the queue pointer.
    pub fn cons_flags(&self) -> u32 {
        if self.ovackflg {
            EVENTQ_OVFLG
        } else {
            0
        }
    }

    pub fn write_cons_flags(&mut self, cons: u32) {
        self.ovackflg = cons & EVENTQ_OVFLG != 0;
    }

    pub fn overflow_pending(&self) -> bool {
        self.ovflg != self.ovackflg
    }

    pub fn reset(&mut self) {
        self.ovflg = false;
        self.ovackflg = false;
    }
}
