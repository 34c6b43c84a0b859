use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::SmmuError;
use crate::irq::IrqSource;
use crate::memory::MemoryBus;
use crate::smmu::{IommuTlbEntry, SmmuV3};

/// Cloneable handle to one SMMU instance.
///
/// Each translation, register access and queue drain holds the lock for its whole duration, so
/// concurrent DMA from several devices is serialized against register traffic.
#[derive(Clone)]
pub struct SharedSmmu {
    inner: Arc<Mutex<SmmuV3>>,
}

impl SharedSmmu {
    pub fn new(smmu: SmmuV3) -> Self {
        Self {
            inner: Arc::new(Mutex::new(smmu)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SmmuV3> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn translate(
        &self,
        mem: &mut dyn MemoryBus,
        sid: u32,
        addr: u64,
        is_write: bool,
    ) -> Result<IommuTlbEntry, SmmuError> {
        self.lock().translate(mem, sid, addr, is_write)
    }

    pub fn translate_entry(
        &self,
        mem: &mut dyn MemoryBus,
        sid: u32,
        addr: u64,
        is_write: bool,
    ) -> IommuTlbEntry {
        self.lock().translate_entry(mem, sid, addr, is_write)
    }

    pub fn mmio_read(&self, offset: u64, size: usize) -> u64 {
        self.lock().mmio_read(offset, size)
    }

    pub fn mmio_write(&self, offset: u64, size: usize, value: u64, mem: &mut dyn MemoryBus) {
        self.lock().mmio_write(offset, size, value, mem);
    }

    pub fn irq_level(&self, source: IrqSource) -> bool {
        self.lock().irq_level(source)
    }

    /// Runs `f` with exclusive access to the SMMU.
    pub fn with<R>(&self, f: impl FnOnce(&mut SmmuV3) -> R) -> R {
        f(&mut self.lock())
    }
}
