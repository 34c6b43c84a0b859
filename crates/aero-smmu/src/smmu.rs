//! SMMUv3 device instance.
//!
//! [`SmmuV3`] owns the register bank, the three queues, the command consumer, the event
//! producer and the GERROR latch of one unit. Register accesses arrive through
//! [`SmmuV3::mmio_read`] / [`SmmuV3::mmio_write`]; DMA transactions go through
//! [`SmmuV3::translate`]. Everything runs to completion inside the call that triggered it.

use tracing::{debug, trace};

use crate::cd::fetch_cd;
use crate::command::{CommandConsumer, ConsumerState, CMD_SIZE};
use crate::config::{Capabilities, ConfigError, SmmuConfig};
use crate::consistency::{check_cd, check_ste};
use crate::error::SmmuError;
use crate::event::{EventRecord, EventReporter, ReportOutcome, EVT_SIZE};
use crate::irq::{InterruptCoordinator, IrqLine, IrqSource};
use crate::memory::MemoryBus;
use crate::queue::Queue;
use crate::regs::*;
use crate::ste::StreamTableConfig;
use crate::transcfg::{build_stage1, build_stage2};
use crate::walker::{Permission, WalkerSet};

pub const PRIQ_ENTRY_SIZE: usize = 16;

const REG_WORDS: usize = (REG_PAGE_SIZE / 4) as usize;

/// Granule reported for untranslated (bypass) mappings.
const BYPASS_PAGE_MASK: u64 = 0xfff;

/// Result of translating one input address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IommuTlbEntry {
    /// Page-aligned input address.
    pub iova: u64,
    /// Page-aligned output address.
    pub translated_addr: u64,
    /// `page_size - 1`.
    pub addr_mask: u64,
    pub perm: Permission,
}

impl IommuTlbEntry {
    fn identity(addr: u64, perm: Permission) -> Self {
        Self {
            iova: addr & !BYPASS_PAGE_MASK,
            translated_addr: addr & !BYPASS_PAGE_MASK,
            addr_mask: BYPASS_PAGE_MASK,
            perm,
        }
    }

    /// Entry returned for a failed transaction: no output address and no permission.
    pub fn fault(addr: u64) -> Self {
        Self {
            iova: addr,
            translated_addr: 0,
            addr_mask: 0,
            perm: Permission::empty(),
        }
    }

    /// Output address for `addr`, which must lie in this entry's page.
    pub fn output_address(&self, addr: u64) -> u64 {
        self.translated_addr | (addr & self.addr_mask)
    }
}

/// Maps an MMIO offset to its backed page 0 register, if any.
fn backed_offset(offset: u64) -> Option<u64> {
    if offset >= SMMU_MMIO_SIZE {
        return None;
    }
    let offset = fixup_page1_alias(offset);
    (offset < REG_PAGE_SIZE && offset % 4 == 0).then_some(offset)
}

pub struct SmmuV3 {
    caps: Capabilities,
    walkers: WalkerSet,
    regs: [u32; REG_WORDS],
    cmdq: Queue,
    cmdq_err: u8,
    eventq: Queue,
    priq: Queue,
    consumer: CommandConsumer,
    events: EventReporter,
    irq: InterruptCoordinator,
}

impl SmmuV3 {
    pub fn new(config: &SmmuConfig, walkers: WalkerSet) -> Result<Self, ConfigError> {
        let caps = config.capabilities()?;
        let mut smmu = Self {
            cmdq: Queue::new(CMD_SIZE, caps.cmdq_max_log2size()),
            eventq: Queue::new(EVT_SIZE, caps.eventq_max_log2size()),
            priq: Queue::new(PRIQ_ENTRY_SIZE, caps.priq_max_log2size()),
            caps,
            walkers,
            regs: [0; REG_WORDS],
            cmdq_err: 0,
            consumer: CommandConsumer::default(),
            events: EventReporter::default(),
            irq: InterruptCoordinator::default(),
        };
        smmu.reset();
        Ok(smmu)
    }

    /// Returns the unit to its power-on state.
    pub fn reset(&mut self) {
        self.regs = [0; REG_WORDS];
        self.set_reg(REG_IDR0, self.caps.idr0());
        self.set_reg(REG_IDR1, self.caps.idr1());
        self.set_reg(REG_IDR5, self.caps.idr5());
        self.cmdq.reset();
        self.cmdq_err = 0;
        self.eventq.reset();
        self.priq.reset();
        self.consumer.reset();
        self.events.reset();
        self.irq.reset();
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn connect_irq(&mut self, source: IrqSource, line: Box<dyn IrqLine>) {
        self.irq.connect(source, line);
    }

    pub fn irq_level(&self, source: IrqSource) -> bool {
        self.irq.level(source)
    }

    pub fn command_state(&self) -> ConsumerState {
        self.consumer.state()
    }

    pub fn is_enabled(&self) -> bool {
        self.cr0().contains(Cr0::SMMUEN)
    }

    fn reg(&self, offset: u64) -> u32 {
        self.regs[(offset / 4) as usize]
    }

    fn set_reg(&mut self, offset: u64, val: u32) {
        self.regs[(offset / 4) as usize] = val;
    }

    fn reg64(&self, offset: u64) -> u64 {
        u64::from(self.reg(offset)) | (u64::from(self.reg(offset + 4)) << 32)
    }

    fn cr0(&self) -> Cr0 {
        Cr0::from_bits_truncate(self.reg(REG_CR0))
    }

    fn irq_ctrl(&self) -> IrqCtrl {
        IrqCtrl::from_bits_truncate(self.reg(REG_IRQ_CTRL))
    }

    fn read_reg32(&self, offset: u64) -> u32 {
        match offset {
            REG_GERROR => self.irq.gerror(),
            REG_GERRORN => self.irq.gerrorn(),
            REG_CMDQ_PROD => self.cmdq.prod(),
            REG_CMDQ_CONS => {
                self.cmdq.cons() | (u32::from(self.cmdq_err) << CMDQ_CONS_ERR_SHIFT)
            }
            REG_EVENTQ_PROD => self.eventq.prod() | self.events.prod_flags(),
            REG_EVENTQ_CONS => self.eventq.cons() | self.events.cons_flags(),
            REG_PRIQ_PROD => self.priq.prod(),
            REG_PRIQ_CONS => self.priq.cons(),
            REG_ID_BLOCK_START..=REG_ID_BLOCK_END => 0,
            _ => self.reg(offset),
        }
    }

    pub fn mmio_read(&self, offset: u64, size: usize) -> u64 {
        let Some(offset) = backed_offset(offset) else {
            return 0;
        };
        match size {
            4 => u64::from(self.read_reg32(offset)),
            8 if offset + 4 < REG_PAGE_SIZE => {
                u64::from(self.read_reg32(offset))
                    | (u64::from(self.read_reg32(offset + 4)) << 32)
            }
            _ => 0,
        }
    }

    pub fn mmio_write(&mut self, offset: u64, size: usize, value: u64, mem: &mut dyn MemoryBus) {
        let Some(offset) = backed_offset(offset) else {
            trace!(offset, size, value, "ignoring write outside the register page");
            return;
        };
        match size {
            4 => self.write_reg32(offset, value as u32, mem),
            8 if offset + 4 < REG_PAGE_SIZE => {
                self.write_reg32(offset, value as u32, mem);
                self.write_reg32(offset + 4, (value >> 32) as u32, mem);
            }
            _ => trace!(offset, size, "ignoring unsupported access size"),
        }
    }

    fn write_reg32(&mut self, offset: u64, val: u32, mem: &mut dyn MemoryBus) {
        if is_read_only(offset) {
            trace!(offset, val, "ignoring write to read-only register");
            return;
        }
        trace!(offset, val, "register write");

        match offset {
            REG_CR0 => {
                self.set_reg(REG_CR0, val);
                self.set_reg(REG_CR0ACK, val);
                self.drain_command_queue(mem);
            }
            REG_IRQ_CTRL => {
                self.set_reg(REG_IRQ_CTRL, val);
                self.set_reg(REG_IRQ_CTRLACK, val);
            }
            REG_GERRORN => {
                self.irq.write_gerrorn(val);
                if self.consumer.is_halted() && !self.irq.is_pending(IrqSource::CommandSync) {
                    debug!("command queue error acknowledged");
                    self.consumer.acknowledge();
                    self.drain_command_queue(mem);
                }
            }
            REG_CMDQ_BASE | REG_CMDQ_BASE_HI => {
                self.set_reg(offset, val);
                self.cmdq.configure(self.reg64(REG_CMDQ_BASE));
            }
            REG_CMDQ_PROD => {
                self.cmdq.set_prod(val);
                self.drain_command_queue(mem);
            }
            REG_CMDQ_CONS => {
                self.cmdq.set_cons(val);
                self.drain_command_queue(mem);
            }
            REG_EVENTQ_BASE | REG_EVENTQ_BASE_HI => {
                self.set_reg(offset, val);
                self.eventq.configure(self.reg64(REG_EVENTQ_BASE));
            }
            REG_EVENTQ_PROD => self.eventq.set_prod(val),
            REG_EVENTQ_CONS => {
                self.eventq.set_cons(val);
                self.events.write_cons_flags(val);
                if self.eventq.is_empty() {
                    self.irq.lower(IrqSource::EventQueue);
                }
            }
            REG_PRIQ_BASE | REG_PRIQ_BASE_HI => {
                self.set_reg(offset, val);
                self.priq.configure(self.reg64(REG_PRIQ_BASE));
            }
            REG_PRIQ_PROD => self.priq.set_prod(val),
            REG_PRIQ_CONS => {
                self.priq.set_cons(val);
                if self.priq.is_empty() {
                    self.irq.lower(IrqSource::PriorityQueue);
                }
            }
            _ => self.set_reg(offset, val),
        }
    }

    /// Runs the command consumer if the command queue is enabled.
    pub fn process_command_queue(&mut self, mem: &dyn MemoryBus) {
        self.drain_command_queue(mem);
    }

    fn drain_command_queue(&mut self, mem: &dyn MemoryBus) {
        if !self.cr0().contains(Cr0::CMDQEN) || self.consumer.is_halted() {
            return;
        }
        let irq_ctrl = self.irq_ctrl();
        let irq = &mut self.irq;
        let processed = self.consumer.drain(&mut self.cmdq, mem, |signal| {
            if signal.irq {
                irq.raise(IrqSource::CommandSync, irq_ctrl);
            }
            if signal.sev {
                debug!("CMD_SYNC requested SEV");
            }
        });
        trace!(processed, cons = self.cmdq.cons(), "command queue drained");

        if let ConsumerState::Halted(err) = self.consumer.state() {
            self.cmdq_err = err.code() & CMDQ_CONS_ERR_MASK as u8;
            self.irq.raise(IrqSource::CommandSync, irq_ctrl);
        }
    }

    /// Translates one DMA transaction.
    ///
    /// A disabled unit and bypass streams map the address onto itself. Every failure is reported
    /// through the event queue before it is returned.
    pub fn translate(
        &mut self,
        mem: &mut dyn MemoryBus,
        sid: u32,
        addr: u64,
        is_write: bool,
    ) -> Result<IommuTlbEntry, SmmuError> {
        if !self.is_enabled() {
            trace!(sid, addr, "SMMU disabled, bypassing");
            return Ok(IommuTlbEntry::identity(addr, Permission::for_access(is_write)));
        }

        let res = self.resolve(&*mem, sid, addr, is_write);
        if let Err(err) = &res {
            debug!(sid, addr, is_write, %err, "translation failed");
            self.report_event(mem, err);
        }
        res
    }

    /// Like [`SmmuV3::translate`], but folds failures into an entry with no permission.
    pub fn translate_entry(
        &mut self,
        mem: &mut dyn MemoryBus,
        sid: u32,
        addr: u64,
        is_write: bool,
    ) -> IommuTlbEntry {
        self.translate(mem, sid, addr, is_write)
            .unwrap_or_else(|_| IommuTlbEntry::fault(addr))
    }

    fn resolve(
        &self,
        mem: &dyn MemoryBus,
        sid: u32,
        addr: u64,
        is_write: bool,
    ) -> Result<IommuTlbEntry, SmmuError> {
        let strtab = StreamTableConfig::from_regs(
            self.reg64(REG_STRTAB_BASE),
            self.reg(REG_STRTAB_BASE_CFG),
            &self.caps,
        );
        let ste = strtab.fetch_ste(mem, &self.caps, sid)?;
        if ste.is_bypass() {
            trace!(sid, addr, "bypass STE");
            return Ok(IommuTlbEntry::identity(addr, Permission::for_access(is_write)));
        }
        check_ste(&ste, &self.caps, sid)?;

        let cfg = if ste.config().stage1() {
            let cd = fetch_cd(mem, &ste, sid)?;
            check_cd(&cd, &self.caps, sid)?;
            build_stage1(&cd, &self.caps, sid, addr)?
        } else {
            build_stage2(&ste, &self.caps, sid, addr)
        };
        if !cfg.input_in_range() {
            return Err(SmmuError::TranslationForbidden { sid, addr });
        }

        let out = self
            .walkers
            .select(cfg.aa64)
            .walk(&cfg, mem, is_write)
            .map_err(|fault| SmmuError::from_walk(sid, addr, fault))?;
        let addr_mask = out.page_size - 1;
        trace!(sid, addr, output = out.output, page_size = out.page_size, "translated");
        Ok(IommuTlbEntry {
            iova: addr & !addr_mask,
            translated_addr: out.output & !addr_mask,
            addr_mask,
            perm: Permission::for_access(is_write),
        })
    }

    fn report_event(&mut self, mem: &mut dyn MemoryBus, err: &SmmuError) {
        let Some(record) = EventRecord::from_error(err) else {
            return;
        };
        if !self.cr0().contains(Cr0::EVENTQEN) {
            trace!(code = record.code, sid = record.sid, "event queue disabled, dropping event");
            return;
        }
        if let ReportOutcome::Written { first: true } =
            self.events.report(&mut self.eventq, mem, &record)
        {
            let irq_ctrl = self.irq_ctrl();
            self.irq.raise(IrqSource::EventQueue, irq_ctrl);
        }
    }
}
