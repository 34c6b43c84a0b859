#![allow(dead_code)]

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use aero_smmu::regs::*;
use aero_smmu::{
    Aarch64Walker, IrqLine, MemoryBus, MemoryError, PageTableWalker, SmmuConfig, SmmuV3,
    TranslationConfig, WalkFault, WalkOutput, WalkerSet, CD_SIZE, CMD_SIZE, EVT_SIZE, STE_SIZE,
};

pub const MEM_SIZE: usize = 0x10_0000;

pub const STRTAB_BASE: u64 = 0x1_0000;
pub const STRTAB_LOG2SIZE: u32 = 8;
pub const CMDQ_BASE: u64 = 0x2_0000;
pub const CMDQ_LOG2SIZE: u64 = 4;
pub const EVENTQ_BASE: u64 = 0x3_0000;
pub const EVENTQ_LOG2SIZE: u64 = 4;
pub const CD_BASE: u64 = 0x4_0000;
pub const PT_BASE: u64 = 0x5_0000;

// STE.Config encodings, already shifted into place.
pub const STE_V: u64 = 1;
pub const STE_CFG_BYPASS: u64 = 0b100 << 1;
pub const STE_CFG_S1: u64 = 0b101 << 1;
pub const STE_CFG_S2: u64 = 0b110 << 1;

pub const CD_V: u64 = 1 << 31;
pub const CD_AA64: u64 = 1 << 41;

pub const OP_PREFETCH_CONFIG: u8 = 0x01;
pub const OP_CFGI_STE: u8 = 0x03;
pub const OP_TLBI_NH_ALL: u8 = 0x10;
pub const OP_SYNC: u8 = 0x46;

/// Guest memory with optional fault-injected ranges.
pub struct TestMemory {
    pub data: Vec<u8>,
    faults: Vec<Range<u64>>,
    reads: AtomicUsize,
}

impl TestMemory {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
            faults: Vec::new(),
            reads: AtomicUsize::new(0),
        }
    }

    /// Accesses overlapping `range` fail with [`MemoryError::Abort`].
    pub fn inject_fault(&mut self, range: Range<u64>) {
        self.faults.push(range);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn check(&self, paddr: u64, len: usize) -> Result<Range<usize>, MemoryError> {
        let end = paddr
            .checked_add(len as u64)
            .ok_or(MemoryError::AddressOverflow)?;
        if self
            .faults
            .iter()
            .any(|f| paddr < f.end && f.start < end)
        {
            return Err(MemoryError::Abort { addr: paddr });
        }
        if end > self.data.len() as u64 {
            return Err(MemoryError::OutOfBounds { addr: paddr, len });
        }
        Ok(paddr as usize..end as usize)
    }

    pub fn write_words(&mut self, addr: u64, words: &[u64]) {
        for (i, w) in words.iter().enumerate() {
            self.write_u64(addr + i as u64 * 8, *w).unwrap();
        }
    }
}

impl MemoryBus for TestMemory {
    fn read_physical(&self, paddr: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let range = self.check(paddr, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) -> Result<(), MemoryError> {
        let range = self.check(paddr, buf.len())?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct TestIrqLine {
    level: Arc<AtomicBool>,
}

impl TestIrqLine {
    pub fn level(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}

impl IrqLine for TestIrqLine {
    fn set_level(&self, level: bool) {
        self.level.store(level, Ordering::SeqCst);
    }
}

/// Walker that records every config it receives and delegates to the reference walker.
#[derive(Clone, Default)]
pub struct RecordingWalker {
    pub calls: Arc<Mutex<Vec<TranslationConfig>>>,
}

impl RecordingWalker {
    pub fn calls(&self) -> Vec<TranslationConfig> {
        self.calls
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }
}

impl PageTableWalker for RecordingWalker {
    fn walk(
        &self,
        cfg: &TranslationConfig,
        mem: &dyn MemoryBus,
        is_write: bool,
    ) -> Result<WalkOutput, WalkFault> {
        self.calls
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(*cfg);
        Aarch64Walker.walk(cfg, mem, is_write)
    }
}

pub fn ste_addr(sid: u32) -> u64 {
    STRTAB_BASE + u64::from(sid) * STE_SIZE as u64
}

pub fn write_ste(mem: &mut TestMemory, sid: u32, words: [u64; 4]) {
    mem.write_words(ste_addr(sid), &words);
}

/// Stage 1 STE pointing at the CD in slot `cd_index` of the CD area.
pub fn stage1_ste(cd_index: u64) -> [u64; 4] {
    [STE_V | STE_CFG_S1 | cd_addr(cd_index), 0, 0, 0]
}

pub fn cd_addr(index: u64) -> u64 {
    CD_BASE + index * CD_SIZE as u64
}

/// AArch64 CD using TTB0 with a 4KB granule and 39-bit input range, 40-bit IPS.
pub fn write_cd(mem: &mut TestMemory, index: u64, t0sz: u64, ttb0: u64) {
    let dw0 = t0sz | CD_V | CD_AA64 | (2 << 32);
    mem.write_words(cd_addr(index), &[dw0, ttb0, 0, 0]);
}

pub const AF: u64 = 1 << 10;
/// Stage 1 AP[2]: read-only.
pub const S1_RO: u64 = 1 << 7;
/// Stage 2 S2AP read + write.
pub const S2_RW: u64 = (1 << 6) | (1 << 7);

/// Maps one 4KB page in a three-level table rooted at `PT_BASE` (T0SZ = 25).
///
/// Uses fixed level 2 and level 3 tables, so all mappings must share `ia[38:21]`. `attrs` is
/// ORed into the page descriptor next to the valid, page and access flag bits.
pub fn map_page(mem: &mut TestMemory, ia: u64, pa: u64, attrs: u64) {
    let l1 = PT_BASE;
    let l2 = PT_BASE + 0x1000;
    let l3 = PT_BASE + 0x2000;
    let table = 0b11;
    let leaf = (pa & !0xfff) | 0b11 | AF | attrs;
    mem.write_u64(l1 + ((ia >> 30) & 0x1ff) * 8, l2 | table).unwrap();
    mem.write_u64(l2 + ((ia >> 21) & 0x1ff) * 8, l3 | table).unwrap();
    mem.write_u64(l3 + ((ia >> 12) & 0x1ff) * 8, leaf).unwrap();
}

pub fn command(opcode: u8, dw0: u64) -> [u8; CMD_SIZE] {
    let mut bytes = [0u8; CMD_SIZE];
    bytes[..8].copy_from_slice(&(u64::from(opcode) | dw0).to_le_bytes());
    bytes
}

pub fn write_command(mem: &mut TestMemory, index: u64, cmd: [u8; CMD_SIZE]) {
    mem.write_physical(CMDQ_BASE + index * CMD_SIZE as u64, &cmd)
        .unwrap();
}

/// Reads event record `index` as `(code, sid, addr)`.
pub fn read_event(mem: &TestMemory, index: u64) -> (u8, u32, u64) {
    let mut rec = [0u8; EVT_SIZE];
    mem.read_physical(EVENTQ_BASE + index * EVT_SIZE as u64, &mut rec)
        .unwrap();
    let sid = u32::from_le_bytes(rec[4..8].try_into().unwrap());
    let addr = u64::from_le_bytes(rec[16..24].try_into().unwrap());
    (rec[0], sid, addr)
}

pub fn new_smmu(config: SmmuConfig) -> SmmuV3 {
    SmmuV3::new(&config, WalkerSet::default()).unwrap()
}

pub fn new_smmu_with_walker(walker: RecordingWalker) -> SmmuV3 {
    let walkers = WalkerSet::new(Box::new(walker.clone()), Box::new(walker));
    SmmuV3::new(&SmmuConfig::default(), walkers).unwrap()
}

/// Programs a linear stream table and the command/event queues, enables every interrupt, and
/// finally writes CR0 with `cr0`.
pub fn program(smmu: &mut SmmuV3, mem: &mut TestMemory, cr0: Cr0) {
    smmu.mmio_write(REG_STRTAB_BASE, 8, STRTAB_BASE, mem);
    smmu.mmio_write(REG_STRTAB_BASE_CFG, 4, u64::from(STRTAB_LOG2SIZE), mem);
    smmu.mmio_write(REG_CMDQ_BASE, 8, CMDQ_BASE | CMDQ_LOG2SIZE, mem);
    smmu.mmio_write(REG_EVENTQ_BASE, 8, EVENTQ_BASE | EVENTQ_LOG2SIZE, mem);
    smmu.mmio_write(REG_IRQ_CTRL, 4, u64::from(IrqCtrl::all().bits()), mem);
    smmu.mmio_write(REG_CR0, 4, u64::from(cr0.bits()), mem);
}

pub fn enabled() -> Cr0 {
    Cr0::SMMUEN | Cr0::EVENTQEN | Cr0::CMDQEN
}

pub fn setup() -> (SmmuV3, TestMemory) {
    let mut mem = TestMemory::new(MEM_SIZE);
    let mut smmu = new_smmu(SmmuConfig::default());
    program(&mut smmu, &mut mem, enabled());
    (smmu, mem)
}

pub fn mmio_read32(smmu: &SmmuV3, offset: u64) -> u32 {
    smmu.mmio_read(offset, 4) as u32
}
