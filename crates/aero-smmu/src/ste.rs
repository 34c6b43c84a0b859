//! Stream table entries and the stream table walker.

use tracing::trace;

use crate::config::Capabilities;
use crate::error::SmmuError;
use crate::memory::{entry_addr, extract64, read_dwords, MemoryBus};
use crate::regs::{
    STRTAB_BASE_ADDR_MASK, STRTAB_CFG_FMT_2LEVEL, STRTAB_CFG_FMT_MASK, STRTAB_CFG_FMT_SHIFT,
    STRTAB_CFG_LOG2SIZE_MASK, STRTAB_CFG_SPLIT_MASK, STRTAB_CFG_SPLIT_SHIFT,
};

pub const STE_SIZE: usize = 64;
pub const L1_DESC_SIZE: usize = 8;

/// STE.Config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamConfig {
    Abort,
    Bypass,
    Stage1,
    Stage2,
    Nested,
    Reserved(u8),
}

impl StreamConfig {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0b000 => StreamConfig::Abort,
            0b100 => StreamConfig::Bypass,
            0b101 => StreamConfig::Stage1,
            0b110 => StreamConfig::Stage2,
            0b111 => StreamConfig::Nested,
            other => StreamConfig::Reserved(other),
        }
    }

    pub fn stage1(self) -> bool {
        matches!(self, StreamConfig::Stage1 | StreamConfig::Nested)
    }

    pub fn stage2(self) -> bool {
        matches!(self, StreamConfig::Stage2 | StreamConfig::Nested)
    }
}

/// A stream table entry as read from guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ste {
    words: [u64; 8],
}

impl Ste {
    pub fn from_words(words: [u64; 8]) -> Self {
        Self { words }
    }

    pub fn words(&self) -> &[u64; 8] {
        &self.words
    }

    fn field(&self, word: usize, start: u32, len: u32) -> u64 {
        extract64(self.words[word], start, len)
    }

    pub fn valid(&self) -> bool {
        self.field(0, 0, 1) != 0
    }

    pub fn config(&self) -> StreamConfig {
        StreamConfig::from_bits(self.field(0, 1, 3) as u8)
    }

    pub fn is_bypass(&self) -> bool {
        self.valid() && self.config() == StreamConfig::Bypass
    }

    pub fn s1fmt(&self) -> u8 {
        self.field(0, 4, 2) as u8
    }

    /// S1ContextPtr (bits [51:6]).
    pub fn s1_context_ptr(&self) -> u64 {
        self.words[0] & 0x000f_ffff_ffff_ffc0
    }

    pub fn s1cdmax(&self) -> u8 {
        self.field(0, 59, 5) as u8
    }

    pub fn eats(&self) -> u8 {
        self.field(1, 28, 2) as u8
    }

    pub fn strw(&self) -> u8 {
        self.field(1, 30, 2) as u8
    }

    pub fn s2vmid(&self) -> u16 {
        self.field(2, 0, 16) as u16
    }

    pub fn s2t0sz(&self) -> u8 {
        self.field(2, 32, 6) as u8
    }

    pub fn s2sl0(&self) -> u8 {
        self.field(2, 38, 2) as u8
    }

    pub fn s2tg(&self) -> u8 {
        self.field(2, 46, 2) as u8
    }

    pub fn s2ps(&self) -> u8 {
        self.field(2, 48, 3) as u8
    }

    pub fn s2aa64(&self) -> bool {
        self.field(2, 51, 1) != 0
    }

    pub fn s2endi(&self) -> bool {
        self.field(2, 52, 1) != 0
    }

    pub fn s2affd(&self) -> bool {
        self.field(2, 53, 1) != 0
    }

    pub fn s2hd(&self) -> bool {
        self.field(2, 55, 1) != 0
    }

    pub fn s2ha(&self) -> bool {
        self.field(2, 56, 1) != 0
    }

    pub fn s2s(&self) -> bool {
        self.field(2, 57, 1) != 0
    }

    /// S2TTB (bits [51:4]).
    pub fn s2ttb(&self) -> u64 {
        self.words[3] & 0x000f_ffff_ffff_fff0
    }
}

/// Level 1 stream table descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L1Descriptor(pub u64);

impl L1Descriptor {
    pub fn span(self) -> u8 {
        extract64(self.0, 0, 5) as u8
    }

    pub fn l2_ptr(self) -> u64 {
        self.0 & 0x000f_ffff_ffff_ffc0
    }
}

/// Stream table geometry decoded from STRTAB_BASE / STRTAB_BASE_CFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamTableConfig {
    pub base: u64,
    pub log2size: u8,
    pub split: u8,
    pub two_level: bool,
}

impl StreamTableConfig {
    pub fn from_regs(base_reg: u64, cfg_reg: u32, caps: &Capabilities) -> Self {
        let fmt = (cfg_reg >> STRTAB_CFG_FMT_SHIFT) & STRTAB_CFG_FMT_MASK;
        Self {
            base: base_reg & STRTAB_BASE_ADDR_MASK,
            log2size: (cfg_reg & STRTAB_CFG_LOG2SIZE_MASK) as u8,
            split: ((cfg_reg >> STRTAB_CFG_SPLIT_SHIFT) & STRTAB_CFG_SPLIT_MASK) as u8,
            two_level: fmt == STRTAB_CFG_FMT_2LEVEL && caps.two_level_stream_table(),
        }
    }

    fn sid_in_range(&self, sid: u32, caps: &Capabilities) -> bool {
        let sid = u64::from(sid);
        sid >> caps.sid_bits() == 0 && sid >> self.log2size == 0
    }

    /// Guest address of the STE for `sid`.
    fn ste_addr(&self, mem: &dyn MemoryBus, sid: u32) -> Result<u64, SmmuError> {
        if !self.two_level {
            return entry_addr(self.base, u64::from(sid), STE_SIZE)
                .map_err(|source| SmmuError::UnableToFetch { sid, source });
        }

        let split = u32::from(self.split);
        let l1_index = u64::from(sid).checked_shr(split).unwrap_or(0);
        let l2_index = u64::from(sid) & ((1u64 << split) - 1);

        let desc = entry_addr(self.base, l1_index, L1_DESC_SIZE)
            .and_then(|addr| mem.read_u64(addr))
            .map(L1Descriptor)
            .map_err(|source| SmmuError::UnableToFetch { sid, source })?;

        let span = desc.span();
        if span == 0 {
            trace!(sid, l1_index, "L1 stream table descriptor has no valid entries");
            return Err(SmmuError::BadStreamId { sid });
        }
        let max_l2 = (1u64 << span) - 1;
        if l2_index > max_l2 {
            trace!(sid, l2_index, span, "level 2 index exceeds descriptor span");
            return Err(SmmuError::BadStreamTableEntry { sid });
        }

        entry_addr(desc.l2_ptr(), l2_index, STE_SIZE)
            .map_err(|source| SmmuError::UnableToFetch { sid, source })
    }

    /// Resolves `sid` to its stream table entry.
    pub fn fetch_ste(
        &self,
        mem: &dyn MemoryBus,
        caps: &Capabilities,
        sid: u32,
    ) -> Result<Ste, SmmuError> {
        if !self.sid_in_range(sid, caps) {
            return Err(SmmuError::BadStreamId { sid });
        }
        let addr = self.ste_addr(mem, sid)?;
        let words = read_dwords::<8>(mem, addr)
            .map_err(|source| SmmuError::UnableToFetch { sid, source })?;
        trace!(sid, addr, "fetched STE");
        Ok(Ste::from_words(words))
    }
}
