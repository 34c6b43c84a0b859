//! Page table walker capability.
//!
//! The SMMU hands a [`TranslationConfig`] to a [`PageTableWalker`] selected by the config's
//! table format. [`Aarch64Walker`] is a reference VMSAv8-64 walker over guest memory; VMSAv8-32
//! long-descriptor tables are not modelled and [`Aarch32Walker`] faults every walk.

use bitflags::bitflags;
use tracing::{trace, warn};

use crate::error::WalkFault;
use crate::memory::{entry_addr, MemoryBus};
use crate::transcfg::{Stage, TranslationConfig};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Permission: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

impl Permission {
    /// Permission required by (and granted to) an access in the given direction.
    pub fn for_access(is_write: bool) -> Self {
        if is_write {
            Permission::READ | Permission::WRITE
        } else {
            Permission::READ
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOutput {
    /// Translated address of `cfg.input_addr`.
    pub output: u64,
    pub page_size: u64,
    pub perm: Permission,
}

pub trait PageTableWalker: Send {
    fn walk(
        &self,
        cfg: &TranslationConfig,
        mem: &dyn MemoryBus,
        is_write: bool,
    ) -> Result<WalkOutput, WalkFault>;
}

/// The pair of walkers an SMMU instance dispatches to.
pub struct WalkerSet {
    pub aarch64: Box<dyn PageTableWalker>,
    pub aarch32: Box<dyn PageTableWalker>,
}

impl WalkerSet {
    pub fn new(aarch64: Box<dyn PageTableWalker>, aarch32: Box<dyn PageTableWalker>) -> Self {
        Self { aarch64, aarch32 }
    }

    pub fn select(&self, aa64: bool) -> &dyn PageTableWalker {
        if aa64 {
            self.aarch64.as_ref()
        } else {
            self.aarch32.as_ref()
        }
    }
}

impl Default for WalkerSet {
    fn default() -> Self {
        Self::new(Box::new(Aarch64Walker), Box::new(Aarch32Walker))
    }
}

const DESC_VALID: u64 = 1 << 0;
const DESC_TABLE: u64 = 1 << 1;
const DESC_AF: u64 = 1 << 10;
/// Stage 1 AP[2]: read-only.
const DESC_AP_RO: u64 = 1 << 7;
/// Stage 2 S2AP[0] / S2AP[1].
const DESC_S2AP_R: u64 = 1 << 6;
const DESC_S2AP_W: u64 = 1 << 7;
/// Stage 1 APTable[1]: no writes below this table.
const DESC_APTABLE_RO: u64 = 1 << 62;

const OA_MASK: u64 = 0x0000_ffff_ffff_f000;

#[inline]
fn level_shift(granule_shift: u32, level: u32) -> u32 {
    granule_shift + (granule_shift - 3) * (3 - level)
}

#[inline]
fn block_allowed(granule_shift: u32, level: u32) -> bool {
    match granule_shift {
        12 => level == 1 || level == 2,
        _ => level == 2,
    }
}

/// First lookup level for an input range of `ia_bits` bits.
#[inline]
fn start_level(granule_shift: u32, ia_bits: u32) -> Option<u32> {
    let stride = granule_shift - 3;
    let levels = ia_bits.checked_sub(granule_shift)?.div_ceil(stride);
    4u32.checked_sub(levels)
}

/// VMSAv8-64 translation table walker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aarch64Walker;

impl PageTableWalker for Aarch64Walker {
    fn walk(
        &self,
        cfg: &TranslationConfig,
        mem: &dyn MemoryBus,
        is_write: bool,
    ) -> Result<WalkOutput, WalkFault> {
        let gshift = cfg.granule.shift();
        let stride = gshift - 3;
        let ia_bits = cfg.input_bits();
        let ia = cfg.input_addr;
        let level = start_level(gshift, ia_bits).ok_or(WalkFault::Translation { level: 0 })?;

        let mut table = cfg.ttb;
        let mut write_protected = false;
        for level in level..=3 {
            let fault_level = level as u8;
            let shift = level_shift(gshift, level);
            let index_bits = if shift + stride > ia_bits {
                ia_bits - shift
            } else {
                stride
            };
            let index = (ia >> shift) & ((1u64 << index_bits) - 1);

            let desc_addr = entry_addr(table, index, 8)
                .map_err(|_| WalkFault::ExternalAbort { addr: table })?;
            let desc = mem
                .read_u64(desc_addr)
                .map_err(|_| WalkFault::ExternalAbort { addr: desc_addr })?;
            trace!(level, desc_addr, desc, "table walk step");

            if desc & DESC_VALID == 0 {
                return Err(WalkFault::Translation { level: fault_level });
            }

            let is_table = desc & DESC_TABLE != 0;
            if is_table && level < 3 {
                let next = desc & OA_MASK & !((1u64 << gshift) - 1);
                if next >> cfg.oas != 0 {
                    return Err(WalkFault::AddressSize { level: fault_level });
                }
                if cfg.stage == Stage::Stage1 && desc & DESC_APTABLE_RO != 0 {
                    write_protected = true;
                }
                table = next;
                continue;
            }
            if !is_table && !block_allowed(gshift, level) {
                return Err(WalkFault::Translation { level: fault_level });
            }

            let page_mask = (1u64 << shift) - 1;
            let oa = desc & OA_MASK & !page_mask;
            if oa >> cfg.oas != 0 {
                return Err(WalkFault::AddressSize { level: fault_level });
            }
            if desc & DESC_AF == 0 {
                return Err(WalkFault::Access { level: fault_level });
            }

            let perm = match cfg.stage {
                Stage::Stage1 => {
                    let mut perm = Permission::READ;
                    if desc & DESC_AP_RO == 0 && !write_protected {
                        perm |= Permission::WRITE;
                    }
                    perm
                }
                Stage::Stage2 => {
                    let mut perm = Permission::empty();
                    if desc & DESC_S2AP_R != 0 {
                        perm |= Permission::READ;
                    }
                    if desc & DESC_S2AP_W != 0 {
                        perm |= Permission::WRITE;
                    }
                    perm
                }
            };
            if !perm.contains(Permission::for_access(is_write)) {
                return Err(WalkFault::Permission { level: fault_level });
            }

            return Ok(WalkOutput {
                output: oa | (ia & page_mask),
                page_size: 1 << shift,
                perm,
            });
        }

        Err(WalkFault::Translation { level: 3 })
    }
}

/// VMSAv8-32 long-descriptor walker placeholder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aarch32Walker;

impl PageTableWalker for Aarch32Walker {
    fn walk(
        &self,
        cfg: &TranslationConfig,
        _mem: &dyn MemoryBus,
        _is_write: bool,
    ) -> Result<WalkOutput, WalkFault> {
        warn!(
            input_addr = cfg.input_addr,
            "AArch32 translation tables are not supported"
        );
        Err(WalkFault::Translation { level: 1 })
    }
}
