//! SMMUv3 register offsets and bit definitions.
//!
//! Offsets are relative to the base of the SMMU MMIO region. Only page 0 is backed by storage;
//! the few page 1 registers the model handles alias their page 0 counterparts (see
//! [`fixup_page1_alias`]).

use bitflags::bitflags;

/// Size of the SMMU MMIO region (two 64KiB register pages).
pub const SMMU_MMIO_SIZE: u64 = 0x20000;

/// Size of the backed register page.
pub const REG_PAGE_SIZE: u64 = 0x1000;

pub const REG_IDR0: u64 = 0x00;
pub const REG_IDR1: u64 = 0x04;
pub const REG_IDR2: u64 = 0x08;
pub const REG_IDR3: u64 = 0x0c;
pub const REG_IDR4: u64 = 0x10;
pub const REG_IDR5: u64 = 0x14;
pub const REG_IIDR: u64 = 0x18;
pub const REG_AIDR: u64 = 0x1c;
pub const REG_CR0: u64 = 0x20;
pub const REG_CR0ACK: u64 = 0x24;
pub const REG_CR1: u64 = 0x28;
pub const REG_CR2: u64 = 0x2c;
pub const REG_STATUSR: u64 = 0x40;
pub const REG_GBPA: u64 = 0x44;
pub const REG_IRQ_CTRL: u64 = 0x50;
pub const REG_IRQ_CTRLACK: u64 = 0x54;
pub const REG_GERROR: u64 = 0x60;
pub const REG_GERRORN: u64 = 0x64;
pub const REG_GERROR_IRQ_CFG0: u64 = 0x68;
pub const REG_STRTAB_BASE: u64 = 0x80;
pub const REG_STRTAB_BASE_CFG: u64 = 0x88;
pub const REG_CMDQ_BASE: u64 = 0x90;
pub const REG_CMDQ_BASE_HI: u64 = 0x94;
pub const REG_CMDQ_PROD: u64 = 0x98;
pub const REG_CMDQ_CONS: u64 = 0x9c;
pub const REG_EVENTQ_BASE: u64 = 0xa0;
pub const REG_EVENTQ_BASE_HI: u64 = 0xa4;
pub const REG_EVENTQ_PROD: u64 = 0xa8;
pub const REG_EVENTQ_CONS: u64 = 0xac;
pub const REG_PRIQ_BASE: u64 = 0xc0;
pub const REG_PRIQ_BASE_HI: u64 = 0xc4;
pub const REG_PRIQ_PROD: u64 = 0xc8;
pub const REG_PRIQ_CONS: u64 = 0xcc;

/// Peripheral/component identification block (read-as-zero).
pub const REG_ID_BLOCK_START: u64 = 0xfd0;
pub const REG_ID_BLOCK_END: u64 = 0xffc;

/// Page 1 copies of the event/PRI queue pointers.
pub const PAGE1_OFFSET: u64 = 0x10000;
pub const REG_EVENTQ_PROD_PAGE1: u64 = PAGE1_OFFSET + REG_EVENTQ_PROD;
pub const REG_EVENTQ_CONS_PAGE1: u64 = PAGE1_OFFSET + REG_EVENTQ_CONS;
pub const REG_PRIQ_PROD_PAGE1: u64 = PAGE1_OFFSET + REG_PRIQ_PROD;
pub const REG_PRIQ_CONS_PAGE1: u64 = PAGE1_OFFSET + REG_PRIQ_CONS;

bitflags! {
    /// SMMU_CR0 (mirrored into SMMU_CR0ACK).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Cr0: u32 {
        const SMMUEN = 1 << 0;
        const PRIQEN = 1 << 1;
        const EVENTQEN = 1 << 2;
        const CMDQEN = 1 << 3;
    }
}

bitflags! {
    /// SMMU_IRQ_CTRL (mirrored into SMMU_IRQ_CTRLACK).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IrqCtrl: u32 {
        const GERROR_IRQEN = 1 << 0;
        const PRIQ_IRQEN = 1 << 1;
        const EVENTQ_IRQEN = 1 << 2;
    }
}

bitflags! {
    /// Source bits shared by SMMU_GERROR and SMMU_GERRORN.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Gerror: u32 {
        const CMDQ_ERR = 1 << 0;
        const EVENTQ = 1 << 2;
        const PRIQ = 1 << 3;
    }
}

/// Queue BASE register fields.
pub const Q_BASE_LOG2SIZE_MASK: u64 = 0x1f;
pub const Q_BASE_ADDR_MASK: u64 = 0x000f_ffff_ffff_ffe0;

/// STRTAB_BASE address field (bits [51:6]).
pub const STRTAB_BASE_ADDR_MASK: u64 = 0x000f_ffff_ffff_ffc0;

/// STRTAB_BASE_CFG fields.
pub const STRTAB_CFG_LOG2SIZE_MASK: u32 = 0x3f;
pub const STRTAB_CFG_SPLIT_SHIFT: u32 = 6;
pub const STRTAB_CFG_SPLIT_MASK: u32 = 0x1f;
pub const STRTAB_CFG_FMT_SHIFT: u32 = 16;
pub const STRTAB_CFG_FMT_MASK: u32 = 0x3;
pub const STRTAB_CFG_FMT_2LEVEL: u32 = 1;

/// CMDQ_CONS.ERR (bits [30:24]).
pub const CMDQ_CONS_ERR_SHIFT: u32 = 24;
pub const CMDQ_CONS_ERR_MASK: u32 = 0x7f;

/// EVENTQ_PROD.OVFLG / EVENTQ_CONS.OVACKFLG.
pub const EVENTQ_OVFLG: u32 = 1 << 31;

/// Maps the page 1 queue pointer aliases onto their page 0 registers.
pub fn fixup_page1_alias(offset: u64) -> u64 {
    match offset {
        REG_EVENTQ_PROD_PAGE1 | REG_EVENTQ_CONS_PAGE1 | REG_PRIQ_PROD_PAGE1
        | REG_PRIQ_CONS_PAGE1 => offset ^ PAGE1_OFFSET,
        _ => offset,
    }
}

/// Registers guest software can never write.
pub fn is_read_only(offset: u64) -> bool {
    matches!(
        offset,
        REG_IDR0..=REG_AIDR
            | REG_CR0ACK
            | REG_IRQ_CTRLACK
            | REG_GERROR
            | REG_STATUSR
            | REG_ID_BLOCK_START..=REG_ID_BLOCK_END
    )
}
