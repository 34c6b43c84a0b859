//! ARM SMMUv3 IOMMU emulation.
//!
//! The SMMU sits between DMA-capable devices and guest memory. For every transaction it looks up
//! the stream table entry of the requesting device, validates it against the advertised feature
//! set, optionally fetches a context descriptor, and hands the resulting translation config to a
//! page table walker. Guest software configures and observes the unit through the architected
//! register page and three in-memory circular queues:
//!
//! - command queue: consumed by the SMMU; invalidations are acknowledged, `CMD_SYNC` can raise an
//!   interrupt, illegal commands halt the queue until GERRORN acknowledges the error
//! - event queue: produced by the SMMU for every failed translation
//! - PRI queue: geometry only, page requests are not generated
//!
//! Nothing is cached: every transaction re-reads the stream table and context descriptor.
//!
//! The only external inputs are a [`MemoryBus`] (guest physical memory) and optional
//! [`IrqLine`] sinks. Page table walking is injected through [`WalkerSet`].

#![forbid(unsafe_code)]

mod cd;
mod command;
mod config;
mod consistency;
mod error;
mod event;
mod irq;
mod memory;
mod queue;
pub mod regs;
mod shared;
mod smmu;
mod ste;
mod transcfg;
mod walker;

pub use cd::{fetch_cd, Cd, CD_SIZE};
pub use consistency::{check_cd, check_ste};
pub use command::{
    Command, CommandAction, CommandConsumer, ConsumerState, Opcode, SyncSignal, CMD_SIZE,
};
pub use config::{Capabilities, ConfigError, Httu, SmmuConfig, MAX_QUEUE_LOG2SIZE};
pub use error::*;
pub use event::{EventRecord, EventReporter, ReportOutcome, EVT_SIZE};
pub use irq::{InterruptCoordinator, IrqLine, IrqSource};
pub use memory::{MemoryBus, MemoryError};
pub use queue::{Queue, QueueError};
pub use shared::SharedSmmu;
pub use smmu::{IommuTlbEntry, SmmuV3, PRIQ_ENTRY_SIZE};
pub use ste::{L1Descriptor, Ste, StreamConfig, StreamTableConfig, L1_DESC_SIZE, STE_SIZE};
pub use transcfg::{
    build_stage1, build_stage2, oas_to_ps, ps_to_oas, Granule, Stage, TranslationConfig,
    AA64_TSZ_MAX, AA64_TSZ_MIN,
};
pub use walker::{
    Aarch32Walker, Aarch64Walker, PageTableWalker, Permission, WalkOutput, WalkerSet,
};
