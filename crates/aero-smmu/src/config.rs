//! Advertised SMMU feature set.
//!
//! [`SmmuConfig`] is the user-facing (serde) description of what the emulated unit implements.
//! It is validated once and turned into [`Capabilities`], which is the single source for both
//! the identification register values and the stream table entry consistency checks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transcfg::{oas_to_ps, Granule};

/// Largest queue the model will ever allocate (`2^19` entries), matching the IDR1 defaults.
pub const MAX_QUEUE_LOG2SIZE: u8 = 19;

/// Hardware translation table update support (IDR0.HTTU).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Httu {
    #[default]
    None,
    Access,
    AccessDirty,
}

impl Httu {
    fn idr_bits(self) -> u32 {
        match self {
            Httu::None => 0,
            Httu::Access => 1,
            Httu::AccessDirty => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmmuConfig {
    /// Stream ID width in bits (IDR1.SIDSIZE).
    pub sid_bits: u8,
    /// Substream ID width in bits (IDR1.SSIDSIZE).
    pub ssid_bits: u8,
    /// Output address size in bits; one of 32, 36, 40, 42, 44, 48, 52.
    pub oas: u8,
    pub granule_4k: bool,
    pub granule_16k: bool,
    pub granule_64k: bool,
    pub stage1: bool,
    pub stage2: bool,
    pub aarch64: bool,
    pub aarch32: bool,
    pub vmid16: bool,
    pub asid16: bool,
    pub ats: bool,
    pub pri: bool,
    pub httu: Httu,
    pub two_level_stream_table: bool,
    pub cmdq_max_log2size: u8,
    pub eventq_max_log2size: u8,
    pub priq_max_log2size: u8,
}

impl Default for SmmuConfig {
    fn default() -> Self {
        Self {
            sid_bits: 16,
            ssid_bits: 0,
            oas: 44,
            granule_4k: true,
            granule_16k: true,
            granule_64k: true,
            stage1: true,
            stage2: true,
            aarch64: true,
            aarch32: false,
            vmid16: true,
            asid16: true,
            ats: false,
            pri: false,
            httu: Httu::None,
            two_level_stream_table: true,
            cmdq_max_log2size: MAX_QUEUE_LOG2SIZE,
            eventq_max_log2size: MAX_QUEUE_LOG2SIZE,
            priq_max_log2size: MAX_QUEUE_LOG2SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("stream ID width {0} exceeds 32 bits")]
    SidBits(u8),

    #[error("substream ID width {0} exceeds 20 bits")]
    SsidBits(u8),

    #[error("unsupported output address size: {0} bits")]
    Oas(u8),

    #[error("{queue} queue log2 size {log2size} exceeds {MAX_QUEUE_LOG2SIZE}")]
    QueueSize { queue: &'static str, log2size: u8 },

    #[error("no translation granule is supported")]
    NoGranule,

    #[error("no translation table format is supported")]
    NoTableFormat,

    #[error("neither translation stage is implemented")]
    NoStage,
}

impl SmmuConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sid_bits > 32 {
            return Err(ConfigError::SidBits(self.sid_bits));
        }
        if self.ssid_bits > 20 {
            return Err(ConfigError::SsidBits(self.ssid_bits));
        }
        if oas_to_ps(self.oas).is_none() {
            return Err(ConfigError::Oas(self.oas));
        }
        for (queue, log2size) in [
            ("command", self.cmdq_max_log2size),
            ("event", self.eventq_max_log2size),
            ("PRI", self.priq_max_log2size),
        ] {
            if log2size > MAX_QUEUE_LOG2SIZE {
                return Err(ConfigError::QueueSize { queue, log2size });
            }
        }
        if !(self.granule_4k || self.granule_16k || self.granule_64k) {
            return Err(ConfigError::NoGranule);
        }
        if !(self.aarch64 || self.aarch32) {
            return Err(ConfigError::NoTableFormat);
        }
        if !(self.stage1 || self.stage2) {
            return Err(ConfigError::NoStage);
        }
        Ok(())
    }

    pub fn capabilities(&self) -> Result<Capabilities, ConfigError> {
        self.validate()?;
        Ok(Capabilities {
            config: self.clone(),
        })
    }
}

/// Validated feature set of one SMMU instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capabilities {
    config: SmmuConfig,
}

impl Capabilities {
    pub fn config(&self) -> &SmmuConfig {
        &self.config
    }

    pub fn sid_bits(&self) -> u8 {
        self.config.sid_bits
    }

    pub fn ssid_bits(&self) -> u8 {
        self.config.ssid_bits
    }

    pub fn oas(&self) -> u8 {
        self.config.oas
    }

    pub fn stage1(&self) -> bool {
        self.config.stage1
    }

    pub fn stage2(&self) -> bool {
        self.config.stage2
    }

    pub fn aarch64(&self) -> bool {
        self.config.aarch64
    }

    pub fn aarch32(&self) -> bool {
        self.config.aarch32
    }

    pub fn vmid16(&self) -> bool {
        self.config.vmid16
    }

    pub fn ats(&self) -> bool {
        self.config.ats
    }

    pub fn httu(&self) -> Httu {
        self.config.httu
    }

    /// The unit never implements EL2 stream worlds.
    pub fn hyp(&self) -> bool {
        false
    }

    pub fn two_level_stream_table(&self) -> bool {
        self.config.two_level_stream_table
    }

    pub fn supports_granule(&self, granule: Granule) -> bool {
        match granule {
            Granule::Size4K => self.config.granule_4k,
            Granule::Size16K => self.config.granule_16k,
            Granule::Size64K => self.config.granule_64k,
        }
    }

    pub fn cmdq_max_log2size(&self) -> u8 {
        self.config.cmdq_max_log2size
    }

    pub fn eventq_max_log2size(&self) -> u8 {
        self.config.eventq_max_log2size
    }

    pub fn priq_max_log2size(&self) -> u8 {
        self.config.priq_max_log2size
    }

    pub fn idr0(&self) -> u32 {
        let c = &self.config;
        let mut v = 0u32;
        if c.stage2 {
            v |= 1 << 0;
        }
        if c.stage1 {
            v |= 1 << 1;
        }
        let ttf = u32::from(c.aarch32) | (u32::from(c.aarch64) << 1);
        v |= ttf << 2;
        v |= c.httu.idr_bits() << 6;
        if c.ats {
            v |= 1 << 10;
        }
        if c.asid16 {
            v |= 1 << 12;
        }
        if c.pri {
            v |= 1 << 16;
        }
        if c.vmid16 {
            v |= 1 << 18;
        }
        // Little-endian translation tables only.
        v |= 0b10 << 21;
        if c.two_level_stream_table {
            v |= 1 << 27;
        }
        v
    }

    pub fn idr1(&self) -> u32 {
        let c = &self.config;
        u32::from(c.sid_bits & 0x3f)
            | (u32::from(c.ssid_bits & 0x1f) << 6)
            | (u32::from(c.priq_max_log2size & 0x1f) << 11)
            | (u32::from(c.eventq_max_log2size & 0x1f) << 16)
            | (u32::from(c.cmdq_max_log2size & 0x1f) << 21)
    }

    pub fn idr5(&self) -> u32 {
        let c = &self.config;
        let mut v = u32::from(oas_to_ps(c.oas).unwrap_or(0));
        if c.granule_4k {
            v |= 1 << 4;
        }
        if c.granule_16k {
            v |= 1 << 5;
        }
        if c.granule_64k {
            v |= 1 << 6;
        }
        v
    }
}
