//! Translation config synthesis.
//!
//! A [`TranslationConfig`] is the request-scoped handoff from the SMMU to a page table walker.
//! It is rebuilt from the STE/CD for every transaction and never persisted.

use tracing::trace;

use crate::cd::Cd;
use crate::config::Capabilities;
use crate::error::SmmuError;
use crate::ste::Ste;

/// Architected range of TxSZ for VMSAv8-64 tables.
pub const AA64_TSZ_MIN: u8 = 16;
pub const AA64_TSZ_MAX: u8 = 39;

const PS_BITS: [u8; 7] = [32, 36, 40, 42, 44, 48, 52];

/// Output address size in bits for an IPS/PS/OAS encoding.
pub fn ps_to_oas(ps: u8) -> Option<u8> {
    PS_BITS.get(usize::from(ps)).copied()
}

/// IPS/PS/OAS encoding of an output address size in bits.
pub fn oas_to_ps(oas: u8) -> Option<u8> {
    PS_BITS.iter().position(|&bits| bits == oas).map(|ps| ps as u8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granule {
    Size4K,
    Size16K,
    Size64K,
}

impl Granule {
    /// Decodes a TG0 / S2TG field; `None` for the reserved encoding.
    pub fn from_tg0(tg: u8) -> Option<Self> {
        match tg & 0b11 {
            0 => Some(Granule::Size4K),
            1 => Some(Granule::Size64K),
            2 => Some(Granule::Size16K),
            _ => None,
        }
    }

    /// Decodes a TG1 field; `None` for the reserved encoding.
    pub fn from_tg1(tg: u8) -> Option<Self> {
        match tg & 0b11 {
            1 => Some(Granule::Size16K),
            2 => Some(Granule::Size4K),
            3 => Some(Granule::Size64K),
            _ => None,
        }
    }

    pub fn shift(self) -> u32 {
        match self {
            Granule::Size4K => 12,
            Granule::Size16K => 14,
            Granule::Size64K => 16,
        }
    }

    pub fn size(self) -> u64 {
        1 << self.shift()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Stage1,
    Stage2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationConfig {
    pub stage: Stage,
    pub granule: Granule,
    pub tsz: u8,
    /// Translation table base, masked to `oas`.
    pub ttb: u64,
    pub oas: u8,
    pub aa64: bool,
    pub input_addr: u64,
    /// The table covers the upper (TTBR1) region of the input address space.
    pub upper_range: bool,
}

impl TranslationConfig {
    /// Width of the input address range covered by the table.
    pub fn input_bits(&self) -> u32 {
        let width: u32 = if self.aa64 { 64 } else { 32 };
        width.saturating_sub(u32::from(self.tsz))
    }

    pub fn input_in_range(&self) -> bool {
        let bits = self.input_bits();
        let high = self.input_addr.checked_shr(bits).unwrap_or(0);
        if !self.upper_range {
            return high == 0;
        }
        let ones = u64::MAX.checked_shr(bits).unwrap_or(0);
        high == ones
    }
}

fn clamp_tsz(tsz: u8, aa64: bool) -> u8 {
    if aa64 {
        tsz.clamp(AA64_TSZ_MIN, AA64_TSZ_MAX)
    } else {
        tsz
    }
}

fn effective_oas(ps: u8, caps: &Capabilities) -> u8 {
    ps_to_oas(ps).unwrap_or(caps.oas()).min(caps.oas())
}

fn mask_to_oas(addr: u64, oas: u8) -> u64 {
    addr & ((1u64 << oas) - 1)
}

/// Builds the stage 1 config for input address `addr` from a validated CD.
pub fn build_stage1(
    cd: &Cd,
    caps: &Capabilities,
    sid: u32,
    addr: u64,
) -> Result<TranslationConfig, SmmuError> {
    let aa64 = cd.aa64();
    let (granule, tsz, ttb, upper_range) = if !cd.epd0() {
        let granule = Granule::from_tg0(cd.tg0()).unwrap_or(Granule::Size4K);
        (granule, cd.t0sz(), cd.ttb0(), false)
    } else if !cd.epd1() {
        let granule = Granule::from_tg1(cd.tg1()).unwrap_or(Granule::Size4K);
        (granule, cd.t1sz(), cd.ttb1(), true)
    } else {
        trace!(sid, "both stage 1 table walks are disabled");
        return Err(SmmuError::TranslationForbidden { sid, addr });
    };

    let oas = effective_oas(cd.ips(), caps);
    let cfg = TranslationConfig {
        stage: Stage::Stage1,
        granule,
        tsz: clamp_tsz(tsz, aa64),
        ttb: mask_to_oas(ttb, oas),
        oas,
        aa64,
        input_addr: addr,
        upper_range,
    };
    trace!(sid, ?cfg, "stage 1 translation config");
    Ok(cfg)
}

/// Builds the stage 2 config for input address `addr` from a validated STE.
pub fn build_stage2(ste: &Ste, caps: &Capabilities, sid: u32, addr: u64) -> TranslationConfig {
    let aa64 = ste.s2aa64();
    let oas = effective_oas(ste.s2ps(), caps);
    let cfg = TranslationConfig {
        stage: Stage::Stage2,
        granule: Granule::from_tg0(ste.s2tg()).unwrap_or(Granule::Size4K),
        tsz: clamp_tsz(ste.s2t0sz(), aa64),
        ttb: mask_to_oas(ste.s2ttb(), oas),
        oas,
        aa64,
        input_addr: addr,
        upper_range: false,
    };
    trace!(sid, ?cfg, "stage 2 translation config");
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cd(dw0: u64, ttb0: u64, ttb1: u64) -> Cd {
        Cd::from_words([dw0 | (1 << 31) | (1 << 41), ttb0, ttb1, 0, 0, 0, 0, 0])
    }

    #[test]
    fn output_size_encodings() {
        assert_eq!(ps_to_oas(0), Some(32));
        assert_eq!(ps_to_oas(4), Some(44));
        assert_eq!(ps_to_oas(6), Some(52));
        assert_eq!(ps_to_oas(7), None);
        assert_eq!(oas_to_ps(48), Some(5));
        assert_eq!(oas_to_ps(41), None);
    }

    #[test]
    fn granule_encodings_differ_between_tg0_and_tg1() {
        assert_eq!(Granule::from_tg0(1), Some(Granule::Size64K));
        assert_eq!(Granule::from_tg0(2), Some(Granule::Size16K));
        assert_eq!(Granule::from_tg0(3), None);
        assert_eq!(Granule::from_tg1(1), Some(Granule::Size16K));
        assert_eq!(Granule::from_tg1(2), Some(Granule::Size4K));
        assert_eq!(Granule::from_tg1(0), None);
    }

    #[test]
    fn small_tsz_is_clamped_for_aarch64() {
        let caps = Capabilities::default();
        let cfg = build_stage1(&cd(10, 0x1000, 0), &caps, 0, 0).unwrap();
        assert_eq!(cfg.tsz, AA64_TSZ_MIN);

        let cfg = build_stage1(&cd(50, 0x1000, 0), &caps, 0, 0).unwrap();
        assert_eq!(cfg.tsz, AA64_TSZ_MAX);
    }

    #[test]
    fn ips_is_clamped_to_advertised_oas_and_masks_base() {
        let caps = Capabilities::default();
        // IPS 6 (52 bits) against a 44-bit unit.
        let cfg = build_stage1(&cd(25 | (6 << 32), 0xf_ffff_ffff_f000, 0), &caps, 0, 0).unwrap();
        assert_eq!(cfg.oas, 44);
        assert_eq!(cfg.ttb, 0xfff_ffff_f000);

        let cfg = build_stage1(&cd(25 | (1 << 32), 0x1_0000_0000_1000, 0), &caps, 0, 0).unwrap();
        assert_eq!(cfg.oas, 36);
        assert_eq!(cfg.ttb, 0x1000);
    }

    #[test]
    fn epd0_selects_ttbr1_and_upper_range() {
        let caps = Capabilities::default();
        let dw0 = (1 << 14) | (25 << 16) | (2 << 22);
        let cfg = build_stage1(&cd(dw0, 0x1000, 0x2000), &caps, 3, 0xffff_ff80_0000_1000).unwrap();
        assert!(cfg.upper_range);
        assert_eq!(cfg.ttb, 0x2000);
        assert_eq!(cfg.granule, Granule::Size4K);
        assert!(cfg.input_in_range());

        let cfg = TranslationConfig {
            input_addr: 0x1000,
            ..cfg
        };
        assert!(!cfg.input_in_range());

        let both = dw0 | (1 << 30);
        assert_eq!(
            build_stage1(&cd(both, 0x1000, 0x2000), &caps, 3, 0x40),
            Err(SmmuError::TranslationForbidden { sid: 3, addr: 0x40 })
        );
    }

    #[test]
    fn lower_range_check() {
        let caps = Capabilities::default();
        let cfg = build_stage1(&cd(25, 0x1000, 0), &caps, 0, (1 << 39) - 1).unwrap();
        assert!(cfg.input_in_range());
        let cfg = TranslationConfig {
            input_addr: 1 << 39,
            ..cfg
        };
        assert!(!cfg.input_in_range());
    }

    #[test]
    fn stage2_uses_ste_fields() {
        let caps = Capabilities::default();
        let dw2 = (24u64 << 32) | (1 << 46) | (2 << 48) | (1 << 51);
        let ste = Ste::from_words([0b1101, 0, dw2, 0x0123_4567_8000, 0, 0, 0, 0]);
        let cfg = build_stage2(&ste, &caps, 1, 0x4000);
        assert_eq!(cfg.stage, Stage::Stage2);
        assert_eq!(cfg.granule, Granule::Size64K);
        assert_eq!(cfg.tsz, 24);
        assert_eq!(cfg.oas, 40);
        assert_eq!(cfg.ttb, 0x0023_4567_8000 & ((1 << 40) - 1));
        assert!(cfg.aa64);
        assert!(cfg.input_in_range());
    }
}
