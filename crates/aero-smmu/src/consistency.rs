//! Validation of guest-provided STEs and CDs against the advertised feature set.
//!
//! Nothing fetched from guest memory is trusted until it passes these checks; a rejected STE
//! never reaches context descriptor fetch or translation config synthesis.

use tracing::warn;

use crate::cd::Cd;
use crate::config::{Capabilities, Httu};
use crate::error::SmmuError;
use crate::ste::{Ste, StreamConfig};
use crate::transcfg::{ps_to_oas, Granule};

fn bad_ste(sid: u32, reason: &'static str) -> SmmuError {
    warn!(sid, reason, "illegal STE");
    SmmuError::BadStreamTableEntry { sid }
}

fn bad_cd(sid: u32, reason: &'static str) -> SmmuError {
    warn!(sid, reason, "illegal CD");
    SmmuError::BadContextDescriptor { sid }
}

pub fn check_ste(ste: &Ste, caps: &Capabilities, sid: u32) -> Result<(), SmmuError> {
    if !ste.valid() {
        return Err(bad_ste(sid, "V is clear"));
    }

    let config = ste.config();
    match config {
        StreamConfig::Bypass | StreamConfig::Stage1 | StreamConfig::Stage2 => {}
        StreamConfig::Abort => return Err(bad_ste(sid, "abort configuration is not implemented")),
        StreamConfig::Nested => return Err(bad_ste(sid, "nested translation is not implemented")),
        StreamConfig::Reserved(_) => return Err(bad_ste(sid, "reserved Config")),
    }
    if config.stage1() && !caps.stage1() {
        return Err(bad_ste(sid, "stage 1 is not implemented"));
    }
    if config.stage2() && !caps.stage2() {
        return Err(bad_ste(sid, "stage 2 is not implemented"));
    }

    if config.stage1() {
        if ste.s1cdmax() > caps.ssid_bits() {
            return Err(bad_ste(sid, "S1CDMax exceeds SSIDSIZE"));
        }
        // STRW: EL2 requires IDR0.HYP, the odd encodings are reserved for non-secure streams.
        match ste.strw() {
            0b00 => {}
            0b10 if caps.hyp() => {}
            _ => return Err(bad_ste(sid, "unsupported StreamWorld")),
        }
    }

    if caps.ats() {
        match ste.eats() {
            0b11 => return Err(bad_ste(sid, "reserved EATS")),
            // Split-stage ATS needs nested translation and is incompatible with stall.
            0b10 if config != StreamConfig::Nested || ste.s2s() => {
                return Err(bad_ste(sid, "EATS split-stage is not usable"))
            }
            0b01 if ste.s2s() => return Err(bad_ste(sid, "EATS with S2S")),
            _ => {}
        }
    }

    if config.stage2() {
        check_stage2(ste, caps, sid)?;
    }

    Ok(())
}

fn check_stage2(ste: &Ste, caps: &Capabilities, sid: u32) -> Result<(), SmmuError> {
    let granule = match Granule::from_tg0(ste.s2tg()) {
        Some(granule) if caps.supports_granule(granule) => granule,
        _ => return Err(bad_ste(sid, "S2TG not supported")),
    };

    if ste.s2aa64() && !caps.aarch64() {
        return Err(bad_ste(sid, "AArch64 stage 2 tables are not supported"));
    }
    if !ste.s2aa64() {
        if !caps.aarch32() {
            return Err(bad_ste(sid, "AArch32 stage 2 tables are not supported"));
        }
        if granule != Granule::Size4K {
            return Err(bad_ste(sid, "AArch32 stage 2 requires a 4KB granule"));
        }
    }

    if ste.s2ha() || ste.s2hd() {
        if !ste.s2aa64() || caps.httu() == Httu::None {
            return Err(bad_ste(sid, "S2HA/S2HD require HTTU"));
        }
        if ste.s2hd() && caps.httu() != Httu::AccessDirty {
            return Err(bad_ste(sid, "S2HD requires dirty state update"));
        }
    }

    let oas = match ps_to_oas(ste.s2ps()) {
        Some(bits) => bits.min(caps.oas()),
        None => return Err(bad_ste(sid, "reserved S2PS")),
    };
    if ste.s2ttb() >> oas != 0 {
        return Err(bad_ste(sid, "S2TTB exceeds the output address size"));
    }

    // Without 16-bit VMIDs only VMID[7:0] is implemented and the upper byte must be zero.
    if !caps.vmid16() && ste.s2vmid() >> 8 != 0 {
        return Err(bad_ste(sid, "S2VMID exceeds 8 bits"));
    }

    Ok(())
}

pub fn check_cd(cd: &Cd, caps: &Capabilities, sid: u32) -> Result<(), SmmuError> {
    if !cd.valid() {
        return Err(bad_cd(sid, "V is clear"));
    }
    if cd.aa64() && !caps.aarch64() {
        return Err(bad_cd(sid, "AArch64 tables are not supported"));
    }
    if !cd.aa64() && !caps.aarch32() {
        return Err(bad_cd(sid, "AArch32 tables are not supported"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmmuConfig;

    const V: u64 = 1;
    const CFG_BYPASS: u64 = 0b100 << 1;
    const CFG_S1: u64 = 0b101 << 1;
    const CFG_S2: u64 = 0b110 << 1;

    fn caps(cfg: SmmuConfig) -> Capabilities {
        cfg.capabilities().unwrap()
    }

    fn ste(dw0: u64, dw1: u64, dw2: u64, dw3: u64) -> Ste {
        Ste::from_words([dw0, dw1, dw2, dw3, 0, 0, 0, 0])
    }

    /// A stage 2 STE that passes every check with the default capabilities.
    fn good_s2(dw1: u64, extra_dw2: u64) -> Ste {
        // S2T0SZ 24, 4K granule, 40-bit PS, AArch64.
        let dw2 = (24u64 << 32) | (2 << 48) | (1 << 51) | extra_dw2;
        ste(V | CFG_S2, dw1, dw2, 0x8000)
    }

    fn is_bad(res: Result<(), SmmuError>) -> bool {
        matches!(res, Err(SmmuError::BadStreamTableEntry { sid: 1 }))
    }

    #[test]
    fn invalid_and_unimplemented_configs_are_rejected() {
        let c = Capabilities::default();
        assert!(is_bad(check_ste(&ste(CFG_BYPASS, 0, 0, 0), &c, 1)));
        assert!(is_bad(check_ste(&ste(V, 0, 0, 0), &c, 1)), "abort");
        assert!(is_bad(check_ste(&ste(V | (0b010 << 1), 0, 0, 0), &c, 1)));
        assert!(is_bad(check_ste(&ste(V | (0b111 << 1), 0, 0, 0), &c, 1)), "nested");
        assert_eq!(check_ste(&ste(V | CFG_BYPASS, 0, 0, 0), &c, 1), Ok(()));
        assert_eq!(check_ste(&ste(V | CFG_S1, 0, 0, 0), &c, 1), Ok(()));
        assert_eq!(check_ste(&good_s2(0, 0), &c, 1), Ok(()));
    }

    #[test]
    fn stage_must_be_advertised() {
        let s1_only = caps(SmmuConfig {
            stage2: false,
            ..Default::default()
        });
        assert!(is_bad(check_ste(&good_s2(0, 0), &s1_only, 1)));

        let s2_only = caps(SmmuConfig {
            stage1: false,
            ..Default::default()
        });
        assert!(is_bad(check_ste(&ste(V | CFG_S1, 0, 0, 0), &s2_only, 1)));
    }

    #[test]
    fn stage1_cd_table_fields() {
        let c = Capabilities::default();
        // Multi-level CD tables are refused when the CD is fetched.
        assert_eq!(check_ste(&ste(V | CFG_S1 | (1 << 4), 0, 0, 0), &c, 1), Ok(()));
        assert!(is_bad(check_ste(&ste(V | CFG_S1 | (1 << 59), 0, 0, 0), &c, 1)));

        let with_ssid = caps(SmmuConfig {
            ssid_bits: 4,
            ..Default::default()
        });
        assert_eq!(check_ste(&ste(V | CFG_S1 | (4 << 59), 0, 0, 0), &with_ssid, 1), Ok(()));
        assert!(is_bad(check_ste(&ste(V | CFG_S1 | (5 << 59), 0, 0, 0), &with_ssid, 1)));
    }

    #[test]
    fn stream_world_el2_needs_hyp() {
        let c = Capabilities::default();
        assert!(is_bad(check_ste(&ste(V | CFG_S1, 0b10 << 30, 0, 0), &c, 1)));
        assert!(is_bad(check_ste(&ste(V | CFG_S1, 0b01 << 30, 0, 0), &c, 1)));
        // STRW is ignored when stage 1 is bypassed.
        assert_eq!(check_ste(&good_s2(0b10 << 30, 0), &c, 1), Ok(()));
    }

    #[test]
    fn eats_rules_apply_only_with_ats() {
        let no_ats = Capabilities::default();
        let ats = caps(SmmuConfig {
            ats: true,
            ..Default::default()
        });
        let s2s = 1 << 57;

        // Without ATS the field is ignored entirely.
        assert_eq!(check_ste(&good_s2(0b11 << 28, 0), &no_ats, 1), Ok(()));

        assert!(is_bad(check_ste(&good_s2(0b11 << 28, 0), &ats, 1)));
        // Split-stage ATS needs nested translation, which is never accepted.
        assert!(is_bad(check_ste(&good_s2(0b10 << 28, 0), &ats, 1)));
        // Full ATS is fine on a stage 2 stream as long as it does not stall.
        assert_eq!(check_ste(&good_s2(0b01 << 28, 0), &ats, 1), Ok(()));
        assert!(is_bad(check_ste(&good_s2(0b01 << 28, s2s), &ats, 1)));
        // S2S on its own is not an EATS violation.
        assert_eq!(check_ste(&good_s2(0, s2s), &ats, 1), Ok(()));
    }

    #[test]
    fn vmid_width() {
        let vmid8 = caps(SmmuConfig {
            vmid16: false,
            ..Default::default()
        });
        assert_eq!(check_ste(&good_s2(0, 0xff), &vmid8, 1), Ok(()));
        assert!(is_bad(check_ste(&good_s2(0, 0x100), &vmid8, 1)));
        assert_eq!(check_ste(&good_s2(0, 0xffff), &Capabilities::default(), 1), Ok(()));
        // VMID is a stage 2 field; stage 1 streams do not care.
        assert_eq!(check_ste(&ste(V | CFG_S1, 0, 0x100, 0), &vmid8, 1), Ok(()));
    }

    #[test]
    fn stage2_granule_and_format() {
        let c = Capabilities::default();
        assert!(is_bad(check_ste(&good_s2(0, 3 << 46), &c, 1)), "reserved S2TG");

        let no_64k = caps(SmmuConfig {
            granule_64k: false,
            ..Default::default()
        });
        assert!(is_bad(check_ste(&good_s2(0, 1 << 46), &no_64k, 1)));

        // Clearing S2AA64 selects AArch32 tables, which are not advertised by default.
        let aa32 = ste(V | CFG_S2, 0, (24u64 << 32) | (2 << 48), 0x8000);
        assert!(is_bad(check_ste(&aa32, &c, 1)));
        let both = caps(SmmuConfig {
            aarch32: true,
            ..Default::default()
        });
        assert_eq!(check_ste(&aa32, &both, 1), Ok(()));
    }

    #[test]
    fn hardware_update_flags() {
        let s2ha = 1 << 56;
        let s2hd = 1 << 55;
        let c = Capabilities::default();
        assert!(is_bad(check_ste(&good_s2(0, s2ha), &c, 1)));

        let access = caps(SmmuConfig {
            httu: Httu::Access,
            ..Default::default()
        });
        assert_eq!(check_ste(&good_s2(0, s2ha), &access, 1), Ok(()));
        assert!(is_bad(check_ste(&good_s2(0, s2hd), &access, 1)));

        let dirty = caps(SmmuConfig {
            httu: Httu::AccessDirty,
            ..Default::default()
        });
        assert_eq!(check_ste(&good_s2(0, s2ha | s2hd), &dirty, 1), Ok(()));
    }

    #[test]
    fn s2ttb_must_fit_output_size() {
        let c = Capabilities::default();
        let dw2 = (24u64 << 32) | (2 << 48) | (1 << 51);
        // 40-bit PS: bit 40 is out of range.
        assert!(is_bad(check_ste(&ste(V | CFG_S2, 0, dw2, 1 << 40), &c, 1)));
        assert_eq!(check_ste(&ste(V | CFG_S2, 0, dw2, (1 << 40) - 16), &c, 1), Ok(()));
        // Reserved PS encoding.
        let dw2 = (24u64 << 32) | (7 << 48) | (1 << 51);
        assert!(is_bad(check_ste(&ste(V | CFG_S2, 0, dw2, 0x8000), &c, 1)));
    }

    #[test]
    fn cd_validity() {
        let c = Capabilities::default();
        let cd = |dw0| Cd::from_words([dw0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(check_cd(&cd((1 << 31) | (1 << 41)), &c, 2), Ok(()));
        assert_eq!(
            check_cd(&cd(1 << 41), &c, 2),
            Err(SmmuError::BadContextDescriptor { sid: 2 })
        );
        assert_eq!(
            check_cd(&cd(1 << 31), &c, 2),
            Err(SmmuError::BadContextDescriptor { sid: 2 })
        );
    }
}
