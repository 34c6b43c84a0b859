//! Context descriptors (stage 1 parameters).
//!
//! Only a single context descriptor per stream is supported; the STE's S1ContextPtr points
//! straight at it.

use tracing::{trace, warn};

use crate::error::SmmuError;
use crate::memory::{extract64, read_dwords, MemoryBus};
use crate::ste::Ste;

pub const CD_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cd {
    words: [u64; 8],
}

impl Cd {
    pub fn from_words(words: [u64; 8]) -> Self {
        Self { words }
    }

    fn field(&self, word: usize, start: u32, len: u32) -> u64 {
        extract64(self.words[word], start, len)
    }

    pub fn t0sz(&self) -> u8 {
        self.field(0, 0, 6) as u8
    }

    pub fn tg0(&self) -> u8 {
        self.field(0, 6, 2) as u8
    }

    pub fn epd0(&self) -> bool {
        self.field(0, 14, 1) != 0
    }

    pub fn t1sz(&self) -> u8 {
        self.field(0, 16, 6) as u8
    }

    pub fn tg1(&self) -> u8 {
        self.field(0, 22, 2) as u8
    }

    pub fn epd1(&self) -> bool {
        self.field(0, 30, 1) != 0
    }

    pub fn valid(&self) -> bool {
        self.field(0, 31, 1) != 0
    }

    pub fn ips(&self) -> u8 {
        self.field(0, 32, 3) as u8
    }

    pub fn aa64(&self) -> bool {
        self.field(0, 41, 1) != 0
    }

    pub fn asid(&self) -> u16 {
        self.field(0, 48, 16) as u16
    }

    /// TTB0 (bits [51:4]).
    pub fn ttb0(&self) -> u64 {
        self.words[1] & 0x000f_ffff_ffff_fff0
    }

    /// TTB1 (bits [51:4]).
    pub fn ttb1(&self) -> u64 {
        self.words[2] & 0x000f_ffff_ffff_fff0
    }
}

/// Fetches the context descriptor referenced by a stage 1 STE.
pub fn fetch_cd(mem: &dyn MemoryBus, ste: &Ste, sid: u32) -> Result<Cd, SmmuError> {
    if ste.s1fmt() != 0 {
        warn!(sid, s1fmt = ste.s1fmt(), "multi-level context descriptor tables are not supported");
        return Err(SmmuError::BadContextDescriptor { sid });
    }
    let addr = ste.s1_context_ptr();
    let words = read_dwords::<8>(mem, addr)
        .map_err(|source| SmmuError::CdFetchFailed { sid, source })?;
    trace!(sid, addr, "fetched CD");
    Ok(Cd::from_words(words))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::TestMem;

    fn stage1_ste(cd_ptr: u64) -> Ste {
        Ste::from_words([cd_ptr | 0b1011, 0, 0, 0, 0, 0, 0, 0])
    }

    #[test]
    fn decodes_fields() {
        let dw0: u64 = 25 | (2 << 6) | (1 << 14) | (30 << 16) | (3 << 22) | (1 << 31);
        let dw0 = dw0 | (5u64 << 32) | (1 << 41) | (0xbeef << 48);
        let cd = Cd::from_words([dw0, 0x1234_5678_9abf, 0xfff0_0000_0000_4321, 0, 0, 0, 0, 0]);
        assert_eq!(cd.t0sz(), 25);
        assert_eq!(cd.tg0(), 2);
        assert!(cd.epd0());
        assert_eq!(cd.t1sz(), 30);
        assert_eq!(cd.tg1(), 3);
        assert!(!cd.epd1());
        assert!(cd.valid());
        assert_eq!(cd.ips(), 5);
        assert!(cd.aa64());
        assert_eq!(cd.asid(), 0xbeef);
        assert_eq!(cd.ttb0(), 0x1234_5678_9ab0);
        assert_eq!(cd.ttb1(), 0x0000_0000_0000_4320);
    }

    #[test]
    fn fetches_from_context_pointer() {
        let mut mem = TestMem::new(0x4000);
        mem.write_u64(0x2000, 1 << 31).unwrap();
        let cd = fetch_cd(&mem, &stage1_ste(0x2000), 7).unwrap();
        assert!(cd.valid());
    }

    #[test]
    fn fetch_fault_is_reported() {
        let mem = TestMem::new(0x1000);
        assert!(matches!(
            fetch_cd(&mem, &stage1_ste(0x8000), 7),
            Err(SmmuError::CdFetchFailed { sid: 7, .. })
        ));
    }

    #[test]
    fn multi_level_cd_table_is_rejected() {
        let mem = TestMem::new(0x4000);
        let ste = Ste::from_words([0x2000 | (1 << 4) | 0b1011, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            fetch_cd(&mem, &ste, 9),
            Err(SmmuError::BadContextDescriptor { sid: 9 })
        );
    }
}
