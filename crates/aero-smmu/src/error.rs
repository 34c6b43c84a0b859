use thiserror::Error;

use crate::memory::MemoryError;

/// Fault reported by a page table walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WalkFault {
    #[error("translation fault at level {level}")]
    Translation { level: u8 },

    #[error("address size fault at level {level}")]
    AddressSize { level: u8 },

    #[error("access flag fault at level {level}")]
    Access { level: u8 },

    #[error("permission fault at level {level}")]
    Permission { level: u8 },

    #[error("external abort fetching descriptor at {addr:#x}")]
    ExternalAbort { addr: u64 },
}

/// Failure of one transaction or one command.
///
/// Every transaction error maps onto an architected event record via [`SmmuError::event_code`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmmuError {
    #[error("stream ID {sid:#x} is out of range")]
    BadStreamId { sid: u32 },

    #[error("illegal stream table entry for stream {sid:#x}")]
    BadStreamTableEntry { sid: u32 },

    #[error("illegal context descriptor for stream {sid:#x}")]
    BadContextDescriptor { sid: u32 },

    #[error("unable to fetch stream table entry for stream {sid:#x}")]
    UnableToFetch {
        sid: u32,
        #[source]
        source: MemoryError,
    },

    #[error("unable to fetch context descriptor for stream {sid:#x}")]
    CdFetchFailed {
        sid: u32,
        #[source]
        source: MemoryError,
    },

    #[error("input address {addr:#x} is outside the translation range of stream {sid:#x}")]
    TranslationForbidden { sid: u32, addr: u64 },

    #[error("external abort during table walk for stream {sid:#x} at {addr:#x}")]
    WalkExternalAbort { sid: u32, addr: u64 },

    #[error("table walk for stream {sid:#x} at {addr:#x} failed: {fault}")]
    Translation {
        sid: u32,
        addr: u64,
        fault: WalkFault,
    },

    #[error("illegal command opcode {opcode:#04x}")]
    IllegalCommand { opcode: u8 },
}

pub const EVT_BAD_STREAMID: u8 = 0x02;
pub const EVT_STE_FETCH: u8 = 0x03;
pub const EVT_BAD_STE: u8 = 0x04;
pub const EVT_TRANSL_FORBIDDEN: u8 = 0x07;
pub const EVT_CD_FETCH: u8 = 0x09;
pub const EVT_BAD_CD: u8 = 0x0a;
pub const EVT_WALK_EABT: u8 = 0x0b;
pub const EVT_TRANSLATION: u8 = 0x10;
pub const EVT_ADDR_SIZE: u8 = 0x11;
pub const EVT_ACCESS: u8 = 0x12;
pub const EVT_PERMISSION: u8 = 0x13;

impl SmmuError {
    /// Maps a walker fault onto the transaction error for `sid`/`addr`.
    pub fn from_walk(sid: u32, addr: u64, fault: WalkFault) -> Self {
        match fault {
            WalkFault::ExternalAbort { .. } => SmmuError::WalkExternalAbort { sid, addr },
            fault => SmmuError::Translation { sid, addr, fault },
        }
    }

    /// Architected event code, or `None` for errors that are not reported through the event
    /// queue.
    pub fn event_code(&self) -> Option<u8> {
        let code = match self {
            SmmuError::BadStreamId { .. } => EVT_BAD_STREAMID,
            SmmuError::BadStreamTableEntry { .. } => EVT_BAD_STE,
            SmmuError::BadContextDescriptor { .. } => EVT_BAD_CD,
            SmmuError::UnableToFetch { .. } => EVT_STE_FETCH,
            SmmuError::CdFetchFailed { .. } => EVT_CD_FETCH,
            SmmuError::TranslationForbidden { .. } => EVT_TRANSL_FORBIDDEN,
            SmmuError::WalkExternalAbort { .. } => EVT_WALK_EABT,
            SmmuError::Translation { fault, .. } => match fault {
                WalkFault::Translation { .. } => EVT_TRANSLATION,
                WalkFault::AddressSize { .. } => EVT_ADDR_SIZE,
                WalkFault::Access { .. } => EVT_ACCESS,
                WalkFault::Permission { .. } => EVT_PERMISSION,
                WalkFault::ExternalAbort { .. } => EVT_WALK_EABT,
            },
            SmmuError::IllegalCommand { .. } => return None,
        };
        Some(code)
    }

    pub fn stream_id(&self) -> Option<u32> {
        match *self {
            SmmuError::BadStreamId { sid }
            | SmmuError::BadStreamTableEntry { sid }
            | SmmuError::BadContextDescriptor { sid }
            | SmmuError::UnableToFetch { sid, .. }
            | SmmuError::CdFetchFailed { sid, .. }
            | SmmuError::TranslationForbidden { sid, .. }
            | SmmuError::WalkExternalAbort { sid, .. }
            | SmmuError::Translation { sid, .. } => Some(sid),
            SmmuError::IllegalCommand { .. } => None,
        }
    }

    /// Faulting input address, for the error classes whose event record carries one.
    pub fn fault_address(&self) -> Option<u64> {
        match *self {
            SmmuError::TranslationForbidden { addr, .. }
            | SmmuError::WalkExternalAbort { addr, .. }
            | SmmuError::Translation { addr, .. } => Some(addr),
            _ => None,
        }
    }
}

/// Command queue error latched into CMDQ_CONS.ERR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("illegal command")]
    Illegal,

    #[error("abort fetching command")]
    Abort,
}

impl CommandError {
    pub fn code(self) -> u8 {
        match self {
            CommandError::Illegal => 1,
            CommandError::Abort => 2,
        }
    }
}
