//! Command queue decoding and consumption.

use tracing::{debug, trace, warn};

use crate::error::{CommandError, SmmuError};
use crate::memory::MemoryBus;
use crate::queue::Queue;

pub const CMD_SIZE: usize = 16;

/// Architected command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    PrefetchConfig = 0x01,
    PrefetchAddr = 0x02,
    CfgiSte = 0x03,
    CfgiSteRange = 0x04,
    CfgiCd = 0x05,
    CfgiCdAll = 0x06,
    TlbiNhAll = 0x10,
    TlbiNhAsid = 0x11,
    TlbiNhVa = 0x12,
    TlbiNhVaa = 0x13,
    TlbiEl3All = 0x18,
    TlbiEl3Va = 0x1a,
    TlbiEl2All = 0x20,
    TlbiEl2Asid = 0x21,
    TlbiEl2Va = 0x22,
    TlbiEl2Vaa = 0x23,
    TlbiS12Vmall = 0x28,
    TlbiS2Ipa = 0x2a,
    TlbiNsnhAll = 0x30,
    AtcInv = 0x40,
    PriResp = 0x41,
    Resume = 0x44,
    StallTerm = 0x45,
    Sync = 0x46,
}

impl Opcode {
    pub const ALL: [Opcode; 24] = [
        Opcode::PrefetchConfig,
        Opcode::PrefetchAddr,
        Opcode::CfgiSte,
        Opcode::CfgiSteRange,
        Opcode::CfgiCd,
        Opcode::CfgiCdAll,
        Opcode::TlbiNhAll,
        Opcode::TlbiNhAsid,
        Opcode::TlbiNhVa,
        Opcode::TlbiNhVaa,
        Opcode::TlbiEl3All,
        Opcode::TlbiEl3Va,
        Opcode::TlbiEl2All,
        Opcode::TlbiEl2Asid,
        Opcode::TlbiEl2Va,
        Opcode::TlbiEl2Vaa,
        Opcode::TlbiS12Vmall,
        Opcode::TlbiS2Ipa,
        Opcode::TlbiNsnhAll,
        Opcode::AtcInv,
        Opcode::PriResp,
        Opcode::Resume,
        Opcode::StallTerm,
        Opcode::Sync,
    ];

    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| *op as u8 == raw)
    }

    /// What the consumer does with a command of this type.
    ///
    /// Nothing is cached, so every invalidation and prefetch is a no-op.
    pub fn action(self) -> CommandAction {
        match self {
            Opcode::Sync => CommandAction::Sync,
            Opcode::PrefetchConfig
            | Opcode::PrefetchAddr
            | Opcode::CfgiSte
            | Opcode::CfgiSteRange
            | Opcode::CfgiCd
            | Opcode::CfgiCdAll
            | Opcode::TlbiNhAll
            | Opcode::TlbiNhAsid
            | Opcode::TlbiNhVa
            | Opcode::TlbiNhVaa
            | Opcode::TlbiEl3All
            | Opcode::TlbiEl3Va
            | Opcode::TlbiEl2All
            | Opcode::TlbiEl2Asid
            | Opcode::TlbiEl2Va
            | Opcode::TlbiEl2Vaa
            | Opcode::TlbiS12Vmall
            | Opcode::TlbiS2Ipa
            | Opcode::TlbiNsnhAll
            | Opcode::AtcInv
            | Opcode::PriResp
            | Opcode::Resume
            | Opcode::StallTerm => CommandAction::Acknowledge,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    Acknowledge,
    Sync,
}

/// CMD_SYNC completion signal (CS field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncSignal {
    pub irq: bool,
    pub sev: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub opcode: Opcode,
    pub words: [u64; 2],
}

impl Command {
    pub fn decode(bytes: &[u8; CMD_SIZE]) -> Result<Self, SmmuError> {
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&bytes[..8]);
        hi.copy_from_slice(&bytes[8..]);
        let words = [u64::from_le_bytes(lo), u64::from_le_bytes(hi)];
        let raw = bytes[0];
        let opcode = Opcode::from_raw(raw).ok_or(SmmuError::IllegalCommand { opcode: raw })?;
        Ok(Self { opcode, words })
    }

    pub fn sync_signal(&self) -> SyncSignal {
        let cs = (self.words[0] >> 12) & 0b11;
        SyncSignal {
            irq: cs & 0b01 != 0,
            sev: cs & 0b10 != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsumerState {
    #[default]
    Idle,
    Draining,
    Halted(CommandError),
}

/// Command queue consumer state machine.
#[derive(Debug, Default)]
pub struct CommandConsumer {
    state: ConsumerState,
}

impl CommandConsumer {
    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.state, ConsumerState::Halted(_))
    }

    /// Clears a halt after software acknowledged the command queue error.
    pub fn acknowledge(&mut self) {
        if self.is_halted() {
            self.state = ConsumerState::Idle;
        }
    }

    pub fn reset(&mut self) {
        self.state = ConsumerState::Idle;
    }

    /// Consumes commands until the queue is empty or a command fails.
    ///
    /// At most `capacity` entries are consumed per call. On error the consumer index is left
    /// pointing at the offending command and the consumer halts. Returns the number of commands
    /// processed.
    pub fn drain(
        &mut self,
        queue: &mut Queue,
        mem: &dyn MemoryBus,
        mut on_sync: impl FnMut(SyncSignal),
    ) -> u32 {
        if self.is_halted() {
            return 0;
        }
        self.state = ConsumerState::Draining;

        let mut processed = 0;
        let mut buf = [0u8; CMD_SIZE];
        while processed < queue.capacity() && !queue.is_empty() {
            if let Err(err) = queue.peek(mem, &mut buf) {
                warn!(cons = queue.cons(), %err, "command fetch failed");
                self.state = ConsumerState::Halted(CommandError::Abort);
                return processed;
            }
            let cmd = match Command::decode(&buf) {
                Ok(cmd) => cmd,
                Err(err) => {
                    warn!(cons = queue.cons(), %err, "illegal command");
                    self.state = ConsumerState::Halted(CommandError::Illegal);
                    return processed;
                }
            };

            match cmd.opcode.action() {
                CommandAction::Sync => {
                    let signal = cmd.sync_signal();
                    trace!(?signal, "CMD_SYNC");
                    on_sync(signal);
                }
                CommandAction::Acknowledge => {
                    debug!(opcode = ?cmd.opcode, "command acknowledged without action");
                }
            }
            queue.advance_consumer();
            processed += 1;
        }

        self.state = ConsumerState::Idle;
        processed
    }
}
