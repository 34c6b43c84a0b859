//! GERROR/GERRORN latch and the SMMU interrupt lines.
//!
//! A source is pending while its GERROR bit differs from the matching GERRORN bit. Raising a
//! source toggles its GERROR bit (only if it is not already pending) and raises its line;
//! software acknowledges by toggling GERRORN to match, which lowers the line.

use std::fmt;

use tracing::trace;

use crate::regs::{Gerror, IrqCtrl};

/// Interrupt line sink.
pub trait IrqLine: Send {
    fn set_level(&self, level: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqSource {
    EventQueue,
    CommandSync,
    PriorityQueue,
}

impl IrqSource {
    pub const ALL: [IrqSource; 3] = [
        IrqSource::EventQueue,
        IrqSource::CommandSync,
        IrqSource::PriorityQueue,
    ];

    fn index(self) -> usize {
        match self {
            IrqSource::EventQueue => 0,
            IrqSource::CommandSync => 1,
            IrqSource::PriorityQueue => 2,
        }
    }

    pub fn gerror_bit(self) -> Gerror {
        match self {
            IrqSource::EventQueue => Gerror::EVENTQ,
            IrqSource::CommandSync => Gerror::CMDQ_ERR,
            IrqSource::PriorityQueue => Gerror::PRIQ,
        }
    }

    /// Source-specific enable in IRQ_CTRL, on top of GERROR_IRQEN.
    fn enable_bit(self) -> IrqCtrl {
        match self {
            IrqSource::EventQueue => IrqCtrl::EVENTQ_IRQEN,
            IrqSource::CommandSync => IrqCtrl::empty(),
            IrqSource::PriorityQueue => IrqCtrl::PRIQ_IRQEN,
        }
    }
}

#[derive(Default)]
pub struct InterruptCoordinator {
    gerror: u32,
    gerrorn: u32,
    levels: [bool; 3],
    sinks: [Option<Box<dyn IrqLine>>; 3],
}

impl fmt::Debug for InterruptCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptCoordinator")
            .field("gerror", &format_args!("{:#x}", self.gerror))
            .field("gerrorn", &format_args!("{:#x}", self.gerrorn))
            .field("levels", &self.levels)
            .finish()
    }
}

impl InterruptCoordinator {
    pub fn connect(&mut self, source: IrqSource, line: Box<dyn IrqLine>) {
        line.set_level(self.levels[source.index()]);
        self.sinks[source.index()] = Some(line);
    }

    pub fn gerror(&self) -> u32 {
        self.gerror
    }

    pub fn gerrorn(&self) -> u32 {
        self.gerrorn
    }

    pub fn level(&self, source: IrqSource) -> bool {
        self.levels[source.index()]
    }

    pub fn is_pending(&self, source: IrqSource) -> bool {
        (self.gerror ^ self.gerrorn) & source.gerror_bit().bits() != 0
    }

    fn set_level(&mut self, source: IrqSource, level: bool) {
        let idx = source.index();
        if self.levels[idx] == level {
            return;
        }
        self.levels[idx] = level;
        trace!(?source, level, "irq line");
        if let Some(sink) = &self.sinks[idx] {
            sink.set_level(level);
        }
    }

    /// Raises `source` if interrupts for it are enabled in `irq_ctrl`.
    ///
    /// Returns whether the source was raised.
    pub fn raise(&mut self, source: IrqSource, irq_ctrl: IrqCtrl) -> bool {
        if !irq_ctrl.contains(IrqCtrl::GERROR_IRQEN | source.enable_bit()) {
            return false;
        }
        if !self.is_pending(source) {
            self.gerror ^= source.gerror_bit().bits();
        }
        self.set_level(source, true);
        true
    }

    pub fn lower(&mut self, source: IrqSource) {
        self.set_level(source, false);
    }

    /// Handles a software write to GERRORN.
    ///
    /// Returns the sources acknowledged by this write.
    pub fn write_gerrorn(&mut self, val: u32) -> Gerror {
        let pending_before = self.gerror ^ self.gerrorn;
        let pending_after = self.gerror ^ val;
        self.gerrorn = val;

        let acked = Gerror::from_bits_truncate(pending_before & !pending_after);
        for source in IrqSource::ALL {
            if acked.contains(source.gerror_bit()) {
                self.lower(source);
            }
        }
        acked
    }

    pub fn reset(&mut self) {
        self.gerror = 0;
        self.gerrorn = 0;
        for source in IrqSource::ALL {
            self.lower(source);
        }
    }
}
