// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: External interrupt backends feeding console input
//! OWNERS: @kernel-arch-team
//! PUBLIC API: ConsoleInput, ExternalInterrupt, IrqError, translate_input()
//! DEPENDS_ON: hal::Mmio (PLIC variant), SBI legacy console (firmware variant)
//! INVARIANTS: Every backend pushes bytes in arrival order with CR mapped to LF;
//!             the trap dispatcher only sees the ExternalInterrupt trait

pub mod plic;
pub mod sbi;

pub use plic::PlicUartIrq;
pub use sbi::{FirmwareConsole, SbiConsoleIrq, SbiFirmware};

/// Console input buffer owned by the terminal layer.
pub trait ConsoleInput {
    fn push_char(&mut self, ch: u8);
}

/// Errors reported by an external interrupt backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqError {
    /// The controller handed out an interrupt id nobody unmasked.
    UnknownSource(u32),
}

/// "Drain pending input" capability of the compiled-in board.
pub trait ExternalInterrupt {
    /// Handles one supervisor external interrupt, pushing every received byte
    /// into `console`.
    fn drain(&self, console: &mut dyn ConsoleInput) -> Result<(), IrqError>;
}

/// Terminal line discipline applied to every received byte.
#[inline]
pub const fn translate_input(byte: u8) -> u8 {
    if byte == b'\r' {
        b'\n'
    } else {
        byte
    }
}
