// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Board register maps and interrupt bring-up
//! OWNERS: @kernel-arch-team
//! PUBLIC API: Board, ActiveBoard, qemu::QemuVirt, d1::NezhaD1
//! DEPENDS_ON: hal::Mmio, irq backends
//! INVARIANTS: Init unmasks exactly the UART receive interrupt; the board is
//!             fixed at build time by cargo feature

pub mod d1;
pub mod qemu;

use crate::irq::ExternalInterrupt;

/// A supported machine: where its devices live and how input reaches us.
pub trait Board {
    /// Backend the trap dispatcher calls on supervisor external interrupts.
    type Irq: ExternalInterrupt;

    const NAME: &'static str;

    /// Enables the UART source in the PLIC for this hart's S-mode context.
    fn init_external_interrupt(&self);

    /// Enables the UART's receive-data interrupt.
    fn init_serial_interrupt(&self);

    fn external_irq(&self) -> Self::Irq;
}

/// Board selected by cargo feature; `board-d1` takes precedence over the
/// default `board-qemu`.
#[cfg(feature = "board-d1")]
pub type ActiveBoard = d1::NezhaD1;
#[cfg(not(feature = "board-d1"))]
pub type ActiveBoard = qemu::QemuVirt;

/// Offset in a PLIC of source `irq`'s priority register.
pub const fn plic_priority(irq: u32) -> usize {
    irq as usize * 4
}

/// Offset in a PLIC of the enable word holding `irq` for `context`.
pub const fn plic_enable(context: usize, irq: u32) -> usize {
    0x2000 + context * 0x80 + (irq as usize / 32) * 4
}

/// Offset in a PLIC of `context`'s priority threshold.
pub const fn plic_threshold(context: usize) -> usize {
    0x20_0000 + context * 0x1000
}

/// Offset in a PLIC of `context`'s claim/complete register.
pub const fn plic_claim(context: usize) -> usize {
    plic_threshold(context) + 4
}

/// PLIC context of hart 0 in machine mode.
pub const PLIC_CONTEXT_M: usize = 0;
/// PLIC context of hart 0 in supervisor mode.
pub const PLIC_CONTEXT_S: usize = 1;
