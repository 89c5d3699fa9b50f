// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! PLIC claim/complete backend draining a 16550-compatible UART.
//!
//! One interrupt is handled as: claim, check the id, read IIR until it reports
//! "no interrupt pending" (draining the RX FIFO while LSR.DR is set), then
//! complete with the claimed id.

use crate::hal::Mmio;

use super::{translate_input, ConsoleInput, ExternalInterrupt, IrqError};

/// IIR interrupt id field.
pub const IIR_ID_MASK: u32 = 0x0f;
pub const IIR_NO_INTERRUPT: u32 = 0x01;
pub const IIR_RX_AVAILABLE: u32 = 0x04;
pub const IIR_CHAR_TIMEOUT: u32 = 0x0c;
/// LSR "data ready".
pub const LSR_DATA_READY: u32 = 0x01;

/// Upper bound on IIR reads per interrupt; reasons other than RX are only
/// logged, so a stuck one must not keep the hart in the trap.
const MAX_IIR_ROUNDS: usize = 32;

/// Board wiring of the UART behind the PLIC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlicUartLayout {
    /// Offset of this hart's S-mode claim/complete register in the PLIC.
    pub claim: usize,
    /// PLIC source id of the UART.
    pub irq: u32,
    /// UART register offsets.
    pub rbr: usize,
    pub iir: usize,
    pub lsr: usize,
}

pub struct PlicUartIrq<P, U> {
    plic: P,
    uart: U,
    layout: PlicUartLayout,
}

impl<P: Mmio, U: Mmio> PlicUartIrq<P, U> {
    pub const fn new(plic: P, uart: U, layout: PlicUartLayout) -> Self {
        Self { plic, uart, layout }
    }

    fn drain_fifo(&self, console: &mut dyn ConsoleInput) {
        while self.uart.read32(self.layout.lsr) & LSR_DATA_READY != 0 {
            let byte = self.uart.read32(self.layout.rbr) as u8;
            console.push_char(translate_input(byte));
        }
    }

    fn service_uart(&self, console: &mut dyn ConsoleInput) {
        for _ in 0..MAX_IIR_ROUNDS {
            match self.uart.read32(self.layout.iir) & IIR_ID_MASK {
                IIR_RX_AVAILABLE | IIR_CHAR_TIMEOUT => self.drain_fifo(console),
                IIR_NO_INTERRUPT => return,
                other => log_warn!(target: "irq", "uart: unexpected IIR {:#x}", other),
            }
        }
        log_warn!(target: "irq", "uart: IIR still pending after {} reads", MAX_IIR_ROUNDS);
    }
}

impl<P: Mmio, U: Mmio> ExternalInterrupt for PlicUartIrq<P, U> {
    fn drain(&self, console: &mut dyn ConsoleInput) -> Result<(), IrqError> {
        let id = self.plic.read32(self.layout.claim);
        if id == 0 {
            // Nothing was pending when we claimed; there is nothing to complete.
            log_debug!(target: "irq", "plic: spurious claim");
            return Ok(());
        }
        if id != self.layout.irq {
            self.plic.write32(self.layout.claim, id);
            return Err(IrqError::UnknownSource(id));
        }
        self.service_uart(console);
        self.plic.write32(self.layout.claim, id);
        Ok(())
    }
}
