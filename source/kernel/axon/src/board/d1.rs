// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Nezha D1 (Allwinner, C906): PLIC at 0x1000_0000, UART0 at 0x0250_0000 on
//! IRQ 18. UART registers are 32 bits wide with a 4-byte stride.

use crate::hal::{Mmio, MmioRegion};
use crate::irq::plic::{PlicUartIrq, PlicUartLayout};
use crate::mm::KERNEL_MAP_OFFSET;

use super::{
    plic_claim, plic_enable, plic_priority, plic_threshold, Board, PLIC_CONTEXT_M, PLIC_CONTEXT_S,
};

pub const PLIC_BASE: usize = 0x1000_0000;
pub const UART0_BASE: usize = 0x0250_0000;
pub const UART0_IRQ: u32 = 18;

const UART_RBR: usize = 0x00;
const UART_IER: usize = 0x04;
const UART_IIR: usize = 0x08;
const UART_LSR: usize = 0x14;
/// ERBFI: received data available interrupt.
const IER_ERBFI: u32 = 1 << 0;

pub const LAYOUT: PlicUartLayout = PlicUartLayout {
    claim: plic_claim(PLIC_CONTEXT_S),
    irq: UART0_IRQ,
    rbr: UART_RBR,
    iir: UART_IIR,
    lsr: UART_LSR,
};

pub struct NezhaD1<P = MmioRegion, U = MmioRegion> {
    plic: P,
    uart: U,
}

impl NezhaD1 {
    /// Devices at their kernel virtual addresses.
    ///
    /// # Safety
    ///
    /// The kernel mapping must cover both device windows at
    /// `KERNEL_MAP_OFFSET`, and the machine must be a D1.
    pub const unsafe fn mapped() -> Self {
        // SAFETY: forwarded caller contract.
        unsafe {
            Self::with_devices(
                MmioRegion::new(PLIC_BASE + KERNEL_MAP_OFFSET),
                MmioRegion::new(UART0_BASE + KERNEL_MAP_OFFSET),
            )
        }
    }
}

impl<P: Mmio, U: Mmio> NezhaD1<P, U> {
    pub const fn with_devices(plic: P, uart: U) -> Self {
        Self { plic, uart }
    }
}

impl<P: Mmio + Clone, U: Mmio + Clone> Board for NezhaD1<P, U> {
    type Irq = PlicUartIrq<P, U>;

    const NAME: &'static str = "nezha-d1";

    fn init_external_interrupt(&self) {
        self.plic.write32(plic_priority(UART0_IRQ), 1);
        self.plic.write32(plic_enable(PLIC_CONTEXT_S, UART0_IRQ), 1 << (UART0_IRQ % 32));
        self.plic.write32(plic_threshold(PLIC_CONTEXT_M), 0);
        self.plic.write32(plic_threshold(PLIC_CONTEXT_S), 0);
    }

    fn init_serial_interrupt(&self) {
        self.uart.write32(UART_IER, IER_ERBFI);
    }

    fn external_irq(&self) -> Self::Irq {
        PlicUartIrq::new(self.plic.clone(), self.uart.clone(), LAYOUT)
    }
}
