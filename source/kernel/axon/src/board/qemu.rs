// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! QEMU `virt`: PLIC at 0x0c00_0000, NS16550A at 0x1000_0000 on IRQ 10.
//!
//! Input is read through the SBI console, so the PLIC is only programmed to
//! deliver the UART interrupt to S-mode.

use crate::hal::{Mmio, MmioRegion};
use crate::irq::SbiConsoleIrq;
use crate::mm::KERNEL_MAP_OFFSET;

use super::{plic_enable, plic_priority, plic_threshold, Board, PLIC_CONTEXT_S};

pub const PLIC_BASE: usize = 0x0c00_0000;
pub const UART0_BASE: usize = 0x1000_0000;
pub const UART0_IRQ: u32 = 10;

const UART_PRIORITY: u32 = 7;

// Byte-wide 16550 registers.
const UART_IER: usize = 0x1;
const UART_MCR: usize = 0x4;
const IER_RX_AVAILABLE: u8 = 0x01;
/// DTR | RTS | OUT2; OUT2 gates the interrupt line on a 16550.
const MCR_DTR_RTS_OUT2: u8 = 0x0b;

pub struct QemuVirt<P = MmioRegion, U = MmioRegion> {
    plic: P,
    uart: U,
}

impl QemuVirt {
    /// Devices at their kernel virtual addresses.
    ///
    /// # Safety
    ///
    /// The kernel mapping must cover both device windows at
    /// `KERNEL_MAP_OFFSET`, and the machine must be QEMU `virt`.
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

impl<P: Mmio, U: Mmio> QemuVirt<P, U> {
    pub const fn with_devices(plic: P, uart: U) -> Self {
        Self { plic, uart }
    }
}

impl<P: Mmio, U: Mmio> Board for QemuVirt<P, U> {
    type Irq = SbiConsoleIrq;

    const NAME: &'static str = "qemu-virt";

    fn init_external_interrupt(&self) {
        self.plic.write32(plic_enable(PLIC_CONTEXT_S, UART0_IRQ), 1 << UART0_IRQ);
        self.plic.write32(plic_priority(UART0_IRQ), UART_PRIORITY);
        self.plic.write32(plic_threshold(PLIC_CONTEXT_S), 0);
    }

    fn init_serial_interrupt(&self) {
        self.uart.write8(UART_IER, IER_RX_AVAILABLE);
        self.uart.write8(UART_MCR, MCR_DTR_RTS_OUT2);
    }

    fn external_irq(&self) -> SbiConsoleIrq {
        SbiConsoleIrq::default()
    }
}
