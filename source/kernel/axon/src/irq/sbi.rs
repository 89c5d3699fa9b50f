// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Firmware-console backend: one SBI `console_getchar` per interrupt.

use super::{translate_input, ConsoleInput, ExternalInterrupt, IrqError};

/// Byte source provided by the supervisor execution environment.
pub trait FirmwareConsole {
    /// Next pending byte, or `None` when the firmware has nothing to deliver.
    fn getchar(&self) -> Option<u8>;
}

/// The real SBI legacy console.
#[derive(Clone, Copy, Debug, Default)]
pub struct SbiFirmware;

impl FirmwareConsole for SbiFirmware {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    fn getchar(&self) -> Option<u8> {
        #[allow(deprecated)]
        let raw = sbi_rt::legacy::console_getchar();
        // The legacy call returns -1 when nothing is pending.
        if raw == usize::MAX {
            None
        } else {
            Some(raw as u8)
        }
    }

    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    fn getchar(&self) -> Option<u8> {
        None
    }
}

/// External interrupt backend that lets the firmware own the UART.
#[derive(Clone, Copy, Debug, Default)]
pub struct SbiConsoleIrq<F = SbiFirmware> {
    firmware: F,
}

impl<F: FirmwareConsole> SbiConsoleIrq<F> {
    pub const fn new(firmware: F) -> Self {
        Self { firmware }
    }
}

impl<F: FirmwareConsole> ExternalInterrupt for SbiConsoleIrq<F> {
    fn drain(&self, console: &mut dyn ConsoleInput) -> Result<(), IrqError> {
        if let Some(byte) = self.firmware.getchar() {
            console.push_char(translate_input(byte));
        }
        Ok(())
    }
}
