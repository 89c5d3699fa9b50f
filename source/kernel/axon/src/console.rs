// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel text output through the SBI firmware console.

use core::fmt::{self, Write};
use spin::Mutex;

/// Global console writer used for kernel logs.
static CONSOLE: Mutex<KernelConsole> = Mutex::new(KernelConsole::new());

/// Console implementation capable of formatted writes.
pub struct KernelConsole {
    bytes_written: usize,
}

impl KernelConsole {
    pub const fn new() -> Self {
        Self { bytes_written: 0 }
    }

    /// Returns a guard for the console singleton.
    pub fn lock() -> spin::MutexGuard<'static, KernelConsole> {
        CONSOLE.lock()
    }

    /// Total bytes pushed to the firmware since boot, CR expansion included.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

impl Default for KernelConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for KernelConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut count = 0;
        expand_newlines(s, |byte| {
            putchar(byte);
            count += 1;
        });
        self.bytes_written += count;
        Ok(())
    }
}

/// Lock-free writer for trap and panic contexts where the mutex may be held.
pub struct RawConsole;

impl Write for RawConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        expand_newlines(s, putchar);
        Ok(())
    }
}

pub fn raw_writer() -> RawConsole {
    RawConsole
}

/// Writes the provided string via the global console.
pub fn write_str(message: &str) {
    let mut console = KernelConsole::lock();
    let _ = console.write_str(message);
}

/// Writes a line terminated by `\n` to the console.
pub fn write_line(message: &str) {
    write_str(message);
    write_str("\n");
}

/// Feeds `s` to `put`, emitting `\r` before every `\n`.
fn expand_newlines(s: &str, mut put: impl FnMut(u8)) {
    for &byte in s.as_bytes() {
        if byte == b'\n' {
            put(b'\r');
        }
        put(byte);
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[inline]
fn putchar(byte: u8) {
    #[allow(deprecated)]
    sbi_rt::legacy::console_putchar(byte as usize);
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
#[inline]
fn putchar(_byte: u8) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newline_expands_to_crlf() {
        let mut out = Vec::new();
        expand_newlines("a\nb", |b| out.push(b));
        assert_eq!(out, b"a\r\nb");
    }

    #[test]
    fn console_counts_expanded_bytes() {
        let mut console = KernelConsole::new();
        console.write_str("hi\n").unwrap();
        assert_eq!(console.bytes_written(), 4);
    }

    #[test]
    fn write_line_goes_through_the_global_console() {
        let before = KernelConsole::lock().bytes_written();
        write_str("boot");
        write_line(" ok");
        assert_eq!(KernelConsole::lock().bytes_written() - before, 4 + 3 + 2);
    }
}
