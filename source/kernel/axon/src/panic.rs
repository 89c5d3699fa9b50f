// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Panic handler; the kernel's single halt primitive
//! OWNERS: @kernel-team
//! PUBLIC API: panic handler (no_std, OS target only)
//! DEPENDS_ON: trap::last_trap(), console::raw_writer(), SBI system reset
//! INVARIANTS: No allocation; never returns; output goes through the lock-free writer

#[cfg(all(target_arch = "riscv64", target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    use core::fmt::Write;

    use crate::{console, trap};

    let mut w = console::raw_writer();
    let _ = w.write_str("\nPANIC: ");
    if let Some(location) = info.location() {
        let _ = write!(w, "{}:{}: ", location.file(), location.line());
    }
    let _ = writeln!(w, "{}", info.message());

    if let Some(frame) = trap::last_trap() {
        let _ = w.write_str("PANIC: last trap:\n");
        let _ = trap::fmt_trap(&frame, &mut w);
    }

    let _ = sbi_rt::system_reset(sbi_rt::Shutdown, sbi_rt::SystemFailure);
    loop {
        crate::arch::riscv::wait_for_interrupt();
    }
}
