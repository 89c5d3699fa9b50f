// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! RISC-V supervisor CSR helpers.
//!
//! Host builds compile these to no-ops so the trap and memory logic above
//! them can be exercised by unit tests.

/// Points `stvec` at `entry` in direct mode and marks the hart as running
/// in S-mode (`sscratch = 0`) for the entry stub.
#[inline]
pub fn set_trap_vector(entry: usize) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        use riscv::register::stvec::{self, TrapMode};
        riscv::register::sscratch::write(0);
        stvec::write(entry, TrapMode::Direct);
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        let _ = entry;
    }
}

/// Sets `sie.SEIE` so supervisor external interrupts are delivered.
#[inline]
pub fn enable_external_interrupts() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        riscv::register::sie::set_sext();
    }
}

/// Installs `satp` and flushes every cached translation.
#[inline]
pub fn write_satp(satp: usize) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        core::arch::asm!(
            "csrw satp, {0}",
            "sfence.vma x0, x0",
            in(reg) satp,
            options(nostack)
        );
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        let _ = satp;
    }
}

/// Issues a WFI instruction or yields on the host.
#[cfg_attr(not(all(target_arch = "riscv64", target_os = "none")), allow(dead_code))]
#[inline]
pub fn wait_for_interrupt() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        core::arch::asm!("wfi", options(nomem, nostack, preserves_flags));
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        core::hint::spin_loop();
    }
}
