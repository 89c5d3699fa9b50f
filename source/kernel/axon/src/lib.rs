// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: AXON kernel core: trap dispatch and Sv39 virtual memory
//! OWNERS: @kernel-team
//! PUBLIC API: mm (page tables, mappings, walker), trap (dispatcher, init),
//!             irq (external interrupt backends), board, hal, console
//! DEPENDS_ON: riscv CSRs, SBI firmware (OS target only)
//! INVARIANTS: Host builds never touch CSRs or MMIO; all such code is gated on
//!             `all(target_arch = "riscv64", target_os = "none")`

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

extern crate alloc;

#[macro_use]
pub mod diag;

mod arch;
pub mod board;
pub mod console;
pub mod hal;
pub mod irq;
pub mod mm;
mod panic;
pub mod trap;

use linked_list_allocator::LockedHeap;

/// Kernel heap backing `alloc` (page-table bookkeeping, frame lists).
#[cfg_attr(all(target_arch = "riscv64", target_os = "none"), global_allocator)]
static HEAP: LockedHeap = LockedHeap::empty();

/// Hands `[start, start + size)` to the kernel heap.
///
/// # Safety
///
/// Must be called once, before the first allocation, with a writable region
/// that nothing else uses for the lifetime of the kernel.
pub unsafe fn init_heap(start: usize, size: usize) {
    // SAFETY: forwarded caller contract.
    unsafe { HEAP.lock().init(start as *mut u8, size) };
    log_info!(target: "mm", "heap: {:#x}..{:#x}", start, start + size);
}
