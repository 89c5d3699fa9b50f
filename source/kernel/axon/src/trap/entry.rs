// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trap entry: assembly vector, Rust landing point and one-time setup.

use alloc::boxed::Box;
use spin::Once;

use crate::arch::riscv;
use crate::board::{ActiveBoard, Board};
use crate::irq::ExternalInterrupt;

use super::{handle_interrupt, record, TrapFrame, TrapHooks};

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
core::arch::global_asm!(
    include_str!("../arch/riscv/trap.S"),
    FRAME_SIZE  = const core::mem::size_of::<TrapFrame>(),
    OFF_SEPC    = const 32 * 8,
    OFF_SSTATUS = const 33 * 8,
    OFF_SCAUSE  = const 34 * 8,
    OFF_STVAL   = const 35 * 8,
);

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
extern "C" {
    fn __axon_trap_vector();
}

fn trap_vector() -> usize {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        __axon_trap_vector as usize
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        0
    }
}

/// Everything the trap path needs, fixed once at boot.
struct InterruptState {
    hooks: &'static (dyn TrapHooks + Sync),
    external: Box<dyn ExternalInterrupt + Send + Sync>,
    board: &'static str,
}

static STATE: Once<InterruptState> = Once::new();

/// Installs the trap vector, enables supervisor external interrupts and
/// unmasks the UART receive interrupt on the active board.
///
/// Panics if called more than once.
pub fn init_interrupt(hooks: &'static (dyn TrapHooks + Sync)) {
    // SAFETY: the boot mapping covers the device windows at KERNEL_MAP_OFFSET
    // before interrupts are initialised, and the board is fixed at build time.
    let board = unsafe { ActiveBoard::mapped() };
    init_interrupt_with(&board, hooks);
}

/// [`init_interrupt`] against an explicit board.
pub fn init_interrupt_with<B>(board: &B, hooks: &'static (dyn TrapHooks + Sync))
where
    B: Board,
    B::Irq: Send + Sync + 'static,
{
    let mut installed = false;
    STATE.call_once(|| {
        installed = true;
        InterruptState {
            hooks,
            external: Box::new(board.external_irq()),
            board: B::NAME,
        }
    });
    if !installed {
        panic!("init_interrupt: already initialised");
    }

    riscv::set_trap_vector(trap_vector());
    riscv::enable_external_interrupts();
    board.init_external_interrupt();
    board.init_serial_interrupt();

    log_info!(target: "trap", "***** Init Interrupt *****");
    log_debug!(target: "trap", "board={} stvec={:#x}", B::NAME, trap_vector());
}

/// Board the trap path was initialised for, if any.
pub fn active_board_name() -> Option<&'static str> {
    STATE.get().map(|state| state.board)
}

/// Landing point of the assembly vector.
#[no_mangle]
extern "C" fn axon_handle_trap(frame: &mut TrapFrame, scause: usize, stval: usize) {
    dispatch(frame, scause, stval);
}

fn dispatch(frame: &mut TrapFrame, scause: usize, stval: usize) {
    frame.scause = scause;
    frame.stval = stval;
    record(frame);
    let Some(state) = STATE.get() else {
        panic!("trap before init_interrupt: scause={:#x} sepc={:#x}", scause, frame.sepc);
    };
    handle_interrupt(frame, scause, stval, state.hooks, &*state.external);
}
