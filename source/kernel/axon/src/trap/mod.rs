// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Supervisor trap dispatch
//! OWNERS: @kernel-team
//! PUBLIC API: TrapFrame, TrapCause, TrapHooks, handle_interrupt(),
//!             record()/last_trap(), describe_cause(), fmt_trap(), init_interrupt()
//! DEPENDS_ON: irq::ExternalInterrupt, board (init), arch::riscv (CSRs)
//! INVARIANTS: Dispatcher mutates only x10..x12, x17 and sepc of the frame;
//!             unknown causes are fatal; no state kept across traps besides
//!             the diagnostic record

mod entry;

use core::fmt::{self, Write};
use spin::Mutex;

use crate::irq::{ConsoleInput, ExternalInterrupt, IrqError};

pub use entry::{active_board_name, init_interrupt, init_interrupt_with};

/// Saved register state for an S-mode trap.
/// Must match the save/restore layout of the entry stub.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// x0..x31 (x0 is always 0; we never write it).
    pub x: [usize; 32],
    pub sepc: usize,
    pub sstatus: usize,
    pub scause: usize,
    pub stval: usize,
}

static_assertions::const_assert_eq!(core::mem::size_of::<TrapFrame>(), 36 * 8);
static_assertions::const_assert_eq!(core::mem::size_of::<TrapFrame>() % 16, 0);

/// Argument and return registers of the syscall ABI.
pub const REG_A0: usize = 10;
pub const REG_A1: usize = 11;
pub const REG_A2: usize = 12;
/// Syscall number.
pub const REG_A7: usize = 17;

pub const INTERRUPT_FLAG: usize = 1 << (usize::BITS - 1);

pub const BREAKPOINT: usize = 3;
pub const USER_ENV_CALL: usize = 8;
pub const SUPERVISOR_TIMER: usize = INTERRUPT_FLAG | 5;
pub const SUPERVISOR_EXTERNAL: usize = INTERRUPT_FLAG | 9;

/// Length of `c.ebreak`.
pub const BREAKPOINT_INSN_LEN: usize = 2;
/// Length of `ecall`.
pub const ECALL_INSN_LEN: usize = 4;

/// The causes the dispatcher knows how to handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrapCause {
    Breakpoint,
    UserEnvCall,
    SupervisorTimer,
    SupervisorExternal,
    Other(usize),
}

impl TrapCause {
    pub const fn from_scause(scause: usize) -> Self {
        match scause {
            BREAKPOINT => TrapCause::Breakpoint,
            USER_ENV_CALL => TrapCause::UserEnvCall,
            SUPERVISOR_TIMER => TrapCause::SupervisorTimer,
            SUPERVISOR_EXTERNAL => TrapCause::SupervisorExternal,
            other => TrapCause::Other(other),
        }
    }
}

/// Kernel services the trap path calls into.
///
/// Hooks are shared: `tick` may switch to a thread that traps again before
/// the first trap returns, so every method takes `&self` and implementors
/// keep their state behind locks or atomics.
pub trait TrapHooks {
    /// Runs syscall `id`; the return value lands in a0.
    fn syscall(&self, id: usize, args: [usize; 3], frame: &mut TrapFrame) -> usize;
    /// Scheduler time-slice accounting. May switch away from the current thread.
    fn tick(&self);
    /// Per-CPU time accounting.
    fn tick_cpu(&self);
    /// Terminal input delivered by the external-interrupt backend.
    fn push_char(&self, ch: u8);
}

struct HookConsole<'a, H: ?Sized>(&'a H);

impl<H: TrapHooks + ?Sized> ConsoleInput for HookConsole<'_, H> {
    fn push_char(&mut self, ch: u8) {
        TrapHooks::push_char(self.0, ch);
    }
}

/// Handles one trap described by `scause`/`stval` against `frame`.
///
/// Returns when the interrupted context may be resumed. Causes other than
/// breakpoint, user ecall, supervisor timer and supervisor external halt the
/// kernel.
pub fn handle_interrupt<H, E>(
    frame: &mut TrapFrame,
    scause: usize,
    stval: usize,
    hooks: &H,
    external: &E,
) where
    H: TrapHooks + ?Sized,
    E: ExternalInterrupt + ?Sized,
{
    match TrapCause::from_scause(scause) {
        TrapCause::Breakpoint => breakpoint(frame),
        TrapCause::UserEnvCall => handle_syscall(frame, hooks),
        TrapCause::SupervisorTimer => {
            hooks.tick();
            hooks.tick_cpu();
        }
        TrapCause::SupervisorExternal => {
            if let Err(IrqError::UnknownSource(id)) = external.drain(&mut HookConsole(hooks)) {
                panic!("unknown external interrupt: claimed id {} sepc={:#x}", id, frame.sepc);
            }
        }
        TrapCause::Other(_) => fault(frame, scause, stval),
    }
}

fn breakpoint(frame: &mut TrapFrame) {
    log_info!(target: "trap", "Breakpoint at {:#x}", frame.sepc);
    frame.sepc += BREAKPOINT_INSN_LEN;
}

fn handle_syscall<H: TrapHooks + ?Sized>(frame: &mut TrapFrame, hooks: &H) {
    // Step past the ecall first so a syscall that never returns normally
    // still resumes after the call site.
    frame.sepc += ECALL_INSN_LEN;
    let id = frame.x[REG_A7];
    let args = [frame.x[REG_A0], frame.x[REG_A1], frame.x[REG_A2]];
    let ret = hooks.syscall(id, args, frame);
    frame.x[REG_A0] = ret;
}

fn fault(frame: &TrapFrame, scause: usize, stval: usize) -> ! {
    log_error!(
        target: "trap",
        "Unhandled interrupt! scause={:#x} ({}) sepc={:#x} stval={:#x}",
        scause,
        describe_cause(scause),
        frame.sepc,
        stval
    );
    panic!("Unhandled interrupt! scause={:#x} sepc={:#x} stval={:#x}", scause, frame.sepc, stval);
}

// Diagnostics

static LAST_TRAP: Mutex<Option<TrapFrame>> = Mutex::new(None);

#[cfg(feature = "trap_ring")]
const TRAP_RING_LEN: usize = 64;

#[cfg(feature = "trap_ring")]
struct TrapRing {
    frames: [Option<TrapFrame>; TRAP_RING_LEN],
    next: usize,
}

#[cfg(feature = "trap_ring")]
static TRAP_RING: Mutex<TrapRing> =
    Mutex::new(TrapRing { frames: [None; TRAP_RING_LEN], next: 0 });

pub fn record(frame: &TrapFrame) {
    *LAST_TRAP.lock() = Some(*frame);
    #[cfg(feature = "trap_ring")]
    {
        let mut ring = TRAP_RING.lock();
        let slot = ring.next;
        ring.frames[slot] = Some(*frame);
        ring.next = (slot + 1) % TRAP_RING_LEN;
    }
}

/// Most recently recorded trap; `None` if there was none or a record is in
/// progress (so the panic path never spins on the lock).
pub fn last_trap() -> Option<TrapFrame> {
    LAST_TRAP.try_lock().and_then(|last| *last)
}

/// Recorded traps, oldest first.
#[cfg(feature = "trap_ring")]
pub fn recent_traps() -> alloc::vec::Vec<TrapFrame> {
    let ring = TRAP_RING.lock();
    (0..TRAP_RING_LEN)
        .filter_map(|i| ring.frames[(ring.next + i) % TRAP_RING_LEN])
        .collect()
}

#[inline]
pub fn is_interrupt(scause: usize) -> bool {
    scause & INTERRUPT_FLAG != 0
}

pub fn describe_cause(scause: usize) -> &'static str {
    let code = scause & !INTERRUPT_FLAG;
    if is_interrupt(scause) {
        match code {
            1 => "SupervisorSoftInt",
            5 => "SupervisorTimerInt",
            9 => "SupervisorExternalInt",
            _ => "Interrupt",
        }
    } else {
        match code {
            0 => "InstructionAddressMisaligned",
            1 => "InstructionAccessFault",
            2 => "IllegalInstruction",
            3 => "Breakpoint",
            4 => "LoadAddressMisaligned",
            5 => "LoadAccessFault",
            6 => "StoreAMOAddressMisaligned",
            7 => "StoreAMOAccessFault",
            8 => "EnvironmentCallFromUMode",
            9 => "EnvironmentCallFromSMode",
            12 => "InstructionPageFault",
            13 => "LoadPageFault",
            15 => "StoreAMOPageFault",
            _ => "Exception",
        }
    }
}

pub fn fmt_trap<W: Write>(frame: &TrapFrame, f: &mut W) -> fmt::Result {
    writeln!(f, " sepc=0x{:016x}", frame.sepc)?;
    writeln!(f, " scause=0x{:016x} ({})", frame.scause, describe_cause(frame.scause))?;
    writeln!(f, " stval=0x{:016x}", frame.stval)?;
    writeln!(f, " a0..a7 = {:016x?}", &frame.x[10..=17])
}

/// Serializes tests that touch the process-wide trap record.
#[cfg(test)]
pub(crate) static TEST_GLOBALS: Mutex<()> = Mutex::new(());
