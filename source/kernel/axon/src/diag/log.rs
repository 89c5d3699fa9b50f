// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Minimal structured logging with severity levels
//! OWNERS: @kernel-team
//! PUBLIC API: log_* macros, emit(level,target,args)
//! DEPENDS_ON: console::KernelConsole (OS target); discarded on host builds
//! INVARIANTS: Debug/Trace only in debug builds; single-line emission

use core::fmt::Arguments;

/// Logging severity used by the kernel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    pub const fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    pub const fn enabled(self) -> bool {
        match self {
            Level::Debug | Level::Trace => cfg!(debug_assertions),
            _ => true,
        }
    }
}

/// Emits a structured log line if the level is enabled for the current build.
pub fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if !level.enabled() {
        return;
    }
    sink(level, target, args);
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn sink(level: Level, target: &'static str, args: Arguments<'_>) {
    use core::fmt::Write;

    let mut console = crate::console::KernelConsole::lock();
    let writer = &mut *console;
    let _ = writer.write_fmt(format_args!("[{} {}] ", level.tag(), target));
    let _ = writer.write_fmt(args);
    let _ = writer.write_char('\n');
}

// Host builds have no console device.
#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
fn sink(_level: Level, _target: &'static str, _args: Arguments<'_>) {}

#[macro_export]
macro_rules! log_error {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Error, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Error, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_warn {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Warn, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Warn, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_info {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Info, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Info, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_debug {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Debug, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Debug, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_trace {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Trace, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::log::emit($crate::diag::log::Level::Trace, module_path!(), format_args!($($arg)+));
    }};
}
