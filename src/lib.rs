//! A pre-emptive, fixed-priority real-time kernel for Arm Cortex-M
//!
//! `perk` schedules a small, statically-sized set of tasks on a single core.
//! The highest-priority runnable task always owns the CPU; equal priorities
//! resolve to the task created first. A periodic SysTick drives the clock
//! and the delay engine, and the actual register swap happens in PendSV, the
//! lowest-priority exception, so a switch never tears a handler in half.
//!
//! Tasks park themselves with [`delay`] (where `delay(0)` is a plain yield)
//! or [`suspend`], and wake each other with [`activate`]. A built-in idle
//! task sleeps the core whenever nothing else is runnable. All storage -
//! the task table and every task stack - is reserved at compile time from
//! the constants in [`config`]; the kernel never allocates.
//!
//! ```ignore
//! use perk::{Autostart, Kernel};
//!
//! static KERNEL: Kernel = Kernel::new();
//!
//! #[cortex_m_rt::entry]
//! fn main() -> ! {
//!     let cp = cortex_m::Peripherals::take().unwrap();
//!     KERNEL.create_task(blink, 2, Autostart::AutoStart).unwrap();
//!     KERNEL.start(cp.SYST, cp.SCB)
//! }
//!
//! fn blink() -> ! {
//!     loop {
//!         // ... drive some hardware ...
//!         perk::delay(10);
//!     }
//! }
//! ```
//!
//! # Features
//!
//! * `defmt` - log kernel activity through `defmt`
//! * `is-alive` - call the board's `heartbeat_init`/`heartbeat_tick` symbols
//!   so a GPIO blinker can show the tick is still running

#![cfg_attr(not(test), no_std)]

mod arch;
pub mod config;
mod kernel;
mod port;
mod stack;
mod stack_pusher;
mod tcb;

#[cfg(feature = "is-alive")]
mod heartbeat;

pub use kernel::{Kernel, TaskId};
pub use stack::Stack;
pub use tcb::{Autostart, TaskEntryFn, TaskState};

/// Number of elapsed scheduler ticks.
pub type TickCount = u32;

/// Park the calling task for at least the given number of ticks
///
/// `delay(0)` gives up the rest of the current tick and resumes on the next
/// one. Does nothing before the scheduler has started; calling it from an
/// interrupt handler is not supported.
pub fn delay(ticks: TickCount) {
    if let Some(kernel) = kernel::installed() {
        kernel.delay(ticks);
    }
}

/// Park the calling task until another task activates it
pub fn suspend() {
    if let Some(kernel) = kernel::installed() {
        kernel.suspend();
    }
}

/// Make a suspended or waiting task ready to run
///
/// If the activated task outranks the caller, the switch happens before this
/// returns.
pub fn activate(task: TaskId) {
    if let Some(kernel) = kernel::installed() {
        kernel.activate(task);
    }
}

/// Get the current time in ticks
pub fn now() -> TickCount {
    if let Some(kernel) = kernel::installed() {
        kernel.now()
    } else {
        0xFFFFFFFF
    }
}

/// Get the Task ID of the currently running task
pub fn task_id() -> TaskId {
    if let Some(kernel) = kernel::installed() {
        kernel.current_task_id()
    } else {
        TaskId::invalid()
    }
}

/// SysTick Handler
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[unsafe(no_mangle)]
extern "C" fn SysTick() {
    if let Some(kernel) = kernel::installed() {
        kernel.tick();
    }
}
