//! Compile-time kernel configuration
//!
//! These constants are fixed when the kernel is built. Storage for the task
//! table and every task stack is reserved from them, so changing a value here
//! resizes the kernel's static footprint.

/// Maximum number of user tasks.
///
/// The idle task does not count against this limit; it lives in a reserved
/// extra slot.
pub const MAX_TASKS: usize = 8;

/// Total TCB slots, including the one reserved for the idle task.
pub(crate) const TASK_SLOTS: usize = MAX_TASKS + 1;

/// Size of each task stack, in 32-bit words.
pub const STACK_WORDS: usize = 256;

/// Scheduler tick period, in microseconds.
pub const TICK_PERIOD_US: u32 = 1_000;

/// Core clock frequency, in Hertz, used to compute the tick reload value.
pub const CPU_CLOCK_HZ: u32 = 64_000_000;

/// How often the liveness blinker toggles, in microseconds.
///
/// Passed through to the board's heartbeat driver; the kernel itself only
/// calls the driver once per tick.
pub const IS_ALIVE_PERIOD_US: u32 = 500_000;

/// GPIO port the heartbeat driver should toggle.
pub const IS_ALIVE_PORT: usize = 0;

/// GPIO pin the heartbeat driver should toggle.
pub const IS_ALIVE_PIN: usize = 13;
