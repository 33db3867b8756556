//! Seam to the board's liveness blinker
//!
//! The kernel does not know how to drive a GPIO pin; the board crate
//! provides these two symbols and does whatever "blink" means for its
//! hardware, using the pass-through constants in [`crate::config`].

unsafe extern "C" {
    fn heartbeat_init();
    fn heartbeat_tick();
}

/// Let the board driver claim its pin, before the first tick can fire.
pub(crate) fn init() {
    // SAFETY: the board crate defines this symbol; it is only called once,
    // from `Kernel::start`.
    unsafe { heartbeat_init() }
}

/// Advance the blinker by one kernel tick.
pub(crate) fn tick() {
    // SAFETY: the board crate defines this symbol; it is called from the
    // tick handler only.
    unsafe { heartbeat_tick() }
}
