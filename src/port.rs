//! SysTick and PendSV plumbing
//!
//! Everything the scheduling core needs from the hardware lives behind this
//! module: programming the periodic tick and raising the deferred-switch
//! interrupt. The hosted build substitutes inert stand-ins so the core can
//! be driven by the unit tests.

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod cortex {
    use cortex_m::peripheral::scb::SystemHandler;
    use cortex_m::peripheral::syst::SystClkSource;
    use cortex_m::peripheral::{SCB, SYST};

    /// Lowest exception priority; only the implemented top bits stick.
    const PENDSV_PRIORITY: u8 = 0xff;

    const fn reload_count(period_us: u32, cpu_hz: u32) -> u32 {
        (period_us as u64 * cpu_hz as u64 / 1_000_000) as u32 - 1
    }

    /// Program the periodic tick source
    ///
    /// Consumes the SysTick peripheral, so nothing can reconfigure it behind
    /// the kernel's back, and demotes PendSV below every other exception so
    /// a pended switch only fires once all other handlers have drained.
    pub(crate) fn tick_init(mut syst: SYST, mut scb: SCB, period_us: u32, cpu_hz: u32) {
        unsafe {
            scb.set_priority(SystemHandler::PendSV, PENDSV_PRIORITY);
        }
        syst.set_clock_source(SystClkSource::Core);
        syst.set_reload(reload_count(period_us, cpu_hz));
        syst.clear_current();
        syst.enable_counter();
        syst.enable_interrupt();
    }

    /// Rearm the tick for the next period
    pub(crate) fn tick_rearm(period_us: u32, cpu_hz: u32) {
        // SAFETY: only called from the tick handler, which owns the SysTick
        // registers once `tick_init` has run.
        let syst = unsafe { &*SYST::PTR };
        unsafe {
            syst.rvr.write(reload_count(period_us, cpu_hz));
            syst.cvr.write(0);
        }
    }

    /// Request the deferred-switch interrupt
    pub(crate) fn pend_switch() {
        SCB::set_pendsv();
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
mod hosted {
    pub(crate) fn tick_rearm(_period_us: u32, _cpu_hz: u32) {}

    pub(crate) fn pend_switch() {}
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub(crate) use cortex::*;
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub(crate) use hosted::*;
