//! Common panic/fault/heartbeat handlers for the demos

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use defmt_semihosting as _;
use perk::config;

/// Called when a panic occurs.
///
/// Logs the panic to defmt and then crashes the CPU.
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    defmt::println!("PANIC: {}", defmt::Debug2Format(info));
    cortex_m::asm::udf();
}

/// Called when a HardFault occurs.
///
/// Logs the fault to defmt and then crashes the CPU.
#[cortex_m_rt::exception]
unsafe fn HardFault(info: &cortex_m_rt::ExceptionFrame) -> ! {
    defmt::println!("FAULT: {}", defmt::Debug2Format(info));
    cortex_m::asm::udf();
}

// Log kernel ticks and the running task in the defmt logs
defmt::timestamp!("{=u32:010} {}", perk::now(), perk::task_id());

/// How many kernel ticks pass between heartbeat toggles
const TICKS_PER_TOGGLE: u32 = config::IS_ALIVE_PERIOD_US / config::TICK_PERIOD_US;

static HEARTBEAT_TICKS: AtomicU32 = AtomicU32::new(0);
static HEARTBEAT_LEVEL: AtomicBool = AtomicBool::new(false);

/// The kernel calls this once at start when its `is-alive` feature is on.
///
/// A board port would configure its LED pin here; these demos only log.
#[unsafe(no_mangle)]
extern "C" fn heartbeat_init() {
    defmt::info!(
        "heartbeat on port {=usize} pin {=usize}",
        config::IS_ALIVE_PORT,
        config::IS_ALIVE_PIN
    );
}

/// The kernel calls this once per tick when its `is-alive` feature is on.
#[unsafe(no_mangle)]
extern "C" fn heartbeat_tick() {
    let elapsed = HEARTBEAT_TICKS.load(Ordering::Relaxed) + 1;
    if elapsed >= TICKS_PER_TOGGLE {
        HEARTBEAT_TICKS.store(0, Ordering::Relaxed);
        let level = !HEARTBEAT_LEVEL.load(Ordering::Relaxed);
        HEARTBEAT_LEVEL.store(level, Ordering::Relaxed);
        // a board port would write the GPIO pin here
        defmt::info!("heartbeat {=bool}", level);
    } else {
        HEARTBEAT_TICKS.store(elapsed, Ordering::Relaxed);
    }
}

// End of File
