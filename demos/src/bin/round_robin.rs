//! Two equal-priority tasks trading the CPU once per tick

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]

use perk::{Autostart, Kernel};

use perk_demos as _;

static KERNEL: Kernel = Kernel::new();

#[cortex_m_rt::entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();
    defmt::info!("round-robin demo");
    KERNEL.create_task(ping, 2, Autostart::AutoStart).unwrap();
    KERNEL.create_task(pong, 2, Autostart::AutoStart).unwrap();
    KERNEL.start(cp.SYST, cp.SCB)
}

/// Runs first every tick, because it was created first
fn ping() -> ! {
    loop {
        defmt::info!("ping");
        perk::delay(1);
    }
}

/// Runs second every tick
fn pong() -> ! {
    loop {
        defmt::info!("pong");
        perk::delay(1);
    }
}

// End of File
