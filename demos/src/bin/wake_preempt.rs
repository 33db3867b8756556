//! Priority preemption and suspend/activate hand-off
//!
//! A high-priority supervisor sleeps most of the time and preempts whatever
//! is running the moment its delay expires. A mid-priority worker parks
//! itself after every job and is poked back to life by the low-priority
//! keeper.

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicUsize, Ordering};

use perk::{Autostart, Kernel, TaskId};

use perk_demos as _;

static KERNEL: Kernel = Kernel::new();

/// The worker's handle, published by `main` for the keeper to use
static WORKER: AtomicUsize = AtomicUsize::new(usize::MAX);

#[cortex_m_rt::entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();
    defmt::info!("wake/preempt demo");
    KERNEL
        .create_task(supervisor, 3, Autostart::AutoStart)
        .unwrap();
    let worker_id = KERNEL
        .create_task(worker, 2, Autostart::StartSuspended)
        .unwrap();
    WORKER.store(worker_id.index(), Ordering::Relaxed);
    KERNEL.create_task(keeper, 1, Autostart::AutoStart).unwrap();
    KERNEL.start(cp.SYST, cp.SCB)
}

fn supervisor() -> ! {
    loop {
        perk::delay(5);
        defmt::info!("supervisor: five ticks elapsed");
    }
}

fn worker() -> ! {
    loop {
        defmt::info!("worker: job done, parking");
        perk::suspend();
    }
}

fn keeper() -> ! {
    loop {
        let worker = TaskId::from_index(WORKER.load(Ordering::Relaxed));
        defmt::info!("keeper: waking {}", worker);
        perk::activate(worker);
        perk::delay(3);
    }
}

// End of File
