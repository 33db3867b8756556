//! Contains the [`Kernel`] type

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicUsize, Ordering};

use crate::TickCount;
use crate::config;
use crate::port;
use crate::stack::TaskStack;
use crate::tcb::{Autostart, TaskEntryFn, TaskState, Tcb};

/// The location of our one and only [`Kernel`] object.
///
/// We need this so that the free-standing SysTick and PendSV handlers know
/// where all our system state is.
pub(crate) static KERNEL_PTR: AtomicPtr<Kernel> = AtomicPtr::new(core::ptr::null_mut());

/// Represents a task the kernel manages
///
/// Handles are small table indices, assigned in creation order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TaskId(usize);

impl TaskId {
    /// Represents the Task ID we produce when the scheduler isn't running
    const INVALID_ID: usize = usize::MAX;

    /// Is this the invalid Task ID?
    pub const fn is_invalid(self) -> bool {
        self.0 == Self::INVALID_ID
    }

    /// Create an invalid Task ID
    pub(crate) const fn invalid() -> TaskId {
        TaskId(Self::INVALID_ID)
    }

    /// Make a Task ID from a raw table index
    ///
    /// Kernel operations ignore handles that do not name a created task.
    pub const fn from_index(index: usize) -> TaskId {
        TaskId(index)
    }

    /// Get the raw table index behind this handle
    pub const fn index(self) -> usize {
        self.0
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TaskId {
    fn format(&self, fmt: defmt::Formatter) {
        if self.is_invalid() {
            defmt::write!(fmt, "T---");
        } else {
            defmt::write!(fmt, "T{=usize:03}", self.0);
        }
    }
}

impl core::fmt::Display for TaskId {
    fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_invalid() {
            write!(fmt, "T---")
        } else {
            write!(fmt, "T{:03}", self.0)
        }
    }
}

/// A pre-emptive, fixed-priority scheduler and its task table
///
/// Tasks are created before [`Kernel::start`]; after that the set is fixed.
/// The highest-priority runnable task always runs; equal priorities resolve
/// to the lowest table index. Tasks leave the CPU by [`crate::delay`],
/// [`crate::suspend`], or by being out-prioritized when a tick wakes
/// somebody more important.
///
/// The Arm hardware will push {xPSR, PC, LR, R12, R3, R2, R1, R0} to PSP
/// when an exception occurs. The PendSV handler pushes the rest (R11 to R4)
/// and swaps PSP; the first three fields of this struct are the words that
/// handler reads, so they must stay in this order.
#[repr(C)]
pub struct Kernel {
    /// Which task is currently running
    current_task: AtomicUsize,
    /// Which task should PendSV switch to next
    next_task: AtomicUsize,
    /// Where the TCB table lives; set once at start
    tcb_list: AtomicPtr<Tcb>,
    /// How many tasks have been created, idle included once started
    task_count: AtomicUsize,
    /// Current tick count
    ticks: AtomicU32,
    /// Goes high exactly once; creation is refused afterwards
    started: AtomicBool,
    /// A fixed table of task control blocks
    tcbs: [Tcb; config::TASK_SLOTS],
    /// One private stack region per table slot
    stacks: [TaskStack; config::TASK_SLOTS],
}

impl Kernel {
    /// The offset, in bytes, to the `current_task` field
    pub(crate) const CURRENT_TASK_OFFSET: usize = core::mem::offset_of!(Kernel, current_task);

    /// The offset, in bytes, to the `next_task` field
    pub(crate) const NEXT_TASK_OFFSET: usize = core::mem::offset_of!(Kernel, next_task);

    /// The offset, in bytes, to the `tcb_list` field
    pub(crate) const TCB_LIST_OFFSET: usize = core::mem::offset_of!(Kernel, tcb_list);

    /// A compile-time check of the layout the PendSV handler relies on.
    const _LAYOUT_CHECK: () = const {
        assert!(Kernel::CURRENT_TASK_OFFSET == 0);
        assert!(Kernel::NEXT_TASK_OFFSET == size_of::<usize>());
        assert!(Kernel::TCB_LIST_OFFSET == 2 * size_of::<usize>());
    };

    /// Build an empty kernel
    ///
    /// All storage is reserved here; the kernel never allocates.
    pub const fn new() -> Kernel {
        Kernel {
            current_task: AtomicUsize::new(TaskId::INVALID_ID),
            next_task: AtomicUsize::new(TaskId::INVALID_ID),
            tcb_list: AtomicPtr::new(core::ptr::null_mut()),
            task_count: AtomicUsize::new(0),
            ticks: AtomicU32::new(0),
            started: AtomicBool::new(false),
            tcbs: [const { Tcb::vacant() }; config::TASK_SLOTS],
            stacks: [const { TaskStack::new() }; config::TASK_SLOTS],
        }
    }

    /// Register a task with the kernel
    ///
    /// Tasks can only be created before [`Kernel::start`]; afterwards, and
    /// once [`config::MAX_TASKS`] slots are taken, this returns `None`.
    pub fn create_task(
        &self,
        entry: TaskEntryFn,
        priority: u8,
        autostart: Autostart,
    ) -> Option<TaskId> {
        if self.started.load(Ordering::Relaxed) {
            return None;
        }
        self.create_in(entry, priority, autostart, config::MAX_TASKS)
    }

    fn create_in(
        &self,
        entry: TaskEntryFn,
        priority: u8,
        autostart: Autostart,
        limit: usize,
    ) -> Option<TaskId> {
        critical_section::with(|_| {
            let count = self.task_count.load(Ordering::Relaxed);
            if count >= limit {
                return None;
            }
            let state = match autostart {
                Autostart::AutoStart => TaskState::Ready,
                Autostart::StartSuspended => TaskState::Suspended,
            };
            self.tcbs[count].provision(entry, priority, state, &self.stacks[count]);
            self.task_count.store(count + 1, Ordering::Relaxed);
            Some(TaskId(count))
        })
    }

    /// Make the kernel ready to dispatch
    ///
    /// Registers the idle task in the slot reserved for it, so a full user
    /// table cannot squeeze it out.
    fn bring_up(&self) -> TaskId {
        if self.started.swap(true, Ordering::SeqCst) {
            panic!("Tried to re-start the kernel!");
        }
        self.tcb_list
            .store(self.tcbs.as_ptr().cast_mut(), Ordering::Release);
        match self.create_in(idle_task, 0, Autostart::AutoStart, config::TASK_SLOTS) {
            Some(id) => id,
            None => unreachable!(),
        }
    }

    /// Run the scheduler
    ///
    /// You may only call this once, and you should call it from `fn main()`
    /// once all your hardware is configured and every task is created. We
    /// should be in Privileged Thread mode on the Main stack.
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    pub fn start(&self, syst: cortex_m::peripheral::SYST, scb: cortex_m::peripheral::SCB) -> ! {
        #[cfg(feature = "is-alive")]
        crate::heartbeat::init();

        // remember where this object is - it cannot move because we do not
        // exit this function
        let self_addr = self as *const Kernel as *mut Kernel;
        KERNEL_PTR.store(self_addr, Ordering::Release);

        // the table must be complete before the first tick can dispatch
        self.bring_up();

        #[cfg(feature = "defmt")]
        defmt::info!(
            "Kernel @ {=usize:08x}, {=usize} tasks",
            self_addr as usize,
            self.task_count.load(Ordering::Relaxed)
        );

        port::tick_init(syst, scb, config::TICK_PERIOD_US, config::CPU_CLOCK_HZ);

        // Hand the CPU to the highest-priority task - the PendSV handler
        // boots it from its seeded frame
        self.dispatch();
        // flush the pipeline to ensure the PendSV fires before we reach the
        // end of this function
        cortex_m::asm::isb();
        // impossible to get here
        unreachable!();
    }

    /// Get current tick count
    pub fn now(&self) -> TickCount {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Get the current Task ID
    pub fn current_task_id(&self) -> TaskId {
        TaskId(self.current_task.load(Ordering::Relaxed))
    }

    /// Park the calling task for at least the given number of ticks
    ///
    /// `delay(0)` is a plain yield: the task still parks for one countdown
    /// step, so the next tick wakes it again.
    pub(crate) fn delay(&self, ticks: TickCount) {
        let Some(current) = self.current_index() else {
            return;
        };
        critical_section::with(|_| {
            let tcb = &self.tcbs[current];
            tcb.set_state(TaskState::Waiting);
            tcb.set_local_tick(ticks.max(1));
        });
        self.dispatch();
    }

    /// Park the calling task until somebody activates it
    pub(crate) fn suspend(&self) {
        let Some(current) = self.current_index() else {
            return;
        };
        critical_section::with(|_| {
            self.tcbs[current].set_state(TaskState::Suspended);
        });
        self.dispatch();
    }

    /// Make a suspended or waiting task ready to run
    ///
    /// Any wait in flight is cancelled. Handles that name no created task,
    /// or a task that is already runnable, are ignored.
    pub(crate) fn activate(&self, task: TaskId) {
        let index = task.index();
        let woke = critical_section::with(|_| {
            if index >= self.task_count.load(Ordering::Relaxed) {
                return false;
            }
            let tcb = &self.tcbs[index];
            match tcb.state() {
                TaskState::Suspended | TaskState::Waiting => {
                    tcb.set_local_tick(0);
                    tcb.set_state(TaskState::Ready);
                    true
                }
                TaskState::Ready | TaskState::Running => false,
            }
        });
        if woke {
            self.dispatch();
        }
    }

    /// Called on every tick interrupt to drive the delay engine
    ///
    /// Advances the clock, wakes every waiter whose countdown has run out,
    /// lets the dispatcher pick the winner, and rearms the tick source.
    pub(crate) fn tick(&self) {
        #[cfg(feature = "is-alive")]
        crate::heartbeat::tick();

        #[cfg(not(any(arm_architecture = "v6-m", arm_architecture = "v8-m.base")))]
        self.ticks.fetch_add(1, Ordering::Relaxed);

        #[cfg(any(arm_architecture = "v6-m", arm_architecture = "v8-m.base"))]
        critical_section::with(|_| {
            self.ticks.store(
                self.ticks.load(Ordering::Relaxed).wrapping_add(1),
                Ordering::Relaxed,
            );
        });

        critical_section::with(|_| {
            let count = self.task_count.load(Ordering::Relaxed);
            for index in 0..count {
                let tcb = &self.tcbs[index];
                if tcb.state() == TaskState::Waiting {
                    let remaining = tcb.local_tick();
                    if remaining <= 1 {
                        tcb.set_local_tick(0);
                        tcb.set_state(TaskState::Ready);
                    } else {
                        tcb.set_local_tick(remaining - 1);
                    }
                }
            }
        });

        self.dispatch();

        port::tick_rearm(config::TICK_PERIOD_US, config::CPU_CLOCK_HZ);
    }

    /// Pick the task that should own the CPU and request the switch
    ///
    /// Scans for the strictly highest priority among ready and running
    /// tasks; the lowest index wins a tie. If the winner is not the current
    /// task, states are updated here and the stack swap itself is deferred
    /// to the PendSV handler.
    pub(crate) fn dispatch(&self) {
        critical_section::with(|_| {
            let count = self.task_count.load(Ordering::Relaxed);
            let current = self.current_index();
            let mut winner = None;
            let mut best: i16 = -1;
            for index in 0..count {
                let tcb = &self.tcbs[index];
                let runnable = matches!(tcb.state(), TaskState::Ready | TaskState::Running);
                if runnable && i16::from(tcb.priority()) > best {
                    best = i16::from(tcb.priority());
                    winner = Some(index);
                }
            }
            let Some(winner) = winner else {
                return;
            };
            if Some(winner) == current {
                return;
            }

            #[cfg(feature = "defmt")]
            defmt::debug!(
                "switch {} -> {}",
                self.current_task_id(),
                TaskId(winner)
            );

            if let Some(outgoing) = current {
                let tcb = &self.tcbs[outgoing];
                if tcb.state() == TaskState::Running {
                    tcb.set_state(TaskState::Ready);
                }
            }
            self.tcbs[winner].set_state(TaskState::Running);
            self.next_task.store(winner, Ordering::Relaxed);
            port::pend_switch();

            // On hardware the PendSV handler adopts `next_task` when it
            // swaps the stacks; the hosted build has no exception return, so
            // adopt it here.
            #[cfg(not(all(target_arch = "arm", target_os = "none")))]
            self.current_task.store(winner, Ordering::Relaxed);
        });
    }

    fn current_index(&self) -> Option<usize> {
        let current = self.current_task.load(Ordering::Relaxed);
        if current == TaskId::INVALID_ID {
            None
        } else {
            Some(current)
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::new()
    }
}

/// Get a handle to the installed kernel
pub(crate) fn installed() -> Option<&'static Kernel> {
    // Get our stashed pointer
    let kernel_ptr = KERNEL_PTR.load(Ordering::Relaxed);
    // Are we initialised?
    if kernel_ptr.is_null() {
        None
    } else {
        // SAFETY: Only [`Kernel::start`] writes to [`KERNEL_PTR`] and it
        // always sets it to be a valid pointer to a [`Kernel`] that does not
        // move.
        Some(unsafe { &*kernel_ptr })
    }
}

/// What runs when nothing else can
fn idle_task() -> ! {
    loop {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        cortex_m::asm::wfi();
        #[cfg(not(all(target_arch = "arm", target_os = "none")))]
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spin() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    /// Stand in for `Kernel::start` on the host: register idle and run the
    /// first dispatch, but skip the hardware bring-up.
    fn boot(kernel: &Kernel) -> TaskId {
        let idle = kernel.bring_up();
        kernel.dispatch();
        idle
    }

    fn current(kernel: &Kernel) -> TaskId {
        kernel.current_task_id()
    }

    fn assert_invariants(kernel: &Kernel, idle: TaskId) {
        let count = kernel.task_count.load(Ordering::Relaxed);
        let mut running = 0;
        for index in 0..count {
            let tcb = &kernel.tcbs[index];
            match tcb.state() {
                TaskState::Running => running += 1,
                TaskState::Waiting => assert!(tcb.local_tick() >= 1, "waiting with no countdown"),
                _ => {}
            }
            assert!(tcb.sp_in_stack(), "stack pointer escaped task {index}");
        }
        assert!(running <= 1, "more than one task running");
        if let Some(current) = kernel.current_index() {
            assert_eq!(kernel.tcbs[current].state(), TaskState::Running);
        }
        let idle_state = kernel.tcbs[idle.index()].state();
        assert!(
            idle_state == TaskState::Ready || idle_state == TaskState::Running,
            "idle task blocked"
        );
    }

    #[test]
    fn test_handles_are_distinct_until_full() {
        let kernel = Kernel::new();
        let mut handles = Vec::new();
        for _ in 0..config::MAX_TASKS {
            let id = kernel.create_task(spin, 1, Autostart::AutoStart).unwrap();
            assert!(!handles.contains(&id));
            handles.push(id);
        }
        // the table is full now
        assert!(kernel.create_task(spin, 1, Autostart::AutoStart).is_none());
        // but the reserved slot still admits the idle task
        let idle = boot(&kernel);
        assert!(!idle.is_invalid());
        assert_eq!(current(&kernel), handles[0]);
        assert_invariants(&kernel, idle);
    }

    #[test]
    fn test_create_after_start_is_refused() {
        let kernel = Kernel::new();
        kernel.create_task(spin, 1, Autostart::AutoStart).unwrap();
        boot(&kernel);
        assert!(kernel.create_task(spin, 1, Autostart::AutoStart).is_none());
    }

    #[test]
    #[should_panic(expected = "re-start")]
    fn test_restart_panics() {
        let kernel = Kernel::new();
        boot(&kernel);
        kernel.bring_up();
    }

    #[test]
    fn test_idle_runs_when_nothing_else_exists() {
        let kernel = Kernel::new();
        let idle = boot(&kernel);
        assert_eq!(current(&kernel), idle);
        assert_eq!(kernel.tcbs[idle.index()].state(), TaskState::Running);
        assert_invariants(&kernel, idle);
    }

    #[test]
    fn test_suspended_tasks_do_not_start() {
        let kernel = Kernel::new();
        let parked = kernel
            .create_task(spin, 7, Autostart::StartSuspended)
            .unwrap();
        let idle = boot(&kernel);
        // the only runnable task is idle, despite the higher priority
        assert_eq!(current(&kernel), idle);
        kernel.activate(parked);
        assert_eq!(current(&kernel), parked);
        assert_invariants(&kernel, idle);
    }

    #[test]
    fn test_round_robin_by_delay() {
        let kernel = Kernel::new();
        let a = kernel.create_task(spin, 2, Autostart::AutoStart).unwrap();
        let b = kernel.create_task(spin, 2, Autostart::AutoStart).unwrap();
        let idle = boot(&kernel);

        // the tie breaks to the lower index
        assert_eq!(current(&kernel), a);

        let mut order = Vec::new();
        for _ in 0..10 {
            order.push(current(&kernel));
            kernel.delay(1);
            order.push(current(&kernel));
            kernel.delay(1);
            // both parked; idle soaks up the rest of the tick
            assert_eq!(current(&kernel), idle);
            kernel.tick();
            assert_invariants(&kernel, idle);
        }
        let expected: Vec<TaskId> = [a, b].into_iter().cycle().take(20).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_priority_preemption_on_wake() {
        let kernel = Kernel::new();
        let high = kernel.create_task(spin, 3, Autostart::AutoStart).unwrap();
        let low = kernel.create_task(spin, 1, Autostart::AutoStart).unwrap();
        let idle = boot(&kernel);

        assert_eq!(current(&kernel), high);
        kernel.delay(5);
        assert_eq!(current(&kernel), low);

        for _ in 1..5 {
            kernel.tick();
            assert_eq!(current(&kernel), low);
            assert_invariants(&kernel, idle);
        }
        // the fifth tick wakes the sleeper, which outranks the incumbent
        kernel.tick();
        assert_eq!(current(&kernel), high);
        assert_eq!(kernel.tcbs[low.index()].state(), TaskState::Ready);
        assert_invariants(&kernel, idle);
    }

    #[test]
    fn test_suspend_activate_handoff() {
        let kernel = Kernel::new();
        let server = kernel.create_task(spin, 2, Autostart::AutoStart).unwrap();
        let client = kernel.create_task(spin, 1, Autostart::AutoStart).unwrap();
        let idle = boot(&kernel);

        // server runs first and parks itself
        assert_eq!(current(&kernel), server);
        kernel.suspend();
        assert_eq!(current(&kernel), client);

        // activation hands the CPU straight back to the higher priority
        kernel.activate(server);
        assert_eq!(current(&kernel), server);
        kernel.suspend();
        assert_eq!(current(&kernel), client);

        // client sleeps three ticks; only idle is left
        kernel.delay(3);
        assert_eq!(current(&kernel), idle);
        kernel.tick();
        kernel.tick();
        assert_eq!(current(&kernel), idle);
        kernel.tick();
        assert_eq!(current(&kernel), client);
        assert_invariants(&kernel, idle);
    }

    #[test]
    fn test_delay_zero_is_a_yield() {
        let kernel = Kernel::new();
        let x = kernel.create_task(spin, 2, Autostart::AutoStart).unwrap();
        let y = kernel.create_task(spin, 2, Autostart::AutoStart).unwrap();
        let idle = boot(&kernel);

        for _ in 0..5 {
            // each task gets exactly one turn per tick
            assert_eq!(current(&kernel), x);
            kernel.delay(0);
            assert_eq!(current(&kernel), y);
            kernel.delay(0);
            assert_eq!(current(&kernel), idle);
            kernel.tick();
            assert_invariants(&kernel, idle);
        }
    }

    #[test]
    fn test_idle_covers_a_long_sleep() {
        let kernel = Kernel::new();
        let sleeper = kernel.create_task(spin, 5, Autostart::AutoStart).unwrap();
        let idle = boot(&kernel);

        assert_eq!(current(&kernel), sleeper);
        kernel.delay(1000);
        for _ in 1..1000 {
            kernel.tick();
            assert_eq!(current(&kernel), idle);
        }
        kernel.tick();
        assert_eq!(current(&kernel), sleeper);
        assert_eq!(kernel.now(), 1000);
        assert_invariants(&kernel, idle);
    }

    #[test]
    fn test_clock_counts_one_per_tick() {
        let kernel = Kernel::new();
        boot(&kernel);
        assert_eq!(kernel.now(), 0);
        for expected in 1..=32 {
            kernel.tick();
            assert_eq!(kernel.now(), expected);
        }
    }

    #[test]
    fn test_waiting_counter_falls_by_one_per_tick() {
        let kernel = Kernel::new();
        let sleeper = kernel.create_task(spin, 2, Autostart::AutoStart).unwrap();
        let idle = boot(&kernel);
        kernel.delay(3);

        let tcb = &kernel.tcbs[sleeper.index()];
        assert_eq!(tcb.local_tick(), 3);
        kernel.tick();
        assert_eq!(tcb.local_tick(), 2);
        assert_eq!(tcb.state(), TaskState::Waiting);
        kernel.tick();
        assert_eq!(tcb.local_tick(), 1);
        kernel.tick();
        assert_eq!(tcb.local_tick(), 0);
        assert_eq!(tcb.state(), TaskState::Running);
        assert_invariants(&kernel, idle);
    }

    #[test]
    fn test_activate_cancels_a_wait() {
        let kernel = Kernel::new();
        let sleeper = kernel.create_task(spin, 2, Autostart::AutoStart).unwrap();
        let idle = boot(&kernel);
        kernel.delay(1_000_000);
        assert_eq!(current(&kernel), idle);

        kernel.activate(sleeper);
        assert_eq!(current(&kernel), sleeper);
        assert_eq!(kernel.tcbs[sleeper.index()].local_tick(), 0);
        assert_invariants(&kernel, idle);
    }

    #[test]
    fn test_activate_ignores_runnable_and_bogus_targets() {
        let kernel = Kernel::new();
        let worker = kernel.create_task(spin, 2, Autostart::AutoStart).unwrap();
        let idle = boot(&kernel);

        // already running
        kernel.activate(worker);
        assert_eq!(kernel.tcbs[worker.index()].state(), TaskState::Running);
        // not a task
        kernel.activate(TaskId::from_index(999));
        kernel.activate(TaskId::invalid());
        assert_invariants(&kernel, idle);
    }

    #[test]
    fn test_activation_defers_to_a_higher_priority_incumbent() {
        let kernel = Kernel::new();
        let boss = kernel.create_task(spin, 5, Autostart::AutoStart).unwrap();
        let minion = kernel
            .create_task(spin, 1, Autostart::StartSuspended)
            .unwrap();
        let idle = boot(&kernel);

        assert_eq!(current(&kernel), boss);
        kernel.activate(minion);
        // ready, but not on the CPU until the boss parks
        assert_eq!(current(&kernel), boss);
        assert_eq!(kernel.tcbs[minion.index()].state(), TaskState::Ready);
        kernel.delay(10);
        assert_eq!(current(&kernel), minion);
        assert_invariants(&kernel, idle);
    }

    #[test]
    fn test_switch_handler_layout_contract() {
        // the PendSV assembly reads these three words and shifts task
        // indices by SIZE_BITS
        assert_eq!(Kernel::CURRENT_TASK_OFFSET, 0);
        assert_eq!(Kernel::NEXT_TASK_OFFSET, size_of::<usize>());
        assert_eq!(Kernel::TCB_LIST_OFFSET, 2 * size_of::<usize>());
        #[cfg(target_pointer_width = "32")]
        assert_eq!(size_of::<Tcb>(), 1 << Tcb::SIZE_BITS);
        assert!(Tcb::SIZE_BITS < 8);
    }

    #[test]
    fn test_task_id_rendering() {
        let kernel = Kernel::new();
        let first = kernel.create_task(spin, 1, Autostart::AutoStart).unwrap();
        assert_eq!(format!("{first}"), "T000");
        assert_eq!(format!("{}", TaskId::invalid()), "T---");
        assert!(TaskId::invalid().is_invalid());
    }
}

// End of File
