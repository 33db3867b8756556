//! Holds the [`Tcb`] type and the task state machine

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use core::cell::Cell;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::TickCount;
use crate::stack::TaskStack;
use crate::stack_pusher::StackPusher;

/// The function signature for our task entry functions.
///
/// Our tasks run forever and take no arguments.
pub type TaskEntryFn = fn() -> !;

/// What a task is doing right now, as far as the dispatcher is concerned
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    /// Runnable, but not on the CPU
    Ready,
    /// Currently executing
    Running,
    /// Parked until its tick counter runs out
    Waiting,
    /// Parked until some other task activates it
    Suspended,
}

/// Whether a freshly created task is immediately runnable
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Autostart {
    /// The task is ready as soon as the scheduler starts
    AutoStart,
    /// The task stays parked until another task activates it
    StartSuspended,
}

/// Represents a task that the kernel is managing
///
/// The size of this struct must be a power of 2 in order for the context
/// switch assembly code to be able to quickly pick a TCB out of the table
/// based on an index. The saved stack pointer must stay the first field,
/// because that code loads and stores it at offset zero.
///
/// All other fields are only touched inside critical sections, from thread
/// context or the tick handler.
#[repr(C, align(32))]
pub(crate) struct Tcb {
    /// The stack pointer for this task
    ///
    /// This is the value taken from PSP when the task was suspended, and is
    /// therefore the value to put back into PSP when the task is resumed.
    sp: AtomicPtr<u32>,
    /// What the task is doing right now
    state: Cell<TaskState>,
    /// Fixed scheduling priority; bigger numbers outrank smaller ones
    priority: Cell<u8>,
    /// Ticks left until a waiting task becomes ready again
    local_tick: Cell<TickCount>,
    /// The function this task was created with
    entry: Cell<Option<TaskEntryFn>>,
    /// Lowest address of this task's stack region
    stack_start: Cell<*mut u32>,
    /// One word past the highest address of this task's stack region
    stack_end: Cell<*mut u32>,
}

// The switch handler writes `sp` from interrupt context; everything else is
// serialized by critical sections.
unsafe impl Sync for Tcb {}

impl Tcb {
    /// The size of a TCB is `pow(2, SIZE_BITS)` on our 32-bit targets.
    pub(crate) const SIZE_BITS: usize = 5;

    /// A compile-time check that the size of a [`Tcb`] is what we said it was.
    #[cfg(target_pointer_width = "32")]
    const _SIZE_CHECK: () = const {
        assert!(size_of::<Self>() == (1 << Self::SIZE_BITS));
    };

    /// A compile-time check that the switch assembly finds `sp` at offset 0.
    const _SP_CHECK: () = const {
        assert!(core::mem::offset_of!(Tcb, sp) == 0);
    };

    /// The value of the Program Status Register when a task starts
    ///
    /// The only bit we need to set is the T bit, to indicate that the
    /// task should run in Thumb mode (the only supported mode on Cortex-M)
    const DEFAULT_XPSR: u32 = 1 << 24;

    /// The EXC_RETURN value seeded below the hardware frame.
    ///
    /// Returns to Thread Mode on the Process Stack. It does not have the FPU
    /// bit clear, so the initial frame never carries FPU state.
    const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

    /// Make an unoccupied table slot
    pub(crate) const fn vacant() -> Tcb {
        Tcb {
            sp: AtomicPtr::new(core::ptr::null_mut()),
            state: Cell::new(TaskState::Suspended),
            priority: Cell::new(0),
            local_tick: Cell::new(0),
            entry: Cell::new(None),
            stack_start: Cell::new(core::ptr::null_mut()),
            stack_end: Cell::new(core::ptr::null_mut()),
        }
    }

    /// Turn a vacant slot into a live task record
    ///
    /// Seeds the initial exception frame on the given stack, so the first
    /// switch into this task can exception-return straight into its entry
    /// function.
    pub(crate) fn provision(
        &self,
        entry: TaskEntryFn,
        priority: u8,
        state: TaskState,
        stack: &TaskStack,
    ) {
        self.entry.set(Some(entry));
        self.priority.set(priority);
        self.local_tick.set(0);
        self.stack_start.set(stack.base());
        self.stack_end.set(stack.top());
        self.seed_initial_frame();
        self.state.set(state);
    }

    /// Push the state a brand-new task resumes from
    ///
    /// The layout must match what the hardware unstacks on exception return,
    /// followed by the software frame the switch handler pops first.
    fn seed_initial_frame(&self) {
        let Some(entry) = self.entry.get() else {
            return;
        };

        // SAFETY: `provision` gave us a stack region big enough for the
        // whole frame; `Stack::new` checks the minimum size.
        let mut frame = unsafe { StackPusher::new(self.stack_end.get()) };

        // Standard Arm exception frame

        // xPSR
        frame.push(Self::DEFAULT_XPSR);
        // PC
        frame.push(entry as usize as u32);
        // LR - tasks never return, so there is nowhere to go back to
        frame.push(0);
        // R12
        frame.push(0);
        // R3-R0
        frame.push_repeated(0, 4);

        // Additional task state we persist

        // EXC_RETURN, popped into LR by the switch handler
        frame.push(Self::EXC_RETURN_THREAD_PSP);
        // R4-R11
        frame.push_repeated(0, 8);

        self.sp.store(frame.current(), Ordering::Relaxed);
    }

    /// Get the task's current state
    pub(crate) fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Set the task's current state
    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.set(state);
    }

    /// Get the task's scheduling priority
    pub(crate) fn priority(&self) -> u8 {
        self.priority.get()
    }

    /// Get the remaining ticks of the task's current wait
    pub(crate) fn local_tick(&self) -> TickCount {
        self.local_tick.get()
    }

    /// Set the remaining ticks of the task's current wait
    pub(crate) fn set_local_tick(&self, ticks: TickCount) {
        self.local_tick.set(ticks);
    }

    /// Does the saved stack pointer sit strictly inside this task's stack
    /// region?
    #[cfg(test)]
    pub(crate) fn sp_in_stack(&self) -> bool {
        let sp = self.sp.load(Ordering::Relaxed);
        sp > self.stack_start.get() && sp < self.stack_end.get()
    }

    /// Get the saved stack pointer
    #[cfg(test)]
    pub(crate) fn sp(&self) -> *mut u32 {
        self.sp.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::TaskStack;

    fn body() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    #[test]
    fn test_vacant_slot_is_parked() {
        let tcb = Tcb::vacant();
        assert_eq!(tcb.state(), TaskState::Suspended);
        assert_eq!(tcb.local_tick(), 0);
    }

    #[test]
    fn test_provision_records_the_task() {
        let stack = TaskStack::new();
        let tcb = Tcb::vacant();
        tcb.provision(body, 3, TaskState::Ready, &stack);
        assert_eq!(tcb.state(), TaskState::Ready);
        assert_eq!(tcb.priority(), 3);
        assert_eq!(tcb.local_tick(), 0);
        assert!(tcb.sp_in_stack());
    }

    #[test]
    fn test_initial_frame_layout() {
        let stack = TaskStack::new();
        let tcb = Tcb::vacant();
        tcb.provision(body, 1, TaskState::Ready, &stack);
        let top = stack.top();
        unsafe {
            // xPSR has only the Thumb bit set
            assert_eq!(top.offset(-1).read(), 1 << 24);
            // PC is the entry function
            assert_eq!(top.offset(-2).read(), body as usize as u32);
            // below the hardware frame sits EXC_RETURN
            assert_eq!(top.offset(-9).read(), 0xFFFF_FFFD);
        }
        // eight hardware words, EXC_RETURN, then R4-R11
        assert_eq!(tcb.sp(), unsafe { top.offset(-17) });
    }
}

// End of File
