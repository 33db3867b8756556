//! Armv7-M EABIHF code

use crate::kernel::{KERNEL_PTR, Kernel};
use crate::tcb::Tcb;

/// PendSV Handler for Armv7-M or Armv8-M Mainline EABIHF
///
/// This is the deferred half of the context switch. The dispatcher pends
/// this exception after picking `next_task`; being the lowest-priority
/// exception, it runs once every other handler has drained.
///
/// On entry, we will find that PC, LR, R12, R3, R2, R1 and R0 will have been
/// pushed onto the PSP, along with either the low FPU registers, or space for
/// the low FPU registers. We thus push the remaining registers (which are as
/// the outgoing task left them) and inspect LR to see if we also need to push
/// the high FPU registers (because LR is set by the hardware on exception
/// entry to tell us the FPU state of the task we interrupted). We then
/// restore the registers from the incoming TCB (including the high FPU
/// registers if required). Exiting from this function will cause the
/// hardware to restore PC, LR, R12, R3, R2, R1, and R0 from the incoming
/// task's PSP (along with the low FPU state, if required), and so the
/// incoming task will resume - on the very first switch, from the frame
/// seeded at task creation.
///
/// It is a naked function because we do not want the compiler pushing
/// anything else to the stack and re-using registers containing precious task
/// state.
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    // NOTE: This code must NOT touch r4-r11. It can ONLY touch r0-r3 and r12,
    // because those registers were stacked by the hardware on exception entry.

    core::arch::naked_asm!(r#"
    // Workaround https://github.com/rust-lang/rust/issues/127269
    .fpu vfpv3

    // drop the pending-switch request; a tick arriving while we run will
    // re-pend it and we go round again
    ldr      r0, =0xE000ED04
    ldr      r2, =0x08000000
    str      r2, [r0]

    // r1 = the address of the Kernel object
    ldr      r1, ={kernel_ptr}
    ldr      r1, [r1]

    // r2 = the outgoing task ID
    ldr      r2, [r1, {current_task_offset}]

    // r3 = the TCB table pointer
    ldr      r3, [r1, {tcb_list_offset}]

    // if the outgoing task ID is -1, this is the first switch - there is
    // nothing to save
    cmp      r2, #-1
    beq      1f

    //
    // Stack the outgoing task
    //
    // r1 holds the kernel object's address
    // r2 holds the outgoing task ID
    // r3 holds the TCB table's address
    //

    // r2 = the outgoing TCB byte offset
    lsl      r2, {tcb_size_bits}

    // r0 = the outgoing task stack pointer
    mrs      r0, psp

    // Did the task we just interrupted use the FPU? (i.e. is bit 4 set in LR?)
    tst      lr, #0x10

    // If FPU was used, stack the high FPU registers. Exception entry handled the low ones.
    it       eq
    vstmdbeq r0!, {{ s16 - s31 }}

    // Push the additional state into stack at r0
    stmdb    r0!, {{ r4 - r11, lr }}

    // save the stack pointer (in r0) to the TCB
    str      r0, [r3, r2]

    //
    // Pop the incoming task
    //
    // r1 holds the kernel object's address
    // r3 holds the TCB table's address
    //

    1:

    // r2 = the incoming TCB byte offset
    ldr      r2, [r1, {next_task_offset}]
    lsl      r2, {tcb_size_bits}

    // r0 = the stack pointer from the TCB
    ldr      r0, [r3, r2]

    // Pop the additional state from it
    ldmia    r0!, {{ r4 - r11, lr }}

    // Did the task we just resumed use the FPU? (i.e. is bit 4 set in LR?)
    tst      lr, #0x10

    // If FPU was used, unstack the high FPU registers
    it       eq
    vldmiaeq r0!, {{ s16 - s31 }}

    // Set the incoming task stack pointer
    msr      psp, r0

    //
    // Update the Current Task ID
    //
    // r1 holds the kernel object's address
    //

    // the incoming task is now the running one
    ldr      r2, [r1, {next_task_offset}]
    str      r2, [r1, {current_task_offset}]

    //
    // return to the task
    //

    bx       lr
    "#,
    kernel_ptr = sym KERNEL_PTR,
    current_task_offset = const Kernel::CURRENT_TASK_OFFSET,
    next_task_offset = const Kernel::NEXT_TASK_OFFSET,
    tcb_list_offset = const Kernel::TCB_LIST_OFFSET,
    tcb_size_bits = const Tcb::SIZE_BITS,
    );
}
