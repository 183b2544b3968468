//! Cortex-M4 port implementation
//!
//! Context switching runs through the PendSV exception: the scheduler
//! publishes the next task in [`CpuState`] and pends the exception,
//! which saves the outgoing register frame on the process stack and
//! restores the incoming one at the lowest interrupt priority.

#![allow(named_asm_labels)]

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;

use crate::kernel::CPU_STATE;
use crate::task::Tcb;
use crate::types::{StkElement, TaskEntry};

/// Interrupt stack for MSP
#[no_mangle]
static mut INTERRUPT_STACK: [u64; 256] = [0xDEADBEEF_DEADBEEF; 256];

/// Initialize SysTick for system tick generation
///
/// # Arguments
/// * `reload` - Core clock cycles per tick, e.g. 16_000_000 / 1000 for a
///   1 kHz tick on a 16 MHz core
pub(crate) fn os_cpu_systick_init(reload: u32) {
    let mut p = unsafe { cortex_m::Peripherals::steal() };

    p.SYST.set_reload(reload - 1);
    p.SYST.clear_current();
    p.SYST.set_clock_source(SystClkSource::Core);
    p.SYST.enable_interrupt();
    p.SYST.enable_counter();
}

/// Publish `new` as the switch target and pend the switch
///
/// Runs with interrupts disabled; PendSV performs the actual swap once
/// the caller leaves its critical section. The outgoing frame is saved
/// through `tcb_cur`, which still names `old` at that point.
pub(crate) fn os_ctx_sw(_old: *mut Tcb, new: *mut Tcb) {
    unsafe {
        let cpu = &raw mut CPU_STATE;
        (*cpu).tcb_high_rdy = new;
    }
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Hand the CPU to the first scheduled task. Does not return.
///
/// Clearing `tcb_cur` makes the first PendSV skip the save phase, since
/// there is no outgoing task frame yet.
pub(crate) fn os_start_high_rdy() {
    unsafe {
        let mut scb = cortex_m::Peripherals::steal().SCB;

        // PendSV and SysTick at the lowest priority so the switch never
        // preempts another handler
        scb.set_priority(SystemHandler::PendSV, 0xF0);
        scb.set_priority(SystemHandler::SysTick, 0xF0);

        // switch MSP to the dedicated interrupt stack
        let stack = &raw const INTERRUPT_STACK;
        let msp_top = stack as u32 + core::mem::size_of_val(&*stack) as u32;

        asm!("msr msp, {0}", in(reg) msp_top);
        asm!("msr psp, {0}", in(reg) 0);

        (*(&raw mut CPU_STATE)).tcb_cur = core::ptr::null_mut();

        cortex_m::interrupt::enable();
        cortex_m::peripheral::SCB::set_pendsv();
    }
}

/// Register frame laid out on a task's stack
#[repr(C, align(4))]
struct StackFrame {
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    exc_return: u32,
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}
const CONTEXT_FRAME_WORDS: usize = 17;

/// Build the initial register frame so the first switch into the task
/// "returns" straight into its entry function
///
/// # Safety
/// `stk_base` must point at `stk_size` writable stack elements.
pub(crate) unsafe fn os_task_stk_init(
    entry: TaskEntry,
    arg: usize,
    stk_base: *mut StkElement,
    stk_size: usize,
) -> *mut StkElement {
    unsafe {
        let stk_top = stk_base.add(stk_size);
        let stk_aligned = ((stk_top as usize) & !7) as *mut u32;

        let frame_ptr = stk_aligned.sub(CONTEXT_FRAME_WORDS) as *mut StackFrame;

        (*frame_ptr) = StackFrame {
            r4: 0x04040404,
            r5: 0x05050505,
            r6: 0x06060606,
            r7: 0x07070707,
            r8: 0x08080808,
            r9: 0x09090909,
            r10: 0x10101010,
            r11: 0x11111111,
            exc_return: 0xFFFF_FFFD,
            r0: arg as u32,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: os_task_return as *const () as u32,
            pc: (entry as usize as u32) | 1,
            xpsr: 0x0100_0000,
        };

        // pointer 4 bytes below the frame to match PendSV's "add r0, r0, #4"
        (frame_ptr as *mut u32).sub(1) as *mut StkElement
    }
}

/// Helper called from PendSV to swap TCB pointers
///
/// Saves the outgoing stack pointer, promotes `tcb_high_rdy` to
/// `tcb_cur`, and returns the incoming task's saved stack pointer.
#[inline(never)]
#[no_mangle]
unsafe extern "C" fn pendsv_switch_context(cur_sp: *mut u32) -> *mut u32 {
    unsafe {
        let cpu = &raw mut CPU_STATE;

        let cur_tcb = (*cpu).tcb_cur;
        if !cur_tcb.is_null() {
            (*cur_tcb).stk_ptr = cur_sp;
        }

        (*cpu).tcb_cur = (*cpu).tcb_high_rdy;

        let new_tcb = (*cpu).tcb_cur;
        if new_tcb.is_null() {
            core::ptr::null_mut()
        } else {
            (*new_tcb).stk_ptr
        }
    }
}

/// PendSV exception handler - performs the full context switch
///
/// 1. Save R4-R11, LR to the current task's PSP (skipped for the first task)
/// 2. Call `pendsv_switch_context` to swap TCB pointers
/// 3. Restore R4-R11, LR from the new task's stack
/// 4. Exception return
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "cpsid i",
        "dsb",
        "isb",

        "mrs r0, psp",

        "ldr r1, ={cpu_state}",
        "ldr r1, [r1]",
        "cbz r1, 1f",

        "stmdb r0!, {{r4-r11, lr}}",

        "sub r0, r0, #4",

        "1:",
        "bl pendsv_switch_context",

        "cbz r0, 2f",
        "add r0, r0, #4",
        "ldmia r0!, {{r4-r11, lr}}",

        "msr psp, r0",

        "2:",
        "cpsie i",
        "dsb",
        "isb",

        "bx lr",

        cpu_state = sym CPU_STATE,
    );
}

/// Landing pad for a task entry that somehow returns
#[no_mangle]
fn os_task_return() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}
