//! Port layer - CPU-specific implementations
//!
//! Everything the kernel needs from the hardware lives behind four
//! entry points: stack frame construction, the context switch request,
//! the first-task handoff, and the tick source setup. The Cortex-M4
//! port implements them with PendSV and SysTick; other targets get a
//! hosted stub that records switch requests instead of performing them,
//! which is what the test suite observes.

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(target_arch = "arm")]
pub use cortex_m4::*;

// Hosted stub for non-ARM targets
#[cfg(not(target_arch = "arm"))]
pub mod stub {
    use portable_atomic::{AtomicU32, Ordering};

    use crate::kernel::CPU_STATE;
    use crate::task::Tcb;
    use crate::types::{StkElement, TaskEntry};

    /// Context switch requests seen since the last reset
    static SWITCH_COUNT: AtomicU32 = AtomicU32::new(0);

    /// Number of context switch requests the stub has absorbed
    pub fn switch_count() -> u32 {
        SWITCH_COUNT.load(Ordering::Relaxed)
    }

    /// Clear the switch request counter
    pub fn switch_count_reset() {
        SWITCH_COUNT.store(0, Ordering::Relaxed);
    }

    /// Tear the kernel down to its power-on state
    ///
    /// Hardware never needs this; hosted test runs do, because kernel
    /// state is process-global and a started scheduler cannot otherwise
    /// be initialized again.
    pub fn host_reset() {
        crate::critical::critical_section(|cs| {
            crate::kernel::KERNEL.reset();
            crate::kernel::ctx(cs).reset();
            unsafe {
                (*(&raw mut crate::kernel::CPU_STATE)).reset();
            }
        });
        switch_count_reset();
    }

    /// Record a context switch without performing one. The CPU state is
    /// updated as if the switch completed, so the scheduler's view stays
    /// coherent across calls.
    pub(crate) fn os_ctx_sw(old: *mut Tcb, new: *mut Tcb) {
        unsafe {
            let cpu = &raw mut CPU_STATE;
            // switches are synchronous here, so the outgoing task is
            // always the one the last switch installed
            debug_assert_eq!((*cpu).tcb_cur, old);
            (*cpu).tcb_cur = new;
            (*cpu).tcb_high_rdy = new;
        }
        SWITCH_COUNT.fetch_add(1, Ordering::Relaxed);
    }

    /// Decline the handoff; hosted callers drive the kernel manually
    pub(crate) fn os_start_high_rdy() {}

    pub(crate) fn os_cpu_systick_init(_reload: u32) {}

    /// # Safety
    /// `stk_base` must point at `stk_size` writable stack elements.
    pub(crate) unsafe fn os_task_stk_init(
        _entry: TaskEntry,
        _arg: usize,
        stk_base: *mut StkElement,
        stk_size: usize,
    ) -> *mut StkElement {
        // top of stack; nothing ever executes from it on a host
        unsafe { stk_base.add(stk_size - 1) }
    }
}

#[cfg(not(target_arch = "arm"))]
pub use stub::*;
