//! ertos - a priority-based preemptive real-time kernel
//!
//! A single-core RTOS kernel providing:
//! - Priority-based preemptive scheduling with round-robin among equals
//! - Synchronization primitives (counting/binary semaphores, recursive
//!   mutexes, fixed-size message queues)
//! - Tick-based delays and one-shot software timers
//! - Context switching for ARM Cortex-M
//!
//! All kernel objects live in fixed arenas sized at compile time and are
//! addressed through validated handles, so the kernel itself never
//! allocates.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod core;
pub mod sync;
pub mod port;

// ============ Re-exports ============

pub use core::config;
pub use core::config::*;
pub use core::critical;
pub use core::error;
pub use core::error::KernelError;
pub use core::kernel;
pub use core::kernel::{os_init, os_int_enter, os_int_exit, os_start, os_task_current};
pub use core::types;
pub use core::types::*;
pub use core::task;
pub use core::task::os_task_create;
pub use core::sched;
pub use core::time;
pub use core::time::{os_tick_handler, os_time_dly, os_time_get};

#[cfg(feature = "sem")]
pub use sync::sem;
#[cfg(feature = "queue")]
pub use sync::queue;
