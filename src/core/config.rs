//! Compile-time configuration for the kernel
//!
//! These constants control the resource limits of the kernel arenas and
//! the tick timing.

/// Maximum number of tasks, including the idle task
pub const CFG_MAX_TASKS: usize = 16;

/// Maximum number of concurrently registered software timers
pub const CFG_MAX_TIMERS: usize = 16;

/// Maximum number of semaphores (counting, binary and mutex combined)
pub const CFG_MAX_SEMS: usize = 16;

/// Maximum number of message queues
pub const CFG_MAX_QUEUES: usize = 8;

/// System tick rate in Hz
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Minimum task stack size, in stack elements
pub const CFG_STK_SIZE_MIN: usize = 64;

/// Maximum task name length accepted by task creation
pub const CFG_TASK_NAME_MAX: usize = 16;

/// Idle task priority; application tasks must use a smaller value
pub const CFG_PRIO_IDLE: u8 = 255;

/// Idle task stack size, in stack elements
pub const CFG_IDLE_STK_SIZE: usize = 128;
