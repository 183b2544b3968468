//! Core type definitions for the kernel
//!
//! These types provide strong typing for kernel primitives.

use crate::config::CFG_MAX_TASKS;

/// Task priority (0 = highest priority, 255 reserved for the idle task)
pub type Prio = u8;

/// Tick counter type
pub type Tick = u32;

/// Interrupt nesting counter
pub type NestingCtr = u8;

/// Stack element type
pub type StkElement = u32;

/// Task entry function: runs forever, receives one word of context
pub type TaskEntry = fn(usize) -> !;

/// Stable index of a task in the kernel's TCB arena.
///
/// Tasks are never deleted, so a plain index is a valid handle for the
/// lifetime of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(pub(crate) u8);

impl TaskId {
    #[inline(always)]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(idx: usize) -> Self {
        debug_assert!(idx < CFG_MAX_TASKS);
        TaskId(idx as u8)
    }
}

/// Generation-validated reference to a kernel object arena slot.
///
/// A slot's generation is bumped every time the slot is retired, so a
/// stale handle never resolves to a recycled object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ObjRef {
    pub(crate) idx: u8,
    pub(crate) gen: u16,
}

/// Task state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Eligible to run, linked in the ready queue
    Ready = 0,
    /// Currently executing; exactly one task at a time
    Running = 1,
    /// Blocked on a semaphore or message queue wait list
    Pended = 2,
    /// Sleeping on a delay timer
    Delayed = 3,
    /// Explicitly suspended, not in any queue
    Suspended = 4,
}

/// Which wait list a pended task occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendOn {
    /// Not blocked on anything
    Nothing,
    /// Semaphore wait list (arena slot index)
    Sem(u8),
    /// Message queue producer wait list
    QueuePut(u8),
    /// Message queue consumer wait list
    QueueGet(u8),
}

/// Result delivered to a task when it leaves a blocked state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WakeStatus {
    /// Still blocked, no wake path has executed yet
    Pending = 0,
    /// The awaited event arrived
    Success = 1,
    /// The timeout elapsed first
    Timeout = 2,
    /// The object was deleted while the task was blocked on it
    Deleted = 3,
}

/// Blocking behavior of `take`/`give` style operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Fail with `WouldBlock` instead of blocking
    NoWait,
    /// Block until the event arrives
    Forever,
    /// Block for at most this many ticks; must be nonzero
    Ticks(Tick),
}
