//! Task Control Block (TCB) definition
//!
//! TCBs live in a fixed arena owned by the kernel context and are referred
//! to by stable [`TaskId`] indices, never by address. The queue link fields
//! are plain slot indices; only `TaskQueue` may rewrite them.

use crate::config::CFG_MAX_TASKS;
use crate::time::TimerRef;
use crate::types::{PendOn, Prio, StkElement, TaskEntry, TaskId, TaskState, WakeStatus};

/// Task Control Block
#[repr(C)]
pub(crate) struct Tcb {
    // ============ Stack pointer ============
    /// Current stack pointer; first field, the port layer relies on it
    pub stk_ptr: *mut StkElement,

    // ============ Stack information ============
    /// Base of stack
    pub stk_base: *mut StkElement,
    /// Stack size in words
    pub stk_size: usize,

    // ============ Task identification ============
    /// Slot occupancy flag
    pub used: bool,
    /// Task name
    pub name: &'static str,
    /// Caller-assigned numeric id
    pub task_id: u32,

    // ============ Queue links ============
    /// Next TCB in whichever queue this task occupies
    pub next: Option<TaskId>,
    /// Previous TCB in whichever queue this task occupies
    pub prev: Option<TaskId>,
    /// Set while linked into a queue
    pub queued: bool,
    /// Which wait list the task occupies, if any
    pub pend_on: PendOn,
    /// Result of the most recent wake-up
    pub wake_status: WakeStatus,

    // ============ Timeout ============
    /// Outstanding delay/timeout registration
    pub timeout_timer: Option<TimerRef>,

    // ============ Priority and state ============
    /// Priority, 0 = highest
    pub prio: Prio,
    /// Current task state
    pub state: TaskState,

    // ============ Task entry point ============
    /// Task function
    pub entry: Option<TaskEntry>,
    /// Task argument
    pub entry_arg: usize,
}

impl Tcb {
    /// Create a new, unoccupied TCB
    pub const fn new() -> Self {
        Tcb {
            stk_ptr: core::ptr::null_mut(),

            stk_base: core::ptr::null_mut(),
            stk_size: 0,

            used: false,
            name: "",
            task_id: 0,

            next: None,
            prev: None,
            queued: false,
            pend_on: PendOn::Nothing,
            wake_status: WakeStatus::Pending,

            timeout_timer: None,

            prio: 0,
            state: TaskState::Ready,

            entry: None,
            entry_arg: 0,
        }
    }
}

impl Default for Tcb {
    fn default() -> Self {
        Self::new()
    }
}

const TCB_INIT: Tcb = Tcb::new();

/// Fixed arena of TCB slots
pub(crate) struct TcbPool {
    slots: [Tcb; CFG_MAX_TASKS],
}

impl TcbPool {
    pub const fn new() -> Self {
        TcbPool {
            slots: [TCB_INIT; CFG_MAX_TASKS],
        }
    }

    /// Return every slot to the unoccupied state
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = Tcb::new();
        }
    }

    /// Claim the lowest-numbered free slot
    pub fn alloc(&mut self) -> Option<TaskId> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if !slot.used {
                *slot = Tcb::new();
                slot.used = true;
                return Some(TaskId::from_index(idx));
            }
        }
        None
    }

    /// Access a TCB by id. Ids are only ever handed out by `alloc`, so
    /// the index is in range.
    #[inline(always)]
    pub fn get(&self, id: TaskId) -> &Tcb {
        &self.slots[id.index()]
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: TaskId) -> &mut Tcb {
        &mut self.slots[id.index()]
    }

    /// Like `get`, but refuses ids whose slot is no longer occupied,
    /// e.g. a handle held across a kernel re-init.
    pub fn lookup(&self, id: TaskId) -> Option<&Tcb> {
        let slot = &self.slots[id.index()];
        slot.used.then_some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_hands_out_distinct_slots() {
        let mut pool = TcbPool::new();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert_ne!(a, b);
        assert!(pool.get(a).used);
        assert!(pool.get(b).used);
    }

    #[test]
    fn test_alloc_exhausts_at_capacity() {
        let mut pool = TcbPool::new();
        for _ in 0..CFG_MAX_TASKS {
            assert!(pool.alloc().is_some());
        }
        assert!(pool.alloc().is_none());
    }

    #[test]
    fn test_lookup_rejects_free_slots() {
        let mut pool = TcbPool::new();
        let id = pool.alloc().unwrap();
        assert!(pool.lookup(id).is_some());
        pool.reset();
        assert!(pool.lookup(id).is_none());
    }
}
