//! Task management module
//!
//! Task creation, suspension, and introspection. TCBs come out of the
//! kernel's arena and callers only ever hold [`TaskId`] handles.

mod tcb;

pub(crate) use tcb::{Tcb, TcbPool};

use crate::config::{CFG_PRIO_IDLE, CFG_STK_SIZE_MIN, CFG_TASK_NAME_MAX};
use crate::critical::critical_section;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{self, KernelCtx};
use crate::sched;
use crate::types::{Prio, StkElement, TaskEntry, TaskId, TaskState};

/// Snapshot of one task's identity and state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub name: &'static str,
    pub task_id: u32,
    pub prio: Prio,
    pub state: TaskState,
}

/// Create a new task using a static stack
///
/// This is the recommended way to create tasks. The task immediately
/// joins the ready queue; once the scheduler runs, a task more urgent
/// than its creator takes over right away.
///
/// # Arguments
/// * `stack` - Static mutable reference to the stack array
/// * `name` - Task name for debugging
/// * `task_id` - Caller-assigned numeric id
/// * `entry` - Task entry point function
/// * `arg` - Argument passed to the entry function
/// * `prio` - Task priority (0 = highest, 254 = lowest application level)
///
/// # Example
/// ```ignore
/// static mut WORKER_STK: [StkElement; 256] = [0; 256];
///
/// fn worker(_arg: usize) -> ! {
///     loop { /* ... */ }
/// }
///
/// // In main:
/// let worker_id = os_task_create(
///     unsafe { &mut WORKER_STK },
///     "worker",
///     1,
///     worker,
///     0,
///     5,
/// ).expect("task creation failed");
/// ```
pub fn os_task_create(
    stack: &'static mut [StkElement],
    name: &'static str,
    task_id: u32,
    entry: TaskEntry,
    arg: usize,
    prio: Prio,
) -> KernelResult<TaskId> {
    unsafe {
        os_task_create_raw(stack.as_mut_ptr(), stack.len(), name, task_id, entry, arg, prio)
    }
}

/// Create a new task from a raw stack region
///
/// # Safety
/// `stk_base..stk_base + stk_size` must be a writable region that lives
/// as long as the task and is used by nothing else.
pub unsafe fn os_task_create_raw(
    stk_base: *mut StkElement,
    stk_size: usize,
    name: &'static str,
    task_id: u32,
    entry: TaskEntry,
    arg: usize,
    prio: Prio,
) -> KernelResult<TaskId> {
    if stk_base.is_null() {
        return Err(KernelError::InvalidParam);
    }
    if stk_size < CFG_STK_SIZE_MIN {
        return Err(KernelError::StackTooSmall);
    }
    if prio >= CFG_PRIO_IDLE {
        return Err(KernelError::InvalidPriority);
    }
    if name.len() > CFG_TASK_NAME_MAX {
        return Err(KernelError::NameTooLong);
    }
    if !kernel::KERNEL.is_initialized() {
        return Err(KernelError::NotInit);
    }

    let id = critical_section(|cs| {
        let k = kernel::ctx(cs);
        unsafe { os_task_create_internal(k, name, task_id, entry, arg, prio, stk_base, stk_size) }
    })?;

    // interrupt exit runs its own pass, so only task-level creation
    // schedules here
    if kernel::KERNEL.is_started() && kernel::KERNEL.int_nesting() == 0 {
        sched::os_sched(false);
    }
    Ok(id)
}

/// Internal task creation for kernel use: no validation, no scheduling
///
/// # Safety
/// Same stack contract as [`os_task_create_raw`].
pub(crate) unsafe fn os_task_create_internal(
    k: &mut KernelCtx,
    name: &'static str,
    task_id: u32,
    entry: TaskEntry,
    arg: usize,
    prio: Prio,
    stk_base: *mut StkElement,
    stk_size: usize,
) -> KernelResult<TaskId> {
    let id = k.tasks.alloc().ok_or(KernelError::NoFreeTcb)?;

    let stk_ptr = unsafe { crate::port::os_task_stk_init(entry, arg, stk_base, stk_size) };

    let tcb = k.tasks.get_mut(id);
    tcb.name = name;
    tcb.task_id = task_id;
    tcb.prio = prio;
    tcb.state = TaskState::Ready;
    tcb.entry = Some(entry);
    tcb.entry_arg = arg;
    tcb.stk_ptr = stk_ptr;
    tcb.stk_base = stk_base;
    tcb.stk_size = stk_size;

    let enq = k.ready.enqueue(&mut k.tasks, id);
    debug_assert!(enq.is_ok());
    Ok(id)
}

/// Suspend a task
///
/// `None` suspends the caller. Only tasks that are ready or running can
/// be suspended; a task waiting on an object or a delay cannot, and the
/// IDLE task never can.
///
/// # Returns
/// * `Err(KernelError::InvalidState)` - Scheduler not started, or the
///   task is neither ready nor running
/// * `Err(KernelError::InvalidContext)` - Called from interrupt context
/// * `Err(KernelError::InvalidParam)` - Target is the IDLE task
pub fn os_task_suspend(task: Option<TaskId>) -> KernelResult<()> {
    if !kernel::KERNEL.is_started() {
        return Err(KernelError::InvalidState);
    }
    if kernel::KERNEL.int_nesting() > 0 {
        return Err(KernelError::InvalidContext);
    }

    critical_section(|cs| {
        let k = kernel::ctx(cs);
        let id = match task {
            Some(id) => id,
            None => kernel::running_task(k)?,
        };
        let tcb = k.tasks.lookup(id).ok_or(KernelError::NotFound)?;
        if tcb.prio == CFG_PRIO_IDLE {
            return Err(KernelError::InvalidParam);
        }
        match tcb.state {
            TaskState::Running => {
                k.tasks.get_mut(id).state = TaskState::Suspended;
            }
            TaskState::Ready => {
                k.tasks.get_mut(id).state = TaskState::Suspended;
                let removed = k.ready.remove(&mut k.tasks, id);
                debug_assert!(removed);
            }
            _ => return Err(KernelError::InvalidState),
        }
        Ok(())
    })?;

    sched::os_sched(false);
    Ok(())
}

/// Resume a suspended task
///
/// # Returns
/// * `Err(KernelError::InvalidState)` - Scheduler not started, or the
///   task is not suspended
/// * `Err(KernelError::InvalidContext)` - Called from interrupt context
/// * `Err(KernelError::NotFound)` - No such task
pub fn os_task_resume(task: TaskId) -> KernelResult<()> {
    if !kernel::KERNEL.is_started() {
        return Err(KernelError::InvalidState);
    }
    if kernel::KERNEL.int_nesting() > 0 {
        return Err(KernelError::InvalidContext);
    }

    critical_section(|cs| {
        let k = kernel::ctx(cs);
        let tcb = k.tasks.lookup(task).ok_or(KernelError::NotFound)?;
        if tcb.state != TaskState::Suspended {
            return Err(KernelError::InvalidState);
        }
        k.tasks.get_mut(task).state = TaskState::Ready;
        let enq = k.ready.enqueue(&mut k.tasks, task);
        debug_assert!(enq.is_ok());
        Ok(())
    })?;

    sched::os_sched(false);
    Ok(())
}

/// Look up a task's name, numeric id, priority, and state
pub fn os_task_info(task: TaskId) -> KernelResult<TaskInfo> {
    critical_section(|cs| {
        let k = kernel::ctx(cs);
        let tcb = k.tasks.lookup(task).ok_or(KernelError::NotFound)?;
        Ok(TaskInfo {
            name: tcb.name,
            task_id: tcb.task_id,
            prio: tcb.prio,
            state: tcb.state,
        })
    })
}
