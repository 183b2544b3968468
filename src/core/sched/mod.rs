//! Scheduler module
//!
//! Priority-based preemptive scheduler over a single ordered ready
//! queue. Preemption urgency depends on where the scheduling pass runs:
//! tick-level passes let equal-priority peers rotate round-robin,
//! voluntary passes only yield to strictly more urgent tasks.

mod task_queue;

pub(crate) use task_queue::TaskQueue;

use crate::critical::critical_section;
use crate::kernel;
use crate::task::Tcb;
use crate::types::TaskState;

/// Main scheduling point
///
/// Decides whether the CPU changes hands and, if so, triggers the
/// context switch. Called after every operation that may change task
/// readiness and on the way out of the outermost interrupt handler.
///
/// If the running task has left the `Running` state, the head of the
/// ready queue takes over unconditionally. Otherwise a ready task may
/// preempt it:
/// * `from_tick` - at equal or higher urgency, which is what rotates
///   equal-priority tasks
/// * voluntary - only at strictly higher urgency, and a priority-0
///   task is never displaced this way
pub(crate) fn os_sched(from_tick: bool) {
    if !kernel::KERNEL.is_started() {
        return;
    }

    critical_section(|cs| {
        let k = kernel::ctx(cs);
        let Some(cur) = k.current else {
            return;
        };

        let next = if k.tasks.get(cur).state != TaskState::Running {
            // the running task blocked; whoever heads the queue runs,
            // and with nothing ready the CPU simply stays put
            k.ready.dequeue_head(&mut k.tasks)
        } else {
            let cur_prio = k.tasks.get(cur).prio;
            let threshold = if from_tick {
                Some(cur_prio)
            } else if cur_prio > 0 {
                Some(cur_prio - 1)
            } else {
                None
            };
            let next =
                threshold.and_then(|max| k.ready.dequeue_head_within(&mut k.tasks, max));
            if next.is_some() {
                // preempted: back into the queue behind its peers
                k.tasks.get_mut(cur).state = TaskState::Ready;
                let enq = k.ready.enqueue(&mut k.tasks, cur);
                debug_assert!(enq.is_ok());
            }
            next
        };

        let Some(next) = next else {
            return;
        };

        k.tasks.get_mut(next).state = TaskState::Running;
        k.current = Some(next);

        // a task may dequeue itself right back; only a real change of
        // TCB costs a switch
        if next != cur {
            let old: *mut Tcb = k.tasks.get_mut(cur);
            let new: *mut Tcb = k.tasks.get_mut(next);
            crate::port::os_ctx_sw(old, new);
        }
    });
}
