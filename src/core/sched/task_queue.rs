//! Priority-ordered TCB queue
//!
//! One queue type backs both the ready list and every wait list. Entries
//! are kept sorted by ascending priority value (0 = highest urgency) with
//! FIFO order among equals, so the head is always the next task to wake.
//!
//! Links are [`TaskId`] indices stored inside the TCBs themselves; the
//! queue owns only the head. A `queued` flag per TCB enforces single
//! membership across all queues in the system.

use crate::error::{KernelError, KernelResult};
use crate::task::{Tcb, TcbPool};
use crate::types::{Prio, TaskId};

/// Intrusive doubly-linked queue of TCBs, sorted by priority
#[derive(Debug)]
pub(crate) struct TaskQueue {
    head: Option<TaskId>,
}

impl TaskQueue {
    /// Create a new empty queue
    pub const fn new() -> Self {
        TaskQueue { head: None }
    }

    /// Check if the queue is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Insert a task at its priority position: before the first entry
    /// with a strictly greater priority value, after all equal ones.
    ///
    /// Fails with `EnqueueFailed` if the task is already linked into
    /// any queue.
    pub fn enqueue(&mut self, tasks: &mut TcbPool, id: TaskId) -> KernelResult<()> {
        if tasks.get(id).queued {
            return Err(KernelError::EnqueueFailed);
        }
        let prio = tasks.get(id).prio;

        // Walk to the insertion point. `after` trails one entry behind
        // `before`, so the new task lands between them.
        let mut after: Option<TaskId> = None;
        let mut before = self.head;
        while let Some(cur) = before {
            if tasks.get(cur).prio > prio {
                break;
            }
            after = Some(cur);
            before = tasks.get(cur).next;
        }

        {
            let tcb = tasks.get_mut(id);
            tcb.prev = after;
            tcb.next = before;
            tcb.queued = true;
        }
        match after {
            Some(a) => tasks.get_mut(a).next = Some(id),
            None => self.head = Some(id),
        }
        if let Some(b) = before {
            tasks.get_mut(b).prev = Some(id);
        }
        Ok(())
    }

    /// Remove and return the head of the queue
    pub fn dequeue_head(&mut self, tasks: &mut TcbPool) -> Option<TaskId> {
        let id = self.head?;
        self.head = tasks.get(id).next;
        if let Some(next) = self.head {
            tasks.get_mut(next).prev = None;
        }
        Self::clear_links(tasks.get_mut(id));
        Some(id)
    }

    /// Remove and return the head only if its priority value is at or
    /// below `max_prio`. Leaves the queue untouched otherwise.
    pub fn dequeue_head_within(
        &mut self,
        tasks: &mut TcbPool,
        max_prio: Prio,
    ) -> Option<TaskId> {
        let head = self.head?;
        if tasks.get(head).prio > max_prio {
            return None;
        }
        self.dequeue_head(tasks)
    }

    /// Unlink a task from anywhere in this queue.
    ///
    /// Returns `false` when the task is not a member. A timeout racing
    /// an ordinary wake-up hits that case legitimately; the membership
    /// scan also keeps a stale id from corrupting a different queue.
    pub fn remove(&mut self, tasks: &mut TcbPool, id: TaskId) -> bool {
        let mut cur = self.head;
        while let Some(c) = cur {
            if c == id {
                break;
            }
            cur = tasks.get(c).next;
        }
        if cur.is_none() {
            return false;
        }

        let (prev, next) = {
            let tcb = tasks.get(id);
            (tcb.prev, tcb.next)
        };
        match prev {
            Some(p) => tasks.get_mut(p).next = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            tasks.get_mut(n).prev = prev;
        }
        Self::clear_links(tasks.get_mut(id));
        true
    }

    fn clear_links(tcb: &mut Tcb) {
        tcb.prev = None;
        tcb.next = None;
        tcb.queued = false;
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn(pool: &mut TcbPool, prio: Prio) -> TaskId {
        let id = pool.alloc().unwrap();
        pool.get_mut(id).prio = prio;
        id
    }

    #[test]
    fn test_enqueue_orders_by_priority() {
        let mut pool = TcbPool::new();
        let mut q = TaskQueue::new();
        let lo = spawn(&mut pool, 5);
        let hi = spawn(&mut pool, 1);
        let mid = spawn(&mut pool, 3);
        q.enqueue(&mut pool, lo).unwrap();
        q.enqueue(&mut pool, hi).unwrap();
        q.enqueue(&mut pool, mid).unwrap();

        assert_eq!(q.dequeue_head(&mut pool), Some(hi));
        assert_eq!(q.dequeue_head(&mut pool), Some(mid));
        assert_eq!(q.dequeue_head(&mut pool), Some(lo));
        assert_eq!(q.dequeue_head(&mut pool), None);
    }

    #[test]
    fn test_equal_priority_keeps_fifo_order() {
        let mut pool = TcbPool::new();
        let mut q = TaskQueue::new();
        let a = spawn(&mut pool, 4);
        let b = spawn(&mut pool, 4);
        let c = spawn(&mut pool, 4);
        for id in [a, b, c] {
            q.enqueue(&mut pool, id).unwrap();
        }

        assert_eq!(q.dequeue_head(&mut pool), Some(a));
        assert_eq!(q.dequeue_head(&mut pool), Some(b));
        assert_eq!(q.dequeue_head(&mut pool), Some(c));
    }

    #[test]
    fn test_enqueue_rejects_double_membership() {
        let mut pool = TcbPool::new();
        let mut q = TaskQueue::new();
        let id = spawn(&mut pool, 2);
        q.enqueue(&mut pool, id).unwrap();
        assert_eq!(q.enqueue(&mut pool, id), Err(KernelError::EnqueueFailed));
    }

    #[test]
    fn test_dequeue_head_within_honors_threshold() {
        let mut pool = TcbPool::new();
        let mut q = TaskQueue::new();
        let id = spawn(&mut pool, 3);
        q.enqueue(&mut pool, id).unwrap();

        assert_eq!(q.dequeue_head_within(&mut pool, 2), None);
        assert!(!q.is_empty());
        assert_eq!(q.dequeue_head_within(&mut pool, 3), Some(id));
        assert!(q.is_empty());
    }

    #[test]
    fn test_remove_relinks_neighbors() {
        let mut pool = TcbPool::new();
        let mut q = TaskQueue::new();
        let a = spawn(&mut pool, 1);
        let b = spawn(&mut pool, 2);
        let c = spawn(&mut pool, 3);
        for id in [a, b, c] {
            q.enqueue(&mut pool, id).unwrap();
        }

        assert!(q.remove(&mut pool, b));
        assert!(!pool.get(b).queued);
        assert_eq!(q.dequeue_head(&mut pool), Some(a));
        assert_eq!(q.dequeue_head(&mut pool), Some(c));
    }

    #[test]
    fn test_remove_refuses_non_member() {
        let mut pool = TcbPool::new();
        let mut q = TaskQueue::new();
        let inside = spawn(&mut pool, 1);
        let outside = spawn(&mut pool, 1);
        q.enqueue(&mut pool, inside).unwrap();

        assert!(!q.remove(&mut pool, outside));
        assert!(pool.get(inside).queued);
        assert_eq!(q.dequeue_head(&mut pool), Some(inside));
    }

    #[test]
    fn test_requeue_after_dequeue_is_allowed() {
        let mut pool = TcbPool::new();
        let mut q = TaskQueue::new();
        let id = spawn(&mut pool, 7);
        q.enqueue(&mut pool, id).unwrap();
        assert_eq!(q.dequeue_head(&mut pool), Some(id));
        q.enqueue(&mut pool, id).unwrap();
        assert_eq!(q.dequeue_head(&mut pool), Some(id));
    }
}
