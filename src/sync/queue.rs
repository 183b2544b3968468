//! Fixed-size message queue implementation
//!
//! A queue copies whole messages of one fixed size through a caller-owned
//! ring buffer. Producers and consumers block on independent wait lists,
//! both priority-ordered, and every transfer wakes at most one task from
//! the opposite side. Like semaphores, queues live in a fixed arena and
//! are addressed through generation-validated [`MsgQueue`] handles.

use crate::config::CFG_MAX_QUEUES;
use crate::critical::critical_section;
use crate::error::{KernelError, KernelResult};
use crate::kernel;
use crate::sched::{self, TaskQueue};
use crate::time::TimerAction;
use crate::types::{ObjRef, PendOn, TaskId, TaskState, Timeout, WakeStatus};

#[derive(Debug)]
pub(crate) struct QueueSlot {
    live: bool,
    gen: u16,
    buf: *mut u8,
    unit_size: usize,
    capacity: usize,
    /// Byte offset of the next insert, wraps at `unit_size * capacity`
    insert_index: usize,
    /// Byte offset of the next remove, same wrap point
    remove_index: usize,
    stored: usize,
    put_waiters: TaskQueue,
    get_waiters: TaskQueue,
}

impl QueueSlot {
    const fn new() -> Self {
        QueueSlot {
            live: false,
            gen: 0,
            buf: core::ptr::null_mut(),
            unit_size: 0,
            capacity: 0,
            insert_index: 0,
            remove_index: 0,
            stored: 0,
            put_waiters: TaskQueue::new(),
            get_waiters: TaskQueue::new(),
        }
    }

    /// Copy one message in at the insert cursor. Caller checked occupancy.
    fn write_msg(&mut self, msg: &[u8]) {
        debug_assert!(self.stored < self.capacity);
        debug_assert_eq!(msg.len(), self.unit_size);
        // the buffer is exclusively the kernel's; both cursors stay
        // inside it by the wrap arithmetic below
        unsafe {
            core::ptr::copy_nonoverlapping(
                msg.as_ptr(),
                self.buf.add(self.insert_index),
                self.unit_size,
            );
        }
        self.insert_index += self.unit_size;
        if self.insert_index >= self.unit_size * self.capacity {
            self.insert_index = 0;
        }
        self.stored += 1;
    }

    /// Copy one message out at the remove cursor. Caller checked occupancy.
    fn read_msg(&mut self, out: &mut [u8]) {
        debug_assert!(self.stored > 0);
        debug_assert!(out.len() >= self.unit_size);
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.buf.add(self.remove_index),
                out.as_mut_ptr(),
                self.unit_size,
            );
        }
        self.remove_index += self.unit_size;
        if self.remove_index >= self.unit_size * self.capacity {
            self.remove_index = 0;
        }
        self.stored -= 1;
    }
}

const QUEUE_INIT: QueueSlot = QueueSlot::new();

/// Fixed arena of message queue slots
pub(crate) struct QueuePool {
    slots: [QueueSlot; CFG_MAX_QUEUES],
}

impl QueuePool {
    pub const fn new() -> Self {
        QueuePool {
            slots: [QUEUE_INIT; CFG_MAX_QUEUES],
        }
    }

    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            let gen = slot.gen.wrapping_add(slot.live as u16);
            *slot = QueueSlot::new();
            slot.gen = gen;
        }
    }

    fn alloc(&mut self, buf: *mut u8, unit_size: usize, capacity: usize) -> KernelResult<ObjRef> {
        let Some(idx) = self.slots.iter().position(|s| !s.live) else {
            return Err(KernelError::NoFreeQueue);
        };
        let slot = &mut self.slots[idx];
        debug_assert!(slot.put_waiters.is_empty() && slot.get_waiters.is_empty());
        slot.live = true;
        slot.buf = buf;
        slot.unit_size = unit_size;
        slot.capacity = capacity;
        slot.insert_index = 0;
        slot.remove_index = 0;
        slot.stored = 0;
        Ok(ObjRef {
            idx: idx as u8,
            gen: slot.gen,
        })
    }

    /// Resolve a handle, refusing stale generations
    fn lookup(&mut self, r: ObjRef) -> KernelResult<&mut QueueSlot> {
        let slot = &mut self.slots[r.idx as usize];
        if !slot.live || slot.gen != r.gen {
            return Err(KernelError::Deleted);
        }
        Ok(slot)
    }

    fn slot_mut(&mut self, idx: u8) -> &mut QueueSlot {
        &mut self.slots[idx as usize]
    }

    fn retire(&mut self, idx: u8) {
        let slot = &mut self.slots[idx as usize];
        debug_assert!(slot.put_waiters.is_empty() && slot.get_waiters.is_empty());
        slot.live = false;
        slot.gen = slot.gen.wrapping_add(1);
        slot.buf = core::ptr::null_mut();
        slot.stored = 0;
    }
}

/// One pass of a blocking queue operation
enum Attempt {
    /// Message transferred; `woke` records whether a peer was readied
    Done { woke: bool },
    /// Caller was parked on a wait list
    Blocked(TaskId),
}

/// Copyable handle to an arena message queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgQueue(pub(crate) ObjRef);

impl MsgQueue {
    /// Create a queue of `capacity` messages of `unit_size` bytes each,
    /// backed by `buf`
    ///
    /// Taking the buffer as `&'static mut` moves it into the queue, so
    /// the same storage cannot back two queues.
    ///
    /// # Returns
    /// * `Err(KernelError::InvalidParam)` - Zero `unit_size`/`capacity`,
    ///   or `buf` smaller than `unit_size * capacity`
    /// * `Err(KernelError::NoFreeQueue)` - Arena exhausted
    /// * `Err(KernelError::NotInit)` - Kernel not initialized
    pub fn create(
        buf: &'static mut [u8],
        unit_size: usize,
        capacity: usize,
    ) -> KernelResult<MsgQueue> {
        let Some(extent) = unit_size.checked_mul(capacity) else {
            return Err(KernelError::InvalidParam);
        };
        if unit_size == 0 || capacity == 0 || buf.len() < extent {
            return Err(KernelError::InvalidParam);
        }
        if !kernel::KERNEL.is_initialized() {
            return Err(KernelError::NotInit);
        }
        let ptr = buf.as_mut_ptr();
        critical_section(|cs| kernel::ctx(cs).queues.alloc(ptr, unit_size, capacity))
            .map(MsgQueue)
    }

    /// Insert one message, blocking per `timeout` while the queue is full
    ///
    /// `msg` must be exactly one unit long. A successful insert wakes the
    /// most urgent waiting consumer, if any. Safe from interrupt handlers
    /// with `NoWait`.
    ///
    /// A producer woken because space appeared re-checks occupancy and
    /// parks again if another producer claimed the slot first.
    ///
    /// # Returns
    /// * `Err(KernelError::WouldBlock)` - `NoWait` and full
    /// * `Err(KernelError::Timeout)` - Bounded wait elapsed
    /// * `Err(KernelError::Deleted)` - Handle stale, or deleted while waiting
    /// * `Err(KernelError::InvalidParam)` - Wrong message length or `Ticks(0)`
    pub fn give(&self, msg: &[u8], timeout: Timeout) -> KernelResult<()> {
        let ticks = match timeout {
            Timeout::Ticks(0) => return Err(KernelError::InvalidParam),
            Timeout::Ticks(n) => Some(n),
            Timeout::Forever | Timeout::NoWait => None,
        };

        loop {
            let attempt = critical_section(|cs| {
                let k = kernel::ctx(cs);
                let slot = k.queues.lookup(self.0)?;
                if msg.len() != slot.unit_size {
                    return Err(KernelError::InvalidParam);
                }

                if slot.stored < slot.capacity {
                    slot.write_msg(msg);
                    let woken = slot.get_waiters.dequeue_head(&mut k.tasks);
                    if let Some(w) = woken {
                        kernel::wake_task(k, w, WakeStatus::Success);
                    }
                    return Ok(Attempt::Done {
                        woke: woken.is_some(),
                    });
                }

                if matches!(timeout, Timeout::NoWait) {
                    return Err(KernelError::WouldBlock);
                }

                let cur = kernel::running_task(k)?;
                let slot = k.queues.lookup(self.0)?;
                let tcb = k.tasks.get_mut(cur);
                tcb.state = TaskState::Pended;
                tcb.wake_status = WakeStatus::Pending;
                tcb.pend_on = PendOn::QueuePut(self.0.idx);
                let enq = slot.put_waiters.enqueue(&mut k.tasks, cur);
                debug_assert!(enq.is_ok());

                if let Some(n) = ticks {
                    let action = TimerAction::QueuePutTimeout {
                        task: cur,
                        queue: self.0,
                    };
                    match k.timers.register(n, action) {
                        Ok(timer) => k.tasks.get_mut(cur).timeout_timer = Some(timer),
                        Err(e) => {
                            let slot = k.queues.lookup(self.0)?;
                            slot.put_waiters.remove(&mut k.tasks, cur);
                            let tcb = k.tasks.get_mut(cur);
                            tcb.state = TaskState::Running;
                            tcb.pend_on = PendOn::Nothing;
                            return Err(e);
                        }
                    }
                }
                Ok(Attempt::Blocked(cur))
            })?;

            match attempt {
                Attempt::Done { woke } => {
                    if woke && kernel::KERNEL.int_nesting() == 0 {
                        sched::os_sched(false);
                    }
                    return Ok(());
                }
                Attempt::Blocked(id) => {
                    sched::os_sched(false);
                    let status =
                        critical_section(|cs| kernel::ctx(cs).tasks.get(id).wake_status);
                    match status {
                        // space appeared; go around and try to claim it
                        WakeStatus::Success => continue,
                        WakeStatus::Timeout => return Err(KernelError::Timeout),
                        WakeStatus::Deleted => return Err(KernelError::Deleted),
                        // no switch happened (hosted stub port)
                        WakeStatus::Pending => return Err(KernelError::WouldBlock),
                    }
                }
            }
        }
    }

    /// Remove one message into `buf`, blocking per `timeout` while empty
    ///
    /// `buf` must hold at least one unit; exactly one unit is written. A
    /// successful remove wakes the most urgent waiting producer, if any.
    /// Safe from interrupt handlers with `NoWait`.
    ///
    /// # Returns
    /// * `Err(KernelError::WouldBlock)` - `NoWait` and empty
    /// * `Err(KernelError::Timeout)` - Bounded wait elapsed
    /// * `Err(KernelError::Deleted)` - Handle stale, or deleted while waiting
    /// * `Err(KernelError::InvalidParam)` - `buf` too small or `Ticks(0)`
    pub fn take(&self, buf: &mut [u8], timeout: Timeout) -> KernelResult<()> {
        let ticks = match timeout {
            Timeout::Ticks(0) => return Err(KernelError::InvalidParam),
            Timeout::Ticks(n) => Some(n),
            Timeout::Forever | Timeout::NoWait => None,
        };

        loop {
            let attempt = critical_section(|cs| {
                let k = kernel::ctx(cs);
                let slot = k.queues.lookup(self.0)?;
                if buf.len() < slot.unit_size {
                    return Err(KernelError::InvalidParam);
                }

                if slot.stored > 0 {
                    slot.read_msg(buf);
                    let woken = slot.put_waiters.dequeue_head(&mut k.tasks);
                    if let Some(w) = woken {
                        kernel::wake_task(k, w, WakeStatus::Success);
                    }
                    return Ok(Attempt::Done {
                        woke: woken.is_some(),
                    });
                }

                if matches!(timeout, Timeout::NoWait) {
                    return Err(KernelError::WouldBlock);
                }

                let cur = kernel::running_task(k)?;
                let slot = k.queues.lookup(self.0)?;
                let tcb = k.tasks.get_mut(cur);
                tcb.state = TaskState::Pended;
                tcb.wake_status = WakeStatus::Pending;
                tcb.pend_on = PendOn::QueueGet(self.0.idx);
                let enq = slot.get_waiters.enqueue(&mut k.tasks, cur);
                debug_assert!(enq.is_ok());

                if let Some(n) = ticks {
                    let action = TimerAction::QueueGetTimeout {
                        task: cur,
                        queue: self.0,
                    };
                    match k.timers.register(n, action) {
                        Ok(timer) => k.tasks.get_mut(cur).timeout_timer = Some(timer),
                        Err(e) => {
                            let slot = k.queues.lookup(self.0)?;
                            slot.get_waiters.remove(&mut k.tasks, cur);
                            let tcb = k.tasks.get_mut(cur);
                            tcb.state = TaskState::Running;
                            tcb.pend_on = PendOn::Nothing;
                            return Err(e);
                        }
                    }
                }
                Ok(Attempt::Blocked(cur))
            })?;

            match attempt {
                Attempt::Done { woke } => {
                    if woke && kernel::KERNEL.int_nesting() == 0 {
                        sched::os_sched(false);
                    }
                    return Ok(());
                }
                Attempt::Blocked(id) => {
                    sched::os_sched(false);
                    let status =
                        critical_section(|cs| kernel::ctx(cs).tasks.get(id).wake_status);
                    match status {
                        // a message arrived; go around and try to claim it
                        WakeStatus::Success => continue,
                        WakeStatus::Timeout => return Err(KernelError::Timeout),
                        WakeStatus::Deleted => return Err(KernelError::Deleted),
                        // no switch happened (hosted stub port)
                        WakeStatus::Pending => return Err(KernelError::WouldBlock),
                    }
                }
            }
        }
    }

    /// Delete the queue, evicting waiters from both lists
    ///
    /// Pending messages are discarded with the buffer; every waiter wakes
    /// with the deleted status and outstanding handles turn stale.
    pub fn delete(&self) -> KernelResult<()> {
        let woke_any = critical_section(|cs| {
            let k = kernel::ctx(cs);
            k.queues.lookup(self.0)?;

            let mut woke = false;
            while let Some(w) = k
                .queues
                .slot_mut(self.0.idx)
                .put_waiters
                .dequeue_head(&mut k.tasks)
            {
                kernel::wake_task(k, w, WakeStatus::Deleted);
                woke = true;
            }
            while let Some(w) = k
                .queues
                .slot_mut(self.0.idx)
                .get_waiters
                .dequeue_head(&mut k.tasks)
            {
                kernel::wake_task(k, w, WakeStatus::Deleted);
                woke = true;
            }
            k.queues.retire(self.0.idx);
            Ok(woke)
        })?;

        if woke_any && kernel::KERNEL.int_nesting() == 0 {
            sched::os_sched(false);
        }
        Ok(())
    }

    /// Number of messages currently stored
    pub fn stored(&self) -> KernelResult<usize> {
        critical_section(|cs| kernel::ctx(cs).queues.lookup(self.0).map(|s| s.stored))
    }
}

/// Timeout action for a blocked producer. The consumer side may have won
/// the race already, in which case there is nothing left to do.
pub(crate) fn put_timeout_expired(task: TaskId, queue: ObjRef) {
    critical_section(|cs| {
        let k = kernel::ctx(cs);
        let Ok(slot) = k.queues.lookup(queue) else {
            return;
        };
        if !slot.put_waiters.remove(&mut k.tasks, task) {
            return;
        }
        kernel::wake_task(k, task, WakeStatus::Timeout);
    });
    // no scheduling pass here; interrupt exit runs one
}

/// Timeout action for a blocked consumer
pub(crate) fn get_timeout_expired(task: TaskId, queue: ObjRef) {
    critical_section(|cs| {
        let k = kernel::ctx(cs);
        let Ok(slot) = k.queues.lookup(queue) else {
            return;
        };
        if !slot.get_waiters.remove(&mut k.tasks, task) {
            return;
        }
        kernel::wake_task(k, task, WakeStatus::Timeout);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot_over(buf: &mut [u8], unit_size: usize, capacity: usize) -> QueueSlot {
        let mut slot = QueueSlot::new();
        slot.live = true;
        slot.buf = buf.as_mut_ptr();
        slot.unit_size = unit_size;
        slot.capacity = capacity;
        slot
    }

    #[test]
    fn test_ring_cursors_wrap_and_preserve_order() {
        let mut buf = [0u8; 12];
        let mut slot = slot_over(&mut buf, 4, 3);
        let mut out = [0u8; 4];

        slot.write_msg(b"aaaa");
        slot.write_msg(b"bbbb");
        slot.write_msg(b"cccc");
        assert_eq!(slot.stored, 3);
        assert_eq!(slot.insert_index, 0); // wrapped

        slot.read_msg(&mut out);
        assert_eq!(&out, b"aaaa");
        slot.write_msg(b"dddd");
        assert_eq!(slot.insert_index, 4);

        slot.read_msg(&mut out);
        assert_eq!(&out, b"bbbb");
        slot.read_msg(&mut out);
        assert_eq!(&out, b"cccc");
        slot.read_msg(&mut out);
        assert_eq!(&out, b"dddd");
        assert_eq!(slot.stored, 0);
        assert_eq!(slot.remove_index, 4);
    }

    #[test]
    fn test_single_unit_queue_reuses_offset_zero() {
        let mut buf = [0u8; 2];
        let mut slot = slot_over(&mut buf, 2, 1);
        let mut out = [0u8; 2];

        for msg in [b"hi", b"yo", b"ok"] {
            slot.write_msg(msg);
            assert_eq!(slot.insert_index, 0);
            slot.read_msg(&mut out);
            assert_eq!(&out, msg);
            assert_eq!(slot.remove_index, 0);
        }
    }

    #[test]
    fn test_alloc_and_retire_cycle_generations() {
        let mut pool = QueuePool::new();
        let mut buf = [0u8; 8];
        let old = pool.alloc(buf.as_mut_ptr(), 4, 2).unwrap();
        assert!(pool.lookup(old).is_ok());

        pool.retire(old.idx);
        assert_eq!(pool.lookup(old).unwrap_err(), KernelError::Deleted);

        let new = pool.alloc(buf.as_mut_ptr(), 4, 2).unwrap();
        assert_eq!(new.idx, old.idx);
        assert!(pool.lookup(old).is_err());
        assert!(pool.lookup(new).is_ok());
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut pool = QueuePool::new();
        let mut buf = [0u8; 4];
        for _ in 0..CFG_MAX_QUEUES {
            pool.alloc(buf.as_mut_ptr(), 4, 1).unwrap();
        }
        assert_eq!(
            pool.alloc(buf.as_mut_ptr(), 4, 1).unwrap_err(),
            KernelError::NoFreeQueue
        );
    }
}
